//! Order book and feed reconciliation error types

use super::level::Side;
use thiserror::Error;

/// Errors that can occur within the OrderBook
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum OrderBookError {
    /// A message is not newer than the book state.
    ///
    /// Recovered silently by the sequence gate; only surfaced by direct
    /// `apply_*` calls on the book.
    #[error("stale sequence {seq}: book is already at {last_update_id}")]
    StaleSequence {
        /// Sequence id carried by the rejected message.
        seq: u64,
        /// Sequence id the book is currently at.
        last_update_id: u64,
    },

    /// A level entry had a non-numeric or negative price or quantity.
    ///
    /// The entry is dropped and the rest of the message still applies.
    #[error("invalid {side} level data (price {price:?}, quantity {quantity:?}): {reason}")]
    InvalidLevelData {
        /// Side the entry was found on.
        side: Side,
        /// Raw price text.
        price: String,
        /// Raw quantity text.
        quantity: String,
        /// What made the entry invalid.
        reason: String,
    },

    /// A snapshot or restore targeted a different symbol.
    #[error("snapshot symbol {actual} does not match order book symbol {expected}")]
    SymbolMismatch {
        /// Symbol of this book.
        expected: String,
        /// Symbol carried by the payload.
        actual: String,
    },

    /// Error while serializing snapshot data
    #[error("serialization error: {message}")]
    SerializationError {
        /// Underlying error message
        message: String,
    },

    /// Error while deserializing snapshot or feed data
    #[error("deserialization error: {message}")]
    DeserializationError {
        /// Underlying error message
        message: String,
    },

    /// Snapshot integrity check failed
    #[error("checksum mismatch: expected {expected}, but computed {actual}")]
    ChecksumMismatch {
        /// Expected checksum value
        expected: String,
        /// Actual checksum value
        actual: String,
    },

    /// Snapshot package carries an unknown format version.
    #[error("unsupported snapshot version: {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the payload.
        found: u32,
        /// Version this build understands.
        expected: u32,
    },
}

/// Errors raised while reconciling a feed into a book.
///
/// Only [`SyncError::SequenceGap`] and [`SyncError::ConnectionLost`] are
/// meant for the strategy layer; both mean "the book is not fresh until a
/// new snapshot arrives".
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// A delta does not extend the book contiguously.
    #[error(
        "sequence gap on {symbol}: book at {last_update_id}, delta {seq} (prev {prev_seq:?})"
    )]
    SequenceGap {
        /// Symbol of the affected book.
        symbol: String,
        /// Sequence id the book is at.
        last_update_id: u64,
        /// Sequence id carried by the delta.
        seq: u64,
        /// Prior-sequence field carried by the delta, when the feed has one.
        prev_seq: Option<u64>,
    },

    /// The feed connection dropped; a reconnect and snapshot are needed.
    #[error("feed connection lost for {symbol}")]
    ConnectionLost {
        /// Symbol of the affected book.
        symbol: String,
    },

    /// No book is registered for the symbol.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// The per-symbol processing task is gone.
    #[error("feed channel closed for {0}")]
    ChannelClosed(String),

    /// Underlying book error.
    #[error(transparent)]
    Book(#[from] OrderBookError),
}

impl SyncError {
    /// Whether the error asks the caller to fetch a fresh snapshot.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            SyncError::SequenceGap { .. } | SyncError::ConnectionLost { .. }
        )
    }
}
