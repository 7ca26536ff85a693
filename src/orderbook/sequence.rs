//! Sequence gate: the single writer of one symbol's book.
//!
//! The gate admits snapshots and deltas in feed order, drops replays,
//! detects gaps and tracks whether the book can be trusted. The book is
//! shared with readers through [`BookHandle`]; every mutation and every
//! state transition happens under the book's write lock, so a forced
//! resync can never interleave with a half-applied delta.

use super::book::{ApplyReport, BookDepth, OrderBook};
use super::error::SyncError;
use super::feed::{FeedMessage, RawLevel, parse_levels};
use super::level::{LevelUpdate, Side};
use super::store::{PriceLevelStore, SkipListStore, StoreConfig};
use crate::utils::current_time_millis;
use crossbeam::atomic::AtomicCell;
use parking_lot::{RwLock, RwLockReadGuard};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{Span, debug, error, info, info_span, trace, warn};

/// Trust state of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Book mirrors the exchange.
    Synced,
    /// A gap was detected; deltas are discarded until a resync starts.
    Stale,
    /// Waiting for a snapshot. Also the initial state.
    Resyncing,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Synced => write!(f, "SYNCED"),
            SyncState::Stale => write!(f, "STALE"),
            SyncState::Resyncing => write!(f, "RESYNCING"),
        }
    }
}

/// How the feed chains consecutive deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ContiguityRule {
    /// Any newer sequence id extends the book.
    #[default]
    Monotonic,
    /// Sequence ids advance by at most `step`; a larger jump is a gap.
    Increment(u64),
    /// Each delta names its predecessor in `prev_seq`, which must equal
    /// the book's `last_update_id`. Deltas without the field fall back to
    /// [`ContiguityRule::Monotonic`].
    PrevSeq,
}

impl ContiguityRule {
    /// Whether a delta with `seq` / `prev_seq` directly extends `last_update_id`.
    ///
    /// Callers have already rejected `seq <= last_update_id`.
    pub fn is_contiguous(&self, last_update_id: u64, seq: u64, prev_seq: Option<u64>) -> bool {
        match self {
            ContiguityRule::Monotonic => true,
            ContiguityRule::Increment(step) => seq - last_update_id <= *step,
            ContiguityRule::PrevSeq => prev_seq.is_none_or(|prev| prev == last_update_id),
        }
    }
}

/// Why a fresh snapshot is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResyncReason {
    /// A delta did not extend the book.
    Gap {
        /// Sequence id of the rejected delta.
        seq: u64,
        /// Its prior-sequence field, if any.
        prev_seq: Option<u64>,
    },
    /// The feed connection dropped.
    ConnectionLost,
    /// Requested by the caller.
    Manual,
}

/// Signal for the feed collaborator to reconnect or refetch a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncRequest {
    /// Symbol to resync.
    pub symbol: String,
    /// Sequence id the local book was at.
    pub last_update_id: u64,
    /// Trigger of the resync.
    pub reason: ResyncReason,
    /// Wall clock of the request in milliseconds.
    pub requested_at: u64,
}

impl ResyncRequest {
    /// The error the strategy layer should see for this request.
    ///
    /// `None` for manual resyncs, which are not failures.
    pub fn error(&self) -> Option<SyncError> {
        match self.reason {
            ResyncReason::Gap { seq, prev_seq } => Some(SyncError::SequenceGap {
                symbol: self.symbol.clone(),
                last_update_id: self.last_update_id,
                seq,
                prev_seq,
            }),
            ResyncReason::ConnectionLost => Some(SyncError::ConnectionLost {
                symbol: self.symbol.clone(),
            }),
            ResyncReason::Manual => None,
        }
    }
}

/// Result of feeding one message through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Snapshot applied; the book is synced.
    Snapshot(ApplyReport),
    /// Delta applied.
    Applied(ApplyReport),
    /// Message not newer than the book; nothing changed.
    Duplicate {
        /// Sequence id of the dropped message.
        seq: u64,
        /// Sequence id the book is at.
        last_update_id: u64,
    },
    /// Delta discarded because the book is waiting for a snapshot.
    Ignored {
        /// Sequence id of the dropped delta.
        seq: u64,
        /// State at the time.
        state: SyncState,
    },
}

/// Running totals of what the gate did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCounters {
    /// Snapshots applied.
    pub snapshots: u64,
    /// Deltas applied.
    pub deltas: u64,
    /// Stale or replayed messages dropped.
    pub duplicates: u64,
    /// Deltas discarded while not synced.
    pub ignored: u64,
    /// Gaps detected.
    pub gaps: u64,
    /// Level entries dropped as invalid.
    pub invalid_levels: u64,
}

/// Read-only view of a gated book.
///
/// Cheap to clone; every query takes the read lock for its own duration
/// and therefore sees one consistent point in time.
pub struct BookHandle<S = SkipListStore> {
    symbol: Arc<str>,
    book: Arc<RwLock<OrderBook<S>>>,
    state: Arc<AtomicCell<SyncState>>,
}

impl<S> Clone for BookHandle<S> {
    fn clone(&self) -> Self {
        Self {
            symbol: Arc::clone(&self.symbol),
            book: Arc::clone(&self.book),
            state: Arc::clone(&self.state),
        }
    }
}

impl<S> fmt::Debug for BookHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookHandle")
            .field("symbol", &self.symbol)
            .field("state", &self.state.load())
            .finish()
    }
}

impl<S: PriceLevelStore> BookHandle<S> {
    /// Symbol of the book.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Current trust state.
    pub fn state(&self) -> SyncState {
        self.state.load()
    }

    /// Whether the book currently mirrors the exchange.
    ///
    /// Queries keep working when this is `false`, but the data may be stale.
    pub fn is_fresh(&self) -> bool {
        self.state.load() == SyncState::Synced
    }

    /// Read guard over the book for multi-step queries.
    pub fn read(&self) -> RwLockReadGuard<'_, OrderBook<S>> {
        self.book.read()
    }

    /// Best bid and best ask prices.
    pub fn best_bid_ask(&self) -> (Option<Decimal>, Option<Decimal>) {
        self.book.read().best_bid_ask()
    }

    /// Top `n` levels per side.
    pub fn depth(&self, n: usize) -> BookDepth {
        self.book.read().depth(n)
    }

    /// Mid price, when both sides are populated.
    pub fn mid_price(&self) -> Option<Decimal> {
        self.book.read().mid_price()
    }

    /// Spread, when both sides are populated.
    pub fn spread(&self) -> Option<Decimal> {
        self.book.read().spread()
    }

    /// Sequence id of the last applied message.
    pub fn last_update_id(&self) -> u64 {
        self.book.read().last_update_id()
    }
}

/// Single writer of one symbol's [`OrderBook`].
pub struct SequenceGate<S = SkipListStore> {
    symbol: Arc<str>,
    book: Arc<RwLock<OrderBook<S>>>,
    state: Arc<AtomicCell<SyncState>>,
    rule: ContiguityRule,
    counters: GateCounters,
    span: Span,
}

impl<S> fmt::Debug for SequenceGate<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceGate")
            .field("symbol", &self.symbol)
            .field("state", &self.state.load())
            .field("rule", &self.rule)
            .field("counters", &self.counters)
            .finish()
    }
}

impl<S: PriceLevelStore> SequenceGate<S> {
    /// Creates a gate over an empty book, waiting for its first snapshot.
    pub fn new(symbol: &str, rule: ContiguityRule, config: &StoreConfig) -> Self {
        let span = info_span!("sequence_gate", symbol = %symbol);
        let book = OrderBook::new(symbol, config)
            .with_span(info_span!(parent: &span, "orderbook", symbol = %symbol));
        Self::from_book(book, rule).with_span(span)
    }

    /// Wraps an existing book. A book that already holds a snapshot starts synced.
    pub fn from_book(book: OrderBook<S>, rule: ContiguityRule) -> Self {
        let symbol: Arc<str> = Arc::from(book.symbol());
        let initial = if book.has_snapshot() {
            SyncState::Synced
        } else {
            SyncState::Resyncing
        };
        let span = info_span!("sequence_gate", symbol = %symbol);
        Self {
            symbol,
            book: Arc::new(RwLock::new(book)),
            state: Arc::new(AtomicCell::new(initial)),
            rule,
            counters: GateCounters::default(),
            span,
        }
    }

    /// Replaces the logging span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Read-only handle for strategy code.
    pub fn handle(&self) -> BookHandle<S> {
        BookHandle {
            symbol: Arc::clone(&self.symbol),
            book: Arc::clone(&self.book),
            state: Arc::clone(&self.state),
        }
    }

    /// Symbol of the gated book.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Current trust state.
    pub fn state(&self) -> SyncState {
        self.state.load()
    }

    /// Whether the book currently mirrors the exchange.
    pub fn is_fresh(&self) -> bool {
        self.state.load() == SyncState::Synced
    }

    /// Contiguity rule in force.
    pub fn rule(&self) -> ContiguityRule {
        self.rule
    }

    /// Totals since creation.
    pub fn counters(&self) -> GateCounters {
        self.counters
    }

    /// Decodes a JSON feed message and admits it.
    ///
    /// # Errors
    /// Undecodable payloads return [`SyncError::Book`]; otherwise as
    /// [`SequenceGate::on_message`].
    pub fn on_json(&mut self, payload: &str) -> Result<GateOutcome, SyncError> {
        let message = FeedMessage::from_json(payload).inspect_err(|err| {
            error!(parent: &self.span, "undecodable feed message: {}", err);
        })?;
        self.on_message(&message)
    }

    /// Admits one snapshot or delta.
    ///
    /// Replays, stale messages and deltas that arrive while a snapshot is
    /// pending are dropped and reported through the `Ok` outcome.
    ///
    /// # Errors
    /// Returns [`SyncError::SequenceGap`] when a delta does not extend the
    /// book. The gate is then `Stale` and the caller should call
    /// [`SequenceGate::request_resync`].
    pub fn on_message(&mut self, message: &FeedMessage) -> Result<GateOutcome, SyncError> {
        let book = Arc::clone(&self.book);
        let mut book = book.write();
        if message.is_snapshot() {
            self.admit_snapshot(&mut book, message)
        } else {
            self.admit_delta(&mut book, message)
        }
    }

    fn admit_snapshot(
        &mut self,
        book: &mut OrderBook<S>,
        message: &FeedMessage,
    ) -> Result<GateOutcome, SyncError> {
        let state = self.state.load();
        let last_update_id = book.last_update_id();
        if book.has_snapshot() && message.seq < last_update_id {
            if state == SyncState::Synced {
                debug!(
                    parent: &self.span,
                    "dropping snapshot {}: book already at {}", message.seq, last_update_id
                );
                self.counters.duplicates += 1;
                return Ok(GateOutcome::Duplicate {
                    seq: message.seq,
                    last_update_id,
                });
            }
            warn!(
                parent: &self.span,
                "snapshot {} below {} while {}: treating as feed restart",
                message.seq,
                last_update_id,
                state
            );
            book.reset();
        }

        let mut invalid = 0;
        let bids = self.parse_side(&message.bids, Side::Buy, &mut invalid);
        let asks = self.parse_side(&message.asks, Side::Sell, &mut invalid);
        let mut report = book.apply_snapshot(&bids, &asks, message.seq)?;
        report.invalid += invalid;

        self.counters.snapshots += 1;
        self.counters.invalid_levels += report.invalid as u64;
        if self.state.swap(SyncState::Synced) != SyncState::Synced {
            info!(parent: &self.span, "synced at {}", message.seq);
        }
        Ok(GateOutcome::Snapshot(report))
    }

    fn admit_delta(
        &mut self,
        book: &mut OrderBook<S>,
        message: &FeedMessage,
    ) -> Result<GateOutcome, SyncError> {
        let state = self.state.load();
        if state != SyncState::Synced || !book.has_snapshot() {
            trace!(parent: &self.span, "ignoring delta {} while {}", message.seq, state);
            self.counters.ignored += 1;
            return Ok(GateOutcome::Ignored {
                seq: message.seq,
                state,
            });
        }

        let last_update_id = book.last_update_id();
        if message.seq <= last_update_id {
            debug!(
                parent: &self.span,
                "dropping stale delta {}: book already at {}", message.seq, last_update_id
            );
            self.counters.duplicates += 1;
            return Ok(GateOutcome::Duplicate {
                seq: message.seq,
                last_update_id,
            });
        }

        if !self
            .rule
            .is_contiguous(last_update_id, message.seq, message.prev_seq)
        {
            self.state.store(SyncState::Stale);
            self.counters.gaps += 1;
            warn!(
                parent: &self.span,
                "sequence gap: book at {}, delta {} (prev {:?})",
                last_update_id,
                message.seq,
                message.prev_seq
            );
            return Err(SyncError::SequenceGap {
                symbol: self.symbol.to_string(),
                last_update_id,
                seq: message.seq,
                prev_seq: message.prev_seq,
            });
        }

        let mut invalid = 0;
        let bids = self.parse_side(&message.bids, Side::Buy, &mut invalid);
        let asks = self.parse_side(&message.asks, Side::Sell, &mut invalid);
        let mut report = book.apply_delta(&bids, &asks, message.seq)?;
        report.invalid += invalid;

        self.counters.deltas += 1;
        self.counters.invalid_levels += report.invalid as u64;
        Ok(GateOutcome::Applied(report))
    }

    fn parse_side(&self, raw: &[RawLevel], side: Side, invalid: &mut usize) -> Vec<LevelUpdate> {
        let (updates, errors) = parse_levels(raw, side);
        for err in &errors {
            error!(parent: &self.span, "dropping level: {}", err);
        }
        *invalid += errors.len();
        updates
    }

    /// Marks the book as waiting for a snapshot and builds the request the
    /// feed collaborator should act on.
    ///
    /// Runs under the write lock, so no delta can be mid-application.
    /// The book keeps serving its last contents until the snapshot lands.
    pub fn request_resync(&mut self, reason: ResyncReason) -> ResyncRequest {
        let book = self.book.write();
        let previous = self.state.swap(SyncState::Resyncing);
        warn!(
            parent: &self.span,
            "resync requested ({:?}) at {}, was {}",
            reason,
            book.last_update_id(),
            previous
        );
        ResyncRequest {
            symbol: self.symbol.to_string(),
            last_update_id: book.last_update_id(),
            reason,
            requested_at: current_time_millis(),
        }
    }

    /// Feed connection dropped: the book stops being fresh until a new
    /// snapshot arrives.
    pub fn on_connection_lost(&mut self) -> ResyncRequest {
        self.request_resync(ResyncReason::ConnectionLost)
    }
}
