//! Feed message shapes consumed by the sequence gate.
//!
//! Only the fields reconciliation needs are modelled. Prices and
//! quantities may arrive as JSON strings (`"100.5"`) or numbers (`100.5`);
//! both are kept raw until the gate parses them, so one malformed entry
//! can be dropped without losing the rest of the message.
//!
//! Bybit style keys are accepted as aliases: `b`/`a` for the sides, `u`
//! for the sequence id and `pu` for the prior sequence id.

use super::error::OrderBookError;
use super::level::{LevelUpdate, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A numeric field as sent by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedNumber {
    /// Quoted decimal text.
    Text(String),
    /// Bare JSON number.
    Number(serde_json::Number),
}

impl FeedNumber {
    /// Parses the field into a decimal.
    pub fn to_decimal(&self) -> Option<Decimal> {
        let text = match self {
            FeedNumber::Text(text) => text.trim().to_string(),
            FeedNumber::Number(number) => number.to_string(),
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .ok()
    }
}

impl fmt::Display for FeedNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedNumber::Text(text) => write!(f, "{text}"),
            FeedNumber::Number(number) => write!(f, "{number}"),
        }
    }
}

impl From<&str> for FeedNumber {
    fn from(value: &str) -> Self {
        FeedNumber::Text(value.to_string())
    }
}

impl From<i64> for FeedNumber {
    fn from(value: i64) -> Self {
        FeedNumber::Number(value.into())
    }
}

/// One `[price, quantity]` pair exactly as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLevel(pub FeedNumber, pub FeedNumber);

impl RawLevel {
    /// Builds a raw level from anything convertible into feed numbers.
    pub fn new(price: impl Into<FeedNumber>, quantity: impl Into<FeedNumber>) -> Self {
        RawLevel(price.into(), quantity.into())
    }

    /// Parses the pair into a typed update.
    ///
    /// # Errors
    /// Returns [`OrderBookError::InvalidLevelData`] when either field is not
    /// a number.
    pub fn parse(&self, side: Side) -> Result<LevelUpdate, OrderBookError> {
        let invalid = |reason: &str| OrderBookError::InvalidLevelData {
            side,
            price: self.0.to_string(),
            quantity: self.1.to_string(),
            reason: reason.to_string(),
        };
        let price = self.0.to_decimal().ok_or_else(|| invalid("non-numeric price"))?;
        let quantity = self
            .1
            .to_decimal()
            .ok_or_else(|| invalid("non-numeric quantity"))?;
        Ok(LevelUpdate::new(price, quantity))
    }
}

/// Kind of a feed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Full replacement of both sides.
    Snapshot,
    /// Incremental changes.
    Delta,
}

/// A snapshot or delta message for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedMessage {
    /// Snapshot or delta.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Bid entries.
    #[serde(default, alias = "b")]
    pub bids: Vec<RawLevel>,
    /// Ask entries.
    #[serde(default, alias = "a")]
    pub asks: Vec<RawLevel>,
    /// Sequence id (update id) of this message.
    #[serde(alias = "u")]
    pub seq: u64,
    /// Sequence id the sender considers the previous message, when the
    /// feed provides one.
    #[serde(default, alias = "pu", skip_serializing_if = "Option::is_none")]
    pub prev_seq: Option<u64>,
}

impl FeedMessage {
    /// Builds a snapshot message.
    pub fn snapshot(bids: Vec<RawLevel>, asks: Vec<RawLevel>, seq: u64) -> Self {
        Self {
            kind: MessageKind::Snapshot,
            bids,
            asks,
            seq,
            prev_seq: None,
        }
    }

    /// Builds a delta message.
    pub fn delta(bids: Vec<RawLevel>, asks: Vec<RawLevel>, seq: u64) -> Self {
        Self {
            kind: MessageKind::Delta,
            bids,
            asks,
            seq,
            prev_seq: None,
        }
    }

    /// Sets the prior sequence id.
    pub fn with_prev_seq(mut self, prev_seq: u64) -> Self {
        self.prev_seq = Some(prev_seq);
        self
    }

    /// Decodes a message from JSON.
    pub fn from_json(data: &str) -> Result<Self, OrderBookError> {
        serde_json::from_str(data).map_err(|error| OrderBookError::DeserializationError {
            message: error.to_string(),
        })
    }

    /// Whether this is a snapshot.
    pub fn is_snapshot(&self) -> bool {
        self.kind == MessageKind::Snapshot
    }
}

/// Parses every entry of one side, splitting valid updates from errors.
pub fn parse_levels(raw: &[RawLevel], side: Side) -> (Vec<LevelUpdate>, Vec<OrderBookError>) {
    let mut updates = Vec::with_capacity(raw.len());
    let mut errors = Vec::new();
    for level in raw {
        match level.parse(side) {
            Ok(update) => updates.push(update),
            Err(err) => errors.push(err),
        }
    }
    (updates, errors)
}
