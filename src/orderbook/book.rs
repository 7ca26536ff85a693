//! Core OrderBook implementation: snapshot/delta application and queries

use super::error::OrderBookError;
use super::level::{LevelUpdate, PriceLevel, Side};
use super::snapshot::{OrderBookSnapshot, OrderBookSnapshotPackage};
use super::store::{PriceLevelStore, SkipListStore, StoreConfig};
use crate::utils::current_time_millis;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, error, info_span, trace, warn};

/// Post-mutation invariant violation: best bid is not strictly below best ask.
///
/// The book is left as-is; the next valid delta is expected to fix it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossedBookAnomaly {
    /// Best bid at the time of detection.
    pub best_bid: Decimal,
    /// Best ask at the time of detection.
    pub best_ask: Decimal,
    /// Sequence id of the message that produced the crossed state.
    pub seq: u64,
}

/// Outcome of applying one snapshot or delta.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Sequence id the book moved to.
    pub seq: u64,
    /// Levels inserted or updated.
    pub upserted: usize,
    /// Levels removed by zero-quantity entries.
    pub removed: usize,
    /// Entries dropped as invalid.
    pub invalid: usize,
    /// Crossed-book anomaly observed after the mutation, if any.
    pub crossed: Option<CrossedBookAnomaly>,
}

/// Top-N levels of both sides, best first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDepth {
    /// Bid levels, highest price first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, lowest price first.
    pub asks: Vec<PriceLevel>,
}

/// Local mirror of one symbol's book, built from snapshots and deltas.
///
/// The type parameter selects the backing [`PriceLevelStore`]; both sides
/// always use the same implementation. The book itself is not synchronized:
/// the [`SequenceGate`](crate::orderbook::SequenceGate) is its single
/// writer and shares it with readers behind a read-write lock.
#[derive(Debug)]
pub struct OrderBook<S = SkipListStore> {
    /// The symbol or identifier for this order book
    symbol: String,

    /// Bid side, descending.
    bids: S,

    /// Ask side, ascending.
    asks: S,

    /// Sequence id of the last applied snapshot or delta.
    last_update_id: u64,

    /// Whether a snapshot has been applied since creation or the last reset.
    has_snapshot: bool,

    /// Wall clock of the last mutation (milliseconds since epoch).
    updated_at: u64,

    /// Parent span for every event this book emits.
    span: Span,
}

impl<S: PriceLevelStore> OrderBook<S> {
    /// Creates an empty book for `symbol`.
    pub fn new(symbol: &str, config: &StoreConfig) -> Self {
        Self {
            symbol: symbol.to_string(),
            bids: S::new(Side::Buy.sort_order(), config),
            asks: S::new(Side::Sell.sort_order(), config),
            last_update_id: 0,
            has_snapshot: false,
            updated_at: 0,
            span: info_span!("orderbook", symbol = %symbol),
        }
    }

    /// Replaces the logging span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Symbol of this book.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Sequence id of the last applied message.
    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    /// Whether a snapshot has been applied to this book.
    pub fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }

    /// Wall clock of the last mutation in milliseconds, zero if never mutated.
    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    /// Replaces both sides with the snapshot content and moves to `seq`.
    ///
    /// Zero-quantity entries are skipped; invalid entries are dropped.
    ///
    /// # Errors
    /// Returns [`OrderBookError::StaleSequence`] when `seq` is below the
    /// current `last_update_id`; the book is left untouched.
    pub fn apply_snapshot(
        &mut self,
        bids: &[LevelUpdate],
        asks: &[LevelUpdate],
        seq: u64,
    ) -> Result<ApplyReport, OrderBookError> {
        if self.has_snapshot && seq < self.last_update_id {
            return Err(OrderBookError::StaleSequence {
                seq,
                last_update_id: self.last_update_id,
            });
        }

        self.bids.clear();
        self.asks.clear();

        let mut report = ApplyReport {
            seq,
            ..ApplyReport::default()
        };
        self.apply_side(Side::Buy, bids, seq, &mut report);
        self.apply_side(Side::Sell, asks, seq, &mut report);

        self.last_update_id = seq;
        self.has_snapshot = true;
        self.updated_at = current_time_millis();
        report.crossed = self.check_crossed(seq);

        debug!(
            parent: &self.span,
            "snapshot applied at {}: {} bids, {} asks",
            seq,
            self.bids.len(),
            self.asks.len()
        );
        Ok(report)
    }

    /// Applies an incremental update and moves to `seq`.
    ///
    /// `quantity == 0` removes the level, anything else upserts it.
    ///
    /// # Errors
    /// Returns [`OrderBookError::StaleSequence`] when `seq` is not newer
    /// than `last_update_id`; the book is left untouched.
    pub fn apply_delta(
        &mut self,
        bids: &[LevelUpdate],
        asks: &[LevelUpdate],
        seq: u64,
    ) -> Result<ApplyReport, OrderBookError> {
        if seq <= self.last_update_id {
            return Err(OrderBookError::StaleSequence {
                seq,
                last_update_id: self.last_update_id,
            });
        }

        let mut report = ApplyReport {
            seq,
            ..ApplyReport::default()
        };
        self.apply_side(Side::Buy, bids, seq, &mut report);
        self.apply_side(Side::Sell, asks, seq, &mut report);

        self.last_update_id = seq;
        self.updated_at = current_time_millis();
        report.crossed = self.check_crossed(seq);

        trace!(
            parent: &self.span,
            "delta applied at {}: {} upserted, {} removed, {} invalid",
            seq,
            report.upserted,
            report.removed,
            report.invalid
        );
        Ok(report)
    }

    fn apply_side(
        &mut self,
        side: Side,
        updates: &[LevelUpdate],
        seq: u64,
        report: &mut ApplyReport,
    ) {
        for update in updates {
            if let Err(err) = Self::validate(side, update) {
                error!(parent: &self.span, "dropping level: {}", err);
                report.invalid += 1;
                continue;
            }
            let store = match side {
                Side::Buy => &mut self.bids,
                Side::Sell => &mut self.asks,
            };
            if update.is_removal() {
                if store.remove(update.price) {
                    report.removed += 1;
                }
            } else {
                store.upsert(update.price, update.quantity, seq);
                report.upserted += 1;
            }
        }
    }

    fn validate(side: Side, update: &LevelUpdate) -> Result<(), OrderBookError> {
        let reason = if update.price < Decimal::ZERO {
            "price must not be negative"
        } else if update.quantity < Decimal::ZERO {
            "quantity must not be negative"
        } else {
            return Ok(());
        };
        Err(OrderBookError::InvalidLevelData {
            side,
            price: update.price.to_string(),
            quantity: update.quantity.to_string(),
            reason: reason.to_string(),
        })
    }

    fn check_crossed(&self, seq: u64) -> Option<CrossedBookAnomaly> {
        let (Some(best_bid), Some(best_ask)) = self.best_bid_ask() else {
            return None;
        };
        if best_bid < best_ask {
            return None;
        }
        warn!(
            parent: &self.span,
            "crossed book at {}: best bid {} >= best ask {}", seq, best_bid, best_ask
        );
        Some(CrossedBookAnomaly {
            best_bid,
            best_ask,
            seq,
        })
    }

    /// Drops every level and forgets the sequence position.
    ///
    /// Starts a new book lifetime; the next message must be a snapshot.
    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_update_id = 0;
        self.has_snapshot = false;
        self.updated_at = current_time_millis();
        debug!(parent: &self.span, "book reset");
    }

    /// Best bid and best ask prices.
    pub fn best_bid_ask(&self) -> (Option<Decimal>, Option<Decimal>) {
        (self.best_bid(), self.best_ask())
    }

    /// Highest bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.peek_top().map(|level| level.price)
    }

    /// Lowest ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.peek_top().map(|level| level.price)
    }

    /// Top `n` levels of each side, best first.
    pub fn depth(&self, n: usize) -> BookDepth {
        BookDepth {
            bids: self.bids.top_n(n),
            asks: self.asks.top_n(n),
        }
    }

    /// Top `n` levels of one side.
    pub fn side_depth(&self, side: Side, n: usize) -> Vec<PriceLevel> {
        match side {
            Side::Buy => self.bids.top_n(n),
            Side::Sell => self.asks.top_n(n),
        }
    }

    /// Level at `price` on `side`, if present.
    pub fn level(&self, side: Side, price: Decimal) -> Option<PriceLevel> {
        match side {
            Side::Buy => self.bids.get(price),
            Side::Sell => self.asks.get(price),
        }
    }

    /// Number of levels on `side`.
    pub fn level_count(&self, side: Side) -> usize {
        match side {
            Side::Buy => self.bids.len(),
            Side::Sell => self.asks.len(),
        }
    }

    /// Average of best bid and best ask.
    pub fn mid_price(&self) -> Option<Decimal> {
        match self.best_bid_ask() {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Best ask minus best bid. Negative when the book is crossed.
    pub fn spread(&self) -> Option<Decimal> {
        match self.best_bid_ask() {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Whether both sides are populated and `best_bid >= best_ask`.
    pub fn is_crossed(&self) -> bool {
        matches!(self.best_bid_ask(), (Some(bid), Some(ask)) if bid >= ask)
    }

    /// Captures the top `depth` levels of both sides.
    pub fn create_snapshot(&self, depth: usize) -> OrderBookSnapshot {
        OrderBookSnapshot {
            symbol: self.symbol.clone(),
            last_update_id: self.last_update_id,
            timestamp: current_time_millis(),
            bids: self.bids.top_n(depth),
            asks: self.asks.top_n(depth),
        }
    }

    /// Create a checksum-protected snapshot package of the book.
    pub fn create_snapshot_package(
        &self,
        depth: usize,
    ) -> Result<OrderBookSnapshotPackage, OrderBookError> {
        OrderBookSnapshotPackage::new(self.create_snapshot(depth))
    }

    /// Serialize a checksum-protected snapshot package to JSON.
    pub fn snapshot_to_json(&self, depth: usize) -> Result<String, OrderBookError> {
        self.create_snapshot_package(depth)?.to_json()
    }

    /// Restore the book state from a checksum-validated snapshot package.
    pub fn restore_from_snapshot_package(
        &mut self,
        package: OrderBookSnapshotPackage,
    ) -> Result<(), OrderBookError> {
        self.restore_from_snapshot(package.into_snapshot()?)
    }

    /// Restore the book state from a JSON payload containing a checksum-protected snapshot package.
    pub fn restore_from_snapshot_json(&mut self, data: &str) -> Result<(), OrderBookError> {
        let package = OrderBookSnapshotPackage::from_json(data)?;
        self.restore_from_snapshot_package(package)
    }

    /// Restore the book state from a snapshot, without checksum validation.
    ///
    /// Starts a new book lifetime at the snapshot's `last_update_id`.
    pub fn restore_from_snapshot(
        &mut self,
        snapshot: OrderBookSnapshot,
    ) -> Result<(), OrderBookError> {
        if snapshot.symbol != self.symbol {
            return Err(OrderBookError::SymbolMismatch {
                expected: self.symbol.clone(),
                actual: snapshot.symbol,
            });
        }

        let to_updates = |levels: &[PriceLevel]| -> Vec<LevelUpdate> {
            levels
                .iter()
                .map(|level| LevelUpdate::new(level.price, level.quantity))
                .collect()
        };
        let bids = to_updates(&snapshot.bids);
        let asks = to_updates(&snapshot.asks);

        self.reset();
        self.apply_snapshot(&bids, &asks, snapshot.last_update_id)?;
        Ok(())
    }
}
