//! Price level value types shared by both store implementations.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of the book a level belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Bid side, best price is the highest.
    Buy,
    /// Ask side, best price is the lowest.
    Sell,
}

impl Side {
    /// Ordering used by the store holding this side.
    pub fn sort_order(self) -> SortOrder {
        match self {
            Side::Buy => SortOrder::Descending,
            Side::Sell => SortOrder::Ascending,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Direction in which a store orders its price keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Lowest price first (asks).
    Ascending,
    /// Highest price first (bids).
    Descending,
}

impl SortOrder {
    /// Returns `true` when `a` must come strictly before `b`.
    #[inline]
    pub fn precedes(self, a: Decimal, b: Decimal) -> bool {
        match self {
            SortOrder::Ascending => a < b,
            SortOrder::Descending => a > b,
        }
    }
}

/// Aggregate quantity resting at one price on one side of the book.
///
/// A stored level always has `quantity > 0`; zero-quantity updates remove
/// the level instead of storing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Aggregate quantity at this price.
    pub quantity: Decimal,
    /// Sequence id of the feed message that last wrote this level.
    pub last_touched_seq: u64,
}

impl PriceLevel {
    /// Creates a level.
    pub fn new(price: Decimal, quantity: Decimal, last_touched_seq: u64) -> Self {
        Self {
            price,
            quantity,
            last_touched_seq,
        }
    }

    /// Notional value of the level (`price * quantity`).
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// A single typed `(price, quantity)` change taken from a feed message.
///
/// `quantity == 0` means "remove this price".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUpdate {
    /// Price of the level being changed.
    pub price: Decimal,
    /// New aggregate quantity, zero to remove.
    pub quantity: Decimal,
}

impl LevelUpdate {
    /// Creates an update, normalizing the price so equal prices share one key.
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self {
            price: price.normalize(),
            quantity,
        }
    }

    /// Whether this update removes the level.
    pub fn is_removal(&self) -> bool {
        self.quantity.is_zero()
    }
}

impl From<(Decimal, Decimal)> for LevelUpdate {
    fn from((price, quantity): (Decimal, Decimal)) -> Self {
        LevelUpdate::new(price, quantity)
    }
}
