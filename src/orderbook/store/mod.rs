//! Ordered price level containers for one side of one symbol.
//!
//! Two interchangeable implementations share the [`PriceLevelStore`]
//! contract:
//!
//! - [`SkipListStore`] — arena-backed probabilistic skip list. Expected
//!   O(log n) upsert/remove and O(k) `top_n`. This is the default and the
//!   recommended choice for depth-heavy workloads.
//! - [`IndexedHeapStore`] — array binary heap plus a price → slot index.
//!   O(1) best level, O(log n) upsert/remove, and a non-destructive
//!   best-first walk for `top_n` costing O(k log k).
//!
//! The implementation is chosen at construction time through the type
//! parameter of [`OrderBook`](crate::orderbook::OrderBook), never per call.

mod heap;
mod skiplist;

pub use heap::IndexedHeapStore;
pub use skiplist::SkipListStore;

use super::level::{PriceLevel, SortOrder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default number of skip list levels.
pub const DEFAULT_MAX_LEVEL: usize = 16;

/// Default promotion probability for skip list nodes.
pub const DEFAULT_PROBABILITY: f64 = 0.5;

/// Construction parameters shared by all store implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of skip list levels (including level 0).
    pub max_level: usize,
    /// Probability of promoting a skip list node one level higher.
    pub probability: f64,
    /// Optional RNG seed for reproducible skip list shapes.
    pub seed: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_level: DEFAULT_MAX_LEVEL,
            probability: DEFAULT_PROBABILITY,
            seed: None,
        }
    }
}

impl StoreConfig {
    /// Sets the maximum number of skip list levels (clamped to at least 1).
    pub fn with_max_level(mut self, max_level: usize) -> Self {
        self.max_level = max_level.max(1);
        self
    }

    /// Sets the promotion probability (clamped into `[0, 1)`).
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability.clamp(0.0, 0.999);
        self
    }

    /// Seeds the level generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Ordered container of `price → quantity` for one side of a book.
///
/// Invariants every implementation upholds:
/// - prices are unique,
/// - no stored level has a zero quantity,
/// - `peek_top`/`top_n` follow the store's [`SortOrder`].
pub trait PriceLevelStore: Send + Sync {
    /// Builds an empty store with the given ordering.
    fn new(order: SortOrder, config: &StoreConfig) -> Self
    where
        Self: Sized;

    /// Inserts or updates the level at `price`.
    ///
    /// A zero quantity removes the level instead. Returns `true` when a new
    /// level was created.
    fn upsert(&mut self, price: Decimal, quantity: Decimal, seq: u64) -> bool;

    /// Removes the level at `price`, returning whether it existed.
    fn remove(&mut self, price: Decimal) -> bool;

    /// Looks up a level by price.
    fn get(&self, price: Decimal) -> Option<PriceLevel>;

    /// Best level of this side.
    fn peek_top(&self) -> Option<PriceLevel>;

    /// Up to `k` best levels, best first.
    fn top_n(&self, k: usize) -> Vec<PriceLevel>;

    /// Number of stored levels.
    fn len(&self) -> usize;

    /// Removes every level.
    fn clear(&mut self);

    /// Ordering of this store.
    fn order(&self) -> SortOrder;

    /// Whether the store holds no level.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every level, best first.
    fn levels(&self) -> Vec<PriceLevel> {
        self.top_n(self.len())
    }
}
