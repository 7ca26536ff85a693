//! Order book reconciliation: price level stores, the book, feed decoding
//! and the sequence gate that keeps the book consistent with the exchange.

pub mod book;
pub mod error;
/// Feed message shapes and level parsing.
pub mod feed;
pub mod level;
/// Multi-symbol management with one processing task per symbol.
pub mod manager;
pub mod sequence;
pub mod snapshot;
pub mod store;

pub use book::{ApplyReport, BookDepth, CrossedBookAnomaly, OrderBook};
pub use error::{OrderBookError, SyncError};
pub use feed::{FeedMessage, FeedNumber, MessageKind, RawLevel};
pub use level::{LevelUpdate, PriceLevel, Side, SortOrder};
pub use manager::{BookManager, FeedEvent, FeedSender};
pub use sequence::{
    BookHandle, ContiguityRule, GateCounters, GateOutcome, ResyncReason, ResyncRequest,
    SequenceGate, SyncState,
};
pub use snapshot::{ORDERBOOK_SNAPSHOT_FORMAT_VERSION, OrderBookSnapshot, OrderBookSnapshotPackage};
pub use store::{IndexedHeapStore, PriceLevelStore, SkipListStore, StoreConfig};
