//! Replays a recorded feed with a gap through the book manager and answers
//! the resync request with a fresh snapshot.

use demos::setup_logger;
use orderbook_sync::orderbook::FeedMessage;
use orderbook_sync::{BookManager, ContiguityRule, FeedEvent, StoreConfig};
use std::error::Error;
use tracing::info;

const RECORDED_FEED: &[&str] = &[
    r#"{"type":"snapshot","b":[["100","1"],["99","2"]],"a":[["101","1"],["102","5"]],"u":10}"#,
    r#"{"type":"delta","b":[["100","0"]],"a":[],"u":11,"pu":10}"#,
    r#"{"type":"delta","b":[["99.5","3"]],"a":[["101","0"]],"u":12,"pu":11}"#,
    // 13 and 14 were lost in transit
    r#"{"type":"delta","b":[["99","0"]],"a":[],"u":15,"pu":14}"#,
    r#"{"type":"delta","b":[["98","1"]],"a":[],"u":16,"pu":15}"#,
];

const RESYNC_SNAPSHOT: &str =
    r#"{"type":"snapshot","b":[["99.5","3"],["98","1"]],"a":[["102","5"]],"u":16}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_logger();

    let mut manager: BookManager =
        BookManager::new(ContiguityRule::PrevSeq, StoreConfig::default());
    let mut resyncs = manager
        .take_resync_requests()
        .ok_or("resync receiver already taken")?;
    let (book, feed) = manager.add_symbol("BTCUSDT");

    for payload in RECORDED_FEED {
        feed.send(FeedEvent::Message(FeedMessage::from_json(payload)?))
            .await?;
    }

    let request = resyncs.recv().await.ok_or("manager stopped")?;
    info!(
        "resync requested for {} at {} ({:?}), fresh: {}",
        request.symbol,
        request.last_update_id,
        request.reason,
        book.is_fresh()
    );
    info!("last known top of book: {:?}", book.best_bid_ask());

    feed.send(FeedEvent::Message(FeedMessage::from_json(RESYNC_SNAPSHOT)?))
        .await?;
    drop(feed);

    let totals = manager.shutdown().await;
    for (symbol, counters) in &totals {
        info!("{}: {:?}", symbol, counters);
    }

    info!("fresh: {}, top of book: {:?}", book.is_fresh(), book.best_bid_ask());
    let depth = book.depth(5);
    for level in &depth.bids {
        info!("bid {} x {}", level.price, level.quantity);
    }
    for level in &depth.asks {
        info!("ask {} x {}", level.price, level.quantity);
    }
    info!("mid {:?}, spread {:?}", book.mid_price(), book.spread());
    Ok(())
}
