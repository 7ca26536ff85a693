//! Per-symbol processing tasks driven through their feed channels.

use orderbook_sync::orderbook::{FeedMessage, RawLevel};
use orderbook_sync::{
    BookManager, ContiguityRule, FeedEvent, ResyncReason, StoreConfig, SyncError,
};
use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::time::timeout;

fn levels(raw: &[(&str, &str)]) -> Vec<RawLevel> {
    raw.iter().map(|&(p, q)| RawLevel::new(p, q)).collect()
}

#[tokio::test]
async fn test_gap_resync_round_trip() {
    let mut manager: BookManager = BookManager::new(ContiguityRule::PrevSeq, StoreConfig::default());
    let mut resyncs = manager.take_resync_requests().expect("receiver");
    let (book, feed) = manager.add_symbol("ETHUSDT");

    feed.send(FeedEvent::Message(FeedMessage::snapshot(
        levels(&[("2000", "3")]),
        levels(&[("2001", "4")]),
        12,
    )))
    .await
    .expect("send snapshot");
    feed.send(FeedEvent::Message(
        FeedMessage::delta(levels(&[("2000", "1")]), vec![], 16).with_prev_seq(15),
    ))
    .await
    .expect("send gapped delta");

    let request = resyncs.recv().await.expect("resync request");
    assert_eq!(request.symbol, "ETHUSDT");
    assert_eq!(request.last_update_id, 12);
    assert_eq!(
        request.reason,
        ResyncReason::Gap {
            seq: 16,
            prev_seq: Some(15)
        }
    );
    assert!(!book.is_fresh());

    // the feed collaborator answers with a fresh snapshot
    feed.send(FeedEvent::Message(FeedMessage::snapshot(
        levels(&[("1999", "2")]),
        levels(&[("2001", "4")]),
        20,
    )))
    .await
    .expect("send resync snapshot");
    drop(feed);

    let counters = manager.remove_symbol("ETHUSDT").await.expect("remove");
    assert_eq!(counters.snapshots, 2);
    assert_eq!(counters.gaps, 1);
    assert!(book.is_fresh());
    assert_eq!(book.best_bid_ask(), (Some(dec!(1999)), Some(dec!(2001))));
}

#[tokio::test]
async fn test_symbols_are_independent() {
    let mut manager: BookManager = BookManager::default();
    let mut resyncs = manager.take_resync_requests().expect("receiver");
    let (btc, _) = manager.add_symbol("BTCUSDT");
    let (eth, _) = manager.add_symbol("ETHUSDT");

    manager
        .send(
            "BTCUSDT",
            FeedEvent::Message(FeedMessage::snapshot(levels(&[("30000", "1")]), vec![], 1)),
        )
        .await
        .expect("btc snapshot");
    manager
        .send(
            "ETHUSDT",
            FeedEvent::Message(FeedMessage::snapshot(levels(&[("2000", "1")]), vec![], 900)),
        )
        .await
        .expect("eth snapshot");
    manager
        .send("BTCUSDT", FeedEvent::Disconnected)
        .await
        .expect("btc disconnect");

    let request = resyncs.recv().await.expect("resync request");
    assert_eq!(request.symbol, "BTCUSDT");
    assert_eq!(request.reason, ResyncReason::ConnectionLost);
    assert!(matches!(
        request.error(),
        Some(SyncError::ConnectionLost { ref symbol }) if symbol == "BTCUSDT"
    ));

    let totals = manager.shutdown().await;
    assert_eq!(totals.len(), 2);
    assert!(!btc.is_fresh());
    assert!(eth.is_fresh());
    assert_eq!(eth.last_update_id(), 900);
    assert_eq!(btc.best_bid_ask().0, Some(dec!(30000)));
}

#[tokio::test]
async fn test_shutdown_while_feed_senders_are_held() {
    let mut manager: BookManager = BookManager::default();
    let (_, btc_feed) = manager.add_symbol("BTCUSDT");
    let (eth, eth_feed) = manager.add_symbol("ETHUSDT");

    eth_feed
        .send(FeedEvent::Message(FeedMessage::snapshot(
            levels(&[("2000", "1")]),
            levels(&[("2002", "1")]),
            7,
        )))
        .await
        .expect("eth snapshot");

    let totals = timeout(Duration::from_secs(2), manager.shutdown())
        .await
        .expect("shutdown finished");
    assert_eq!(totals.len(), 2);
    assert_eq!(totals["ETHUSDT"].snapshots, 1);
    assert_eq!(eth.last_update_id(), 7);
    assert!(btc_feed.is_closed());
    assert!(eth_feed.send(FeedEvent::Disconnected).await.is_err());
}
