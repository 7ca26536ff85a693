//! Snapshot and delta reconciliation through the sequence gate.

use orderbook_sync::orderbook::{FeedMessage, RawLevel};
use orderbook_sync::{
    ContiguityRule, GateOutcome, IndexedHeapStore, PriceLevelStore, SequenceGate, SkipListStore,
    StoreConfig, SyncError, SyncState,
};
use rust_decimal_macros::dec;

fn levels(raw: &[(&str, &str)]) -> Vec<RawLevel> {
    raw.iter().map(|&(p, q)| RawLevel::new(p, q)).collect()
}

fn gate<S: PriceLevelStore>(rule: ContiguityRule) -> SequenceGate<S> {
    SequenceGate::new("BTCUSDT", rule, &StoreConfig::default().with_seed(11))
}

fn concrete_scenario<S: PriceLevelStore>() {
    let mut gate = gate::<S>(ContiguityRule::Monotonic);
    let book = gate.handle();

    gate.on_message(&FeedMessage::snapshot(
        levels(&[("100", "1"), ("99", "2")]),
        levels(&[("101", "1")]),
        10,
    ))
    .expect("snapshot");
    assert_eq!(book.best_bid_ask(), (Some(dec!(100)), Some(dec!(101))));

    gate.on_message(&FeedMessage::delta(levels(&[("100", "0")]), vec![], 11))
        .expect("delta 11");
    assert_eq!(book.best_bid_ask(), (Some(dec!(99)), Some(dec!(101))));

    gate.on_message(&FeedMessage::delta(
        levels(&[("99", "0")]),
        levels(&[("101", "0")]),
        12,
    ))
    .expect("delta 12");
    assert_eq!(book.best_bid_ask(), (None, None));
    assert_eq!(book.last_update_id(), 12);
    assert!(book.is_fresh());
}

#[test]
fn test_concrete_scenario_skip_list() {
    concrete_scenario::<SkipListStore>();
}

#[test]
fn test_concrete_scenario_heap() {
    concrete_scenario::<IndexedHeapStore>();
}

#[test]
fn test_gap_scenario_marks_book_stale_until_snapshot() {
    let mut gate = gate::<SkipListStore>(ContiguityRule::PrevSeq);
    let book = gate.handle();
    gate.on_message(&FeedMessage::snapshot(
        levels(&[("100", "1")]),
        levels(&[("101", "1")]),
        12,
    ))
    .expect("snapshot");
    assert!(book.is_fresh());

    let err = gate
        .on_message(&FeedMessage::delta(levels(&[("100", "3")]), vec![], 16).with_prev_seq(15))
        .expect_err("gap must be reported");
    assert!(matches!(
        err,
        SyncError::SequenceGap {
            last_update_id: 12,
            seq: 16,
            prev_seq: Some(15),
            ..
        }
    ));
    assert!(err.requires_resync());
    assert!(!book.is_fresh());
    assert_eq!(book.state(), SyncState::Stale);
    // the gapped delta was discarded
    assert_eq!(
        book.read()
            .level(orderbook_sync::Side::Buy, dec!(100))
            .map(|level| level.quantity),
        Some(dec!(1))
    );

    let request = gate.request_resync(orderbook_sync::ResyncReason::Gap {
        seq: 16,
        prev_seq: Some(15),
    });
    assert_eq!(request.last_update_id, 12);
    assert_eq!(book.state(), SyncState::Resyncing);

    // deltas keep arriving while the snapshot is fetched
    let outcome = gate
        .on_message(&FeedMessage::delta(levels(&[("100", "4")]), vec![], 17).with_prev_seq(16))
        .expect("ignored delta");
    assert!(matches!(outcome, GateOutcome::Ignored { seq: 17, .. }));
    assert!(!book.is_fresh());

    gate.on_message(&FeedMessage::snapshot(
        levels(&[("100", "5")]),
        levels(&[("101", "1")]),
        17,
    ))
    .expect("fresh snapshot");
    assert!(book.is_fresh());
    assert_eq!(book.best_bid_ask(), (Some(dec!(100)), Some(dec!(101))));

    gate.on_message(&FeedMessage::delta(vec![], levels(&[("101", "0")]), 18).with_prev_seq(17))
        .expect("contiguous delta");
    assert_eq!(book.best_bid_ask(), (Some(dec!(100)), None));
}

#[test]
fn test_increment_rule_rejects_skipped_update() {
    let mut gate = gate::<IndexedHeapStore>(ContiguityRule::Increment(1));
    let book = gate.handle();
    gate.on_message(&FeedMessage::snapshot(levels(&[("10", "1")]), vec![], 100))
        .expect("snapshot");
    gate.on_message(&FeedMessage::delta(levels(&[("11", "1")]), vec![], 101))
        .expect("contiguous");
    let err = gate
        .on_message(&FeedMessage::delta(levels(&[("12", "1")]), vec![], 103))
        .expect_err("skipped 102");
    assert!(matches!(err, SyncError::SequenceGap { seq: 103, .. }));
    assert_eq!(book.best_bid_ask().0, Some(dec!(11)));
    assert_eq!(gate.counters().gaps, 1);
}

#[test]
fn test_idempotent_replay() {
    let mut gate = gate::<SkipListStore>(ContiguityRule::Monotonic);
    let book = gate.handle();
    gate.on_message(&FeedMessage::snapshot(
        levels(&[("100", "1"), ("99", "2")]),
        levels(&[("101", "1")]),
        10,
    ))
    .expect("snapshot");

    let delta = FeedMessage::delta(levels(&[("100", "7")]), levels(&[("102", "2")]), 11);
    gate.on_message(&delta).expect("first apply");
    let after_first = book.depth(10);

    let outcome = gate.on_message(&delta).expect("replay");
    assert_eq!(
        outcome,
        GateOutcome::Duplicate {
            seq: 11,
            last_update_id: 11
        }
    );
    assert_eq!(book.depth(10), after_first);

    // anything at or below the book's position is a no-op
    let older = FeedMessage::delta(levels(&[("98", "1")]), vec![], 5);
    gate.on_message(&older).expect("stale");
    assert_eq!(book.depth(10), after_first);
    assert_eq!(gate.counters().duplicates, 2);
    assert_eq!(gate.counters().deltas, 1);
}

#[test]
fn test_zero_quantity_never_stored() {
    let mut gate = gate::<IndexedHeapStore>(ContiguityRule::Monotonic);
    let book = gate.handle();
    gate.on_message(&FeedMessage::snapshot(
        levels(&[("100", "0"), ("99", "2")]),
        levels(&[("101", "0.0")]),
        1,
    ))
    .expect("snapshot");
    gate.on_message(&FeedMessage::delta(levels(&[("98", "0"), ("99", "0")]), vec![], 2))
        .expect("delta");

    let depth = book.depth(10);
    assert!(depth.bids.is_empty());
    assert!(depth.asks.is_empty());
}

#[test]
fn test_malformed_levels_are_dropped() {
    let mut gate = gate::<SkipListStore>(ContiguityRule::Monotonic);
    let book = gate.handle();
    let outcome = gate
        .on_json(
            r#"{"type":"snapshot","b":[["100","1"],["abc","2"],["99","-1"]],"a":[["101",1.5]],"u":7}"#,
        )
        .expect("snapshot with junk");
    let GateOutcome::Snapshot(report) = outcome else {
        panic!("expected snapshot outcome");
    };
    assert_eq!(report.invalid, 2);
    assert_eq!(book.best_bid_ask(), (Some(dec!(100)), Some(dec!(101))));
    assert_eq!(gate.counters().invalid_levels, 2);
}

#[test]
fn test_crossed_book_reported_not_repaired() {
    let mut gate = gate::<SkipListStore>(ContiguityRule::Monotonic);
    let book = gate.handle();
    gate.on_message(&FeedMessage::snapshot(
        levels(&[("100", "1")]),
        levels(&[("101", "1")]),
        1,
    ))
    .expect("snapshot");

    let outcome = gate
        .on_message(&FeedMessage::delta(levels(&[("102", "1")]), vec![], 2))
        .expect("crossing delta");
    let GateOutcome::Applied(report) = outcome else {
        panic!("expected applied delta");
    };
    let anomaly = report.crossed.expect("crossed book");
    assert_eq!(anomaly.best_bid, dec!(102));
    assert_eq!(anomaly.best_ask, dec!(101));
    assert!(book.read().is_crossed());

    let outcome = gate
        .on_message(&FeedMessage::delta(levels(&[("102", "0")]), vec![], 3))
        .expect("repairing delta");
    assert!(matches!(outcome, GateOutcome::Applied(ref r) if r.crossed.is_none()));
    assert!(!book.read().is_crossed());
}

#[test]
fn test_connection_loss_then_restarted_feed() {
    let mut gate = gate::<SkipListStore>(ContiguityRule::Monotonic);
    let book = gate.handle();
    gate.on_message(&FeedMessage::snapshot(levels(&[("100", "1")]), vec![], 500))
        .expect("snapshot");

    let request = gate.on_connection_lost();
    assert_eq!(request.reason, orderbook_sync::ResyncReason::ConnectionLost);
    assert!(!book.is_fresh());
    // last contents stay readable while resyncing
    assert_eq!(book.best_bid_ask().0, Some(dec!(100)));

    // the venue restarted its sequence numbering
    gate.on_message(&FeedMessage::snapshot(levels(&[("90", "1")]), vec![], 3))
        .expect("restart snapshot");
    assert!(book.is_fresh());
    assert_eq!(book.last_update_id(), 3);
    assert_eq!(book.best_bid_ask().0, Some(dec!(90)));
}

#[test]
fn test_old_snapshot_dropped_while_synced() {
    let mut gate = gate::<SkipListStore>(ContiguityRule::Monotonic);
    let book = gate.handle();
    gate.on_message(&FeedMessage::snapshot(levels(&[("100", "1")]), vec![], 50))
        .expect("snapshot");
    let outcome = gate
        .on_message(&FeedMessage::snapshot(levels(&[("90", "1")]), vec![], 40))
        .expect("old snapshot");
    assert!(matches!(outcome, GateOutcome::Duplicate { seq: 40, last_update_id: 50 }));
    assert_eq!(book.best_bid_ask().0, Some(dec!(100)));
}
