#[cfg(test)]
mod tests_snapshot_restore {
    use orderbook_sync::orderbook::ORDERBOOK_SNAPSHOT_FORMAT_VERSION;
    use orderbook_sync::{
        HeapOrderBook, LevelUpdate, OrderBookError, SkipListOrderBook, StoreConfig,
    };
    use rust_decimal_macros::dec;

    fn populate_order_book(book: &mut SkipListOrderBook) {
        book.apply_snapshot(
            &[
                LevelUpdate::new(dec!(100.0), dec!(5)),
                LevelUpdate::new(dec!(99.0), dec!(7)),
            ],
            &[
                LevelUpdate::new(dec!(101.0), dec!(4)),
                LevelUpdate::new(dec!(102.0), dec!(6)),
            ],
            40,
        )
        .expect("snapshot");
        book.apply_delta(&[LevelUpdate::new(dec!(98.5), dec!(1))], &[], 41)
            .expect("delta");
    }

    #[test]
    fn snapshot_package_round_trip_restores_levels() {
        let mut original = SkipListOrderBook::new("TEST", &StoreConfig::default());
        populate_order_book(&mut original);

        let package = original
            .create_snapshot_package(10)
            .expect("snapshot package");

        let mut restored = SkipListOrderBook::new("TEST", &StoreConfig::default());
        restored
            .restore_from_snapshot_package(package)
            .expect("restore from package");

        assert_eq!(restored.best_bid(), Some(dec!(100)));
        assert_eq!(restored.best_ask(), Some(dec!(101)));
        assert_eq!(restored.last_update_id(), 41);
        assert_eq!(restored.depth(10).bids.len(), 3);
        assert!(restored.has_snapshot());
    }

    #[test]
    fn snapshot_json_restores_into_other_store() {
        let mut original = SkipListOrderBook::new("TEST", &StoreConfig::default());
        populate_order_book(&mut original);
        let json = original.snapshot_to_json(10).expect("snapshot json");

        let mut restored = HeapOrderBook::new("TEST", &StoreConfig::default());
        restored
            .restore_from_snapshot_json(&json)
            .expect("restore from json");

        let expected = original.depth(10);
        let actual = restored.depth(10);
        let prices = |levels: &[orderbook_sync::PriceLevel]| {
            levels
                .iter()
                .map(|level| (level.price, level.quantity))
                .collect::<Vec<_>>()
        };
        assert_eq!(prices(&actual.bids), prices(&expected.bids));
        assert_eq!(prices(&actual.asks), prices(&expected.asks));
    }

    #[test]
    fn snapshot_restore_truncates_to_depth() {
        let mut original = SkipListOrderBook::new("TEST", &StoreConfig::default());
        populate_order_book(&mut original);
        let package = original.create_snapshot_package(1).expect("package");
        assert_eq!(package.snapshot.bids.len(), 1);

        let mut restored = SkipListOrderBook::new("TEST", &StoreConfig::default());
        restored.restore_from_snapshot_package(package).expect("restore");
        assert_eq!(restored.level_count(orderbook_sync::Side::Buy), 1);
        assert_eq!(restored.best_bid(), Some(dec!(100)));
    }

    #[test]
    fn snapshot_restore_detects_checksum_mismatch() {
        let mut original = SkipListOrderBook::new("TEST", &StoreConfig::default());
        populate_order_book(&mut original);
        let mut package = original.create_snapshot_package(5).expect("package");
        package.snapshot.bids[0].quantity = dec!(500);

        let mut restored = SkipListOrderBook::new("TEST", &StoreConfig::default());
        let err = restored
            .restore_from_snapshot_package(package)
            .expect_err("checksum mismatch should fail");
        assert!(matches!(err, OrderBookError::ChecksumMismatch { .. }));
        assert!(!restored.has_snapshot());
    }

    #[test]
    fn snapshot_restore_rejects_unknown_version() {
        let mut original = SkipListOrderBook::new("TEST", &StoreConfig::default());
        populate_order_book(&mut original);
        let mut package = original.create_snapshot_package(5).expect("package");
        package.version = ORDERBOOK_SNAPSHOT_FORMAT_VERSION + 1;

        let mut restored = SkipListOrderBook::new("TEST", &StoreConfig::default());
        let err = restored
            .restore_from_snapshot_package(package)
            .expect_err("version mismatch should fail");
        assert!(matches!(
            err,
            OrderBookError::UnsupportedVersion { found, expected }
                if found == ORDERBOOK_SNAPSHOT_FORMAT_VERSION + 1
                    && expected == ORDERBOOK_SNAPSHOT_FORMAT_VERSION
        ));
    }

    #[test]
    fn snapshot_restore_rejects_other_symbol() {
        let mut original = SkipListOrderBook::new("BTCUSDT", &StoreConfig::default());
        populate_order_book(&mut original);
        let package = original.create_snapshot_package(5).expect("package");

        let mut restored = SkipListOrderBook::new("ETHUSDT", &StoreConfig::default());
        let err = restored
            .restore_from_snapshot_package(package)
            .expect_err("symbol mismatch should fail");
        assert!(matches!(err, OrderBookError::SymbolMismatch { .. }));
    }

    #[test]
    fn snapshot_restore_replaces_newer_book() {
        let mut original = SkipListOrderBook::new("TEST", &StoreConfig::default());
        populate_order_book(&mut original);
        let package = original.create_snapshot_package(10).expect("package");

        let mut restored = SkipListOrderBook::new("TEST", &StoreConfig::default());
        restored
            .apply_snapshot(&[LevelUpdate::new(dec!(50), dec!(1))], &[], 900)
            .expect("snapshot");
        restored.restore_from_snapshot_package(package).expect("restore");
        assert_eq!(restored.last_update_id(), 41);
        assert_eq!(restored.level(orderbook_sync::Side::Buy, dec!(50)), None);
    }
}
