//! Trading and sync against an on-disk SQLite database.

#![cfg(feature = "sqlite")]

mod common;

use common::*;
use rust_decimal_macros::dec;
use std::sync::Arc;

use stockbook::adapters::sqlite_store::SqliteStore;
use stockbook::domain::backfill::HistoricalBackfill;
use stockbook::domain::error::StockbookError;
use stockbook::domain::price_sync::PriceSync;
use stockbook::domain::trading::{BuyOrder, SellOrder, TradingEngine};
use stockbook::ports::store::Store;

fn open(dir: &tempfile::TempDir) -> Arc<SqliteStore> {
    let path = dir.path().join("stockbook.db");
    let store = SqliteStore::open(path.to_str().unwrap(), 4).unwrap();
    store.initialize_schema().unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockPriceSource::new("mock").with_price("NVDA", dec!(42.005)));

    let account_id = {
        let engine = TradingEngine::new(open(&dir), resolver_of(&[&source]));
        engine.seed_instruments().unwrap();
        let account = engine.open_account("Guest", dec!(1000.00)).unwrap();
        engine
            .buy(
                account.id,
                BuyOrder {
                    symbol: "aapl".into(),
                    investment: dec!(300.00),
                    price_override: None,
                },
            )
            .await
            .unwrap();
        engine
            .buy(
                account.id,
                BuyOrder {
                    symbol: "NVDA".into(),
                    investment: dec!(84.02),
                    price_override: None,
                },
            )
            .await
            .unwrap();
        account.id
    };

    let engine = TradingEngine::new(open(&dir), resolver_of(&[&source]));
    let summary = engine.portfolio_summary(account_id).unwrap();
    assert_eq!(summary.available_balance, dec!(615.98));
    assert_eq!(summary.positions.len(), 2);
    let nvda = summary.positions.iter().find(|p| p.symbol == "NVDA").unwrap();
    assert_eq!(nvda.current_price, dec!(42.01));
    assert_eq!(nvda.quantity, dec!(2));
    assert_eq!(nvda.name, "NVIDIA Corporation");
    assert_eq!(engine.trades(account_id).unwrap().len(), 2);
}

#[tokio::test]
async fn failed_sell_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockPriceSource::new("mock"));
    let engine = TradingEngine::new(open(&dir), resolver_of(&[&source]));
    engine.seed_instruments().unwrap();
    let owner = engine.open_account("Owner", dec!(500.00)).unwrap();
    let other = engine.open_account("Other", dec!(500.00)).unwrap();
    let position = engine
        .buy(
            owner.id,
            BuyOrder {
                symbol: "TSLA".into(),
                investment: dec!(200.00),
                price_override: None,
            },
        )
        .await
        .unwrap()
        .position
        .unwrap();

    let err = engine
        .sell(
            other.id,
            SellOrder {
                position_id: position.id,
                quantity: dec!(1),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StockbookError::NotOwner { .. }));

    let err = engine
        .sell(
            owner.id,
            SellOrder {
                position_id: position.id,
                quantity: dec!(1.5),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StockbookError::InsufficientShares { .. }));

    let summary = engine.portfolio_summary(owner.id).unwrap();
    assert_eq!(summary.available_balance, dec!(300.00));
    assert_eq!(summary.positions[0].quantity, dec!(1));
    assert_eq!(engine.activity(owner.id).unwrap().len(), 1);
    assert_eq!(engine.portfolio_summary(other.id).unwrap().available_balance, dec!(500.00));
}

#[tokio::test]
async fn sync_and_backfill_write_samples() {
    let dir = tempfile::tempdir().unwrap();
    let bars = (1..=3)
        .map(|d| bar("AAPL", date(2024, 2, d), dec!(180) + rust_decimal::Decimal::from(d)))
        .collect();
    let source = Arc::new(
        MockPriceSource::new("mock")
            .with_price("AAPL", dec!(190.00))
            .failing("MSFT")
            .with_price("TSLA", dec!(190.00))
            .with_bars("AAPL", bars),
    );
    let store = open(&dir);
    TradingEngine::new(store.clone(), resolver_of(&[&source]))
        .seed_instruments()
        .unwrap();

    let sink = Arc::new(RecordingSink::default());
    let report = PriceSync::new(store.clone(), resolver_of(&[&source]), sink.clone())
        .tick()
        .await;
    assert_eq!((report.updated, report.failed), (2, 1));
    assert_eq!(sink.events().len(), 2);

    let backfill = HistoricalBackfill::new(store.clone(), resolver_of(&[&source]));
    let first = backfill.run(date(2024, 2, 1), date(2024, 2, 3)).await.unwrap();
    assert_eq!(first.inserted(), 3);
    let again = backfill.run(date(2024, 2, 1), date(2024, 2, 3)).await.unwrap();
    assert_eq!(again.inserted(), 0);

    let (aapl, msft) = store
        .atomic(|tx| {
            Ok((
                tx.instrument_by_symbol("AAPL")?.unwrap(),
                tx.instrument_by_symbol("MSFT")?.unwrap(),
            ))
        })
        .unwrap();
    assert_eq!(aapl.current_price, dec!(190.00));
    assert_eq!(aapl.previous_price, Some(dec!(150.00)));
    assert_eq!(msft.current_price, dec!(300.00));
    assert_eq!(msft.previous_price, None);

    let history = store
        .atomic(|tx| tx.price_samples(aapl.id, date(2024, 2, 1), date(2024, 2, 29)))
        .unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].close, Some(dec!(183)));
}
