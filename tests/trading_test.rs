//! End-to-end trading flows against the in-memory store.

mod common;

use common::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use stockbook::domain::error::StockbookError;
use stockbook::domain::instrument::MarketCategory;
use stockbook::domain::price_sync::PriceSync;
use stockbook::domain::trading::{BuyOrder, SellOrder};
use stockbook::ports::store::Store;

fn buy(symbol: &str, investment: Decimal) -> BuyOrder {
    BuyOrder {
        symbol: symbol.to_string(),
        investment,
        price_override: None,
    }
}

mod worked_example {
    use super::*;

    #[tokio::test]
    async fn buy_reprice_sell() {
        let source = Arc::new(MockPriceSource::new("mock"));
        let (store, engine) = engine_with(&source);
        engine.seed_instruments().unwrap();
        let account = engine.open_account("Guest", dec!(1000.00)).unwrap();

        let bought = engine.buy(account.id, buy("AAPL", dec!(300.00))).await.unwrap();
        assert_eq!(bought.trade.quantity, dec!(2));
        assert_eq!(bought.trade.total_value, dec!(300.00));
        assert_eq!(bought.balance, dec!(700.00));
        let position = bought.position.unwrap();

        source.set_price("AAPL", dec!(160.00));
        source.set_price("MSFT", dec!(300.00));
        source.set_price("TSLA", dec!(200.00));
        let sink = Arc::new(RecordingSink::default());
        PriceSync::new(store.clone(), resolver_of(&[&source]), sink)
            .tick()
            .await;

        let summary = engine.portfolio_summary(account.id).unwrap();
        assert_eq!(summary.total_investment, dec!(300.00));
        assert_eq!(summary.current_value, dec!(320.00));
        assert_eq!(summary.unrealized_pnl, dec!(20.00));

        let sold = engine
            .sell(
                account.id,
                SellOrder {
                    position_id: position.id,
                    quantity: dec!(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(sold.trade.total_value, dec!(160.00));
        assert_eq!(sold.balance, dec!(860.00));
        assert_eq!(sold.realized_pnl, Some(dec!(10.00)));
        let remaining = sold.position.unwrap();
        assert_eq!(remaining.quantity, dec!(1));
        assert_eq!(remaining.average_cost, dec!(150.00));

        let trades = engine.trades(account.id).unwrap();
        assert_eq!(trades.len(), 2);
        let activity = engine.activity(account.id).unwrap();
        assert_eq!(
            activity[1].description,
            "Bought 2.0000 shares of AAPL at $150.00 per share (Total: $300.00)"
        );
        assert!(activity[0].description.starts_with("Sold 1.0000 shares of AAPL at $160.00"));
    }

    #[tokio::test]
    async fn repeated_buys_weight_the_average() {
        let source = Arc::new(MockPriceSource::new("mock"));
        let (_, engine) = engine_with(&source);
        engine.seed_instruments().unwrap();
        let account = engine.open_account("Guest", dec!(1000.00)).unwrap();

        engine.buy(account.id, buy("AAPL", dec!(300.00))).await.unwrap();
        let second = engine
            .buy(
                account.id,
                BuyOrder {
                    price_override: Some(dec!(180.00)),
                    ..buy("AAPL", dec!(180.00))
                },
            )
            .await
            .unwrap();

        let position = second.position.unwrap();
        assert_eq!(position.quantity, dec!(3));
        assert_eq!(position.average_cost, dec!(160.0000));
        assert_eq!(position.book_value, dec!(480.00));
        assert_eq!(second.balance, dec!(520.00));
    }

    #[tokio::test]
    async fn fractional_shares_truncate() {
        let source = Arc::new(MockPriceSource::new("mock"));
        let (_, engine) = engine_with(&source);
        engine
            .add_instrument("XYZ", None, MarketCategory::Other, dec!(3.00))
            .unwrap();
        let account = engine.open_account("Guest", dec!(100.00)).unwrap();

        let receipt = engine.buy(account.id, buy("XYZ", dec!(100.00))).await.unwrap();
        assert_eq!(receipt.trade.quantity, dec!(33.3333));
        assert!(receipt.trade.total_value <= dec!(100.00));
        assert!(receipt.balance >= Decimal::ZERO);
    }
}

mod rejections {
    use super::*;

    #[tokio::test]
    async fn oversell_leaves_everything_untouched() {
        let source = Arc::new(MockPriceSource::new("mock"));
        let (_, engine) = engine_with(&source);
        engine.seed_instruments().unwrap();
        let account = engine.open_account("Guest", dec!(1000.00)).unwrap();
        let position = engine
            .buy(account.id, buy("MSFT", dec!(600.00)))
            .await
            .unwrap()
            .position
            .unwrap();

        let before = engine.portfolio_summary(account.id).unwrap();
        let err = engine
            .sell(
                account.id,
                SellOrder {
                    position_id: position.id,
                    quantity: dec!(5),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StockbookError::InsufficientShares { .. }));
        assert_eq!(engine.portfolio_summary(account.id).unwrap(), before);
        assert_eq!(engine.trades(account.id).unwrap().len(), 1);
        assert_eq!(engine.activity(account.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn selling_everything_closes_the_position() {
        let source = Arc::new(MockPriceSource::new("mock"));
        let (store, engine) = engine_with(&source);
        engine.seed_instruments().unwrap();
        let account = engine.open_account("Guest", dec!(1000.00)).unwrap();
        let position = engine
            .buy(account.id, buy("TSLA", dec!(400.00)))
            .await
            .unwrap()
            .position
            .unwrap();

        let receipt = engine
            .sell(
                account.id,
                SellOrder {
                    position_id: position.id,
                    quantity: dec!(2),
                },
            )
            .await
            .unwrap();
        assert!(receipt.position.is_none());
        assert_eq!(receipt.balance, dec!(1000.00));
        assert_eq!(receipt.realized_pnl, Some(dec!(0.00)));
        assert!(store.atomic(|tx| tx.position(position.id)).unwrap().is_none());
        assert!(engine.portfolio_summary(account.id).unwrap().positions.is_empty());
    }

    #[tokio::test]
    async fn insufficient_balance_is_reported_with_amounts() {
        let source = Arc::new(MockPriceSource::new("mock"));
        let (_, engine) = engine_with(&source);
        engine.seed_instruments().unwrap();
        let account = engine.open_account("Guest", dec!(100.00)).unwrap();

        let err = engine
            .buy(account.id, buy("AAPL", dec!(150.00)))
            .await
            .unwrap_err();
        match err {
            StockbookError::InsufficientBalance {
                available,
                requested,
            } => {
                assert_eq!(available, dec!(100.00));
                assert_eq!(requested, dec!(150.00));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn non_positive_amounts_are_invalid() {
        let source = Arc::new(MockPriceSource::new("mock"));
        let (_, engine) = engine_with(&source);
        engine.seed_instruments().unwrap();
        let account = engine.open_account("Guest", dec!(100.00)).unwrap();

        for amount in [dec!(0), dec!(-10)] {
            let err = engine.buy(account.id, buy("AAPL", amount)).await.unwrap_err();
            assert!(matches!(err, StockbookError::InvalidAmount { .. }));
        }
        let err = engine
            .sell(
                account.id,
                SellOrder {
                    position_id: 1,
                    quantity: dec!(0),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StockbookError::InvalidAmount { .. }));
    }

    #[tokio::test]
    async fn missing_account_is_not_found() {
        let source = Arc::new(MockPriceSource::new("mock"));
        let (_, engine) = engine_with(&source);
        engine.seed_instruments().unwrap();
        let err = engine.buy(42, buy("AAPL", dec!(10.00))).await.unwrap_err();
        assert!(matches!(err, StockbookError::AccountNotFound { id: 42 }));
    }
}

mod oversized_and_overprecise {
    use super::*;
    use stockbook::adapters::memory_store::MemoryStore;
    use stockbook::domain::position::PositionId;
    use stockbook::domain::trading::TradingEngine;

    #[tokio::test]
    async fn huge_investment_is_rejected_and_store_keeps_working() {
        let source = Arc::new(MockPriceSource::new("mock"));
        let (_, engine) = engine_with(&source);
        engine
            .add_instrument("PENNY", None, MarketCategory::Other, dec!(0.01))
            .unwrap();
        let broke = engine.open_account("Broke", Decimal::ZERO).unwrap();

        let err = engine.buy(broke.id, buy("PENNY", Decimal::MAX)).await.unwrap_err();
        assert!(matches!(err, StockbookError::InvalidAmount { .. }));

        let err = engine
            .buy(broke.id, buy("PENNY", dec!(100000000000000000000)))
            .await
            .unwrap_err();
        assert!(matches!(err, StockbookError::InsufficientBalance { .. }));

        let funded = engine.open_account("Funded", dec!(10.00)).unwrap();
        let receipt = engine.buy(funded.id, buy("PENNY", dec!(1.00))).await.unwrap();
        assert_eq!(receipt.trade.quantity, dec!(100));
        assert_eq!(receipt.balance, dec!(9.00));
    }

    /// Engine with an account holding exactly 1 ACME bought at 100.00.
    async fn one_share_of_acme() -> (TradingEngine<MemoryStore>, i64, PositionId) {
        let source = Arc::new(MockPriceSource::new("mock"));
        let (_, engine) = engine_with(&source);
        engine
            .add_instrument("ACME", None, MarketCategory::Nyse, dec!(100.00))
            .unwrap();
        let account = engine.open_account("Guest", dec!(100.00)).unwrap();
        let position = engine
            .buy(account.id, buy("ACME", dec!(100.00)))
            .await
            .unwrap()
            .position
            .unwrap();
        (engine, account.id, position.id)
    }

    #[tokio::test]
    async fn quantity_past_four_places_is_not_truncated_into_a_sale() {
        let (engine, account_id, position_id) = one_share_of_acme().await;
        let before = engine.portfolio_summary(account_id).unwrap();

        for quantity in [dec!(1.00005), dec!(0.00019)] {
            let err = engine
                .sell(account_id, SellOrder { position_id, quantity })
                .await
                .unwrap_err();
            assert!(matches!(err, StockbookError::InvalidAmount { .. }));
        }

        assert_eq!(engine.portfolio_summary(account_id).unwrap(), before);
        assert_eq!(engine.trades(account_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_unit_over_the_holding_is_insufficient_shares() {
        let (engine, account_id, position_id) = one_share_of_acme().await;
        let err = engine
            .sell(
                account_id,
                SellOrder {
                    position_id,
                    quantity: dec!(1.0001),
                },
            )
            .await
            .unwrap_err();
        match err {
            StockbookError::InsufficientShares { owned, requested } => {
                assert_eq!(owned, dec!(1));
                assert_eq!(requested, dec!(1.0001));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_account_buys_never_overdraw() {
        let source = Arc::new(MockPriceSource::new("mock"));
        let (_, engine) = engine_with(&source);
        engine
            .add_instrument("ACME", None, MarketCategory::Nyse, dec!(100.00))
            .unwrap();
        let account = engine.open_account("Guest", dec!(500.00)).unwrap();
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.buy(account.id, buy("ACME", dec!(100.00))).await })
            })
            .collect();

        let mut filled = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => filled += 1,
                Err(e) => assert!(matches!(e, StockbookError::InsufficientBalance { .. })),
            }
        }
        assert_eq!(filled, 5);

        let summary = engine.portfolio_summary(account.id).unwrap();
        assert_eq!(summary.available_balance, dec!(0.00));
        assert_eq!(summary.positions[0].quantity, dec!(5));
        assert_eq!(engine.trades(account.id).unwrap().len(), 5);
    }
}

fn cents(range: std::ops::Range<i64>) -> impl Strategy<Value = Decimal> {
    range.prop_map(|c| Decimal::new(c, 2))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn buy_never_debits_more_than_invested(
        investment in cents(1..1_000_000),
        price in cents(1..100_000),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let source = Arc::new(MockPriceSource::new("mock"));
        let (_, engine) = engine_with(&source);
        engine.add_instrument("PROP", None, MarketCategory::Other, price).unwrap();
        let start = dec!(10000.00);
        let account = engine.open_account("Guest", start).unwrap();

        match runtime.block_on(engine.buy(account.id, buy("PROP", investment))) {
            Ok(receipt) => {
                prop_assert!(receipt.trade.total_value <= investment);
                prop_assert!(receipt.trade.quantity * price <= investment);
                prop_assert_eq!(receipt.balance, start - receipt.trade.total_value);
                prop_assert_eq!(receipt.trade.quantity, receipt.trade.quantity.trunc_with_scale(4));
            }
            Err(StockbookError::AmountTooSmall { .. }) => {
                prop_assert!(investment / price < dec!(0.0001));
            }
            Err(e) => prop_assert!(false, "unexpected error {}", e),
        }
    }

    #[test]
    fn average_cost_tracks_weighted_average_over_buy_sequences(
        buys in prop::collection::vec((cents(100..100_000), cents(100..50_000)), 1..8),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let source = Arc::new(MockPriceSource::new("mock"));
        let (_, engine) = engine_with(&source);
        engine.add_instrument("PROP", None, MarketCategory::Other, dec!(1.00)).unwrap();
        let account = engine.open_account("Guest", dec!(1000000.00)).unwrap();

        let (mut paid, mut held) = (Decimal::ZERO, Decimal::ZERO);
        for (step, (investment, price)) in buys.into_iter().enumerate() {
            let order = BuyOrder { price_override: Some(price), ..buy("PROP", investment) };
            let receipt = runtime.block_on(engine.buy(account.id, order)).unwrap();
            paid += receipt.trade.quantity * receipt.trade.unit_price;
            held += receipt.trade.quantity;

            let position = receipt.position.unwrap();
            prop_assert_eq!(position.quantity, held);
            // Each step rounds the average once, HALF_UP at 4 places.
            let tolerance = dec!(0.00005) * Decimal::from(step + 1);
            let exact = paid / held;
            prop_assert!(
                (position.average_cost - exact).abs() <= tolerance,
                "average {} drifted from {} after {} buys",
                position.average_cost,
                exact,
                step + 1
            );
        }
    }

    #[test]
    fn selling_part_keeps_average_cost(
        first in cents(10_000..50_000),
        sell_tenths in 1i64..10,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let source = Arc::new(MockPriceSource::new("mock"));
        let (_, engine) = engine_with(&source);
        engine.add_instrument("PROP", None, MarketCategory::Other, dec!(37.00)).unwrap();
        let account = engine.open_account("Guest", dec!(1000.00)).unwrap();

        let position = runtime
            .block_on(engine.buy(account.id, buy("PROP", first)))
            .unwrap()
            .position
            .unwrap();
        let quantity = (position.quantity * Decimal::new(sell_tenths, 1)).trunc_with_scale(4);
        prop_assume!(quantity >= dec!(0.0001));

        let receipt = runtime
            .block_on(engine.sell(account.id, SellOrder { position_id: position.id, quantity }))
            .unwrap();
        let remaining = receipt.position.unwrap();
        prop_assert_eq!(remaining.average_cost, position.average_cost);
        prop_assert_eq!(remaining.quantity, position.quantity - quantity);
    }
}
