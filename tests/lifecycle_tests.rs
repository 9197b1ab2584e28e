//! Position lifecycle integration tests.
//!
//! Walks the engine through the worked scenarios: open at 100 with margin 1000
//! at 5x, liquidation at 79, voluntary close at 110, plus ownership and
//! conflict rejections and concurrent mutation safety.

use perp_engine::*;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

fn t(ms: i64) -> Timestamp {
    Timestamp::from_millis(ms)
}

fn acme() -> Ticker {
    Ticker::new("ACME")
}

async fn engine(mode: SettlementMode) -> Arc<PerpEngine> {
    let config = EngineConfig {
        settlement_mode: mode,
        batch_interval: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let engine = Arc::new(PerpEngine::new(
        config,
        Arc::new(InMemoryStore::new()),
        Arc::new(NullBroadcaster),
        Arc::new(MockChainClient::new()),
    ));
    engine.set_price(acme(), Price::new_unchecked(dec!(100))).await;
    engine
}

fn tick(price: rust_decimal::Decimal) -> PriceUpdate {
    PriceUpdate::new(acme(), price, PriceSource::Simulated)
}

#[tokio::test]
async fn scenario_open_long_computes_size_and_liquidation() {
    let engine = engine(SettlementMode::Disabled).await;

    let outcome = engine
        .open_position(UserId(1), acme(), Side::Long, Quote::new(dec!(1000)), 5, t(0))
        .await
        .unwrap();

    assert_eq!(outcome.view.size.value(), dec!(5000));
    assert_eq!(outcome.view.entry_price.value(), dec!(100));
    assert_eq!(outcome.view.liquidation_price.value(), dec!(80));
    assert!(outcome.view.is_open);
    assert!(outcome.settled);
}

#[tokio::test]
async fn scenario_revalue_to_79_force_closes() {
    let engine = engine(SettlementMode::Disabled).await;
    let opened = engine
        .open_position(UserId(1), acme(), Side::Long, Quote::new(dec!(1000)), 5, t(0))
        .await
        .unwrap();

    let report = engine
        .apply_price_updates(vec![tick(dec!(79))], t(1000))
        .await
        .unwrap();

    assert_eq!(report.liquidated_ids(), vec![opened.view.id]);
    let liq = &report.liquidated[0];
    assert!(liq.was_liquidated);
    assert_eq!(liq.settlement_amount.value(), dec!(0));

    let view = engine.position(opened.view.id).await.unwrap();
    assert!(!view.is_open);
    assert_eq!(view.realized_pnl.unwrap().value(), dec!(-1000));
}

#[tokio::test]
async fn scenario_close_at_110_pays_1500() {
    let engine = engine(SettlementMode::Disabled).await;
    let opened = engine
        .open_position(UserId(1), acme(), Side::Long, Quote::new(dec!(1000)), 5, t(0))
        .await
        .unwrap();

    engine
        .apply_price_updates(vec![tick(dec!(110))], t(1000))
        .await
        .unwrap();

    let closed = engine
        .close_position(opened.view.id, UserId(1), t(2000))
        .await
        .unwrap();

    assert_eq!(closed.realized_pnl.value(), dec!(500));
    assert_eq!(closed.settlement_amount.value(), dec!(1500));
    assert!(!closed.was_liquidated);
}

#[tokio::test]
async fn short_position_mirrors_long() {
    let engine = engine(SettlementMode::Disabled).await;
    let opened = engine
        .open_position(UserId(1), acme(), Side::Short, Quote::new(dec!(1000)), 5, t(0))
        .await
        .unwrap();

    assert_eq!(opened.view.liquidation_price.value(), dec!(120));

    // price falls → short profits
    engine
        .apply_price_updates(vec![tick(dec!(90))], t(1000))
        .await
        .unwrap();

    let closed = engine
        .close_position(opened.view.id, UserId(1), t(2000))
        .await
        .unwrap();
    assert_eq!(closed.realized_pnl.value(), dec!(500));
}

#[tokio::test]
async fn validation_rejections_mutate_nothing() {
    let engine = engine(SettlementMode::Disabled).await;

    let r = engine
        .open_position(UserId(1), acme(), Side::Long, Quote::new(dec!(-5)), 5, t(0))
        .await;
    assert!(matches!(r, Err(EngineError::InvalidMargin(_))));

    let r = engine
        .open_position(UserId(1), acme(), Side::Long, Quote::new(dec!(1000)), 0, t(0))
        .await;
    assert!(matches!(r, Err(EngineError::InvalidLeverage { .. })));

    let r = engine
        .open_position(UserId(1), Ticker::new("UNLISTED"), Side::Long, Quote::new(dec!(1000)), 5, t(0))
        .await;
    assert!(matches!(r, Err(EngineError::UnknownTicker(_))));

    let stats = engine.settlement_stats().await;
    assert_eq!(stats.total_positions, 0);
}

#[tokio::test]
async fn ownership_and_conflict_rejections() {
    let engine = engine(SettlementMode::Disabled).await;
    let opened = engine
        .open_position(UserId(1), acme(), Side::Long, Quote::new(dec!(1000)), 5, t(0))
        .await
        .unwrap();

    let r = engine.close_position(opened.view.id, UserId(2), t(1)).await;
    assert!(matches!(r, Err(EngineError::NotOwner { .. })));

    engine.close_position(opened.view.id, UserId(1), t(2)).await.unwrap();

    let r = engine.close_position(opened.view.id, UserId(1), t(3)).await;
    assert!(matches!(r, Err(EngineError::AlreadyClosed(_))));

    let r = engine
        .close_position(PositionId::generate(), UserId(1), t(4))
        .await;
    assert!(matches!(r, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn funding_accrues_over_elapsed_hours() {
    let engine = engine(SettlementMode::Disabled).await;
    let opened = engine
        .open_position(UserId(1), acme(), Side::Long, Quote::new(dec!(1000)), 5, t(0))
        .await
        .unwrap();

    // two hours pass before the next revaluation tick
    engine
        .apply_price_updates(vec![tick(dec!(100))], t(2 * 3_600_000))
        .await
        .unwrap();

    let view = engine.position(opened.view.id).await.unwrap();
    // 5000 notional * 0.0001/h * 2h = 1, paid by the long
    assert_eq!(view.funding_paid.value(), dec!(1.0));
}

#[tokio::test]
async fn revalue_is_idempotent_through_the_engine() {
    let engine = engine(SettlementMode::Disabled).await;
    let opened = engine
        .open_position(UserId(1), acme(), Side::Long, Quote::new(dec!(1000)), 5, t(0))
        .await
        .unwrap();

    let first = engine
        .apply_price_updates(vec![tick(dec!(90))], t(1000))
        .await
        .unwrap();
    let pnl_first = engine.position(opened.view.id).await.unwrap().unrealized_pnl;

    let second = engine
        .apply_price_updates(vec![tick(dec!(90))], t(1000))
        .await
        .unwrap();
    let pnl_second = engine.position(opened.view.id).await.unwrap().unrealized_pnl;

    assert!(first.liquidated.is_empty());
    assert!(second.liquidated.is_empty());
    assert_eq!(pnl_first, pnl_second);
    assert_eq!(pnl_first.value(), dec!(-500));
}

#[tokio::test]
async fn user_summary_aggregates_open_positions() {
    let engine = engine(SettlementMode::Disabled).await;
    engine.set_price(Ticker::new("GLOBEX"), Price::new_unchecked(dec!(50))).await;

    engine
        .open_position(UserId(1), acme(), Side::Long, Quote::new(dec!(1000)), 5, t(0))
        .await
        .unwrap();
    engine
        .open_position(UserId(1), Ticker::new("GLOBEX"), Side::Short, Quote::new(dec!(500)), 2, t(0))
        .await
        .unwrap();
    engine
        .open_position(UserId(2), acme(), Side::Long, Quote::new(dec!(100)), 10, t(0))
        .await
        .unwrap();

    engine
        .apply_price_updates(vec![tick(dec!(110))], t(1000))
        .await
        .unwrap();

    let summary = engine.user_summary(UserId(1)).await;
    assert_eq!(summary.open_count, 2);
    assert_eq!(summary.total_margin_posted.value(), dec!(1500));
    // only the ACME long moved: +500
    assert_eq!(summary.total_unrealized_pnl.value(), dec!(500));
}

#[tokio::test]
async fn mixed_sides_only_crossed_positions_liquidate() {
    let engine = engine(SettlementMode::Disabled).await;

    let long = engine
        .open_position(UserId(1), acme(), Side::Long, Quote::new(dec!(1000)), 5, t(0))
        .await
        .unwrap();
    let short = engine
        .open_position(UserId(2), acme(), Side::Short, Quote::new(dec!(1000)), 5, t(0))
        .await
        .unwrap();

    // drop to 79: the 5x long dies, the short profits
    let report = engine
        .apply_price_updates(vec![tick(dec!(79))], t(1000))
        .await
        .unwrap();

    assert_eq!(report.liquidated_ids(), vec![long.view.id]);
    let short_view = engine.position(short.view.id).await.unwrap();
    assert!(short_view.is_open);
    assert!(short_view.unrealized_pnl.is_positive());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_and_closes_stay_consistent() {
    let engine = engine(SettlementMode::Disabled).await;

    let mut handles = Vec::new();
    for user in 0..16u64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let opened = engine
                .open_position(UserId(user), acme(), Side::Long, Quote::new(dec!(100)), 5, t(0))
                .await
                .unwrap();
            engine
                .close_position(opened.view.id, UserId(user), t(1))
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.realized_pnl.value(), dec!(0));
        assert_eq!(outcome.settlement_amount.value(), dec!(100));
    }

    let stats = engine.settlement_stats().await;
    assert_eq!(stats.total_positions, 16);
    assert_eq!(stats.unsettled_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_double_close_only_one_wins() {
    let engine = engine(SettlementMode::Disabled).await;
    let opened = engine
        .open_position(UserId(1), acme(), Side::Long, Quote::new(dec!(1000)), 5, t(0))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let id = opened.view.id;
        handles.push(tokio::spawn(async move {
            engine.close_position(id, UserId(1), t(1)).await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(EngineError::AlreadyClosed(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(conflicts, 7);
}
