//! Perpetual position engine simulation.
//!
//! Drives the full lifecycle against the mock chain client: opens, price
//! movement, voluntary closes, liquidation cascades, and all three settlement
//! modes.

use perp_engine::*;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("Perpetual Position Engine Simulation");
    println!("Ledger, Revaluation, and Settlement Reconciliation\n");

    scenario_1_open_and_close().await;
    scenario_2_liquidation_cascade().await;
    scenario_3_batched_settlement().await;
    scenario_4_settlement_failures().await;
    scenario_5_restart_recovery().await;

    println!("\nAll simulations completed successfully.");
}

fn engine_with(mode: SettlementMode) -> (Arc<PerpEngine>, Arc<InMemoryStore>, Arc<MockChainClient>) {
    let store = Arc::new(InMemoryStore::new());
    let chain = Arc::new(MockChainClient::new());
    let config = EngineConfig {
        settlement_mode: mode,
        batch_interval: Duration::from_millis(200),
        ..EngineConfig::default()
    };
    let engine = Arc::new(PerpEngine::new(
        config,
        store.clone(),
        Arc::new(NullBroadcaster),
        chain.clone(),
    ));
    (engine, store, chain)
}

/// Open at 100, ride to 110, close. Scenario matches the worked example:
/// margin 1000 at 5x → size 5000, liquidation price 80, close pnl +500.
async fn scenario_1_open_and_close() {
    println!("Scenario 1: Open, Revalue, Voluntary Close\n");

    let (engine, _, _) = engine_with(SettlementMode::Disabled);
    let acme = Ticker::new("ACME");
    engine.set_price(acme.clone(), Price::new_unchecked(dec!(100))).await;

    let opened = engine
        .open_position(UserId(1), acme.clone(), Side::Long, Quote::new(dec!(1000)), 5, Timestamp::now())
        .await
        .unwrap();

    println!("  Opened {} {} at {}", opened.view.side, opened.view.ticker, opened.view.entry_price);
    println!("  Size: {}, liquidation price: {}", opened.view.size, opened.view.liquidation_price);

    engine
        .apply_price_updates(
            vec![PriceUpdate::new(acme.clone(), dec!(110), PriceSource::Simulated)],
            Timestamp::now(),
        )
        .await
        .unwrap();

    let closed = engine
        .close_position(opened.view.id, UserId(1), Timestamp::now())
        .await
        .unwrap();

    println!("  Closed at 110: realized pnl {}, payout {}\n", closed.realized_pnl, closed.settlement_amount);
    assert_eq!(closed.realized_pnl.value(), dec!(500));
    assert_eq!(closed.settlement_amount.value(), dec!(1500));
}

/// Three longs at different leverage; one price drop wipes out the weakest.
async fn scenario_2_liquidation_cascade() {
    println!("Scenario 2: Liquidation Cascade\n");

    let (engine, _, _) = engine_with(SettlementMode::Disabled);
    let acme = Ticker::new("ACME");
    engine.set_price(acme.clone(), Price::new_unchecked(dec!(100))).await;

    for (user, leverage) in [(1u64, 20u32), (2, 5), (3, 2)] {
        engine
            .open_position(UserId(user), acme.clone(), Side::Long, Quote::new(dec!(1000)), leverage, Timestamp::now())
            .await
            .unwrap();
        println!("  User {user} opens long at {leverage}x");
    }

    // 20x liquidates below 95, 5x below 80, 2x below 50
    let report = engine
        .apply_price_updates(
            vec![PriceUpdate::new(acme.clone(), dec!(79), PriceSource::External).with_reason("sell-off")],
            Timestamp::now(),
        )
        .await
        .unwrap();

    println!("  Price drops to 79 → {} positions liquidated", report.liquidated.len());
    for result in &report.liquidated {
        println!(
            "    user {} liquidated, payout {}",
            result.position.user_id.0, result.settlement_amount
        );
    }
    println!();
    assert_eq!(report.liquidated.len(), 2);
}

/// Batched mode: mutations queue up, the timer drains them.
async fn scenario_3_batched_settlement() {
    println!("Scenario 3: Batched Settlement\n");

    let (engine, _, chain) = engine_with(SettlementMode::Batched);
    let acme = Ticker::new("ACME");
    engine.set_price(acme.clone(), Price::new_unchecked(dec!(100))).await;
    engine.start_batch_timer().await;

    for user in 1..=3u64 {
        let outcome = engine
            .open_position(UserId(user), acme.clone(), Side::Long, Quote::new(dec!(500)), 10, Timestamp::now())
            .await
            .unwrap();
        println!("  User {user} opened, settled yet: {}", outcome.settled);
    }

    let stats = engine.settlement_stats().await;
    println!("  Before drain: {} unsettled", stats.unsettled_count);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let stats = engine.settlement_stats().await;
    println!(
        "  After timer: {} unsettled, {} submissions on chain, rate {}\n",
        stats.unsettled_count,
        chain.submissions(),
        stats.settlement_rate
    );

    engine.shutdown().await;
}

/// A failing chain client leaves ids unsettled; they retry on the next drain.
async fn scenario_4_settlement_failures() {
    println!("Scenario 4: Settlement Failure and Retry\n");

    let (engine, _, chain) = engine_with(SettlementMode::Batched);
    let acme = Ticker::new("ACME");
    engine.set_price(acme.clone(), Price::new_unchecked(dec!(100))).await;

    let a = engine
        .open_position(UserId(1), acme.clone(), Side::Long, Quote::new(dec!(500)), 10, Timestamp::now())
        .await
        .unwrap();
    let b = engine
        .open_position(UserId(2), acme.clone(), Side::Short, Quote::new(dec!(500)), 10, Timestamp::now())
        .await
        .unwrap();

    chain.fail_next(1).await;
    let first = engine.drain_settlements_once(Timestamp::now()).await;
    println!(
        "  First drain: {} settled, {} failed (ids {} / {})",
        first.settled, first.failed, a.view.id, b.view.id
    );

    let second = engine.drain_settlements_once(Timestamp::now()).await;
    println!("  Second drain: {} settled, {} failed", second.settled, second.failed);

    let stats = engine.settlement_stats().await;
    println!("  Final: {} unsettled, rate {}\n", stats.unsettled_count, stats.settlement_rate);
    assert_eq!(stats.unsettled_count, 0);
}

/// Unsettled records survive a restart: a fresh engine over the same store
/// picks them up and settles them.
async fn scenario_5_restart_recovery() {
    println!("Scenario 5: Restart Recovery\n");

    let store = Arc::new(InMemoryStore::new());
    let chain = Arc::new(MockChainClient::new());
    let config = EngineConfig::with_mode(SettlementMode::Batched);

    {
        let engine = PerpEngine::new(
            config.clone(),
            store.clone(),
            Arc::new(NullBroadcaster),
            chain.clone(),
        );
        let acme = Ticker::new("ACME");
        engine.set_price(acme.clone(), Price::new_unchecked(dec!(100))).await;
        engine
            .open_position(UserId(1), acme, Side::Long, Quote::new(dec!(1000)), 5, Timestamp::now())
            .await
            .unwrap();
        println!("  First engine opened a position and stopped before settling");
        engine.shutdown().await;
    }

    let engine = PerpEngine::new(config, store, Arc::new(NullBroadcaster), chain);
    let acme = Ticker::new("ACME");
    engine.set_price(acme, Price::new_unchecked(dec!(100))).await;
    let recovery = engine.recover().await.unwrap();
    println!(
        "  Second engine recovered {} open positions, {} unsettled",
        recovery.open_positions, recovery.unsettled_enqueued
    );

    engine.drain_settlements_once(Timestamp::now()).await;
    let stats = engine.settlement_stats().await;
    println!("  After drain: {} unsettled\n", stats.unsettled_count);
    assert_eq!(stats.unsettled_count, 0);
}
