// 13.1: the engine service. explicitly constructed at process start, torn down
// at shutdown; owns the registry, ledger, coordinator and processor, and hands
// out nothing mutable. no global state anywhere.

use super::results::{EngineError, PositionView, RecoveryReport, UserSummary};
use crate::config::{EngineConfig, SettlementMode};
use crate::events::Broadcaster;
use crate::executor::{SettlementExecutor, SettlementTarget};
use crate::ledger::PositionLedger;
use crate::registry::{PriceRegistry, PriceUpdate};
use crate::revaluation::{RevaluationProcessor, RevaluationReport};
use crate::settlement::{DrainReport, SettlementCoordinator, SettlementStats};
use crate::store::PositionStore;
use crate::types::{PositionId, Price, Quote, Ticker, Timestamp, UserId};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

pub struct PerpEngine {
    pub(super) config: EngineConfig,
    pub(super) registry: Arc<PriceRegistry>,
    pub(super) ledger: Arc<PositionLedger>,
    pub(super) coordinator: Arc<SettlementCoordinator>,
    pub(super) processor: RevaluationProcessor,
    pub(super) store: Arc<dyn PositionStore>,
    pub(super) broadcaster: Arc<dyn Broadcaster>,
    shutdown_tx: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PerpEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn PositionStore>,
        broadcaster: Arc<dyn Broadcaster>,
        target: Arc<dyn SettlementTarget>,
    ) -> Self {
        let registry = Arc::new(PriceRegistry::new());
        let ledger = Arc::new(PositionLedger::new(
            registry.clone(),
            store.clone(),
            config.clone(),
        ));
        let executor = SettlementExecutor::new(target, config.immediate_timeout);
        let coordinator = Arc::new(SettlementCoordinator::new(
            config.settlement_mode,
            ledger.clone(),
            executor,
            broadcaster.clone(),
            config.batch_interval,
            config.batch_size,
        ));
        let processor = RevaluationProcessor::new(
            registry.clone(),
            ledger.clone(),
            coordinator.clone(),
            broadcaster.clone(),
        );
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            registry,
            ledger,
            coordinator,
            processor,
            store,
            broadcaster,
            shutdown_tx,
            timer: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // 13.2: startup reconstruction. open positions rejoin the working set;
    // every persisted record with settled == false rejoins the unsettled queue
    // so batch draining is idempotent across restarts.
    pub async fn recover(&self) -> Result<RecoveryReport, EngineError> {
        let mut report = RecoveryReport::default();

        for position in self.store.load_open_positions()? {
            self.ledger.insert_recovered(position).await;
            report.open_positions += 1;
        }

        if self.config.settlement_mode == SettlementMode::Batched {
            let ids = self.store.load_unsettled_records()?;
            report.unsettled_enqueued = self.coordinator.enqueue_recovered(ids).await;
        }

        info!(
            open = report.open_positions,
            unsettled = report.unsettled_enqueued,
            "engine state recovered"
        );
        Ok(report)
    }

    // spawn the batch drain timer. meaningful only in batched mode; a no-op
    // otherwise so callers can start it unconditionally.
    pub async fn start_batch_timer(&self) {
        if self.config.settlement_mode != SettlementMode::Batched {
            return;
        }
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            return;
        }
        let handle = self
            .coordinator
            .clone()
            .spawn_timer(self.shutdown_tx.subscribe());
        *timer = Some(handle);
        info!(interval = ?self.config.batch_interval, "batch settlement timer started");
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.timer.lock().await.take() {
            let _ = handle.await;
        }
        info!("engine shut down");
    }

    // seed or correct a mark price outside the normal update flow
    pub async fn set_price(&self, ticker: Ticker, price: Price) {
        self.registry.set(ticker, price).await;
    }

    pub async fn mark_price(&self, ticker: &Ticker) -> Option<Price> {
        self.registry.get(ticker).await
    }

    pub async fn apply_price_updates(
        &self,
        updates: Vec<PriceUpdate>,
        now: Timestamp,
    ) -> Result<RevaluationReport, EngineError> {
        Ok(self.processor.process_price_batch(updates, now).await?)
    }

    // operator hook: force one drain pass without waiting for the timer
    pub async fn drain_settlements_once(&self, now: Timestamp) -> DrainReport {
        self.coordinator.drain_once(now).await
    }

    pub async fn settlement_stats(&self) -> SettlementStats {
        self.coordinator.stats().await
    }

    pub async fn position(&self, id: PositionId) -> Option<PositionView> {
        self.ledger.snapshot(id).await.map(|p| PositionView::from(&p))
    }

    pub async fn user_summary(&self, user_id: UserId) -> UserSummary {
        let positions = self.ledger.user_positions(user_id).await;
        let open_count = positions.iter().filter(|p| p.is_open()).count();
        let total_unrealized_pnl = positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.unrealized_pnl)
            .sum();
        let total_margin_posted = positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.margin)
            .sum::<Quote>();
        UserSummary {
            positions: positions.iter().map(PositionView::from).collect(),
            open_count,
            total_unrealized_pnl,
            total_margin_posted,
        }
    }
}
