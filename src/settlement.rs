// 11.0: settlement coordinator. decides, per configured mode, whether and when
// a position mutation is mirrored to the external settlement target.
//
// the ledger's economic truth is always ahead of settlement: nothing here ever
// rolls back a trade. records move unsettled → settled exactly once per
// mutation; a failed attempt leaves the record unsettled and visible in stats.

use crate::config::SettlementMode;
use crate::events::{Broadcaster, EventPayload, PositionSettledEvent, SETTLEMENT_CHANNEL};
use crate::executor::{SettleOutcome, SettlementExecutor};
use crate::ledger::PositionLedger;
use crate::position::Position;
use crate::types::{PositionId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

// 11.1: the unsettled working set. queue preserves submission order; the two
// id sets make enqueue/drain atomic so overlapping drains can never submit the
// same id twice.
#[derive(Debug, Default)]
struct PendingSet {
    queue: VecDeque<PositionId>,
    queued: HashSet<PositionId>,
    in_flight: HashSet<PositionId>,
}

impl PendingSet {
    fn enqueue(&mut self, id: PositionId) -> bool {
        if self.queued.contains(&id) || self.in_flight.contains(&id) {
            return false;
        }
        self.queued.insert(id);
        self.queue.push_back(id);
        true
    }

    // moves up to `limit` ids from the queue into the in-flight guard
    fn take_batch(&mut self, limit: usize) -> Vec<PositionId> {
        let mut batch = Vec::new();
        while batch.len() < limit {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            self.queued.remove(&id);
            self.in_flight.insert(id);
            batch.push(id);
        }
        batch
    }

    fn finish(&mut self, id: PositionId, requeue: bool) {
        self.in_flight.remove(&id);
        if requeue {
            self.queued.insert(id);
            self.queue.push_back(id);
        }
    }

    fn len(&self) -> usize {
        self.queue.len() + self.in_flight.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementStats {
    pub mode: SettlementMode,
    pub unsettled_count: usize,
    pub total_positions: usize,
    pub attempted: u64,
    pub settled_count: u64,
    // settled / attempted; 1 when nothing has been attempted yet
    pub settlement_rate: Decimal,
}

// what one drain pass did
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    pub attempted: usize,
    pub settled: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct SettlementCoordinator {
    mode: SettlementMode,
    ledger: Arc<PositionLedger>,
    executor: SettlementExecutor,
    broadcaster: Arc<dyn Broadcaster>,
    pending: Mutex<PendingSet>,
    batch_interval: Duration,
    batch_size: usize,
    attempted: AtomicU64,
    settled: AtomicU64,
}

impl SettlementCoordinator {
    pub fn new(
        mode: SettlementMode,
        ledger: Arc<PositionLedger>,
        executor: SettlementExecutor,
        broadcaster: Arc<dyn Broadcaster>,
        batch_interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            mode,
            ledger,
            executor,
            broadcaster,
            pending: Mutex::new(PendingSet::default()),
            batch_interval,
            batch_size,
            attempted: AtomicU64::new(0),
            settled: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> SettlementMode {
        self.mode
    }

    // 11.2: called synchronously after every committed ledger mutation.
    // returns the settlement outcome for the caller's `settled` flag; the
    // mutation itself is never rolled back.
    pub async fn record_mutation(&self, position: &Position, now: Timestamp) -> SettleOutcome {
        match self.mode {
            SettlementMode::Disabled => {
                let reference = format!("local-{}", Uuid::new_v4());
                self.attempted.fetch_add(1, Ordering::SeqCst);
                match self.ledger.mark_settled(position.id, &reference, now).await {
                    Ok(()) => {
                        self.settled.fetch_add(1, Ordering::SeqCst);
                        self.publish_settled(position.id, &reference);
                        SettleOutcome::succeeded(reference)
                    }
                    Err(err) => {
                        warn!(id = %position.id, %err, "disabled-mode settle mark failed");
                        SettleOutcome::failed(crate::executor::SettleError::Transport(err.to_string()))
                    }
                }
            }
            SettlementMode::Immediate => {
                self.attempted.fetch_add(1, Ordering::SeqCst);
                let outcome = self.executor.settle(position.settlement.action, position).await;
                if let Some(reference) = outcome.reference.as_deref() {
                    if let Err(err) = self.ledger.mark_settled(position.id, reference, now).await {
                        warn!(id = %position.id, %err, "settled externally but mark failed");
                    } else {
                        self.settled.fetch_add(1, Ordering::SeqCst);
                        self.publish_settled(position.id, reference);
                    }
                }
                // failure: record stays unsettled, no automatic retry in this mode
                outcome
            }
            SettlementMode::Batched => {
                let added = self.pending.lock().await.enqueue(position.id);
                if added {
                    info!(id = %position.id, "queued for batch settlement");
                }
                // caller never blocks on external settlement
                SettleOutcome {
                    success: false,
                    reference: None,
                    error: None,
                }
            }
        }
    }

    // startup reconstruction: ids whose persisted record is unsettled rejoin
    // the queue. already-settled ids are filtered again at drain time.
    pub async fn enqueue_recovered(&self, ids: Vec<PositionId>) -> usize {
        let mut pending = self.pending.lock().await;
        ids.into_iter().filter(|id| pending.enqueue(*id)).count()
    }

    // 11.3: one drain pass. used by the timer task and directly by tests and
    // operator tooling. failures stay in the set for the next pass.
    pub async fn drain_once(&self, now: Timestamp) -> DrainReport {
        let batch = self.pending.lock().await.take_batch(self.batch_size);
        let mut report = DrainReport::default();

        for id in batch {
            let Some(snapshot) = self.ledger.snapshot(id).await else {
                // no longer in the ledger; drop it
                self.pending.lock().await.finish(id, false);
                report.skipped += 1;
                continue;
            };

            if snapshot.settlement.settled {
                // settled by an earlier pass or a mode change; never resubmit
                self.pending.lock().await.finish(id, false);
                report.skipped += 1;
                continue;
            }

            report.attempted += 1;
            self.attempted.fetch_add(1, Ordering::SeqCst);
            let outcome = self.executor.settle(snapshot.settlement.action, &snapshot).await;

            match outcome.reference.as_deref() {
                Some(reference) => {
                    match self.ledger.mark_settled(id, reference, now).await {
                        Ok(()) => {
                            self.settled.fetch_add(1, Ordering::SeqCst);
                            self.publish_settled(id, reference);
                            self.pending.lock().await.finish(id, false);
                            report.settled += 1;
                        }
                        Err(err) => {
                            warn!(id = %id, %err, "settled externally but mark failed, will retry");
                            self.pending.lock().await.finish(id, true);
                            report.failed += 1;
                        }
                    }
                }
                None => {
                    self.pending.lock().await.finish(id, true);
                    report.failed += 1;
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                settled = report.settled,
                failed = report.failed,
                "settlement batch drained"
            );
        }
        report
    }

    // 11.4: the background timer. exactly one per engine; fires every
    // batch_interval until the shutdown signal flips.
    pub fn spawn_timer(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.batch_interval);
            // consume the immediate first tick so the first drain waits a full interval
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.drain_once(Timestamp::now()).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("settlement timer stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn stats(&self) -> SettlementStats {
        let attempted = self.attempted.load(Ordering::SeqCst);
        let settled = self.settled.load(Ordering::SeqCst);
        let rate = if attempted == 0 {
            Decimal::ONE
        } else {
            Decimal::from(settled) / Decimal::from(attempted)
        };
        SettlementStats {
            mode: self.mode,
            unsettled_count: self.ledger.unsettled_ids().await.len(),
            total_positions: self.ledger.total_count().await,
            attempted,
            settled_count: settled,
            settlement_rate: rate,
        }
    }

    fn publish_settled(&self, id: PositionId, reference: &str) {
        self.broadcaster.publish(
            SETTLEMENT_CHANNEL,
            &EventPayload::PositionSettled(PositionSettledEvent {
                position_id: id,
                reference: reference.to_string(),
            }),
        );
    }
}
