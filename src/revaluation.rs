// 12.0: funding/revaluation processor. consumes batched price updates, pushes
// them through the registry and ledger, and fans the consequences out: one
// settlement notification per liquidated position (not per tick), one price
// broadcast per ticker per batch.

use crate::events::{
    Broadcaster, EventPayload, PositionLiquidatedEvent, PriceChangedEvent, POSITIONS_CHANNEL,
    PRICES_CHANNEL,
};
use crate::ledger::{CloseResult, LedgerError, PositionLedger};
use crate::registry::{PriceRegistry, PriceUpdate};
use crate::settlement::SettlementCoordinator;
use crate::types::{PositionId, Price, Ticker, Timestamp};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Default)]
pub struct RevaluationReport {
    pub accepted: usize,
    pub dropped: usize,
    pub liquidated: Vec<CloseResult>,
}

impl RevaluationReport {
    pub fn liquidated_ids(&self) -> Vec<PositionId> {
        self.liquidated.iter().map(|r| r.position.id).collect()
    }
}

pub struct RevaluationProcessor {
    registry: Arc<PriceRegistry>,
    ledger: Arc<PositionLedger>,
    coordinator: Arc<SettlementCoordinator>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl RevaluationProcessor {
    pub fn new(
        registry: Arc<PriceRegistry>,
        ledger: Arc<PositionLedger>,
        coordinator: Arc<SettlementCoordinator>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            registry,
            ledger,
            coordinator,
            broadcaster,
        }
    }

    // 12.1: one call may carry many tickers. a single bad update is dropped
    // and logged; the rest of the batch continues.
    pub async fn process_price_batch(
        &self,
        updates: Vec<PriceUpdate>,
        now: Timestamp,
    ) -> Result<RevaluationReport, LedgerError> {
        let mut report = RevaluationReport::default();
        // last accepted update per ticker wins the broadcast
        let mut latest: HashMap<Ticker, PriceUpdate> = HashMap::new();
        let mut notified: HashSet<PositionId> = HashSet::new();

        for update in updates {
            let Some(price) = Price::new(update.price) else {
                warn!(ticker = %update.ticker, price = %update.price, "dropping invalid price update");
                report.dropped += 1;
                continue;
            };
            report.accepted += 1;

            self.registry.set(update.ticker.clone(), price).await;
            let liquidated = self.ledger.revalue(&update.ticker, price, now).await?;
            report.liquidated.extend(liquidated);
            latest.insert(update.ticker.clone(), update);
        }

        // settlement + owner notification, once per affected position
        for result in &report.liquidated {
            if !notified.insert(result.position.id) {
                continue;
            }
            self.coordinator.record_mutation(&result.position, now).await;
            self.broadcaster.publish(
                POSITIONS_CHANNEL,
                &EventPayload::PositionLiquidated(PositionLiquidatedEvent {
                    position_id: result.position.id,
                    user_id: result.position.user_id,
                    ticker: result.position.ticker.clone(),
                    liquidation_price: result.position.liquidation_price,
                    mark_price: result.position.mark_price,
                    margin_lost: result.position.margin.sub(result.settlement_amount),
                }),
            );
        }

        // one price notification per ticker per batch
        for (ticker, update) in latest {
            self.broadcaster.publish(
                PRICES_CHANNEL,
                &EventPayload::PriceChanged(PriceChangedEvent {
                    ticker,
                    price: update.price,
                    source: update.source,
                    reason: update.reason,
                }),
            );
        }

        Ok(report)
    }
}
