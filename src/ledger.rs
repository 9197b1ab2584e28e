// 9.0: the position ledger. authoritative in-process map of every position,
// open and closed. economic truth lives here and is always ahead of settlement.
//
// locking: two levels. the outer maps guard membership; each position sits
// behind its own mutex so independent positions mutate concurrently while
// open/close/revalue stay mutually exclusive per id. a ticker's revaluation
// pass works against an id snapshot taken under the index lock.

use crate::calc;
use crate::config::EngineConfig;
use crate::position::{CloseReason, LiquidationVerdict, Position};
use crate::registry::PriceRegistry;
use crate::store::{PositionStore, StoreError};
use crate::types::{Leverage, PositionId, Price, Quote, Side, Ticker, Timestamp, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("leverage {requested} outside bounds {min}..={max}")]
    InvalidLeverage { requested: u32, min: u32, max: u32 },

    #[error("margin must be positive, got {0}")]
    InvalidMargin(Quote),

    #[error("no price registered for ticker {0}")]
    UnknownTicker(Ticker),

    #[error("position {0} not found")]
    NotFound(PositionId),

    #[error("position {0} is already closed")]
    AlreadyClosed(PositionId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// outcome of a voluntary or forced close
#[derive(Debug, Clone)]
pub struct CloseResult {
    pub position: Position,
    pub realized_pnl: Quote,
    pub settlement_amount: Quote,
    pub was_liquidated: bool,
}

pub struct PositionLedger {
    positions: RwLock<HashMap<PositionId, Arc<Mutex<Position>>>>,
    // open working set, keyed by ticker. closed positions leave this index but
    // stay in the map above for audit.
    open_by_ticker: RwLock<HashMap<Ticker, HashSet<PositionId>>>,
    registry: Arc<PriceRegistry>,
    store: Arc<dyn PositionStore>,
    config: EngineConfig,
}

impl PositionLedger {
    pub fn new(registry: Arc<PriceRegistry>, store: Arc<dyn PositionStore>, config: EngineConfig) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            open_by_ticker: RwLock::new(HashMap::new()),
            registry,
            store,
            config,
        }
    }

    // 9.1: validate, build, persist, insert. entry price is the current mark
    // at acceptance time; an unknown ticker rejects before anything mutates.
    pub async fn open(
        &self,
        user_id: UserId,
        ticker: Ticker,
        side: Side,
        margin: Quote,
        leverage: u32,
        now: Timestamp,
    ) -> Result<Position, LedgerError> {
        if !margin.is_positive() {
            return Err(LedgerError::InvalidMargin(margin));
        }
        if !self.config.leverage_in_bounds(leverage) {
            return Err(LedgerError::InvalidLeverage {
                requested: leverage,
                min: self.config.min_leverage,
                max: self.config.max_leverage,
            });
        }
        let entry_price = self
            .registry
            .get(&ticker)
            .await
            .ok_or_else(|| LedgerError::UnknownTicker(ticker.clone()))?;
        // bounds checked above, so the constructor cannot see 0
        let leverage = Leverage::new(leverage).ok_or(LedgerError::InvalidLeverage {
            requested: leverage,
            min: self.config.min_leverage,
            max: self.config.max_leverage,
        })?;

        let position = Position::open(
            PositionId::generate(),
            user_id,
            ticker.clone(),
            side,
            margin,
            leverage,
            entry_price,
            self.config.maintenance_margin_ratio,
            now,
        );

        self.store.upsert_position(&position)?;

        self.positions
            .write()
            .await
            .insert(position.id, Arc::new(Mutex::new(position.clone())));
        self.open_by_ticker
            .write()
            .await
            .entry(ticker)
            .or_default()
            .insert(position.id);

        info!(
            id = %position.id,
            user = position.user_id.0,
            ticker = %position.ticker,
            side = %position.side,
            size = %position.size,
            entry = %position.entry_price,
            liq = %position.liquidation_price,
            "position opened"
        );
        Ok(position)
    }

    // 9.2: voluntary close at the position's current mark price. the record is
    // kept for audit; only the open working set shrinks.
    pub async fn close(&self, id: PositionId, now: Timestamp) -> Result<CloseResult, LedgerError> {
        let entry = self.entry(id).await.ok_or(LedgerError::NotFound(id))?;
        let mut position = entry.lock().await;

        if !position.is_open() {
            return Err(LedgerError::AlreadyClosed(id));
        }

        // a close requested after the mark already crossed the liquidation
        // threshold settles as a liquidation, with the loss floored at margin
        let close_price = position.mark_price;
        let (realized, reason) = match position.decide_liquidation(close_price) {
            LiquidationVerdict::ForceClose { realized_pnl, .. } => (realized_pnl, CloseReason::Liquidation),
            LiquidationVerdict::Keep => (
                calc::unrealized_pnl(position.side, position.entry_price, position.size, close_price),
                CloseReason::UserClosed,
            ),
        };
        position.apply_close(close_price, realized, reason, now);
        self.store.upsert_position(&position)?;
        let snapshot = position.clone();
        drop(position);

        self.remove_from_open_index(&snapshot.ticker, id).await;

        info!(id = %id, price = %close_price, pnl = %realized, reason = ?reason, "position closed");
        Ok(CloseResult {
            settlement_amount: snapshot.settlement_amount(),
            realized_pnl: realized,
            was_liquidated: reason == CloseReason::Liquidation,
            position: snapshot,
        })
    }

    // 9.3: one revaluation pass for one ticker. recomputes pnl and funding on
    // every open position, force-closing the ones that crossed their
    // liquidation price. idempotent at a fixed price: the second pass finds
    // nothing left to liquidate and identical pnl values.
    pub async fn revalue(
        &self,
        ticker: &Ticker,
        new_price: Price,
        now: Timestamp,
    ) -> Result<Vec<CloseResult>, LedgerError> {
        let ids: Vec<PositionId> = {
            let index = self.open_by_ticker.read().await;
            match index.get(ticker) {
                Some(set) => set.iter().copied().collect(),
                None => return Ok(Vec::new()),
            }
        };

        let funding_rate = self.config.funding.effective_rate();
        let mut liquidated = Vec::new();

        for id in ids {
            let Some(entry) = self.entry(id).await else {
                continue;
            };
            let mut position = entry.lock().await;
            if !position.is_open() {
                // closed by a concurrent caller between snapshot and lock
                continue;
            }

            position.accrue_funding(funding_rate, now);
            position.revalue(new_price);

            match position.decide_liquidation(new_price) {
                LiquidationVerdict::Keep => {
                    debug!(id = %id, mark = %new_price, pnl = %position.unrealized_pnl, "revalued");
                }
                LiquidationVerdict::ForceClose { close_price, realized_pnl } => {
                    position.apply_close(close_price, realized_pnl, CloseReason::Liquidation, now);
                    self.store.upsert_position(&position)?;
                    let snapshot = position.clone();
                    warn!(
                        id = %id,
                        user = snapshot.user_id.0,
                        mark = %close_price,
                        liq = %snapshot.liquidation_price,
                        "position liquidated"
                    );
                    liquidated.push(CloseResult {
                        settlement_amount: snapshot.settlement_amount(),
                        realized_pnl,
                        was_liquidated: true,
                        position: snapshot,
                    });
                }
            }
        }

        for result in &liquidated {
            self.remove_from_open_index(ticker, result.position.id).await;
        }

        Ok(liquidated)
    }

    // 9.4: the settlement coordinator's only write path. touches nothing but
    // the settlement record.
    pub async fn mark_settled(&self, id: PositionId, reference: &str, now: Timestamp) -> Result<(), LedgerError> {
        let entry = self.entry(id).await.ok_or(LedgerError::NotFound(id))?;
        let mut position = entry.lock().await;
        position.settlement.mark_settled(reference.to_string(), now);
        self.store.mark_settled(id, reference, now)?;
        debug!(id = %id, reference, "settlement recorded");
        Ok(())
    }

    pub async fn is_settled(&self, id: PositionId) -> Option<bool> {
        let entry = self.entry(id).await?;
        let position = entry.lock().await;
        Some(position.settlement.settled)
    }

    // startup path: re-insert positions loaded from the store. recovered rows
    // keep their persisted state untouched.
    pub async fn insert_recovered(&self, position: Position) {
        if position.is_open() {
            self.open_by_ticker
                .write()
                .await
                .entry(position.ticker.clone())
                .or_default()
                .insert(position.id);
        }
        self.positions
            .write()
            .await
            .insert(position.id, Arc::new(Mutex::new(position)));
    }

    pub async fn snapshot(&self, id: PositionId) -> Option<Position> {
        let entry = self.entry(id).await?;
        let position = entry.lock().await;
        Some(position.clone())
    }

    pub async fn user_positions(&self, user_id: UserId) -> Vec<Position> {
        let entries: Vec<Arc<Mutex<Position>>> =
            self.positions.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for entry in entries {
            let position = entry.lock().await;
            if position.user_id == user_id {
                out.push(position.clone());
            }
        }
        out
    }

    pub async fn unsettled_ids(&self) -> Vec<PositionId> {
        let entries: Vec<(PositionId, Arc<Mutex<Position>>)> = self
            .positions
            .read()
            .await
            .iter()
            .map(|(id, e)| (*id, e.clone()))
            .collect();
        let mut out = Vec::new();
        for (id, entry) in entries {
            if !entry.lock().await.settlement.settled {
                out.push(id);
            }
        }
        out
    }

    pub async fn open_count(&self) -> usize {
        self.open_by_ticker.read().await.values().map(|s| s.len()).sum()
    }

    pub async fn total_count(&self) -> usize {
        self.positions.read().await.len()
    }

    async fn entry(&self, id: PositionId) -> Option<Arc<Mutex<Position>>> {
        self.positions.read().await.get(&id).cloned()
    }

    async fn remove_from_open_index(&self, ticker: &Ticker, id: PositionId) {
        let mut index = self.open_by_ticker.write().await;
        if let Some(set) = index.get_mut(ticker) {
            set.remove(&id);
            if set.is_empty() {
                index.remove(ticker);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use rust_decimal_macros::dec;

    async fn test_ledger() -> (PositionLedger, Arc<InMemoryStore>) {
        let registry = Arc::new(PriceRegistry::new());
        registry
            .set(Ticker::new("ACME"), Price::new_unchecked(dec!(100)))
            .await;
        let store = Arc::new(InMemoryStore::new());
        let ledger = PositionLedger::new(registry, store.clone(), EngineConfig::default());
        (ledger, store)
    }

    fn t(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[tokio::test]
    async fn open_computes_size_and_persists() {
        let (ledger, store) = test_ledger().await;

        let pos = ledger
            .open(UserId(1), Ticker::new("ACME"), Side::Long, Quote::new(dec!(1000)), 5, t(0))
            .await
            .unwrap();

        assert_eq!(pos.size.value(), dec!(5000));
        assert_eq!(pos.entry_price.value(), dec!(100));
        assert_eq!(pos.liquidation_price.value(), dec!(80));
        assert_eq!(ledger.open_count().await, 1);
        assert!(store.get(pos.id).is_some());
    }

    #[tokio::test]
    async fn open_rejects_bad_inputs() {
        let (ledger, _) = test_ledger().await;

        let r = ledger
            .open(UserId(1), Ticker::new("ACME"), Side::Long, Quote::zero(), 5, t(0))
            .await;
        assert!(matches!(r, Err(LedgerError::InvalidMargin(_))));

        let r = ledger
            .open(UserId(1), Ticker::new("ACME"), Side::Long, Quote::new(dec!(100)), 101, t(0))
            .await;
        assert!(matches!(r, Err(LedgerError::InvalidLeverage { .. })));

        let r = ledger
            .open(UserId(1), Ticker::new("NOPE"), Side::Long, Quote::new(dec!(100)), 5, t(0))
            .await;
        assert!(matches!(r, Err(LedgerError::UnknownTicker(_))));

        assert_eq!(ledger.total_count().await, 0);
    }

    #[tokio::test]
    async fn close_realizes_pnl_at_mark() {
        let (ledger, _) = test_ledger().await;
        let pos = ledger
            .open(UserId(1), Ticker::new("ACME"), Side::Long, Quote::new(dec!(1000)), 5, t(0))
            .await
            .unwrap();

        ledger
            .revalue(&Ticker::new("ACME"), Price::new_unchecked(dec!(110)), t(1000))
            .await
            .unwrap();

        let result = ledger.close(pos.id, t(2000)).await.unwrap();
        assert_eq!(result.realized_pnl.value(), dec!(500));
        assert_eq!(result.settlement_amount.value(), dec!(1500));
        assert!(!result.was_liquidated);
        assert_eq!(ledger.open_count().await, 0);
        // audit record retained
        assert_eq!(ledger.total_count().await, 1);
    }

    #[tokio::test]
    async fn double_close_rejected() {
        let (ledger, _) = test_ledger().await;
        let pos = ledger
            .open(UserId(1), Ticker::new("ACME"), Side::Long, Quote::new(dec!(1000)), 5, t(0))
            .await
            .unwrap();

        ledger.close(pos.id, t(1)).await.unwrap();
        let second = ledger.close(pos.id, t(2)).await;
        assert!(matches!(second, Err(LedgerError::AlreadyClosed(_))));

        let unknown = ledger.close(PositionId::generate(), t(3)).await;
        assert!(matches!(unknown, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn revalue_liquidates_crossed_positions() {
        let (ledger, _) = test_ledger().await;
        let pos = ledger
            .open(UserId(1), Ticker::new("ACME"), Side::Long, Quote::new(dec!(1000)), 5, t(0))
            .await
            .unwrap();

        let liquidated = ledger
            .revalue(&Ticker::new("ACME"), Price::new_unchecked(dec!(79)), t(1000))
            .await
            .unwrap();

        assert_eq!(liquidated.len(), 1);
        assert_eq!(liquidated[0].position.id, pos.id);
        assert!(liquidated[0].was_liquidated);
        // loss floored at posted margin → settlement amount 0
        assert_eq!(liquidated[0].realized_pnl.value(), dec!(-1000));
        assert_eq!(liquidated[0].settlement_amount.value(), dec!(0));
    }

    #[tokio::test]
    async fn revalue_is_idempotent_at_fixed_price() {
        let (ledger, _) = test_ledger().await;
        ledger
            .open(UserId(1), Ticker::new("ACME"), Side::Long, Quote::new(dec!(1000)), 5, t(0))
            .await
            .unwrap();
        ledger
            .open(UserId(2), Ticker::new("ACME"), Side::Short, Quote::new(dec!(500)), 2, t(0))
            .await
            .unwrap();

        let first = ledger
            .revalue(&Ticker::new("ACME"), Price::new_unchecked(dec!(90)), t(1000))
            .await
            .unwrap();
        let pnls_first: Vec<_> = {
            let mut v = Vec::new();
            for p in ledger.user_positions(UserId(1)).await {
                v.push(p.unrealized_pnl);
            }
            v
        };

        let second = ledger
            .revalue(&Ticker::new("ACME"), Price::new_unchecked(dec!(90)), t(1000))
            .await
            .unwrap();
        let pnls_second: Vec<_> = {
            let mut v = Vec::new();
            for p in ledger.user_positions(UserId(1)).await {
                v.push(p.unrealized_pnl);
            }
            v
        };

        assert!(first.is_empty());
        assert!(second.is_empty());
        assert_eq!(pnls_first, pnls_second);
    }

    #[tokio::test]
    async fn mark_settled_touches_only_the_record() {
        let (ledger, store) = test_ledger().await;
        let pos = ledger
            .open(UserId(1), Ticker::new("ACME"), Side::Long, Quote::new(dec!(1000)), 5, t(0))
            .await
            .unwrap();

        assert_eq!(ledger.unsettled_ids().await, vec![pos.id]);

        ledger.mark_settled(pos.id, "0xref", t(100)).await.unwrap();
        assert!(ledger.unsettled_ids().await.is_empty());
        assert_eq!(ledger.is_settled(pos.id).await, Some(true));

        let snapshot = ledger.snapshot(pos.id).await.unwrap();
        assert_eq!(snapshot.entry_price.value(), dec!(100));
        assert!(snapshot.is_open());
        assert!(store.get(pos.id).unwrap().settlement.settled);
    }

    #[tokio::test]
    async fn recovered_positions_rejoin_working_set() {
        let (ledger, store) = test_ledger().await;
        let pos = ledger
            .open(UserId(1), Ticker::new("ACME"), Side::Long, Quote::new(dec!(1000)), 5, t(0))
            .await
            .unwrap();

        // a fresh ledger backed by the same store
        let registry = Arc::new(PriceRegistry::new());
        registry
            .set(Ticker::new("ACME"), Price::new_unchecked(dec!(100)))
            .await;
        let fresh = PositionLedger::new(registry, store.clone(), EngineConfig::default());
        for row in store.load_open_positions().unwrap() {
            fresh.insert_recovered(row).await;
        }

        assert_eq!(fresh.open_count().await, 1);
        assert_eq!(fresh.unsettled_ids().await, vec![pos.id]);
    }
}
