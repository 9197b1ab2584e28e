//! Open and close operations exposed to the API shell.

use super::core::PerpEngine;
use super::results::{CloseOutcome, EngineError, OpenOutcome, PositionView};
use crate::events::{
    EventPayload, PositionClosedEvent, PositionOpenedEvent, POSITIONS_CHANNEL,
};
use crate::types::{PositionId, Quote, Side, Ticker, Timestamp, UserId};

impl PerpEngine {
    /// Open a leveraged position at the current mark price. The ledger commit
    /// is definitive; settlement status rides along in the outcome.
    pub async fn open_position(
        &self,
        user_id: UserId,
        ticker: Ticker,
        side: Side,
        margin: Quote,
        leverage: u32,
        now: Timestamp,
    ) -> Result<OpenOutcome, EngineError> {
        let position = self
            .ledger
            .open(user_id, ticker, side, margin, leverage, now)
            .await?;

        let outcome = self.coordinator.record_mutation(&position, now).await;

        self.broadcaster.publish(
            POSITIONS_CHANNEL,
            &EventPayload::PositionOpened(PositionOpenedEvent {
                position_id: position.id,
                user_id: position.user_id,
                ticker: position.ticker.clone(),
                side: position.side,
                size: position.size,
                entry_price: position.entry_price,
                leverage: position.leverage.get(),
                liquidation_price: position.liquidation_price,
            }),
        );

        // refresh so the view carries the final settlement state
        let view = match self.ledger.snapshot(position.id).await {
            Some(p) => PositionView::from(&p),
            None => PositionView::from(&position),
        };
        Ok(OpenOutcome {
            settled: view.settled,
            settlement_error: outcome.error.map(|e| e.to_string()),
            view,
        })
    }

    /// Close a position on behalf of its owner. Rejects unknown ids, closes by
    /// non-owners, and double closes; the realized result stands even when
    /// settlement fails.
    pub async fn close_position(
        &self,
        id: PositionId,
        caller: UserId,
        now: Timestamp,
    ) -> Result<CloseOutcome, EngineError> {
        let snapshot = self
            .ledger
            .snapshot(id)
            .await
            .ok_or(EngineError::NotFound(id))?;
        if snapshot.user_id != caller {
            return Err(EngineError::NotOwner { id, caller });
        }

        let result = self.ledger.close(id, now).await?;

        let outcome = self.coordinator.record_mutation(&result.position, now).await;

        self.broadcaster.publish(
            POSITIONS_CHANNEL,
            &EventPayload::PositionClosed(PositionClosedEvent {
                position_id: result.position.id,
                user_id: result.position.user_id,
                ticker: result.position.ticker.clone(),
                close_price: result.position.mark_price,
                realized_pnl: result.realized_pnl,
                settlement_amount: result.settlement_amount,
                reason: result
                    .position
                    .close_reason
                    .unwrap_or(crate::position::CloseReason::UserClosed),
            }),
        );

        let view = match self.ledger.snapshot(id).await {
            Some(p) => PositionView::from(&p),
            None => PositionView::from(&result.position),
        };
        Ok(CloseOutcome {
            settled: view.settled,
            settlement_error: outcome.error.map(|e| e.to_string()),
            view,
            realized_pnl: result.realized_pnl,
            settlement_amount: result.settlement_amount,
            was_liquidated: result.was_liquidated,
        })
    }
}
