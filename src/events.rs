// 7.0: broadcast payloads. every externally interesting state change has a
// payload here; the Broadcaster trait is the fire-and-forget seam to whatever
// pushes them at subscribers. the engine never awaits delivery.

use crate::position::CloseReason;
use crate::registry::PriceSource;
use crate::types::{PositionId, Price, Quote, Side, Ticker, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const PRICES_CHANNEL: &str = "prices";
pub const POSITIONS_CHANNEL: &str = "positions";
pub const SETTLEMENT_CHANNEL: &str = "settlement";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    PriceChanged(PriceChangedEvent),
    PositionOpened(PositionOpenedEvent),
    PositionClosed(PositionClosedEvent),
    PositionLiquidated(PositionLiquidatedEvent),
    PositionSettled(PositionSettledEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChangedEvent {
    pub ticker: Ticker,
    pub price: Decimal,
    pub source: PriceSource,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    pub position_id: PositionId,
    pub user_id: UserId,
    pub ticker: Ticker,
    pub side: Side,
    pub size: Quote,
    pub entry_price: Price,
    pub leverage: u32,
    pub liquidation_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub position_id: PositionId,
    pub user_id: UserId,
    pub ticker: Ticker,
    pub close_price: Price,
    pub realized_pnl: Quote,
    pub settlement_amount: Quote,
    pub reason: CloseReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    pub position_id: PositionId,
    pub user_id: UserId,
    pub ticker: Ticker,
    pub liquidation_price: Price,
    pub mark_price: Price,
    pub margin_lost: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSettledEvent {
    pub position_id: PositionId,
    pub reference: String,
}

// 7.1: push seam. implementations must not block the caller; a slow or failing
// transport is invisible to the engine.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, channel: &str, payload: &EventPayload);
}

// drops everything. default for headless use.
#[derive(Debug, Default)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn publish(&self, _channel: &str, _payload: &EventPayload) {}
}

// collects published events for test assertions.
#[derive(Debug, Default)]
pub struct MemoryBroadcaster {
    published: std::sync::Mutex<Vec<(String, EventPayload)>>,
}

impl MemoryBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, EventPayload)> {
        self.published.lock().unwrap().clone()
    }

    pub fn on_channel(&self, channel: &str) -> Vec<EventPayload> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

impl Broadcaster for MemoryBroadcaster {
    fn publish(&self, channel: &str, payload: &EventPayload) {
        self.published
            .lock()
            .unwrap()
            .push((channel.to_string(), payload.clone()));
    }
}
