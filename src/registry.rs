// 5.0: price registry. the single authoritative mark price per ticker.
// leaf dependency: the ledger reads it at open time, the revaluation processor
// writes it on every accepted update.

use crate::types::{Price, Ticker};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

// where a price change came from. tags are carried through to broadcasts but
// never change processing logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    UserTrade,
    Simulated,
    External,
}

// 5.1: ephemeral input to the revaluation processor. price is a raw Decimal on
// purpose: validation (finite, positive) happens at the processor boundary so a
// bad tick can be dropped with a log line instead of a panic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub ticker: Ticker,
    pub price: Decimal,
    pub source: PriceSource,
    pub reason: Option<String>,
}

impl PriceUpdate {
    pub fn new(ticker: Ticker, price: Decimal, source: PriceSource) -> Self {
        Self {
            ticker,
            price,
            source,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct PriceRegistry {
    prices: RwLock<HashMap<Ticker, Price>>,
}

impl PriceRegistry {
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set(&self, ticker: Ticker, price: Price) {
        self.prices.write().await.insert(ticker, price);
    }

    pub async fn get(&self, ticker: &Ticker) -> Option<Price> {
        self.prices.read().await.get(ticker).copied()
    }

    pub async fn tickers(&self) -> Vec<Ticker> {
        self.prices.read().await.keys().cloned().collect()
    }
}
