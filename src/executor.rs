// 10.0: settlement executor. wraps exactly one external call per position
// action and reports the outcome as a value. transport failures, contract
// rejection and timeouts all come back as SettleOutcome::failed so the
// coordinator can keep draining the rest of a batch.

use crate::position::{Position, SettleAction};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error};

#[derive(Debug, Clone, Error)]
pub enum SettleError {
    #[error("settlement transport failure: {0}")]
    Transport(String),

    #[error("settlement target rejected the call: {0}")]
    Rejected(String),

    #[error("settlement call timed out after {0:?}")]
    Timeout(Duration),
}

// the blockchain contract client, seen from the core. submit returns an opaque
// transaction reference on success.
#[async_trait]
pub trait SettlementTarget: Send + Sync {
    async fn submit(&self, action: SettleAction, position: &Position) -> Result<String, SettleError>;
}

#[derive(Debug, Clone)]
pub struct SettleOutcome {
    pub success: bool,
    pub reference: Option<String>,
    pub error: Option<SettleError>,
}

impl SettleOutcome {
    pub fn succeeded(reference: String) -> Self {
        Self {
            success: true,
            reference: Some(reference),
            error: None,
        }
    }

    pub fn failed(error: SettleError) -> Self {
        Self {
            success: false,
            reference: None,
            error: Some(error),
        }
    }
}

// stateless per call: one submit, one timeout, one outcome.
pub struct SettlementExecutor {
    target: Arc<dyn SettlementTarget>,
    timeout: Duration,
}

impl SettlementExecutor {
    pub fn new(target: Arc<dyn SettlementTarget>, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    pub async fn settle(&self, action: SettleAction, position: &Position) -> SettleOutcome {
        let call = self.target.submit(action, position);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(reference)) => {
                debug!(id = %position.id, ?action, %reference, "settlement submitted");
                SettleOutcome::succeeded(reference)
            }
            Ok(Err(err)) => {
                error!(id = %position.id, ?action, %err, "settlement failed");
                SettleOutcome::failed(err)
            }
            Err(_) => {
                error!(id = %position.id, ?action, timeout = ?self.timeout, "settlement timed out");
                SettleOutcome::failed(SettleError::Timeout(self.timeout))
            }
        }
    }
}

// 10.1: scriptable chain client for tests and the simulation binary.
// fails the next N submissions when told to, and can inject latency.
#[derive(Debug, Default)]
pub struct MockChainClient {
    sequence: AtomicU64,
    fail_next: Mutex<u64>,
    latency: Mutex<Option<Duration>>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_next(&self, count: u64) {
        *self.fail_next.lock().await = count;
    }

    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.lock().await = Some(latency);
    }

    pub fn submissions(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementTarget for MockChainClient {
    async fn submit(&self, action: SettleAction, position: &Position) -> Result<String, SettleError> {
        let latency = *self.latency.lock().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        {
            let mut fail = self.fail_next.lock().await;
            if *fail > 0 {
                *fail -= 1;
                return Err(SettleError::Transport("injected failure".to_string()));
            }
        }

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let verb = match action {
            SettleAction::Open => "open",
            SettleAction::Close => "close",
        };
        Ok(format!("0x{seq:08x}-{verb}-{}", position.id))
    }
}
