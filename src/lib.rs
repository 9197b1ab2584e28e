// perp-engine: leveraged perpetual-position engine with settlement reconciliation.
// ledger-first architecture: the in-process position ledger is the economic
// truth; external settlement is eventually consistent behind it.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: PositionId, UserId, Ticker, Side, Price, Quote, Leverage
//   2.x  calc.rs: pure margin/liquidation math, pnl, settlement floors
//   3.x  position.rs: position entity, settlement record, liquidation verdict
//   4.x  funding.rs: hourly funding accrual params
//   5.x  registry.rs: mark price per ticker, price update input type
//   6.x  store.rs: persistence seam (mocked in-memory)
//   7.x  events.rs: broadcast payloads + fire-and-forget publish seam
//   8.x  config.rs: settlement mode, batch timing, leverage bounds
//   9.x  ledger.rs: position ledger: open/close/revalue, per-id locking
//   10.x executor.rs: settlement executor: one external call per action
//   11.x settlement.rs: settlement coordinator: 3-mode state machine, batch timer
//   12.x revaluation.rs: price batch processing, liquidation fan-out
//   13.x engine/: service façade: open/close API, recovery, stats, shutdown

// core position modules
pub mod calc;
pub mod funding;
pub mod ledger;
pub mod position;
pub mod registry;
pub mod types;

// settlement modules
pub mod executor;
pub mod revaluation;
pub mod settlement;

// integration modules
pub mod config;
pub mod engine;
pub mod events;
pub mod store;

// re exports for convenience
pub use calc::*;
pub use config::{EngineConfig, SettlementMode};
pub use engine::{
    CloseOutcome, EngineError, OpenOutcome, PerpEngine, PositionView, RecoveryReport, UserSummary,
};
pub use events::{
    Broadcaster, EventPayload, MemoryBroadcaster, NullBroadcaster, POSITIONS_CHANNEL,
    PRICES_CHANNEL, SETTLEMENT_CHANNEL,
};
pub use executor::{MockChainClient, SettleError, SettleOutcome, SettlementExecutor, SettlementTarget};
pub use funding::FundingParams;
pub use ledger::{CloseResult, LedgerError, PositionLedger};
pub use position::{CloseReason, LiquidationVerdict, Position, SettleAction, SettlementRecord};
pub use registry::{PriceRegistry, PriceSource, PriceUpdate};
pub use revaluation::{RevaluationProcessor, RevaluationReport};
pub use settlement::{DrainReport, SettlementCoordinator, SettlementStats};
pub use store::{InMemoryStore, PositionStore, StoreError};
pub use types::*;
