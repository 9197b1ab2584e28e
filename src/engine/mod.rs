// 13.0 engine/: the service façade over ledger, registry, coordinator and
// processor. operations are split across files by concern.

mod core;
mod results;
mod trading;

pub use self::core::PerpEngine;
pub use results::{
    CloseOutcome, EngineError, OpenOutcome, PositionView, RecoveryReport, UserSummary,
};
