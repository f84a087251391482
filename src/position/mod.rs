// =============================================================================
// Position Module
// =============================================================================
//
// `store` owns the position table; `executor` turns decisions into live
// positions via an `ExchangePort` and monitors them to close.

pub mod executor;
pub mod store;

pub use executor::{OpenOutcome, PositionExecutor};
pub use store::{Position, PositionStatus, PositionStore};
