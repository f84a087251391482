// =============================================================================
// Engine error taxonomy
// =============================================================================
//
// Typed errors for conditions that represent genuine faults (network,
// persistence, invariant violation). Business-logic refusals — no
// consensus, insufficient slot, low confidence — are NOT represented here;
// they are plain `Ok` variants of the relevant domain result enum
// (`ConsensusResult::NoConsensus`, `OpenOutcome::NoAvailableSlot`, ...).

use thiserror::Error;

/// A fault surfaced by one of the core subsystems.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("agent '{agent_id}' failed to produce a vote: {reason}")]
    AgentFailure { agent_id: String, reason: String },

    #[error("order rejected on open for {symbol}: {reason}")]
    OrderRejectedOnOpen { symbol: String, reason: String },

    #[error("order rejected on close for position {position_id}: {reason}")]
    OrderRejectedOnClose {
        position_id: String,
        reason: String,
    },

    #[error("no slot found with id '{slot_id}'")]
    MissingSlot { slot_id: String },

    #[error("persistence failure while writing {what}: {reason}")]
    PersistenceFailure { what: String, reason: String },

    #[error("exchange call timed out after {timeout_secs}s")]
    ExchangeTimeout { timeout_secs: u64 },

    #[error("exchange transport error: {0}")]
    ExchangeTransport(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
