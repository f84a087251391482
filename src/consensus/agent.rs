// =============================================================================
// AgentPort — the pluggable per-agent signal-producer seam
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EngineError;
use crate::types::{MarketSnapshot, Signal};

/// The five concrete strategies named in the agent zoo. Strategy parameters
/// are data, not code — each variant is a distinct implementation of
/// [`AgentPort`] in `strategies.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStrategy {
    Scalping,
    TrendFollowing,
    MeanReversion,
    Momentum,
    Breakout,
}

impl std::fmt::Display for AgentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalping => write!(f, "scalping"),
            Self::TrendFollowing => write!(f, "trend_following"),
            Self::MeanReversion => write!(f, "mean_reversion"),
            Self::Momentum => write!(f, "momentum"),
            Self::Breakout => write!(f, "breakout"),
        }
    }
}

/// One agent's vote for a single round. Produced per round, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentVote {
    pub agent_id: String,
    pub signal: Signal,
    pub confidence: f64,
    pub weight: f64,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicators: Option<Value>,
}

impl AgentVote {
    pub fn weighted_confidence(&self) -> f64 {
        self.confidence * self.weight
    }
}

/// A pluggable signal producer. `analyze` must never panic; recoverable
/// failures should be returned as `Err(EngineError::AgentFailure)` so the
/// consensus round can skip the vote without aborting.
#[async_trait]
pub trait AgentPort: Send + Sync {
    fn agent_id(&self) -> &str;

    fn strategy(&self) -> AgentStrategy;

    async fn analyze(&self, snapshot: &MarketSnapshot) -> Result<AgentVote, EngineError>;
}
