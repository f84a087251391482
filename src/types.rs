// =============================================================================
// Shared types used across the Aurora Cascade engine
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// Engine run-state: actively trading, paused, or killed.
///
/// Distinct from [`AccountMode`], which is the fund-reality axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineMode {
    Running,
    Paused,
    Killed,
}

impl Default for EngineMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Whether orders are simulated (PAPER) or sent to a live venue (LIVE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Paper,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "Paper"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Position / vote direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// A single agent's vote signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Immutable window of recent market data for one symbol.
///
/// Every field must carry at least 30 samples for the snapshot to be
/// considered valid by consumers (`MarketSnapshot::is_valid`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub closes: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub volumes: Vec<f64>,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    pub const MIN_SAMPLES: usize = 30;

    pub fn is_valid(&self) -> bool {
        self.closes.len() >= Self::MIN_SAMPLES
            && self.highs.len() >= Self::MIN_SAMPLES
            && self.lows.len() >= Self::MIN_SAMPLES
            && self.volumes.len() >= Self::MIN_SAMPLES
    }

    pub fn last_close(&self) -> Option<f64> {
        self.closes.last().copied()
    }
}

/// Reason a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    Manual,
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TakeProfit => write!(f, "TAKE_PROFIT"),
            Self::StopLoss => write!(f, "STOP_LOSS"),
            Self::Manual => write!(f, "MANUAL"),
            Self::Shutdown => write!(f, "SHUTDOWN"),
        }
    }
}

/// Net-profit breakdown produced by [`crate::fee_model::FeeModel::net_profit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetProfitBreakdown {
    pub gross_pct: f64,
    pub gross_usd: Decimal,
    pub entry_fee: Decimal,
    pub exit_fee: Decimal,
    pub total_fees: Decimal,
    pub net_usd: Decimal,
    pub net_pct: f64,
    pub profitable: bool,
}

/// The routing action a settlement triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RoutingOutcome {
    None,
    Slot { slot_id: String, amount: Decimal },
    Treasury { amount: Decimal },
}
