// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub. Every tunable parameter lives here so the
// engine can be reconfigured without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consensus::AgentStrategy;
use crate::types::{AccountMode, EngineMode};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_venues() -> HashMap<String, VenueConfig> {
    let mut venues = HashMap::new();
    venues.insert(
        "binance".to_string(),
        VenueConfig { taker_fee: 0.001, maker_fee: 0.001 },
    );
    venues
}

fn default_agents() -> Vec<AgentConfig> {
    vec![
        AgentConfig {
            id: "trend_primary".to_string(),
            group: "primary".to_string(),
            weight: 1.0,
            strategy: AgentStrategy::TrendFollowing,
        },
        AgentConfig {
            id: "momentum_primary".to_string(),
            group: "primary".to_string(),
            weight: 1.0,
            strategy: AgentStrategy::Momentum,
        },
        AgentConfig {
            id: "scalping_orchestrator".to_string(),
            group: "orchestrator".to_string(),
            weight: 1.5,
            strategy: AgentStrategy::Scalping,
        },
        AgentConfig {
            id: "mean_reversion_hot_backup".to_string(),
            group: "hot_backup".to_string(),
            weight: 0.8,
            strategy: AgentStrategy::MeanReversion,
        },
        AgentConfig {
            id: "breakout_warm_backup".to_string(),
            group: "warm_backup".to_string(),
            weight: 0.6,
            strategy: AgentStrategy::Breakout,
        },
    ]
}

fn default_initial_capital_usd() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_valor_base() -> Decimal {
    Decimal::new(1_000, 0)
}

fn default_slot_count() -> usize {
    10
}

fn default_max_risk_per_trade_pct() -> f64 {
    10.0
}

fn default_max_exposure_pct() -> f64 {
    50.0
}

fn default_max_concurrent_positions() -> u32 {
    3
}

fn default_min_confidence() -> f64 {
    0.70
}

fn default_consensus_threshold() -> f64 {
    0.65
}

fn default_min_agents_voting() -> usize {
    2
}

fn default_scan_interval_secs() -> u64 {
    30
}

fn default_safety_buffer_pct() -> f64 {
    0.001
}

fn default_min_free_capital_usd() -> Decimal {
    Decimal::ONE
}

fn default_max_loss_pct() -> f64 {
    3.0
}

fn default_max_daily_loss_pct() -> f64 {
    0.03
}

fn default_max_consecutive_losses() -> u32 {
    5
}

fn default_max_drawdown_pct() -> f64 {
    0.05
}

fn default_max_daily_trades() -> u32 {
    50
}

// =============================================================================
// VenueConfig / AgentConfig
// =============================================================================

/// Per-venue taker/maker fee rates, the sole source configuration feeds
/// into `FeeModel`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VenueConfig {
    pub taker_fee: f64,
    pub maker_fee: f64,
}

/// One entry in the agent registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub group: String,
    pub weight: f64,
    pub strategy: AgentStrategy,
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Operational modes ---------------------------------------------------
    /// Current engine run-state: Running, Paused, or Killed.
    #[serde(default)]
    pub engine_mode: EngineMode,

    /// Whether orders are simulated (Paper) or sent to a live venue (Live).
    #[serde(default)]
    pub account_mode: AccountMode,

    // --- Symbols & venues -----------------------------------------------------
    /// Symbols the engine is watching and trading.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Per-venue fee configuration, the sole input to `FeeModel`.
    #[serde(default = "default_venues")]
    pub venues: HashMap<String, VenueConfig>,

    /// The agent registry consumed at boot to build the consensus zoo.
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentConfig>,

    // --- Capital & cascade ------------------------------------------------
    #[serde(default = "default_initial_capital_usd")]
    pub initial_capital_usd: Decimal,

    #[serde(default = "default_valor_base")]
    pub valor_base: Decimal,

    #[serde(default = "default_slot_count")]
    pub slot_count: usize,

    // --- Risk & sizing ------------------------------------------------------
    #[serde(default = "default_max_risk_per_trade_pct")]
    pub max_risk_per_trade_pct: f64,

    #[serde(default = "default_max_exposure_pct")]
    pub max_exposure_pct: f64,

    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,

    #[serde(default = "default_min_free_capital_usd")]
    pub min_free_capital_usd: Decimal,

    // --- Consensus ------------------------------------------------------------
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,

    #[serde(default = "default_min_agents_voting")]
    pub min_agents_voting: usize,

    // --- Fees -----------------------------------------------------------------
    #[serde(default = "default_safety_buffer_pct")]
    pub safety_buffer_pct: f64,

    /// Max stop-loss distance from entry before fee inflation, as a
    /// percentage (passed straight to `FeeModel::stop_loss`).
    #[serde(default = "default_max_loss_pct")]
    pub max_loss_pct: f64,

    // --- Independent risk circuit breakers (risk.rs) -------------------------
    /// Fraction of starting capital, e.g. 0.03 for 3%.
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,

    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,

    /// Fraction, e.g. 0.05 for 5%.
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,

    // --- Orchestrator loop ------------------------------------------------
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine_mode: EngineMode::Paused,
            account_mode: AccountMode::Paper,
            symbols: default_symbols(),
            venues: default_venues(),
            agents: default_agents(),
            initial_capital_usd: default_initial_capital_usd(),
            valor_base: default_valor_base(),
            slot_count: default_slot_count(),
            max_risk_per_trade_pct: default_max_risk_per_trade_pct(),
            max_exposure_pct: default_max_exposure_pct(),
            max_concurrent_positions: default_max_concurrent_positions(),
            min_free_capital_usd: default_min_free_capital_usd(),
            min_confidence: default_min_confidence(),
            consensus_threshold: default_consensus_threshold(),
            min_agents_voting: default_min_agents_voting(),
            safety_buffer_pct: default_safety_buffer_pct(),
            max_loss_pct: default_max_loss_pct(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_consecutive_losses: default_max_consecutive_losses(),
            max_drawdown_pct: default_max_drawdown_pct(),
            max_daily_trades: default_max_daily_trades(),
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            engine_mode = %config.engine_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Validate the configuration is internally consistent; called before
    /// the engine accepts it at boot. A configuration error is an exit-code-1
    /// condition.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            anyhow::bail!("runtime config: symbols must not be empty");
        }
        if self.agents.is_empty() {
            warn!("runtime config: agent registry is empty, consensus will always be NO_CONSENSUS");
        }
        if self.min_agents_voting == 0 {
            anyhow::bail!("runtime config: min_agents_voting must be >= 1");
        }
        if self.consensus_threshold <= 0.0 || self.consensus_threshold > 1.0 {
            anyhow::bail!("runtime config: consensus_threshold must be in (0, 1]");
        }
        if self.slot_count == 0 {
            anyhow::bail!("runtime config: slot_count must be >= 1");
        }
        if self.valor_base <= Decimal::ZERO {
            anyhow::bail!("runtime config: valor_base must be positive");
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.engine_mode, EngineMode::Paused);
        assert_eq!(cfg.account_mode, AccountMode::Paper);
        assert_eq!(cfg.symbols.len(), 5);
        assert_eq!(cfg.symbols[0], "BTCUSDT");
        assert_eq!(cfg.max_concurrent_positions, 3);
        assert_eq!(cfg.slot_count, 10);
        assert_eq!(cfg.agents.len(), 5);
        assert!(cfg.venues.contains_key("binance"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.engine_mode, EngineMode::Paused);
        assert_eq!(cfg.account_mode, AccountMode::Paper);
        assert_eq!(cfg.min_agents_voting, 2);
        assert!((cfg.consensus_threshold - 0.65).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "engine_mode": "Running", "symbols": ["ETHUSDT"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.engine_mode, EngineMode::Running);
        assert_eq!(cfg.symbols, vec!["ETHUSDT"]);
        assert_eq!(cfg.max_concurrent_positions, 3);
        assert_eq!(cfg.agents.len(), 5);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.valor_base, cfg2.valor_base);
        assert_eq!(cfg.engine_mode, cfg2.engine_mode);
    }

    #[test]
    fn validate_rejects_empty_symbols() {
        let mut cfg = RuntimeConfig::default();
        cfg.symbols.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_consensus_threshold() {
        let mut cfg = RuntimeConfig::default();
        cfg.consensus_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }
}
