// =============================================================================
// Central Application State — Aurora Cascade Engine
// =============================================================================
//
// The single source of truth for the entire engine. All subsystems hold Arc
// references to their own state; AppState ties them together and provides a
// unified snapshot for the dashboard API and WebSocket feed.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
//   - Arc wrappers for subsystem engines that manage their own interior
//     mutability.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::cascade::SlotCascade;
use crate::consensus::strategies::{
    BreakoutAgent, MeanReversionAgent, MomentumAgent, ScalpingAgent, TrendFollowingAgent,
};
use crate::consensus::{AgentPort, AgentStrategy, ConsensusEngine, ConsensusResult};
use crate::fee_model::{FeeModel, VenueFees};
use crate::journal::Journal;
use crate::market_data::{CandleBuffer, OrderBookManager, TradeStreamProcessor};
use crate::orchestrator::TradingOrchestrator;
use crate::position::{Position, PositionExecutor, PositionStore};
use crate::ports::{ExchangePort, NotificationPort};
use crate::risk::{RiskEngine, RiskState};
use crate::runtime_config::{AgentConfig, RuntimeConfig};
use crate::treasury::{SettlementRecord, TreasuryRouter, TreasurySnapshot};
use crate::types::BalanceInfo;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    pub at: String,
}

// =============================================================================
// Agent zoo construction
// =============================================================================

/// Build one `AgentPort` per `AgentConfig` entry, grounded in the strategy
/// it names. Unknown combinations can't occur: `AgentStrategy` is an
/// exhaustive enum.
fn build_agent(cfg: &AgentConfig) -> Arc<dyn AgentPort> {
    match cfg.strategy {
        AgentStrategy::Scalping => Arc::new(ScalpingAgent::new(cfg.id.clone(), cfg.weight)),
        AgentStrategy::TrendFollowing => {
            Arc::new(TrendFollowingAgent::new(cfg.id.clone(), cfg.weight))
        }
        AgentStrategy::MeanReversion => {
            Arc::new(MeanReversionAgent::new(cfg.id.clone(), cfg.weight))
        }
        AgentStrategy::Momentum => Arc::new(MomentumAgent::new(cfg.id.clone(), cfg.weight)),
        AgentStrategy::Breakout => Arc::new(BreakoutAgent::new(cfg.id.clone(), cfg.weight)),
    }
}

fn build_fee_model(config: &RuntimeConfig) -> FeeModel {
    let venues: HashMap<String, VenueFees> = config
        .venues
        .iter()
        .map(|(venue, v)| {
            (
                venue.clone(),
                VenueFees {
                    maker: v.maker_fee,
                    taker: v.taker_fee,
                },
            )
        })
        .collect();
    FeeModel::new(venues, config.safety_buffer_pct)
}

// =============================================================================
// AppState
// =============================================================================

const MAX_RECENT_ERRORS: usize = 50;
const JOURNAL_PATH: &str = "cascade_journal.jsonl";

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    pub state_version: AtomicU64,
    pub ws_sequence_number: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Market Data (ambient, feeds the dashboard + orchestrator's
    //    MarketSnapshot construction) ─────────────────────────────────
    pub candle_buffer: Arc<CandleBuffer>,
    pub trade_processors: RwLock<HashMap<String, Arc<TradeStreamProcessor>>>,
    pub orderbook_manager: Arc<OrderBookManager>,

    // ── Independent risk circuit breakers ──────────────────────────────
    pub risk_engine: Arc<RiskEngine>,

    // ── Cascade / Treasury ──────────────────────────────────────────────
    pub router: Arc<TreasuryRouter>,
    pub journal: Arc<Journal>,

    // ── Consensus ───────────────────────────────────────────────────────
    pub consensus: Arc<ConsensusEngine>,

    // ── Positions / Execution ───────────────────────────────────────────
    pub position_store: Arc<PositionStore>,
    pub executor: Arc<PositionExecutor>,
    pub exchange: Arc<dyn ExchangePort>,

    // ── Orchestrator ────────────────────────────────────────────────────
    pub orchestrator: Arc<TradingOrchestrator>,

    // ── Account / Exchange ──────────────────────────────────────────────
    pub balances: RwLock<Vec<BalanceInfo>>,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Operational Status ──────────────────────────────────────────────
    pub no_go_reason: RwLock<Option<String>>,
    pub ws_user_connected: RwLock<bool>,
    pub last_ws_user_event: RwLock<std::time::Instant>,
    pub last_reconcile_ok: RwLock<Option<std::time::Instant>>,
    pub last_reconcile_error: RwLock<Option<String>>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct a new `AppState` from the given runtime configuration and
    /// the exchange/notification ports the caller wired up (Binance vs
    /// paper, logging vs webhook — decided by `main.rs` from env + config).
    pub fn new(
        config: RuntimeConfig,
        exchange: Arc<dyn ExchangePort>,
        notifier: Arc<dyn NotificationPort>,
    ) -> Self {
        let mut trade_processors = HashMap::new();
        for symbol in &config.symbols {
            trade_processors.insert(
                symbol.clone(),
                Arc::new(TradeStreamProcessor::new(symbol.clone())),
            );
        }

        let risk_engine = Arc::new(RiskEngine::new(
            config.initial_capital_usd.to_f64().unwrap_or(10_000.0),
            config.max_daily_loss_pct,
            config.max_consecutive_losses,
            config.max_drawdown_pct,
            config.max_daily_trades,
        ));

        let cascade = SlotCascade::bootstrap(config.slot_count, config.valor_base);
        let router = Arc::new(TreasuryRouter::new(cascade));

        let journal = Arc::new(Journal::new(JOURNAL_PATH));
        if let Err(e) = journal.replay_into(&router) {
            tracing::warn!(error = %e, "journal replay failed, starting from bootstrap capital only");
        }

        let agents: Vec<Arc<dyn AgentPort>> = config.agents.iter().map(build_agent).collect();
        let consensus = Arc::new(ConsensusEngine::new(
            agents,
            config.consensus_threshold,
            config.min_agents_voting,
        ));

        let fee_model = Arc::new(build_fee_model(&config));
        let position_store = Arc::new(PositionStore::new());

        let executor = Arc::new(PositionExecutor::new(
            position_store.clone(),
            router.clone(),
            fee_model,
            exchange.clone(),
            notifier,
            config.max_risk_per_trade_pct,
            config.max_loss_pct,
        ));

        let candle_buffer = Arc::new(CandleBuffer::new(500));

        let orchestrator = Arc::new(TradingOrchestrator::new(
            candle_buffer.clone(),
            consensus.clone(),
            executor.clone(),
            router.clone(),
            risk_engine.clone(),
            config.symbols.clone(),
            config.min_confidence,
            config.max_concurrent_positions,
            config.max_risk_per_trade_pct,
            config.min_free_capital_usd,
            Duration::from_secs(config.scan_interval_secs),
        ));

        Self {
            state_version: AtomicU64::new(1),
            ws_sequence_number: AtomicU64::new(0),

            runtime_config: Arc::new(RwLock::new(config)),

            candle_buffer,
            trade_processors: RwLock::new(trade_processors),
            orderbook_manager: Arc::new(OrderBookManager::new()),

            risk_engine,

            router,
            journal,

            consensus,

            position_store,
            executor,
            exchange,

            orchestrator,

            balances: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),

            no_go_reason: RwLock::new(None),
            ws_user_connected: RwLock::new(false),
            last_ws_user_event: RwLock::new(std::time::Instant::now()),
            last_reconcile_ok: RwLock::new(None),
            last_reconcile_error: RwLock::new(None),

            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    pub fn push_error(&self, msg: String) {
        self.push_error_with_code(msg, None);
    }

    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord {
            message: msg,
            code,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }

        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a complete, serialisable snapshot of the entire engine state.
    ///
    /// This is the payload sent to the dashboard via the REST
    /// `GET /api/v1/state` endpoint and the WebSocket push feed.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let now = Utc::now();
        let config = self.runtime_config.read();
        let version = self.current_state_version();

        let ws_user_event_age_ms = self.last_ws_user_event.read().elapsed().as_millis() as u64;
        let reconcile_last_ok_age_s = self.last_reconcile_ok.read().map(|t| t.elapsed().as_secs());

        let risk_state = self.risk_engine.get_state();

        let truth = TruthHeader {
            ws_mode: "combined".to_string(),
            ws_user_connected: *self.ws_user_connected.read(),
            last_ws_user_event_age_ms: ws_user_event_age_ms,
            reconcile_last_ok_age_s,
            reconcile_last_error: self.last_reconcile_error.read().clone(),
            no_go_reason: self.no_go_reason.read().clone(),
            state_version: version,
            ws_sequence_number: self.ws_sequence_number.load(Ordering::Relaxed),
            engine_mode: config.engine_mode.to_string(),
            account_mode: config.account_mode.to_string(),
            risk_mode: risk_state.risk_mode.clone(),
            server_time: now.timestamp_millis(),
        };

        let treasury = self.router.snapshot();
        let settlements = self.router.settlement_history(100);

        let open_positions = self.position_store.open_positions();
        let closed_positions = self.position_store.closed_positions(500);

        let recent_decisions = self.consensus.decision_history(100);

        let runtime_config_summary = RuntimeConfigSummary {
            engine_mode: config.engine_mode.to_string(),
            account_mode: config.account_mode.to_string(),
            symbols: config.symbols.clone(),
            max_concurrent_positions: config.max_concurrent_positions,
            max_risk_per_trade_pct: config.max_risk_per_trade_pct,
            consensus_threshold: config.consensus_threshold,
            min_agents_voting: config.min_agents_voting,
            agents: config.agents.clone(),
        };

        let balances = self.balances.read().clone();
        let recent_errors = self.recent_errors.read().clone();

        let journal_stats = if !closed_positions.is_empty() {
            let total_trades = closed_positions.len();
            let wins = closed_positions
                .iter()
                .filter(|p| p.net_profit.as_ref().map(|n| n.profitable).unwrap_or(false))
                .count();
            let win_rate = wins as f64 / total_trades as f64;
            let total_net_pnl: rust_decimal::Decimal = closed_positions
                .iter()
                .filter_map(|p| p.net_profit.as_ref().map(|n| n.net_usd))
                .sum();
            let gross_profit: rust_decimal::Decimal = closed_positions
                .iter()
                .filter_map(|p| p.net_profit.as_ref().map(|n| n.net_usd))
                .filter(|pnl| *pnl > rust_decimal::Decimal::ZERO)
                .sum();
            let gross_loss: rust_decimal::Decimal = closed_positions
                .iter()
                .filter_map(|p| p.net_profit.as_ref().map(|n| n.net_usd))
                .filter(|pnl| *pnl < rust_decimal::Decimal::ZERO)
                .map(|pnl| -pnl)
                .sum();
            let profit_factor = if gross_loss > rust_decimal::Decimal::ZERO {
                (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
            } else if gross_profit > rust_decimal::Decimal::ZERO {
                f64::INFINITY
            } else {
                0.0
            };

            Some(JournalStats {
                total_trades,
                win_rate,
                total_net_pnl,
                profit_factor,
            })
        } else {
            None
        };

        let last_heartbeat_age_s = Some(ws_user_event_age_ms / 1000);

        StateSnapshot {
            state_version: version,
            server_time: now.timestamp_millis(),
            truth,
            treasury,
            settlements,
            open_positions,
            recent_decisions,
            risk: risk_state,
            runtime_config: runtime_config_summary,
            balances,
            recent_errors,
            journal_stats,
            last_heartbeat_age_s,
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub truth: TruthHeader,
    pub treasury: TreasurySnapshot,
    pub settlements: Vec<SettlementRecord>,
    pub open_positions: Vec<Position>,
    pub recent_decisions: Vec<ConsensusResult>,
    pub risk: RiskState,
    pub runtime_config: RuntimeConfigSummary,
    pub balances: Vec<BalanceInfo>,
    pub recent_errors: Vec<ErrorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_stats: Option<JournalStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_age_s: Option<u64>,
}

/// Operational truth header — the dashboard's primary status banner.
#[derive(Debug, Clone, Serialize)]
pub struct TruthHeader {
    pub ws_mode: String,
    pub ws_user_connected: bool,
    pub last_ws_user_event_age_ms: u64,
    pub reconcile_last_ok_age_s: Option<u64>,
    pub reconcile_last_error: Option<String>,
    pub no_go_reason: Option<String>,
    pub state_version: u64,
    pub ws_sequence_number: u64,
    pub engine_mode: String,
    pub account_mode: String,
    pub risk_mode: String,
    pub server_time: i64,
}

/// Summary of runtime config for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfigSummary {
    pub engine_mode: String,
    pub account_mode: String,
    pub symbols: Vec<String>,
    pub max_concurrent_positions: u32,
    pub max_risk_per_trade_pct: f64,
    pub consensus_threshold: f64,
    pub min_agents_voting: usize,
    pub agents: Vec<AgentConfig>,
}

/// Trade journal aggregate statistics.
#[derive(Debug, Clone, Serialize)]
pub struct JournalStats {
    pub total_trades: usize,
    pub win_rate: f64,
    pub total_net_pnl: rust_decimal::Decimal,
    pub profit_factor: f64,
}
