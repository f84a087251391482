// =============================================================================
// TradingOrchestrator — the top-level per-symbol cycle
// =============================================================================
//
// Generalises the inline strategy-loop `tokio::spawn` block from main.rs
// (interval.tick() + per-symbol evaluate-then-execute) into a named
// component that drives the consensus → execution pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::*;
use tracing::{info, warn};

use crate::consensus::{ConsensusEngine, ConsensusResult};
use crate::market_data::{CandleBuffer, CandleKey};
use crate::position::executor::{OpenOutcome, PositionExecutor};
use crate::risk::RiskEngine;
use crate::treasury::TreasuryRouter;
use crate::types::{MarketSnapshot, Side, Signal};

const KLINE_INTERVAL: &str = "1m";

pub struct TradingOrchestrator {
    candle_buffer: Arc<CandleBuffer>,
    consensus: Arc<ConsensusEngine>,
    executor: Arc<PositionExecutor>,
    router: Arc<TreasuryRouter>,
    risk_engine: Arc<RiskEngine>,
    symbols: Vec<String>,
    min_confidence: f64,
    max_concurrent_positions: u32,
    max_risk_per_trade_pct: f64,
    min_free_capital_usd: Decimal,
    scan_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl TradingOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        candle_buffer: Arc<CandleBuffer>,
        consensus: Arc<ConsensusEngine>,
        executor: Arc<PositionExecutor>,
        router: Arc<TreasuryRouter>,
        risk_engine: Arc<RiskEngine>,
        symbols: Vec<String>,
        min_confidence: f64,
        max_concurrent_positions: u32,
        max_risk_per_trade_pct: f64,
        min_free_capital_usd: Decimal,
        scan_interval: Duration,
    ) -> Self {
        Self {
            candle_buffer,
            consensus,
            executor,
            router,
            risk_engine,
            symbols,
            min_confidence,
            max_concurrent_positions,
            max_risk_per_trade_pct,
            min_free_capital_usd,
            scan_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A shared handle the shutdown signal handler can flip to stop the loop
    /// from accepting new cycles.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Drive the scan loop until `shutdown_flag()` is set. Each cycle is a
    /// barrier: the orchestrator does not start cycle N+1 until cycle N's
    /// per-symbol evaluations have all completed.
    pub async fn run(&self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("orchestrator: shutdown requested, stopping cycle loop");
                return;
            }

            self.run_cycle().await;
            tokio::time::sleep(self.scan_interval).await;
        }
    }

    async fn run_cycle(&self) {
        let closed = self.executor.monitor_once().await;
        if !closed.is_empty() {
            info!(count = closed.len(), "positions closed this cycle");
        }
        for position in &closed {
            if let Some(net_profit) = &position.net_profit {
                let pnl = net_profit.net_usd.to_f64().unwrap_or(0.0);
                self.risk_engine.record_trade_result(pnl);
            }
        }

        for symbol in &self.symbols {
            self.evaluate_symbol(symbol).await;
        }
    }

    async fn evaluate_symbol(&self, symbol: &str) {
        let (can_trade, reason) = self.risk_engine.can_trade();
        if !can_trade {
            warn!(symbol, reason = ?reason, "risk engine blocking new entries this cycle");
            return;
        }

        let venue = self.executor.venue();

        if self.executor.open_count_for_venue(venue) as u32 >= self.max_concurrent_positions {
            return;
        }
        if self.executor.has_open_for_symbol(symbol) {
            return;
        }

        let Some(free_capital) = self.best_free_capital() else {
            return;
        };
        if free_capital < self.min_free_capital_usd {
            return;
        }

        let Some(snapshot) = self.build_snapshot(symbol) else {
            return;
        };

        if let Some(last) = snapshot.last_close() {
            if let Some(price) = Decimal::from_f64(last) {
                self.executor.sync_reference_price(symbol, price);
            }
        }

        let result = self.consensus.analyze(&snapshot).await;

        let (signal, confidence) = match &result {
            ConsensusResult::Decision { signal, confidence, .. } => (*signal, *confidence),
            ConsensusResult::NoConsensus { .. } => return,
        };

        if signal == Signal::Hold || confidence < self.min_confidence {
            return;
        }

        let side = match signal {
            Signal::Buy => Side::Long,
            Signal::Sell => Side::Short,
            Signal::Hold => unreachable!("filtered above"),
        };

        match self.executor.open(symbol, side, confidence, None).await {
            Ok(OpenOutcome::Opened(position)) => {
                info!(id = %position.id, symbol, side = %side, confidence, "position opened by orchestrator");
            }
            Ok(OpenOutcome::NoAvailableSlot) => {
                info!(symbol, "no available slot, skipping open this cycle");
            }
            Err(e) => {
                warn!(symbol, error = %e, "position open failed");
            }
        }
    }

    fn best_free_capital(&self) -> Option<Decimal> {
        let snapshot = self.router.snapshot();
        snapshot
            .slots
            .iter()
            .filter(|s| !s.reserved)
            .filter_map(|s| self.router.free_capital(&s.id, self.max_risk_per_trade_pct))
            .max()
    }

    fn build_snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        let key = CandleKey { symbol: symbol.to_string(), interval: KLINE_INTERVAL.to_string() };
        let candles = self.candle_buffer.get_closed_candles(&key, 200);

        if candles.len() < MarketSnapshot::MIN_SAMPLES {
            return None;
        }

        let closes = candles.iter().map(|c| c.close).collect();
        let highs = candles.iter().map(|c| c.high).collect();
        let lows = candles.iter().map(|c| c.low).collect();
        let volumes = candles.iter().map(|c| c.volume).collect();

        Some(MarketSnapshot {
            symbol: symbol.to_string(),
            closes,
            highs,
            lows,
            volumes,
            timestamp: chrono::Utc::now(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::SlotCascade;
    use crate::fee_model::FeeModel;
    use crate::ports::exchange::PaperExchange;
    use crate::ports::notification::LoggingNotifier;
    use crate::ports::ExchangePort;
    use crate::position::store::PositionStore;
    use std::collections::HashMap;

    fn orchestrator_with_empty_buffer() -> TradingOrchestrator {
        let candle_buffer = Arc::new(CandleBuffer::new(500));
        let store = Arc::new(PositionStore::new());
        let router = Arc::new(TreasuryRouter::new(SlotCascade::bootstrap(10, Decimal::new(1000, 0))));
        let fee_model = Arc::new(FeeModel::new(HashMap::new(), 0.001));
        let exchange: Arc<dyn ExchangePort> = Arc::new(PaperExchange::new("binance"));
        let notifier = Arc::new(LoggingNotifier);
        let executor = Arc::new(PositionExecutor::new(
            store, router.clone(), fee_model, exchange, notifier, 10.0, 3.0,
        ));
        let consensus = Arc::new(ConsensusEngine::with_defaults(vec![]));
        let risk_engine = Arc::new(RiskEngine::new(10_000.0, 0.03, 5, 0.05, 50));

        TradingOrchestrator::new(
            candle_buffer,
            consensus,
            executor,
            router,
            risk_engine,
            vec!["BTCUSDT".to_string()],
            0.70,
            3,
            10.0,
            Decimal::ONE,
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn cycle_with_no_candle_history_skips_symbol_without_panic() {
        let orchestrator = orchestrator_with_empty_buffer();
        orchestrator.run_cycle().await;
    }

    #[test]
    fn shutdown_flag_stops_run_loop() {
        let orchestrator = orchestrator_with_empty_buffer();
        let flag = orchestrator.shutdown_flag();
        assert!(!flag.load(Ordering::SeqCst));
        flag.store(true, Ordering::SeqCst);
        assert!(orchestrator.shutdown.load(Ordering::SeqCst));
    }
}
