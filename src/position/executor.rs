// =============================================================================
// PositionExecutor — decision to live position, monitored through to close
// =============================================================================
//
// Adapted from `execution.rs::ExecutionEngine`: the same "risk-check, then
// submit, then record" shape, generalised to slot-based sizing, fee-safe
// TP/SL, and a monitor/close loop rather than a single fire-and-forget call.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::*;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::errors::{EngineError, EngineResult};
use crate::fee_model::FeeModel;
use crate::ports::exchange::ExchangePort;
use crate::ports::notification::NotificationPort;
use crate::position::store::{Position, PositionStore};
use crate::treasury::TreasuryRouter;
use crate::types::{CloseReason, Side};

/// Outcome of an `open` call that did not reach the exchange at all — these
/// are normal business refusals, not [`EngineError`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Opened(Position),
    NoAvailableSlot,
}

const INITIAL_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 60;

/// `min(60, 1 * 2^attempt)` seconds, per the exit-retry schedule.
fn backoff_duration(attempt: u32) -> Duration {
    let secs = INITIAL_BACKOFF_SECS.saturating_mul(1u64 << attempt.min(6));
    Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
}

pub struct PositionExecutor {
    store: Arc<PositionStore>,
    router: Arc<TreasuryRouter>,
    fee_model: Arc<FeeModel>,
    exchange: Arc<dyn ExchangePort>,
    notifier: Arc<dyn NotificationPort>,
    risk_per_trade_pct: f64,
    max_loss_pct: f64,
}

impl PositionExecutor {
    pub fn new(
        store: Arc<PositionStore>,
        router: Arc<TreasuryRouter>,
        fee_model: Arc<FeeModel>,
        exchange: Arc<dyn ExchangePort>,
        notifier: Arc<dyn NotificationPort>,
        risk_per_trade_pct: f64,
        max_loss_pct: f64,
    ) -> Self {
        Self {
            store,
            router,
            fee_model,
            exchange,
            notifier,
            risk_per_trade_pct,
            max_loss_pct,
        }
    }

    pub fn venue(&self) -> &str {
        self.exchange.venue()
    }

    pub fn open_count_for_venue(&self, venue: &str) -> usize {
        self.store.open_count_for_venue(venue)
    }

    pub fn has_open_for_symbol(&self, symbol: &str) -> bool {
        self.store.has_open_for_symbol(symbol)
    }

    /// Push a fresh reference price into the exchange port. A no-op for
    /// `BinanceExchange`; lets `PaperExchange`'s ticker track real market data.
    pub fn sync_reference_price(&self, symbol: &str, price: rust_decimal::Decimal) {
        self.exchange.sync_reference_price(symbol, price);
    }

    // -------------------------------------------------------------------------
    // Open
    // -------------------------------------------------------------------------

    /// Select a slot, size the position, submit the entry order, and persist
    /// the resulting `Position`. `preferred_slot` is normally the slot the
    /// caller has been cycling (e.g. round-robin by symbol).
    ///
    /// `TreasuryRouter::select_slot` reserves the slot's capital atomically
    /// with selection; every exit path below past that point must release
    /// the reservation unless a `Position` was actually opened against it,
    /// or the slot would stay stuck reserved with no position to show for it.
    pub async fn open(
        &self,
        symbol: &str,
        side: Side,
        confidence: f64,
        preferred_slot: Option<&str>,
    ) -> EngineResult<OpenOutcome> {
        let Some(slot_id) = self.router.select_slot(preferred_slot) else {
            return Ok(OpenOutcome::NoAvailableSlot);
        };

        match self.open_on_reserved_slot(&slot_id, symbol, side, confidence).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.router.release_slot(&slot_id);
                Err(e)
            }
        }
    }

    async fn open_on_reserved_slot(
        &self,
        slot_id: &str,
        symbol: &str,
        side: Side,
        confidence: f64,
    ) -> EngineResult<OpenOutcome> {
        // `TreasuryRouter::free_capital` already folds in riskPerTradePct, so
        // this is the spec's `base`; the cap is the slot's raw capital.
        let base = self
            .router
            .free_capital(slot_id, self.risk_per_trade_pct)
            .unwrap_or(Decimal::ZERO);

        if base <= Decimal::ZERO {
            self.router.release_slot(slot_id);
            return Ok(OpenOutcome::NoAvailableSlot);
        }

        let slot_capital = self
            .router
            .snapshot()
            .slots
            .into_iter()
            .find(|s| s.id == slot_id)
            .map(|s| s.capital)
            .unwrap_or(Decimal::ZERO);

        let modulator = Decimal::from_f64(0.5 + 0.8 * confidence).unwrap_or(Decimal::ONE);
        let position_size = (base * modulator).min(slot_capital);

        if position_size <= Decimal::ZERO {
            self.router.release_slot(slot_id);
            return Ok(OpenOutcome::NoAvailableSlot);
        }

        let venue = self.exchange.venue().to_string();
        let ticker = self.exchange.ticker(symbol).await?;
        if ticker.last <= Decimal::ZERO {
            return Err(EngineError::OrderRejectedOnOpen {
                symbol: symbol.to_string(),
                reason: "non-positive ticker price".to_string(),
            });
        }

        let amount_base = position_size / ticker.last;

        let ack = self
            .exchange
            .create_market_order(symbol, side, amount_base)
            .await?;

        let entry_price = ack.filled_price;
        let (tp_price, _) = self.fee_model.take_profit(&venue, entry_price, side, None);
        let sl_price = self
            .fee_model
            .stop_loss(&venue, entry_price, side, self.max_loss_pct);
        let notional_quote = ack.filled_qty * entry_price;

        let position = self.store.open_position(
            slot_id,
            &venue,
            symbol,
            side,
            entry_price,
            ack.filled_qty,
            notional_quote,
            tp_price,
            sl_price,
        );

        self.notifier.notify_trade_opened(&position).await;

        Ok(OpenOutcome::Opened(position))
    }

    // -------------------------------------------------------------------------
    // Monitor / close
    // -------------------------------------------------------------------------

    /// Evaluate every OPEN position's trigger and close the ones that fired.
    /// Returns the positions closed this pass.
    pub async fn monitor_once(&self) -> Vec<Position> {
        let mut closed = Vec::new();
        for position in self.store.triggered() {
            let Some(reason) = position.trigger_hit() else {
                continue;
            };
            match self.close_with_retry(&position, reason, None).await {
                Ok(result) => closed.push(result),
                Err(e) => error!(
                    id = %position.id,
                    error = %e,
                    "position remains open after unresolved close failure"
                ),
            }
        }
        closed
    }

    /// Close a single OPEN position on request (dashboard/CLI control).
    pub async fn close_manual(&self, id: &str) -> EngineResult<Position> {
        let position = self.store.get(id).ok_or_else(|| EngineError::OrderRejectedOnClose {
            position_id: id.to_string(),
            reason: "position not open".to_string(),
        })?;
        self.close_with_retry(&position, CloseReason::Manual, None).await
    }

    /// Force-close every OPEN position with reason SHUTDOWN, bounded retries
    /// per position so the process can still exit.
    pub async fn shutdown_closeout(&self) -> EngineResult<usize> {
        let open = self.store.open_positions();
        let mut closed_count = 0;
        let mut last_err = None;

        for position in open {
            match self
                .close_with_retry(&position, CloseReason::Shutdown, Some(5))
                .await
            {
                Ok(_) => closed_count += 1,
                Err(e) => {
                    error!(id = %position.id, error = %e, "could not close position during shutdown");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if closed_count == 0 => Err(e),
            _ => Ok(closed_count),
        }
    }

    /// Submit the opposite-side exit order, retrying with exponential
    /// backoff on failure. `max_attempts = None` retries indefinitely — an
    /// unclosable position is a critical alert, not a silent loss.
    async fn close_with_retry(
        &self,
        position: &Position,
        reason: CloseReason,
        max_attempts: Option<u32>,
    ) -> EngineResult<Position> {
        let exit_side = match position.side {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        };

        let mut attempt = 0u32;
        let ack = loop {
            match self
                .exchange
                .create_market_order(&position.symbol, exit_side, position.amount_base)
                .await
            {
                Ok(ack) => break ack,
                Err(e) => {
                    if let Some(limit) = max_attempts {
                        if attempt >= limit {
                            return Err(e);
                        }
                    }
                    warn!(
                        id = %position.id,
                        attempt,
                        error = %e,
                        "exit order failed, retrying with backoff"
                    );
                    sleep(backoff_duration(attempt)).await;
                    attempt += 1;
                }
            }
        };

        let exit_price = ack.filled_price;
        let net_profit = self.fee_model.net_profit(
            &position.venue,
            position.entry_price,
            exit_price,
            position.notional_quote,
            position.side,
        );

        let closed = self
            .store
            .close_position(&position.id, reason, exit_price, net_profit.clone())
            .ok_or_else(|| EngineError::OrderRejectedOnClose {
                position_id: position.id.clone(),
                reason: "position vanished from store before close completed".to_string(),
            })?;

        match self
            .router
            .settle(&position.slot_id, net_profit.net_usd, &position.id)
        {
            Ok(_) => {}
            Err(e) => error!(
                id = %position.id,
                slot_id = %position.slot_id,
                error = %e,
                "settlement failed after position close"
            ),
        }

        info!(
            id = %position.id,
            reason = %reason,
            net_usd = %net_profit.net_usd,
            "position closed and settled"
        );

        self.notifier.notify_trade_closed(&closed).await;

        Ok(closed)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::SlotCascade;
    use crate::ports::exchange::{OrderAck, Ticker};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FakeExchange {
        price: Decimal,
        fail_first_n_closes: AtomicU32,
        venue: String,
    }

    #[async_trait]
    impl ExchangePort for FakeExchange {
        fn venue(&self) -> &str {
            &self.venue
        }

        async fn ticker(&self, _symbol: &str) -> EngineResult<Ticker> {
            Ok(Ticker { last: self.price, bid: self.price, ask: self.price })
        }

        async fn create_market_order(
            &self,
            _symbol: &str,
            _side: Side,
            amount_base: Decimal,
        ) -> EngineResult<OrderAck> {
            let remaining = self.fail_first_n_closes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_first_n_closes.fetch_sub(1, Ordering::SeqCst);
                return Err(EngineError::ExchangeTransport("simulated failure".to_string()));
            }
            Ok(OrderAck {
                order_id: "1".to_string(),
                filled_price: self.price,
                filled_qty: amount_base,
            })
        }

        async fn create_limit_order(
            &self,
            _symbol: &str,
            _side: Side,
            amount_base: Decimal,
            price: Decimal,
        ) -> EngineResult<OrderAck> {
            Ok(OrderAck { order_id: "1".to_string(), filled_price: price, filled_qty: amount_base })
        }

        async fn balance(&self, _asset: &str) -> EngineResult<Decimal> {
            Ok(Decimal::ZERO)
        }

        async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> EngineResult<()> {
            Ok(())
        }
    }

    struct FakeNotifier {
        opened: AtomicBool,
        closed: AtomicBool,
    }

    #[async_trait]
    impl NotificationPort for FakeNotifier {
        async fn notify_trade_opened(&self, _position: &Position) {
            self.opened.store(true, Ordering::SeqCst);
        }
        async fn notify_trade_closed(&self, _position: &Position) {
            self.closed.store(true, Ordering::SeqCst);
        }
        async fn notify_system_status(&self, _status: &str) {}
        async fn notify_daily_summary(&self, _summary: &str) {}
    }

    fn fee_model() -> Arc<FeeModel> {
        Arc::new(FeeModel::new(std::collections::HashMap::new(), 0.001))
    }

    fn router() -> Arc<TreasuryRouter> {
        Arc::new(TreasuryRouter::new(SlotCascade::bootstrap(10, Decimal::new(1000, 0))))
    }

    #[test]
    fn backoff_grows_and_caps_at_sixty() {
        assert_eq!(backoff_duration(0), Duration::from_secs(1));
        assert_eq!(backoff_duration(1), Duration::from_secs(2));
        assert_eq!(backoff_duration(2), Duration::from_secs(4));
        assert_eq!(backoff_duration(6), Duration::from_secs(60));
        assert_eq!(backoff_duration(20), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn open_on_capitalized_slot_produces_position() {
        let store = Arc::new(PositionStore::new());
        let exchange: Arc<dyn ExchangePort> = Arc::new(FakeExchange {
            price: Decimal::new(100, 0),
            fail_first_n_closes: AtomicU32::new(0),
            venue: "binance".to_string(),
        });
        let notifier = Arc::new(FakeNotifier { opened: AtomicBool::new(false), closed: AtomicBool::new(false) });
        let executor = PositionExecutor::new(
            store.clone(),
            router(),
            fee_model(),
            exchange,
            notifier.clone(),
            10.0,
            3.0,
        );

        let outcome = executor
            .open("BTCUSDT", Side::Long, 0.8, Some("slot_1"))
            .await
            .unwrap();

        match outcome {
            OpenOutcome::Opened(position) => {
                assert_eq!(position.symbol, "BTCUSDT");
                assert_eq!(position.side, Side::Long);
                assert!(store.has_open_for_symbol("BTCUSDT"));
            }
            other => panic!("expected Opened, got {other:?}"),
        }
        assert!(notifier.opened.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn open_on_uncapitalized_slot_is_no_available_slot() {
        let store = Arc::new(PositionStore::new());
        let exchange: Arc<dyn ExchangePort> = Arc::new(FakeExchange {
            price: Decimal::new(100, 0),
            fail_first_n_closes: AtomicU32::new(0),
            venue: "binance".to_string(),
        });
        let notifier = Arc::new(FakeNotifier { opened: AtomicBool::new(false), closed: AtomicBool::new(false) });
        let executor = PositionExecutor::new(
            store,
            router(),
            fee_model(),
            exchange,
            notifier,
            10.0,
            3.0,
        );

        let outcome = executor
            .open("BTCUSDT", Side::Long, 0.8, Some("slot_5"))
            .await
            .unwrap();

        assert_eq!(outcome, OpenOutcome::NoAvailableSlot);
    }

    #[tokio::test]
    async fn monitor_closes_triggered_position_and_settles() {
        let store = Arc::new(PositionStore::new());
        let treasury = router();
        let exchange: Arc<dyn ExchangePort> = Arc::new(FakeExchange {
            price: Decimal::new(200, 0),
            fail_first_n_closes: AtomicU32::new(0),
            venue: "binance".to_string(),
        });
        let notifier = Arc::new(FakeNotifier { opened: AtomicBool::new(false), closed: AtomicBool::new(false) });
        let executor = PositionExecutor::new(
            store.clone(),
            treasury.clone(),
            fee_model(),
            exchange,
            notifier.clone(),
            10.0,
            3.0,
        );

        store.open_position(
            "slot_1",
            "binance",
            "BTCUSDT",
            Side::Long,
            Decimal::new(100, 0),
            Decimal::new(1, 0),
            Decimal::new(100, 0),
            Decimal::new(150, 0),
            Decimal::new(90, 0),
        );
        store.update_price("BTCUSDT", Decimal::new(200, 0));

        let closed = executor.monitor_once().await;
        assert_eq!(closed.len(), 1);
        assert!(notifier.closed.load(Ordering::SeqCst));
        assert_eq!(treasury.settlement_history(10).len(), 1);
    }

    #[tokio::test]
    async fn exit_retries_until_exchange_recovers() {
        let store = Arc::new(PositionStore::new());
        let exchange: Arc<dyn ExchangePort> = Arc::new(FakeExchange {
            price: Decimal::new(200, 0),
            fail_first_n_closes: AtomicU32::new(2),
            venue: "binance".to_string(),
        });
        let notifier = Arc::new(FakeNotifier { opened: AtomicBool::new(false), closed: AtomicBool::new(false) });
        let executor = PositionExecutor::new(
            store.clone(),
            router(),
            fee_model(),
            exchange,
            notifier,
            10.0,
            3.0,
        );

        let position = store.open_position(
            "slot_1",
            "binance",
            "BTCUSDT",
            Side::Long,
            Decimal::new(100, 0),
            Decimal::new(1, 0),
            Decimal::new(100, 0),
            Decimal::new(150, 0),
            Decimal::new(90, 0),
        );
        store.update_price("BTCUSDT", Decimal::new(200, 0));

        let closed = executor
            .close_with_retry(&position, CloseReason::TakeProfit, None)
            .await
            .unwrap();
        assert_eq!(closed.status, crate::position::store::PositionStatus::Closed);
    }

    #[tokio::test]
    async fn shutdown_closeout_closes_all_open_positions() {
        let store = Arc::new(PositionStore::new());
        let exchange: Arc<dyn ExchangePort> = Arc::new(FakeExchange {
            price: Decimal::new(100, 0),
            fail_first_n_closes: AtomicU32::new(0),
            venue: "binance".to_string(),
        });
        let notifier = Arc::new(FakeNotifier { opened: AtomicBool::new(false), closed: AtomicBool::new(false) });
        let executor = PositionExecutor::new(
            store.clone(),
            router(),
            fee_model(),
            exchange,
            notifier,
            10.0,
            3.0,
        );

        store.open_position(
            "slot_1", "binance", "BTCUSDT", Side::Long,
            Decimal::new(100, 0), Decimal::new(1, 0), Decimal::new(100, 0),
            Decimal::new(150, 0), Decimal::new(90, 0),
        );

        let closed_count = executor.shutdown_closeout().await.unwrap();
        assert_eq!(closed_count, 1);
        assert!(store.open_positions().is_empty());
    }

    #[tokio::test]
    async fn second_open_on_same_slot_is_rejected_while_first_is_open() {
        // Only slot_1 is capitalized, so both opens target it.
        let store = Arc::new(PositionStore::new());
        let exchange: Arc<dyn ExchangePort> = Arc::new(FakeExchange {
            price: Decimal::new(100, 0),
            fail_first_n_closes: AtomicU32::new(0),
            venue: "binance".to_string(),
        });
        let notifier = Arc::new(FakeNotifier { opened: AtomicBool::new(false), closed: AtomicBool::new(false) });
        let executor = PositionExecutor::new(
            store.clone(),
            router(),
            fee_model(),
            exchange,
            notifier,
            10.0,
            3.0,
        );

        let first = executor.open("BTCUSDT", Side::Long, 0.8, None).await.unwrap();
        assert!(matches!(first, OpenOutcome::Opened(_)));

        // slot_1 is now reserved by the BTCUSDT position; a second symbol
        // competing for the same (only capitalized) slot must be refused,
        // not resized against the slot's full, already-committed capital.
        let second = executor.open("ETHUSDT", Side::Long, 0.8, None).await.unwrap();
        assert_eq!(second, OpenOutcome::NoAvailableSlot);

        if let OpenOutcome::Opened(position) = first {
            executor.close_manual(&position.id).await.unwrap();
        }

        // Once the first position is closed and settled, slot_1 frees back up.
        let third = executor.open("ETHUSDT", Side::Long, 0.8, None).await.unwrap();
        assert!(matches!(third, OpenOutcome::Opened(_)));
    }

    #[tokio::test]
    async fn failed_order_releases_the_slot_reservation() {
        let store = Arc::new(PositionStore::new());
        let exchange: Arc<dyn ExchangePort> = Arc::new(FakeExchange {
            price: Decimal::new(100, 0),
            fail_first_n_closes: AtomicU32::new(1),
            venue: "binance".to_string(),
        });
        let notifier = Arc::new(FakeNotifier { opened: AtomicBool::new(false), closed: AtomicBool::new(false) });
        let executor = PositionExecutor::new(
            store,
            router(),
            fee_model(),
            exchange,
            notifier,
            10.0,
            3.0,
        );

        let failed = executor.open("BTCUSDT", Side::Long, 0.8, Some("slot_1")).await;
        assert!(failed.is_err());

        // The order rejection must not leave slot_1 stuck reserved.
        let retried = executor.open("BTCUSDT", Side::Long, 0.8, Some("slot_1")).await.unwrap();
        assert!(matches!(retried, OpenOutcome::Opened(_)));
    }
}
