// =============================================================================
// PositionStore — owns the set of live and historical positions
// =============================================================================
//
// Single TP/SL per position — one `tpPrice`/`slPrice` pair, no
// TP1/TP2/trailing-stop ladder.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{CloseReason, NetProfitBreakdown, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A single tracked position, uniquely owned by exactly one slot from open
/// to close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub slot_id: String,
    pub venue: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub amount_base: Decimal,
    pub notional_quote: Decimal,
    pub tp_price: Decimal,
    pub sl_price: Decimal,
    pub status: PositionStatus,
    #[serde(default)]
    pub current_price: Decimal,
    #[serde(default)]
    pub exit_price: Option<Decimal>,
    #[serde(default)]
    pub close_reason: Option<CloseReason>,
    #[serde(default)]
    pub net_profit: Option<NetProfitBreakdown>,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// `venue_symbol_timestamp` per spec §4.5 step 4.
    pub fn make_id(venue: &str, symbol: &str) -> String {
        format!("{venue}_{symbol}_{}", Utc::now().timestamp_millis())
    }

    pub fn trigger_hit(&self) -> Option<CloseReason> {
        match self.side {
            Side::Long => {
                if self.current_price >= self.tp_price {
                    Some(CloseReason::TakeProfit)
                } else if self.current_price <= self.sl_price {
                    Some(CloseReason::StopLoss)
                } else {
                    None
                }
            }
            Side::Short => {
                if self.current_price <= self.tp_price {
                    Some(CloseReason::TakeProfit)
                } else if self.current_price >= self.sl_price {
                    Some(CloseReason::StopLoss)
                } else {
                    None
                }
            }
        }
    }
}

/// Thread-safe owner of the open/closed position lists. Reads return
/// immutable snapshots; writes occur only through this API.
pub struct PositionStore {
    open: RwLock<Vec<Position>>,
    closed: RwLock<Vec<Position>>,
}

const MAX_CLOSED_HISTORY: usize = 1000;

impl PositionStore {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open_position(
        &self,
        slot_id: &str,
        venue: &str,
        symbol: &str,
        side: Side,
        entry_price: Decimal,
        amount_base: Decimal,
        notional_quote: Decimal,
        tp_price: Decimal,
        sl_price: Decimal,
    ) -> Position {
        let position = Position {
            id: Position::make_id(venue, symbol),
            slot_id: slot_id.to_string(),
            venue: venue.to_string(),
            symbol: symbol.to_string(),
            side,
            entry_price,
            amount_base,
            notional_quote,
            tp_price,
            sl_price,
            status: PositionStatus::Open,
            current_price: entry_price,
            exit_price: None,
            close_reason: None,
            net_profit: None,
            opened_at: Utc::now(),
            closed_at: None,
        };

        info!(
            id = %position.id,
            slot_id,
            symbol,
            side = %side,
            entry_price = %entry_price,
            "position opened"
        );

        self.open.write().push(position.clone());
        position
    }

    pub fn update_price(&self, symbol: &str, current_price: Decimal) {
        let mut open = self.open.write();
        for pos in open.iter_mut().filter(|p| p.symbol == symbol) {
            pos.current_price = current_price;
        }
    }

    /// Positions whose trigger fired, unmutated (the caller — `PositionExecutor`
    /// — performs the exchange close and then calls `close_position`).
    pub fn triggered(&self) -> Vec<Position> {
        self.open
            .read()
            .iter()
            .filter(|p| p.trigger_hit().is_some())
            .cloned()
            .collect()
    }

    pub fn close_position(
        &self,
        id: &str,
        reason: CloseReason,
        exit_price: Decimal,
        net_profit: NetProfitBreakdown,
    ) -> Option<Position> {
        let mut open = self.open.write();
        let idx = open.iter().position(|p| p.id == id)?;
        let mut position = open.remove(idx);

        position.status = PositionStatus::Closed;
        position.exit_price = Some(exit_price);
        position.close_reason = Some(reason);
        position.net_profit = Some(net_profit);
        position.closed_at = Some(Utc::now());

        info!(
            id,
            reason = %reason,
            exit_price = %exit_price,
            "position closed"
        );

        let mut closed = self.closed.write();
        closed.push(position.clone());
        if closed.len() > MAX_CLOSED_HISTORY {
            closed.remove(0);
        }

        Some(position)
    }

    pub fn get(&self, id: &str) -> Option<Position> {
        self.open.read().iter().find(|p| p.id == id).cloned()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.open.read().clone()
    }

    pub fn open_count_for_venue(&self, venue: &str) -> usize {
        self.open.read().iter().filter(|p| p.venue == venue).count()
    }

    pub fn has_open_for_symbol(&self, symbol: &str) -> bool {
        self.open.read().iter().any(|p| p.symbol == symbol)
    }

    pub fn closed_positions(&self, count: usize) -> Vec<Position> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn dec(v: i64) -> Decimal {
        Decimal::new(v, 0)
    }

    #[test]
    fn open_then_trigger_take_profit_long() {
        let store = PositionStore::new();
        let pos = store.open_position(
            "slot_1",
            "binance",
            "BTCUSDT",
            Side::Long,
            dec(100),
            dec(1),
            dec(100),
            dec(110),
            dec(95),
        );
        store.update_price("BTCUSDT", dec(111));
        let triggered = store.triggered();
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].id, pos.id);
        assert_eq!(triggered[0].trigger_hit(), Some(CloseReason::TakeProfit));
    }

    #[test]
    fn stop_loss_triggers_for_short() {
        let store = PositionStore::new();
        store.open_position(
            "slot_1",
            "binance",
            "ETHUSDT",
            Side::Short,
            dec(100),
            dec(1),
            dec(100),
            dec(90),
            dec(105),
        );
        store.update_price("ETHUSDT", dec(106));
        let triggered = store.triggered();
        assert_eq!(triggered[0].trigger_hit(), Some(CloseReason::StopLoss));
    }

    #[test]
    fn close_position_moves_to_closed_list() {
        let store = PositionStore::new();
        let pos = store.open_position(
            "slot_1",
            "binance",
            "BTCUSDT",
            Side::Long,
            dec(100),
            dec(1),
            dec(100),
            dec(110),
            dec(95),
        );
        let breakdown = NetProfitBreakdown {
            gross_pct: 0.1,
            gross_usd: dec(10),
            entry_fee: dec(0),
            exit_fee: dec(0),
            total_fees: dec(0),
            net_usd: dec(10),
            net_pct: 0.1,
            profitable: true,
        };
        let closed = store
            .close_position(&pos.id, CloseReason::TakeProfit, dec(110), breakdown)
            .unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert!(store.get(&pos.id).is_none());
        assert_eq!(store.closed_positions(10).len(), 1);
    }

    #[test]
    fn exactly_one_position_per_capital_reservation() {
        let store = PositionStore::new();
        store.open_position(
            "slot_1", "binance", "BTCUSDT", Side::Long, dec(100), dec(1), dec(100), dec(110), dec(95),
        );
        assert!(store.has_open_for_symbol("BTCUSDT"));
        assert_eq!(store.open_positions().len(), 1);
    }
}
