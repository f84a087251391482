// =============================================================================
// TreasuryRouter — the sole write path for settlements
// =============================================================================
//
// Idempotent by settlementId, serializable: every settle/sweep call
// acquires the router's single exclusive lock, so the recorded
// SettlementRecord sequence is the authoritative, totally-ordered ledger.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cascade::{RouteResult, Slot, SlotCascade};
use crate::errors::{EngineError, EngineResult};
use crate::types::RoutingOutcome;

const MAX_SETTLEMENT_HISTORY: usize = 1000;

/// Outcome of a `settle` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum SettleOutcome {
    /// A new settlement was applied; carries the resulting record.
    Applied(SettlementRecord),
    /// `settlementId` had already been applied; no state changed.
    AlreadyProcessed { settlement_id: String },
}

/// Append-only record of one settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub settlement_id: String,
    pub slot_id: String,
    pub net_pnl: Decimal,
    pub timestamp: DateTime<Utc>,
    pub capital_after: Decimal,
    pub routing: RoutingOutcome,
}

struct Inner {
    cascade: SlotCascade,
    treasury_balance: Decimal,
    history: VecDeque<SettlementRecord>,
    applied_ids: std::collections::HashSet<String>,
}

/// Snapshot of treasury + slot state for read-only consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreasurySnapshot {
    pub balance: Decimal,
    pub slots: Vec<Slot>,
}

pub struct TreasuryRouter {
    inner: RwLock<Inner>,
}

impl TreasuryRouter {
    pub fn new(cascade: SlotCascade) -> Self {
        Self {
            inner: RwLock::new(Inner {
                cascade,
                treasury_balance: Decimal::ZERO,
                history: VecDeque::with_capacity(MAX_SETTLEMENT_HISTORY),
                applied_ids: std::collections::HashSet::new(),
            }),
        }
    }

    /// Apply one trade's net P&L to `slot_id`, idempotent by `settlement_id`.
    pub fn settle(
        &self,
        slot_id: &str,
        net_pnl: Decimal,
        settlement_id: &str,
    ) -> EngineResult<SettleOutcome> {
        let mut inner = self.inner.write();

        if inner.applied_ids.contains(settlement_id) {
            info!(settlement_id, "settlement already processed, skipping");
            return Ok(SettleOutcome::AlreadyProcessed {
                settlement_id: settlement_id.to_string(),
            });
        }

        if inner.cascade.get(slot_id).is_none() {
            warn!(slot_id, "settle: missing slot");
            return Err(EngineError::MissingSlot {
                slot_id: slot_id.to_string(),
            });
        }

        // Closing out a position always releases the slot's reservation,
        // regardless of how the settlement itself turns out.
        if let Some(slot) = inner.cascade.get_mut(slot_id) {
            slot.reserved = false;
        }

        inner.cascade.apply_pnl(slot_id, net_pnl);
        inner.cascade.record_trade_outcome(slot_id, net_pnl > Decimal::ZERO);

        let route_result = inner.cascade.route_excess(slot_id);
        let routing = match route_result {
            RouteResult::NoExcess => RoutingOutcome::None,
            RouteResult::ToSlot { slot_id, amount } => RoutingOutcome::Slot { slot_id, amount },
            RouteResult::ToTreasury { amount } => {
                inner.treasury_balance += amount;
                RoutingOutcome::Treasury { amount }
            }
        };

        let capital_after = inner
            .cascade
            .get(slot_id)
            .map(|s| s.capital)
            .unwrap_or(Decimal::ZERO);

        let record = SettlementRecord {
            settlement_id: settlement_id.to_string(),
            slot_id: slot_id.to_string(),
            net_pnl,
            timestamp: Utc::now(),
            capital_after,
            routing,
        };

        inner.applied_ids.insert(settlement_id.to_string());
        inner.history.push_back(record.clone());
        if inner.history.len() > MAX_SETTLEMENT_HISTORY {
            if let Some(evicted) = inner.history.pop_front() {
                inner.applied_ids.remove(&evicted.settlement_id);
            }
        }

        info!(
            settlement_id,
            slot_id,
            net_pnl = %net_pnl,
            capital_after = %capital_after,
            "settlement applied"
        );

        Ok(SettleOutcome::Applied(record))
    }

    /// Iterate all slots and invoke `routeExcess` on each. Useful after a
    /// VB configuration change.
    pub fn force_sweep(&self) -> Vec<RouteResult> {
        let mut inner = self.inner.write();
        let ids: Vec<String> = inner.cascade.slots().iter().map(|s| s.id.clone()).collect();
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = inner.cascade.route_excess(&id);
            if let RouteResult::ToTreasury { amount } = &result {
                inner.treasury_balance += *amount;
            }
            results.push(result);
        }
        results
    }

    pub fn snapshot(&self) -> TreasurySnapshot {
        let inner = self.inner.read();
        TreasurySnapshot {
            balance: inner.treasury_balance,
            slots: inner.cascade.slots().to_vec(),
        }
    }

    pub fn settlement_history(&self, limit: usize) -> Vec<SettlementRecord> {
        let inner = self.inner.read();
        inner
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    /// Pick a slot for a new position — the caller-supplied id if it has
    /// free capital and is not already reserved, else the unreserved slot
    /// with the highest win-rate (ties broken by largest capital), else
    /// `None` — and mark it reserved in the same write-lock acquisition.
    ///
    /// Selection and reservation happen atomically so two callers can never
    /// walk away with the same slot: at most one position at a time holds a
    /// given slot's capital reservation. The caller must release the
    /// reservation via [`Self::release_slot`] if it fails to open a position
    /// after selecting the slot; a successful close releases it via
    /// [`Self::settle`].
    pub fn select_slot(&self, preferred: Option<&str>) -> Option<String> {
        let mut inner = self.inner.write();

        if let Some(preferred) = preferred {
            if let Some(slot) = inner.cascade.get(preferred) {
                if slot.capital > Decimal::ZERO && !slot.reserved {
                    let id = slot.id.clone();
                    inner.cascade.get_mut(&id).unwrap().reserved = true;
                    return Some(id);
                }
            }
        }

        let chosen = inner
            .cascade
            .slots()
            .iter()
            .filter(|s| s.capital > Decimal::ZERO && !s.reserved)
            .max_by(|a, b| {
                a.win_rate()
                    .partial_cmp(&b.win_rate())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.capital.cmp(&b.capital))
            })
            .map(|s| s.id.clone())?;

        inner.cascade.get_mut(&chosen).unwrap().reserved = true;
        Some(chosen)
    }

    /// Release a slot's capital reservation without settling a trade —
    /// used when an `open` attempt fails after the slot was selected (e.g.
    /// the exchange rejects the order) so the slot is not stuck reserved.
    pub fn release_slot(&self, slot_id: &str) {
        let mut inner = self.inner.write();
        if let Some(slot) = inner.cascade.get_mut(slot_id) {
            slot.reserved = false;
        }
    }

    pub fn free_capital(&self, slot_id: &str, risk_per_trade_pct: f64) -> Option<Decimal> {
        let inner = self.inner.read();
        inner
            .cascade
            .get(slot_id)
            .map(|s| s.free_capital(risk_per_trade_pct))
    }

    /// Replay a durable journal entry on boot, skipping ids already applied.
    pub fn replay(&self, slot_id: &str, net_pnl: Decimal, settlement_id: &str) -> EngineResult<()> {
        self.settle(slot_id, net_pnl, settlement_id)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> TreasuryRouter {
        TreasuryRouter::new(SlotCascade::bootstrap(10, Decimal::new(1000, 0)))
    }

    #[test]
    fn scenario_b_idempotent_settlement() {
        let router = router();
        router
            .settle("slot_1", Decimal::new(150, 0), "sid-x")
            .unwrap();
        let second = router
            .settle("slot_1", Decimal::new(150, 0), "sid-x")
            .unwrap();

        match second {
            SettleOutcome::AlreadyProcessed { settlement_id } => {
                assert_eq!(settlement_id, "sid-x");
            }
            other => panic!("expected AlreadyProcessed, got {other:?}"),
        }

        let snap = router.snapshot();
        let slot1 = snap.slots.iter().find(|s| s.id == "slot_1").unwrap();
        let slot2 = snap.slots.iter().find(|s| s.id == "slot_2").unwrap();
        assert_eq!(slot1.capital, Decimal::new(1000, 0));
        assert_eq!(slot2.capital, Decimal::new(150, 0));
        assert_eq!(snap.balance, Decimal::ZERO);
        assert_eq!(router.settlement_history(10).len(), 1);
    }

    #[test]
    fn missing_slot_returns_error() {
        let router = router();
        let result = router.settle("slot_99", Decimal::new(10, 0), "sid-1");
        assert!(matches!(result, Err(EngineError::MissingSlot { .. })));
    }

    #[test]
    fn settle_twice_same_id_matches_once() {
        let router = router();
        router
            .settle("slot_1", Decimal::new(400, 0), "sid-a")
            .unwrap();
        let snap_once = router.snapshot();

        let router2 = router();
        router2
            .settle("slot_1", Decimal::new(400, 0), "sid-a")
            .unwrap();
        router2
            .settle("slot_1", Decimal::new(400, 0), "sid-a")
            .unwrap();
        let snap_twice = router2.snapshot();

        assert_eq!(snap_once.balance, snap_twice.balance);
        for (a, b) in snap_once.slots.iter().zip(snap_twice.slots.iter()) {
            assert_eq!(a.capital, b.capital);
        }
    }

    #[test]
    fn force_sweep_routes_preexisting_excess() {
        let router = router();
        // Manually push slot_1 over VB without going through settle, then
        // sweep should redistribute it.
        {
            let mut inner = router.inner.write();
            inner.cascade.apply_pnl("slot_1", Decimal::new(50, 0));
        }
        router.force_sweep();
        let snap = router.snapshot();
        let slot1 = snap.slots.iter().find(|s| s.id == "slot_1").unwrap();
        let slot2 = snap.slots.iter().find(|s| s.id == "slot_2").unwrap();
        assert_eq!(slot1.capital, Decimal::new(1000, 0));
        assert_eq!(slot2.capital, Decimal::new(50, 0));
    }

    #[test]
    fn select_slot_prefers_caller_supplied_slot_with_capital() {
        let router = router();
        let chosen = router.select_slot(Some("slot_1"));
        assert_eq!(chosen, Some("slot_1".to_string()));
    }

    #[test]
    fn select_slot_falls_back_to_best_win_rate() {
        let router = router();
        router
            .settle("slot_1", Decimal::new(-1, 0), "sid-loss")
            .unwrap();
        let chosen = router.select_slot(Some("slot_9"));
        // slot_9 has zero capital, so it falls through to the capitalized
        // slot_1.
        assert_eq!(chosen, Some("slot_1".to_string()));
    }

    #[test]
    fn at_most_one_reservation_per_slot_at_a_time() {
        // Only slot_1 is capitalized, so it is the only candidate.
        let router = router();
        let first = router.select_slot(None);
        assert_eq!(first, Some("slot_1".to_string()));

        // A second select before the first position closes must not return
        // the already-reserved slot_1 again.
        let second = router.select_slot(None);
        assert_eq!(second, None);

        // Releasing without settling (failed open) frees it back up.
        router.release_slot("slot_1");
        let third = router.select_slot(None);
        assert_eq!(third, Some("slot_1".to_string()));
    }

    #[test]
    fn settle_releases_the_slot_reservation() {
        let router = router();
        router.select_slot(Some("slot_1")).unwrap();
        assert_eq!(router.select_slot(None), None);

        router.settle("slot_1", Decimal::new(10, 0), "sid-close").unwrap();

        // Settling (closing the position) frees slot_1 back up.
        assert_eq!(router.select_slot(None), Some("slot_1".to_string()));
    }
}
