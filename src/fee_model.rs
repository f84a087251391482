// =============================================================================
// FeeModel — venue fee rates, fee-safe TP/SL, and net-profit accounting
// =============================================================================
//
// Canonical source of truth for every fee rate used anywhere in the engine.
// Position sizing and SL/TP computation must route through here; no other
// module may hardcode or re-derive a fee rate (see DESIGN.md, Open Question
// resolution #2).

use std::collections::HashMap;

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{NetProfitBreakdown, Side};

/// Maker/taker rate pair for one venue, expressed as a fraction (0.001 = 0.1%).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VenueFees {
    pub maker: f64,
    pub taker: f64,
}

impl Default for VenueFees {
    fn default() -> Self {
        // Binance spot defaults.
        Self {
            maker: 0.001,
            taker: 0.001,
        }
    }
}

/// Per-venue fee rates plus the derived fee-safe pricing rules.
///
/// Immutable after boot, per spec's shared-resource policy.
pub struct FeeModel {
    venue_fees: HashMap<String, VenueFees>,
    /// Fixed safety buffer added on top of the round-trip fee when
    /// computing the minimum profitable spread.
    safety_buffer_pct: f64,
}

impl FeeModel {
    pub fn new(venue_fees: HashMap<String, VenueFees>, safety_buffer_pct: f64) -> Self {
        Self {
            venue_fees,
            safety_buffer_pct,
        }
    }

    /// `maker`/`taker` fee rates for `venue`. Falls back to [`VenueFees::default`]
    /// and logs a warning if the venue was not configured at boot.
    pub fn fees(&self, venue: &str) -> VenueFees {
        self.venue_fees.get(venue).copied().unwrap_or_else(|| {
            warn!(venue, "no configured fees for venue, using defaults");
            VenueFees::default()
        })
    }

    /// Minimum return that covers one taker entry + one taker exit plus the
    /// safety buffer.
    pub fn min_profit_pct(&self, venue: &str) -> f64 {
        let fees = self.fees(venue);
        fees.taker + fees.taker + self.safety_buffer_pct
    }

    /// Fee-safe take-profit price and the effective percentage actually used.
    ///
    /// If `desired_profit_pct` is absent, uses `3 * minProfitPct`. Always
    /// enforces `effective >= 1.5 * minProfitPct`.
    pub fn take_profit(
        &self,
        venue: &str,
        entry: Decimal,
        side: Side,
        desired_profit_pct: Option<f64>,
    ) -> (Decimal, f64) {
        let min_profit = self.min_profit_pct(venue);
        let desired = desired_profit_pct.unwrap_or(min_profit * 3.0);
        let effective = desired.max(min_profit * 1.5);

        let factor = Decimal::from_f64(effective).unwrap_or(Decimal::ZERO);
        let tp_price = match side {
            Side::Long => entry * (Decimal::ONE + factor),
            Side::Short => entry * (Decimal::ONE - factor),
        };
        (tp_price, effective)
    }

    /// Fee-safe stop-loss price, inflating the raw loss by `2 * takerFee` to
    /// account for round-trip fees.
    pub fn stop_loss(&self, venue: &str, entry: Decimal, side: Side, max_loss_pct: f64) -> Decimal {
        let fees = self.fees(venue);
        let total_loss = max_loss_pct + 2.0 * fees.taker;
        let factor = Decimal::from_f64(total_loss).unwrap_or(Decimal::ZERO);
        match side {
            Side::Long => entry * (Decimal::ONE - factor),
            Side::Short => entry * (Decimal::ONE + factor),
        }
    }

    /// Net profit/loss breakdown for a round trip at `entry` -> `exit` over
    /// `notional` (fixed USD notional committed to the position — both the
    /// entry and exit legs are charged fees against this same figure, not a
    /// coin quantity re-priced at each leg).
    pub fn net_profit(
        &self,
        venue: &str,
        entry: Decimal,
        exit: Decimal,
        notional: Decimal,
        side: Side,
    ) -> NetProfitBreakdown {
        let fees = self.fees(venue);

        let pct_move = if entry.is_zero() {
            Decimal::ZERO
        } else {
            match side {
                Side::Long => (exit - entry) / entry,
                Side::Short => (entry - exit) / entry,
            }
        };
        let gross_usd = pct_move * notional;

        let taker = Decimal::from_f64(fees.taker).unwrap_or(Decimal::ZERO);
        let entry_fee = notional * taker;
        let exit_fee = notional * taker;
        let total_fees = entry_fee + exit_fee;

        let net_usd = gross_usd - total_fees;

        let gross_pct = pct_move.to_f64().unwrap_or(0.0);
        let net_pct = if notional.is_zero() {
            0.0
        } else {
            (net_usd / notional).to_f64().unwrap_or(0.0)
        };

        NetProfitBreakdown {
            gross_pct,
            gross_usd,
            entry_fee,
            exit_fee,
            total_fees,
            net_usd,
            net_pct,
            profitable: net_usd > Decimal::ZERO,
        }
    }
}

impl Default for FeeModel {
    fn default() -> Self {
        Self::new(HashMap::new(), 0.001)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn binance_model() -> FeeModel {
        let mut venues = HashMap::new();
        venues.insert(
            "binance".to_string(),
            VenueFees {
                maker: 0.001,
                taker: 0.001,
            },
        );
        FeeModel::new(venues, 0.001)
    }

    #[test]
    fn min_profit_pct_is_round_trip_plus_buffer() {
        let model = binance_model();
        let min_profit = model.min_profit_pct("binance");
        assert!((min_profit - 0.003).abs() < 1e-9);
    }

    #[test]
    fn take_profit_enforces_one_point_five_times_floor() {
        let model = binance_model();
        let entry = Decimal::new(100, 0);
        let (tp, effective) = model.take_profit("binance", entry, Side::Long, Some(0.0001));
        let min_profit = model.min_profit_pct("binance");
        assert!(effective >= min_profit * 1.5 - 1e-9);
        assert!(tp > entry);
    }

    #[test]
    fn take_profit_defaults_to_three_times_min_profit() {
        let model = binance_model();
        let entry = Decimal::new(100, 0);
        let (_, effective) = model.take_profit("binance", entry, Side::Long, None);
        let min_profit = model.min_profit_pct("binance");
        assert!((effective - min_profit * 3.0).abs() < 1e-9);
    }

    #[test]
    fn stop_loss_inflates_by_two_taker_fees() {
        let model = binance_model();
        let entry = Decimal::new(100, 0);
        let sl = model.stop_loss("binance", entry, Side::Long, 0.03);
        // total_loss = 0.03 + 2*0.001 = 0.032 -> sl = 100 * 0.968 = 96.8
        let expected = Decimal::new(968, 1);
        assert_eq!(sl, expected);
    }

    #[test]
    fn net_profit_zero_move_is_exact_round_trip_fee_loss() {
        let model = binance_model();
        let entry = Decimal::new(100, 0);
        let notional = Decimal::new(10, 0);
        let breakdown = model.net_profit("binance", entry, entry, notional, Side::Long);
        // -(2 * taker * notional) = -(2 * 0.001 * 10) = -0.02
        assert_eq!(breakdown.net_usd, Decimal::new(-2, 2));
        assert!(!breakdown.profitable);
    }

    #[test]
    fn scenario_e_tp_is_fee_safe() {
        let model = binance_model();
        let entry = Decimal::new(100, 0);
        let (tp, effective) = model.take_profit("binance", entry, Side::Long, None);
        assert!(effective >= 3.0 * 0.003 - 1e-9);
        let notional = Decimal::new(10, 0);
        let breakdown = model.net_profit("binance", entry, tp, notional, Side::Long);
        assert!(breakdown.profitable);
        assert!(breakdown.net_usd > Decimal::ZERO);
    }

    #[test]
    fn scenario_f_stop_loss_with_fees() {
        let model = binance_model();
        let entry = Decimal::new(100, 0);
        let sl = model.stop_loss("binance", entry, Side::Long, 0.03);
        assert_eq!(sl, Decimal::new(968, 1));
        let notional = Decimal::new(10, 0);
        let breakdown = model.net_profit("binance", entry, sl, notional, Side::Long);
        assert!(breakdown.net_pct < -0.03);
    }

    #[test]
    fn unconfigured_venue_falls_back_to_defaults() {
        let model = FeeModel::default();
        let fees = model.fees("unknown-venue");
        assert!((fees.taker - 0.001).abs() < 1e-9);
    }
}
