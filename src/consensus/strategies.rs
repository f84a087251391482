// =============================================================================
// Concrete agent strategies — the agent zoo
// =============================================================================
//
// Five distinct AgentPort implementations, one per strategy named in the
// agent registry. Each borrows its detection technique from a specific
// teacher indicator module, recomputed directly against the MarketSnapshot
// (the only input an AgentPort is allowed per its port contract) rather than
// the teacher's live streaming state (CandleBuffer / trade stream / order
// book), which is not part of a MarketSnapshot.

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::indicators::adx::calculate_adx;
use crate::indicators::atr::calculate_atr;
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::ema::ema_trend_aligned;
use crate::indicators::roc::current_roc;
use crate::indicators::rsi::current_rsi;
use crate::market_data::Candle;
use crate::types::{MarketSnapshot, Signal};

use super::agent::{AgentPort, AgentStrategy, AgentVote};

/// Turn parallel OHLCV series into a `Candle` slice so ADX/ATR (which are
/// written against `market_data::Candle`) can be reused as-is.
fn snapshot_to_candles(snapshot: &MarketSnapshot) -> Vec<Candle> {
    let n = snapshot.closes.len();
    (0..n)
        .map(|i| {
            let open = if i == 0 {
                snapshot.closes[0]
            } else {
                snapshot.closes[i - 1]
            };
            Candle {
                open_time: 0,
                close_time: 0,
                open,
                high: snapshot.highs[i],
                low: snapshot.lows[i],
                close: snapshot.closes[i],
                volume: snapshot.volumes[i],
                quote_volume: 0.0,
                trades_count: 0,
                taker_buy_volume: 0.0,
                taker_buy_quote_volume: 0.0,
                is_closed: true,
            }
        })
        .collect()
}

fn insufficient_data(agent_id: &str) -> EngineError {
    EngineError::AgentFailure {
        agent_id: agent_id.to_string(),
        reason: "insufficient market data".to_string(),
    }
}

/// Fast mean-reverting entries: a short-horizon RSI extreme confirmed by a
/// tight Bollinger band touch.
pub struct ScalpingAgent {
    id: String,
    weight: f64,
}

impl ScalpingAgent {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
        }
    }
}

#[async_trait]
impl AgentPort for ScalpingAgent {
    fn agent_id(&self) -> &str {
        &self.id
    }

    fn strategy(&self) -> AgentStrategy {
        AgentStrategy::Scalping
    }

    async fn analyze(&self, snapshot: &MarketSnapshot) -> Result<AgentVote, EngineError> {
        let (rsi, _) = current_rsi(&snapshot.closes, 7).ok_or_else(|| insufficient_data(&self.id))?;
        let bb = calculate_bollinger(&snapshot.closes, 20, 2.0).ok_or_else(|| insufficient_data(&self.id))?;
        let last = snapshot.last_close().ok_or_else(|| insufficient_data(&self.id))?;

        let touching_lower = last <= bb.lower * 1.002;
        let touching_upper = last >= bb.upper * 0.998;

        let (signal, confidence, reason) = if rsi <= 25.0 && touching_lower {
            (Signal::Buy, ((30.0 - rsi) / 30.0).clamp(0.5, 0.95), format!(
                "scalp: RSI7={rsi:.1} oversold at lower band"
            ))
        } else if rsi >= 75.0 && touching_upper {
            (Signal::Sell, ((rsi - 70.0) / 30.0).clamp(0.5, 0.95), format!(
                "scalp: RSI7={rsi:.1} overbought at upper band"
            ))
        } else {
            (Signal::Hold, 0.3, "scalp: no band extreme".to_string())
        };

        Ok(AgentVote {
            agent_id: self.id.clone(),
            signal,
            confidence,
            weight: self.weight,
            reason,
            indicators: None,
        })
    }
}

/// EMA9/21/55 alignment rule: trades with the trend once all three moving
/// averages stack in the same order.
pub struct TrendFollowingAgent {
    id: String,
    weight: f64,
}

impl TrendFollowingAgent {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
        }
    }
}

#[async_trait]
impl AgentPort for TrendFollowingAgent {
    fn agent_id(&self) -> &str {
        &self.id
    }

    fn strategy(&self) -> AgentStrategy {
        AgentStrategy::TrendFollowing
    }

    async fn analyze(&self, snapshot: &MarketSnapshot) -> Result<AgentVote, EngineError> {
        let (bullish, strength) =
            ema_trend_aligned(&snapshot.closes).ok_or_else(|| insufficient_data(&self.id))?;

        let confidence = (strength * 10.0).clamp(0.4, 0.95);
        let signal = if bullish { Signal::Buy } else { Signal::Sell };
        let reason = format!(
            "trend: EMA9/21/55 {} aligned, strength={strength:.4}",
            if bullish { "bullish" } else { "bearish" }
        );

        Ok(AgentVote {
            agent_id: self.id.clone(),
            signal,
            confidence,
            weight: self.weight,
            reason,
            indicators: None,
        })
    }
}

/// RSI extremes outside the Bollinger bands anticipate a reversion toward
/// the band midline.
pub struct MeanReversionAgent {
    id: String,
    weight: f64,
}

impl MeanReversionAgent {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
        }
    }
}

#[async_trait]
impl AgentPort for MeanReversionAgent {
    fn agent_id(&self) -> &str {
        &self.id
    }

    fn strategy(&self) -> AgentStrategy {
        AgentStrategy::MeanReversion
    }

    async fn analyze(&self, snapshot: &MarketSnapshot) -> Result<AgentVote, EngineError> {
        let (rsi, _) = current_rsi(&snapshot.closes, 14).ok_or_else(|| insufficient_data(&self.id))?;
        let bb = calculate_bollinger(&snapshot.closes, 20, 2.0).ok_or_else(|| insufficient_data(&self.id))?;
        let last = snapshot.last_close().ok_or_else(|| insufficient_data(&self.id))?;

        let extension = ((last - bb.middle) / bb.middle).abs();

        let (signal, confidence, reason) = if rsi >= 70.0 && last > bb.upper {
            (
                Signal::Sell,
                (extension * 5.0 + (rsi - 70.0) / 60.0).clamp(0.4, 0.9),
                format!("mean-reversion: RSI={rsi:.1} above upper band, expect pullback"),
            )
        } else if rsi <= 30.0 && last < bb.lower {
            (
                Signal::Buy,
                (extension * 5.0 + (30.0 - rsi) / 60.0).clamp(0.4, 0.9),
                format!("mean-reversion: RSI={rsi:.1} below lower band, expect bounce"),
            )
        } else {
            (Signal::Hold, 0.3, "mean-reversion: price within bands".to_string())
        };

        Ok(AgentVote {
            agent_id: self.id.clone(),
            signal,
            confidence,
            weight: self.weight,
            reason,
            indicators: None,
        })
    }
}

/// ROC direction confirmed by ADX trend strength.
pub struct MomentumAgent {
    id: String,
    weight: f64,
}

impl MomentumAgent {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
        }
    }
}

#[async_trait]
impl AgentPort for MomentumAgent {
    fn agent_id(&self) -> &str {
        &self.id
    }

    fn strategy(&self) -> AgentStrategy {
        AgentStrategy::Momentum
    }

    async fn analyze(&self, snapshot: &MarketSnapshot) -> Result<AgentVote, EngineError> {
        let roc = current_roc(&snapshot.closes, 14).ok_or_else(|| insufficient_data(&self.id))?;
        let candles = snapshot_to_candles(snapshot);
        let adx = calculate_adx(&candles, 14).unwrap_or(0.0);

        let trend_ok = adx > 20.0;
        let confidence_base = (adx / 50.0).clamp(0.0, 1.0);

        let (signal, confidence, reason) = if roc > 0.5 && trend_ok {
            (Signal::Buy, confidence_base.clamp(0.4, 0.9), format!(
                "momentum: ROC14={roc:.2}% with ADX={adx:.1}"
            ))
        } else if roc < -0.5 && trend_ok {
            (Signal::Sell, confidence_base.clamp(0.4, 0.9), format!(
                "momentum: ROC14={roc:.2}% with ADX={adx:.1}"
            ))
        } else {
            (Signal::Hold, 0.3, format!("momentum: weak ROC={roc:.2}% or ADX={adx:.1}"))
        };

        Ok(AgentVote {
            agent_id: self.id.clone(),
            signal,
            confidence,
            weight: self.weight,
            reason,
            indicators: None,
        })
    }
}

/// A structural break, approximated as a volatility-adjusted (ATR-scaled)
/// breakout beyond the Bollinger band.
pub struct BreakoutAgent {
    id: String,
    weight: f64,
}

impl BreakoutAgent {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
        }
    }
}

#[async_trait]
impl AgentPort for BreakoutAgent {
    fn agent_id(&self) -> &str {
        &self.id
    }

    fn strategy(&self) -> AgentStrategy {
        AgentStrategy::Breakout
    }

    async fn analyze(&self, snapshot: &MarketSnapshot) -> Result<AgentVote, EngineError> {
        let bb = calculate_bollinger(&snapshot.closes, 20, 2.0).ok_or_else(|| insufficient_data(&self.id))?;
        let last = snapshot.last_close().ok_or_else(|| insufficient_data(&self.id))?;
        let candles = snapshot_to_candles(snapshot);
        let atr = calculate_atr(&candles, 14).unwrap_or(0.0);

        if atr <= 0.0 {
            return Err(insufficient_data(&self.id));
        }

        let break_distance_atr = if last > bb.upper {
            (last - bb.upper) / atr
        } else if last < bb.lower {
            (bb.lower - last) / atr
        } else {
            0.0
        };

        let (signal, confidence, reason) = if last > bb.upper && break_distance_atr > 0.1 {
            (
                Signal::Buy,
                (0.5 + break_distance_atr).clamp(0.4, 0.95),
                format!("breakout: price {break_distance_atr:.2} ATR above upper band"),
            )
        } else if last < bb.lower && break_distance_atr > 0.1 {
            (
                Signal::Sell,
                (0.5 + break_distance_atr).clamp(0.4, 0.95),
                format!("breakout: price {break_distance_atr:.2} ATR below lower band"),
            )
        } else {
            (Signal::Hold, 0.3, "breakout: no structural break".to_string())
        };

        Ok(AgentVote {
            agent_id: self.id.clone(),
            signal,
            confidence,
            weight: self.weight,
            reason,
            indicators: None,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot_from(closes: Vec<f64>) -> MarketSnapshot {
        let highs = closes.iter().map(|c| c * 1.01).collect();
        let lows = closes.iter().map(|c| c * 0.99).collect();
        let volumes = vec![100.0; closes.len()];
        MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            closes,
            highs,
            lows,
            volumes,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn trend_agent_buys_on_sustained_uptrend() {
        let closes: Vec<f64> = (1..=200).map(|i| i as f64).collect();
        let agent = TrendFollowingAgent::new("g2_tendencia", 1.0);
        let vote = agent.analyze(&snapshot_from(closes)).await.unwrap();
        assert_eq!(vote.signal, Signal::Buy);
        assert!(vote.confidence > 0.0);
    }

    #[tokio::test]
    async fn trend_agent_fails_on_insufficient_data() {
        let agent = TrendFollowingAgent::new("g2_tendencia", 1.0);
        let result = agent.analyze(&snapshot_from(vec![1.0, 2.0, 3.0])).await;
        assert!(matches!(result, Err(EngineError::AgentFailure { .. })));
    }

    #[tokio::test]
    async fn scalping_agent_holds_on_flat_market() {
        let closes = vec![100.0; 40];
        let agent = ScalpingAgent::new("g1_scalp", 1.0);
        let vote = agent.analyze(&snapshot_from(closes)).await.unwrap();
        assert_eq!(vote.signal, Signal::Hold);
    }

    #[tokio::test]
    async fn mean_reversion_buys_on_deep_oversold() {
        let mut closes: Vec<f64> = (0..40).map(|_| 100.0).collect();
        for (i, c) in closes.iter_mut().enumerate().skip(20) {
            *c = 100.0 - (i as f64 - 19.0) * 3.0;
        }
        let agent = MeanReversionAgent::new("g1_backup_hot", 0.8);
        let vote = agent.analyze(&snapshot_from(closes)).await.unwrap();
        assert_eq!(vote.signal, Signal::Buy);
    }
}
