// =============================================================================
// ConsensusEngine — per-round weighted voting across the agent zoo
// =============================================================================
//
// Ported from `original_source/ai/agents/multi_agent_system.py`
// (`MultiAgentSystem::analyze_market_consensus` / `_calculate_consensus`).
// Agent weights are owned here; the bounded decision history persists
// across rounds, everything else is stateless per round.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{MarketSnapshot, Signal};

use super::agent::{AgentPort, AgentVote};

const MAX_DECISION_HISTORY: usize = 1000;
const DEFAULT_CONSENSUS_THRESHOLD: f64 = 0.65;
const DEFAULT_MIN_AGENTS_VOTING: usize = 2;
const VOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-outcome normalized score map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreMap {
    pub buy: f64,
    pub sell: f64,
    pub hold: f64,
}

/// The outcome of one consensus round for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum ConsensusResult {
    Decision {
        symbol: String,
        signal: Signal,
        confidence: f64,
        scores: ScoreMap,
        vote_tally: HashMap<String, usize>,
        supporting_agents: Vec<String>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    NoConsensus {
        symbol: String,
        reason: String,
        scores: Option<ScoreMap>,
        vote_tally: HashMap<String, usize>,
        timestamp: DateTime<Utc>,
    },
}

impl ConsensusResult {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Decision { timestamp, .. } => *timestamp,
            Self::NoConsensus { timestamp, .. } => *timestamp,
        }
    }
}

struct Inner {
    weights: HashMap<String, f64>,
    history: VecDeque<ConsensusResult>,
}

/// Aggregates AgentVote outputs into one weighted decision per symbol.
pub struct ConsensusEngine {
    agents: Vec<Arc<dyn AgentPort>>,
    consensus_threshold: f64,
    min_agents_voting: usize,
    inner: RwLock<Inner>,
}

impl ConsensusEngine {
    pub fn new(
        agents: Vec<Arc<dyn AgentPort>>,
        consensus_threshold: f64,
        min_agents_voting: usize,
    ) -> Self {
        let mut weights = HashMap::new();
        for agent in &agents {
            weights.insert(agent.agent_id().to_string(), 1.0);
        }
        Self {
            agents,
            consensus_threshold,
            min_agents_voting,
            inner: RwLock::new(Inner {
                weights,
                history: VecDeque::with_capacity(MAX_DECISION_HISTORY),
            }),
        }
    }

    pub fn with_defaults(agents: Vec<Arc<dyn AgentPort>>) -> Self {
        Self::new(
            agents,
            DEFAULT_CONSENSUS_THRESHOLD,
            DEFAULT_MIN_AGENTS_VOTING,
        )
    }

    /// Live weight update; subsequent rounds see the new weight.
    pub fn update_weight(&self, agent_id: &str, new_weight: f64) {
        let mut inner = self.inner.write();
        let before = inner.weights.get(agent_id).copied();
        inner.weights.insert(agent_id.to_string(), new_weight);
        info!(agent_id, ?before, new_weight, "agent weight updated");
    }

    pub fn weight_of(&self, agent_id: &str) -> Option<f64> {
        self.inner.read().weights.get(agent_id).copied()
    }

    /// Run one consensus round for `snapshot`. Agents that fail or time out
    /// are skipped and logged; their absence never aborts the round.
    pub async fn analyze(&self, snapshot: &MarketSnapshot) -> ConsensusResult {
        if self.agents.is_empty() {
            let result = ConsensusResult::NoConsensus {
                symbol: snapshot.symbol.clone(),
                reason: "no agents".to_string(),
                scores: None,
                vote_tally: HashMap::new(),
                timestamp: Utc::now(),
            };
            self.record(result.clone());
            return result;
        }

        let mut votes = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let weight = self
                .weight_of(agent.agent_id())
                .unwrap_or(1.0);

            match tokio::time::timeout(VOTE_TIMEOUT, agent.analyze(snapshot)).await {
                Ok(Ok(mut vote)) => {
                    vote.weight = weight;
                    votes.push(vote);
                }
                Ok(Err(err)) => {
                    warn!(agent_id = agent.agent_id(), error = %err, "agent vote failed, skipping");
                }
                Err(_) => {
                    warn!(agent_id = agent.agent_id(), "agent vote timed out, skipping");
                }
            }
        }

        if votes.len() < self.min_agents_voting {
            let result = ConsensusResult::NoConsensus {
                symbol: snapshot.symbol.clone(),
                reason: "insufficient votes".to_string(),
                scores: None,
                vote_tally: tally(&votes),
                timestamp: Utc::now(),
            };
            self.record(result.clone());
            return result;
        }

        let result = self.calculate_consensus(&snapshot.symbol, &votes);
        self.record(result.clone());
        result
    }

    fn calculate_consensus(&self, symbol: &str, votes: &[AgentVote]) -> ConsensusResult {
        let mut weighted = HashMap::from([
            (Signal::Buy, 0.0_f64),
            (Signal::Sell, 0.0_f64),
            (Signal::Hold, 0.0_f64),
        ]);
        let mut total_weight = 0.0_f64;

        for vote in votes {
            *weighted.get_mut(&vote.signal).unwrap() += vote.weighted_confidence();
            total_weight += vote.weight;
        }

        let normalize = |s: Signal| -> f64 {
            if total_weight <= 0.0 {
                0.0
            } else {
                weighted[&s] / total_weight
            }
        };

        let scores = ScoreMap {
            buy: normalize(Signal::Buy),
            sell: normalize(Signal::Sell),
            hold: normalize(Signal::Hold),
        };

        let (winner, winner_score) = [
            (Signal::Buy, scores.buy),
            (Signal::Sell, scores.sell),
            (Signal::Hold, scores.hold),
        ]
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap();

        let tally = tally(votes);

        if winner_score < self.consensus_threshold {
            return ConsensusResult::NoConsensus {
                symbol: symbol.to_string(),
                reason: format!(
                    "winner {winner} scored {winner_score:.3} < threshold {:.3}",
                    self.consensus_threshold
                ),
                scores: Some(scores),
                vote_tally: tally,
                timestamp: Utc::now(),
            };
        }

        let mut supporters: Vec<&AgentVote> =
            votes.iter().filter(|v| v.signal == winner).collect();
        supporters.sort_by(|a, b| {
            b.weighted_confidence()
                .partial_cmp(&a.weighted_confidence())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let reason = supporters
            .iter()
            .take(3)
            .map(|v| v.reason.as_str())
            .collect::<Vec<_>>()
            .join(" | ");

        let supporting_agents = supporters.iter().map(|v| v.agent_id.clone()).collect();

        ConsensusResult::Decision {
            symbol: symbol.to_string(),
            signal: winner,
            confidence: winner_score,
            scores,
            vote_tally: tally,
            supporting_agents,
            reason,
            timestamp: Utc::now(),
        }
    }

    fn record(&self, result: ConsensusResult) {
        let mut inner = self.inner.write();
        inner.history.push_back(result);
        if inner.history.len() > MAX_DECISION_HISTORY {
            inner.history.pop_front();
        }
    }

    pub fn decision_history(&self, limit: usize) -> Vec<ConsensusResult> {
        let inner = self.inner.read();
        inner.history.iter().rev().take(limit).cloned().collect()
    }
}

fn tally(votes: &[AgentVote]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for vote in votes {
        *counts.entry(vote.signal.to_string()).or_insert(0) += 1;
    }
    counts
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc as ChronoUtc;

    use crate::errors::EngineError;
    use super::super::agent::AgentStrategy;

    struct FixedAgent {
        id: String,
        signal: Signal,
        confidence: f64,
        reason: String,
    }

    #[async_trait]
    impl AgentPort for FixedAgent {
        fn agent_id(&self) -> &str {
            &self.id
        }

        fn strategy(&self) -> AgentStrategy {
            AgentStrategy::Scalping
        }

        async fn analyze(&self, _snapshot: &MarketSnapshot) -> Result<AgentVote, EngineError> {
            Ok(AgentVote {
                agent_id: self.id.clone(),
                signal: self.signal,
                confidence: self.confidence,
                weight: 1.0,
                reason: self.reason.clone(),
                indicators: None,
            })
        }
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            closes: vec![100.0; 40],
            highs: vec![101.0; 40],
            lows: vec![99.0; 40],
            volumes: vec![10.0; 40],
            timestamp: ChronoUtc::now(),
        }
    }

    fn agent(id: &str, signal: Signal, confidence: f64) -> Arc<dyn AgentPort> {
        Arc::new(FixedAgent {
            id: id.to_string(),
            signal,
            confidence,
            reason: format!("{id} says {signal}"),
        })
    }

    #[tokio::test]
    async fn zero_agents_yields_no_consensus_reason_no_agents() {
        let engine = ConsensusEngine::with_defaults(vec![]);
        let result = engine.analyze(&snapshot()).await;
        match result {
            ConsensusResult::NoConsensus { reason, .. } => assert_eq!(reason, "no agents"),
            other => panic!("expected NoConsensus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scenario_d_below_threshold_is_no_consensus() {
        let agents = vec![
            agent("a1", Signal::Buy, 0.9),
            agent("a2", Signal::Buy, 0.8),
            agent("a3", Signal::Buy, 0.6),
            agent("a4", Signal::Sell, 0.9),
        ];
        let engine = ConsensusEngine::with_defaults(agents);
        let result = engine.analyze(&snapshot()).await;
        match result {
            ConsensusResult::NoConsensus { scores, .. } => {
                let scores = scores.unwrap();
                assert!((scores.buy - 0.575).abs() < 1e-9);
                assert!((scores.sell - 0.225).abs() < 1e-9);
            }
            other => panic!("expected NoConsensus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn strong_majority_yields_decision_above_threshold() {
        let agents = vec![
            agent("a1", Signal::Buy, 0.95),
            agent("a2", Signal::Buy, 0.9),
            agent("a3", Signal::Buy, 0.85),
        ];
        let engine = ConsensusEngine::with_defaults(agents);
        let result = engine.analyze(&snapshot()).await;
        match result {
            ConsensusResult::Decision {
                signal, confidence, ..
            } => {
                assert_eq!(signal, Signal::Buy);
                assert!(confidence >= 0.65);
            }
            other => panic!("expected Decision, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn insufficient_votes_yields_no_consensus() {
        let agents = vec![agent("a1", Signal::Buy, 0.95)];
        let engine = ConsensusEngine::with_defaults(agents);
        let result = engine.analyze(&snapshot()).await;
        match result {
            ConsensusResult::NoConsensus { reason, .. } => {
                assert_eq!(reason, "insufficient votes");
            }
            other => panic!("expected NoConsensus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_hold_yields_hold_decision() {
        let agents = vec![
            agent("a1", Signal::Hold, 0.99),
            agent("a2", Signal::Hold, 0.99),
        ];
        let engine = ConsensusEngine::with_defaults(agents);
        let result = engine.analyze(&snapshot()).await;
        match result {
            ConsensusResult::Decision { signal, .. } => assert_eq!(signal, Signal::Hold),
            other => panic!("expected Decision, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_weight_is_visible_next_round() {
        let agents = vec![agent("a1", Signal::Buy, 0.9), agent("a2", Signal::Sell, 0.9)];
        let engine = ConsensusEngine::with_defaults(agents);
        engine.update_weight("a1", 2.0);
        assert_eq!(engine.weight_of("a1"), Some(2.0));
    }

    #[tokio::test]
    async fn decision_history_is_bounded_and_recorded() {
        let agents = vec![agent("a1", Signal::Buy, 0.9), agent("a2", Signal::Buy, 0.9)];
        let engine = ConsensusEngine::with_defaults(agents);
        engine.analyze(&snapshot()).await;
        engine.analyze(&snapshot()).await;
        assert_eq!(engine.decision_history(10).len(), 2);
    }
}
