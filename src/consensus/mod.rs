// =============================================================================
// Consensus Module
// =============================================================================
//
// The Multi-Agent Consensus Engine: a pluggable agent zoo (`agent`,
// `strategies`) fused by weighted voting (`engine`) into a single trade
// decision per symbol.

pub mod agent;
pub mod engine;
pub mod strategies;

pub use agent::{AgentPort, AgentStrategy, AgentVote};
pub use engine::{ConsensusEngine, ConsensusResult, ScoreMap};
