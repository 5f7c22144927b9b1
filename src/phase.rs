//! Phase model for the brand generation pipeline.
//!
//! This module provides:
//! - `Phase`, the fixed ordered sequence of pipeline stages
//! - `Agent`, the agent that owns each phase
//! - The static transition graph: one forward edge per non-terminal phase and
//!   at most one backward "rework" edge, never a skip

use serde::{Deserialize, Serialize};

use crate::errors::WorkflowError;

/// One ordered stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Discovery,
    Research,
    Visual,
    Logo,
    Brand,
    Assets,
    Delivery,
}

impl Phase {
    /// Canonical pipeline order.
    pub const ALL: [Phase; 7] = [
        Phase::Discovery,
        Phase::Research,
        Phase::Visual,
        Phase::Logo,
        Phase::Brand,
        Phase::Assets,
        Phase::Delivery,
    ];

    /// Phase every fresh session starts in.
    pub const INITIAL: Phase = Phase::Discovery;

    /// Phase with no outgoing edges.
    pub const TERMINAL: Phase = Phase::Delivery;

    /// Zero-based position in the canonical sequence.
    pub fn ordinal(self) -> usize {
        match self {
            Phase::Discovery => 0,
            Phase::Research => 1,
            Phase::Visual => 2,
            Phase::Logo => 3,
            Phase::Brand => 4,
            Phase::Assets => 5,
            Phase::Delivery => 6,
        }
    }

    /// The canonical successor, or `None` for the terminal phase.
    pub fn next(self) -> Option<Phase> {
        Phase::ALL.get(self.ordinal() + 1).copied()
    }

    /// The single backward edge used to send work back for rework.
    ///
    /// Discovery has nothing to return to and Delivery is final, so both
    /// return `None`.
    pub fn rework_target(self) -> Option<Phase> {
        match self {
            Phase::Discovery | Phase::Delivery => None,
            Phase::Research => Some(Phase::Discovery),
            Phase::Visual => Some(Phase::Research),
            Phase::Logo => Some(Phase::Visual),
            Phase::Brand => Some(Phase::Logo),
            Phase::Assets => Some(Phase::Brand),
        }
    }

    /// Allowed targets from this phase, forward edge first.
    pub fn successors(self) -> &'static [Phase] {
        match self {
            Phase::Discovery => &[Phase::Research],
            Phase::Research => &[Phase::Visual, Phase::Discovery],
            Phase::Visual => &[Phase::Logo, Phase::Research],
            Phase::Logo => &[Phase::Brand, Phase::Visual],
            Phase::Brand => &[Phase::Assets, Phase::Logo],
            Phase::Assets => &[Phase::Delivery, Phase::Brand],
            Phase::Delivery => &[],
        }
    }

    /// Check whether `to` is reachable from `self` in one step.
    pub fn can_transition(self, to: Phase) -> bool {
        self.successors().contains(&to)
    }

    /// Check whether moving to `to` is the backward rework edge.
    pub fn is_rework(self, to: Phase) -> bool {
        self.rework_target() == Some(to)
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::TERMINAL
    }

    /// Agent responsible for producing this phase's artifacts.
    pub fn agent(self) -> Agent {
        match self {
            Phase::Discovery => Agent::Discovery,
            Phase::Research => Agent::Research,
            Phase::Visual => Agent::VisualDirection,
            Phase::Logo => Agent::LogoGeneration,
            Phase::Brand => Agent::BrandSystem,
            Phase::Assets => Agent::AssetGeneration,
            Phase::Delivery => Agent::Coordinator,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Discovery => "discovery",
            Phase::Research => "research",
            Phase::Visual => "visual",
            Phase::Logo => "logo",
            Phase::Brand => "brand",
            Phase::Assets => "assets",
            Phase::Delivery => "delivery",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "discovery" => Ok(Phase::Discovery),
            "research" => Ok(Phase::Research),
            "visual" => Ok(Phase::Visual),
            "logo" => Ok(Phase::Logo),
            "brand" => Ok(Phase::Brand),
            "assets" => Ok(Phase::Assets),
            "delivery" => Ok(Phase::Delivery),
            _ => Err(WorkflowError::InvalidPhase(s.to_string())),
        }
    }
}

/// Agent identifiers, one per phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Agent {
    #[serde(rename = "discovery_agent")]
    Discovery,
    #[serde(rename = "research_agent")]
    Research,
    #[serde(rename = "visual_direction_agent")]
    VisualDirection,
    #[serde(rename = "logo_generation_agent")]
    LogoGeneration,
    #[serde(rename = "brand_system_agent")]
    BrandSystem,
    #[serde(rename = "asset_generation_agent")]
    AssetGeneration,
    /// Final packaging and delivery.
    #[serde(rename = "coordinator_agent")]
    Coordinator,
}

impl Agent {
    pub fn as_str(self) -> &'static str {
        match self {
            Agent::Discovery => "discovery_agent",
            Agent::Research => "research_agent",
            Agent::VisualDirection => "visual_direction_agent",
            Agent::LogoGeneration => "logo_generation_agent",
            Agent::BrandSystem => "brand_system_agent",
            Agent::AssetGeneration => "asset_generation_agent",
            Agent::Coordinator => "coordinator_agent",
        }
    }

    /// The phase this agent owns.
    pub fn phase(self) -> Phase {
        match self {
            Agent::Discovery => Phase::Discovery,
            Agent::Research => Phase::Research,
            Agent::VisualDirection => Phase::Visual,
            Agent::LogoGeneration => Phase::Logo,
            Agent::BrandSystem => Phase::Brand,
            Agent::AssetGeneration => Phase::Assets,
            Agent::Coordinator => Phase::Delivery,
        }
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_phase_follows_canonical_order() {
        assert_eq!(Phase::Discovery.next(), Some(Phase::Research));
        assert_eq!(Phase::Assets.next(), Some(Phase::Delivery));
        assert_eq!(Phase::Delivery.next(), None);
    }

    #[test]
    fn test_can_transition_to_next_for_every_phase() {
        for phase in Phase::ALL {
            if let Some(next) = phase.next() {
                assert!(phase.can_transition(next), "{phase} -> {next}");
            }
        }
    }

    #[test]
    fn test_transition_outside_adjacency_is_rejected() {
        for from in Phase::ALL {
            for to in Phase::ALL {
                let expected = from.successors().contains(&to);
                assert_eq!(from.can_transition(to), expected, "{from} -> {to}");
            }
        }
        assert!(!Phase::Discovery.can_transition(Phase::Visual));
        assert!(!Phase::Logo.can_transition(Phase::Logo));
        assert!(!Phase::Delivery.can_transition(Phase::Assets));
    }

    #[test]
    fn test_adjacency_has_one_forward_and_at_most_one_backward_edge() {
        for phase in Phase::ALL {
            let forward: Vec<_> = phase
                .successors()
                .iter()
                .filter(|p| p.ordinal() > phase.ordinal())
                .collect();
            let backward: Vec<_> = phase
                .successors()
                .iter()
                .filter(|p| p.ordinal() < phase.ordinal())
                .collect();

            if phase.is_terminal() {
                assert!(forward.is_empty());
            } else {
                assert_eq!(forward, vec![&phase.next().unwrap()]);
            }
            assert!(backward.len() <= 1);
            for target in backward {
                assert_eq!(target.ordinal() + 1, phase.ordinal(), "no skips");
                assert!(phase.is_rework(*target));
            }
        }
    }

    #[test]
    fn test_rework_targets() {
        assert_eq!(Phase::Discovery.rework_target(), None);
        assert_eq!(Phase::Visual.rework_target(), Some(Phase::Research));
        assert_eq!(Phase::Delivery.rework_target(), None);
    }

    #[test]
    fn test_responsible_agents() {
        assert_eq!(Phase::Visual.agent(), Agent::VisualDirection);
        assert_eq!(Phase::Delivery.agent().as_str(), "coordinator_agent");
        for phase in Phase::ALL {
            assert_eq!(phase.agent().phase(), phase);
        }
    }

    #[test]
    fn test_phase_parse_roundtrip_and_invalid() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert_eq!("Research".parse::<Phase>().unwrap(), Phase::Research);
        let err = "launch".parse::<Phase>().unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidPhase(ref v) if v == "launch"));
    }

    #[test]
    fn test_serde_uses_wire_names() {
        assert_eq!(serde_json::to_string(&Phase::Logo).unwrap(), "\"logo\"");
        assert_eq!(
            serde_json::to_string(&Agent::AssetGeneration).unwrap(),
            "\"asset_generation_agent\""
        );
        let agent: Agent = serde_json::from_str("\"brand_system_agent\"").unwrap();
        assert_eq!(agent, Agent::BrandSystem);
    }
}
