use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::{Agent, Phase};
use crate::session::StateKey;

/// Direction of a phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    /// Forward along the canonical sequence.
    Advance,
    /// Back along the single rework edge.
    Rework,
}

/// Audit entry appended to `transition_history` for every applied move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub timestamp: DateTime<Utc>,
    /// Agent that owns the target phase.
    pub agent: Agent,
    pub kind: TransitionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Artifacts reset to null by a clearing rework.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleared_artifacts: Vec<StateKey>,
}

impl TransitionRecord {
    pub fn new(from: Phase, to: Phase, kind: TransitionKind) -> Self {
        Self {
            from_phase: from,
            to_phase: to,
            timestamp: Utc::now(),
            agent: to.agent(),
            kind,
            reason: None,
            cleared_artifacts: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

/// Why a transition was refused. Always names what is outstanding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRejection {
    pub from_phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_phase: Option<Phase>,
    pub reason: String,
    #[serde(default)]
    pub missing_requirements: Vec<StateKey>,
    #[serde(default)]
    pub failed_gates: Vec<String>,
}

/// Result of a transition request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Completed(TransitionRecord),
    Rejected(TransitionRejection),
}

impl TransitionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransitionOutcome::Completed(_))
    }

    pub fn record(&self) -> Option<&TransitionRecord> {
        match self {
            TransitionOutcome::Completed(record) => Some(record),
            TransitionOutcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&TransitionRejection> {
        match self {
            TransitionOutcome::Completed(_) => None,
            TransitionOutcome::Rejected(rejection) => Some(rejection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_agent_follows_target_phase() {
        let record = TransitionRecord::new(Phase::Visual, Phase::Logo, TransitionKind::Advance);
        assert_eq!(record.agent, Agent::LogoGeneration);
        assert!(record.reason.is_none());
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = TransitionOutcome::Rejected(TransitionRejection {
            from_phase: Phase::Discovery,
            requested_phase: Some(Phase::Research),
            reason: "Missing requirements: client_brief".into(),
            missing_requirements: vec![StateKey::ClientBrief],
            failed_gates: vec!["brief_completeness".into()],
        });
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], json!("rejected"));
        assert_eq!(value["missing_requirements"], json!(["client_brief"]));
        assert!(!outcome.is_completed());
        assert!(outcome.record().is_none());
    }

    #[test]
    fn test_completed_outcome_flattens_record() {
        let record = TransitionRecord::new(Phase::Discovery, Phase::Research, TransitionKind::Advance);
        let value = serde_json::to_value(TransitionOutcome::Completed(record)).unwrap();
        assert_eq!(value["status"], json!("completed"));
        assert_eq!(value["to_phase"], json!("research"));
        assert_eq!(value["agent"], json!("research_agent"));
        assert!(value.get("cleared_artifacts").is_none());
    }
}
