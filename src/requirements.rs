//! Artifact requirements per phase.
//!
//! Two static tables:
//! - completion requirements: artifacts that must exist before a phase is
//!   complete
//! - start preconditions: artifacts a phase's agent needs before it may run
//!
//! Completeness is existence-based. An empty artifact still counts as
//! present; whether it is good enough is decided by the quality gates.

use crate::phase::Phase;
use crate::session::{SessionState, StateKey};

/// Artifacts that must exist before `phase` is complete.
pub fn completion_requirements(phase: Phase) -> &'static [StateKey] {
    match phase {
        Phase::Discovery => &[StateKey::ClientBrief],
        Phase::Research => &[StateKey::MarketResearch],
        Phase::Visual => &[StateKey::VisualDirection],
        Phase::Logo => &[StateKey::SelectedLogo],
        Phase::Brand => &[StateKey::BrandSystem],
        Phase::Assets => &[StateKey::FinalAssets],
        Phase::Delivery => &[],
    }
}

/// Artifacts the phase's agent needs before it can start.
pub fn start_preconditions(phase: Phase) -> &'static [StateKey] {
    match phase {
        Phase::Discovery => &[],
        Phase::Research => &[StateKey::ClientBrief],
        Phase::Visual => &[StateKey::ClientBrief, StateKey::MarketResearch],
        Phase::Logo => &[StateKey::VisualDirection],
        Phase::Brand => &[StateKey::SelectedLogo],
        Phase::Assets => &[StateKey::BrandSystem],
        Phase::Delivery => &[],
    }
}

/// Every artifact a phase produces, including intermediate ones.
///
/// Used when a rework clears a phase's output.
pub fn produced_artifacts(phase: Phase) -> &'static [StateKey] {
    match phase {
        Phase::Logo => &[StateKey::GeneratedLogos, StateKey::SelectedLogo],
        other => completion_requirements(other),
    }
}

/// Required artifacts for `phase` that are absent or null, in table order.
pub fn missing_requirements(state: &SessionState, phase: Phase) -> Vec<StateKey> {
    missing_from(state, completion_requirements(phase))
}

pub fn is_phase_complete(state: &SessionState, phase: Phase) -> bool {
    missing_requirements(state, phase).is_empty()
}

/// Start preconditions for `phase` that are absent or null.
pub fn missing_start_preconditions(state: &SessionState, phase: Phase) -> Vec<StateKey> {
    missing_from(state, start_preconditions(phase))
}

/// Check whether the agent owning `phase` may be triggered.
pub fn can_start(state: &SessionState, phase: Phase) -> bool {
    missing_start_preconditions(state, phase).is_empty()
}

fn missing_from(state: &SessionState, keys: &[StateKey]) -> Vec<StateKey> {
    keys.iter()
        .copied()
        .filter(|key| !state.contains(*key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_missing_requirements_absent_key() {
        let state = SessionState::new();
        assert_eq!(
            missing_requirements(&state, Phase::Discovery),
            vec![StateKey::ClientBrief]
        );
        assert!(!is_phase_complete(&state, Phase::Discovery));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let mut state = SessionState::new();
        state.set(StateKey::MarketResearch, Value::Null);
        assert_eq!(
            missing_requirements(&state, Phase::Research),
            vec![StateKey::MarketResearch]
        );
    }

    #[test]
    fn test_empty_artifact_counts_as_present() {
        let mut state = SessionState::new();
        state.set(StateKey::FinalAssets, json!([]));
        state.set(StateKey::SelectedLogo, json!({}));
        assert!(is_phase_complete(&state, Phase::Assets));
        assert!(is_phase_complete(&state, Phase::Logo));
    }

    #[test]
    fn test_missing_requirements_is_idempotent() {
        let mut state = SessionState::new();
        state.set(StateKey::ClientBrief, json!({"company_info": "Acme"}));
        for phase in Phase::ALL {
            let first = missing_requirements(&state, phase);
            let second = missing_requirements(&state, phase);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_delivery_has_no_requirements() {
        assert!(is_phase_complete(&SessionState::new(), Phase::Delivery));
    }

    #[test]
    fn test_start_preconditions() {
        let mut state = SessionState::new();
        assert!(can_start(&state, Phase::Discovery));
        assert!(!can_start(&state, Phase::Research));

        state.set(StateKey::ClientBrief, json!({"company_info": "Acme"}));
        assert!(can_start(&state, Phase::Research));
        assert_eq!(
            missing_start_preconditions(&state, Phase::Visual),
            vec![StateKey::MarketResearch]
        );
        assert!(can_start(&state, Phase::Delivery));
    }

    #[test]
    fn test_logo_produces_candidates_and_selection() {
        assert_eq!(
            produced_artifacts(Phase::Logo),
            &[StateKey::GeneratedLogos, StateKey::SelectedLogo]
        );
        assert_eq!(produced_artifacts(Phase::Brand), &[StateKey::BrandSystem]);
    }
}
