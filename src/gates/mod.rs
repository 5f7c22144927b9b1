//! Quality gates evaluated before a phase may be left.
//!
//! A gate is a named scorer plus a pass threshold. Scorers are injected
//! through the [`Scorer`] trait so a mock, heuristic or LLM-backed scorer can
//! be swapped without touching the evaluator.
//!
//! ## Components
//!
//! - [`scorers`]: built-in field-coverage and best-candidate scorers
//! - [`standards`]: per-phase quality standards and quality escalation
//!
//! ## Example
//!
//! ```
//! use brandflow::gates::GateRegistry;
//! use brandflow::phase::Phase;
//! use brandflow::session::SessionState;
//! use serde_json::json;
//!
//! let registry = GateRegistry::reference();
//! let mut state = SessionState::new();
//! let updates = json!({
//!     "client_brief": {
//!         "company_info": "Acme",
//!         "target_audience": "makers",
//!         "style_preferences": ["bold"],
//!     }
//! });
//! state.merge(updates.as_object().cloned().unwrap_or_default()).unwrap();
//!
//! let result = registry.evaluate_phase(Phase::Discovery, &state);
//! assert!(result.overall_passed);
//! ```

pub mod scorers;
pub mod standards;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::phase::Phase;
use crate::session::SessionState;

pub use scorers::{BestCandidate, FieldCoverage};
pub use standards::{MetricEvaluator, QualityEvaluation, QualityStandards};

/// Abstraction over gate scoring.
///
/// Implementations must be pure functions of the state: no side effects,
/// and a score in `0.0..=1.0`. Returning an error marks the gate as failed
/// with a zero score; it never aborts the evaluation of sibling gates.
pub trait Scorer: Send + Sync {
    fn score(&self, state: &SessionState) -> Result<f64>;
}

impl<F> Scorer for F
where
    F: Fn(&SessionState) -> Result<f64> + Send + Sync,
{
    fn score(&self, state: &SessionState) -> Result<f64> {
        self(state)
    }
}

/// A named, thresholded scoring check.
#[derive(Clone)]
pub struct QualityGate {
    pub name: String,
    pub threshold: f64,
    scorer: Arc<dyn Scorer>,
}

impl std::fmt::Debug for QualityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityGate")
            .field("name", &self.name)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl QualityGate {
    /// Create a gate. Fails when the threshold lies outside `0.0..=1.0`.
    pub fn new(name: &str, threshold: f64, scorer: impl Scorer + 'static) -> Result<Self> {
        validate_threshold(name, threshold)?;
        Ok(Self {
            name: name.to_string(),
            threshold,
            scorer: Arc::new(scorer),
        })
    }

    /// Run the scorer, converting any failure into a failed result.
    pub fn evaluate(&self, state: &SessionState) -> GateResult {
        match self.scorer.score(state) {
            Ok(score) if (0.0..=1.0).contains(&score) => GateResult {
                gate_name: self.name.clone(),
                score,
                passed: score >= self.threshold,
                threshold: self.threshold,
                error: None,
            },
            Ok(score) => self.failed(format!("score {score} is outside 0.0..=1.0")),
            Err(e) => self.failed(format!("{e:#}")),
        }
    }

    fn failed(&self, error: String) -> GateResult {
        warn!(gate = %self.name, %error, "quality gate scorer failed");
        GateResult {
            gate_name: self.name.clone(),
            score: 0.0,
            passed: false,
            threshold: self.threshold,
            error: Some(error),
        }
    }
}

fn validate_threshold(name: &str, threshold: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        bail!(
            "Invalid threshold {} for gate '{}'. Thresholds must be between 0.0 and 1.0",
            threshold,
            name
        );
    }
    Ok(())
}

/// Outcome of a single gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate_name: String,
    pub score: f64,
    pub passed: bool,
    pub threshold: f64,
    /// Scorer failure, if the score could not be computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of every gate registered for a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseGateResult {
    pub phase: Phase,
    pub gates: Vec<GateResult>,
    pub overall_passed: bool,
    pub total_gates: usize,
    pub passed_gates: usize,
}

impl PhaseGateResult {
    /// Names of the gates that did not pass.
    pub fn failed_gates(&self) -> Vec<String> {
        self.gates
            .iter()
            .filter(|g| !g.passed)
            .map(|g| g.gate_name.clone())
            .collect()
    }
}

/// Immutable per-phase gate configuration, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct GateRegistry {
    gates: HashMap<Phase, Vec<QualityGate>>,
}

impl GateRegistry {
    /// A registry with no gates; every phase trivially passes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The reference gate set.
    pub fn reference() -> Self {
        use crate::session::StateKey;

        let mut registry = Self::empty();
        registry.register(
            Phase::Discovery,
            "brief_completeness",
            0.8,
            FieldCoverage::new(
                StateKey::ClientBrief,
                &["company_info", "target_audience", "style_preferences"],
            ),
        );
        registry.register(
            Phase::Research,
            "research_depth",
            0.7,
            FieldCoverage::new(
                StateKey::MarketResearch,
                &["competitors", "industry_trends", "swot_analysis"],
            ),
        );
        registry.register(
            Phase::Visual,
            "visual_coherence",
            0.8,
            FieldCoverage::new(
                StateKey::VisualDirection,
                &["color_palette", "mood_board_concept", "typography_direction"],
            ),
        );
        registry.register(
            Phase::Logo,
            "logo_quality",
            0.7,
            BestCandidate::new(StateKey::GeneratedLogos, "quality_scores"),
        );
        registry
    }

    fn register(&mut self, phase: Phase, name: &str, threshold: f64, scorer: impl Scorer + 'static) {
        self.gates.entry(phase).or_default().push(QualityGate {
            name: name.to_string(),
            threshold,
            scorer: Arc::new(scorer),
        });
    }

    /// Register an additional gate for `phase`.
    pub fn with_gate(mut self, phase: Phase, gate: QualityGate) -> Self {
        self.gates.entry(phase).or_default().push(gate);
        self
    }

    /// Replace thresholds by gate name. Unknown names are an error.
    pub fn with_threshold_overrides(mut self, overrides: &HashMap<String, f64>) -> Result<Self> {
        for (name, threshold) in overrides {
            validate_threshold(name, *threshold)?;
            let mut found = false;
            for gate in self.gates.values_mut().flatten() {
                if &gate.name == name {
                    gate.threshold = *threshold;
                    found = true;
                }
            }
            if !found {
                bail!("Threshold override for unknown gate '{}'", name);
            }
        }
        Ok(self)
    }

    pub fn gates_for(&self, phase: Phase) -> &[QualityGate] {
        self.gates.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run every gate registered for `phase` against the current state.
    ///
    /// Results are computed fresh on each call. A phase with no gates passes.
    pub fn evaluate_phase(&self, phase: Phase, state: &SessionState) -> PhaseGateResult {
        let gates: Vec<GateResult> = self
            .gates_for(phase)
            .iter()
            .map(|gate| gate.evaluate(state))
            .collect();
        let passed_gates = gates.iter().filter(|g| g.passed).count();
        let result = PhaseGateResult {
            phase,
            overall_passed: passed_gates == gates.len(),
            total_gates: gates.len(),
            passed_gates,
            gates,
        };
        debug!(
            phase = %phase,
            passed = result.passed_gates,
            total = result.total_gates,
            "evaluated quality gates"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StateKey;
    use serde_json::json;

    fn constant(score: f64) -> impl Fn(&SessionState) -> Result<f64> + Send + Sync {
        move |_: &SessionState| Ok(score)
    }

    #[test]
    fn test_gate_passes_at_threshold() {
        let gate = QualityGate::new("g", 0.8, constant(0.8)).unwrap();
        let result = gate.evaluate(&SessionState::new());
        assert!(result.passed);
        assert_eq!(result.threshold, 0.8);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_gate_rejects_invalid_threshold() {
        assert!(QualityGate::new("g", 1.2, constant(0.5)).is_err());
        assert!(QualityGate::new("g", -0.1, constant(0.5)).is_err());
    }

    #[test]
    fn test_broken_scorer_is_recorded_not_propagated() {
        let registry = GateRegistry::empty()
            .with_gate(
                Phase::Research,
                QualityGate::new(
                    "exploding",
                    0.5,
                    |_: &SessionState| -> Result<f64> { bail!("model unavailable") },
                )
                .unwrap(),
            )
            .with_gate(Phase::Research, QualityGate::new("steady", 0.5, constant(0.9)).unwrap());

        let result = registry.evaluate_phase(Phase::Research, &SessionState::new());
        assert!(!result.overall_passed);
        assert_eq!(result.total_gates, 2);
        assert_eq!(result.passed_gates, 1);
        let broken = &result.gates[0];
        assert_eq!(broken.score, 0.0);
        assert!(!broken.passed);
        assert!(broken.error.as_deref().unwrap().contains("model unavailable"));
        assert_eq!(result.failed_gates(), vec!["exploding".to_string()]);
    }

    #[test]
    fn test_out_of_range_score_is_a_scorer_failure() {
        let gate = QualityGate::new("g", 0.5, constant(1.5)).unwrap();
        let result = gate.evaluate(&SessionState::new());
        assert!(!result.passed);
        assert_eq!(result.score, 0.0);
        assert!(result.error.is_some());

        let nan = QualityGate::new("nan", 0.5, constant(f64::NAN)).unwrap();
        assert!(!nan.evaluate(&SessionState::new()).passed);
    }

    #[test]
    fn test_phase_without_gates_passes() {
        let registry = GateRegistry::reference();
        let result = registry.evaluate_phase(Phase::Brand, &SessionState::new());
        assert!(result.overall_passed);
        assert_eq!(result.total_gates, 0);
    }

    #[test]
    fn test_reference_discovery_gate() {
        let registry = GateRegistry::reference();
        let mut state = SessionState::new();
        state.set(
            StateKey::ClientBrief,
            json!({"company_info": "Acme", "target_audience": "makers"}),
        );
        let result = registry.evaluate_phase(Phase::Discovery, &state);
        assert!(!result.overall_passed);
        assert!((result.gates[0].score - 2.0 / 3.0).abs() < 1e-9);

        state.set(
            StateKey::ClientBrief,
            json!({"company_info": "Acme", "target_audience": "makers", "style_preferences": "bold"}),
        );
        assert!(registry.evaluate_phase(Phase::Discovery, &state).overall_passed);
    }

    #[test]
    fn test_results_are_recomputed_after_state_change() {
        let registry = GateRegistry::reference();
        let mut state = SessionState::new();
        assert!(!registry.evaluate_phase(Phase::Logo, &state).overall_passed);
        state.set(StateKey::GeneratedLogos, json!({"quality_scores": [0.4, 0.75]}));
        assert!(registry.evaluate_phase(Phase::Logo, &state).overall_passed);
    }

    #[test]
    fn test_threshold_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("research_depth".to_string(), 0.3);
        let registry = GateRegistry::reference()
            .with_threshold_overrides(&overrides)
            .unwrap();
        assert_eq!(registry.gates_for(Phase::Research)[0].threshold, 0.3);

        let mut unknown = HashMap::new();
        unknown.insert("no_such_gate".to_string(), 0.3);
        let err = GateRegistry::reference()
            .with_threshold_overrides(&unknown)
            .unwrap_err();
        assert!(err.to_string().contains("no_such_gate"));
    }
}
