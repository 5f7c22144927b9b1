//! Per-phase quality standards and quality-driven escalation.
//!
//! Where gates decide whether a phase may be left, standards grade a
//! deliverable against several named metrics and keep a history of those
//! evaluations in session state. Repeated failures or a very low overall
//! score escalate to a human.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::WorkflowError;
use crate::phase::Phase;
use crate::session::{SessionState, StateKey, json_of};

/// Abstraction over metric scoring for quality standards.
///
/// Implementations return a score in `0.0..=1.0` for one metric of one
/// deliverable. Errors are recorded against the metric as a zero score.
pub trait MetricEvaluator: Send + Sync {
    fn evaluate(
        &self,
        phase: Phase,
        metric: &str,
        deliverable: &Value,
        state: &SessionState,
    ) -> Result<f64>;
}

/// Evaluator backed by a fixed table of metric scores.
///
/// Unknown metrics score `default_score`.
#[derive(Debug, Clone, Default)]
pub struct StaticMetrics {
    scores: HashMap<String, f64>,
    default_score: f64,
}

impl StaticMetrics {
    pub fn new(scores: HashMap<String, f64>, default_score: f64) -> Self {
        Self {
            scores,
            default_score,
        }
    }
}

impl MetricEvaluator for StaticMetrics {
    fn evaluate(&self, _: Phase, metric: &str, _: &Value, _: &SessionState) -> Result<f64> {
        Ok(self.scores.get(metric).copied().unwrap_or(self.default_score))
    }
}

/// When quality evaluations escalate to a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityEscalationPolicy {
    /// Failed evaluations of the same phase in a row before escalating.
    #[serde(default = "default_consecutive_failure_limit")]
    pub consecutive_failure_limit: usize,
    /// Overall scores strictly below this escalate immediately.
    #[serde(default = "default_minimum_overall_score")]
    pub minimum_overall_score: f64,
    /// How many recent evaluations are inspected for consecutive failures.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_consecutive_failure_limit() -> usize {
    3
}

fn default_minimum_overall_score() -> f64 {
    0.6
}

fn default_history_window() -> usize {
    10
}

impl Default for QualityEscalationPolicy {
    fn default() -> Self {
        Self {
            consecutive_failure_limit: default_consecutive_failure_limit(),
            minimum_overall_score: default_minimum_overall_score(),
            history_window: default_history_window(),
        }
    }
}

/// Score of one metric against its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricScore {
    pub score: f64,
    pub threshold: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of grading one deliverable against a phase's standards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityEvaluation {
    pub phase: Phase,
    pub deliverable_key: String,
    /// Mean of all metric scores, 0.0 when the phase has no metrics.
    pub overall_score: f64,
    pub quality_passed: bool,
    pub passed_checks: usize,
    pub total_checks: usize,
    pub detailed_scores: BTreeMap<String, MetricScore>,
    pub evaluated_at: DateTime<Utc>,
}

/// Outcome of a recorded quality assurance check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheck {
    pub evaluation: QualityEvaluation,
    pub consecutive_failures: usize,
    pub escalation_needed: bool,
}

/// Immutable per-phase metric thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityStandards {
    metrics: HashMap<Phase, Vec<(String, f64)>>,
    escalation: QualityEscalationPolicy,
}

impl Default for QualityStandards {
    fn default() -> Self {
        Self::reference()
    }
}

impl QualityStandards {
    /// The reference standards table.
    pub fn reference() -> Self {
        let table: [(Phase, &[(&str, f64)]); 6] = [
            (
                Phase::Discovery,
                &[
                    ("completeness_score", 0.9),
                    ("clarity_score", 0.8),
                    ("actionability_score", 0.8),
                ],
            ),
            (
                Phase::Research,
                &[
                    ("depth_score", 0.8),
                    ("relevance_score", 0.9),
                    ("strategic_value_score", 0.7),
                ],
            ),
            (
                Phase::Visual,
                &[
                    ("coherence_score", 0.8),
                    ("strategic_alignment_score", 0.9),
                    ("executability_score", 0.8),
                ],
            ),
            (
                Phase::Logo,
                &[
                    ("professional_quality_score", 0.8),
                    ("scalability_score", 0.9),
                    ("brand_alignment_score", 0.8),
                ],
            ),
            (
                Phase::Brand,
                &[
                    ("completeness_score", 0.9),
                    ("clarity_score", 0.9),
                    ("professional_standards_score", 0.8),
                ],
            ),
            (
                Phase::Assets,
                &[
                    ("format_compliance_score", 0.9),
                    ("quality_consistency_score", 0.8),
                    ("completeness_score", 0.9),
                ],
            ),
        ];

        let metrics = table
            .iter()
            .map(|(phase, metrics)| {
                let metrics = metrics
                    .iter()
                    .map(|(name, threshold)| (name.to_string(), *threshold))
                    .collect();
                (*phase, metrics)
            })
            .collect();

        Self {
            metrics,
            escalation: QualityEscalationPolicy::default(),
        }
    }

    pub fn with_escalation(mut self, escalation: QualityEscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn metrics_for(&self, phase: Phase) -> &[(String, f64)] {
        self.metrics.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Grade `deliverable` against the standards of `phase`.
    pub fn evaluate(
        &self,
        phase: Phase,
        deliverable_key: &str,
        deliverable: &Value,
        state: &SessionState,
        evaluator: &dyn MetricEvaluator,
    ) -> QualityEvaluation {
        let mut detailed_scores = BTreeMap::new();
        for (metric, threshold) in self.metrics_for(phase) {
            let scored = match evaluator.evaluate(phase, metric, deliverable, state) {
                Ok(score) if (0.0..=1.0).contains(&score) => MetricScore {
                    score,
                    threshold: *threshold,
                    passed: score >= *threshold,
                    error: None,
                },
                Ok(score) => failed_metric(*threshold, format!("score {score} is outside 0.0..=1.0")),
                Err(e) => failed_metric(*threshold, format!("{e:#}")),
            };
            detailed_scores.insert(metric.clone(), scored);
        }

        let total_checks = detailed_scores.len();
        let passed_checks = detailed_scores.values().filter(|m| m.passed).count();
        let overall_score = if total_checks > 0 {
            detailed_scores.values().map(|m| m.score).sum::<f64>() / total_checks as f64
        } else {
            0.0
        };

        QualityEvaluation {
            phase,
            deliverable_key: deliverable_key.to_string(),
            overall_score,
            quality_passed: passed_checks == total_checks,
            passed_checks,
            total_checks,
            detailed_scores,
            evaluated_at: Utc::now(),
        }
    }

    /// Count the failed evaluations of `phase` at the tail of the history,
    /// looking at most `history_window` entries back.
    pub fn consecutive_failures(&self, state: &SessionState, phase: Phase) -> Result<usize, WorkflowError> {
        let history = state.list(StateKey::QualityEvaluations)?;
        let mut failures = 0;
        for entry in history.iter().rev().take(self.escalation.history_window) {
            let Ok(evaluation) = serde_json::from_value::<QualityEvaluation>(entry.clone()) else {
                continue;
            };
            if evaluation.phase != phase {
                continue;
            }
            if evaluation.quality_passed {
                break;
            }
            failures += 1;
        }
        Ok(failures)
    }

    /// Decide whether an evaluation warrants human attention.
    pub fn should_escalate(&self, evaluation: &QualityEvaluation, consecutive_failures: usize) -> bool {
        if consecutive_failures >= self.escalation.consecutive_failure_limit {
            return true;
        }
        evaluation.total_checks > 0 && evaluation.overall_score < self.escalation.minimum_overall_score
    }

    /// Evaluate the deliverable stored under `deliverable_key`, record the
    /// result in session state and report whether to escalate.
    ///
    /// Writes `<phase>_overall_score` and `<phase>_quality_passed` into
    /// `quality_scores` and appends to `quality_evaluations`. State is left
    /// untouched when either key holds a value of the wrong shape.
    pub fn check(
        &self,
        state: &mut SessionState,
        phase: Phase,
        deliverable_key: &str,
        evaluator: &dyn MetricEvaluator,
    ) -> Result<QualityCheck, WorkflowError> {
        state.ensure_object(StateKey::QualityScores)?;
        state.ensure_list(StateKey::QualityEvaluations)?;

        let deliverable = state.get(deliverable_key).cloned().unwrap_or(Value::Null);
        let evaluation = self.evaluate(phase, deliverable_key, &deliverable, state, evaluator);

        state.set_field(
            StateKey::QualityScores,
            &format!("{phase}_overall_score"),
            Value::from(evaluation.overall_score),
        )?;
        state.set_field(
            StateKey::QualityScores,
            &format!("{phase}_quality_passed"),
            Value::from(evaluation.quality_passed),
        )?;
        state.append(StateKey::QualityEvaluations, json_of(&evaluation))?;

        let consecutive_failures = self.consecutive_failures(state, phase)?;
        let escalation_needed = self.should_escalate(&evaluation, consecutive_failures);
        if escalation_needed {
            state.set(StateKey::EscalationTriggered, Value::from(true));
            warn!(
                phase = %phase,
                overall_score = evaluation.overall_score,
                consecutive_failures,
                "quality evaluation escalated"
            );
        } else {
            info!(
                phase = %phase,
                overall_score = evaluation.overall_score,
                passed = evaluation.quality_passed,
                "quality evaluation recorded"
            );
        }

        Ok(QualityCheck {
            evaluation,
            consecutive_failures,
            escalation_needed,
        })
    }
}

fn failed_metric(threshold: f64, error: String) -> MetricScore {
    MetricScore {
        score: 0.0,
        threshold,
        passed: false,
        error: Some(error),
    }
}
