//! Workflow manager: the composition root that decides whether a session
//! may move between phases and applies the move.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::history::{TransitionKind, TransitionOutcome, TransitionRecord, TransitionRejection};
use crate::errors::WorkflowError;
use crate::gates::{GateRegistry, PhaseGateResult};
use crate::phase::{Agent, Phase};
use crate::requirements;
use crate::session::{SessionState, StateKey, json_of};

/// What happens to downstream artifacts when work is sent back a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReworkPolicy {
    /// Keep existing artifacts; the reworked phase overwrites them.
    #[default]
    Retain,
    /// Reset the artifacts of the target phase and every phase up to the
    /// one being left.
    Clear,
}

impl std::fmt::Display for ReworkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReworkPolicy::Retain => write!(f, "retain"),
            ReworkPolicy::Clear => write!(f, "clear"),
        }
    }
}

impl std::str::FromStr for ReworkPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "retain" => Ok(ReworkPolicy::Retain),
            "clear" => Ok(ReworkPolicy::Clear),
            _ => anyhow::bail!("Invalid rework policy '{}'. Valid values: retain, clear", s),
        }
    }
}

/// `[workflow]` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default)]
    pub rework_policy: ReworkPolicy,
    /// Minutes without a transition after which a session counts as stuck.
    #[serde(default = "default_stuck_after_minutes")]
    pub stuck_after_minutes: u64,
}

fn default_stuck_after_minutes() -> u64 {
    30
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            rework_policy: ReworkPolicy::default(),
            stuck_after_minutes: default_stuck_after_minutes(),
        }
    }
}

/// Full diagnostic payload of an advance check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvanceDecision {
    pub ok: bool,
    pub current_phase: Phase,
    pub next_phase: Option<Phase>,
    pub gate_results: PhaseGateResult,
    pub missing_requirements: Vec<StateKey>,
    pub requirements_met: bool,
    /// Agent of the next phase, when there is one.
    pub next_agent: Option<Agent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Health report for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub current_phase: Phase,
    pub next_phase: Option<Phase>,
    pub gate_results: PhaseGateResult,
    pub missing_requirements: Vec<StateKey>,
    /// Agents whose start preconditions are met.
    pub available_agents: Vec<Agent>,
    pub workflow_complete: bool,
    pub stuck: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    pub retry_count: u64,
    pub escalation_triggered: bool,
}

pub struct WorkflowManager {
    gates: Arc<GateRegistry>,
    settings: WorkflowSettings,
}

impl WorkflowManager {
    pub fn new(gates: Arc<GateRegistry>, settings: WorkflowSettings) -> Self {
        Self { gates, settings }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Phase recorded in `state`; a fresh session is in the initial phase.
    pub fn current_phase(&self, state: &SessionState) -> Result<Phase, WorkflowError> {
        state.current_phase()
    }

    /// Run the current phase's gates and requirement check.
    ///
    /// The payload is complete whether or not the phase may be left.
    pub fn can_advance(&self, state: &SessionState) -> Result<AdvanceDecision, WorkflowError> {
        let current = self.current_phase(state)?;
        let next_phase = current.next();
        let gate_results = self.gates.evaluate_phase(current, state);
        let missing_requirements = requirements::missing_requirements(state, current);
        let requirements_met = missing_requirements.is_empty();

        let reason = match next_phase {
            None => Some("Already at final phase".to_string()),
            Some(_) => block_reason(&missing_requirements, &gate_results.failed_gates()),
        };
        let ok = next_phase.is_some() && requirements_met && gate_results.overall_passed;

        debug!(
            phase = %current,
            ok,
            requirements_met,
            gates_passed = gate_results.overall_passed,
            "checked advance"
        );

        Ok(AdvanceDecision {
            ok,
            current_phase: current,
            next_phase,
            next_agent: next_phase.map(Phase::agent),
            gate_results,
            missing_requirements,
            requirements_met,
            reason,
        })
    }

    /// Move to `target` if it is adjacent and the current phase may be left.
    ///
    /// A rejection leaves `state` untouched. An `Err` is returned only for a
    /// malformed state, also without touching it.
    pub fn transition(
        &self,
        state: &mut SessionState,
        target: Phase,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let from = self.current_phase(state)?;
        let rework = from.is_rework(target);
        state.ensure_list(StateKey::TransitionHistory)?;
        state.ensure_object(StateKey::QualityScores)?;
        if rework {
            state.ensure_list(StateKey::ReworkHistory)?;
        }

        if !from.can_transition(target) {
            let rejection = TransitionRejection {
                from_phase: from,
                requested_phase: Some(target),
                reason: format!("Transition from {from} to {target} is not allowed"),
                missing_requirements: Vec::new(),
                failed_gates: Vec::new(),
            };
            warn!(from = %from, to = %target, reason = %rejection.reason, "transition rejected");
            return Ok(TransitionOutcome::Rejected(rejection));
        }

        let decision = self.can_advance(state)?;
        if !decision.ok {
            let rejection = TransitionRejection {
                from_phase: from,
                requested_phase: Some(target),
                reason: decision
                    .reason
                    .unwrap_or_else(|| "Phase cannot be left yet".to_string()),
                failed_gates: decision.gate_results.failed_gates(),
                missing_requirements: decision.missing_requirements,
            };
            warn!(
                from = %from,
                to = %target,
                missing = ?rejection.missing_requirements,
                failed_gates = ?rejection.failed_gates,
                "transition rejected"
            );
            return Ok(TransitionOutcome::Rejected(rejection));
        }

        let record = if rework {
            self.apply_rework(state, TransitionRecord::new(from, target, TransitionKind::Rework))?
        } else {
            let record = TransitionRecord::new(from, target, TransitionKind::Advance);
            apply(state, &record)?;
            record
        };
        state.set_field(
            StateKey::QualityScores,
            &format!("{from}_transition"),
            Value::from(1.0),
        )?;

        info!(from = %from, to = %target, agent = %record.agent, "transition completed");
        Ok(TransitionOutcome::Completed(record))
    }

    /// Move to the canonical next phase.
    pub fn advance(&self, state: &mut SessionState) -> Result<TransitionOutcome, WorkflowError> {
        let from = self.current_phase(state)?;
        match from.next() {
            Some(next) => self.transition(state, next),
            None => {
                warn!(from = %from, "advance rejected at final phase");
                Ok(TransitionOutcome::Rejected(TransitionRejection {
                    from_phase: from,
                    requested_phase: None,
                    reason: "Already at final phase".to_string(),
                    missing_requirements: Vec::new(),
                    failed_gates: Vec::new(),
                }))
            }
        }
    }

    /// Send work back along the current phase's rework edge.
    ///
    /// Gated only by adjacency. Under [`ReworkPolicy::Clear`] the artifacts
    /// of the target phase and every phase up to the current one are reset.
    pub fn request_rework(
        &self,
        state: &mut SessionState,
        reason: &str,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let from = self.current_phase(state)?;
        state.ensure_list(StateKey::TransitionHistory)?;
        state.ensure_list(StateKey::ReworkHistory)?;

        let Some(target) = from.rework_target() else {
            let rejection = TransitionRejection {
                from_phase: from,
                requested_phase: None,
                reason: format!("No rework edge from {from}"),
                missing_requirements: Vec::new(),
                failed_gates: Vec::new(),
            };
            warn!(from = %from, "rework rejected");
            return Ok(TransitionOutcome::Rejected(rejection));
        };

        let record = TransitionRecord::new(from, target, TransitionKind::Rework).with_reason(reason);
        let record = self.apply_rework(state, record)?;

        info!(
            from = %from,
            to = %target,
            reason,
            cleared = ?record.cleared_artifacts,
            "rework completed"
        );
        Ok(TransitionOutcome::Completed(record))
    }

    /// Agent to trigger next, if any.
    ///
    /// The current phase's agent when its start preconditions hold,
    /// otherwise the next phase's agent when the phase may be left.
    /// Apply the rework policy to a backward move and write it into the
    /// state, including `rework_history`. Shapes are checked by the caller.
    fn apply_rework(
        &self,
        state: &mut SessionState,
        mut record: TransitionRecord,
    ) -> Result<TransitionRecord, WorkflowError> {
        if self.settings.rework_policy == ReworkPolicy::Clear {
            let (from, target) = (record.from_phase, record.to_phase);
            for phase in &Phase::ALL[target.ordinal()..=from.ordinal()] {
                for key in requirements::produced_artifacts(*phase) {
                    if state.contains(*key) {
                        record.cleared_artifacts.push(*key);
                    }
                    state.set(*key, Value::Null);
                }
            }
        }
        apply(state, &record)?;
        state.append(StateKey::ReworkHistory, json_of(&record))?;
        Ok(record)
    }

    pub fn next_agent(&self, state: &SessionState) -> Result<Option<Agent>, WorkflowError> {
        let current = self.current_phase(state)?;
        if requirements::can_start(state, current) {
            return Ok(Some(current.agent()));
        }
        let decision = self.can_advance(state)?;
        if decision.ok {
            return Ok(decision.next_agent);
        }
        Ok(None)
    }

    pub fn validate_workflow(&self, state: &SessionState) -> Result<WorkflowStatus, WorkflowError> {
        self.validate_workflow_at(state, Utc::now())
    }

    /// Same as [`validate_workflow`](Self::validate_workflow) with an explicit clock.
    pub fn validate_workflow_at(
        &self,
        state: &SessionState,
        now: DateTime<Utc>,
    ) -> Result<WorkflowStatus, WorkflowError> {
        let current = self.current_phase(state)?;
        let decision = self.can_advance(state)?;
        // Delivery is coordinated, not triggered.
        let available_agents = Phase::ALL
            .iter()
            .filter(|phase| !phase.is_terminal() && requirements::can_start(state, **phase))
            .map(|phase| phase.agent())
            .collect();

        let last_activity = timestamp(state, StateKey::LastTransition)
            .or_else(|| timestamp(state, StateKey::CreatedAt));
        let limit_secs = self.settings.stuck_after_minutes.saturating_mul(60);
        let stuck = !current.is_terminal()
            && last_activity.is_some_and(|at| {
                u64::try_from(now.signed_duration_since(at).num_seconds())
                    .is_ok_and(|elapsed| elapsed > limit_secs)
            });
        if stuck {
            warn!(phase = %current, "workflow has not moved for {} minutes", self.settings.stuck_after_minutes);
        }

        Ok(WorkflowStatus {
            current_phase: current,
            next_phase: decision.next_phase,
            gate_results: decision.gate_results,
            missing_requirements: decision.missing_requirements,
            available_agents,
            workflow_complete: current.is_terminal(),
            stuck,
            last_activity,
            retry_count: state.get_u64(StateKey::RetryCount).unwrap_or(0),
            escalation_triggered: state
                .get(StateKey::EscalationTriggered)
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// Write an accepted move into the state. Shapes are checked by the caller.
fn apply(state: &mut SessionState, record: &TransitionRecord) -> Result<(), WorkflowError> {
    state.set(StateKey::CurrentPhase, Value::from(record.to_phase.as_str()));
    state.set(StateKey::LastTransition, Value::from(record.timestamp.to_rfc3339()));
    state.set(StateKey::RetryCount, Value::from(0));
    state.append(StateKey::TransitionHistory, json_of(record))
}

fn block_reason(missing: &[StateKey], failed_gates: &[String]) -> Option<String> {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|k| k.as_str()).collect();
        parts.push(format!("Missing requirements: {}", names.join(", ")));
    }
    if !failed_gates.is_empty() {
        parts.push(format!("Quality gates failed: {}", failed_gates.join(", ")));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

fn timestamp(state: &SessionState, key: StateKey) -> Option<DateTime<Utc>> {
    let raw = state.get_str(key)?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
