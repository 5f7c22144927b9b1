//! Phase inquiry and movement commands.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use brandflow::config::Config;
use brandflow::orchestrator::{TransitionOutcome, WorkflowManager};
use brandflow::phase::Phase;
use brandflow::requirements;
use brandflow::session::SessionState;

use super::{load_state, print_json, save_state};

fn manager(config: &Config) -> Result<WorkflowManager> {
    let gates = config.settings.gate_registry()?;
    Ok(WorkflowManager::new(
        Arc::new(gates),
        config.settings.workflow.clone(),
    ))
}

/// Print the outcome; save on success, fail with the outstanding items otherwise.
fn finish(config: &Config, state: &SessionState, outcome: &TransitionOutcome) -> Result<()> {
    print_json(outcome)?;
    match outcome {
        TransitionOutcome::Completed(_) => save_state(config, state),
        TransitionOutcome::Rejected(rejection) => {
            let missing: Vec<&str> = rejection
                .missing_requirements
                .iter()
                .map(|k| k.as_str())
                .collect();
            anyhow::bail!(
                "Transition rejected: {} (missing requirements: [{}], failed gates: [{}])",
                rejection.reason,
                missing.join(", "),
                rejection.failed_gates.join(", ")
            )
        }
    }
}

pub fn cmd_phases(config: &Config) -> Result<()> {
    let gates = config.settings.gate_registry()?;
    let phases: Vec<_> = Phase::ALL
        .iter()
        .map(|phase| {
            let phase_gates: Vec<_> = gates
                .gates_for(*phase)
                .iter()
                .map(|g| json!({ "name": g.name, "threshold": g.threshold }))
                .collect();
            json!({
                "phase": phase,
                "ordinal": phase.ordinal(),
                "agent": phase.agent(),
                "successors": phase.successors(),
                "rework_target": phase.rework_target(),
                "completion_requirements": requirements::completion_requirements(*phase),
                "start_preconditions": requirements::start_preconditions(*phase),
                "gates": phase_gates,
            })
        })
        .collect();
    print_json(&phases)
}

pub fn cmd_status(config: &Config) -> Result<()> {
    let state = load_state(config)?;
    let status = manager(config)?.validate_workflow(&state)?;
    print_json(&status)
}

pub fn cmd_check(config: &Config) -> Result<()> {
    let state = load_state(config)?;
    let decision = manager(config)?.can_advance(&state)?;
    print_json(&decision)
}

pub fn cmd_advance(config: &Config) -> Result<()> {
    let mut state = load_state(config)?;
    let outcome = manager(config)?.advance(&mut state)?;
    finish(config, &state, &outcome)
}

pub fn cmd_transition(config: &Config, target: &str) -> Result<()> {
    let target: Phase = target.parse()?;
    let mut state = load_state(config)?;
    let outcome = manager(config)?.transition(&mut state, target)?;
    finish(config, &state, &outcome)
}

pub fn cmd_rework(config: &Config, reason: &str) -> Result<()> {
    let mut state = load_state(config)?;
    let outcome = manager(config)?.request_rework(&mut state, reason)?;
    finish(config, &state, &outcome)
}

pub fn cmd_next_agent(config: &Config) -> Result<()> {
    let state = load_state(config)?;
    let manager = manager(config)?;
    let current = manager.current_phase(&state)?;
    let next_agent = manager.next_agent(&state)?;
    print_json(&json!({
        "current_phase": current,
        "next_agent": next_agent,
    }))
}
