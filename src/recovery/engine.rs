//! Per-session failure engine.
//!
//! One [`ErrorEngine`] serves one session. It owns the sliding window of
//! recent severities used for escalation and writes every handled failure
//! back into the session state.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::strategy::{
    BlockingSleeper, DirectiveExecutor, RecoveryContext, RecoveryOutcome, Sleeper,
    StrategyAttempt, StrategyExecutor, StrategyResult,
};
use super::{
    ErrorRecord, ErrorSeverity, FailureReport, FailureStage, RecommendedAction, RecoveryPolicy,
};
use crate::errors::WorkflowError;
use crate::session::{SessionState, StateKey, json_of};

/// Full result of handling one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDecision {
    pub error: ErrorRecord,
    pub recovery: RecoveryOutcome,
    pub escalation_needed: bool,
    pub recommended_action: RecommendedAction,
    /// Terminal lifecycle stage: recovered, escalation pending or exhausted.
    pub stage: FailureStage,
}

/// Bounded window of the most recent failure severities.
#[derive(Debug, Clone)]
struct RecentErrors {
    capacity: usize,
    severities: VecDeque<ErrorSeverity>,
}

impl RecentErrors {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            severities: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, severity: ErrorSeverity) {
        if self.severities.len() == self.capacity {
            self.severities.pop_front();
        }
        self.severities.push_back(severity);
    }

    fn count(&self, severity: ErrorSeverity) -> usize {
        self.severities.iter().filter(|s| **s == severity).count()
    }
}

pub struct ErrorEngine {
    policy: Arc<RecoveryPolicy>,
    executor: Arc<dyn StrategyExecutor>,
    sleeper: Arc<dyn Sleeper>,
    recent: RecentErrors,
}

impl ErrorEngine {
    /// Engine with an empty window, the directive executor and a blocking
    /// sleeper without deadline.
    pub fn new(policy: Arc<RecoveryPolicy>) -> Self {
        let recent = RecentErrors::new(policy.escalation_window);
        Self {
            policy,
            executor: Arc::new(DirectiveExecutor),
            sleeper: Arc::new(BlockingSleeper::new()),
            recent,
        }
    }

    /// Engine whose window is reseeded from the tail of the session's
    /// error log, so escalation carries over between processes.
    ///
    /// Log entries that do not parse as error records are skipped.
    pub fn resume(policy: Arc<RecoveryPolicy>, state: &SessionState) -> Result<Self, WorkflowError> {
        let mut engine = Self::new(policy);
        let log = state.list(StateKey::ErrorLog)?;
        let tail = log.len().saturating_sub(engine.recent.capacity);
        for entry in &log[tail..] {
            match serde_json::from_value::<ErrorRecord>(entry.clone()) {
                Ok(record) => engine.recent.push(record.severity),
                Err(e) => debug!(error = %e, "Skipping unreadable error log entry"),
            }
        }
        Ok(engine)
    }

    pub fn with_executor(mut self, executor: Arc<dyn StrategyExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Failures of `severity` currently inside the escalation window.
    pub fn recent_count(&self, severity: ErrorSeverity) -> usize {
        self.recent.count(severity)
    }

    /// Classify a failure, try to recover, decide on escalation and record
    /// the outcome in `state`.
    ///
    /// Fails when the state holds an unknown phase or malformed bookkeeping
    /// keys; in that case neither the state nor the window is touched.
    pub fn report(
        &mut self,
        state: &mut SessionState,
        failure: FailureReport,
    ) -> Result<ErrorDecision, WorkflowError> {
        state.ensure_list(StateKey::ErrorLog)?;
        let phase = Some(state.current_phase()?);
        let retry_count = state
            .get_u64(StateKey::RetryCount)
            .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX));

        debug!(
            stage = ?FailureStage::Reported,
            error_type = %failure.error_type,
            message = %failure.message,
            "Failure reported"
        );

        let classification = self.policy.classify(&failure);
        let agent = failure
            .agent()
            .map(str::to_string)
            .or_else(|| phase.map(|p| p.agent().as_str().to_string()));
        let record = ErrorRecord {
            id: Uuid::new_v4(),
            error_type: failure.error_type,
            message: failure.message,
            category: classification.category,
            severity: classification.severity,
            timestamp: Utc::now(),
            phase,
            agent,
            context: failure.context,
        };
        self.recent.push(record.severity);
        debug!(
            stage = ?FailureStage::Classified,
            id = %record.id,
            category = %record.category,
            severity = %record.severity,
            "Failure classified"
        );

        let recovery = self.attempt_recovery(&record, retry_count);
        debug!(
            stage = ?FailureStage::RecoveryAttempted,
            id = %record.id,
            successful = recovery.successful,
            strategy = ?recovery.strategy,
            "Recovery attempted"
        );

        let threshold = self.policy.escalation_thresholds.for_severity(record.severity);
        let escalation_needed = self.recent.count(record.severity) >= threshold;
        let recommended_action = recommend(record.severity, escalation_needed, recovery.successful);
        let stage = if escalation_needed {
            FailureStage::EscalationPending
        } else if recovery.successful {
            FailureStage::Recovered
        } else {
            FailureStage::Exhausted
        };

        if escalation_needed {
            warn!(
                stage = ?stage,
                id = %record.id,
                severity = %record.severity,
                action = %recommended_action,
                "Failure escalated"
            );
        } else {
            info!(
                stage = ?stage,
                id = %record.id,
                action = %recommended_action,
                "Failure handled"
            );
        }

        self.write_back(state, &record, recommended_action, escalation_needed, retry_count)?;

        Ok(ErrorDecision {
            error: record,
            recovery,
            escalation_needed,
            recommended_action,
            stage,
        })
    }

    /// Walk the category's chain until a strategy succeeds.
    fn attempt_recovery(&self, record: &ErrorRecord, retry_count: u32) -> RecoveryOutcome {
        let chain = self.policy.strategies.for_category(record.category);
        let ctx = RecoveryContext {
            record,
            retry_count,
            policy: &self.policy,
            sleeper: self.sleeper.as_ref(),
        };
        let mut outcome = RecoveryOutcome {
            attempted: !chain.is_empty(),
            ..Default::default()
        };

        for &strategy in chain {
            let result = match self.executor.execute(strategy, &ctx) {
                Ok(result) => result,
                Err(e) => {
                    warn!(strategy = %strategy, error = %e, "Recovery strategy failed");
                    StrategyResult::failed(format!("{e:#}"))
                }
            };
            let successful = result.successful;
            if successful {
                outcome.successful = true;
                outcome.strategy = Some(strategy);
                outcome.action = result.action.clone();
                outcome.retry_after_secs = result.retry_after_secs;
            }
            outcome.attempts.push(StrategyAttempt { strategy, result });
            if successful {
                break;
            }
        }
        outcome
    }

    fn write_back(
        &self,
        state: &mut SessionState,
        record: &ErrorRecord,
        action: RecommendedAction,
        escalation_needed: bool,
        retry_count: u32,
    ) -> Result<(), WorkflowError> {
        state.append(StateKey::ErrorLog, json_of(record))?;
        if let Some(limit) = self.policy.error_log_limit {
            state.trim_list(StateKey::ErrorLog, limit)?;
        }
        state.set(StateKey::LastError, Value::from(record.message.clone()));
        if action == RecommendedAction::RetryOperation {
            state.set(StateKey::RetryCount, Value::from(retry_count.saturating_add(1)));
        }
        if escalation_needed {
            state.set(StateKey::EscalationTriggered, Value::from(true));
        }
        Ok(())
    }
}

/// Critical failures always stop the workflow. Otherwise escalation wins
/// over recovery, and an unrecovered failure is retried.
fn recommend(severity: ErrorSeverity, escalation_needed: bool, recovered: bool) -> RecommendedAction {
    if severity == ErrorSeverity::Critical {
        RecommendedAction::StopWorkflow
    } else if escalation_needed {
        RecommendedAction::EscalateToHuman
    } else if recovered {
        RecommendedAction::ContinueWorkflow
    } else {
        RecommendedAction::RetryOperation
    }
}
