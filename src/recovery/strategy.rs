//! Recovery strategies and the machinery that runs them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Handle};
use tokio::sync::watch;

use super::{ErrorCategory, ErrorRecord, RecoveryPolicy};
use crate::errors::RecoveryError;

/// A single recovery step. Each category has an ordered chain of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    RetryWithFallbackData,
    RequestManualInput,
    RetryWithBackoff,
    UseAlternativeTool,
    ManualCompletion,
    LowerQualityThreshold,
    RegenerateWithDifferentParams,
    ManualQualityOverride,
    ResetToPreviousPhase,
    SkipProblematicStep,
    ManualWorkflowIntervention,
    UseFallbackProvider,
    ServeCachedResult,
    ManualApiIntervention,
    RetryFileProcessing,
    UseAlternativeFormat,
    ManualFileIntervention,
}

impl RecoveryStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryStrategy::RetryWithFallbackData => "retry_with_fallback_data",
            RecoveryStrategy::RequestManualInput => "request_manual_input",
            RecoveryStrategy::RetryWithBackoff => "retry_with_backoff",
            RecoveryStrategy::UseAlternativeTool => "use_alternative_tool",
            RecoveryStrategy::ManualCompletion => "manual_completion",
            RecoveryStrategy::LowerQualityThreshold => "lower_quality_threshold",
            RecoveryStrategy::RegenerateWithDifferentParams => "regenerate_with_different_params",
            RecoveryStrategy::ManualQualityOverride => "manual_quality_override",
            RecoveryStrategy::ResetToPreviousPhase => "reset_to_previous_phase",
            RecoveryStrategy::SkipProblematicStep => "skip_problematic_step",
            RecoveryStrategy::ManualWorkflowIntervention => "manual_workflow_intervention",
            RecoveryStrategy::UseFallbackProvider => "use_fallback_provider",
            RecoveryStrategy::ServeCachedResult => "serve_cached_result",
            RecoveryStrategy::ManualApiIntervention => "manual_api_intervention",
            RecoveryStrategy::RetryFileProcessing => "retry_file_processing",
            RecoveryStrategy::UseAlternativeFormat => "use_alternative_format",
            RecoveryStrategy::ManualFileIntervention => "manual_file_intervention",
        }
    }

    /// Action reported to the caller when the strategy is taken up.
    pub fn directive(self) -> &'static str {
        match self {
            RecoveryStrategy::RetryWithFallbackData => "fallback_data_used",
            RecoveryStrategy::RequestManualInput => "manual_input_requested",
            RecoveryStrategy::RetryWithBackoff => "retry_scheduled",
            RecoveryStrategy::UseAlternativeTool => "alternative_tool_available",
            RecoveryStrategy::ManualCompletion => "manual_completion_required",
            RecoveryStrategy::LowerQualityThreshold => "quality_threshold_lowered",
            RecoveryStrategy::RegenerateWithDifferentParams => "regeneration_with_new_params",
            RecoveryStrategy::ManualQualityOverride => "manual_quality_override",
            RecoveryStrategy::ResetToPreviousPhase => "workflow_reset_to_previous",
            RecoveryStrategy::SkipProblematicStep => "step_skipped",
            RecoveryStrategy::ManualWorkflowIntervention => "manual_workflow_intervention",
            RecoveryStrategy::UseFallbackProvider => "fallback_api_used",
            RecoveryStrategy::ServeCachedResult => "cache_fallback_used",
            RecoveryStrategy::ManualApiIntervention => "manual_api_intervention",
            RecoveryStrategy::RetryFileProcessing => "file_processing_retry",
            RecoveryStrategy::UseAlternativeFormat => "alternative_format_used",
            RecoveryStrategy::ManualFileIntervention => "manual_file_intervention",
        }
    }
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered strategy chain per error category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyTable {
    #[serde(default = "default_validation_chain")]
    pub validation: Vec<RecoveryStrategy>,
    #[serde(default = "default_tool_execution_chain")]
    pub tool_execution: Vec<RecoveryStrategy>,
    #[serde(default = "default_quality_chain")]
    pub quality: Vec<RecoveryStrategy>,
    #[serde(default = "default_workflow_chain")]
    pub workflow: Vec<RecoveryStrategy>,
    #[serde(default = "default_external_api_chain")]
    pub external_api: Vec<RecoveryStrategy>,
    #[serde(default = "default_file_processing_chain")]
    pub file_processing: Vec<RecoveryStrategy>,
}

fn default_validation_chain() -> Vec<RecoveryStrategy> {
    vec![
        RecoveryStrategy::RetryWithFallbackData,
        RecoveryStrategy::RequestManualInput,
    ]
}

fn default_tool_execution_chain() -> Vec<RecoveryStrategy> {
    vec![
        RecoveryStrategy::RetryWithBackoff,
        RecoveryStrategy::UseAlternativeTool,
        RecoveryStrategy::ManualCompletion,
    ]
}

fn default_quality_chain() -> Vec<RecoveryStrategy> {
    vec![
        RecoveryStrategy::LowerQualityThreshold,
        RecoveryStrategy::RegenerateWithDifferentParams,
        RecoveryStrategy::ManualQualityOverride,
    ]
}

fn default_workflow_chain() -> Vec<RecoveryStrategy> {
    vec![
        RecoveryStrategy::ResetToPreviousPhase,
        RecoveryStrategy::SkipProblematicStep,
        RecoveryStrategy::ManualWorkflowIntervention,
    ]
}

fn default_external_api_chain() -> Vec<RecoveryStrategy> {
    vec![
        RecoveryStrategy::RetryWithBackoff,
        RecoveryStrategy::UseFallbackProvider,
        RecoveryStrategy::ServeCachedResult,
        RecoveryStrategy::ManualApiIntervention,
    ]
}

fn default_file_processing_chain() -> Vec<RecoveryStrategy> {
    vec![
        RecoveryStrategy::RetryFileProcessing,
        RecoveryStrategy::UseAlternativeFormat,
        RecoveryStrategy::ManualFileIntervention,
    ]
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            validation: default_validation_chain(),
            tool_execution: default_tool_execution_chain(),
            quality: default_quality_chain(),
            workflow: default_workflow_chain(),
            external_api: default_external_api_chain(),
            file_processing: default_file_processing_chain(),
        }
    }
}

impl StrategyTable {
    pub fn for_category(&self, category: ErrorCategory) -> &[RecoveryStrategy] {
        match category {
            ErrorCategory::Validation => &self.validation,
            ErrorCategory::ToolExecution => &self.tool_execution,
            ErrorCategory::Quality => &self.quality,
            ErrorCategory::Workflow => &self.workflow,
            ErrorCategory::ExternalApi => &self.external_api,
            ErrorCategory::FileProcessing => &self.file_processing,
        }
    }
}

/// What a single strategy reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    pub successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Backoff waited (or scheduled) before the retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl StrategyResult {
    pub fn succeeded(action: &str) -> Self {
        Self {
            successful: true,
            action: Some(action.to_string()),
            reason: None,
            retry_after_secs: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            successful: false,
            action: None,
            reason: Some(reason.into()),
            retry_after_secs: None,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.retry_after_secs = Some(delay.as_secs());
        self
    }
}

/// One entry of the attempt trail kept on a recovery outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: RecoveryStrategy,
    #[serde(flatten)]
    pub result: StrategyResult,
}

/// Result of running a category's strategy chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    /// False only when the category has no strategies at all.
    pub attempted: bool,
    pub successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RecoveryStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(default)]
    pub attempts: Vec<StrategyAttempt>,
}

/// Everything a strategy may look at while it runs.
pub struct RecoveryContext<'a> {
    pub record: &'a ErrorRecord,
    /// Retries already spent in this session.
    pub retry_count: u32,
    pub policy: &'a RecoveryPolicy,
    pub sleeper: &'a dyn Sleeper,
}

/// Runs recovery strategies.
///
/// Returning `Err` means the strategy itself broke; the engine records it
/// as a failed attempt and moves on to the next strategy in the chain.
pub trait StrategyExecutor: Send + Sync {
    fn execute(&self, strategy: RecoveryStrategy, ctx: &RecoveryContext<'_>)
    -> Result<StrategyResult>;
}

/// Reference executor. Every strategy except backoff retry succeeds by
/// handing its directive back to the caller; backoff retry waits through
/// the context's [`Sleeper`] and gives up once retries are exhausted.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectiveExecutor;

impl StrategyExecutor for DirectiveExecutor {
    fn execute(
        &self,
        strategy: RecoveryStrategy,
        ctx: &RecoveryContext<'_>,
    ) -> Result<StrategyResult> {
        match strategy {
            RecoveryStrategy::RetryWithBackoff => Ok(retry_with_backoff(ctx)),
            other => Ok(StrategyResult::succeeded(other.directive())),
        }
    }
}

/// Exponential backoff: fails once `max_retries` is reached, otherwise
/// waits `base * 2^retry_count`.
pub fn retry_with_backoff(ctx: &RecoveryContext<'_>) -> StrategyResult {
    if ctx.retry_count >= ctx.policy.max_retries {
        return StrategyResult::failed("Max retries exceeded");
    }
    let delay = ctx.policy.backoff_delay(ctx.retry_count);
    match ctx.sleeper.sleep(delay) {
        Ok(()) => StrategyResult::succeeded(RecoveryStrategy::RetryWithBackoff.directive())
            .with_delay(delay),
        Err(e) => StrategyResult::failed(e.to_string()),
    }
}

/// Abstraction over waiting out a backoff delay, for testability.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration) -> Result<(), RecoveryError>;
}

/// Records the delay without waiting. The caller schedules the retry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSleeper;

impl Sleeper for NoopSleeper {
    fn sleep(&self, _delay: Duration) -> Result<(), RecoveryError> {
        Ok(())
    }
}

/// Waits out the delay on a tokio timer, racing it against a cancel signal
/// and refusing any delay that would run past the deadline.
///
/// Blocks the calling thread, so it must be used from synchronous code or
/// a `spawn_blocking` task, never from inside an async task. Without an
/// ambient runtime it drives a private current-thread one.
#[derive(Debug, Clone)]
pub struct BlockingSleeper {
    deadline: Option<Instant>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl Default for BlockingSleeper {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingSleeper {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            deadline: None,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Handle that cancels any sleep in progress or started later.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel_tx))
    }

    async fn wait(&self, delay: Duration) -> Result<(), RecoveryError> {
        let mut cancel = self.cancel_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.wait_for(|cancelled| *cancelled) => Err(RecoveryError::Cancelled),
        }
    }
}

impl Sleeper for BlockingSleeper {
    fn sleep(&self, delay: Duration) -> Result<(), RecoveryError> {
        if *self.cancel_rx.borrow() {
            return Err(RecoveryError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now().checked_add(delay).is_none_or(|wake| wake > deadline)
        {
            return Err(RecoveryError::DeadlineExceeded { delay });
        }

        match Handle::try_current() {
            Ok(handle) => handle.block_on(self.wait(delay)),
            Err(_) => {
                let runtime = Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .map_err(|e| RecoveryError::TimerUnavailable(e.to_string()))?;
                runtime.block_on(self.wait(delay))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::{ErrorSeverity, FailureReport};
    use chrono::Utc;
    use std::sync::Mutex;

    /// Records requested delays.
    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, delay: Duration) -> Result<(), RecoveryError> {
            self.delays.lock().unwrap().push(delay);
            Ok(())
        }
    }

    fn record() -> ErrorRecord {
        let report = FailureReport::new("TimeoutError", "tool timeout");
        ErrorRecord {
            id: uuid::Uuid::new_v4(),
            error_type: report.error_type,
            message: report.message,
            category: ErrorCategory::ToolExecution,
            severity: ErrorSeverity::Medium,
            timestamp: Utc::now(),
            phase: None,
            agent: None,
            context: Default::default(),
        }
    }

    #[test]
    fn test_default_chains() {
        let table = StrategyTable::default();
        assert_eq!(
            table.for_category(ErrorCategory::ExternalApi),
            &[
                RecoveryStrategy::RetryWithBackoff,
                RecoveryStrategy::UseFallbackProvider,
                RecoveryStrategy::ServeCachedResult,
                RecoveryStrategy::ManualApiIntervention,
            ]
        );
        for category in [
            ErrorCategory::Validation,
            ErrorCategory::ToolExecution,
            ErrorCategory::Quality,
            ErrorCategory::Workflow,
            ErrorCategory::FileProcessing,
        ] {
            assert!(!table.for_category(category).is_empty());
        }
    }

    #[test]
    fn test_backoff_waits_doubling_delay() {
        let policy = RecoveryPolicy::default();
        let sleeper = RecordingSleeper::default();
        let record = record();
        for retry_count in 0..3 {
            let ctx = RecoveryContext {
                record: &record,
                retry_count,
                policy: &policy,
                sleeper: &sleeper,
            };
            let result = retry_with_backoff(&ctx);
            assert!(result.successful);
            assert_eq!(result.action.as_deref(), Some("retry_scheduled"));
        }
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn test_backoff_gives_up_at_max_retries() {
        let policy = RecoveryPolicy::default();
        let sleeper = RecordingSleeper::default();
        let record = record();
        let ctx = RecoveryContext {
            record: &record,
            retry_count: 3,
            policy: &policy,
            sleeper: &sleeper,
        };
        let result = retry_with_backoff(&ctx);
        assert!(!result.successful);
        assert_eq!(result.reason.as_deref(), Some("Max retries exceeded"));
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[test]
    fn test_directive_executor_returns_directive() {
        let policy = RecoveryPolicy::default();
        let record = record();
        let ctx = RecoveryContext {
            record: &record,
            retry_count: 0,
            policy: &policy,
            sleeper: &NoopSleeper,
        };
        let result = DirectiveExecutor
            .execute(RecoveryStrategy::ServeCachedResult, &ctx)
            .unwrap();
        assert!(result.successful);
        assert_eq!(result.action.as_deref(), Some("cache_fallback_used"));
    }

    #[test]
    fn test_blocking_sleeper_refuses_to_pass_deadline() {
        let sleeper = BlockingSleeper::new().with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        let err = sleeper.sleep(Duration::from_secs(30)).unwrap_err();
        assert_eq!(
            err,
            RecoveryError::DeadlineExceeded {
                delay: Duration::from_secs(30)
            }
        );
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_blocking_sleeper_sleeps_short_delay() {
        let sleeper = BlockingSleeper::new().with_timeout(Duration::from_secs(5));
        let started = Instant::now();
        sleeper.sleep(Duration::from_millis(20)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_blocking_sleeper_cancelled() {
        let sleeper = BlockingSleeper::new();
        let handle = sleeper.cancel_handle();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(
            sleeper.sleep(Duration::from_secs(10)),
            Err(RecoveryError::Cancelled)
        );
    }

    #[test]
    fn test_blocking_sleeper_cancelled_mid_sleep() {
        let sleeper = BlockingSleeper::new();
        let handle = sleeper.cancel_handle();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            handle.cancel();
        });

        let started = Instant::now();
        assert_eq!(
            sleeper.sleep(Duration::from_secs(30)),
            Err(RecoveryError::Cancelled)
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blocking_sleeper_on_runtime_blocking_pool() {
        let sleeper = BlockingSleeper::new().with_timeout(Duration::from_secs(5));
        let result = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            sleeper.sleep(Duration::from_millis(20)).map(|()| started.elapsed())
        })
        .await
        .unwrap();
        assert!(result.unwrap() >= Duration::from_millis(20));
    }

    #[test]
    fn test_strategy_table_from_toml_keeps_unlisted_defaults() {
        let table: StrategyTable =
            toml::from_str("quality = [\"manual_quality_override\"]").unwrap();
        assert_eq!(
            table.for_category(ErrorCategory::Quality),
            &[RecoveryStrategy::ManualQualityOverride]
        );
        assert_eq!(table.validation, default_validation_chain());
    }
}
