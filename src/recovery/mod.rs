//! Failure classification, recovery and escalation.
//!
//! A reported failure moves through a fixed lifecycle:
//!
//! ```text
//! Reported -> Classified -> RecoveryAttempted -> Recovered
//!                                             -> EscalationPending
//!                                             -> Exhausted
//! ```
//!
//! ## Components
//!
//! - this module: categories, severities, classification and policy
//! - [`strategy`]: recovery strategies, their executor and backoff sleepers
//! - [`engine`]: the per-session engine that drives the lifecycle and
//!   writes the outcome back into session state
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use brandflow::recovery::{ErrorEngine, FailureReport, RecoveryPolicy, RecommendedAction};
//! use brandflow::recovery::strategy::NoopSleeper;
//! use brandflow::session::SessionState;
//!
//! let mut engine = ErrorEngine::new(Arc::new(RecoveryPolicy::default()))
//!     .with_sleeper(Arc::new(NoopSleeper));
//! let mut state = SessionState::new();
//!
//! let decision = engine
//!     .report(&mut state, FailureReport::new("IOError", "file upload failed: bad format"))
//!     .unwrap();
//! assert_eq!(decision.recommended_action, RecommendedAction::ContinueWorkflow);
//! ```

pub mod engine;
pub mod strategy;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::phase::Phase;

pub use engine::{ErrorDecision, ErrorEngine};
pub use strategy::{RecoveryOutcome, RecoveryStrategy, StrategyTable};

/// What part of the system a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// State or input validation.
    Validation,
    /// Tool or agent invocation.
    ToolExecution,
    /// Quality gate or standard not met.
    Quality,
    /// Phase transition or workflow integrity.
    Workflow,
    /// External service such as a model provider.
    #[serde(rename = "external_api")]
    ExternalApi,
    /// File upload or conversion.
    FileProcessing,
}

impl ErrorCategory {
    /// Keyword table in match priority order.
    const INDICATORS: [(ErrorCategory, &'static [&'static str]); 6] = [
        (
            ErrorCategory::Validation,
            &["validation", "missing", "required", "invalid"],
        ),
        (
            ErrorCategory::ToolExecution,
            &["tool", "execution", "failed", "timeout"],
        ),
        (ErrorCategory::Quality, &["quality", "threshold", "score", "gate"]),
        (
            ErrorCategory::Workflow,
            &["transition", "phase", "workflow", "state"],
        ),
        (
            ErrorCategory::ExternalApi,
            &["api", "connection", "rate limit", "service"],
        ),
        (
            ErrorCategory::FileProcessing,
            &["file", "upload", "format", "processing"],
        ),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::ToolExecution => "tool_execution",
            ErrorCategory::Quality => "quality",
            ErrorCategory::Workflow => "workflow",
            ErrorCategory::ExternalApi => "external_api",
            ErrorCategory::FileProcessing => "file_processing",
        }
    }

    /// First category whose keywords appear in `text`.
    fn match_keywords(text: &str) -> Option<ErrorCategory> {
        let text = text.to_lowercase();
        Self::INDICATORS
            .iter()
            .find(|(_, words)| words.iter().any(|w| text.contains(w)))
            .map(|(category, _)| *category)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "validation" => Ok(ErrorCategory::Validation),
            "tool_execution" => Ok(ErrorCategory::ToolExecution),
            "quality" => Ok(ErrorCategory::Quality),
            "workflow" => Ok(ErrorCategory::Workflow),
            "external_api" => Ok(ErrorCategory::ExternalApi),
            "file_processing" => Ok(ErrorCategory::FileProcessing),
            _ => anyhow::bail!(
                "Invalid error category '{}'. Valid values: validation, tool_execution, quality, workflow, external_api, file_processing",
                s
            ),
        }
    }
}

/// How dangerous a failure is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Recoverable, continue the workflow.
    Low,
    /// Needs a retry or fallback.
    Medium,
    /// Needs human intervention.
    High,
    /// Stop the workflow.
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure as reported by a collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Type name of the failure, e.g. `TimeoutError`.
    pub error_type: String,
    pub message: String,
    /// Surrounding context supplied by the reporter.
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl FailureReport {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error_type: error_type.to_string(),
            message: message.to_string(),
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }

    /// Agent named in the context, if any.
    pub fn agent(&self) -> Option<&str> {
        self.context
            .get("current_agent")
            .or_else(|| self.context.get("agent"))
            .and_then(Value::as_str)
    }

    /// Explicit category hint in the context, if it names a known category.
    fn category_hint(&self) -> Option<ErrorCategory> {
        self.context
            .get("category")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }
}

/// Category and severity assigned to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
}

/// An immutable record of a classified failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub error_type: String,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

/// Where a failure ended up after the engine handled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Reported,
    Classified,
    RecoveryAttempted,
    Recovered,
    EscalationPending,
    Exhausted,
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    EscalateToHuman,
    ContinueWorkflow,
    StopWorkflow,
    RetryOperation,
}

impl RecommendedAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RecommendedAction::EscalateToHuman => "escalate_to_human",
            RecommendedAction::ContinueWorkflow => "continue_workflow",
            RecommendedAction::StopWorkflow => "stop_workflow",
            RecommendedAction::RetryOperation => "retry_operation",
        }
    }
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of same-severity failures within the escalation window that
/// trigger escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationThresholds {
    #[serde(default = "default_low_threshold")]
    pub low: usize,
    #[serde(default = "default_medium_threshold")]
    pub medium: usize,
    #[serde(default = "default_high_threshold")]
    pub high: usize,
    #[serde(default)]
    pub critical: usize,
}

fn default_low_threshold() -> usize {
    5
}

fn default_medium_threshold() -> usize {
    3
}

fn default_high_threshold() -> usize {
    1
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            low: default_low_threshold(),
            medium: default_medium_threshold(),
            high: default_high_threshold(),
            critical: 0,
        }
    }
}

impl EscalationThresholds {
    pub fn for_severity(&self, severity: ErrorSeverity) -> usize {
        match severity {
            ErrorSeverity::Low => self.low,
            ErrorSeverity::Medium => self.medium,
            ErrorSeverity::High => self.high,
            ErrorSeverity::Critical => self.critical,
        }
    }
}

/// Immutable recovery and escalation policy, built once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Retries allowed before backoff gives up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay of the first retry; doubled on every further attempt.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    /// How many recent failures are considered for escalation.
    #[serde(default = "default_escalation_window")]
    pub escalation_window: usize,
    #[serde(default)]
    pub escalation_thresholds: EscalationThresholds,
    /// Maximum entries kept in the session error log; unbounded when unset.
    #[serde(default)]
    pub error_log_limit: Option<usize>,
    /// Failure type names that are always critical.
    #[serde(default = "default_fatal_error_types")]
    pub fatal_error_types: Vec<String>,
    #[serde(default)]
    pub strategies: StrategyTable,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    1
}

fn default_escalation_window() -> usize {
    10
}

fn default_fatal_error_types() -> Vec<String> {
    [
        "OutOfMemory",
        "MemoryError",
        "Interrupted",
        "KeyboardInterrupt",
        "SystemExit",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            escalation_window: default_escalation_window(),
            escalation_thresholds: EscalationThresholds::default(),
            error_log_limit: None,
            fatal_error_types: default_fatal_error_types(),
            strategies: StrategyTable::default(),
        }
    }
}

impl RecoveryPolicy {
    /// Delay before retry number `attempt` (zero-based): `base * 2^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_secs(self.backoff_base_secs.saturating_mul(factor))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.escalation_window == 0 {
            anyhow::bail!("recovery.escalation_window must be at least 1");
        }
        if self.error_log_limit == Some(0) {
            anyhow::bail!("recovery.error_log_limit must be at least 1 when set");
        }
        Ok(())
    }

    fn is_fatal(&self, error_type: &str) -> bool {
        let wanted = normalize_type_name(error_type);
        self.fatal_error_types
            .iter()
            .any(|t| normalize_type_name(t) == wanted)
    }

    /// Assign a category and severity to a failure.
    ///
    /// Category: an explicit `category` context hint, then keywords in the
    /// message, then keywords in the type name, defaulting to tool
    /// execution. Severity: fatal types are critical; workflow and external
    /// API failures are high; quality and tool execution are medium;
    /// everything else is low.
    pub fn classify(&self, failure: &FailureReport) -> Classification {
        let category = failure
            .category_hint()
            .or_else(|| ErrorCategory::match_keywords(&failure.message))
            .or_else(|| ErrorCategory::match_keywords(&failure.error_type))
            .unwrap_or(ErrorCategory::ToolExecution);

        let severity = if self.is_fatal(&failure.error_type) {
            ErrorSeverity::Critical
        } else {
            match category {
                ErrorCategory::Workflow | ErrorCategory::ExternalApi => ErrorSeverity::High,
                ErrorCategory::Quality | ErrorCategory::ToolExecution => ErrorSeverity::Medium,
                ErrorCategory::Validation | ErrorCategory::FileProcessing => ErrorSeverity::Low,
            }
        };

        Classification { category, severity }
    }
}

fn normalize_type_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(error_type: &str, message: &str) -> Classification {
        RecoveryPolicy::default().classify(&FailureReport::new(error_type, message))
    }

    #[test]
    fn test_category_from_message_keywords() {
        assert_eq!(classify("Error", "required field missing").category, ErrorCategory::Validation);
        assert_eq!(classify("Error", "tool crashed").category, ErrorCategory::ToolExecution);
        assert_eq!(classify("Error", "score below bar").category, ErrorCategory::Quality);
        assert_eq!(classify("Error", "bad transition").category, ErrorCategory::Workflow);
        assert_eq!(classify("Error", "rate limit hit").category, ErrorCategory::ExternalApi);
        assert_eq!(classify("Error", "upload rejected").category, ErrorCategory::FileProcessing);
    }

    #[test]
    fn test_category_priority_follows_table_order() {
        // "invalid" (validation) outranks "file" (file processing)
        assert_eq!(classify("Error", "invalid file").category, ErrorCategory::Validation);
    }

    #[test]
    fn test_category_falls_back_to_type_name_then_default() {
        assert_eq!(classify("ConnectionError", "oops").category, ErrorCategory::ExternalApi);
        assert_eq!(classify("Error", "something odd").category, ErrorCategory::ToolExecution);
    }

    #[test]
    fn test_category_hint_in_context_wins() {
        let report = FailureReport::new("Error", "tool crashed")
            .with_context("category", json!("external_api"));
        let classification = RecoveryPolicy::default().classify(&report);
        assert_eq!(classification.category, ErrorCategory::ExternalApi);

        let bogus = FailureReport::new("Error", "tool crashed").with_context("category", json!("cosmic"));
        assert_eq!(
            RecoveryPolicy::default().classify(&bogus).category,
            ErrorCategory::ToolExecution
        );
    }

    #[test]
    fn test_severity_defaults_by_category() {
        assert_eq!(classify("Error", "workflow stuck").severity, ErrorSeverity::High);
        assert_eq!(classify("Error", "service unavailable").severity, ErrorSeverity::High);
        assert_eq!(classify("Error", "quality too low").severity, ErrorSeverity::Medium);
        assert_eq!(classify("Error", "timeout").severity, ErrorSeverity::Medium);
        assert_eq!(classify("Error", "invalid input").severity, ErrorSeverity::Low);
        assert_eq!(classify("Error", "bad format").severity, ErrorSeverity::Low);
    }

    #[test]
    fn test_fatal_types_are_critical_regardless_of_category() {
        assert_eq!(classify("MemoryError", "invalid input").severity, ErrorSeverity::Critical);
        assert_eq!(classify("keyboard_interrupt", "x").severity, ErrorSeverity::Critical);
        assert_eq!(classify("Out-Of-Memory", "x").severity, ErrorSeverity::Critical);
    }

    #[test]
    fn test_backoff_delay_doubles() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(200), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_policy_validate() {
        assert!(RecoveryPolicy::default().validate().is_ok());
        let policy = RecoveryPolicy {
            escalation_window: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_thresholds_lookup() {
        let t = EscalationThresholds::default();
        assert_eq!(t.for_severity(ErrorSeverity::Low), 5);
        assert_eq!(t.for_severity(ErrorSeverity::Medium), 3);
        assert_eq!(t.for_severity(ErrorSeverity::High), 1);
        assert_eq!(t.for_severity(ErrorSeverity::Critical), 0);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&ErrorCategory::ExternalApi).unwrap(), "\"external_api\"");
        assert_eq!(
            serde_json::to_string(&RecommendedAction::EscalateToHuman).unwrap(),
            "\"escalate_to_human\""
        );
        assert_eq!("tool-execution".parse::<ErrorCategory>().unwrap(), ErrorCategory::ToolExecution);
    }
}
