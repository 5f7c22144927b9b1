//! Session state: the per-project key/value store shared with collaborators.
//!
//! The store is a JSON object. Well-known keys are enumerated once in
//! [`StateKey`]; absent and explicitly-null keys both read as "not yet
//! produced". Helpers never panic on a malformed value, they surface a
//! [`WorkflowError`] instead.
//!
//! Collaborators write through [`SessionState::update`],
//! [`SessionState::append_update`], [`SessionState::take`] and
//! [`SessionState::merge`]. All of them refuse the keys in
//! [`StateKey::MANAGED`], which only the workflow core may change.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::WorkflowError;
use crate::phase::Phase;

/// Closed registry of the state keys the workflow core and its
/// collaborators agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    // Project management
    ProjectStatus,
    CurrentPhase,
    ClientId,
    ProjectId,
    ProjectName,
    CreatedAt,
    LastUpdated,

    // Phase artifacts
    ClientBrief,
    MarketResearch,
    VisualDirection,
    GeneratedLogos,
    SelectedLogo,
    BrandSystem,
    FinalAssets,

    // Files
    UploadedFiles,
    GeneratedFiles,

    // Quality control
    ApprovalCheckpoints,
    QualityScores,
    QualityEvaluations,

    // Error handling
    LastError,
    RetryCount,
    EscalationTriggered,
    ErrorLog,

    // Audit
    TransitionHistory,
    LastTransition,
    ReworkHistory,
}

impl StateKey {
    pub const ARTIFACTS: [StateKey; 7] = [
        StateKey::ClientBrief,
        StateKey::MarketResearch,
        StateKey::VisualDirection,
        StateKey::GeneratedLogos,
        StateKey::SelectedLogo,
        StateKey::BrandSystem,
        StateKey::FinalAssets,
    ];

    /// Keys written only by the workflow manager and the failure engine.
    pub const MANAGED: [StateKey; 5] = [
        StateKey::CurrentPhase,
        StateKey::TransitionHistory,
        StateKey::LastTransition,
        StateKey::ReworkHistory,
        StateKey::ErrorLog,
    ];

    /// Whether `name` is one of the [`MANAGED`](Self::MANAGED) keys.
    pub fn is_managed(name: &str) -> bool {
        Self::MANAGED.iter().any(|key| key.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StateKey::ProjectStatus => "project_status",
            StateKey::CurrentPhase => "current_phase",
            StateKey::ClientId => "client_id",
            StateKey::ProjectId => "project_id",
            StateKey::ProjectName => "project_name",
            StateKey::CreatedAt => "created_at",
            StateKey::LastUpdated => "last_updated",
            StateKey::ClientBrief => "client_brief",
            StateKey::MarketResearch => "market_research",
            StateKey::VisualDirection => "visual_direction",
            StateKey::GeneratedLogos => "generated_logos",
            StateKey::SelectedLogo => "selected_logo",
            StateKey::BrandSystem => "brand_system",
            StateKey::FinalAssets => "final_assets",
            StateKey::UploadedFiles => "uploaded_files",
            StateKey::GeneratedFiles => "generated_files",
            StateKey::ApprovalCheckpoints => "approval_checkpoints",
            StateKey::QualityScores => "quality_scores",
            StateKey::QualityEvaluations => "quality_evaluations",
            StateKey::LastError => "last_error",
            StateKey::RetryCount => "retry_count",
            StateKey::EscalationTriggered => "escalation_triggered",
            StateKey::ErrorLog => "error_log",
            StateKey::TransitionHistory => "transition_history",
            StateKey::LastTransition => "last_transition",
            StateKey::ReworkHistory => "rework_history",
        }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for StateKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Project lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Active,
    Paused,
    Completed,
    Cancelled,
}

/// Per-project key/value store.
///
/// Keys are plain strings so collaborators may store anything, but the
/// workflow core only ever addresses entries through [`StateKey`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState {
    values: Map<String, Value>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the state of a brand new project session.
    pub fn initial(client_id: &str, project_name: Option<&str>) -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        let project_id = format!("proj_{}", &simple[..8]);
        let project_name = project_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Project {project_id}"));

        let mut state = Self::new();
        state.set(StateKey::ProjectStatus, json_of(ProjectStatus::Active));
        state.set(StateKey::CurrentPhase, Value::from(Phase::INITIAL.as_str()));
        state.set(StateKey::ClientId, Value::from(client_id));
        state.set(StateKey::ProjectId, Value::from(project_id));
        state.set(StateKey::ProjectName, Value::from(project_name));
        state.set(StateKey::CreatedAt, Value::from(Utc::now().to_rfc3339()));

        for key in StateKey::ARTIFACTS {
            state.set(key, Value::Null);
        }
        state.set(StateKey::UploadedFiles, Value::Array(Vec::new()));
        state.set(StateKey::GeneratedFiles, Value::Array(Vec::new()));
        state.set(StateKey::ApprovalCheckpoints, Value::Object(Map::new()));
        state.set(StateKey::QualityScores, Value::Object(Map::new()));
        state.set(StateKey::LastError, Value::Null);
        state.set(StateKey::RetryCount, Value::from(0));
        state.set(StateKey::EscalationTriggered, Value::from(false));
        state
    }

    /// Wrap an existing JSON object.
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Read a key. Explicit `null` reads the same as an absent key.
    pub fn get(&self, key: impl AsRef<str>) -> Option<&Value> {
        self.values.get(key.as_ref()).filter(|v| !v.is_null())
    }

    /// Check whether an artifact exists. Empty containers still count.
    pub fn contains(&self, key: impl AsRef<str>) -> bool {
        self.get(key).is_some()
    }

    pub(crate) fn set(&mut self, key: impl AsRef<str>, value: Value) {
        self.values.insert(key.as_ref().to_string(), value);
    }

    /// Append to a list-valued key, creating the list when absent.
    pub(crate) fn append(&mut self, key: impl AsRef<str>, value: Value) -> Result<(), WorkflowError> {
        let key = key.as_ref();
        self.ensure_list(key)?;
        match self.values.get_mut(key) {
            Some(Value::Array(items)) => items.push(value),
            _ => {
                self.values.insert(key.to_string(), Value::Array(vec![value]));
            }
        }
        Ok(())
    }

    /// Fail unless `key` is absent, null or a list.
    pub fn ensure_list(&self, key: impl AsRef<str>) -> Result<(), WorkflowError> {
        let key = key.as_ref();
        match self.values.get(key) {
            None | Some(Value::Null) | Some(Value::Array(_)) => Ok(()),
            Some(other) => Err(WorkflowError::NotAList {
                key: key.to_string(),
                found: value_kind(other),
            }),
        }
    }

    /// Fail unless `key` is absent, null or an object.
    pub fn ensure_object(&self, key: impl AsRef<str>) -> Result<(), WorkflowError> {
        let key = key.as_ref();
        match self.values.get(key) {
            None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
            Some(other) => Err(WorkflowError::NotAnObject {
                key: key.to_string(),
                found: value_kind(other),
            }),
        }
    }

    /// Insert `field` into the object stored under `key`, creating it when absent.
    pub(crate) fn set_field(
        &mut self,
        key: impl AsRef<str>,
        field: &str,
        value: Value,
    ) -> Result<(), WorkflowError> {
        let key = key.as_ref();
        self.ensure_object(key)?;
        match self.values.get_mut(key) {
            Some(Value::Object(map)) => {
                map.insert(field.to_string(), value);
            }
            _ => {
                let mut map = Map::new();
                map.insert(field.to_string(), value);
                self.values.insert(key.to_string(), Value::Object(map));
            }
        }
        Ok(())
    }

    /// Items of a list-valued key; absent reads as empty.
    pub fn list(&self, key: impl AsRef<str>) -> Result<&[Value], WorkflowError> {
        let key = key.as_ref();
        self.ensure_list(key)?;
        Ok(match self.values.get(key) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        })
    }

    /// Drop the oldest entries of a list-valued key so at most `keep` remain.
    pub(crate) fn trim_list(&mut self, key: impl AsRef<str>, keep: usize) -> Result<(), WorkflowError> {
        let key = key.as_ref();
        self.ensure_list(key)?;
        if let Some(Value::Array(items)) = self.values.get_mut(key) {
            if items.len() > keep {
                let excess = items.len() - keep;
                items.drain(..excess);
            }
        }
        Ok(())
    }

    /// The recorded phase. Absent or null reads as the initial phase.
    pub fn current_phase(&self) -> Result<Phase, WorkflowError> {
        match self.get(StateKey::CurrentPhase) {
            None => Ok(Phase::INITIAL),
            Some(Value::String(s)) => s.parse(),
            Some(other) => Err(WorkflowError::InvalidPhase(other.to_string())),
        }
    }

    pub fn get_str(&self, key: impl AsRef<str>) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: impl AsRef<str>) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    /// Shallow-merge collaborator `updates` and stamp `last_updated`.
    ///
    /// Returns the keys that were written, in the order given. Any managed
    /// key rejects the whole batch before anything is written.
    pub fn merge(&mut self, updates: Map<String, Value>) -> Result<Vec<String>, WorkflowError> {
        if let Some(key) = updates.keys().find(|k| StateKey::is_managed(k)) {
            return Err(WorkflowError::ManagedKey(key.clone()));
        }
        let keys: Vec<String> = updates.keys().cloned().collect();
        self.values.extend(updates);
        self.touch();
        Ok(keys)
    }

    /// Collaborator write of a single key.
    pub fn update(&mut self, key: &str, value: Value) -> Result<(), WorkflowError> {
        writable(key)?;
        self.set(key, value);
        self.touch();
        Ok(())
    }

    /// Collaborator append to a list-valued key.
    pub fn append_update(&mut self, key: &str, value: Value) -> Result<(), WorkflowError> {
        writable(key)?;
        self.append(key, value)?;
        self.touch();
        Ok(())
    }

    /// Collaborator removal; returns the previous value.
    pub fn take(&mut self, key: &str) -> Result<Option<Value>, WorkflowError> {
        writable(key)?;
        let previous = self.values.remove(key);
        self.touch();
        Ok(previous)
    }

    fn touch(&mut self) {
        self.set(StateKey::LastUpdated, Value::from(Utc::now().to_rfc3339()));
    }

    /// Load a session state from a JSON file.
    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path).map_err(|source| WorkflowError::StateRead {
            path: path.to_path_buf(),
            source,
        })?;
        let values: Map<String, Value> =
            serde_json::from_str(&content).map_err(|source| WorkflowError::StateParse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self { values })
    }

    /// Save the session state as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), WorkflowError> {
        let write_err = |source| WorkflowError::StateWrite {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }
        let content = serde_json::to_string_pretty(&self.values)
            .map_err(|e| WorkflowError::Other(anyhow::Error::new(e)))?;
        std::fs::write(path, content).map_err(write_err)
    }
}

fn writable(key: &str) -> Result<(), WorkflowError> {
    if StateKey::is_managed(key) {
        return Err(WorkflowError::ManagedKey(key.to_string()));
    }
    Ok(())
}

/// Serialize a value known to be representable as JSON.
pub(crate) fn json_of<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Human-readable JSON type name for error messages.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Truthiness used by the field-coverage scorers: null, false, zero and
/// empty containers are "not filled in".
pub(crate) fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
