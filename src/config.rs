//! Configuration for brandflow.
//!
//! Settings live in `brandflow.toml` in the project directory. Every field
//! has a default, so a missing file or a partial file is fine.
//!
//! ```toml
//! [workflow]
//! rework_policy = "clear"
//! stuck_after_minutes = 60
//!
//! [gates.thresholds]
//! brief_completeness = 0.9
//!
//! [recovery]
//! max_retries = 5
//! error_log_limit = 200
//!
//! [recovery.escalation_thresholds]
//! medium = 2
//!
//! [quality]
//! consecutive_failure_limit = 2
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::gates::standards::QualityEscalationPolicy;
use crate::gates::{GateRegistry, QualityStandards};
use crate::orchestrator::WorkflowSettings;
use crate::recovery::RecoveryPolicy;

/// Config file name looked up in the project directory.
pub const CONFIG_FILE: &str = "brandflow.toml";

/// Default session state location, relative to the project directory.
pub const DEFAULT_STATE_FILE: &str = ".brandflow/session.json";

/// `[gates]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatesSection {
    /// Threshold overrides keyed by gate name.
    #[serde(default)]
    pub thresholds: HashMap<String, f64>,
}

/// The complete brandflow.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrandflowToml {
    #[serde(default)]
    pub workflow: WorkflowSettings,
    #[serde(default)]
    pub gates: GatesSection,
    #[serde(default)]
    pub recovery: RecoveryPolicy,
    #[serde(default)]
    pub quality: QualityEscalationPolicy,
}

impl BrandflowToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse brandflow.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Load `brandflow.toml` from `project_dir`, or defaults when absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.recovery.validate()?;
        for (name, threshold) in &self.gates.thresholds {
            if !(0.0..=1.0).contains(threshold) {
                anyhow::bail!(
                    "Invalid threshold {} for gate '{}'. Thresholds must be between 0.0 and 1.0",
                    threshold,
                    name
                );
            }
        }
        if !(0.0..=1.0).contains(&self.quality.minimum_overall_score) {
            anyhow::bail!(
                "quality.minimum_overall_score must be between 0.0 and 1.0, got {}",
                self.quality.minimum_overall_score
            );
        }
        Ok(())
    }

    /// Reference gates with the configured threshold overrides applied.
    pub fn gate_registry(&self) -> Result<GateRegistry> {
        GateRegistry::reference()
            .with_threshold_overrides(&self.gates.thresholds)
            .context("Failed to apply [gates.thresholds]")
    }

    pub fn quality_standards(&self) -> QualityStandards {
        QualityStandards::reference().with_escalation(self.quality.clone())
    }
}

/// Runtime configuration: resolved paths plus the parsed config file.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub state_file: PathBuf,
    pub settings: BrandflowToml,
}

impl Config {
    /// Resolve paths against `project_dir` and load the config file.
    ///
    /// An explicit `config_file` must exist; the default one is optional.
    pub fn new(
        project_dir: PathBuf,
        state_file: Option<PathBuf>,
        config_file: Option<PathBuf>,
    ) -> Result<Self> {
        let state_file = resolve(&project_dir, state_file.unwrap_or_else(|| DEFAULT_STATE_FILE.into()));
        let settings = match config_file {
            Some(path) => BrandflowToml::load(&resolve(&project_dir, path))?,
            None => BrandflowToml::load_or_default(&project_dir)?,
        };
        Ok(Self {
            project_dir,
            state_file,
            settings,
        })
    }
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::ReworkPolicy;
    use crate::phase::Phase;
    use tempfile::tempdir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = BrandflowToml::parse("").unwrap();
        assert_eq!(config, BrandflowToml::default());
        assert_eq!(config.workflow.stuck_after_minutes, 30);
        assert_eq!(config.recovery.max_retries, 3);
        assert_eq!(config.recovery.escalation_window, 10);
        assert_eq!(config.recovery.error_log_limit, None);
        assert_eq!(config.quality.consecutive_failure_limit, 3);
    }

    #[test]
    fn test_parse_partial_sections() {
        let config = BrandflowToml::parse(
            r#"
[workflow]
rework_policy = "clear"

[gates.thresholds]
brief_completeness = 0.9

[recovery]
error_log_limit = 50

[recovery.escalation_thresholds]
medium = 2
"#,
        )
        .unwrap();
        assert_eq!(config.workflow.rework_policy, ReworkPolicy::Clear);
        assert_eq!(config.workflow.stuck_after_minutes, 30);
        assert_eq!(config.recovery.error_log_limit, Some(50));
        assert_eq!(config.recovery.escalation_thresholds.medium, 2);
        assert_eq!(config.recovery.escalation_thresholds.high, 1);

        let registry = config.gate_registry().unwrap();
        assert_eq!(registry.gates_for(Phase::Discovery)[0].threshold, 0.9);
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let err = BrandflowToml::parse("[gates.thresholds]\nlogo_quality = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("logo_quality"));
    }

    #[test]
    fn test_unknown_gate_override_fails_registry() {
        let config = BrandflowToml::parse("[gates.thresholds]\nsparkle = 0.5\n").unwrap();
        let err = config.gate_registry().unwrap_err();
        assert!(format!("{err:#}").contains("sparkle"));
    }

    #[test]
    fn test_rejects_invalid_rework_policy() {
        assert!(BrandflowToml::parse("[workflow]\nrework_policy = \"wipe\"\n").is_err());
    }

    #[test]
    fn test_rejects_zero_escalation_window() {
        assert!(BrandflowToml::parse("[recovery]\nescalation_window = 0\n").is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = BrandflowToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config, BrandflowToml::default());
    }

    #[test]
    fn test_config_resolves_paths() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[workflow]\nstuck_after_minutes = 5\n",
        )
        .unwrap();

        let config = Config::new(dir.path().to_path_buf(), None, None).unwrap();
        assert_eq!(config.state_file, dir.path().join(DEFAULT_STATE_FILE));
        assert_eq!(config.settings.workflow.stuck_after_minutes, 5);

        let custom = Config::new(
            dir.path().to_path_buf(),
            Some(PathBuf::from("elsewhere/state.json")),
            None,
        )
        .unwrap();
        assert_eq!(custom.state_file, dir.path().join("elsewhere/state.json"));
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempdir().unwrap();
        let result = Config::new(
            dir.path().to_path_buf(),
            None,
            Some(PathBuf::from("missing.toml")),
        );
        assert!(result.is_err());
    }
}
