//! Configuration for Waypoint.
//!
//! Settings are layered: `.waypoint/waypoint.toml` → environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [run]
//! continue_to_next_course = false
//! force_reprocess_satisfied = false
//! auto_submit = true
//!
//! [limits]
//! step_limit = 50
//! staleness_minutes = 30
//! pass_threshold = 80.0
//! max_attempts = 3
//! min_instructions_chars = 50
//!
//! [pacing]
//! page_settle_ms = 3000
//! between_questions_ms = 500
//! submit_settle_ms = 1500
//! between_tasks_ms = 2000
//!
//! [policy]
//! deferred = "complete"
//! artifact_format = "txt"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::executor::artifact::ArtifactFormat;
use crate::orchestrator::state::RunOptions;
use crate::task::DEFAULT_PASS_THRESHOLD;

pub const WAYPOINT_DIR: &str = ".waypoint";
pub const CONFIG_FILE: &str = "waypoint.toml";
pub const SNAPSHOT_FILE: &str = "snapshot.json";

/// `.waypoint` directory under the project root.
pub fn get_waypoint_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(WAYPOINT_DIR)
}

/// How a deferred (manual-only) task is accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferPolicy {
    /// Finished without credit; nothing recorded as an error
    #[default]
    Complete,
    /// Finished without credit and listed in `counters.errors`
    RecordError,
}

impl std::fmt::Display for DeferPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeferPolicy::Complete => write!(f, "complete"),
            DeferPolicy::RecordError => write!(f, "record_error"),
        }
    }
}

impl std::str::FromStr for DeferPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "complete" => Ok(DeferPolicy::Complete),
            "record_error" | "record-error" => Ok(DeferPolicy::RecordError),
            _ => anyhow::bail!(
                "Invalid defer policy '{}'. Valid values: complete, record_error",
                s
            ),
        }
    }
}

/// Default run options for `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default)]
    pub continue_to_next_course: bool,
    #[serde(default)]
    pub force_reprocess_satisfied: bool,
    #[serde(default = "default_true")]
    pub auto_submit: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            continue_to_next_course: false,
            force_reprocess_satisfied: false,
            auto_submit: true,
        }
    }
}

impl RunSection {
    pub fn options(&self) -> RunOptions {
        RunOptions {
            continue_to_next_course: self.continue_to_next_course,
            force_reprocess_satisfied: self.force_reprocess_satisfied,
            auto_submit: self.auto_submit,
        }
    }
}

/// Safety bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
    /// Maximum quiz steps per task execution
    #[serde(default = "default_step_limit")]
    pub step_limit: u32,
    /// Snapshots older than this are abandoned
    #[serde(default = "default_staleness_minutes")]
    pub staleness_minutes: u32,
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    /// Arrival/execution attempts per task across restarts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_min_instructions_chars")]
    pub min_instructions_chars: usize,
}

fn default_step_limit() -> u32 {
    50
}

fn default_staleness_minutes() -> u32 {
    30
}

fn default_pass_threshold() -> f64 {
    DEFAULT_PASS_THRESHOLD
}

fn default_max_attempts() -> u32 {
    3
}

fn default_min_instructions_chars() -> usize {
    50
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            step_limit: default_step_limit(),
            staleness_minutes: default_staleness_minutes(),
            pass_threshold: default_pass_threshold(),
            max_attempts: default_max_attempts(),
            min_instructions_chars: default_min_instructions_chars(),
        }
    }
}

/// Pacing delays in milliseconds. These only space out actions; correctness
/// never depends on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingSection {
    #[serde(default = "default_page_settle_ms")]
    pub page_settle_ms: u64,
    #[serde(default = "default_between_questions_ms")]
    pub between_questions_ms: u64,
    #[serde(default = "default_submit_settle_ms")]
    pub submit_settle_ms: u64,
    #[serde(default = "default_between_tasks_ms")]
    pub between_tasks_ms: u64,
}

fn default_page_settle_ms() -> u64 {
    3000
}

fn default_between_questions_ms() -> u64 {
    500
}

fn default_submit_settle_ms() -> u64 {
    1500
}

fn default_between_tasks_ms() -> u64 {
    2000
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            page_settle_ms: default_page_settle_ms(),
            between_questions_ms: default_between_questions_ms(),
            submit_settle_ms: default_submit_settle_ms(),
            between_tasks_ms: default_between_tasks_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySection {
    #[serde(default)]
    pub deferred: DeferPolicy,
    #[serde(default)]
    pub artifact_format: ArtifactFormat,
}

/// Parsed `.waypoint/waypoint.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaypointToml {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub pacing: PacingSection,
    #[serde(default)]
    pub policy: PolicySection,
}

impl WaypointToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse waypoint.toml")
    }

    /// Load `waypoint.toml` from `waypoint_dir`, or defaults when absent.
    pub fn load_or_default(waypoint_dir: &Path) -> Result<Self> {
        let config_path = waypoint_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize waypoint.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Engine settings with environment overrides applied.
    pub fn settings(&self) -> EngineSettings {
        self.settings_with_env(|key| std::env::var(key).ok())
    }

    /// Engine settings with overrides read through `env`.
    pub fn settings_with_env<F>(&self, env: F) -> EngineSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = EngineSettings {
            step_limit: self.limits.step_limit,
            staleness: Duration::from_secs(u64::from(self.limits.staleness_minutes) * 60),
            pass_threshold: self.limits.pass_threshold,
            max_attempts: self.limits.max_attempts.max(1),
            min_instructions_chars: self.limits.min_instructions_chars,
            pacing: Pacing::from(&self.pacing),
            defer_policy: self.policy.deferred,
            artifact_format: self.policy.artifact_format,
        };

        if let Some(minutes) = env("WAYPOINT_STALENESS_MINUTES").and_then(|v| v.parse::<u64>().ok())
        {
            settings.staleness = Duration::from_secs(minutes.saturating_mul(60));
        }
        if let Some(limit) = env("WAYPOINT_STEP_LIMIT").and_then(|v| v.parse::<u32>().ok()) {
            settings.step_limit = limit;
        }
        if env("WAYPOINT_NO_PACING").is_some_and(|v| v != "false" && v != "0") {
            settings.pacing = Pacing::none();
        }

        settings
    }
}

/// Resolved pacing delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub page_settle: Duration,
    pub between_questions: Duration,
    pub submit_settle: Duration,
    pub between_tasks: Duration,
}

impl Pacing {
    /// No delays at all. Used by tests and rehearsal runs.
    pub fn none() -> Self {
        Self {
            page_settle: Duration::ZERO,
            between_questions: Duration::ZERO,
            submit_settle: Duration::ZERO,
            between_tasks: Duration::ZERO,
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::from(&PacingSection::default())
    }
}

impl From<&PacingSection> for Pacing {
    fn from(section: &PacingSection) -> Self {
        Self {
            page_settle: Duration::from_millis(section.page_settle_ms),
            between_questions: Duration::from_millis(section.between_questions_ms),
            submit_settle: Duration::from_millis(section.submit_settle_ms),
            between_tasks: Duration::from_millis(section.between_tasks_ms),
        }
    }
}

/// Everything the engine and executor need at runtime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub step_limit: u32,
    pub staleness: Duration,
    pub pass_threshold: f64,
    pub max_attempts: u32,
    pub min_instructions_chars: usize,
    pub pacing: Pacing,
    pub defer_policy: DeferPolicy,
    pub artifact_format: ArtifactFormat,
}

impl Default for EngineSettings {
    fn default() -> Self {
        WaypointToml::default().settings_with_env(|_| None)
    }
}

impl EngineSettings {
    pub fn without_pacing(mut self) -> Self {
        self.pacing = Pacing::none();
        self
    }

    pub fn staleness_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.staleness).unwrap_or(chrono::Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.step_limit, 50);
        assert_eq!(settings.staleness, Duration::from_secs(30 * 60));
        assert_eq!(settings.pass_threshold, 80.0);
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.min_instructions_chars, 50);
        assert_eq!(settings.pacing.between_questions, Duration::from_millis(500));
        assert_eq!(settings.defer_policy, DeferPolicy::Complete);
        assert_eq!(settings.artifact_format, ArtifactFormat::Txt);
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let content = r#"
[run]
continue_to_next_course = true

[limits]
step_limit = 10

[policy]
deferred = "record_error"
artifact_format = "md"
"#;
        let toml = WaypointToml::parse(content).unwrap();
        assert!(toml.run.continue_to_next_course);
        assert!(toml.run.auto_submit);
        assert_eq!(toml.limits.step_limit, 10);
        assert_eq!(toml.limits.staleness_minutes, 30);
        assert_eq!(toml.pacing.submit_settle_ms, 1500);
        assert_eq!(toml.policy.deferred, DeferPolicy::RecordError);
        assert_eq!(toml.policy.artifact_format, ArtifactFormat::Md);
    }

    #[test]
    fn test_parse_rejects_unknown_policy() {
        let content = r#"
[policy]
deferred = "ignore"
"#;
        assert!(WaypointToml::parse(content).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let toml = WaypointToml::default();
        let settings = toml.settings_with_env(|key| match key {
            "WAYPOINT_STALENESS_MINUTES" => Some("5".into()),
            "WAYPOINT_STEP_LIMIT" => Some("7".into()),
            "WAYPOINT_NO_PACING" => Some("1".into()),
            _ => None,
        });
        assert_eq!(settings.staleness, Duration::from_secs(300));
        assert_eq!(settings.step_limit, 7);
        assert_eq!(settings.pacing, Pacing::none());
    }

    #[test]
    fn test_env_override_ignores_garbage() {
        let settings = WaypointToml::default()
            .settings_with_env(|key| (key == "WAYPOINT_STEP_LIMIT").then(|| "lots".to_string()));
        assert_eq!(settings.step_limit, 50);
    }

    #[test]
    fn test_huge_staleness_override_saturates() {
        let settings = WaypointToml::default().settings_with_env(|key| {
            (key == "WAYPOINT_STALENESS_MINUTES").then(|| u64::MAX.to_string())
        });
        assert_eq!(settings.staleness, Duration::from_secs(u64::MAX));
        assert_eq!(settings.staleness_chrono(), chrono::Duration::MAX);
    }

    #[test]
    fn test_max_attempts_never_zero() {
        let mut toml = WaypointToml::default();
        toml.limits.max_attempts = 0;
        assert_eq!(toml.settings_with_env(|_| None).max_attempts, 1);
    }

    #[test]
    fn test_run_section_options() {
        let section = RunSection {
            continue_to_next_course: true,
            force_reprocess_satisfied: true,
            auto_submit: false,
        };
        let options = section.options();
        assert!(options.continue_to_next_course);
        assert!(options.force_reprocess_satisfied);
        assert!(!options.auto_submit);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut toml = WaypointToml::default();
        toml.limits.step_limit = 12;
        toml.save(&dir.path().join(CONFIG_FILE)).unwrap();

        let loaded = WaypointToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.limits.step_limit, 12);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let loaded = WaypointToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.limits.step_limit, 50);
    }

    #[test]
    fn test_defer_policy_from_str() {
        assert_eq!("complete".parse::<DeferPolicy>().unwrap(), DeferPolicy::Complete);
        assert_eq!(
            "Record-Error".parse::<DeferPolicy>().unwrap(),
            DeferPolicy::RecordError
        );
        assert!("skip".parse::<DeferPolicy>().is_err());
    }
}
