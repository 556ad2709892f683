//! Task data model.
//!
//! A `Task` is one gradable unit of work discovered on a course's discovery
//! view. Tasks are immutable once classified; a restart re-discovers them and
//! the new value supersedes the old one. Identity is the `id`, which is derived
//! from the target locator.

use serde::{Deserialize, Serialize};

/// Default score (percent) at or above which a task counts as satisfied.
pub const DEFAULT_PASS_THRESHOLD: f64 = 80.0;

/// Kind of gradable work. Drives executor dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Quiz,
    WrittenSubmission,
    Discussion,
    PeerReview,
    Programming,
    Practice,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Quiz => write!(f, "quiz"),
            TaskKind::WrittenSubmission => write!(f, "written"),
            TaskKind::Discussion => write!(f, "discussion"),
            TaskKind::PeerReview => write!(f, "peer-review"),
            TaskKind::Programming => write!(f, "programming"),
            TaskKind::Practice => write!(f, "practice"),
        }
    }
}

/// Completion status as shown on the discovery view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Submitted,
    Passed,
    Failed,
    Overdue,
}

/// Grade information parsed from the discovery view.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GradeSnapshot {
    /// Score in percent, when the row shows one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub status: TaskStatus,
}

impl GradeSnapshot {
    pub fn new(score: Option<f64>, status: TaskStatus) -> Self {
        Self { score, status }
    }

    /// True when the task already passed or its score meets `threshold`.
    pub fn is_satisfied(&self, threshold: f64) -> bool {
        self.status == TaskStatus::Passed || self.score.is_some_and(|s| s >= threshold)
    }
}

/// Raw, unclassified task row handed over by the content extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTaskDescriptor {
    pub title: String,
    /// Target locator (usually a URL); `None` when the row has no link
    #[serde(default)]
    pub locator: Option<String>,
    /// Free-form text surrounding the row
    #[serde(default)]
    pub text: String,
    /// Grade cell text, if the extractor isolated one
    #[serde(default)]
    pub grade_text: Option<String>,
}

impl RawTaskDescriptor {
    pub fn new(title: &str, locator: &str, text: &str) -> Self {
        Self {
            title: title.to_string(),
            locator: Some(locator.to_string()),
            text: text.to_string(),
            grade_text: None,
        }
    }

    pub fn with_grade(mut self, grade_text: &str) -> Self {
        self.grade_text = Some(grade_text.to_string());
        self
    }
}

/// A classified unit of gradable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub kind: TaskKind,
    pub locator: String,
    #[serde(default)]
    pub grade: GradeSnapshot,
}

impl Task {
    pub fn new(title: &str, kind: TaskKind, locator: &str, grade: GradeSnapshot) -> Self {
        Self {
            id: task_id(locator),
            title: title.to_string(),
            kind,
            locator: locator.to_string(),
            grade,
        }
    }

    pub fn is_satisfied(&self, threshold: f64) -> bool {
        self.grade.is_satisfied(threshold)
    }
}

/// Derive a stable task id from its locator.
///
/// Query strings, fragments, trailing slashes and letter case of the host part
/// do not change identity, so the same row re-discovered after a restart maps
/// to the same id.
pub fn task_id(locator: &str) -> String {
    let trimmed = locator.trim();
    let end = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
    let path = trimmed[..end].trim_end_matches('/');

    match path.split_once("://") {
        Some((scheme, rest)) => {
            let (host, tail) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
            format!(
                "{}://{}{}",
                scheme.to_ascii_lowercase(),
                host.to_ascii_lowercase(),
                tail
            )
        }
        None => path.to_string(),
    }
}
