//! Interfaces to the engine's external collaborators.
//!
//! The engine never looks at page structure. Everything it knows about the
//! outside world arrives through these traits:
//!
//! | Trait              | Provides                                               |
//! |--------------------|--------------------------------------------------------|
//! | `ContentExtractor` | discovery rows and task instructions                   |
//! | `AnswerService`    | option selection and generated text                    |
//! | `Navigator`        | the current view and context transitions               |
//! | `TaskPage`         | in-page actions on the task currently open             |
//! | `Notifier`         | non-blocking user notifications                        |
//!
//! Every `Navigator::transition_*` call is assumed to end the current
//! execution context. Callers must persist state before invoking one and must
//! not do further work after it returns.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::executor::artifact::Artifact;
use crate::task::RawTaskDescriptor;

/// Where the hosting context currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "view", content = "locator", rename_all = "snake_case")]
pub enum View {
    /// The course's task list (grades page)
    Discovery,
    /// A task page, identified by its locator
    Task(String),
    /// Anything else: a different course, a landing page, an unknown page
    Other(String),
}

/// Instructions extracted from a written or discussion task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instructions {
    pub text: String,
    /// Grading criteria, when the page shows a rubric
    #[serde(default)]
    pub rubric: Option<String>,
}

impl Instructions {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            rubric: None,
        }
    }

    /// Instructions with the rubric appended under a heading.
    pub fn full_text(&self) -> String {
        match self.rubric.as_deref().map(str::trim) {
            Some(rubric) if !rubric.is_empty() => {
                format!("{}\n\nGrading Criteria:\n{}", self.text.trim(), rubric)
            }
            _ => self.text.trim().to_string(),
        }
    }
}

/// A question visible on the current quiz step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Position on the current step
    pub index: usize,
    pub text: String,
    pub options: Vec<String>,
    /// Whether more than one option may be selected
    #[serde(default)]
    pub multi_select: bool,
}

/// The answer service's choice for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerChoice {
    /// Zero-based option indices
    pub selected: Vec<usize>,
    /// 0-100
    #[serde(default)]
    pub confidence: u8,
    #[serde(default)]
    pub explanation: String,
}

/// Submission channels a written task page exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionChannels {
    #[serde(default)]
    pub text_entry: bool,
    #[serde(default)]
    pub file_upload: bool,
}

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// All task rows on the discovery view, in page order.
    async fn discover(&self) -> Result<Vec<RawTaskDescriptor>>;

    /// Instructions of the task page currently open.
    async fn extract_instructions(&self) -> Result<Instructions>;
}

#[async_trait]
pub trait AnswerService: Send + Sync {
    async fn answer_question(&self, question: &Question) -> Result<AnswerChoice, ServiceError>;

    async fn generate_text(&self, prompt: &str) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait Navigator: Send + Sync {
    async fn current_view(&self) -> Result<View>;

    async fn transition_to(&self, locator: &str) -> Result<()>;

    async fn transition_to_discovery_view(&self) -> Result<()>;

    /// Returns `false` without transitioning when no next course exists.
    async fn transition_to_next_course(&self) -> Result<bool>;
}

/// In-page actions on the open task. Returned booleans report whether the
/// corresponding control was found and usable.
#[async_trait]
pub trait TaskPage: Send + Sync {
    async fn unanswered_questions(&self) -> Result<Vec<Question>>;

    async fn select_answers(&self, question: &Question, indices: &[usize]) -> Result<()>;

    /// Move to the next quiz step. `false` when there is none.
    async fn advance(&self) -> Result<bool>;

    /// Press the final submit control.
    async fn submit(&self) -> Result<bool>;

    async fn submission_channels(&self) -> Result<SubmissionChannels>;

    async fn enter_text(&self, text: &str) -> Result<bool>;

    async fn upload(&self, artifact: &Artifact) -> Result<bool>;

    /// Hand the artifact to the user for manual submission.
    async fn offer_download(&self, artifact: &Artifact) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Non-blocking user notifications. Implementations must not fail.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);
}

/// Notifier that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info | NoticeLevel::Success => tracing::info!(notice = %message),
            NoticeLevel::Error => tracing::warn!(notice = %message),
        }
    }
}
