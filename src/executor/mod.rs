//! Task executor: the kind-specific completion protocols.
//!
//! | Kind                       | Protocol                                        |
//! |----------------------------|-------------------------------------------------|
//! | `Quiz`, `Practice`         | answer every step, advance, submit at the end   |
//! | `WrittenSubmission`        | instructions → generated text → text or upload  |
//! | `Discussion`               | instructions → generated text → text entry      |
//! | `PeerReview`, `Programming`| deferred to a human, never executed             |
//!
//! `execute` never returns an error: every failure becomes
//! `TaskOutcome::Failed` so the run can continue with the next task.

pub mod artifact;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{
    AnswerChoice, AnswerService, ContentExtractor, NoticeLevel, Notifier, Question, TaskPage,
};
use crate::config::EngineSettings;
use crate::errors::{ExecutionError, ServiceError};
use crate::orchestrator::state::RunOptions;
use crate::task::{Task, TaskKind};
use artifact::Artifact;

/// How a written response reached the task page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionChannel {
    TextEntry,
    FileUpload,
}

/// What a successful execution produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Completion {
    /// Quiz-like task: number of questions answered
    Answered { questions: u32, submitted: bool },
    /// Written task handed in through a page channel
    Submitted {
        channel: SubmissionChannel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
    },
}

/// Why a task was left for a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeferReason {
    /// The kind is never automated
    ManualRequired { kind: TaskKind },
    /// No usable channel; the artifact was offered for download
    ManualUpload { file_name: String },
    /// Auto-submit is off; the response is filled in but not submitted
    ReviewBeforeSubmit,
}

impl std::fmt::Display for DeferReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeferReason::ManualRequired { kind } => {
                write!(f, "{} requires manual completion", kind)
            }
            DeferReason::ManualUpload { file_name } => {
                write!(f, "auto-upload not available, download {} and upload it manually", file_name)
            }
            DeferReason::ReviewBeforeSubmit => write!(f, "submission left for review"),
        }
    }
}

/// Result of running one task's protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { completion: Completion },
    Deferred { reason: DeferReason },
    Failed { error: String },
}

impl TaskOutcome {
    pub fn answered(questions: u32, submitted: bool) -> Self {
        TaskOutcome::Completed {
            completion: Completion::Answered {
                questions,
                submitted,
            },
        }
    }

    pub fn deferred(reason: DeferReason) -> Self {
        TaskOutcome::Deferred { reason }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        TaskOutcome::Failed {
            error: error.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failed { .. })
    }
}

/// Runs the completion protocol for a task.
pub struct TaskExecutor {
    extractor: Arc<dyn ContentExtractor>,
    answers: Arc<dyn AnswerService>,
    page: Arc<dyn TaskPage>,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
}

impl TaskExecutor {
    pub fn new(
        extractor: Arc<dyn ContentExtractor>,
        answers: Arc<dyn AnswerService>,
        page: Arc<dyn TaskPage>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            extractor,
            answers,
            page,
            notifier,
            settings,
        }
    }

    /// Execute `task` on the page that is currently open.
    pub async fn execute(&self, task: &Task, options: &RunOptions) -> TaskOutcome {
        tracing::info!(task_id = %task.id, kind = %task.kind, "Executing task");

        let result = match task.kind {
            TaskKind::Quiz | TaskKind::Practice => {
                self.notifier.notify(NoticeLevel::Info, "Solving quiz...");
                self.run_quiz(options).await
            }
            TaskKind::WrittenSubmission => self.run_written(task, options, true).await,
            TaskKind::Discussion => self.run_written(task, options, false).await,
            TaskKind::PeerReview | TaskKind::Programming => {
                let reason = DeferReason::ManualRequired { kind: task.kind };
                self.notifier.notify(NoticeLevel::Info, &capitalize(&reason.to_string()));
                Ok(TaskOutcome::deferred(reason))
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.is_credential_missing() {
                    self.notifier.notify(NoticeLevel::Error, &err.to_string());
                }
                tracing::warn!(task_id = %task.id, error = %err, "Task execution failed");
                TaskOutcome::failed(err.to_string())
            }
        }
    }

    /// Answer every unanswered question step by step, bounded by the step
    /// limit, then submit.
    async fn run_quiz(&self, options: &RunOptions) -> Result<TaskOutcome, ExecutionError> {
        let limit = self.settings.step_limit;
        let mut answered = 0u32;

        for step in 1..=limit {
            let questions = self.page.unanswered_questions().await?;
            tracing::debug!(step, questions = questions.len(), "Answering quiz step");

            for question in &questions {
                let choice = self.answers.answer_question(question).await?;
                let indices = valid_selection(question, &choice)?;
                self.page.select_answers(question, &indices).await?;
                answered += 1;
                pause(self.settings.pacing.between_questions).await;
            }

            if !self.page.advance().await? {
                let submitted = if options.auto_submit {
                    let found = self.page.submit().await?;
                    pause(self.settings.pacing.submit_settle).await;
                    found
                } else {
                    false
                };
                tracing::info!(answered, submitted, "Quiz finished");
                return Ok(TaskOutcome::answered(answered, submitted));
            }

            pause(self.settings.pacing.page_settle).await;
        }

        Err(ExecutionError::StepLimitExceeded { limit })
    }

    /// Generate a response from the task instructions and hand it in through
    /// text entry (preferred) or upload, falling back to a manual download.
    async fn run_written(
        &self,
        task: &Task,
        options: &RunOptions,
        allow_upload: bool,
    ) -> Result<TaskOutcome, ExecutionError> {
        self.notifier
            .notify(NoticeLevel::Info, "Analyzing assignment instructions...");

        let instructions = self.extractor.extract_instructions().await?.full_text();
        let required = if allow_upload {
            self.settings.min_instructions_chars
        } else {
            1
        };
        if instructions.chars().count() < required {
            return Err(ExecutionError::InstructionsUnavailable);
        }

        self.notifier.notify(NoticeLevel::Info, "Generating response...");
        let response = self
            .answers
            .generate_text(&build_prompt(&task.title, &instructions))
            .await?;
        if response.trim().is_empty() {
            return Err(ServiceError::InvalidResponse("empty response".into()).into());
        }

        let channels = self.page.submission_channels().await?;

        if channels.text_entry && self.page.enter_text(&response).await? {
            pause(self.settings.pacing.submit_settle).await;
            return self.finish_submission(SubmissionChannel::TextEntry, None, options).await;
        }

        let artifact = Artifact::render(&task.title, &response, self.settings.artifact_format);

        if allow_upload && channels.file_upload && self.page.upload(&artifact).await? {
            pause(self.settings.pacing.submit_settle).await;
            return self
                .finish_submission(
                    SubmissionChannel::FileUpload,
                    Some(artifact.file_name.clone()),
                    options,
                )
                .await;
        }

        self.page.offer_download(&artifact).await?;
        let reason = DeferReason::ManualUpload {
            file_name: artifact.file_name,
        };
        self.notifier.notify(NoticeLevel::Info, &capitalize(&reason.to_string()));
        Ok(TaskOutcome::deferred(reason))
    }

    async fn finish_submission(
        &self,
        channel: SubmissionChannel,
        file_name: Option<String>,
        options: &RunOptions,
    ) -> Result<TaskOutcome, ExecutionError> {
        if !options.auto_submit {
            return Ok(TaskOutcome::deferred(DeferReason::ReviewBeforeSubmit));
        }

        self.notifier.notify(NoticeLevel::Info, "Submitting response...");
        if !self.page.submit().await? {
            return Err(ExecutionError::Failed("submit control not found".into()));
        }
        pause(self.settings.pacing.submit_settle).await;

        Ok(TaskOutcome::Completed {
            completion: Completion::Submitted { channel, file_name },
        })
    }
}

/// Prompt for the text-generation service.
pub fn build_prompt(title: &str, instructions: &str) -> String {
    format!(
        "Task: {}\n\nInstructions:\n{}\n\nWrite a complete, well-structured response that addresses every requirement in the instructions and follows any length or format requirements they state.",
        title, instructions
    )
}

/// In-range, de-duplicated option indices; a single one unless the question
/// allows several.
fn valid_selection(question: &Question, choice: &AnswerChoice) -> Result<Vec<usize>, ServiceError> {
    let mut indices: Vec<usize> = Vec::new();
    for &index in &choice.selected {
        if index < question.options.len() && !indices.contains(&index) {
            indices.push(index);
        }
    }
    if !question.multi_select {
        indices.truncate(1);
    }

    if indices.is_empty() {
        return Err(ServiceError::InvalidResponse(format!(
            "no valid option selected for question {}",
            question.index + 1
        )));
    }
    Ok(indices)
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
