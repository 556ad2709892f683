//! Task classification from raw discovery rows.
//!
//! Kind is decided by locator pattern first, then by keywords in the row
//! text. Grade status follows a fixed keyword precedence:
//! - explicit `passed` / `failed` text
//! - score inferred against the pass threshold
//! - `submitted` / `completed`
//! - `in progress` / `started`
//! - `overdue` / `late`
//! - otherwise not started
//!
//! Rows without a title or locator are skipped, not reported as errors.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::task::{
    DEFAULT_PASS_THRESHOLD, GradeSnapshot, RawTaskDescriptor, Task, TaskKind, TaskStatus, task_id,
};

static PERCENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").unwrap());

static SUBMISSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(upload|submit|essay)").unwrap());

static PRACTICE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bpractice\b").unwrap());

static PASSED_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bpassed\b").unwrap());

static FAILED_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bfailed\b").unwrap());

static SUBMITTED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(submitted|completed)\b").unwrap());

static IN_PROGRESS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(in progress|started)\b").unwrap());

static NOT_STARTED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bnot (yet )?started\b").unwrap());

static OVERDUE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(overdue|late)\b").unwrap());

/// Maps raw descriptors to typed tasks.
#[derive(Debug, Clone)]
pub struct Classifier {
    pass_threshold: f64,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_PASS_THRESHOLD)
    }
}

impl Classifier {
    pub fn new(pass_threshold: f64) -> Self {
        Self { pass_threshold }
    }

    pub fn pass_threshold(&self) -> f64 {
        self.pass_threshold
    }

    /// Classify a single descriptor. Returns `None` when the row lacks a title
    /// or a locator.
    pub fn classify(&self, raw: &RawTaskDescriptor) -> Option<Task> {
        let title = raw.title.trim();
        if title.is_empty() {
            return None;
        }
        let locator = raw.locator.as_deref().map(str::trim).filter(|l| !l.is_empty())?;

        let text = format!("{} {}", title, raw.text).to_lowercase();
        let kind = self.kind_of(locator, &text);
        let grade = self.grade_of(raw);

        Some(Task::new(title, kind, locator, grade))
    }

    /// Classify every descriptor in discovery order, dropping skipped rows and
    /// keeping only the first task for any duplicated id.
    pub fn classify_all(&self, raws: &[RawTaskDescriptor]) -> Vec<Task> {
        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(raws.len());

        for raw in raws {
            let Some(task) = self.classify(raw) else {
                tracing::debug!(title = %raw.title, "Skipping row without title or locator");
                continue;
            };
            if !seen.insert(task.id.clone()) {
                tracing::debug!(task_id = %task.id, "Skipping duplicate task row");
                continue;
            }
            tasks.push(task);
        }

        tasks
    }

    /// Kind from locator path segments, falling back to row keywords.
    pub fn kind_of(&self, locator: &str, text: &str) -> TaskKind {
        let path = task_id(locator).to_lowercase();
        let has = |segment: &str| path.contains(&format!("/{}/", segment));

        if has("quiz") || has("exam") {
            return TaskKind::Quiz;
        }
        if has("peer") {
            return TaskKind::PeerReview;
        }
        if has("programming") {
            return TaskKind::Programming;
        }
        if has("assignment") {
            return if SUBMISSION_REGEX.is_match(text) {
                TaskKind::WrittenSubmission
            } else {
                TaskKind::Quiz
            };
        }
        if has("discussionprompt") || has("discussion") {
            return TaskKind::Discussion;
        }

        if PRACTICE_REGEX.is_match(text) {
            TaskKind::Practice
        } else if SUBMISSION_REGEX.is_match(text) {
            TaskKind::WrittenSubmission
        } else {
            // Quiz keywords and the no-signal default land on the same kind.
            TaskKind::Quiz
        }
    }

    /// Score and status from the grade cell (preferred) and the row text.
    pub fn grade_of(&self, raw: &RawTaskDescriptor) -> GradeSnapshot {
        let text = match &raw.grade_text {
            Some(grade) => format!("{} {}", grade, raw.text),
            None => raw.text.clone(),
        }
        .to_lowercase();

        let score = raw
            .grade_text
            .as_deref()
            .and_then(parse_percent)
            .or_else(|| parse_percent(&raw.text));

        GradeSnapshot::new(score, self.status_of(&text, score))
    }

    fn status_of(&self, text: &str, score: Option<f64>) -> TaskStatus {
        if PASSED_REGEX.is_match(text) {
            return TaskStatus::Passed;
        }
        if FAILED_REGEX.is_match(text) {
            return TaskStatus::Failed;
        }
        if let Some(score) = score {
            return if score >= self.pass_threshold {
                TaskStatus::Passed
            } else {
                TaskStatus::Failed
            };
        }
        if SUBMITTED_REGEX.is_match(text) {
            return TaskStatus::Submitted;
        }
        let without_not_started = NOT_STARTED_REGEX.replace_all(text, " ");
        if IN_PROGRESS_REGEX.is_match(&without_not_started) {
            return TaskStatus::InProgress;
        }
        if OVERDUE_REGEX.is_match(text) {
            return TaskStatus::Overdue;
        }
        TaskStatus::NotStarted
    }
}

/// First `NN%` / `NN.N %` value in `text`.
pub fn parse_percent(text: &str) -> Option<f64> {
    PERCENT_REGEX
        .captures(text)
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}
