//! Durable automation state.
//!
//! One `Snapshot` describes a whole run and is the only state that survives a
//! restart. It is always written in full and read in full; there are no
//! partial updates. The store holds at most one snapshot at a time.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::executor::TaskOutcome;
use crate::task::Task;

/// Engine state machine phase, persisted with every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    /// Enumerating tasks on the discovery view
    Discovering,
    /// Returning to the discovery view after an outcome was recorded
    AwaitingTransitionToBacklog,
    /// Popping the next task and transitioning to it
    Dispatching,
    /// Running the active task's protocol
    ExecutingTask,
    /// An outcome is pending and must be applied before anything else
    RecordingOutcome,
    /// Backlog drained for the current course
    CourseComplete,
    /// Transition to the next course requested
    AdvancingCourse,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Discovering => "discovering",
            Phase::AwaitingTransitionToBacklog => "awaiting_transition_to_backlog",
            Phase::Dispatching => "dispatching",
            Phase::ExecutingTask => "executing_task",
            Phase::RecordingOutcome => "recording_outcome",
            Phase::CourseComplete => "course_complete",
            Phase::AdvancingCourse => "advancing_course",
        };
        write!(f, "{}", name)
    }
}

/// Run configuration supplied with `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub continue_to_next_course: bool,
    #[serde(default)]
    pub force_reprocess_satisfied: bool,
    #[serde(default = "default_auto_submit")]
    pub auto_submit: bool,
}

fn default_auto_submit() -> bool {
    true
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            continue_to_next_course: false,
            force_reprocess_satisfied: false,
            auto_submit: true,
        }
    }
}

/// Running totals across the whole run (all courses).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub quizzes_completed: u32,
    pub submissions_completed: u32,
    pub courses_completed: u32,
    /// Tasks finished without credit (manual-only kinds, manual uploads)
    #[serde(default)]
    pub deferred: u32,
    /// `"<title>: <message>"` per failure, in order
    #[serde(default)]
    pub errors: Vec<String>,
}

/// The complete durable state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub run_id: Uuid,
    pub phase: Phase,
    /// Pending tasks in discovery order
    #[serde(default)]
    pub backlog: Vec<Task>,
    #[serde(default)]
    pub active_task: Option<Task>,
    /// Arrivals at / executions of the active task so far
    #[serde(default)]
    pub active_attempts: u32,
    #[serde(default)]
    pub pending_outcome: Option<TaskOutcome>,
    #[serde(default)]
    pub completed_ids: BTreeSet<String>,
    #[serde(default)]
    pub counters: Counters,
    pub options: RunOptions,
    /// Zero-based position in the course sequence
    #[serde(default)]
    pub course_index: u32,
    pub started_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}

impl Snapshot {
    /// A fresh run about to discover tasks.
    pub fn new(options: RunOptions, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            phase: Phase::Discovering,
            backlog: Vec::new(),
            active_task: None,
            active_attempts: 0,
            pending_outcome: None,
            completed_ids: BTreeSet::new(),
            counters: Counters::default(),
            options,
            course_index: 0,
            started_at: now,
            saved_at: now,
        }
    }

    /// Whether the snapshot is older than `staleness` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, staleness: chrono::Duration) -> bool {
        now.signed_duration_since(self.saved_at) > staleness
    }

    pub fn is_completed(&self, task_id: &str) -> bool {
        self.completed_ids.contains(task_id)
    }

    /// Descriptions of every broken invariant; empty when consistent.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if let Some(active) = &self.active_task
            && self.completed_ids.contains(&active.id)
        {
            violations.push(format!("active task {} is already completed", active.id));
        }
        for task in &self.backlog {
            if self.completed_ids.contains(&task.id) {
                violations.push(format!("backlog task {} is already completed", task.id));
            }
        }
        if self.pending_outcome.is_some() && self.active_task.is_none() {
            violations.push("pending outcome without an active task".to_string());
        }

        violations
    }

    pub fn is_consistent(&self) -> bool {
        self.invariant_violations().is_empty()
    }

    /// Drop whatever breaks an invariant: completed tasks leave the backlog,
    /// a completed active task and any orphaned pending outcome are cleared.
    pub fn repair(&mut self) {
        let completed = &self.completed_ids;
        self.backlog.retain(|task| !completed.contains(&task.id));
        if self
            .active_task
            .as_ref()
            .is_some_and(|task| completed.contains(&task.id))
        {
            self.active_task = None;
            self.active_attempts = 0;
        }
        if self.active_task.is_none() {
            self.pending_outcome = None;
        }
    }
}

/// Single-slot persistence for the current snapshot.
pub trait SnapshotStore: Send + Sync {
    fn load(&self) -> Result<Option<Snapshot>, StoreError>;

    /// Replace the stored snapshot.
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Remove the stored snapshot. Idempotent.
    fn clear(&self) -> Result<(), StoreError>;
}

/// JSON file store. Writes go to a temporary file that is renamed over the
/// snapshot, under an exclusive advisory lock, so a reader never sees a
/// half-written snapshot.
pub struct FileSnapshotStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn lock(&self, exclusive: bool) -> Result<Option<fs::File>, StoreError> {
        let Some(parent) = self.lock_path.parent() else {
            return Ok(None);
        };
        if !parent.exists() {
            if !exclusive {
                return Ok(None);
            }
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| self.io_error(e))?;
        if exclusive {
            file.lock_exclusive().map_err(|e| self.io_error(e))?;
        } else {
            FileExt::lock_shared(&file).map_err(|e| self.io_error(e))?;
        }
        Ok(Some(file))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        let _guard = self.lock(false)?;
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let snapshot = serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let _guard = self.lock(true)?;
        let json = serde_json::to_string_pretty(snapshot).map_err(StoreError::Serialize)?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp = fs::File::create(&tmp_path).map_err(|e| self.io_error(e))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.sync_all())
            .map_err(|e| self.io_error(e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))?;

        tracing::debug!(phase = %snapshot.phase, path = %self.path.display(), "Snapshot saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock(true)?;
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| self.io_error(e))?;
            tracing::debug!(path = %self.path.display(), "Snapshot cleared");
        }
        Ok(())
    }
}

/// In-process store, for tests and embedding.
#[derive(Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.slot.lock().map_err(|_| StoreError::LockPoisoned)?.clone())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        *self.slot.lock().map_err(|_| StoreError::LockPoisoned)? = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot.lock().map_err(|_| StoreError::LockPoisoned)? = None;
        Ok(())
    }
}
