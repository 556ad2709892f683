//! Pure state-machine transitions.
//!
//! Every function here takes a `Snapshot` by value and returns the next one.
//! None of them perform I/O; the engine persists the result and then talks to
//! the collaborators. `plan` is the recovery function: it is called fresh after
//! every restart and decides what to do from the persisted snapshot and the
//! current view alone.

use chrono::{DateTime, Utc};

use super::state::{Phase, Snapshot};
use crate::collaborators::View;
use crate::config::DeferPolicy;
use crate::executor::{Completion, TaskOutcome};
use crate::task::{Task, TaskKind, task_id};

/// Bounds that `plan` needs from the engine settings.
#[derive(Debug, Clone, Copy)]
pub struct PlanBounds {
    pub staleness: chrono::Duration,
    pub max_attempts: u32,
}

/// What the engine must do next.
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    /// No run in progress
    Idle,
    /// The snapshot is too old to resume; drop it
    Abandon,
    /// A run exists but the current view belongs to something else
    Wait,
    /// Request a transition to the discovery view
    NavigateToDiscovery,
    /// Enumerate and classify tasks on the discovery view
    Discover,
    /// Pop the next task and transition to it
    Dispatch,
    /// The transition to the active task never landed; request it again
    RetryArrival { locator: String },
    /// Run the active task's protocol on the current page
    Execute,
    /// The active task exhausted its attempts; record it as failed
    GiveUp { reason: String },
    /// Apply the pending outcome
    Record,
    /// Summarise the course and advance or finish
    CompleteCourse,
}

/// Decide the next action from the persisted snapshot and the current view.
pub fn plan(
    snapshot: Option<&Snapshot>,
    view: &View,
    now: DateTime<Utc>,
    bounds: PlanBounds,
) -> NextAction {
    let Some(snapshot) = snapshot else {
        return NextAction::Idle;
    };
    if snapshot.phase.is_terminal() || snapshot.is_stale(now, bounds.staleness) {
        return NextAction::Abandon;
    }

    if snapshot.pending_outcome.is_some() && snapshot.active_task.is_some() {
        return NextAction::Record;
    }

    if let Some(active) = &snapshot.active_task {
        return plan_active(snapshot, active, view, bounds);
    }

    match snapshot.phase {
        Phase::Idle => NextAction::Abandon,
        Phase::Discovering | Phase::AdvancingCourse => {
            if *view == View::Discovery {
                NextAction::Discover
            } else {
                NextAction::NavigateToDiscovery
            }
        }
        // Without an active task the run only continues from the discovery view.
        _ if *view != View::Discovery => NextAction::Wait,
        Phase::AwaitingTransitionToBacklog
        | Phase::Dispatching
        | Phase::ExecutingTask
        | Phase::RecordingOutcome => {
            if snapshot.backlog.is_empty() {
                NextAction::CompleteCourse
            } else {
                NextAction::Dispatch
            }
        }
        Phase::CourseComplete => NextAction::CompleteCourse,
    }
}

fn plan_active(snapshot: &Snapshot, active: &Task, view: &View, bounds: PlanBounds) -> NextAction {
    let exhausted = snapshot.active_attempts >= bounds.max_attempts;

    match view {
        View::Discovery => {
            if exhausted {
                NextAction::GiveUp {
                    reason: "could not reach task".to_string(),
                }
            } else {
                NextAction::RetryArrival {
                    locator: active.locator.clone(),
                }
            }
        }
        View::Task(locator) if task_id(locator) == active.id => {
            if snapshot.phase == Phase::ExecutingTask && exhausted {
                NextAction::GiveUp {
                    reason: format!("execution interrupted {} times", snapshot.active_attempts),
                }
            } else {
                NextAction::Execute
            }
        }
        _ => NextAction::Wait,
    }
}

/// Keep the tasks that still need work, in discovery order.
pub fn filter_backlog(
    snapshot: &Snapshot,
    tasks: Vec<Task>,
    pass_threshold: f64,
) -> Vec<Task> {
    tasks
        .into_iter()
        .filter(|task| !snapshot.is_completed(&task.id))
        .filter(|task| {
            snapshot.options.force_reprocess_satisfied || !task.is_satisfied(pass_threshold)
        })
        .collect()
}

/// Store the discovered backlog and move on to dispatching, or straight to
/// course completion when nothing is left.
pub fn apply_discovery(
    mut snapshot: Snapshot,
    tasks: Vec<Task>,
    pass_threshold: f64,
    now: DateTime<Utc>,
) -> Snapshot {
    snapshot.backlog = filter_backlog(&snapshot, tasks, pass_threshold);
    snapshot.phase = if snapshot.backlog.is_empty() {
        Phase::CourseComplete
    } else {
        Phase::Dispatching
    };
    snapshot.saved_at = now;
    snapshot
}

/// Pop the head of the backlog into the active slot. Returns the task to
/// transition to, or `None` (and `CourseComplete`) when the backlog is empty.
pub fn dispatch(mut snapshot: Snapshot, now: DateTime<Utc>) -> (Snapshot, Option<Task>) {
    snapshot.saved_at = now;
    snapshot.pending_outcome = None;

    while !snapshot.backlog.is_empty() {
        let task = snapshot.backlog.remove(0);
        if snapshot.is_completed(&task.id) {
            continue;
        }
        snapshot.phase = Phase::Dispatching;
        snapshot.active_task = Some(task.clone());
        snapshot.active_attempts = 1;
        return (snapshot, Some(task));
    }

    snapshot.phase = Phase::CourseComplete;
    snapshot.active_task = None;
    snapshot.active_attempts = 0;
    (snapshot, None)
}

/// Count another attempt to reach the active task.
pub fn retry_arrival(mut snapshot: Snapshot, now: DateTime<Utc>) -> Snapshot {
    snapshot.active_attempts += 1;
    snapshot.saved_at = now;
    snapshot
}

/// Enter `ExecutingTask`. The first entry after arrival restarts the attempt
/// count; a re-entry after an interrupted execution adds to it.
pub fn begin_execution(mut snapshot: Snapshot, now: DateTime<Utc>) -> Snapshot {
    if snapshot.phase == Phase::ExecutingTask {
        snapshot.active_attempts += 1;
    } else {
        snapshot.phase = Phase::ExecutingTask;
        snapshot.active_attempts = 1;
    }
    snapshot.saved_at = now;
    snapshot
}

/// Park the executor's outcome so a restart applies it instead of executing
/// the task again.
pub fn stage_outcome(mut snapshot: Snapshot, outcome: TaskOutcome, now: DateTime<Utc>) -> Snapshot {
    snapshot.phase = Phase::RecordingOutcome;
    snapshot.pending_outcome = Some(outcome);
    snapshot.saved_at = now;
    snapshot
}

/// Apply `outcome` to the active task: mark it completed, bump the matching
/// counter and clear the active slot.
///
/// A task already in `completed_ids` leaves the counters untouched, so a
/// duplicate recording never double-counts.
pub fn record_outcome(
    mut snapshot: Snapshot,
    outcome: &TaskOutcome,
    policy: DeferPolicy,
    now: DateTime<Utc>,
) -> Snapshot {
    snapshot.saved_at = now;
    snapshot.pending_outcome = None;
    snapshot.phase = Phase::AwaitingTransitionToBacklog;

    let Some(task) = snapshot.active_task.take() else {
        return snapshot;
    };
    snapshot.active_attempts = 0;

    if !snapshot.completed_ids.insert(task.id.clone()) {
        tracing::debug!(task_id = %task.id, "Outcome already recorded, skipping counters");
        return snapshot;
    }
    snapshot.backlog.retain(|t| t.id != task.id);

    let counters = &mut snapshot.counters;
    match outcome {
        TaskOutcome::Completed { completion } => match (task.kind, completion) {
            (TaskKind::Quiz | TaskKind::Practice, _)
            | (_, Completion::Answered { .. }) => counters.quizzes_completed += 1,
            (_, Completion::Submitted { .. }) => counters.submissions_completed += 1,
        },
        TaskOutcome::Deferred { .. } => {
            counters.deferred += 1;
            if policy == DeferPolicy::RecordError {
                counters
                    .errors
                    .push(format!("{}: manual completion required", task.title));
            }
        }
        TaskOutcome::Failed { error } => {
            counters.errors.push(format!("{}: {}", task.title, error));
        }
    }

    snapshot
}

/// Count the finished course and reset the per-course state for the next
/// one. Counters, options and `completed_ids` carry over.
pub fn advance_course(mut snapshot: Snapshot, now: DateTime<Utc>) -> Snapshot {
    snapshot.counters.courses_completed += 1;
    snapshot.course_index += 1;
    snapshot.phase = Phase::AdvancingCourse;
    snapshot.backlog.clear();
    snapshot.active_task = None;
    snapshot.active_attempts = 0;
    snapshot.pending_outcome = None;
    snapshot.saved_at = now;
    snapshot
}

/// Summary shown when a course's backlog is drained.
pub fn course_summary(snapshot: &Snapshot) -> String {
    format!(
        "Course complete! Quizzes: {}, Submissions: {}",
        snapshot.counters.quizzes_completed, snapshot.counters.submissions_completed
    )
}
