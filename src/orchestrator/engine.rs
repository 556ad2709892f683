//! The workflow engine.
//!
//! `Engine` is cheap to build and holds no run state of its own: every call
//! loads the snapshot, asks `transitions::plan` what to do, performs that
//! action through the collaborators and persists the result before any
//! transition is requested. A transition ends the invocation; the next
//! process calls `recover` again.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::state::{Counters, Phase, RunOptions, Snapshot, SnapshotStore};
use super::transitions::{self, NextAction, PlanBounds};
use crate::classifier::Classifier;
use crate::collaborators::{
    AnswerService, ContentExtractor, Navigator, NoticeLevel, Notifier, TaskPage,
};
use crate::config::EngineSettings;
use crate::errors::{EngineError, StoreError};
use crate::executor::{Completion, TaskExecutor, TaskOutcome};
use crate::task::Task;

/// The external collaborators an engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn ContentExtractor>,
    pub answers: Arc<dyn AnswerService>,
    pub navigator: Arc<dyn Navigator>,
    pub page: Arc<dyn TaskPage>,
    pub notifier: Arc<dyn Notifier>,
}

/// Why an engine invocation returned.
#[derive(Debug, Clone, PartialEq)]
pub enum Halt {
    /// No run in progress
    Idle,
    /// A transition was requested; the context is expected to restart
    Transitioned,
    /// A run exists but the current view is foreign to it
    Waiting,
    /// The run reached its end and the snapshot was deleted
    Finished(Counters),
}

/// Answer to a status query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStatus {
    pub is_running: bool,
    pub run_id: Option<Uuid>,
    pub phase: Phase,
    pub counters: Counters,
    pub active_task: Option<Task>,
    pub backlog_len: usize,
    pub course_index: u32,
}

pub struct Engine {
    store: Arc<dyn SnapshotStore>,
    extractor: Arc<dyn ContentExtractor>,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    executor: TaskExecutor,
    classifier: Classifier,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        collaborators: Collaborators,
        store: Arc<dyn SnapshotStore>,
        settings: EngineSettings,
    ) -> Self {
        let executor = TaskExecutor::new(
            collaborators.extractor.clone(),
            collaborators.answers,
            collaborators.page,
            collaborators.notifier.clone(),
            settings.clone(),
        );

        Self {
            store,
            extractor: collaborators.extractor,
            navigator: collaborators.navigator,
            notifier: collaborators.notifier,
            executor,
            classifier: Classifier::new(settings.pass_threshold),
            settings,
        }
    }

    /// Begin a new run and drive it until the first transition.
    ///
    /// Rejected without touching the store when a live run exists. A stale
    /// snapshot does not count as live and is replaced.
    pub async fn start(&self, options: RunOptions) -> Result<Halt, EngineError> {
        let now = Utc::now();

        if let Some(existing) = self.load()? {
            if !existing.phase.is_terminal()
                && !existing.is_stale(now, self.settings.staleness_chrono())
            {
                return Err(EngineError::RunAlreadyActive {
                    phase: existing.phase.to_string(),
                });
            }
            tracing::info!(run_id = %existing.run_id, "Replacing abandoned run");
        }

        let snapshot = Snapshot::new(options, now);
        self.store.save(&snapshot)?;
        tracing::info!(
            run_id = %snapshot.run_id,
            continue_to_next_course = options.continue_to_next_course,
            force_reprocess_satisfied = options.force_reprocess_satisfied,
            auto_submit = options.auto_submit,
            "Run started"
        );
        self.notifier.notify(NoticeLevel::Info, "Automation started");

        self.recover().await
    }

    /// Delete the snapshot. Returns whether a run existed; calling it again
    /// is harmless.
    pub fn stop(&self) -> Result<bool, EngineError> {
        let existed = stop_run(self.store.as_ref())?;
        if existed {
            self.notifier.notify(NoticeLevel::Info, "Automation stopped");
        }
        Ok(existed)
    }

    /// Report the current run without changing anything.
    pub fn status(&self) -> Result<RunStatus, EngineError> {
        read_status(self.store.as_ref(), self.settings.staleness_chrono())
    }

    /// Restart entry point. Continues the persisted run, if any, until the
    /// next transition or the end of the run.
    pub async fn recover(&self) -> Result<Halt, EngineError> {
        let Some(mut snapshot) = self.load()? else {
            tracing::debug!("No run to recover");
            return Ok(Halt::Idle);
        };

        loop {
            let view = self
                .navigator
                .current_view()
                .await
                .map_err(|e| EngineError::Navigation(format!("{:#}", e)))?;
            let action = transitions::plan(Some(&snapshot), &view, Utc::now(), self.bounds());
            tracing::debug!(phase = %snapshot.phase, ?view, ?action, "Planned next action");

            match action {
                NextAction::Idle => return Ok(Halt::Idle),
                NextAction::Abandon => {
                    tracing::warn!(
                        run_id = %snapshot.run_id,
                        saved_at = %snapshot.saved_at,
                        "Snapshot is stale, abandoning run"
                    );
                    self.store.clear()?;
                    return Ok(Halt::Idle);
                }
                NextAction::Wait => {
                    tracing::info!(?view, "Current view does not belong to the run, waiting");
                    return Ok(Halt::Waiting);
                }
                NextAction::NavigateToDiscovery => {
                    tracing::info!("Navigating to the discovery view");
                    self.navigate(self.navigator.transition_to_discovery_view().await)?;
                    return Ok(Halt::Transitioned);
                }
                NextAction::Discover => {
                    snapshot = self.discover(snapshot).await?;
                }
                NextAction::Dispatch => {
                    let (next, task) = transitions::dispatch(snapshot, Utc::now());
                    self.store.save(&next)?;
                    match task {
                        Some(task) => {
                            tracing::info!(task_id = %task.id, kind = %task.kind, remaining = next.backlog.len(), "Dispatching task");
                            self.notifier
                                .notify(NoticeLevel::Info, &format!("Opening {}...", task.title));
                            self.navigate(self.navigator.transition_to(&task.locator).await)?;
                            return Ok(Halt::Transitioned);
                        }
                        None => snapshot = next,
                    }
                }
                NextAction::RetryArrival { locator } => {
                    let next = transitions::retry_arrival(snapshot, Utc::now());
                    self.store.save(&next)?;
                    tracing::warn!(
                        locator = %locator,
                        attempt = next.active_attempts,
                        "Transition to task did not land, retrying"
                    );
                    self.navigate(self.navigator.transition_to(&locator).await)?;
                    return Ok(Halt::Transitioned);
                }
                NextAction::Execute => match self.execute(snapshot).await? {
                    Some(next) => snapshot = next,
                    None => return Ok(Halt::Idle),
                },
                NextAction::GiveUp { reason } => {
                    tracing::warn!(attempts = snapshot.active_attempts, reason = %reason, "Giving up on task");
                    snapshot = transitions::stage_outcome(
                        snapshot,
                        TaskOutcome::failed(reason),
                        Utc::now(),
                    );
                    self.store.save(&snapshot)?;
                }
                NextAction::Record => {
                    self.record(snapshot).await?;
                    return Ok(Halt::Transitioned);
                }
                NextAction::CompleteCourse => return self.complete_course(snapshot).await,
            }
        }
    }

    fn bounds(&self) -> PlanBounds {
        PlanBounds {
            staleness: self.settings.staleness_chrono(),
            max_attempts: self.settings.max_attempts,
        }
    }

    /// Load the snapshot, discarding a corrupt one and repairing broken
    /// invariants.
    fn load(&self) -> Result<Option<Snapshot>, EngineError> {
        match self.store.load() {
            Ok(Some(mut snapshot)) => {
                let violations = snapshot.invariant_violations();
                if !violations.is_empty() {
                    tracing::warn!(?violations, "Repairing inconsistent snapshot");
                    snapshot.repair();
                    self.store.save(&snapshot)?;
                }
                Ok(Some(snapshot))
            }
            Ok(None) => Ok(None),
            Err(err @ StoreError::Corrupt { .. }) => {
                tracing::warn!(error = %err, "Discarding unreadable snapshot");
                self.store.clear()?;
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn navigate(&self, result: anyhow::Result<()>) -> Result<(), EngineError> {
        result.map_err(|e| EngineError::Navigation(format!("{:#}", e)))
    }

    async fn discover(&self, snapshot: Snapshot) -> Result<Snapshot, EngineError> {
        self.notifier.notify(NoticeLevel::Info, "Scanning course tasks...");
        pause(self.settings.pacing.page_settle).await;

        let rows = match self.extractor.discover().await {
            Ok(rows) => rows,
            Err(err) => {
                let message = format!("{:#}", err);
                tracing::error!(error = %message, "Discovery failed, aborting run");
                self.store.clear()?;
                self.notifier
                    .notify(NoticeLevel::Error, &format!("Discovery failed: {}", message));
                return Err(EngineError::Discovery(message));
            }
        };

        let tasks = self.classifier.classify_all(&rows);
        let discovered = tasks.len();
        let next = transitions::apply_discovery(
            snapshot,
            tasks,
            self.classifier.pass_threshold(),
            Utc::now(),
        );
        self.store.save(&next)?;

        tracing::info!(
            rows = rows.len(),
            discovered,
            pending = next.backlog.len(),
            course = next.course_index,
            "Discovery finished"
        );
        self.notifier.notify(
            NoticeLevel::Info,
            &format!("Found {} pending tasks", next.backlog.len()),
        );
        Ok(next)
    }

    /// Run the active task. Returns `None` when the run was stopped while the
    /// executor was busy, in which case nothing is written back.
    async fn execute(&self, snapshot: Snapshot) -> Result<Option<Snapshot>, EngineError> {
        let snapshot = transitions::begin_execution(snapshot, Utc::now());
        self.store.save(&snapshot)?;

        let Some(task) = snapshot.active_task.clone() else {
            return Ok(Some(snapshot));
        };
        tracing::info!(task_id = %task.id, attempt = snapshot.active_attempts, "Arrived at task");
        pause(self.settings.pacing.page_settle).await;

        let outcome = self.executor.execute(&task, &snapshot.options).await;

        let still_current = matches!(
            self.store.load(),
            Ok(Some(ref current)) if current.run_id == snapshot.run_id
        );
        if !still_current {
            tracing::info!(task_id = %task.id, "Run was stopped during execution, dropping outcome");
            return Ok(None);
        }

        let next = transitions::stage_outcome(snapshot, outcome, Utc::now());
        self.store.save(&next)?;
        Ok(Some(next))
    }

    async fn record(&self, snapshot: Snapshot) -> Result<(), EngineError> {
        let outcome = snapshot
            .pending_outcome
            .clone()
            .unwrap_or_else(|| TaskOutcome::failed("outcome lost"));
        if let Some(task) = &snapshot.active_task {
            self.announce(task, &outcome);
        }

        let next = transitions::record_outcome(
            snapshot,
            &outcome,
            self.settings.defer_policy,
            Utc::now(),
        );
        self.store.save(&next)?;
        tracing::info!(
            failed = outcome.is_failure(),
            remaining = next.backlog.len(),
            quizzes = next.counters.quizzes_completed,
            submissions = next.counters.submissions_completed,
            errors = next.counters.errors.len(),
            "Outcome recorded"
        );

        pause(self.settings.pacing.between_tasks).await;
        self.navigate(self.navigator.transition_to_discovery_view().await)
    }

    fn announce(&self, task: &Task, outcome: &TaskOutcome) {
        let (level, message) = match outcome {
            TaskOutcome::Completed {
                completion: Completion::Answered { questions, submitted },
            } => {
                let suffix = if *submitted { "" } else { " (not submitted)" };
                (
                    NoticeLevel::Success,
                    format!("{}: {} questions answered{}", task.title, questions, suffix),
                )
            }
            TaskOutcome::Completed {
                completion: Completion::Submitted { .. },
            } => (NoticeLevel::Success, format!("{}: submitted", task.title)),
            TaskOutcome::Deferred { reason } => {
                (NoticeLevel::Info, format!("{}: {}", task.title, reason))
            }
            TaskOutcome::Failed { error } => {
                (NoticeLevel::Error, format!("{}: {}", task.title, error))
            }
        };
        self.notifier.notify(level, &message);
    }

    async fn complete_course(&self, snapshot: Snapshot) -> Result<Halt, EngineError> {
        let summary = transitions::course_summary(&snapshot);
        tracing::info!(course = snapshot.course_index, summary = %summary, "Course complete");
        self.notifier.notify(NoticeLevel::Success, &summary);

        let continue_to_next = snapshot.options.continue_to_next_course;
        let next = transitions::advance_course(snapshot, Utc::now());

        if continue_to_next {
            self.store.save(&next)?;
            match self.navigator.transition_to_next_course().await {
                Ok(true) => {
                    tracing::info!(course = next.course_index, "Advancing to next course");
                    return Ok(Halt::Transitioned);
                }
                Ok(false) => {
                    tracing::info!("No further course found");
                    self.notifier.notify(NoticeLevel::Info, "No more courses to process");
                }
                Err(err) => {
                    self.store.clear()?;
                    return Err(EngineError::Navigation(format!("{:#}", err)));
                }
            }
        }

        self.store.clear()?;
        tracing::info!(courses = next.counters.courses_completed, "Run finished");
        self.notifier.notify(NoticeLevel::Info, "Automation finished");
        Ok(Halt::Finished(next.counters))
    }
}

/// Delete the persisted run, if any. Needs nothing but the store, so a
/// stop request works without any collaborator.
pub fn stop_run(store: &dyn SnapshotStore) -> Result<bool, EngineError> {
    let existed = !matches!(store.load(), Ok(None));
    store.clear()?;
    if existed {
        tracing::info!("Run stopped");
    }
    Ok(existed)
}

/// Status of the persisted run. A stale or unreadable snapshot reports as
/// not running.
pub fn read_status(
    store: &dyn SnapshotStore,
    staleness: chrono::Duration,
) -> Result<RunStatus, EngineError> {
    let snapshot = match store.load() {
        Ok(snapshot) => snapshot,
        Err(StoreError::Corrupt { .. }) => None,
        Err(err) => return Err(err.into()),
    };

    let Some(snapshot) = snapshot else {
        return Ok(RunStatus::default());
    };
    if snapshot.is_stale(Utc::now(), staleness) {
        return Ok(RunStatus::default());
    }

    Ok(RunStatus {
        is_running: !snapshot.phase.is_terminal(),
        run_id: Some(snapshot.run_id),
        phase: snapshot.phase,
        backlog_len: snapshot.backlog.len(),
        active_task: snapshot.active_task,
        course_index: snapshot.course_index,
        counters: snapshot.counters,
    })
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Question, View};
    use crate::executor::artifact::Artifact;
    use crate::executor::testing::*;
    use crate::orchestrator::state::MemorySnapshotStore;
    use crate::task::RawTaskDescriptor;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Navigator whose view follows every transition, unless `stuck`.
    struct FakeNavigator {
        view: Mutex<View>,
        next_courses: Mutex<u32>,
        stuck: bool,
        requested: Mutex<Vec<String>>,
    }

    impl FakeNavigator {
        fn new(next_courses: u32) -> Self {
            Self {
                view: Mutex::new(View::Discovery),
                next_courses: Mutex::new(next_courses),
                stuck: false,
                requested: Mutex::new(Vec::new()),
            }
        }

        fn set_view(&self, view: View) {
            *self.view.lock().unwrap() = view;
        }
    }

    #[async_trait]
    impl Navigator for FakeNavigator {
        async fn current_view(&self) -> Result<View> {
            Ok(self.view.lock().unwrap().clone())
        }

        async fn transition_to(&self, locator: &str) -> Result<()> {
            self.requested.lock().unwrap().push(locator.to_string());
            if !self.stuck {
                self.set_view(View::Task(locator.to_string()));
            }
            Ok(())
        }

        async fn transition_to_discovery_view(&self) -> Result<()> {
            self.requested.lock().unwrap().push("discovery".to_string());
            self.set_view(View::Discovery);
            Ok(())
        }

        async fn transition_to_next_course(&self) -> Result<bool> {
            let mut remaining = self.next_courses.lock().unwrap();
            if *remaining == 0 {
                return Ok(false);
            }
            *remaining -= 1;
            self.set_view(View::Discovery);
            Ok(true)
        }
    }

    /// Page whose every read times out.
    struct TimeoutPage;

    #[async_trait]
    impl TaskPage for TimeoutPage {
        async fn unanswered_questions(&self) -> Result<Vec<Question>> {
            anyhow::bail!("timeout")
        }
        async fn select_answers(&self, _: &Question, _: &[usize]) -> Result<()> {
            Ok(())
        }
        async fn advance(&self) -> Result<bool> {
            Ok(false)
        }
        async fn submit(&self) -> Result<bool> {
            Ok(false)
        }
        async fn submission_channels(&self) -> Result<crate::collaborators::SubmissionChannels> {
            Ok(Default::default())
        }
        async fn enter_text(&self, _: &str) -> Result<bool> {
            Ok(false)
        }
        async fn upload(&self, _: &Artifact) -> Result<bool> {
            Ok(false)
        }
        async fn offer_download(&self, _: &Artifact) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemorySnapshotStore>,
        extractor: Arc<FakeExtractor>,
        navigator: Arc<FakeNavigator>,
        page: Arc<dyn TaskPage>,
        notifier: Arc<RecordingNotifier>,
        settings: EngineSettings,
    }

    impl Harness {
        fn new(rows: Vec<RawTaskDescriptor>, page: Arc<dyn TaskPage>) -> Self {
            Self {
                store: Arc::new(MemorySnapshotStore::new()),
                extractor: Arc::new(FakeExtractor {
                    rows: Mutex::new(rows),
                    instructions: long_instructions(),
                    ..Default::default()
                }),
                navigator: Arc::new(FakeNavigator::new(0)),
                page,
                notifier: Arc::new(RecordingNotifier::default()),
                settings: EngineSettings::default().without_pacing(),
            }
        }

        /// A fresh engine, as a restarted process would build it.
        fn engine(&self) -> Engine {
            Engine::new(
                Collaborators {
                    extractor: self.extractor.clone(),
                    answers: Arc::new(FakeAnswers::with_text("A generated answer.")),
                    navigator: self.navigator.clone(),
                    page: self.page.clone(),
                    notifier: self.notifier.clone(),
                },
                self.store.clone(),
                self.settings.clone(),
            )
        }

        fn snapshot(&self) -> Option<Snapshot> {
            self.store.load().unwrap()
        }

        /// Recover repeatedly, as successive restarts would, until the run
        /// stops transitioning.
        async fn run_until_settled(&self) -> Halt {
            for _ in 0..50 {
                let halt = self.engine().recover().await.unwrap();
                if halt != Halt::Transitioned {
                    return halt;
                }
            }
            panic!("run did not settle");
        }
    }

    fn quiz_row(n: u32) -> RawTaskDescriptor {
        RawTaskDescriptor::new(&format!("Quiz {}", n), &format!("/learn/c1/quiz/q{}", n), "Graded Quiz")
    }

    fn three_question_page() -> Arc<dyn TaskPage> {
        Arc::new(FakePage::quiz(vec![vec![
            question(0, "a"),
            question(1, "b"),
            question(2, "c"),
        ]]))
    }

    #[tokio::test]
    async fn test_discovery_filters_passed_and_keeps_order() {
        let rows = vec![
            quiz_row(1),
            quiz_row(2).with_grade("Passed 100%"),
            quiz_row(3),
        ];
        let harness = Harness::new(rows, three_question_page());

        let halt = harness.engine().start(RunOptions::default()).await.unwrap();

        assert_eq!(halt, Halt::Transitioned);
        let snapshot = harness.snapshot().unwrap();
        assert_eq!(snapshot.active_task.unwrap().title, "Quiz 1");
        let remaining: Vec<_> = snapshot.backlog.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(remaining, ["Quiz 3"]);
        assert_eq!(
            harness.navigator.requested.lock().unwrap().as_slice(),
            ["/learn/c1/quiz/q1"]
        );
    }

    #[tokio::test]
    async fn test_restart_executes_active_task_and_records() {
        let harness = Harness::new(vec![quiz_row(1), quiz_row(2)], three_question_page());
        harness.engine().start(RunOptions::default()).await.unwrap();

        let halt = harness.engine().recover().await.unwrap();

        assert_eq!(halt, Halt::Transitioned);
        let snapshot = harness.snapshot().unwrap();
        assert_eq!(snapshot.counters.quizzes_completed, 1);
        assert!(snapshot.is_completed(&crate::task::task_id("/learn/c1/quiz/q1")));
        assert!(snapshot.active_task.is_none());
        assert_eq!(snapshot.backlog.len(), 1);
        assert_eq!(snapshot.phase, Phase::AwaitingTransitionToBacklog);
        assert!(harness.notifier.contains("Quiz 1: 3 questions answered"));
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_run_completes() {
        let harness = Harness::new(vec![quiz_row(1)], Arc::new(TimeoutPage));
        harness.engine().start(RunOptions::default()).await.unwrap();

        harness.engine().recover().await.unwrap();
        let snapshot = harness.snapshot().unwrap();
        assert_eq!(snapshot.counters.errors, vec!["Quiz 1: timeout".to_string()]);
        assert!(snapshot.is_completed(&crate::task::task_id("/learn/c1/quiz/q1")));

        let halt = harness.engine().recover().await.unwrap();
        let Halt::Finished(counters) = halt else {
            panic!("expected the run to finish, got {:?}", halt);
        };
        assert_eq!(counters.errors, vec!["Quiz 1: timeout".to_string()]);
        assert_eq!(counters.courses_completed, 1);
        assert!(harness.snapshot().is_none());
        assert!(harness.notifier.contains("Course complete! Quizzes: 0, Submissions: 0"));
    }

    #[tokio::test]
    async fn test_no_next_course_deletes_snapshot() {
        let harness = Harness::new(vec![quiz_row(1)], three_question_page());
        let options = RunOptions {
            continue_to_next_course: true,
            ..RunOptions::default()
        };
        harness.engine().start(options).await.unwrap();

        let halt = harness.run_until_settled().await;

        assert!(matches!(halt, Halt::Finished(_)));
        assert!(harness.snapshot().is_none());
        assert!(harness.engine().recover().await.unwrap() == Halt::Idle);
        assert!(harness.notifier.contains("No more courses"));
    }

    #[tokio::test]
    async fn test_continues_into_next_course() {
        let mut harness = Harness::new(vec![quiz_row(1)], three_question_page());
        harness.navigator = Arc::new(FakeNavigator::new(1));
        let options = RunOptions {
            continue_to_next_course: true,
            ..RunOptions::default()
        };
        harness.engine().start(options).await.unwrap();
        harness.engine().recover().await.unwrap();

        // Back on the discovery view with an empty backlog: course 1 ends.
        let halt = harness.engine().recover().await.unwrap();
        assert_eq!(halt, Halt::Transitioned);
        let snapshot = harness.snapshot().unwrap();
        assert_eq!(snapshot.phase, Phase::AdvancingCourse);
        assert_eq!(snapshot.course_index, 1);

        *harness.extractor.rows.lock().unwrap() = vec![RawTaskDescriptor::new(
            "Intro Essay",
            "/learn/c2/assignment/e1",
            "Upload your essay",
        )];
        let page = Arc::new(FakePage::with_channels(true, false));
        harness.page = page.clone();

        let halt = harness.run_until_settled().await;
        let Halt::Finished(counters) = halt else {
            panic!("expected the run to finish, got {:?}", halt);
        };
        assert_eq!(counters.quizzes_completed, 1);
        assert_eq!(counters.submissions_completed, 1);
        assert_eq!(counters.courses_completed, 2);
        assert_eq!(page.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_start_rejected_while_run_active() {
        let harness = Harness::new(vec![quiz_row(1)], three_question_page());
        harness.engine().start(RunOptions::default()).await.unwrap();
        let before = harness.snapshot().unwrap();

        let err = harness.engine().start(RunOptions::default()).await.unwrap_err();

        assert!(matches!(err, EngineError::RunAlreadyActive { .. }));
        assert_eq!(harness.snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn test_start_replaces_stale_run() {
        let harness = Harness::new(vec![quiz_row(1)], three_question_page());
        let mut stale = Snapshot::new(RunOptions::default(), Utc::now());
        stale.saved_at = Utc::now() - chrono::Duration::minutes(45);
        harness.store.save(&stale).unwrap();

        harness.engine().start(RunOptions::default()).await.unwrap();

        assert_ne!(harness.snapshot().unwrap().run_id, stale.run_id);
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_not_resumed() {
        let harness = Harness::new(vec![quiz_row(1)], three_question_page());
        let mut stale = Snapshot::new(RunOptions::default(), Utc::now());
        stale.saved_at = Utc::now() - chrono::Duration::minutes(31);
        harness.store.save(&stale).unwrap();

        let halt = harness.engine().recover().await.unwrap();

        assert_eq!(halt, Halt::Idle);
        assert!(harness.snapshot().is_none());
        assert!(harness.navigator.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let harness = Harness::new(vec![quiz_row(1)], three_question_page());
        harness.engine().start(RunOptions::default()).await.unwrap();

        assert!(harness.engine().stop().unwrap());
        assert!(!harness.engine().stop().unwrap());
        assert!(!harness.engine().status().unwrap().is_running);
    }

    #[tokio::test]
    async fn test_status_reports_progress() {
        let harness = Harness::new(vec![quiz_row(1), quiz_row(2)], three_question_page());
        assert!(!harness.engine().status().unwrap().is_running);

        harness.engine().start(RunOptions::default()).await.unwrap();
        let status = harness.engine().status().unwrap();

        assert!(status.is_running);
        assert_eq!(status.phase, Phase::Dispatching);
        assert_eq!(status.backlog_len, 1);
        assert_eq!(status.active_task.unwrap().title, "Quiz 1");
    }

    #[tokio::test]
    async fn test_discovery_failure_aborts_run() {
        let mut harness = Harness::new(Vec::new(), three_question_page());
        harness.extractor = Arc::new(FakeExtractor {
            fail_discovery: true,
            ..Default::default()
        });

        let err = harness.engine().start(RunOptions::default()).await.unwrap_err();

        assert!(matches!(err, EngineError::Discovery(_)));
        assert!(harness.snapshot().is_none());
        assert_eq!(harness.notifier.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_discovery_off_view_navigates_first() {
        let harness = Harness::new(vec![quiz_row(1)], three_question_page());
        harness.navigator.set_view(View::Other("/home".into()));

        let halt = harness.engine().start(RunOptions::default()).await.unwrap();

        assert_eq!(halt, Halt::Transitioned);
        assert_eq!(harness.snapshot().unwrap().phase, Phase::Discovering);
        assert_eq!(
            harness.navigator.requested.lock().unwrap().as_slice(),
            ["discovery"]
        );
    }

    #[tokio::test]
    async fn test_unreachable_task_fails_after_max_attempts() {
        let mut harness = Harness::new(vec![quiz_row(1)], three_question_page());
        harness.navigator = Arc::new(FakeNavigator {
            stuck: true,
            ..FakeNavigator::new(0)
        });

        harness.engine().start(RunOptions::default()).await.unwrap();
        let halt = harness.run_until_settled().await;

        let Halt::Finished(counters) = halt else {
            panic!("expected the run to finish, got {:?}", halt);
        };
        assert_eq!(counters.errors, vec!["Quiz 1: could not reach task".to_string()]);
        let requested = harness.navigator.requested.lock().unwrap();
        assert_eq!(
            requested.iter().filter(|l| l.as_str() == "/learn/c1/quiz/q1").count(),
            3
        );
    }

    #[tokio::test]
    async fn test_pending_outcome_is_not_re_executed() {
        let page = Arc::new(FakePage::quiz(vec![vec![question(0, "a")]]));
        let harness = Harness::new(vec![quiz_row(1)], page.clone());
        harness.engine().start(RunOptions::default()).await.unwrap();

        let snapshot = harness.snapshot().unwrap();
        let snapshot = transitions::stage_outcome(
            transitions::begin_execution(snapshot, Utc::now()),
            TaskOutcome::answered(4, true),
            Utc::now(),
        );
        harness.store.save(&snapshot).unwrap();

        harness.engine().recover().await.unwrap();

        assert_eq!(page.submit_count(), 0);
        assert_eq!(harness.snapshot().unwrap().counters.quizzes_completed, 1);
    }

    #[tokio::test]
    async fn test_foreign_view_waits() {
        let harness = Harness::new(vec![quiz_row(1)], three_question_page());
        harness.engine().start(RunOptions::default()).await.unwrap();
        harness
            .navigator
            .set_view(View::Task("/learn/other/quiz/x".into()));

        let halt = harness.engine().recover().await.unwrap();

        assert_eq!(halt, Halt::Waiting);
        assert!(harness.snapshot().unwrap().active_task.is_some());
    }

    #[tokio::test]
    async fn test_idle_run_waits_on_foreign_view() {
        let harness = Harness::new(vec![quiz_row(1), quiz_row(2)], three_question_page());
        harness.engine().start(RunOptions::default()).await.unwrap();
        harness.engine().recover().await.unwrap();
        let recorded = harness.snapshot().unwrap();
        assert!(recorded.active_task.is_none());
        assert_eq!(recorded.backlog.len(), 1);

        harness
            .navigator
            .set_view(View::Other("/learn/other-course/home".into()));
        let requested = harness.navigator.requested.lock().unwrap().len();

        let halt = harness.engine().recover().await.unwrap();

        assert_eq!(halt, Halt::Waiting);
        assert_eq!(harness.navigator.requested.lock().unwrap().len(), requested);
        let snapshot = harness.snapshot().unwrap();
        assert!(snapshot.active_task.is_none());
        assert_eq!(snapshot.backlog.len(), 1);

        harness.navigator.set_view(View::Discovery);
        let halt = harness.engine().recover().await.unwrap();
        assert_eq!(halt, Halt::Transitioned);
        assert_eq!(
            harness.navigator.requested.lock().unwrap().last().map(String::as_str),
            Some("/learn/c1/quiz/q2")
        );
    }

    #[tokio::test]
    async fn test_deferred_tasks_complete_without_credit() {
        let rows = vec![
            RawTaskDescriptor::new("Peer Review", "/learn/c1/peer/p1", ""),
            RawTaskDescriptor::new("Lab", "/learn/c1/programming/l1", ""),
        ];
        let harness = Harness::new(rows, three_question_page());
        harness.engine().start(RunOptions::default()).await.unwrap();

        let halt = harness.run_until_settled().await;

        let Halt::Finished(counters) = halt else {
            panic!("expected the run to finish, got {:?}", halt);
        };
        assert_eq!(counters.deferred, 2);
        assert!(counters.errors.is_empty());
        assert_eq!(counters.quizzes_completed, 0);
    }
}
