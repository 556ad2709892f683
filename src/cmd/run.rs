//! Run control against a rehearsal site: `waypoint start` and `waypoint recover`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use waypoint::collaborators::{NoticeLevel, Notifier};
use waypoint::config::{SNAPSHOT_FILE, WaypointToml, get_waypoint_dir};
use waypoint::errors::EngineError;
use waypoint::fixture::FixtureSite;
use waypoint::orchestrator::{
    Collaborators, Counters, Engine, FileSnapshotStore, Halt, RunOptions,
};

/// Flags of `waypoint start`, layered over the `[run]` section.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartFlags {
    pub continue_to_next_course: bool,
    pub force_reprocess_satisfied: bool,
    pub no_auto_submit: bool,
}

impl StartFlags {
    fn apply(&self, mut options: RunOptions) -> RunOptions {
        options.continue_to_next_course |= self.continue_to_next_course;
        options.force_reprocess_satisfied |= self.force_reprocess_satisfied;
        if self.no_auto_submit {
            options.auto_submit = false;
        }
        options
    }
}

/// Prints notices to the terminal.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info => println!("{} {}", console::style("•").cyan(), message),
            NoticeLevel::Success => println!("{} {}", console::style("✓").green(), message),
            NoticeLevel::Error => eprintln!("{} {}", console::style("✗").red(), message),
        }
    }
}

/// Build an engine the way a freshly started process would.
fn build_engine(project_dir: &Path, site: &Path) -> Result<Engine> {
    let waypoint_dir = get_waypoint_dir(project_dir);
    let toml = WaypointToml::load_or_default(&waypoint_dir)?;
    let fixture = Arc::new(
        FixtureSite::open(site, &waypoint_dir)
            .with_context(|| format!("Failed to open site {}", site.display()))?,
    );
    let store = Arc::new(FileSnapshotStore::new(waypoint_dir.join(SNAPSHOT_FILE)));

    Ok(Engine::new(
        Collaborators {
            extractor: fixture.clone(),
            answers: fixture.clone(),
            navigator: fixture.clone(),
            page: fixture,
            notifier: Arc::new(ConsoleNotifier),
        },
        store,
        toml.settings(),
    ))
}

pub async fn cmd_start(
    project_dir: &Path,
    site: &Path,
    flags: StartFlags,
    follow: bool,
) -> Result<()> {
    let waypoint_dir = get_waypoint_dir(project_dir);
    let toml = WaypointToml::load_or_default(&waypoint_dir)?;
    let options = flags.apply(toml.run.options());

    let engine = build_engine(project_dir, site)?;
    let halt = match engine.start(options).await {
        Ok(halt) => halt,
        Err(EngineError::RunAlreadyActive { phase }) => {
            anyhow::bail!(
                "A run is already active (phase: {}). Use 'waypoint recover' to continue it or 'waypoint stop' to discard it.",
                phase
            );
        }
        Err(err) => return Err(err.into()),
    };

    settle(project_dir, site, halt, follow).await
}

pub async fn cmd_recover(project_dir: &Path, site: &Path, follow: bool) -> Result<()> {
    let halt = build_engine(project_dir, site)?.recover().await?;
    settle(project_dir, site, halt, follow).await
}

/// Report how the invocation ended. With `follow`, every transition is
/// followed by a fresh engine, as a restarted process would do.
async fn settle(project_dir: &Path, site: &Path, mut halt: Halt, follow: bool) -> Result<()> {
    while follow && halt == Halt::Transitioned {
        halt = build_engine(project_dir, site)?.recover().await?;
    }

    match halt {
        Halt::Idle => println!("No run in progress."),
        Halt::Waiting => {
            println!("The current page does not belong to the run. Waiting for navigation.")
        }
        Halt::Transitioned => {
            println!(
                "{} Run 'waypoint recover' to continue.",
                console::style("Navigated.").dim()
            )
        }
        Halt::Finished(counters) => print_summary(&counters),
    }
    Ok(())
}

fn print_summary(counters: &Counters) {
    println!();
    println!("{}", console::style("Run finished").bold().cyan());
    println!("  Courses completed:     {}", counters.courses_completed);
    println!("  Quizzes completed:     {}", counters.quizzes_completed);
    println!("  Submissions completed: {}", counters.submissions_completed);
    println!("  Deferred:              {}", counters.deferred);
    if !counters.errors.is_empty() {
        println!("  {}", console::style("Errors:").red().bold());
        for error in &counters.errors {
            println!("    - {}", error);
        }
    }
    println!();
}
