//! Run inspection and cancellation: `waypoint status` and `waypoint stop`.

use anyhow::{Context, Result};
use std::path::Path;

use waypoint::config::{SNAPSHOT_FILE, WaypointToml, get_waypoint_dir};
use waypoint::orchestrator::{FileSnapshotStore, read_status, stop_run};

fn store(project_dir: &Path) -> FileSnapshotStore {
    FileSnapshotStore::new(get_waypoint_dir(project_dir).join(SNAPSHOT_FILE))
}

pub fn cmd_status(project_dir: &Path, json: bool) -> Result<()> {
    let settings = WaypointToml::load_or_default(&get_waypoint_dir(project_dir))?.settings();
    let status = read_status(&store(project_dir), settings.staleness_chrono())?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialize status")?
        );
        return Ok(());
    }

    println!();
    if !status.is_running {
        println!("No run in progress.");
        println!();
        return Ok(());
    }

    println!("{}", console::style("Run in progress").bold().cyan());
    if let Some(run_id) = status.run_id {
        println!("  Run:         {}", run_id);
    }
    println!("  Phase:       {}", status.phase);
    println!("  Course:      {}", status.course_index + 1);
    match &status.active_task {
        Some(task) => println!("  Active task: {} ({})", task.title, task.kind),
        None => println!("  Active task: {}", console::style("none").dim()),
    }
    println!("  Backlog:     {} remaining", status.backlog_len);
    println!();
    println!("  Quizzes completed:     {}", status.counters.quizzes_completed);
    println!("  Submissions completed: {}", status.counters.submissions_completed);
    println!("  Courses completed:     {}", status.counters.courses_completed);
    println!("  Deferred:              {}", status.counters.deferred);
    if !status.counters.errors.is_empty() {
        println!("  {}", console::style("Errors:").red().bold());
        for error in &status.counters.errors {
            println!("    - {}", error);
        }
    }
    println!();
    Ok(())
}

pub fn cmd_stop(project_dir: &Path) -> Result<()> {
    if stop_run(&store(project_dir))? {
        println!("Run stopped.");
    } else {
        println!("No run in progress.");
    }
    Ok(())
}
