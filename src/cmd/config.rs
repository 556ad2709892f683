//! Configuration view and initialization commands: `waypoint config`.

use anyhow::Result;
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    use waypoint::config::{CONFIG_FILE, WaypointToml, get_waypoint_dir};

    let waypoint_dir = get_waypoint_dir(project_dir);
    let config_path = waypoint_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Waypoint Configuration");
            println!("======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No waypoint.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let toml = WaypointToml::load_or_default(&waypoint_dir)?;

            println!("[run]");
            println!("  continue_to_next_course = {}", toml.run.continue_to_next_course);
            println!("  force_reprocess_satisfied = {}", toml.run.force_reprocess_satisfied);
            println!("  auto_submit = {}", toml.run.auto_submit);
            println!();

            println!("[policy]");
            println!("  deferred = \"{}\"", toml.policy.deferred);
            println!("  artifact_format = \"{}\"", toml.policy.artifact_format.extension());
            println!();

            // Limits and pacing after env overrides
            let settings = toml.settings();
            println!("Effective values (with env overrides):");
            println!("  step_limit = {}", settings.step_limit);
            println!("  staleness_minutes = {}", settings.staleness.as_secs() / 60);
            println!("  pass_threshold = {}", settings.pass_threshold);
            println!("  max_attempts = {}", settings.max_attempts);
            println!("  min_instructions_chars = {}", settings.min_instructions_chars);
            println!("  page_settle_ms = {}", settings.pacing.page_settle.as_millis());
            println!(
                "  between_questions_ms = {}",
                settings.pacing.between_questions.as_millis()
            );
            println!("  submit_settle_ms = {}", settings.pacing.submit_settle.as_millis());
            println!("  between_tasks_ms = {}", settings.pacing.between_tasks.as_millis());
            println!();

            if !config_path.exists() {
                println!("Run 'waypoint config init' to create a waypoint.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("waypoint.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !waypoint_dir.exists() {
                std::fs::create_dir_all(&waypoint_dir)?;
            }

            WaypointToml::default().save(&config_path)?;

            println!("Created waypoint.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [run] default options for 'waypoint start'");
            println!("  - [limits] step limit, staleness, pass threshold, attempts");
            println!("  - [pacing] delays between page actions");
            println!("  - [policy] deferred task accounting, artifact format");
            println!();
        }
    }

    Ok(())
}
