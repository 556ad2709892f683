use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "waypoint")]
#[command(version, about = "Resumable course task automation")]
pub struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new run on a rehearsal site
    Start {
        /// Site description (JSON)
        #[arg(long)]
        site: PathBuf,

        /// Move on to the next course when this one is done
        #[arg(long)]
        continue_to_next_course: bool,

        /// Also process tasks that are already passed
        #[arg(long)]
        force: bool,

        /// Fill in answers but leave the final submit to the user
        #[arg(long)]
        no_auto_submit: bool,

        /// Keep recovering after each transition until the run settles
        #[arg(long)]
        follow: bool,
    },
    /// Resume the persisted run, as a restarted process would
    Recover {
        /// Site description (JSON)
        #[arg(long)]
        site: PathBuf,

        /// Keep recovering after each transition until the run settles
        #[arg(long)]
        follow: bool,
    },
    /// Stop the current run
    Stop,
    /// Show the current run
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Initialize a default waypoint.toml file
    Init,
}

fn init_tracing(verbose: bool, json: bool) {
    let fallback = if verbose { "waypoint=debug" } else { "waypoint=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Start {
            site,
            continue_to_next_course,
            force,
            no_auto_submit,
            follow,
        } => {
            let flags = cmd::StartFlags {
                continue_to_next_course: *continue_to_next_course,
                force_reprocess_satisfied: *force,
                no_auto_submit: *no_auto_submit,
            };
            cmd::cmd_start(&project_dir, site, flags, *follow).await?;
        }
        Commands::Recover { site, follow } => {
            cmd::cmd_recover(&project_dir, site, *follow).await?;
        }
        Commands::Stop => cmd::cmd_stop(&project_dir)?,
        Commands::Status { json } => cmd::cmd_status(&project_dir, *json)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
