use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Target;

use run_expo::diagnostics::DiagnosticsJournal;
use run_expo::picker::{self, CREATE_PROMPT, OPEN_PROMPT};
use run_expo::{
    LaunchConfig, LaunchError, LaunchRequest, SequenceStatus, Sequencer, StatusSink,
    SystemLauncher,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Launch profile (JSON); defaults to $RUN_EXPO_PROFILE_PATH
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Dev server port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Seconds to wait for the dev server address (0 waits forever)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Where diagnostics are kept
    #[arg(long, global = true)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new Expo project and serve it
    Create { dir: Option<String> },
    /// Serve a previously created project
    Open { dir: Option<String> },
    /// Show recent launcher events
    Diagnostics {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
}

/// Mirrors every status change to stdout.
struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn publish(&self, status: &SequenceStatus) {
        println!("{status}");
    }
}

fn resolve_dir(raw: Option<String>, prompt: &str) -> Result<PathBuf, LaunchError> {
    match raw {
        Some(raw) => picker::accept_dir(&raw),
        None => {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut output = io::stdout();
            picker::choose_dir(prompt, &mut input, &mut output)
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(Target::Stderr)
        .init();

    let cli = Cli::parse();
    let request = LaunchRequest {
        profile_path: cli.profile,
        port: cli.port,
        readiness_timeout_secs: cli.timeout_secs,
        data_dir: cli.data_dir,
    };
    let config = LaunchConfig::resolve(&request);

    let (dir, fresh) = match cli.command {
        Commands::Diagnostics { limit, json } => {
            let journal = DiagnosticsJournal::open(config.diagnostics_path());
            let events = journal.recent(limit);
            let mut out = io::stdout().lock();
            if json {
                serde_json::to_writer_pretty(&mut out, events)
                    .context("encoding diagnostics")?;
                writeln!(out)?;
            } else {
                for event in events {
                    writeln!(
                        out,
                        "{} [{}] {}: {}",
                        event.ts_ms, event.level, event.source, event.message
                    )?;
                }
            }
            return Ok(());
        }
        Commands::Create { dir } => (dir, true),
        Commands::Open { dir } => (dir, false),
    };

    if fresh {
        config.require_package_manager()?;
    }
    let prompt = if fresh { CREATE_PROMPT } else { OPEN_PROMPT };
    let dir = match resolve_dir(dir, prompt) {
        Ok(dir) => dir,
        Err(LaunchError::NoDirectorySelected) => {
            log::info!("No directory selected");
            return Ok(());
        }
        Err(err) => return Err(err).context("reading directory"),
    };
    log::info!("User chose: {}", dir.display());

    let sequencer = Sequencer::new(config, Arc::new(SystemLauncher));
    let outcome = if fresh {
        sequencer.run_fresh(dir, &ConsoleStatus)
    } else {
        sequencer.run_existing(dir, &ConsoleStatus)
    }
    .context("launch failed")?;

    println!("Open {} to preview the app", outcome.address());
    let status = outcome.server.wait().context("waiting for dev server")?;
    log::info!("dev server exited: {status}");
    Ok(())
}
