use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use driftwatch_core::event_log::ChangeLog;
use driftwatch_core::paths::data_dir;
use driftwatch_core::{Change, MonitorSettings};
use driftwatch_service::{MonitorContext, MonitorSession};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing_subscriber::EnvFilter;

const PROMPT: &str = "Enter a directory to monitor or type 'q' to quit:";

#[derive(Parser, Debug)]
#[command(author, version, about = "driftwatch file-integrity monitor", long_about = None)]
struct Cli {
    /// Settings file (defaults to <data-dir>/settings.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding baselines and change logs
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a directory and record its baseline
    Baseline {
        root: PathBuf,
        /// Replace an existing baseline
        #[arg(long)]
        force: bool,
    },
    /// Compare a directory against its baseline; exits 1 on drift
    Check {
        root: PathBuf,
        /// Adopt the current state as the new baseline
        #[arg(long)]
        accept: bool,
        #[arg(long)]
        json: bool,
    },
    /// Monitor a directory until Ctrl-C
    Watch { root: Option<PathBuf> },
    /// Show recent entries from the change log
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Serialize)]
struct CheckReport<'a> {
    root: &'a Path,
    baseline: &'a Path,
    accepted: bool,
    changes: &'a [Change],
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data = match cli.data_dir {
        Some(dir) => dir,
        None => data_dir()?,
    };
    let settings = MonitorSettings::resolve(cli.config.as_deref(), &data)
        .context("cannot load settings")?;

    match cli.command {
        Commands::Baseline { root, force } => baseline_command(&root, settings, &data, force),
        Commands::Check { root, accept, json } => check_command(&root, settings, &data, accept, json),
        Commands::Watch { root } => watch_command(root, settings, &data).await,
        Commands::History { limit } => history_command(&settings, &data, limit),
    }
}

fn baseline_command(root: &Path, settings: MonitorSettings, data: &Path, force: bool) -> Result<ExitCode> {
    let context = MonitorContext::resolve(root, settings, data)?;
    let baseline = context.build_baseline(force)?;
    println!(
        "Baseline for {}: {} files -> {}",
        context.root.display(),
        baseline.len(),
        context.baseline_path.display()
    );
    Ok(ExitCode::SUCCESS)
}

fn check_command(
    root: &Path,
    settings: MonitorSettings,
    data: &Path,
    accept: bool,
    json: bool,
) -> Result<ExitCode> {
    let context = MonitorContext::resolve(root, settings, data)?;
    let changes = context.check(accept)?;

    if json {
        let report = CheckReport {
            root: &context.root,
            baseline: &context.baseline_path,
            accepted: accept,
            changes: &changes,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if changes.is_empty() {
        println!("No drift detected in {}", context.root.display());
    } else {
        for change in &changes {
            println!("{change}");
        }
    }

    if changes.is_empty() || accept {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

async fn watch_command(root: Option<PathBuf>, settings: MonitorSettings, data: &Path) -> Result<ExitCode> {
    if let Some(root) = root {
        run_session(&root, settings, data).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{PROMPT} ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            return Ok(ExitCode::SUCCESS);
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("q") || input.eq_ignore_ascii_case("exit") {
            return Ok(ExitCode::SUCCESS);
        }

        let path = PathBuf::from(input);
        if !path.is_dir() {
            eprintln!("Error: {input} is not an existing directory");
            continue;
        }
        if let Err(e) = run_session(&path, settings.clone(), data).await {
            eprintln!("Error: {e:#}");
        }
    }
}

async fn run_session(root: &Path, settings: MonitorSettings, data: &Path) -> Result<()> {
    let context = MonitorContext::resolve(root, settings, data)?;
    println!("Monitoring {} (Ctrl-C to stop)", context.root.display());
    let session = MonitorSession::start(context, true).await?;

    signal::ctrl_c().await.context("cannot listen for Ctrl-C")?;
    let baseline = session.stop().await?;
    println!("Stopped; {} files in baseline", baseline.len());
    Ok(())
}

fn history_command(settings: &MonitorSettings, data: &Path, limit: usize) -> Result<ExitCode> {
    let log = ChangeLog::in_dir(settings.log_dir_for(data), settings.max_log_bytes)?;
    let entries = log.read_recent(None, Some(limit))?;
    if entries.is_empty() {
        println!("No changes recorded");
    }
    for entry in entries {
        println!(
            "{:>6} {} {} {}",
            entry.seq,
            entry.timestamp.format("%Y-%m-%d_%H:%M:%S%.6f"),
            entry.kind,
            entry.path.display()
        );
    }
    Ok(ExitCode::SUCCESS)
}
