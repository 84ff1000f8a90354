//! testfleet - run one test suite across many environments
//!
//! Starts every configured launcher (OS processes such as a language runtime,
//! and browsers pointed at a served test page) concurrently, collects one
//! result per launcher and exits with a single combined status.
//!
//! ## Usage
//!
//! ```bash
//! # Run the launchers from ./testfleet.yaml
//! testfleet ci
//!
//! # Pick launchers and a timeout on the command line
//! testfleet ci --launch node,chrome --timeout 120
//!
//! # Write a CSV report next to the TAP output
//! testfleet ci --report-file results/run.csv
//!
//! # See which launchers resolve on this machine
//! testfleet launchers --all
//! ```

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

mod cli;
mod config;
mod error;
mod hooks;
mod launcher;
mod models;
mod orchestrator;
mod output;
mod reporter;
mod results;
mod runner;
mod server;
mod utils;

use cli::Args;
use config::{EnvConfig, RunConfig};
use launcher::{resolve_launchers, LauncherKind, ProcessSpec, KNOWN_BROWSERS};
use orchestrator::Orchestrator;
use output::{OutputFormat, ResultFormatter};
use reporter::{CollectingReporter, Reporter};
use results::StoredRun;
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::from_str(&args.log_level).unwrap_or(LogLevel::Info)
    };
    init_logger(level);

    match args.command {
        cli::Command::Ci(ci_args) => {
            let code = run_ci(ci_args).await?;
            std::process::exit(code);
        }
        cli::Command::Launchers(launchers_args) => {
            list_launchers(launchers_args)?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args)?;
        }
    }

    Ok(())
}

/// Config file, then `TESTFLEET_*` variables; flags are applied by the caller
fn load_config(file: Option<&Path>) -> Result<RunConfig> {
    let env = EnvConfig::load();
    let file = file.map(Path::to_path_buf).or_else(|| env.config_file.clone());

    let mut config = match file {
        Some(path) => RunConfig::load(&path)?,
        None => config::load_default().context("Failed to load default config")?,
    };
    env.apply(&mut config);
    Ok(config)
}

async fn run_ci(args: cli::CiArgs) -> Result<i32> {
    let mut config = load_config(args.file.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let format = OutputFormat::from_str(&args.format)
        .ok_or_else(|| anyhow!("Unknown output format: {}", args.format))?;
    let mut formatter = ResultFormatter::new(format);
    if args.no_color {
        formatter = formatter.no_color();
    }
    let reporter = Arc::new(CollectingReporter::new().with_echo(formatter.clone()));

    info!(launchers = ?config.launchers, port = config.port, "starting run");
    let started_at = Utc::now();
    let report_file = config.report_file.clone();
    let mut orchestrator = Orchestrator::new(config, reporter.clone());

    let exit = orchestrator.exit_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, wrapping up");
            exit.exit();
        }
    });

    let outcome = orchestrator.start().await;
    let results = reporter.results();
    println!("{}", formatter.format_summary(&results, outcome.status.reason()));
    if let Some(err) = &outcome.error {
        error!("{err}");
    }

    if let Some(path) = report_file {
        StoredRun::new(started_at, &results, outcome.exit_code(), outcome.status.reason())
            .export(&path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    Ok(outcome.exit_code())
}

fn list_launchers(args: cli::LaunchersArgs) -> Result<()> {
    let config = load_config(args.file.as_deref())?;

    println!("\nConfigured launchers\n");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if config.launchers.is_empty() {
        println!("  (none)");
    }
    for name in &config.launchers {
        let single = RunConfig {
            launchers: vec![name.clone()],
            ignore_missing_launchers: false,
            ..config.clone()
        };
        match resolve_launchers(&single) {
            Ok(launchers) => {
                for launcher in launchers {
                    let target = match launcher.kind() {
                        LauncherKind::Process(ProcessSpec::Shell(line)) => {
                            format!("process: {line}")
                        }
                        LauncherKind::Process(ProcessSpec::Exec { exe, args }) => {
                            format!("process: {} {}", exe.display(), args.join(" "))
                        }
                        LauncherKind::Browser(spec) => {
                            format!("browser: {} ({})", spec.exe.display(), spec.test_page)
                        }
                    };
                    println!("  ✓ {:15} {}", launcher.name(), target.trim_end());
                }
            }
            Err(e) => println!("  ✗ {name:15} {e}"),
        }
    }

    if args.all {
        println!("\nKnown browsers\n");
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        for browser in KNOWN_BROWSERS {
            match browser.locate() {
                Some(path) => println!("  ✓ {:15} {}", browser.name, path.display()),
                None => println!("  ✗ {:15} not installed", browser.name),
            }
        }
    }
    println!();

    Ok(())
}

fn manage_config(args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Example { output } => {
            let example = config::example_config();
            match output {
                Some(path) => {
                    example.save(&path)?;
                    println!("Wrote example configuration to {}", path.display());
                }
                None => {
                    let yaml = serde_yaml::to_string(&example)
                        .context("Failed to serialize example config")?;
                    println!("{yaml}");
                }
            }
        }
        cli::ConfigAction::Env => {
            config::print_env_help();
        }
    }
    Ok(())
}
