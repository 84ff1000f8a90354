//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{split_list, RunConfig};

/// Run a test suite across processes and browsers at once
#[derive(Parser, Debug)]
#[command(name = "testfleet")]
#[command(version)]
#[command(about = "Run one test suite across many environments and combine the results")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run all launchers once and exit with the combined status
    Ci(CiArgs),

    /// List configured launchers and whether they resolve
    Launchers(LaunchersArgs),

    /// Configuration helpers
    Config(ConfigArgs),
}

/// Arguments for ci command
#[derive(Parser, Debug, Default)]
pub struct CiArgs {
    /// Configuration file (YAML or JSON)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Launchers to run (comma-separated)
    #[arg(short, long)]
    pub launch: Option<String>,

    /// Test page server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Global timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<f64>,

    /// Working directory
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Fail when no test results were reported
    #[arg(long)]
    pub fail_on_zero_tests: bool,

    /// Skip launchers that are not installed
    #[arg(long)]
    pub ignore_missing_launchers: bool,

    /// Output format (table, json, json-pretty, tap)
    #[arg(long, default_value = "tap")]
    pub format: String,

    /// Disable colors in table output
    #[arg(long)]
    pub no_color: bool,

    /// Write results to a file (.json, .csv or .tap)
    #[arg(short, long)]
    pub report_file: Option<PathBuf>,

    /// Maximum number of launchers running at once
    #[arg(long)]
    pub parallel: Option<usize>,
}

impl CiArgs {
    /// Apply flags on top of file and environment settings
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(launch) = &self.launch {
            config.launchers = split_list(launch);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
        if let Some(cwd) = &self.cwd {
            config.cwd = cwd.clone();
        }
        if self.fail_on_zero_tests {
            config.fail_on_zero_tests = true;
        }
        if self.ignore_missing_launchers {
            config.ignore_missing_launchers = true;
        }
        if let Some(report_file) = &self.report_file {
            config.report_file = Some(report_file.clone());
        }
        if let Some(parallel) = self.parallel {
            config.parallel = Some(parallel);
        }
    }
}

/// Arguments for launchers command
#[derive(Parser, Debug)]
pub struct LaunchersArgs {
    /// Configuration file (YAML or JSON)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Also list the browsers known without configuration
    #[arg(short, long)]
    pub all: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print or write an example configuration
    Example {
        /// Write to this file instead of printing
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the environment variables testfleet reads
    Env,
}
