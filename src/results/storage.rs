//! Stored run records and report file export

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::models::{CaseOutcome, LogEntry, ResultError, TestResult};
use crate::output::{OutputFormat, ResultFormatter};
use crate::reporter::ReportedResult;

/// A finished run as written to a report file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRun {
    /// Unique run ID
    pub id: String,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Process exit code of the run
    pub exit_code: i32,

    /// Why the run failed, if it did
    pub reason: Option<String>,

    pub total: usize,

    pub passed: usize,

    pub failed: usize,

    pub results: Vec<StoredResult>,

    pub environment: EnvironmentInfo,
}

/// One stored result
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredResult {
    /// Launcher that reported it; `None` for run-level errors
    pub launcher: Option<String>,

    pub launcher_id: Option<usize>,

    pub name: String,

    pub passed: bool,

    pub duration_ms: u64,

    pub error: Option<String>,

    #[serde(default)]
    pub logs: Vec<LogEntry>,

    #[serde(default)]
    pub cases: Vec<CaseOutcome>,
}

/// Environment information
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub os: String,
    pub arch: String,
    pub tool_version: String,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Report file formats
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Tap,
}

impl ExportFormat {
    /// Pick the format from a file extension; anything unknown is JSON
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("csv") => ExportFormat::Csv,
            Some("tap") => ExportFormat::Tap,
            _ => ExportFormat::Json,
        }
    }
}

impl StoredRun {
    /// Build a record of a run that started at `started_at`
    pub fn new(
        started_at: DateTime<Utc>,
        results: &[ReportedResult],
        exit_code: i32,
        reason: Option<&str>,
    ) -> Self {
        let passed = results.iter().filter(|r| r.result.passed).count();
        Self {
            id: generate_run_id(),
            started_at,
            completed_at: Utc::now(),
            exit_code,
            reason: reason.map(String::from),
            total: results.len(),
            passed,
            failed: results.len() - passed,
            results: results.iter().map(StoredResult::from_reported).collect(),
            environment: EnvironmentInfo::default(),
        }
    }

    /// Write the run to `path` in the format its extension names
    pub fn export(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        match ExportFormat::from_path(path) {
            ExportFormat::Json => {
                let file = File::create(path).context("Failed to create report file")?;
                let writer = BufWriter::new(file);
                serde_json::to_writer_pretty(writer, self).context("Failed to write report")?;
            }
            ExportFormat::Csv => {
                let mut writer =
                    csv::Writer::from_path(path).context("Failed to create report file")?;
                writer.write_record([
                    "launcher_id",
                    "launcher",
                    "name",
                    "passed",
                    "duration_ms",
                    "error",
                ])?;
                for result in &self.results {
                    writer.write_record([
                        result.launcher_id.map(|id| id.to_string()).unwrap_or_default(),
                        result.launcher.clone().unwrap_or_default(),
                        result.name.clone(),
                        result.passed.to_string(),
                        result.duration_ms.to_string(),
                        result.error.clone().unwrap_or_default(),
                    ])?;
                }
                writer.flush()?;
            }
            ExportFormat::Tap => {
                let formatter = ResultFormatter::new(OutputFormat::Tap);
                let reported: Vec<ReportedResult> =
                    self.results.iter().map(StoredResult::to_reported).collect();

                let file = File::create(path).context("Failed to create report file")?;
                let mut writer = BufWriter::new(file);
                for (index, result) in reported.iter().enumerate() {
                    writeln!(writer, "{}", formatter.format_result(result, index + 1))?;
                }
                write!(
                    writer,
                    "{}",
                    formatter.format_summary(&reported, self.reason.as_deref())
                )?;
                writer.flush()?;
            }
        }

        info!("Wrote report to {}", path.display());
        Ok(())
    }

    /// Load a JSON report
    #[cfg(test)]
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).context("Failed to open report file")?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).context("Failed to parse report")
    }
}

impl StoredResult {
    pub fn from_reported(reported: &ReportedResult) -> Self {
        let result = &reported.result;
        Self {
            launcher: reported.launcher.clone(),
            launcher_id: result.launcher_id,
            name: result.name.clone(),
            passed: result.passed,
            duration_ms: result.duration_ms,
            error: result.error_message().map(String::from),
            logs: result.logs.clone(),
            cases: result.cases.clone(),
        }
    }

    fn to_reported(&self) -> ReportedResult {
        ReportedResult {
            launcher: self.launcher.clone(),
            result: TestResult {
                launcher_id: self.launcher_id,
                launcher_name: self.launcher.clone().unwrap_or_default(),
                passed: self.passed,
                name: self.name.clone(),
                error: self
                    .error
                    .clone()
                    .map(|message| ResultError { message }),
                logs: self.logs.clone(),
                duration_ms: self.duration_ms,
                cases: self.cases.clone(),
            },
        }
    }
}

/// Generate unique run ID
fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}
