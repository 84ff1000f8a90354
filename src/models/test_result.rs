//! Result models for launcher runs
//!
//! A `TestResult` is the single immutable outcome a runner produces.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::OrchestratorError;

/// Kind of captured log line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Log,
    Info,
    Warn,
    Error,
}

impl LogKind {
    /// Map a browser console method name
    pub fn from_method(method: &str) -> Self {
        match method.to_lowercase().as_str() {
            "warn" | "warning" => LogKind::Warn,
            "error" => LogKind::Error,
            "info" => LogKind::Info,
            _ => LogKind::Log,
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKind::Log => write!(f, "log"),
            LogKind::Info => write!(f, "info"),
            LogKind::Warn => write!(f, "warn"),
            LogKind::Error => write!(f, "error"),
        }
    }
}

/// One captured log entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub text: String,
}

impl LogEntry {
    pub fn new(kind: LogKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Error attached to a failed result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultError {
    pub message: String,
}

impl From<&OrchestratorError> for ResultError {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

/// Outcome of a single test reported by a browser page
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one launcher run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// `None` only for the synthetic result recorded at wrap-up
    pub launcher_id: Option<usize>,
    pub launcher_name: String,
    pub passed: bool,
    pub name: String,
    pub error: Option<ResultError>,
    pub logs: Vec<LogEntry>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cases: Vec<CaseOutcome>,
}

impl TestResult {
    /// Build the result of a finished process.
    ///
    /// A process passes when it reported no error and exited with code 0.
    pub fn from_process(
        launcher_id: usize,
        launcher_name: impl Into<String>,
        error: Option<&OrchestratorError>,
        exit_code: Option<i32>,
        stdout: &str,
        stderr: &str,
    ) -> Self {
        let launcher_name = launcher_name.into();
        let passed = error.is_none() && exit_code == Some(0);

        let error = match error {
            Some(err) => Some(ResultError::from(err)),
            None if passed => None,
            None => Some(ResultError {
                message: match exit_code {
                    Some(code) => format!("Non-zero exit code: {code}"),
                    None => "Process terminated by signal".to_string(),
                },
            }),
        };

        let mut logs = Vec::new();
        if !stdout.is_empty() {
            logs.push(LogEntry::new(LogKind::Log, stdout));
        }
        if !stderr.is_empty() {
            logs.push(LogEntry::new(LogKind::Error, stderr));
        }

        Self {
            launcher_id: Some(launcher_id),
            name: launcher_name.clone(),
            launcher_name,
            passed,
            error,
            logs,
            duration_ms: 0,
            cases: Vec::new(),
        }
    }

    /// Build the result of a browser page run
    pub fn from_page(
        launcher_id: usize,
        launcher_name: impl Into<String>,
        error: Option<&OrchestratorError>,
        cases: Vec<CaseOutcome>,
        logs: Vec<LogEntry>,
    ) -> Self {
        let launcher_name = launcher_name.into();
        let first_failure = cases.iter().find(|c| !c.passed);

        let error = match (error, first_failure) {
            (Some(err), _) => Some(ResultError::from(err)),
            (None, Some(case)) => Some(ResultError {
                message: match &case.error {
                    Some(msg) => format!("{}: {}", case.name, msg),
                    None => format!("{} failed", case.name),
                },
            }),
            (None, None) => None,
        };

        Self {
            launcher_id: Some(launcher_id),
            name: launcher_name.clone(),
            launcher_name,
            passed: error.is_none(),
            error,
            logs,
            duration_ms: 0,
            cases,
        }
    }

    /// Synthetic failed result for a run-level error
    pub fn global_error(err: &OrchestratorError) -> Self {
        Self {
            launcher_id: None,
            launcher_name: String::new(),
            passed: false,
            name: "Error".to_string(),
            error: Some(ResultError::from(err)),
            logs: Vec::new(),
            duration_ms: 0,
            cases: Vec::new(),
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    pub fn symbol(&self) -> &'static str {
        if self.passed {
            "✓"
        } else {
            "✗"
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}ms]", self.symbol(), self.name, self.duration_ms)?;
        if let Some(msg) = self.error_message() {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}
