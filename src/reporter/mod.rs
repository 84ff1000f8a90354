//! Reporters: where runner results go
//!
//! Runners call into the reporter concurrently; implementations serialize
//! their own state.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::models::TestResult;
use crate::output::ResultFormatter;

/// Sink for runner lifecycle events and results
pub trait Reporter: Send + Sync {
    fn on_start(&self, launcher_name: &str, launcher_id: usize);

    fn on_end(&self, launcher_name: &str, launcher_id: usize);

    /// Record a result; `launcher` is `None` for run-level errors
    fn report(&self, launcher: Option<&str>, result: TestResult);

    /// True iff every recorded result passed
    fn has_passed(&self) -> bool;

    /// True iff at least one result was recorded
    fn has_tests(&self) -> bool;

    fn results(&self) -> Vec<ReportedResult>;
}

/// A result together with the launcher that reported it
#[derive(Clone, Debug, PartialEq)]
pub struct ReportedResult {
    pub launcher: Option<String>,
    pub result: TestResult,
}

/// Lifecycle event seen by a reporter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReporterEvent {
    Start(usize),
    Report(Option<usize>),
    End(usize),
}

#[derive(Default)]
struct Collected {
    results: Vec<ReportedResult>,
    events: Vec<ReporterEvent>,
    started: usize,
}

/// Append-only reporter, optionally echoing each result as it arrives
#[derive(Default)]
pub struct CollectingReporter {
    state: Mutex<Collected>,
    echo: Option<ResultFormatter>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print every result through `formatter` when it is reported
    pub fn with_echo(mut self, formatter: ResultFormatter) -> Self {
        self.echo = Some(formatter);
        self
    }

    pub fn events(&self) -> Vec<ReporterEvent> {
        self.lock().events.clone()
    }

    pub fn total(&self) -> usize {
        self.lock().results.len()
    }

    pub fn passed(&self) -> usize {
        self.lock()
            .results
            .iter()
            .filter(|r| r.result.passed)
            .count()
    }

    /// Number of runners that announced a start
    pub fn started(&self) -> usize {
        self.lock().started
    }

    fn lock(&self) -> MutexGuard<'_, Collected> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Reporter for CollectingReporter {
    fn on_start(&self, _launcher_name: &str, launcher_id: usize) {
        let mut state = self.lock();
        state.started += 1;
        state.events.push(ReporterEvent::Start(launcher_id));
    }

    fn on_end(&self, _launcher_name: &str, launcher_id: usize) {
        self.lock().events.push(ReporterEvent::End(launcher_id));
    }

    fn report(&self, launcher: Option<&str>, result: TestResult) {
        let mut state = self.lock();
        state.events.push(ReporterEvent::Report(result.launcher_id));
        let reported = ReportedResult {
            launcher: launcher.map(String::from),
            result,
        };
        if let Some(formatter) = &self.echo {
            println!("{}", formatter.format_result(&reported, state.results.len() + 1));
        }
        state.results.push(reported);
    }

    fn has_passed(&self) -> bool {
        self.lock().results.iter().all(|r| r.result.passed)
    }

    fn has_tests(&self) -> bool {
        !self.lock().results.is_empty()
    }

    fn results(&self) -> Vec<ReportedResult> {
        self.lock().results.clone()
    }
}
