//! Driving a browser runner
//!
//! The browser process and its page are watched together. The page reports
//! per-test results over its socket; silence longer than the disconnect
//! timeout after the page connected fails the run, as does the browser
//! exiting before the page says it is done.

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use super::Runner;
use crate::error::OrchestratorError;
use crate::launcher::ProcessEvent;
use crate::models::{CaseOutcome, LogEntry, LogKind, TestResult};
use crate::server::{BrowserEvent, PageMessage};

pub(super) async fn drive(
    runner: &Runner,
    mut process_events: mpsc::UnboundedReceiver<ProcessEvent>,
    mut page_events: mpsc::UnboundedReceiver<BrowserEvent>,
) {
    let silence = runner.context().disconnect_timeout;
    let mut cases: Vec<CaseOutcome> = Vec::new();
    let mut logs: Vec<LogEntry> = Vec::new();
    // Armed once the page connects; stays unarmed if the timeout overflows
    let mut deadline: Option<Instant> = None;

    let error = loop {
        let armed = deadline;
        let silence_elapsed = async move {
            match armed {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = process_events.recv() => {
                break Some(early_exit(event, &mut logs));
            }
            event = page_events.recv() => {
                let Some(event) = event else {
                    break Some(OrchestratorError::process("Browser page channel closed"));
                };
                match event {
                    BrowserEvent::Connected => {
                        debug!(launcher = %runner.name(), id = runner.id(), "page connected");
                        deadline = Instant::now().checked_add(silence);
                    }
                    BrowserEvent::Disconnected => {
                        // The page may reconnect before the deadline
                        debug!(launcher = %runner.name(), id = runner.id(), "page disconnected");
                    }
                    BrowserEvent::Page(message) => {
                        deadline = Instant::now().checked_add(silence);
                        match message {
                            PageMessage::Ping | PageMessage::TestsStart => {}
                            PageMessage::TestResult { name, passed, error } => {
                                cases.push(CaseOutcome { name, passed, error });
                            }
                            PageMessage::BrowserConsole { method, text } => {
                                logs.push(LogEntry::new(LogKind::from_method(&method), text));
                            }
                            PageMessage::AllTestResults => break None,
                        }
                    }
                }
            }
            _ = silence_elapsed => {
                break Some(OrchestratorError::process(format!(
                    "Browser disconnected: no message for {} s",
                    silence.as_secs_f64()
                )));
            }
        }
    };

    runner.context().registry.unregister(runner.id());
    runner.finish(TestResult::from_page(
        runner.id(),
        runner.name(),
        error.as_ref(),
        cases,
        logs,
    ));
}

/// Error for a browser whose process ended before its page completed
fn early_exit(event: Option<ProcessEvent>, logs: &mut Vec<LogEntry>) -> OrchestratorError {
    match event {
        Some(ProcessEvent::Exited { stderr, .. }) => {
            if !stderr.is_empty() {
                logs.push(LogEntry::new(LogKind::Error, stderr));
            }
            OrchestratorError::process("Browser exited unexpectedly")
        }
        Some(ProcessEvent::Errored { error, stderr, .. }) => {
            if !stderr.is_empty() {
                logs.push(LogEntry::new(LogKind::Error, stderr));
            }
            error
        }
        None => OrchestratorError::process("Browser exited unexpectedly"),
    }
}
