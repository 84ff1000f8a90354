//! Driving an OS process runner

use tokio::sync::mpsc;
use tracing::debug;

use super::Runner;
use crate::error::OrchestratorError;
use crate::launcher::ProcessEvent;
use crate::models::TestResult;

/// Consume terminal signals until the process side closes.
///
/// Every signal is offered to `finish`; all but the first are ignored there.
pub(super) async fn drive(runner: &Runner, mut events: mpsc::UnboundedReceiver<ProcessEvent>) {
    while let Some(event) = events.recv().await {
        debug!(launcher = %runner.name(), ?event, "process signal");
        runner.finish(result_for(runner, event));
    }

    if !runner.is_finished() {
        let err = OrchestratorError::process("Process watcher stopped without an exit status");
        runner.finish(TestResult::from_process(
            runner.id(),
            runner.name(),
            Some(&err),
            None,
            "",
            "",
        ));
    }
}

fn result_for(runner: &Runner, event: ProcessEvent) -> TestResult {
    match event {
        ProcessEvent::Exited {
            code,
            stdout,
            stderr,
        } => TestResult::from_process(runner.id(), runner.name(), None, code, &stdout, &stderr),
        ProcessEvent::Errored {
            error,
            stdout,
            stderr,
        } => TestResult::from_process(
            runner.id(),
            runner.name(),
            Some(&error),
            None,
            &stdout,
            &stderr,
        ),
    }
}
