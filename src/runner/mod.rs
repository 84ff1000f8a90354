//! Runners
//!
//! A runner binds one launcher to the reporter and turns the launcher's
//! lifecycle into exactly one result. `finish` is latched: the first terminal
//! signal reports, every later one is a no-op.

mod browser;
mod process;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;
use crate::hooks::{run_hook, Hook, HookContext};
use crate::launcher::{LaunchContext, LaunchedProcess, Launcher, ProcessHandle};
use crate::models::TestResult;
use crate::reporter::Reporter;
use crate::server::{BrowserEvent, BrowserRegistry};
use crate::utils::Timer;

/// Runner lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Started,
    Running,
    Finished,
}

/// Run-wide values every runner needs
#[derive(Clone)]
pub struct RunContext {
    pub port: u16,
    pub cwd: PathBuf,
    pub before_tests: Option<String>,
    pub disconnect_timeout: Duration,
    pub registry: BrowserRegistry,
}

struct RunnerInner {
    state: RunnerState,
    handle: Option<ProcessHandle>,
    on_finish: Option<oneshot::Sender<()>>,
    completion: Option<oneshot::Receiver<()>>,
    exit_requested: bool,
    timer: Option<Timer>,
}

pub struct Runner {
    launcher: Launcher,
    reporter: Arc<dyn Reporter>,
    ctx: Arc<RunContext>,
    inner: Mutex<RunnerInner>,
}

impl Runner {
    pub fn new(launcher: Launcher, reporter: Arc<dyn Reporter>, ctx: Arc<RunContext>) -> Self {
        let (on_finish, completion) = oneshot::channel();
        Self {
            launcher,
            reporter,
            ctx,
            inner: Mutex::new(RunnerInner {
                state: RunnerState::Idle,
                handle: None,
                on_finish: Some(on_finish),
                completion: Some(completion),
                exit_requested: false,
                timer: None,
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.launcher.id()
    }

    pub fn name(&self) -> &str {
        self.launcher.name()
    }

    pub fn state(&self) -> RunnerState {
        self.lock().state
    }

    pub fn is_finished(&self) -> bool {
        self.state() == RunnerState::Finished
    }

    /// Whether a live process is attached
    pub fn has_handle(&self) -> bool {
        self.lock().handle.is_some()
    }

    /// Run the launcher to completion.
    ///
    /// Returns once the result is reported. Hook and launch failures are
    /// reported as a failed result and then returned.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        self.begin().await?;

        let page_events = self
            .launcher
            .is_browser()
            .then(|| self.ctx.registry.register(self.id()));

        let launch_ctx = LaunchContext {
            cwd: self.ctx.cwd.clone(),
            port: self.ctx.port,
        };
        let launched = match self.launcher.start(&launch_ctx).await {
            Ok(launched) => launched,
            Err(err) => {
                self.ctx.registry.unregister(self.id());
                warn!(launcher = %self.name(), error = %err, "launch failed");
                self.finish(self.failed(&err));
                return Err(err);
            }
        };

        self.run(launched, page_events).await;
        Ok(())
    }

    /// Idle → Started, announce the start and run `before_tests`
    async fn begin(&self) -> Result<(), OrchestratorError> {
        {
            let mut inner = self.lock();
            if inner.state != RunnerState::Idle {
                return Err(OrchestratorError::process(format!(
                    "Runner {} already started",
                    self.id()
                )));
            }
            inner.state = RunnerState::Started;
            inner.timer = Some(Timer::start(self.name()));
        }

        info!(launcher = %self.name(), id = self.id(), "runner started");
        self.reporter.on_start(self.name(), self.id());

        let Some(command) = &self.ctx.before_tests else {
            return Ok(());
        };
        let mut hook_ctx = HookContext::new(&self.ctx.cwd, self.ctx.port);
        if let Some(url) = self.launcher.url(self.ctx.port) {
            hook_ctx = hook_ctx.with_url(url);
        }
        if let Err(err) = run_hook(Hook::BeforeTests, command, &hook_ctx).await {
            warn!(launcher = %self.name(), error = %err, "before_tests hook failed");
            self.finish(self.failed(&err));
            return Err(err);
        }
        Ok(())
    }

    /// Attach a live process and consume its signals until finished
    async fn run(
        &self,
        launched: LaunchedProcess,
        page_events: Option<mpsc::UnboundedReceiver<BrowserEvent>>,
    ) {
        let LaunchedProcess { handle, events } = launched;
        self.attach(handle);

        match page_events {
            None => process::drive(self, events).await,
            Some(page_events) => browser::drive(self, events, page_events).await,
        }

        let completion = self.lock().completion.take();
        if let Some(completion) = completion {
            let _ = completion.await;
        }
    }

    fn attach(&self, handle: ProcessHandle) {
        let mut inner = self.lock();
        if inner.exit_requested {
            debug!(launcher = %self.name(), "exit requested before launch completed");
            handle.signal_kill();
        }
        if inner.state == RunnerState::Started {
            inner.state = RunnerState::Running;
        }
        inner.handle = Some(handle);
    }

    /// Record the runner's result.
    ///
    /// Only the first call reports; returns whether this call did.
    pub fn finish(&self, result: TestResult) -> bool {
        let (handle, on_finish, timer) = {
            let mut inner = self.lock();
            if inner.state == RunnerState::Finished {
                debug!(launcher = %self.name(), id = self.id(), "ignoring late terminal signal");
                return false;
            }
            inner.state = RunnerState::Finished;
            (inner.handle.take(), inner.on_finish.take(), inner.timer.take())
        };

        if let Some(handle) = handle {
            if self.launcher.is_browser() {
                handle.signal_kill();
            }
        }

        let duration_ms = timer.map(|t| t.stop().as_millis() as u64).unwrap_or(0);
        let result = result.with_duration(duration_ms);
        info!(
            launcher = %self.name(),
            id = self.id(),
            passed = result.passed,
            "runner finished"
        );

        self.reporter.report(Some(self.name()), result);
        self.reporter.on_end(self.name(), self.id());

        if let Some(tx) = on_finish {
            let _ = tx.send(());
        }
        true
    }

    /// Request the live process be killed without waiting
    pub fn signal_exit(&self) {
        let mut inner = self.lock();
        inner.exit_requested = true;
        if let Some(handle) = &inner.handle {
            handle.signal_kill();
        }
    }

    /// Kill the live process and wait until it is gone.
    ///
    /// The resulting terminal signal, not this call, finishes the runner.
    pub async fn exit(&self) {
        let handle = {
            let mut inner = self.lock();
            inner.exit_requested = true;
            inner.handle.clone()
        };
        if let Some(handle) = handle {
            debug!(launcher = %self.name(), id = self.id(), "killing runner process");
            handle.kill().await;
        }
    }

    fn context(&self) -> &RunContext {
        &self.ctx
    }

    fn failed(&self, err: &OrchestratorError) -> TestResult {
        TestResult::from_process(self.id(), self.name(), Some(err), None, "", "")
    }

    fn lock(&self) -> MutexGuard<'_, RunnerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{LauncherKind, ManualProcess, ProcessEvent, ProcessSpec};
    use crate::reporter::{CollectingReporter, ReporterEvent};

    fn context() -> Arc<RunContext> {
        Arc::new(RunContext {
            port: 0,
            cwd: std::env::temp_dir(),
            before_tests: None,
            disconnect_timeout: Duration::from_secs(10),
            registry: BrowserRegistry::new(),
        })
    }

    fn shell_runner(
        line: &str,
        ctx: Arc<RunContext>,
    ) -> (Arc<Runner>, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::new());
        let launcher = Launcher::new(
            0,
            "Node",
            LauncherKind::Process(ProcessSpec::Shell(line.to_string())),
        );
        let runner = Arc::new(Runner::new(launcher, reporter.clone(), ctx));
        (runner, reporter)
    }

    fn exited(code: i32) -> ProcessEvent {
        ProcessEvent::Exited {
            code: Some(code),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    #[tokio::test]
    async fn test_finish_is_latched() {
        let (runner, reporter) = shell_runner("true", context());
        runner.begin().await.unwrap();

        let result = TestResult::from_process(0, "Node", None, Some(0), "", "");
        assert!(runner.finish(result.clone()));
        assert!(!runner.finish(result));

        assert_eq!(reporter.total(), 1);
        assert_eq!(
            reporter.events(),
            vec![
                ReporterEvent::Start(0),
                ReporterEvent::Report(Some(0)),
                ReporterEvent::End(0)
            ]
        );
        assert!(runner.is_finished());
    }

    #[tokio::test]
    async fn test_first_terminal_signal_wins() {
        let (runner, reporter) = shell_runner("true", context());
        runner.begin().await.unwrap();

        let (launched, manual) = ManualProcess::launch();
        manual.events.send(exited(0)).unwrap();
        manual
            .events
            .send(ProcessEvent::Errored {
                error: OrchestratorError::process("late"),
                stdout: String::new(),
                stderr: String::new(),
            })
            .unwrap();
        drop(manual);

        runner.run(launched, None).await;

        let results = reporter.results();
        assert_eq!(results.len(), 1);
        assert!(results[0].result.passed);
        assert!(!runner.has_handle());
    }

    #[tokio::test]
    async fn test_exit_before_attach_kills_on_attach() {
        let (runner, reporter) = shell_runner("true", context());
        runner.begin().await.unwrap();
        runner.signal_exit();

        let (launched, manual) = ManualProcess::launch();
        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(launched, None).await })
        };

        let mut kill_rx = manual.kill_rx.clone();
        kill_rx.wait_for(|kill| *kill).await.unwrap();
        assert!(manual.kill_requested());
        assert_eq!(reporter.total(), 0);

        manual
            .events
            .send(ProcessEvent::Exited {
                code: None,
                stdout: String::new(),
                stderr: String::new(),
            })
            .unwrap();
        drop(manual);
        task.await.unwrap();

        let results = reporter.results();
        assert_eq!(
            results[0].result.error_message(),
            Some("Process terminated by signal")
        );
    }

    #[tokio::test]
    async fn test_closed_event_stream_still_finishes() {
        let (runner, reporter) = shell_runner("true", context());
        runner.begin().await.unwrap();

        let (launched, manual) = ManualProcess::launch();
        drop(manual);
        runner.run(launched, None).await;

        assert_eq!(reporter.total(), 1);
        assert!(!reporter.has_passed());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (runner, _reporter) = shell_runner("true", context());
        runner.begin().await.unwrap();
        assert!(runner.begin().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_process_non_zero_exit() {
        let (runner, reporter) = shell_runner("echo hi; exit 3", context());
        runner.start().await.unwrap();

        let result = &reporter.results()[0].result;
        assert!(!result.passed);
        assert_eq!(result.error_message(), Some("Non-zero exit code: 3"));
        assert_eq!(result.logs[0].text, "hi\n");
        assert_eq!(runner.state(), RunnerState::Finished);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_before_tests_failure_is_attributed_to_launcher() {
        let mut ctx = (*context()).clone();
        ctx.before_tests = Some("not-found".to_string());
        let (runner, reporter) = shell_runner("true", Arc::new(ctx));

        let err = runner.start().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::HookExecution { .. }));

        let results = reporter.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result.launcher_id, Some(0));
        assert!(results[0].result.error_message().unwrap().contains("not-found"));
    }

    #[tokio::test]
    async fn test_launch_failure_reports_and_returns_error() {
        let reporter = Arc::new(CollectingReporter::new());
        let launcher = Launcher::new(
            0,
            "Ghost",
            LauncherKind::Process(ProcessSpec::Exec {
                exe: PathBuf::from("/nonexistent/testfleet-ghost"),
                args: Vec::new(),
            }),
        );
        let runner = Runner::new(launcher, reporter.clone(), context());

        let err = runner.start().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Launch { .. }));
        assert_eq!(reporter.total(), 1);
        assert!(!reporter.has_passed());
    }
}
