//! Run orchestration
//!
//! The orchestrator resolves launchers, binds the test page server, starts
//! one runner per launcher and races their completion against the global
//! timeout, fatal server errors and external exit requests. Whatever wins,
//! `wrap_up` turns the reporter's verdict into the run's exit status.

use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::error::OrchestratorError;
use crate::hooks::{run_hook, Hook, HookContext};
use crate::launcher::{resolve_launchers, Launcher};
use crate::models::TestResult;
use crate::reporter::Reporter;
use crate::runner::{RunContext, Runner};
use crate::server::{BrowserRegistry, ServerState, TestServer};
use crate::utils::Timer;

/// How long wrap-up waits for killed runners to report
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Orchestrator lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrchestratorState {
    Init,
    Starting,
    Running,
    WrappingUp,
    Exited,
}

/// Verdict of a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure(String),
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure(_) => 1,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ExitStatus::Success => None,
            ExitStatus::Failure(reason) => Some(reason),
        }
    }
}

/// What ended the running phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrapUpTrigger {
    AllFinished,
    Timeout,
    Fatal,
    ExitRequested,
}

impl fmt::Display for WrapUpTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            WrapUpTrigger::AllFinished => "all runners finished",
            WrapUpTrigger::Timeout => "timeout",
            WrapUpTrigger::Fatal => "fatal error",
            WrapUpTrigger::ExitRequested => "exit requested",
        };
        f.write_str(text)
    }
}

/// Final outcome returned from `start`
#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome {
    pub status: ExitStatus,
    /// Run-level error, if the run was aborted
    pub error: Option<OrchestratorError>,
}

impl RunOutcome {
    /// Process exit code; a run-level error always fails
    pub fn exit_code(&self) -> i32 {
        if self.error.is_some() {
            1
        } else {
            self.status.code()
        }
    }
}

/// Requests an early, orderly end of a running orchestrator
#[derive(Clone, Debug, Default)]
pub struct ExitHandle {
    notify: Arc<Notify>,
}

impl ExitHandle {
    /// Ask the orchestrator to wrap up; a request made before the run
    /// starts waiting is kept
    pub fn exit(&self) {
        self.notify.notify_one();
    }
}

pub struct Orchestrator {
    config: RunConfig,
    reporter: Arc<dyn Reporter>,
    state: OrchestratorState,
    launchers: Vec<Launcher>,
    runners: Vec<Arc<Runner>>,
    tasks: JoinSet<()>,
    server: Option<TestServer>,
    port: u16,
    registry: BrowserRegistry,
    exit: ExitHandle,
    fatal_tx: mpsc::UnboundedSender<OrchestratorError>,
    fatal_rx: mpsc::UnboundedReceiver<OrchestratorError>,
    trigger: Option<WrapUpTrigger>,
}

impl Orchestrator {
    pub fn new(config: RunConfig, reporter: Arc<dyn Reporter>) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            port: config.port,
            config,
            reporter,
            state: OrchestratorState::Init,
            launchers: Vec::new(),
            runners: Vec::new(),
            tasks: JoinSet::new(),
            server: None,
            registry: BrowserRegistry::new(),
            exit: ExitHandle::default(),
            fatal_tx,
            fatal_rx,
            trigger: None,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn launchers(&self) -> &[Launcher] {
        &self.launchers
    }

    pub fn runners(&self) -> &[Arc<Runner>] {
        &self.runners
    }

    /// Port the test server is bound to, once started
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn exit_handle(&self) -> ExitHandle {
        self.exit.clone()
    }

    /// Run everything and return the outcome after wrap-up
    pub async fn start(&mut self) -> RunOutcome {
        self.state = OrchestratorState::Starting;
        let timer = Timer::start("run");

        if let Err(err) = self.prepare().await {
            self.trigger = Some(WrapUpTrigger::Fatal);
            return self.wrap_up(Some(err)).await;
        }

        self.spawn_runners();
        self.state = OrchestratorState::Running;

        let (trigger, err) = self.race().await;
        info!(%trigger, elapsed_ms = timer.elapsed_ms(), "running phase over");
        self.trigger = Some(trigger);
        self.wrap_up(err).await
    }

    /// Resolve launchers, bind the server and run `on_start`
    async fn prepare(&mut self) -> Result<(), OrchestratorError> {
        self.launchers = resolve_launchers(&self.config)?;
        info!(count = self.launchers.len(), "launchers resolved");

        let state = ServerState {
            cwd: self.config.cwd.clone(),
            registry: self.registry.clone(),
            default_page: self
                .config
                .test_page
                .first()
                .cloned()
                .unwrap_or_else(|| "index.html".to_string()),
        };
        let server = TestServer::bind(self.config.port, state, self.fatal_tx.clone()).await?;
        self.port = server.port();
        self.server = Some(server);

        if let Some(command) = &self.config.on_start {
            let ctx = HookContext::new(&self.config.cwd, self.port);
            run_hook(Hook::OnStart, command, &ctx).await?;
        }

        let ctx = Arc::new(RunContext {
            port: self.port,
            cwd: self.config.cwd.clone(),
            before_tests: self.config.before_tests.clone(),
            disconnect_timeout: self.config.disconnect_timeout(),
            registry: self.registry.clone(),
        });
        self.runners = self
            .launchers
            .iter()
            .map(|launcher| {
                Arc::new(Runner::new(
                    launcher.clone(),
                    self.reporter.clone(),
                    ctx.clone(),
                ))
            })
            .collect();
        Ok(())
    }

    fn spawn_runners(&mut self) {
        let limit = self.config.parallel.map(|n| Arc::new(Semaphore::new(n)));

        for runner in &self.runners {
            let runner = runner.clone();
            let limit = limit.clone();
            self.tasks.spawn(async move {
                let _permit = match limit {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                if let Err(err) = runner.start().await {
                    debug!(launcher = %runner.name(), error = %err, "runner ended with error");
                }
            });
        }
        info!(count = self.runners.len(), "runners started");
    }

    async fn race(&mut self) -> (WrapUpTrigger, Option<OrchestratorError>) {
        let timeout = self.config.timeout();
        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        let exit = self.exit.notify.clone();

        loop {
            tokio::select! {
                joined = self.tasks.join_next() => match joined {
                    None => return (WrapUpTrigger::AllFinished, None),
                    Some(Err(e)) if e.is_panic() => error!(error = %e, "runner task panicked"),
                    Some(_) => {}
                },
                _ = &mut deadline => {
                    warn!("timeout reached, not waiting for remaining runners");
                    return (WrapUpTrigger::Timeout, None);
                }
                Some(err) = self.fatal_rx.recv() => return (WrapUpTrigger::Fatal, Some(err)),
                _ = exit.notified() => return (WrapUpTrigger::ExitRequested, None),
            }
        }
    }

    /// End the run: record `err`, stop the server, kill runners and decide
    /// the exit status
    pub async fn wrap_up(&mut self, err: Option<OrchestratorError>) -> RunOutcome {
        self.state = OrchestratorState::WrappingUp;

        if let Some(err) = &err {
            error!(error = %err, "run aborted");
            self.reporter.report(None, TestResult::global_error(err));
        }

        if let Some(server) = self.server.take() {
            server.stop().await;
        }

        match self.trigger {
            Some(WrapUpTrigger::Timeout) => {
                self.kill_runners();
                self.tasks.abort_all();
            }
            Some(WrapUpTrigger::ExitRequested) => {
                if tokio::time::timeout(DRAIN_GRACE, self.exit_runners()).await.is_err() {
                    warn!("runner processes did not die in time");
                }
                self.drain().await;
            }
            _ => {
                self.kill_runners();
                self.drain().await;
            }
        }

        let status = self.exit_code();
        if let Some(command) = &self.config.on_exit {
            let ctx = HookContext::new(&self.config.cwd, self.port);
            if let Err(e) = run_hook(Hook::OnExit, command, &ctx).await {
                warn!(error = %e, "on_exit hook failed");
            }
        }

        self.state = OrchestratorState::Exited;
        info!(code = status.code(), "run finished");
        RunOutcome { status, error: err }
    }

    async fn drain(&mut self) {
        let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(_)) => {}
                Ok(None) => return,
                Err(_) => {
                    warn!("runners did not stop in time, abandoning them");
                    self.tasks.abort_all();
                    return;
                }
            }
        }
    }

    /// Reduce the reporter's results to the run's verdict
    pub fn exit_code(&self) -> ExitStatus {
        if !self.reporter.has_passed() {
            ExitStatus::Failure("Not all tests passed.".to_string())
        } else if !self.reporter.has_tests() && self.config.fail_on_zero_tests {
            ExitStatus::Failure("No tests found.".to_string())
        } else {
            ExitStatus::Success
        }
    }

    /// Signal every live process to die without waiting
    pub fn kill_runners(&self) {
        for runner in &self.runners {
            runner.signal_exit();
        }
    }

    /// Kill every live process and wait until all are gone
    pub async fn exit_runners(&self) {
        join_all(self.runners.iter().map(|runner| runner.exit())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LauncherDef;
    use crate::reporter::CollectingReporter;
    use crate::server::{BrowserEvent, PageMessage};
    use std::time::Instant;

    fn config(dir: &std::path::Path) -> RunConfig {
        RunConfig::new().with_port(0).with_cwd(dir)
    }

    fn build(config: RunConfig) -> (Orchestrator, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::new());
        (Orchestrator::new(config, reporter.clone()), reporter)
    }

    #[test]
    fn test_exit_status_codes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::Failure("x".to_string()).code(), 1);

        let outcome = RunOutcome {
            status: ExitStatus::Success,
            error: Some(OrchestratorError::process("boom")),
        };
        assert_eq!(outcome.exit_code(), 1);
    }

    #[test]
    fn test_exit_code_policy() {
        let dir = std::env::temp_dir();

        let (orchestrator, reporter) = build(config(&dir));
        assert_eq!(orchestrator.exit_code(), ExitStatus::Success);
        reporter.report(Some("Node"), TestResult::from_process(0, "Node", None, Some(0), "", ""));
        assert_eq!(orchestrator.exit_code(), ExitStatus::Success);
        reporter.report(Some("Node"), TestResult::from_process(1, "Node", None, Some(1), "", ""));
        assert_eq!(
            orchestrator.exit_code(),
            ExitStatus::Failure("Not all tests passed.".to_string())
        );

        let mut strict = config(&dir);
        strict.fail_on_zero_tests = true;
        let (orchestrator, _) = build(strict);
        assert_eq!(
            orchestrator.exit_code(),
            ExitStatus::Failure("No tests found.".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_launcher_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orchestrator, reporter) =
            build(config(dir.path()).with_launchers(["Opera"]));

        let outcome = orchestrator.start().await;
        assert_eq!(
            outcome.error,
            Some(OrchestratorError::LauncherNotFound("Opera".to_string()))
        );
        assert_eq!(outcome.exit_code(), 1);

        let results = reporter.results();
        assert_eq!(results[0].result.name, "Error");
        assert_eq!(
            results[0].result.error_message(),
            Some("Launcher Opera not found. Not installed?")
        );
        assert_eq!(orchestrator.state(), OrchestratorState::Exited);
    }

    #[tokio::test]
    async fn test_ignored_missing_launchers_leave_zero_tests() {
        let dir = tempfile::tempdir().unwrap();
        let mut lenient = config(dir.path()).with_launchers(["Opera"]);
        lenient.ignore_missing_launchers = true;

        let (mut orchestrator, _) = build(lenient.clone());
        let outcome = orchestrator.start().await;
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.status, ExitStatus::Success);
        assert!(orchestrator.runners().is_empty());

        lenient.fail_on_zero_tests = true;
        let (mut orchestrator, _) = build(lenient);
        let outcome = orchestrator.start().await;
        assert_eq!(outcome.status, ExitStatus::Failure("No tests found.".to_string()));
    }

    #[tokio::test]
    async fn test_wrap_up_records_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orchestrator, reporter) = build(config(dir.path()));

        let outcome = orchestrator
            .wrap_up(Some(OrchestratorError::process("blarg")))
            .await;
        assert_eq!(outcome.exit_code(), 1);

        let results = reporter.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result.name, "Error");
        assert_eq!(results[0].result.launcher_id, None);
        assert_eq!(results[0].result.error_message(), Some("blarg"));
    }

    #[tokio::test]
    async fn test_port_in_use_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let (mut orchestrator, reporter) = build(config(dir.path()).with_port(port));
        let outcome = orchestrator.start().await;

        assert!(matches!(outcome.error, Some(OrchestratorError::ServerBind { .. })));
        assert_eq!(outcome.exit_code(), 1);
        let first = &reporter.results()[0].result;
        assert!(first.error_message().unwrap().contains(&port.to_string()));
    }

    #[cfg(unix)]
    mod processes {
        use super::*;

        fn with_commands(dir: &std::path::Path, commands: &[(&str, &str)]) -> RunConfig {
            let mut config = config(dir).with_launchers(commands.iter().map(|(name, _)| *name));
            for (name, line) in commands {
                config = config.with_custom_launcher(*name, LauncherDef::command(*line));
            }
            config
        }

        #[tokio::test]
        async fn test_one_result_per_launcher() {
            let dir = tempfile::tempdir().unwrap();
            let (mut orchestrator, reporter) = build(with_commands(
                dir.path(),
                &[("A", "exit 0"), ("B", "exit 0"), ("C", "exit 0")],
            ));

            let outcome = orchestrator.start().await;
            assert_eq!(outcome.exit_code(), 0);
            assert_eq!(reporter.total(), 3);
            assert_eq!(orchestrator.launchers().len(), 3);
            assert!(orchestrator.runners().iter().all(|r| r.is_finished()));
        }

        #[tokio::test]
        async fn test_one_failure_fails_run() {
            let dir = tempfile::tempdir().unwrap();
            let (mut orchestrator, reporter) = build(with_commands(
                dir.path(),
                &[("Pass", "exit 0"), ("Fail", "exit 1")],
            ));

            let outcome = orchestrator.start().await;
            assert_eq!(
                outcome.status,
                ExitStatus::Failure("Not all tests passed.".to_string())
            );
            assert_eq!(reporter.total(), 2);
            assert_eq!(reporter.passed(), 1);
        }

        #[tokio::test]
        async fn test_timeout_does_not_wait_for_stragglers() {
            let dir = tempfile::tempdir().unwrap();
            let (mut orchestrator, reporter) = build(
                with_commands(dir.path(), &[("Slow", "sleep 30")]).with_timeout(2.0),
            );

            let started = Instant::now();
            let outcome = orchestrator.start().await;
            assert!(started.elapsed() < Duration::from_secs(10));
            assert_eq!(outcome.error, None);
            assert_eq!(reporter.total(), 0);
            assert_eq!(reporter.started(), 1);
        }

        #[tokio::test]
        async fn test_before_tests_failure_is_per_launcher() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = with_commands(dir.path(), &[("Node", "exit 0")]);
            config.before_tests = Some("not-found".to_string());
            let (mut orchestrator, reporter) = build(config);

            let outcome = orchestrator.start().await;
            assert_eq!(outcome.error, None);
            assert_eq!(outcome.exit_code(), 1);

            let results = reporter.results();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].result.launcher_id, Some(0));
            assert!(results[0].result.error_message().unwrap().contains("not-found"));
        }

        #[tokio::test]
        async fn test_on_start_failure_is_fatal() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = with_commands(dir.path(), &[("Node", "exit 0")]);
            config.on_start = Some("exit 4".to_string());
            let (mut orchestrator, reporter) = build(config);

            let outcome = orchestrator.start().await;
            assert!(matches!(outcome.error, Some(OrchestratorError::HookExecution { .. })));
            assert_eq!(reporter.started(), 0);
        }

        #[tokio::test]
        async fn test_hooks_see_port_and_run_in_cwd() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = with_commands(dir.path(), &[("Node", "exit 0")]);
            config.on_start = Some("echo <port> > started.txt".to_string());
            config.on_exit = Some("touch exited.txt".to_string());
            let (mut orchestrator, _) = build(config);

            let outcome = orchestrator.start().await;
            assert_eq!(outcome.exit_code(), 0);

            let port = std::fs::read_to_string(dir.path().join("started.txt")).unwrap();
            assert_eq!(port.trim(), orchestrator.port().to_string());
            assert!(dir.path().join("exited.txt").exists());
        }

        #[tokio::test]
        async fn test_exit_handle_ends_run() {
            let dir = tempfile::tempdir().unwrap();
            let (mut orchestrator, reporter) =
                build(with_commands(dir.path(), &[("Slow", "sleep 30")]));

            let exit = orchestrator.exit_handle();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                exit.exit();
            });

            let started = Instant::now();
            let outcome = orchestrator.start().await;
            assert!(started.elapsed() < Duration::from_secs(10));
            assert_eq!(outcome.exit_code(), 1);
            assert_eq!(
                reporter.results()[0].result.error_message(),
                Some("Process terminated by signal")
            );
            assert!(orchestrator.runners().iter().all(|r| r.is_finished() && !r.has_handle()));
        }

        #[tokio::test]
        async fn test_parallel_limit_serializes_runners() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = with_commands(dir.path(), &[("A", "sleep 0.3"), ("B", "sleep 0.3")]);
            config.parallel = Some(1);
            let (mut orchestrator, reporter) = build(config);

            let started = Instant::now();
            orchestrator.start().await;
            assert!(started.elapsed() >= Duration::from_millis(550));
            assert_eq!(reporter.total(), 2);
        }

        #[tokio::test]
        async fn test_exit_runners_kills_live_processes() {
            let dir = tempfile::tempdir().unwrap();
            let (mut orchestrator, _) =
                build(with_commands(dir.path(), &[("Slow", "sleep 30")]));
            orchestrator.prepare().await.unwrap();
            orchestrator.spawn_runners();

            while !orchestrator.runners().iter().all(|r| r.has_handle()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let started = Instant::now();
            orchestrator.exit_runners().await;
            assert!(started.elapsed() < Duration::from_secs(10));

            let outcome = orchestrator.wrap_up(None).await;
            assert_eq!(outcome.exit_code(), 1);
        }

        #[tokio::test]
        async fn test_browsers_get_distinct_urls_and_report() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = config(dir.path()).with_launchers(["Headless"]).with_custom_launcher(
                "Headless",
                LauncherDef::exe("sh", vec!["-c".to_string(), "sleep 30".to_string()]).browser(),
            );
            config.test_page = vec!["a.html".to_string(), "b.html".to_string()];
            let (mut orchestrator, reporter) = build(config);

            let registry = orchestrator.registry.clone();
            tokio::spawn(async move {
                while !(registry.contains(0) && registry.contains(1)) {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                for id in 0..2 {
                    registry.send(id, BrowserEvent::Connected);
                    registry.send(
                        id,
                        BrowserEvent::Page(PageMessage::TestResult {
                            name: format!("case {id}"),
                            passed: true,
                            error: None,
                        }),
                    );
                    registry.send(id, BrowserEvent::Page(PageMessage::AllTestResults));
                }
            });

            let outcome = orchestrator.start().await;
            assert_eq!(outcome.exit_code(), 0);
            assert_eq!(reporter.total(), 2);

            let port = orchestrator.port();
            let urls: Vec<String> = orchestrator
                .launchers()
                .iter()
                .filter_map(|l| l.url(port))
                .collect();
            assert_eq!(urls.len(), 2);
            assert_ne!(urls[0], urls[1]);
        }
    }
}
