//! User hook commands
//!
//! Hooks are shell command lines run at fixed points of a run: `on_start`
//! before any runner, `before_tests` before each launcher, `on_exit` after
//! wrap-up. `<port>` and `<url>` in the command line are substituted first.

use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::OrchestratorError;
use crate::launcher::shell_command;

/// Point of the run a hook belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hook {
    OnStart,
    BeforeTests,
    OnExit,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::OnStart => "on_start",
            Hook::BeforeTests => "before_tests",
            Hook::OnExit => "on_exit",
        };
        f.write_str(name)
    }
}

/// Values a hook command line may refer to
#[derive(Clone, Debug)]
pub struct HookContext {
    pub cwd: PathBuf,
    pub port: u16,
    /// Page of the launcher the hook runs for, if any
    pub url: Option<String>,
}

impl HookContext {
    pub fn new(cwd: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            cwd: cwd.into(),
            port,
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Substitute `<port>` and `<url>`
    pub fn expand(&self, command: &str) -> String {
        let url = self
            .url
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}/", self.port));
        command
            .replace("<port>", &self.port.to_string())
            .replace("<url>", &url)
    }
}

/// Run `command` to completion.
///
/// A command that cannot be started or exits non-zero is a `HookExecution`
/// error carrying the command line.
pub async fn run_hook(
    hook: Hook,
    command: &str,
    ctx: &HookContext,
) -> Result<(), OrchestratorError> {
    let line = ctx.expand(command);
    info!(%hook, command = %line, "running hook");

    let output = shell_command(&line)
        .current_dir(&ctx.cwd)
        .output()
        .await
        .map_err(|e| OrchestratorError::HookExecution {
            hook: hook.to_string(),
            command: line.clone(),
            message: e.to_string(),
        })?;

    if output.status.success() {
        debug!(%hook, "hook finished");
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = match output.status.code() {
        Some(code) if stderr.trim().is_empty() => format!("exit code {code}"),
        Some(code) => format!("exit code {code}: {}", stderr.trim()),
        None => "terminated by signal".to_string(),
    };
    Err(OrchestratorError::HookExecution {
        hook: hook.to_string(),
        command: line,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_placeholders() {
        let ctx = HookContext::new(".", 7357);
        assert_eq!(
            ctx.expand("curl <url> --port <port>"),
            "curl http://127.0.0.1:7357/ --port 7357"
        );

        let ctx = ctx.with_url("http://127.0.0.1:7357/2/index.html");
        assert_eq!(ctx.expand("open <url>"), "open http://127.0.0.1:7357/2/index.html");
    }

    #[test]
    fn test_hook_names() {
        assert_eq!(Hook::BeforeTests.to_string(), "before_tests");
        assert_eq!(Hook::OnExit.to_string(), "on_exit");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hook_runs_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = HookContext::new(dir.path(), 7357);
        tokio_test::assert_ok!(run_hook(Hook::OnStart, "echo <port> > port.txt", &ctx).await);

        let written = std::fs::read_to_string(dir.path().join("port.txt")).unwrap();
        assert_eq!(written.trim(), "7357");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_command_names_it() {
        let ctx = HookContext::new(".", 0);
        let err = run_hook(Hook::BeforeTests, "not-found", &ctx).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::HookExecution { .. }));
        let message = err.to_string();
        assert!(message.contains("before_tests"));
        assert!(message.contains("not-found"));
        assert!(message.contains("exit code 127"));
    }
}
