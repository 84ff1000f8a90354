//! Error types for the run orchestration engine
//!
//! Per-launcher failures are turned into failed results. A missing launcher,
//! an `on_start` hook failure or a server failure aborts the whole run.

use thiserror::Error;

/// Errors raised while orchestrating a run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// The process or browser could not be spawned
    #[error("Launching {launcher} failed: {message}")]
    Launch { launcher: String, message: String },

    /// A configured launcher name did not resolve to anything installed
    #[error("Launcher {0} not found. Not installed?")]
    LauncherNotFound(String),

    /// A hook command was missing, not executable or exited non-zero
    #[error("Hook {hook} failed ({command}): {message}")]
    HookExecution {
        hook: String,
        command: String,
        message: String,
    },

    /// The running process errored, or a browser went silent
    #[error("{0}")]
    ProcessRuntime(String),

    /// The shared test page server could not bind its port
    #[error("Could not bind test server to port {port}: {message}")]
    ServerBind { port: u16, message: String },

    /// The test page server stopped unexpectedly
    #[error("Test server failed: {0}")]
    Server(String),
}

impl OrchestratorError {
    pub fn launch(launcher: impl Into<String>, err: impl std::fmt::Display) -> Self {
        OrchestratorError::Launch {
            launcher: launcher.into(),
            message: err.to_string(),
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        OrchestratorError::ProcessRuntime(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launcher_not_found_message() {
        let err = OrchestratorError::LauncherNotFound("IE".to_string());
        assert_eq!(err.to_string(), "Launcher IE not found. Not installed?");
    }

    #[test]
    fn test_launch_and_hook_messages() {
        assert_eq!(
            OrchestratorError::launch("Node", "No such file").to_string(),
            "Launching Node failed: No such file"
        );
        let hook = OrchestratorError::HookExecution {
            hook: "before_tests".to_string(),
            command: "not-found".to_string(),
            message: "exited with code 127".to_string(),
        };
        assert_eq!(
            hook.to_string(),
            "Hook before_tests failed (not-found): exited with code 127"
        );
    }

    #[test]
    fn test_server_bind_message() {
        let err = OrchestratorError::ServerBind {
            port: 7357,
            message: "Address already in use (os error 98)".to_string(),
        };
        assert!(err.to_string().contains("port 7357"));
        assert!(err.to_string().contains("Address already in use"));
    }
}
