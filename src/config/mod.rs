//! Configuration module
//!
//! Handles loading and managing the run configuration.

mod env;
mod file;

pub use env::{print_env_help, split_list, EnvConfig};
pub use file::{example_config, load_default};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use file::is_yaml_file;

/// Default port of the test page server
pub const DEFAULT_PORT: u16 = 7357;

/// Default silence tolerated from a connected browser, in seconds
pub const DEFAULT_DISCONNECT_TIMEOUT_SECS: f64 = 10.0;

/// How a custom launcher talks to the orchestrator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Exit code and output of an OS process decide the result
    #[default]
    Process,
    /// A browser loads a served test page that reports over a socket
    Browser,
}

/// User-defined launcher
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherDef {
    /// Shell command line
    pub command: Option<String>,

    /// Executable to spawn directly
    pub exe: Option<String>,

    /// Arguments passed to `exe`
    pub args: Vec<String>,

    pub protocol: Protocol,
}

/// Run configuration
///
/// Read once at startup and never mutated after the orchestrator is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Launcher names to run, in order
    #[serde(alias = "launch_in_ci", alias = "launch")]
    pub launchers: Vec<String>,

    /// Port of the test page server (0 picks a free port)
    pub port: u16,

    /// Working directory for processes, hooks and served files
    pub cwd: PathBuf,

    /// Global run timeout in seconds
    pub timeout: Option<f64>,

    /// Silence tolerated from a connected browser, in seconds
    pub browser_disconnect_timeout: f64,

    pub ignore_missing_launchers: bool,

    pub fail_on_zero_tests: bool,

    /// Command run before each launcher starts
    pub before_tests: Option<String>,

    /// Command run once before any launcher starts
    pub on_start: Option<String>,

    /// Command run once after wrap-up
    pub on_exit: Option<String>,

    /// Test pages served to browsers; each browser runs once per page
    #[serde(deserialize_with = "one_or_many")]
    pub test_page: Vec<String>,

    /// Extra arguments per browser name
    pub browser_args: BTreeMap<String, Vec<String>>,

    /// Launchers defined by the user, keyed by name
    pub custom_launchers: BTreeMap<String, LauncherDef>,

    /// Write results to this file (json, csv or tap by extension)
    pub report_file: Option<PathBuf>,

    /// Maximum number of runners active at once
    pub parallel: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            launchers: Vec::new(),
            port: DEFAULT_PORT,
            cwd: PathBuf::from("."),
            timeout: None,
            browser_disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT_SECS,
            ignore_missing_launchers: false,
            fail_on_zero_tests: false,
            before_tests: None,
            on_start: None,
            on_exit: None,
            test_page: vec!["index.html".to_string()],
            browser_args: BTreeMap::new(),
            custom_launchers: BTreeMap::new(),
            report_file: None,
            parallel: None,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML or JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        // Relative cwd is relative to the config file
        if config.cwd.is_relative() {
            if let Some(parent) = path.parent() {
                config.cwd = parent.join(&config.cwd);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(timeout) = self.timeout {
            check_seconds("timeout", timeout)?;
        }
        check_seconds("browser_disconnect_timeout", self.browser_disconnect_timeout)?;

        if self.test_page.is_empty() {
            anyhow::bail!("at least one test_page is required");
        }

        if self.parallel == Some(0) {
            anyhow::bail!("parallel must be at least 1");
        }

        for (name, def) in &self.custom_launchers {
            match (&def.command, &def.exe) {
                (Some(_), Some(_)) => {
                    anyhow::bail!("launcher '{name}' sets both command and exe")
                }
                (None, None) => anyhow::bail!("launcher '{name}' needs a command or an exe"),
                (Some(_), None) if def.protocol == Protocol::Browser => {
                    anyhow::bail!("browser launcher '{name}' needs an exe")
                }
                _ => {}
            }
        }

        Ok(())
    }

    pub fn with_launchers<I, S>(mut self, launchers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launchers = launchers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn with_custom_launcher(mut self, name: impl Into<String>, def: LauncherDef) -> Self {
        self.custom_launchers.insert(name.into(), def);
        self
    }

    /// Global run timeout; values `validate` rejects saturate
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(seconds)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        seconds(self.browser_disconnect_timeout)
    }

    /// Extra arguments for a browser, matched case-insensitively
    pub fn browser_args_for(&self, browser: &str) -> &[String] {
        self.browser_args
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(browser))
            .map(|(_, args)| args.as_slice())
            .unwrap_or(&[])
    }
}

impl LauncherDef {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Default::default()
        }
    }

    pub fn exe(exe: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            exe: Some(exe.into()),
            args,
            ..Default::default()
        }
    }

    pub fn browser(mut self) -> Self {
        self.protocol = Protocol::Browser;
        self
    }
}

/// Accept either a single string or a list of strings
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Positive, finite and representable as a `Duration`
fn check_seconds(field: &str, secs: f64) -> Result<()> {
    if !secs.is_finite() || secs <= 0.0 {
        anyhow::bail!("{field} must be a positive number of seconds, got {secs}");
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow::anyhow!("{field} is too large, got {secs}"))?;
    Ok(())
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(page) => vec![page],
        OneOrMany::Many(pages) => pages,
    })
}
