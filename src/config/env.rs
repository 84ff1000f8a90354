//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;
use std::path::PathBuf;

use super::RunConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "TESTFLEET";

/// Overrides read from `TESTFLEET_*` environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Port from TESTFLEET_PORT
    pub port: Option<u16>,
    /// Timeout from TESTFLEET_TIMEOUT
    pub timeout: Option<f64>,
    /// Comma separated launchers from TESTFLEET_LAUNCH
    pub launch: Option<Vec<String>>,
    /// Working directory from TESTFLEET_CWD
    pub cwd: Option<PathBuf>,
    /// Report file from TESTFLEET_REPORT_FILE
    pub report_file: Option<PathBuf>,
    /// From TESTFLEET_FAIL_ON_ZERO_TESTS
    pub fail_on_zero_tests: Option<bool>,
    /// From TESTFLEET_IGNORE_MISSING_LAUNCHERS
    pub ignore_missing_launchers: Option<bool>,
    /// Config file from TESTFLEET_CONFIG
    pub config_file: Option<PathBuf>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            port: get_env_parse("PORT"),
            timeout: get_env_parse("TIMEOUT"),
            launch: get_env("LAUNCH").map(|v| split_list(&v)),
            cwd: get_env("CWD").map(PathBuf::from),
            report_file: get_env("REPORT_FILE").map(PathBuf::from),
            fail_on_zero_tests: get_env_bool("FAIL_ON_ZERO_TESTS"),
            ignore_missing_launchers: get_env_bool("IGNORE_MISSING_LAUNCHERS"),
            config_file: get_env("CONFIG").map(PathBuf::from),
        }
    }

    /// Apply the overrides that are set
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
        if let Some(launch) = &self.launch {
            config.launchers = launch.clone();
        }
        if let Some(cwd) = &self.cwd {
            config.cwd = cwd.clone();
        }
        if let Some(report_file) = &self.report_file {
            config.report_file = Some(report_file.clone());
        }
        if let Some(fail) = self.fail_on_zero_tests {
            config.fail_on_zero_tests = fail;
        }
        if let Some(ignore) = self.ignore_missing_launchers {
            config.ignore_missing_launchers = ignore;
        }
    }
}

/// Split a comma separated list, dropping empty items
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables in tests
#[cfg(test)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all TESTFLEET environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONFIG                    Path to configuration file");
    println!("  {ENV_PREFIX}_LAUNCH                    Launchers to run (comma-separated)");
    println!("  {ENV_PREFIX}_PORT                      Test page server port");
    println!("  {ENV_PREFIX}_TIMEOUT                   Global run timeout in seconds");
    println!("  {ENV_PREFIX}_CWD                       Working directory");
    println!("  {ENV_PREFIX}_REPORT_FILE               Write results to this file");
    println!("  {ENV_PREFIX}_FAIL_ON_ZERO_TESTS        Fail when no tests ran (true/false)");
    println!("  {ENV_PREFIX}_IGNORE_MISSING_LAUNCHERS  Skip launchers that are not installed");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_LAUNCH=node,chrome");
    println!("  export {ENV_PREFIX}_TIMEOUT=120");
    println!("  testfleet ci");
}
