//! Configuration file discovery
//!
//! Handles finding configuration files and generating an example one.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{LauncherDef, RunConfig};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./testfleet.yaml",
    "./testfleet.yml",
    "./testfleet.json",
    "./.testfleet.yaml",
    "~/.config/testfleet/config.yaml",
];

/// Find configuration file in standard locations
pub fn find_config() -> Option<PathBuf> {
    CONFIG_LOCATIONS
        .iter()
        .map(|location| expand_path(location))
        .find(|path| path.exists())
}

/// Load configuration from the first standard location, or defaults
pub fn load_default() -> Result<RunConfig> {
    match find_config() {
        Some(path) => RunConfig::load(&path),
        None => Ok(RunConfig::default()),
    }
}

/// Generate example configuration
pub fn example_config() -> RunConfig {
    let mut browser_args = BTreeMap::new();
    browser_args.insert(
        "Chrome".to_string(),
        vec![
            "--headless".to_string(),
            "--disable-gpu".to_string(),
            "--remote-debugging-port=9222".to_string(),
        ],
    );

    RunConfig {
        launchers: vec!["Node".to_string(), "Chrome".to_string()],
        timeout: Some(300.0),
        before_tests: Some("npm run build".to_string()),
        test_page: vec!["tests/index.html".to_string()],
        browser_args,
        ..RunConfig::default()
    }
    .with_custom_launcher("Node", LauncherDef::command("node tests/run.js"))
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
pub(super) fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
