//! Known browsers and executable lookup

use std::env;
use std::path::{Path, PathBuf};

/// A browser testfleet knows how to start without configuration
#[derive(Debug)]
pub struct KnownBrowser {
    pub name: &'static str,
    /// Candidate executables, in order of preference
    pub executables: &'static [&'static str],
    pub default_args: &'static [&'static str],
    /// Flag taking a per-instance profile directory
    pub profile_flag: Option<&'static str>,
}

pub const KNOWN_BROWSERS: &[KnownBrowser] = &[
    KnownBrowser {
        name: "Chrome",
        executables: &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "chrome",
        ],
        default_args: &[
            "--headless",
            "--disable-gpu",
            "--no-first-run",
            "--no-default-browser-check",
            "--disable-extensions",
        ],
        profile_flag: Some("--user-data-dir="),
    },
    KnownBrowser {
        name: "Firefox",
        executables: &["firefox"],
        default_args: &["--headless", "--no-remote"],
        profile_flag: Some("--profile="),
    },
    KnownBrowser {
        name: "Safari",
        executables: &["safari"],
        default_args: &[],
        profile_flag: None,
    },
];

/// Look up a known browser by name, case-insensitively
pub fn known_browser(name: &str) -> Option<&'static KnownBrowser> {
    KNOWN_BROWSERS
        .iter()
        .find(|b| b.name.eq_ignore_ascii_case(name))
}

impl KnownBrowser {
    /// First installed executable
    pub fn locate(&self) -> Option<PathBuf> {
        self.executables.iter().find_map(|exe| find_executable(exe))
    }
}

/// Resolve an executable name against PATH, or check an explicit path
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        executable_names(name)
            .into_iter()
            .map(|file| dir.join(file))
            .find(|path| is_executable(path))
    })
}

#[cfg(windows)]
fn executable_names(name: &str) -> Vec<String> {
    vec![name.to_string(), format!("{name}.exe"), format!("{name}.cmd")]
}

#[cfg(not(windows))]
fn executable_names(name: &str) -> Vec<String> {
    vec![name.to_string()]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
