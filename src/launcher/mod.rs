//! Launchers: what a runner starts and kills
//!
//! A launcher is either an OS process or a browser pointed at a served test
//! page. The variant is fixed when the launcher list is resolved from the
//! configuration; nothing downstream branches on launcher names.

mod catalog;
mod process;

pub use catalog::{find_executable, known_browser, KNOWN_BROWSERS};
pub use process::{shell_command, spawn, LaunchedProcess, ProcessEvent, ProcessHandle};

#[cfg(test)]
pub use process::ManualProcess;

use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{Protocol, RunConfig};
use crate::error::OrchestratorError;

/// What a process launcher runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessSpec {
    /// A command line run through the shell
    Shell(String),
    /// An executable with arguments
    Exec { exe: PathBuf, args: Vec<String> },
}

/// How a browser launcher is started
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrowserSpec {
    pub exe: PathBuf,
    pub args: Vec<String>,
    /// Flag taking a per-instance profile directory, e.g. `--user-data-dir=`
    pub profile_flag: Option<String>,
    /// Page served to this instance, relative to the working directory
    pub test_page: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LauncherKind {
    Process(ProcessSpec),
    Browser(BrowserSpec),
}

/// Where launched targets run
#[derive(Clone, Debug)]
pub struct LaunchContext {
    pub cwd: PathBuf,
    /// Port of the test page server
    pub port: u16,
}

/// One execution target of the run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Launcher {
    id: usize,
    name: String,
    kind: LauncherKind,
}

impl Launcher {
    pub fn new(id: usize, name: impl Into<String>, kind: LauncherKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &LauncherKind {
        &self.kind
    }

    pub fn is_browser(&self) -> bool {
        matches!(self.kind, LauncherKind::Browser(_))
    }

    /// Address of the page this browser instance loads
    pub fn url(&self, port: u16) -> Option<String> {
        match &self.kind {
            LauncherKind::Browser(spec) => Some(page_url(port, self.id, &spec.test_page)),
            LauncherKind::Process(_) => None,
        }
    }

    /// Start the target.
    ///
    /// Spawning is non-blocking; the returned process is watched in the
    /// background. A browser with a profile flag gets a fresh profile
    /// directory that is removed when it exits.
    pub async fn start(&self, ctx: &LaunchContext) -> Result<LaunchedProcess, OrchestratorError> {
        let mut scratch_dir = None;
        let mut command = match &self.kind {
            LauncherKind::Process(ProcessSpec::Shell(line)) => shell_command(line),
            LauncherKind::Process(ProcessSpec::Exec { exe, args }) => {
                let mut command = Command::new(exe);
                command.args(args);
                command
            }
            LauncherKind::Browser(spec) => {
                let mut command = Command::new(&spec.exe);
                command.args(&spec.args);
                if let Some(flag) = &spec.profile_flag {
                    let profile = tempfile::Builder::new()
                        .prefix(&format!("testfleet-{}-", self.id))
                        .tempdir()
                        .map_err(|e| OrchestratorError::launch(&self.name, e))?;
                    command.arg(format!("{flag}{}", profile.path().display()));
                    scratch_dir = Some(profile);
                }
                command.arg(page_url(ctx.port, self.id, &spec.test_page));
                command
            }
        };
        command.current_dir(&ctx.cwd);

        debug!(launcher = %self.name, id = self.id, "starting launcher");
        spawn(command, &self.name, scratch_dir)
    }
}

/// URL of a test page for one launcher; the id segment keeps parallel
/// instances of the same browser apart
pub fn page_url(port: u16, launcher_id: usize, test_page: &str) -> String {
    format!(
        "http://127.0.0.1:{port}/{launcher_id}/{}",
        test_page.trim_start_matches('/')
    )
}

enum Resolved {
    Process(String, ProcessSpec),
    Browser {
        name: String,
        exe: PathBuf,
        args: Vec<String>,
        profile_flag: Option<String>,
    },
}

/// Resolve configured launcher names into launchers with dense ids.
///
/// Browsers get one launcher per test page. A name that resolves to nothing
/// installed is an error unless `ignore_missing_launchers` is set.
pub fn resolve_launchers(config: &RunConfig) -> Result<Vec<Launcher>, OrchestratorError> {
    let mut launchers: Vec<Launcher> = Vec::new();

    for requested in &config.launchers {
        let Some(resolved) = resolve_one(config, requested) else {
            if config.ignore_missing_launchers {
                warn!(launcher = %requested, "launcher not found, skipping");
                continue;
            }
            return Err(OrchestratorError::LauncherNotFound(requested.clone()));
        };

        match resolved {
            Resolved::Process(name, spec) => {
                let id = launchers.len();
                launchers.push(Launcher::new(id, name, LauncherKind::Process(spec)));
            }
            Resolved::Browser {
                name,
                exe,
                args,
                profile_flag,
            } => {
                for page in &config.test_page {
                    let id = launchers.len();
                    let spec = BrowserSpec {
                        exe: exe.clone(),
                        args: args.clone(),
                        profile_flag: profile_flag.clone(),
                        test_page: page.clone(),
                    };
                    launchers.push(Launcher::new(id, name.clone(), LauncherKind::Browser(spec)));
                }
            }
        }
    }

    Ok(launchers)
}

fn resolve_one(config: &RunConfig, requested: &str) -> Option<Resolved> {
    let custom = config
        .custom_launchers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(requested));

    if let Some((name, def)) = custom {
        return match (&def.command, &def.exe, def.protocol) {
            (Some(line), _, Protocol::Process) => {
                Some(Resolved::Process(name.clone(), ProcessSpec::Shell(line.clone())))
            }
            (None, Some(exe), Protocol::Process) => {
                let exe = find_executable(exe)?;
                Some(Resolved::Process(
                    name.clone(),
                    ProcessSpec::Exec {
                        exe,
                        args: def.args.clone(),
                    },
                ))
            }
            (_, Some(exe), Protocol::Browser) => {
                let exe = find_executable(exe)?;
                let mut args = def.args.clone();
                args.extend(config.browser_args_for(name).iter().cloned());
                Some(Resolved::Browser {
                    name: name.clone(),
                    exe,
                    args,
                    profile_flag: None,
                })
            }
            _ => None,
        };
    }

    let browser = known_browser(requested)?;
    let exe = browser.locate()?;
    let mut args: Vec<String> = browser.default_args.iter().map(|a| a.to_string()).collect();
    args.extend(config.browser_args_for(browser.name).iter().cloned());

    Some(Resolved::Browser {
        name: browser.name.to_string(),
        exe,
        args,
        profile_flag: browser.profile_flag.map(String::from),
    })
}
