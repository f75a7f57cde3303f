// src/system/executor.rs

//! Runs the external design tools.
//!
//! [`execute`] wraps a single tool invocation with a retry policy, classifies
//! its exit status and removes incidental artifacts. It never terminates the
//! host process: the caller decides what a failure means.

use crate::system::tools;
use log::{debug, warn};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

/// A tool command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Extra environment variables for the child, on top of the inherited ones.
    pub env: Vec<(String, String)>,
    pub cleanup: Option<Cleanup>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }

    /// The command line quoted for display.
    pub fn display(&self) -> String {
        let parts = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(parts.clone()).unwrap_or_else(|_| parts.collect::<Vec<_>>().join(" "))
    }
}

/// An incidental file the tool may leave behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cleanup {
    pub path: PathBuf,
    pub when: CleanupWhen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupWhen {
    Always,
    OnSuccess,
}

/// Which failures deserve another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOn {
    Never,
    /// Crashes and signals: the GUI automation behind the tools is flaky.
    Crash,
    AnyFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Wait before the first retry. Every further retry waits one more `delay`.
    pub delay: Duration,
    pub retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay: Duration::from_secs(1),
            retry_on: RetryOn::Crash,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
            retry_on: RetryOn::Never,
        }
    }

    /// How long to wait after the failed attempt number `attempt` (1 based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt.max(1))
    }

    fn is_transient(&self, category: &ExitCategory) -> bool {
        match (self.retry_on, category) {
            (_, ExitCategory::Success) | (RetryOn::Never, _) => false,
            (_, ExitCategory::SpawnFailed { not_found: true, .. }) => false,
            (RetryOn::Crash, ExitCategory::Crashed { .. }) => true,
            (RetryOn::AnyFailure, _) => true,
            _ => false,
        }
    }
}

/// How a tool run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCategory {
    Success,
    /// The tool ran and reported this many problems.
    ReportedErrors { count: i32 },
    /// The tool died, `signal` is the magnitude of the signal number.
    Crashed { signal: i32 },
    /// The process could not be started at all.
    SpawnFailed { message: String, not_found: bool },
}

impl fmt::Display for ExitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::ReportedErrors { count } => write!(f, "tool reported {count} error(s)"),
            Self::Crashed { signal } => write!(f, "tool crashed (signal {signal})"),
            Self::SpawnFailed { message, .. } => write!(f, "could not start the tool: {message}"),
        }
    }
}

/// Result of [`execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub category: ExitCategory,
    pub attempts: u32,
    /// The last attempt failed with a retryable category and no attempts were left.
    pub retries_exhausted: bool,
    pub removed_artifact: Option<PathBuf>,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.category == ExitCategory::Success
    }
}

/// Statuses above 127 are read as `256 - N`, the way the KiAuto tools report a
/// signal N. This is a convention of those tools, not a general rule.
pub fn normalize_status(raw: i32) -> i32 {
    if raw > 127 { raw - 256 } else { raw }
}

/// Classifies a raw exit status.
pub fn classify_status(raw: i32) -> ExitCategory {
    match normalize_status(raw) {
        0 => ExitCategory::Success,
        n if n < 0 => ExitCategory::Crashed { signal: -n },
        n => ExitCategory::ReportedErrors { count: n },
    }
}

/// Runs one attempt of an invocation. Abstracted so steps can be exercised without the tools.
pub trait ToolRunner: Sync {
    fn run(&self, invocation: &Invocation) -> ExitCategory;

    /// Whether `program` can be found.
    fn is_available(&self, program: &str) -> bool;
}

/// Spawns real processes, inheriting stdout and stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> ExitCategory {
        let mut command = StdCommand::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .envs(invocation.env.iter().map(|(k, v)| (k, v)));
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(dunce::simplified(cwd));
        }
        match command.status() {
            Ok(status) => classify_exit(status),
            Err(e) => ExitCategory::SpawnFailed {
                message: e.to_string(),
                not_found: e.kind() == ErrorKind::NotFound,
            },
        }
    }

    fn is_available(&self, program: &str) -> bool {
        tools::find_in_path(program).is_some()
    }
}

fn classify_exit(status: ExitStatus) -> ExitCategory {
    if let Some(code) = status.code() {
        return classify_status(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitCategory::Crashed { signal };
        }
    }
    ExitCategory::Crashed { signal: 0 }
}

/// Runs `invocation`, retrying transient failures as allowed by `policy`.
pub fn execute(runner: &dyn ToolRunner, invocation: &Invocation, policy: &RetryPolicy) -> ExecutionOutcome {
    debug!("Executing: {}", invocation.display());
    let max_attempts = policy.attempts.max(1);
    let mut attempts = 0;
    let category = loop {
        attempts += 1;
        let category = runner.run(invocation);
        if !policy.is_transient(&category) || attempts >= max_attempts {
            break category;
        }
        let wait = policy.backoff(attempts);
        debug!(
            "`{}` failed ({}), retrying in {:?} ({}/{})",
            invocation.program, category, wait, attempts, max_attempts
        );
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    };

    let retries_exhausted = max_attempts > 1 && policy.is_transient(&category);
    let removed_artifact = invocation
        .cleanup
        .as_ref()
        .filter(|c| c.when == CleanupWhen::Always || category == ExitCategory::Success)
        .and_then(|c| remove_artifact(&c.path));

    ExecutionOutcome {
        category,
        attempts,
        retries_exhausted,
        removed_artifact,
    }
}

fn remove_artifact(path: &Path) -> Option<PathBuf> {
    if !path.is_file() {
        return None;
    }
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed '{}'", path.display());
            Some(path.to_path_buf())
        }
        Err(e) => {
            warn!("Failed to remove '{}': {}", path.display(), e);
            None
        }
    }
}

/// Propagates the debug level to a KiAuto tool.
///
/// Inserts `-v` (one `v` per level) when debugging and `-r` (screen recording)
/// when debugging or running on CI. Returns true when the recording exists
/// only because of CI and should be removed after the run.
pub fn add_extra_options(args: &mut Vec<String>, debug_level: u8, ci: bool) -> bool {
    let debug = debug_level > 0;
    if debug {
        args.insert(0, format!("-{}", "v".repeat(usize::from(debug_level))));
    }
    if debug || ci {
        args.insert(0, "-r".to_string());
    }
    !debug && ci
}
