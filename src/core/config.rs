//! # Supervisor configuration.
//!
//! Provides [`Config`], the settings consumed by the core, and
//! [`ProgramSpec`], the command line of the supervised child.
//!
//! Config is used in two ways:
//! 1. **Supervisor creation**: `Supervisor::builder(config).build()`
//! 2. **Settings files**: the binary deserializes a TOML file into its own
//!    settings struct and converts it into a `Config`.
//!
//! ## Sentinel values
//! - `throttle = 0s` → every push request is emitted without delay
//! - `restart_timeout = 0s` → restarts escalate to `SIGKILL` immediately
//! - `debounce = 0s` → every write notification is handled on its own
//! - `max_lines = 0`, `intake_capacity = 0` → clamped to 1

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::signals::ProcSignal;
use crate::policies::{ExitPolicy, RestartBackoff};

/// Program to run and how.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramSpec {
    /// Executable (resolved through `PATH` when not absolute).
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
    /// Working directory (`None` = inherit).
    pub cwd: Option<PathBuf>,
    /// Extra environment variables, applied on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl ProgramSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Space-joined command line, for log lines.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Where child output goes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// Log window and the supervisor's own stdout/stderr.
    #[default]
    Both,
    /// Log window only.
    #[serde(rename = "webui")]
    #[value(name = "webui")]
    WebUi,
    /// Supervisor stdout/stderr only.
    Proxy,
}

impl LogMode {
    #[inline]
    pub fn to_window(&self) -> bool {
        !matches!(self, LogMode::Proxy)
    }

    #[inline]
    pub fn to_console(&self) -> bool {
        !matches!(self, LogMode::WebUi)
    }
}

/// How file changes inside one debounce window turn into restarts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReloadCoalescing {
    /// At most one restart per window, however many files changed.
    #[default]
    Batch,
    /// One restart per changed file.
    PerFile,
}

/// Configuration consumed by the supervisor core.
///
/// ## Field semantics
/// - `program`: child command line
/// - `config_files`: files loaded at startup and watched for changes
/// - `restart_on_change`: restart the child when a watched file changes
/// - `on_exit`: what an unexpected exit leads to ([`ExitPolicy::Ignore`] = manual mode)
/// - `max_lines`: log window capacity
/// - `throttle`: minimum interval between two snapshot emissions
/// - `restart_timeout`: how long a stopping child may take before `SIGKILL`
/// - `stop_signal`: signal sent to stop the child on restart
/// - `signal_grace`: wait between killing the child and exiting on interrupt
/// - `debounce`: quiet period collecting file notifications before re-reading
/// - `coalescing`: restarts per debounce window
/// - `log_mode`: routing of child output
/// - `intake_capacity`: bounded log intake size
/// - `backoff`: delays between automatic restarts after rapid failures
/// - `version`: supervisor build version, shown to observers
///
/// ## Notes
/// All fields are public for flexibility. Prefer using helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    pub program: ProgramSpec,
    pub config_files: Vec<PathBuf>,
    pub restart_on_change: bool,
    pub on_exit: ExitPolicy,
    pub max_lines: usize,
    pub throttle: Duration,
    pub restart_timeout: Duration,
    pub stop_signal: ProcSignal,
    pub signal_grace: Duration,
    pub debounce: Duration,
    pub coalescing: ReloadCoalescing,
    pub log_mode: LogMode,
    pub intake_capacity: usize,
    pub backoff: RestartBackoff,
    pub version: String,
}

impl Config {
    /// Default configuration for the given program.
    pub fn new(program: ProgramSpec) -> Self {
        Self {
            program,
            ..Self::default()
        }
    }

    /// Auto-restart suppressed (derived from [`Config::on_exit`]).
    #[inline]
    pub fn manual(&self) -> bool {
        self.on_exit.is_manual()
    }

    /// Log window capacity clamped to a minimum of 1.
    #[inline]
    pub fn max_lines_clamped(&self) -> usize {
        self.max_lines.max(1)
    }

    /// Intake capacity clamped to a minimum of 1.
    #[inline]
    pub fn intake_capacity_clamped(&self) -> usize {
        self.intake_capacity.max(1)
    }

    /// Grace before escalating to `SIGKILL` as an `Option`.
    ///
    /// - `None` → kill immediately
    /// - `Some(d)` → send `stop_signal`, then wait up to `d`
    #[inline]
    pub fn stop_grace(&self) -> Option<Duration> {
        if self.restart_timeout.is_zero() {
            None
        } else {
            Some(self.restart_timeout)
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `max_lines = 5000`
    /// - `throttle = 250ms`
    /// - `restart_timeout = 30s`, `stop_signal = SIGTERM`
    /// - `signal_grace = 100ms`
    /// - `debounce = 100ms`, `coalescing = Batch`
    /// - `log_mode = Both`, `intake_capacity = 10_000`
    /// - `on_exit = Restart` with `RestartBackoff::default()`
    fn default() -> Self {
        Self {
            program: ProgramSpec::default(),
            config_files: Vec::new(),
            restart_on_change: false,
            on_exit: ExitPolicy::default(),
            max_lines: 5000,
            throttle: Duration::from_millis(250),
            restart_timeout: Duration::from_secs(30),
            stop_signal: ProcSignal::Terminate,
            signal_grace: Duration::from_millis(100),
            debounce: Duration::from_millis(100),
            coalescing: ReloadCoalescing::default(),
            log_mode: LogMode::default(),
            intake_capacity: 10_000,
            backoff: RestartBackoff::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_follows_exit_policy() {
        let mut cfg = Config::default();
        assert!(!cfg.manual());
        cfg.on_exit = ExitPolicy::Ignore;
        assert!(cfg.manual());
    }

    #[test]
    fn sentinels_are_clamped() {
        let cfg = Config {
            max_lines: 0,
            intake_capacity: 0,
            restart_timeout: Duration::ZERO,
            ..Config::default()
        };
        assert_eq!(cfg.max_lines_clamped(), 1);
        assert_eq!(cfg.intake_capacity_clamped(), 1);
        assert_eq!(cfg.stop_grace(), None);
    }

    #[test]
    fn command_line_joins_program_and_args() {
        let spec = ProgramSpec::new("sh", ["-c", "echo hi"]);
        assert_eq!(spec.command_line(), "sh -c echo hi");
    }

    #[test]
    fn log_mode_routing() {
        assert!(LogMode::Both.to_window() && LogMode::Both.to_console());
        assert!(LogMode::WebUi.to_window() && !LogMode::WebUi.to_console());
        assert!(!LogMode::Proxy.to_window() && LogMode::Proxy.to_console());
    }
}
