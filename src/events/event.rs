//! # Supervisor events rendered into the log pipeline.
//!
//! The [`EventKind`] enum classifies what the supervisor reports across three
//! categories:
//! - **Process events**: start, exit, spawn failure, restart, backoff
//! - **Signal events**: forwarded, ignored, failed delivery, shutdown
//! - **Config events**: loaded or changed, unreadable, watching disabled
//!
//! The [`Event`] struct carries optional metadata (pid, exit code, signal,
//! path, reason, delay). Its `Display` impl is the human-readable line written
//! into the log window, so observers see exactly what the operator sees.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use procvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ProcessExited).with_pid(42).with_exit_code(3);
//! assert_eq!(ev.to_string(), "process 42 exited with code 3");
//! assert!(ev.is_failure());
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of supervisor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Process events ===
    /// A start attempt begins.
    ///
    /// Sets: `reason` (command line)
    ProcessStarting,

    /// The child was spawned.
    ///
    /// Sets: `pid`
    ProcessStarted,

    /// The child terminated.
    ///
    /// Sets: `pid`, `exit_code`, optionally `signal` when killed by one
    ProcessExited,

    /// The child could not be spawned.
    ///
    /// Sets: `reason`
    SpawnFailed,

    /// A restart was accepted by the controller.
    ///
    /// Sets: `reason` (who asked: "manual", "config change", "exit policy")
    RestartRequested,

    /// The child ignored the stop signal for too long; escalating to SIGKILL.
    ///
    /// Sets: `pid`, `delay_ms` (time waited)
    StopTimeout,

    /// Automatic restart delayed after a rapid failure.
    ///
    /// Sets: `delay_ms`, `attempt`
    BackoffScheduled,

    /// Automatic restarts given up after too many rapid failures.
    ///
    /// Sets: `attempt`
    RestartsExhausted,

    // === Signal events ===
    /// A signal was delivered to the child.
    ///
    /// Sets: `signal`, `pid`
    SignalForwarded,

    /// A signal arrived while no child was running.
    ///
    /// Sets: `signal`
    SignalIgnored,

    /// Delivering a signal to the child failed.
    ///
    /// Sets: `signal`, `reason`
    SignalFailed,

    /// Interrupt received; the supervisor is exiting.
    ///
    /// Sets: `signal`
    ShutdownRequested,

    // === Config file events ===
    /// A watched file was read and its content changed (or was first loaded).
    ///
    /// Sets: `path`
    ConfigLoaded,

    /// A watched file could not be read; the previous content is kept.
    ///
    /// Sets: `path`, `attempt` (file index), `reason`
    ConfigUnreadable,

    /// File watching could not be set up; changes will not be detected.
    ///
    /// Sets: `reason`
    WatchDisabled,
}

/// Supervisor event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: DateTime<Utc>,
    /// Event classification.
    pub kind: EventKind,

    /// Child pid, if applicable.
    pub pid: Option<u32>,
    /// Child exit code, if applicable.
    pub exit_code: Option<i32>,
    /// Signal name (e.g. `SIGHUP`).
    pub signal: Option<&'static str>,
    /// Watched file path.
    pub path: Option<Arc<str>>,
    /// Human-readable reason (errors, origin of a restart, command line).
    pub reason: Option<Arc<str>>,
    /// Delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Attempt counter or file index.
    pub attempt: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: Utc::now(),
            kind,
            pid: None,
            exit_code: None,
            signal: None,
            path: None,
            reason: None,
            delay_ms: None,
            attempt: None,
        }
    }

    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    #[inline]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    #[inline]
    pub fn with_signal(mut self, signal: &'static str) -> Self {
        self.signal = Some(signal);
        self
    }

    #[inline]
    pub fn with_path(mut self, path: impl Into<Arc<str>>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// True for events describing a degraded condition (logged at `warn`).
    pub fn is_failure(&self) -> bool {
        match self.kind {
            EventKind::SpawnFailed
            | EventKind::StopTimeout
            | EventKind::RestartsExhausted
            | EventKind::SignalFailed
            | EventKind::ConfigUnreadable
            | EventKind::WatchDisabled => true,
            EventKind::ProcessExited => self.exit_code.is_some_and(|c| c != 0),
            _ => false,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pid = self.pid.unwrap_or(0);
        let reason = self.reason.as_deref().unwrap_or("unknown");
        let path = self.path.as_deref().unwrap_or("?");
        let signal = self.signal.unwrap_or("?");

        match self.kind {
            EventKind::ProcessStarting => write!(f, "starting program: {reason}"),
            EventKind::ProcessStarted => write!(f, "process {pid} started"),
            EventKind::ProcessExited => match (self.signal, self.exit_code) {
                (Some(sig), _) => write!(f, "process {pid} killed by {sig}"),
                (None, Some(code)) => write!(f, "process {pid} exited with code {code}"),
                (None, None) => write!(f, "process {pid} exited"),
            },
            EventKind::SpawnFailed => write!(f, "failed to start program: {reason}"),
            EventKind::RestartRequested => write!(f, "restarting ({reason})"),
            EventKind::StopTimeout => write!(
                f,
                "process {pid} still running after {}ms, sending SIGKILL",
                self.delay_ms.unwrap_or(0)
            ),
            EventKind::BackoffScheduled => write!(
                f,
                "restarting in {}ms (rapid failure #{})",
                self.delay_ms.unwrap_or(0),
                self.attempt.unwrap_or(0)
            ),
            EventKind::RestartsExhausted => write!(
                f,
                "giving up after {} rapid failures; restart manually",
                self.attempt.unwrap_or(0)
            ),
            EventKind::SignalForwarded => write!(f, "forwarded {signal} to process {pid}"),
            EventKind::SignalIgnored => write!(f, "ignored signal: {signal}"),
            EventKind::SignalFailed => write!(f, "failed to forward {signal}: {reason}"),
            EventKind::ShutdownRequested => write!(f, "interrupted by {signal}, exiting..."),
            EventKind::ConfigLoaded => write!(f, "loaded config file '{path}' from disk"),
            EventKind::ConfigUnreadable => write!(
                f,
                "failed to read configuration file (#{}): {path}: {reason}",
                self.attempt.unwrap_or(0)
            ),
            EventKind::WatchDisabled => write!(f, "config watch disabled: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::ProcessStarted);
        let b = Event::new(EventKind::ProcessStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn renders_operator_lines() {
        let ev = Event::new(EventKind::ConfigUnreadable)
            .with_path("/etc/app.conf")
            .with_attempt(1)
            .with_reason("No such file or directory");
        assert_eq!(
            ev.to_string(),
            "failed to read configuration file (#1): /etc/app.conf: No such file or directory"
        );
        assert!(ev.is_failure());

        let ev = Event::new(EventKind::ProcessExited)
            .with_pid(7)
            .with_exit_code(-15)
            .with_signal("SIGTERM");
        assert_eq!(ev.to_string(), "process 7 killed by SIGTERM");

        let ev = Event::new(EventKind::BackoffScheduled)
            .with_delay(Duration::from_millis(1500))
            .with_attempt(2);
        assert_eq!(ev.to_string(), "restarting in 1500ms (rapid failure #2)");
        assert!(!ev.is_failure());
    }

    #[test]
    fn clean_exit_is_not_a_failure() {
        let ev = Event::new(EventKind::ProcessExited).with_pid(1).with_exit_code(0);
        assert!(!ev.is_failure());
    }
}
