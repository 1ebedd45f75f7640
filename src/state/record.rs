//! # Child process record and lifecycle phase.
//!
//! [`ProcessRecord`] is the observable view of the child: running flag, pid,
//! last exit code and the time of the last transition. [`Lifecycle`] is the
//! controller's state machine tag, mirrored into shared state so observers can
//! tell "restarting" apart from "exited".
//!
//! ## Invariants
//! - `running == true`  ⇒ `exit_code == 0` and `pid != 0`
//! - `running == false` ⇒ `pid == 0`

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Exit code recorded when the child could not be started at all.
pub const SPAWN_FAILED_EXIT_CODE: i32 = -1;

/// Lifecycle phase of the supervised child.
///
/// ```text
///   Changing ──spawn ok──► Running
///      ▲  │                  │
///      │  └─spawn failed─┐   │ restart / stop / unexpected exit
///      │                 ▼   ▼
///      └──── restart ─── Exited ◄── stopped, no restart follows
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Lifecycle {
    /// A start, stop or restart is in flight (initial state).
    #[default]
    Changing,
    /// The child is alive.
    Running {
        /// OS pid of the child.
        pid: u32,
    },
    /// The child terminated and nothing is scheduled to start it again.
    Exited {
        /// Exit code (negative for signals / spawn failure).
        code: i32,
    },
}

impl Lifecycle {
    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self, Lifecycle::Running { .. })
    }
}

/// Observable record of the child process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProcessRecord {
    pub running: bool,
    pub pid: u32,
    pub exit_code: i32,
    pub changed_at: DateTime<Utc>,
}

impl ProcessRecord {
    /// Record for a child that has never been started.
    pub fn new() -> Self {
        Self {
            running: false,
            pid: 0,
            exit_code: 0,
            changed_at: Utc::now(),
        }
    }

    /// Applies a confirmed start (`value` = pid) or exit (`value` = exit code).
    ///
    /// A start whose `value` is not a valid pid is rejected and leaves the
    /// record untouched; returns whether the record changed.
    pub fn apply(&mut self, running: bool, value: i64) -> bool {
        if running {
            let Some(pid) = u32::try_from(value).ok().filter(|&pid| pid != 0) else {
                return false;
            };
            self.pid = pid;
            self.exit_code = 0;
        } else {
            self.pid = 0;
            self.exit_code = i32::try_from(value).unwrap_or(i32::MIN);
        }
        self.running = running;
        self.changed_at = Utc::now();
        true
    }
}

impl Default for ProcessRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_exit_keeps_invariants() {
        let mut rec = ProcessRecord::new();
        let t0 = rec.changed_at;

        assert!(rec.apply(true, 42));
        assert!(rec.running);
        assert_eq!(rec.pid, 42);
        assert_eq!(rec.exit_code, 0);
        let t1 = rec.changed_at;
        assert!(t1 >= t0);

        rec.apply(false, 7);
        assert!(!rec.running);
        assert_eq!(rec.pid, 0);
        assert_eq!(rec.exit_code, 7);
        assert!(rec.changed_at >= t1);
    }

    #[test]
    fn restart_clears_previous_exit_code() {
        let mut rec = ProcessRecord::new();
        rec.apply(false, i64::from(SPAWN_FAILED_EXIT_CODE));
        assert_eq!(rec.exit_code, -1);
        rec.apply(true, 9);
        assert_eq!(rec.exit_code, 0);
    }

    #[test]
    fn start_without_valid_pid_is_rejected() {
        let mut rec = ProcessRecord::new();
        rec.apply(false, 3);
        let before = rec.clone();

        for value in [0, -4, i64::from(u32::MAX) + 1] {
            assert!(!rec.apply(true, value), "value {value}");
            assert_eq!(rec, before);
        }
        assert!(rec.apply(true, i64::from(u32::MAX)));
        assert_eq!(rec.pid, u32::MAX);
    }

    #[test]
    fn lifecycle_serializes_tagged() {
        let json = serde_json::to_string(&Lifecycle::Exited { code: 3 }).unwrap();
        assert_eq!(json, r#"{"state":"exited","code":3}"#);
        assert!(Lifecycle::Running { pid: 1 }.is_running());
        assert!(!Lifecycle::default().is_running());
    }
}
