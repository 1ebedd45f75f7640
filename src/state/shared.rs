//! # Shared supervisor state behind one exclusive lock.
//!
//! [`SharedState`] is the only mutable resource shared across tasks. Every
//! writer follows the same protocol:
//!
//! ```text
//! lock ─► mutate ─► revision += 1 ─► unlock ─► PushHandle::request()
//! ```
//!
//! The push request is always issued **after** the lock is released, so the
//! broadcaster (which snapshots under the same lock) never contends with a
//! notifier holding it.
//!
//! ## Rules
//! - `revision` increases by exactly one per applied mutation.
//! - A mutation that reports "no change" (see [`SharedState::mutate_if`]) does
//!   not bump `revision` and does not request a push.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::record::{Lifecycle, ProcessRecord};
use super::window::LogWindow;
use crate::observers::PushHandle;

/// Everything observers can see. Cloned wholesale into a [`Snapshot`].
#[derive(Clone, Debug, Serialize)]
pub struct StateData {
    /// Mutation counter (versioned-snapshot protocol).
    pub revision: u64,
    /// Supervisor build version.
    pub version: String,
    /// Auto-restart suppressed.
    pub manual: bool,
    /// Controller state machine phase.
    pub phase: Lifecycle,
    pub process: ProcessRecord,
    /// Watched configuration files: path → last successfully read content.
    pub files: BTreeMap<String, String>,
    pub log: LogWindow,
}

/// Immutable, shareable copy of [`StateData`] taken under the lock.
pub type Snapshot = Arc<StateData>;

/// Lock-guarded supervisor state plus the push handle used after each mutation.
pub struct SharedState {
    inner: Mutex<StateData>,
    push: PushHandle,
}

impl SharedState {
    /// Creates the state for the whole supervisor lifetime.
    pub fn new(version: impl Into<String>, manual: bool, max_lines: usize, push: PushHandle) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(StateData {
                revision: 0,
                version: version.into(),
                manual,
                phase: Lifecycle::Changing,
                process: ProcessRecord::new(),
                files: BTreeMap::new(),
                log: LogWindow::new(max_lines),
            }),
            push,
        })
    }

    /// Reads under the lock. Keep `f` short.
    pub fn read<R>(&self, f: impl FnOnce(&StateData) -> R) -> R {
        let guard = self.inner.lock();
        f(&guard)
    }

    /// Applies `f`, bumps the revision, releases the lock and requests a push.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut StateData) -> R) -> R {
        let out = {
            let mut guard = self.inner.lock();
            let out = f(&mut guard);
            guard.revision += 1;
            out
        };
        self.push.request();
        out
    }

    /// Like [`mutate`](Self::mutate), but only counts as a mutation when `f` returns `true`.
    ///
    /// `f` must leave the data untouched when it returns `false`.
    pub fn mutate_if(&self, f: impl FnOnce(&mut StateData) -> bool) -> bool {
        let changed = {
            let mut guard = self.inner.lock();
            let changed = f(&mut guard);
            if changed {
                guard.revision += 1;
            }
            changed
        };
        if changed {
            self.push.request();
        }
        changed
    }

    /// Clones the current state.
    pub fn snapshot(&self) -> Snapshot {
        Arc::new(self.inner.lock().clone())
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }

    /// True if the controller last confirmed a running child.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.inner.lock().phase.is_running()
    }

    #[inline]
    pub fn phase(&self) -> Lifecycle {
        self.inner.lock().phase
    }

    /// Handle used to request broadcasts (shared with the broadcaster).
    pub fn push_handle(&self) -> &PushHandle {
        &self.push
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<SharedState> {
        SharedState::new("test", false, 4, PushHandle::new())
    }

    #[test]
    fn mutate_bumps_revision_and_requests_push() {
        let st = state();
        assert_eq!(st.revision(), 0);
        st.mutate(|d| d.manual = true);
        st.mutate(|d| d.phase = Lifecycle::Running { pid: 3 });
        assert_eq!(st.revision(), 2);
        assert_eq!(st.push_handle().requests(), 2);
        assert!(st.is_running());
    }

    #[test]
    fn unchanged_mutate_if_is_invisible() {
        let st = state();
        let changed = st.mutate_if(|_| false);
        assert!(!changed);
        assert_eq!(st.revision(), 0);
        assert_eq!(st.push_handle().requests(), 0);

        assert!(st.mutate_if(|d| {
            d.files.insert("a".into(), "1".into());
            true
        }));
        assert_eq!(st.revision(), 1);
        assert_eq!(st.push_handle().requests(), 1);
    }

    #[test]
    fn snapshot_is_detached_copy() {
        let st = state();
        let snap = st.snapshot();
        st.mutate(|d| d.version = "changed".into());
        assert_eq!(snap.version, "test");
        assert_eq!(st.snapshot().version, "changed");
        assert_eq!(snap.log.capacity(), 4);
    }
}
