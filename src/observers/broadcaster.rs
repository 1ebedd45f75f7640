//! # StateBroadcaster: throttled, coalescing snapshot emission.
//!
//! Writers call [`PushHandle::request`] after every mutation of
//! [`SharedState`]. The broadcaster task turns any number of such requests
//! into **at most one** emission per throttle interval.
//!
//! ## Loop
//! ```text
//! loop {
//!   ├─► wait for a push request (stored permit if one arrived meanwhile)
//!   ├─► snapshot = state.snapshot()          (taken at emission time)
//!   ├─► if snapshot.revision != last_emitted → ObserverSet::emit(snapshot)
//!   └─► sleep(throttle)                      (requests arriving now coalesce)
//! }
//! ```
//!
//! ## Rules
//! - Last value wins: no historical snapshots are queued.
//! - A request is never dropped: it is at worst delayed by one interval.
//! - An unchanged revision is never re-emitted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use super::ObserverSet;
use crate::state::SharedState;

#[derive(Default)]
struct PushInner {
    notify: Notify,
    requests: AtomicU64,
}

/// Cheap, cloneable handle used to request a broadcast.
#[derive(Clone, Default)]
pub struct PushHandle {
    inner: Arc<PushInner>,
}

impl PushHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a broadcast. Never blocks; may be called from any task.
    pub fn request(&self) {
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
        self.inner.notify.notify_one();
    }

    /// Total number of requests made so far.
    pub fn requests(&self) -> u64 {
        self.inner.requests.load(Ordering::Relaxed)
    }

    async fn requested(&self) {
        self.inner.notify.notified().await;
    }
}

/// Emits snapshots of [`SharedState`] to an [`ObserverSet`] with throttling.
pub struct StateBroadcaster {
    state: Arc<SharedState>,
    observers: Arc<ObserverSet>,
    throttle: Duration,
}

impl StateBroadcaster {
    pub fn new(state: Arc<SharedState>, observers: Arc<ObserverSet>, throttle: Duration) -> Self {
        Self {
            state,
            observers,
            throttle,
        }
    }

    /// Runs until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        let push = self.state.push_handle().clone();
        let mut last_emitted: Option<u64> = None;

        loop {
            select! {
                _ = token.cancelled() => break,
                _ = push.requested() => {}
            }

            let snapshot = self.state.snapshot();
            if last_emitted != Some(snapshot.revision) {
                last_emitted = Some(snapshot.revision);
                let delivery = self.observers.emit(&snapshot);
                tracing::trace!(
                    revision = snapshot.revision,
                    delivered = delivery.delivered,
                    skipped = delivery.skipped,
                    "snapshot emitted"
                );
            }

            if !self.throttle.is_zero() {
                select! {
                    _ = token.cancelled() => break,
                    _ = time::sleep(self.throttle) => {}
                }
            }
        }
    }
}
