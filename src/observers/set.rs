//! # ObserverSet: non-blocking fan-out of snapshots
//!
//! [`ObserverSet`] is the broadcaster's registry of connected observers. It
//! distributes each [`Snapshot`] to every registered observer **without
//! awaiting** their processing.
//!
//! ## What it guarantees
//! - `emit(&Snapshot)` returns immediately.
//! - Last value wins: each observer holds one slot. A newer snapshot replaces
//!   an unread one, so a slow observer skips intermediate states but always
//!   ends up with the newest.
//! - Revisions seen by one observer only increase.
//! - Panics inside [`Observe`] implementations are caught and logged (isolation).
//! - A slow or closed observer affects that observer only.
//!
//! ## Diagram
//! ```text
//!    emit(&Snapshot)
//!        │                      (Arc-clone per observer)
//!        ├──────────────► [slot O1] ─► worker O1 ─► on_snapshot()
//!        ├──────────────► [slot O2] ─► SSE stream (raw subscription)
//!        └──────────────► [slot ON] ─► worker ON ─► on_snapshot()
//! ```
//!
//! Skips are reported through `tracing` only. Writing them into the log window
//! would itself request another push.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};

use super::Observe;
use crate::state::Snapshot;

type Slot = Option<Snapshot>;

/// Identifier returned on registration; used to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Per-observer slot with metadata.
struct ObserverChannel {
    name: Cow<'static, str>,
    sender: watch::Sender<Slot>,
    worker: Option<JoinHandle<()>>,
}

/// Outcome of one [`ObserverSet::emit`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Observers whose slot now holds the snapshot.
    pub delivered: usize,
    /// Observers already holding the same or a newer revision.
    pub skipped: usize,
    /// Observers found closed and removed.
    pub pruned: usize,
}

/// Receiving side of a raw subscription.
///
/// Yields the newest snapshot not seen yet; intermediate ones may be skipped.
pub struct SnapshotReceiver {
    rx: watch::Receiver<Slot>,
    seen: Option<u64>,
}

impl SnapshotReceiver {
    /// Waits for a snapshot newer than the last one returned.
    ///
    /// Returns `None` once the observer is unregistered and nothing newer is left.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        loop {
            if let Some(snap) = self.try_recv() {
                return Some(snap);
            }
            self.rx.changed().await.ok()?;
        }
    }

    /// Returns the newest snapshot if it has not been returned yet.
    pub fn try_recv(&mut self) -> Option<Snapshot> {
        let snap = self.rx.borrow_and_update().clone()?;
        if self.seen.is_some_and(|seen| snap.revision <= seen) {
            return None;
        }
        self.seen = Some(snap.revision);
        Some(snap)
    }

    #[cfg(feature = "http")]
    pub(crate) fn into_inner(self) -> watch::Receiver<Slot> {
        self.rx
    }
}

/// Dynamic registry of observers with one last-value slot each.
#[derive(Default)]
pub struct ObserverSet {
    channels: Mutex<HashMap<ObserverId, ObserverChannel>>,
    next_id: AtomicU64,
}

impl ObserverSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an [`Observe`] implementation and spawns its worker.
    pub fn register(&self, observer: Arc<dyn Observe>) -> ObserverId {
        let name = observer.name();
        let (tx, rx) = watch::channel::<Slot>(None);
        let mut rx = SnapshotReceiver { rx, seen: None };

        let worker = tokio::spawn(async move {
            while let Some(snap) = rx.recv().await {
                let fut = observer.on_snapshot(snap.as_ref());
                if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                    tracing::error!(
                        observer = observer.name(),
                        panic = ?panic_err,
                        "observer panicked"
                    );
                }
            }
        });

        self.insert(Cow::Borrowed(name), tx, Some(worker))
    }

    /// Registers a raw subscription (used by streaming transports).
    ///
    /// The caller owns the receiver; dropping it makes the next emit prune the entry.
    pub fn subscribe(&self, name: impl Into<Cow<'static, str>>) -> (ObserverId, SnapshotReceiver) {
        let (tx, rx) = watch::channel::<Slot>(None);
        let id = self.insert(name.into(), tx, None);
        (id, SnapshotReceiver { rx, seen: None })
    }

    /// Removes an observer. Its worker (if any) finishes after the pending snapshot.
    pub fn unregister(&self, id: ObserverId) -> bool {
        self.channels.lock().remove(&id).is_some()
    }

    /// Offers one snapshot to a single observer (used to prime new subscribers).
    ///
    /// Returns `false` if the observer is unknown or already holds a newer revision.
    pub fn send_to(&self, id: ObserverId, snapshot: &Snapshot) -> bool {
        let channels = self.channels.lock();
        channels
            .get(&id)
            .is_some_and(|ch| offer(&ch.sender, snapshot))
    }

    /// Fan-out one snapshot to all observers (non-blocking, fire-and-forget).
    pub fn emit(&self, snapshot: &Snapshot) -> Delivery {
        let mut delivery = Delivery::default();
        let mut channels = self.channels.lock();
        channels.retain(|_, channel| {
            if channel.sender.is_closed() {
                delivery.pruned += 1;
                tracing::debug!(observer = %channel.name, "observer closed, unregistering");
                return false;
            }
            if offer(&channel.sender, snapshot) {
                delivery.delivered += 1;
            } else {
                delivery.skipped += 1;
                tracing::debug!(
                    observer = %channel.name,
                    revision = snapshot.revision,
                    "observer already holds a newer snapshot"
                );
            }
            true
        });
        delivery
    }

    /// Closes all slots and awaits worker completion.
    pub async fn shutdown(&self) {
        let drained: Vec<ObserverChannel> = {
            let mut channels = self.channels.lock();
            channels.drain().map(|(_, ch)| ch).collect()
        };
        for ch in drained {
            drop(ch.sender);
            if let Some(worker) = ch.worker {
                let _ = worker.await;
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    fn insert(
        &self,
        name: Cow<'static, str>,
        sender: watch::Sender<Slot>,
        worker: Option<JoinHandle<()>>,
    ) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.channels.lock().insert(
            id,
            ObserverChannel {
                name,
                sender,
                worker,
            },
        );
        id
    }
}

/// Replaces the slot content unless it already holds this revision or a newer one.
fn offer(sender: &watch::Sender<Slot>, snapshot: &Snapshot) -> bool {
    sender.send_if_modified(|slot| {
        if slot.as_ref().is_some_and(|held| held.revision >= snapshot.revision) {
            return false;
        }
        *slot = Some(Arc::clone(snapshot));
        true
    })
}
