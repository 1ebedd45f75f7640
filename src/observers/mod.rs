//! # Snapshot observers and the throttled broadcaster.
//!
//! ## Architecture
//! ```text
//! writer ── SharedState::mutate() ──► PushHandle::request()
//!                                            │ (coalesced)
//!                                            ▼
//!                                   StateBroadcaster (one task)
//!                                            │ snapshot at emission time
//!                                            ▼
//!                                       ObserverSet
//!                              ┌─────────────┼─────────────┐
//!                              ▼             ▼             ▼
//!                          Observe impl   SSE stream    Observe impl
//! ```
//!
//! ## Observer kinds
//! - [`Observe`] implementations, driven by a worker task per observer
//! - raw subscriptions ([`ObserverSet::subscribe`], read through a
//!   [`SnapshotReceiver`]) for transports

mod broadcaster;
mod observe;
mod set;

pub use broadcaster::{PushHandle, StateBroadcaster};
pub use observe::Observe;
pub use set::{Delivery, ObserverId, ObserverSet, SnapshotReceiver};
