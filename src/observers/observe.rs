//! # Core observer trait
//!
//! `Observe` is the extension point for anything that wants live state
//! snapshots (a UI connection, a metrics exporter, a test harness). Each
//! observer is driven by a dedicated worker loop fed by a single last-value
//! slot owned by the [`ObserverSet`](crate::observers::ObserverSet).
//!
//! ## Contract
//! - Implementations may be slow; they do **not** block the broadcaster nor
//!   other observers.
//! - An observer still busy with one snapshot gets only the newest one next;
//!   the states in between are skipped for that observer only.
//!
//! ## Example
//! ```rust
//! use procvisor::{Observe, StateData};
//!
//! struct PidPrinter;
//!
//! #[async_trait::async_trait]
//! impl Observe for PidPrinter {
//!     async fn on_snapshot(&self, snapshot: &StateData) {
//!         println!("rev={} pid={}", snapshot.revision, snapshot.process.pid);
//!     }
//!     fn name(&self) -> &'static str { "pid-printer" }
//! }
//! ```

use async_trait::async_trait;

use crate::state::StateData;

/// Contract for snapshot observers.
///
/// Called from an observer-dedicated worker task.
#[async_trait]
pub trait Observe: Send + Sync + 'static {
    /// Handle one emitted snapshot.
    async fn on_snapshot(&self, snapshot: &StateData);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
