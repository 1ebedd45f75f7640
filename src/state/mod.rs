//! Shared supervisor state: process record, log window, config file cache.
//!
//! ## Contents
//! - [`SharedState`] the single lock-guarded state object and its mutation protocol
//! - [`ProcessRecord`], [`Lifecycle`] child process view and controller phase
//! - [`LogWindow`], [`LogEntry`], [`LogSource`] bounded log ring

mod record;
mod shared;
mod window;

pub use record::{Lifecycle, ProcessRecord, SPAWN_FAILED_EXIT_CODE};
pub use shared::{SharedState, Snapshot, StateData};
pub use window::{LogEntry, LogSource, LogWindow};
