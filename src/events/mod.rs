//! Supervisor events: typed reports rendered into log lines.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//!
//! ## Quick reference
//! - **Publishers**: `ProcessController`, child runner, `SignalRelay`, `ConfigWatcher`.
//! - **Consumer**: [`LogSink::event`](crate::LogSink::event), which mirrors the
//!   event to `tracing` and writes its `Display` form into the log window.

mod event;

pub use event::{Event, EventKind};
