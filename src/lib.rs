//! # procvisor
//!
//! **Procvisor** supervises a single external program and exposes its
//! lifecycle, its output and its configuration files through a live,
//! multi-observer control plane.
//!
//! It restarts the program on demand, on configuration change or after an
//! unexpected exit, relays OS signals to it, and keeps every observer in sync
//! with one consistent, throttled snapshot of the supervisor state.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  POST /restart      OS signals          watched files
//!        │                │                     │
//!        │           SignalRelay          ConfigWatcher ──(file cache)──┐
//!        │                │                     │                       │
//!        └────────────────┼─────────────────────┘                       │
//!                         ▼                                             │
//!              ProcessController ──► [queue(1) + ack]                   │
//!                         │                                             │
//!                         ▼                                             │
//!               ControllerTask (lifecycle state machine)                │
//!                 │ spawn            ▲ ExitNotice                       │
//!                 ▼                  │                                  │
//!               child ── stdout/stderr ──► LogSink ──► [intake] ──► LogAggregator
//!                                                                       │
//!                                                                       ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │ SharedState (one lock): process record, phase, log window, files      │
//! │ lock ─► mutate ─► revision+1 ─► unlock ─► PushHandle::request()       │
//! └──────────────────────────────────┬────────────────────────────────────┘
//!                                    ▼
//!                   StateBroadcaster (throttled, coalescing)
//!                                    ▼
//!                               ObserverSet
//!                       ┌────────────┼────────────┐
//!                       ▼            ▼            ▼
//!                  SSE client   SSE client   Observe impl
//! ```
//!
//! ### Lifecycle
//! ```text
//! Changing ──spawn ok──► Running { pid }
//!    ▲                        │
//!    │                        ├─ restart: stop signal, wait restart_timeout, SIGKILL
//!    │                        └─ unexpected exit ─► ExitPolicy
//!    │                                               ├─ Restart ─► backoff ─► Changing
//!    │                                               ├─ Ignore  ─► Exited { code }
//!    └──────── restart ◄──── Exited { code } ◄───────┴─ Proxy   ─► supervisor exits with code
//! ```
//!
//! ## Features
//! | Area              | Description                                                        | Key types / traits                        |
//! |-------------------|--------------------------------------------------------------------|-------------------------------------------|
//! | **Supervision**   | Run, restart and stop one child process.                           | [`Supervisor`], [`ProcessController`]     |
//! | **Observers**     | Receive throttled state snapshots.                                  | [`Observe`], [`ObserverSet`]              |
//! | **Policies**      | Exit handling and restart backoff.                                  | [`ExitPolicy`], [`RestartBackoff`]        |
//! | **Logs**          | Bounded log window fed by the child and the supervisor.             | [`LogSink`], [`LogAggregator`]            |
//! | **Errors**        | Typed errors for startup, process control and the command queue.    | [`RuntimeError`], [`ProcessError`]        |
//! | **Configuration** | Centralize supervisor settings.                                     | [`Config`], [`ProgramSpec`]               |
//!
//! ## Optional features
//! - `http` (default): axum control plane (`GET /`, `GET /sync` SSE, `POST /restart`)
//!   and the `procvisor` binary.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use procvisor::{Config, ExitPolicy, Observe, ProgramSpec, StateData, Supervisor};
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl Observe for Printer {
//!     async fn on_snapshot(&self, s: &StateData) {
//!         println!("rev {} running={} pid={}", s.revision, s.process.running, s.process.pid);
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::new(ProgramSpec::new("my-server", ["--port", "9000"]));
//!     cfg.config_files = vec!["/etc/my-server.toml".into()];
//!     cfg.restart_on_change = true;
//!     cfg.on_exit = ExitPolicy::Restart;
//!
//!     let sup = Supervisor::builder(cfg)
//!         .with_observers(vec![Arc::new(Printer)])
//!         .build();
//!
//!     let code = sup.run().await?;
//!     std::process::exit(code);
//! }
//! ```
mod core;
mod error;
mod events;
mod logs;
mod observers;
mod policies;
mod state;

#[cfg(feature = "http")]
pub mod http;

// ---- Public re-exports ----

pub use core::{
    Config, ConfigWatcher, LogMode, ProcSignal, ProcessController, ProgramSpec, ReloadCoalescing,
    RestartOrigin, SignalRelay, Supervisor, SupervisorBuilder, SupervisorHandle,
};
pub use error::{ControlError, ProcessError, RuntimeError};
pub use events::{Event, EventKind};
pub use logs::{ChildStream, LogAggregator, LogSink};
pub use observers::{
    Delivery, Observe, ObserverId, ObserverSet, PushHandle, SnapshotReceiver, StateBroadcaster,
};
pub use policies::{ExitPolicy, FailureTracker, RestartBackoff, RetryDecision};
pub use state::{
    Lifecycle, LogEntry, LogSource, LogWindow, ProcessRecord, SPAWN_FAILED_EXIT_CODE, SharedState,
    Snapshot, StateData,
};
