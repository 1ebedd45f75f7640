//! Runtime core: the child lifecycle and everything that drives it.
//!
//! Public API from this module: [`Supervisor`] (plus its builder and handle),
//! [`ProcessController`], [`SignalRelay`], [`ConfigWatcher`] and [`Config`].
//!
//! Internal modules:
//! - [`controller`]: command queue and the lifecycle state machine;
//! - [`runner`]: spawns one child attempt, pumps its output, reports its exit;
//! - [`signals`]: OS signal subscription, filtering and delivery to the child;
//! - [`watcher`]: configuration file cache and change detection;
//! - [`supervisor`]: wiring, startup order and termination.

mod builder;
mod config;
mod controller;
mod runner;
mod signals;
mod supervisor;
mod watcher;

pub use builder::SupervisorBuilder;
pub use config::{Config, LogMode, ProgramSpec, ReloadCoalescing};
pub use controller::{ProcessController, RestartOrigin};
pub use signals::{ProcSignal, SignalRelay};
pub use supervisor::{Supervisor, SupervisorHandle};
pub use watcher::ConfigWatcher;
