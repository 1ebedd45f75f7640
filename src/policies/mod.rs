//! Exit and restart policies.
//!
//! ## Contents
//! - [`ExitPolicy`] what an unexpected exit leads to (restart / ignore / proxy)
//! - [`RestartBackoff`] how long to wait after rapid failures (first / factor / max + jitter)
//! - [`FailureTracker`], [`RetryDecision`] per-program counter of consecutive rapid failures
//!
//! ## Quick wiring
//! ```text
//! Config { on_exit: ExitPolicy, backoff: RestartBackoff }
//!      └─► core::controller uses:
//!           - on_exit to decide restart / stay exited / end supervisor
//!           - FailureTracker::on_exit(uptime) to schedule the next start
//! ```

mod backoff;
mod exit;

pub use backoff::{FailureTracker, RestartBackoff, RetryDecision};
pub use exit::ExitPolicy;
