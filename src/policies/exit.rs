//! # What happens when the child exits on its own.
//!
//! - [`ExitPolicy::Restart`] start it again, honoring [`RestartBackoff`](super::RestartBackoff) (default).
//! - [`ExitPolicy::Ignore`] stay exited until someone asks for a restart (manual mode).
//! - [`ExitPolicy::Proxy`] the supervisor shuts down and reports the child's exit code.
//!
//! Exits caused by the supervisor itself (restart, shutdown) never go through
//! the policy.

use serde::Deserialize;

/// Policy applied to unexpected child exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExitPolicy {
    #[default]
    Restart,
    Ignore,
    Proxy,
}

impl ExitPolicy {
    /// Manual mode: no automatic restart ever happens.
    #[inline]
    pub fn is_manual(&self) -> bool {
        !matches!(self, ExitPolicy::Restart)
    }

    /// Supervisor lifetime is tied to the child.
    #[inline]
    pub fn ends_supervisor(&self) -> bool {
        matches!(self, ExitPolicy::Proxy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitPolicy::Restart => "restart",
            ExitPolicy::Ignore => "ignore",
            ExitPolicy::Proxy => "proxy",
        }
    }
}
