//! Error types used by the procvisor runtime.
//!
//! This module defines three error enums:
//!
//! - [`RuntimeError`]: fatal errors raised while starting the supervisor itself.
//! - [`ProcessError`]: non-fatal errors raised while driving the child process.
//! - [`ControlError`]: errors returned to callers of the controller handle.
//!
//! All of them provide `as_label` (stable snake_case, for logs/metrics) and
//! `as_message` helpers.

use std::io;

use thiserror::Error;

/// # Errors that abort supervisor startup.
///
/// Only these are fatal: they are returned before any background task is launched.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The control-plane listener could not be bound.
    #[error("failed to start server on {addr}: {source}")]
    Bind {
        /// Requested listen address.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Settings could not be loaded or failed validation.
    #[error("invalid settings: {reason}")]
    Settings {
        /// What was wrong.
        reason: String,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::RuntimeError;
    ///
    /// let err = RuntimeError::Settings { reason: "no program".into() };
    /// assert_eq!(err.as_label(), "runtime_settings");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Bind { .. } => "runtime_bind",
            RuntimeError::Settings { .. } => "runtime_settings",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::Bind { addr, source } => format!("bind {addr}: {source}"),
            RuntimeError::Settings { reason } => format!("settings: {reason}"),
        }
    }
}

/// # Errors produced while driving the child process.
///
/// None of these stop the supervisor; they are reported through the log pipeline.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The program could not be spawned.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program that was launched.
        program: String,
        /// OS error from spawn.
        #[source]
        source: io::Error,
    },

    /// The child was spawned but the OS reported no pid (already reaped).
    #[error("child '{program}' exited before its pid could be read")]
    NoPid {
        /// Program that was launched.
        program: String,
    },

    /// Delivering a signal to the child failed.
    #[error("failed to deliver {signal} to pid {pid}: {reason}")]
    Signal {
        /// Signal name.
        signal: &'static str,
        /// Target pid.
        pid: u32,
        /// OS error text.
        reason: String,
    },

    /// Signal forwarding is not available on this platform.
    #[error("signal {signal} cannot be delivered on this platform")]
    Unsupported {
        /// Signal name.
        signal: &'static str,
    },
}

impl ProcessError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::ProcessError;
    ///
    /// let err = ProcessError::Unsupported { signal: "SIGHUP" };
    /// assert_eq!(err.as_label(), "process_unsupported");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ProcessError::Spawn { .. } => "process_spawn",
            ProcessError::NoPid { .. } => "process_no_pid",
            ProcessError::Signal { .. } => "process_signal",
            ProcessError::Unsupported { .. } => "process_unsupported",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ProcessError::Spawn { program, source } => format!("spawn {program}: {source}"),
            ProcessError::NoPid { program } => format!("no pid for {program}"),
            ProcessError::Signal {
                signal,
                pid,
                reason,
            } => format!("signal {signal} -> {pid}: {reason}"),
            ProcessError::Unsupported { signal } => format!("unsupported signal {signal}"),
        }
    }
}

/// # Errors returned by [`ProcessController`](crate::ProcessController) operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    /// The controller task is gone (supervisor shutting down).
    #[error("controller channel closed")]
    Closed,
}

impl ControlError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ControlError::Closed => "control_closed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ControlError::Closed => "controller is not running".to_string(),
        }
    }
}
