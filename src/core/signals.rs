//! # OS signal relay.
//!
//! [`SignalRelay`] subscribes to the signals the supervisor itself receives
//! and decides, per signal:
//!
//! ```text
//!   SIGURG ────────────────► dropped (runtime noise)
//!   SIGINT / SIGTERM ──────► log "interrupted", Shutdown the child if running,
//!                            wait `signal_grace`, cancel the runtime
//!   anything else ─┬─ child running ──► ProcessController::forward_signal
//!                  └─ otherwise ──────► log "ignored signal", drop
//! ```
//!
//! **Unix platforms:** SIGHUP, SIGINT, SIGTERM, SIGQUIT, SIGUSR1, SIGUSR2,
//! SIGWINCH, SIGURG, SIGALRM, SIGIO (one tokio stream each, merged into one
//! queue).
//!
//! **Other platforms:** Ctrl-C via [`tokio::signal::ctrl_c`], treated as an
//! interrupt. Forwarding is unavailable.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::controller::ProcessController;
use crate::error::ProcessError;
use crate::events::{Event, EventKind};
use crate::logs::LogSink;

/// Signals the supervisor understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcSignal {
    Hangup,
    Interrupt,
    Terminate,
    Quit,
    Kill,
    User1,
    User2,
    WindowChange,
    Urgent,
    Alarm,
    Io,
}

impl ProcSignal {
    /// Signals relayed from the supervisor to the child.
    pub const RELAYED: [ProcSignal; 10] = [
        ProcSignal::Hangup,
        ProcSignal::Interrupt,
        ProcSignal::Terminate,
        ProcSignal::Quit,
        ProcSignal::User1,
        ProcSignal::User2,
        ProcSignal::WindowChange,
        ProcSignal::Urgent,
        ProcSignal::Alarm,
        ProcSignal::Io,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProcSignal::Hangup => "SIGHUP",
            ProcSignal::Interrupt => "SIGINT",
            ProcSignal::Terminate => "SIGTERM",
            ProcSignal::Quit => "SIGQUIT",
            ProcSignal::Kill => "SIGKILL",
            ProcSignal::User1 => "SIGUSR1",
            ProcSignal::User2 => "SIGUSR2",
            ProcSignal::WindowChange => "SIGWINCH",
            ProcSignal::Urgent => "SIGURG",
            ProcSignal::Alarm => "SIGALRM",
            ProcSignal::Io => "SIGIO",
        }
    }

    /// "Urgent I/O condition" is raised by async runtimes for preemption; never relayed.
    #[inline]
    pub fn is_noise(&self) -> bool {
        matches!(self, ProcSignal::Urgent)
    }

    /// Signals that end the supervisor itself.
    #[inline]
    pub fn is_interrupt(&self) -> bool {
        matches!(self, ProcSignal::Interrupt | ProcSignal::Terminate)
    }

    #[cfg(unix)]
    pub(crate) fn as_nix(&self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            ProcSignal::Hangup => Signal::SIGHUP,
            ProcSignal::Interrupt => Signal::SIGINT,
            ProcSignal::Terminate => Signal::SIGTERM,
            ProcSignal::Quit => Signal::SIGQUIT,
            ProcSignal::Kill => Signal::SIGKILL,
            ProcSignal::User1 => Signal::SIGUSR1,
            ProcSignal::User2 => Signal::SIGUSR2,
            ProcSignal::WindowChange => Signal::SIGWINCH,
            ProcSignal::Urgent => Signal::SIGURG,
            ProcSignal::Alarm => Signal::SIGALRM,
            ProcSignal::Io => Signal::SIGIO,
        }
    }

    /// Maps a raw signal number (as reported by a terminated child) to its name.
    #[cfg(unix)]
    pub(crate) fn name_of_raw(raw: i32) -> Option<&'static str> {
        nix::sys::signal::Signal::try_from(raw)
            .ok()
            .map(|s| s.as_str())
    }
}

impl fmt::Display for ProcSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProcSignal {
    type Err = String;

    /// Accepts `SIGTERM`, `TERM` or `term`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        let sig = match bare {
            "HUP" => ProcSignal::Hangup,
            "INT" => ProcSignal::Interrupt,
            "TERM" => ProcSignal::Terminate,
            "QUIT" => ProcSignal::Quit,
            "KILL" => ProcSignal::Kill,
            "USR1" => ProcSignal::User1,
            "USR2" => ProcSignal::User2,
            "WINCH" => ProcSignal::WindowChange,
            "URG" => ProcSignal::Urgent,
            "ALRM" => ProcSignal::Alarm,
            "IO" => ProcSignal::Io,
            _ => return Err(format!("unknown signal: {s}")),
        };
        Ok(sig)
    }
}

impl<'de> Deserialize<'de> for ProcSignal {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Sends `sig` to `pid`.
#[cfg(unix)]
pub(crate) fn deliver(pid: u32, sig: ProcSignal) -> Result<(), ProcessError> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| ProcessError::Signal {
        signal: sig.name(),
        pid,
        reason: "pid out of range".into(),
    })?;
    kill(Pid::from_raw(raw), sig.as_nix()).map_err(|e| ProcessError::Signal {
        signal: sig.name(),
        pid,
        reason: e.to_string(),
    })
}

/// Sends `sig` to `pid`.
#[cfg(not(unix))]
pub(crate) fn deliver(_pid: u32, sig: ProcSignal) -> Result<(), ProcessError> {
    Err(ProcessError::Unsupported { signal: sig.name() })
}

/// Turns the supervisor's own signals into controller commands.
pub struct SignalRelay {
    controller: ProcessController,
    log: LogSink,
    grace: Duration,
}

impl SignalRelay {
    pub fn new(controller: ProcessController, log: LogSink, grace: Duration) -> Self {
        Self {
            controller,
            log,
            grace,
        }
    }

    /// Listens until `token` is cancelled (by an interrupt or by the supervisor).
    pub async fn run(self, token: CancellationToken) {
        let mut rx = match subscribe(&token) {
            Ok(rx) => rx,
            Err(e) => {
                self.log
                    .supervisor(format!("signal handling disabled: {e}"))
                    .await;
                return;
            }
        };

        loop {
            let sig = tokio::select! {
                _ = token.cancelled() => return,
                sig = rx.recv() => match sig {
                    Some(sig) => sig,
                    None => return,
                },
            };
            if self.handle(sig).await {
                token.cancel();
                return;
            }
        }
    }

    /// Handles one received signal. Returns `true` when the supervisor must stop.
    pub async fn handle(&self, sig: ProcSignal) -> bool {
        if sig.is_noise() {
            tracing::trace!(signal = sig.name(), "dropped runtime signal");
            return false;
        }

        if sig.is_interrupt() {
            self.log
                .event(&Event::new(EventKind::ShutdownRequested).with_signal(sig.name()))
                .await;
            if self.controller.is_running() {
                if tokio::time::timeout(self.grace, self.controller.shutdown())
                    .await
                    .is_err()
                {
                    tracing::warn!("controller busy; exiting without confirmed kill");
                }
                tokio::time::sleep(self.grace).await;
            }
            return true;
        }

        if !self.controller.is_running() {
            self.log
                .event(&Event::new(EventKind::SignalIgnored).with_signal(sig.name()))
                .await;
            return false;
        }

        if self.controller.forward_signal(sig).await.is_err() {
            tracing::debug!(signal = sig.name(), "controller gone; signal dropped");
        }
        false
    }
}

/// Merges one tokio stream per relayed signal into a single queue.
#[cfg(unix)]
fn subscribe(token: &CancellationToken) -> std::io::Result<mpsc::Receiver<ProcSignal>> {
    use tokio::signal::unix::{SignalKind, signal};

    let (tx, rx) = mpsc::channel(32);
    for sig in ProcSignal::RELAYED {
        let mut stream = signal(SignalKind::from_raw(sig.as_nix() as i32))?;
        let tx = tx.clone();
        let token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    got = stream.recv() => {
                        if got.is_none() || tx.send(sig).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
    Ok(rx)
}

#[cfg(not(unix))]
fn subscribe(token: &CancellationToken) -> std::io::Result<mpsc::Receiver<ProcSignal>> {
    let (tx, rx) = mpsc::channel(1);
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            res = tokio::signal::ctrl_c() => {
                if res.is_ok() {
                    let _ = tx.send(ProcSignal::Interrupt).await;
                }
            }
        }
    });
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::controller::CommandQueue;
    use crate::core::LogMode;
    use crate::logs::LogAggregator;
    use crate::observers::PushHandle;
    use crate::state::{Lifecycle, SharedState};
    use std::sync::Arc;

    #[test]
    fn parses_signal_names() {
        assert_eq!("SIGTERM".parse::<ProcSignal>(), Ok(ProcSignal::Terminate));
        assert_eq!("hup".parse::<ProcSignal>(), Ok(ProcSignal::Hangup));
        assert_eq!(" usr2 ".parse::<ProcSignal>(), Ok(ProcSignal::User2));
        assert!("SIGFOO".parse::<ProcSignal>().is_err());
        assert_eq!(ProcSignal::WindowChange.to_string(), "SIGWINCH");
    }

    #[test]
    fn only_urgent_is_noise() {
        for sig in ProcSignal::RELAYED {
            assert_eq!(sig.is_noise(), sig == ProcSignal::Urgent);
        }
    }

    fn relay() -> (SignalRelay, CommandQueue, Arc<SharedState>) {
        let state = SharedState::new("t", false, 32, PushHandle::new());
        let (log, agg) = LogAggregator::channel(32, LogMode::WebUi, Arc::clone(&state));
        tokio::spawn(agg.run(CancellationToken::new()));
        let (controller, queue) = ProcessController::channel(Arc::clone(&state));
        let relay = SignalRelay::new(controller, log, Duration::from_millis(100));
        (relay, queue, state)
    }

    #[tokio::test]
    async fn urgent_is_dropped_silently() {
        let (relay, mut queue, _state) = relay();
        assert!(!relay.handle(ProcSignal::Urgent).await);
        assert!(queue.try_next().is_none());
    }

    #[tokio::test]
    async fn signal_without_running_child_is_ignored() {
        let (relay, mut queue, _state) = relay();
        assert!(!relay.handle(ProcSignal::Hangup).await);
        assert!(queue.try_next().is_none());
    }

    #[tokio::test]
    async fn interrupt_without_child_stops_supervisor() {
        let (relay, mut queue, _state) = relay();
        assert!(relay.handle(ProcSignal::Terminate).await);
        assert!(queue.try_next().is_none());
    }

    #[tokio::test]
    async fn signal_with_running_child_is_forwarded() {
        let (relay, mut queue, state) = relay();
        state.mutate(|d| d.phase = Lifecycle::Running { pid: 4242 });

        let forwarding = tokio::spawn(async move { relay.handle(ProcSignal::User1).await });
        let cmd = queue.next().await.expect("command");
        assert_eq!(cmd.signal(), Some(ProcSignal::User1));
        assert!(!forwarding.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_with_running_child_sends_shutdown_then_waits() {
        let (relay, mut queue, state) = relay();
        state.mutate(|d| d.phase = Lifecycle::Running { pid: 4242 });

        let start = tokio::time::Instant::now();
        let stopping = tokio::spawn(async move { relay.handle(ProcSignal::Interrupt).await });
        let cmd = queue.next().await.expect("command");
        assert!(cmd.is_shutdown());
        assert!(stopping.await.unwrap());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
