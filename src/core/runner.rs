//! # Run one child attempt.
//!
//! Spawns the program described by a [`ProgramSpec`], pumps its output into
//! the [`LogSink`] line by line and waits for it to exit.
//!
//! ## Task layout per attempt
//!
//! ```text
//! spawn_child()
//!   ├─► on_process_state_change(true, pid)
//!   ├─► pump(stdout) ─► LogSink::child(Stdout, line)
//!   ├─► pump(stderr) ─► LogSink::child(Stderr, line)
//!   └─► waiter (owns the Child)
//!         ├─ ProcSignal from ChildHandle ─► deliver (Kill → start_kill)
//!         └─ exit ─► drain pumps ─► ExitNotice { generation, code } to the controller
//! ```
//!
//! ## Rules
//! - Exactly **one** start and **one** exit report per successful spawn.
//! - The waiter never writes shared state. The controller applies an exit only
//!   when the notice belongs to its current attempt.
//! - Output lines are flushed before the exit is reported (bounded wait:
//!   grandchildren may keep the pipes open).
//! - Exit codes: the process code, or `-signum` when killed by a signal.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use super::config::ProgramSpec;
use super::controller::ProcessController;
use super::signals::{self, ProcSignal};
use crate::error::ProcessError;
use crate::events::{Event, EventKind};
use crate::logs::{ChildStream, LogSink};

const PUMP_DRAIN: Duration = Duration::from_secs(1);

/// Reported by the waiter once the child is gone.
#[derive(Debug, Clone)]
pub(crate) struct ExitNotice {
    pub(crate) generation: u64,
    pub(crate) pid: u32,
    pub(crate) code: i32,
    pub(crate) signal: Option<&'static str>,
}

/// Controller-side view of a live child.
#[derive(Debug)]
pub(crate) struct ChildHandle {
    pub(crate) pid: u32,
    pub(crate) generation: u64,
    pub(crate) started: Instant,
    signals: mpsc::UnboundedSender<ProcSignal>,
}

impl ChildHandle {
    /// Queues `sig` for the waiter. `false` once the child has been reaped.
    pub(crate) fn signal(&self, sig: ProcSignal) -> bool {
        self.signals.send(sig).is_ok()
    }
}

/// Everything a spawned attempt reports to.
pub(crate) struct Attempt {
    pub(crate) generation: u64,
    pub(crate) log: LogSink,
    pub(crate) controller: ProcessController,
    pub(crate) exits: mpsc::UnboundedSender<ExitNotice>,
}

/// Spawns the child and its helper tasks.
pub(crate) fn spawn_child(spec: &ProgramSpec, attempt: Attempt) -> Result<ChildHandle, ProcessError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    let Some(pid) = child.id() else {
        return Err(ProcessError::NoPid {
            program: spec.program.clone(),
        });
    };
    attempt.controller.on_process_state_change(true, i64::from(pid));

    let mut pumps = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(out, ChildStream::Stdout, attempt.log.clone())));
    }
    if let Some(err) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(err, ChildStream::Stderr, attempt.log.clone())));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let generation = attempt.generation;
    tokio::spawn(wait(child, pid, rx, pumps, attempt));

    Ok(ChildHandle {
        pid,
        generation,
        started: Instant::now(),
        signals: tx,
    })
}

/// Forwards one output stream line by line. Non-UTF-8 bytes are replaced.
async fn pump<R>(reader: R, stream: ChildStream, log: LogSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                log.child(stream, String::from_utf8_lossy(&buf).into_owned())
                    .await;
            }
            Err(e) => {
                tracing::debug!(?stream, error = %e, "child output closed");
                break;
            }
        }
    }
}

/// Owns the child until it exits.
async fn wait(
    mut child: Child,
    pid: u32,
    mut signals: mpsc::UnboundedReceiver<ProcSignal>,
    pumps: Vec<JoinHandle<()>>,
    attempt: Attempt,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(sig) = signals.recv() => {
                if let Err(e) = send(&mut child, pid, sig) {
                    attempt
                        .log
                        .event(
                            &Event::new(EventKind::SignalFailed)
                                .with_signal(sig.name())
                                .with_reason(e.as_message()),
                        )
                        .await;
                }
            }
        }
    };
    drop(signals);

    for p in pumps {
        if time::timeout(PUMP_DRAIN, p).await.is_err() {
            tracing::debug!(pid, "output pump still open after exit");
        }
    }

    let (code, signal) = match status {
        Ok(status) => exit_code(status),
        Err(e) => {
            tracing::warn!(pid, error = %e, "failed to wait for child");
            (-1, None)
        }
    };
    let _ = attempt.exits.send(ExitNotice {
        generation: attempt.generation,
        pid,
        code,
        signal,
    });
}

fn send(child: &mut Child, pid: u32, sig: ProcSignal) -> Result<(), ProcessError> {
    if sig == ProcSignal::Kill {
        return child.start_kill().map_err(|e| ProcessError::Signal {
            signal: sig.name(),
            pid,
            reason: e.to_string(),
        });
    }
    signals::deliver(pid, sig)
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> (i32, Option<&'static str>) {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => (code, None),
        (None, Some(raw)) => (-raw, ProcSignal::name_of_raw(raw)),
        (None, None) => (-1, None),
    }
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> (i32, Option<&'static str>) {
    (status.code().unwrap_or(-1), None)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::LogMode;
    use crate::logs::LogAggregator;
    use crate::observers::PushHandle;
    use crate::state::{LogSource, SharedState};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct Rig {
        state: Arc<SharedState>,
        attempt: Attempt,
        exits: mpsc::UnboundedReceiver<ExitNotice>,
        _queue: crate::core::controller::CommandQueue,
    }

    fn rig() -> Rig {
        let state = SharedState::new("t", false, 64, PushHandle::new());
        let (log, agg) = LogAggregator::channel(64, LogMode::WebUi, Arc::clone(&state));
        tokio::spawn(agg.run(CancellationToken::new()));
        let (controller, queue) = ProcessController::channel(Arc::clone(&state));
        let (tx, rx) = mpsc::unbounded_channel();
        Rig {
            state,
            attempt: Attempt {
                generation: 7,
                log,
                controller,
                exits: tx,
            },
            exits: rx,
            _queue: queue,
        }
    }

    #[tokio::test]
    async fn output_is_logged_before_exit_is_reported() {
        let mut rig = rig();
        let spec = ProgramSpec::new("sh", ["-c", "echo out; echo err >&2; exit 3"]);
        let child = spawn_child(&spec, rig.attempt).expect("spawn");
        assert!(child.pid > 0);

        let notice = rig.exits.recv().await.expect("exit notice");
        assert_eq!(notice.generation, 7);
        assert_eq!(notice.code, 3);
        assert_eq!(notice.pid, child.pid);

        // Applying the exit is up to the controller.
        let record = rig.state.read(|d| d.process.clone());
        assert!(record.running);
        assert_eq!(record.pid, child.pid);

        tokio::time::sleep(Duration::from_millis(50)).await;
        rig.state.read(|d| {
            let mut lines: Vec<&str> = d
                .log
                .iter()
                .filter(|e| e.source == LogSource::Child)
                .map(|e| e.text.as_str())
                .collect();
            lines.sort_unstable();
            assert_eq!(lines, ["err", "out"]);
        });
    }

    #[tokio::test]
    async fn kill_reports_negative_signal_code() {
        let mut rig = rig();
        let spec = ProgramSpec::new("sleep", ["30"]);
        let child = spawn_child(&spec, rig.attempt).expect("spawn");
        assert!(rig.state.read(|d| d.process.running));

        assert!(child.signal(ProcSignal::Kill));
        let notice = rig.exits.recv().await.expect("exit notice");
        assert_eq!(notice.code, -9);
        assert_eq!(notice.signal, Some("SIGKILL"));
        assert!(!child.signal(ProcSignal::Hangup));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let rig = rig();
        let spec = ProgramSpec::new("/definitely/not/here", Vec::<String>::new());
        let err = spawn_child(&spec, rig.attempt).unwrap_err();
        assert_eq!(err.as_label(), "process_spawn");
    }
}
