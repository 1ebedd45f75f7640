//! # ProcessController: the child lifecycle state machine.
//!
//! [`ProcessController`] is the cloneable handle everybody else talks to.
//! Commands travel over a bounded queue of capacity 1 and are acknowledged when
//! the controller task **dequeues** them, so `request_restart().await` returns
//! once the restart has been accepted (not once it has finished).
//!
//! ## Architecture
//! ```text
//! HTTP /restart ──┐
//! ConfigWatcher ──┼─► ProcessController ──► [queue(1) + ack] ──► ControllerTask (one)
//! SignalRelay ────┘          ▲                                      │ spawn_child()
//!                            │ on_process_state_change(true)         ▼
//!                            └───────────────────────────── waiter (per child)
//!                                                                   │ ExitNotice
//!                                                                   ▼
//!                                    ControllerTask ─► on_process_state_change(false)
//!                                                      (current generation only)
//! ```
//!
//! ## States
//! `Changing` (initial) → `Running { pid }` on a confirmed spawn. An exit
//! moves back to `Changing`; the controller then either starts again or
//! settles in `Exited { code }`.
//!
//! ## Rules
//! - One command is handled at a time; a command arriving while a restart is
//!   in flight waits in the queue.
//! - Exits caused by the controller itself (restart, shutdown) never trigger
//!   the exit policy.
//! - A spawn failure is recorded as `Exited { code: -1 }` and never retried
//!   automatically.
//! - An exit notice from an earlier attempt never touches shared state.
//! - Cancellation interrupts any wait for a stopping child: the child gets
//!   `SIGKILL` and the controller returns without starting a replacement.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::config::{Config, ProgramSpec};
use super::runner::{self, Attempt, ChildHandle, ExitNotice};
use super::signals::ProcSignal;
use crate::error::ControlError;
use crate::events::{Event, EventKind};
use crate::logs::LogSink;
use crate::policies::{ExitPolicy, FailureTracker, RestartBackoff, RetryDecision};
use crate::state::{Lifecycle, SPAWN_FAILED_EXIT_CODE, SharedState};

/// Upper bound on waiting for a `SIGKILL`ed child to be reaped.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Who asked for a restart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartOrigin {
    /// Operator (HTTP endpoint or API call).
    Manual,
    /// A watched configuration file changed.
    ConfigChange,
}

impl RestartOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartOrigin::Manual => "manual",
            RestartOrigin::ConfigChange => "config change",
        }
    }
}

#[derive(Debug)]
pub(crate) enum Command {
    Restart(RestartOrigin),
    Signal(ProcSignal),
    Shutdown,
}

#[cfg(test)]
impl Command {
    pub(crate) fn signal(&self) -> Option<ProcSignal> {
        match self {
            Command::Signal(sig) => Some(*sig),
            _ => None,
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        matches!(self, Command::Shutdown)
    }

    pub(crate) fn restart_origin(&self) -> Option<RestartOrigin> {
        match self {
            Command::Restart(origin) => Some(*origin),
            _ => None,
        }
    }
}

struct Envelope {
    cmd: Command,
    ack: oneshot::Sender<()>,
}

/// Receiving side of the command queue; acknowledges on dequeue.
pub(crate) struct CommandQueue {
    rx: mpsc::Receiver<Envelope>,
}

impl CommandQueue {
    pub(crate) async fn next(&mut self) -> Option<Command> {
        let env = self.rx.recv().await?;
        let _ = env.ack.send(());
        Some(env.cmd)
    }

    #[cfg(test)]
    pub(crate) fn try_next(&mut self) -> Option<Command> {
        let env = self.rx.try_recv().ok()?;
        let _ = env.ack.send(());
        Some(env.cmd)
    }
}

/// Cloneable handle to the controller task.
#[derive(Clone)]
pub struct ProcessController {
    tx: mpsc::Sender<Envelope>,
    state: Arc<SharedState>,
}

impl ProcessController {
    /// Creates a handle and the queue the controller task will consume.
    pub(crate) fn channel(state: Arc<SharedState>) -> (Self, CommandQueue) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx, state }, CommandQueue { rx })
    }

    /// Asks for a restart; resolves once the controller has accepted it.
    pub async fn request_restart(&self) -> Result<(), ControlError> {
        self.submit(Command::Restart(RestartOrigin::Manual)).await
    }

    /// Restart on behalf of an internal component.
    pub async fn restart_for(&self, origin: RestartOrigin) -> Result<(), ControlError> {
        self.submit(Command::Restart(origin)).await
    }

    /// Queues `sig` for the child. Dropped (and logged) if no child is running.
    pub async fn forward_signal(&self, sig: ProcSignal) -> Result<(), ControlError> {
        self.submit(Command::Signal(sig)).await
    }

    /// Kills the child and stops the controller loop.
    pub async fn shutdown(&self) -> Result<(), ControlError> {
        self.submit(Command::Shutdown).await
    }

    /// Records a confirmed start (`value` = pid) or exit (`value` = exit code).
    ///
    /// Updates the process record and the lifecycle phase under one lock,
    /// then requests a broadcast. A start without a valid pid is ignored.
    pub fn on_process_state_change(&self, running: bool, value: i64) {
        let applied = self.state.mutate_if(|d| {
            if !d.process.apply(running, value) {
                return false;
            }
            d.phase = if running {
                Lifecycle::Running { pid: d.process.pid }
            } else {
                Lifecycle::Changing
            };
            true
        });
        if !applied {
            tracing::warn!(value, "ignoring start report without a valid pid");
        }
    }

    /// True if a child is confirmed running.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn phase(&self) -> Lifecycle {
        self.state.phase()
    }

    async fn submit(&self, cmd: Command) -> Result<(), ControlError> {
        let (ack, accepted) = oneshot::channel();
        self.tx
            .send(Envelope { cmd, ack })
            .await
            .map_err(|_| ControlError::Closed)?;
        accepted.await.map_err(|_| ControlError::Closed)
    }
}

/// How the controller loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Shutdown command or cancellation.
    Stopped,
    /// The child exited under [`ExitPolicy::Proxy`].
    ChildExited(i32),
}

/// Result of waiting for the current child to exit.
enum Wait {
    Exited(Option<ExitNotice>),
    TimedOut,
    Cancelled,
}

/// The single task that owns the child lifecycle.
pub(crate) struct ControllerTask {
    spec: ProgramSpec,
    on_exit: ExitPolicy,
    backoff: RestartBackoff,
    stop_signal: ProcSignal,
    stop_grace: Option<Duration>,

    state: Arc<SharedState>,
    log: LogSink,
    handle: ProcessController,
    queue: CommandQueue,
    exits_tx: mpsc::UnboundedSender<ExitNotice>,
    exits_rx: mpsc::UnboundedReceiver<ExitNotice>,
    token: CancellationToken,

    child: Option<ChildHandle>,
    tracker: FailureTracker,
    generation: u64,
    resume_at: Option<Instant>,
}

impl ControllerTask {
    pub(crate) fn new(cfg: &Config, log: LogSink, handle: ProcessController, queue: CommandQueue) -> Self {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            spec: cfg.program.clone(),
            on_exit: cfg.on_exit,
            backoff: cfg.backoff,
            stop_signal: cfg.stop_signal,
            stop_grace: cfg.stop_grace(),
            state: Arc::clone(&handle.state),
            log,
            handle,
            queue,
            exits_tx,
            exits_rx,
            token: CancellationToken::new(),
            child: None,
            tracker: FailureTracker::default(),
            generation: 0,
            resume_at: None,
        }
    }

    /// Starts the child, then serves commands and exits until stopped.
    pub(crate) async fn run(mut self, token: CancellationToken) -> Outcome {
        self.token = token.clone();
        self.start().await;

        loop {
            let resume_at = self.resume_at;
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.abandon();
                    return Outcome::Stopped;
                }
                cmd = self.queue.next() => match cmd {
                    Some(Command::Restart(origin)) => {
                        self.restart(origin).await;
                        if token.is_cancelled() {
                            return Outcome::Stopped;
                        }
                    }
                    Some(Command::Signal(sig)) => self.forward(sig).await,
                    Some(Command::Shutdown) => {
                        self.shutdown().await;
                        return Outcome::Stopped;
                    }
                    None => {
                        self.abandon();
                        return Outcome::Stopped;
                    }
                },
                Some(notice) = self.exits_rx.recv() => {
                    if let Some(code) = self.on_exit(notice).await {
                        return Outcome::ChildExited(code);
                    }
                }
                _ = time::sleep_until(resume_at.unwrap_or_else(Instant::now)), if resume_at.is_some() => {
                    self.resume_at = None;
                    self.start().await;
                }
            }
        }
    }

    async fn start(&mut self) {
        self.generation += 1;
        self.set_phase(Lifecycle::Changing);
        self.log
            .event(&Event::new(EventKind::ProcessStarting).with_reason(self.spec.command_line()))
            .await;

        let attempt = Attempt {
            generation: self.generation,
            log: self.log.clone(),
            controller: self.handle.clone(),
            exits: self.exits_tx.clone(),
        };
        match runner::spawn_child(&self.spec, attempt) {
            Ok(child) => {
                self.log
                    .event(&Event::new(EventKind::ProcessStarted).with_pid(child.pid))
                    .await;
                self.child = Some(child);
            }
            Err(e) => {
                self.log
                    .event(&Event::new(EventKind::SpawnFailed).with_reason(e.as_message()))
                    .await;
                self.handle
                    .on_process_state_change(false, i64::from(SPAWN_FAILED_EXIT_CODE));
                self.set_phase(Lifecycle::Exited {
                    code: SPAWN_FAILED_EXIT_CODE,
                });
            }
        }
    }

    async fn restart(&mut self, origin: RestartOrigin) {
        self.resume_at = None;
        self.tracker.reset();
        self.log
            .event(&Event::new(EventKind::RestartRequested).with_reason(origin.as_str()))
            .await;
        self.set_phase(Lifecycle::Changing);

        if let Some(child) = self.child.take() {
            self.stop(child).await;
        }
        if self.token.is_cancelled() {
            return;
        }
        self.start().await;
    }

    /// Stop signal, bounded wait, then `SIGKILL`.
    async fn stop(&mut self, child: ChildHandle) {
        if let Some(grace) = self.stop_grace.filter(|_| self.stop_signal != ProcSignal::Kill) {
            child.signal(self.stop_signal);
            match self.wait_bounded(child.generation, grace).await {
                Wait::Exited(notice) => {
                    self.report_exit(notice).await;
                    return;
                }
                Wait::Cancelled => {
                    child.signal(ProcSignal::Kill);
                    return;
                }
                Wait::TimedOut => {}
            }
            self.log
                .event(
                    &Event::new(EventKind::StopTimeout)
                        .with_pid(child.pid)
                        .with_delay(grace),
                )
                .await;
        }
        self.kill(child).await;
    }

    async fn kill(&mut self, child: ChildHandle) -> Option<i32> {
        child.signal(ProcSignal::Kill);
        match self.wait_bounded(child.generation, KILL_WAIT).await {
            Wait::Exited(notice) => {
                let code = notice.as_ref().map(|n| n.code);
                self.report_exit(notice).await;
                code
            }
            Wait::TimedOut => {
                tracing::error!(pid = child.pid, "child not reaped after SIGKILL");
                None
            }
            Wait::Cancelled => None,
        }
    }

    async fn shutdown(&mut self) {
        self.resume_at = None;
        if let Some(child) = self.child.take() {
            if let Some(code) = self.kill(child).await {
                self.set_phase(Lifecycle::Exited { code });
            }
        }
    }

    /// Cancellation path: no waiting, the runtime is going away.
    fn abandon(&mut self) {
        if let Some(child) = self.child.take() {
            child.signal(ProcSignal::Kill);
        }
    }

    async fn forward(&mut self, sig: ProcSignal) {
        let ev = match &self.child {
            Some(child) if self.state.is_running() && child.signal(sig) => {
                Event::new(EventKind::SignalForwarded)
                    .with_signal(sig.name())
                    .with_pid(child.pid)
            }
            _ => Event::new(EventKind::SignalIgnored).with_signal(sig.name()),
        };
        self.log.event(&ev).await;
    }

    /// Unexpected exit. Returns the code when the supervisor must end (proxy policy).
    async fn on_exit(&mut self, notice: ExitNotice) -> Option<i32> {
        let generation = notice.generation;
        let Some(child) = self.child.take_if(|c| c.generation == generation) else {
            tracing::debug!(generation, "stale exit notice");
            return None;
        };
        let code = notice.code;
        let uptime = child.started.elapsed();
        self.report_exit(Some(notice)).await;

        match self.on_exit {
            ExitPolicy::Proxy | ExitPolicy::Ignore => {
                self.set_phase(Lifecycle::Exited { code });
                self.on_exit.ends_supervisor().then_some(code)
            }
            ExitPolicy::Restart => {
                match self.tracker.on_exit(&self.backoff, uptime) {
                    RetryDecision::Now => {
                        self.log
                            .event(&Event::new(EventKind::RestartRequested).with_reason("exit policy"))
                            .await;
                        self.start().await;
                    }
                    RetryDecision::After { delay, attempt } => {
                        self.log
                            .event(
                                &Event::new(EventKind::BackoffScheduled)
                                    .with_delay(delay)
                                    .with_attempt(attempt),
                            )
                            .await;
                        self.resume_at = Some(Instant::now() + delay);
                    }
                    RetryDecision::GiveUp { attempts } => {
                        self.log
                            .event(&Event::new(EventKind::RestartsExhausted).with_attempt(attempts))
                            .await;
                        self.set_phase(Lifecycle::Exited { code });
                    }
                }
                None
            }
        }
    }

    async fn wait_exit(&mut self, generation: u64) -> Option<ExitNotice> {
        while let Some(notice) = self.exits_rx.recv().await {
            if notice.generation == generation {
                return Some(notice);
            }
            tracing::debug!(generation = notice.generation, "stale exit notice");
        }
        None
    }

    /// [`wait_exit`](Self::wait_exit) bounded by `limit` and by cancellation.
    async fn wait_bounded(&mut self, generation: u64, limit: Duration) -> Wait {
        let token = self.token.clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => Wait::Cancelled,
            res = time::timeout(limit, self.wait_exit(generation)) => match res {
                Ok(notice) => Wait::Exited(notice),
                Err(_) => Wait::TimedOut,
            },
        }
    }

    /// Applies and logs the exit of the current child.
    async fn report_exit(&self, notice: Option<ExitNotice>) {
        let Some(notice) = notice else { return };
        self.handle
            .on_process_state_change(false, i64::from(notice.code));
        let mut ev = Event::new(EventKind::ProcessExited)
            .with_pid(notice.pid)
            .with_exit_code(notice.code);
        if let Some(sig) = notice.signal {
            ev = ev.with_signal(sig);
        }
        self.log.event(&ev).await;
    }

    fn set_phase(&self, phase: Lifecycle) {
        self.state.mutate_if(|d| {
            if d.phase == phase {
                return false;
            }
            d.phase = phase;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::PushHandle;

    fn handle() -> (ProcessController, CommandQueue, Arc<SharedState>) {
        let state = SharedState::new("t", false, 16, PushHandle::new());
        let (ctl, queue) = ProcessController::channel(Arc::clone(&state));
        (ctl, queue, state)
    }

    #[test]
    fn state_change_updates_record_and_phase() {
        let (ctl, _queue, state) = handle();

        let before = state.read(|d| d.process.changed_at);
        ctl.on_process_state_change(true, 42);
        let rec = state.read(|d| d.process.clone());
        assert!(rec.running);
        assert_eq!(rec.pid, 42);
        assert_eq!(rec.exit_code, 0);
        assert!(rec.changed_at >= before);
        assert_eq!(ctl.phase(), Lifecycle::Running { pid: 42 });
        assert!(ctl.is_running());

        let mid = rec.changed_at;
        ctl.on_process_state_change(false, 7);
        let rec = state.read(|d| d.process.clone());
        assert!(!rec.running);
        assert_eq!(rec.pid, 0);
        assert_eq!(rec.exit_code, 7);
        assert!(rec.changed_at >= mid);
        assert_eq!(ctl.phase(), Lifecycle::Changing);

        assert_eq!(state.revision(), 2);
        assert_eq!(state.push_handle().requests(), 2);
    }

    #[test]
    fn start_report_without_pid_is_ignored() {
        let (ctl, _queue, state) = handle();
        ctl.on_process_state_change(true, 0);
        ctl.on_process_state_change(true, -3);

        assert_eq!(state.revision(), 0);
        assert_eq!(state.push_handle().requests(), 0);
        assert!(!ctl.is_running());
        assert_eq!(ctl.phase(), Lifecycle::Changing);
    }

    #[tokio::test]
    async fn restart_request_resolves_on_dequeue() {
        let (ctl, mut queue, _state) = handle();
        let requester = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.request_restart().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!requester.is_finished(), "must wait for the controller");

        let cmd = queue.next().await.expect("command");
        assert_eq!(cmd.restart_origin(), Some(RestartOrigin::Manual));
        assert_eq!(requester.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn closed_queue_reports_closed() {
        let (ctl, queue, _state) = handle();
        drop(queue);
        assert_eq!(ctl.request_restart().await, Err(ControlError::Closed));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::core::LogMode;
        use crate::logs::LogAggregator;
        use crate::state::StateData;
        use tokio::task::JoinHandle;

        struct Rig {
            ctl: ProcessController,
            state: Arc<SharedState>,
            token: CancellationToken,
            task: JoinHandle<Outcome>,
            exits: mpsc::UnboundedSender<ExitNotice>,
        }

        fn launch(cfg: Config) -> Rig {
            let state = SharedState::new("t", cfg.manual(), 256, PushHandle::new());
            let (log, agg) = LogAggregator::channel(256, LogMode::WebUi, Arc::clone(&state));
            tokio::spawn(agg.run(CancellationToken::new()));
            let (ctl, queue) = ProcessController::channel(Arc::clone(&state));
            let token = CancellationToken::new();
            let task = ControllerTask::new(&cfg, log, ctl.clone(), queue);
            let exits = task.exits_tx.clone();
            let task = tokio::spawn(task.run(token.clone()));
            Rig {
                ctl,
                state,
                token,
                task,
                exits,
            }
        }

        fn sh(script: &str) -> ProgramSpec {
            ProgramSpec::new("sh", ["-c", script])
        }

        fn healthy_immediately() -> RestartBackoff {
            RestartBackoff {
                healthy_after: Duration::ZERO,
                ..RestartBackoff::default()
            }
        }

        fn starts(d: &StateData) -> usize {
            d.log
                .iter()
                .filter(|e| e.text.starts_with("starting program:"))
                .count()
        }

        async fn until(state: &SharedState, f: impl Fn(&StateData) -> bool) {
            time::timeout(Duration::from_secs(10), async {
                while !state.read(&f) {
                    time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("condition not reached in time");
        }

        #[tokio::test]
        async fn unexpected_exit_restarts_exactly_once() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("ran");
            let script = format!(
                "if [ -e '{m}' ]; then exec sleep 30; else touch '{m}'; exit 1; fi",
                m = marker.display()
            );
            let rig = launch(Config {
                backoff: healthy_immediately(),
                ..Config::new(sh(&script))
            });

            until(&rig.state, |d| starts(d) == 2 && d.phase.is_running()).await;
            time::sleep(Duration::from_millis(200)).await;
            rig.state.read(|d| {
                assert_eq!(starts(d), 2);
                assert!(d.phase.is_running());
            });
            rig.token.cancel();
            assert_eq!(rig.task.await.unwrap(), Outcome::Stopped);
        }

        #[tokio::test]
        async fn manual_mode_stays_exited() {
            let rig = launch(Config {
                on_exit: ExitPolicy::Ignore,
                ..Config::new(sh("exit 4"))
            });

            until(&rig.state, |d| d.phase == Lifecycle::Exited { code: 4 }).await;
            time::sleep(Duration::from_millis(200)).await;
            rig.state.read(|d| {
                assert!(d.manual);
                assert_eq!(starts(d), 1);
                assert_eq!(d.process.exit_code, 4);
            });

            rig.ctl.request_restart().await.unwrap();
            until(&rig.state, |d| starts(d) == 2).await;
            rig.token.cancel();
        }

        #[tokio::test]
        async fn proxy_mode_ends_with_child_code() {
            let rig = launch(Config {
                on_exit: ExitPolicy::Proxy,
                ..Config::new(sh("exit 5"))
            });
            assert_eq!(rig.task.await.unwrap(), Outcome::ChildExited(5));
        }

        #[tokio::test]
        async fn restart_replaces_running_child() {
            let rig = launch(Config::new(ProgramSpec::new("sleep", ["30"])));
            until(&rig.state, |d| d.phase.is_running()).await;
            let first = rig.state.read(|d| d.process.pid);

            rig.ctl.request_restart().await.unwrap();
            until(&rig.state, |d| d.phase.is_running() && d.process.pid != first).await;
            rig.state.read(|d| {
                assert_eq!(starts(d), 2);
                assert!(d.log.iter().any(|e| e.text == format!("process {first} killed by SIGTERM")));
            });
            rig.token.cancel();
        }

        #[tokio::test]
        async fn stubborn_child_is_killed_after_timeout() {
            let rig = launch(Config {
                restart_timeout: Duration::from_millis(200),
                ..Config::new(sh("trap '' TERM; exec sleep 30"))
            });
            until(&rig.state, |d| d.phase.is_running()).await;

            rig.ctl.request_restart().await.unwrap();
            until(&rig.state, |d| starts(d) == 2 && d.phase.is_running()).await;
            rig.state.read(|d| {
                assert!(d.log.iter().any(|e| e.text.ends_with("sending SIGKILL")));
            });
            rig.token.cancel();
        }

        #[tokio::test]
        async fn spawn_failure_is_recorded_and_not_retried() {
            let rig = launch(Config::new(ProgramSpec::new(
                "/definitely/not/here",
                Vec::<String>::new(),
            )));
            until(&rig.state, |d| d.phase == Lifecycle::Exited { code: -1 }).await;
            time::sleep(Duration::from_millis(200)).await;
            rig.state.read(|d| {
                assert_eq!(d.process.exit_code, SPAWN_FAILED_EXIT_CODE);
                assert!(!d.process.running);
                assert_eq!(starts(d), 1);
            });
            rig.token.cancel();
        }

        #[tokio::test]
        async fn manual_restart_cancels_pending_backoff() {
            let rig = launch(Config {
                backoff: RestartBackoff {
                    first: Duration::from_secs(60),
                    max: Duration::from_secs(60),
                    ..RestartBackoff::default()
                },
                ..Config::new(sh("exit 1"))
            });
            until(&rig.state, |d| d.log.iter().any(|e| e.text.starts_with("restarting in 60000ms"))).await;

            rig.ctl.request_restart().await.unwrap();
            until(&rig.state, |d| starts(d) == 2).await;
            rig.token.cancel();
        }

        #[tokio::test]
        async fn cancel_during_restart_kills_without_waiting() {
            let rig = launch(Config {
                restart_timeout: Duration::from_secs(5),
                ..Config::new(sh("trap '' TERM; exec sleep 30"))
            });
            until(&rig.state, |d| d.phase.is_running()).await;

            rig.ctl.request_restart().await.unwrap();
            time::sleep(Duration::from_millis(200)).await;
            rig.token.cancel();

            let outcome = time::timeout(Duration::from_secs(1), rig.task)
                .await
                .expect("controller must not wait out the stop timeout");
            assert_eq!(outcome.unwrap(), Outcome::Stopped);
            rig.state.read(|d| {
                assert_eq!(starts(d), 1);
                assert!(!d.log.iter().any(|e| e.text.ends_with("sending SIGKILL")));
            });
        }

        #[tokio::test]
        async fn late_exit_of_previous_attempt_is_ignored() {
            let rig = launch(Config::new(ProgramSpec::new("sleep", ["30"])));
            until(&rig.state, |d| d.phase.is_running()).await;
            let before = rig.state.read(|d| d.process.clone());

            rig.exits
                .send(ExitNotice {
                    generation: 0,
                    pid: before.pid + 1,
                    code: 3,
                    signal: None,
                })
                .unwrap();
            time::sleep(Duration::from_millis(200)).await;

            rig.state.read(|d| {
                assert_eq!(d.process, before);
                assert_eq!(d.phase, Lifecycle::Running { pid: before.pid });
                assert_eq!(starts(d), 1);
            });
            rig.token.cancel();
        }

        #[tokio::test]
        async fn shutdown_kills_child_and_stops() {
            let rig = launch(Config::new(ProgramSpec::new("sleep", ["30"])));
            until(&rig.state, |d| d.phase.is_running()).await;

            rig.ctl.shutdown().await.unwrap();
            assert_eq!(rig.task.await.unwrap(), Outcome::Stopped);
            assert_eq!(rig.state.phase(), Lifecycle::Exited { code: -9 });
            assert_eq!(rig.ctl.request_restart().await, Err(ControlError::Closed));
        }
    }
}
