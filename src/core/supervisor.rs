//! # Supervisor: wires the core tasks together and runs them.
//!
//! The [`Supervisor`] owns the configuration, the shared state and the parts
//! that only exist once (log intake consumer, controller queue). A cloneable
//! [`SupervisorHandle`] gives transports access to state, observers and the
//! controller.
//!
//! ## High-level architecture
//! ```text
//! Supervisor::run():
//!   validate config                      (fatal errors surface here, nothing started yet)
//!   register builder observers           (one worker each)
//!   spawn LogAggregator                  (own token: drains last)
//!   spawn StateBroadcaster               ─┐
//!   spawn SignalRelay                     ├─ runtime token
//!   ConfigWatcher::load(), spawn run()    │
//!   spawn ControllerTask ─────────────────┘
//!
//! Termination:
//!   SignalRelay interrupt ──► token.cancel() ──► controller ends (Stopped)
//!   ControllerTask ends (Shutdown / proxy exit) ──► token.cancel()
//!   then: join tasks ─► drain log intake ─► observers.shutdown()
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use procvisor::{Config, ProgramSpec, Supervisor};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config::new(ProgramSpec::new("my-server", ["--port", "9000"]));
//!     let sup = Supervisor::builder(cfg).build();
//!
//!     let handle = sup.handle();
//!     tokio::spawn(async move {
//!         let (_id, mut rx) = handle.subscribe("printer");
//!         while let Some(snap) = rx.recv().await {
//!             println!("revision {} running={}", snap.revision, snap.process.running);
//!         }
//!     });
//!
//!     let code = sup.run().await?;
//!     std::process::exit(code);
//! }
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::controller::{CommandQueue, ControllerTask, Outcome, ProcessController};
use super::{Config, ConfigWatcher, SignalRelay, SupervisorBuilder};
use crate::error::RuntimeError;
use crate::logs::{LogAggregator, LogSink};
use crate::observers::{Observe, ObserverId, ObserverSet, SnapshotReceiver, StateBroadcaster};
use crate::state::{SharedState, Snapshot};

/// Cloneable access to a (possibly running) supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    state: Arc<SharedState>,
    observers: Arc<ObserverSet>,
    controller: ProcessController,
    log: LogSink,
    token: CancellationToken,
}

impl SupervisorHandle {
    pub fn controller(&self) -> &ProcessController {
        &self.controller
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn observers(&self) -> &Arc<ObserverSet> {
        &self.observers
    }

    /// Producer handle for the log window.
    pub fn log(&self) -> &LogSink {
        &self.log
    }

    /// Current state, taken under the lock.
    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    /// Registers a raw subscription primed with the current snapshot.
    ///
    /// A broadcast racing the registration cannot be overtaken by the priming
    /// snapshot: the slot only ever moves to newer revisions.
    pub fn subscribe(&self, name: impl Into<Cow<'static, str>>) -> (ObserverId, SnapshotReceiver) {
        let (id, rx) = self.observers.subscribe(name);
        self.observers.send_to(id, &self.state.snapshot());
        (id, rx)
    }

    /// Registers an [`Observe`] implementation.
    pub fn register(&self, observer: Arc<dyn Observe>) -> ObserverId {
        self.observers.register(observer)
    }

    pub fn unregister(&self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }

    /// Stops the supervisor (the child is killed).
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Resolves once the supervisor is stopping.
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }
}

/// Supervises one child process and publishes its state.
pub struct Supervisor {
    cfg: Config,
    handle: SupervisorHandle,
    pending: Vec<Arc<dyn Observe>>,
    aggregator: LogAggregator,
    queue: CommandQueue,
}

impl Supervisor {
    /// Creates a builder for the given configuration.
    pub fn builder(cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_internal(
        cfg: Config,
        state: Arc<SharedState>,
        observers: Arc<ObserverSet>,
        pending: Vec<Arc<dyn Observe>>,
        log: LogSink,
        aggregator: LogAggregator,
        controller: ProcessController,
        queue: CommandQueue,
        token: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            handle: SupervisorHandle {
                state,
                observers,
                controller,
                log,
                token,
            },
            pending,
            aggregator,
            queue,
        }
    }

    /// Returns a cloneable handle (usable before and during [`run`](Self::run)).
    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Checks the configuration without starting anything.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.cfg.program.program.trim().is_empty() {
            return Err(RuntimeError::Settings {
                reason: "no program to run".into(),
            });
        }
        Ok(())
    }

    /// Runs until interrupted, stopped through the handle, or, under the
    /// proxy exit policy, until the child exits.
    ///
    /// Returns the exit code the supervisor process should use: the child's
    /// code under the proxy policy, `0` otherwise.
    pub async fn run(self) -> Result<i32, RuntimeError> {
        self.validate()?;
        let Self {
            cfg,
            handle,
            pending,
            aggregator,
            queue,
        } = self;
        let token = handle.token.clone();
        tracing::info!(
            program = %cfg.program.command_line(),
            on_exit = cfg.on_exit.as_str(),
            "supervisor starting"
        );

        for observer in pending {
            handle.observers.register(observer);
        }

        let log_token = CancellationToken::new();
        let log_task = tokio::spawn(aggregator.run(log_token.clone()));

        let mut set = JoinSet::new();
        set.spawn(
            StateBroadcaster::new(
                Arc::clone(&handle.state),
                Arc::clone(&handle.observers),
                cfg.throttle,
            )
            .run(token.clone()),
        );
        set.spawn(
            SignalRelay::new(handle.controller.clone(), handle.log.clone(), cfg.signal_grace)
                .run(token.clone()),
        );

        let watcher = ConfigWatcher::new(
            &cfg,
            Arc::clone(&handle.state),
            handle.log.clone(),
            handle.controller.clone(),
        );
        watcher.load().await;
        set.spawn(watcher.run(token.clone()));

        let controller = ControllerTask::new(&cfg, handle.log.clone(), handle.controller.clone(), queue);
        let outcome = match tokio::spawn(controller.run(token.clone())).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "controller task failed");
                Outcome::Stopped
            }
        };

        token.cancel();
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "supervisor task failed");
            }
        }

        let code = match outcome {
            Outcome::ChildExited(code) => {
                handle
                    .log
                    .supervisor(format!("child exited with code {code}, exiting"))
                    .await;
                code
            }
            Outcome::Stopped => 0,
        };

        drop(handle.log);
        log_token.cancel();
        if let Err(e) = log_task.await {
            tracing::error!(error = %e, "log aggregator failed");
        }
        handle.observers.shutdown().await;

        Ok(code)
    }
}
