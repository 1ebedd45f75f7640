use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{Config, ProcessController, supervisor::Supervisor};
use crate::{
    logs::LogAggregator,
    observers::{Observe, ObserverSet, PushHandle},
    state::SharedState,
};

/// Builder for constructing a [`Supervisor`].
pub struct SupervisorBuilder {
    cfg: Config,
    observers: Vec<Arc<dyn Observe>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            observers: Vec::new(),
        }
    }

    /// Sets snapshot observers.
    ///
    /// Each observer gets a dedicated worker fed by a last-value slot once the
    /// supervisor runs; more can be registered later through the handle.
    pub fn with_observers(mut self, observers: Vec<Arc<dyn Observe>>) -> Self {
        self.observers = observers;
        self
    }

    /// Builds the supervisor without starting anything.
    ///
    /// Creates the shared state, the log intake, the observer registry and the
    /// controller command queue. Tasks are spawned by [`Supervisor::run`].
    pub fn build(self) -> Supervisor {
        let cfg = self.cfg;
        let state = SharedState::new(
            cfg.version.clone(),
            cfg.manual(),
            cfg.max_lines_clamped(),
            PushHandle::new(),
        );
        let observers = Arc::new(ObserverSet::new());
        let (log, aggregator) =
            LogAggregator::channel(cfg.intake_capacity_clamped(), cfg.log_mode, Arc::clone(&state));
        let (controller, queue) = ProcessController::channel(Arc::clone(&state));

        Supervisor::new_internal(
            cfg,
            state,
            observers,
            self.observers,
            log,
            aggregator,
            controller,
            queue,
            CancellationToken::new(),
        )
    }
}
