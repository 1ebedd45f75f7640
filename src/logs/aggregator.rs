//! # LogAggregator: single consumer of the log intake.
//!
//! ```text
//! LogSink ─┐
//! LogSink ─┼─► [bounded intake] ─► LogAggregator ─► SharedState::mutate(window.push)
//! LogSink ─┘                       (one task)        └─► PushHandle::request()
//! ```
//!
//! Offsets are assigned here and nowhere else, so they strictly increase
//! regardless of how many producers race on the intake.

use std::sync::Arc;

use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::sink::{LogLine, LogSink};
use crate::core::LogMode;
use crate::state::SharedState;

/// Consumer half of the log pipeline.
pub struct LogAggregator {
    rx: mpsc::Receiver<LogLine>,
    state: Arc<SharedState>,
}

impl LogAggregator {
    /// Creates the intake (capacity clamped to at least 1) and its producer handle.
    pub fn channel(capacity: usize, mode: LogMode, state: Arc<SharedState>) -> (LogSink, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (LogSink::new(tx, mode), Self { rx, state })
    }

    /// Consumes lines until every sink is dropped or `token` is cancelled.
    ///
    /// On cancellation, lines already queued are still written.
    pub async fn run(mut self, token: CancellationToken) {
        loop {
            let line = select! {
                line = self.rx.recv() => line,
                _ = token.cancelled() => break,
            };
            match line {
                Some(line) => self.insert(line),
                None => return,
            }
        }

        self.rx.close();
        while let Ok(line) = self.rx.try_recv() {
            self.insert(line);
        }
    }

    fn insert(&self, line: LogLine) {
        self.state
            .mutate(|d| d.log.push(line.source, line.timestamp, line.text));
    }
}
