//! # LogSink: cloneable producer handle for the log intake.
//!
//! Every task that wants a line in the log window holds a [`LogSink`]. Sends
//! go through a bounded mpsc; when the intake is full the producer waits
//! (backpressure) instead of dropping the line.
//!
//! Child output routing depends on [`LogMode`]:
//!
//! | mode     | log window | supervisor stdout/stderr |
//! |----------|------------|--------------------------|
//! | `Both`   | yes        | yes                      |
//! | `WebUi`  | yes        | no                       |
//! | `Proxy`  | no         | yes                      |

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::core::LogMode;
use crate::events::Event;
use crate::state::LogSource;

/// Which child stream a line came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildStream {
    Stdout,
    Stderr,
}

/// One line waiting in the intake queue (offset not yet assigned).
#[derive(Debug)]
pub(crate) struct LogLine {
    pub(crate) source: LogSource,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) text: String,
}

/// Producer side of the log pipeline.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<LogLine>,
    mode: LogMode,
}

impl LogSink {
    pub(crate) fn new(tx: mpsc::Sender<LogLine>, mode: LogMode) -> Self {
        Self { tx, mode }
    }

    /// Supervisor activity: mirrored to `tracing` and written to the window.
    pub async fn supervisor(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!("{text}");
        self.send(LogSource::Supervisor, text).await;
    }

    /// Typed supervisor event, rendered with its `Display` form.
    pub async fn event(&self, ev: &Event) {
        let text = ev.to_string();
        if ev.is_failure() {
            tracing::warn!(seq = ev.seq, kind = ?ev.kind, "{text}");
        } else {
            tracing::info!(seq = ev.seq, kind = ?ev.kind, "{text}");
        }
        self.send(LogSource::Supervisor, text).await;
    }

    /// One line of child output, routed according to the log mode.
    pub async fn child(&self, stream: ChildStream, text: String) {
        if self.mode.to_console() {
            let mut line = text.clone().into_bytes();
            line.push(b'\n');
            let res = match stream {
                ChildStream::Stdout => tokio::io::stdout().write_all(&line).await,
                ChildStream::Stderr => tokio::io::stderr().write_all(&line).await,
            };
            if let Err(e) = res {
                tracing::debug!(error = %e, "failed to echo child output");
            }
        }
        if self.mode.to_window() {
            self.send(LogSource::Child, text).await;
        }
    }

    async fn send(&self, source: LogSource, text: String) {
        let line = LogLine {
            source,
            timestamp: Utc::now(),
            text,
        };
        if self.tx.send(line).await.is_err() {
            tracing::debug!("log intake closed; line discarded");
        }
    }
}
