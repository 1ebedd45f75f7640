//! # HTTP control plane (feature `http`).
//!
//! | route          | behavior                                                        |
//! |----------------|-----------------------------------------------------------------|
//! | `GET /`        | embedded status page                                            |
//! | `GET /sync`    | Server-Sent Events: one JSON snapshot per emission, first one immediately |
//! | `POST /restart`| `request_restart()`; `202 Accepted`, or `503` if the controller is gone |
//!
//! The listener is bound **before** the supervisor starts anything, so a bind
//! failure is the only fatal error and leaves no child behind.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use futures::Stream;
use tokio::net::TcpListener;
use tokio_stream::wrappers::WatchStream;

use crate::core::{Supervisor, SupervisorHandle};
use crate::error::RuntimeError;
use crate::observers::ObserverId;
use crate::state::Snapshot;

const INDEX: &str = include_str!("index.html");
const SERVER_DRAIN: Duration = Duration::from_secs(2);

/// Builds the control-plane router.
pub fn router(handle: SupervisorHandle) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/sync", get(sync))
        .route("/restart", post(restart))
        .with_state(handle)
}

/// Binds the control-plane listener.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, RuntimeError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| RuntimeError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Validates, binds, then runs the supervisor with the control plane attached.
///
/// Returns the supervisor's exit code (see [`Supervisor::run`]).
pub async fn serve(sup: Supervisor, addr: SocketAddr) -> Result<i32, RuntimeError> {
    sup.validate()?;
    let listener = bind(addr).await?;
    let local = listener.local_addr().unwrap_or(addr);

    let handle = sup.handle();
    let app = router(handle.clone());
    let stopping = handle.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stopping.stopped().await })
            .await
    });
    handle
        .log()
        .supervisor(format!("agent listening on http://{local}..."))
        .await;

    let code = sup.run().await;

    match tokio::time::timeout(SERVER_DRAIN, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "control plane stopped with error"),
        Ok(Err(e)) => tracing::error!(error = %e, "control plane task failed"),
        Err(_) => tracing::debug!("control plane connections still open at exit"),
    }
    code
}

async fn index() -> Html<&'static str> {
    Html(INDEX)
}

async fn restart(State(handle): State<SupervisorHandle>) -> StatusCode {
    match handle.controller().request_restart().await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::debug!(error = %e, "restart rejected");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn sync(State(handle): State<SupervisorHandle>) -> impl IntoResponse {
    let (id, rx) = handle.subscribe("sse");
    let stream = Subscription {
        inner: WatchStream::from_changes(rx.into_inner()),
        handle,
        id,
        last: None,
    };
    (
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(stream).keep_alive(KeepAlive::new()),
    )
}

/// Snapshot stream of one SSE client. Unregisters itself on drop.
///
/// A client that reads slowly skips to the newest snapshot.
struct Subscription {
    inner: WatchStream<Option<Snapshot>>,
    handle: SupervisorHandle,
    id: ObserverId,
    last: Option<u64>,
}

impl Stream for Subscription {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let snap = match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Some(snap))) => snap,
                Poll::Ready(Some(None)) => continue,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };
            if self.last.is_some_and(|seen| snap.revision <= seen) {
                continue;
            }
            self.last = Some(snap.revision);
            return Poll::Ready(Some(Ok(encode(&snap))));
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.unregister(self.id);
    }
}

fn encode(snap: &Snapshot) -> SseEvent {
    match serde_json::to_string(&**snap) {
        Ok(json) => SseEvent::default().data(json),
        Err(e) => {
            tracing::warn!(revision = snap.revision, error = %e, "snapshot not serializable");
            SseEvent::default().event("error").data(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Config, ProgramSpec};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn serve_router(handle: SupervisorHandle) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(handle)).await });
        addr
    }

    async fn request(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("response")
            .unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let err = bind(addr).await.unwrap_err();
        assert_eq!(err.as_label(), "runtime_bind");
    }

    #[tokio::test]
    async fn restart_without_controller_is_unavailable() {
        let sup = Supervisor::builder(Config::new(ProgramSpec::new("true", Vec::<String>::new()))).build();
        let handle = sup.handle();
        drop(sup);

        let addr = serve_router(handle).await;
        let resp = request(
            addr,
            "POST /restart HTTP/1.1\r\nHost: t\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(resp.starts_with("HTTP/1.1 503"), "{resp}");
    }

    #[tokio::test]
    async fn sync_sends_current_snapshot_first() {
        let sup = Supervisor::builder(Config::new(ProgramSpec::new("true", Vec::<String>::new()))).build();
        let handle = sup.handle();
        handle.state().mutate(|d| d.manual = true);

        let addr = serve_router(handle).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /sync HTTP/1.1\r\nHost: t\r\n\r\n")
            .await
            .unwrap();

        let mut body = String::new();
        let mut buf = vec![0u8; 4096];
        while !body.contains("data:") {
            let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
                .await
                .expect("event")
                .unwrap();
            assert!(n > 0, "connection closed early");
            body.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        assert!(body.starts_with("HTTP/1.1 200"), "{body}");
        assert!(body.contains("text/event-stream"), "{body}");
        assert!(body.contains("\"revision\":1"), "{body}");
        assert!(body.contains("\"manual\":true"), "{body}");
    }

    #[tokio::test]
    async fn index_is_served() {
        let sup = Supervisor::builder(Config::default()).build();
        let addr = serve_router(sup.handle()).await;
        let resp = request(addr, "GET / HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n").await;
        assert!(resp.starts_with("HTTP/1.1 200"), "{resp}");
        assert!(resp.contains("text/html"), "{resp}");
    }
}
