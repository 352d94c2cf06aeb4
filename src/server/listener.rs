//! SSE server listener
//!
//! An axum router answers the subscribe route, hands each request to the
//! broadcast channel and streams the connection's frames as the response
//! body. Path extraction percent-decodes the task id before it is validated.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use crate::broadcast::{BroadcastChannel, SseConnection, SseStream};
use crate::error::Result;
use crate::registry::TaskId;
use crate::server::config::ServerConfig;

/// SSE progress server
pub struct SseServer {
    config: ServerConfig,
    channel: Arc<BroadcastChannel>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

/// Per-request state shared by the handlers
#[derive(Clone)]
struct AppState {
    channel: Arc<BroadcastChannel>,
    connection_semaphore: Option<Arc<Semaphore>>,
    request_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SseServer {
    /// Create a new server with its own broadcast channel
    pub fn new(config: ServerConfig) -> Self {
        Self::with_channel(config, Arc::new(BroadcastChannel::new()))
    }

    /// Create a server sharing an existing broadcast channel
    pub fn with_channel(config: ServerConfig, channel: Arc<BroadcastChannel>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            channel,
            connection_semaphore,
        }
    }

    /// Get a reference to the broadcast channel
    pub fn channel(&self) -> &Arc<BroadcastChannel> {
        &self.channel
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_until(listener, std::future::pending()).await
    }

    /// Serve connections until `shutdown` resolves
    ///
    /// On shutdown every open event stream is ended so in-flight responses
    /// complete. The keep-alive task lives exactly as long as this future,
    /// whether it returns or is dropped.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(addr = ?listener.local_addr().ok(), "SSE server listening");

        let _keep_alive = self
            .config
            .keep_alive_interval
            .map(|interval| self.channel.spawn_keep_alive_task(interval));

        let (stop_tx, stop_rx) = watch::channel(false);
        let channel = Arc::clone(&self.channel);

        axum::serve(listener, self.router(stop_rx))
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
                let _ = stop_tx.send(true);
                channel.close_all().await;
            })
            .await?;

        tracing::info!("SSE server stopped");
        Ok(())
    }

    fn router(&self, shutdown: watch::Receiver<bool>) -> Router {
        let state = AppState {
            channel: Arc::clone(&self.channel),
            connection_semaphore: self.connection_semaphore.clone(),
            request_timeout: self.config.request_timeout,
            shutdown,
        };

        Router::new()
            .route(&self.config.route_path(), get(subscribe))
            .with_state(state)
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

async fn subscribe(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let task_id = match TaskId::parse(&raw_id) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "INVALID_TASK_ID", e.to_string()),
    };

    // One permit per open event stream
    let permit = match &state.connection_semaphore {
        Some(sem) => match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!(task_id = %task_id, "Subscription rejected: limit reached");
                return error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "TOO_MANY_CONNECTIONS",
                    "connection limit reached",
                );
            }
        },
        None => None,
    };

    let (conn, stream) = SseConnection::new();
    let accepted = tokio::time::timeout(
        state.request_timeout,
        state.channel.accept_subscription(&task_id, Arc::new(conn.clone())),
    )
    .await;

    match accepted {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "SUBSCRIBE_FAILED", e.to_string())
        }
        Err(_) => {
            conn.fail("subscription timed out");
            return error_response(
                StatusCode::REQUEST_TIMEOUT,
                "REQUEST_TIMEOUT",
                "subscription timed out",
            );
        }
    }

    event_stream_response(&conn, stream, permit, state.shutdown)
}

/// Build the response from the head the handshake declared
///
/// Dropping the body (client gone, or server shutting down) drops the
/// stream, which resolves the connection's `closed()` and unsubscribes it.
fn event_stream_response(
    conn: &SseConnection,
    stream: SseStream,
    permit: Option<OwnedSemaphorePermit>,
    mut shutdown: watch::Receiver<bool>,
) -> Response {
    let status = conn
        .status()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);

    let stopped = async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    };
    let frames = stream.into_stream().take_until(stopped).map(move |frame| {
        let _permit = &permit;
        Ok::<_, Infallible>(frame)
    });

    let mut response = Response::builder().status(status);
    for (name, value) in conn.declared_headers() {
        response = response.header(name, value);
    }

    response.body(Body::from_stream(frames)).unwrap_or_else(|e| {
        tracing::error!(connection = %conn.id(), error = %e, "Invalid SSE response head");
        conn.fail(e.to_string());
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into(), "code": code });
    (status, Json(body)).into_response()
}
