//! MJPEG server listener
//!
//! Serves the stream as an axum route. Each accepted `GET` gets its own
//! [`StreamHandler`] task writing into an in-memory pipe whose read side is
//! the response body.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::serve::ListenerExt;
use axum::Router;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::io::ReaderStream;

use crate::broadcast::FrameBroadcaster;
use crate::error::Result;
use crate::server::config::ServerConfig;
use crate::server::handler::StreamHandler;

/// Bytes a handler may write ahead of the client before it blocks
const PIPE_CAPACITY: usize = 64 * 1024;

/// Shared by every request on the stream route
#[derive(Clone)]
struct StreamState {
    config: Arc<ServerConfig>,
    broadcaster: Arc<FrameBroadcaster>,
    next_session_id: Arc<AtomicU64>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl StreamState {
    fn acquire_permit(&self) -> std::result::Result<Option<OwnedSemaphorePermit>, TryAcquireError> {
        match self.connection_semaphore {
            Some(ref sem) => Arc::clone(sem).try_acquire_owned().map(Some),
            None => Ok(None),
        }
    }
}

/// MJPEG-over-HTTP server
///
/// Every accepted `GET` becomes a subscriber of the shared broadcaster.
pub struct MjpegServer {
    state: StreamState,
}

impl MjpegServer {
    /// Create a new server streaming frames from `broadcaster`
    pub fn new(config: ServerConfig, broadcaster: Arc<FrameBroadcaster>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            state: StreamState {
                config: Arc::new(config),
                broadcaster,
                next_session_id: Arc::new(AtomicU64::new(1)),
                connection_semaphore,
            },
        }
    }

    /// Get a reference to the frame broadcaster
    pub fn broadcaster(&self) -> &Arc<FrameBroadcaster> {
        &self.state.broadcaster
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.state.config.bind_addr
    }

    /// Router serving the stream
    ///
    /// Only `GET` is routed; axum answers other methods with `405` and
    /// unknown paths with `404`. The router needs `ConnectInfo<SocketAddr>`,
    /// so serve it with `into_make_service_with_connect_info`.
    pub fn router(&self) -> Router {
        let stream: MethodRouter<StreamState> = get(stream_response);

        let router = match self.state.config.path {
            Some(ref path) => Router::new().route(&route_path(path), stream),
            None => Router::new()
                .route("/", stream.clone())
                .route("/{*path}", stream),
        };

        router.with_state(self.state.clone())
    }

    /// Bind a listener on the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "MJPEG server listening");
        Ok(listener)
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Run the server with graceful shutdown
    ///
    /// Stops accepting when `shutdown` resolves. Sessions already streaming
    /// keep going until the broadcaster is shut down.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let nodelay = self.state.config.tcp_nodelay;
        let listener = listener.tap_io(move |socket| {
            if nodelay {
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::warn!(error = %e, "Failed to configure socket");
                }
            }
        });

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Serve on `listener` until `shutdown` resolves
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.serve(listener) => result,
        }
    }
}

/// Routes must start with `/`
fn route_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Open one MJPEG stream
///
/// Subscribes before the response head goes out, so a client that has seen
/// the head is already registered.
async fn stream_response(
    State(state): State<StreamState>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    uri: Uri,
) -> Response {
    // Check connection limit
    let permit = match state.acquire_permit() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let session_id = state.next_session_id.fetch_add(1, Ordering::Relaxed);
    let (pipe_writer, pipe_reader) = tokio::io::duplex(PIPE_CAPACITY);
    let handler = StreamHandler::new(
        session_id,
        pipe_writer,
        Arc::clone(&state.broadcaster),
        &state.config,
    );
    let content_type = handler.content_type();

    tracing::info!(
        session_id = session_id,
        peer = %peer_addr,
        path = %uri.path(),
        "Client subscribed"
    );

    // Dropped along with the body once hyper gives up on the connection
    let (body_alive, body_dropped) = oneshot::channel::<()>();

    tokio::spawn(async move {
        // Held for the lifetime of the session
        let _permit = permit;

        let stats = handler
            .run(async move {
                let _ = body_dropped.await;
            })
            .await;

        tracing::info!(
            session_id = session_id,
            peer = %peer_addr,
            frames = stats.frames_sent,
            skipped = stats.skipped_frames,
            bytes = stats.bytes_sent,
            duration_ms = stats.duration.as_millis() as u64,
            bitrate = stats.bitrate,
            framerate = stats.framerate(),
            "Client unsubscribed"
        );
    });

    let body = ReaderStream::new(pipe_reader).map(move |chunk| {
        let _alive = &body_alive;
        chunk
    });

    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-store".to_string()),
            (header::CONNECTION, "close".to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
