//! HTTP route handlers for the Logtail server.
//!
//! This module provides the HTTP endpoints:
//!
//! - `GET /ws` - WebSocket subscription: snapshot first, then live deltas
//! - `GET /log` and `GET /` - Static viewer page that connects to `/ws`
//! - `GET /health` - Health check endpoint
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration (timeouts and queue sizes)
//! - The tail engine, which owns the subscriber hub
//! - The watch state published by the change watcher
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use logtail_server::config::Config;
//! use logtail_server::engine::TailEngine;
//! use logtail_server::routes::{create_router, AppState};
//! use logtail_server::watcher::ChangeWatcher;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let engine = Arc::new(TailEngine::open(&config.log_file, config.tail).await?);
//!     let watcher = ChangeWatcher::spawn(Arc::clone(&engine), config.rewatch_interval)?;
//!
//!     let state = AppState::new(config, engine, watcher.subscribe_state());
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::{Html, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::engine::TailEngine;
use crate::session::Session;
use crate::watcher::WatchState;

/// Viewer page served on `/log` and `/`.
const VIEWER_HTML: &str = include_str!("../assets/index.html");

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
///
/// Cloned for each request handler; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Tail engine shared with the change watcher.
    pub engine: Arc<TailEngine>,

    /// Watch state published by the change watcher.
    pub watch_state: watch::Receiver<WatchState>,

    /// Monotonic start time for uptime calculation.
    pub start_time: Instant,

    /// Wall-clock start time reported on `/health`.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Creates application state around a running engine.
    ///
    /// # Arguments
    ///
    /// * `config` - Server configuration parsed from environment variables
    /// * `engine` - The tail engine the change watcher drives
    /// * `watch_state` - Receiver from [`crate::watcher::ChangeWatcher::subscribe_state`]
    #[must_use]
    pub fn new(
        config: Config,
        engine: Arc<TailEngine>,
        watch_state: watch::Receiver<WatchState>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            watch_state,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("engine", &self.engine.path())
            .field("watch_state", &*self.watch_state.borrow())
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// # Returns
///
/// An axum `Router` with the following routes:
/// - `GET /ws` - WebSocket subscription endpoint
/// - `GET /log` and `GET /` - Viewer page
/// - `GET /health` - Health check endpoint
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_viewer))
        .route("/log", get(get_viewer))
        .route("/ws", get(get_ws))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// GET /log - Viewer Page
// ============================================================================

/// GET /log - Serves the embedded viewer page.
async fn get_viewer() -> Html<&'static str> {
    Html(VIEWER_HTML)
}

// ============================================================================
// GET /ws - WebSocket Subscription
// ============================================================================

/// GET /ws - WebSocket subscription endpoint.
///
/// # WebSocket Protocol
///
/// Once connected, the server sends the snapshot (if the file has any recent
/// lines) followed by one text message per change cycle. Each message holds up
/// to `max_lines` lines joined by a blank line. Client frames other than Close
/// are ignored.
///
/// # Responses
///
/// - `101 Switching Protocols` - WebSocket upgrade successful
async fn get_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    info!("WebSocket client connecting");

    ws.on_upgrade(move |socket| {
        handle_websocket(
            socket,
            state.engine,
            state.config.queue_capacity,
            state.config.send_timeout,
        )
    })
}

/// Handles an established WebSocket connection.
///
/// Opens a session on the engine and forwards its queue to the client until
/// either side goes away.
async fn handle_websocket(
    socket: WebSocket,
    engine: Arc<TailEngine>,
    queue_capacity: usize,
    send_timeout: Duration,
) {
    let (mut sender, mut receiver) = socket.split();
    let (mut session, mut payload_rx) = Session::open(engine, queue_capacity).await;

    info!(subscriber_id = ?session.id(), "WebSocket client connected");

    // Forward queued payloads to the client
    let mut forward_task = tokio::spawn(async move {
        while let Some(payload) = payload_rx.recv().await {
            let payload_len = payload.len();
            match tokio::time::timeout(send_timeout, sender.send(Message::Text(payload.into())))
                .await
            {
                Ok(Ok(())) => trace!(payload_len, "Sent payload to WebSocket client"),
                Ok(Err(err)) => {
                    debug!(error = %err, "Failed to send payload to WebSocket client");
                    break;
                }
                Err(_) => {
                    warn!(
                        timeout_ms = send_timeout.as_millis(),
                        "WebSocket send timed out, dropping client"
                    );
                    break;
                }
            }
        }
    });

    // Wait for client to disconnect
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    debug!("WebSocket client sent close frame");
                    break;
                }
                Ok(Message::Ping(data)) => {
                    // axum handles pong automatically
                    trace!(data_len = data.len(), "Received ping");
                }
                Ok(_) => {
                    // Ignore other messages from client
                }
                Err(err) => {
                    debug!(error = %err, "WebSocket error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut forward_task => recv_task.abort(),
        _ = &mut recv_task => forward_task.abort(),
    }

    session.close();
    info!(subscriber_id = ?session.id(), "WebSocket client disconnected");
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` while the file is watched, `"degraded"` while the watch is lost.
    pub status: String,

    /// `"watching"` or `"lost"`.
    pub watch: String,

    /// Why the watch was lost, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_error: Option<String>,

    /// Number of live subscribers.
    pub subscribers: usize,

    /// Byte offset consumed so far.
    pub cursor: u64,

    /// When the server started.
    pub started_at: DateTime<Utc>,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
///
/// # Response
///
/// ```json
/// {
///   "status": "ok",
///   "watch": "watching",
///   "subscribers": 3,
///   "cursor": 48213,
///   "started_at": "2026-01-01T00:00:00Z",
///   "uptime_seconds": 3600
/// }
/// ```
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let watch_state = state.watch_state.borrow().clone();
    let (status, watch, watch_error) = match watch_state {
        WatchState::Watching => ("ok", "watching", None),
        WatchState::Lost { reason } => ("degraded", "lost", Some(reason)),
    };

    Json(HealthResponse {
        status: status.to_string(),
        watch: watch.to_string(),
        watch_error,
        subscribers: state.engine.hub().subscriber_count(),
        cursor: state.engine.cursor(),
        started_at: state.started_at,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
