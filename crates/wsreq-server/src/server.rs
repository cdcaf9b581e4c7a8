//! `RequestServer`: router, upgrade handler and listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::handler::{Peer, RequestHandler};
use crate::health::{ServerCounters, health_check};
use crate::session::run_ws_session;
use crate::shutdown::ShutdownCoordinator;

/// Shared state for the axum handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<ServerConfig>,
    handler: Arc<dyn RequestHandler>,
    counters: Arc<ServerCounters>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

/// Serves one business handler over the wsreq protocol.
pub struct RequestServer {
    config: Arc<ServerConfig>,
    handler: Arc<dyn RequestHandler>,
    counters: Arc<ServerCounters>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl RequestServer {
    /// Create a server for `handler`.
    pub fn new(config: ServerConfig, handler: impl RequestHandler + 'static) -> Self {
        Self::with_handler(config, Arc::new(handler))
    }

    /// Create a server for an already shared handler.
    pub fn with_handler(config: ServerConfig, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            config: Arc::new(config),
            handler,
            counters: Arc::new(ServerCounters::default()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the axum router: the upgrade path plus `/health`.
    pub fn router(&self) -> Router {
        let state = AppState {
            config: Arc::clone(&self.config),
            handler: Arc::clone(&self.handler),
            counters: Arc::clone(&self.counters),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
        };

        Router::new()
            .route(&self.config.path, get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(state)
    }

    /// Bind `host:port` and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        info!(%addr, path = %self.config.path, "wsreq server listening");

        let handle = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server terminated");
            }
        });

        Ok((addr, handle))
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Live connection and request counters.
    pub fn counters(&self) -> &Arc<ServerCounters> {
        &self.counters
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    extensions: Extensions,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }
    let Some(slot) = state
        .counters
        .try_reserve_connection(state.config.max_connections)
    else {
        warn!(
            max_connections = state.config.max_connections,
            "connection limit reached, refusing upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let remote_addr = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let peer = Peer::new(remote_addr);
    let sessions = state.shutdown.sessions().clone();

    // A failed upgrade drops the callback, and the slot with it.
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            sessions.track_future(run_ws_session(
                socket,
                peer,
                state.handler,
                state.counters,
                slot,
                state.config,
                state.shutdown.token(),
            ))
        })
        .into_response()
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(health_check(state.start_time, &state.counters))
}
