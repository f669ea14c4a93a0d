//! `TetherServer`: the Axum router and listener.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use tether_core::ids::SessionKey;
use tether_session::HandlerSet;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::socket::run_ws_session;

/// Query parameter carrying the peer's session key.
pub const SESSION_KEY_PARAM: &str = "client";

/// Shared state for Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session registry.
    pub registry: Arc<SessionRegistry>,
    /// Handlers applied to every session.
    pub handlers: Arc<HandlerSet>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Open WebSocket connections.
    pub connections: Arc<AtomicUsize>,
    /// Server start time.
    pub start_time: Instant,
}

/// The accepting endpoint.
pub struct TetherServer {
    state: AppState,
}

impl TetherServer {
    /// Create a server that applies `handlers` to every session.
    pub fn new(config: ServerConfig, handlers: HandlerSet) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.session.clone()));
        Self {
            state: AppState {
                registry,
                handlers: Arc::new(handlers),
                shutdown: Arc::new(ShutdownCoordinator::default()),
                config: Arc::new(config),
                connections: Arc::new(AtomicUsize::new(0)),
                start_time: Instant::now(),
            },
        }
    }

    /// Build the router: `/health` and the `/ws` upgrade.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .with_state(self.state.clone())
    }

    /// Bind and serve in the background until shutdown is signalled.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let config = &self.state.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(err) = served {
                error!(error = %err, "server terminated");
            }
        });

        info!(%addr, "tether server listening");
        Ok((addr, handle))
    }

    /// Session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Open WebSocket connections.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::Relaxed)
    }
}

/// Pick the session key for an incoming upgrade.
///
/// The `client` query parameter wins; otherwise the handshake's
/// `Sec-WebSocket-Key` header; otherwise a fresh id.
pub fn session_key_for(params: &HashMap<String, String>, headers: &HeaderMap) -> SessionKey {
    if let Some(key) = params.get(SESSION_KEY_PARAM).filter(|k| !k.is_empty()) {
        return SessionKey::from(key.as_str());
    }
    headers
        .get("sec-websocket-key")
        .and_then(|v| v.to_str().ok())
        .map_or_else(SessionKey::new, SessionKey::from)
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.connections.load(Ordering::Relaxed),
        state.registry.len(),
    ))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let key = session_key_for(&params, &headers);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, key, state))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{HeaderValue, Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    fn make_server() -> TetherServer {
        TetherServer::new(ServerConfig::default(), HandlerSet::new())
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["sessions"], 0);
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_is_rejected() {
        let app = make_server().router();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn session_key_prefers_query_param() {
        let mut params = HashMap::new();
        let _ = params.insert("client".to_string(), "alice".to_string());
        let mut headers = HeaderMap::new();
        let _ = headers.insert("sec-websocket-key", HeaderValue::from_static("dGhlIHNhbXBsZQ=="));
        assert_eq!(session_key_for(&params, &headers).as_str(), "alice");
    }

    #[test]
    fn session_key_falls_back_to_handshake_key() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("sec-websocket-key", HeaderValue::from_static("dGhlIHNhbXBsZQ=="));
        assert_eq!(
            session_key_for(&HashMap::new(), &headers).as_str(),
            "dGhlIHNhbXBsZQ=="
        );
    }

    #[test]
    fn session_key_generated_when_absent() {
        let a = session_key_for(&HashMap::new(), &HeaderMap::new());
        let b = session_key_for(&HashMap::new(), &HeaderMap::new());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops_on_shutdown() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
