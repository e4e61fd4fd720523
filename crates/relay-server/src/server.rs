//! `RelayServer`: shared state, router, listener, and background sweep.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::metrics::KEYS_PURGED_TOTAL;
use relay_core::{RateLimiter, SessionCode};
use relay_queue::{KeyValueStore, ManifestStore, ResponseStore, SessionInfo, SessionQueueStore, SessionStore};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ApiError;
use crate::handlers;
use crate::health::{self, HealthResponse};
use crate::registry::StreamRegistry;
use crate::shutdown::{DrainReport, Shutdown};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Backing key-value store.
    pub kv: Arc<dyn KeyValueStore>,
    /// Session records.
    pub sessions: SessionStore,
    /// Per-session request queues.
    pub queue: SessionQueueStore,
    /// Completed responses.
    pub responses: ResponseStore,
    /// Published tool manifests.
    pub manifests: ManifestStore,
    /// Open streams.
    pub registry: Arc<StreamRegistry>,
    /// Per-session limiters on inbound response batches.
    pub limiters: Arc<DashMap<SessionCode, Arc<RateLimiter>>>,
    /// Server-wide shutdown signal.
    pub shutdown: Arc<Shutdown>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build state over a backend.
    pub fn new(config: ServerConfig, kv: Arc<dyn KeyValueStore>) -> Self {
        let ttl = config.session_ttl;
        Self {
            sessions: SessionStore::new(kv.clone(), ttl),
            queue: SessionQueueStore::new(kv.clone(), ttl),
            responses: ResponseStore::new(kv.clone(), ttl),
            manifests: ManifestStore::new(kv.clone(), ttl),
            kv,
            shutdown: Arc::new(Shutdown::new(config.shutdown_grace)),
            config: Arc::new(config),
            registry: Arc::new(StreamRegistry::new()),
            limiters: Arc::new(DashMap::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Record client activity: refresh the session TTL and every open
    /// stream's idle clock.
    pub async fn client_activity(&self, code: &SessionCode) -> Result<SessionInfo, ApiError> {
        let info = self.sessions.touch(code).await?;
        self.registry.touch_session(code);
        Ok(info)
    }

    /// The session's inbound limiter, created on first use.
    pub fn limiter_for(&self, code: &SessionCode) -> Arc<RateLimiter> {
        self.limiters
            .entry(code.clone())
            .or_insert_with(|| Arc::new(RateLimiter::new(self.config.response_rate_limit.clone())))
            .value()
            .clone()
    }

    /// One sweep: purge expired keys and drop limiters of vanished sessions.
    pub async fn purge_expired(&self) -> usize {
        let purged = match self.kv.purge_expired().await {
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "purge of expired keys failed");
                0
            }
        };
        metrics::counter!(KEYS_PURGED_TOTAL).increment(u64::try_from(purged).unwrap_or(u64::MAX));

        let codes: Vec<SessionCode> = self.limiters.iter().map(|e| e.key().clone()).collect();
        for code in codes {
            if matches!(self.sessions.get(&code).await, Ok(None)) {
                let _ = self.limiters.remove(&code);
            }
        }
        debug!(purged, limiters = self.limiters.len(), "expired keys purged");
        purged
    }
}

/// The relay HTTP server.
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    /// Create a server over a backend.
    pub fn new(config: ServerConfig, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            state: AppState::new(config, kv),
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/api/sessions", post(handlers::sessions::create_session))
            .route("/api/sessions/{code}", get(handlers::sessions::get_session))
            .route("/api/sessions/{code}/ack", post(handlers::sessions::ack))
            .route("/api/sessions/{code}/stream", get(handlers::stream::open_stream))
            .route("/api/sessions/{code}/requests", post(handlers::requests::enqueue))
            .route("/api/sessions/{code}/requests/next", get(handlers::requests::poll_next))
            .route("/api/sessions/{code}/responses", post(handlers::responses::post_batch))
            .route(
                "/api/sessions/{code}/responses/{request_id}",
                get(handlers::responses::get_response),
            )
            .route("/api/sessions/{code}/tools", put(handlers::tools::publish_tools))
            .route("/api/sessions/{code}/metadata", get(handlers::tools::metadata))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Shared state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the shutdown signal.
    pub fn shutdown(&self) -> &Arc<Shutdown> {
        &self.state.shutdown
    }

    /// Stop serving: close open streams, then wait for `tasks` (the
    /// listener and purge sweep) within the configured grace period.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>) -> DrainReport {
        self.state.shutdown.drain(&self.state.registry, tasks).await
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Get the stream registry.
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.state.registry
    }

    /// Spawn the periodic expired-key sweep. Stops on shutdown.
    pub fn spawn_purge_task(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        let token = self.state.shutdown.token();
        let period = self.state.config.purge_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick fires immediately; nothing has expired yet
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = state.purge_expired().await;
                    }
                }
            }
            debug!("purge task stopped");
        })
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serving task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.state.shutdown.token();
        info!(%addr, "relay server listening");

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(err) = result {
                error!(error = %err, "server error");
            }
            info!("relay server stopped");
        });
        Ok((addr, handle))
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
        state.registry.session_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use relay_queue::MemoryStore;
    use tower::ServiceExt;

    fn make_server() -> RelayServer {
        RelayServer::new(ServerConfig::default(), Arc::new(MemoryStore::new()))
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server().router();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = json_body(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["activeStreams"], 0);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let app = make_server().router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_handle_renders_text() {
        let app = make_server()
            .with_metrics(crate::metrics::detached_handle())
            .router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server().router();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn limiter_is_per_session_and_reused() {
        let server = make_server();
        let a = SessionCode::parse("ABCD2345").unwrap();
        let b = SessionCode::parse("ZZZZ7777").unwrap();
        let la = server.state().limiter_for(&a);
        assert!(Arc::ptr_eq(&la, &server.state().limiter_for(&a)));
        assert!(!Arc::ptr_eq(&la, &server.state().limiter_for(&b)));
    }

    #[tokio::test]
    async fn purge_drops_limiters_of_unknown_sessions() {
        let server = make_server();
        let live = server.state().sessions.create().await.unwrap();
        let gone = SessionCode::parse("ZZZZ7777").unwrap();
        let _ = server.state().limiter_for(&live.code);
        let _ = server.state().limiter_for(&gone);

        let _ = server.state().purge_expired().await;
        assert!(server.state().limiters.contains_key(&live.code));
        assert!(!server.state().limiters.contains_key(&gone));
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops_on_shutdown() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().trigger();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
