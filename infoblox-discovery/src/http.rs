//! HTTP server for metrics and HTTP service discovery.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{MatchedPath, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tokio::sync::watch;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use infoblox_discovery_common::{Category, SdTarget};

use crate::cache::SharedCache;
use crate::config::BasicAuthConfig;
use crate::exposition::{self, MetricFamily, MetricType};
use crate::metrics::{CacheMetrics, METRIC_PREFIX, collect_families};
use crate::request_metrics::{RequestMetrics, UNTEMPLATED_HANDLER};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Credentials required by the protected endpoints.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Credentials of an enabled basic auth configuration.
    pub fn from_config(config: &BasicAuthConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(&config.username, &config.password))
    }

    /// Compare both fields in constant time.
    fn matches(&self, username: &str, password: &str) -> bool {
        let user_ok = username.as_bytes().ct_eq(self.username.as_bytes());
        let pass_ok = password.as_bytes().ct_eq(self.password.as_bytes());
        (user_ok & pass_ok).into()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    cache: SharedCache,
    credentials: Option<Arc<Credentials>>,
    requests: Arc<RequestMetrics>,
}

/// Create the HTTP router.
pub fn create_router(cache: SharedCache, credentials: Option<Credentials>) -> Router {
    let state = AppState {
        cache,
        credentials: credentials.map(Arc::new),
        requests: Arc::new(RequestMetrics::new()),
    };

    let protected = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/prometheus-sd-targets", get(sd_targets_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            basic_auth_middleware,
        ));

    Router::new()
        .merge(protected)
        .route("/alive", get(alive_handler))
        .route("/exporter-metrics", get(exporter_metrics_handler))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Count every request, rejected ones included, per route template.
async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let handler = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNTEMPLATED_HANDLER.to_string());
    let method = request.method().to_string();

    let start = Instant::now();
    let response = next.run(request).await;
    state
        .requests
        .record(&handler, &method, response.status(), start.elapsed());

    response
}

/// Reject requests without the configured basic auth credentials.
async fn basic_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(credentials) = &state.credentials else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(decode_basic)
        .is_some_and(|(username, password)| credentials.matches(&username, &password));

    if authorized {
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Rejected unauthenticated request");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic")],
        "Incorrect credentials",
    )
        .into_response()
}

/// Decode an `Authorization: Basic <base64(user:pass)>` header value.
fn decode_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Handler for the /metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let start = Instant::now();

    let mut transform = CacheMetrics::new(&state.cache);
    let mut families = collect_families(&mut transform);

    let mut duration = MetricFamily::new(
        format!("{}scrape_duration_seconds", METRIC_PREFIX),
        "Time spent processing request",
        MetricType::Gauge,
    );
    duration.add_sample(BTreeMap::new(), start.elapsed().as_secs_f64());
    families.push(duration);

    render_families(&families)
}

/// Handler for the /exporter-metrics endpoint.
async fn exporter_metrics_handler(State(state): State<AppState>) -> Response {
    render_families(&state.requests.families())
}

fn render_families(families: &[MetricFamily]) -> Response {
    match exposition::render(families) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, exposition::CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error - please check logs",
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct SdQuery {
    #[serde(alias = "master")]
    source: String,
    #[serde(alias = "type")]
    category: String,
}

/// Handler for the /prometheus-sd-targets endpoint.
async fn sd_targets_handler(
    State(state): State<AppState>,
    Query(query): Query<SdQuery>,
) -> Response {
    let Ok(category) = query.category.parse::<Category>() else {
        debug!(category = %query.category, "Unknown category requested");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Not a valid category",
                "valid_categories": Category::names(),
            })),
        )
            .into_response();
    };

    let targets: Vec<SdTarget> = state
        .cache
        .get(&query.source, category)
        .iter()
        .map(|entity| entity.to_sd_target())
        .collect();

    match serde_json::to_string_pretty(&targets) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(source = %query.source, %category, error = %e, "Failed to serialize targets");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Handler for the /alive endpoint.
async fn alive_handler() -> Response {
    (StatusCode::OK, "infoblox_discovery alive!").into_response()
}

/// HTTP server configuration.
pub struct HttpServer {
    cache: SharedCache,
    listen_addr: SocketAddr,
    credentials: Option<Credentials>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        cache: SharedCache,
        listen_addr: SocketAddr,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            cache,
            listen_addr,
            credentials,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let auth = self.credentials.is_some();
        let router = create_router(self.cache, self.credentials);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(addr = %self.listen_addr, basic_auth = auth, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
