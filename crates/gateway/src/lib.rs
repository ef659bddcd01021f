//! HTTP API gateway for HealthFlow.
//!
//! Endpoints:
//!
//! - `GET  /health`: Liveness and version
//! - `GET  /v1/flows`: The five flows with their output contracts
//! - `POST /v1/flows/{kind}`: Run one flow: `FlowRequest` in, `FlowResponse` out
//!
//! Built on Axum. All flow work happens in the shared [`FlowRunner`].

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use healthflow_config::AppConfig;
use healthflow_core::event::EventBus;
use healthflow_core::flow::{FlowKind, FlowRequest, FlowResponse};
use healthflow_flows::{FlowRunner, SetupError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// Request bodies may carry a base64 document image.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state for the gateway.
pub struct GatewayState {
    pub runner: Arc<FlowRunner>,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(runner: Arc<FlowRunner>) -> Self {
        Self {
            runner,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/flows", get(list_flows_handler))
        .route("/v1/flows/{kind}", post(run_flow_handler))
        .with_state(state)
}

/// Build the router with the production layers:
/// - CORS restricted to the local web client
/// - Request body size limit
/// - In-memory rate limiting (60 req/min per client)
/// - HTTP trace logging
pub fn build_full_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(HeaderValue::from_static("http://localhost:8080")))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600));

    let rate_limiter = Arc::new(RateLimiter::new(60, Duration::from_secs(60)));

    build_router(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            rate_limit_middleware(limiter, req, next)
        }))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Serve an already assembled runner until the listener fails.
pub async fn serve(runner: Arc<FlowRunner>, addr: &str) -> Result<(), GatewayError> {
    let app = build_full_router(Arc::new(GatewayState::new(runner)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Assemble the runner from config and serve it.
pub async fn start(config: AppConfig) -> Result<(), GatewayError> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let runner = FlowRunner::assemble(&config, Arc::new(EventBus::default())).await?;
    serve(Arc::new(runner), &addr).await
}

// --- Rate Limiter ---

/// In-memory sliding-window rate limiter keyed by client.
///
/// `std::sync::Mutex` is fine here: the lock is never held across an await.
struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: std::sync::Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the client is within its limit.
    fn check(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        if clients.len() > 10_000 {
            clients.retain(|_, timestamps| {
                timestamps
                    .last()
                    .is_some_and(|t| now.duration_since(*t) < self.window)
            });
        }

        let timestamps = clients.entry(client_key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push(now);
        true
    }
}

/// Keys clients by their Authorization header, else "anonymous". `/health`
/// is exempt so monitoring can poll it freely.
async fn rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let client_key = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "anonymous".to_string());

    if !limiter.check(&client_key) {
        warn!(client = %client_key.chars().take(20).collect::<String>(), "Rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(req).await)
}

// --- Handlers ---

#[derive(Debug, Serialize, serde::Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: i64,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

#[derive(Debug, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowInfo {
    kind: String,
    contract: String,
    primary_field: String,
    policies: Vec<String>,
    schema: serde_json::Value,
}

#[derive(Debug, Serialize, serde::Deserialize)]
struct FlowListResponse {
    flows: Vec<FlowInfo>,
    count: usize,
}

async fn list_flows_handler(State(state): State<SharedState>) -> Json<FlowListResponse> {
    let flows: Vec<FlowInfo> = FlowKind::ALL
        .iter()
        .filter_map(|kind| {
            let contract = state.runner.contract(*kind)?;
            let policies = state
                .runner
                .policies(*kind)
                .map(|engine| engine.list_policies().into_iter().map(|p| p.name).collect())
                .unwrap_or_default();
            Some(FlowInfo {
                kind: kind.as_str().to_string(),
                contract: contract.name.clone(),
                primary_field: contract.primary_field.clone(),
                policies,
                schema: contract.json_schema(),
            })
        })
        .collect();

    Json(FlowListResponse {
        count: flows.len(),
        flows,
    })
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

async fn run_flow_handler(
    State(state): State<SharedState>,
    Path(kind): Path<String>,
    Json(request): Json<FlowRequest>,
) -> Result<Json<FlowResponse>, ApiError> {
    let kind: FlowKind = kind.parse().map_err(|e: String| api_error(StatusCode::NOT_FOUND, e))?;
    if request.query.trim().is_empty() && request.image.is_none() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Either 'query' or 'image' is required"));
    }

    info!(flow = %kind, backend = ?request.backend, "v1/flows request");
    Ok(Json(state.runner.run(kind, &request).await))
}
