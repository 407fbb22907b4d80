//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Dashboard HTTP/JSON API over the running engine."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use gridsec_common::time::parse_timestamp;
use gridsec_common::ApiConfig;
use gridsec_core::{
    ControlOutcome, GridEngine, LogKind, LogRecords, SecurityStatus, ThreatStats,
};
use gridsec_msg::{HistoricalSample, Recorded, SystemState};
use gridsec_persistence::PersistenceError;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::websocket;

/// Header carrying the acting operator identity.
pub const OPERATOR_HEADER: &str = "x-operator";

const UNKNOWN_OPERATOR: &str = "unknown";

/// State shared by the HTTP and WebSocket handlers.
pub(crate) struct ApiState {
    pub(crate) engine: GridEngine,
    history_window: chrono::Duration,
    log_limit: usize,
}

/// Builder used to configure and spawn the API server.
#[derive(Clone)]
pub struct ApiServerBuilder {
    listen: SocketAddr,
    engine: GridEngine,
    history_window: Duration,
    log_limit: usize,
}

impl ApiServerBuilder {
    /// Construct a builder serving `engine` on `listen` with default query limits.
    pub fn new(listen: SocketAddr, engine: GridEngine) -> Self {
        let defaults = ApiConfig::default();
        Self {
            listen,
            engine,
            history_window: defaults.default_history_window,
            log_limit: defaults.default_log_limit,
        }
    }

    /// Construct a builder from the `[api]` configuration section.
    pub fn from_config(config: &ApiConfig, engine: GridEngine) -> Self {
        Self::new(config.listen, engine)
            .history_window(config.default_history_window)
            .log_limit(config.default_log_limit)
    }

    /// Window used by the history endpoint when `start` is omitted.
    pub fn history_window(mut self, window: Duration) -> Self {
        self.history_window = window;
        self
    }

    /// Row count used by the log endpoint when `limit` is omitted.
    pub fn log_limit(mut self, limit: usize) -> Self {
        self.log_limit = limit;
        self
    }

    /// Bind the listener and spawn the server task.
    pub async fn spawn(self) -> anyhow::Result<ApiServerHandle> {
        let listener = TcpListener::bind(self.listen)
            .await
            .with_context(|| format!("failed to bind API listener {}", self.listen))?;
        let address = listener.local_addr()?;
        let history_window = chrono::Duration::from_std(self.history_window)
            .context("history window out of range")?;
        let state = Arc::new(ApiState {
            engine: self.engine,
            history_window,
            log_limit: self.log_limit,
        });

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "api server exited with error");
            }
        });
        info!(address = %address, "api server listening");

        Ok(ApiServerHandle {
            address,
            task,
            shutdown: shutdown_tx,
        })
    }
}

fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/control", post(post_control))
        .route("/api/v1/security-status", get(get_security_status))
        .route("/api/v1/historical-data", get(get_historical_data))
        .route("/api/get_logs", get(get_logs))
        .route("/api/get_stats", get(get_stats))
        .route("/ws", get(websocket::upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle returned from [`ApiServerBuilder::spawn`].
pub struct ApiServerHandle {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl ApiServerHandle {
    /// Socket address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}

/// JSON error body `{"error": ...}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Error with an explicit status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        warn!(error = %err, "record store query failed");
        Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

fn operator(headers: &HeaderMap) -> String {
    headers
        .get(OPERATOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_OPERATOR)
        .to_owned()
}

async fn get_state(State(state): State<Arc<ApiState>>) -> Json<SystemState> {
    Json(state.engine.get_state())
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    action: String,
}

#[derive(Debug, Serialize)]
struct ControlResponse {
    success: bool,
    #[serde(flatten)]
    outcome: ControlOutcome,
}

async fn post_control(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, ApiError> {
    let actor = operator(&headers);
    let outcome = state
        .engine
        .apply_control(&request.action, &actor)
        .await
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    Ok(Json(ControlResponse {
        success: true,
        outcome,
    }))
}

async fn get_security_status(State(state): State<Arc<ApiState>>) -> Json<SecurityStatus> {
    Json(state.engine.security_status())
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    total_records: usize,
    data: Vec<Recorded<HistoricalSample>>,
}

/// Missing or unparseable timestamps fall back to the default window.
fn timestamp_param(name: &str, raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() {
        debug!(param = name, value = raw, "ignoring unparseable timestamp");
    }
    parsed
}

async fn get_historical_data(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let end = timestamp_param("end", params.end.as_deref()).unwrap_or_else(Utc::now);
    let start =
        timestamp_param("start", params.start.as_deref()).unwrap_or(end - state.history_window);
    let data = state.engine.query_history(start, end)?;
    Ok(Json(HistoryResponse {
        start,
        end,
        total_records: data.len(),
        data,
    }))
}

#[derive(Debug, Deserialize)]
struct LogParams {
    #[serde(rename = "type")]
    kind: Option<String>,
    limit: Option<usize>,
}

/// `threats` selects the threat log; any other value reads the audit log.
fn log_kind(raw: Option<&str>) -> LogKind {
    match raw {
        None => LogKind::default(),
        Some(raw) => raw.parse().unwrap_or(LogKind::Audit),
    }
}

async fn get_logs(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<LogParams>,
) -> Result<Json<LogRecords>, ApiError> {
    let kind = log_kind(params.kind.as_deref());
    let limit = params.limit.unwrap_or(state.log_limit);
    Ok(Json(state.engine.query_logs(kind, limit)?))
}

async fn get_stats(State(state): State<Arc<ApiState>>) -> Result<Json<ThreatStats>, ApiError> {
    Ok(Json(state.engine.threat_stats()?))
}
