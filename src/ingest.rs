//! Server side of the pipeline: an `axum` router that receives flushed
//! batches, enriches and summarizes them, and raises alerts.

use crate::record::{LogContext, LogLevel, LogRecord};
use crate::vitals::PageMetricsReport;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, FromRequest, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

/// Target of the ingestion diagnostics.
pub const INGEST_TARGET: &str = "web_telemetry::ingest";

/// Average `api_response_time` (ms) above which a batch is flagged slow.
pub const DEFAULT_SLOW_THRESHOLD_MS: f64 = 1000.0;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// A received record with its server-side enrichment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedRecord {
    #[serde(flatten)]
    pub record: LogRecord,
    pub received_at: DateTime<Utc>,
    pub ip: String,
}

/// Condition worth a human's attention, raised per batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Alert {
    /// The batch contained `count` ERROR or FATAL records.
    ErrorBurst { session_id: Option<String>, count: usize },
    /// Average API response time across the batch exceeded the threshold.
    SlowPerformance { session_id: Option<String>, average_ms: f64 },
}

pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: &Alert);
}

/// Emits alerts as warn-level tracing events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAlerts;

impl AlertSink for TracingAlerts {
    fn alert(&self, alert: &Alert) {
        match alert {
            Alert::ErrorBurst { session_id, count } => tracing::warn!(
                target: INGEST_TARGET,
                session_id = session_id.as_deref().unwrap_or("unknown"),
                count,
                "error logs detected"
            ),
            Alert::SlowPerformance { session_id, average_ms } => tracing::warn!(
                target: INGEST_TARGET,
                session_id = session_id.as_deref().unwrap_or("unknown"),
                average_ms,
                "slow API performance detected"
            ),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("log store failure: {0}")]
pub struct StoreError(pub String);

/// Filters of `GET /api/logs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub session_id: Option<String>,
    pub level: Option<LogLevel>,
    pub limit: usize,
}

/// Persistence behind the ingestion routes.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn store(&self, records: &[IngestedRecord]) -> Result<(), StoreError>;

    async fn query(&self, query: &LogQuery) -> Result<Vec<IngestedRecord>, StoreError>;
}

/// Store that keeps nothing and finds nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStore;

#[async_trait]
impl LogStore for NullStore {
    async fn store(&self, _records: &[IngestedRecord]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn query(&self, _query: &LogQuery) -> Result<Vec<IngestedRecord>, StoreError> {
        Ok(Vec::new())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("Invalid logs data")]
    InvalidLogs,
    #[error("Invalid metrics data")]
    InvalidMetrics,
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("Payload too large")]
    PayloadTooLarge,
    #[error("failed to read request body: {0}")]
    Body(String),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<BytesRejection> for IngestError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            IngestError::PayloadTooLarge
        } else {
            IngestError::Body(rejection.body_text())
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let (code, message) = match &self {
            IngestError::InvalidLogs | IngestError::InvalidMetrics | IngestError::InvalidQuery(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            IngestError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            _ => {
                tracing::error!(target: INGEST_TARGET, error = %self, "error processing logs");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };
        (code, Json(json!({ "error": message }))).into_response()
    }
}

/// Shared state of the ingestion router.
#[derive(Clone)]
pub struct IngestState {
    pub alerts: Arc<dyn AlertSink>,
    pub store: Arc<dyn LogStore>,
    pub slow_threshold_ms: f64,
}

impl Default for IngestState {
    fn default() -> Self {
        Self {
            alerts: Arc::new(TracingAlerts),
            store: Arc::new(NullStore),
            slow_threshold_ms: DEFAULT_SLOW_THRESHOLD_MS,
        }
    }
}

impl IngestState {
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.store = store;
        self
    }
}

/// Build the ingestion router:
///
/// - `POST /api/logs`: receive a flushed batch.
/// - `GET /api/logs`: query stored records.
/// - `POST /api/performance`: receive a vitals report.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so
/// records carry the peer address.
pub fn ingest_router(state: IngestState) -> Router {
    Router::new()
        .route("/api/logs", post(receive_logs).get(query_logs))
        .route("/api/performance", post(receive_performance))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Per-batch aggregates used for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BatchSummary {
    pub error_count: usize,
    /// Mean of `api_response_time` performance values, if any were present.
    pub average_response_ms: Option<f64>,
}

pub fn summarize(records: &[LogRecord]) -> BatchSummary {
    let error_count = records.iter().filter(|r| r.level >= LogLevel::Error).count();

    let timings: Vec<f64> = records
        .iter()
        .filter_map(|r| match &r.context {
            Some(LogContext::Performance(p)) if p.metric == "api_response_time" => Some(p.value),
            _ => None,
        })
        .collect();
    let average_response_ms =
        (!timings.is_empty()).then(|| timings.iter().sum::<f64>() / timings.len() as f64);

    BatchSummary { error_count, average_response_ms }
}

fn alerts_for(summary: &BatchSummary, session_id: Option<&str>, threshold_ms: f64) -> Vec<Alert> {
    let mut alerts = Vec::new();
    if summary.error_count > 0 {
        alerts.push(Alert::ErrorBurst {
            session_id: session_id.map(str::to_string),
            count: summary.error_count,
        });
    }
    if let Some(average_ms) = summary.average_response_ms.filter(|avg| *avg > threshold_ms) {
        alerts.push(Alert::SlowPerformance {
            session_id: session_id.map(str::to_string),
            average_ms,
        });
    }
    alerts
}

fn client_ip(peer: Option<SocketAddr>, headers: &HeaderMap) -> String {
    if let Some(addr) = peer {
        return addr.ip().to_string();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

async fn receive_logs(
    State(state): State<IngestState>,
    request: Request,
) -> Result<Json<Value>, IngestError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(peer, request.headers());
    let header_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bytes = Bytes::from_request(request, &state).await?;
    let payload: Value = serde_json::from_slice(&bytes)?;

    let raw_logs = match payload.get("logs").and_then(Value::as_array) {
        Some(logs) if !logs.is_empty() => logs,
        _ => return Err(IngestError::InvalidLogs),
    };
    let session_id = payload.get("sessionId").and_then(Value::as_str);

    let received_at = Utc::now();

    let mut records = Vec::with_capacity(raw_logs.len());
    for raw in raw_logs {
        let mut record = LogRecord::deserialize(raw)?;
        if record.user_agent.is_none() {
            record.user_agent = header_agent.clone();
        }
        tracing::info!(
            target: INGEST_TARGET,
            level = %record.level,
            session_id = %record.session_id,
            ip = %ip,
            "{}",
            record.message
        );
        records.push(IngestedRecord { record, received_at, ip: ip.clone() });
    }

    state.store.store(&records).await?;

    let plain: Vec<LogRecord> = records.iter().map(|r| r.record.clone()).collect();
    let summary = summarize(&plain);
    let alert_session = session_id.or_else(|| plain.first().map(|r| r.session_id.as_str()));
    for alert in alerts_for(&summary, alert_session, state.slow_threshold_ms) {
        state.alerts.alert(&alert);
    }

    Ok(Json(json!({
        "success": true,
        "processed": records.len(),
        "sessionId": session_id,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuery {
    session_id: Option<String>,
    level: Option<String>,
    limit: Option<usize>,
}

async fn query_logs(
    State(state): State<IngestState>,
    Query(raw): Query<RawQuery>,
) -> Result<Json<Value>, IngestError> {
    let level = raw
        .level
        .as_deref()
        .map(str::parse::<LogLevel>)
        .transpose()
        .map_err(|e| IngestError::InvalidQuery(e.to_string()))?;
    let query = LogQuery {
        session_id: raw.session_id,
        level,
        limit: raw.limit.unwrap_or(100),
    };

    let logs = state.store.query(&query).await?;
    Ok(Json(json!({
        "success": true,
        "count": logs.len(),
        "logs": logs,
    })))
}

async fn receive_performance(
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, IngestError> {
    let body = body?;
    let report: PageMetricsReport =
        serde_json::from_slice(&body).map_err(|_| IngestError::InvalidMetrics)?;
    tracing::info!(
        target: INGEST_TARGET,
        page = %report.page,
        page_load_ms = report.metrics.page_load_time,
        fcp = ?report.metrics.first_contentful_paint.value(),
        lcp = ?report.metrics.largest_contentful_paint.value(),
        cls = ?report.metrics.cumulative_layout_shift.value(),
        fid = ?report.metrics.first_input_delay.value(),
        "performance report received"
    );
    Ok(Json(json!({ "success": true })))
}
