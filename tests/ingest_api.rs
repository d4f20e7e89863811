#![cfg(feature = "server")]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt; // for .oneshot()

use web_telemetry::ingest::{
    ingest_router, Alert, AlertSink, IngestState, IngestedRecord, LogQuery, LogStore, StoreError,
    MAX_BODY_BYTES,
};
use web_telemetry::record::LogLevel;

#[derive(Default)]
struct RecordingAlerts(Mutex<Vec<Alert>>);

impl AlertSink for RecordingAlerts {
    fn alert(&self, alert: &Alert) {
        self.0.lock().unwrap().push(alert.clone());
    }
}

#[derive(Default)]
struct MemoryStore {
    records: Mutex<Vec<IngestedRecord>>,
    queries: Mutex<Vec<LogQuery>>,
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn store(&self, records: &[IngestedRecord]) -> Result<(), StoreError> {
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(())
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<IngestedRecord>, StoreError> {
        self.queries.lock().unwrap().push(query.clone());
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| query.level.map_or(true, |l| r.record.level == l))
            .take(query.limit)
            .cloned()
            .collect())
    }
}

struct FailingStore;

#[async_trait]
impl LogStore for FailingStore {
    async fn store(&self, _records: &[IngestedRecord]) -> Result<(), StoreError> {
        Err(StoreError("disk full".into()))
    }

    async fn query(&self, _query: &LogQuery) -> Result<Vec<IngestedRecord>, StoreError> {
        Err(StoreError("disk full".into()))
    }
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header("Content-Type", "application/json")
        .body(body.into())
        .unwrap()
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn record(level: u8, message: &str) -> Value {
    json!({
        "timestamp": "2026-10-19T12:00:00Z",
        "level": level,
        "message": message,
        "sessionId": "s1",
    })
}

fn api_timing(value: f64) -> Value {
    json!({
        "timestamp": "2026-10-19T12:00:00Z",
        "level": 1,
        "message": "Performance: api_response_time",
        "context": {"type": "performance", "metric": "api_response_time", "value": value, "unit": "ms"},
        "sessionId": "s1",
    })
}

#[tokio::test]
async fn batch_is_processed_and_error_burst_alerted() {
    let alerts = Arc::new(RecordingAlerts::default());
    let app = ingest_router(IngestState::default().with_alerts(alerts.clone()));

    let batch = json!({
        "logs": [record(3, "a"), record(3, "b"), record(1, "c")],
        "sessionId": "s1",
        "timestamp": "2026-10-19T12:00:01Z",
    });
    let (status, body) = send(app, post("/api/logs", batch.to_string())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "processed": 3, "sessionId": "s1"}));
    assert_eq!(
        *alerts.0.lock().unwrap(),
        [Alert::ErrorBurst { session_id: Some("s1".into()), count: 2 }]
    );
}

#[tokio::test]
async fn slow_api_average_is_alerted() {
    let alerts = Arc::new(RecordingAlerts::default());
    let app = ingest_router(IngestState::default().with_alerts(alerts.clone()));

    let batch = json!({"logs": [api_timing(1200.0), api_timing(1100.0)], "sessionId": "s1"});
    let (status, _) = send(app, post("/api/logs", batch.to_string())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        *alerts.0.lock().unwrap(),
        [Alert::SlowPerformance { session_id: Some("s1".into()), average_ms: 1150.0 }]
    );
}

#[tokio::test]
async fn empty_or_missing_logs_are_rejected() {
    let app = ingest_router(IngestState::default());

    for payload in [json!({"logs": []}), json!({"sessionId": "s1"}), json!({"logs": "nope"})] {
        let (status, body) = send(app.clone(), post("/api/logs", payload.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Invalid logs data"}));
    }
}

#[tokio::test]
async fn malformed_input_is_an_internal_error() {
    let app = ingest_router(IngestState::default());

    let (status, body) = send(app.clone(), post("/api/logs", "{not json")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Internal server error"}));

    let unknown_level = json!({"logs": [record(9, "x")]});
    let (status, _) = send(app, post("/api/logs", unknown_level.to_string())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn oversized_body_is_rejected_as_too_large() {
    let store = Arc::new(MemoryStore::default());
    let app = ingest_router(IngestState::default().with_store(store.clone()));

    let padding = "x".repeat(MAX_BODY_BYTES);
    let batch = json!({"logs": [record(1, &padding)]});
    let (status, body) = send(app.clone(), post("/api/logs", batch.to_string())).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, json!({"error": "Payload too large"}));
    assert!(store.records.lock().unwrap().is_empty());

    let report = json!({"page": padding});
    let (status, _) = send(app, post("/api/performance", report.to_string())).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn store_failure_is_an_internal_error() {
    let app = ingest_router(IngestState::default().with_store(Arc::new(FailingStore)));
    let batch = json!({"logs": [record(1, "x")]});

    let (status, body) = send(app, post("/api/logs", batch.to_string())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Internal server error"}));
}

#[tokio::test]
async fn records_are_enriched_before_storage() {
    let store = Arc::new(MemoryStore::default());
    let app = ingest_router(IngestState::default().with_store(store.clone()));

    let mut with_agent = record(1, "has agent");
    with_agent["userAgent"] = json!("client/1.0");
    let batch = json!({"logs": [record(1, "no agent"), with_agent]});

    let peer: SocketAddr = "198.51.100.4:40000".parse().unwrap();
    let mut req = post("/api/logs", batch.to_string());
    req.headers_mut().insert("user-agent", "header-agent".parse().unwrap());
    req.extensions_mut().insert(ConnectInfo(peer));
    let (status, body) = send(app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], Value::Null);

    let stored = store.records.lock().unwrap().clone();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|r| r.ip == "198.51.100.4"));
    assert_eq!(stored[0].record.user_agent.as_deref(), Some("header-agent"));
    assert_eq!(stored[1].record.user_agent.as_deref(), Some("client/1.0"));

    let wire = serde_json::to_value(&stored[0]).unwrap();
    assert!(wire.get("receivedAt").is_some());
    assert_eq!(wire["message"], "no agent");
}

#[tokio::test]
async fn forwarded_header_is_used_without_peer_address() {
    let store = Arc::new(MemoryStore::default());
    let app = ingest_router(IngestState::default().with_store(store.clone()));

    let mut req = post("/api/logs", json!({"logs": [record(1, "x")]}).to_string());
    req.headers_mut().insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
    let (status, _) = send(app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.records.lock().unwrap()[0].ip, "203.0.113.9");
}

#[tokio::test]
async fn query_defaults_to_empty_result() {
    let app = ingest_router(IngestState::default());
    let req = Request::builder().uri("/api/logs?sessionId=s1").body(Body::empty()).unwrap();

    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "logs": [], "count": 0}));
}

#[tokio::test]
async fn query_filters_are_passed_to_store() {
    let store = Arc::new(MemoryStore::default());
    let app = ingest_router(IngestState::default().with_store(store.clone()));

    let batch = json!({"logs": [record(3, "boom"), record(1, "fine")]});
    send(app.clone(), post("/api/logs", batch.to_string())).await;

    let req = Request::builder()
        .uri("/api/logs?sessionId=s1&level=error")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app.clone(), req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["logs"][0]["message"], "boom");
    assert_eq!(
        store.queries.lock().unwrap()[0],
        LogQuery { session_id: Some("s1".into()), level: Some(LogLevel::Error), limit: 100 }
    );

    let bad = Request::builder().uri("/api/logs?level=loud").body(Body::empty()).unwrap();
    let (status, _) = send(app, bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn performance_report_is_accepted() {
    let app = ingest_router(IngestState::default());
    let report = json!({
        "page": "compose",
        "metrics": {
            "pageLoadTime": 900.0,
            "firstContentfulPaint": {"status": "observed", "value": 1500.0},
            "largestContentfulPaint": {"status": "timed_out"},
            "cumulativeLayoutShift": {"status": "observed", "value": 0.1},
            "firstInputDelay": {"status": "not_observed"},
            "timeToInteractive": {"status": "not_observed"},
        },
        "timestamp": "2026-10-19T12:00:00Z",
        "userAgent": "client/1.0",
    });

    let (status, body) = send(app.clone(), post("/api/performance", report.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    let (status, body) = send(app, post("/api/performance", "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Invalid metrics data"}));
}
