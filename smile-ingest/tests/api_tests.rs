//! Integration tests for the read-only HTTP query surface

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use smile_common::EventBus;
use smile_ingest::services::MemoryLandingStore;
use smile_ingest::workflow::{Pipeline, PipelineConfig};
use smile_ingest::{build_router, AppState};
use std::sync::Arc;
use tower::util::ServiceExt;

/// Test helper: app over a pipeline that has ingested one request and one bad file
async fn create_test_app() -> (axum::Router, AppState) {
    let pipeline = Pipeline::new(PipelineConfig::default(), EventBus::new(100));
    let store = MemoryLandingStore::new("/landing");
    let at = |s: i64| Utc.timestamp_opt(1_709_280_000 + s, 0).unwrap();

    store.land(
        "/landing/REQ1_request.json",
        json!({
            "igoRequestId": "REQ1",
            "samples": [
                {"sampleName": "S1", "additionalProperties": {"igoRequestId": "REQ1"}}
            ]
        })
        .to_string(),
        at(1),
    );
    store.land(
        "/landing/orphan_sample.json",
        json!({"sampleName": "S9", "cmoSampleName": "C-9"}).to_string(),
        at(2),
    );
    store.land("/landing/bad_sample.json", "not json", at(3));
    pipeline.run_pass(&store).await.unwrap();

    let state = AppState::new(Arc::new(pipeline));
    (build_router(state.clone()), state)
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, state) = create_test_app().await;

    let (status, body) = get(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "smile-ingest");
    assert!(body.get("last_error").is_none());

    *state.last_error.write().await = Some("disk full".to_string());
    let (_, body) = get(app, "/health").await;
    assert_eq!(body["status"], "halted");
    assert_eq!(body["last_error"], "disk full");
}

#[tokio::test]
async fn test_list_and_get_requests() {
    let (app, _) = create_test_app().await;

    let (status, body) = get(app.clone(), "/requests").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["requestKey"], "REQ1");

    let (status, body) = get(app.clone(), "/requests/REQ1").await;
    assert_eq!(status, StatusCode::OK);
    let stored: Value = serde_json::from_str(body["requestJson"].as_str().unwrap()).unwrap();
    assert_eq!(stored["igoRequestId"], "REQ1");

    let (status, body) = get(app, "/requests/NOPE").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_samples_with_null_key_segment() {
    let (app, _) = create_test_app().await;

    let (status, body) = get(app.clone(), "/samples").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = get(app.clone(), "/samples/REQ1/S1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["origin"], "FROM_REQUEST");

    let (status, body) = get(app.clone(), "/samples/_/S9").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requestKey"], Value::Null);
    assert_eq!(body["cmoSampleName"], "C-9");
    assert_eq!(body["origin"], "FROM_SAMPLE_FILE");

    let (status, _) = get(app, "/samples/REQ1/S9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_lookup_reaches_underscore_key_values() {
    let pipeline = Pipeline::new(PipelineConfig::default(), EventBus::new(100));
    let store = MemoryLandingStore::new("/landing");
    store.land(
        "/landing/REQ2_underscore_sample.json",
        json!({"sampleName": "_", "additionalProperties": {"igoRequestId": "REQ2"}}).to_string(),
        Utc::now(),
    );
    store.land(
        "/landing/orphan_sample.json",
        json!({"sampleName": "S9"}).to_string(),
        Utc::now(),
    );
    pipeline.run_pass(&store).await.unwrap();
    let app = build_router(AppState::new(Arc::new(pipeline)));

    // The path form reads "_" as null
    let (status, _) = get(app.clone(), "/samples/REQ2/_").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get(app.clone(), "/samples/lookup?requestKey=REQ2&sampleKey=_").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requestKey"], "REQ2");
    assert_eq!(body["sampleKey"], "_");

    // An absent parameter is null
    let (status, body) = get(app.clone(), "/samples/lookup?sampleKey=S9").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requestKey"], Value::Null);

    let (status, body) = get(app, "/samples/lookup?requestKey=REQ2").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_audit_newest_first_and_limit_validation() {
    let (app, _) = create_test_app().await;

    let (status, body) = get(app.clone(), "/audit?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["fileName"], "bad_sample.json");
    assert_eq!(entries[0]["status"], "parse_error");

    let (status, body) = get(app, "/audit?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_stats_counts_tables_and_last_pass() {
    let (app, _) = create_test_app().await;

    let (status, body) = get(app, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["audit_entries"], 3);
    assert_eq!(body["requests"], 1);
    assert_eq!(body["samples_from_request"], 1);
    assert_eq!(body["samples_from_sample_file"], 1);
    assert_eq!(body["samples"], 2);
    assert_eq!(body["last_pass"]["files"], 3);
    assert_eq!(body["last_pass"]["parse_errors"], 1);
}
