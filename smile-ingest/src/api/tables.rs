//! Read-only views of the lakehouse tables
//!
//! Request and sample rows are served from the pipeline's in-memory tables.
//! The audit log is read from the database when one is attached, since it
//! outlives the process; otherwise from the in-memory log.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{AuditEntry, RequestRecord, SampleKey, SampleOrigin, SampleRecord};
use crate::workflow::pipeline::PipelineStats;
use crate::AppState;

/// Path segment standing for a null key component
///
/// A key component whose value is literally `_` cannot be addressed by path;
/// use `GET /samples/lookup`, which takes both components as query
/// parameters and treats an absent parameter as null.
pub const NULL_KEY_SEGMENT: &str = "_";

/// Current-Requests row
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRow {
    pub request_key: String,
    pub request_json: String,
    pub ingest_timestamp: DateTime<Utc>,
}

impl RequestRow {
    fn new(request_key: String, record: RequestRecord) -> Self {
        Self {
            request_key,
            request_json: record.request_json,
            ingest_timestamp: record.ingest_timestamp,
        }
    }
}

/// Current-Samples row
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRow {
    pub request_key: Option<String>,
    pub sample_key: Option<String>,
    pub cmo_sample_name: Option<String>,
    pub barcode: Option<String>,
    pub patient_id: Option<String>,
    pub sample_json: String,
    pub ingest_timestamp: DateTime<Utc>,
    pub origin: SampleOrigin,
}

impl From<SampleRecord> for SampleRow {
    fn from(record: SampleRecord) -> Self {
        Self {
            request_key: record.request_key,
            sample_key: record.sample_key,
            cmo_sample_name: record.cmo_sample_name,
            barcode: record.barcode,
            patient_id: record.patient_id,
            sample_json: record.sample_json,
            ingest_timestamp: record.ingest_timestamp,
            origin: record.origin,
        }
    }
}

/// Composite sample key as query parameters; an absent parameter is null
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleKeyQuery {
    pub request_key: Option<String>,
    pub sample_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: i64,
}

fn default_audit_limit() -> i64 {
    100
}

const MAX_AUDIT_LIMIT: i64 = 10_000;

/// GET /requests
pub async fn list_requests(State(state): State<AppState>) -> Json<Vec<RequestRow>> {
    let rows = state
        .pipeline
        .current_requests()
        .into_iter()
        .map(|(key, record)| RequestRow::new(key, record))
        .collect();
    Json(rows)
}

/// GET /requests/:request_key
pub async fn get_request(
    State(state): State<AppState>,
    Path(request_key): Path<String>,
) -> ApiResult<Json<RequestRow>> {
    state
        .pipeline
        .request(&request_key)
        .map(|record| Json(RequestRow::new(request_key.clone(), record)))
        .ok_or_else(|| ApiError::NotFound(format!("request {}", request_key)))
}

/// GET /samples
pub async fn list_samples(State(state): State<AppState>) -> Json<Vec<SampleRow>> {
    let rows = state
        .pipeline
        .current_samples()
        .into_values()
        .map(SampleRow::from)
        .collect();
    Json(rows)
}

/// GET /samples/:request_key/:sample_key
///
/// `_` in either segment means null; see [`NULL_KEY_SEGMENT`].
pub async fn get_sample(
    State(state): State<AppState>,
    Path((request_key, sample_key)): Path<(String, String)>,
) -> ApiResult<Json<SampleRow>> {
    let key = SampleKey::new(key_segment(&request_key), key_segment(&sample_key));
    sample_row(&state, key)
}

fn key_segment(segment: &str) -> Option<&str> {
    (segment != NULL_KEY_SEGMENT).then_some(segment)
}

/// GET /samples/lookup?requestKey=R&sampleKey=S
pub async fn lookup_sample(
    State(state): State<AppState>,
    Query(query): Query<SampleKeyQuery>,
) -> ApiResult<Json<SampleRow>> {
    let key = SampleKey::new(query.request_key.as_deref(), query.sample_key.as_deref());
    sample_row(&state, key)
}

fn sample_row(state: &AppState, key: SampleKey) -> ApiResult<Json<SampleRow>> {
    state
        .pipeline
        .sample(&key)
        .map(|record| Json(SampleRow::from(record)))
        .ok_or_else(|| ApiError::NotFound(format!("sample {}", key.encode())))
}

/// GET /audit?limit=N
pub async fn list_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    if !(1..=MAX_AUDIT_LIMIT).contains(&query.limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_AUDIT_LIMIT
        )));
    }

    let entries = match state.pipeline.storage() {
        Some(storage) => db::audit::load_recent(storage.pool(), query.limit).await?,
        None => state.pipeline.audit_log().recent(query.limit as usize),
    };
    Ok(Json(entries))
}

/// GET /stats
pub async fn get_stats(State(state): State<AppState>) -> Json<PipelineStats> {
    Json(state.pipeline.stats())
}

pub fn table_routes() -> Router<AppState> {
    Router::new()
        .route("/requests", get(list_requests))
        .route("/requests/:request_key", get(get_request))
        .route("/samples", get(list_samples))
        .route("/samples/lookup", get(lookup_sample))
        .route("/samples/:request_key/:sample_key", get(get_sample))
        .route("/audit", get(list_audit))
        .route("/stats", get(get_stats))
}
