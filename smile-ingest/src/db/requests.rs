//! Current-Requests table (`silver_requests`)

use smile_common::Result;
use sqlx::{Row, SqlitePool};

use super::parse_timestamp;
use crate::models::{sequence_text, RequestRecord};

/// Upsert a request row unless the stored row is newer
///
/// Returns `false` when the record has no key or lost to a newer row.
pub async fn upsert_request(pool: &SqlitePool, record: &RequestRecord) -> Result<bool> {
    let Some(request_key) = record.request_key.as_deref() else {
        return Ok(false);
    };

    let result = sqlx::query(
        r#"
        INSERT INTO silver_requests (request_key, request_json, ingest_time)
        VALUES (?, ?, ?)
        ON CONFLICT(request_key) DO UPDATE SET
            request_json = excluded.request_json,
            ingest_time = excluded.ingest_time
        WHERE excluded.ingest_time >= silver_requests.ingest_time
        "#,
    )
    .bind(request_key)
    .bind(&record.request_json)
    .bind(sequence_text(&record.ingest_timestamp))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn load_requests(pool: &SqlitePool) -> Result<Vec<RequestRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT request_key, request_json, ingest_time
        FROM silver_requests
        ORDER BY request_key
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut requests = Vec::with_capacity(rows.len());
    for row in rows {
        let ingest_time: String = row.get("ingest_time");
        requests.push(RequestRecord {
            request_key: row.get("request_key"),
            request_json: row.get("request_json"),
            ingest_timestamp: parse_timestamp("ingest_time", &ingest_time)?,
        });
    }
    Ok(requests)
}

pub async fn count_requests(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM silver_requests")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
