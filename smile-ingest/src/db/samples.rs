//! Sample tables: one per origin plus the reconciled view

use smile_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use super::parse_timestamp;
use crate::models::{sequence_text, SampleOrigin, SampleRecord};

/// The three sample tables sharing one row layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleTable {
    /// Samples embedded in request files
    FromRequest,
    /// Standalone sample files
    FromSampleFile,
    /// Reconciled Current-Samples
    Reconciled,
}

impl SampleTable {
    pub const ALL: [SampleTable; 3] = [
        SampleTable::FromRequest,
        SampleTable::FromSampleFile,
        SampleTable::Reconciled,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            SampleTable::FromRequest => "silver_samples_from_request",
            SampleTable::FromSampleFile => "silver_samples_from_sample_file",
            SampleTable::Reconciled => "silver_samples",
        }
    }

    /// Per-origin table a sample is merged into
    pub fn for_origin(origin: SampleOrigin) -> Self {
        match origin {
            SampleOrigin::FromRequest => SampleTable::FromRequest,
            SampleOrigin::FromSampleFile => SampleTable::FromSampleFile,
        }
    }
}

/// Upsert a sample row unless the stored row is newer
pub async fn upsert_sample(pool: &SqlitePool, table: SampleTable, record: &SampleRecord) -> Result<bool> {
    let name = table.table_name();
    let sql = format!(
        r#"
        INSERT INTO {name} (
            row_key, request_key, sample_key, cmo_sample_name, barcode, patient_id,
            sample_json, ingest_time, origin
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(row_key) DO UPDATE SET
            cmo_sample_name = excluded.cmo_sample_name,
            barcode = excluded.barcode,
            patient_id = excluded.patient_id,
            sample_json = excluded.sample_json,
            ingest_time = excluded.ingest_time,
            origin = excluded.origin
        WHERE excluded.ingest_time >= {name}.ingest_time
        "#
    );

    let result = sqlx::query(&sql)
        .bind(record.composite_key().encode())
        .bind(&record.request_key)
        .bind(&record.sample_key)
        .bind(&record.cmo_sample_name)
        .bind(&record.barcode)
        .bind(&record.patient_id)
        .bind(&record.sample_json)
        .bind(sequence_text(&record.ingest_timestamp))
        .bind(record.origin.as_str())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn load_samples(pool: &SqlitePool, table: SampleTable) -> Result<Vec<SampleRecord>> {
    let sql = format!(
        r#"
        SELECT request_key, sample_key, cmo_sample_name, barcode, patient_id,
               sample_json, ingest_time, origin
        FROM {}
        ORDER BY row_key
        "#,
        table.table_name()
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut samples = Vec::with_capacity(rows.len());
    for row in rows {
        let ingest_time: String = row.get("ingest_time");
        let origin_str: String = row.get("origin");
        let origin = SampleOrigin::parse(&origin_str)
            .ok_or_else(|| Error::Internal(format!("Unknown sample origin {:?}", origin_str)))?;

        samples.push(SampleRecord {
            request_key: row.get("request_key"),
            sample_key: row.get("sample_key"),
            cmo_sample_name: row.get("cmo_sample_name"),
            barcode: row.get("barcode"),
            patient_id: row.get("patient_id"),
            sample_json: row.get("sample_json"),
            ingest_timestamp: parse_timestamp("ingest_time", &ingest_time)?,
            origin,
        });
    }
    Ok(samples)
}

pub async fn count_samples(pool: &SqlitePool, table: SampleTable) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.table_name()))
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use chrono::{Duration, TimeZone, Utc};

    fn sample(request: Option<&str>, name: &str, secs: i64, origin: SampleOrigin) -> SampleRecord {
        SampleRecord {
            request_key: request.map(str::to_owned),
            sample_key: Some(name.to_string()),
            cmo_sample_name: Some(format!("C-{}", secs)),
            barcode: None,
            patient_id: Some("P-1".to_string()),
            sample_json: format!("{{\"v\":{}}}", secs),
            ingest_timestamp: Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap()
                + Duration::seconds(secs),
            origin,
        }
    }

    #[tokio::test]
    async fn test_null_request_key_rows_are_distinct_and_round_trip() {
        let pool = init_memory_pool().await.unwrap();
        let table = SampleTable::FromSampleFile;
        let orphan = sample(None, "S1", 1, SampleOrigin::FromSampleFile);
        let keyed = sample(Some("REQ1"), "S1", 1, SampleOrigin::FromSampleFile);

        upsert_sample(&pool, table, &orphan).await.unwrap();
        upsert_sample(&pool, table, &keyed).await.unwrap();

        let rows = load_samples(&pool, table).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&orphan));
        assert!(rows.contains(&keyed));
    }

    #[tokio::test]
    async fn test_older_sample_does_not_overwrite() {
        let pool = init_memory_pool().await.unwrap();
        let table = SampleTable::Reconciled;

        upsert_sample(&pool, table, &sample(Some("R"), "S1", 9, SampleOrigin::FromRequest))
            .await
            .unwrap();
        let written = upsert_sample(&pool, table, &sample(Some("R"), "S1", 2, SampleOrigin::FromSampleFile))
            .await
            .unwrap();

        assert!(!written);
        let rows = load_samples(&pool, table).await.unwrap();
        assert_eq!(rows[0].origin, SampleOrigin::FromRequest);
        assert_eq!(count_samples(&pool, SampleTable::FromRequest).await.unwrap(), 0);
    }
}
