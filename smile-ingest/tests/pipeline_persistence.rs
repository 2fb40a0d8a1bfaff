//! Persistence, recovery and ledger resume against a file-backed database

use chrono::Utc;
use serde_json::json;
use smile_common::EventBus;
use smile_ingest::db;
use smile_ingest::db::samples::SampleTable;
use smile_ingest::models::{SampleKey, SampleOrigin};
use smile_ingest::services::{DirectoryLandingStore, LandedFile, LandingStore, RawIngestReader};
use smile_ingest::workflow::{FileOutcome, Pipeline, PipelineConfig};
use std::path::Path;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    landing: std::path::PathBuf,
    db_path: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let landing = dir.path().join("landing");
        std::fs::create_dir_all(&landing).unwrap();
        let db_path = dir.path().join("smile-lakehouse.db");
        Self {
            _dir: dir,
            landing,
            db_path,
        }
    }

    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            landing_path: self.landing.clone(),
            ..PipelineConfig::default()
        }
    }

    fn write(&self, name: &str, content: &str) {
        write_file(&self.landing, name, content);
    }
}

fn write_file(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

fn request_with_samples() -> String {
    json!({
        "igoRequestId": "REQ1",
        "projectManagerName": "Smith",
        "samples": [
            {"sampleName": "S1", "cmoSampleName": "C-1", "additionalProperties": {"igoRequestId": "REQ1"}},
            {"sampleName": "S2", "cmoSampleName": "C-2", "additionalProperties": {"igoRequestId": "REQ1"}}
        ]
    })
    .to_string()
}

#[tokio::test]
async fn test_tables_survive_restart() {
    let fx = Fixture::new();
    fx.write("REQ1_request.json", &request_with_samples());
    fx.write(
        "REQ1_S3_sample.json",
        &json!({"sampleName": "S3", "additionalProperties": {"igoRequestId": "REQ1"}}).to_string(),
    );
    fx.write("broken_sample.json", "{");

    let (requests, samples, from_request) = {
        let pool = db::init_database_pool(&fx.db_path).await.unwrap();
        let pipeline = Pipeline::with_storage(fx.config(), EventBus::default(), pool.clone())
            .await
            .unwrap();
        let store = DirectoryLandingStore::with_ledger(&fx.landing, pool.clone())
            .await
            .unwrap();

        let summary = pipeline.run_pass(&store).await.unwrap();
        assert_eq!(summary.files, 3);
        assert_eq!(summary.parse_errors, 1);

        assert_eq!(db::requests::count_requests(&pool).await.unwrap(), 1);
        assert_eq!(
            db::samples::count_samples(&pool, SampleTable::Reconciled)
                .await
                .unwrap(),
            3
        );
        assert_eq!(db::audit::count_entries(&pool).await.unwrap(), 3);
        assert_eq!(db::ledger::count_ingested(&pool).await.unwrap(), 3);

        let snapshot = (
            pipeline.current_requests(),
            pipeline.current_samples(),
            pipeline.samples_by_origin(SampleOrigin::FromRequest),
        );
        pool.close().await;
        snapshot
    };

    let pool = db::init_database_pool(&fx.db_path).await.unwrap();
    let recovered = Pipeline::with_storage(fx.config(), EventBus::default(), pool.clone())
        .await
        .unwrap();

    assert_eq!(recovered.current_requests(), requests);
    assert_eq!(recovered.current_samples(), samples);
    assert_eq!(recovered.samples_by_origin(SampleOrigin::FromRequest), from_request);
    assert_eq!(recovered.current_samples().len(), 3);

    // The stored audit log outlives the process
    let audit = db::audit::load_recent(&pool, 10).await.unwrap();
    assert_eq!(audit.len(), 3);
    assert!(audit.iter().any(|e| e.raw_text == "{"));
}

#[tokio::test]
async fn test_ledger_resumes_without_reprocessing() {
    let fx = Fixture::new();
    fx.write("REQ1_request.json", &request_with_samples());

    {
        let pool = db::init_database_pool(&fx.db_path).await.unwrap();
        let pipeline = Pipeline::with_storage(fx.config(), EventBus::default(), pool.clone())
            .await
            .unwrap();
        let store = DirectoryLandingStore::with_ledger(&fx.landing, pool.clone())
            .await
            .unwrap();
        pipeline.run_pass(&store).await.unwrap();
        pool.close().await;
    }

    let pool = db::init_database_pool(&fx.db_path).await.unwrap();
    let store = DirectoryLandingStore::with_ledger(&fx.landing, pool.clone())
        .await
        .unwrap();
    assert_eq!(store.ledger_len(), 1);
    assert!(store.poll().await.unwrap().is_empty());

    // An overwritten file is delivered again
    fx.write(
        "REQ1_request.json",
        &json!({"igoRequestId": "REQ1", "projectManagerName": "Jones"}).to_string(),
    );
    let pipeline = Pipeline::with_storage(fx.config(), EventBus::default(), pool.clone())
        .await
        .unwrap();
    let summary = pipeline.run_pass(&store).await.unwrap();
    assert_eq!(summary.requests, 1);
    assert!(pipeline.request("REQ1").unwrap().request_json.contains("Jones"));

    // Embedded samples from the first version are still current
    assert!(pipeline
        .sample(&SampleKey::new(Some("REQ1"), Some("S1")))
        .is_some());
}

#[tokio::test]
async fn test_audit_count_comes_from_database_across_restart() {
    let fx = Fixture::new();
    for i in 0..20 {
        fx.write(
            &format!("REQ{}_request.json", i),
            &json!({"igoRequestId": format!("REQ{}", i)}).to_string(),
        );
    }

    let pool = db::init_database_pool(&fx.db_path).await.unwrap();
    {
        let pipeline = Pipeline::with_storage(fx.config(), EventBus::default(), pool.clone())
            .await
            .unwrap();
        let store = DirectoryLandingStore::new(&fx.landing);
        pipeline.run_pass(&store).await.unwrap();

        assert_eq!(pipeline.stats().audit_entries, 20);
        // Stored log only; nothing is held in memory
        assert!(pipeline.audit_log().is_empty());
    }

    let recovered = Pipeline::with_storage(fx.config(), EventBus::default(), pool.clone())
        .await
        .unwrap();
    let stored = db::audit::count_entries(&pool).await.unwrap();
    assert_eq!(stored, 20);
    assert_eq!(recovered.stats().audit_entries, stored as usize);
    assert!(recovered.audit_log().is_empty());
}

#[tokio::test]
async fn test_same_raw_record_is_deduplicated_by_stored_log() {
    let pool = db::init_memory_pool().await.unwrap();
    let pipeline = Pipeline::with_storage(PipelineConfig::default(), EventBus::default(), pool.clone())
        .await
        .unwrap();
    let file = LandedFile::new(
        "/landing",
        "/landing/REQ1_request.json",
        json!({"igoRequestId": "REQ1"}).to_string().into_bytes(),
        Utc::now(),
    );
    let raw = RawIngestReader::default().read(&file).unwrap();

    assert!(matches!(pipeline.ingest(raw.clone()).await.unwrap(), FileOutcome::Request { .. }));
    assert_eq!(pipeline.ingest(raw).await.unwrap(), FileOutcome::Duplicate);
    assert_eq!(db::audit::count_entries(&pool).await.unwrap(), 1);
    assert_eq!(pipeline.stats().audit_entries, 1);
}

#[tokio::test]
async fn test_missing_landing_directory_is_fatal() {
    let fx = Fixture::new();
    let pool = db::init_memory_pool().await.unwrap();
    let pipeline = Pipeline::with_storage(fx.config(), EventBus::default(), pool.clone())
        .await
        .unwrap();
    let store = DirectoryLandingStore::with_ledger(fx.landing.join("gone"), pool)
        .await
        .unwrap();

    assert!(pipeline.run_pass(&store).await.is_err());
}
