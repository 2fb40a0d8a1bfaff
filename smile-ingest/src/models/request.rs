//! Request records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::upsert_store::Upsertable;

/// A request as extracted from a `*request.json` file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    /// `igoRequestId`; records without one never reach the request table
    pub request_key: Option<String>,
    /// The file content, byte-for-byte
    pub request_json: String,
    pub ingest_timestamp: DateTime<Utc>,
}

impl Upsertable for RequestRecord {
    type Key = String;
    type Sequence = DateTime<Utc>;

    fn key(&self) -> Option<String> {
        self.request_key.clone()
    }

    fn sequence(&self) -> DateTime<Utc> {
        self.ingest_timestamp
    }
}
