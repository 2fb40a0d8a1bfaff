//! Sample records and their composite identity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::services::upsert_store::Upsertable;

/// Which upstream source produced a sample record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SampleOrigin {
    /// Fragment embedded in a request file's `samples` list
    FromRequest,
    /// Standalone `*sample.json` file
    FromSampleFile,
}

impl SampleOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleOrigin::FromRequest => "FROM_REQUEST",
            SampleOrigin::FromSampleFile => "FROM_SAMPLE_FILE",
        }
    }

    /// Parse the stored column value back into an origin
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FROM_REQUEST" => Some(SampleOrigin::FromRequest),
            "FROM_SAMPLE_FILE" => Some(SampleOrigin::FromSampleFile),
            _ => None,
        }
    }
}

impl fmt::Display for SampleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite identity `(request_key, sample_key)`
///
/// Null components are legal key values and group together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleKey {
    pub request_key: Option<String>,
    pub sample_key: Option<String>,
}

impl SampleKey {
    pub fn new(request_key: Option<&str>, sample_key: Option<&str>) -> Self {
        Self {
            request_key: request_key.map(str::to_owned),
            sample_key: sample_key.map(str::to_owned),
        }
    }

    /// Unambiguous single-column encoding (`["REQ1","S1"]`, `[null,"S1"]`)
    pub fn encode(&self) -> String {
        serde_json::json!([self.request_key, self.sample_key]).to_string()
    }
}

/// A sample from either origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRecord {
    /// `additionalProperties.igoRequestId` of the sample payload itself
    pub request_key: Option<String>,
    /// `sampleName`
    pub sample_key: Option<String>,
    pub cmo_sample_name: Option<String>,
    /// `cfDNA2dBarcode`
    pub barcode: Option<String>,
    /// `cmoPatientId`
    pub patient_id: Option<String>,
    /// The sample JSON exactly as it appeared in its source
    pub sample_json: String,
    pub ingest_timestamp: DateTime<Utc>,
    pub origin: SampleOrigin,
}

impl SampleRecord {
    pub fn composite_key(&self) -> SampleKey {
        SampleKey {
            request_key: self.request_key.clone(),
            sample_key: self.sample_key.clone(),
        }
    }
}

impl Upsertable for SampleRecord {
    type Key = SampleKey;
    type Sequence = DateTime<Utc>;

    fn key(&self) -> Option<SampleKey> {
        Some(self.composite_key())
    }

    fn sequence(&self) -> DateTime<Utc> {
        self.ingest_timestamp
    }
}
