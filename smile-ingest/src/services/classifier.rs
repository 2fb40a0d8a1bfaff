//! Record classifier and parser
//!
//! Routes a [`RawRecord`] by its file name suffix and extracts the typed
//! business fields from its JSON payload. Pure and synchronous: no I/O, no
//! shared state.
//!
//! # Schema
//! The payload schema is permissive. Missing or unknown fields are tolerated
//! and map to `None`; only malformed JSON syntax is an error.
//!
//! | Field              | Request file     | Sample payload                           |
//! |--------------------|------------------|------------------------------------------|
//! | request key        | `igoRequestId`   | `additionalProperties.igoRequestId`      |
//! | sample key         |                  | `sampleName`                             |
//! | CMO sample name    |                  | `cmoSampleName`                          |
//! | barcode            |                  | `cfDNA2dBarcode`                         |
//! | patient id         |                  | `cmoPatientId` (or `cmoPatientID`)       |
//! | embedded samples   | `samples` (list) |                                          |

use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::models::{RawRecord, RequestRecord, SampleOrigin, SampleRecord};

const REQUEST_ID_POINTER: &str = "/igoRequestId";
const SAMPLE_REQUEST_ID_POINTER: &str = "/additionalProperties/igoRequestId";
const SAMPLE_NAME_POINTER: &str = "/sampleName";
const CMO_SAMPLE_NAME_POINTER: &str = "/cmoSampleName";
const BARCODE_POINTER: &str = "/cfDNA2dBarcode";
const PATIENT_ID_POINTERS: [&str; 2] = ["/cmoPatientId", "/cmoPatientID"];

/// Malformed JSON in a file or in an embedded sample fragment
///
/// Carries the offending payload so the failure can be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed JSON in {file_path} at line {line} column {column}: {message}")]
pub struct ParseError {
    pub file_path: String,
    pub message: String,
    pub line: usize,
    pub column: usize,
    /// The payload that failed to parse, verbatim
    pub raw_payload: String,
}

impl ParseError {
    fn from_serde(file_path: &str, raw_payload: &str, err: &serde_json::Error) -> Self {
        Self {
            file_path: file_path.to_string(),
            message: err.to_string(),
            line: err.line(),
            column: err.column(),
            raw_payload: raw_payload.to_string(),
        }
    }
}

/// An embedded sample that names a different request than its parent file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdDivergence {
    pub parent_request_key: Option<String>,
    pub sample_request_key: Option<String>,
    pub sample_key: Option<String>,
}

/// Everything extracted from one request file
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBundle {
    pub request: RequestRecord,
    /// Embedded samples, `origin = FROM_REQUEST`, in list order
    pub samples: Vec<SampleRecord>,
    /// Embedded fragments whose text failed to parse
    pub fragment_errors: Vec<ParseError>,
    /// Embedded samples whose own request id differs from the parent's
    pub divergences: Vec<RequestIdDivergence>,
}

/// Outcome of classifying one raw record
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Request(RequestBundle),
    Sample(SampleRecord),
    /// File name matched no known suffix
    Unclassified,
    ParseError(ParseError),
}

/// Which path a file name routes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Request,
    Sample,
    Unclassified,
}

/// Suffix-based classifier
#[derive(Debug, Clone)]
pub struct RecordClassifier {
    request_suffix: String,
    sample_suffix: String,
}

impl RecordClassifier {
    pub fn new(request_suffix: impl Into<String>, sample_suffix: impl Into<String>) -> Self {
        Self {
            request_suffix: request_suffix.into(),
            sample_suffix: sample_suffix.into(),
        }
    }

    /// Case-sensitive suffix match on the file name
    pub fn kind_of(&self, file_name: &str) -> FileKind {
        if file_name.ends_with(&self.request_suffix) {
            FileKind::Request
        } else if file_name.ends_with(&self.sample_suffix) {
            FileKind::Sample
        } else {
            FileKind::Unclassified
        }
    }

    pub fn classify(&self, raw: &RawRecord) -> Classification {
        match self.kind_of(&raw.file_name) {
            FileKind::Request => match parse_request(raw) {
                Ok(bundle) => Classification::Request(bundle),
                Err(e) => Classification::ParseError(e),
            },
            FileKind::Sample => match serde_json::from_str::<Value>(&raw.raw_text) {
                Ok(payload) => Classification::Sample(sample_from_payload(
                    &payload,
                    raw.raw_text.clone(),
                    raw,
                    SampleOrigin::FromSampleFile,
                )),
                Err(e) => Classification::ParseError(ParseError::from_serde(
                    &raw.file_path,
                    &raw.raw_text,
                    &e,
                )),
            },
            FileKind::Unclassified => Classification::Unclassified,
        }
    }
}

impl Default for RecordClassifier {
    fn default() -> Self {
        Self::new("request.json", "sample.json")
    }
}

// ============================================================================
// Request path
// ============================================================================

/// Borrowed view of the `samples` list, each element kept as raw text
#[derive(Deserialize)]
struct EmbeddedSamples<'a> {
    #[serde(borrow, default)]
    samples: Option<Vec<&'a RawValue>>,
}

fn parse_request(raw: &RawRecord) -> Result<RequestBundle, ParseError> {
    let payload: Value = serde_json::from_str(&raw.raw_text)
        .map_err(|e| ParseError::from_serde(&raw.file_path, &raw.raw_text, &e))?;

    let request = RequestRecord {
        request_key: text_at(&payload, REQUEST_ID_POINTER),
        request_json: raw.raw_text.clone(),
        ingest_timestamp: raw.ingest_timestamp,
    };

    let mut bundle = RequestBundle {
        request,
        samples: Vec::new(),
        fragment_errors: Vec::new(),
        divergences: Vec::new(),
    };

    let has_sample_list = payload
        .get("samples")
        .map(Value::is_array)
        .unwrap_or(false);
    if !has_sample_list {
        return Ok(bundle);
    }

    let fragments = match serde_json::from_str::<EmbeddedSamples>(&raw.raw_text) {
        Ok(embedded) => embedded.samples.unwrap_or_default(),
        Err(e) => {
            // Syntax is already known good; this is a shape the borrowed view cannot express
            warn!(path = %raw.file_path, error = %e, "Cannot read embedded sample list");
            return Ok(bundle);
        }
    };

    for (index, fragment) in fragments.into_iter().enumerate() {
        let text = fragment.get();
        let (payload, sample_json) = match text.trim_start().as_bytes().first() {
            Some(b'{') => match serde_json::from_str::<Value>(text) {
                Ok(payload) => (payload, text.to_string()),
                Err(e) => {
                    bundle
                        .fragment_errors
                        .push(ParseError::from_serde(&raw.file_path, text, &e));
                    continue;
                }
            },
            Some(b'"') => {
                // Already-serialised fragment: a JSON string holding JSON text
                let inner: String = match serde_json::from_str(text) {
                    Ok(inner) => inner,
                    Err(e) => {
                        bundle
                            .fragment_errors
                            .push(ParseError::from_serde(&raw.file_path, text, &e));
                        continue;
                    }
                };
                match serde_json::from_str::<Value>(&inner) {
                    Ok(payload) => (payload, inner),
                    Err(e) => {
                        bundle
                            .fragment_errors
                            .push(ParseError::from_serde(&raw.file_path, &inner, &e));
                        continue;
                    }
                }
            }
            _ => {
                warn!(
                    path = %raw.file_path,
                    index,
                    "Skipping embedded sample that is neither an object nor a JSON string"
                );
                continue;
            }
        };

        let sample = sample_from_payload(&payload, sample_json, raw, SampleOrigin::FromRequest);
        if sample.request_key != bundle.request.request_key {
            bundle.divergences.push(RequestIdDivergence {
                parent_request_key: bundle.request.request_key.clone(),
                sample_request_key: sample.request_key.clone(),
                sample_key: sample.sample_key.clone(),
            });
        }
        bundle.samples.push(sample);
    }

    Ok(bundle)
}

// ============================================================================
// Field extraction
// ============================================================================

fn sample_from_payload(
    payload: &Value,
    sample_json: String,
    raw: &RawRecord,
    origin: SampleOrigin,
) -> SampleRecord {
    SampleRecord {
        request_key: text_at(payload, SAMPLE_REQUEST_ID_POINTER),
        sample_key: text_at(payload, SAMPLE_NAME_POINTER),
        cmo_sample_name: text_at(payload, CMO_SAMPLE_NAME_POINTER),
        barcode: text_at(payload, BARCODE_POINTER),
        patient_id: PATIENT_ID_POINTERS
            .iter()
            .find_map(|pointer| text_at(payload, pointer)),
        sample_json,
        ingest_timestamp: raw.ingest_timestamp,
        origin,
    }
}

/// String view of the value at `pointer`
///
/// Scalars are rendered as text, nested objects and arrays as compact JSON,
/// null and missing fields as `None`. Non-object payloads have no fields.
fn text_at(payload: &Value, pointer: &str) -> Option<String> {
    match payload.pointer(pointer)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        nested @ (Value::Array(_) | Value::Object(_)) => Some(nested.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================
