//! Raw ingest reader
//!
//! Turns landed files into [`RawRecord`]s: decodes the content as UTF-8,
//! stamps the delivery with an `ingest_id`, the UTC arrival time and the
//! reporting-timezone arrival date.
//!
//! [`RawIngestReader::stream`] is the continuous form: a lazy, unbounded
//! stream that polls the landing store, yields one event per file, and
//! acknowledges a file only once the consumer asks for the next event.
//! A crash between yield and acknowledgement redelivers the file, so
//! consumers must be idempotent under exact-duplicate redelivery.

use async_stream::try_stream;
use chrono::{FixedOffset, Offset, Utc};
use futures::Stream;
use smile_common::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::landing_scanner::{LandedFile, LandingStore};
use crate::models::{FileMetadata, RawRecord};

/// A landed file that cannot be turned into a raw record
///
/// Never fatal: the file is reported and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    /// The landing store could not read the file
    #[error("Cannot read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    /// Content is not valid UTF-8 text
    #[error("{path} is not UTF-8 text: {reason}")]
    NotText { path: String, reason: String },
}

impl IngestError {
    pub fn path(&self) -> &str {
        match self {
            IngestError::Unreadable { path, .. } | IngestError::NotText { path, .. } => path,
        }
    }
}

/// What the continuous reader stream yields
#[derive(Debug, Clone, PartialEq)]
pub enum ReadEvent {
    Record(RawRecord),
    Skipped(IngestError),
    /// Every delivery of one poll has been yielded
    PollCompleted { files: usize },
}

/// Decodes landed files into raw records
#[derive(Debug, Clone)]
pub struct RawIngestReader {
    reporting_offset: FixedOffset,
}

impl RawIngestReader {
    /// Reader deriving `ingest_date` in the given reporting offset
    pub fn new(reporting_offset: FixedOffset) -> Self {
        Self { reporting_offset }
    }

    /// Reader using a whole-hour UTC offset, clamped to a valid range
    pub fn with_offset_hours(hours: i32) -> Self {
        let seconds = hours.clamp(-23, 23) * 3600;
        let offset = FixedOffset::east_opt(seconds).unwrap_or_else(|| Utc.fix());
        Self::new(offset)
    }

    pub fn reporting_offset(&self) -> FixedOffset {
        self.reporting_offset
    }

    /// Decode one landed file
    pub fn read(&self, file: &LandedFile) -> std::result::Result<RawRecord, IngestError> {
        let raw_text = std::str::from_utf8(&file.bytes)
            .map_err(|e| IngestError::NotText {
                path: file.path.clone(),
                reason: e.to_string(),
            })?
            .to_string();

        let file_name = Path::new(&file.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.path.clone());

        Ok(RawRecord {
            ingest_id: Uuid::new_v4(),
            file_path: file.path.clone(),
            source_path: file.source_path.clone(),
            file_name,
            ingest_timestamp: file.arrived_at,
            ingest_date: file
                .arrived_at
                .with_timezone(&self.reporting_offset)
                .date_naive(),
            raw_text,
            file_metadata: FileMetadata {
                file_size: file.bytes.len() as u64,
                content_hash: file.content_hash.clone(),
                modified_at: file.modified_at,
            },
        })
    }

    /// Lazy, unbounded stream of read events
    ///
    /// Polls `store` every `poll_interval` until `cancel` fires. An `Err` item
    /// means the landing store is unreachable; the stream ends after it.
    pub fn stream(
        &self,
        store: Arc<dyn LandingStore>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<ReadEvent>> + Send + 'static {
        let reader = self.clone();
        try_stream! {
            loop {
                let batch = tokio::select! {
                    _ = cancel.cancelled() => break,
                    batch = store.poll() => batch,
                };
                let batch = batch?;
                let files = batch.len();

                for delivery in batch {
                    let file = match delivery {
                        Ok(file) => file,
                        Err(e) => {
                            warn!(path = %e.path(), error = %e, "Skipping unreadable file");
                            yield ReadEvent::Skipped(e);
                            continue;
                        }
                    };

                    match reader.read(&file) {
                        Ok(record) => {
                            yield ReadEvent::Record(record);
                        }
                        Err(e) => {
                            warn!(path = %file.path, error = %e, "Skipping undecodable file");
                            yield ReadEvent::Skipped(e);
                        }
                    }

                    // Resumed: the consumer has finished with this file
                    store.acknowledge(&file).await?;
                }

                debug!(files, "Landing poll completed");
                yield ReadEvent::PollCompleted { files };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
}

impl Default for RawIngestReader {
    fn default() -> Self {
        Self::with_offset_hours(-5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::landing_scanner::MemoryLandingStore;
    use chrono::{NaiveDate, TimeZone};
    use futures::StreamExt;

    #[test]
    fn test_read_stamps_provenance() {
        // 02:30 UTC is still the previous day at UTC-5
        let arrived_at = Utc.with_ymd_and_hms(2024, 5, 2, 2, 30, 0).unwrap();
        let file = LandedFile::new("/landing", "/landing/sub/A_request.json", b"{}".to_vec(), arrived_at);

        let record = RawIngestReader::default().read(&file).unwrap();
        assert_eq!(record.file_name, "A_request.json");
        assert_eq!(record.source_path, "/landing");
        assert_eq!(record.ingest_timestamp, arrived_at);
        assert_eq!(record.ingest_date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(record.raw_text, "{}");
        assert_eq!(record.file_metadata.file_size, 2);
        assert_eq!(record.file_metadata.content_hash, file.content_hash);
    }

    #[test]
    fn test_each_read_gets_a_fresh_ingest_id() {
        let file = LandedFile::new("/l", "/l/a_sample.json", b"{}".to_vec(), Utc::now());
        let reader = RawIngestReader::with_offset_hours(0);
        assert_ne!(reader.read(&file).unwrap().ingest_id, reader.read(&file).unwrap().ingest_id);
    }

    #[test]
    fn test_non_utf8_is_ingest_error() {
        let file = LandedFile::new("/l", "/l/bin_sample.json", vec![0xff, 0xfe, 0x00], Utc::now());
        let err = RawIngestReader::default().read(&file).unwrap_err();
        assert!(matches!(err, IngestError::NotText { .. }));
        assert_eq!(err.path(), "/l/bin_sample.json");
    }

    #[tokio::test]
    async fn test_stream_acknowledges_after_consumer_moves_on() {
        let store = Arc::new(MemoryLandingStore::new("mem"));
        store.land("a_request.json", "{}", Utc::now());
        store.land("b_sample.json", vec![0xffu8], Utc::now());

        let cancel = CancellationToken::new();
        let reader = RawIngestReader::default();
        let stream = reader.stream(store.clone(), Duration::from_millis(10), cancel.clone());
        futures::pin_mut!(stream);

        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, ReadEvent::Record(_)));
        assert!(store.acknowledged().is_empty());

        let second = stream.next().await.unwrap().unwrap();
        assert!(matches!(second, ReadEvent::Skipped(IngestError::NotText { .. })));
        assert_eq!(store.acknowledged().len(), 1);

        let third = stream.next().await.unwrap().unwrap();
        assert_eq!(third, ReadEvent::PollCompleted { files: 2 });
        assert_eq!(store.acknowledged().len(), 2);

        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    struct DownStore;

    #[async_trait::async_trait]
    impl LandingStore for DownStore {
        fn source_path(&self) -> &str {
            "down"
        }

        async fn poll(&self) -> Result<Vec<crate::services::Delivery>> {
            Err(smile_common::Error::Internal("landing store offline".to_string()))
        }

        async fn acknowledge(&self, _file: &LandedFile) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stream_ends_after_poll_failure() {
        let reader = RawIngestReader::default();
        let stream = reader.stream(Arc::new(DownStore), Duration::from_millis(10), CancellationToken::new());
        futures::pin_mut!(stream);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("landing store offline"));
        assert!(stream.next().await.is_none());
    }
}
