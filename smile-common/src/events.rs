//! Event types for the lakehouse event system
//!
//! Pipeline stages publish what they did to an [`EventBus`]; subscribers
//! (logging sinks, the HTTP layer, tests) observe without coupling to the
//! stages themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline event types
///
/// Serialized with an internal `type` tag so they can be shipped as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A landed file was read, classified and recorded in the audit log
    FileIngested {
        ingest_id: Uuid,
        file_path: String,
        /// Audit status: request, sample, unclassified or parse_error
        status: String,
        timestamp: DateTime<Utc>,
    },

    /// A landed file could not be decoded and was skipped
    FileSkipped {
        file_path: String,
        reason: String,
    },

    /// JSON payload (file or embedded fragment) failed to parse
    ParseFailed {
        file_path: String,
        message: String,
    },

    /// File name matched neither the request nor the sample suffix
    Unclassified {
        file_path: String,
    },

    /// Current-Requests row changed
    RequestUpserted {
        request_key: String,
        ingest_timestamp: DateTime<Utc>,
    },

    /// A per-origin sample table row changed
    SampleUpserted {
        request_key: Option<String>,
        sample_key: Option<String>,
        origin: String,
        ingest_timestamp: DateTime<Utc>,
    },

    /// The reconciled Current-Samples row for a composite key changed
    SampleReconciled {
        request_key: Option<String>,
        sample_key: Option<String>,
        origin: String,
    },

    /// An embedded sample names a different request than its parent file
    ///
    /// The sample keeps its own request id; this is a data-quality signal.
    RequestIdDivergence {
        file_path: String,
        parent_request_key: Option<String>,
        sample_request_key: Option<String>,
        sample_key: Option<String>,
    },

    /// One poll of the landing store was fully processed
    PassCompleted {
        files: usize,
        timestamp: DateTime<Utc>,
    },

    /// Infrastructure failure stopped the pipeline
    Halted {
        message: String,
    },
}

/// Broadcast bus for [`PipelineEvent`]s
///
/// Cloning is cheap; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_errors() {
        let bus = EventBus::new(8);
        let result = bus.emit(PipelineEvent::Unclassified {
            file_path: "/landing/readme.txt".to_string(),
        });
        assert!(result.is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit_lossy(PipelineEvent::Unclassified {
            file_path: "a.txt".to_string(),
        });
        bus.emit_lossy(PipelineEvent::Halted {
            message: "database unwritable".to_string(),
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            PipelineEvent::Unclassified {
                file_path: "a.txt".to_string()
            }
        );
        assert!(matches!(rx.recv().await.unwrap(), PipelineEvent::Halted { .. }));
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = PipelineEvent::SampleReconciled {
            request_key: Some("REQ1".to_string()),
            sample_key: None,
            origin: "FROM_SAMPLE_FILE".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SampleReconciled");
        assert_eq!(json["request_key"], "REQ1");
        assert!(json["sample_key"].is_null());
    }
}
