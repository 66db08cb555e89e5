//! Object events.
//!
//! Short, human-readable notes attached to an object: "deletion started",
//! "apply conflicted". Recording is best-effort and never fails a
//! reconcile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::types::ObjectKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub object: ObjectKey,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Sink for object events.
pub trait EventRecorder: Send + Sync + fmt::Debug {
    fn record(&self, object: &ObjectKey, event_type: EventType, reason: &str, message: &str);
}

/// Emits events as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, object: &ObjectKey, event_type: EventType, reason: &str, message: &str) {
        match event_type {
            EventType::Normal => {
                tracing::info!(object = %object, reason, detail = message, "event")
            }
            EventType::Warning => {
                tracing::warn!(object = %object, reason, detail = message, "event")
            }
        }
    }
}

/// Forwards events to a bounded channel. A full or closed channel drops
/// the event.
#[derive(Debug, Clone)]
pub struct ChannelRecorder {
    tx: mpsc::Sender<Event>,
}

impl ChannelRecorder {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventRecorder for ChannelRecorder {
    fn record(&self, object: &ObjectKey, event_type: EventType, reason: &str, message: &str) {
        let event = Event {
            object: object.clone(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(err) = self.tx.try_send(event) {
            tracing::debug!(object = %object, reason, error = %err, "event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_channel_recorder_delivers() {
        let (recorder, mut rx) = ChannelRecorder::new(4);
        let key = ObjectKey::new("default", "a");
        recorder.record(&key, EventType::Warning, "ApplyConflict", "status.state");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.object, key);
        assert_eq!(event.event_type, EventType::Warning);
        assert_eq!(event.reason, "ApplyConflict");
    }

    #[tokio::test]
    async fn test_channel_recorder_drops_when_full() {
        let (recorder, mut rx) = ChannelRecorder::new(1);
        let key = ObjectKey::new("default", "a");
        recorder.record(&key, EventType::Normal, "First", "");
        recorder.record(&key, EventType::Normal, "Second", "");

        assert_eq!(rx.recv().await.unwrap().reason, "First");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    #[traced_test]
    fn test_tracing_recorder_logs() {
        TracingRecorder.record(
            &ObjectKey::new("default", "a"),
            EventType::Normal,
            "Deleting",
            "deletion started",
        );
        assert!(logs_contain("Deleting"));
    }
}
