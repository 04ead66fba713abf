//! Event types and the emission seam
//!
//! A leaf module: both the orchestrator and the notifier depend on it,
//! never on each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Kinds of events the pipeline emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    SyncCompleted,
    SystemError,
}

/// One emitted event
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Completion event with the per-run summary
    pub fn sync_completed(
        node_count: usize,
        previous_node_count: usize,
        fetch_ms: u64,
        probe_ms: u64,
        emit_ms: u64,
        regions_count: usize,
        protocols_count: usize,
    ) -> Self {
        let delta = node_count as i64 - previous_node_count as i64;
        let body = format!(
            "{} nodes ({:+} since last sync), {} regions, {} protocols. fetch {}ms, probe {}ms, emit {}ms",
            node_count, delta, regions_count, protocols_count, fetch_ms, probe_ms, emit_ms
        );
        Event {
            event_type: EventType::SyncCompleted,
            title: "Sync completed".to_string(),
            body,
            payload: json!({
                "nodeCount": node_count,
                "previousNodeCount": previous_node_count,
                "durations": { "fetch": fetch_ms, "probe": probe_ms, "emit": emit_ms },
                "regionsCount": regions_count,
                "protocolsCount": protocols_count,
            }),
            timestamp: Utc::now(),
        }
    }

    /// Fatal error event
    pub fn system_error(diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        Event {
            event_type: EventType::SystemError,
            title: "Sync failed".to_string(),
            body: diagnostic.clone(),
            payload: json!({ "error": diagnostic }),
            timestamp: Utc::now(),
        }
    }
}

/// Where events go; the notifier implements this
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &Event);
}

/// Sink that only writes to the log
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn emit(&self, event: &Event) {
        match event.event_type {
            EventType::SyncCompleted => tracing::info!("{}: {}", event.title, event.body),
            EventType::SystemError => tracing::error!("{}: {}", event.title, event.body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_completed_payload() {
        let event = Event::sync_completed(42, 40, 1000, 2000, 30, 5, 3);
        assert_eq!(event.event_type, EventType::SyncCompleted);
        assert_eq!(event.payload["nodeCount"], 42);
        assert_eq!(event.payload["previousNodeCount"], 40);
        assert_eq!(event.payload["durations"]["probe"], 2000);
        assert!(event.body.contains("+2 since last sync"));
    }

    #[test]
    fn test_negative_delta_rendered() {
        let event = Event::sync_completed(10, 15, 0, 0, 0, 1, 1);
        assert!(event.body.contains("-5 since last sync"));
    }

    #[test]
    fn test_system_error() {
        let event = Event::system_error("boom");
        assert_eq!(event.event_type, EventType::SystemError);
        assert_eq!(event.payload["error"], "boom");
    }
}
