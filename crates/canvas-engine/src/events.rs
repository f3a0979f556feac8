//! Engine notifications
//!
//! Events are fire-and-forget: the engine never waits on a sink and a
//! failed send is only logged. The main consumer is the external media
//! store, which reclaims blobs when a node disappears.

use serde::{Deserialize, Serialize};

use crate::sanitize::DetachedPayload;

/// Trait for receiving engine events
///
/// This abstracts over the transport mechanism (channel, callback, etc.)
/// allowing the engine to be used in different hosts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: EngineEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted by a canvas engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// A node was removed; its large objects may be reclaimed
    #[serde(rename_all = "camelCase")]
    NodeRemoved { session_id: String, node_id: String },

    /// The canvas was written by the persistence gateway
    #[serde(rename_all = "camelCase")]
    SessionSaved { session_id: String },

    /// Inline payloads were replaced by references in the saved document
    /// for the first time; the media store should keep them under those
    /// references
    #[serde(rename_all = "camelCase")]
    PayloadsDetached {
        session_id: String,
        payloads: Vec<DetachedPayload>,
    },

    /// Both the primary and fallback backends rejected a save, or a queued
    /// save failed after it was accepted
    #[serde(rename_all = "camelCase")]
    SaveFailed { session_id: String, error: String },

    /// A session was loaded and became active
    #[serde(rename_all = "camelCase")]
    SessionLoaded {
        session_id: String,
        node_count: usize,
        edge_count: usize,
    },
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: EngineEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<EngineEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Ids of removed nodes, in notification order
    pub fn removed_nodes(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                EngineEvent::NodeRemoved { node_id, .. } => Some(node_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: EngineEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Deliver an event, logging (not propagating) failures
pub(crate) fn emit(sink: &dyn EventSink, event: EngineEvent) {
    if let Err(e) = sink.send(event) {
        log::warn!("Dropped engine event: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();
        sink.send(EngineEvent::NodeRemoved {
            session_id: "s".to_string(),
            node_id: "n1".to_string(),
        })
        .unwrap();

        assert_eq!(sink.removed_nodes(), vec!["n1".to_string()]);
        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_wire_format() {
        let event = EngineEvent::NodeRemoved {
            session_id: "s".to_string(),
            node_id: "n1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "nodeRemoved");
        assert_eq!(json["nodeId"], "n1");
    }

    struct ClosedSink;

    impl EventSink for ClosedSink {
        fn send(&self, _event: EngineEvent) -> Result<(), EventError> {
            Err(EventError::channel_closed())
        }
    }

    #[test]
    fn test_emit_swallows_errors() {
        emit(
            &ClosedSink,
            EngineEvent::SessionSaved {
                session_id: "s".to_string(),
            },
        );
    }
}
