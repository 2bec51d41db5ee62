//! Broadcast adapter for the convoy event stream.

use convoy_core::{ConvoyEvent, EventSink};
use std::sync::Arc;
use tokio::sync::broadcast;

/// A serialized stream event plus the convoy it is scoped to.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub convoy_id: Option<String>,
    pub payload: Arc<str>,
}

/// Fans events out to every connected WebSocket client.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<StreamMessage>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamMessage> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: ConvoyEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(err) => {
                tracing::error!("Failed to serialize stream event: {}", err);
                return;
            }
        };
        let message = StreamMessage {
            convoy_id: event.convoy_id().map(str::to_string),
            payload: Arc::from(payload),
        };
        // No subscribers is fine; events are not buffered for late joiners.
        let _ = self.tx.send(message);
    }
}
