//! Operation events and the typed stream published to dashboard clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ConflictRecord, Convoy, ConvoyStatus, GeoPoint, RoadSegment, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    BlockRoad,
    Rainfall,
    Landslide,
    Congestion,
    Checkpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub severity: EventSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_segment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A field event (weather, closure, check-in) acknowledged by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub triggered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convoy_id: Option<String>,
    pub payload: EventPayload,
}

/// Inbound event submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub convoy_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub severity: EventSeverity,
    #[serde(default)]
    pub affected_segment_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl EventRequest {
    /// Stamp the request with a server-assigned id and time. `seq` keeps
    /// ids unique among events stamped in the same millisecond.
    pub fn into_event(self, now: DateTime<Utc>, seq: u64) -> OperationEvent {
        OperationEvent {
            id: format!("EVT-{}-{}", now.timestamp_millis(), seq),
            event_type: self.event_type,
            triggered_at: now,
            convoy_id: self.convoy_id,
            payload: EventPayload {
                severity: self.severity,
                affected_segment_id: self.affected_segment_id,
                notes: Some(self.notes.unwrap_or_else(|| "Simulated event".to_string())),
            },
        }
    }
}

/// Typed stream events, one variant per channel name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ConvoyEvent {
    #[serde(rename = "convoy.created")]
    ConvoyCreated { convoy: Convoy },

    #[serde(rename = "convoy.reroute", rename_all = "camelCase")]
    Reroute {
        convoy_id: String,
        route: Route,
        notes: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "convoy.status.update", rename_all = "camelCase")]
    StatusUpdate {
        convoy_id: String,
        status: ConvoyStatus,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "convoy.checkpoint.cleared", rename_all = "camelCase")]
    CheckpointCleared {
        convoy_id: String,
        checkpoint_id: String,
        location: GeoPoint,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "event.triggered", rename_all = "camelCase")]
    EventTriggered {
        event: OperationEvent,
        affected_convoys: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "segment.updated", rename_all = "camelCase")]
    SegmentUpdated {
        segment: RoadSegment,
        stale_convoys: Vec<String>,
    },

    #[serde(rename = "risk.alert", rename_all = "camelCase")]
    RiskAlert {
        convoy_id: String,
        risk_score: f64,
        message: String,
    },

    #[serde(rename = "conflict.detected")]
    ConflictDetected { conflicts: Vec<ConflictRecord> },

    #[serde(rename = "optimizer.result", rename_all = "camelCase")]
    OptimizerResult {
        convoy_id: String,
        route_id: String,
        risk_score: f64,
        eta_hours: f64,
        notes: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ConvoyEvent {
    /// Convoy this event is scoped to, if any.
    pub fn convoy_id(&self) -> Option<&str> {
        match self {
            Self::ConvoyCreated { convoy } => Some(&convoy.id),
            Self::Reroute { convoy_id, .. }
            | Self::StatusUpdate { convoy_id, .. }
            | Self::CheckpointCleared { convoy_id, .. }
            | Self::RiskAlert { convoy_id, .. }
            | Self::OptimizerResult { convoy_id, .. } => Some(convoy_id),
            Self::EventTriggered { event, .. } => event.convoy_id.as_deref(),
            Self::SegmentUpdated { .. } | Self::ConflictDetected { .. } => None,
        }
    }
}

/// Outbound connection seam. The transport is owned by the caller.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ConvoyEvent);
}
