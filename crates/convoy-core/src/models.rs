//! Core data models for the convoy command system.
//!
//! JSON shapes follow the dashboard contract: camelCase fields,
//! SCREAMING_SNAKE_CASE enum values and `[lng, lat]` coordinate pairs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spatial::{haversine_km, COORD_TOLERANCE_KM};

/// A `[lng, lat]` pair, serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat(pub f64, pub f64);

impl LngLat {
    pub fn lng(&self) -> f64 {
        self.0
    }

    pub fn lat(&self) -> f64 {
        self.1
    }

    /// Great-circle distance in kilometers.
    pub fn distance_km(&self, other: &LngLat) -> f64 {
        haversine_km(self.lat(), self.lng(), other.lat(), other.lng())
    }

    /// True when both points fall within the coordinate tolerance.
    pub fn close_to(&self, other: &LngLat) -> bool {
        self.distance_km(other) <= COORD_TOLERANCE_KM
    }

    pub fn is_finite(&self) -> bool {
        self.0.is_finite() && self.1.is_finite()
    }
}

/// Convoy endpoint with an optional place label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            name: None,
        }
    }

    pub fn named(lat: f64, lng: f64, name: impl Into<String>) -> Self {
        Self {
            lat,
            lng,
            name: Some(name.into()),
        }
    }

    pub fn position(&self) -> LngLat {
        LngLat(self.lng, self.lat)
    }

    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{:.2},{:.2}", self.lat, self.lng))
    }
}

// ========== ROAD NETWORK ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Terrain {
    Urban,
    Mountain,
    Desert,
    Forest,
    Coastal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Difficulty {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentStatus {
    #[default]
    Clear,
    HighRisk,
    Blocked,
}

fn default_capacity() -> u32 {
    1
}

/// An atomic stretch of road.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadSegment {
    pub id: String,
    pub coordinates: Vec<LngLat>,
    pub terrain: Terrain,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub recommended_speed_kmph: f64,
    /// 0-1 scale
    pub risk_level: f64,
    #[serde(default)]
    pub status: SegmentStatus,
    /// Max concurrent convoys inside one time window
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Network generation of the last condition change
    #[serde(default)]
    pub revision: u64,
    /// Manual block flag (road closure, landslide)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub manual_block: bool,
    /// Manual hazard flag raised by an operator
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub manual_high_risk: bool,
}

impl RoadSegment {
    pub fn start(&self) -> Option<LngLat> {
        self.coordinates.first().copied()
    }

    pub fn end(&self) -> Option<LngLat> {
        self.coordinates.last().copied()
    }

    pub fn length_km(&self) -> f64 {
        crate::spatial::polyline_length_km(&self.coordinates)
    }

    pub fn is_blocked(&self) -> bool {
        self.status == SegmentStatus::Blocked
    }

    /// Recompute `status` from risk level and the manual flags.
    pub fn refresh_status(&mut self, high_risk_threshold: f64) {
        self.status = if self.manual_block {
            SegmentStatus::Blocked
        } else if self.manual_high_risk || self.risk_level >= high_risk_threshold {
            SegmentStatus::HighRisk
        } else {
            SegmentStatus::Clear
        };
    }

    /// Same segment with its coordinate chain flipped.
    pub fn reversed(&self) -> Self {
        let mut segment = self.clone();
        segment.coordinates.reverse();
        segment
    }
}

// ========== ROUTES ==========

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStatus {
    #[default]
    Pending,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: CheckpointStatus,
    pub eta: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn is_cleared(&self) -> bool {
        self.status == CheckpointStatus::Cleared
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    pub name: String,
    pub polyline: Vec<LngLat>,
    pub eta_hours: f64,
    pub distance_km: f64,
    /// Aggregated 0-100
    pub risk_score: f64,
    #[serde(default)]
    pub segments: Vec<RoadSegment>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    /// Network generation this route was planned against
    #[serde(default)]
    pub network_generation: u64,
}

impl Route {
    pub fn start(&self) -> Option<LngLat> {
        self.polyline.first().copied()
    }

    pub fn end(&self) -> Option<LngLat> {
        self.polyline.last().copied()
    }

    pub fn segment_ids(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|segment| segment.id.as_str())
    }

    pub fn contains_segment(&self, segment_id: &str) -> bool {
        self.segments.iter().any(|segment| segment.id == segment_id)
    }

    /// End of segment *i* meets start of segment *i+1* within tolerance.
    pub fn is_contiguous(&self) -> bool {
        self.segments.windows(2).all(|pair| match (pair[0].end(), pair[1].start()) {
            (Some(end), Some(start)) => end.close_to(&start),
            _ => false,
        })
    }

    /// Polyline starts at `origin` and ends at `destination` within tolerance.
    pub fn connects(&self, origin: &GeoPoint, destination: &GeoPoint) -> bool {
        match (self.start(), self.end()) {
            (Some(start), Some(end)) => {
                start.close_to(&origin.position()) && end.close_to(&destination.position())
            }
            _ => false,
        }
    }
}

// ========== CONVOYS ==========

/// Convoy priority. Declaration order is dispatch order: ALPHA first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Alpha,
    #[default]
    Bravo,
    Charlie,
}

impl Priority {
    /// True if `self` ranks at or above `other`.
    pub fn at_least(self, other: Priority) -> bool {
        self <= other
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConvoyStatus {
    #[default]
    Planned,
    EnRoute,
    Completed,
    Delayed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSuggestion {
    pub with_convoy_id: String,
    pub payload_savings_tons: f64,
    /// 0-1
    pub confidence: f64,
}

/// A group of vehicles moving together under one assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Convoy {
    pub id: String,
    pub name: String,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_route: Option<Route>,
    pub speed_kmph: f64,
    pub priority: Priority,
    pub vehicle_count: u32,
    pub status: ConvoyStatus,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_hours: Option<f64>,
    /// Anchor for segment time windows
    pub departure_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_suggestion: Option<MergeSuggestion>,
}

impl Convoy {
    /// Completed convoys no longer occupy road space.
    pub fn is_active(&self) -> bool {
        self.status != ConvoyStatus::Completed
    }
}

/// Partial convoy payload accepted on creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvoySpec {
    pub id: Option<String>,
    pub name: Option<String>,
    pub origin: Option<GeoPoint>,
    pub destination: Option<GeoPoint>,
    pub assigned_route: Option<Route>,
    pub speed_kmph: Option<f64>,
    pub priority: Option<Priority>,
    /// Signed so that negative counts are rejected rather than failing to parse
    pub vehicle_count: Option<i64>,
    pub status: Option<ConvoyStatus>,
    pub eta_hours: Option<f64>,
    pub departure_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvoyFilter {
    pub priority: Option<Priority>,
    pub status: Option<ConvoyStatus>,
}

impl ConvoyFilter {
    pub fn matches(&self, convoy: &Convoy) -> bool {
        self.priority.map_or(true, |p| convoy.priority == p)
            && self.status.map_or(true, |s| convoy.status == s)
    }
}

/// Append-only audit entry for a cleared checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointLogEntry {
    pub convoy_id: String,
    pub checkpoint_id: String,
    pub checkpoint_name: String,
    pub location: GeoPoint,
    pub logged_at: DateTime<Utc>,
}

// ========== CONFLICTS ==========

/// Conflict severity, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictSeverity {
    /// Overlapping use that still fits the segment capacity
    Shared,
    /// Concurrent convoys exceed segment capacity
    CapacityOverlap,
    /// Combined route risk above the alert threshold
    HighRisk,
    /// At least one implicated segment is blocked
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub id: String,
    pub convoy_ids: Vec<String>,
    pub segment_ids: Vec<String>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub overlap_hours: f64,
    pub severity: ConflictSeverity,
    pub combined_risk_score: f64,
    pub blocked_segments: usize,
    #[serde(default)]
    pub acknowledged: bool,
}

impl ConflictRecord {
    pub fn involves(&self, convoy_id: &str) -> bool {
        self.convoy_ids.iter().any(|id| id == convoy_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_alpha_first() {
        let mut priorities = vec![Priority::Charlie, Priority::Alpha, Priority::Bravo];
        priorities.sort();
        assert_eq!(priorities, vec![Priority::Alpha, Priority::Bravo, Priority::Charlie]);
        assert!(Priority::Alpha.at_least(Priority::Bravo));
        assert!(Priority::Bravo.at_least(Priority::Bravo));
        assert!(!Priority::Charlie.at_least(Priority::Bravo));
    }

    #[test]
    fn blocked_flag_overrides_risk() {
        let mut segment = RoadSegment {
            id: "seg".into(),
            coordinates: vec![LngLat(74.0, 34.0), LngLat(74.1, 34.0)],
            terrain: Terrain::Mountain,
            difficulty: Difficulty::High,
            recommended_speed_kmph: 30.0,
            risk_level: 0.1,
            status: SegmentStatus::Clear,
            capacity: 1,
            revision: 0,
            manual_block: true,
            manual_high_risk: false,
        };
        segment.refresh_status(0.6);
        assert_eq!(segment.status, SegmentStatus::Blocked);

        segment.manual_block = false;
        segment.risk_level = 0.7;
        segment.refresh_status(0.6);
        assert_eq!(segment.status, SegmentStatus::HighRisk);

        segment.risk_level = 0.2;
        segment.refresh_status(0.6);
        assert_eq!(segment.status, SegmentStatus::Clear);
    }

    #[test]
    fn convoy_json_uses_dashboard_field_names() {
        let json = serde_json::json!({
            "id": "CVY-001",
            "name": "ALPHA-HAWK-01",
            "origin": { "lat": 34.08, "lng": 74.79, "name": "Srinagar" },
            "destination": { "lat": 34.16, "lng": 77.58, "name": "Leh" },
            "speedKmph": 45.0,
            "priority": "ALPHA",
            "vehicleCount": 25,
            "status": "EN_ROUTE",
            "lastUpdated": "2024-05-01T00:00:00Z",
            "departureTime": "2024-05-01T00:00:00Z"
        });
        let convoy: Convoy = serde_json::from_value(json).expect("parse convoy");
        assert_eq!(convoy.priority, Priority::Alpha);
        assert_eq!(convoy.status, ConvoyStatus::EnRoute);
        assert_eq!(convoy.origin.name.as_deref(), Some("Srinagar"));

        let out = serde_json::to_value(&convoy).expect("serialize");
        assert_eq!(out["vehicleCount"], 25);
        assert!(out.get("assignedRoute").is_none());
    }
}
