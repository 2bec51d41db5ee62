//! Tunable thresholds for routing, conflict detection and merge advice.

use serde::{Deserialize, Serialize};

/// Configuration for routing rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingRules {
    /// Segments at or above this risk level are HIGH_RISK
    pub high_risk_threshold: f64,
    /// Route risk score above which a conflict escalates to HIGH_RISK
    pub conflict_risk_alert: f64,
    /// Report overlaps that still fit segment capacity
    pub report_shared_corridors: bool,
    /// Extra edge-weight multiplier when a segment is already overlapped
    /// by a convoy of higher-or-equal priority
    pub conflict_edge_penalty: f64,
    /// Risk points added per conflicting segment on a route
    pub conflict_risk_penalty: f64,
    /// Max distance between a convoy endpoint and the nearest junction
    pub snap_radius_km: f64,
    /// A* node expansion budget
    pub max_expansions: usize,
    /// A* wall-clock budget in milliseconds
    pub search_budget_ms: u64,
    /// Minimum overlap fraction (of the shorter window) to suggest a merge
    pub merge_min_overlap: f64,
    /// Max combined vehicles a merged convoy may field
    pub road_space_quota: u32,
    /// Payload tons saved per merged vehicle at full shared distance
    pub tons_per_vehicle: f64,
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self {
            high_risk_threshold: 0.6,
            conflict_risk_alert: 55.0,
            report_shared_corridors: false,
            conflict_edge_penalty: 1.0,
            conflict_risk_penalty: 5.0,
            snap_radius_km: 25.0,
            max_expansions: 50_000,
            search_budget_ms: 2_000,
            merge_min_overlap: 0.5,
            road_space_quota: 40,
            tons_per_vehicle: 1.5,
        }
    }
}
