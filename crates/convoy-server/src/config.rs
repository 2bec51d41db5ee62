//! Server configuration from environment.

use convoy_core::RoutingRules;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    /// Road network JSON; the bundled network is used when unset
    pub network_path: Option<String>,
    /// Demo convoy JSON; the bundled fleet is used when unset
    pub seed_path: Option<String>,
    pub seed_demo_convoys: bool,
    pub optimize_on_start: bool,
    pub conflict_interval_secs: u64,
    pub stream_capacity: usize,
    pub rules: RoutingRules,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = RoutingRules::default();
        let rules = RoutingRules {
            high_risk_threshold: env_or("CONVOY_HIGH_RISK_THRESHOLD", defaults.high_risk_threshold),
            conflict_risk_alert: env_or("CONVOY_CONFLICT_RISK_ALERT", defaults.conflict_risk_alert),
            report_shared_corridors: env_or(
                "CONVOY_REPORT_SHARED_CORRIDORS",
                defaults.report_shared_corridors,
            ),
            conflict_edge_penalty: env_or("CONVOY_CONFLICT_PENALTY", defaults.conflict_edge_penalty),
            conflict_risk_penalty: env_or(
                "CONVOY_CONFLICT_RISK_PENALTY",
                defaults.conflict_risk_penalty,
            ),
            snap_radius_km: env_or("CONVOY_SNAP_RADIUS_KM", defaults.snap_radius_km),
            max_expansions: env_or("CONVOY_MAX_EXPANSIONS", defaults.max_expansions),
            search_budget_ms: env_or("CONVOY_SEARCH_BUDGET_MS", defaults.search_budget_ms),
            merge_min_overlap: env_or("CONVOY_MERGE_MIN_OVERLAP", defaults.merge_min_overlap),
            road_space_quota: env_or("CONVOY_MERGE_QUOTA", defaults.road_space_quota),
            tons_per_vehicle: env_or("CONVOY_TONS_PER_VEHICLE", defaults.tons_per_vehicle),
        };

        Self {
            server_port: env_or("CONVOY_PORT", 5000),
            network_path: env::var("CONVOY_NETWORK_PATH").ok().filter(|s| !s.is_empty()),
            seed_path: env::var("CONVOY_SEED_PATH").ok().filter(|s| !s.is_empty()),
            seed_demo_convoys: env_or("CONVOY_SEED_DEMO", true),
            optimize_on_start: env_or("CONVOY_OPTIMIZE_ON_START", true),
            conflict_interval_secs: env_or("CONVOY_CONFLICT_INTERVAL_SECS", 5u64).max(1),
            stream_capacity: env_or("CONVOY_STREAM_CAPACITY", 256usize).max(1),
            rules,
        }
    }
}
