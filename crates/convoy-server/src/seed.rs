//! Startup data: road network and demo fleet.
//!
//! Both are bundled with the binary and can be replaced with files via
//! `CONVOY_NETWORK_PATH` and `CONVOY_SEED_PATH`.

use anyhow::{Context, Result};
use chrono::Duration;
use convoy_core::{Checkpoint, CheckpointStatus, ConvoySpec, RoadNetwork, RoutingRules};
use serde::Deserialize;

use crate::config::Config;
use crate::state::AppState;

pub const BUNDLED_NETWORK: &str = include_str!("../data/road_network.json");
pub const BUNDLED_CONVOYS: &str = include_str!("../data/convoys.json");

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedCheckpoint {
    name: String,
    eta_offset_hours: f64,
}

#[derive(Debug, Deserialize)]
struct SeedConvoy {
    #[serde(flatten)]
    spec: ConvoySpec,
    #[serde(default)]
    checkpoints: Vec<SeedCheckpoint>,
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    convoys: Vec<SeedConvoy>,
}

fn read_or_bundled(path: Option<&str>, bundled: &'static str) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {path}")),
        None => Ok(bundled.to_string()),
    }
}

pub fn load_network(config: &Config) -> Result<RoadNetwork> {
    let json = read_or_bundled(config.network_path.as_deref(), BUNDLED_NETWORK)?;
    let network = RoadNetwork::from_json(&json, &config.rules).context("loading road network")?;
    tracing::info!(
        segments = network.segment_count(),
        source = config.network_path.as_deref().unwrap_or("bundled"),
        "Road network loaded"
    );
    Ok(network)
}

/// Bundled network with the given rules. Used by tests.
pub fn bundled_network(rules: &RoutingRules) -> Result<RoadNetwork> {
    RoadNetwork::from_json(BUNDLED_NETWORK, rules).context("loading bundled road network")
}

/// Create the demo fleet, optionally planning a route for each convoy.
///
/// A convoy whose route cannot be planned is still created; the failure
/// is logged and startup continues.
pub fn seed_convoys(state: &AppState) -> Result<usize> {
    let config = state.config();
    let json = read_or_bundled(config.seed_path.as_deref(), BUNDLED_CONVOYS)?;
    let seed: SeedFile = serde_json::from_str(&json).context("parsing convoy seed")?;

    let mut created = 0;
    for entry in seed.convoys {
        let convoy = state.create_convoy(entry.spec).context("creating seed convoy")?;
        created += 1;
        if !config.optimize_on_start {
            continue;
        }

        if let Err(err) = state.optimize_route(&convoy.id, None, true) {
            tracing::warn!(convoy_id = %convoy.id, "Seed route planning failed: {}", err);
            continue;
        }
        if entry.checkpoints.is_empty() {
            continue;
        }
        let checkpoints = entry
            .checkpoints
            .iter()
            .enumerate()
            .map(|(i, seed)| Checkpoint {
                id: format!("CP-{}-{}", convoy.id, i + 1),
                name: seed.name.clone(),
                status: CheckpointStatus::Pending,
                eta: convoy.departure_time
                    + Duration::minutes((seed.eta_offset_hours * 60.0).round() as i64),
                logged_at: None,
            })
            .collect();
        state.attach_checkpoints(&convoy.id, checkpoints)?;
    }

    tracing::info!(created, "Demo fleet seeded");
    Ok(created)
}
