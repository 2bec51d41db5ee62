//! Demo fleet seeding against the bundled network.

use convoy_core::{ConvoyStatus, Priority, SegmentStatus};
use convoy_server::{config::Config, seed, state::AppState};

fn seeded_state() -> AppState {
    let mut config = Config::from_env();
    config.network_path = None;
    config.seed_path = None;
    config.optimize_on_start = true;
    let network = seed::bundled_network(&config.rules).expect("bundled network");
    let state = AppState::new(network, config);
    let created = seed::seed_convoys(&state).expect("seed convoys");
    assert_eq!(created, 3);
    state
}

#[test]
fn bundled_network_loads_all_corridors() {
    let config = Config::from_env();
    let network = seed::bundled_network(&config.rules).expect("bundled network");
    assert_eq!(network.segment_count(), 14);
    assert_eq!(network.generation(), 0);
    assert!(network
        .segments()
        .iter()
        .all(|segment| segment.status != SegmentStatus::Blocked));
}

#[test]
fn seeded_convoys_receive_routes_and_checkpoints() {
    let state = seeded_state();
    let convoys = state.list_convoys(&Default::default());
    let ids: Vec<&str> = convoys.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["CVY-001", "CVY-002", "CVY-003"]);

    let alpha = state.get_convoy("CVY-001").expect("alpha convoy");
    assert_eq!(alpha.priority, Priority::Alpha);
    assert_eq!(alpha.status, ConvoyStatus::EnRoute);

    for convoy in &convoys {
        let route = convoy.assigned_route.as_ref().expect("seeded route");
        assert!(route.connects(&convoy.origin, &convoy.destination));
        assert!(!route.segments.is_empty());
        assert_eq!(route.checkpoints.len(), 1);
        assert!(route.checkpoints[0].eta > convoy.departure_time);
    }
}

#[test]
fn demo_corridors_do_not_conflict() {
    let state = seeded_state();
    assert!(state.conflicts().is_empty());
    assert!(state.merges().is_empty());
}
