//! Convoy route optimizer.
//!
//! A* over road junctions. Edge weight is traversal time inflated by
//! segment risk and, when a higher-or-equal priority convoy already
//! occupies the segment at the time this convoy would be on it, by a
//! conflict penalty. Blocked segments are never expanded.
//!
//! The optimizer reads the network and a convoy snapshot and returns a
//! candidate route; committing it is the caller's job.

use chrono::{DateTime, Utc};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::conflict::{add_hours, hours_between, ConflictDetector, Occupancy};
use crate::error::{RoutingError, RoutingResult};
use crate::models::{Checkpoint, Convoy, GeoPoint, Route};
use crate::network::RoadNetwork;
use crate::rules::RoutingRules;
use crate::spatial::{extend_chain, polyline_length_km};

/// A planned route plus the reasoning behind it.
#[derive(Debug, Clone)]
pub struct OptimizedRoute {
    pub route: Route,
    pub notes: Vec<String>,
    /// Destination the route ends at (the override when one was given)
    pub destination: GeoPoint,
    pub nodes_visited: usize,
}

#[derive(Debug, Clone, Copy)]
struct FloatOrd(f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone)]
struct Step {
    segment_id: String,
    forward: bool,
    contested: bool,
}

#[derive(Debug, Clone)]
struct OpenNode {
    junction: usize,
    f_score: FloatOrd,
    g_score: FloatOrd,
    /// Accumulated risk-km, the first tie-breaker
    risk: FloatOrd,
    elapsed_hours: f64,
    path: Vec<Step>,
}

impl OpenNode {
    fn path_ids(&self) -> impl Iterator<Item = &str> {
        self.path.iter().map(|step| step.segment_id.as_str())
    }

    /// Ordering among labels reaching the same junction.
    fn label_cmp(&self, other: &Self) -> Ordering {
        self.g_score
            .cmp(&other.g_score)
            .then_with(|| self.risk.cmp(&other.risk))
            .then_with(|| self.path_ids().cmp(other.path_ids()))
    }
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f_score
            .cmp(&other.f_score)
            .then_with(|| self.risk.cmp(&other.risk))
            .then_with(|| self.path_ids().cmp(other.path_ids()))
            .then_with(|| self.junction.cmp(&other.junction))
    }
}

struct Endpoints {
    start: usize,
    goal: usize,
    start_km: f64,
    goal_km: f64,
}

pub struct RouteOptimizer<'a> {
    network: &'a RoadNetwork,
    rules: &'a RoutingRules,
}

impl<'a> RouteOptimizer<'a> {
    pub fn new(network: &'a RoadNetwork, rules: &'a RoutingRules) -> Self {
        Self { network, rules }
    }

    /// Plan a route for `convoy_id` using `convoys` as the fleet snapshot.
    ///
    /// With a `destination_override` the search targets that point
    /// instead of the convoy's own destination.
    pub fn optimize(
        &self,
        convoy_id: &str,
        destination_override: Option<GeoPoint>,
        convoys: &[Convoy],
    ) -> RoutingResult<OptimizedRoute> {
        let convoy = convoys
            .iter()
            .find(|c| c.id == convoy_id)
            .ok_or_else(|| RoutingError::ConvoyNotFound(convoy_id.to_string()))?;
        let overridden = destination_override.is_some();
        let destination = destination_override.unwrap_or_else(|| convoy.destination.clone());

        if convoy.origin.position().close_to(&destination.position()) {
            return Err(RoutingError::NoPathExists {
                notes: vec!["Origin and destination are the same place".to_string()],
            });
        }

        let generation = self.network.generation();
        let occupancy = ConflictDetector::occupancy(convoys, Some(convoy_id));
        let endpoints = self.snap_endpoints(&convoy.origin, &destination)?;

        let started = Instant::now();
        let (label, nodes_visited) = self.search(convoy, &endpoints, &occupancy, started)?;

        let mut notes = Vec::new();
        if overridden {
            notes.push(format!("Destination override applied: {}", destination.label()));
        }
        let route = self.build_route(convoy, &destination, &endpoints, &label, generation, &mut notes)?;

        let stale = self.network.stale_segments(&route);
        if !stale.is_empty() {
            tracing::warn!(
                convoy_id,
                segments = ?stale,
                "Network changed while planning"
            );
            return Err(RoutingError::StaleNetworkState { segment_ids: stale });
        }

        tracing::debug!(
            convoy_id,
            route_id = %route.id,
            nodes_visited,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Route planned"
        );
        Ok(OptimizedRoute {
            route,
            notes,
            destination,
            nodes_visited,
        })
    }

    fn snap_endpoints(&self, origin: &GeoPoint, destination: &GeoPoint) -> RoutingResult<Endpoints> {
        let snap = |point: &GeoPoint, role: &str| -> RoutingResult<(usize, f64)> {
            match self.network.nearest_junction(point.position()) {
                Some((junction, km)) if km <= self.rules.snap_radius_km => Ok((junction, km)),
                Some((_, km)) => Err(RoutingError::NoPathExists {
                    notes: vec![format!(
                        "{role} {} is {km:.1} km from the nearest road (limit {:.1} km)",
                        point.label(),
                        self.rules.snap_radius_km
                    )],
                }),
                None => Err(RoutingError::NoPathExists {
                    notes: vec!["Road network is empty".to_string()],
                }),
            }
        };
        let (start, start_km) = snap(origin, "Origin")?;
        let (goal, goal_km) = snap(destination, "Destination")?;
        Ok(Endpoints {
            start,
            goal,
            start_km,
            goal_km,
        })
    }

    fn search(
        &self,
        convoy: &Convoy,
        endpoints: &Endpoints,
        occupancy: &Occupancy,
        started: Instant,
    ) -> RoutingResult<(OpenNode, usize)> {
        let goal_position = self
            .network
            .junction_position(endpoints.goal)
            .ok_or_else(|| RoutingError::NoPathExists {
                notes: vec!["Destination junction is missing".to_string()],
            })?;
        let max_speed = self.network.max_speed_kmph().max(f64::EPSILON);
        let heuristic = |junction: usize| -> f64 {
            self.network
                .junction_position(junction)
                .map(|p| p.distance_km(&goal_position) / max_speed)
                .unwrap_or(0.0)
        };
        let budget = Duration::from_millis(self.rules.search_budget_ms);
        // Access leg from the origin to the first junction.
        let start_elapsed = endpoints.start_km / convoy.speed_kmph;

        let mut open_set: BinaryHeap<Reverse<OpenNode>> = BinaryHeap::new();
        open_set.push(Reverse(OpenNode {
            junction: endpoints.start,
            f_score: FloatOrd(heuristic(endpoints.start)),
            g_score: FloatOrd(0.0),
            risk: FloatOrd(0.0),
            elapsed_hours: start_elapsed,
            path: Vec::new(),
        }));
        let mut best: HashMap<usize, OpenNode> = HashMap::new();
        let mut closed_set: HashSet<usize> = HashSet::new();
        let mut blocked_seen: BTreeSet<String> = BTreeSet::new();
        let mut nodes_visited = 0usize;

        while let Some(Reverse(current)) = open_set.pop() {
            if !closed_set.insert(current.junction) {
                continue;
            }
            nodes_visited += 1;

            if current.junction == endpoints.goal {
                return Ok((current, nodes_visited));
            }
            if nodes_visited >= self.rules.max_expansions || started.elapsed() > budget {
                return Err(RoutingError::SearchExhausted {
                    expansions: nodes_visited,
                    notes: vec![format!(
                        "Search stopped after {nodes_visited} expansions in {} ms",
                        started.elapsed().as_millis()
                    )],
                });
            }

            for segment_id in self.network.incident_segments(current.junction) {
                let Some((a, b)) = self.network.segment_endpoints(segment_id) else {
                    continue;
                };
                let next = if a == current.junction { b } else { a };
                if next == current.junction || closed_set.contains(&next) {
                    continue;
                }
                let Ok(segment) = self.network.get_segment(segment_id) else {
                    continue;
                };
                if segment.is_blocked() {
                    blocked_seen.insert(segment.id.clone());
                    continue;
                }

                let length = segment.length_km();
                let base_hours = length / segment.recommended_speed_kmph;
                let travel_hours = length / convoy.speed_kmph.min(segment.recommended_speed_kmph);
                let entry = add_hours(convoy.departure_time, current.elapsed_hours);
                let exit = add_hours(entry, travel_hours);
                let contested = occupancy.contested(segment_id, entry, exit, convoy.priority);

                let mut weight = base_hours * (1.0 + segment.risk_level);
                if contested {
                    weight *= 1.0 + self.rules.conflict_edge_penalty;
                }

                let g_score = current.g_score.0 + weight;
                let mut path = current.path.clone();
                path.push(Step {
                    segment_id: segment.id.clone(),
                    forward: a == current.junction,
                    contested,
                });
                let candidate = OpenNode {
                    junction: next,
                    f_score: FloatOrd(g_score + heuristic(next)),
                    g_score: FloatOrd(g_score),
                    risk: FloatOrd(current.risk.0 + segment.risk_level * length),
                    elapsed_hours: current.elapsed_hours + travel_hours,
                    path,
                };

                let improves = best
                    .get(&next)
                    .map_or(true, |known| candidate.label_cmp(known) == Ordering::Less);
                if improves {
                    best.insert(next, candidate.clone());
                    open_set.push(Reverse(candidate));
                }
            }
        }

        let mut notes = vec!["No open road connects origin and destination".to_string()];
        if !blocked_seen.is_empty() {
            notes.push(format!(
                "Blocked segments on the way: {}",
                blocked_seen.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
        Err(RoutingError::NoPathExists { notes })
    }

    fn build_route(
        &self,
        convoy: &Convoy,
        destination: &GeoPoint,
        endpoints: &Endpoints,
        label: &OpenNode,
        generation: u64,
        notes: &mut Vec<String>,
    ) -> RoutingResult<Route> {
        let mut polyline = vec![convoy.origin.position()];
        let mut segments = Vec::with_capacity(label.path.len());
        let mut eta_hours = endpoints.start_km / convoy.speed_kmph;
        let mut weighted_risk = 0.0;
        let mut total_km = 0.0;
        let mut peak_risk: f64 = 0.0;
        let mut contested = Vec::new();

        for step in &label.path {
            let segment = self.network.get_segment(&step.segment_id)?;
            let segment = if step.forward {
                segment
            } else {
                segment.reversed()
            };
            let length = segment.length_km();
            eta_hours += length / convoy.speed_kmph.min(segment.recommended_speed_kmph);
            weighted_risk += segment.risk_level * length;
            total_km += length;
            peak_risk = peak_risk.max(segment.risk_level);
            if step.contested {
                contested.push(segment.id.clone());
            }
            extend_chain(&mut polyline, &segment.coordinates);
            segments.push(segment);
        }
        eta_hours += endpoints.goal_km / convoy.speed_kmph;
        extend_chain(&mut polyline, &[destination.position()]);
        if polyline.len() < 2 {
            polyline.push(destination.position());
        }

        let risk_score = route_risk_score(
            weighted_risk,
            total_km,
            peak_risk,
            contested.len(),
            self.rules.conflict_risk_penalty,
        );
        if !contested.is_empty() {
            notes.push(format!(
                "Shares {} segment(s) with higher-or-equal priority convoys: {}",
                contested.len(),
                contested.join(", ")
            ));
        }
        if let Some(risky) = segments
            .iter()
            .find(|s| s.risk_level >= self.rules.high_risk_threshold)
        {
            notes.push(format!("Passes high-risk segment {}", risky.id));
        }

        let eta_hours = round_to(eta_hours, 2);
        let mut route = Route {
            id: format!("RTE-{}-G{}", convoy.id, generation),
            name: format!("{} → {}", convoy.origin.label(), destination.label()),
            distance_km: round_to(polyline_length_km(&polyline), 1),
            polyline,
            eta_hours,
            risk_score,
            segments,
            checkpoints: Vec::new(),
            network_generation: generation,
        };
        if let Some(previous) = convoy.assigned_route.as_ref() {
            route.checkpoints = carry_checkpoints(previous, eta_hours, convoy.departure_time);
            let delta = eta_hours - previous.eta_hours;
            if delta.abs() >= 0.01 {
                notes.push(format!("ETA changes by {delta:+.2} h"));
            }
        }
        Ok(route)
    }
}

/// Route risk on a 0-100 scale.
///
/// The length-weighted mean fills the headroom above the riskiest
/// segment, so the score never falls below that segment's contribution.
pub fn route_risk_score(
    weighted_risk: f64,
    total_km: f64,
    peak_risk: f64,
    contested_segments: usize,
    penalty_per_segment: f64,
) -> f64 {
    let mean = if total_km > 0.0 {
        weighted_risk / total_km
    } else {
        0.0
    };
    let peak = peak_risk.clamp(0.0, 1.0);
    let base = (peak + (1.0 - peak) * mean.clamp(0.0, 1.0)) * 100.0;
    let score = base + penalty_per_segment * contested_segments as f64;
    let rounded = round_to(score.clamp(0.0, 100.0), 1);
    let floor = peak * 100.0;
    if rounded < floor {
        ((floor * 10.0).ceil() / 10.0).min(100.0)
    } else {
        rounded
    }
}

/// Checkpoints of `previous` with pending ETAs stretched to the new duration.
fn carry_checkpoints(previous: &Route, eta_hours: f64, departure: DateTime<Utc>) -> Vec<Checkpoint> {
    let scale = if previous.eta_hours > 0.0 {
        eta_hours / previous.eta_hours
    } else {
        1.0
    };
    previous
        .checkpoints
        .iter()
        .map(|checkpoint| {
            let mut carried = checkpoint.clone();
            if !checkpoint.is_cleared() {
                let offset = hours_between(departure, checkpoint.eta);
                carried.eta = add_hours(departure, offset * scale);
            }
            carried
        })
        .collect()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Segment ids of a planned route, in travel order.
pub fn route_segment_ids(route: &Route) -> Vec<String> {
    route.segment_ids().map(str::to_string).collect()
}
