//! Road network model.
//!
//! Segments live in a sharded concurrent map so a condition change only
//! locks the record being changed. Topology (junctions and incidence) is
//! fixed at load time and read without locks.

use dashmap::DashMap;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{RoutingError, RoutingResult};
use crate::events::{EventSeverity, EventType};
use crate::models::{LngLat, RoadSegment, Route, SegmentStatus};
use crate::rules::RoutingRules;

/// A point where segment endpoints meet.
#[derive(Debug, Clone, Copy)]
pub struct Junction {
    pub index: usize,
    pub position: LngLat,
}

#[derive(Debug, Deserialize)]
struct NetworkFile {
    segments: Vec<RoadSegment>,
}

pub struct RoadNetwork {
    segments: DashMap<String, RoadSegment>,
    junctions: Vec<Junction>,
    /// segment id -> (start junction, end junction)
    endpoints: HashMap<String, (usize, usize)>,
    /// junction -> incident segment ids, sorted
    incident: Vec<Vec<String>>,
    generation: AtomicU64,
    max_speed_kmph: f64,
    high_risk_threshold: f64,
}

impl RoadNetwork {
    /// Parse a `{"segments": [...]}` document.
    pub fn from_json(json: &str, rules: &RoutingRules) -> RoutingResult<Self> {
        let file: NetworkFile = serde_json::from_str(json)
            .map_err(|err| RoutingError::InvalidNetwork(err.to_string()))?;
        Self::from_segments(file.segments, rules)
    }

    pub fn from_segments(segments: Vec<RoadSegment>, rules: &RoutingRules) -> RoutingResult<Self> {
        let mut junctions: Vec<Junction> = Vec::new();
        let mut endpoints = HashMap::with_capacity(segments.len());
        let map = DashMap::with_capacity(segments.len());
        let mut max_speed_kmph: f64 = 0.0;

        for mut segment in segments {
            validate_segment(&segment)?;
            if map.contains_key(&segment.id) {
                return Err(RoutingError::InvalidNetwork(format!(
                    "duplicate segment id {}",
                    segment.id
                )));
            }

            // A declared status is treated as an operator flag.
            match segment.status {
                SegmentStatus::Blocked => segment.manual_block = true,
                SegmentStatus::HighRisk => segment.manual_high_risk = true,
                SegmentStatus::Clear => {}
            }
            segment.refresh_status(rules.high_risk_threshold);

            let (Some(start), Some(end)) = (segment.start(), segment.end()) else {
                continue;
            };
            let a = cluster_junction(&mut junctions, start);
            let b = cluster_junction(&mut junctions, end);
            endpoints.insert(segment.id.clone(), (a, b));
            max_speed_kmph = max_speed_kmph.max(segment.recommended_speed_kmph);
            map.insert(segment.id.clone(), segment);
        }

        let mut incident: Vec<Vec<String>> = vec![Vec::new(); junctions.len()];
        for (id, (a, b)) in &endpoints {
            incident[*a].push(id.clone());
            if a != b {
                incident[*b].push(id.clone());
            }
        }
        for ids in &mut incident {
            ids.sort();
        }

        tracing::debug!(
            segments = map.len(),
            junctions = junctions.len(),
            "Loaded road network"
        );

        Ok(Self {
            segments: map,
            junctions,
            endpoints,
            incident,
            generation: AtomicU64::new(0),
            max_speed_kmph,
            high_risk_threshold: rules.high_risk_threshold,
        })
    }

    /// Monotonic counter bumped on every condition change.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn get_segment(&self, id: &str) -> RoutingResult<RoadSegment> {
        self.segments
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RoutingError::not_found("segment", id))
    }

    /// All segments, ordered by id.
    pub fn segments(&self) -> Vec<RoadSegment> {
        let mut all: Vec<RoadSegment> = self.segments.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Change the condition of one segment.
    ///
    /// `BLOCKED` and `HIGH_RISK` are stored as operator flags; `CLEAR` lifts
    /// both and lets the risk level decide.
    pub fn update_segment_status(
        &self,
        id: &str,
        status: SegmentStatus,
        risk_level: f64,
    ) -> RoutingResult<RoadSegment> {
        self.mutate_segment(id, |segment| {
            segment.risk_level = risk_level.clamp(0.0, 1.0);
            segment.manual_block = status == SegmentStatus::Blocked;
            segment.manual_high_risk = status == SegmentStatus::HighRisk;
        })
    }

    /// Translate a field event into a condition change.
    ///
    /// Returns `Ok(None)` for event types that carry no road effect.
    pub fn apply_event(
        &self,
        event_type: EventType,
        severity: EventSeverity,
        segment_id: &str,
    ) -> RoutingResult<Option<RoadSegment>> {
        let bump = |low: f64, medium: f64, high: f64| match severity {
            EventSeverity::Low => low,
            EventSeverity::Medium => medium,
            EventSeverity::High => high,
        };

        let updated = match event_type {
            EventType::BlockRoad => self.mutate_segment(segment_id, |segment| {
                segment.manual_block = true;
            })?,
            EventType::Landslide => {
                let delta = bump(0.2, 0.3, 0.4);
                self.mutate_segment(segment_id, |segment| {
                    segment.risk_level = (segment.risk_level + delta).min(1.0);
                    if severity == EventSeverity::High {
                        segment.manual_block = true;
                    } else {
                        segment.manual_high_risk = true;
                    }
                })?
            }
            EventType::Rainfall => {
                let delta = bump(0.05, 0.1, 0.2);
                self.mutate_segment(segment_id, |segment| {
                    segment.risk_level = (segment.risk_level + delta).min(1.0);
                })?
            }
            EventType::Congestion => {
                let delta = bump(0.03, 0.06, 0.1);
                self.mutate_segment(segment_id, |segment| {
                    segment.risk_level = (segment.risk_level + delta).min(1.0);
                })?
            }
            EventType::Checkpoint => {
                // Still reject unknown ids so callers learn about typos.
                self.get_segment(segment_id)?;
                return Ok(None);
            }
        };
        Ok(Some(updated))
    }

    fn mutate_segment<F>(&self, id: &str, apply: F) -> RoutingResult<RoadSegment>
    where
        F: FnOnce(&mut RoadSegment),
    {
        let mut entry = self
            .segments
            .get_mut(id)
            .ok_or_else(|| RoutingError::UnknownSegment(id.to_string()))?;
        let segment = entry.value_mut();
        apply(segment);
        segment.refresh_status(self.high_risk_threshold);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        segment.revision = generation;

        tracing::info!(
            segment_id = id,
            status = ?segment.status,
            risk_level = segment.risk_level,
            generation,
            "Segment condition changed"
        );
        Ok(segment.clone())
    }

    /// Segments sharing a junction with `segment_id`, ordered by id.
    pub fn neighbors(&self, segment_id: &str) -> RoutingResult<Vec<String>> {
        let (a, b) = self
            .endpoints
            .get(segment_id)
            .copied()
            .ok_or_else(|| RoutingError::not_found("segment", segment_id))?;
        let ids: BTreeSet<String> = self.incident[a]
            .iter()
            .chain(self.incident[b].iter())
            .filter(|id| id.as_str() != segment_id)
            .cloned()
            .collect();
        Ok(ids.into_iter().collect())
    }

    pub fn junctions(&self) -> &[Junction] {
        &self.junctions
    }

    pub fn junction_position(&self, index: usize) -> Option<LngLat> {
        self.junctions.get(index).map(|junction| junction.position)
    }

    /// Segment ids touching a junction.
    pub fn incident_segments(&self, junction: usize) -> &[String] {
        self.incident
            .get(junction)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn segment_endpoints(&self, segment_id: &str) -> Option<(usize, usize)> {
        self.endpoints.get(segment_id).copied()
    }

    /// Closest junction to `point` and its distance in km.
    pub fn nearest_junction(&self, point: LngLat) -> Option<(usize, f64)> {
        self.junctions
            .iter()
            .map(|junction| (junction.index, junction.position.distance_km(&point)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
    }

    pub fn max_speed_kmph(&self) -> f64 {
        self.max_speed_kmph
    }

    /// Segments on `route` changed after the route was planned.
    pub fn stale_segments(&self, route: &Route) -> Vec<String> {
        route
            .segments
            .iter()
            .filter(|planned| {
                self.segments
                    .get(&planned.id)
                    .map(|current| current.revision > route.network_generation)
                    .unwrap_or(true)
            })
            .map(|planned| planned.id.clone())
            .collect()
    }

    pub fn is_route_stale(&self, route: &Route) -> bool {
        !self.stale_segments(route).is_empty()
    }
}

fn validate_segment(segment: &RoadSegment) -> RoutingResult<()> {
    if segment.coordinates.len() < 2 {
        return Err(RoutingError::InvalidNetwork(format!(
            "segment {} needs at least 2 coordinates",
            segment.id
        )));
    }
    if !segment.coordinates.iter().all(LngLat::is_finite) {
        return Err(RoutingError::InvalidNetwork(format!(
            "segment {} has non-finite coordinates",
            segment.id
        )));
    }
    if !(segment.recommended_speed_kmph.is_finite() && segment.recommended_speed_kmph > 0.0) {
        return Err(RoutingError::InvalidNetwork(format!(
            "segment {} needs a positive recommended speed",
            segment.id
        )));
    }
    if !(0.0..=1.0).contains(&segment.risk_level) {
        return Err(RoutingError::InvalidNetwork(format!(
            "segment {} risk level must be within [0, 1]",
            segment.id
        )));
    }
    Ok(())
}

fn cluster_junction(junctions: &mut Vec<Junction>, point: LngLat) -> usize {
    if let Some(existing) = junctions.iter().find(|j| j.position.close_to(&point)) {
        return existing.index;
    }
    let index = junctions.len();
    junctions.push(Junction {
        index,
        position: point,
    });
    index
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Difficulty, Terrain};

    pub(crate) fn segment(id: &str, coords: &[(f64, f64)], speed: f64, risk: f64) -> RoadSegment {
        RoadSegment {
            id: id.to_string(),
            coordinates: coords.iter().map(|(lng, lat)| LngLat(*lng, *lat)).collect(),
            terrain: Terrain::Mountain,
            difficulty: Difficulty::Medium,
            recommended_speed_kmph: speed,
            risk_level: risk,
            status: SegmentStatus::Clear,
            capacity: 1,
            revision: 0,
            manual_block: false,
            manual_high_risk: false,
        }
    }

    /// A -- B -- D on the north side, A -- C -- D on the south side.
    pub(crate) fn diamond() -> RoadNetwork {
        RoadNetwork::from_segments(
            vec![
                segment("AB", &[(74.0, 34.0), (74.5, 34.2)], 40.0, 0.2),
                segment("BD", &[(74.5, 34.2), (75.0, 34.0)], 40.0, 0.2),
                segment("AC", &[(74.0, 34.0), (74.5, 33.8)], 40.0, 0.1),
                segment("CD", &[(74.5, 33.8), (75.0, 34.0)], 40.0, 0.1),
            ],
            &RoutingRules::default(),
        )
        .expect("diamond network")
    }

    #[test]
    fn neighbors_are_sorted_and_exclude_self() {
        let network = diamond();
        assert_eq!(network.neighbors("AB").unwrap(), vec!["AC", "BD"]);
        assert_eq!(network.neighbors("CD").unwrap(), vec!["AC", "BD"]);
        assert!(matches!(
            network.neighbors("ZZ"),
            Err(RoutingError::NotFound { .. })
        ));
    }

    #[test]
    fn update_unknown_segment_fails() {
        let network = diamond();
        let err = network
            .update_segment_status("nope", SegmentStatus::Blocked, 0.5)
            .unwrap_err();
        assert_eq!(err, RoutingError::UnknownSegment("nope".into()));
    }

    #[test]
    fn status_update_bumps_generation_and_marks_routes_stale() {
        let network = diamond();
        let route = Route {
            id: "r".into(),
            name: "r".into(),
            polyline: vec![LngLat(74.0, 34.0), LngLat(75.0, 34.0)],
            eta_hours: 1.0,
            distance_km: 1.0,
            risk_score: 10.0,
            segments: vec![network.get_segment("AB").unwrap()],
            checkpoints: Vec::new(),
            network_generation: network.generation(),
        };
        assert!(!network.is_route_stale(&route));

        let updated = network
            .update_segment_status("AB", SegmentStatus::Blocked, 0.3)
            .unwrap();
        assert_eq!(updated.status, SegmentStatus::Blocked);
        assert_eq!(network.generation(), 1);
        assert_eq!(network.stale_segments(&route), vec!["AB".to_string()]);

        // Unrelated segments do not invalidate the route.
        let other = network
            .update_segment_status("CD", SegmentStatus::Clear, 0.1)
            .unwrap();
        assert_eq!(other.revision, 2);
    }

    #[test]
    fn landslide_blocks_on_high_severity() {
        let network = diamond();
        let updated = network
            .apply_event(EventType::Landslide, EventSeverity::High, "AC")
            .unwrap()
            .expect("road effect");
        assert_eq!(updated.status, SegmentStatus::Blocked);

        let rain = network
            .apply_event(EventType::Rainfall, EventSeverity::Medium, "AB")
            .unwrap()
            .expect("road effect");
        assert!((rain.risk_level - 0.3).abs() < 1e-9);

        assert!(network
            .apply_event(EventType::Checkpoint, EventSeverity::Low, "AB")
            .unwrap()
            .is_none());
    }

    #[test]
    fn loading_rejects_bad_segments() {
        let bad = vec![segment("X", &[(74.0, 34.0)], 40.0, 0.1)];
        assert!(matches!(
            RoadNetwork::from_segments(bad, &RoutingRules::default()),
            Err(RoutingError::InvalidNetwork(_))
        ));
    }

    #[test]
    fn declared_blocked_status_survives_load() {
        let mut blocked = segment("AB", &[(74.0, 34.0), (74.5, 34.2)], 40.0, 0.1);
        blocked.status = SegmentStatus::Blocked;
        let network = RoadNetwork::from_segments(vec![blocked], &RoutingRules::default()).unwrap();
        assert!(network.get_segment("AB").unwrap().is_blocked());
    }
}
