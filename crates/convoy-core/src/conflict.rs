//! Conflict detection over convoy route assignments.
//!
//! Every assigned route is projected onto a timeline: a convoy enters each
//! segment at a fraction of its ETA proportional to the distance already
//! covered, starting from its departure time. Segments carrying more
//! concurrent convoys than their capacity, or carrying any convoy while
//! blocked, produce conflicts. Detection is a full recompute over a
//! snapshot and has no side effects.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::{ConflictRecord, ConflictSeverity, Convoy, Priority, RoadSegment};
use crate::network::RoadNetwork;
use crate::rules::RoutingRules;

/// When one convoy occupies one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentWindow {
    pub convoy_id: String,
    pub segment_id: String,
    pub priority: Priority,
    pub entry: DateTime<Utc>,
    pub exit: DateTime<Utc>,
}

impl SegmentWindow {
    pub fn duration_hours(&self) -> f64 {
        hours_between(self.entry, self.exit)
    }

    pub fn overlaps(&self, entry: DateTime<Utc>, exit: DateTime<Utc>) -> bool {
        self.entry < exit && entry < self.exit
    }

    fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.entry <= instant && instant < self.exit
    }
}

pub(crate) fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 3_600_000.0
}

pub(crate) fn add_hours(instant: DateTime<Utc>, hours: f64) -> DateTime<Utc> {
    instant + Duration::milliseconds((hours * 3_600_000.0).round() as i64)
}

/// Project a convoy's assigned route onto its segments.
///
/// Empty when the convoy has no route or the route has no length.
pub fn segment_windows(convoy: &Convoy) -> Vec<SegmentWindow> {
    let Some(route) = convoy.assigned_route.as_ref() else {
        return Vec::new();
    };
    let lengths: Vec<f64> = route.segments.iter().map(RoadSegment::length_km).collect();
    let total: f64 = lengths.iter().sum();
    if total <= 0.0 || route.eta_hours <= 0.0 {
        return Vec::new();
    }

    let mut covered = 0.0;
    route
        .segments
        .iter()
        .zip(lengths)
        .map(|(segment, length)| {
            let entry = add_hours(convoy.departure_time, route.eta_hours * covered / total);
            covered += length;
            let exit = add_hours(convoy.departure_time, route.eta_hours * covered / total);
            SegmentWindow {
                convoy_id: convoy.id.clone(),
                segment_id: segment.id.clone(),
                priority: convoy.priority,
                entry,
                exit,
            }
        })
        .collect()
}

/// Per-segment occupancy used to price contested edges during route search.
#[derive(Debug, Clone, Default)]
pub struct Occupancy {
    windows: HashMap<String, Vec<SegmentWindow>>,
}

impl Occupancy {
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Windows on a segment, ordered by entry time.
    pub fn windows(&self, segment_id: &str) -> &[SegmentWindow] {
        self.windows
            .get(segment_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// True if a convoy ranked at or above `priority` uses the segment
    /// during `[entry, exit)`.
    pub fn contested(
        &self,
        segment_id: &str,
        entry: DateTime<Utc>,
        exit: DateTime<Utc>,
        priority: Priority,
    ) -> bool {
        self.windows(segment_id)
            .iter()
            .any(|window| window.priority.at_least(priority) && window.overlaps(entry, exit))
    }
}

#[derive(Debug, Default)]
struct GroupAcc {
    segments: BTreeSet<String>,
    blocked: BTreeSet<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    overlap_hours: f64,
    over_capacity: bool,
}

impl GroupAcc {
    fn add(&mut self, segment_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.segments.insert(segment_id.to_string());
        self.start = Some(self.start.map_or(start, |s| s.min(start)));
        self.end = Some(self.end.map_or(end, |e| e.max(end)));
    }
}

/// Conflict detector for the convoy fleet.
#[derive(Debug, Clone, Default)]
pub struct ConflictDetector {
    rules: RoutingRules,
}

impl ConflictDetector {
    pub fn new(rules: RoutingRules) -> Self {
        Self { rules }
    }

    /// Occupancy windows for every active convoy with a route, optionally
    /// skipping one convoy (the one being planned).
    pub fn occupancy(convoys: &[Convoy], skip: Option<&str>) -> Occupancy {
        let mut windows: HashMap<String, Vec<SegmentWindow>> = HashMap::new();
        for convoy in convoys {
            if !convoy.is_active() || skip == Some(convoy.id.as_str()) {
                continue;
            }
            for window in segment_windows(convoy) {
                windows
                    .entry(window.segment_id.clone())
                    .or_default()
                    .push(window);
            }
        }
        for list in windows.values_mut() {
            list.sort_by(|a, b| a.entry.cmp(&b.entry).then_with(|| a.convoy_id.cmp(&b.convoy_id)));
        }
        Occupancy { windows }
    }

    /// Detect conflicts across all convoys.
    ///
    /// Output is ordered by severity (most severe first), then convoy ids,
    /// and is identical for identical inputs.
    pub fn detect(&self, convoys: &[Convoy], network: &RoadNetwork) -> Vec<ConflictRecord> {
        let occupancy = Self::occupancy(convoys, None);
        let route_risk: HashMap<&str, f64> = convoys
            .iter()
            .filter_map(|c| c.assigned_route.as_ref().map(|r| (c.id.as_str(), r.risk_score)))
            .collect();

        let mut segment_ids: Vec<&String> = occupancy.windows.keys().collect();
        segment_ids.sort();

        let mut groups: BTreeMap<Vec<String>, GroupAcc> = BTreeMap::new();
        for segment_id in segment_ids {
            let windows = occupancy.windows(segment_id);
            let (blocked, capacity) = match network.get_segment(segment_id) {
                Ok(segment) => (segment.is_blocked(), segment.capacity.max(1) as usize),
                Err(_) => {
                    tracing::debug!(segment_id = %segment_id, "Route references unknown segment");
                    continue;
                }
            };

            if blocked {
                let ids = convoy_set(windows.iter());
                let start = windows.iter().map(|w| w.entry).min();
                let end = windows.iter().map(|w| w.exit).max();
                if let (Some(start), Some(end)) = (start, end) {
                    let group = groups.entry(ids).or_default();
                    group.add(segment_id, start, end);
                    group.blocked.insert(segment_id.clone());
                }
                continue;
            }

            let crowded = crowded_sets(windows, capacity);
            for (ids, start, end) in &crowded {
                let group = groups.entry(ids.clone()).or_default();
                group.add(segment_id, *start, *end);
                group.overlap_hours += hours_between(*start, *end);
                group.over_capacity = true;
            }

            if self.rules.report_shared_corridors {
                for (i, a) in windows.iter().enumerate() {
                    for b in &windows[i + 1..] {
                        if a.convoy_id == b.convoy_id || !a.overlaps(b.entry, b.exit) {
                            continue;
                        }
                        let already = crowded.iter().any(|(ids, _, _)| {
                            ids.contains(&a.convoy_id) && ids.contains(&b.convoy_id)
                        });
                        if already {
                            continue;
                        }
                        let ids = convoy_set([a, b].into_iter());
                        let start = a.entry.max(b.entry);
                        let end = a.exit.min(b.exit);
                        let group = groups.entry(ids).or_default();
                        group.add(segment_id, start, end);
                        group.overlap_hours += hours_between(start, end);
                    }
                }
            }
        }

        let mut records: Vec<ConflictRecord> = groups
            .into_iter()
            .filter_map(|(ids, group)| self.build_record(ids, group, &route_risk))
            .collect();
        records.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.convoy_ids.cmp(&b.convoy_ids))
        });

        if !records.is_empty() {
            tracing::debug!(count = records.len(), "Conflict detection pass complete");
        }
        records
    }

    fn build_record(
        &self,
        convoy_ids: Vec<String>,
        group: GroupAcc,
        route_risk: &HashMap<&str, f64>,
    ) -> Option<ConflictRecord> {
        let (window_start, window_end) = (group.start?, group.end?);
        let combined_risk_score = convoy_ids
            .iter()
            .filter_map(|id| route_risk.get(id.as_str()).copied())
            .fold(0.0, f64::max);

        let severity = if !group.blocked.is_empty() {
            ConflictSeverity::Blocked
        } else if !group.over_capacity {
            ConflictSeverity::Shared
        } else if combined_risk_score > self.rules.conflict_risk_alert {
            ConflictSeverity::HighRisk
        } else {
            ConflictSeverity::CapacityOverlap
        };

        Some(ConflictRecord {
            id: format!("CFL-{}", convoy_ids.join("-")),
            convoy_ids,
            segment_ids: group.segments.into_iter().collect(),
            window_start,
            window_end,
            overlap_hours: (group.overlap_hours * 100.0).round() / 100.0,
            severity,
            combined_risk_score,
            blocked_segments: group.blocked.len(),
            acknowledged: false,
        })
    }
}

fn convoy_set<'a>(windows: impl Iterator<Item = &'a SegmentWindow>) -> Vec<String> {
    windows
        .map(|w| w.convoy_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Sets of convoys concurrently on a segment in excess of its capacity,
/// with the interval all of them share.
///
/// `windows` must be ordered by entry time. The occupancy count only
/// rises at an entry, so probing each entry instant finds every peak.
fn crowded_sets(
    windows: &[SegmentWindow],
    capacity: usize,
) -> Vec<(Vec<String>, DateTime<Utc>, DateTime<Utc>)> {
    let mut found: Vec<(Vec<String>, DateTime<Utc>, DateTime<Utc>)> = Vec::new();
    for probe in windows {
        let active: Vec<&SegmentWindow> = windows.iter().filter(|w| w.contains(probe.entry)).collect();
        let ids = convoy_set(active.iter().copied());
        if ids.len() <= capacity || found.iter().any(|(seen, _, _)| *seen == ids) {
            continue;
        }
        let start = active.iter().map(|w| w.entry).max();
        let end = active.iter().map(|w| w.exit).min();
        if let (Some(start), Some(end)) = (start, end) {
            found.push((ids, start, end));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConvoyStatus, GeoPoint, LngLat, Route, SegmentStatus};
    use crate::network::tests::segment;
    use chrono::TimeZone;

    fn corridor() -> RoadNetwork {
        RoadNetwork::from_segments(
            vec![
                segment("SRI-SON", &[(74.79, 34.08), (75.30, 34.30)], 40.0, 0.3),
                segment("SON-ZOJ", &[(75.30, 34.30), (75.46, 34.27)], 25.0, 0.7),
                segment("ZOJ-DRS", &[(75.46, 34.27), (75.63, 34.24)], 30.0, 0.5),
            ],
            &RoutingRules::default(),
        )
        .unwrap()
    }

    fn convoy_on(
        id: &str,
        priority: Priority,
        network: &RoadNetwork,
        segment_ids: &[&str],
        depart_hour: u32,
        risk_score: f64,
    ) -> Convoy {
        let segments: Vec<RoadSegment> = segment_ids
            .iter()
            .map(|s| network.get_segment(s).unwrap())
            .collect();
        let polyline: Vec<LngLat> = segments.iter().flat_map(|s| s.coordinates.clone()).collect();
        let departure = Utc.with_ymd_and_hms(2024, 5, 1, depart_hour, 0, 0).unwrap();
        Convoy {
            id: id.into(),
            name: id.into(),
            origin: GeoPoint::named(34.08, 74.79, "Srinagar"),
            destination: GeoPoint::named(34.16, 77.58, "Leh"),
            assigned_route: Some(Route {
                id: format!("RTE-{id}"),
                name: "Srinagar → Leh".into(),
                polyline,
                eta_hours: 6.0,
                distance_km: 80.0,
                risk_score,
                segments,
                checkpoints: Vec::new(),
                network_generation: 0,
            }),
            speed_kmph: 40.0,
            priority,
            vehicle_count: 10,
            status: ConvoyStatus::EnRoute,
            last_updated: departure,
            eta_hours: Some(6.0),
            departure_time: departure,
            merge_suggestion: None,
        }
    }

    const ALL: [&str; 3] = ["SRI-SON", "SON-ZOJ", "ZOJ-DRS"];

    #[test]
    fn overlapping_convoys_form_one_record() {
        let network = corridor();
        let a = convoy_on("CVY-A", Priority::Alpha, &network, &ALL, 6, 40.0);
        let b = convoy_on("CVY-B", Priority::Bravo, &network, &ALL, 7, 30.0);

        let records = ConflictDetector::default().detect(&[a, b], &network);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.convoy_ids, vec!["CVY-A", "CVY-B"]);
        assert_eq!(record.id, "CFL-CVY-A-CVY-B");
        assert!(record.severity >= ConflictSeverity::CapacityOverlap);
        assert_eq!(record.combined_risk_score, 40.0);
    }

    #[test]
    fn disjoint_windows_do_not_conflict() {
        let network = corridor();
        let a = convoy_on("CVY-A", Priority::Alpha, &network, &ALL, 0, 40.0);
        let b = convoy_on("CVY-B", Priority::Bravo, &network, &ALL, 12, 30.0);
        assert!(ConflictDetector::default().detect(&[a, b], &network).is_empty());
    }

    #[test]
    fn blocked_segment_escalates_severity() {
        let network = corridor();
        let a = convoy_on("CVY-A", Priority::Alpha, &network, &ALL, 6, 40.0);
        let c = convoy_on("CVY-C", Priority::Charlie, &network, &ALL, 20, 70.0);
        network
            .update_segment_status("SON-ZOJ", SegmentStatus::Blocked, 0.9)
            .unwrap();

        let records = ConflictDetector::default().detect(&[a, c], &network);
        assert_eq!(records[0].severity, ConflictSeverity::Blocked);
        assert_eq!(records[0].blocked_segments, 1);
        assert_eq!(records[0].segment_ids, vec!["SON-ZOJ"]);
    }

    #[test]
    fn high_route_risk_raises_severity() {
        let network = corridor();
        let a = convoy_on("CVY-A", Priority::Alpha, &network, &ALL, 6, 72.0);
        let b = convoy_on("CVY-B", Priority::Bravo, &network, &ALL, 7, 30.0);
        let records = ConflictDetector::default().detect(&[a, b], &network);
        assert_eq!(records[0].severity, ConflictSeverity::HighRisk);
    }

    #[test]
    fn completed_and_unrouted_convoys_are_ignored() {
        let network = corridor();
        let a = convoy_on("CVY-A", Priority::Alpha, &network, &ALL, 6, 40.0);
        let mut b = convoy_on("CVY-B", Priority::Bravo, &network, &ALL, 6, 30.0);
        b.status = ConvoyStatus::Completed;
        let mut c = convoy_on("CVY-C", Priority::Bravo, &network, &ALL, 6, 30.0);
        c.assigned_route = None;
        assert!(ConflictDetector::default().detect(&[a, b, c], &network).is_empty());
    }

    #[test]
    fn detection_is_deterministic() {
        let network = corridor();
        let convoys: Vec<Convoy> = (0..5)
            .map(|i| {
                convoy_on(
                    &format!("CVY-{i}"),
                    Priority::Bravo,
                    &network,
                    &ALL,
                    6 + i,
                    10.0 * i as f64,
                )
            })
            .collect();
        let detector = ConflictDetector::default();
        let first = detector.detect(&convoys, &network);
        let mut reversed = convoys.clone();
        reversed.reverse();
        assert_eq!(first, detector.detect(&reversed, &network));
        assert!(!first.is_empty());
    }

    #[test]
    fn shared_corridors_are_opt_in() {
        let mut segments = vec![segment("WIDE", &[(74.0, 34.0), (74.5, 34.0)], 40.0, 0.1)];
        segments[0].capacity = 2;
        let network = RoadNetwork::from_segments(segments, &RoutingRules::default()).unwrap();
        let a = convoy_on("CVY-A", Priority::Alpha, &network, &["WIDE"], 6, 10.0);
        let b = convoy_on("CVY-B", Priority::Bravo, &network, &["WIDE"], 7, 10.0);

        assert!(ConflictDetector::default()
            .detect(&[a.clone(), b.clone()], &network)
            .is_empty());

        let rules = RoutingRules {
            report_shared_corridors: true,
            ..RoutingRules::default()
        };
        let records = ConflictDetector::new(rules).detect(&[a, b], &network);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, ConflictSeverity::Shared);
    }

    #[test]
    fn occupancy_respects_priority() {
        let network = corridor();
        let a = convoy_on("CVY-A", Priority::Alpha, &network, &ALL, 6, 40.0);
        let occupancy = ConflictDetector::occupancy(&[a], None);
        let window = occupancy.windows("SRI-SON")[0].clone();
        assert!(occupancy.contested("SRI-SON", window.entry, window.exit, Priority::Bravo));
        assert!(!occupancy.contested(
            "SRI-SON",
            window.exit,
            add_hours(window.exit, 1.0),
            Priority::Bravo
        ));
    }
}
