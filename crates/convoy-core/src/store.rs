//! Convoy state store.
//!
//! Each convoy sits behind its own mutex so writers on different convoys
//! never contend. The outer map is only locked briefly to look up a record.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{RoutingError, RoutingResult};
use crate::models::{
    CheckpointLogEntry, CheckpointStatus, Convoy, ConvoyFilter, ConvoySpec, ConvoyStatus,
    GeoPoint, MergeSuggestion, Priority, Route,
};

const DEFAULT_NAME: &str = "New Convoy";
const DEFAULT_SPEED_KMPH: f64 = 50.0;
const DEFAULT_VEHICLE_COUNT: i64 = 10;
const DEFAULT_ETA_HOURS: f64 = 12.0;

#[derive(Debug)]
struct ConvoyRecord {
    convoy: Convoy,
    checkpoint_log: Vec<CheckpointLogEntry>,
}

/// Result of a checkpoint clear submission.
#[derive(Debug, Clone)]
pub struct CheckpointClear {
    pub convoy: Convoy,
    /// False when the checkpoint had already been cleared
    pub newly_cleared: bool,
}

#[derive(Debug, Default)]
pub struct ConvoyStore {
    records: DashMap<String, Arc<Mutex<ConvoyRecord>>>,
}

fn lock(record: &Mutex<ConvoyRecord>) -> MutexGuard<'_, ConvoyRecord> {
    // A panicking writer leaves the record intact; keep serving it.
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConvoyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record(&self, id: &str) -> RoutingResult<Arc<Mutex<ConvoyRecord>>> {
        self.records
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RoutingError::not_found("convoy", id))
    }

    /// Create a convoy from a partial payload, applying defaults.
    pub fn create(&self, spec: ConvoySpec) -> RoutingResult<Convoy> {
        let now = Utc::now();
        let vehicle_count = spec.vehicle_count.unwrap_or(DEFAULT_VEHICLE_COUNT);
        if vehicle_count <= 0 {
            return Err(RoutingError::InvalidSpec(
                "vehicleCount must be positive".into(),
            ));
        }
        let vehicle_count = u32::try_from(vehicle_count)
            .map_err(|_| RoutingError::InvalidSpec("vehicleCount is too large".into()))?;

        let speed_kmph = spec.speed_kmph.unwrap_or(DEFAULT_SPEED_KMPH);
        if !(speed_kmph.is_finite() && speed_kmph > 0.0) {
            return Err(RoutingError::InvalidSpec("speedKmph must be positive".into()));
        }

        let origin = spec.origin.unwrap_or_else(|| GeoPoint::new(0.0, 0.0));
        let destination = spec.destination.unwrap_or_else(|| GeoPoint::new(0.0, 0.0));
        if !(origin.position().is_finite() && destination.position().is_finite()) {
            return Err(RoutingError::InvalidSpec(
                "origin and destination must be finite coordinates".into(),
            ));
        }
        if origin.position().close_to(&destination.position()) {
            return Err(RoutingError::InvalidSpec(
                "origin and destination must differ".into(),
            ));
        }

        let mut convoy = Convoy {
            id: String::new(),
            name: spec.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            origin,
            destination,
            assigned_route: None,
            speed_kmph,
            priority: spec.priority.unwrap_or(Priority::Bravo),
            vehicle_count,
            status: spec.status.unwrap_or(ConvoyStatus::Planned),
            last_updated: now,
            eta_hours: Some(spec.eta_hours.unwrap_or(DEFAULT_ETA_HOURS)),
            departure_time: spec.departure_time.unwrap_or(now),
            merge_suggestion: None,
        };

        if let Some(route) = spec.assigned_route {
            if !route.connects(&convoy.origin, &convoy.destination) {
                return Err(RoutingError::RouteMismatch {
                    convoy_id: spec.id.clone().unwrap_or_default(),
                    route_id: route.id,
                });
            }
            convoy.eta_hours = Some(route.eta_hours);
            convoy.assigned_route = Some(route);
        }

        match spec.id {
            Some(id) => {
                convoy.id = id.clone();
                match self.records.entry(id) {
                    Entry::Occupied(entry) => {
                        return Err(RoutingError::InvalidSpec(format!(
                            "convoy {} already exists",
                            entry.key()
                        )))
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(Arc::new(Mutex::new(ConvoyRecord {
                            convoy: convoy.clone(),
                            checkpoint_log: Vec::new(),
                        })));
                    }
                }
            }
            None => {
                let mut seq = self.records.len() + 1;
                loop {
                    let id = format!("CVY-{seq:03}");
                    if let Entry::Vacant(entry) = self.records.entry(id.clone()) {
                        convoy.id = id;
                        entry.insert(Arc::new(Mutex::new(ConvoyRecord {
                            convoy: convoy.clone(),
                            checkpoint_log: Vec::new(),
                        })));
                        break;
                    }
                    seq += 1;
                }
            }
        }

        tracing::info!(
            convoy_id = %convoy.id,
            priority = ?convoy.priority,
            vehicles = convoy.vehicle_count,
            "Convoy created"
        );
        Ok(convoy)
    }

    pub fn get(&self, id: &str) -> RoutingResult<Convoy> {
        let record = self.record(id)?;
        let guard = lock(&record);
        Ok(guard.convoy.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Replace the assigned route. The route must connect the convoy's
    /// origin and destination.
    pub fn assign_route(&self, id: &str, route: Route) -> RoutingResult<Convoy> {
        self.commit(id, None, route, |_| Ok(()))
    }

    /// Commit a route towards a new destination.
    pub fn redirect(&self, id: &str, destination: GeoPoint, route: Route) -> RoutingResult<Convoy> {
        self.commit(id, Some(destination), route, |_| Ok(()))
    }

    /// Commit a route under the convoy lock.
    ///
    /// `precondition` runs while the lock is held, after the endpoint check,
    /// and can veto the commit (e.g. when the network moved on).
    pub fn commit<F>(
        &self,
        id: &str,
        destination: Option<GeoPoint>,
        mut route: Route,
        precondition: F,
    ) -> RoutingResult<Convoy>
    where
        F: FnOnce(&Route) -> RoutingResult<()>,
    {
        let record = self.record(id)?;
        let mut guard = lock(&record);
        let convoy = &mut guard.convoy;

        let target = destination.as_ref().unwrap_or(&convoy.destination);
        if !route.connects(&convoy.origin, target) {
            return Err(RoutingError::RouteMismatch {
                convoy_id: id.to_string(),
                route_id: route.id,
            });
        }
        precondition(&route)?;

        if let Some(previous) = convoy.assigned_route.as_ref() {
            keep_cleared_checkpoints(previous, &mut route);
        }
        if let Some(destination) = destination {
            convoy.destination = destination;
        }
        convoy.eta_hours = Some(route.eta_hours);
        convoy.last_updated = Utc::now();
        tracing::info!(
            convoy_id = id,
            route_id = %route.id,
            eta_hours = route.eta_hours,
            risk_score = route.risk_score,
            "Route assigned"
        );
        convoy.assigned_route = Some(route);
        Ok(convoy.clone())
    }

    pub fn update_status(&self, id: &str, status: ConvoyStatus) -> RoutingResult<Convoy> {
        let record = self.record(id)?;
        let mut guard = lock(&record);
        guard.convoy.status = status;
        guard.convoy.last_updated = Utc::now();
        Ok(guard.convoy.clone())
    }

    /// Mark a checkpoint cleared. Repeated submissions are no-ops.
    pub fn clear_checkpoint(
        &self,
        convoy_id: &str,
        checkpoint_id: &str,
        location: GeoPoint,
        now: DateTime<Utc>,
    ) -> RoutingResult<CheckpointClear> {
        let record = self.record(convoy_id)?;
        let mut guard = lock(&record);
        let ConvoyRecord {
            convoy,
            checkpoint_log,
        } = &mut *guard;

        // Repeats are keyed on the log, which survives route swaps.
        if checkpoint_log.iter().any(|entry| entry.checkpoint_id == checkpoint_id) {
            tracing::debug!(convoy_id, checkpoint_id, "Checkpoint already cleared");
            return Ok(CheckpointClear {
                convoy: convoy.clone(),
                newly_cleared: false,
            });
        }

        let checkpoint = convoy
            .assigned_route
            .as_mut()
            .and_then(|route| route.checkpoints.iter_mut().find(|c| c.id == checkpoint_id))
            .ok_or_else(|| RoutingError::not_found("checkpoint", checkpoint_id))?;

        if checkpoint.is_cleared() {
            tracing::debug!(convoy_id, checkpoint_id, "Checkpoint already cleared");
            return Ok(CheckpointClear {
                convoy: convoy.clone(),
                newly_cleared: false,
            });
        }

        checkpoint.status = CheckpointStatus::Cleared;
        checkpoint.logged_at = Some(now);
        checkpoint_log.push(CheckpointLogEntry {
            convoy_id: convoy_id.to_string(),
            checkpoint_id: checkpoint_id.to_string(),
            checkpoint_name: checkpoint.name.clone(),
            location,
            logged_at: now,
        });
        convoy.last_updated = now;

        tracing::info!(convoy_id, checkpoint_id, "Checkpoint cleared");
        Ok(CheckpointClear {
            convoy: convoy.clone(),
            newly_cleared: true,
        })
    }

    pub fn checkpoint_log(&self, convoy_id: &str) -> RoutingResult<Vec<CheckpointLogEntry>> {
        let record = self.record(convoy_id)?;
        let guard = lock(&record);
        Ok(guard.checkpoint_log.clone())
    }

    /// Replace every convoy's merge suggestion. Convoys missing from
    /// `suggestions` lose any previous one.
    pub fn apply_merge_suggestions(&self, suggestions: &HashMap<String, MergeSuggestion>) {
        for entry in self.records.iter() {
            let mut guard = lock(entry.value());
            guard.convoy.merge_suggestion = suggestions.get(entry.key()).cloned();
        }
    }

    /// Point-in-time copy of every convoy, ordered by id.
    pub fn snapshot(&self) -> Vec<Convoy> {
        let records: Vec<Arc<Mutex<ConvoyRecord>>> = self
            .records
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut convoys: Vec<Convoy> = records
            .iter()
            .map(|record| lock(record).convoy.clone())
            .collect();
        convoys.sort_by(|a, b| a.id.cmp(&b.id));
        convoys
    }

    /// Convoys matching `filter`, ALPHA first then by id.
    pub fn list(&self, filter: &ConvoyFilter) -> Vec<Convoy> {
        let mut convoys: Vec<Convoy> = self
            .snapshot()
            .into_iter()
            .filter(|convoy| filter.matches(convoy))
            .collect();
        convoys.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        convoys
    }
}

/// Carry cleared state over to checkpoints the new route shares with the old.
fn keep_cleared_checkpoints(previous: &Route, route: &mut Route) {
    for checkpoint in &mut route.checkpoints {
        let cleared = previous
            .checkpoints
            .iter()
            .find(|old| old.is_cleared() && (old.id == checkpoint.id || old.name == checkpoint.name));
        if let Some(old) = cleared {
            checkpoint.status = CheckpointStatus::Cleared;
            checkpoint.logged_at = old.logged_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Checkpoint, LngLat};

    fn srinagar() -> GeoPoint {
        GeoPoint::named(34.08, 74.79, "Srinagar")
    }

    fn leh() -> GeoPoint {
        GeoPoint::named(34.16, 77.58, "Leh")
    }

    fn route_between(id: &str, from: &GeoPoint, to: &GeoPoint) -> Route {
        Route {
            id: id.to_string(),
            name: format!("{} → {}", from.label(), to.label()),
            polyline: vec![from.position(), to.position()],
            eta_hours: 9.5,
            distance_km: 420.0,
            risk_score: 40.0,
            segments: Vec::new(),
            checkpoints: vec![Checkpoint {
                id: "CP-1".into(),
                name: "Zoji La Pass".into(),
                status: CheckpointStatus::Pending,
                eta: Utc::now(),
                logged_at: None,
            }],
            network_generation: 0,
        }
    }

    fn spec() -> ConvoySpec {
        ConvoySpec {
            origin: Some(srinagar()),
            destination: Some(leh()),
            ..ConvoySpec::default()
        }
    }

    #[test]
    fn create_applies_defaults() {
        let store = ConvoyStore::new();
        let convoy = store.create(spec()).unwrap();
        assert_eq!(convoy.id, "CVY-001");
        assert_eq!(convoy.name, "New Convoy");
        assert_eq!(convoy.priority, Priority::Bravo);
        assert_eq!(convoy.status, ConvoyStatus::Planned);
        assert_eq!(convoy.speed_kmph, 50.0);
        assert_eq!(convoy.vehicle_count, 10);
        assert_eq!(convoy.eta_hours, Some(12.0));

        let second = store.create(spec()).unwrap();
        assert_eq!(second.id, "CVY-002");
    }

    #[test]
    fn create_rejects_invalid_payloads() {
        let store = ConvoyStore::new();
        let zero = ConvoySpec {
            vehicle_count: Some(0),
            ..spec()
        };
        assert!(matches!(store.create(zero), Err(RoutingError::InvalidSpec(_))));

        let slow = ConvoySpec {
            speed_kmph: Some(-5.0),
            ..spec()
        };
        assert!(matches!(store.create(slow), Err(RoutingError::InvalidSpec(_))));

        // Both endpoints default to 0,0.
        assert!(matches!(
            store.create(ConvoySpec::default()),
            Err(RoutingError::InvalidSpec(_))
        ));

        let named = ConvoySpec {
            id: Some("CVY-777".into()),
            ..spec()
        };
        store.create(named.clone()).unwrap();
        assert!(matches!(store.create(named), Err(RoutingError::InvalidSpec(_))));
    }

    #[test]
    fn generated_ids_skip_taken_ones() {
        let store = ConvoyStore::new();
        store
            .create(ConvoySpec {
                id: Some("CVY-001".into()),
                ..spec()
            })
            .unwrap();
        let convoy = store.create(spec()).unwrap();
        assert_eq!(convoy.id, "CVY-002");
    }

    #[test]
    fn assign_route_checks_endpoints() {
        let store = ConvoyStore::new();
        let convoy = store.create(spec()).unwrap();

        let wrong = route_between("RTE-X", &srinagar(), &GeoPoint::new(30.0, 70.0));
        let err = store.assign_route(&convoy.id, wrong).unwrap_err();
        assert!(matches!(err, RoutingError::RouteMismatch { .. }));
        assert!(store.get(&convoy.id).unwrap().assigned_route.is_none());

        let updated = store
            .assign_route(&convoy.id, route_between("RTE-1", &srinagar(), &leh()))
            .unwrap();
        assert_eq!(updated.eta_hours, Some(9.5));
        assert!(matches!(
            store.assign_route("CVY-404", route_between("RTE-2", &srinagar(), &leh())),
            Err(RoutingError::NotFound { .. })
        ));
    }

    #[test]
    fn clearing_a_checkpoint_twice_logs_once() {
        let store = ConvoyStore::new();
        let convoy = store.create(spec()).unwrap();
        store
            .assign_route(&convoy.id, route_between("RTE-1", &srinagar(), &leh()))
            .unwrap();

        let location = GeoPoint::named(34.27, 75.46, "Zoji La");
        let first = store
            .clear_checkpoint(&convoy.id, "CP-1", location.clone(), Utc::now())
            .unwrap();
        let second = store
            .clear_checkpoint(&convoy.id, "CP-1", location, Utc::now())
            .unwrap();
        assert!(first.newly_cleared);
        assert!(!second.newly_cleared);
        assert_eq!(store.checkpoint_log(&convoy.id).unwrap().len(), 1);

        assert!(matches!(
            store.clear_checkpoint(&convoy.id, "CP-9", GeoPoint::new(0.0, 0.0), Utc::now()),
            Err(RoutingError::NotFound { kind: "checkpoint", .. })
        ));
    }

    #[test]
    fn reassignment_keeps_cleared_checkpoints() {
        let store = ConvoyStore::new();
        let convoy = store.create(spec()).unwrap();
        store
            .assign_route(&convoy.id, route_between("RTE-1", &srinagar(), &leh()))
            .unwrap();
        store
            .clear_checkpoint(&convoy.id, "CP-1", srinagar(), Utc::now())
            .unwrap();

        let mut replacement = route_between("RTE-2", &srinagar(), &leh());
        replacement.checkpoints[0].id = "CP-1-G2".into();
        let updated = store.assign_route(&convoy.id, replacement).unwrap();
        let route = updated.assigned_route.unwrap();
        assert!(route.checkpoints[0].is_cleared());
    }

    #[test]
    fn repeat_clear_after_route_swap_is_a_no_op() {
        let store = ConvoyStore::new();
        let convoy = store.create(spec()).unwrap();
        store
            .assign_route(&convoy.id, route_between("RTE-1", &srinagar(), &leh()))
            .unwrap();
        store
            .clear_checkpoint(&convoy.id, "CP-1", srinagar(), Utc::now())
            .unwrap();

        let mut bare = route_between("RTE-2", &srinagar(), &leh());
        bare.checkpoints.clear();
        store.assign_route(&convoy.id, bare).unwrap();

        let repeat = store
            .clear_checkpoint(&convoy.id, "CP-1", srinagar(), Utc::now())
            .unwrap();
        assert!(!repeat.newly_cleared);
        assert_eq!(store.checkpoint_log(&convoy.id).unwrap().len(), 1);
    }

    #[test]
    fn redirect_moves_destination() {
        let store = ConvoyStore::new();
        let convoy = store.create(spec()).unwrap();
        let kargil = GeoPoint::named(34.55, 76.13, "Kargil");
        let updated = store
            .redirect(&convoy.id, kargil.clone(), route_between("RTE-K", &srinagar(), &kargil))
            .unwrap();
        assert_eq!(updated.destination, kargil);
    }

    #[test]
    fn list_sorts_by_priority_then_id() {
        let store = ConvoyStore::new();
        for (id, priority) in [
            ("CVY-003", Priority::Charlie),
            ("CVY-002", Priority::Alpha),
            ("CVY-001", Priority::Bravo),
            ("CVY-004", Priority::Alpha),
        ] {
            store
                .create(ConvoySpec {
                    id: Some(id.into()),
                    priority: Some(priority),
                    ..spec()
                })
                .unwrap();
        }
        let ids: Vec<String> = store
            .list(&ConvoyFilter::default())
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["CVY-002", "CVY-004", "CVY-001", "CVY-003"]);

        let alpha = store.list(&ConvoyFilter {
            priority: Some(Priority::Alpha),
            status: None,
        });
        assert_eq!(alpha.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_assignments_never_mismatch() {
        let store = Arc::new(ConvoyStore::new());
        let convoy = store.create(spec()).unwrap();

        let mut handles = Vec::new();
        for i in 0..64 {
            let store = Arc::clone(&store);
            let id = convoy.id.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let to = if i % 2 == 0 {
                    leh()
                } else {
                    GeoPoint::new(30.0 + i as f64 * 0.01, 70.0)
                };
                let route = route_between(&format!("RTE-{i}"), &srinagar(), &to);
                let _ = store.assign_route(&id, route);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let convoy = store.get(&convoy.id).unwrap();
        let route = convoy.assigned_route.expect("at least one valid assignment");
        assert!(route.connects(&convoy.origin, &convoy.destination));
        assert_eq!(route.end(), Some(LngLat(77.58, 34.16)));
    }
}
