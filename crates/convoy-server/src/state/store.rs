//! Application state: road network, convoy store and the published
//! conflict snapshot.
//!
//! Every write to convoy or segment state triggers a synchronous
//! recompute of conflicts and merge advice. Recomputes are stamped with a
//! write generation so a slow, older pass never replaces a newer snapshot.

use chrono::{DateTime, Utc};
use convoy_core::{
    Checkpoint, CheckpointClear, CheckpointLogEntry, ConflictDetector, ConflictRecord, Convoy,
    ConvoyEvent, ConvoyFilter, ConvoySpec, ConvoyStatus, ConvoyStore, EventRequest, EventSink,
    GeoPoint, MergeAdvisor, MergeSuggestion, OperationEvent, OptimizedRoute, RoadNetwork,
    RoadSegment, RouteOptimizer, RoutingError, RoutingResult, RoutingRules, SegmentStatus,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{broadcast, Notify};

use crate::config::Config;
use crate::state::sink::{BroadcastSink, StreamMessage};

#[derive(Debug, Default)]
struct ConflictSnapshot {
    generation: u64,
    records: Vec<ConflictRecord>,
}

/// Application state shared by handlers and background loops.
pub struct AppState {
    network: RoadNetwork,
    store: ConvoyStore,
    config: Config,
    detector: ConflictDetector,
    advisor: MergeAdvisor,
    stream: BroadcastSink,
    sinks: Vec<Arc<dyn EventSink>>,
    conflicts: RwLock<ConflictSnapshot>,
    acknowledged: DashMap<String, DateTime<Utc>>,
    write_generation: AtomicU64,
    event_seq: AtomicU64,
    conflicts_changed: Notify,
}

impl AppState {
    pub fn new(network: RoadNetwork, config: Config) -> Self {
        Self {
            network,
            store: ConvoyStore::new(),
            detector: ConflictDetector::new(config.rules.clone()),
            advisor: MergeAdvisor::new(config.rules.clone()),
            stream: BroadcastSink::new(config.stream_capacity),
            sinks: Vec::new(),
            conflicts: RwLock::new(ConflictSnapshot::default()),
            acknowledged: DashMap::new(),
            write_generation: AtomicU64::new(0),
            event_seq: AtomicU64::new(0),
            conflicts_changed: Notify::new(),
            config,
        }
    }

    /// Forward stream events to an additional transport.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn rules(&self) -> &RoutingRules {
        &self.config.rules
    }

    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamMessage> {
        self.stream.subscribe()
    }

    pub fn publish(&self, event: ConvoyEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone());
        }
        self.stream.publish(event);
    }

    /// Resolves after the next conflict snapshot is published.
    pub async fn conflicts_changed(&self) {
        self.conflicts_changed.notified().await;
    }

    // === Convoys ===

    pub fn list_convoys(&self, filter: &ConvoyFilter) -> Vec<Convoy> {
        self.store.list(filter)
    }

    pub fn get_convoy(&self, id: &str) -> RoutingResult<Convoy> {
        self.store.get(id)
    }

    pub fn create_convoy(&self, spec: ConvoySpec) -> RoutingResult<Convoy> {
        let convoy = self.store.create(spec)?;
        self.publish(ConvoyEvent::ConvoyCreated {
            convoy: convoy.clone(),
        });
        self.recompute();
        Ok(convoy)
    }

    pub fn update_status(&self, id: &str, status: ConvoyStatus) -> RoutingResult<Convoy> {
        let convoy = self.store.update_status(id, status)?;
        self.publish(ConvoyEvent::StatusUpdate {
            convoy_id: convoy.id.clone(),
            status,
            timestamp: convoy.last_updated,
        });
        self.recompute();
        Ok(convoy)
    }

    pub fn checkpoint_log(&self, convoy_id: &str) -> RoutingResult<Vec<CheckpointLogEntry>> {
        self.store.checkpoint_log(convoy_id)
    }

    /// Attach scheduled checkpoints to a convoy's current route.
    pub fn attach_checkpoints(
        &self,
        convoy_id: &str,
        checkpoints: Vec<Checkpoint>,
    ) -> RoutingResult<Convoy> {
        let convoy = self.store.get(convoy_id)?;
        let mut route = convoy.assigned_route.ok_or_else(|| {
            RoutingError::InvalidSpec(format!("convoy {convoy_id} has no route"))
        })?;
        route.checkpoints = checkpoints;
        self.store.assign_route(convoy_id, route)
    }

    // === Optimizer ===

    /// Plan a route and, when `commit` is set, assign it.
    ///
    /// Network changes racing the search are retried once.
    pub fn optimize_route(
        &self,
        convoy_id: &str,
        destination_override: Option<GeoPoint>,
        commit: bool,
    ) -> RoutingResult<OptimizedRoute> {
        retry_once(convoy_id, || {
            self.plan_and_commit(convoy_id, destination_override.clone(), commit)
        })
    }

    fn plan_and_commit(
        &self,
        convoy_id: &str,
        destination_override: Option<GeoPoint>,
        commit: bool,
    ) -> RoutingResult<OptimizedRoute> {
        let fleet = self.store.snapshot();
        let overridden = destination_override.is_some();
        let planned = RouteOptimizer::new(&self.network, self.rules()).optimize(
            convoy_id,
            destination_override,
            &fleet,
        )?;

        let now = Utc::now();
        self.publish(ConvoyEvent::OptimizerResult {
            convoy_id: convoy_id.to_string(),
            route_id: planned.route.id.clone(),
            risk_score: planned.route.risk_score,
            eta_hours: planned.route.eta_hours,
            notes: planned.notes.clone(),
            timestamp: now,
        });
        if !commit {
            return Ok(planned);
        }

        let committed = self.commit_planned(convoy_id, &planned, overridden)?;

        self.publish(ConvoyEvent::Reroute {
            convoy_id: convoy_id.to_string(),
            route: committed.assigned_route.clone().unwrap_or_else(|| planned.route.clone()),
            notes: planned.notes.clone(),
            timestamp: now,
        });
        if planned.route.risk_score > self.rules().conflict_risk_alert {
            self.publish(ConvoyEvent::RiskAlert {
                convoy_id: convoy_id.to_string(),
                risk_score: planned.route.risk_score,
                message: format!(
                    "Route {} risk {:.1} exceeds {:.0}",
                    planned.route.id,
                    planned.route.risk_score,
                    self.rules().conflict_risk_alert
                ),
            });
        }
        self.recompute();
        Ok(planned)
    }

    /// Assign a planned route unless a segment on it changed after planning.
    fn commit_planned(
        &self,
        convoy_id: &str,
        planned: &OptimizedRoute,
        overridden: bool,
    ) -> RoutingResult<Convoy> {
        let network = &self.network;
        let destination = overridden.then(|| planned.destination.clone());
        self.store
            .commit(convoy_id, destination, planned.route.clone(), |route| {
                let stale = network.stale_segments(route);
                if stale.is_empty() {
                    Ok(())
                } else {
                    Err(RoutingError::StaleNetworkState { segment_ids: stale })
                }
            })
            .map_err(|err| match err {
                RoutingError::NotFound { kind: "convoy", id } => RoutingError::ConvoyNotFound(id),
                other => other,
            })
    }

    // === Field events and checkpoints ===

    /// Record a field event and apply its road effect.
    pub fn submit_event(&self, request: EventRequest) -> RoutingResult<OperationEvent> {
        if let Some(convoy_id) = request.convoy_id.as_deref() {
            if !self.store.contains(convoy_id) {
                return Err(RoutingError::not_found("convoy", convoy_id));
            }
        }
        let seq = self.event_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let event = request.into_event(Utc::now(), seq);

        let mut affected: Vec<String> = event.convoy_id.iter().cloned().collect();
        if let Some(segment_id) = event.payload.affected_segment_id.as_deref() {
            let updated = self
                .network
                .apply_event(event.event_type, event.payload.severity, segment_id)?;
            if let Some(segment) = updated {
                let stale = self.announce_segment(segment);
                for id in stale {
                    if !affected.contains(&id) {
                        affected.push(id);
                    }
                }
            }
        }

        tracing::info!(
            event_id = %event.id,
            event_type = ?event.event_type,
            severity = ?event.payload.severity,
            "Operation event recorded"
        );
        self.publish(ConvoyEvent::EventTriggered {
            event: event.clone(),
            affected_convoys: affected,
            timestamp: event.triggered_at,
        });
        Ok(event)
    }

    /// Mark a checkpoint cleared. Repeats acknowledge without side effects.
    pub fn clear_checkpoint(
        &self,
        convoy_id: &str,
        checkpoint_id: &str,
        location: GeoPoint,
    ) -> RoutingResult<CheckpointClear> {
        let now = Utc::now();
        let cleared = self
            .store
            .clear_checkpoint(convoy_id, checkpoint_id, location.clone(), now)?;
        if cleared.newly_cleared {
            self.publish(ConvoyEvent::CheckpointCleared {
                convoy_id: convoy_id.to_string(),
                checkpoint_id: checkpoint_id.to_string(),
                location,
                timestamp: now,
            });
        }
        Ok(cleared)
    }

    // === Segments ===

    pub fn segments(&self) -> Vec<RoadSegment> {
        self.network.segments()
    }

    pub fn segment(&self, id: &str) -> RoutingResult<RoadSegment> {
        self.network.get_segment(id)
    }

    pub fn neighbors(&self, id: &str) -> RoutingResult<Vec<String>> {
        self.network.neighbors(id)
    }

    pub fn update_segment(
        &self,
        id: &str,
        status: SegmentStatus,
        risk_level: f64,
    ) -> RoutingResult<RoadSegment> {
        let segment = self.network.update_segment_status(id, status, risk_level)?;
        self.announce_segment(segment.clone());
        Ok(segment)
    }

    /// Publish a segment change and recompute. Returns convoys whose route
    /// is now stale.
    fn announce_segment(&self, segment: RoadSegment) -> Vec<String> {
        let stale_convoys: Vec<String> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|convoy| {
                convoy.assigned_route.as_ref().is_some_and(|route| {
                    route.contains_segment(&segment.id) && self.network.is_route_stale(route)
                })
            })
            .map(|convoy| convoy.id)
            .collect();
        if !stale_convoys.is_empty() {
            tracing::warn!(
                segment_id = %segment.id,
                convoys = ?stale_convoys,
                "Assigned routes invalidated by segment change"
            );
        }
        self.publish(ConvoyEvent::SegmentUpdated {
            segment,
            stale_convoys: stale_convoys.clone(),
        });
        self.recompute();
        stale_convoys
    }

    // === Conflicts and merges ===

    /// Recompute conflicts and merge advice from a fresh snapshot.
    pub fn recompute(&self) {
        let generation = self.write_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let fleet = self.store.snapshot();
        let records = self.detector.detect(&fleet, &self.network);
        let merges = self.advisor.suggest_merges(&fleet);

        let mut snapshot = self
            .conflicts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if generation <= snapshot.generation {
            tracing::debug!(generation, "Discarding superseded recompute");
            return;
        }
        snapshot.generation = generation;
        snapshot.records = records;
        self.store.apply_merge_suggestions(&merges);
        drop(snapshot);
        self.conflicts_changed.notify_one();
    }

    /// Current conflicts with acknowledgement flags applied.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        let snapshot = self
            .conflicts
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        snapshot
            .records
            .iter()
            .cloned()
            .map(|mut record| {
                record.acknowledged = self.acknowledged.contains_key(&record.id);
                record
            })
            .collect()
    }

    pub fn acknowledge(&self, conflict_id: &str) -> RoutingResult<ConflictRecord> {
        let mut record = self
            .conflicts()
            .into_iter()
            .find(|record| record.id == conflict_id)
            .ok_or_else(|| RoutingError::not_found("conflict", conflict_id))?;
        self.acknowledged
            .entry(conflict_id.to_string())
            .or_insert_with(Utc::now);
        record.acknowledged = true;
        tracing::info!(conflict_id, "Conflict acknowledged");
        Ok(record)
    }

    /// Current merge suggestions keyed by convoy id, ordered by id.
    pub fn merges(&self) -> Vec<(String, MergeSuggestion)> {
        self.store
            .snapshot()
            .into_iter()
            .filter_map(|convoy| convoy.merge_suggestion.map(|s| (convoy.id, s)))
            .collect()
    }
}

/// Run `attempt`, repeating it once when it fails with a retryable error.
fn retry_once<T>(
    convoy_id: &str,
    mut attempt: impl FnMut() -> RoutingResult<T>,
) -> RoutingResult<T> {
    match attempt() {
        Err(err) if err.is_retryable() => {
            tracing::warn!(convoy_id, "Stale network state, replanning: {}", err);
            attempt()
        }
        result => result,
    }
}
