//! Routing core for military convoy operations: road network model,
//! convoy state, conflict detection, route optimization and merge advice.

pub mod conflict;
pub mod error;
pub mod events;
pub mod merge;
pub mod models;
pub mod network;
pub mod optimizer;
pub mod rules;
pub mod spatial;
pub mod store;

pub use conflict::{segment_windows, ConflictDetector, Occupancy, SegmentWindow};
pub use error::{RoutingError, RoutingResult};
pub use events::{
    ConvoyEvent, EventPayload, EventRequest, EventSeverity, EventSink, EventType, OperationEvent,
};
pub use merge::MergeAdvisor;
pub use models::{
    Checkpoint, CheckpointLogEntry, CheckpointStatus, ConflictRecord, ConflictSeverity, Convoy,
    ConvoyFilter, ConvoySpec, ConvoyStatus, Difficulty, GeoPoint, LngLat, MergeSuggestion,
    Priority, RoadSegment, Route, SegmentStatus, Terrain,
};
pub use network::RoadNetwork;
pub use optimizer::{route_risk_score, route_segment_ids, OptimizedRoute, RouteOptimizer};
pub use rules::RoutingRules;
pub use spatial::haversine_km;
pub use store::{CheckpointClear, ConvoyStore};
