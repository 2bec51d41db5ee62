//! Error taxonomy shared by every core operation.

use thiserror::Error;

pub type RoutingResult<T> = Result<T, RoutingError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoutingError {
    /// Unknown convoy, segment or checkpoint id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("convoy not found: {0}")]
    ConvoyNotFound(String),

    #[error("unknown segment: {0}")]
    UnknownSegment(String),

    /// Malformed creation payload.
    #[error("invalid convoy spec: {0}")]
    InvalidSpec(String),

    #[error("invalid road network: {0}")]
    InvalidNetwork(String),

    #[error("no feasible route exists")]
    NoPathExists { notes: Vec<String> },

    /// Search ran out of its iteration or time budget.
    #[error("route search exhausted after {expansions} expansions")]
    SearchExhausted { expansions: usize, notes: Vec<String> },

    #[error("route {route_id} does not connect the endpoints of convoy {convoy_id}")]
    RouteMismatch { convoy_id: String, route_id: String },

    /// The network changed under a route that was being planned or committed.
    #[error("network state changed during planning (segments: {})", .segment_ids.join(", "))]
    StaleNetworkState { segment_ids: Vec<String> },
}

impl RoutingError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Explanatory notes attached to search failures.
    pub fn notes(&self) -> &[String] {
        match self {
            Self::NoPathExists { notes } | Self::SearchExhausted { notes, .. } => notes,
            _ => &[],
        }
    }

    /// Callers may retry once on stale network state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleNetworkState { .. })
    }
}
