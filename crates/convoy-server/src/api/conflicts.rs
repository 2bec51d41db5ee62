//! Conflict and merge advisory endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use convoy_core::{ConflictRecord, ConflictSeverity, MergeSuggestion};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictQuery {
    /// Only conflicts involving this convoy
    pub convoy_id: Option<String>,
    /// Hide acknowledged conflicts
    #[serde(default)]
    pub unacknowledged: bool,
    pub min_severity: Option<ConflictSeverity>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeView {
    pub convoy_id: String,
    #[serde(flatten)]
    pub suggestion: MergeSuggestion,
}

pub async fn list_conflicts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConflictQuery>,
) -> Json<Vec<ConflictRecord>> {
    let conflicts = state
        .conflicts()
        .into_iter()
        .filter(|record| {
            query
                .convoy_id
                .as_deref()
                .map_or(true, |id| record.involves(id))
        })
        .filter(|record| !(query.unacknowledged && record.acknowledged))
        .filter(|record| query.min_severity.map_or(true, |min| record.severity >= min))
        .collect();
    Json(conflicts)
}

pub async fn acknowledge_conflict(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ConflictRecord>> {
    Ok(Json(state.acknowledge(&id)?))
}

pub async fn list_merges(State(state): State<Arc<AppState>>) -> Json<Vec<MergeView>> {
    Json(
        state
            .merges()
            .into_iter()
            .map(|(convoy_id, suggestion)| MergeView {
                convoy_id,
                suggestion,
            })
            .collect(),
    )
}
