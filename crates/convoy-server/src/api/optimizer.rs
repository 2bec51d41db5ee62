//! Route optimization endpoint.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use convoy_core::{GeoPoint, Route};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

fn default_commit() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRequest {
    pub convoy_id: String,
    #[serde(default)]
    pub destination_override: Option<GeoPoint>,
    /// Assign the planned route to the convoy
    #[serde(default = "default_commit")]
    pub commit: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResponse {
    pub route: Route,
    pub notes: Vec<String>,
    pub committed: bool,
    pub nodes_visited: usize,
}

pub async fn optimize_route(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<OptimizeRequest>, JsonRejection>,
) -> ApiResult<Json<OptimizeResponse>> {
    let Json(request) = payload?;
    // Path search is CPU-bound; keep it off the async workers.
    let worker = Arc::clone(&state);
    let convoy_id = request.convoy_id.clone();
    let planned = tokio::task::spawn_blocking(move || {
        worker.optimize_route(&convoy_id, request.destination_override, request.commit)
    })
    .await
    .map_err(|err| ApiError::Internal(format!("optimizer task failed: {err}")))??;

    tracing::info!(
        convoy_id = %request.convoy_id,
        route_id = %planned.route.id,
        risk_score = planned.route.risk_score,
        eta_hours = planned.route.eta_hours,
        "Optimizer request served"
    );
    Ok(Json(OptimizeResponse {
        route: planned.route,
        notes: planned.notes,
        committed: request.commit,
        nodes_visited: planned.nodes_visited,
    }))
}
