//! Road segment endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use convoy_core::{RoadSegment, SegmentStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentStatusRequest {
    pub status: SegmentStatus,
    /// Keeps the current risk level when omitted
    pub risk_level: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NeighborsResponse {
    pub segment_id: String,
    pub neighbors: Vec<String>,
}

pub async fn list_segments(State(state): State<Arc<AppState>>) -> Json<Vec<RoadSegment>> {
    Json(state.segments())
}

pub async fn get_segment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RoadSegment>> {
    Ok(Json(state.segment(&id)?))
}

pub async fn get_neighbors(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<NeighborsResponse>> {
    let neighbors = state.neighbors(&id)?;
    Ok(Json(NeighborsResponse {
        segment_id: id,
        neighbors,
    }))
}

pub async fn update_segment_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<SegmentStatusRequest>, JsonRejection>,
) -> ApiResult<Json<RoadSegment>> {
    let Json(request) = payload?;
    let risk_level = match request.risk_level {
        Some(risk) => risk,
        None => state.segment(&id)?.risk_level,
    };
    Ok(Json(state.update_segment(&id, request.status, risk_level)?))
}
