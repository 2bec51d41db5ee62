//! Field event and checkpoint submission endpoints.
//!
//! Both acknowledge synchronously so upstream retries are safe.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use convoy_core::{EventRequest, GeoPoint, OperationEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRequest {
    pub convoy_id: String,
    pub checkpoint_id: String,
    pub location: GeoPoint,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointAck {
    pub ok: bool,
    pub checkpoint_id: String,
}

pub async fn submit_event(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EventRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<OperationEvent>)> {
    let Json(request) = payload?;
    let event = state.submit_event(request)?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn clear_checkpoint(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CheckpointRequest>, JsonRejection>,
) -> ApiResult<Json<CheckpointAck>> {
    let Json(request) = payload?;
    state.clear_checkpoint(&request.convoy_id, &request.checkpoint_id, request.location)?;
    Ok(Json(CheckpointAck {
        ok: true,
        checkpoint_id: request.checkpoint_id,
    }))
}
