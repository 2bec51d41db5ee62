//! REST API routes.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use convoy_core::{CheckpointLogEntry, Convoy, ConvoyFilter, ConvoySpec, ConvoyStatus};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::api::{conflicts, events, optimizer, segments, ws};
use crate::state::AppState;

/// Create the API router.
pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/convoys", get(list_convoys).post(create_convoy))
        .route("/convoys/:id", get(get_convoy))
        .route("/convoys/:id/status", put(update_convoy_status))
        .route("/convoys/:id/checkpoints", get(list_checkpoint_log))
        .route("/optimizer/route", post(optimizer::optimize_route))
        .route("/events", post(events::submit_event))
        .route("/checkpoints", post(events::clear_checkpoint))
        .route("/conflicts", get(conflicts::list_conflicts))
        .route("/conflicts/:id/acknowledge", post(conflicts::acknowledge_conflict))
        .route("/merges", get(conflicts::list_merges))
        .route("/segments", get(segments::list_segments))
        .route("/segments/:id", get(segments::get_segment))
        .route("/segments/:id/neighbors", get(segments::get_neighbors))
        .route("/segments/:id/status", put(segments::update_segment_status))
        .route("/ws", get(ws::ws_handler))
}

// === Request types ===

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: ConvoyStatus,
}

// === Handlers ===

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "convoys": state.list_convoys(&ConvoyFilter::default()).len(),
        "segments": state.network().segment_count(),
        "networkGeneration": state.network().generation(),
    }))
}

async fn list_convoys(
    State(state): State<Arc<AppState>>,
    filter: Result<Query<ConvoyFilter>, QueryRejection>,
) -> ApiResult<Json<Vec<Convoy>>> {
    let Query(filter) = filter?;
    Ok(Json(state.list_convoys(&filter)))
}

async fn get_convoy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Convoy>> {
    Ok(Json(state.get_convoy(&id)?))
}

async fn create_convoy(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConvoySpec>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Convoy>)> {
    let Json(spec) = payload?;
    let convoy = state.create_convoy(spec)?;
    Ok((StatusCode::CREATED, Json(convoy)))
}

async fn update_convoy_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult<Json<Convoy>> {
    let Json(request) = payload?;
    Ok(Json(state.update_status(&id, request.status)?))
}

async fn list_checkpoint_log(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<CheckpointLogEntry>>> {
    Ok(Json(state.checkpoint_log(&id)?))
}
