//! API routes for the convoy server.

pub mod conflicts;
pub mod error;
pub mod events;
pub mod optimizer;
pub mod request_id;
mod routes;
pub mod segments;
pub mod ws;

use crate::state::AppState;
use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use error::{ApiError, ApiErrorResponse, ApiResult};

pub fn routes() -> Router<Arc<AppState>> {
    routes::create_router()
}

/// Full application with state and middleware applied.
pub fn app(state: Arc<AppState>) -> Router {
    routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id::ensure_request_id))
        .layer(CorsLayer::permissive())
}
