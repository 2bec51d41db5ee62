//! API error types and HTTP response conversion.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use convoy_core::RoutingError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for programmatic handling
    pub code: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Routing(err) => match err {
                RoutingError::NotFound { .. }
                | RoutingError::ConvoyNotFound(_)
                | RoutingError::UnknownSegment(_) => StatusCode::NOT_FOUND,
                RoutingError::InvalidSpec(_) | RoutingError::RouteMismatch { .. } => {
                    StatusCode::BAD_REQUEST
                }
                RoutingError::NoPathExists { .. } | RoutingError::SearchExhausted { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                RoutingError::StaleNetworkState { .. } => StatusCode::CONFLICT,
                RoutingError::InvalidNetwork(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Routing(err) => match err {
                RoutingError::NotFound { .. } => "NOT_FOUND",
                RoutingError::ConvoyNotFound(_) => "CONVOY_NOT_FOUND",
                RoutingError::UnknownSegment(_) => "UNKNOWN_SEGMENT",
                RoutingError::InvalidSpec(_) => "INVALID_SPEC",
                RoutingError::InvalidNetwork(_) => "INVALID_NETWORK",
                RoutingError::NoPathExists { .. } => "NO_PATH",
                RoutingError::SearchExhausted { .. } => "SEARCH_EXHAUSTED",
                RoutingError::RouteMismatch { .. } => "ROUTE_MISMATCH",
                RoutingError::StaleNetworkState { .. } => "STALE_NETWORK_STATE",
            },
        }
    }

    pub fn to_response(&self) -> ApiErrorResponse {
        let status = self.status_code();
        let notes = match self {
            ApiError::Routing(err) => err.notes().to_vec(),
            ApiError::BadRequest(_) | ApiError::Internal(_) => Vec::new(),
        };
        ApiErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message: self.to_string(),
            code: self.code().to_string(),
            notes,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!(code = self.code(), "Request rejected: {}", self);
        }
        (status, Json(self.to_response())).into_response()
    }
}
