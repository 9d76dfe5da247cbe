//! HTTP surface
//!
//! - [`webhook`]: provider callbacks plus health and status probes
//! - [`admin`]: campaign, settings and script management

pub mod admin;
pub mod webhook;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::CampaignEngine;
use crate::error::CampaignError;

/// Shared handler state
pub type ApiState = Arc<CampaignEngine>;

/// Build the full HTTP router
pub fn create_router(engine: ApiState) -> Router {
    Router::new()
        .merge(webhook::routes())
        .merge(admin::routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(engine)
}

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": "error",
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<CampaignError> for ApiError {
    fn from(err: CampaignError) -> Self {
        let status = match &err {
            CampaignError::InvalidInput(_)
            | CampaignError::InvalidSettings(_)
            | CampaignError::NoScriptAvailable(_)
            | CampaignError::Config(_) => StatusCode::BAD_REQUEST,
            CampaignError::NotFound(_) => StatusCode::NOT_FOUND,
            CampaignError::CampaignAlreadyRunning(_) | CampaignError::NothingToRecall(_) => {
                StatusCode::CONFLICT
            }
            CampaignError::Database(_)
            | CampaignError::Provider(_)
            | CampaignError::Routing(_)
            | CampaignError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
