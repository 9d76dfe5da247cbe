//! Provider webhook and health probes

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use super::{ApiError, ApiResult, ApiState};
use crate::events::WebhookPayload;

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/sip_webhook", post(sip_webhook))
        .route("/health", get(health))
        .route("/sip_status", get(sip_status))
}

/// Receive a call event from the provider
///
/// Routed, duplicate and unresolved events all answer 200 so the provider
/// stops retrying; only malformed payloads (400) and internal faults (500)
/// do not.
async fn sip_webhook(
    State(engine): State<ApiState>,
    payload: Result<Json<WebhookPayload>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(payload) = payload.map_err(|e| {
        warn!("Malformed webhook body: {}", e.body_text());
        ApiError::bad_request(e.body_text())
    })?;

    let event = payload.into_event().map_err(|e| {
        warn!("Rejected webhook payload: {}", e);
        ApiError::from(e)
    })?;

    match engine.router().route(&event).await {
        Ok(outcome) => {
            debug!("Webhook {} for {}: {:?}", event.kind(), event.call_reference(), outcome);
            Ok(Json(json!({ "status": "success" })))
        }
        Err(e) => {
            error!("Failed to route webhook {} for {}: {}", event.kind(), event.call_reference(), e);
            Err(ApiError::internal(e.to_string()))
        }
    }
}

async fn health(State(engine): State<ApiState>) -> Json<Value> {
    let database = engine.database().health_check().await;
    Json(json!({
        "status": if database { "healthy" } else { "degraded" },
        "database": database,
        "provider": engine.provider().kind().as_str(),
    }))
}

async fn sip_status(State(engine): State<ApiState>) -> Json<Value> {
    let provider = engine.provider();
    Json(json!({
        "provider": provider.kind().as_str(),
        "ready": provider.is_ready(),
        "active_calls": engine.active_calls().len(),
        "running_campaigns": engine.service().runs().running(),
    }))
}
