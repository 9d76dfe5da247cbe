//! Campaign management endpoints
//!
//! These mirror what the chat front end needs: seed contacts, start, recall,
//! cancel, inspect, and manage per-user settings and scripts.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiResult, ApiState};
use crate::service::CampaignStatus;
use crate::types::{Contact, NewContact, Script, Settings, SettingsUpdate};

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/campaigns/:campaign_id", get(campaign_status))
        .route("/campaigns/:campaign_id/start", post(start_campaign))
        .route("/campaigns/:campaign_id/recall", post(recall_campaign))
        .route("/campaigns/:campaign_id/cancel", post(cancel_campaign))
        .route(
            "/campaigns/:campaign_id/contacts",
            get(list_contacts).post(seed_contacts),
        )
        .route("/users/:user_id/settings", get(get_settings).put(put_settings))
        .route("/users/:user_id/scripts", get(list_scripts).post(save_script))
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub user_id: i64,
    /// Block until every contact has a placement outcome
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Deserialize)]
pub struct SeedRequest {
    pub contacts: Vec<NewContact>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptRequest {
    pub name: String,
    #[serde(default)]
    pub opening_audio: Option<String>,
    #[serde(default)]
    pub after_digit_audio: Option<String>,
}

async fn run_campaign(engine: ApiState, campaign_id: String, request: RunRequest, recall: bool) -> ApiResult<(StatusCode, Json<Value>)> {
    let service = engine.service();
    if request.wait {
        let result = if recall {
            service.recall_campaign(request.user_id, &campaign_id).await?
        } else {
            service.start_campaign(request.user_id, &campaign_id).await?
        };
        return Ok((StatusCode::OK, Json(json!({ "status": "finished", "result": result }))));
    }

    service.spawn_campaign(request.user_id, &campaign_id, recall).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "started", "campaign_id": campaign_id })),
    ))
}

async fn start_campaign(
    State(engine): State<ApiState>,
    Path(campaign_id): Path<String>,
    Json(request): Json<RunRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    run_campaign(engine, campaign_id, request, false).await
}

async fn recall_campaign(
    State(engine): State<ApiState>,
    Path(campaign_id): Path<String>,
    Json(request): Json<RunRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    run_campaign(engine, campaign_id, request, true).await
}

async fn cancel_campaign(
    State(engine): State<ApiState>,
    Path(campaign_id): Path<String>,
) -> ApiResult<Json<Value>> {
    engine.service().cancel_campaign(&campaign_id)?;
    Ok(Json(json!({ "status": "cancelling", "campaign_id": campaign_id })))
}

async fn campaign_status(
    State(engine): State<ApiState>,
    Path(campaign_id): Path<String>,
) -> Json<CampaignStatus> {
    Json(engine.service().status(&campaign_id))
}

async fn list_contacts(
    State(engine): State<ApiState>,
    Path(campaign_id): Path<String>,
) -> ApiResult<Json<Vec<Contact>>> {
    Ok(Json(engine.service().contacts(&campaign_id).await?))
}

async fn seed_contacts(
    State(engine): State<ApiState>,
    Path(campaign_id): Path<String>,
    Json(request): Json<SeedRequest>,
) -> ApiResult<(StatusCode, Json<Vec<Contact>>)> {
    let seeded = engine
        .service()
        .seed_contacts(&campaign_id, &request.contacts)
        .await?;
    Ok((StatusCode::CREATED, Json(seeded)))
}

async fn get_settings(
    State(engine): State<ApiState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Settings>> {
    Ok(Json(engine.service().settings(user_id).await?))
}

async fn put_settings(
    State(engine): State<ApiState>,
    Path(user_id): Path<i64>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<Json<Settings>> {
    Ok(Json(engine.service().save_settings(user_id, &update).await?))
}

async fn list_scripts(
    State(engine): State<ApiState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Vec<Script>>> {
    Ok(Json(engine.service().scripts(user_id).await?))
}

async fn save_script(
    State(engine): State<ApiState>,
    Path(user_id): Path<i64>,
    Json(request): Json<ScriptRequest>,
) -> ApiResult<(StatusCode, Json<Script>)> {
    let script = engine
        .service()
        .save_script(
            user_id,
            &request.name,
            request.opening_audio.as_deref(),
            request.after_digit_audio.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(script)))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{engine, send};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_settings_defaults_and_partial_update() {
        let (engine, _) = engine().await;
        let (status, value) = send(&engine, "GET", "/users/9/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["concurrency_limit"], 5);
        assert_eq!(value["rate_limit"], 1.0);

        let (status, value) = send(
            &engine,
            "PUT",
            "/users/9/settings",
            Some(json!({"concurrency_limit": 3, "caller_id": "+15551234567"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["concurrency_limit"], 3);
        assert_eq!(value["rate_limit"], 1.0);

        let (status, _) = send(
            &engine,
            "PUT",
            "/users/9/settings",
            Some(json!({"rate_limit": 50.0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_seed_start_and_inspect() {
        let (engine, provider) = engine().await;
        let (status, _) = send(
            &engine,
            "POST",
            "/users/1/scripts",
            Some(json!({"name": "promo", "opening_audio": "audio/open.wav"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        send(&engine, "PUT", "/users/1/settings", Some(json!({"rate_limit": 10.0}))).await;

        let (status, value) = send(
            &engine,
            "POST",
            "/campaigns/spring/contacts",
            Some(json!({"contacts": [
                {"name": "Ann", "phone_number": "+15550000001"},
                {"name": "Bob", "email": "bob@example.com", "phone_number": "+15550000002"}
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(value.as_array().unwrap().len(), 2);

        let (status, value) = send(
            &engine,
            "POST",
            "/campaigns/spring/start",
            Some(json!({"user_id": 1, "wait": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["result"]["started"], 2);
        assert_eq!(provider.placed_count(), 2);

        let (_, value) = send(&engine, "GET", "/campaigns/spring/contacts", None).await;
        assert!(value
            .as_array()
            .unwrap()
            .iter()
            .all(|c| c["status"] == "calling"));

        let (_, value) = send(&engine, "GET", "/campaigns/spring", None).await;
        assert_eq!(value["running"], false);
        assert_eq!(value["last_result"]["total"], 2);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (engine, _) = engine().await;
        send(
            &engine,
            "POST",
            "/campaigns/empty/contacts",
            Some(json!({"contacts": [{"name": "Ann", "phone_number": "+15550000001"}]})),
        )
        .await;

        let (status, value) = send(
            &engine,
            "POST",
            "/campaigns/empty/start",
            Some(json!({"user_id": 4, "wait": true})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["status"], "error");

        let (status, _) = send(&engine, "POST", "/campaigns/empty/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        send(&engine, "POST", "/users/4/scripts", Some(json!({"name": "s", "opening_audio": "a.wav"}))).await;
        let (status, _) = send(
            &engine,
            "POST",
            "/campaigns/empty/recall",
            Some(json!({"user_id": 4, "wait": true})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
