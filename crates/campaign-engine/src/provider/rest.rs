//! Hosted voice API provider
//!
//! Calls are created with `POST {base_url}/calls`; prompts and hangups are
//! issued against `{base_url}/calls/{reference}`. Call progress comes back
//! through the webhook, so this provider never writes to the event channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{PlaceCallRequest, PlacedCall, ProviderKind, TelephonyProvider};
use crate::config::ProviderConfig;
use crate::error::{CampaignError, Result};
use crate::types::{CallReference, PlacementOutcome};

/// Provider error codes for destinations that are not valid numbers
const INVALID_NUMBER_CODES: &[i64] = &[13224, 21211, 21214, 21217, 21401, 21407];

/// Provider error codes for destinations not verified on a trial account
const UNVERIFIED_CODES: &[i64] = &[21219, 21608];

/// Provider error codes for an exhausted account balance
const NO_FUNDS_CODES: &[i64] = &[20003, 21606];

/// REST telephony provider
pub struct RestProvider {
    client: Client,
    base_url: String,
    account_id: String,
    auth_token: String,
    status_callback: Option<String>,
    default_caller_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedCall {
    #[serde(alias = "sid", alias = "call_id")]
    call_reference: String,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderFault {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

impl RestProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| CampaignError::config("provider.base_url is required for the rest provider"))?;
        let account_id = config
            .account_id
            .clone()
            .ok_or_else(|| CampaignError::config("provider.account_id is required for the rest provider"))?;
        let auth_token = config
            .auth_token
            .clone()
            .ok_or_else(|| CampaignError::config("provider.auth_token is required for the rest provider"))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CampaignError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_id,
            auth_token,
            status_callback: config.status_callback_url.clone(),
            default_caller_id: config.default_caller_id.clone(),
        })
    }

    async fn post_call_action(&self, call_reference: &CallReference, action: &str, body: serde_json::Value) -> Result<()> {
        let url = format!("{}/calls/{}/{}", self.base_url, call_reference, action);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_id, Some(&self.auth_token))
            .json(&body)
            .send()
            .await
            .map_err(|e| CampaignError::provider(format!("{} request failed: {}", action, e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CampaignError::provider(format!(
                "{} on {} rejected with HTTP {}",
                action,
                call_reference,
                response.status()
            )))
        }
    }
}

/// Classify a rejected placement from the provider's error code and message
pub fn classify_rejection(status: StatusCode, code: Option<i64>, message: &str) -> PlacementOutcome {
    if let Some(code) = code {
        if INVALID_NUMBER_CODES.contains(&code) {
            return PlacementOutcome::InvalidNumber;
        }
        if UNVERIFIED_CODES.contains(&code) {
            return PlacementOutcome::Unverified;
        }
        if NO_FUNDS_CODES.contains(&code) {
            return PlacementOutcome::NoFunds;
        }
    }
    if status == StatusCode::PAYMENT_REQUIRED {
        return PlacementOutcome::NoFunds;
    }

    let message = message.to_ascii_lowercase();
    if message.contains("unverified") || message.contains("not verified") {
        PlacementOutcome::Unverified
    } else if message.contains("insufficient funds") || message.contains("balance") {
        PlacementOutcome::NoFunds
    } else if message.contains("invalid") && (message.contains("number") || message.contains("'to'")) {
        PlacementOutcome::InvalidNumber
    } else {
        PlacementOutcome::Failed
    }
}

#[async_trait]
impl TelephonyProvider for RestProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Rest
    }

    async fn place_call(&self, request: &PlaceCallRequest) -> Result<PlacedCall> {
        let from = request
            .caller_id
            .clone()
            .or_else(|| self.default_caller_id.clone());
        let body = json!({
            "to": request.phone_number,
            "from": from,
            "status_callback": self.status_callback,
        });

        debug!("Placing call to {} for contact {}", request.phone_number, request.contact_id);
        let response = self
            .client
            .post(format!("{}/calls", self.base_url))
            .basic_auth(&self.account_id, Some(&self.auth_token))
            .json(&body)
            .send()
            .await
            .map_err(|e| CampaignError::provider(format!("place_call request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let created: CreatedCall = response
                .json()
                .await
                .map_err(|e| CampaignError::provider(format!("unreadable place_call response: {}", e)))?;
            info!(
                "Provider accepted call to {} for contact {} as {}",
                request.phone_number, request.contact_id, created.call_reference
            );
            return Ok(PlacedCall::started(CallReference::new(created.call_reference)));
        }

        let fault: ProviderFault = response.json().await.unwrap_or_default();
        let message = fault.message.unwrap_or_else(|| status.to_string());
        let outcome = classify_rejection(status, fault.code, &message);
        warn!(
            "Provider rejected call to {} for contact {} ({:?}): {}",
            request.phone_number, request.contact_id, outcome, message
        );
        Ok(PlacedCall::rejected(outcome, message))
    }

    async fn play_audio(&self, call_reference: &CallReference, asset_path: &str) -> Result<()> {
        self.post_call_action(call_reference, "play", json!({ "url": asset_path }))
            .await
    }

    async fn hangup(&self, call_reference: &CallReference) -> Result<()> {
        self.post_call_action(call_reference, "hangup", json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_code() {
        assert_eq!(
            classify_rejection(StatusCode::BAD_REQUEST, Some(21211), "x"),
            PlacementOutcome::InvalidNumber
        );
        assert_eq!(
            classify_rejection(StatusCode::BAD_REQUEST, Some(21608), "x"),
            PlacementOutcome::Unverified
        );
        assert_eq!(
            classify_rejection(StatusCode::BAD_REQUEST, Some(20003), "x"),
            PlacementOutcome::NoFunds
        );
    }

    #[test]
    fn test_classify_by_message() {
        assert_eq!(
            classify_rejection(
                StatusCode::BAD_REQUEST,
                None,
                "The number +15550000 is unverified. Trial accounts may only call verified numbers."
            ),
            PlacementOutcome::Unverified
        );
        assert_eq!(
            classify_rejection(StatusCode::BAD_REQUEST, None, "Invalid 'To' Phone Number"),
            PlacementOutcome::InvalidNumber
        );
        assert_eq!(
            classify_rejection(StatusCode::BAD_REQUEST, None, "Insufficient funds on account"),
            PlacementOutcome::NoFunds
        );
        assert_eq!(
            classify_rejection(StatusCode::PAYMENT_REQUIRED, None, ""),
            PlacementOutcome::NoFunds
        );
        assert_eq!(
            classify_rejection(StatusCode::SERVICE_UNAVAILABLE, None, "upstream down"),
            PlacementOutcome::Failed
        );
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = ProviderConfig {
            kind: ProviderKind::Rest,
            base_url: Some("https://voice.example.com/v1".into()),
            ..ProviderConfig::default()
        };
        assert!(RestProvider::from_config(&config).is_err());

        let config = ProviderConfig {
            account_id: Some("AC1".into()),
            auth_token: Some("secret".into()),
            ..config
        };
        let provider = RestProvider::from_config(&config).unwrap();
        assert_eq!(provider.base_url, "https://voice.example.com/v1");
        assert_eq!(provider.kind(), ProviderKind::Rest);
    }
}
