//! Call events
//!
//! Provider callbacks and webhook deliveries are both turned into [`CallEvent`]
//! values and handed to the [`crate::router::EventRouter`]. Nothing downstream
//! knows which transport an event came from.

use serde::{Deserialize, Serialize};

use crate::error::{CampaignError, Result};
use crate::types::{parse_digit, CallOutcome, CallReference, ContactId};

/// Asynchronous event for a placed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// Remote party answered; the opening prompt should start
    Answered { call_reference: CallReference },

    /// DTMF digit captured
    DigitPressed {
        call_reference: CallReference,
        digit: char,
    },

    /// Call finished, optionally carrying a digit the provider already saw
    CallEnded {
        call_reference: CallReference,
        outcome: CallOutcome,
        digit_pressed: Option<char>,
    },
}

impl CallEvent {
    pub fn call_reference(&self) -> &CallReference {
        match self {
            Self::Answered { call_reference }
            | Self::DigitPressed { call_reference, .. }
            | Self::CallEnded { call_reference, .. } => call_reference,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Answered { .. } => "answered",
            Self::DigitPressed { .. } => "digit_pressed",
            Self::CallEnded { .. } => "call_ended",
        }
    }
}

/// Webhook body as posted by the provider side
///
/// ```json
/// {"event": "call_ended", "contact_id": 7, "call_reference": "CA12",
///  "data": {"status": "busy", "digit_pressed": null}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    #[serde(default, alias = "call_id")]
    pub call_reference: Option<String>,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookData {
    #[serde(default)]
    pub digit: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub digit_pressed: Option<String>,
}

impl WebhookPayload {
    /// Convert into a routable event; malformed payloads are rejected
    pub fn into_event(self) -> Result<CallEvent> {
        let call_reference = self
            .call_reference
            .filter(|r| !r.trim().is_empty())
            .map(CallReference::new)
            .ok_or_else(|| CampaignError::invalid_input("webhook payload has no call_reference"))?;

        match self.event.as_str() {
            "digit_pressed" => {
                let raw = self
                    .data
                    .digit
                    .ok_or_else(|| CampaignError::invalid_input("digit_pressed event without digit"))?;
                Ok(CallEvent::DigitPressed {
                    call_reference,
                    digit: parse_digit(&raw)?,
                })
            }
            "call_ended" => {
                let digit_pressed = match self.data.digit_pressed.as_deref() {
                    Some(raw) if !raw.trim().is_empty() => Some(parse_digit(raw)?),
                    _ => None,
                };
                let outcome = match self.data.status.as_deref() {
                    Some(status) => status.parse::<CallOutcome>()?,
                    None => CallOutcome::Completed,
                };
                Ok(CallEvent::CallEnded {
                    call_reference,
                    outcome,
                    digit_pressed,
                })
            }
            "answered" => Ok(CallEvent::Answered { call_reference }),
            other => Err(CampaignError::invalid_input(format!("unknown webhook event '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_digit_payload() {
        let event = payload(serde_json::json!({
            "event": "digit_pressed",
            "contact_id": 4,
            "call_reference": "CA100",
            "data": {"digit": "3"}
        }))
        .into_event()
        .unwrap();

        assert_eq!(
            event,
            CallEvent::DigitPressed {
                call_reference: CallReference::new("CA100"),
                digit: '3'
            }
        );
    }

    #[test]
    fn test_call_ended_payload_accepts_call_id_alias() {
        let event = payload(serde_json::json!({
            "event": "call_ended",
            "contact_id": 4,
            "call_id": "CA101",
            "data": {"status": "no_response", "digit_pressed": null}
        }))
        .into_event()
        .unwrap();

        assert_eq!(
            event,
            CallEvent::CallEnded {
                call_reference: CallReference::new("CA101"),
                outcome: CallOutcome::NoResponse,
                digit_pressed: None,
            }
        );
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        let missing_ref = payload(serde_json::json!({"event": "call_ended", "data": {}}));
        assert!(missing_ref.into_event().is_err());

        let missing_digit = payload(serde_json::json!({
            "event": "digit_pressed", "call_reference": "CA1", "data": {}
        }));
        assert!(missing_digit.into_event().is_err());

        let unknown = payload(serde_json::json!({"event": "ringing", "call_reference": "CA1"}));
        assert!(unknown.into_event().is_err());
    }
}
