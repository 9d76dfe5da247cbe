//! # Telephony provider interface
//!
//! The engine never speaks SIP itself. It places calls, plays prompts and hangs
//! up through a [`TelephonyProvider`], and receives call progress as
//! [`CallEvent`] values on a channel (or through the webhook, for providers
//! that call back over HTTP).
//!
//! Two implementations exist and one is picked by configuration at startup:
//!
//! - [`SimulatedProvider`]: places no real calls; used for dry runs and tests
//! - [`RestProvider`]: drives a hosted voice API over HTTPS

pub mod rest;
pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::ProviderConfig;
use crate::error::Result;
use crate::events::CallEvent;
use crate::types::{CallReference, ContactId, PlacementOutcome};

pub use rest::RestProvider;
pub use simulated::SimulatedProvider;

/// Which provider implementation to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Simulated,
    Rest,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Rest => "rest",
        }
    }
}

/// Sending half of the provider event channel
pub type EventSink = mpsc::Sender<CallEvent>;

/// Receiving half of the provider event channel
pub type EventStream = mpsc::Receiver<CallEvent>;

/// Create the channel providers publish call events on
pub fn event_channel(capacity: usize) -> (EventSink, EventStream) {
    mpsc::channel(capacity)
}

/// One call placement request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceCallRequest {
    pub contact_id: ContactId,
    pub phone_number: String,
    pub caller_id: Option<String>,
}

/// Immediate answer to a placement request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedCall {
    /// Present when the provider accepted the call
    pub call_reference: Option<CallReference>,
    pub outcome: PlacementOutcome,
    /// Provider message for rejected placements
    pub detail: Option<String>,
}

impl PlacedCall {
    pub fn started(call_reference: CallReference) -> Self {
        Self {
            call_reference: Some(call_reference),
            outcome: PlacementOutcome::Started,
            detail: None,
        }
    }

    pub fn rejected(outcome: PlacementOutcome, detail: impl Into<String>) -> Self {
        Self {
            call_reference: None,
            outcome,
            detail: Some(detail.into()),
        }
    }
}

/// Telephony capability consumed by the engine
///
/// `place_call` returns `Err` only for transport faults (the dispatcher counts
/// those as `failed`); a provider that answered with a rejection returns
/// `Ok` with the classified outcome.
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Whether the provider can currently place calls
    fn is_ready(&self) -> bool {
        true
    }

    async fn place_call(&self, request: &PlaceCallRequest) -> Result<PlacedCall>;

    async fn play_audio(&self, call_reference: &CallReference, asset_path: &str) -> Result<()>;

    async fn hangup(&self, call_reference: &CallReference) -> Result<()>;
}

/// Build the provider named by configuration
pub fn build_provider(config: &ProviderConfig, events: EventSink) -> Result<Arc<dyn TelephonyProvider>> {
    match config.kind {
        ProviderKind::Simulated => {
            let mut provider = SimulatedProvider::new().with_event_sink(events);
            if let Some(ms) = config.simulated_hangup_after_ms {
                provider = provider.with_auto_hangup(std::time::Duration::from_millis(ms));
            }
            Ok(Arc::new(provider))
        }
        ProviderKind::Rest => Ok(Arc::new(RestProvider::from_config(config)?)),
    }
}
