//! No-op telephony provider
//!
//! Accepts every placement (unless an outcome is scripted for the number),
//! hands out `sim_xxxxxxxx` references and optionally emits an answer and a
//! hangup for each call so a dry run walks contacts through the lifecycle.
//! Peak concurrency and placement times are recorded for dry-run reports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{EventSink, PlaceCallRequest, PlacedCall, ProviderKind, TelephonyProvider};
use crate::error::{CampaignError, Result};
use crate::events::CallEvent;
use crate::types::{CallOutcome, CallReference, PlacementOutcome};

/// Simulated provider
pub struct SimulatedProvider {
    events: Option<EventSink>,
    scripted: DashMap<String, PlacementOutcome>,
    placement_delay: Option<Duration>,
    auto_hangup: Option<Duration>,
    placed: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    placement_times: Mutex<Vec<Instant>>,
    played: Mutex<Vec<(CallReference, String)>>,
    hung_up: Mutex<Vec<CallReference>>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self {
            events: None,
            scripted: DashMap::new(),
            placement_delay: None,
            auto_hangup: None,
            placed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            placement_times: Mutex::new(Vec::new()),
            played: Mutex::new(Vec::new()),
            hung_up: Mutex::new(Vec::new()),
        }
    }

    pub fn with_event_sink(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Emit `Answered` `delay` after each started call, then a plain hangup
    /// after the same delay again
    pub fn with_auto_hangup(mut self, delay: Duration) -> Self {
        self.auto_hangup = Some(delay);
        self
    }

    /// Simulated network round trip for each placement
    pub fn with_placement_delay(mut self, delay: Duration) -> Self {
        self.placement_delay = Some(delay);
        self
    }

    /// Force the outcome for one destination number
    pub fn script_outcome(&self, phone_number: impl Into<String>, outcome: PlacementOutcome) {
        self.scripted.insert(phone_number.into(), outcome);
    }

    /// Number of placement attempts seen
    pub fn placed_count(&self) -> usize {
        self.placed.load(Ordering::SeqCst)
    }

    /// Highest number of `place_call` invocations observed at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// When each placement attempt started, in arrival order
    pub fn placement_times(&self) -> Vec<Instant> {
        self.placement_times.lock().clone()
    }

    pub fn played(&self) -> Vec<(CallReference, String)> {
        self.played.lock().clone()
    }

    pub fn hung_up(&self) -> Vec<CallReference> {
        self.hung_up.lock().clone()
    }

    /// Publish an event as if the network had produced it
    pub async fn emit(&self, event: CallEvent) -> Result<()> {
        match &self.events {
            Some(sink) => sink
                .send(event)
                .await
                .map_err(|_| CampaignError::provider("event channel closed")),
            None => Err(CampaignError::provider("simulated provider has no event sink")),
        }
    }

    fn next_reference() -> CallReference {
        let id = Uuid::new_v4().simple().to_string();
        CallReference::new(format!("sim_{}", &id[..8]))
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelephonyProvider for SimulatedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Simulated
    }

    async fn place_call(&self, request: &PlaceCallRequest) -> Result<PlacedCall> {
        self.placement_times.lock().push(Instant::now());
        self.placed.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if let Some(delay) = self.placement_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let outcome = self
            .scripted
            .get(&request.phone_number)
            .map(|entry| *entry.value())
            .unwrap_or(PlacementOutcome::Started);

        if outcome != PlacementOutcome::Started {
            debug!(
                "Simulated rejection for {} (contact {}): {:?}",
                request.phone_number, request.contact_id, outcome
            );
            return Ok(PlacedCall::rejected(outcome, "scripted outcome"));
        }

        let call_reference = Self::next_reference();
        info!(
            "Simulated call to {} for contact {} as {}",
            request.phone_number, request.contact_id, call_reference
        );

        if let (Some(delay), Some(sink)) = (self.auto_hangup, self.events.clone()) {
            let reference = call_reference.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let answered = CallEvent::Answered {
                    call_reference: reference.clone(),
                };
                if sink.send(answered).await.is_err() {
                    return;
                }
                tokio::time::sleep(delay).await;
                let ended = CallEvent::CallEnded {
                    call_reference: reference,
                    outcome: CallOutcome::Completed,
                    digit_pressed: None,
                };
                if sink.send(ended).await.is_err() {
                    warn!("Event channel closed before simulated hangup was delivered");
                }
            });
        }

        Ok(PlacedCall::started(call_reference))
    }

    async fn play_audio(&self, call_reference: &CallReference, asset_path: &str) -> Result<()> {
        debug!("Simulated playback of {} on {}", asset_path, call_reference);
        self.played.lock().push((call_reference.clone(), asset_path.to_string()));
        Ok(())
    }

    async fn hangup(&self, call_reference: &CallReference) -> Result<()> {
        debug!("Simulated hangup of {}", call_reference);
        self.hung_up.lock().push(call_reference.clone());
        Ok(())
    }
}
