//! # Event router
//!
//! Resolves each [`CallEvent`] to its contact by call reference, runs it
//! through the state machine, persists the result and drives the follow-up
//! work on the call (prompts, hangup, slot release).
//!
//! Delivery is at-least-once from both the provider channel and the webhook,
//! so routing is idempotent: a replayed event resolves to
//! [`RouteOutcome::Ignored`] and writes nothing.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CampaignError, Result};
use crate::events::CallEvent;
use crate::lifecycle::{apply_event, ContactState, IgnoreReason, SideEffect, Transition};
use crate::provider::{EventStream, TelephonyProvider};
use crate::registry::{ActiveCalls, CallPhase, CallSlots};
use crate::store::{ContactStore, StatusUpdate};
use crate::types::{CallReference, ContactStatus, Script};

/// Attempts at a compare-and-set before giving up on an event
const MAX_APPLY_ATTEMPTS: usize = 3;

/// What routing one event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Contact moved to this status
    Applied(ContactStatus),
    /// Side effects ran, status unchanged
    EffectsOnly,
    /// Event dropped as stale or duplicate
    Ignored(IgnoreReason),
    /// Placement not yet recorded; the dispatcher replays the event
    Deferred,
    /// No contact carries the call reference
    Unresolved,
}

/// Applies call events to contacts
#[derive(Clone)]
pub struct EventRouter {
    store: Arc<dyn ContactStore>,
    provider: Arc<dyn TelephonyProvider>,
    active_calls: ActiveCalls,
    slots: CallSlots,
}

impl EventRouter {
    pub fn new(
        store: Arc<dyn ContactStore>,
        provider: Arc<dyn TelephonyProvider>,
        active_calls: ActiveCalls,
        slots: CallSlots,
    ) -> Self {
        Self {
            store,
            provider,
            active_calls,
            slots,
        }
    }

    /// Route one event
    ///
    /// Errors are store failures or a compare-and-set that kept losing; the
    /// contact is unchanged in both cases.
    pub async fn route(&self, event: &CallEvent) -> Result<RouteOutcome> {
        let reference = event.call_reference();

        for attempt in 1..=MAX_APPLY_ATTEMPTS {
            let Some(contact) = self.store.find_by_call_reference(reference).await? else {
                match self.active_calls.park_until_recorded(reference, event) {
                    CallPhase::Parked => return Ok(RouteOutcome::Deferred),
                    CallPhase::Recorded => continue,
                    CallPhase::Unknown => {
                        warn!("No contact for call {}, dropping {} event", reference, event.kind());
                        return Ok(RouteOutcome::Unresolved);
                    }
                }
            };

            let current = ContactState::new(contact.status, contact.digit_pressed);
            match apply_event(current, event) {
                Transition::Ignore(reason) => {
                    match reason {
                        IgnoreReason::NotPlaced => warn!(
                            "Stale {} event for contact {} in state {}",
                            event.kind(),
                            contact.id,
                            contact.status
                        ),
                        _ => debug!(
                            "Ignoring {} event for contact {} ({:?})",
                            event.kind(),
                            contact.id,
                            reason
                        ),
                    }
                    return Ok(RouteOutcome::Ignored(reason));
                }
                Transition::Effects(effects) => {
                    self.run_effects(reference, &effects).await;
                    return Ok(RouteOutcome::EffectsOnly);
                }
                Transition::Advance { to, effects } => {
                    let update = StatusUpdate {
                        contact_id: contact.id,
                        campaign_id: contact.campaign_id.clone(),
                        call_reference: Some(reference.clone()),
                        expected: contact.status,
                        status: to.status,
                        digit_pressed: to.digit_pressed,
                        duration: None,
                    };

                    if self.store.apply_status_update(&update).await? {
                        info!(
                            "Contact {} {} -> {} on {}",
                            contact.id,
                            contact.status,
                            to.status,
                            event.kind()
                        );
                        self.run_effects(reference, &effects).await;
                        if to.status.is_terminal() {
                            self.active_calls.remove(reference);
                        }
                        return Ok(RouteOutcome::Applied(to.status));
                    }

                    debug!(
                        "Contact {} changed under {} event (attempt {}), re-reading",
                        contact.id,
                        event.kind(),
                        attempt
                    );
                }
            }
        }

        Err(CampaignError::routing(format!(
            "{} event for {} kept losing to concurrent updates",
            event.kind(),
            reference
        )))
    }

    /// Consume the provider event channel until it closes or `cancel` fires
    pub async fn run(&self, mut events: EventStream, cancel: CancellationToken) {
        info!("Event router started");
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };

            if let Err(e) = self.route(&event).await {
                warn!("Dropping {} event for {}: {}", event.kind(), event.call_reference(), e);
            }
        }
        info!("Event router stopped");
    }

    async fn run_effects(&self, reference: &CallReference, effects: &[SideEffect]) {
        for effect in effects {
            let outcome = match effect {
                SideEffect::PlayOpeningAudio => self.play(reference, |s| s.opening_audio.clone()).await,
                SideEffect::PlayAfterDigitAudio => self.play(reference, |s| s.after_digit_audio.clone()).await,
                SideEffect::Hangup => self.provider.hangup(reference).await,
                SideEffect::ReleaseSlot => {
                    self.slots.release(reference);
                    Ok(())
                }
            };
            if let Err(e) = outcome {
                warn!("{:?} on {} failed: {}", effect, reference, e);
            }
        }
    }

    async fn play<F>(&self, reference: &CallReference, asset: F) -> Result<()>
    where
        F: Fn(&Script) -> Option<String>,
    {
        let Some(call) = self.active_calls.get(reference) else {
            debug!("No script known for {}, skipping playback", reference);
            return Ok(());
        };
        match asset(&call.script).filter(|path| !path.is_empty()) {
            Some(path) => self.provider.play_audio(reference, &path).await,
            None => Ok(()),
        }
    }
}
