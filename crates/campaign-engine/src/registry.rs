//! In-memory registries shared between the dispatcher, the event router and
//! the campaign service
//!
//! - [`ActiveCalls`]: placed calls, the script driving them and early events
//! - [`CallSlots`]: dispatch permits held until a call reaches a terminal state
//! - [`RunRegistry`]: cancellation handles of running campaigns
//!
//! All three are created by the owner of the engine and passed in explicitly.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CampaignError, Result};
use crate::events::CallEvent;
use crate::types::{CallReference, ContactId, Script};

/// A call placed by a dispatch run
#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub contact_id: ContactId,
    pub campaign_id: String,
    pub script: Arc<Script>,
}

/// Events held for a call whose placement is not yet in the store
const MAX_PARKED_EVENTS: usize = 16;

/// Where a registered call stands relative to its placement record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// Reference not registered by this process
    Unknown,
    /// Placement not yet recorded; the event was held for replay
    Parked,
    /// Placement already recorded
    Recorded,
}

#[derive(Debug)]
struct TrackedCall {
    call: ActiveCall,
    recorded: bool,
    parked: Vec<CallEvent>,
}

/// Calls placed by this process, keyed by provider reference
///
/// Provider events can beat the placement record into the store. Until the
/// dispatcher calls [`ActiveCalls::mark_recorded`], such events are parked on
/// the call and handed back for replay.
#[derive(Debug, Clone, Default)]
pub struct ActiveCalls {
    calls: Arc<DashMap<CallReference, TrackedCall>>,
}

impl ActiveCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, call_reference: CallReference, call: ActiveCall) {
        self.calls.insert(
            call_reference,
            TrackedCall {
                call,
                recorded: false,
                parked: Vec::new(),
            },
        );
    }

    pub fn get(&self, call_reference: &CallReference) -> Option<ActiveCall> {
        self.calls.get(call_reference).map(|entry| entry.call.clone())
    }

    pub fn remove(&self, call_reference: &CallReference) -> Option<ActiveCall> {
        self.calls.remove(call_reference).map(|(_, tracked)| tracked.call)
    }

    /// Hold `event` if the call's placement has not been recorded yet
    pub fn park_until_recorded(&self, call_reference: &CallReference, event: &CallEvent) -> CallPhase {
        let Some(mut tracked) = self.calls.get_mut(call_reference) else {
            return CallPhase::Unknown;
        };
        if tracked.recorded {
            return CallPhase::Recorded;
        }
        if tracked.parked.len() >= MAX_PARKED_EVENTS {
            warn!(
                "Too many early events for {}, dropping {} event",
                call_reference,
                event.kind()
            );
        } else {
            debug!("Parking {} event for {} until placement is recorded", event.kind(), call_reference);
            tracked.parked.push(event.clone());
        }
        CallPhase::Parked
    }

    /// Mark the placement as recorded and take the events parked meanwhile
    pub fn mark_recorded(&self, call_reference: &CallReference) -> Vec<CallEvent> {
        match self.calls.get_mut(call_reference) {
            Some(mut tracked) => {
                tracked.recorded = true;
                std::mem::take(&mut tracked.parked)
            }
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Dispatch permits held past placement
#[derive(Debug, Clone, Default)]
pub struct CallSlots {
    held: Arc<DashMap<CallReference, OwnedSemaphorePermit>>,
}

impl CallSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `permit` until [`CallSlots::release`] is called for the reference
    /// or `timeout` elapses
    pub fn hold(&self, call_reference: CallReference, permit: OwnedSemaphorePermit, timeout: Duration) {
        self.held.insert(call_reference.clone(), permit);

        let held = self.held.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if held.remove(&call_reference).is_some() {
                warn!(
                    "Released dispatch slot for {} after {:?} without a terminal event",
                    call_reference, timeout
                );
            }
        });
    }

    /// Free the slot of a call; returns whether one was held
    pub fn release(&self, call_reference: &CallReference) -> bool {
        let released = self.held.remove(call_reference).is_some();
        if released {
            debug!("Released dispatch slot for {}", call_reference);
        }
        released
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }
}

/// Running campaigns and their cancellation tokens
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<DashMap<String, CancellationToken>>,
}

/// Registration of one run; dropping it removes the run from the registry
#[derive(Debug)]
pub struct RunGuard {
    runs: Arc<DashMap<String, CancellationToken>>,
    campaign_id: String,
    token: CancellationToken,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run; fails if the campaign is already running
    pub fn begin(&self, campaign_id: &str) -> Result<RunGuard> {
        match self.runs.entry(campaign_id.to_string()) {
            Entry::Occupied(_) => Err(CampaignError::CampaignAlreadyRunning(campaign_id.to_string())),
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                debug!("Registered run for campaign {}", campaign_id);
                Ok(RunGuard {
                    runs: self.runs.clone(),
                    campaign_id: campaign_id.to_string(),
                    token,
                })
            }
        }
    }

    /// Request cancellation of a running campaign; returns whether one was found
    pub fn cancel(&self, campaign_id: &str) -> bool {
        match self.runs.get(campaign_id) {
            Some(token) => {
                info!("Cancelling campaign {}", campaign_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, campaign_id: &str) -> bool {
        self.runs.contains_key(campaign_id)
    }

    pub fn running(&self) -> Vec<String> {
        self.runs.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl RunGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runs.remove(&self.campaign_id);
        debug!("Run for campaign {} finished", self.campaign_id);
    }
}
