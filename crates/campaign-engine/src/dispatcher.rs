//! # Campaign dispatcher
//!
//! Places one call per pending contact under two limits:
//!
//! - at most `concurrency_limit` placements in flight (a [`Semaphore`])
//! - admissions at least `1 / rate_limit` seconds apart ([`PacingGate`])
//!
//! Contacts are admitted in input order. Each admitted contact becomes a task
//! in a [`JoinSet`]; the dispatcher returns once every task has recorded its
//! placement outcome. It does not wait for calls to end.
//!
//! With [`SlotReleasePolicy::Terminal`] the permit of a started call is parked
//! in [`CallSlots`] and only returned when the event router sees the call
//! finish (or the hold times out), so the number of calls in `calling` for a
//! run stays within the limit too.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DispatchConfig, SlotReleasePolicy};
use crate::error::{CampaignError, Result};
use crate::lifecycle::apply_placement;
use crate::pacing::PacingGate;
use crate::provider::{PlaceCallRequest, PlacedCall, TelephonyProvider};
use crate::registry::{ActiveCall, ActiveCalls, CallSlots};
use crate::router::EventRouter;
use crate::store::ContactStore;
use crate::types::{CampaignResult, Contact, ContactStatus, PlacementOutcome, Script, Settings};

/// Bounded, paced call placement
#[derive(Clone)]
pub struct CampaignDispatcher {
    store: Arc<dyn ContactStore>,
    provider: Arc<dyn TelephonyProvider>,
    active_calls: ActiveCalls,
    slots: CallSlots,
    router: EventRouter,
    slot_release: SlotReleasePolicy,
    slot_hold_timeout: Duration,
}

/// Per-run values every placement task needs
#[derive(Clone)]
struct RunContext {
    campaign_id: Arc<str>,
    script: Arc<Script>,
    caller_id: Option<String>,
}

impl CampaignDispatcher {
    pub fn new(
        store: Arc<dyn ContactStore>,
        provider: Arc<dyn TelephonyProvider>,
        active_calls: ActiveCalls,
        slots: CallSlots,
    ) -> Self {
        let defaults = DispatchConfig::default();
        let router = EventRouter::new(store.clone(), provider.clone(), active_calls.clone(), slots.clone());
        Self {
            store,
            provider,
            active_calls,
            slots,
            router,
            slot_release: defaults.slot_release,
            slot_hold_timeout: defaults.slot_hold_timeout(),
        }
    }

    pub fn with_slot_release(mut self, policy: SlotReleasePolicy, hold_timeout: Duration) -> Self {
        self.slot_release = policy;
        self.slot_hold_timeout = hold_timeout;
        self
    }

    pub fn slot_release(&self) -> SlotReleasePolicy {
        self.slot_release
    }

    /// Place calls for `contacts` and aggregate the placement outcomes
    pub async fn dispatch(
        &self,
        campaign_id: &str,
        contacts: Vec<Contact>,
        script: &Script,
        caller_id: Option<&str>,
        settings: &Settings,
    ) -> Result<CampaignResult> {
        self.dispatch_with_cancel(
            campaign_id,
            contacts,
            script,
            caller_id,
            settings,
            CancellationToken::new(),
        )
        .await
    }

    /// [`CampaignDispatcher::dispatch`] with cooperative cancellation
    ///
    /// Once `cancel` fires no further contact is admitted. Placements already
    /// admitted run to completion and are counted; the rest stay `pending`
    /// and are reported in [`CampaignResult::pending`].
    pub async fn dispatch_with_cancel(
        &self,
        campaign_id: &str,
        contacts: Vec<Contact>,
        script: &Script,
        caller_id: Option<&str>,
        settings: &Settings,
        cancel: CancellationToken,
    ) -> Result<CampaignResult> {
        if !script.has_audio() {
            return Err(CampaignError::no_script(format!(
                "script '{}' has no audio assets",
                script.name
            )));
        }
        settings.validate()?;

        let total = contacts.len();
        let mut result = CampaignResult::new(total);
        info!(
            "🚀 Dispatching campaign {}: {} contacts, concurrency {}, {} calls/s",
            campaign_id, total, settings.concurrency_limit, settings.rate_limit
        );

        let limit = usize::try_from(settings.concurrency_limit)
            .map_err(|_| CampaignError::invalid_settings("concurrency_limit out of range"))?;
        let semaphore = Arc::new(Semaphore::new(limit));
        let gate = PacingGate::new(settings.admission_interval()?);
        let run = RunContext {
            campaign_id: Arc::from(campaign_id),
            script: Arc::new(script.clone()),
            caller_id: caller_id.map(str::to_string),
        };

        let mut tasks = JoinSet::new();
        let mut admitted = 0usize;

        for contact in contacts {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => Some(permit),
            };
            let Some(permit) = permit else { break };
            let permit = permit.map_err(|_| CampaignError::internal("dispatch semaphore closed"))?;

            let admitted_at = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                at = gate.admit() => Some(at),
            };
            if admitted_at.is_none() {
                break;
            }

            admitted += 1;
            debug!("Admitted contact {} ({}/{})", contact.id, admitted, total);

            let dispatcher = self.clone();
            let run = run.clone();
            tasks.spawn(async move { dispatcher.place_contact(contact, run, permit).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => result.record(outcome),
                Err(e) => {
                    error!("Placement task for campaign {} aborted: {}", campaign_id, e);
                    result.record(PlacementOutcome::Failed);
                }
            }
        }

        result.pending = total - admitted;
        result.cancelled = admitted < total;

        if result.cancelled {
            info!(
                "Campaign {} cancelled: {} placed, {} left pending",
                campaign_id,
                result.placed(),
                result.pending
            );
        } else {
            info!(
                "✅ Campaign {} dispatched: {} started, {} failed, {} unverified, {} invalid, {} no funds",
                campaign_id,
                result.started,
                result.failed,
                result.unverified,
                result.invalid_numbers,
                result.no_funds
            );
        }
        Ok(result)
    }

    /// Place one call and persist its outcome
    async fn place_contact(
        &self,
        contact: Contact,
        run: RunContext,
        permit: OwnedSemaphorePermit,
    ) -> PlacementOutcome {
        let request = PlaceCallRequest {
            contact_id: contact.id,
            phone_number: contact.phone_number.clone(),
            caller_id: run.caller_id.clone(),
        };

        let placed = match self.provider.place_call(&request).await {
            Ok(placed) => placed,
            Err(e) => {
                warn!("Placing call for contact {} failed: {}", contact.id, e);
                PlacedCall::rejected(PlacementOutcome::Failed, e.to_string())
            }
        };

        let reference = match (placed.outcome, placed.call_reference) {
            (PlacementOutcome::Started, Some(reference)) => reference,
            (PlacementOutcome::Started, None) => {
                warn!("Provider started a call for contact {} without a reference", contact.id);
                self.persist_failure(&contact, ContactStatus::Failed).await;
                return PlacementOutcome::Failed;
            }
            (outcome, _) => {
                debug!(
                    "Contact {} placement {:?}: {}",
                    contact.id,
                    outcome,
                    placed.detail.as_deref().unwrap_or("")
                );
                match apply_placement(contact.status, outcome) {
                    Ok(status) => self.persist_failure(&contact, status).await,
                    Err(e) => warn!("Not recording {:?} for contact {}: {}", outcome, contact.id, e),
                }
                return outcome;
            }
        };

        // Registered before the store write; events that beat the commit are
        // parked on the entry and replayed below
        self.active_calls.register(
            reference.clone(),
            ActiveCall {
                contact_id: contact.id,
                campaign_id: run.campaign_id.to_string(),
                script: run.script.clone(),
            },
        );
        if self.slot_release == SlotReleasePolicy::Terminal {
            self.slots.hold(reference.clone(), permit, self.slot_hold_timeout);
        } else {
            drop(permit);
        }

        match self.store.record_placement(&contact, &reference).await {
            Ok(()) => {
                for event in self.active_calls.mark_recorded(&reference) {
                    debug!("Replaying early {} event for {}", event.kind(), reference);
                    if let Err(e) = self.router.route(&event).await {
                        warn!("Dropping early {} event for {}: {}", event.kind(), reference, e);
                    }
                }
                PlacementOutcome::Started
            }
            Err(e) => {
                error!(
                    "Failed to record call {} for contact {}, hanging up: {}",
                    reference, contact.id, e
                );
                self.active_calls.remove(&reference);
                self.slots.release(&reference);
                if let Err(e) = self.provider.hangup(&reference).await {
                    warn!("Hangup of unrecorded call {} failed: {}", reference, e);
                }
                self.persist_failure(&contact, ContactStatus::Failed).await;
                PlacementOutcome::Failed
            }
        }
    }

    async fn persist_failure(&self, contact: &Contact, status: ContactStatus) {
        if let Err(e) = self.store.record_placement_failure(contact, status).await {
            error!(
                "Failed to record {} for contact {}: {}",
                status, contact.id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use crate::provider::{event_channel, SimulatedProvider};
    use crate::store::StatusUpdate;
    use crate::types::{CallLogEntry, CallReference, ContactId, NewContact};
    use async_trait::async_trait;
    use tokio::time::Instant;

    fn script() -> Script {
        Script {
            id: 1,
            user_id: 1,
            name: "promo".into(),
            opening_audio: Some("audio/opening.wav".into()),
            after_digit_audio: Some("audio/thanks.wav".into()),
        }
    }

    fn settings(concurrency_limit: u32, rate_limit: f64) -> Settings {
        Settings {
            concurrency_limit,
            rate_limit,
            ..Settings::default()
        }
    }

    async fn seed(db: &DatabaseManager, count: usize) -> Vec<Contact> {
        let contacts: Vec<NewContact> = (0..count)
            .map(|i| NewContact {
                name: format!("Contact {}", i),
                email: None,
                phone_number: format!("+1555000{:04}", i),
            })
            .collect();
        db.seed_contacts("camp", &contacts).await.unwrap()
    }

    fn dispatcher(db: Arc<DatabaseManager>, provider: Arc<SimulatedProvider>) -> CampaignDispatcher {
        CampaignDispatcher::new(db, provider, ActiveCalls::new(), CallSlots::new())
    }

    #[tokio::test]
    async fn test_all_contacts_started() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let provider = Arc::new(SimulatedProvider::new());
        let contacts = seed(&db, 10).await;

        let result = dispatcher(db.clone(), provider.clone())
            .dispatch("camp", contacts, &script(), None, &settings(3, 5.0))
            .await
            .unwrap();

        assert_eq!(result.total, 10);
        assert_eq!(result.started, 10);
        assert_eq!(result.placed(), result.total);
        assert!(!result.cancelled);
        assert!(provider.peak_concurrency() <= 3);

        let stored = db.list_contacts("camp").await.unwrap();
        assert!(stored.iter().all(|c| c.status == ContactStatus::Calling));
        assert!(stored.iter().all(|c| c.call_reference.is_some()));
    }

    #[tokio::test]
    async fn test_unverified_numbers_counted() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let provider = Arc::new(SimulatedProvider::new());
        let contacts = seed(&db, 5).await;
        provider.script_outcome(contacts[1].phone_number.clone(), PlacementOutcome::Unverified);
        provider.script_outcome(contacts[3].phone_number.clone(), PlacementOutcome::Unverified);

        let result = dispatcher(db.clone(), provider)
            .dispatch("camp", contacts.clone(), &script(), None, &settings(5, 10.0))
            .await
            .unwrap();

        assert_eq!(result.started, 3);
        assert_eq!(result.unverified, 2);
        assert_eq!(result.placed(), 5);

        let rejected = db.get_contact(contacts[1].id).await.unwrap().unwrap();
        assert_eq!(rejected.status, ContactStatus::Unverified);
        assert!(rejected.call_reference.is_none());
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let provider = Arc::new(SimulatedProvider::new().with_placement_delay(Duration::from_millis(40)));
        let contacts = seed(&db, 9).await;

        let result = dispatcher(db, provider.clone())
            .dispatch("camp", contacts, &script(), None, &settings(2, 10.0))
            .await
            .unwrap();

        assert_eq!(result.started, 9);
        assert!(provider.peak_concurrency() <= 2);
    }

    #[tokio::test]
    async fn test_admissions_respect_rate() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let provider = Arc::new(SimulatedProvider::new());
        let contacts = seed(&db, 6).await;
        let interval = Duration::from_millis(40);

        let start = Instant::now();
        dispatcher(db, provider.clone())
            .dispatch("camp", contacts, &script(), None, &settings(6, 25.0))
            .await
            .unwrap();

        let times = provider.placement_times();
        assert_eq!(times.len(), 6);
        for (i, at) in times.iter().enumerate() {
            assert!(*at - start >= interval * i as u32);
        }
    }

    #[tokio::test]
    async fn test_admission_follows_input_order() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let provider = Arc::new(SimulatedProvider::new());
        let mut contacts = seed(&db, 4).await;
        contacts.reverse();

        dispatcher(db.clone(), provider.clone())
            .dispatch("camp", contacts.clone(), &script(), None, &settings(1, 10.0))
            .await
            .unwrap();

        let logs = futures::future::join_all(contacts.iter().map(|c| db.call_logs(c.id))).await;
        let first_log_ids: Vec<i64> = logs.into_iter().map(|l| l.unwrap()[0].id).collect();
        let mut sorted = first_log_ids.clone();
        sorted.sort();
        assert_eq!(first_log_ids, sorted);
    }

    #[tokio::test]
    async fn test_script_without_audio_places_nothing() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let provider = Arc::new(SimulatedProvider::new());
        let contacts = seed(&db, 3).await;
        let silent = Script {
            opening_audio: None,
            after_digit_audio: Some(String::new()),
            ..script()
        };

        let err = dispatcher(db.clone(), provider.clone())
            .dispatch("camp", contacts, &silent, None, &settings(3, 5.0))
            .await
            .unwrap_err();

        assert!(matches!(err, CampaignError::NoScriptAvailable(_)));
        assert_eq!(provider.placed_count(), 0);
        assert_eq!(db.pending_contacts("camp").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_settings_place_nothing() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let provider = Arc::new(SimulatedProvider::new());
        let contacts = seed(&db, 2).await;

        let err = dispatcher(db, provider.clone())
            .dispatch("camp", contacts, &script(), None, &settings(0, 5.0))
            .await
            .unwrap_err();

        assert!(err.is_configuration());
        assert_eq!(provider.placed_count(), 0);
    }

    #[tokio::test]
    async fn test_unrepresentable_rate_places_nothing() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let provider = Arc::new(SimulatedProvider::new());
        let contacts = seed(&db, 2).await;

        let err = dispatcher(db.clone(), provider.clone())
            .dispatch("camp", contacts, &script(), None, &settings(2, 1e-20))
            .await
            .unwrap_err();

        assert!(matches!(err, CampaignError::InvalidSettings(_)));
        assert_eq!(provider.placed_count(), 0);
        assert_eq!(db.pending_contacts("camp").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_rest_pending() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let provider = Arc::new(SimulatedProvider::new());
        let contacts = seed(&db, 5).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let result = dispatcher(db.clone(), provider)
            .dispatch_with_cancel("camp", contacts, &script(), None, &settings(5, 5.0), cancel)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert!(result.started >= 1);
        assert!(result.pending >= 1);
        assert_eq!(result.placed() + result.pending, result.total);
        assert_eq!(db.pending_contacts("camp").await.unwrap().len(), result.pending);
    }

    #[tokio::test]
    async fn test_placement_release_lets_calling_exceed_limit() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let provider = Arc::new(SimulatedProvider::new());
        let contacts = seed(&db, 4).await;
        let slots = CallSlots::new();

        let dispatcher = CampaignDispatcher::new(db.clone(), provider, ActiveCalls::new(), slots.clone());
        assert_eq!(dispatcher.slot_release(), SlotReleasePolicy::Placement);

        let result = dispatcher
            .dispatch("camp", contacts, &script(), None, &settings(2, 50.0))
            .await
            .unwrap();

        assert_eq!(result.started, 4);
        assert_eq!(slots.held(), 0);
        let calling = db
            .list_contacts("camp")
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.status == ContactStatus::Calling)
            .count();
        assert_eq!(calling, 4);
    }

    #[tokio::test]
    async fn test_held_slots_bound_calling_contacts() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let provider = Arc::new(SimulatedProvider::new());
        let contacts = seed(&db, 4).await;
        let slots = CallSlots::new();

        let dispatcher = CampaignDispatcher::new(db.clone(), provider, ActiveCalls::new(), slots.clone())
            .with_slot_release(SlotReleasePolicy::Terminal, Duration::from_secs(60));

        let run = tokio::spawn(async move {
            dispatcher
                .dispatch("camp", contacts, &script(), None, &settings(2, 50.0))
                .await
        });

        // Two calls hold both slots; the run cannot finish until one is freed
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(slots.held(), 2);
        assert!(!run.is_finished());

        let calling = db.list_contacts("camp").await.unwrap();
        for contact in calling.iter().filter(|c| c.status == ContactStatus::Calling) {
            slots.release(contact.call_reference.as_ref().unwrap());
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        let calling = db.list_contacts("camp").await.unwrap();
        for contact in calling.iter().filter(|c| c.status == ContactStatus::Calling) {
            slots.release(contact.call_reference.as_ref().unwrap());
        }

        let result = run.await.unwrap().unwrap();
        assert_eq!(result.started, 4);
    }

    /// Store that can refuse one placement and delay every placement commit
    struct FlakyStore {
        inner: Arc<DatabaseManager>,
        refuse: Option<ContactId>,
        commit_delay: Duration,
    }

    #[async_trait]
    impl ContactStore for FlakyStore {
        async fn seed_contacts(&self, campaign_id: &str, contacts: &[NewContact]) -> Result<Vec<Contact>> {
            self.inner.seed_contacts(campaign_id, contacts).await
        }
        async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>> {
            self.inner.get_contact(id).await
        }
        async fn list_contacts(&self, campaign_id: &str) -> Result<Vec<Contact>> {
            self.inner.list_contacts(campaign_id).await
        }
        async fn pending_contacts(&self, campaign_id: &str) -> Result<Vec<Contact>> {
            self.inner.pending_contacts(campaign_id).await
        }
        async fn find_by_call_reference(&self, call_reference: &CallReference) -> Result<Option<Contact>> {
            self.inner.find_by_call_reference(call_reference).await
        }
        async fn record_placement(&self, contact: &Contact, call_reference: &CallReference) -> Result<()> {
            if Some(contact.id) == self.refuse {
                return Err(CampaignError::internal("disk full"));
            }
            tokio::time::sleep(self.commit_delay).await;
            self.inner.record_placement(contact, call_reference).await
        }
        async fn record_placement_failure(&self, contact: &Contact, status: ContactStatus) -> Result<()> {
            self.inner.record_placement_failure(contact, status).await
        }
        async fn apply_status_update(&self, update: &StatusUpdate) -> Result<bool> {
            self.inner.apply_status_update(update).await
        }
        async fn select_for_recall(&self, campaign_id: &str) -> Result<Vec<Contact>> {
            self.inner.select_for_recall(campaign_id).await
        }
        async fn reset_for_recall(&self, ids: &[ContactId]) -> Result<u64> {
            self.inner.reset_for_recall(ids).await
        }
        async fn call_logs(&self, contact_id: ContactId) -> Result<Vec<CallLogEntry>> {
            self.inner.call_logs(contact_id).await
        }
    }

    #[tokio::test]
    async fn test_unrecorded_call_is_hung_up_and_failed() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let provider = Arc::new(SimulatedProvider::new());
        let contacts = seed(&db, 3).await;
        let store = Arc::new(FlakyStore {
            inner: db.clone(),
            refuse: Some(contacts[1].id),
            commit_delay: Duration::ZERO,
        });
        let active_calls = ActiveCalls::new();

        let result = CampaignDispatcher::new(store, provider.clone(), active_calls.clone(), CallSlots::new())
            .dispatch("camp", contacts.clone(), &script(), None, &settings(3, 10.0))
            .await
            .unwrap();

        assert_eq!(result.started, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(provider.hung_up().len(), 1);
        assert_eq!(active_calls.len(), 2);

        let failed = db.get_contact(contacts[1].id).await.unwrap().unwrap();
        assert_eq!(failed.status, ContactStatus::Failed);
        assert!(failed.call_reference.is_none());
    }

    #[tokio::test]
    async fn test_events_before_commit_are_replayed() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let (sink, stream) = event_channel(16);
        let provider = Arc::new(
            SimulatedProvider::new()
                .with_event_sink(sink)
                .with_auto_hangup(Duration::from_millis(1)),
        );
        let contacts = seed(&db, 1).await;
        let store: Arc<dyn ContactStore> = Arc::new(FlakyStore {
            inner: db.clone(),
            refuse: None,
            commit_delay: Duration::from_millis(100),
        });
        let active_calls = ActiveCalls::new();
        let slots = CallSlots::new();

        let router = EventRouter::new(store.clone(), provider.clone(), active_calls.clone(), slots.clone());
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        tokio::spawn(async move { router.run(stream, loop_cancel).await });

        let result = CampaignDispatcher::new(store, provider.clone(), active_calls.clone(), slots)
            .dispatch("camp", contacts.clone(), &script(), None, &settings(1, 10.0))
            .await
            .unwrap();
        assert_eq!(result.started, 1);

        let mut contact = db.get_contact(contacts[0].id).await.unwrap().unwrap();
        for _ in 0..50 {
            if contact.status != ContactStatus::Calling {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            contact = db.get_contact(contacts[0].id).await.unwrap().unwrap();
        }

        assert_eq!(contact.status, ContactStatus::NoResponse);
        let reference = contact.call_reference.clone().unwrap();
        assert_eq!(provider.played(), vec![(reference, "audio/opening.wav".to_string())]);
        assert!(active_calls.is_empty());
        cancel.cancel();
    }
}
