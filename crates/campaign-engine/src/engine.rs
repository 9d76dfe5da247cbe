//! Engine assembly
//!
//! [`CampaignEngine`] wires one store, one provider and the shared registries
//! into a dispatcher, an event router and the campaign service. Everything
//! that holds state across requests hangs off this struct.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CampaignEngineConfig;
use crate::database::DatabaseManager;
use crate::dispatcher::CampaignDispatcher;
use crate::error::Result;
use crate::provider::{build_provider, event_channel, EventStream, TelephonyProvider};
use crate::recall::RecallSelector;
use crate::registry::{ActiveCalls, CallSlots, RunRegistry};
use crate::router::EventRouter;
use crate::service::CampaignService;

/// The assembled campaign engine
pub struct CampaignEngine {
    config: CampaignEngineConfig,
    db: Arc<DatabaseManager>,
    provider: Arc<dyn TelephonyProvider>,
    active_calls: ActiveCalls,
    router: EventRouter,
    service: CampaignService,
    /// Provider event stream, taken once by the router loop
    events: Mutex<Option<EventStream>>,
}

impl CampaignEngine {
    /// Build the engine described by configuration
    pub async fn new(config: CampaignEngineConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let db = DatabaseManager::from_config(&config.database)
            .await?
            .with_default_settings(config.dispatch.default_settings.clone());

        let mut provider_config = config.provider.clone();
        if provider_config.status_callback_url.is_none() {
            provider_config.status_callback_url = config.general.webhook_url();
        }
        let (sink, stream) = event_channel(config.general.event_channel_capacity);
        let provider = build_provider(&provider_config, sink)?;

        info!(
            "Campaign engine using the {} provider",
            provider.kind().as_str()
        );
        Ok(Self::with_components(config, Arc::new(db), provider, Some(stream)))
    }

    /// Assemble from pre-built parts
    pub fn with_components(
        config: CampaignEngineConfig,
        db: Arc<DatabaseManager>,
        provider: Arc<dyn TelephonyProvider>,
        events: Option<EventStream>,
    ) -> Arc<Self> {
        let active_calls = ActiveCalls::new();
        let slots = CallSlots::new();

        let dispatcher = CampaignDispatcher::new(
            db.clone(),
            provider.clone(),
            active_calls.clone(),
            slots.clone(),
        )
        .with_slot_release(config.dispatch.slot_release, config.dispatch.slot_hold_timeout());
        let router = EventRouter::new(db.clone(), provider.clone(), active_calls.clone(), slots);
        let service = CampaignService::new(
            db.clone(),
            dispatcher,
            RecallSelector::new(db.clone()),
            RunRegistry::new(),
        );

        Arc::new(Self {
            config,
            db,
            provider,
            active_calls,
            router,
            service,
            events: Mutex::new(events),
        })
    }

    pub fn config(&self) -> &CampaignEngineConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<DatabaseManager> {
        &self.db
    }

    pub fn provider(&self) -> &Arc<dyn TelephonyProvider> {
        &self.provider
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn service(&self) -> &CampaignService {
        &self.service
    }

    pub fn active_calls(&self) -> &ActiveCalls {
        &self.active_calls
    }

    /// Spawn the router loop over the provider event stream
    ///
    /// Returns `None` when the stream was already taken or the engine was
    /// built without one.
    pub fn start_event_loop(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let Some(stream) = self.events.lock().take() else {
            warn!("Provider event stream unavailable, router loop not started");
            return None;
        };
        let router = self.router.clone();
        Some(tokio::spawn(async move { router.run(stream, cancel).await }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CallEvent;
    use crate::types::{CallReference, ContactStatus, NewContact};
    use std::time::Duration;

    fn in_memory_config() -> CampaignEngineConfig {
        let mut config = CampaignEngineConfig::default();
        config.database.database_path = String::new();
        config.provider.simulated_hangup_after_ms = Some(50);
        config.dispatch.default_settings.rate_limit = 10.0;
        config
    }

    #[tokio::test]
    async fn test_event_loop_starts_once() {
        let engine = CampaignEngine::new(in_memory_config()).await.unwrap();
        let cancel = CancellationToken::new();
        let handle = engine.start_event_loop(cancel.clone()).unwrap();
        assert!(engine.start_event_loop(cancel.clone()).is_none());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_simulated_dry_run_reaches_terminal_states() {
        let engine = CampaignEngine::new(in_memory_config()).await.unwrap();
        let cancel = CancellationToken::new();
        let handle = engine.start_event_loop(cancel.clone()).unwrap();

        let service = engine.service();
        service.save_script(1, "dry", Some("hello.wav"), None).await.unwrap();
        service
            .seed_contacts(
                "dry-run",
                &[
                    NewContact { name: "A".into(), email: None, phone_number: "+15550000001".into() },
                    NewContact { name: "B".into(), email: None, phone_number: "+15550000002".into() },
                ],
            )
            .await
            .unwrap();

        let result = service.start_campaign(1, "dry-run").await.unwrap();
        assert_eq!(result.started, 2);

        // answer after 50ms, hangup 50ms later
        tokio::time::sleep(Duration::from_millis(400)).await;
        let contacts = service.contacts("dry-run").await.unwrap();
        assert!(contacts.iter().all(|c| c.status == ContactStatus::NoResponse));
        assert!(engine.active_calls().is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_router_reachable_without_stream() {
        let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());
        let provider: Arc<dyn TelephonyProvider> = Arc::new(crate::provider::SimulatedProvider::new());
        let engine = CampaignEngine::with_components(CampaignEngineConfig::default(), db, provider, None);

        assert!(engine.start_event_loop(CancellationToken::new()).is_none());
        let outcome = engine
            .router()
            .route(&CallEvent::Answered { call_reference: CallReference::new("x") })
            .await
            .unwrap();
        assert_eq!(outcome, crate::router::RouteOutcome::Unresolved);
    }
}
