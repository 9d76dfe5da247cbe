//! # Campaign service
//!
//! The operations a front end drives: seed a campaign, start it, recall the
//! contacts that did not respond, cancel a running campaign. Settings and the
//! script are resolved per user at start; only one run per campaign may be
//! active at a time.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info};

use crate::database::DatabaseManager;
use crate::dispatcher::CampaignDispatcher;
use crate::error::{CampaignError, Result};
use crate::recall::RecallSelector;
use crate::registry::{RunGuard, RunRegistry};
use crate::store::ContactStore;
use crate::types::{CampaignResult, Contact, NewContact, Script, Settings, SettingsUpdate};

/// Campaign-level operations over the engine
#[derive(Clone)]
pub struct CampaignService {
    db: Arc<DatabaseManager>,
    dispatcher: CampaignDispatcher,
    recall: RecallSelector,
    runs: RunRegistry,
    results: Arc<DashMap<String, CampaignResult>>,
}

/// Running state and latest result of a campaign
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CampaignStatus {
    pub campaign_id: String,
    pub running: bool,
    pub last_result: Option<CampaignResult>,
}

impl CampaignService {
    pub fn new(
        db: Arc<DatabaseManager>,
        dispatcher: CampaignDispatcher,
        recall: RecallSelector,
        runs: RunRegistry,
    ) -> Self {
        Self {
            db,
            dispatcher,
            recall,
            runs,
            results: Arc::new(DashMap::new()),
        }
    }

    pub fn database(&self) -> &Arc<DatabaseManager> {
        &self.db
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    /// Dispatch every pending contact of a campaign and wait for the result
    pub async fn start_campaign(&self, user_id: i64, campaign_id: &str) -> Result<CampaignResult> {
        let guard = self.runs.begin(campaign_id)?;
        let (settings, script) = self.prepare(user_id).await?;
        self.run(guard, settings, script).await
    }

    /// Restage non-responders, then dispatch them
    pub async fn recall_campaign(&self, user_id: i64, campaign_id: &str) -> Result<CampaignResult> {
        let guard = self.runs.begin(campaign_id)?;
        let (settings, script) = self.prepare(user_id).await?;
        self.restage(campaign_id).await?;
        self.run(guard, settings, script).await
    }

    /// Start (or recall) in the background
    ///
    /// Validation, the running check and the recall reset happen before this
    /// returns; the result is available from [`CampaignService::status`] once
    /// the run completes.
    pub async fn spawn_campaign(&self, user_id: i64, campaign_id: &str, recall: bool) -> Result<()> {
        let guard = self.runs.begin(campaign_id)?;
        let (settings, script) = self.prepare(user_id).await?;
        if recall {
            self.restage(campaign_id).await?;
        }

        let service = self.clone();
        tokio::spawn(async move {
            let campaign_id = guard.campaign_id().to_string();
            if let Err(e) = service.run(guard, settings, script).await {
                error!("Campaign {} run failed: {}", campaign_id, e);
            }
        });
        Ok(())
    }

    /// Stop admitting contacts for a running campaign
    pub fn cancel_campaign(&self, campaign_id: &str) -> Result<()> {
        if self.runs.cancel(campaign_id) {
            Ok(())
        } else {
            Err(CampaignError::not_found(format!("campaign {} is not running", campaign_id)))
        }
    }

    pub fn status(&self, campaign_id: &str) -> CampaignStatus {
        CampaignStatus {
            campaign_id: campaign_id.to_string(),
            running: self.runs.is_running(campaign_id),
            last_result: self.results.get(campaign_id).map(|r| r.value().clone()),
        }
    }

    pub async fn seed_contacts(&self, campaign_id: &str, contacts: &[NewContact]) -> Result<Vec<Contact>> {
        if campaign_id.trim().is_empty() {
            return Err(CampaignError::invalid_input("campaign id cannot be empty"));
        }
        self.db.seed_contacts(campaign_id, contacts).await
    }

    pub async fn contacts(&self, campaign_id: &str) -> Result<Vec<Contact>> {
        self.db.list_contacts(campaign_id).await
    }

    pub async fn settings(&self, user_id: i64) -> Result<Settings> {
        self.db.get_settings(user_id).await
    }

    pub async fn save_settings(&self, user_id: i64, update: &SettingsUpdate) -> Result<Settings> {
        if let Some(script_id) = update.active_script_id {
            if self.db.get_script(user_id, script_id).await?.is_none() {
                return Err(CampaignError::not_found(format!(
                    "script {} does not belong to user {}",
                    script_id, user_id
                )));
            }
        }
        self.db.save_settings(user_id, update).await
    }

    pub async fn save_script(
        &self,
        user_id: i64,
        name: &str,
        opening_audio: Option<&str>,
        after_digit_audio: Option<&str>,
    ) -> Result<Script> {
        self.db
            .save_script(user_id, name, opening_audio, after_digit_audio)
            .await
    }

    pub async fn scripts(&self, user_id: i64) -> Result<Vec<Script>> {
        self.db.list_scripts(user_id).await
    }

    async fn prepare(&self, user_id: i64) -> Result<(Settings, Script)> {
        let settings = self.db.get_settings(user_id).await?;
        settings.validate()?;
        let script = self.db.resolve_script(user_id, settings.active_script_id).await?;
        if !script.has_audio() {
            return Err(CampaignError::no_script(format!(
                "script '{}' has no audio assets",
                script.name
            )));
        }
        Ok((settings, script))
    }

    async fn restage(&self, campaign_id: &str) -> Result<()> {
        let recalled = self.recall.recall(campaign_id).await?;
        if recalled.is_empty() {
            return Err(CampaignError::NothingToRecall(campaign_id.to_string()));
        }
        Ok(())
    }

    async fn run(&self, guard: RunGuard, settings: Settings, script: Script) -> Result<CampaignResult> {
        let campaign_id = guard.campaign_id().to_string();
        let contacts = self.db.pending_contacts(&campaign_id).await?;
        info!(
            "Starting campaign {} with script '{}' ({} pending contacts)",
            campaign_id,
            script.name,
            contacts.len()
        );

        let result = self
            .dispatcher
            .dispatch_with_cancel(
                &campaign_id,
                contacts,
                &script,
                settings.caller_id.as_deref(),
                &settings,
                guard.token(),
            )
            .await?;

        self.results.insert(campaign_id, result.clone());
        Ok(result)
    }
}
