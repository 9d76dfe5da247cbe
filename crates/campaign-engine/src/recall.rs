//! Recall selection
//!
//! A recall restages every contact whose call ended without a captured digit
//! so the next dispatch of the campaign dials it again.

use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::store::ContactStore;
use crate::types::{Contact, ContactId, ContactStatus};

/// Picks and restages contacts for another attempt
#[derive(Clone)]
pub struct RecallSelector {
    store: Arc<dyn ContactStore>,
}

impl RecallSelector {
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self { store }
    }

    /// Terminal contacts other than `completed` that never pressed a digit
    pub async fn select_for_recall(&self, campaign_id: &str) -> Result<Vec<Contact>> {
        let contacts = self.store.select_for_recall(campaign_id).await?;
        Ok(contacts
            .into_iter()
            .filter(|c| c.status.is_recallable() && c.digit_pressed.is_none())
            .collect())
    }

    /// Move contacts back to `pending`, clearing digit and call reference
    pub async fn reset_for_recall(&self, ids: &[ContactId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.reset_for_recall(ids).await
    }

    /// Select and reset in one step; returns the restaged contacts
    pub async fn recall(&self, campaign_id: &str) -> Result<Vec<Contact>> {
        let selected = self.select_for_recall(campaign_id).await?;
        let ids: Vec<ContactId> = selected.iter().map(|c| c.id).collect();
        self.reset_for_recall(&ids).await?;

        info!("Recalling {} contacts for campaign {}", selected.len(), campaign_id);
        Ok(selected
            .into_iter()
            .map(|mut contact| {
                contact.status = ContactStatus::Pending;
                contact.digit_pressed = None;
                contact.call_reference = None;
                contact
            })
            .collect())
    }
}
