//! Contact and call log persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info, warn};

use super::DatabaseManager;
use crate::error::{CampaignError, Result};
use crate::store::{ContactStore, StatusUpdate};
use crate::types::{
    CallLogEntry, CallReference, Contact, ContactId, ContactStatus, NewCallLog, NewContact,
};

const CONTACT_COLUMNS: &str =
    "id, campaign_id, name, email, phone_number, status, digit_pressed, call_reference, created_at";

/// Contact row as stored
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct DbContact {
    pub id: i64,
    pub campaign_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone_number: String,
    pub status: String,
    pub digit_pressed: Option<String>,
    pub call_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbContact> for Contact {
    type Error = CampaignError;

    fn try_from(row: DbContact) -> Result<Self> {
        Ok(Contact {
            id: ContactId(row.id),
            campaign_id: row.campaign_id,
            name: row.name,
            email: row.email,
            phone_number: row.phone_number,
            status: row.status.parse()?,
            digit_pressed: row.digit_pressed.and_then(|d| d.chars().next()),
            call_reference: row.call_reference.map(CallReference),
            created_at: row.created_at,
        })
    }
}

/// Call log row as stored
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct DbCallLog {
    pub id: i64,
    pub contact_id: i64,
    pub campaign_id: String,
    pub call_reference: Option<String>,
    pub status: String,
    pub digit_pressed: Option<String>,
    pub duration: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<DbCallLog> for CallLogEntry {
    fn from(row: DbCallLog) -> Self {
        CallLogEntry {
            id: row.id,
            contact_id: ContactId(row.contact_id),
            campaign_id: row.campaign_id,
            call_reference: row.call_reference.map(CallReference),
            status: row.status,
            digit_pressed: row.digit_pressed.and_then(|d| d.chars().next()),
            duration: row.duration,
            created_at: row.created_at,
        }
    }
}

fn into_contacts(rows: Vec<DbContact>) -> Result<Vec<Contact>> {
    rows.into_iter().map(Contact::try_from).collect()
}

/// Append a call log entry inside an open transaction
async fn insert_call_log(tx: &mut Transaction<'_, Sqlite>, entry: &NewCallLog) -> Result<()> {
    sqlx::query(
        "INSERT INTO call_logs (contact_id, campaign_id, call_reference, status, digit_pressed, duration, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.contact_id.0)
    .bind(&entry.campaign_id)
    .bind(entry.call_reference.as_ref().map(CallReference::as_str))
    .bind(&entry.status)
    .bind(entry.digit_pressed.map(String::from))
    .bind(entry.duration)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl ContactStore for DatabaseManager {
    async fn seed_contacts(&self, campaign_id: &str, contacts: &[NewContact]) -> Result<Vec<Contact>> {
        let mut tx = self.pool().begin().await?;
        let mut seeded = Vec::with_capacity(contacts.len());

        for contact in contacts {
            if contact.phone_number.trim().is_empty() {
                tx.rollback().await?;
                return Err(CampaignError::invalid_input(format!(
                    "contact '{}' has no phone number",
                    contact.name
                )));
            }
            let created_at = Utc::now();
            let result = sqlx::query(
                "INSERT INTO contacts (campaign_id, name, email, phone_number, status, created_at)
                 VALUES (?, ?, ?, ?, 'pending', ?)",
            )
            .bind(campaign_id)
            .bind(&contact.name)
            .bind(&contact.email)
            .bind(contact.phone_number.trim())
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            seeded.push(Contact {
                id: ContactId(result.last_insert_rowid()),
                campaign_id: campaign_id.to_string(),
                name: contact.name.clone(),
                email: contact.email.clone(),
                phone_number: contact.phone_number.trim().to_string(),
                status: ContactStatus::Pending,
                digit_pressed: None,
                call_reference: None,
                created_at,
            });
        }

        tx.commit().await?;
        info!("Seeded {} contacts for campaign {}", seeded.len(), campaign_id);
        Ok(seeded)
    }

    async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>> {
        let row: Option<DbContact> =
            sqlx::query_as(&format!("SELECT {} FROM contacts WHERE id = ?", CONTACT_COLUMNS))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        row.map(Contact::try_from).transpose()
    }

    async fn list_contacts(&self, campaign_id: &str) -> Result<Vec<Contact>> {
        let rows: Vec<DbContact> = sqlx::query_as(&format!(
            "SELECT {} FROM contacts WHERE campaign_id = ? ORDER BY id",
            CONTACT_COLUMNS
        ))
        .bind(campaign_id)
        .fetch_all(self.pool())
        .await?;
        into_contacts(rows)
    }

    async fn pending_contacts(&self, campaign_id: &str) -> Result<Vec<Contact>> {
        let rows: Vec<DbContact> = sqlx::query_as(&format!(
            "SELECT {} FROM contacts WHERE campaign_id = ? AND status = 'pending' ORDER BY id",
            CONTACT_COLUMNS
        ))
        .bind(campaign_id)
        .fetch_all(self.pool())
        .await?;
        into_contacts(rows)
    }

    async fn find_by_call_reference(&self, call_reference: &CallReference) -> Result<Option<Contact>> {
        let row: Option<DbContact> = sqlx::query_as(&format!(
            "SELECT {} FROM contacts WHERE call_reference = ?",
            CONTACT_COLUMNS
        ))
        .bind(call_reference.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.map(Contact::try_from).transpose()
    }

    async fn record_placement(&self, contact: &Contact, call_reference: &CallReference) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE contacts SET status = 'calling', call_reference = ?, digit_pressed = NULL
             WHERE id = ? AND status = 'pending'",
        )
        .bind(call_reference.as_str())
        .bind(contact.id.0)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(CampaignError::internal(format!(
                "contact {} is no longer pending",
                contact.id
            )));
        }

        insert_call_log(
            &mut tx,
            &NewCallLog {
                contact_id: contact.id,
                campaign_id: contact.campaign_id.clone(),
                call_reference: Some(call_reference.clone()),
                status: "started".to_string(),
                digit_pressed: None,
                duration: None,
            },
        )
        .await?;

        tx.commit().await?;
        debug!("Contact {} calling as {}", contact.id, call_reference);
        Ok(())
    }

    async fn record_placement_failure(&self, contact: &Contact, status: ContactStatus) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query("UPDATE contacts SET status = ? WHERE id = ? AND status = 'pending'")
            .bind(status.as_str())
            .bind(contact.id.0)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            warn!(
                "Placement failure for contact {} not recorded: contact is no longer pending",
                contact.id
            );
            return Ok(());
        }

        insert_call_log(
            &mut tx,
            &NewCallLog {
                contact_id: contact.id,
                campaign_id: contact.campaign_id.clone(),
                call_reference: None,
                status: status.as_str().to_string(),
                digit_pressed: None,
                duration: None,
            },
        )
        .await?;

        tx.commit().await?;
        debug!("Contact {} placement ended as {}", contact.id, status);
        Ok(())
    }

    async fn apply_status_update(&self, update: &StatusUpdate) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE contacts SET status = ?, digit_pressed = COALESCE(?, digit_pressed)
             WHERE id = ? AND status = ?",
        )
        .bind(update.status.as_str())
        .bind(update.digit_pressed.map(String::from))
        .bind(update.contact_id.0)
        .bind(update.expected.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(
                "Status update for contact {} lost: expected {}",
                update.contact_id, update.expected
            );
            return Ok(false);
        }

        insert_call_log(
            &mut tx,
            &NewCallLog {
                contact_id: update.contact_id,
                campaign_id: update.campaign_id.clone(),
                call_reference: update.call_reference.clone(),
                status: update.status.as_str().to_string(),
                digit_pressed: update.digit_pressed,
                duration: update.duration,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn select_for_recall(&self, campaign_id: &str) -> Result<Vec<Contact>> {
        let rows: Vec<DbContact> = sqlx::query_as(&format!(
            "SELECT {} FROM contacts
             WHERE campaign_id = ?
               AND status NOT IN ('pending', 'calling', 'completed')
               AND digit_pressed IS NULL
             ORDER BY id",
            CONTACT_COLUMNS
        ))
        .bind(campaign_id)
        .fetch_all(self.pool())
        .await?;
        into_contacts(rows)
    }

    async fn reset_for_recall(&self, ids: &[ContactId]) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        let mut reset = 0;

        for id in ids {
            let result = sqlx::query(
                "UPDATE contacts SET status = 'pending', digit_pressed = NULL, call_reference = NULL
                 WHERE id = ?
                   AND status NOT IN ('pending', 'calling', 'completed')
                   AND digit_pressed IS NULL",
            )
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
            reset += result.rows_affected();
        }

        tx.commit().await?;
        info!("Reset {} contacts for recall", reset);
        Ok(reset)
    }

    async fn call_logs(&self, contact_id: ContactId) -> Result<Vec<CallLogEntry>> {
        let rows: Vec<DbCallLog> = sqlx::query_as(
            "SELECT id, contact_id, campaign_id, call_reference, status, digit_pressed, duration, created_at
             FROM call_logs WHERE contact_id = ? ORDER BY id",
        )
        .bind(contact_id.0)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(CallLogEntry::from).collect())
    }
}
