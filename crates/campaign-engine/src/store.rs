//! Contact store interface
//!
//! The dispatcher, router and recall selector depend on [`ContactStore`] only.
//! [`crate::database::DatabaseManager`] is the SQLite implementation.
//!
//! Every status write goes through a compare-and-set on the status the caller
//! last observed, and every write that changes status appends to the call log
//! in the same transaction.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CallLogEntry, CallReference, Contact, ContactId, ContactStatus, NewContact};

/// Status change produced by the state machine for one contact
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub contact_id: ContactId,
    pub campaign_id: String,
    pub call_reference: Option<CallReference>,
    /// Status the update was computed from
    pub expected: ContactStatus,
    pub status: ContactStatus,
    /// Digit to record; `None` leaves the stored digit untouched
    pub digit_pressed: Option<char>,
    pub duration: Option<i64>,
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Insert contacts in `pending` for a campaign, preserving order
    async fn seed_contacts(&self, campaign_id: &str, contacts: &[NewContact]) -> Result<Vec<Contact>>;

    async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>>;

    /// All contacts of a campaign in insertion order
    async fn list_contacts(&self, campaign_id: &str) -> Result<Vec<Contact>>;

    /// Contacts still `pending`, in insertion order
    async fn pending_contacts(&self, campaign_id: &str) -> Result<Vec<Contact>>;

    async fn find_by_call_reference(&self, call_reference: &CallReference) -> Result<Option<Contact>>;

    /// `pending -> calling` with the call reference and a `started` log entry
    async fn record_placement(&self, contact: &Contact, call_reference: &CallReference) -> Result<()>;

    /// `pending -> status` for a rejected placement
    async fn record_placement_failure(&self, contact: &Contact, status: ContactStatus) -> Result<()>;

    /// Apply a state-machine transition
    ///
    /// Returns `false` without writing anything when the stored status no
    /// longer equals `update.expected`.
    async fn apply_status_update(&self, update: &StatusUpdate) -> Result<bool>;

    /// Terminal contacts other than `completed` with no digit captured
    async fn select_for_recall(&self, campaign_id: &str) -> Result<Vec<Contact>>;

    /// Put contacts back to `pending` with digit and call reference cleared.
    /// All-or-nothing; returns the number of rows reset.
    async fn reset_for_recall(&self, ids: &[ContactId]) -> Result<u64>;

    /// Call log entries for a contact, oldest first
    async fn call_logs(&self, contact_id: ContactId) -> Result<Vec<CallLogEntry>>;
}
