//! Campaign data model
//!
//! Contacts, scripts, per-user settings, call log entries and the aggregated
//! campaign result. Persistence rows live in [`crate::database`]; the types
//! here are what the dispatcher, router and recall selector work with.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CampaignError, Result};

/// Store-assigned contact identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(pub i64);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque provider call identifier assigned at placement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallReference(pub String);

impl CallReference {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contact lifecycle status
///
/// `Pending` and `Calling` are the only non-terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "calling")]
    Calling,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "no_response")]
    NoResponse,
    #[serde(rename = "busy")]
    Busy,
    #[serde(rename = "no-answer")]
    NoAnswer,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "invalid_number")]
    InvalidNumber,
    #[serde(rename = "unverified")]
    Unverified,
    #[serde(rename = "no_funds")]
    NoFunds,
    #[serde(rename = "canceled")]
    Canceled,
}

impl ContactStatus {
    pub const ALL: [ContactStatus; 11] = [
        ContactStatus::Pending,
        ContactStatus::Calling,
        ContactStatus::Completed,
        ContactStatus::NoResponse,
        ContactStatus::Busy,
        ContactStatus::NoAnswer,
        ContactStatus::Failed,
        ContactStatus::InvalidNumber,
        ContactStatus::Unverified,
        ContactStatus::NoFunds,
        ContactStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Calling => "calling",
            Self::Completed => "completed",
            Self::NoResponse => "no_response",
            Self::Busy => "busy",
            Self::NoAnswer => "no-answer",
            Self::Failed => "failed",
            Self::InvalidNumber => "invalid_number",
            Self::Unverified => "unverified",
            Self::NoFunds => "no_funds",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Calling)
    }

    /// Terminal states reached by a call-ended event without a captured digit.
    /// A late digit press upgrades these to `Completed`.
    pub fn is_ended_without_digit(&self) -> bool {
        matches!(
            self,
            Self::NoResponse | Self::Busy | Self::NoAnswer | Self::Failed | Self::Canceled
        )
    }

    /// Terminal, not completed: eligible for recall when no digit was captured
    pub fn is_recallable(&self) -> bool {
        self.is_terminal() && *self != Self::Completed
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactStatus {
    type Err = CampaignError;

    fn from_str(s: &str) -> Result<Self> {
        ContactStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CampaignError::invalid_input(format!("unknown contact status '{}'", s)))
    }
}

/// Immediate classification of a `place_call` attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementOutcome {
    Started,
    Failed,
    /// Destination not verified on the provider account (trial accounts)
    Unverified,
    InvalidNumber,
    NoFunds,
}

impl PlacementOutcome {
    /// Contact status recorded for this outcome
    pub fn contact_status(&self) -> ContactStatus {
        match self {
            Self::Started => ContactStatus::Calling,
            Self::Failed => ContactStatus::Failed,
            Self::Unverified => ContactStatus::Unverified,
            Self::InvalidNumber => ContactStatus::InvalidNumber,
            Self::NoFunds => ContactStatus::NoFunds,
        }
    }
}

/// Outcome reported by the provider when a call ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallOutcome {
    /// Normal hangup after the call was answered
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "no_response")]
    NoResponse,
    #[serde(rename = "busy")]
    Busy,
    #[serde(rename = "no-answer")]
    NoAnswer,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "canceled")]
    Canceled,
}

impl CallOutcome {
    /// Status for a contact whose call ended with this outcome and no digit
    pub fn status_without_digit(&self) -> ContactStatus {
        match self {
            Self::Completed | Self::NoResponse => ContactStatus::NoResponse,
            Self::Busy => ContactStatus::Busy,
            Self::NoAnswer => ContactStatus::NoAnswer,
            Self::Failed => ContactStatus::Failed,
            Self::Canceled => ContactStatus::Canceled,
        }
    }
}

impl FromStr for CallOutcome {
    type Err = CampaignError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completed" => Ok(Self::Completed),
            "no_response" | "no-response" => Ok(Self::NoResponse),
            "busy" => Ok(Self::Busy),
            "no-answer" | "no_answer" => Ok(Self::NoAnswer),
            "failed" => Ok(Self::Failed),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            other => Err(CampaignError::invalid_input(format!("unknown call outcome '{}'", other))),
        }
    }
}

/// Validate a DTMF digit
pub fn parse_digit(value: &str) -> Result<char> {
    let mut chars = value.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_digit() || matches!(c, '*' | '#' | 'A'..='D' | 'a'..='d') => {
            Ok(c.to_ascii_uppercase())
        }
        _ => Err(CampaignError::invalid_input(format!("invalid DTMF digit '{}'", value))),
    }
}

/// A campaign contact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub campaign_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone_number: String,
    pub status: ContactStatus,
    pub digit_pressed: Option<char>,
    pub call_reference: Option<CallReference>,
    pub created_at: DateTime<Utc>,
}

/// Contact fields supplied when seeding a campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContact {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub phone_number: String,
}

/// Audio script attached to a campaign run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub opening_audio: Option<String>,
    pub after_digit_audio: Option<String>,
}

impl Script {
    pub fn has_audio(&self) -> bool {
        self.opening_audio.as_deref().is_some_and(|p| !p.is_empty())
            || self.after_digit_audio.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Per-user dispatch settings, read once per campaign start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub concurrency_limit: u32,
    /// Calls per second
    pub rate_limit: f64,
    pub caller_id: Option<String>,
    pub active_script_id: Option<i64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            rate_limit: 1.0,
            caller_id: None,
            active_script_id: None,
        }
    }
}

impl Settings {
    /// Reject settings the dispatcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(CampaignError::invalid_settings("concurrency_limit must be at least 1"));
        }
        if !self.rate_limit.is_finite() || self.rate_limit <= 0.0 {
            return Err(CampaignError::invalid_settings(format!(
                "rate_limit must be a positive number, got {}",
                self.rate_limit
            )));
        }
        self.admission_interval()?;
        Ok(())
    }

    /// Minimum spacing between two admissions
    pub fn admission_interval(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(1.0 / self.rate_limit).map_err(|_| {
            CampaignError::invalid_settings(format!(
                "rate_limit {} gives an admission interval out of range",
                self.rate_limit
            ))
        })
    }
}

/// Partial settings update; absent fields keep their stored value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub concurrency_limit: Option<u32>,
    #[serde(default)]
    pub rate_limit: Option<f64>,
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub active_script_id: Option<i64>,
}

impl SettingsUpdate {
    pub const MAX_CONCURRENCY: u32 = 20;
    pub const MIN_RATE: f64 = 0.1;
    pub const MAX_RATE: f64 = 10.0;

    /// Operator-facing bounds for values entered through the front end
    pub fn validate(&self) -> Result<()> {
        if let Some(limit) = self.concurrency_limit {
            if !(1..=Self::MAX_CONCURRENCY).contains(&limit) {
                return Err(CampaignError::invalid_settings(format!(
                    "concurrency_limit must be between 1 and {}",
                    Self::MAX_CONCURRENCY
                )));
            }
        }
        if let Some(rate) = self.rate_limit {
            if !(Self::MIN_RATE..=Self::MAX_RATE).contains(&rate) {
                return Err(CampaignError::invalid_settings(format!(
                    "rate_limit must be between {} and {}",
                    Self::MIN_RATE,
                    Self::MAX_RATE
                )));
            }
        }
        if let Some(caller_id) = &self.caller_id {
            if !caller_id.starts_with('+') || caller_id.len() < 10 {
                return Err(CampaignError::invalid_settings(
                    "caller_id must look like +1234567890",
                ));
            }
        }
        Ok(())
    }

    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(limit) = self.concurrency_limit {
            settings.concurrency_limit = limit;
        }
        if let Some(rate) = self.rate_limit {
            settings.rate_limit = rate;
        }
        if let Some(caller_id) = &self.caller_id {
            settings.caller_id = Some(caller_id.clone());
        }
        if let Some(script_id) = self.active_script_id {
            settings.active_script_id = Some(script_id);
        }
    }
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLogEntry {
    pub id: i64,
    pub contact_id: ContactId,
    pub campaign_id: String,
    pub call_reference: Option<CallReference>,
    pub status: String,
    pub digit_pressed: Option<char>,
    pub duration: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Call log fields supplied by the writer
#[derive(Debug, Clone, PartialEq)]
pub struct NewCallLog {
    pub contact_id: ContactId,
    pub campaign_id: String,
    pub call_reference: Option<CallReference>,
    pub status: String,
    pub digit_pressed: Option<char>,
    pub duration: Option<i64>,
}

/// Aggregated outcome of one dispatch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignResult {
    pub total: usize,
    pub started: usize,
    pub failed: usize,
    pub unverified: usize,
    pub invalid_numbers: usize,
    pub no_funds: usize,
    /// Contacts never admitted because the run was cancelled
    #[serde(default)]
    pub pending: usize,
    #[serde(default)]
    pub cancelled: bool,
}

impl CampaignResult {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: PlacementOutcome) {
        match outcome {
            PlacementOutcome::Started => self.started += 1,
            PlacementOutcome::Failed => self.failed += 1,
            PlacementOutcome::Unverified => self.unverified += 1,
            PlacementOutcome::InvalidNumber => self.invalid_numbers += 1,
            PlacementOutcome::NoFunds => self.no_funds += 1,
        }
    }

    /// Contacts with a recorded placement outcome
    pub fn placed(&self) -> usize {
        self.started + self.failed + self.unverified + self.invalid_numbers + self.no_funds
    }
}
