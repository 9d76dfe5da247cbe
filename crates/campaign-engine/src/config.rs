use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CampaignError, Result};
use crate::logging::LoggingConfig;
use crate::provider::ProviderKind;
use crate::types::Settings;

/// Environment variable overriding `provider.auth_token`
pub const PROVIDER_TOKEN_ENV: &str = "CAMPAIGN_PROVIDER_TOKEN";

/// Campaign engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignEngineConfig {
    /// HTTP server settings
    pub general: GeneralConfig,

    /// Contact store settings
    pub database: DatabaseConfig,

    /// Telephony provider selection and credentials
    pub provider: ProviderConfig,

    /// Dispatcher behaviour
    pub dispatch: DispatchConfig,

    /// Logging setup
    pub logging: LoggingConfig,
}

/// General server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Address the webhook and campaign API listen on
    pub bind_addr: String,

    /// Public base URL the provider posts call status to
    pub webhook_base_url: Option<String>,

    /// Capacity of the provider event channel
    pub event_channel_capacity: usize,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path (empty for in-memory)
    pub database_path: String,

    /// Maximum database connections
    pub max_connections: u32,
}

/// Telephony provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// REST API root, e.g. `https://voice.example.com/v1/Accounts/AC123`
    pub base_url: Option<String>,

    pub account_id: Option<String>,

    /// Overridden by `CAMPAIGN_PROVIDER_TOKEN` when set
    pub auth_token: Option<String>,

    /// Status callback URL sent with each placement
    pub status_callback_url: Option<String>,

    /// Caller id used when the user's settings carry none
    pub default_caller_id: Option<String>,

    /// HTTP timeout for provider requests (seconds)
    pub request_timeout_secs: u64,

    /// Simulated provider: emit answer + hangup this long after each placement
    pub simulated_hangup_after_ms: Option<u64>,
}

/// When a dispatch slot is handed back
///
/// `concurrency_limit` caps slots, so the policy decides what the limit
/// bounds. With `Placement` it bounds only placements in flight and the
/// number of contacts in `calling` can exceed it. With `Terminal` it bounds
/// the contacts of a run that are in `calling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotReleasePolicy {
    /// Slot freed as soon as `place_call` returns (default)
    Placement,
    /// Slot held until the call reaches a terminal state or the hold times
    /// out; a timed-out slot is freed while the contact may still be `calling`
    Terminal,
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub slot_release: SlotReleasePolicy,

    /// Upper bound on how long a held slot waits for a terminal event (seconds)
    pub slot_hold_timeout_secs: u64,

    /// Settings written for users that have none yet
    pub default_settings: Settings,
}

impl CampaignEngineConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CampaignError::config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides();
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| CampaignError::config(format!("invalid configuration: {}", e)))
    }

    /// Secrets from the environment win over the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var(PROVIDER_TOKEN_ENV) {
            if !token.is_empty() {
                self.provider.auth_token = Some(token);
            }
        }
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if self.general.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(CampaignError::config(format!(
                "Invalid bind address: {}",
                self.general.bind_addr
            )));
        }

        if self.general.event_channel_capacity == 0 {
            return Err(CampaignError::config("event_channel_capacity must be greater than 0"));
        }

        if self.database.max_connections == 0 {
            return Err(CampaignError::config("max_connections must be greater than 0"));
        }

        if self.provider.kind == ProviderKind::Rest {
            for (field, value) in [
                ("base_url", &self.provider.base_url),
                ("account_id", &self.provider.account_id),
                ("auth_token", &self.provider.auth_token),
            ] {
                if value.as_deref().map_or(true, str::is_empty) {
                    return Err(CampaignError::config(format!(
                        "provider.{} is required for the rest provider",
                        field
                    )));
                }
            }
        }

        if self.provider.request_timeout_secs == 0 {
            return Err(CampaignError::config("request_timeout_secs must be greater than 0"));
        }

        if self.dispatch.slot_release == SlotReleasePolicy::Terminal && self.dispatch.slot_hold_timeout_secs == 0 {
            return Err(CampaignError::config(
                "slot_hold_timeout_secs must be greater than 0 when slots are held until terminal",
            ));
        }

        self.dispatch.default_settings.validate()
    }
}

impl GeneralConfig {
    /// Webhook URL handed to the provider, if a public base is known
    pub fn webhook_url(&self) -> Option<String> {
        self.webhook_base_url
            .as_deref()
            .map(|base| format!("{}/sip_webhook", base.trim_end_matches('/')))
    }
}

impl DispatchConfig {
    pub fn slot_hold_timeout(&self) -> Duration {
        Duration::from_secs(self.slot_hold_timeout_secs)
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            webhook_base_url: None,
            event_channel_capacity: 1024,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: "campaigns.db".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Simulated,
            base_url: None,
            account_id: None,
            auth_token: None,
            status_callback_url: None,
            default_caller_id: None,
            request_timeout_secs: 15,
            simulated_hangup_after_ms: None,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            slot_release: SlotReleasePolicy::Placement,
            slot_hold_timeout_secs: 120,
            default_settings: Settings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = CampaignEngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Simulated);
        assert_eq!(config.dispatch.slot_release, SlotReleasePolicy::Placement);
        assert_eq!(config.dispatch.default_settings.concurrency_limit, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CampaignEngineConfig::from_toml_str(
            r#"
            [general]
            bind_addr = "127.0.0.1:9000"
            webhook_base_url = "https://dialer.example.com/"

            [dispatch]
            slot_release = "terminal"
            slot_hold_timeout_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.general.bind_addr, "127.0.0.1:9000");
        assert_eq!(
            config.general.webhook_url().as_deref(),
            Some("https://dialer.example.com/sip_webhook")
        );
        assert_eq!(config.dispatch.slot_release, SlotReleasePolicy::Terminal);
        assert_eq!(config.dispatch.slot_hold_timeout(), Duration::from_secs(30));
        assert_eq!(config.database.max_connections, 5);
        config.validate().unwrap();
    }

    #[test]
    fn test_rest_provider_requires_credentials() {
        let mut config = CampaignEngineConfig::default();
        config.provider.kind = ProviderKind::Rest;
        config.provider.base_url = Some("https://voice.example.com".into());
        assert!(config.validate().is_err());

        config.provider.account_id = Some("AC1".into());
        config.provider.auth_token = Some("secret".into());
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = CampaignEngineConfig::default();
        config.general.bind_addr = "not-an-address".into();
        assert!(config.validate().is_err());

        let mut config = CampaignEngineConfig::default();
        config.dispatch.default_settings.rate_limit = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_token_override() {
        std::env::set_var(PROVIDER_TOKEN_ENV, "from-env");
        let mut config = CampaignEngineConfig::default();
        config.provider.auth_token = Some("from-file".into());
        config.apply_env_overrides();
        std::env::remove_var(PROVIDER_TOKEN_ENV);
        assert_eq!(config.provider.auth_token.as_deref(), Some("from-env"));
    }
}
