use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{CampaignError, Result};

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level directive (`error`, `warn`, `info`, `debug`, `trace`)
    pub level: String,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log span open/close events
    pub log_spans: bool,
    /// Application name included in the welcome line
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "rvoip-campaign".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level: level.into(),
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` directives are honoured on top of the configured level. Fails if
/// a subscriber is already installed.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let span_events = if config.log_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        builder.with_writer(std::io::stdout).json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| CampaignError::config(format!("failed to install tracing subscriber: {}", e)))
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| CampaignError::config(format!("Invalid log level: {}", level)))
}

/// Log a welcome message with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}
