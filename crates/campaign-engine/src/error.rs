use thiserror::Error;

/// Campaign engine errors
#[derive(Error, Debug)]
pub enum CampaignError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The user has no script with at least one audio asset
    #[error("No script available: {0}")]
    NoScriptAvailable(String),

    /// Settings rejected before any call was placed
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Telephony provider errors (transport level, not placement outcomes)
    #[error("Provider error: {0}")]
    Provider(String),

    /// A run is already active for the campaign
    #[error("Campaign already running: {0}")]
    CampaignAlreadyRunning(String),

    /// Recall found no contacts to restage
    #[error("Nothing to recall for campaign {0}")]
    NothingToRecall(String),

    /// Event could not be applied
    #[error("Routing error: {0}")]
    Routing(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CampaignError {
    /// Create a new NoScriptAvailable error
    pub fn no_script<S: Into<String>>(msg: S) -> Self {
        Self::NoScriptAvailable(msg.into())
    }

    /// Create a new InvalidSettings error
    pub fn invalid_settings<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSettings(msg.into())
    }

    /// Create a new Config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new Provider error
    pub fn provider<S: Into<String>>(msg: S) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a new Routing error
    pub fn routing<S: Into<String>>(msg: S) -> Self {
        Self::Routing(msg.into())
    }

    /// Create a new InvalidInput error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new NotFound error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// True for errors raised before any call is placed because the
    /// campaign inputs are unusable
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoScriptAvailable(_) | Self::InvalidSettings(_) | Self::Config(_)
        )
    }
}

/// Result type for campaign engine operations
pub type Result<T> = std::result::Result<T, CampaignError>;
