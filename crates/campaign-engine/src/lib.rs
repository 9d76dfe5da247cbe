//! # rvoip Campaign Engine
//!
//! Outbound voice-call campaigns for the rvoip stack. A campaign is a set of
//! contacts, a script (an opening audio prompt and an optional after-digit
//! prompt) and per-user dispatch settings. The engine places calls through a
//! telephony provider under a concurrency ceiling and a rate limit, then
//! follows each call through answer, keypress and hangup until the contact
//! settles in a terminal state. Non-responders can be recalled.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │      CampaignServer (axum HTTP surface)      │
//! ├──────────────────────────────────────────────┤
//! │  /sip_webhook │ /campaigns/* │ /users/*      │
//! ├──────────────────────────────────────────────┤
//! │               CampaignEngine                 │
//! │  CampaignService │ Dispatcher │ EventRouter  │
//! ├──────────────────────────────────────────────┤
//! │  ContactStore (SQLite) │ TelephonyProvider   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! - [`dispatcher`] admits contacts under a semaphore and a [`pacing::PacingGate`]
//! - [`lifecycle`] is the pure contact state machine
//! - [`router`] applies provider events to contacts and runs their side effects
//! - [`recall`] selects and restages non-responders
//! - [`provider`] holds the simulated and REST telephony backends
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rvoip_campaign_engine::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let mut config = CampaignEngineConfig::default();
//! config.database.database_path = String::new();
//! let engine = CampaignEngine::new(config).await?;
//!
//! let service = engine.service();
//! service.save_script(1, "spring", Some("audio/open.wav"), None).await?;
//! service
//!     .seed_contacts(
//!         "spring-2024",
//!         &[NewContact {
//!             name: "Ann".into(),
//!             email: None,
//!             phone_number: "+15550000001".into(),
//!         }],
//!     )
//!     .await?;
//!
//! let result = service.start_campaign(1, "spring-2024").await?;
//! println!("{} calls started", result.started);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod config;
pub mod logging;

pub mod types;
pub mod events;
pub mod lifecycle;
pub mod pacing;

pub mod store;
pub mod database;
pub mod provider;
pub mod registry;

pub mod dispatcher;
pub mod router;
pub mod recall;
pub mod service;
pub mod engine;

pub mod api;
pub mod server;

pub use config::CampaignEngineConfig;
pub use engine::CampaignEngine;
pub use error::{CampaignError, Result};
pub use server::{CampaignServer, CampaignServerBuilder};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{CampaignEngine, CampaignEngineConfig, CampaignError, Result};

    pub use crate::config::{
        DatabaseConfig, DispatchConfig, GeneralConfig, ProviderConfig, SlotReleasePolicy,
    };
    pub use crate::database::DatabaseManager;
    pub use crate::dispatcher::CampaignDispatcher;
    pub use crate::events::{CallEvent, WebhookPayload};
    pub use crate::lifecycle::{apply_event, ContactState, SideEffect, Transition};
    pub use crate::logging::{setup_logging, LoggingConfig};
    pub use crate::provider::{
        ProviderKind, RestProvider, SimulatedProvider, TelephonyProvider,
    };
    pub use crate::recall::RecallSelector;
    pub use crate::router::{EventRouter, RouteOutcome};
    pub use crate::server::{CampaignServer, CampaignServerBuilder};
    pub use crate::service::{CampaignService, CampaignStatus};
    pub use crate::store::ContactStore;
    pub use crate::types::{
        CallOutcome, CallReference, CampaignResult, Contact, ContactId, ContactStatus,
        NewContact, PlacementOutcome, Script, Settings, SettingsUpdate,
    };
}
