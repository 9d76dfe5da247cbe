//! # Campaign Server
//!
//! Owns the [`CampaignEngine`] and serves the HTTP API on top of it. Starting
//! the server also starts the router loop over the provider's event stream,
//! so calls placed by the simulated provider (or any provider that pushes
//! events instead of calling the webhook) reach the lifecycle without an HTTP
//! round trip.
//!
//! ```rust,no_run
//! use rvoip_campaign_engine::server::CampaignServerBuilder;
//! use rvoip_campaign_engine::config::CampaignEngineConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> rvoip_campaign_engine::Result<()> {
//! let server = CampaignServerBuilder::new()
//!     .with_config(CampaignEngineConfig::default())
//!     .with_in_memory_database()
//!     .build()
//!     .await?;
//!
//! let shutdown = CancellationToken::new();
//! server.run(shutdown).await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::create_router;
use crate::config::CampaignEngineConfig;
use crate::engine::CampaignEngine;
use crate::error::{CampaignError, Result};

/// HTTP front for a campaign engine
pub struct CampaignServer {
    engine: Arc<CampaignEngine>,
    bind_addr: String,
}

impl CampaignServer {
    /// Build the engine from configuration
    pub async fn new(config: CampaignEngineConfig) -> Result<Self> {
        let bind_addr = config.general.bind_addr.clone();
        let engine = CampaignEngine::new(config).await?;
        Ok(Self { engine, bind_addr })
    }

    /// Serve an already assembled engine
    pub fn with_engine(engine: Arc<CampaignEngine>, bind_addr: impl Into<String>) -> Self {
        Self {
            engine,
            bind_addr: bind_addr.into(),
        }
    }

    pub fn engine(&self) -> &Arc<CampaignEngine> {
        &self.engine
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// Bind the configured address and serve until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await.map_err(|e| {
            CampaignError::config(format!("cannot bind {}: {}", self.bind_addr, e))
        })?;
        self.serve(listener, shutdown).await
    }

    /// Serve on a listener the caller bound
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        let events = self.engine.start_event_loop(shutdown.child_token());

        if let Some(addr) = addr {
            info!("📞 Campaign server listening on {}", addr);
        }
        if let Some(webhook) = self.engine.config().general.webhook_url() {
            info!("Provider callbacks expected at {}", webhook);
        }

        let app = create_router(self.engine.clone());
        let signal = shutdown.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;

        shutdown.cancel();
        if let Some(handle) = events {
            if let Err(e) = handle.await {
                error!("Router loop ended abnormally: {}", e);
            }
        }

        served.map_err(|e| CampaignError::internal(format!("server error: {}", e)))?;
        info!("🛑 Campaign server stopped");
        Ok(())
    }
}

/// Builder for [`CampaignServer`]
pub struct CampaignServerBuilder {
    config: Option<CampaignEngineConfig>,
    db_path: Option<String>,
    bind_addr: Option<String>,
}

impl CampaignServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            db_path: None,
            bind_addr: None,
        }
    }

    pub fn with_config(mut self, config: CampaignEngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_database_path(mut self, path: impl Into<String>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Use an in-memory database
    pub fn with_in_memory_database(mut self) -> Self {
        self.db_path = Some(String::new());
        self
    }

    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = Some(addr.into());
        self
    }

    pub async fn build(self) -> Result<CampaignServer> {
        let mut config = self
            .config
            .ok_or_else(|| CampaignError::config("Configuration not provided"))?;
        if let Some(path) = self.db_path {
            config.database.database_path = path;
        }
        if let Some(addr) = self.bind_addr {
            config.general.bind_addr = addr;
        }
        CampaignServer::new(config).await
    }
}

impl Default for CampaignServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_builder_requires_config() {
        let err = CampaignServerBuilder::new().build().await.err().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_serves_health_and_shuts_down() {
        let server = CampaignServerBuilder::new()
            .with_config(CampaignEngineConfig::default())
            .with_in_memory_database()
            .with_bind_addr("127.0.0.1:0")
            .build()
            .await
            .unwrap();
        assert_eq!(server.bind_addr(), "127.0.0.1:0");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = Arc::new(server);
        let handle = {
            let server = server.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.serve(listener, shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        let body: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "healthy");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
