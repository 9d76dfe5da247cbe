//! # SQLite persistence
//!
//! [`DatabaseManager`] owns the sqlx pool and implements
//! [`crate::store::ContactStore`] plus the settings and script accessors the
//! campaign service uses. Queries are built at runtime (`sqlx::query`), so no
//! database is needed at compile time.

pub mod contacts;
pub mod schema;
pub mod scripts;
pub mod settings;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, error, info};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::types::Settings;

/// Campaign database manager
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
    /// Written for users reading their settings for the first time
    default_settings: Settings,
}

impl DatabaseManager {
    /// Open (creating if missing) the database file at `path`
    pub async fn new(path: &str, max_connections: u32) -> Result<Self> {
        info!("🗄️ Opening campaign database at {}", path);
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let manager = Self {
            pool,
            default_settings: Settings::default(),
        };
        manager.initialize_schema().await?;
        Ok(manager)
    }

    /// Private in-memory database, for tests and dry runs
    ///
    /// Uses a single connection that is never recycled, since each SQLite
    /// memory connection is its own database.
    pub async fn new_in_memory() -> Result<Self> {
        debug!("🗄️ Creating in-memory campaign database");
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let manager = Self {
            pool,
            default_settings: Settings::default(),
        };
        manager.initialize_schema().await?;
        Ok(manager)
    }

    /// Open the database described by configuration (empty path means memory)
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        if config.database_path.is_empty() || config.database_path == ":memory:" {
            Self::new_in_memory().await
        } else {
            Self::new(&config.database_path, config.max_connections).await
        }
    }

    pub fn with_default_settings(mut self, settings: Settings) -> Self {
        self.default_settings = settings;
        self
    }

    pub fn default_settings(&self) -> &Settings {
        &self.default_settings
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn initialize_schema(&self) -> Result<()> {
        schema::create_contacts_table(&self.pool).await?;
        schema::create_scripts_table(&self.pool).await?;
        schema::create_settings_table(&self.pool).await?;
        schema::create_call_logs_table(&self.pool).await?;
        schema::create_indexes(&self.pool).await?;
        debug!("✅ Campaign schema ready");
        Ok(())
    }

    /// Execute a health check query
    pub async fn health_check(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                error!("❌ Database health check failed: {}", e);
                false
            }
        }
    }
}
