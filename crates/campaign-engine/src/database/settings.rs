//! Per-user settings persistence

use chrono::Utc;
use tracing::{debug, info};

use super::DatabaseManager;
use crate::error::Result;
use crate::types::{Settings, SettingsUpdate};

#[derive(sqlx::FromRow, Debug, Clone)]
struct DbSettings {
    concurrency_limit: i64,
    rate_limit: f64,
    caller_id: Option<String>,
    active_script_id: Option<i64>,
}

impl From<DbSettings> for Settings {
    fn from(row: DbSettings) -> Self {
        Settings {
            concurrency_limit: u32::try_from(row.concurrency_limit).unwrap_or(0),
            rate_limit: row.rate_limit,
            caller_id: row.caller_id,
            active_script_id: row.active_script_id,
        }
    }
}

impl DatabaseManager {
    /// Settings for a user, creating the row with defaults on first read
    pub async fn get_settings(&self, user_id: i64) -> Result<Settings> {
        let mut tx = self.pool().begin().await?;
        let defaults = self.default_settings();

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO settings (user_id, concurrency_limit, rate_limit, caller_id, active_script_id, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(i64::from(defaults.concurrency_limit))
        .bind(defaults.rate_limit)
        .bind(&defaults.caller_id)
        .bind(defaults.active_script_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() > 0 {
            debug!("Created default settings for user {}", user_id);
        }

        let row: DbSettings = sqlx::query_as(
            "SELECT concurrency_limit, rate_limit, caller_id, active_script_id
             FROM settings WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    /// Apply a partial update; fields absent from `update` keep their value
    pub async fn save_settings(&self, user_id: i64, update: &SettingsUpdate) -> Result<Settings> {
        update.validate()?;

        let mut settings = self.get_settings(user_id).await?;
        update.apply_to(&mut settings);

        sqlx::query(
            "UPDATE settings
             SET concurrency_limit = ?, rate_limit = ?, caller_id = ?, active_script_id = ?, updated_at = ?
             WHERE user_id = ?",
        )
        .bind(i64::from(settings.concurrency_limit))
        .bind(settings.rate_limit)
        .bind(&settings.caller_id)
        .bind(settings.active_script_id)
        .bind(Utc::now())
        .bind(user_id)
        .execute(self.pool())
        .await?;

        info!("Saved settings for user {}", user_id);
        Ok(settings)
    }
}
