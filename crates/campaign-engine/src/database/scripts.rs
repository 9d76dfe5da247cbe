//! Script persistence

use chrono::Utc;
use tracing::{debug, info};

use super::DatabaseManager;
use crate::error::{CampaignError, Result};
use crate::types::Script;

#[derive(sqlx::FromRow, Debug, Clone)]
struct DbScript {
    id: i64,
    user_id: i64,
    name: String,
    opening_audio: Option<String>,
    after_digit_audio: Option<String>,
}

impl From<DbScript> for Script {
    fn from(row: DbScript) -> Self {
        Script {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            opening_audio: row.opening_audio,
            after_digit_audio: row.after_digit_audio,
        }
    }
}

impl DatabaseManager {
    /// Save a script; an existing script with the same name is replaced
    /// in place and keeps its id
    pub async fn save_script(
        &self,
        user_id: i64,
        name: &str,
        opening_audio: Option<&str>,
        after_digit_audio: Option<&str>,
    ) -> Result<Script> {
        if name.trim().is_empty() {
            return Err(CampaignError::invalid_input("script name cannot be empty"));
        }

        sqlx::query(
            "INSERT INTO scripts (user_id, name, opening_audio, after_digit_audio, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id, name) DO UPDATE SET
                 opening_audio = excluded.opening_audio,
                 after_digit_audio = excluded.after_digit_audio",
        )
        .bind(user_id)
        .bind(name.trim())
        .bind(opening_audio)
        .bind(after_digit_audio)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        let row: DbScript = sqlx::query_as(
            "SELECT id, user_id, name, opening_audio, after_digit_audio
             FROM scripts WHERE user_id = ? AND name = ?",
        )
        .bind(user_id)
        .bind(name.trim())
        .fetch_one(self.pool())
        .await?;

        info!("Saved script '{}' (id {}) for user {}", row.name, row.id, user_id);
        Ok(row.into())
    }

    pub async fn get_script(&self, user_id: i64, script_id: i64) -> Result<Option<Script>> {
        let row: Option<DbScript> = sqlx::query_as(
            "SELECT id, user_id, name, opening_audio, after_digit_audio
             FROM scripts WHERE user_id = ? AND id = ?",
        )
        .bind(user_id)
        .bind(script_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Script::from))
    }

    /// Scripts of a user, oldest first
    pub async fn list_scripts(&self, user_id: i64) -> Result<Vec<Script>> {
        let rows: Vec<DbScript> = sqlx::query_as(
            "SELECT id, user_id, name, opening_audio, after_digit_audio
             FROM scripts WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Script::from).collect())
    }

    /// Script to run for a user: the active one if set and present,
    /// otherwise the user's first script
    pub async fn resolve_script(&self, user_id: i64, active_script_id: Option<i64>) -> Result<Script> {
        if let Some(script_id) = active_script_id {
            if let Some(script) = self.get_script(user_id, script_id).await? {
                return Ok(script);
            }
            debug!(
                "Active script {} for user {} no longer exists, falling back",
                script_id, user_id
            );
        }

        self.list_scripts(user_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CampaignError::no_script(format!("user {} has no scripts", user_id)))
    }
}
