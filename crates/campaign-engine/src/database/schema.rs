//! Table definitions for the campaign database

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::Result;

/// Create the contacts table
pub async fn create_contacts_table(pool: &SqlitePool) -> Result<()> {
    debug!("📋 Creating contacts table");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contacts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id TEXT NOT NULL,
            name TEXT NOT NULL,
            email TEXT,
            phone_number TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            digit_pressed TEXT,
            call_reference TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the scripts table
pub async fn create_scripts_table(pool: &SqlitePool) -> Result<()> {
    debug!("📋 Creating scripts table");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scripts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            opening_audio TEXT,
            after_digit_audio TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (user_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the per-user settings table
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    debug!("📋 Creating settings table");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            user_id INTEGER PRIMARY KEY,
            concurrency_limit INTEGER NOT NULL,
            rate_limit REAL NOT NULL,
            caller_id TEXT,
            active_script_id INTEGER,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the append-only call log table
pub async fn create_call_logs_table(pool: &SqlitePool) -> Result<()> {
    debug!("📋 Creating call_logs table");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS call_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contact_id INTEGER NOT NULL,
            campaign_id TEXT NOT NULL,
            call_reference TEXT,
            status TEXT NOT NULL,
            digit_pressed TEXT,
            duration INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY (contact_id) REFERENCES contacts(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create lookup indexes
pub async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    debug!("📋 Creating indexes");

    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_contacts_campaign_status ON contacts(campaign_id, status)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_contacts_call_reference ON contacts(call_reference)",
        "CREATE INDEX IF NOT EXISTS idx_call_logs_contact ON call_logs(contact_id)",
    ];
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
