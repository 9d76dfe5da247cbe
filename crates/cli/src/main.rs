//! `rvoip-campaign`: run a campaign server or drive one over HTTP

mod client;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tokio_util::sync::CancellationToken;
use tracing::info;

use rvoip_campaign_engine::config::CampaignEngineConfig;
use rvoip_campaign_engine::logging::{log_welcome, setup_logging};
use rvoip_campaign_engine::server::CampaignServer;
use rvoip_campaign_engine::service::CampaignStatus;
use rvoip_campaign_engine::types::{CampaignResult, Contact, NewContact, Script, Settings};

use client::CampaignClient;

#[derive(Parser)]
#[command(name = "rvoip-campaign", version, about = "Outbound call campaigns for rvoip")]
struct Cli {
    /// Campaign server to talk to
    #[arg(long, global = true, env = "CAMPAIGN_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the campaign server
    Serve {
        /// Configuration file (defaults to the user config dir when present)
        #[arg(long, short)]
        config: Option<PathBuf>,
        /// SQLite database path; empty for in-memory
        #[arg(long)]
        database: Option<String>,
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        log_level: Option<String>,
        /// Emit JSON logs
        #[arg(long)]
        json: bool,
    },
    /// Print the default configuration as TOML
    DefaultConfig,
    /// Seed contacts from a JSON file (an array of {name, email?, phone_number})
    Seed {
        campaign: String,
        file: PathBuf,
    },
    /// Dispatch every pending contact
    Start {
        campaign: String,
        #[arg(long)]
        user: i64,
        /// Wait for all placements before returning
        #[arg(long)]
        wait: bool,
    },
    /// Redial contacts that ended without responding
    Recall {
        campaign: String,
        #[arg(long)]
        user: i64,
        #[arg(long)]
        wait: bool,
    },
    /// Stop admitting contacts for a running campaign
    Cancel { campaign: String },
    /// Running state and last result
    Status { campaign: String },
    /// List contacts and their call state
    Contacts { campaign: String },
    /// Show or change per-user dispatch settings
    Settings {
        user: i64,
        #[arg(long)]
        concurrency: Option<u32>,
        #[arg(long)]
        rate: Option<f64>,
        #[arg(long)]
        caller_id: Option<String>,
        #[arg(long)]
        script: Option<i64>,
    },
    /// Manage audio scripts
    Scripts {
        #[command(subcommand)]
        action: ScriptAction,
    },
}

#[derive(Subcommand)]
enum ScriptAction {
    List {
        user: i64,
    },
    Add {
        user: i64,
        name: String,
        #[arg(long)]
        opening: Option<String>,
        #[arg(long)]
        after_digit: Option<String>,
    },
}

#[derive(Tabled)]
struct ContactRow {
    id: i64,
    name: String,
    phone: String,
    status: String,
    digit: String,
    call: String,
}

impl From<&Contact> for ContactRow {
    fn from(contact: &Contact) -> Self {
        Self {
            id: contact.id.0,
            name: contact.name.clone(),
            phone: contact.phone_number.clone(),
            status: contact.status.to_string(),
            digit: contact.digit_pressed.map(String::from).unwrap_or_default(),
            call: contact
                .call_reference
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_default(),
        }
    }
}

#[derive(Tabled)]
struct ScriptRow {
    id: i64,
    name: String,
    opening: String,
    after_digit: String,
}

impl From<&Script> for ScriptRow {
    fn from(script: &Script) -> Self {
        Self {
            id: script.id,
            name: script.name.clone(),
            opening: script.opening_audio.clone().unwrap_or_default(),
            after_digit: script.after_digit_audio.clone().unwrap_or_default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            database,
            bind,
            log_level,
            json,
        } => serve(config, database, bind, log_level, json).await,
        Command::DefaultConfig => {
            let raw = toml::to_string_pretty(&CampaignEngineConfig::default())
                .context("failed to render default configuration")?;
            println!("{}", raw);
            Ok(())
        }
        command => {
            init_client_logging();
            let client = CampaignClient::new(&cli.server)?;
            run_client(&client, command).await
        }
    }
}

async fn serve(
    config_path: Option<PathBuf>,
    database: Option<String>,
    bind: Option<String>,
    log_level: Option<String>,
    json: bool,
) -> Result<()> {
    let mut config = load_config(config_path.as_deref())?;
    if let Some(database) = database {
        config.database.database_path = database;
    }
    if let Some(bind) = bind {
        config.general.bind_addr = bind;
    }
    if let Some(level) = log_level {
        config.logging.level = level;
    }
    if json {
        config.logging.json = true;
    }

    setup_logging(&config.logging)?;
    log_welcome(&config.logging.app_name, env!("CARGO_PKG_VERSION"));

    let server = CampaignServer::new(config).await?;
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            signal.cancel();
        }
    });

    server.run(shutdown).await?;
    Ok(())
}

/// Explicit path, else `<config dir>/rvoip-campaign/config.toml`, else defaults
fn load_config(path: Option<&Path>) -> Result<CampaignEngineConfig> {
    if let Some(path) = path {
        return Ok(CampaignEngineConfig::load_from_file(path)?);
    }

    let default_path = dirs::config_dir().map(|dir| dir.join("rvoip-campaign").join("config.toml"));
    match default_path {
        Some(path) if path.exists() => Ok(CampaignEngineConfig::load_from_file(&path)?),
        _ => {
            let mut config = CampaignEngineConfig::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

fn init_client_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_client(client: &CampaignClient, command: Command) -> Result<()> {
    match command {
        Command::Seed { campaign, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let contacts: Vec<NewContact> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON contact list", file.display()))?;
            let seeded: Vec<Contact> = client
                .post(
                    &format!("/campaigns/{}/contacts", campaign),
                    json!({ "contacts": contacts }),
                )
                .await?;
            println!("{} {} contacts seeded into {}", "✓".green(), seeded.len(), campaign.bold());
        }
        Command::Start { campaign, user, wait } => {
            run_campaign(client, &campaign, user, wait, "start").await?;
        }
        Command::Recall { campaign, user, wait } => {
            run_campaign(client, &campaign, user, wait, "recall").await?;
        }
        Command::Cancel { campaign } => {
            let _: Value = client
                .post(&format!("/campaigns/{}/cancel", campaign), json!({}))
                .await?;
            println!("{} cancelling {}", "■".yellow(), campaign.bold());
        }
        Command::Status { campaign } => {
            let status: CampaignStatus = client.get(&format!("/campaigns/{}", campaign)).await?;
            let state = if status.running { "running".green() } else { "idle".normal() };
            println!("{} {}", status.campaign_id.bold(), state);
            match status.last_result {
                Some(result) => print_result(&result),
                None => println!("  no completed run"),
            }
        }
        Command::Contacts { campaign } => {
            let contacts: Vec<Contact> = client
                .get(&format!("/campaigns/{}/contacts", campaign))
                .await?;
            let rows: Vec<ContactRow> = contacts.iter().map(ContactRow::from).collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }
        Command::Settings {
            user,
            concurrency,
            rate,
            caller_id,
            script,
        } => {
            let path = format!("/users/{}/settings", user);
            let settings: Settings = if concurrency.is_none()
                && rate.is_none()
                && caller_id.is_none()
                && script.is_none()
            {
                client.get(&path).await?
            } else {
                client
                    .put(
                        &path,
                        json!({
                            "concurrency_limit": concurrency,
                            "rate_limit": rate,
                            "caller_id": caller_id,
                            "active_script_id": script,
                        }),
                    )
                    .await?
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Scripts { action } => match action {
            ScriptAction::List { user } => {
                let scripts: Vec<Script> = client.get(&format!("/users/{}/scripts", user)).await?;
                let rows: Vec<ScriptRow> = scripts.iter().map(ScriptRow::from).collect();
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
            ScriptAction::Add {
                user,
                name,
                opening,
                after_digit,
            } => {
                let script: Script = client
                    .post(
                        &format!("/users/{}/scripts", user),
                        json!({
                            "name": name,
                            "opening_audio": opening,
                            "after_digit_audio": after_digit,
                        }),
                    )
                    .await?;
                println!("{} script {} saved as #{}", "✓".green(), script.name.bold(), script.id);
            }
        },
        Command::Serve { .. } | Command::DefaultConfig => {
            anyhow::bail!("this command does not talk to a campaign server")
        }
    }
    Ok(())
}

async fn run_campaign(client: &CampaignClient, campaign: &str, user: i64, wait: bool, action: &str) -> Result<()> {
    let response: Value = client
        .post(
            &format!("/campaigns/{}/{}", campaign, action),
            json!({ "user_id": user, "wait": wait }),
        )
        .await?;

    match response.get("result") {
        Some(result) => {
            let result: CampaignResult = serde_json::from_value(result.clone())?;
            println!("{} {} finished", "✓".green(), campaign.bold());
            print_result(&result);
        }
        None => println!("{} {} running in the background", "▶".green(), campaign.bold()),
    }
    Ok(())
}

fn print_result(result: &CampaignResult) {
    println!("  total:           {}", result.total);
    println!("  started:         {}", result.started.to_string().green());
    println!("  failed:          {}", result.failed.to_string().red());
    println!("  unverified:      {}", result.unverified);
    println!("  invalid numbers: {}", result.invalid_numbers);
    println!("  no funds:        {}", result.no_funds);
    if result.cancelled {
        println!("  {} ({} never dialled)", "cancelled".yellow(), result.pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_start_with_wait() {
        let cli = Cli::try_parse_from(["rvoip-campaign", "start", "spring", "--user", "3", "--wait"]).unwrap();
        match cli.command {
            Command::Start { campaign, user, wait } => {
                assert_eq!(campaign, "spring");
                assert_eq!(user, 3);
                assert!(wait);
            }
            _ => panic!("expected start"),
        }
    }
}
