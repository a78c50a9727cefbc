//! Command-line interface for voicehooks.
//!
//! Operator tooling around the webhook store: running retention sweeps,
//! inspecting stored artifacts, and producing signature headers for
//! delivery diagnostics.

use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::storage::{RetentionSweeper, WebhookStore};

/// voicehooks - Signed voice-conversation webhook ingestion
#[derive(Parser, Debug)]
#[command(name = "voicehooks")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a retention sweep over main and quarantine storage
    Sweep,

    /// List stored artifacts with their sidecar metadata
    Inspect {
        /// Limit to one storage directory (caller phone / agent id)
        directory: Option<String>,
    },

    /// Produce a valid signature header for a payload file
    Sign {
        /// Payload file to sign
        #[arg(short, long)]
        body_file: PathBuf,

        /// HMAC secret (falls back to configured secret)
        #[arg(short, long)]
        secret: Option<String>,

        /// Signing timestamp (defaults to now)
        #[arg(short, long)]
        timestamp: Option<i64>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Sweep => sweep().await,
            Commands::Inspect { directory } => inspect(directory).await,
            Commands::Sign {
                body_file,
                secret,
                timestamp,
            } => sign(body_file, secret, timestamp),
            Commands::Config => show_config(),
        }
    }
}

async fn sweep() -> Result<()> {
    let settings = Settings::load()?;
    let sweeper = RetentionSweeper::new(
        settings.storage_root.clone(),
        settings.quarantine_root.clone(),
        settings.retention_policy(),
    );

    let summary = sweeper.sweep(SystemTime::now()).await?;

    println!(
        "Main storage: {} files removed ({:.2} MB)",
        summary.main.files_removed,
        summary.main.bytes_freed as f64 / 1024.0 / 1024.0
    );
    println!(
        "Quarantine:   {} files removed ({:.2} MB)",
        summary.quarantine.files_removed,
        summary.quarantine.bytes_freed as f64 / 1024.0 / 1024.0
    );
    if summary.main.truncated || summary.quarantine.truncated {
        println!("Removal cap reached; run again to continue.");
    }

    Ok(())
}

async fn inspect(directory: Option<String>) -> Result<()> {
    let settings = Settings::load()?;
    let store = WebhookStore::new(settings.storage_root.clone(), settings.quarantine_root);

    let root = settings.storage_root;
    if !root.exists() {
        println!("No artifacts stored yet ({})", root.display());
        return Ok(());
    }

    let mut dirs = tokio::fs::read_dir(&root)
        .await
        .with_context(|| format!("Failed to read {}", root.display()))?;

    while let Some(entry) = dirs.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let dir_name = entry.file_name().to_string_lossy().to_string();
        if let Some(filter) = &directory {
            if &dir_name != filter {
                continue;
            }
        }

        println!("{}/", dir_name);

        let mut files = tokio::fs::read_dir(entry.path()).await?;
        while let Some(file) = files.next_entry().await? {
            let name = file.file_name().to_string_lossy().to_string();
            if name.ends_with(".metadata.json") {
                continue;
            }

            match store.load_metadata(&file.path()).await {
                Ok(Some(metadata)) => println!(
                    "  {}  [{} | validated: {} | {} bytes | {}]",
                    name,
                    metadata.webhook_type,
                    metadata.validated,
                    metadata.file_size,
                    metadata.timestamp.format("%Y-%m-%d %H:%M:%S")
                ),
                Ok(None) => println!("  {}  [no metadata]", name),
                Err(e) => println!("  {}  [metadata unreadable: {}]", name, e),
            }
        }
    }

    Ok(())
}

fn sign(body_file: PathBuf, secret: Option<String>, timestamp: Option<i64>) -> Result<()> {
    let secret = match secret {
        Some(secret) => secret,
        None => {
            let settings = Settings::load()?;
            anyhow::ensure!(
                !settings.hmac_secret.is_empty(),
                "No secret given and none configured"
            );
            settings.hmac_secret
        }
    };

    let body = std::fs::read(&body_file)
        .with_context(|| format!("Failed to read {}", body_file.display()))?;
    let timestamp = timestamp.unwrap_or_else(|| Utc::now().timestamp());

    println!("{}", crate::auth::signature_header(&secret, &body, timestamp));
    Ok(())
}

fn show_config() -> Result<()> {
    let settings = Settings::load()?;

    match &settings.config_file {
        Some(path) => println!("Config file:    {}", path.display()),
        None => println!("Config file:    (none found, using defaults)"),
    }
    println!("Storage root:   {}", settings.storage_root.display());
    println!("Quarantine:     {}", settings.quarantine_root.display());
    println!("Secret set:     {}", !settings.hmac_secret.is_empty());
    println!("Tolerance:      {}s", settings.timestamp_tolerance_secs);
    println!("Correlation TTL: {}s", settings.correlation_ttl.as_secs());
    println!(
        "Remote cache:   {}",
        settings.remote_cache_url.as_deref().unwrap_or("(in-memory only)")
    );
    println!(
        "Anomaly:        {} failures / {}s",
        settings.anomaly_failure_threshold,
        settings.anomaly_window.as_secs()
    );
    println!(
        "Retention:      {}d main, {}d quarantine",
        settings.retention_days, settings.quarantine_retention_days
    );

    Ok(())
}
