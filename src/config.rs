//! Configuration for voicehooks.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (VOICEHOOKS_*)
//! 2. Config file (.voicehooks/config.yaml)
//! 3. Defaults (~/.voicehooks)
//!
//! Config file discovery:
//! - Searches current directory and parents for .voicehooks/config.yaml
//! - Paths in config file are relative to the config file's parent directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookConfig {
    /// HMAC secret for signature validation
    pub hmac_secret: Option<String>,
    /// Signature timestamp tolerance in seconds
    pub timestamp_tolerance_secs: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Main artifact storage (relative to config file)
    pub storage: Option<String>,
    /// Quarantine tree (relative to config file)
    pub quarantine: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Correlation TTL in seconds
    pub correlation_ttl_secs: Option<u64>,
    /// Remote cache base URL (None = in-memory only)
    pub remote_url: Option<String>,
    /// Per-call timeout against the remote cache, milliseconds
    pub remote_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnomalyConfig {
    pub failure_threshold: Option<usize>,
    pub window_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetentionConfig {
    pub retention_days: Option<u64>,
    pub quarantine_retention_days: Option<u64>,
    /// Sweep every N processed requests
    pub sweep_request_interval: Option<u64>,
    /// Sweep every T seconds
    pub sweep_secs_interval: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollaboratorsConfig {
    pub memory: Option<ApiEndpoint>,
    pub profiles: Option<ApiEndpoint>,
}

/// Address and credential for a downstream collaborator API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEndpoint {
    pub url: String,
    pub api_key: String,
}

/// Resolved configuration consumed by the gateway and CLI.
#[derive(Debug, Clone)]
pub struct Settings {
    /// HMAC secret; empty means signature validation cannot run.
    pub hmac_secret: String,
    pub timestamp_tolerance_secs: i64,

    pub storage_root: PathBuf,
    pub quarantine_root: PathBuf,

    pub correlation_ttl: Duration,
    pub remote_cache_url: Option<String>,
    pub remote_cache_timeout: Duration,

    pub anomaly_failure_threshold: usize,
    pub anomaly_window: Duration,

    pub retention_days: u64,
    pub quarantine_retention_days: u64,
    pub sweep_request_interval: u64,
    pub sweep_interval: Duration,

    pub memory_api: Option<ApiEndpoint>,
    pub profile_api: Option<ApiEndpoint>,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self> {
        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".voicehooks");

        let config_file = find_config_file();
        let file = match &config_file {
            Some(path) => Some(load_config_file(path)?),
            None => None,
        };

        let base_dir = config_file
            .as_deref()
            .and_then(Path::parent) // .voicehooks/
            .and_then(Path::parent) // project root
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let storage_root = env_path("VOICEHOOKS_STORAGE_ROOT")
            .or_else(|| {
                file.as_ref()
                    .and_then(|f| f.paths.storage.as_deref())
                    .map(|p| resolve_path(&base_dir, p))
            })
            .unwrap_or_else(|| default_home.join("webhooks"));

        let quarantine_root = env_path("VOICEHOOKS_QUARANTINE_ROOT")
            .or_else(|| {
                file.as_ref()
                    .and_then(|f| f.paths.quarantine.as_deref())
                    .map(|p| resolve_path(&base_dir, p))
            })
            .unwrap_or_else(|| default_home.join("quarantine"));

        let hmac_secret = std::env::var("VOICEHOOKS_HMAC_SECRET")
            .ok()
            .or_else(|| file.as_ref().and_then(|f| f.webhook.hmac_secret.clone()))
            .unwrap_or_default();

        let remote_cache_url = std::env::var("VOICEHOOKS_REMOTE_CACHE_URL")
            .ok()
            .or_else(|| file.as_ref().and_then(|f| f.cache.remote_url.clone()));

        let get = |selector: fn(&ConfigFile) -> Option<u64>, default: u64| -> u64 {
            file.as_ref().and_then(selector).unwrap_or(default)
        };

        Ok(Self {
            hmac_secret,
            timestamp_tolerance_secs: file
                .as_ref()
                .and_then(|f| f.webhook.timestamp_tolerance_secs)
                .unwrap_or(crate::auth::DEFAULT_TOLERANCE_SECS),
            storage_root,
            quarantine_root,
            correlation_ttl: Duration::from_secs(get(|f| f.cache.correlation_ttl_secs, 3600)),
            remote_cache_url,
            remote_cache_timeout: Duration::from_millis(get(|f| f.cache.remote_timeout_ms, 2000)),
            anomaly_failure_threshold: file
                .as_ref()
                .and_then(|f| f.anomaly.failure_threshold)
                .unwrap_or(5),
            anomaly_window: Duration::from_secs(get(|f| f.anomaly.window_secs, 300)),
            retention_days: get(|f| f.retention.retention_days, 30),
            quarantine_retention_days: get(|f| f.retention.quarantine_retention_days, 7),
            sweep_request_interval: get(|f| f.retention.sweep_request_interval, 500),
            sweep_interval: Duration::from_secs(get(|f| f.retention.sweep_secs_interval, 3600)),
            memory_api: file.as_ref().and_then(|f| f.collaborators.memory.clone()),
            profile_api: file.as_ref().and_then(|f| f.collaborators.profiles.clone()),
            config_file,
        })
    }

    /// Settings rooted under an explicit directory, with defaults
    /// everywhere else. The shape every test fixture starts from.
    pub fn for_root(root: &Path, hmac_secret: &str) -> Self {
        Self {
            hmac_secret: hmac_secret.to_string(),
            timestamp_tolerance_secs: crate::auth::DEFAULT_TOLERANCE_SECS,
            storage_root: root.join("webhooks"),
            quarantine_root: root.join("quarantine"),
            correlation_ttl: Duration::from_secs(3600),
            remote_cache_url: None,
            remote_cache_timeout: Duration::from_millis(2000),
            anomaly_failure_threshold: 5,
            anomaly_window: Duration::from_secs(300),
            retention_days: 30,
            quarantine_retention_days: 7,
            sweep_request_interval: 500,
            sweep_interval: Duration::from_secs(3600),
            memory_api: None,
            profile_api: None,
            config_file: None,
        }
    }

    /// Retention policy view for the sweeper.
    pub fn retention_policy(&self) -> crate::storage::RetentionPolicy {
        crate::storage::RetentionPolicy {
            retention_days: self.retention_days,
            quarantine_retention_days: self.quarantine_retention_days,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".voicehooks").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path_str)
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var).ok().map(PathBuf::from)
}
