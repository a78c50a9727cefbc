//! Webhook artifact storage with a quarantine-first write path.
//!
//! Bytes land in quarantine before any trust decision. Validated payloads
//! are atomically renamed into main storage under a sanitized directory;
//! rejected payloads stay in quarantine for forensic inspection until the
//! retention sweep removes them. Nothing is ever visible under main
//! storage before validation succeeds.

pub mod sanitize;
pub mod sweeper;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

pub use sanitize::sanitize_segment;
pub use sweeper::{RetentionPolicy, RetentionSweeper, SweepReport, SweepScheduler, SweepSummary};

/// Errors from the storage layer.
///
/// These never decide a request's HTTP status; callers log them and move on.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The artifact kinds this store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Transcription,
    Audio,
    Failure,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::Audio => "audio",
            Self::Failure => "failure",
        }
    }

    /// File extension for the stored artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Audio => "mp3",
            _ => "json",
        }
    }
}

/// Sidecar record written next to every stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Artifact kind ("transcription", "audio", "failure", or a raw type
    /// string for payloads that never reached classification).
    pub webhook_type: String,

    /// Whether the payload passed signature validation.
    pub validated: bool,

    /// When the sidecar was written (ISO 8601).
    pub timestamp: DateTime<Utc>,

    /// Path of the artifact this sidecar describes.
    pub file_path: String,

    /// Size of the artifact in bytes.
    pub file_size: u64,

    /// Request that produced the artifact.
    pub request_id: Uuid,

    /// Resolved (sanitized) directory segment.
    pub directory_name: String,
}

/// A payload written to quarantine, awaiting a trust decision.
#[derive(Debug, Clone)]
pub struct HeldPayload {
    pub path: PathBuf,
    pub request_id: Uuid,
}

/// An artifact persisted under main storage.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub metadata: ArtifactMetadata,
}

/// Resolve the storage directory segment by strict priority:
/// explicit agent id, then caller phone, then conversation id.
///
/// The result is always sanitized, whatever the inputs were.
pub fn directory_for(
    agent_id: Option<&str>,
    caller_phone: Option<&str>,
    conversation_id: &str,
) -> String {
    let raw = agent_id.or(caller_phone).unwrap_or(conversation_id);
    sanitize_segment(raw)
}

/// Quarantine-first file store for webhook artifacts.
#[derive(Debug, Clone)]
pub struct WebhookStore {
    root: PathBuf,
    quarantine: PathBuf,
}

impl WebhookStore {
    pub fn new(root: PathBuf, quarantine: PathBuf) -> Self {
        Self { root, quarantine }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn quarantine_root(&self) -> &Path {
        &self.quarantine
    }

    /// Hold raw request bytes in quarantine before validation.
    pub async fn hold(&self, request_id: Uuid, bytes: &[u8]) -> Result<HeldPayload, StorageError> {
        let incoming = self.quarantine.join("incoming");
        fs::create_dir_all(&incoming).await?;

        let path = incoming.join(format!("{}.bin", request_id));
        fs::write(&path, bytes).await?;

        Ok(HeldPayload { path, request_id })
    }

    /// Record a trust decision for a payload that stays in quarantine.
    ///
    /// Used for rejected requests (validated=false) and for authenticated
    /// payloads that could not be classified. The file itself is retained
    /// until the quarantine sweep.
    pub async fn annotate_quarantined(
        &self,
        held: &HeldPayload,
        kind: &str,
        validated: bool,
    ) -> Result<PathBuf, StorageError> {
        let size = fs::metadata(&held.path).await.map(|m| m.len()).unwrap_or(0);
        self.write_sidecar(&held.path, kind, validated, size, held.request_id, "incoming")
            .await?;
        Ok(sidecar_path(&held.path))
    }

    /// Drop a held payload whose bytes were consumed elsewhere (e.g. an
    /// audio payload that went into the correlation cache).
    pub async fn discard_held(&self, held: HeldPayload) -> Result<(), StorageError> {
        fs::remove_file(&held.path).await?;
        Ok(())
    }

    /// Promote a validated quarantined payload into main storage.
    ///
    /// The move is a single rename so a reader never observes a partially
    /// written artifact. The sidecar is written after the rename.
    pub async fn promote(
        &self,
        held: HeldPayload,
        kind: ArtifactKind,
        directory: &str,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StoredArtifact, StorageError> {
        // Idempotent re-sanitization; callers normally pass sanitized
        // segments already, but this store never trusts its inputs.
        let directory = sanitize_segment(directory);
        let conversation_id = sanitize_segment(conversation_id);

        let size = fs::metadata(&held.path).await?.len();
        let target = self
            .resolve_target(&directory, &conversation_id, kind, now)
            .await?;

        fs::rename(&held.path, &target).await?;

        let metadata = self
            .write_sidecar(&target, kind.as_str(), true, size, held.request_id, &directory)
            .await?;
        tracing::info!(
            "Stored {} webhook at {} ({} bytes)",
            kind.as_str(),
            target.display(),
            size
        );

        Ok(StoredArtifact {
            path: target,
            size,
            metadata,
        })
    }

    /// Persist already-validated bytes (a joined audio blob) through the
    /// same staging-then-rename discipline used for promotion.
    pub async fn save_validated(
        &self,
        bytes: &[u8],
        kind: ArtifactKind,
        directory: &str,
        conversation_id: &str,
        request_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StoredArtifact, StorageError> {
        let staging = self.quarantine.join("staging");
        fs::create_dir_all(&staging).await?;

        let staged = staging.join(format!("{}_{}.tmp", request_id, kind.as_str()));
        fs::write(&staged, bytes).await?;

        self.promote(
            HeldPayload {
                path: staged,
                request_id,
            },
            kind,
            directory,
            conversation_id,
            now,
        )
        .await
    }

    /// Find a stored artifact for a conversation, searching every
    /// directory under main storage (the directory segment is not
    /// derivable from the conversation id alone).
    pub async fn find_artifact(
        &self,
        conversation_id: &str,
        kind: ArtifactKind,
    ) -> Result<Option<PathBuf>, StorageError> {
        if !self.root.exists() {
            return Ok(None);
        }

        let prefix = format!("{}_{}", sanitize_segment(conversation_id), kind.as_str());
        let mut dirs = fs::read_dir(&self.root).await?;

        while let Some(entry) = dirs.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(entry.path()).await?;
            while let Some(file) = files.next_entry().await? {
                if let Some(name) = file.file_name().to_str() {
                    if name.starts_with(&prefix) && !name.ends_with(".metadata.json") {
                        return Ok(Some(file.path()));
                    }
                }
            }
        }

        Ok(None)
    }

    /// Load the sidecar record for an artifact, if present.
    pub async fn load_metadata(
        &self,
        artifact_path: &Path,
    ) -> Result<Option<ArtifactMetadata>, StorageError> {
        let sidecar = sidecar_path(artifact_path);
        if !sidecar.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&sidecar).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Resolve the final artifact path, appending a timestamp suffix on
    /// collision rather than overwriting.
    async fn resolve_target(
        &self,
        directory: &str,
        conversation_id: &str,
        kind: ArtifactKind,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, StorageError> {
        let dir = self.root.join(directory);
        fs::create_dir_all(&dir).await?;

        let filename = format!("{}_{}.{}", conversation_id, kind.as_str(), kind.extension());
        let mut target = dir.join(&filename);

        if fs::try_exists(&target).await? {
            let suffix = now.format("%Y%m%d_%H%M%S");
            let filename = format!(
                "{}_{}_{}.{}",
                conversation_id,
                kind.as_str(),
                suffix,
                kind.extension()
            );
            tracing::warn!("File exists, saving as {}", filename);
            target = dir.join(filename);
        }

        Ok(target)
    }

    async fn write_sidecar(
        &self,
        artifact_path: &Path,
        kind: &str,
        validated: bool,
        size: u64,
        request_id: Uuid,
        directory: &str,
    ) -> Result<ArtifactMetadata, StorageError> {
        let metadata = ArtifactMetadata {
            webhook_type: kind.to_string(),
            validated,
            timestamp: Utc::now(),
            file_path: artifact_path.display().to_string(),
            file_size: size,
            request_id,
            directory_name: directory.to_string(),
        };

        let sidecar = sidecar_path(artifact_path);
        let json = serde_json::to_string_pretty(&metadata)?;
        fs::write(&sidecar, json).await?;

        Ok(metadata)
    }
}

/// Sidecar path for an artifact: `{filename}.metadata.json`.
pub fn sidecar_path(artifact_path: &Path) -> PathBuf {
    let mut name = artifact_path.as_os_str().to_os_string();
    name.push(".metadata.json");
    PathBuf::from(name)
}
