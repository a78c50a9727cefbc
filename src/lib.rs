//! voicehooks - Signed voice-conversation webhook ingestion
//!
//! Ingests cryptographically signed webhook notifications describing the
//! lifecycle of remote voice conversations, authenticates them, persists
//! them under sanitized identifiers, and joins the two halves of each
//! call (transcription record and audio blob) arriving in either order.
//!
//! # Architecture
//!
//! Everything hangs off a quarantine-first trust boundary:
//! - Raw bytes are held in quarantine until the HMAC signature checks out
//! - Validated payloads are atomically renamed into main storage
//! - Rejected payloads stay in quarantine for forensic inspection
//! - Audio and transcription halves meet in a TTL-bounded correlation cache
//!
//! # Modules
//!
//! - `auth`: Signature validation (HMAC-SHA256, constant-time compare)
//! - `storage`: Sanitization, quarantine, promotion, retention sweeps
//! - `cache`: Correlation cache (remote primary, in-process fallback)
//! - `monitor`: Sliding-window anomaly tracking of auth failures
//! - `gateway`: The request pipeline tying it all together
//! - `clients`: Downstream collaborators (memory store, profile API)
//! - `cli`: Operator command-line interface

pub mod auth;
pub mod cache;
pub mod cli;
pub mod clients;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod monitor;
pub mod storage;

// Re-export main types at crate root for convenience
pub use auth::{validate, ValidationError};
pub use cache::{BlobCache, MemoryCache, RemoteCache, TieredCache};
pub use config::Settings;
pub use domain::{parse_webhook, ParsedWebhook, WebhookEvent};
pub use gateway::{SignedRequest, WebhookGateway, WebhookResponse};
pub use monitor::AnomalyMonitor;
pub use storage::{
    sanitize_segment, ArtifactKind, RetentionPolicy, RetentionSweeper, WebhookStore,
};
