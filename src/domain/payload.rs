//! Typed model for the loosely-typed webhook payloads.
//!
//! Payloads are JSON objects with a discriminating `type` field and a
//! `data` object. Each kind this core understands gets a closed variant
//! carrying its required fields; everything else a payload contains
//! rides along in an untyped bag so downstream consumers see the
//! original record intact.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a validated body could not be turned into a webhook event.
/// These are the only post-authentication failures that surface as `400`.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Invalid JSON payload")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Payload missing webhook type")]
    MissingType,

    #[error("Invalid {kind} payload: {source}")]
    InvalidEvent {
        kind: String,
        source: serde_json::Error,
    },
}

/// A transcription record: the descriptive half of a call.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionData {
    pub conversation_id: String,

    #[serde(default)]
    pub agent_id: Option<String>,

    #[serde(default)]
    pub metadata: Value,

    #[serde(default)]
    pub conversation_initiation_client_data: Value,

    /// Fields this core does not interpret (transcript turns, analysis,
    /// timing data). Preserved for storage and downstream handoff.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An audio record: the binary half of a call, base64-encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioData {
    pub conversation_id: String,

    #[serde(default)]
    pub full_audio: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A call-initiation failure report.
#[derive(Debug, Clone, Deserialize)]
pub struct FailureData {
    pub conversation_id: String,

    #[serde(default)]
    pub agent_id: Option<String>,

    /// Failure payloads occasionally carry partial audio.
    #[serde(default)]
    pub full_audio: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The webhook kinds this core acts on.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Transcription(TranscriptionData),
    Audio(AudioData),
    InitiationFailure(FailureData),
}

impl WebhookEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            Self::Transcription(data) => &data.conversation_id,
            Self::Audio(data) => &data.conversation_id,
            Self::InitiationFailure(data) => &data.conversation_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transcription(_) => "post_call_transcription",
            Self::Audio(_) => "post_call_audio",
            Self::InitiationFailure(_) => "call_initiation_failure",
        }
    }
}

/// Result of classifying a validated payload.
#[derive(Debug)]
pub enum ParsedWebhook {
    /// A kind this core acts on.
    Event(WebhookEvent),

    /// A well-formed payload of a kind this core only acknowledges.
    Unrecognized(String),
}

/// Classify a validated JSON payload by its `type` field.
pub fn parse_webhook(value: &Value) -> Result<ParsedWebhook, PayloadError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(PayloadError::MissingType)?;

    let data = value.get("data").cloned().unwrap_or(Value::Null);

    let event = match kind {
        "post_call_transcription" => WebhookEvent::Transcription(parse_data(kind, data)?),
        "post_call_audio" => WebhookEvent::Audio(parse_data(kind, data)?),
        "call_initiation_failure" => WebhookEvent::InitiationFailure(parse_data(kind, data)?),
        other => return Ok(ParsedWebhook::Unrecognized(other.to_string())),
    };

    Ok(ParsedWebhook::Event(event))
}

fn parse_data<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> Result<T, PayloadError> {
    serde_json::from_value(data).map_err(|source| PayloadError::InvalidEvent {
        kind: kind.to_string(),
        source,
    })
}

/// Extract the caller/user identity from a transcription record.
///
/// Priority order, highest first:
/// 1. `dynamic_variables.system__caller_id` (stable across calls from
///    the same caller)
/// 2. `conversation_initiation_client_data.user_id`
/// 3. `metadata.user_id`
/// 4. `dynamic_variables.user_id`
/// 5. `metadata.caller_id` or `metadata.from`
pub fn extract_user_id(data: &TranscriptionData) -> Option<String> {
    let dynamic_vars = data
        .conversation_initiation_client_data
        .get("dynamic_variables");

    if let Some(id) = dynamic_vars
        .and_then(|vars| vars.get("system__caller_id"))
        .and_then(as_identity)
    {
        return Some(id);
    }

    if let Some(id) = data
        .conversation_initiation_client_data
        .get("user_id")
        .and_then(as_identity)
    {
        return Some(id);
    }

    if let Some(id) = data.metadata.get("user_id").and_then(as_identity) {
        return Some(id);
    }

    if let Some(id) = dynamic_vars
        .and_then(|vars| vars.get("user_id"))
        .and_then(as_identity)
    {
        return Some(id);
    }

    data.metadata
        .get("caller_id")
        .or_else(|| data.metadata.get("from"))
        .and_then(as_identity)
}

/// Identity values may arrive as strings or numbers; normalize to a
/// trimmed non-empty string.
fn as_identity(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
