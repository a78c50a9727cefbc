//! Data structures for webhook payloads and request envelopes.

pub mod payload;

pub use payload::{
    extract_user_id, parse_webhook, AudioData, FailureData, ParsedWebhook, PayloadError,
    TranscriptionData, WebhookEvent,
};
