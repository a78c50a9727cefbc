//! HMAC signature validation for inbound webhooks.
//!
//! The platform signs every webhook delivery with a header of the form
//! `t=<unix-seconds>,v0=<hex-hmac-sha256>` where the digest covers
//! `{timestamp}.{raw body}`. Validation runs before any byte of the body
//! is interpreted: header presence, header format, timestamp freshness,
//! then the digest itself, in that order.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default timestamp tolerance (30 minutes).
pub const DEFAULT_TOLERANCE_SECS: i64 = 30 * 60;

/// Reasons a signed request fails authentication.
///
/// Each variant maps to a distinct `401` reason string. A request that
/// fails here is never retried and never parsed further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing signature header")]
    MissingHeader,

    #[error("Invalid signature format")]
    MalformedHeader,

    #[error("Timestamp outside tolerance")]
    StaleTimestamp,

    #[error("Invalid signature")]
    InvalidSignature,
}

/// Proof that a request passed signature validation.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedSignature {
    /// The signing timestamp extracted from the header (unix seconds).
    pub timestamp: i64,

    /// Signed age of the request at validation time (`now - timestamp`).
    pub age_secs: i64,
}

/// Validate a signature header against the raw request body.
///
/// `now_unix` is passed explicitly so callers control the clock; the
/// gateway passes the request receipt time, tests pass simulated times.
pub fn validate(
    header: Option<&str>,
    body: &[u8],
    secret: &str,
    now_unix: i64,
    tolerance_secs: i64,
) -> Result<ValidatedSignature, ValidationError> {
    let header = header.ok_or(ValidationError::MissingHeader)?;
    let (timestamp, provided) = parse_header(header)?;

    // Freshness before any cryptographic work. Future-dated timestamps are
    // rejected with the same reason as stale ones.
    let age = now_unix - timestamp;
    if age.abs() > tolerance_secs {
        return Err(ValidationError::StaleTimestamp);
    }

    let expected = compute_digest(secret, timestamp, body);

    // Constant-time comparison so a mismatch position is not observable.
    if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
        Ok(ValidatedSignature {
            timestamp,
            age_secs: age,
        })
    } else {
        Err(ValidationError::InvalidSignature)
    }
}

/// Parse `t=<integer>,v0=<hex>` into (timestamp, digest bytes).
///
/// Both parts are trimmed of surrounding whitespace to tolerate header
/// formatting variance. Anything else is a malformed header.
fn parse_header(header: &str) -> Result<(i64, Vec<u8>), ValidationError> {
    let mut parts = header.splitn(2, ',');

    let timestamp_part = parts.next().ok_or(ValidationError::MalformedHeader)?.trim();
    let digest_part = parts.next().ok_or(ValidationError::MalformedHeader)?.trim();

    let timestamp = timestamp_part
        .strip_prefix("t=")
        .ok_or(ValidationError::MalformedHeader)?
        .trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::MalformedHeader)?;

    let digest_hex = digest_part
        .strip_prefix("v0=")
        .ok_or(ValidationError::MalformedHeader)?
        .trim();

    let digest = hex::decode(digest_hex).map_err(|_| ValidationError::MalformedHeader)?;
    if digest.len() != 32 {
        return Err(ValidationError::MalformedHeader);
    }

    Ok((timestamp, digest))
}

/// HMAC-SHA256 over `{timestamp}.{body}`.
fn compute_digest(secret: &str, timestamp: i64, body: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.finalize().into_bytes().into()
}

/// Produce a valid signature header for a body at a given timestamp.
///
/// Used by the `sign` CLI command to diagnose deliveries, and by tests.
pub fn signature_header(secret: &str, body: &[u8], timestamp: i64) -> String {
    let digest = compute_digest(secret, timestamp, body);
    format!("t={},v0={}", timestamp, hex::encode(digest))
}
