//! Signature Validation Integration Tests
//!
//! Validates the HMAC scheme against an independent RFC 2104 reference
//! implementation and exercises the documented rejection scenarios.

use sha2::{Digest, Sha256};
use voicehooks::auth::{self, ValidationError, DEFAULT_TOLERANCE_SECS};

/// Independent HMAC-SHA256, straight from RFC 2104, built on the raw
/// hash only. Anything the production path computes must match this.
fn reference_hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    const BLOCK: usize = 64;

    let mut key_block = [0u8; BLOCK];
    if key.len() > BLOCK {
        key_block[..32].copy_from_slice(&Sha256::digest(key));
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha256::new();
    inner.update(key_block.map(|b| b ^ 0x36));
    inner.update(message);
    let inner = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(key_block.map(|b| b ^ 0x5c));
    outer.update(inner);
    outer.finalize().into()
}

fn reference_header(secret: &str, body: &[u8], timestamp: i64) -> String {
    let mut message = timestamp.to_string().into_bytes();
    message.push(b'.');
    message.extend_from_slice(body);
    let digest = reference_hmac_sha256(secret.as_bytes(), &message);
    format!("t={},v0={}", timestamp, hex::encode(digest))
}

#[test]
fn production_digest_matches_reference_implementation() {
    let cases: &[(&str, i64, &[u8])] = &[
        ("s3cret", 1_705_327_800, br#"{"type":"x"}"#),
        ("", 0, b""),
        ("wsec_0123456789abcdef", 1_700_000_000, b"{}"),
        (
            "a-much-longer-webhook-secret-that-exceeds-the-sha256-block-size-of-64-bytes!!",
            2_000_000_000,
            br#"{"type":"post_call_audio","data":{"conversation_id":"c1"}}"#,
        ),
    ];

    for (secret, timestamp, body) in cases {
        let expected = reference_header(secret, body, *timestamp);
        let produced = auth::signature_header(secret, body, *timestamp);
        assert_eq!(produced, expected, "digest mismatch for secret {secret:?}");

        // And the validator accepts the reference-computed header.
        let result = auth::validate(
            Some(&expected),
            body,
            secret,
            *timestamp,
            DEFAULT_TOLERANCE_SECS,
        );
        assert!(result.is_ok());
    }
}

#[test]
fn scenario_a_valid_header_at_signing_time() {
    let header = reference_header("s3cret", br#"{"type":"x"}"#, 1_705_327_800);

    let result = auth::validate(
        Some(&header),
        br#"{"type":"x"}"#,
        "s3cret",
        1_705_327_800,
        DEFAULT_TOLERANCE_SECS,
    );

    assert!(result.is_ok());
}

#[test]
fn scenario_b_same_header_1900_seconds_later() {
    let header = reference_header("s3cret", br#"{"type":"x"}"#, 1_705_327_800);

    let result = auth::validate(
        Some(&header),
        br#"{"type":"x"}"#,
        "s3cret",
        1_705_329_700,
        1800,
    );

    assert_eq!(result.unwrap_err(), ValidationError::StaleTimestamp);
}

#[test]
fn flipping_any_hex_character_invalidates() {
    let body = br#"{"type":"x"}"#;
    let now = 1_705_327_800;
    let header = auth::signature_header("s3cret", body, now);
    let digest_start = header.find("v0=").unwrap() + 3;

    for i in digest_start..header.len() {
        let original = header.as_bytes()[i];
        let flipped = if original == b'f' { b'0' } else { b'f' };
        if flipped == original {
            continue;
        }

        let mut tampered = header.clone().into_bytes();
        tampered[i] = flipped;
        let tampered = String::from_utf8(tampered).unwrap();

        let result = auth::validate(Some(&tampered), body, "s3cret", now, DEFAULT_TOLERANCE_SECS);
        assert_eq!(
            result.unwrap_err(),
            ValidationError::InvalidSignature,
            "flip at offset {i} was accepted"
        );
    }
}

#[test]
fn stale_wins_over_signature_correctness() {
    let body = br#"{"type":"x"}"#;
    let signed_at = 1_705_327_800;

    // Correct signature, timestamp too old.
    let header = auth::signature_header("s3cret", body, signed_at);
    let result = auth::validate(Some(&header), body, "s3cret", signed_at + 7200, 1800);
    assert_eq!(result.unwrap_err(), ValidationError::StaleTimestamp);

    // Garbage signature, timestamp too far in the future: still reported
    // as stale because no crypto runs on out-of-window requests.
    let bogus = format!("t={},v0={}", signed_at + 7200, "ab".repeat(32));
    let result = auth::validate(Some(&bogus), body, "s3cret", signed_at, 1800);
    assert_eq!(result.unwrap_err(), ValidationError::StaleTimestamp);
}

#[test]
fn each_failure_reason_is_distinct() {
    let body = br#"{"type":"x"}"#;
    let now = 1_705_327_800;
    let good = auth::signature_header("s3cret", body, now);

    assert_eq!(
        auth::validate(None, body, "s3cret", now, 1800).unwrap_err(),
        ValidationError::MissingHeader
    );
    assert_eq!(
        auth::validate(Some("nonsense"), body, "s3cret", now, 1800).unwrap_err(),
        ValidationError::MalformedHeader
    );
    assert_eq!(
        auth::validate(Some(&good), body, "s3cret", now + 3600, 1800).unwrap_err(),
        ValidationError::StaleTimestamp
    );
    assert_eq!(
        auth::validate(Some(&good), body, "wrong-secret", now, 1800).unwrap_err(),
        ValidationError::InvalidSignature
    );
}
