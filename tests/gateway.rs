//! Gateway Integration Tests
//!
//! End-to-end flows through `WebhookGateway::handle`: authentication,
//! storage layout, audio/transcription joins in both arrival orders, and
//! anomaly accounting. Each test runs against its own temp-dir state.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;
use voicehooks::auth;
use voicehooks::{Settings, SignedRequest, WebhookGateway};

const SECRET: &str = "wsec_test_secret";
const NOW: i64 = 1_705_327_800;

fn at(unix: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(unix, 0).unwrap()
}

fn gateway(temp: &TempDir) -> WebhookGateway {
    WebhookGateway::new(Settings::for_root(temp.path(), SECRET)).unwrap()
}

/// A correctly signed request from a fixed source, at simulated time.
fn signed(body: &[u8], now: i64) -> SignedRequest {
    let header = auth::signature_header(SECRET, body, now);
    SignedRequest::new(
        body.to_vec(),
        Some(header),
        Some("1.2.3.4".to_string()),
    )
    .with_received_at(at(now))
}

fn transcription_body(conversation_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "post_call_transcription",
        "event_timestamp": NOW,
        "data": {
            "conversation_id": conversation_id,
            "agent_id": "agent_9",
            "transcript": [{"role": "user", "message": "hello"}],
            "conversation_initiation_client_data": {
                "dynamic_variables": {"system__caller_id": "+15550001111"}
            }
        }
    }))
    .unwrap()
}

fn audio_body(conversation_id: &str, audio: &[u8]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "post_call_audio",
        "data": {
            "conversation_id": conversation_id,
            "full_audio": BASE64.encode(audio),
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn transcription_is_stored_under_caller_directory() {
    let temp = TempDir::new().unwrap();
    let gateway = gateway(&temp);

    let response = gateway.handle(signed(&transcription_body("conv_1"), NOW)).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body["status"], "received");
    assert_eq!(response.body["joined"], false);

    let artifact = temp
        .path()
        .join("webhooks/+15550001111/conv_1_transcription.json");
    assert!(artifact.exists(), "artifact missing at {}", artifact.display());

    // Stored bytes are the authenticated bytes, verbatim.
    assert_eq!(
        std::fs::read(&artifact).unwrap(),
        transcription_body("conv_1")
    );

    // Sidecar records the validated promotion.
    let metadata = gateway.store().load_metadata(&artifact).await.unwrap().unwrap();
    assert!(metadata.validated);
    assert_eq!(metadata.webhook_type, "transcription");
    assert_eq!(metadata.directory_name, "+15550001111");

    // Quarantine holds nothing once the payload is promoted.
    let incoming = temp.path().join("quarantine/incoming");
    let leftover: Vec<_> = std::fs::read_dir(&incoming)
        .map(|entries| entries.flatten().collect())
        .unwrap_or_default();
    assert!(leftover.is_empty(), "quarantine not emptied: {leftover:?}");
}

#[tokio::test]
async fn audio_before_transcription_joins_on_arrival() {
    let temp = TempDir::new().unwrap();
    let gateway = gateway(&temp);
    let mp3 = b"ID3\x03fake-mp3-bytes";

    // Audio half first: acknowledged, parked in the cache.
    let response = gateway.handle(signed(&audio_body("conv_1", mp3), NOW)).await;
    assert_eq!(response.status, 200);
    assert!(!temp.path().join("webhooks").exists());

    // Transcription second: join happens on this request.
    let response = gateway
        .handle(signed(&transcription_body("conv_1"), NOW + 5))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["joined"], true);

    let audio_path = temp.path().join("webhooks/+15550001111/conv_1_audio.mp3");
    assert_eq!(std::fs::read(&audio_path).unwrap(), mp3);

    // The pending blob was consumed exactly once: a duplicate
    // transcription does not join again.
    let response = gateway
        .handle(signed(&transcription_body("conv_1"), NOW + 10))
        .await;
    assert_eq!(response.body["joined"], false);
}

#[tokio::test]
async fn audio_after_transcription_is_stored_immediately() {
    let temp = TempDir::new().unwrap();
    let gateway = gateway(&temp);
    let mp3 = b"ID3\x03later-audio";

    gateway.handle(signed(&transcription_body("conv_1"), NOW)).await;
    let response = gateway
        .handle(signed(&audio_body("conv_1", mp3), NOW + 5))
        .await;
    assert_eq!(response.status, 200);

    // No cache round-trip: the blob went straight to the caller
    // directory resolved from the stored transcription.
    let audio_path = temp.path().join("webhooks/+15550001111/conv_1_audio.mp3");
    assert_eq!(std::fs::read(&audio_path).unwrap(), mp3);
}

#[tokio::test]
async fn invalid_signature_is_rejected_and_quarantined() {
    let temp = TempDir::new().unwrap();
    let gateway = gateway(&temp);

    let body = transcription_body("conv_1");
    let header = auth::signature_header("wrong-secret", &body, NOW);
    let request = SignedRequest::new(body, Some(header), Some("1.2.3.4".to_string()))
        .with_received_at(at(NOW));

    let response = gateway.handle(request).await;

    assert_eq!(response.status, 401);
    assert_eq!(response.body["detail"], "Invalid signature");

    // Nothing reached main storage.
    assert!(!temp.path().join("webhooks").exists());

    // The payload stays in quarantine with a validated=false sidecar.
    let incoming = temp.path().join("quarantine/incoming");
    let names: Vec<String> = std::fs::read_dir(&incoming)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert!(names.iter().any(|n| n.ends_with(".bin")));
    assert!(names.iter().any(|n| n.ends_with(".metadata.json")));

    // And the failure was recorded against the source.
    assert_eq!(gateway.monitor().count("1.2.3.4", at(NOW)), 1);
}

#[tokio::test]
async fn each_auth_failure_reason_maps_to_401() {
    let temp = TempDir::new().unwrap();
    let gateway = gateway(&temp);
    let body = transcription_body("conv_1");

    let missing = SignedRequest::new(body.clone(), None, None).with_received_at(at(NOW));
    let response = gateway.handle(missing).await;
    assert_eq!(response.status, 401);
    assert_eq!(response.body["detail"], "Missing signature header");

    let malformed = SignedRequest::new(body.clone(), Some("t=?".to_string()), None)
        .with_received_at(at(NOW));
    let response = gateway.handle(malformed).await;
    assert_eq!(response.status, 401);
    assert_eq!(response.body["detail"], "Invalid signature format");

    let stale_header = auth::signature_header(SECRET, &body, NOW - 7200);
    let stale = SignedRequest::new(body, Some(stale_header), None).with_received_at(at(NOW));
    let response = gateway.handle(stale).await;
    assert_eq!(response.status, 401);
    assert_eq!(response.body["detail"], "Timestamp outside tolerance");
}

#[tokio::test]
async fn authenticated_garbage_body_is_bad_request() {
    let temp = TempDir::new().unwrap();
    let gateway = gateway(&temp);

    let response = gateway.handle(signed(b"not json at all", NOW)).await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body["detail"], "Invalid JSON payload");

    // Authenticated but unparsable: no storage write.
    assert!(!temp.path().join("webhooks").exists());
}

#[tokio::test]
async fn known_kind_with_missing_fields_is_bad_request() {
    let temp = TempDir::new().unwrap();
    let gateway = gateway(&temp);

    let body = serde_json::to_vec(&json!({
        "type": "post_call_transcription",
        "data": {"no_conversation_id": true}
    }))
    .unwrap();

    let response = gateway.handle(signed(&body, NOW)).await;
    assert_eq!(response.status, 400);
}

#[tokio::test]
async fn unrecognized_kind_is_acknowledged() {
    let temp = TempDir::new().unwrap();
    let gateway = gateway(&temp);

    let body = serde_json::to_vec(&json!({
        "type": "agent_settings_updated",
        "data": {"agent_id": "agent_9"}
    }))
    .unwrap();

    let response = gateway.handle(signed(&body, NOW)).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, json!({"status": "received"}));
}

#[tokio::test]
async fn failure_report_lands_under_agent_directory() {
    let temp = TempDir::new().unwrap();
    let gateway = gateway(&temp);

    let body = serde_json::to_vec(&json!({
        "type": "call_initiation_failure",
        "data": {
            "conversation_id": "conv_9",
            "agent_id": "agent_9",
            "reason": "no_answer",
        }
    }))
    .unwrap();

    let response = gateway.handle(signed(&body, NOW)).await;
    assert_eq!(response.status, 200);

    let artifact = temp.path().join("webhooks/agent_9/conv_9_failure.json");
    assert!(artifact.exists());
}

#[tokio::test]
async fn hostile_conversation_id_cannot_escape_storage_root() {
    let temp = TempDir::new().unwrap();
    let gateway = gateway(&temp);

    let body = serde_json::to_vec(&json!({
        "type": "call_initiation_failure",
        "data": {"conversation_id": "../../escape"}
    }))
    .unwrap();

    let response = gateway.handle(signed(&body, NOW)).await;
    assert_eq!(response.status, 200);

    // Everything written stayed under the temp root.
    assert!(!temp.path().parent().unwrap().join("escape").exists());
    let stored = gateway
        .store()
        .find_artifact("../../escape", voicehooks::ArtifactKind::Failure)
        .await
        .unwrap();
    let stored = stored.expect("artifact stored under sanitized name");
    assert!(stored.starts_with(temp.path().join("webhooks")));
}

#[tokio::test]
async fn scenario_e_five_failures_one_alert() {
    let temp = TempDir::new().unwrap();
    let gateway = gateway(&temp);
    let body = transcription_body("conv_1");

    for i in 0..5 {
        let header = auth::signature_header("wrong-secret", &body, NOW + i);
        let request = SignedRequest::new(
            body.clone(),
            Some(header),
            Some("1.2.3.4".to_string()),
        )
        .with_received_at(at(NOW + i));
        let response = gateway.handle(request).await;
        assert_eq!(response.status, 401);
    }

    assert_eq!(gateway.monitor().count("1.2.3.4", at(NOW + 5)), 5);
    assert_eq!(gateway.monitor().alerts_emitted(), 1);
}

#[tokio::test]
async fn duplicate_transcription_never_overwrites() {
    let temp = TempDir::new().unwrap();
    let gateway = gateway(&temp);

    gateway.handle(signed(&transcription_body("conv_1"), NOW)).await;
    gateway.handle(signed(&transcription_body("conv_1"), NOW + 60)).await;

    let dir = temp.path().join("webhooks/+15550001111");
    let artifacts: Vec<String> = std::fs::read_dir(&dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| !n.ends_with(".metadata.json"))
        .collect();

    assert_eq!(artifacts.len(), 2, "collision must suffix, not overwrite: {artifacts:?}");
}
