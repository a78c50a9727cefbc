//! The webhook request pipeline.
//!
//! One [`WebhookGateway`] is constructed at process start and handed to
//! the HTTP layer; it owns every piece of shared state (storage,
//! correlation cache, anomaly monitor, sweep scheduler) so tests can run
//! isolated instances. `handle` is the single entry point: it takes the
//! raw signed request and returns the status code and body the HTTP
//! layer should emit.
//!
//! Authentication decides everything. A request that fails validation is
//! recorded by the anomaly monitor and rejected without touching storage
//! or the correlation cache; only after `Ok` is a single byte of the
//! body interpreted.

use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth;
use crate::cache::{BlobCache, RemoteCache, TieredCache};
use crate::clients::{MemoryClient, ProfileClient};
use crate::config::Settings;
use crate::domain::{
    extract_user_id, parse_webhook, AudioData, FailureData, ParsedWebhook, TranscriptionData,
    WebhookEvent,
};
use crate::monitor::AnomalyMonitor;
use crate::storage::{
    directory_for, sanitize_segment, ArtifactKind, HeldPayload, RetentionSweeper, SweepScheduler,
    WebhookStore,
};

/// One inbound webhook delivery. Exists only for the duration of the
/// request.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub body: Vec<u8>,
    pub signature: Option<String>,
    /// Source identity (client IP or equivalent) for anomaly tracking.
    pub source: Option<String>,
    pub request_id: Uuid,
    pub received_at: DateTime<Utc>,
}

impl SignedRequest {
    pub fn new(body: Vec<u8>, signature: Option<String>, source: Option<String>) -> Self {
        Self {
            body,
            signature,
            source,
            request_id: Uuid::new_v4(),
            received_at: Utc::now(),
        }
    }

    /// Override the receipt time (simulated clocks in tests).
    pub fn with_received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }
}

/// What the HTTP layer should answer.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
}

impl WebhookResponse {
    fn received(joined: Option<bool>) -> Self {
        let body = match joined {
            Some(joined) => json!({"status": "received", "joined": joined}),
            None => json!({"status": "received"}),
        };
        Self { status: 200, body }
    }

    fn unauthorized(reason: &str) -> Self {
        Self {
            status: 401,
            body: json!({"detail": reason}),
        }
    }

    fn bad_request(reason: &str) -> Self {
        Self {
            status: 400,
            body: json!({"detail": reason}),
        }
    }
}

/// Owns all per-process webhook state; see module docs.
pub struct WebhookGateway {
    settings: Settings,
    store: WebhookStore,
    cache: Arc<TieredCache>,
    monitor: AnomalyMonitor,
    scheduler: SweepScheduler,
    sweeper: Arc<RetentionSweeper>,
    memory: Option<Arc<MemoryClient>>,
    profiles: Option<Arc<ProfileClient>>,
}

impl WebhookGateway {
    pub fn new(settings: Settings) -> Result<Self> {
        anyhow::ensure!(
            !settings.hmac_secret.is_empty(),
            "HMAC secret must be configured (VOICEHOOKS_HMAC_SECRET or webhook.hmac_secret)"
        );

        let remote = match &settings.remote_cache_url {
            Some(url) => Some(
                RemoteCache::new(url, settings.remote_cache_timeout)
                    .context("Failed to build remote cache client")?,
            ),
            None => None,
        };

        let memory = match &settings.memory_api {
            Some(endpoint) => Some(Arc::new(MemoryClient::new(&endpoint.url, &endpoint.api_key)?)),
            None => None,
        };
        let profiles = match &settings.profile_api {
            Some(endpoint) => Some(Arc::new(ProfileClient::new(
                &endpoint.url,
                &endpoint.api_key,
            )?)),
            None => None,
        };

        let store = WebhookStore::new(
            settings.storage_root.clone(),
            settings.quarantine_root.clone(),
        );
        let sweeper = Arc::new(RetentionSweeper::new(
            settings.storage_root.clone(),
            settings.quarantine_root.clone(),
            settings.retention_policy(),
        ));

        Ok(Self {
            store,
            cache: Arc::new(TieredCache::new(remote)),
            monitor: AnomalyMonitor::new(
                settings.anomaly_failure_threshold,
                settings.anomaly_window,
            ),
            scheduler: SweepScheduler::new(
                settings.sweep_request_interval,
                settings.sweep_interval,
            ),
            sweeper,
            memory,
            profiles,
            settings,
        })
    }

    pub fn monitor(&self) -> &AnomalyMonitor {
        &self.monitor
    }

    pub fn store(&self) -> &WebhookStore {
        &self.store
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Handle one signed webhook delivery end to end.
    pub async fn handle(&self, request: SignedRequest) -> WebhookResponse {
        self.maybe_sweep();

        // Bytes go to quarantine before any trust decision. A quarantine
        // write failure is logged but does not fail the request; the
        // in-memory bytes still drive the rest of the pipeline.
        let held = match self.store.hold(request.request_id, &request.body).await {
            Ok(held) => Some(held),
            Err(e) => {
                tracing::error!("Failed to quarantine request {}: {}", request.request_id, e);
                None
            }
        };

        if let Err(reason) = auth::validate(
            request.signature.as_deref(),
            &request.body,
            &self.settings.hmac_secret,
            request.received_at.timestamp(),
            self.settings.timestamp_tolerance_secs,
        ) {
            if let Some(source) = &request.source {
                self.monitor.record(source, request.received_at);
            }
            if let Some(held) = &held {
                if let Err(e) = self.store.annotate_quarantined(held, "unknown", false).await {
                    tracing::error!("Failed to annotate rejected payload: {}", e);
                }
            }
            tracing::warn!(
                "HMAC validation failed for request {} from {:?}: {}",
                request.request_id,
                request.source,
                reason
            );
            return WebhookResponse::unauthorized(&reason.to_string());
        }

        let payload: Value = match serde_json::from_slice(&request.body) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Invalid JSON in webhook request {}: {}", request.request_id, e);
                self.annotate(&held, "unparsed", true).await;
                return WebhookResponse::bad_request("Invalid JSON payload");
            }
        };

        let event = match parse_webhook(&payload) {
            Ok(ParsedWebhook::Event(event)) => event,
            Ok(ParsedWebhook::Unrecognized(kind)) => {
                tracing::info!("Received {} webhook (acknowledged, not processed)", kind);
                self.annotate(&held, &kind, true).await;
                return WebhookResponse::received(None);
            }
            Err(e) => {
                tracing::error!("Unusable webhook payload {}: {}", request.request_id, e);
                self.annotate(&held, "unparsed", true).await;
                return WebhookResponse::bad_request(&e.to_string());
            }
        };

        match event {
            WebhookEvent::Audio(data) => self.process_audio(data, held, &request).await,
            WebhookEvent::Transcription(data) => {
                self.process_transcription(data, payload, held, &request).await
            }
            WebhookEvent::InitiationFailure(data) => {
                self.process_failure(data, held, &request).await
            }
        }
    }

    /// Audio half: store immediately when the transcription is already
    /// on disk, otherwise park the blob in the correlation cache.
    async fn process_audio(
        &self,
        data: AudioData,
        held: Option<HeldPayload>,
        request: &SignedRequest,
    ) -> WebhookResponse {
        let conversation = sanitize_segment(&data.conversation_id);

        let encoded = match &data.full_audio {
            Some(encoded) => encoded,
            None => {
                tracing::warn!("No full_audio in audio webhook for {}", conversation);
                self.annotate(&held, "audio", true).await;
                return WebhookResponse::received(None);
            }
        };

        let audio = match BASE64.decode(encoded.as_bytes()) {
            Ok(audio) => audio,
            Err(e) => {
                tracing::error!("Error decoding audio webhook for {}: {}", conversation, e);
                self.annotate(&held, "audio", true).await;
                return WebhookResponse::bad_request("Invalid audio encoding");
            }
        };

        let transcription = self
            .store
            .find_artifact(&data.conversation_id, ArtifactKind::Transcription)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("Error searching for transcription: {}", e);
                None
            });

        match transcription {
            Some(path) => {
                // Out-of-order arrival already resolved: the descriptive
                // half landed first, so this blob goes straight to disk
                // beside it.
                let caller = self.caller_from_stored_transcription(&path).await;
                let directory = directory_for(None, caller.as_deref(), &conversation);
                if let Err(e) = self
                    .store
                    .save_validated(
                        &audio,
                        ArtifactKind::Audio,
                        &directory,
                        &conversation,
                        request.request_id,
                        request.received_at,
                    )
                    .await
                {
                    tracing::error!("Error saving audio for {}: {}", conversation, e);
                }
            }
            None => {
                if let Err(e) = self
                    .cache
                    .put(&conversation, audio, self.settings.correlation_ttl)
                    .await
                {
                    tracing::warn!("Failed to cache audio for {}: {}", conversation, e);
                } else {
                    tracing::info!(
                        "Cached audio for conversation {}, waiting for transcription",
                        conversation
                    );
                }
            }
        }

        // The raw audio envelope is not retained; its payload either
        // went to disk or into the cache.
        if let Some(held) = held {
            if let Err(e) = self.store.discard_held(held).await {
                tracing::debug!("Failed to drop held audio envelope: {}", e);
            }
        }

        WebhookResponse::received(None)
    }

    /// Descriptive half: persist, join any waiting audio, then hand off
    /// downstream in the background.
    async fn process_transcription(
        &self,
        data: TranscriptionData,
        payload: Value,
        held: Option<HeldPayload>,
        request: &SignedRequest,
    ) -> WebhookResponse {
        let conversation = sanitize_segment(&data.conversation_id);
        let caller = extract_user_id(&data);
        let directory = directory_for(None, caller.as_deref(), &conversation);

        self.persist_descriptive(
            ArtifactKind::Transcription,
            &directory,
            &conversation,
            held,
            request,
        )
        .await;

        let joined = match self.cache.take(&conversation).await {
            Ok(Some(audio)) => {
                let saved = self
                    .store
                    .save_validated(
                        &audio,
                        ArtifactKind::Audio,
                        &directory,
                        &conversation,
                        request.request_id,
                        request.received_at,
                    )
                    .await;
                match saved {
                    Ok(artifact) => {
                        tracing::info!(
                            "Joined cached audio for conversation {} at {}",
                            conversation,
                            artifact.path.display()
                        );
                        true
                    }
                    Err(e) => {
                        tracing::error!("Error saving joined audio for {}: {}", conversation, e);
                        false
                    }
                }
            }
            Ok(None) => {
                tracing::debug!(
                    "No cached audio for conversation {} (not received, expired, or already stored)",
                    conversation
                );
                false
            }
            Err(e) => {
                tracing::warn!("Correlation cache error for {}: {}", conversation, e);
                false
            }
        };

        // The outcome is fixed here; background work cannot change it.
        let response = WebhookResponse::received(Some(joined));

        let user_id = caller.unwrap_or_else(|| data.conversation_id.clone());
        self.dispatch_downstream(payload, user_id, data.agent_id.clone());

        response
    }

    /// Failure report: stored under the agent directory; occasionally
    /// carries partial audio worth keeping next to it.
    async fn process_failure(
        &self,
        data: FailureData,
        held: Option<HeldPayload>,
        request: &SignedRequest,
    ) -> WebhookResponse {
        let conversation = sanitize_segment(&data.conversation_id);
        let directory = directory_for(data.agent_id.as_deref(), None, &conversation);

        self.persist_descriptive(
            ArtifactKind::Failure,
            &directory,
            &conversation,
            held,
            request,
        )
        .await;

        if let Some(encoded) = &data.full_audio {
            match BASE64.decode(encoded.as_bytes()) {
                Ok(audio) => {
                    if let Err(e) = self
                        .store
                        .save_validated(
                            &audio,
                            ArtifactKind::Audio,
                            &directory,
                            &conversation,
                            request.request_id,
                            request.received_at,
                        )
                        .await
                    {
                        tracing::error!("Error saving failure audio for {}: {}", conversation, e);
                    }
                }
                Err(e) => {
                    tracing::error!("Error decoding audio from failure webhook: {}", e);
                }
            }
        }

        WebhookResponse::received(None)
    }

    /// Promote the held payload into main storage, falling back to a
    /// direct write of the request bytes when quarantine was skipped.
    /// Storage failures are absorbed: authenticity is already
    /// established, so the event counts as received either way.
    async fn persist_descriptive(
        &self,
        kind: ArtifactKind,
        directory: &str,
        conversation: &str,
        held: Option<HeldPayload>,
        request: &SignedRequest,
    ) {
        let result = match held {
            Some(held) => {
                self.store
                    .promote(held, kind, directory, conversation, request.received_at)
                    .await
            }
            None => {
                self.store
                    .save_validated(
                        &request.body,
                        kind,
                        directory,
                        conversation,
                        request.request_id,
                        request.received_at,
                    )
                    .await
            }
        };

        if let Err(e) = result {
            tracing::error!(
                "Error saving {} webhook for {}: {}",
                kind.as_str(),
                conversation,
                e
            );
        }
    }

    /// Read the caller identity back out of a stored transcription.
    async fn caller_from_stored_transcription(&self, path: &std::path::Path) -> Option<String> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Error reading stored transcription {}: {}", path.display(), e);
                return None;
            }
        };

        let payload: Value = serde_json::from_slice(&bytes).ok()?;
        let data: TranscriptionData = serde_json::from_value(payload.get("data")?.clone()).ok()?;
        extract_user_id(&data)
    }

    /// Fire-and-forget handoffs after a transcription is persisted.
    /// Failures here are logged and never reach the caller.
    fn dispatch_downstream(&self, payload: Value, user_id: String, agent_id: Option<String>) {
        let memory = match &self.memory {
            Some(memory) => Arc::clone(memory),
            None => {
                tracing::debug!("Memory store not configured, skipping handoff");
                return;
            }
        };

        {
            let memory = Arc::clone(&memory);
            let user_id = user_id.clone();
            tokio::spawn(async move {
                match memory.store_conversation(&payload, &user_id).await {
                    Ok(memory_id) => tracing::info!(
                        "Stored conversation for user {} (memory id {:?})",
                        user_id,
                        memory_id
                    ),
                    Err(e) => {
                        tracing::error!("Error storing conversation for user {}: {:#}", user_id, e)
                    }
                }
            });
        }

        if let (Some(agent_id), Some(profiles)) = (agent_id, self.profiles.as_ref()) {
            let profiles = Arc::clone(profiles);
            tokio::spawn(async move {
                cache_agent_profile(memory, profiles, agent_id).await;
            });
        }
    }

    /// Tick the sweep scheduler; when due, run the sweep off the request
    /// path and let the local cache drop never-read entries too.
    fn maybe_sweep(&self) {
        if !self.scheduler.note_request() {
            return;
        }

        let sweeper = Arc::clone(&self.sweeper);
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            cache.local().sweep_expired(Utc::now()).await;
            if let Err(e) = sweeper.sweep(SystemTime::now()).await {
                tracing::error!("Retention sweep failed: {}", e);
            }
        });
    }

    async fn annotate(&self, held: &Option<HeldPayload>, kind: &str, validated: bool) {
        if let Some(held) = held {
            if let Err(e) = self.store.annotate_quarantined(held, kind, validated).await {
                tracing::error!("Failed to annotate quarantined payload: {}", e);
            }
        }
    }
}

/// Warm the agent-profile cache: look it up, fetch on miss, store.
async fn cache_agent_profile(
    memory: Arc<MemoryClient>,
    profiles: Arc<ProfileClient>,
    agent_id: String,
) {
    match memory.get_agent_profile(&agent_id).await {
        Ok(Some(_)) => {
            tracing::debug!("Agent profile for {} already cached", agent_id);
        }
        Ok(None) => match profiles.get_agent(&agent_id).await {
            Ok(Some(profile)) => {
                if let Err(e) = memory.store_agent_profile(&agent_id, &profile).await {
                    tracing::error!("Error storing agent profile for {}: {:#}", agent_id, e);
                } else {
                    tracing::info!("Stored agent profile for {}", agent_id);
                }
            }
            Ok(None) => tracing::warn!("Agent {} not found in profile API", agent_id),
            Err(e) => tracing::error!("Error fetching agent {}: {:#}", agent_id, e),
        },
        Err(e) => tracing::error!("Error checking cached profile for {}: {:#}", agent_id, e),
    }
}
