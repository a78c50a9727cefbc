//! Conversation-platform agent profile client.
//!
//! Fetches full agent configuration records. Used only from background
//! tasks to warm the profile cache; a missing agent is not an error.

use anyhow::{Context, Result};
use serde_json::Value;

/// Client for the platform's agent API.
pub struct ProfileClient {
    base_url: String,
    client: reqwest::Client,
}

impl ProfileClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut key_value = reqwest::header::HeaderValue::from_str(api_key)
            .context("Invalid profile API key for header")?;
        key_value.set_sensitive(true);
        headers.insert("xi-api-key", key_value);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build profile client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Fetch an agent's configuration; `None` when the agent is unknown.
    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<Value>> {
        let response = self
            .client
            .get(format!("{}/v1/convai/agents/{}", self.base_url, agent_id))
            .send()
            .await
            .context("Failed to reach profile API")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::warn!("Agent {} not found", agent_id);
            return Ok(None);
        }

        let response = response
            .error_for_status()
            .context("Profile API request failed")?;

        let profile: Value = response
            .json()
            .await
            .context("Failed to parse agent profile")?;

        Ok(Some(profile))
    }
}
