//! Long-term memory store client.
//!
//! Hands persisted conversation payloads to the memory service keyed by
//! the extracted caller identity; the service does its own text
//! extraction and categorization. Also caches agent profiles under a
//! synthetic per-agent user id.

use anyhow::{Context, Result};
use serde_json::{json, Value};

/// Client for the memory store HTTP API.
pub struct MemoryClient {
    base_url: String,
    client: reqwest::Client,
}

impl MemoryClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut key_value = reqwest::header::HeaderValue::from_str(api_key)
            .context("Invalid memory API key for header")?;
        key_value.set_sensitive(true);
        headers.insert("X-API-Key", key_value);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build memory client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Store a full conversation payload under the caller identity.
    /// Returns the memory id when the service reports one.
    pub async fn store_conversation(&self, payload: &Value, user_id: &str) -> Result<Option<String>> {
        let metadata = json!({
            "conversation_id": payload.pointer("/data/conversation_id"),
            "agent_id": payload.pointer("/data/agent_id"),
            "event_type": payload.get("type"),
            "event_timestamp": payload.get("event_timestamp"),
        });

        let body = json!({
            "content": payload.to_string(),
            "user_id": user_id,
            "filters": metadata,
        });

        let response = self
            .client
            .post(format!("{}/memory/add", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Failed to reach memory store")?
            .error_for_status()
            .context("Memory store rejected conversation")?;

        let result: Value = response
            .json()
            .await
            .context("Failed to parse memory store response")?;

        Ok(result.get("id").and_then(Value::as_str).map(str::to_string))
    }

    /// Look up a cached agent profile, `None` when absent.
    pub async fn get_agent_profile(&self, agent_id: &str) -> Result<Option<Value>> {
        let body = json!({
            "query": format!("agent_profile:{agent_id}"),
            "user_id": agent_user_id(agent_id),
            "limit": 1,
        });

        let response = self
            .client
            .post(format!("{}/memory/query", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Failed to reach memory store")?
            .error_for_status()
            .context("Memory store query failed")?;

        let result: Value = response
            .json()
            .await
            .context("Failed to parse memory store response")?;

        let first = result
            .get("memories")
            .and_then(Value::as_array)
            .and_then(|memories| memories.first())
            .cloned();

        Ok(first)
    }

    /// Cache an agent profile for later greeting/extraction use.
    pub async fn store_agent_profile(&self, agent_id: &str, profile: &Value) -> Result<()> {
        let body = json!({
            "content": profile.to_string(),
            "user_id": agent_user_id(agent_id),
            "filters": {"kind": "agent_profile", "agent_id": agent_id},
        });

        self.client
            .post(format!("{}/memory/add", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Failed to reach memory store")?
            .error_for_status()
            .context("Memory store rejected agent profile")?;

        Ok(())
    }
}

/// Agent profiles live in their own memory namespace.
fn agent_user_id(agent_id: &str) -> String {
    format!("agent:{agent_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = MemoryClient::new("http://localhost:8080/", "key").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_agent_namespace() {
        assert_eq!(agent_user_id("agent_9"), "agent:agent_9");
    }
}
