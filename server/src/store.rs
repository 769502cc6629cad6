//! Client for the external durable message store.
//!
//! Every forward is bounded by a hard timeout and authorized with the
//! sending session's own bearer credential. The store owns durability;
//! this process never retries or queues.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::error::StoreError;

/// Stored record returned by the store; only the assigned id matters here.
#[derive(Debug, Deserialize)]
pub struct StoredMessage {
    #[serde(alias = "_id")]
    pub id: String,
}

pub struct MessageStore {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl MessageStore {
    pub fn new(base_url: String, timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// POST the message to the store and return the store-assigned id.
    pub async fn persist(
        &self,
        credential: &str,
        recipient_id: &str,
        body: &str,
        conversation_id: &str,
    ) -> Result<StoredMessage, StoreError> {
        let response = self
            .http
            .post(format!("{}/api/messages", self.base_url))
            .bearer_auth(credential)
            .timeout(self.timeout)
            .json(&json!({
                "recipientId": recipient_id,
                "message": body,
                "conversationId": conversation_id,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }

        Ok(response.json::<StoredMessage>().await?)
    }
}
