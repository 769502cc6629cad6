pub mod relay;
pub mod signal;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical per-send message record. Built once per send event and not
/// mutated after dispatch; read and ack state travel as separate signal
/// events, never as record mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Locally generated id, replaced by the store-assigned id when the
    /// store write succeeds inside the call window.
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub recipient_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    /// Whether the durable store accepted this message in time.
    pub persisted: bool,
}
