//! Message relay: canonical record construction, best-effort store forward,
//! and the three-target fanout (recipient, sender ack, room broadcast).

use chrono::Utc;
use rand::Rng;

use crate::chat::MessageRecord;
use crate::presence::ConnectionHandle;
use crate::rooms;
use crate::state::AppState;
use crate::ws::broadcast;
use crate::ws::protocol::{SendMessagePayload, ServerEvent};

/// Locally generated message id: millisecond prefix plus random suffix.
/// Collision odds are negligible but not cryptographically guaranteed,
/// which is acceptable for a transient ack id.
fn local_message_id() -> String {
    let suffix: [u8; 4] = rand::rng().random();
    format!("{}-{}", Utc::now().timestamp_millis(), hex::encode(suffix))
}

/// Relay one send event. Persistence failure never blocks or fails the
/// real-time path: the record is delivered with `persisted: false`.
pub async fn send_message(
    state: &AppState,
    sender: &ConnectionHandle,
    credential: &str,
    payload: SendMessagePayload,
) {
    let SendMessagePayload {
        recipient_id,
        recipient_email,
        message,
        conversation_id,
    } = payload;

    // The conversation key falls back through id, email, then the literal
    // unresolved-key string, same as the typing path.
    let recipient_key = recipient_id
        .clone()
        .or_else(|| recipient_email.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let conversation_id =
        conversation_id.unwrap_or_else(|| rooms::room_id(&sender.identity.id, &recipient_key));

    let local_record = MessageRecord {
        id: local_message_id(),
        conversation_id: conversation_id.clone(),
        sender_id: sender.identity.id.clone(),
        sender_name: sender.identity.display_name_or_id().to_string(),
        recipient_id: recipient_id.clone().unwrap_or_default(),
        body: message,
        created_at: Utc::now(),
        read: false,
        persisted: false,
    };

    // Bounded forward to the durable store, authorized with this session's
    // own credential. No registry state is held across this await.
    let mut record = local_record.clone();
    match state
        .store
        .persist(
            credential,
            &record.recipient_id,
            &record.body,
            &conversation_id,
        )
        .await
    {
        Ok(stored) => {
            record.id = stored.id;
            record.persisted = true;
        }
        Err(e) => {
            tracing::warn!(
                conversation_id = %conversation_id,
                sender_id = %sender.identity.id,
                error = %e,
                "Store forward failed, delivering unpersisted"
            );
        }
    }

    // Direct delivery: id lookup first, email as fallback. An offline
    // recipient is a normal outcome, not an error; nothing is queued.
    let recipient = recipient_id
        .as_deref()
        .and_then(|id| state.presence.get_by_id(id))
        .or_else(|| {
            recipient_email
                .as_deref()
                .and_then(|email| state.presence.get_by_email(email))
        });

    match recipient {
        Some(target) => {
            broadcast::send_to(&target.sender, &ServerEvent::ReceiveMessage(record.clone()));
        }
        None => {
            tracing::debug!(
                conversation_id = %conversation_id,
                "Recipient offline, direct delivery skipped"
            );
        }
    }

    broadcast::send_to(&sender.sender, &ServerEvent::MessageSent(record));

    // The room sees the locally built record even when the store assigned a
    // different id to the sender and recipient copies.
    broadcast::broadcast_to_room(
        &state.rooms,
        &conversation_id,
        &ServerEvent::NewMessage(local_record),
    );
}
