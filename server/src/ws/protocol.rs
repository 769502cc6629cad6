//! JSON wire protocol: named events with camelCase payloads, rendered as
//! adjacently tagged serde enums (`{"event": "...", "data": {...}}`), and
//! dispatch of client events to the relay and signaling paths.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::{relay, signal, MessageRecord};
use crate::presence::ConnectionHandle;
use crate::rooms;
use crate::state::AppState;
use crate::ws::broadcast;

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Events a connected client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinConversation(JoinConversationPayload),
    SendMessage(SendMessagePayload),
    Typing(TypingPayload),
    MarkRead(MarkReadPayload),
    CheckOnline(CheckOnlinePayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinConversationPayload {
    pub other_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub recipient_id: Option<String>,
    pub recipient_email: Option<String>,
    pub message: String,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub recipient_id: Option<String>,
    pub recipient_email: Option<String>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    pub conversation_id: String,
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOnlinePayload {
    pub user_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Events the server emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connected(ConnectedPayload),
    UserOnline(PresenceDeltaPayload),
    UserOffline(PresenceDeltaPayload),
    OnlineStatus(OnlineStatusPayload),
    ConversationJoined(ConversationJoinedPayload),
    ReceiveMessage(MessageRecord),
    MessageSent(MessageRecord),
    NewMessage(MessageRecord),
    UserTyping(UserTypingPayload),
    MessagesRead(MessagesReadPayload),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub message: String,
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceDeltaPayload {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub user_name: String,
    pub timestamp: DateTime<Utc>,
}

/// One event name, two shapes: the keyed snapshot broadcast to everyone,
/// and the flat reply sent back to a check-online request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OnlineStatusPayload {
    Snapshot {
        #[serde(rename = "byId")]
        by_id: HashMap<String, bool>,
        #[serde(rename = "byEmail")]
        by_email: HashMap<String, bool>,
    },
    Flat(HashMap<String, bool>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationJoinedPayload {
    pub conversation_id: String,
    pub other_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTypingPayload {
    pub user_id: String,
    pub user_name: String,
    pub is_typing: bool,
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesReadPayload {
    pub conversation_id: String,
    pub message_ids: Vec<String>,
    pub read_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Handle one incoming text frame: parse and dispatch, or answer with an
/// error event on malformed input.
pub async fn handle_client_frame(
    state: &AppState,
    conn: &ConnectionHandle,
    credential: &str,
    joined_rooms: &mut Vec<String>,
    text: &str,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %conn.identity.id,
                error = %e,
                "Unparseable client event"
            );
            broadcast::send_to(
                &conn.sender,
                &ServerEvent::Error(ErrorPayload {
                    message: format!("unrecognized event: {e}"),
                }),
            );
            return;
        }
    };

    match event {
        ClientEvent::JoinConversation(payload) => {
            handle_join(state, conn, joined_rooms, payload);
        }
        ClientEvent::SendMessage(payload) => {
            relay::send_message(state, conn, credential, payload).await;
        }
        ClientEvent::Typing(payload) => signal::set_typing(state, conn, payload),
        ClientEvent::MarkRead(payload) => signal::mark_read(state, conn, payload),
        ClientEvent::CheckOnline(payload) => signal::check_online(state, conn, payload),
    }
}

/// Subscribe the connection to the room shared with the other participant.
fn handle_join(
    state: &AppState,
    conn: &ConnectionHandle,
    joined_rooms: &mut Vec<String>,
    payload: JoinConversationPayload,
) {
    let room = rooms::room_id(&conn.identity.id, &payload.other_user_id);
    state.rooms.join(&room, conn.conn_id, conn.sender.clone());
    if !joined_rooms.contains(&room) {
        joined_rooms.push(room.clone());
    }

    tracing::debug!(
        user_id = %conn.identity.id,
        conversation_id = %room,
        "Joined conversation room"
    );

    broadcast::send_to(
        &conn.sender,
        &ServerEvent::ConversationJoined(ConversationJoinedPayload {
            conversation_id: room,
            other_user_id: payload.other_user_id,
        }),
    );
}
