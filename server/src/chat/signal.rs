//! Transient typing and read-receipt signaling between the two conversation
//! participants. Nothing here is persisted or expired.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::presence::ConnectionHandle;
use crate::rooms;
use crate::state::AppState;
use crate::ws::broadcast;
use crate::ws::protocol::{
    CheckOnlinePayload, MarkReadPayload, MessagesReadPayload, OnlineStatusPayload, ServerEvent,
    TypingPayload, UserTypingPayload,
};

/// Conversation id -> (user id -> typing flag). Flags are cleared only by
/// an explicit isTyping=false; a user who disconnects mid-typing leaves the
/// flag set. Known gap, preserved deliberately — see DESIGN.md.
pub type TypingRegistry = Arc<DashMap<String, HashMap<String, bool>>>;

pub fn new_typing_registry() -> TypingRegistry {
    Arc::new(DashMap::new())
}

/// Record the sender's typing state and notify the recipient, point to
/// point, if they are currently reachable. No broadcast, no persistence.
pub fn set_typing(state: &AppState, conn: &ConnectionHandle, payload: TypingPayload) {
    // Falls back to the literal unresolved key when neither id nor email
    // was usable — accepted degenerate case.
    let recipient_key = payload
        .recipient_id
        .clone()
        .or_else(|| payload.recipient_email.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let conversation_id = rooms::room_id(&conn.identity.id, &recipient_key);

    state
        .typing
        .entry(conversation_id.clone())
        .or_default()
        .insert(conn.identity.id.clone(), payload.is_typing);

    let recipient = payload
        .recipient_id
        .as_deref()
        .and_then(|id| state.presence.get_by_id(id))
        .or_else(|| {
            payload
                .recipient_email
                .as_deref()
                .and_then(|email| state.presence.get_by_email(email))
        });

    if let Some(target) = recipient {
        broadcast::send_to(
            &target.sender,
            &ServerEvent::UserTyping(UserTypingPayload {
                user_id: conn.identity.id.clone(),
                user_name: conn.identity.display_name_or_id().to_string(),
                is_typing: payload.is_typing,
                conversation_id,
            }),
        );
    }
}

/// Room-scoped read receipt: every connection subscribed to the
/// conversation's room sees it, not just the two participants directly.
pub fn mark_read(state: &AppState, conn: &ConnectionHandle, payload: MarkReadPayload) {
    broadcast::broadcast_to_room(
        &state.rooms,
        &payload.conversation_id,
        &ServerEvent::MessagesRead(MessagesReadPayload {
            conversation_id: payload.conversation_id.clone(),
            message_ids: payload.message_ids,
            read_by: conn.identity.id.clone(),
        }),
    );
}

/// Flat id-keyed presence probe, answered only to the requester. Email
/// presence is not consulted here even though the registry is dual-keyed.
pub fn check_online(state: &AppState, conn: &ConnectionHandle, payload: CheckOnlinePayload) {
    let statuses: HashMap<String, bool> = payload
        .user_ids
        .into_iter()
        .map(|id| {
            let online = state.presence.is_online(&id);
            (id, online)
        })
        .collect();

    broadcast::send_to(
        &conn.sender,
        &ServerEvent::OnlineStatus(OnlineStatusPayload::Flat(statuses)),
    );
}
