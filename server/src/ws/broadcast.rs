//! Fanout helpers. Each event is serialized once and the frame cloned per
//! target; a send to a connection whose actor has exited is a silent no-op.

use axum::extract::ws::Message;
use uuid::Uuid;

use crate::presence::PresenceRegistry;
use crate::rooms::RoomRegistry;
use crate::ws::protocol::ServerEvent;
use crate::ws::ConnectionSender;

fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            None
        }
    }
}

/// Send one event to one connection.
pub fn send_to(sender: &ConnectionSender, event: &ServerEvent) {
    if let Some(msg) = encode(event) {
        let _ = sender.send(msg);
    }
}

/// Broadcast to every active connection.
pub fn broadcast_to_all(presence: &PresenceRegistry, event: &ServerEvent) {
    if let Some(msg) = encode(event) {
        presence.for_each(|handle| {
            let _ = handle.sender.send(msg.clone());
        });
    }
}

/// Broadcast to every active connection except the given one.
pub fn broadcast_to_others(presence: &PresenceRegistry, skip: Uuid, event: &ServerEvent) {
    if let Some(msg) = encode(event) {
        presence.for_each(|handle| {
            if handle.conn_id != skip {
                let _ = handle.sender.send(msg.clone());
            }
        });
    }
}

/// Broadcast to every connection subscribed to a conversation room.
pub fn broadcast_to_room(rooms: &RoomRegistry, room: &str, event: &ServerEvent) {
    if let Some(msg) = encode(event) {
        for sender in rooms.members(room) {
            let _ = sender.send(msg.clone());
        }
    }
}
