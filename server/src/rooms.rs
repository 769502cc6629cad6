//! Conversation addressing and room subscriptions.
//!
//! A room id is derived, never stored: the sorted pair of the two
//! participants' user ids, so both sides compute the same key.

use std::collections::HashMap;

use dashmap::DashMap;
use uuid::Uuid;

use crate::ws::ConnectionSender;

/// Stable, order-independent room identifier for a pair of users.
pub fn room_id(a: &str, b: &str) -> String {
    let mut pair = [a, b];
    pair.sort_unstable();
    pair.join("_")
}

/// Tracks which live connections have joined which conversation room.
/// Membership is connection-scoped: a reconnect joins again from scratch.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, HashMap<Uuid, ConnectionSender>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: &str, conn_id: Uuid, sender: ConnectionSender) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn_id, sender);
    }

    /// Drop one connection from every room it joined. Called on teardown.
    pub fn leave_all(&self, conn_id: Uuid, joined: &[String]) {
        for room in joined {
            if let Some(mut members) = self.rooms.get_mut(room) {
                members.remove(&conn_id);
            }
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
    }

    /// Send capabilities of every current member of a room.
    pub fn members(&self, room: &str) -> Vec<ConnectionSender> {
        self.rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }
}
