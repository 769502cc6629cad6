//! Dual-keyed in-memory presence registry.
//!
//! The upstream identity provider inconsistently supplies a user id or an
//! email, so every connection is indexed under both keys when both exist.
//! Entries are lookup-only: the connection actor owns its own lifetime, and
//! a send to a handle whose actor has exited is a silent no-op.

use dashmap::DashMap;
use uuid::Uuid;

use crate::auth::Identity;
use crate::ws::ConnectionSender;

/// One live connection's identity plus its send capability. Clones of the
/// handle live in the registry and in room memberships.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    pub identity: Identity,
    pub sender: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(identity: Identity, sender: ConnectionSender) -> Self {
        Self {
            conn_id: Uuid::now_v7(),
            identity,
            sender,
        }
    }
}

/// Registry invariant: at most one entry per identity key. A later
/// connection for the same identity evicts the earlier mapping.
#[derive(Default)]
pub struct PresenceRegistry {
    by_id: DashMap<String, ConnectionHandle>,
    by_email: DashMap<String, ConnectionHandle>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite both key entries for a connection. Called exactly
    /// once per successful connection, after authentication, before any
    /// broadcast.
    pub fn register(&self, handle: &ConnectionHandle) {
        self.by_id
            .insert(handle.identity.id.clone(), handle.clone());
        if let Some(email) = &handle.identity.email {
            self.by_email.insert(email.clone(), handle.clone());
        }
    }

    /// Remove both entries, but only while they still point at this
    /// connection. A stale disconnect racing a newer reconnect for the same
    /// identity must not evict the newer mapping.
    pub fn unregister(&self, handle: &ConnectionHandle) {
        self.by_id
            .remove_if(&handle.identity.id, |_, stored| {
                stored.conn_id == handle.conn_id
            });
        if let Some(email) = &handle.identity.email {
            self.by_email
                .remove_if(email, |_, stored| stored.conn_id == handle.conn_id);
        }
    }

    pub fn get_by_id(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.by_id.get(user_id).map(|entry| entry.value().clone())
    }

    pub fn get_by_email(&self, email: &str) -> Option<ConnectionHandle> {
        self.by_email.get(email).map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_id.contains_key(user_id)
    }

    /// Point-in-time view of every online identity, both key spaces.
    pub fn snapshot(&self) -> (Vec<String>, Vec<String>) {
        let ids = self.by_id.iter().map(|entry| entry.key().clone()).collect();
        let emails = self
            .by_email
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        (ids, emails)
    }

    /// Number of distinct online users.
    pub fn online_count(&self) -> usize {
        self.by_id.len()
    }

    /// Visit every active connection handle. Used by broadcasts.
    pub fn for_each(&self, mut f: impl FnMut(&ConnectionHandle)) {
        for entry in self.by_id.iter() {
            f(entry.value());
        }
    }
}
