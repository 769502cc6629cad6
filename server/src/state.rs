use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::verifier::TokenVerifier;
use crate::chat::signal::TypingRegistry;
use crate::presence::PresenceRegistry;
use crate::rooms::RoomRegistry;
use crate::store::MessageStore;

/// Shared application state passed to all handlers via the axum State
/// extractor. The presence, room, and typing maps are the only shared
/// mutable resources in the process.
#[derive(Clone)]
pub struct AppState {
    /// Dual-keyed online registry (user id and email)
    pub presence: Arc<PresenceRegistry>,
    /// Conversation room subscriptions
    pub rooms: Arc<RoomRegistry>,
    /// Transient typing flags per conversation
    pub typing: TypingRegistry,
    /// Two-path credential verifier
    pub verifier: Arc<TokenVerifier>,
    /// Durable-store client for best-effort message forwards
    pub store: Arc<MessageStore>,
    /// Live socket count. Can briefly exceed the online-user count while a
    /// reconnect supersedes an old registry entry whose transport is still
    /// draining.
    pub connections: Arc<AtomicUsize>,
    /// Server start time, for the status endpoint
    pub started_at: Instant,
}
