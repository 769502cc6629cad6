use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::auth::Identity;
use crate::presence::ConnectionHandle;
use crate::state::AppState;
use crate::ws::broadcast;
use crate::ws::protocol::{
    self, ConnectedPayload, OnlineStatusPayload, PresenceDeltaPayload, ServerEvent,
};

/// Ping interval: server sends a WebSocket ping every 30 seconds so abrupt
/// disconnects cannot leak registry entries.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if no pong arrives within 10 seconds after a ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from an mpsc channel
/// - Reader loop: processes incoming events, dispatches to protocol handlers
///
/// The mpsc sender is the connection's handle: the presence registry and
/// room memberships hold clones of it to push events to this client.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    identity: Identity,
    credential: String,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let handle = ConnectionHandle::new(identity, tx.clone());
    state.connections.fetch_add(1, Ordering::Relaxed);
    state.presence.register(&handle);

    // Direct acknowledgment to the new connection.
    broadcast::send_to(
        &tx,
        &ServerEvent::Connected(ConnectedPayload {
            message: "connected".to_string(),
            user_id: handle.identity.id.clone(),
            user_name: handle.identity.display_name_or_id().to_string(),
        }),
    );

    // Presence delta to everyone else, then a full snapshot to everyone
    // including the new connection.
    broadcast::broadcast_to_others(
        &state.presence,
        handle.conn_id,
        &ServerEvent::UserOnline(presence_delta(&handle)),
    );
    broadcast::broadcast_to_all(&state.presence, &online_status_snapshot(&state));

    tracing::info!(
        user_id = %handle.identity.id,
        conn_id = %handle.conn_id,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc frames to the WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Rooms this connection subscribed to, for teardown.
    let mut joined_rooms: Vec<String> = Vec::new();

    // Reader loop: process incoming WebSocket frames
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_client_frame(
                        &state,
                        &handle,
                        &credential,
                        &mut joined_rooms,
                        text.as_str(),
                    )
                    .await;
                }
                Message::Binary(_) => {
                    // The protocol is JSON text; tolerate but ignore binary.
                    tracing::debug!(
                        user_id = %handle.identity.id,
                        "Received binary frame (expected JSON text)"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %handle.identity.id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %handle.identity.id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %handle.identity.id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    ping_handle.abort();

    // Teardown order: room memberships, then the guarded registry removal.
    // The typing table is deliberately left untouched — flags clear only on
    // an explicit isTyping=false from the client.
    state.rooms.leave_all(handle.conn_id, &joined_rooms);
    state.presence.unregister(&handle);
    state.connections.fetch_sub(1, Ordering::Relaxed);

    // Offline delta and a fresh post-removal snapshot to the remaining
    // connections.
    broadcast::broadcast_to_all(
        &state.presence,
        &ServerEvent::UserOffline(presence_delta(&handle)),
    );
    broadcast::broadcast_to_all(&state.presence, &online_status_snapshot(&state));

    tracing::info!(
        user_id = %handle.identity.id,
        conn_id = %handle.conn_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives frames from the mpsc channel and forwards them to
/// the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}

fn presence_delta(handle: &ConnectionHandle) -> PresenceDeltaPayload {
    PresenceDeltaPayload {
        user_id: handle.identity.id.clone(),
        user_email: handle.identity.email.clone(),
        user_name: handle.identity.display_name_or_id().to_string(),
        timestamp: Utc::now(),
    }
}

/// Keyed snapshot of everything currently online, both key spaces.
fn online_status_snapshot(state: &AppState) -> ServerEvent {
    let (ids, emails) = state.presence.snapshot();
    let by_id: HashMap<String, bool> = ids.into_iter().map(|id| (id, true)).collect();
    let by_email: HashMap<String, bool> = emails.into_iter().map(|email| (email, true)).collect();
    ServerEvent::OnlineStatus(OnlineStatusPayload::Snapshot { by_id, by_email })
}
