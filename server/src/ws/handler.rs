use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::error::AuthError;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for the WebSocket upgrade. The bearer credential rides
/// as connection metadata, never as an application message.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = credential missing
/// 4002 = credential rejected by both issuers
const CLOSE_CREDENTIAL_MISSING: u16 = 4001;
const CLOSE_CREDENTIAL_REJECTED: u16 = 4002;

/// GET /ws?token=...
/// Authenticates before the connection is accepted. On failure, upgrades
/// then immediately closes with an explicit reason; the registry is never
/// touched and nothing is broadcast.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.verifier.verify(params.token.as_deref()).await {
        Ok(identity) => {
            tracing::info!(
                user_id = %identity.id,
                method = ?identity.auth_method,
                "WebSocket connection authenticated"
            );
            // The credential is retained only to authorize store forwards
            // on behalf of this session.
            let credential = params.token.unwrap_or_default();
            ws.on_upgrade(move |socket| {
                actor::run_connection(socket, state, identity, credential)
            })
        }
        Err(err) => {
            let close_code = match err {
                AuthError::MissingToken => CLOSE_CREDENTIAL_MISSING,
                AuthError::Rejected { .. } => CLOSE_CREDENTIAL_REJECTED,
            };
            let reason = err.to_string();

            tracing::warn!(
                close_code = close_code,
                reason = %reason,
                "WebSocket auth failed"
            );

            ws.on_upgrade(move |mut socket: WebSocket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
