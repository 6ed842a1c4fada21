//! WebSocket handler: authenticated realtime relay.
//!
//! DESIGN
//! ======
//! The handshake is authenticated before upgrade: a missing, malformed, or
//! expired token gets a plain 401 and never reaches the socket loop. After
//! upgrade the connection gets an id and enters a `select!` loop:
//! - inbound client events → decode + dispatch (only `subscribe` exists)
//! - relayed events from the connection's queue → forward to the socket
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `connected` with `connectionId` and `userId`
//! 2. Client sends `subscribe` → join that channel's group → `subscribed`
//! 3. Relay worker pushes chat events into the connection queue
//! 4. Close → leave every group the connection joined
//!
//! There is no session resumption; a reconnect starts with no groups.

use std::collections::{HashMap, HashSet};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use events::{ClientEvent, CodecError, ServerEvent};
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::auth::{bearer_token, unauthorized};
use crate::error::{ErrorCode, error_event};
use crate::services::message::is_channel_member;
use crate::services::store::StoreError;
use crate::services::token::{Identity, TokenError};
use crate::state::AppState;

/// Failure handling one inbound event. Reported to the sender; the
/// connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("invalid event: {0}")]
    Decode(#[from] CodecError),
    #[error("not member of channel")]
    NotMember,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for InboundError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "E_INVALID_EVENT",
            Self::NotMember => "E_NOT_MEMBER",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.retryable())
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

/// `GET /api/ws`: token from `Authorization: Bearer` or `?token=`.
pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = bearer_token(&headers)
        .or_else(|| params.get("token").map(String::as_str))
        .ok_or(TokenError::Missing);

    let identity = match token.and_then(|token| state.tokens.verify(token)) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, code = e.error_code(), "ws: handshake rejected");
            return unauthorized();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, identity))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, identity: Identity) {
    let connection_id = Uuid::new_v4();
    let user_id = identity.id;

    // Per-connection queue fed by the relay worker.
    let (conn_tx, mut conn_rx) = mpsc::channel::<ServerEvent>(state.settings.connection_queue_capacity);

    let welcome = ServerEvent::Connected { connection_id, user_id };
    if send_event(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%connection_id, %user_id, name = identity.name.as_deref().unwrap_or("-"), "ws: client connected");

    let mut subscribed: HashSet<Uuid> = HashSet::new();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies =
                            process_inbound_text(&state, connection_id, user_id, &conn_tx, &mut subscribed, &text).await;
                        if send_events(&mut socket, &replies).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = conn_rx.recv() => {
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    let groups = state
        .broadcaster
        .disconnect(connection_id, subscribed.iter().copied())
        .await;
    let live_groups = state.broadcaster.group_count().await;
    info!(%connection_id, %user_id, groups, live_groups, "ws: client disconnected");
}

// =============================================================================
// INBOUND DISPATCH
// =============================================================================

/// Decode and handle one inbound text frame; returns events for the sender.
///
/// Kept apart from the socket so tests can drive it without a transport.
async fn process_inbound_text(
    state: &AppState,
    connection_id: Uuid,
    user_id: Uuid,
    conn_tx: &mpsc::Sender<ServerEvent>,
    subscribed: &mut HashSet<Uuid>,
    text: &str,
) -> Vec<ServerEvent> {
    let result = match events::decode_client_event(text) {
        Ok(ClientEvent::Subscribe { channel_id }) => {
            handle_subscribe(state, connection_id, user_id, conn_tx, subscribed, channel_id).await
        }
        Err(e) => Err(InboundError::from(e)),
    };

    match result {
        Ok(reply) => vec![reply],
        Err(e) => {
            warn!(%connection_id, error = %e, code = e.error_code(), "ws: inbound event rejected");
            vec![error_event(&e)]
        }
    }
}

async fn handle_subscribe(
    state: &AppState,
    connection_id: Uuid,
    user_id: Uuid,
    conn_tx: &mpsc::Sender<ServerEvent>,
    subscribed: &mut HashSet<Uuid>,
    channel_id: Uuid,
) -> Result<ServerEvent, InboundError> {
    if state.settings.subscribe_requires_membership
        && !is_channel_member(state.store.as_ref(), user_id, channel_id).await?
    {
        return Err(InboundError::NotMember);
    }

    state
        .broadcaster
        .subscribe(channel_id, connection_id, conn_tx.clone())
        .await;
    subscribed.insert(channel_id);

    let members = state.broadcaster.group_size(channel_id).await;
    info!(%connection_id, %channel_id, members, "ws: subscribed");
    Ok(ServerEvent::Subscribed { channel_id })
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Write one event. An event that fails to encode is logged and skipped;
/// only a transport failure is returned.
async fn send_event<S>(sink: &mut S, event: &ServerEvent) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    let text = match events::encode_server_event(event) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, event = event.name(), "ws: encode failed");
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await
}

/// Write events in order, stopping at the first transport failure.
async fn send_events<S>(sink: &mut S, batch: &[ServerEvent]) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    for event in batch {
        send_event(sink, event).await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
