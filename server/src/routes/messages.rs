//! Command API and history routes.
//!
//! DESIGN
//! ======
//! Handlers translate HTTP into service calls and own the outbound side:
//! on success they publish the resulting chat event to the relay and return
//! immediately, so delivery never affects the response. Every failure maps
//! through `message_error_response`.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use events::ChatEvent;
use serde::{Deserialize, Deserializer};
use tracing::{error, warn};
use uuid::Uuid;

use super::auth::{AuthUser, origin_connection};
use crate::error::ErrorCode;
use crate::services::message::{self, MessageEdit, MessageError, NewMessage};
use crate::state::AppState;

// =============================================================================
// BODIES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageBody {
    pub member_id: Uuid,
    pub content: String,
    pub channel_id: Uuid,
    #[serde(default)]
    pub file_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessageBody {
    pub member_id: Uuid,
    pub content: String,
    pub channel_id: Uuid,
    /// Must be present; `null` clears the attachment.
    #[serde(deserialize_with = "present_or_null")]
    pub file_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageBody {
    pub member_id: Uuid,
    pub channel_id: Uuid,
}

/// `string | null`, with no default: a missing field fails the body.
fn present_or_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Option::<String>::deserialize(deserializer)
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub cursor: Option<u32>,
    pub limit: Option<u32>,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `POST /messages`
pub async fn create_message(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    body: Result<Json<CreateMessageBody>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return invalid_body();
    };
    let input =
        NewMessage { member_id: body.member_id, channel_id: body.channel_id, content: body.content, file_url: body.file_url };

    match message::create_message(state.store.as_ref(), auth.identity.id, input).await {
        Ok(created) => {
            state
                .publisher
                .publish(ChatEvent::Created(created), origin_connection(&headers));
            ok_message("message sent")
        }
        Err(e) => message_error_response(&e),
    }
}

/// `PATCH /messages/{id}`
pub async fn update_message(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<UpdateMessageBody>, JsonRejection>,
) -> Response {
    let Ok(Path(message_id)) = id else {
        return invalid_id();
    };
    let Ok(Json(body)) = body else {
        return invalid_body();
    };
    let edit =
        MessageEdit { member_id: body.member_id, channel_id: body.channel_id, content: body.content, file_url: body.file_url };

    match message::update_message(state.store.as_ref(), auth.identity.id, message_id, edit).await {
        Ok(updated) => {
            state
                .publisher
                .publish(ChatEvent::Updated(updated), origin_connection(&headers));
            ok_message("message updated")
        }
        Err(e) => message_error_response(&e),
    }
}

/// `DELETE /messages/{id}`
pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<DeleteMessageBody>, JsonRejection>,
) -> Response {
    let Ok(Path(message_id)) = id else {
        return invalid_id();
    };
    let Ok(Json(body)) = body else {
        return invalid_body();
    };

    match message::delete_message(state.store.as_ref(), auth.identity.id, message_id, body.member_id, body.channel_id)
        .await
    {
        Ok(removed) => {
            let event = ChatEvent::Deleted { id: removed.id, channel_id: removed.channel_id };
            state.publisher.publish(event, origin_connection(&headers));
            ok_message("message deleted")
        }
        Err(e) => message_error_response(&e),
    }
}

/// `GET /channels/{channel_id}/messages?cursor=&limit=`
pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    channel: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Response {
    let Ok(Path(channel_id)) = channel else {
        return bad_request("invalid channel id");
    };
    let Ok(Query(query)) = query else {
        return bad_request("invalid cursor or limit");
    };

    match message::list_channel_messages(state.store.as_ref(), auth.identity.id, channel_id, query.cursor, query.limit)
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(e) => message_error_response(&e),
    }
}

// =============================================================================
// RESPONSES
// =============================================================================

fn ok_message(message: &'static str) -> Response {
    Json(serde_json::json!({ "message": message })).into_response()
}

fn bad_request(reason: &'static str) -> Response {
    warn!(code = "E_INVALID_BODY", reason, "messages: rejected");
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": reason }))).into_response()
}

fn invalid_body() -> Response {
    bad_request("invalid message body")
}

fn invalid_id() -> Response {
    bad_request("invalid message id")
}

/// Map a service error to status and `{"error": ...}` body.
pub(crate) fn message_error_response(err: &MessageError) -> Response {
    let (status, text) = match err {
        MessageError::Invalid(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        MessageError::NotMember => (StatusCode::BAD_REQUEST, "not member of channel".to_owned()),
        MessageError::NotFound(_) => (StatusCode::NOT_FOUND, "message not found".to_owned()),
        MessageError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden".to_owned()),
        MessageError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned()),
    };

    if status.is_server_error() {
        error!(error = %err, code = err.error_code(), retryable = err.retryable(), "messages: persistence failed");
    } else {
        warn!(error = %err, code = err.error_code(), "messages: rejected");
    }

    (status, Json(serde_json::json!({ "error": text }))).into_response()
}

#[cfg(test)]
#[path = "messages_test.rs"]
mod tests;
