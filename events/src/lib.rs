//! Shared event model and JSON codec for the realtime chat transport.
//!
//! This crate owns the wire representation used by `server`, `client`, and
//! `cli`. Every frame on the socket is a JSON text message shaped as
//! `{"event": <name>, "data": <payload>}`; the set of names is closed and each
//! name has exactly one payload schema.
//!
//! Chat payloads are validated when decoded, so a [`ChatEvent`] obtained from
//! [`ServerEvent::into_chat`] after [`decode_server_event`] always satisfies
//! the message invariants (non-blank content, bounded length, `editedAt`
//! present exactly on updates).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum message length, counted in Unicode scalar values.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// HTTP header naming the caller's realtime connection on a Command API
/// request; the relayed event skips that connection. Lowercase, as HTTP/2
/// requires.
pub const CONNECTION_ID_HEADER: &str = "x-connection-id";

/// Error returned by the decode functions.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not JSON, or does not match any known event schema.
    #[error("invalid event json: {0}")]
    Json(#[from] serde_json::Error),
    /// The event parsed but its message payload violates an invariant.
    #[error("invalid message payload: {0}")]
    InvalidMessage(#[from] ContentError),
}

/// Why a message body was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
    #[error("content is empty")]
    Empty,
    #[error("content is {0} characters, limit is {max}", max = MAX_CONTENT_CHARS)]
    TooLong(usize),
    #[error("updated message is missing editedAt")]
    MissingEditedAt,
    #[error("new message must not carry editedAt")]
    UnexpectedEditedAt,
}

/// Check message content: non-blank after trimming, at most
/// [`MAX_CONTENT_CHARS`] characters.
///
/// # Errors
///
/// Returns [`ContentError::Empty`] or [`ContentError::TooLong`].
pub fn validate_content(content: &str) -> Result<(), ContentError> {
    if content.trim().is_empty() {
        return Err(ContentError::Empty);
    }
    let len = content.chars().count();
    if len > MAX_CONTENT_CHARS {
        return Err(ContentError::TooLong(len));
    }
    Ok(())
}

// =============================================================================
// RECORDS
// =============================================================================

/// A persisted chat message. Timestamps are milliseconds since the Unix epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub member_id: Uuid,
    pub channel_id: Uuid,
    pub content: String,
    pub file_url: Option<String>,
    pub created_at: i64,
    pub edited_at: Option<i64>,
}

/// One page of channel history, newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub items: Vec<Message>,
    /// Offset of the next (older) page, or `None` when history is exhausted.
    pub next_cursor: Option<u32>,
}

// =============================================================================
// EVENTS
// =============================================================================

/// Message lifecycle event relayed to every subscriber of a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Created(Message),
    Updated(Message),
    Deleted { id: Uuid, channel_id: Uuid },
}

impl ChatEvent {
    /// Channel whose broadcast group receives this event.
    #[must_use]
    pub fn channel_id(&self) -> Uuid {
        match self {
            Self::Created(message) | Self::Updated(message) => message.channel_id,
            Self::Deleted { channel_id, .. } => *channel_id,
        }
    }

    #[must_use]
    pub fn message_id(&self) -> Uuid {
        match self {
            Self::Created(message) | Self::Updated(message) => message.id,
            Self::Deleted { id, .. } => *id,
        }
    }

    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created(_) => "new-message",
            Self::Updated(_) => "message-update",
            Self::Deleted { .. } => "message-delete",
        }
    }

    fn validate(&self) -> Result<(), ContentError> {
        match self {
            Self::Created(message) => {
                validate_content(&message.content)?;
                if message.edited_at.is_some() {
                    return Err(ContentError::UnexpectedEditedAt);
                }
                Ok(())
            }
            Self::Updated(message) => {
                validate_content(&message.content)?;
                if message.edited_at.is_none() {
                    return Err(ContentError::MissingEditedAt);
                }
                Ok(())
            }
            Self::Deleted { .. } => Ok(()),
        }
    }
}

/// Every event the server may push to a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// First event after a successful handshake.
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected { connection_id: Uuid, user_id: Uuid },
    /// Acknowledges a `subscribe`.
    #[serde(rename = "subscribed", rename_all = "camelCase")]
    Subscribed { channel_id: Uuid },
    #[serde(rename = "new-message")]
    MessageCreated(Message),
    #[serde(rename = "message-update")]
    MessageUpdated(Message),
    #[serde(rename = "message-delete", rename_all = "camelCase")]
    MessageDeleted { id: Uuid, channel_id: Uuid },
    /// Non-fatal protocol error; the connection stays open. `retryable`
    /// marks failures worth repeating unchanged, such as a store timeout.
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        #[serde(default)]
        retryable: bool,
    },
}

impl ServerEvent {
    /// Extract the chat lifecycle event, if this is one.
    #[must_use]
    pub fn into_chat(self) -> Option<ChatEvent> {
        match self {
            Self::MessageCreated(message) => Some(ChatEvent::Created(message)),
            Self::MessageUpdated(message) => Some(ChatEvent::Updated(message)),
            Self::MessageDeleted { id, channel_id } => Some(ChatEvent::Deleted { id, channel_id }),
            Self::Connected { .. } | Self::Subscribed { .. } | Self::Error { .. } => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Subscribed { .. } => "subscribed",
            Self::MessageCreated(_) => "new-message",
            Self::MessageUpdated(_) => "message-update",
            Self::MessageDeleted { .. } => "message-delete",
            Self::Error { .. } => "error",
        }
    }
}

impl From<ChatEvent> for ServerEvent {
    fn from(event: ChatEvent) -> Self {
        match event {
            ChatEvent::Created(message) => Self::MessageCreated(message),
            ChatEvent::Updated(message) => Self::MessageUpdated(message),
            ChatEvent::Deleted { id, channel_id } => Self::MessageDeleted { id, channel_id },
        }
    }
}

/// Every event a client may send.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Join the broadcast group of a channel.
    #[serde(rename = "subscribe", rename_all = "camelCase")]
    Subscribe { channel_id: Uuid },
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode a server event as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_server_event(event: &ServerEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode and validate a server event.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed or unknown events and
/// [`CodecError::InvalidMessage`] for chat payloads breaking an invariant.
pub fn decode_server_event(text: &str) -> Result<ServerEvent, CodecError> {
    let event: ServerEvent = serde_json::from_str(text)?;
    if let Some(chat) = event.clone().into_chat() {
        chat.validate()?;
    }
    Ok(event)
}

/// Encode a client event as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_client_event(event: &ClientEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode a client event.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed or unknown events.
pub fn decode_client_event(text: &str) -> Result<ClientEvent, CodecError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
