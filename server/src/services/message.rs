//! Message command service: validate, authorize, persist.
//!
//! DESIGN
//! ======
//! Functions here are pure business logic over a [`MessageStore`]. They
//! return the persisted record and never touch the relay; the route layer
//! owns outbound concerns (HTTP response and publish).
//!
//! AUTHORIZATION
//! =============
//! Update and delete decide before writing, in this order:
//! 1. the member exists and belongs to the caller's token subject,
//! 2. the message exists in the named channel,
//! 3. the channel is in the member's guild,
//! 4. the member authored the message or can moderate.
//!
//! Validation always runs before the first store call.

use std::time::{SystemTime, UNIX_EPOCH};

use events::{ContentError, Message, MessagePage, validate_content};
use tracing::info;
use uuid::Uuid;

use super::store::{Channel, Member, MessageStore, StoreError};
use crate::error::ErrorCode;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid message: {0}")]
    Invalid(#[from] ContentError),
    #[error("not member of channel")]
    NotMember,
    #[error("message not found: {0}")]
    NotFound(Uuid),
    #[error("member {member_id} may not modify message {message_id}")]
    Forbidden { member_id: Uuid, message_id: Uuid },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for MessageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "E_INVALID_BODY",
            Self::NotMember => "E_NOT_MEMBER",
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::Forbidden { .. } => "E_FORBIDDEN",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.retryable())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub member_id: Uuid,
    pub channel_id: Uuid,
    pub content: String,
    pub file_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEdit {
    pub member_id: Uuid,
    pub channel_id: Uuid,
    pub content: String,
    /// `None` clears the attachment.
    pub file_url: Option<String>,
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Insert a new message posted by `caller` through `input.member_id`.
///
/// # Errors
///
/// [`MessageError::Invalid`] for bad content, [`MessageError::NotMember`]
/// when the member is unknown, not the caller, or outside the channel's
/// guild, and [`MessageError::Store`] on persistence failure.
pub async fn create_message(store: &dyn MessageStore, caller: Uuid, input: NewMessage) -> Result<Message, MessageError> {
    validate_content(&input.content)?;

    let member = caller_member(store, caller, input.member_id).await?;
    channel_in_guild(store, input.channel_id, &member).await?;

    let message = Message {
        id: Uuid::new_v4(),
        member_id: member.id,
        channel_id: input.channel_id,
        content: input.content,
        file_url: normalize_file_url(input.file_url),
        created_at: now_ms(),
        edited_at: None,
    };
    store.insert_message(&message).await?;

    info!(message_id = %message.id, channel_id = %message.channel_id, member_id = %member.id, "message: created");
    Ok(message)
}

/// Replace content and attachment of an existing message.
///
/// # Errors
///
/// As [`create_message`], plus [`MessageError::NotFound`] and
/// [`MessageError::Forbidden`].
pub async fn update_message(
    store: &dyn MessageStore,
    caller: Uuid,
    message_id: Uuid,
    input: MessageEdit,
) -> Result<Message, MessageError> {
    validate_content(&input.content)?;

    let member = caller_member(store, caller, input.member_id).await?;
    authorize_modify(store, &member, message_id, input.channel_id).await?;

    let file_url = normalize_file_url(input.file_url);
    let updated = store
        .update_message(message_id, &input.content, file_url.as_deref(), now_ms())
        .await?
        .ok_or(MessageError::NotFound(message_id))?;

    info!(%message_id, channel_id = %updated.channel_id, member_id = %member.id, role = member.role.as_str(), "message: updated");
    Ok(updated)
}

/// Delete a message. Returns the removed record.
///
/// # Errors
///
/// Same as [`update_message`] minus content validation.
pub async fn delete_message(
    store: &dyn MessageStore,
    caller: Uuid,
    message_id: Uuid,
    member_id: Uuid,
    channel_id: Uuid,
) -> Result<Message, MessageError> {
    let member = caller_member(store, caller, member_id).await?;
    let message = authorize_modify(store, &member, message_id, channel_id).await?;

    if !store.delete_message(message_id).await? {
        return Err(MessageError::NotFound(message_id));
    }

    info!(%message_id, %channel_id, member_id = %member.id, role = member.role.as_str(), "message: deleted");
    Ok(message)
}

/// One page of channel history, newest first, for a guild member.
///
/// # Errors
///
/// [`MessageError::NotMember`] when the channel is unknown or the caller has
/// no member row in its guild.
pub async fn list_channel_messages(
    store: &dyn MessageStore,
    caller: Uuid,
    channel_id: Uuid,
    cursor: Option<u32>,
    limit: Option<u32>,
) -> Result<MessagePage, MessageError> {
    if !is_channel_member(store, caller, channel_id).await? {
        return Err(MessageError::NotMember);
    }

    let cursor = cursor.unwrap_or(0);
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let mut items = store.list_messages(channel_id, limit + 1, cursor).await?;
    let next_cursor = if items.len() > limit as usize {
        items.truncate(limit as usize);
        Some(cursor.saturating_add(limit))
    } else {
        None
    };

    Ok(MessagePage { items, next_cursor })
}

/// Whether `user_id` has a member row in the guild owning `channel_id`.
///
/// # Errors
///
/// Returns [`StoreError`] if a lookup fails.
pub async fn is_channel_member(store: &dyn MessageStore, user_id: Uuid, channel_id: Uuid) -> Result<bool, StoreError> {
    let Some(channel) = store.find_channel(channel_id).await? else {
        return Ok(false);
    };
    Ok(store
        .find_member_in_guild(user_id, channel.guild_id)
        .await?
        .is_some())
}

// =============================================================================
// HELPERS
// =============================================================================

/// Load the member and require it to belong to the token subject.
async fn caller_member(store: &dyn MessageStore, caller: Uuid, member_id: Uuid) -> Result<Member, MessageError> {
    match store.find_member(member_id).await? {
        Some(member) if member.user_id == caller => Ok(member),
        _ => Err(MessageError::NotMember),
    }
}

async fn channel_in_guild(store: &dyn MessageStore, channel_id: Uuid, member: &Member) -> Result<Channel, MessageError> {
    match store.find_channel(channel_id).await? {
        Some(channel) if channel.guild_id == member.guild_id => Ok(channel),
        _ => Err(MessageError::NotMember),
    }
}

async fn authorize_modify(
    store: &dyn MessageStore,
    member: &Member,
    message_id: Uuid,
    channel_id: Uuid,
) -> Result<Message, MessageError> {
    let message = store
        .find_message(message_id)
        .await?
        .filter(|m| m.channel_id == channel_id)
        .ok_or(MessageError::NotFound(message_id))?;

    channel_in_guild(store, channel_id, member).await?;

    if message.member_id != member.id && !member.role.can_moderate() {
        return Err(MessageError::Forbidden { member_id: member.id, message_id });
    }
    Ok(message)
}

fn normalize_file_url(file_url: Option<String>) -> Option<String> {
    file_url
        .map(|url| url.trim().to_owned())
        .filter(|url| !url.is_empty())
}

/// Current time as milliseconds since Unix epoch.
fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
