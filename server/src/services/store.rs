//! Message store boundary.
//!
//! DESIGN
//! ======
//! `MessageStore` is the seam between the command service and persistence.
//! Production uses `PgMessageStore`; tests use an in-memory implementation
//! so authorization and relay behavior can be exercised without Postgres.
//! Every operation is a single statement; nothing here spans a transaction.

use async_trait::async_trait;
use events::Message;
use uuid::Uuid;

use crate::error::ErrorCode;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        "E_DATABASE"
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)))
    }
}

/// Member role within a guild. Ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Member,
    Admin,
    Owner,
}

impl Role {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "member" => Some(Self::Member),
            "admin" => Some(Self::Admin),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }

    /// Admins and owners may edit or delete any message in their guild.
    #[must_use]
    pub fn can_moderate(self) -> bool {
        self >= Self::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Voice,
    Video,
}

impl ChannelKind {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(Self::Text),
            "voice" => Some(Self::Voice),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// A user's membership in one guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: Uuid,
    pub user_id: Uuid,
    pub guild_id: Uuid,
    pub role: Role,
    pub joined_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: Uuid,
    pub guild_id: Uuid,
    pub name: String,
    pub kind: ChannelKind,
    pub created_at: i64,
}

// =============================================================================
// TRAIT
// =============================================================================

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn find_channel(&self, channel_id: Uuid) -> Result<Option<Channel>, StoreError>;

    async fn find_member(&self, member_id: Uuid) -> Result<Option<Member>, StoreError>;

    /// The member row for `user_id` in `guild_id`, if any.
    async fn find_member_in_guild(&self, user_id: Uuid, guild_id: Uuid) -> Result<Option<Member>, StoreError>;

    async fn find_message(&self, message_id: Uuid) -> Result<Option<Message>, StoreError>;

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Overwrite content and attachment, stamping `edited_at`. `None` if the
    /// row vanished between authorization and write.
    async fn update_message(
        &self,
        message_id: Uuid,
        content: &str,
        file_url: Option<&str>,
        edited_at: i64,
    ) -> Result<Option<Message>, StoreError>;

    /// Returns `false` if no row was deleted.
    async fn delete_message(&self, message_id: Uuid) -> Result<bool, StoreError>;

    /// Newest first by `(created_at DESC, id DESC)`.
    async fn list_messages(&self, channel_id: Uuid, limit: u32, offset: u32) -> Result<Vec<Message>, StoreError>;
}
