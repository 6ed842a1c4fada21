//! PostgreSQL-backed [`MessageStore`].

use async_trait::async_trait;
use events::Message;
use sqlx::PgPool;
use uuid::Uuid;

use super::store::{Channel, ChannelKind, Member, MessageStore, Role, StoreError};

type MessageRow = (Uuid, Uuid, Uuid, String, Option<String>, i64, Option<i64>);
type MemberRow = (Uuid, Uuid, Uuid, String, i64);

const MESSAGE_COLUMNS: &str = "id, member_id, channel_id, content, file_url, created_at, edited_at";

#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn message_from_row(row: MessageRow) -> Message {
    let (id, member_id, channel_id, content, file_url, created_at, edited_at) = row;
    Message { id, member_id, channel_id, content, file_url, created_at, edited_at }
}

fn member_from_row(row: MemberRow) -> Result<Member, StoreError> {
    let (id, user_id, guild_id, role, joined_at) = row;
    let role = Role::parse(&role).ok_or_else(|| StoreError::CorruptRow(format!("member {id} has role {role:?}")))?;
    Ok(Member { id, user_id, guild_id, role, joined_at })
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn find_channel(&self, channel_id: Uuid) -> Result<Option<Channel>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, String, String, i64)>(
            "SELECT id, guild_id, name, kind, created_at FROM channels WHERE id = $1",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, guild_id, name, kind, created_at)| {
            let kind = ChannelKind::parse(&kind)
                .ok_or_else(|| StoreError::CorruptRow(format!("channel {id} has kind {kind:?}")))?;
            Ok(Channel { id, guild_id, name, kind, created_at })
        })
        .transpose()
    }

    async fn find_member(&self, member_id: Uuid) -> Result<Option<Member>, StoreError> {
        let row = sqlx::query_as::<_, MemberRow>(
            "SELECT id, user_id, guild_id, role, joined_at FROM members WHERE id = $1",
        )
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(member_from_row).transpose()
    }

    async fn find_member_in_guild(&self, user_id: Uuid, guild_id: Uuid) -> Result<Option<Member>, StoreError> {
        let row = sqlx::query_as::<_, MemberRow>(
            "SELECT id, user_id, guild_id, role, joined_at FROM members WHERE user_id = $1 AND guild_id = $2",
        )
        .bind(user_id)
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(member_from_row).transpose()
    }

    async fn find_message(&self, message_id: Uuid) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(message_from_row))
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (id, member_id, channel_id, content, file_url, created_at, edited_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(message.id)
        .bind(message.member_id)
        .bind(message.channel_id)
        .bind(&message.content)
        .bind(message.file_url.as_deref())
        .bind(message.created_at)
        .bind(message.edited_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_message(
        &self,
        message_id: Uuid,
        content: &str,
        file_url: Option<&str>,
        edited_at: i64,
    ) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "UPDATE messages SET content = $2, file_url = $3, edited_at = $4 WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(message_id)
        .bind(content)
        .bind(file_url)
        .bind(edited_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(message_from_row))
    }

    async fn delete_message(&self, message_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_messages(&self, channel_id: Uuid, limit: u32, offset: u32) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE channel_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(channel_id)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(message_from_row).collect())
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "pg_store_test.rs"]
mod tests;
