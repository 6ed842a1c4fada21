//! In-memory [`MessageStore`] for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use events::Message;
use uuid::Uuid;

use super::store::{Channel, ChannelKind, Member, MessageStore, Role, StoreError};

#[derive(Default)]
struct Tables {
    channels: HashMap<Uuid, Channel>,
    members: HashMap<Uuid, Member>,
    messages: HashMap<Uuid, Message>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail like an exhausted pool.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self.tables.lock().expect("memory store mutex should lock"))
    }

    pub fn seed_channel(&self, guild_id: Uuid) -> Channel {
        let channel = Channel {
            id: Uuid::new_v4(),
            guild_id,
            name: format!("channel-{}", Uuid::new_v4().simple()),
            kind: ChannelKind::Text,
            created_at: 0,
        };
        let mut tables = self.tables.lock().expect("memory store mutex should lock");
        tables.channels.insert(channel.id, channel.clone());
        channel
    }

    pub fn seed_member(&self, user_id: Uuid, guild_id: Uuid, role: Role) -> Member {
        let member = Member { id: Uuid::new_v4(), user_id, guild_id, role, joined_at: 0 };
        let mut tables = self.tables.lock().expect("memory store mutex should lock");
        tables.members.insert(member.id, member.clone());
        member
    }

    pub fn seed_message(&self, channel_id: Uuid, member_id: Uuid, content: &str, created_at: i64) -> Message {
        let message = Message {
            id: Uuid::new_v4(),
            member_id,
            channel_id,
            content: content.to_owned(),
            file_url: None,
            created_at,
            edited_at: None,
        };
        let mut tables = self.tables.lock().expect("memory store mutex should lock");
        tables.messages.insert(message.id, message.clone());
        message
    }

    #[must_use]
    pub fn message(&self, message_id: Uuid) -> Option<Message> {
        let tables = self.tables.lock().expect("memory store mutex should lock");
        tables.messages.get(&message_id).cloned()
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        let tables = self.tables.lock().expect("memory store mutex should lock");
        tables.messages.len()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn find_channel(&self, channel_id: Uuid) -> Result<Option<Channel>, StoreError> {
        Ok(self.check()?.channels.get(&channel_id).cloned())
    }

    async fn find_member(&self, member_id: Uuid) -> Result<Option<Member>, StoreError> {
        Ok(self.check()?.members.get(&member_id).cloned())
    }

    async fn find_member_in_guild(&self, user_id: Uuid, guild_id: Uuid) -> Result<Option<Member>, StoreError> {
        Ok(self
            .check()?
            .members
            .values()
            .find(|m| m.user_id == user_id && m.guild_id == guild_id)
            .cloned())
    }

    async fn find_message(&self, message_id: Uuid) -> Result<Option<Message>, StoreError> {
        Ok(self.check()?.messages.get(&message_id).cloned())
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        self.check()?.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn update_message(
        &self,
        message_id: Uuid,
        content: &str,
        file_url: Option<&str>,
        edited_at: i64,
    ) -> Result<Option<Message>, StoreError> {
        let mut tables = self.check()?;
        Ok(tables.messages.get_mut(&message_id).map(|row| {
            content.clone_into(&mut row.content);
            row.file_url = file_url.map(ToOwned::to_owned);
            row.edited_at = Some(edited_at);
            row.clone()
        }))
    }

    async fn delete_message(&self, message_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.check()?.messages.remove(&message_id).is_some())
    }

    async fn list_messages(&self, channel_id: Uuid, limit: u32, offset: u32) -> Result<Vec<Message>, StoreError> {
        let tables = self.check()?;
        let mut rows: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}
