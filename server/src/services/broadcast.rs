//! Channel broadcast groups.
//!
//! DESIGN
//! ======
//! A group is the set of live connections subscribed to one channel id. Groups
//! are created on first subscribe and removed when their last connection
//! leaves, so the map only ever holds channels with listeners.
//!
//! Relay takes the read lock only long enough to clone the target senders,
//! then delivers with `try_send`. A full or closed connection queue drops the
//! event for that connection alone; other subscribers are never delayed.

use std::collections::HashMap;
use std::sync::Arc;

use events::ServerEvent;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

type Group = HashMap<Uuid, mpsc::Sender<ServerEvent>>;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Clone, Default)]
pub struct Broadcaster {
    groups: Arc<RwLock<HashMap<Uuid, Group>>>,
}

impl Broadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection_id` to the channel's group. Re-subscribing replaces
    /// the sender and is otherwise a no-op.
    pub async fn subscribe(&self, channel_id: Uuid, connection_id: Uuid, tx: mpsc::Sender<ServerEvent>) {
        let mut groups = self.groups.write().await;
        groups.entry(channel_id).or_default().insert(connection_id, tx);
    }

    /// Remove a connection from every listed group. Returns how many groups
    /// the connection actually left.
    pub async fn disconnect(&self, connection_id: Uuid, channels: impl IntoIterator<Item = Uuid>) -> usize {
        let mut groups = self.groups.write().await;
        let mut left = 0;
        for channel_id in channels {
            let Some(group) = groups.get_mut(&channel_id) else {
                continue;
            };
            if group.remove(&connection_id).is_some() {
                left += 1;
            }
            if group.is_empty() {
                groups.remove(&channel_id);
            }
        }
        left
    }

    /// Deliver `event` to every member of the channel's group except `exclude`.
    pub async fn broadcast(&self, channel_id: Uuid, event: &ServerEvent, exclude: Option<Uuid>) -> Delivery {
        let targets: Vec<mpsc::Sender<ServerEvent>> = {
            let groups = self.groups.read().await;
            let Some(group) = groups.get(&channel_id) else {
                return Delivery::default();
            };
            group
                .iter()
                .filter(|(connection_id, _)| exclude != Some(**connection_id))
                .map(|(_, tx)| tx.clone())
                .collect()
        };

        let mut delivery = Delivery::default();
        for tx in targets {
            // Best-effort: a full or closed queue skips this connection.
            if tx.try_send(event.clone()).is_ok() {
                delivery.delivered += 1;
            } else {
                delivery.dropped += 1;
            }
        }
        delivery
    }

    pub async fn group_size(&self, channel_id: Uuid) -> usize {
        self.groups
            .read()
            .await
            .get(&channel_id)
            .map_or(0, HashMap::len)
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
