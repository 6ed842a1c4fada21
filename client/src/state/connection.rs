//! Realtime connection lifecycle and subscription bookkeeping.
//!
//! There is no server-side session resumption: every new connection starts
//! with no group memberships. This model remembers which channels the client
//! cares about so they can be re-subscribed (and refetched) after a reconnect.

#[cfg(test)]
#[path = "connection_test.rs"]
mod connection_test;

use std::collections::BTreeSet;

use events::ClientEvent;
use uuid::Uuid;

/// WebSocket connection status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected; socket is closed or not yet opened.
    #[default]
    Disconnected,
    /// Handshake is in progress.
    Connecting,
    /// Socket is open and the server sent `connected`.
    Connected,
}

#[derive(Clone, Debug, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Connection id assigned by the server for the current socket.
    pub connection_id: Option<Uuid>,
    /// Channels the client wants live updates for.
    channels: BTreeSet<Uuid>,
    /// Channels acknowledged on the current socket.
    acknowledged: BTreeSet<Uuid>,
}

impl ConnectionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connecting(&mut self) {
        self.status = ConnectionStatus::Connecting;
        self.connection_id = None;
        self.acknowledged.clear();
    }

    /// Handle `connected`. Returns the subscribe events to send on the new
    /// socket, one per remembered channel.
    pub fn connected(&mut self, connection_id: Uuid) -> Vec<ClientEvent> {
        self.status = ConnectionStatus::Connected;
        self.connection_id = Some(connection_id);
        self.acknowledged.clear();
        self.channels
            .iter()
            .map(|channel_id| ClientEvent::Subscribe { channel_id: *channel_id })
            .collect()
    }

    pub fn disconnected(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.connection_id = None;
        self.acknowledged.clear();
    }

    /// Remember a channel. Returns the subscribe event to send now if the
    /// socket is up and the channel is new.
    pub fn want(&mut self, channel_id: Uuid) -> Option<ClientEvent> {
        let inserted = self.channels.insert(channel_id);
        (inserted && self.status == ConnectionStatus::Connected).then_some(ClientEvent::Subscribe { channel_id })
    }

    pub fn subscribed(&mut self, channel_id: Uuid) {
        self.acknowledged.insert(channel_id);
    }

    #[must_use]
    pub fn is_live(&self, channel_id: Uuid) -> bool {
        self.status == ConnectionStatus::Connected && self.acknowledged.contains(&channel_id)
    }
}
