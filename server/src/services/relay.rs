//! Relay queue between the command path and the broadcaster.
//!
//! DESIGN
//! ======
//! Command handlers publish onto a bounded queue and return immediately. A
//! single worker drains the queue in order and hands each event to the
//! [`Broadcaster`], so per-channel delivery order matches publish order and a
//! slow relay never affects HTTP latency or status. A full queue drops the
//! event with a warning; subscribers recover on their next page fetch.

use events::{ChatEvent, ServerEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::broadcast::Broadcaster;

/// One event bound for a channel's broadcast group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub event: ChatEvent,
    /// Originating connection to skip, if the caller supplied one.
    pub exclude: Option<Uuid>,
}

/// Handle used by command handlers to enqueue relayed events.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<Publication>,
}

impl Publisher {
    #[must_use]
    pub fn new(tx: mpsc::Sender<Publication>) -> Self {
        Self { tx }
    }

    /// Enqueue without waiting. Returns `false` if the event was dropped.
    pub fn publish(&self, event: ChatEvent, exclude: Option<Uuid>) -> bool {
        let channel_id = event.channel_id();
        let name = event.name();
        match self.tx.try_send(Publication { event, exclude }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%channel_id, event = name, "relay: queue full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%channel_id, event = name, "relay: worker gone, event dropped");
                false
            }
        }
    }
}

/// Spawn the relay worker. The worker exits once every [`Publisher`] clone
/// is dropped.
#[must_use]
pub fn spawn_relay_worker(broadcaster: Broadcaster, capacity: usize) -> (Publisher, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Publication>(capacity.max(1));
    let handle = tokio::spawn(async move {
        while let Some(Publication { event, exclude }) = rx.recv().await {
            let channel_id = event.channel_id();
            let message_id = event.message_id();
            let server_event = ServerEvent::from(event);
            let delivery = broadcaster.broadcast(channel_id, &server_event, exclude).await;
            debug!(
                %channel_id,
                %message_id,
                event = server_event.name(),
                delivered = delivery.delivered,
                dropped = delivery.dropped,
                "relay: broadcast"
            );
        }
    });
    (Publisher::new(tx), handle)
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
