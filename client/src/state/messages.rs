//! Paginated channel message cache and its event reducer.
//!
//! SYSTEM CONTEXT
//! ==============
//! A channel's history is fetched page by page (newest first) over HTTP and
//! then kept current by realtime events. Events are folded into the loaded
//! pages instead of triggering a refetch, so cursors and page boundaries
//! stay exactly as the server returned them.
//!
//! DESIGN
//! ======
//! `reduce` is a pure function: it takes the current state by value and
//! returns the next one. Created messages go to the head of the first page;
//! updates and deletes are located by id across every loaded page. Older
//! pages are appended as fetched and never merged with live events.
//!
//! Live events can arrive before the first fetch. They collect in a page of
//! their own, and the channel still reports cursor 0 until history is
//! loaded. The first fetched page then absorbs that page, keeping only the
//! live messages the fetch did not already return.

#[cfg(test)]
#[path = "messages_test.rs"]
mod messages_test;

use std::collections::HashMap;

use events::{ChatEvent, Message, MessagePage};
use uuid::Uuid;

/// Locally materialized history of one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelMessages {
    channel_id: Uuid,
    /// Pages in fetch order. Page 0 holds the newest messages.
    pages: Vec<MessagePage>,
    /// Whether the first page of stored history has been appended.
    history_loaded: bool,
}

impl ChannelMessages {
    /// Empty cache; nothing fetched yet.
    #[must_use]
    pub fn new(channel_id: Uuid) -> Self {
        Self { channel_id, pages: Vec::new(), history_loaded: false }
    }

    #[must_use]
    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    #[must_use]
    pub fn pages(&self) -> &[MessagePage] {
        &self.pages
    }

    /// All loaded messages, newest first.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.pages.iter().flat_map(|page| page.items.iter())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.iter().map(|page| page.items.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.messages().find(|message| message.id == id)
    }

    /// Cursor for the next fetch: `Some(0)` until the first page of history
    /// is loaded, then the last page's cursor. `None` means history is
    /// exhausted.
    #[must_use]
    pub fn next_cursor(&self) -> Option<u32> {
        if !self.history_loaded {
            return Some(0);
        }
        self.pages.last().and_then(|page| page.next_cursor)
    }


    #[must_use]
    pub fn has_more(&self) -> bool {
        self.next_cursor().is_some()
    }

    fn find_mut(&mut self, id: Uuid) -> Option<&mut Message> {
        self.pages
            .iter_mut()
            .flat_map(|page| page.items.iter_mut())
            .find(|message| message.id == id)
    }
}

/// Fold one realtime event into the channel state.
///
/// Events for another channel are ignored. A `Created` event whose id is
/// already loaded (the echo of the caller's own mutation) replaces the
/// loaded copy in place instead of duplicating it.
#[must_use]
pub fn reduce(mut state: ChannelMessages, event: &ChatEvent) -> ChannelMessages {
    if event.channel_id() != state.channel_id {
        return state;
    }

    match event {
        ChatEvent::Created(message) => {
            if let Some(existing) = state.find_mut(message.id) {
                existing.clone_from(message);
                return state;
            }
            match state.pages.first_mut() {
                Some(first) => first.items.insert(0, message.clone()),
                None => state.pages.push(MessagePage { items: vec![message.clone()], next_cursor: None }),
            }
        }
        ChatEvent::Updated(message) => {
            if let Some(existing) = state.find_mut(message.id) {
                existing.clone_from(message);
            }
        }
        ChatEvent::Deleted { id, .. } => {
            for page in &mut state.pages {
                page.items.retain(|message| message.id != *id);
            }
        }
    }
    state
}

/// Append an older page fetched with [`ChannelMessages::next_cursor`].
///
/// The first page of history replaces the live-only page, if any; live
/// messages missing from the fetch stay on top.
#[must_use]
pub fn append_page(mut state: ChannelMessages, page: MessagePage) -> ChannelMessages {
    if state.history_loaded {
        state.pages.push(page);
        return state;
    }

    let MessagePage { items: fetched, next_cursor } = page;
    let mut items: Vec<Message> = state
        .pages
        .drain(..)
        .flat_map(|live| live.items)
        .filter(|message| !fetched.iter().any(|f| f.id == message.id))
        .collect();
    items.extend(fetched);
    state.pages.push(MessagePage { items, next_cursor });
    state.history_loaded = true;
    state
}

// =============================================================================
// MULTI-CHANNEL CACHE
// =============================================================================

/// Message caches for every channel the client has opened.
#[derive(Clone, Debug, Default)]
pub struct MessageCache {
    channels: HashMap<Uuid, ChannelMessages>,
}

impl MessageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn channel(&self, channel_id: Uuid) -> Option<&ChannelMessages> {
        self.channels.get(&channel_id)
    }

    /// Route an event to its channel. A `Created` event for a channel with no
    /// cache starts one; updates and deletes for unknown channels are dropped.
    pub fn apply(&mut self, event: &ChatEvent) {
        let channel_id = event.channel_id();
        let current = match self.channels.remove(&channel_id) {
            Some(current) => current,
            None if matches!(event, ChatEvent::Created(_)) => ChannelMessages::new(channel_id),
            None => return,
        };
        self.channels.insert(channel_id, reduce(current, event));
    }

    /// Append a fetched page to a channel, creating its cache on first load.
    pub fn append_page(&mut self, channel_id: Uuid, page: MessagePage) {
        let current = self
            .channels
            .remove(&channel_id)
            .unwrap_or_else(|| ChannelMessages::new(channel_id));
        self.channels.insert(channel_id, append_page(current, page));
    }

    /// Drop a channel's pages so the next fetch starts from the newest page.
    /// Used after a reconnect, when events may have been missed.
    pub fn reset_channel(&mut self, channel_id: Uuid) {
        self.channels.remove(&channel_id);
    }
}
