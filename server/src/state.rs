//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the message store, the broadcast groups, the relay publisher,
//! and the token keys. Clone is required by Axum; every field is an `Arc`
//! or a cheap handle.

use std::sync::Arc;

use crate::config::Settings;
use crate::services::broadcast::Broadcaster;
use crate::services::relay::Publisher;
use crate::services::store::MessageStore;
use crate::services::token::TokenKeys;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub broadcaster: Broadcaster,
    pub publisher: Publisher,
    pub tokens: Arc<TokenKeys>,
    pub settings: Settings,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        broadcaster: Broadcaster,
        publisher: Publisher,
        tokens: Arc<TokenKeys>,
        settings: Settings,
    ) -> Self {
        Self { store, broadcaster, publisher, tokens, settings }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
