//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so route
//! handlers can stay focused on protocol translation and auth plumbing.

pub mod broadcast;
#[cfg(test)]
pub mod memory_store;
pub mod message;
pub mod pg_store;
pub mod relay;
pub mod store;
pub mod token;
