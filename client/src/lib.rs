//! Client-side state for the realtime chat.
//!
//! ARCHITECTURE
//! ============
//! Everything here is a synchronous, in-memory transformation. Network code
//! (socket, HTTP) lives in the callers; they feed decoded events and fetched
//! pages into these models and render the result.

pub mod state;
