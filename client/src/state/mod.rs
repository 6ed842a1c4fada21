//! Local projections of server state.

pub mod connection;
pub mod messages;
