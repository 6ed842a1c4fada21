//! Grepable error codes shared by HTTP and websocket error surfaces.

use events::ServerEvent;

/// Grepable error code and retryable flag for structured error events.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Build a websocket `error` event from a typed error.
pub fn error_event(err: &(impl ErrorCode + ?Sized)) -> ServerEvent {
    ServerEvent::Error { code: err.error_code().to_owned(), message: err.to_string(), retryable: err.retryable() }
}
