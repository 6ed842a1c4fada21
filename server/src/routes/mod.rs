//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the Command API, history reads, the realtime websocket
//! endpoint, and the dev token issuer under a single Axum router.

pub mod auth;
pub mod messages;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/messages", post(messages::create_message))
        .route(
            "/messages/{id}",
            patch(messages::update_message).delete(messages::delete_message),
        )
        .route("/channels/{channel_id}/messages", get(messages::list_messages))
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/dev/token", post(auth::dev_token))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
