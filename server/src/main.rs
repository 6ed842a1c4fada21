mod config;
mod db;
mod error;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use services::broadcast::Broadcaster;
use services::pg_store::PgMessageStore;
use services::relay::spawn_relay_worker;
use services::token::TokenKeys;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::ServerConfig::from_env().expect("invalid configuration");

    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("database init failed");

    let broadcaster = Broadcaster::new();
    let (publisher, _relay) = spawn_relay_worker(broadcaster.clone(), config.relay_queue_capacity);

    let state = state::AppState::new(
        Arc::new(PgMessageStore::new(pool)),
        broadcaster,
        publisher,
        Arc::new(TokenKeys::new(&config.auth_secret)),
        config.settings,
    );

    if config.settings.dev_token_issuer {
        tracing::warn!("dev token issuer enabled; do not expose this server publicly");
    }

    let app = routes::app(state);
    let port = config.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "chat relay listening");
    axum::serve(listener, app).await.expect("server failed");
}
