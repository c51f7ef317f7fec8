//! # courier-server
//!
//! Chat backend binary.
//!
//! This binary provides:
//! - **REST API** (axum) for users, chats, messages and read receipts
//! - **SQLite persistence** through `courier-store`
//! - **Pub/sub delivery** of messages and receipts over the in-process hub
//!   or a libp2p gossipsub mesh, selected by `BROKER_URL`

mod api;
mod config;
mod error;
mod inbound;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_chat::ChatService;
use courier_net::ConnectOptions;
use courier_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,courier_server=debug,courier_chat=debug")
        }))
        .init();

    info!("Starting Courier chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database (runs pending migrations)
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    info!(path = ?db.path(), "Database ready");

    // -----------------------------------------------------------------------
    // 4. Connect to the broker and restore subscriptions
    // -----------------------------------------------------------------------
    let (broker, inbound) = courier_net::connect(
        &config.broker_url,
        &config.broker_client_id,
        ConnectOptions {
            bootstrap_peers_path: config.bootstrap_peers_path.clone(),
        },
    )
    .await?;

    let service = Arc::new(ChatService::new(
        Arc::new(db),
        broker,
        config.max_page_size,
    ));

    let restored = service.bootstrap().await?;
    info!(
        client_id = %service.broker().client_id(),
        channels = restored,
        "Broker session ready"
    );

    // -----------------------------------------------------------------------
    // 5. Spawn background tasks
    // -----------------------------------------------------------------------
    let _dispatcher = inbound::spawn_dispatcher(Arc::clone(&service), inbound);

    // -----------------------------------------------------------------------
    // 6. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let app_state = AppState::new(service, config);

    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    info!("Courier chat server stopped");
    Ok(())
}
