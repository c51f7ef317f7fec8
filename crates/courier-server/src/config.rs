//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use courier_shared::constants::{
    DEFAULT_BROKER_CLIENT_ID, DEFAULT_BROKER_URL, DEFAULT_HTTP_PORT, MAX_PAGE_SIZE,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: the platform data directory (`courier/courier.db`).
    pub database_path: Option<PathBuf>,

    /// `memory://…` for the in-process hub, otherwise a libp2p multiaddr the
    /// gossip node listens on.
    /// Env: `BROKER_URL`
    pub broker_url: String,

    /// Prefix of the broker client id; a random suffix is appended per process.
    /// Env: `BROKER_CLIENT_ID`
    pub broker_client_id: String,

    /// File of bootstrap peer multiaddrs (gossip mode only).
    /// Env: `BOOTSTRAP_PEERS_PATH`
    pub bootstrap_peers_path: Option<PathBuf>,

    /// Upper bound on message page sizes.
    /// Env: `MAX_PAGE_SIZE`
    pub max_page_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            broker_url: DEFAULT_BROKER_URL.to_string(),
            broker_client_id: DEFAULT_BROKER_CLIENT_ID.to_string(),
            bootstrap_peers_path: None,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.  Invalid values
    /// are logged and the default kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(url) = lookup("BROKER_URL").filter(|u| !u.is_empty()) {
            config.broker_url = url;
        }

        if let Some(id) = lookup("BROKER_CLIENT_ID").filter(|id| !id.is_empty()) {
            config.broker_client_id = id;
        }

        if let Some(path) = lookup("BOOTSTRAP_PEERS_PATH").filter(|p| !p.is_empty()) {
            config.bootstrap_peers_path = Some(PathBuf::from(path));
        }

        if let Some(val) = lookup("MAX_PAGE_SIZE") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.max_page_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_PAGE_SIZE, using default"),
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}
