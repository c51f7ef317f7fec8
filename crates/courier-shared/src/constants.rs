/// Protocol version string for libp2p identify
pub const PROTOCOL_VERSION: &str = "/courier/1.0.0";

/// Application name
pub const APP_NAME: &str = "Courier";

/// Prefix of every deterministic direct-chat channel id
pub const DIRECT_CHANNEL_PREFIX: &str = "direct_";

/// Prefix of every randomly assigned group channel id
pub const GROUP_CHANNEL_PREFIX: &str = "group_";

/// Message content bounds, counted in chars
pub const MIN_CONTENT_CHARS: usize = 1;
pub const MAX_CONTENT_CHARS: usize = 5000;

/// Maximum group name length in chars
pub const MAX_GROUP_NAME_CHARS: usize = 100;

/// Username length bounds
pub const MIN_USERNAME_CHARS: usize = 3;
pub const MAX_USERNAME_CHARS: usize = 30;

/// Default page size for message listings
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Upper bound applied to any requested page size
pub const MAX_PAGE_SIZE: u32 = 200;

/// Maximum broker payload size in bytes (64 KiB)
pub const MAX_PAYLOAD_SIZE: usize = 65_536;

/// GossipSub heartbeat interval in seconds
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 1;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Default broker client id prefix
pub const DEFAULT_BROKER_CLIENT_ID: &str = "chat-backend";

/// Default broker URL (in-process hub)
pub const DEFAULT_BROKER_URL: &str = "memory://local";
