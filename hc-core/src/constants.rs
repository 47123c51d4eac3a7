//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "HipaaChat";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default WebSocket handshake timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default base delay between reconnection attempts in milliseconds.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Default maximum number of reconnection attempts.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 10;

/// Upper bound for any reconnection delay in milliseconds.
pub const RECONNECT_DELAY_CAP_MS: u64 = 30_000;

/// Growth factor applied per attempt when exponential backoff is enabled.
pub const RECONNECT_BACKOFF_FACTOR: f64 = 1.5;

/// Default heartbeat interval in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// A peer is declared dead after this many heartbeat intervals of silence.
pub const HEARTBEAT_DEAD_FACTOR: f64 = 2.5;

/// Default key rotation interval (24 hours) in milliseconds.
pub const DEFAULT_KEY_ROTATION_INTERVAL_MS: u64 = 24 * 60 * 60 * 1_000;

/// Query parameter carrying the bearer token on connect.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// WebSocket close codes used by the client.
pub mod close_codes {
    /// Normal, deliberate closure.
    pub const NORMAL: u16 = 1000;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Closed by the client after missing heartbeat responses.
    pub const HEARTBEAT_TIMEOUT: u16 = 4000;
    /// Closed by the client because the handshake did not finish in time.
    pub const CONNECT_TIMEOUT: u16 = 4001;
}

/// Keys used in durable local storage for key material.
pub mod storage_keys {
    /// Prefix shared by every persisted key.
    pub const PREFIX: &str = "hipaa_chat_";
    /// Base64 raw AES-256-GCM key.
    pub const ENCRYPTION_KEY: &str = "hipaa_chat_encryption_key";
    /// Base64 12-byte session IV.
    pub const ENCRYPTION_IV: &str = "hipaa_chat_encryption_iv";
    /// Legacy XOR key string.
    pub const LEGACY_KEY: &str = "hipaa_chat_legacy_key";

    /// All persisted key-material entries.
    pub const ALL: &[&str] = &[ENCRYPTION_KEY, ENCRYPTION_IV, LEGACY_KEY];
}

/// Server message type strings with built-in handling.
pub mod message_types {
    pub const HEARTBEAT: &str = "heartbeat";
    pub const MESSAGE: &str = "message";
    pub const USER_STATUS: &str = "user_status";
    pub const CHANNEL_UPDATE: &str = "channel_update";
    pub const ERROR: &str = "error";

    /// Outbound request for the initial user list snapshot.
    pub const GET_USERS: &str = "get_users";
    /// Outbound request for the initial channel list snapshot.
    pub const GET_CHANNELS: &str = "get_channels";
}
