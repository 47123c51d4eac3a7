//! Global error types for the chat client.
//!
//! All error categories are unified into a single `HcError` enum with
//! conversions from underlying library errors. The public transport and
//! crypto operations never surface these to callers directly; they log
//! them and degrade to boolean or placeholder results.

use thiserror::Error;

/// Convenience type alias for Results using HcError.
pub type HcResult<T> = Result<T, HcError>;

/// Unified error type covering all error categories.
#[derive(Error, Debug)]
pub enum HcError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Transport errors --
    /// WebSocket connection error.
    #[error("socket error: {0}")]
    Socket(String),

    // -- Authorization errors --
    /// The caller is not authenticated or no token is available.
    #[error("authentication required: {0}")]
    Unauthenticated(String),

    // -- Crypto errors --
    /// Encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// No key material is loaded.
    #[error("encryption keys not initialized")]
    MissingKeys,

    /// A message named an encryption method this client does not know.
    #[error("unsupported encryption method: {0}")]
    UnsupportedMethod(String),

    // -- Storage errors --
    /// Durable key storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Dispatch errors --
    /// A registered message handler failed.
    #[error("handler error: {0}")]
    Handler(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for HcError {
    fn from(e: serde_json::Error) -> Self {
        HcError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for HcError {
    fn from(e: toml::de::Error) -> Self {
        HcError::Config(e.to_string())
    }
}
