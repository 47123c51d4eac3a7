//! HIPAA Chat Core - Foundation types shared by the transport and crypto crates.
//!
//! This crate provides:
//! - Application configuration (server address, reconnect policy, heartbeat, encryption)
//! - The unified error type
//! - Structured logging with tracing
//! - The authentication collaborator interface
//! - Durable key/value storage for key material
//! - Platform directories and common constants

pub mod auth;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod platform;
pub mod storage;

// Re-export commonly used items at the crate root
pub use auth::{AuthProvider, StaticAuth};
pub use config::{AppConfig, ConfigHandle};
pub use error::{HcError, HcResult};
pub use logging::init_logging;
pub use platform::Platform;
pub use storage::{FileKeyStore, KeyStore, MemoryKeyStore};
