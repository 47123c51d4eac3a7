//! CLI command implementations.

pub mod config;
pub mod connect;
pub mod crypto;
pub mod keys;

use std::io::Read;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use hc_core::config::ConfigHandle;
use hc_core::error::{HcError, HcResult};
use hc_core::storage::FileKeyStore;
use hc_crypto::{EncryptionService, KeyManager};

/// Helper to open the durable key store named by config.
pub async fn open_key_store(config: &ConfigHandle) -> HcResult<Arc<FileKeyStore>> {
    let path = config.read().await.effective_key_store_path()?;
    Ok(Arc::new(FileKeyStore::new(path)))
}

/// Helper to create a key manager and encryption service from config.
pub async fn create_encryption(config: &ConfigHandle) -> HcResult<(Arc<KeyManager>, EncryptionService)> {
    let store = open_key_store(config).await?;
    let encryption_config = config.read().await.encryption.clone();
    let keys = Arc::new(KeyManager::new(encryption_config, store));
    let service = EncryptionService::new(keys.clone());
    Ok((keys, service))
}

/// Parse a JSON argument, reading stdin when it is "-".
pub fn read_json_arg(arg: &str) -> HcResult<Value> {
    let text = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        arg.to_string()
    };
    serde_json::from_str(&text).map_err(|e| HcError::Serialization(format!("invalid JSON input: {e}")))
}

/// Print a value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

/// Mask a secret, keeping only its length visible.
pub fn redact(secret: &str) -> String {
    if secret.is_empty() {
        "(not set)".to_string()
    } else {
        "*".repeat(secret.len().min(8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_json_arg() {
        let value = read_json_arg(r#"{"id": 1, "text": "hi"}"#).unwrap();
        assert_eq!(value["text"], "hi");
        assert!(read_json_arg("{not json").is_err());
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact(""), "(not set)");
        assert_eq!(redact("abc"), "***");
        assert_eq!(redact("a-very-long-bearer-token"), "********");
    }
}
