//! Message envelope encryption.
//!
//! `EncryptionService` turns plaintext message objects into
//! `EncryptedMessage` envelopes and back. Neither direction fails
//! outward: encryption degrades to the original message tagged
//! `encrypted: false`, decryption degrades to a placeholder carrying
//! `decryptionFailed: true`.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use hc_core::error::{HcError, HcResult};

use crate::keys::{CryptoCapability, KeyManager};
use crate::message::{self, EncryptedMessage, EncryptionMethod, SealedMessage};

/// Read-only encryption status for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionInfo {
    /// Encryption is enabled and key material is loaded.
    pub active: bool,
    /// Label of the method used for new messages.
    pub method: String,
    /// True only when the AES-GCM path is in use.
    pub hipaa_compliant: bool,
    /// Label of the available primitive.
    pub capability: String,
}

/// Encrypts and decrypts chat message envelopes.
#[derive(Clone)]
pub struct EncryptionService {
    keys: Arc<KeyManager>,
}

impl EncryptionService {
    /// Create a service reading key material from `keys`.
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    /// The underlying key manager.
    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Encrypt a message object.
    ///
    /// The whole message is serialized to canonical (key-sorted) JSON and
    /// encrypted; routing metadata is copied to the envelope in the clear.
    pub async fn encrypt_message(&self, message: &Value) -> SealedMessage {
        if !self.keys.is_enabled() {
            return SealedMessage::plain(message);
        }

        match self.try_encrypt(message).await {
            Ok(envelope) => SealedMessage::Encrypted(envelope),
            Err(e) => {
                warn!(category = "encryption", error = %e, "encryption failed, sending unencrypted");
                SealedMessage::plain(message)
            }
        }
    }

    async fn try_encrypt(&self, message: &Value) -> HcResult<EncryptedMessage> {
        self.ensure_keys().await?;
        let plaintext = serde_json::to_vec(message)?;

        match self.keys.capability() {
            CryptoCapability::Aead => {
                let keys = self.keys.encryption_keys().await.ok_or(HcError::MissingKeys)?;
                let (ciphertext, nonce) = keys.encrypt(&plaintext)?;
                debug!(category = "encryption", method = "AES-GCM", bytes = plaintext.len(), "message encrypted");
                Ok(EncryptedMessage::wrap(
                    message,
                    EncryptionMethod::AesGcm,
                    BASE64.encode(ciphertext),
                    Some(BASE64.encode(nonce)),
                ))
            }
            CryptoCapability::LegacyOnly => {
                let keys = self.keys.legacy_keys().await.ok_or(HcError::MissingKeys)?;
                let scrambled = keys.transform(&plaintext)?;
                debug!(category = "encryption", method = "XOR", bytes = plaintext.len(), "message encrypted");
                Ok(EncryptedMessage::wrap(
                    message,
                    EncryptionMethod::Xor,
                    BASE64.encode(scrambled),
                    None,
                ))
            }
        }
    }

    /// Decrypt a message received from the wire or from storage.
    ///
    /// Messages without a truthy `encrypted` flag pass through unchanged.
    pub async fn decrypt_message(&self, message: &Value) -> Value {
        if !message::is_encrypted_flag(message) {
            return message.clone();
        }

        match self.try_decrypt(message).await {
            Ok(plain) => plain,
            Err(e) => {
                let id = message.get("id").cloned().unwrap_or_default();
                warn!(category = "encryption", error = %e, %id, "unable to decrypt message");
                message::undecryptable(message)
            }
        }
    }

    async fn try_decrypt(&self, message: &Value) -> HcResult<Value> {
        let envelope: EncryptedMessage = serde_json::from_value(message.clone())?;
        let method = envelope.method()?;
        let data = BASE64
            .decode(envelope.encrypted_data.as_bytes())
            .map_err(|e| HcError::Crypto(format!("encryptedData is not base64: {e}")))?;

        // Material may be persisted but not yet loaded in this process.
        if !self.keys.has_keys().await {
            self.keys.init_keys().await;
        }

        let plaintext = match method {
            EncryptionMethod::AesGcm => {
                let iv = envelope
                    .iv
                    .as_deref()
                    .ok_or_else(|| HcError::Crypto("AES-GCM message without iv".into()))?;
                let nonce = BASE64
                    .decode(iv.as_bytes())
                    .map_err(|e| HcError::Crypto(format!("iv is not base64: {e}")))?;
                let keys = self.keys.encryption_keys().await.ok_or(HcError::MissingKeys)?;
                keys.decrypt(&data, &nonce)?
            }
            EncryptionMethod::Xor => {
                let keys = self.keys.legacy_keys().await.ok_or(HcError::MissingKeys)?;
                keys.transform(&data)?
            }
        };

        Ok(serde_json::from_slice(&plaintext)?)
    }

    async fn ensure_keys(&self) -> HcResult<()> {
        if self.keys.has_keys().await || self.keys.init_keys().await {
            Ok(())
        } else {
            Err(HcError::MissingKeys)
        }
    }

    /// Current encryption status.
    pub async fn encryption_info(&self) -> EncryptionInfo {
        let capability = self.keys.capability();
        let enabled = self.keys.is_enabled();
        let method = match (enabled, capability) {
            (false, _) => "None",
            (true, CryptoCapability::Aead) => "AES-GCM-256",
            (true, CryptoCapability::LegacyOnly) => "XOR (legacy)",
        };
        EncryptionInfo {
            active: enabled && self.keys.has_keys().await,
            method: method.to_string(),
            hipaa_compliant: enabled && capability == CryptoCapability::Aead,
            capability: capability.label().to_string(),
        }
    }
}
