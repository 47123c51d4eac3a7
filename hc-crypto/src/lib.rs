//! HIPAA Chat Crypto - key management and message envelope encryption.
//!
//! This crate provides:
//! - `KeyManager`: generation, persistence, import and rotation of the
//!   symmetric key material
//! - `EncryptionService`: conversion between plaintext message objects and
//!   `EncryptedMessage` envelopes, with AES-256-GCM as the primary method
//!   and a legacy XOR transform as the degraded fallback
//!
//! The method used to decrypt is always the one recorded on the message,
//! never the current capability, so a rotated or downgraded client still
//! routes each envelope to the right routine.

pub mod encryption;
pub mod keys;
pub mod legacy;
pub mod message;

// Re-export key types
pub use encryption::{EncryptionInfo, EncryptionService};
pub use keys::{AeadKeys, CryptoCapability, KeyManager, LegacyKeys};
pub use message::{EncryptedMessage, EncryptionMethod, SealedMessage, UNDECRYPTABLE_TEXT};
