//! Legacy XOR stream transform.
//!
//! This is obfuscation, not encryption: the key repeats and there is no
//! authentication. It exists only for the degraded mode and for reading
//! messages that were recorded with the `XOR` method.

use rand::distributions::Alphanumeric;
use rand::Rng;

use hc_core::error::{HcError, HcResult};

/// Length of a generated legacy key in characters.
pub const LEGACY_KEY_LEN: usize = 32;

/// XOR `data` byte-by-byte against the repeating `key`.
///
/// The transform is its own inverse.
pub fn xor_transform(data: &[u8], key: &[u8]) -> HcResult<Vec<u8>> {
    if key.is_empty() {
        return Err(HcError::Crypto("legacy key is empty".into()));
    }
    Ok(data
        .iter()
        .zip(key.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect())
}

/// Generate a random alphanumeric legacy key.
pub fn generate_legacy_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LEGACY_KEY_LEN)
        .map(char::from)
        .collect()
}
