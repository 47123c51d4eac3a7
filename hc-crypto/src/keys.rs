//! Symmetric key management.
//!
//! The `KeyManager` owns all key material. It loads persisted material
//! from a `KeyStore`, generates and persists fresh material when none is
//! usable, and rotates it on demand or on a timer. The Encryption Service
//! only reads the handles it hands out.
//!
//! Raw AES key bytes exist only long enough to persist or import them;
//! afterwards only the `Aes256Gcm` cipher is held, so the key is not
//! extractable from a running client.

use std::sync::Arc;
use std::time::Duration;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zeroize::{Zeroize, Zeroizing};

use hc_core::config::EncryptionConfig;
use hc_core::constants::storage_keys;
use hc_core::error::{HcError, HcResult};
use hc_core::storage::KeyStore;

use crate::legacy;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length in bytes.
pub const IV_LEN: usize = 12;

/// Which cryptographic primitive this client can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoCapability {
    /// AES-256-GCM is available.
    Aead,
    /// Only the legacy XOR transform is available.
    LegacyOnly,
}

impl CryptoCapability {
    /// Determine the capability for the given configuration.
    ///
    /// AES-GCM is always compiled in; `legacy_mode` forces the fallback
    /// for interop with peers that lack it.
    pub fn detect(config: &EncryptionConfig) -> Self {
        if config.legacy_mode {
            Self::LegacyOnly
        } else {
            Self::Aead
        }
    }

    /// Human-readable label for status displays.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Aead => "AES-256-GCM (RustCrypto)",
            Self::LegacyOnly => "legacy XOR only",
        }
    }
}

/// Imported AES-GCM key material.
pub struct AeadKeys {
    cipher: Aes256Gcm,
    session_iv: [u8; IV_LEN],
}

impl AeadKeys {
    fn import(raw_key: &[u8], iv: &[u8]) -> HcResult<Self> {
        if raw_key.len() != KEY_LEN {
            return Err(HcError::Crypto(format!(
                "invalid key length {} (expected {KEY_LEN})",
                raw_key.len()
            )));
        }
        let session_iv: [u8; IV_LEN] = iv.try_into().map_err(|_| {
            HcError::Crypto(format!("invalid iv length {} (expected {IV_LEN})", iv.len()))
        })?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(raw_key));
        Ok(Self { cipher, session_iv })
    }

    /// The IV generated alongside the key. Encryption does not reuse it;
    /// every message gets a fresh nonce.
    pub fn session_iv(&self) -> &[u8; IV_LEN] {
        &self.session_iv
    }

    /// Encrypt with a fresh random nonce. Returns (ciphertext, nonce).
    pub fn encrypt(&self, plaintext: &[u8]) -> HcResult<(Vec<u8>, [u8; IV_LEN])> {
        let mut nonce_bytes = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| HcError::Crypto(format!("AES-GCM encryption failed: {e}")))?;
        Ok((ciphertext, nonce_bytes))
    }

    /// Decrypt and authenticate.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> HcResult<Vec<u8>> {
        if nonce.len() != IV_LEN {
            return Err(HcError::Crypto(format!("invalid nonce length {}", nonce.len())));
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| HcError::Crypto(format!("AES-GCM decryption failed: {e}")))
    }
}

impl std::fmt::Debug for AeadKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadKeys").finish_non_exhaustive()
    }
}

/// Legacy XOR key material.
pub struct LegacyKeys {
    key: Zeroizing<String>,
}

impl LegacyKeys {
    fn new(key: String) -> HcResult<Self> {
        if key.is_empty() {
            return Err(HcError::Crypto("legacy key is empty".into()));
        }
        Ok(Self { key: Zeroizing::new(key) })
    }

    /// Apply the XOR transform (its own inverse).
    pub fn transform(&self, data: &[u8]) -> HcResult<Vec<u8>> {
        legacy::xor_transform(data, self.key.as_bytes())
    }
}

impl std::fmt::Debug for LegacyKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyKeys").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct KeyMaterial {
    aead: Option<Arc<AeadKeys>>,
    legacy: Option<Arc<LegacyKeys>>,
}

/// Owner of the symmetric key material.
pub struct KeyManager {
    config: EncryptionConfig,
    capability: CryptoCapability,
    store: Arc<dyn KeyStore>,
    material: RwLock<KeyMaterial>,
    /// Serializes init/clear/rotate so concurrent callers never generate twice.
    lifecycle: Mutex<()>,
    rotation_task: Mutex<Option<JoinHandle<()>>>,
}

impl KeyManager {
    /// Create a KeyManager. No material is loaded until `init_keys`.
    pub fn new(config: EncryptionConfig, store: Arc<dyn KeyStore>) -> Self {
        let capability = CryptoCapability::detect(&config);
        Self {
            config,
            capability,
            store,
            material: RwLock::new(KeyMaterial::default()),
            lifecycle: Mutex::new(()),
            rotation_task: Mutex::new(None),
        }
    }

    /// Whether encryption is enabled by configuration.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// The primitive in use.
    pub fn capability(&self) -> CryptoCapability {
        self.capability
    }

    /// Load or generate key material.
    ///
    /// Material that is already loaded is kept; only `rotate_keys`
    /// replaces it. Returns false when encryption is disabled or no usable
    /// material could be produced.
    pub async fn init_keys(&self) -> bool {
        let _guard = self.lifecycle.lock().await;
        self.init_locked().await
    }

    async fn init_locked(&self) -> bool {
        if !self.config.enabled {
            info!(category = "keys", "encryption disabled by configuration, skipping key init");
            return false;
        }
        if self.has_keys().await {
            debug!(category = "keys", "key material already loaded");
            return true;
        }

        match self.capability {
            CryptoCapability::Aead => {
                let aead = match self.load_aead() {
                    Ok(Some(keys)) => {
                        info!(category = "keys", "imported persisted AES-GCM key material");
                        keys
                    }
                    Ok(None) => {
                        info!(category = "keys", "no persisted key material, generating");
                        match self.generate_aead() {
                            Ok(keys) => keys,
                            Err(e) => {
                                error!(category = "keys", error = %e, "AES-GCM key generation failed");
                                return false;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(category = "keys", error = %e, "persisted key import failed, regenerating");
                        match self.generate_aead() {
                            Ok(keys) => keys,
                            Err(e) => {
                                error!(category = "keys", error = %e, "AES-GCM key generation failed");
                                return false;
                            }
                        }
                    }
                };

                // Keep any persisted legacy key so XOR-recorded messages stay readable.
                let legacy = self.load_legacy().ok().flatten();

                let mut material = self.material.write().await;
                material.aead = Some(Arc::new(aead));
                material.legacy = legacy.map(Arc::new);
                true
            }
            CryptoCapability::LegacyOnly => {
                warn!(
                    category = "keys",
                    hipaa_compliant = false,
                    "AES-GCM unavailable, using legacy XOR key material (not HIPAA-grade)"
                );
                let legacy = match self.load_legacy() {
                    Ok(Some(keys)) => keys,
                    Ok(None) | Err(_) => match self.generate_legacy() {
                        Ok(keys) => keys,
                        Err(e) => {
                            error!(category = "keys", error = %e, "legacy key generation failed");
                            return false;
                        }
                    },
                };
                let mut material = self.material.write().await;
                material.aead = None;
                material.legacy = Some(Arc::new(legacy));
                true
            }
        }
    }

    fn load_aead(&self) -> HcResult<Option<AeadKeys>> {
        let key = self.store.get(storage_keys::ENCRYPTION_KEY)?;
        let iv = self.store.get(storage_keys::ENCRYPTION_IV)?;
        let (Some(key), Some(iv)) = (key, iv) else {
            return Ok(None);
        };

        let raw_key = Zeroizing::new(
            BASE64
                .decode(key.as_bytes())
                .map_err(|e| HcError::Crypto(format!("stored key is not base64: {e}")))?,
        );
        let iv = BASE64
            .decode(iv.as_bytes())
            .map_err(|e| HcError::Crypto(format!("stored iv is not base64: {e}")))?;
        AeadKeys::import(&raw_key, &iv).map(Some)
    }

    fn generate_aead(&self) -> HcResult<AeadKeys> {
        let mut raw_key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut raw_key);
        OsRng.fill_bytes(&mut iv);

        let exported = Zeroizing::new(BASE64.encode(raw_key));
        let persisted = self
            .store
            .set(storage_keys::ENCRYPTION_KEY, &exported)
            .and_then(|()| self.store.set(storage_keys::ENCRYPTION_IV, &BASE64.encode(iv)));
        if let Err(e) = persisted {
            warn!(category = "keys", error = %e, "failed to persist key material, keys are session-only");
        }

        let keys = AeadKeys::import(&raw_key, &iv);
        raw_key.zeroize();
        debug!(category = "keys", "generated AES-256-GCM key");
        keys
    }

    fn load_legacy(&self) -> HcResult<Option<LegacyKeys>> {
        match self.store.get(storage_keys::LEGACY_KEY)? {
            Some(key) if !key.is_empty() => LegacyKeys::new(key).map(Some),
            _ => Ok(None),
        }
    }

    fn generate_legacy(&self) -> HcResult<LegacyKeys> {
        let key = legacy::generate_legacy_key();
        if let Err(e) = self.store.set(storage_keys::LEGACY_KEY, &key) {
            warn!(category = "keys", error = %e, "failed to persist legacy key, key is session-only");
        }
        LegacyKeys::new(key)
    }

    /// The imported AES-GCM material, if loaded.
    pub async fn encryption_keys(&self) -> Option<Arc<AeadKeys>> {
        self.material.read().await.aead.clone()
    }

    /// The legacy XOR material, if loaded.
    pub async fn legacy_keys(&self) -> Option<Arc<LegacyKeys>> {
        self.material.read().await.legacy.clone()
    }

    /// Whether key material for the current capability is loaded.
    pub async fn has_keys(&self) -> bool {
        let material = self.material.read().await;
        match self.capability {
            CryptoCapability::Aead => material.aead.is_some(),
            CryptoCapability::LegacyOnly => material.legacy.is_some(),
        }
    }

    /// Wipe key material from memory and from durable storage.
    pub async fn clear_keys(&self) {
        let _guard = self.lifecycle.lock().await;
        self.clear_locked().await;
    }

    async fn clear_locked(&self) {
        *self.material.write().await = KeyMaterial::default();
        for key in storage_keys::ALL {
            if let Err(e) = self.store.remove(key) {
                warn!(category = "keys", key, error = %e, "failed to remove persisted key");
            }
        }
        info!(category = "keys", "key material cleared");
    }

    /// Replace the key material: clear, then init.
    ///
    /// Messages encrypted under the old key become undecryptable.
    pub async fn rotate_keys(&self) -> bool {
        let _guard = self.lifecycle.lock().await;
        info!(category = "keys", "rotating key material");
        self.clear_locked().await;
        self.init_locked().await
    }

    /// Rotate keys every `interval`, replacing any existing schedule.
    ///
    /// The first rotation happens one full interval from now.
    pub async fn schedule_key_rotation(self: &Arc<Self>, interval: Duration) {
        if interval.is_zero() {
            warn!(category = "keys", "ignoring zero key rotation interval");
            return;
        }
        let Some(start) = tokio::time::Instant::now().checked_add(interval) else {
            warn!(category = "keys", "key rotation interval out of range, rotation not scheduled");
            return;
        };
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                if !manager.rotate_keys().await {
                    warn!(category = "keys", "scheduled key rotation produced no keys");
                }
            }
        });

        let mut slot = self.rotation_task.lock().await;
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        info!(category = "keys", interval_ms = interval.as_millis() as u64, "key rotation scheduled");
    }

    /// Rotate on the configured interval (24 hours by default).
    pub async fn schedule_default_rotation(self: &Arc<Self>) {
        let interval = self.config.rotation_interval();
        self.schedule_key_rotation(interval).await;
    }

    /// Stop scheduled rotation.
    pub async fn cancel_key_rotation(&self) {
        if let Some(task) = self.rotation_task.lock().await.take() {
            task.abort();
            debug!(category = "keys", "key rotation cancelled");
        }
    }
}

impl Drop for KeyManager {
    fn drop(&mut self) {
        if let Some(task) = self.rotation_task.get_mut().take() {
            task.abort();
        }
    }
}
