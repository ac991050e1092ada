//! Key Management
//!
//! Handles encryption key lifecycle: generation, versioning and rotation.
//! Keys are derived from a master key via HKDF (HMAC-SHA256) and versioned
//! so rotation never requires re-encrypting previously written objects.
//!
//! Version 1 -> keys derived from master_key || version
//! Version 2 -> new derivation once rotated; version 1 stays readable.

use std::collections::HashMap;
use std::sync::RwLock;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};

/// AES-256-CTR + BLAKE3-keyed-MAC needs two independent 32-byte keys.
pub const CHUNK_KEY_SIZE: usize = 64;

/// Master key size (256 bits).
pub const MASTER_KEY_SIZE: usize = 32;

const HKDF_INFO_CONTEXT: &[u8] = b"KERNEL-CHUNKED-CIPHER-KEY-V1";
const HKDF_SALT_DOMAIN: &[u8] = b"KERNEL-HKDF-SALT-V1";
const HKDF_SALT_SIZE: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Abstraction over TPM/HSM backends that can supply master key material.
pub trait TpmProvider {
    fn read_master_key(&self) -> Result<[u8; MASTER_KEY_SIZE]>;

    fn read_kdf_salt(&self) -> Result<Option<[u8; HKDF_SALT_SIZE]>> {
        Ok(None)
    }
}

/// Two independent AES-256 keys: `encryption_key` drives the per-chunk CTR
/// keystream, `mac_key` seeds the BLAKE3-keyed chunk MAC.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherKeyPair {
    encryption_key: [u8; 32],
    mac_key: [u8; 32],
}

impl CipherKeyPair {
    pub fn from_bytes(bytes: [u8; CHUNK_KEY_SIZE]) -> Self {
        let mut encryption_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        encryption_key.copy_from_slice(&bytes[0..32]);
        mac_key.copy_from_slice(&bytes[32..64]);
        Self {
            encryption_key,
            mac_key,
        }
    }

    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption_key
    }

    pub fn mac_key(&self) -> &[u8; 32] {
        &self.mac_key
    }

    #[cfg(test)]
    pub fn to_bytes(&self) -> [u8; CHUNK_KEY_SIZE] {
        let mut bytes = [0u8; CHUNK_KEY_SIZE];
        bytes[0..32].copy_from_slice(&self.encryption_key);
        bytes[32..64].copy_from_slice(&self.mac_key);
        bytes
    }
}

impl std::fmt::Debug for CipherKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKeyPair")
            .field("encryption_key", &"[REDACTED]")
            .field("mac_key", &"[REDACTED]")
            .finish()
    }
}

/// Versioned key derivation and rotation. `Manifest.Pipeline.KeyId` stores
/// the version as a decimal string (`"1"`, `"2"`, ...).
pub struct KeyManager {
    master_key: [u8; MASTER_KEY_SIZE],
    hkdf_salt: [u8; HKDF_SALT_SIZE],
    key_cache: RwLock<HashMap<u32, CipherKeyPair>>,
    current_version: std::sync::atomic::AtomicU32,
    rotating: std::sync::atomic::AtomicBool,
}

impl KeyManager {
    pub fn new(master_key: [u8; MASTER_KEY_SIZE]) -> Self {
        let hkdf_salt = Self::derive_hkdf_salt(&master_key);
        let manager = Self {
            master_key,
            hkdf_salt,
            key_cache: RwLock::new(HashMap::new()),
            current_version: std::sync::atomic::AtomicU32::new(1),
            rotating: std::sync::atomic::AtomicBool::new(false),
        };
        if let Ok(key) = manager.derive_key(1) {
            manager.key_cache.write().unwrap().insert(1, key);
        }
        manager
    }

    fn derive_hkdf_salt(master_key: &[u8; MASTER_KEY_SIZE]) -> [u8; HKDF_SALT_SIZE] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(HKDF_SALT_DOMAIN);
        hasher.update(master_key);
        let hash = hasher.finalize();
        let mut salt = [0u8; HKDF_SALT_SIZE];
        salt.copy_from_slice(&hash.as_bytes()[..HKDF_SALT_SIZE]);
        salt
    }

    fn hkdf_extract(&self) -> Result<[u8; 32]> {
        let mut mac = HmacSha256::new_from_slice(&self.hkdf_salt)
            .map_err(|e| CryptoError::KeyDerivationFailed(format!("HKDF extract init: {e}")))?;
        mac.update(&self.master_key);
        Ok(mac.finalize().into_bytes().into())
    }

    fn hkdf_expand(prk: &[u8; 32], info: &[u8]) -> Result<[u8; CHUNK_KEY_SIZE]> {
        let mut okm = [0u8; CHUNK_KEY_SIZE];
        let mut generated = 0usize;
        let mut previous_block: Vec<u8> = Vec::new();
        let mut counter: u8 = 1;

        while generated < CHUNK_KEY_SIZE {
            let mut mac = HmacSha256::new_from_slice(prk)
                .map_err(|e| CryptoError::KeyDerivationFailed(format!("HKDF expand init: {e}")))?;
            mac.update(&previous_block);
            mac.update(info);
            mac.update(&[counter]);
            let block: [u8; 32] = mac.finalize().into_bytes().into();
            let take = std::cmp::min(block.len(), CHUNK_KEY_SIZE - generated);
            okm[generated..generated + take].copy_from_slice(&block[..take]);
            previous_block = block.to_vec();
            generated += take;
            counter = counter
                .checked_add(1)
                .ok_or_else(|| CryptoError::KeyDerivationFailed("HKDF counter overflow".into()))?;
        }

        Ok(okm)
    }

    fn hkdf_info(version: u32) -> Vec<u8> {
        let mut info = Vec::with_capacity(HKDF_INFO_CONTEXT.len() + 4);
        info.extend_from_slice(HKDF_INFO_CONTEXT);
        info.extend_from_slice(&version.to_be_bytes());
        info
    }

    /// Reads the master key from `KERNEL_MASTER_KEY` (hex-encoded).
    pub fn from_env() -> Result<Self> {
        let hex_key = std::env::var("KERNEL_MASTER_KEY").map_err(|_| {
            CryptoError::InvalidConfiguration(
                "KERNEL_MASTER_KEY environment variable not set".into(),
            )
        })?;
        let bytes = hex::decode(&hex_key)
            .map_err(|e| CryptoError::InvalidConfiguration(format!("invalid hex: {e}")))?;
        if bytes.len() != MASTER_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: MASTER_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut master_key = [0u8; MASTER_KEY_SIZE];
        master_key.copy_from_slice(&bytes);
        Ok(Self::new(master_key))
    }

    pub fn from_tpm<P: TpmProvider>(provider: &P) -> Result<Self> {
        let master_key = provider.read_master_key()?;
        let mut manager = Self::new(master_key);
        if let Some(salt) = provider.read_kdf_salt()? {
            manager.hkdf_salt = salt;
        }
        Ok(manager)
    }

    fn derive_key(&self, version: u32) -> Result<CipherKeyPair> {
        let prk = self.hkdf_extract()?;
        let info = Self::hkdf_info(version);
        let okm = Self::hkdf_expand(&prk, &info)?;
        Ok(CipherKeyPair::from_bytes(okm))
    }

    /// Returns the cached key for `version`, deriving and caching it first
    /// if necessary.
    pub fn key_for_version(&self, version: u32) -> Result<CipherKeyPair> {
        if let Some(key) = self.key_cache.read().unwrap().get(&version) {
            return Ok(key.clone());
        }
        let key = self.derive_key(version)?;
        self.key_cache.write().unwrap().insert(version, key.clone());
        Ok(key)
    }

    pub fn current_version(&self) -> u32 {
        self.current_version.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn is_rotating(&self) -> bool {
        self.rotating.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Begins rotation: derives and caches a new key version, leaving old
    /// versions readable. `spec.md` §3 requires `KeyId` to resolve at write
    /// time; rotation never invalidates manifests already written.
    pub fn rotate(&self) -> Result<u32> {
        if self.is_rotating() {
            return Err(CryptoError::KeyRotationInProgress);
        }
        self.rotating.store(true, std::sync::atomic::Ordering::SeqCst);
        let new_version = self.current_version() + 1;
        self.current_version
            .store(new_version, std::sync::atomic::Ordering::SeqCst);
        let key = self.derive_key(new_version)?;
        self.key_cache.write().unwrap().insert(new_version, key);
        Ok(new_version)
    }

    pub fn complete_rotation(&self) {
        self.rotating.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn available_versions(&self) -> Vec<u32> {
        let mut versions: Vec<u32> = self.key_cache.read().unwrap().keys().copied().collect();
        versions.sort_unstable();
        versions
    }
}

impl Drop for KeyManager {
    fn drop(&mut self) {
        self.master_key.zeroize();
        self.hkdf_salt.zeroize();
        self.key_cache.write().unwrap().clear();
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("master_key", &"[REDACTED]")
            .field("current_version", &self.current_version())
            .field("rotating", &self.is_rotating())
            .finish()
    }
}

/// Adapts [`KeyManager`] to [`kernel_common::traits::Keyring`] so the
/// pipeline can fetch key material without depending on `kernel-crypto`'s
/// concrete rotation API.
impl kernel_common::traits::Keyring for KeyManager {
    fn current_key_id(&self) -> String {
        self.current_version().to_string()
    }

    fn key_bytes(&self, key_id: &str) -> kernel_common::error::Result<Vec<u8>> {
        let version: u32 = key_id.parse().map_err(|_| {
            kernel_common::error::KernelError::ValidationFailed(format!(
                "invalid key id: {key_id}"
            ))
        })?;
        let pair = self
            .key_for_version(version)
            .map_err(|e| kernel_common::error::KernelError::internal(e.to_string()))?;
        Ok(pair.to_bytes_full())
    }
}

impl CipherKeyPair {
    /// Full 64-byte key material, used only at the `Keyring` trait
    /// boundary where the caller needs both keys together.
    pub fn to_bytes_full(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CHUNK_KEY_SIZE);
        out.extend_from_slice(&self.encryption_key);
        out.extend_from_slice(&self.mac_key);
        out
    }
}
