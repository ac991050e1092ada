//! Per-chunk message authentication.
//!
//! Each chunk's ciphertext is authenticated with a BLAKE3 keyed hash over
//! `nonce || aad || ciphertext`, truncated to [`MAC_TAG_SIZE`] bytes. The MAC
//! key is derived from the chunk cipher key pair so it rotates alongside the
//! encryption key and never needs to be carried on the wire.

use crate::error::{CryptoError, Result};

pub const MAC_TAG_SIZE: usize = 16;

const MAC_KEY_DOMAIN: &[u8] = b"KERNEL-BLAKE3-MAC-KEY-V1";

/// Derives a 32-byte BLAKE3 keyed-hash key from the pair's MAC-key half.
/// Kept as a separate derivation (rather than using `mac_key` directly) so
/// the key-stretching domain is explicit and auditable.
pub fn derive_mac_key(mac_key: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(MAC_KEY_DOMAIN);
    hasher.update(mac_key);
    let hash = hasher.finalize();
    *hash.as_bytes()
}

/// Computes the authentication tag for one chunk. `aad` is
/// `contextId || chunkIndex` per `spec.md` §4.3.
pub fn compute_mac(
    nonce: &[u8; 12],
    aad: &[u8],
    ciphertext: &[u8],
    mac_key: &[u8; 32],
) -> [u8; MAC_TAG_SIZE] {
    let derived = derive_mac_key(mac_key);
    let mut hasher = blake3::Hasher::new_keyed(&derived);
    hasher.update(nonce);
    hasher.update(aad);
    hasher.update(ciphertext);
    let hash = hasher.finalize();
    let mut tag = [0u8; MAC_TAG_SIZE];
    tag.copy_from_slice(&hash.as_bytes()[..MAC_TAG_SIZE]);
    tag
}

/// Recomputes the tag and compares it in constant time against `expected`.
pub fn verify_mac(
    nonce: &[u8; 12],
    aad: &[u8],
    ciphertext: &[u8],
    mac_key: &[u8; 32],
    expected: &[u8],
) -> Result<()> {
    if expected.len() != MAC_TAG_SIZE {
        return Err(CryptoError::IntegrityFailure);
    }
    let computed = compute_mac(nonce, aad, ciphertext, mac_key);
    if subtle::ConstantTimeEq::ct_eq(&computed[..], expected).into() {
        Ok(())
    } else {
        Err(CryptoError::IntegrityFailure)
    }
}
