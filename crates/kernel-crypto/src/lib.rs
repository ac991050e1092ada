//! Chunked, authenticated encryption for blob payloads.
//!
//! Keys are derived via HKDF from a master key ([`keymanager`]) and split
//! into an AES-256-CTR encryption key and a BLAKE3-keyed MAC key
//! ([`CipherKeyPair`]). [`stream`] implements the on-disk wire format: a
//! one-byte version followed by independently authenticated chunks, each
//! bound to its stream and position via AAD so chunks cannot be reordered
//! or spliced across objects.

pub mod error;
pub mod keymanager;
pub mod mac;
pub mod stream;
pub mod transform;

pub use error::{CryptoError, Result};
pub use keymanager::{CipherKeyPair, KeyManager, TpmProvider, CHUNK_KEY_SIZE, MASTER_KEY_SIZE};
pub use mac::{compute_mac, verify_mac, MAC_TAG_SIZE};
pub use stream::{
    decrypt_all, ChunkedCipherReader, ChunkedCipherWriter, FORMAT_VERSION, MAX_CHUNK_PLAINTEXT,
};
pub use transform::EncryptionTransform;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_match_wire_format() {
        assert_eq!(FORMAT_VERSION, 1);
        assert_eq!(MAX_CHUNK_PLAINTEXT, 1024 * 1024);
        assert_eq!(CHUNK_KEY_SIZE, 64);
        assert_eq!(MASTER_KEY_SIZE, 32);
    }

    #[test]
    fn end_to_end_through_key_manager() {
        let manager = KeyManager::new([5u8; MASTER_KEY_SIZE]);
        let key_pair = manager.key_for_version(manager.current_version()).unwrap();

        let mut writer = ChunkedCipherWriter::new(key_pair.clone(), b"manifest-7".to_vec());
        writer.write(b"object bytes").unwrap();
        let stream = writer.finish().unwrap();

        let plaintext = decrypt_all(&key_pair, b"manifest-7", &stream).unwrap();
        assert_eq!(plaintext, b"object bytes");
    }
}
