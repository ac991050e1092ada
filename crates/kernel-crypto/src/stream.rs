//! Chunked, authenticated cipher stream.
//!
//! Wire format: `[version:1]` followed by repeated
//! `[chunk-length:u32][nonce:12][ciphertext+tag:N]`. Each chunk encrypts at
//! most [`MAX_CHUNK_PLAINTEXT`] bytes of plaintext under AES-256-CTR, then
//! authenticates `nonce || aad || ciphertext` with a BLAKE3 keyed MAC. The
//! AAD is `contextId || chunkIndex`, binding every chunk to its position in
//! its own stream and preventing reordering or cross-file substitution.
//!
//! Random access is unsupported by design: the nonce for chunk N is a
//! deterministic function of N, and chunks must be consumed in order for the
//! AAD check to mean anything.

use aes::Aes256;
use cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

use crate::error::{CryptoError, Result};
use crate::keymanager::CipherKeyPair;
use crate::mac::{self, MAC_TAG_SIZE};

type Aes256Ctr = Ctr128BE<Aes256>;

/// Wire format version. Bumped if the chunk layout ever changes.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum plaintext bytes encrypted under a single chunk.
pub const MAX_CHUNK_PLAINTEXT: usize = 1024 * 1024;

const NONCE_SIZE: usize = 12;

/// Expands a 12-byte nonce into the 16-byte IV `Ctr128BE` expects, with a
/// zeroed 32-bit counter prefix (the same convention AES-GCM uses for its
/// `J0` construction).
fn ctr_iv(nonce: &[u8; NONCE_SIZE]) -> cipher::generic_array::GenericArray<u8, cipher::consts::U16> {
    let mut iv = [0u8; 16];
    iv[..NONCE_SIZE].copy_from_slice(nonce);
    cipher::generic_array::GenericArray::clone_from_slice(&iv)
}

/// Builds the AAD bound to a chunk: `contextId || chunkIndex:u32` (big-endian).
fn chunk_aad(context_id: &[u8], chunk_index: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(context_id.len() + 4);
    aad.extend_from_slice(context_id);
    aad.extend_from_slice(&chunk_index.to_be_bytes());
    aad
}

/// Derives the per-chunk nonce deterministically from the context id and
/// chunk index, so encryption needs no external nonce source and decryption
/// can validate it was not substituted from another stream.
fn chunk_nonce(context_id: &[u8], chunk_index: u32) -> [u8; NONCE_SIZE] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"KERNEL-CHUNK-NONCE-V1");
    hasher.update(context_id);
    hasher.update(&chunk_index.to_be_bytes());
    let hash = hasher.finalize();
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&hash.as_bytes()[..NONCE_SIZE]);
    nonce
}

/// Buffers plaintext in memory and emits one authenticated chunk per
/// [`MAX_CHUNK_PLAINTEXT`] bytes accumulated. `finish` flushes any partial
/// chunk and closes the stream, mirroring `spec.md`'s writer semantics
/// ("buffer 1 MiB, then emit one chunk; Close finalizes the last partial
/// chunk").
pub struct ChunkedCipherWriter {
    key_pair: CipherKeyPair,
    context_id: Vec<u8>,
    next_chunk_index: u32,
    buffer: Vec<u8>,
    out: Vec<u8>,
    header_written: bool,
}

impl ChunkedCipherWriter {
    pub fn new(key_pair: CipherKeyPair, context_id: impl Into<Vec<u8>>) -> Self {
        Self {
            key_pair,
            context_id: context_id.into(),
            next_chunk_index: 0,
            buffer: Vec::with_capacity(MAX_CHUNK_PLAINTEXT),
            out: Vec::new(),
            header_written: false,
        }
    }

    /// Feeds plaintext into the stream, emitting full chunks as the buffer
    /// fills. Not blocking: this only ever performs in-memory work.
    pub fn write(&mut self, plaintext: &[u8]) -> Result<()> {
        if !self.header_written {
            self.out.push(FORMAT_VERSION);
            self.header_written = true;
        }
        self.buffer.extend_from_slice(plaintext);
        while self.buffer.len() >= MAX_CHUNK_PLAINTEXT {
            let rest = self.buffer.split_off(MAX_CHUNK_PLAINTEXT);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            self.emit_chunk(&chunk)?;
        }
        Ok(())
    }

    fn emit_chunk(&mut self, plaintext: &[u8]) -> Result<()> {
        let index = self.next_chunk_index;
        self.next_chunk_index = self
            .next_chunk_index
            .checked_add(1)
            .ok_or_else(|| CryptoError::EncryptionFailed("chunk index overflow".into()))?;

        let nonce = chunk_nonce(&self.context_id, index);
        let aad = chunk_aad(&self.context_id, index);

        let mut ciphertext = plaintext.to_vec();
        let mut cipher = Aes256Ctr::new(self.key_pair.encryption_key().into(), &ctr_iv(&nonce));
        cipher.apply_keystream(&mut ciphertext);

        let tag = mac::compute_mac(&nonce, &aad, &ciphertext, self.key_pair.mac_key());

        let chunk_len = (ciphertext.len() + tag.len()) as u32;
        self.out.extend_from_slice(&chunk_len.to_be_bytes());
        self.out.extend_from_slice(&nonce);
        self.out.extend_from_slice(&ciphertext);
        self.out.extend_from_slice(&tag);
        Ok(())
    }

    /// Flushes any buffered partial chunk and returns the completed stream.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if !self.header_written {
            self.out.push(FORMAT_VERSION);
        }
        if !self.buffer.is_empty() {
            let remaining = std::mem::take(&mut self.buffer);
            self.emit_chunk(&remaining)?;
        }
        Ok(self.out)
    }
}

/// Decrypts a complete chunked-cipher stream, verifying the MAC of every
/// chunk and returning the concatenated plaintext.
///
/// `spec.md` describes readers that "pull one chunk per refill"; this
/// in-memory decoder reflects that chunk-at-a-time structure internally
/// (via [`ChunkedCipherReader`]) even though it hands back the full buffer.
pub fn decrypt_all(key_pair: &CipherKeyPair, context_id: &[u8], stream: &[u8]) -> Result<Vec<u8>> {
    let mut reader = ChunkedCipherReader::new(key_pair.clone(), context_id.to_vec(), stream)?;
    let mut plaintext = Vec::new();
    while let Some(chunk) = reader.next_chunk()? {
        plaintext.extend_from_slice(&chunk);
    }
    Ok(plaintext)
}

/// Pulls one decrypted chunk at a time from an in-memory byte slice,
/// mirroring the refill-one-chunk reader contract without requiring an
/// async byte stream in this layer's tests.
pub struct ChunkedCipherReader<'a> {
    key_pair: CipherKeyPair,
    context_id: Vec<u8>,
    remaining: &'a [u8],
    next_chunk_index: u32,
}

impl<'a> ChunkedCipherReader<'a> {
    pub fn new(key_pair: CipherKeyPair, context_id: Vec<u8>, stream: &'a [u8]) -> Result<Self> {
        let (version, rest) = stream.split_first().ok_or(CryptoError::TruncatedStream)?;
        if *version != FORMAT_VERSION {
            return Err(CryptoError::UnsupportedVersion(*version));
        }
        Ok(Self {
            key_pair,
            context_id,
            remaining: rest,
            next_chunk_index: 0,
        })
    }

    /// Returns the next decrypted chunk, or `None` once the stream is
    /// exhausted.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.remaining.is_empty() {
            return Ok(None);
        }
        if self.remaining.len() < 4 {
            return Err(CryptoError::TruncatedStream);
        }
        let (len_bytes, rest) = self.remaining.split_at(4);
        let chunk_len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
        if chunk_len < NONCE_SIZE + MAC_TAG_SIZE {
            return Err(CryptoError::TruncatedStream);
        }
        if rest.len() < NONCE_SIZE + chunk_len {
            return Err(CryptoError::TruncatedStream);
        }

        let (nonce_bytes, rest) = rest.split_at(NONCE_SIZE);
        let nonce: [u8; NONCE_SIZE] = nonce_bytes.try_into().unwrap();
        let body_len = chunk_len - MAC_TAG_SIZE;
        let (ciphertext, rest) = rest.split_at(body_len);
        let (tag, rest) = rest.split_at(MAC_TAG_SIZE);

        let index = self.next_chunk_index;
        let expected_nonce = chunk_nonce(&self.context_id, index);
        if nonce != expected_nonce {
            return Err(CryptoError::IntegrityFailure);
        }
        let aad = chunk_aad(&self.context_id, index);
        mac::verify_mac(&nonce, &aad, ciphertext, self.key_pair.mac_key(), tag)?;

        let mut plaintext = ciphertext.to_vec();
        let mut cipher = Aes256Ctr::new(self.key_pair.encryption_key().into(), &ctr_iv(&nonce));
        cipher.apply_keystream(&mut plaintext);

        self.next_chunk_index = self
            .next_chunk_index
            .checked_add(1)
            .ok_or(CryptoError::TruncatedStream)?;
        self.remaining = rest;
        Ok(Some(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymanager::CHUNK_KEY_SIZE;

    fn test_key_pair() -> CipherKeyPair {
        CipherKeyPair::from_bytes([42u8; CHUNK_KEY_SIZE])
    }

    #[test]
    fn round_trips_small_payload() {
        let key_pair = test_key_pair();
        let mut writer = ChunkedCipherWriter::new(key_pair.clone(), b"ctx-1".to_vec());
        writer.write(b"hello chunked cipher").unwrap();
        let stream = writer.finish().unwrap();

        let plaintext = decrypt_all(&key_pair, b"ctx-1", &stream).unwrap();
        assert_eq!(plaintext, b"hello chunked cipher");
    }

    #[test]
    fn splits_large_payload_into_multiple_chunks() {
        let key_pair = test_key_pair();
        let payload = vec![7u8; MAX_CHUNK_PLAINTEXT * 2 + 500];
        let mut writer = ChunkedCipherWriter::new(key_pair.clone(), b"ctx-2".to_vec());
        writer.write(&payload).unwrap();
        let stream = writer.finish().unwrap();

        let mut reader = ChunkedCipherReader::new(key_pair, b"ctx-2".to_vec(), &stream).unwrap();
        let mut chunk_count = 0;
        let mut plaintext = Vec::new();
        while let Some(chunk) = reader.next_chunk().unwrap() {
            chunk_count += 1;
            plaintext.extend_from_slice(&chunk);
        }
        assert_eq!(chunk_count, 3);
        assert_eq!(plaintext, payload);
    }

    #[test]
    fn empty_write_still_produces_a_valid_header() {
        let key_pair = test_key_pair();
        let writer = ChunkedCipherWriter::new(key_pair.clone(), b"ctx-empty".to_vec());
        let stream = writer.finish().unwrap();
        assert_eq!(stream, vec![FORMAT_VERSION]);

        let plaintext = decrypt_all(&key_pair, b"ctx-empty", &stream).unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn rejects_unsupported_version() {
        let key_pair = test_key_pair();
        let stream = vec![9u8];
        let err = decrypt_all(&key_pair, b"ctx", &stream).unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedVersion(9)));
    }

    #[test]
    fn rejects_chunk_swapped_from_another_context() {
        let key_pair = test_key_pair();
        let mut writer_a = ChunkedCipherWriter::new(key_pair.clone(), b"ctx-a".to_vec());
        writer_a.write(b"payload from context a").unwrap();
        let stream_a = writer_a.finish().unwrap();

        // Decrypting chunk bytes produced for "ctx-a" under "ctx-b" must
        // fail: the AAD binds each chunk to its originating context.
        let err = decrypt_all(&key_pair, b"ctx-b", &stream_a).unwrap_err();
        assert!(matches!(err, CryptoError::IntegrityFailure));
    }

    #[test]
    fn rejects_reordered_chunks() {
        let key_pair = test_key_pair();
        let payload = vec![3u8; MAX_CHUNK_PLAINTEXT * 2];
        let mut writer = ChunkedCipherWriter::new(key_pair.clone(), b"ctx-reorder".to_vec());
        writer.write(&payload).unwrap();
        let stream = writer.finish().unwrap();

        // Swap the two chunks' bytes. Since chunk 1 is the same length as
        // chunk 0 here, splice them to simulate reordering.
        let header_len = 1;
        let chunk_len = u32::from_be_bytes(
            stream[header_len..header_len + 4].try_into().unwrap(),
        ) as usize;
        let first_chunk_total = 4 + chunk_len;
        let mut tampered = stream[header_len + first_chunk_total..].to_vec();
        tampered.extend_from_slice(&stream[header_len..header_len + first_chunk_total]);
        let mut rebuilt = vec![FORMAT_VERSION];
        rebuilt.extend_from_slice(&tampered);

        let err = decrypt_all(&key_pair, b"ctx-reorder", &rebuilt).unwrap_err();
        assert!(matches!(err, CryptoError::IntegrityFailure));
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let key_pair = test_key_pair();
        let mut writer = ChunkedCipherWriter::new(key_pair.clone(), b"ctx-trunc".to_vec());
        writer.write(b"some data").unwrap();
        let stream = writer.finish().unwrap();
        let truncated = &stream[..stream.len() - 5];

        let err = decrypt_all(&key_pair, b"ctx-trunc", truncated).unwrap_err();
        assert!(matches!(err, CryptoError::TruncatedStream));
    }
}
