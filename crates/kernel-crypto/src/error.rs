use thiserror::Error;

/// Errors surfaced by key management and the chunked cipher stream.
///
/// These are designed to be informative for debugging while avoiding
/// leaking key material in production logs.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key not found: version {version}")]
    KeyNotFound { version: u32 },

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("key rotation in progress")]
    KeyRotationInProgress,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("unsupported chunked-cipher format version: {0}")]
    UnsupportedVersion(u8),

    #[error("truncated chunked-cipher stream")]
    TruncatedStream,

    #[error("chunk exceeds maximum plaintext size: {0} bytes")]
    ChunkTooLarge(usize),

    #[error("integrity verification failed: MAC mismatch")]
    IntegrityFailure,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
