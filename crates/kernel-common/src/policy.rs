use serde::{Deserialize, Serialize};

/// Security level requested by a caller. `spec.md` §3 `StorageIntent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Security {
    None,
    Standard,
    High,
    Quantum,
}

/// Compression quality requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Fast,
    Optimal,
    High,
}

/// Availability requested by a caller. Not yet consumed by any storage
/// backend in this workspace; carried through so `PolicyEnforcer` can be
/// extended without a wire-format break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Single,
    Redundant,
    GeoRedundant,
    Global,
}

/// High-level intent a caller expresses on `StoreBlob`; translated into a
/// concrete [`Pipeline`] by `kernel-policy`'s `PipelineOptimizer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageIntent {
    pub security: Security,
    pub compression: Compression,
    pub availability: Availability,
}

impl Default for StorageIntent {
    fn default() -> Self {
        Self {
            security: Security::Standard,
            compression: Compression::Fast,
            availability: Availability::Single,
        }
    }
}

/// One step in a [`Pipeline`]'s transformation order, named by plugin
/// category (`"Compression"`, `"Encryption"`, ...). Resolved to a concrete
/// plugin id by `kernel-pipeline`'s transformation resolver.
pub type PipelineOrderStep = String;

/// Immutable, per-manifest transformation configuration. `spec.md` §3.
/// Once attached to a `Manifest` this must never change; reads always use
/// the manifest's own copy, never the current global policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub transformation_order: Vec<PipelineOrderStep>,
    pub enable_compression: bool,
    pub enable_encryption: bool,
    #[serde(default)]
    pub compression_provider_id: Option<String>,
    #[serde(default)]
    pub crypto_provider_id: Option<String>,
    #[serde(default)]
    pub key_id: Option<String>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            transformation_order: vec!["Compression".into(), "Encryption".into()],
            enable_compression: false,
            enable_encryption: false,
            compression_provider_id: None,
            crypto_provider_id: None,
            key_id: None,
        }
    }
}

impl Pipeline {
    pub fn none() -> Self {
        Self {
            transformation_order: Vec::new(),
            enable_compression: false,
            enable_encryption: false,
            compression_provider_id: None,
            crypto_provider_id: None,
            key_id: None,
        }
    }

    pub fn compressed(provider_id: impl Into<String>) -> Self {
        Self {
            transformation_order: vec!["Compression".into()],
            enable_compression: true,
            enable_encryption: false,
            compression_provider_id: Some(provider_id.into()),
            crypto_provider_id: None,
            key_id: None,
        }
    }

    pub fn encrypted(crypto_provider_id: impl Into<String>, key_id: impl Into<String>) -> Self {
        Self {
            transformation_order: vec!["Encryption".into()],
            enable_compression: false,
            enable_encryption: true,
            compression_provider_id: None,
            crypto_provider_id: Some(crypto_provider_id.into()),
            key_id: Some(key_id.into()),
        }
    }

    pub fn compressed_and_encrypted(
        compression_provider_id: impl Into<String>,
        crypto_provider_id: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Self {
        Self {
            transformation_order: vec!["Compression".into(), "Encryption".into()],
            enable_compression: true,
            enable_encryption: true,
            compression_provider_id: Some(compression_provider_id.into()),
            crypto_provider_id: Some(crypto_provider_id.into()),
            key_id: Some(key_id.into()),
        }
    }

    /// `Pipeline::Write` invariant (a): if encryption is forced on but no
    /// key id was filled in yet (e.g. by a sentinel auto-encrypt judgment),
    /// it must be filled before the transformation stage runs.
    pub fn needs_key_id(&self) -> bool {
        self.enable_encryption && self.key_id.is_none()
    }
}
