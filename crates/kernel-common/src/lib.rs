//! Shared identifiers, data model and error taxonomy for the storage
//! microkernel. Every other crate in the workspace depends on this one;
//! it carries no I/O of its own.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;
pub mod event;
pub mod policy;
pub mod traits;

pub use error::{KernelError, Result};
pub use event::Event;
pub use policy::{Pipeline, PipelineOrderStep, StorageIntent};

/// Maximum plaintext bytes buffered per chunk by [`traits::Compressor`] and
/// the chunked cipher stream before a chunk boundary is emitted.
pub const MAX_CHUNK_PLAINTEXT: usize = 1024 * 1024; // 1 MiB

/// Default journal compaction threshold for `DurableState`.
pub const DEFAULT_COMPACTION_THRESHOLD: u64 = 5000;

/// Default interval between `SentinelDaemon` scan passes.
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 300;

/// Opaque identifier for a [`Manifest`]. Never reused once minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestId(pub Uuid);

impl ManifestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// 32 lowercase hex characters, matching the format asserted by the
    /// happy-path end-to-end scenario.
    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for ManifestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ManifestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Content-addressable hash, currently always a SHA-256 hex digest for
/// manifest checksums (`Manifest::Checksum`) and a BLAKE3 hex digest for
/// internal dedup-advisor lookups. Callers should not assume which.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn from_bytes(hash: &[u8]) -> Self {
        Self(hex::encode(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Storage tier a blob currently resides in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Hot
    }
}

/// Durable record describing one stored blob. `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub id: ManifestId,
    pub container_id: String,
    /// `<scheme>://<containerId>/<blobName>`
    pub blob_uri: String,
    pub size_bytes: u64,
    pub created_at: u64,
    pub last_accessed_at: u64,
    pub owner_id: String,
    /// SHA-256 hex digest of the plaintext.
    pub checksum: String,
    pub etag: String,
    pub pipeline: Pipeline,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub governance_tags: HashMap<String, String>,
    #[serde(default)]
    pub vector_embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub content_summary: Option<String>,
    #[serde(default)]
    pub current_tier: Tier,
}

impl Manifest {
    pub fn blob_name(&self) -> &str {
        self.blob_uri
            .rsplit('/')
            .next()
            .unwrap_or(&self.blob_uri)
    }

    pub fn scheme(&self) -> &str {
        self.blob_uri.split("://").next().unwrap_or("")
    }
}

/// Capability category a plugin advertises at handshake time. `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginCategory {
    Storage,
    Metadata,
    Transformation,
    Security,
    Governance,
    Feature,
    Orchestration,
}

/// Readiness a plugin reports during handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadyState {
    NotReady,
    Initializing,
    PartiallyReady,
    Ready,
    Degraded,
}

impl ReadyState {
    pub fn is_admittable(&self) -> bool {
        matches!(
            self,
            ReadyState::Ready | ReadyState::PartiallyReady | ReadyState::Degraded
        )
    }
}

/// Static description of a plugin, exchanged during the registry handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: PluginCategory,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<PluginDependency>,
    pub ready_state: ReadyState,
    pub init_duration_ms: u64,
    #[serde(default)]
    pub health_interval_ms: Option<u64>,
    /// Quality level used when `kernel-policy` must choose among several
    /// plugins in the same category for a transformation step.
    #[serde(default)]
    pub quality_level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDependency {
    pub interface: String,
    pub optional: bool,
}

/// ACL permission bits. `spec.md` §4.7.
pub mod permission {
    pub const READ: u32 = 1 << 0;
    pub const WRITE: u32 = 1 << 1;
    pub const EXECUTE: u32 = 1 << 2;
    pub const DELETE: u32 = 1 << 3;
    pub const FULL_CONTROL: u32 = READ | WRITE | EXECUTE | DELETE;
}

/// Trigger that caused a [`traits::SentinelContext`] to be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    OnWrite,
    OnRead,
    OnSchedule,
    OnDelete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_id_hex_is_32_chars() {
        let id = ManifestId::new();
        assert_eq!(id.to_hex().len(), 32);
        assert!(id.to_hex().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn manifest_blob_name_and_scheme() {
        let m = Manifest {
            id: ManifestId::new(),
            container_id: "private".into(),
            blob_uri: "file://private/greeting.txt".into(),
            size_bytes: 5,
            created_at: 0,
            last_accessed_at: 0,
            owner_id: "owner-1".into(),
            checksum: String::new(),
            etag: String::new(),
            pipeline: Pipeline::default(),
            tags: HashMap::new(),
            governance_tags: HashMap::new(),
            vector_embedding: None,
            content_summary: None,
            current_tier: Tier::Hot,
        };
        assert_eq!(m.blob_name(), "greeting.txt");
        assert_eq!(m.scheme(), "file");
    }

    #[test]
    fn ready_state_admittable() {
        assert!(ReadyState::Ready.is_admittable());
        assert!(ReadyState::PartiallyReady.is_admittable());
        assert!(ReadyState::Degraded.is_admittable());
        assert!(!ReadyState::NotReady.is_admittable());
        assert!(!ReadyState::Initializing.is_admittable());
    }
}
