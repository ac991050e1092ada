//! Capability interfaces implemented by plugins and resolved through the
//! `PluginRegistry`. Async methods return `BoxFuture` so these traits stay
//! object-safe and can be stored behind `Arc<dyn Trait>` in the registry.

use std::collections::HashMap;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::{Manifest, ManifestId, PluginCategory};

/// Per-call context threaded through a transformation step. `spec.md` §4.9:
/// "Runtime args per step include {Owner,Tenant,Key?}".
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    pub owner: String,
    pub tenant: Option<String>,
    pub key: Option<Vec<u8>>,
    pub manifest_id: ManifestId,
}

/// A pipeline transformation plugin (compression, encryption, ...). The
/// engine buffers each object fully in memory at this layer; true chunked
/// streaming happens one level down inside `kernel-crypto`'s
/// `ChunkedCipherStream`, which this trait's encryption implementations
/// wrap.
pub trait Transformation: Send + Sync {
    fn plugin_id(&self) -> &str;

    fn category(&self) -> PluginCategory {
        PluginCategory::Transformation
    }

    /// The `Pipeline.TransformationOrder` slot this plugin fills, e.g.
    /// `"Compression"` or `"Encryption"`. `spec.md` §4.6 selects transforms
    /// by this name, independently of the broad [`PluginCategory`].
    fn step_name(&self) -> &str;

    fn quality_level(&self) -> u32 {
        0
    }

    /// Applied in `Pipeline.TransformationOrder` order while writing.
    fn on_write<'a>(
        &'a self,
        input: Vec<u8>,
        ctx: &'a TransformContext,
    ) -> BoxFuture<'a, Result<Vec<u8>>>;

    /// Applied in reverse order while reading.
    fn on_read<'a>(
        &'a self,
        input: Vec<u8>,
        ctx: &'a TransformContext,
    ) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Uniform storage backend interface. `spec.md` §4.2.
pub trait StorageBackend: Send + Sync {
    /// The URI scheme this backend is registered under (`"file"`, `"seg"`,
    /// `"mirror"`, `"net"`, `"mem"`, ...).
    fn scheme(&self) -> &str;

    fn save<'a>(&'a self, uri: &'a str, data: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    fn load<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;

    fn delete<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<()>>;

    fn exists<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Backends that can enumerate their contents support `DataVacuum`.
    /// Default: unsupported.
    fn list<'a>(&'a self) -> BoxFuture<'a, Result<Vec<(String, u64)>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn supports_listing(&self) -> bool {
        false
    }
}

/// Predicate grammar for `MetadataIndex::execute_query`. `spec.md` §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Contains,
    Gt,
    Lt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logic {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct CompositeQuery {
    pub predicates: Vec<Predicate>,
    pub logic: Logic,
}

/// Metadata index interface. `spec.md` §4.4. Two reference implementations
/// live in `kernel-index`: an in-memory map and a SQLite-backed store.
pub trait MetadataIndex: Send + Sync {
    fn index_manifest<'a>(&'a self, manifest: Manifest) -> BoxFuture<'a, Result<()>>;

    fn get_manifest<'a>(&'a self, blob_name: &'a str) -> BoxFuture<'a, Result<Option<Manifest>>>;

    fn get_manifest_by_id<'a>(
        &'a self,
        id: ManifestId,
    ) -> BoxFuture<'a, Result<Option<Manifest>>>;

    fn update_last_access<'a>(
        &'a self,
        id: ManifestId,
        timestamp: u64,
    ) -> BoxFuture<'a, Result<()>>;

    fn remove_manifest<'a>(&'a self, id: ManifestId) -> BoxFuture<'a, Result<()>>;

    /// Weakly-consistent snapshot of every stored manifest.
    fn enumerate_all<'a>(&'a self) -> BoxFuture<'a, Result<Vec<Manifest>>>;

    fn execute_query<'a>(
        &'a self,
        query: &'a CompositeQuery,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<ManifestId>>>;

    fn search<'a>(
        &'a self,
        text: &'a str,
        vector: Option<&'a [f32]>,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<ManifestId>>>;
}

/// Abstract key management used by encryption transformations.
pub trait Keyring: Send + Sync {
    fn current_key_id(&self) -> String;

    fn key_bytes(&self, key_id: &str) -> Result<Vec<u8>>;
}

/// Evaluates a [`crate::StorageIntent`] into a concrete `Pipeline`. Kept as
/// a trait so `kernel-policy` can be swapped for tests without dragging in
/// its concrete hierarchical-rule storage.
pub trait PolicyEvaluator: Send + Sync {
    fn resolve(&self, container_id: &str, blob_name: &str) -> crate::Pipeline;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclDecision {
    pub granted: u32,
    pub denied: u32,
}

impl AclDecision {
    pub fn has_access(&self, required: u32) -> bool {
        (self.granted & required) == required && (self.denied & required) == 0
    }
}

/// Access control interface, implemented concretely in `kernel-access`.
pub trait AccessControl: Send + Sync {
    fn has_access(&self, container_id: &str, principal: &str, required: u32) -> bool;

    fn grant(&self, container_id: &str, principal: &str, level: u32);
}

/// What triggered a sentinel evaluation.
pub use crate::Trigger;

/// Severity used by [`Alert`] aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub code: String,
    pub severity: Severity,
    pub message: String,
}

/// Context passed to every sentinel module. `spec.md` §4.8.
#[derive(Debug, Clone)]
pub struct SentinelContext {
    pub trigger: Trigger,
    pub manifest: Manifest,
    /// Plaintext sample available to the module, when the trigger carries
    /// a data stream (writes, deep scans). `None` for metadata-only reads.
    pub data: Option<Vec<u8>>,
    pub principal: String,
}

/// Outcome of evaluating one or more sentinel modules. `spec.md` §4.8.
#[derive(Debug, Clone, Default)]
pub struct Judgment {
    pub intervention_required: bool,
    pub block_operation: bool,
    pub enforce_pipeline: Option<crate::Pipeline>,
    pub add_tags: HashMap<String, String>,
    pub update_properties: HashMap<String, String>,
    pub alert: Option<Alert>,
    pub heal_with_replica_id: Option<String>,
}

impl Judgment {
    pub fn merge(mut self, other: Judgment) -> Judgment {
        self.intervention_required |= other.intervention_required;
        self.block_operation |= other.block_operation;
        if self.enforce_pipeline.is_none() {
            self.enforce_pipeline = other.enforce_pipeline;
        }
        self.add_tags.extend(other.add_tags);
        for (k, v) in other.update_properties {
            self.update_properties.insert(k, v);
        }
        self.alert = match (self.alert.take(), other.alert) {
            (Some(a), Some(b)) => Some(if b.severity > a.severity { b } else { a }),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };
        if self.heal_with_replica_id.is_none() {
            self.heal_with_replica_id = other.heal_with_replica_id;
        }
        self
    }
}

/// One registered governance module. `spec.md` §4.8 standard reference
/// modules (PII detector, GDPR, steganography, integrity, ...).
pub trait SentinelModule: Send + Sync {
    fn name(&self) -> &str;

    fn analyze<'a>(&'a self, ctx: &'a SentinelContext) -> BoxFuture<'a, Result<Judgment>>;
}

/// Restores a manifest's blob from a replica. `spec.md` §4.10's
/// `SentinelDaemon` calls this on `HealWithReplicaId`; the reference
/// workspace has no multi-node replication backend, so the only
/// implementation in-tree is `kernel-daemon`'s no-op placeholder used by
/// deployments without a configured replica store.
pub trait Replication: Send + Sync {
    fn restore<'a>(
        &'a self,
        manifest_id: ManifestId,
        replica_id: &'a str,
    ) -> BoxFuture<'a, Result<()>>;
}
