//! Write/read orchestration (`spec.md` §4.9). [`PipelineEngine`] is the
//! heart of the kernel: it ties `AccessControl`, `PolicyEvaluator`,
//! `Sentinel`, a `StorageBackend`, and a `MetadataIndex` together behind
//! `StoreBlob`/`GetBlob`/`Delete`. Transformations run fully buffered in
//! memory, in `Pipeline.TransformationOrder` order on write and reversed
//! on read.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use kernel_common::error::{KernelError, Result};
use kernel_common::traits::{
    AccessControl, MetadataIndex, PolicyEvaluator, SentinelContext, StorageBackend,
    TransformContext, Transformation,
};
use kernel_common::{permission, Event, Manifest, ManifestId, Pipeline, Tier, Trigger};
use kernel_registry::PluginRegistry;
use sha2::{Digest, Sha256};

/// Caller identity threaded through every public operation. `spec.md` §4.7
/// addresses the security context only as `sec.UserId`; `tenant` is
/// carried through to `TransformContext` for multi-tenant plugins.
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    pub user_id: String,
    pub tenant: Option<String>,
}

impl SecurityContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant: None,
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn checksum_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Orchestrates `StoreBlob`/`GetBlob`/`Delete` over one storage backend.
/// The kernel façade (`crates/kernel`) picks which backend a given
/// container routes to and constructs one engine per backend; this type
/// does not itself dispatch across schemes.
pub struct PipelineEngine {
    storage: Arc<dyn StorageBackend>,
    index: Arc<dyn MetadataIndex>,
    access: Arc<dyn AccessControl>,
    policy: Arc<dyn PolicyEvaluator>,
    sentinel: Arc<kernel_sentinel::Sentinel>,
    registry: Arc<PluginRegistry>,
    events: RwLock<Vec<Event>>,
}

impl PipelineEngine {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        index: Arc<dyn MetadataIndex>,
        access: Arc<dyn AccessControl>,
        policy: Arc<dyn PolicyEvaluator>,
        sentinel: Arc<kernel_sentinel::Sentinel>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        Self {
            storage,
            index,
            access,
            policy,
            sentinel,
            registry,
            events: RwLock::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().unwrap().clone()
    }

    fn record(&self, event: Event) {
        self.events.write().unwrap().push(event);
    }

    fn blob_uri(&self, container_id: &str, blob_name: &str) -> String {
        format!("{}://{}/{}", self.storage.scheme(), container_id, blob_name)
    }

    /// Resolution order from `spec.md` §4.9: (a) an exact plugin id match
    /// for `step`, else (b) the highest-`QualityLevel` plugin advertising
    /// `step` as a capability.
    fn resolve_step(&self, step: &str) -> Result<Arc<dyn Transformation>> {
        if let Some(exact) = self
            .registry
            .get_plugin(step, Some(step))
            .and_then(|h| h.as_transformation())
        {
            return Ok(exact);
        }
        self.registry
            .get_plugins(step)
            .into_iter()
            .filter_map(|h| h.as_transformation())
            .max_by_key(|t| t.quality_level())
            .ok_or_else(|| {
                KernelError::NotFound(format!("no transformation plugin resolves step {step:?}"))
            })
    }

    fn step_enabled(pipeline: &Pipeline, step: &str) -> bool {
        match step {
            "Compression" => pipeline.enable_compression,
            "Encryption" => pipeline.enable_encryption,
            _ => true,
        }
    }

    async fn run_forward(
        &self,
        pipeline: &Pipeline,
        mut data: Vec<u8>,
        ctx: &TransformContext,
    ) -> Result<Vec<u8>> {
        for step in &pipeline.transformation_order {
            if !Self::step_enabled(pipeline, step) {
                continue;
            }
            let transformation = self.resolve_step(step)?;
            data = transformation.on_write(data, ctx).await?;
        }
        Ok(data)
    }

    async fn run_reverse(
        &self,
        pipeline: &Pipeline,
        mut data: Vec<u8>,
        ctx: &TransformContext,
    ) -> Result<Vec<u8>> {
        for step in pipeline.transformation_order.iter().rev() {
            if !Self::step_enabled(pipeline, step) {
                continue;
            }
            let transformation = self.resolve_step(step)?;
            data = transformation.on_read(data, ctx).await?;
        }
        Ok(data)
    }

    fn current_key_id(&self) -> String {
        "default".to_string()
    }

    fn governance_err(judgment: &kernel_common::traits::Judgment) -> KernelError {
        match &judgment.alert {
            Some(alert) => KernelError::governance(alert.code.clone(), alert.message.clone()),
            None => KernelError::governance("SENTINEL_BLOCK", "sentinel blocked the operation"),
        }
    }

    /// `StoreBlob(sec, containerId, blobName, data)`. `spec.md` §4.9 steps
    /// 1-8.
    pub async fn store_blob(
        &self,
        sec: &SecurityContext,
        container_id: &str,
        blob_name: &str,
        data: Vec<u8>,
    ) -> Result<ManifestId> {
        if !self
            .access
            .has_access(container_id, &sec.user_id, permission::WRITE)
        {
            return Err(KernelError::Unauthorized(format!(
                "{} lacks Write on {container_id}/{blob_name}",
                sec.user_id
            )));
        }

        let mut pipeline = self.policy.resolve(container_id, blob_name);
        let manifest_id = ManifestId::new();
        let now = now_unix();

        let mut manifest = Manifest {
            id: manifest_id,
            container_id: container_id.to_string(),
            blob_uri: self.blob_uri(container_id, blob_name),
            size_bytes: data.len() as u64,
            created_at: now,
            last_accessed_at: now,
            owner_id: sec.user_id.clone(),
            checksum: checksum_hex(&data),
            etag: String::new(),
            pipeline: pipeline.clone(),
            tags: HashMap::new(),
            governance_tags: HashMap::new(),
            vector_embedding: None,
            content_summary: None,
            current_tier: Tier::Hot,
        };

        // `data` is a fully-buffered `Vec<u8>`, so there is no stream
        // position for the sentinel to rewind on exit.
        let sentinel_ctx = SentinelContext {
            trigger: Trigger::OnWrite,
            manifest: manifest.clone(),
            data: Some(data.clone()),
            principal: sec.user_id.clone(),
        };
        let judgment = self.sentinel.evaluate(&sentinel_ctx).await?;
        if judgment.block_operation {
            return Err(Self::governance_err(&judgment));
        }
        if let Some(forced) = judgment.enforce_pipeline {
            pipeline = forced;
        }
        manifest.tags.extend(judgment.add_tags);
        manifest.governance_tags.extend(judgment.update_properties);

        if pipeline.needs_key_id() {
            pipeline.key_id = Some(self.current_key_id());
        }
        manifest.pipeline = pipeline.clone();
        let prefix_len = manifest.checksum.len().min(12);
        manifest.etag = format!("{}-{now}", &manifest.checksum[..prefix_len]);

        let tx_ctx = TransformContext {
            owner: sec.user_id.clone(),
            tenant: sec.tenant.clone(),
            key: pipeline.key_id.clone().map(String::into_bytes),
            manifest_id,
        };
        let transformed = self.run_forward(&pipeline, data, &tx_ctx).await?;

        self.storage.save(&manifest.blob_uri, &transformed).await?;

        if let Err(err) = self.index.index_manifest(manifest.clone()).await {
            tracing::error!(
                manifest_id = %manifest_id.to_hex(),
                error = %err,
                "blob persisted but manifest indexing failed"
            );
            return Err(KernelError::IndexingFailed(err.to_string()));
        }

        self.record(Event::BlobStored {
            manifest_id,
            container_id: container_id.to_string(),
            size_bytes: manifest.size_bytes,
        });
        Ok(manifest_id)
    }

    /// `GetBlob(sec, containerId, blobName)`. `spec.md` §4.9 read path.
    pub async fn get_blob(
        &self,
        sec: &SecurityContext,
        container_id: &str,
        blob_name: &str,
    ) -> Result<Vec<u8>> {
        if !self
            .access
            .has_access(container_id, &sec.user_id, permission::READ)
        {
            return Err(KernelError::Unauthorized(format!(
                "{} lacks Read on {container_id}/{blob_name}",
                sec.user_id
            )));
        }

        let manifest = match self.index.get_manifest(blob_name).await? {
            Some(manifest) => manifest,
            None => {
                let now = now_unix();
                Manifest {
                    id: ManifestId::new(),
                    container_id: container_id.to_string(),
                    blob_uri: self.blob_uri(container_id, blob_name),
                    size_bytes: 0,
                    created_at: now,
                    last_accessed_at: now,
                    owner_id: sec.user_id.clone(),
                    checksum: String::new(),
                    etag: String::new(),
                    pipeline: self.policy.resolve(container_id, blob_name),
                    tags: HashMap::new(),
                    governance_tags: HashMap::new(),
                    vector_embedding: None,
                    content_summary: None,
                    current_tier: Tier::Hot,
                }
            }
        };

        let sentinel_ctx = SentinelContext {
            trigger: Trigger::OnRead,
            manifest: manifest.clone(),
            data: None,
            principal: sec.user_id.clone(),
        };
        let judgment = self.sentinel.evaluate(&sentinel_ctx).await?;
        if judgment.block_operation {
            return Err(Self::governance_err(&judgment));
        }

        let raw = self.storage.load(&manifest.blob_uri).await?;

        let tx_ctx = TransformContext {
            owner: manifest.owner_id.clone(),
            tenant: sec.tenant.clone(),
            key: manifest.pipeline.key_id.clone().map(String::into_bytes),
            manifest_id: manifest.id,
        };
        let plaintext = self.run_reverse(&manifest.pipeline, raw, &tx_ctx).await?;

        let _ = self.index.update_last_access(manifest.id, now_unix()).await;
        self.record(Event::BlobRead {
            manifest_id: manifest.id,
            size_bytes: plaintext.len() as u64,
        });
        Ok(plaintext)
    }

    /// `Delete(sec, containerId, blobName)`.
    pub async fn delete(
        &self,
        sec: &SecurityContext,
        container_id: &str,
        blob_name: &str,
    ) -> Result<()> {
        if !self
            .access
            .has_access(container_id, &sec.user_id, permission::DELETE)
        {
            return Err(KernelError::Unauthorized(format!(
                "{} lacks Delete on {container_id}/{blob_name}",
                sec.user_id
            )));
        }

        let manifest = self
            .index
            .get_manifest(blob_name)
            .await?
            .ok_or_else(|| KernelError::NotFound(format!("{container_id}/{blob_name}")))?;

        let sentinel_ctx = SentinelContext {
            trigger: Trigger::OnDelete,
            manifest: manifest.clone(),
            data: None,
            principal: sec.user_id.clone(),
        };
        let judgment = self.sentinel.evaluate(&sentinel_ctx).await?;
        if judgment.block_operation {
            return Err(Self::governance_err(&judgment));
        }

        self.storage.delete(&manifest.blob_uri).await?;
        self.index.remove_manifest(manifest.id).await?;

        self.record(Event::BlobDeleted {
            manifest_id: manifest.id,
            reclaimed_bytes: manifest.size_bytes,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use kernel_access::InMemoryAccessControl;
    use kernel_common::{PluginCategory, PluginDependency, PluginDescriptor, ReadyState};
    use kernel_index::InMemoryIndex;
    use kernel_registry::{HandshakeRequest, PluginHandle};
    use kernel_storage::InMemoryBackend;

    struct ReversingCompressor;

    impl Transformation for ReversingCompressor {
        fn plugin_id(&self) -> &str {
            "reversing-compressor"
        }

        fn step_name(&self) -> &str {
            "Compression"
        }

        fn on_write<'a>(
            &'a self,
            input: Vec<u8>,
            _ctx: &'a TransformContext,
        ) -> BoxFuture<'a, Result<Vec<u8>>> {
            Box::pin(async move { Ok(input.into_iter().rev().collect()) })
        }

        fn on_read<'a>(
            &'a self,
            input: Vec<u8>,
            _ctx: &'a TransformContext,
        ) -> BoxFuture<'a, Result<Vec<u8>>> {
            Box::pin(async move { Ok(input.into_iter().rev().collect()) })
        }
    }

    fn registry_with_compressor() -> Arc<PluginRegistry> {
        let registry = PluginRegistry::new();
        let descriptor = PluginDescriptor {
            id: "reversing-compressor".to_string(),
            name: "reversing-compressor".to_string(),
            version: "1.0.0".to_string(),
            category: PluginCategory::Transformation,
            capabilities: vec!["Compression".to_string()],
            dependencies: Vec::<PluginDependency>::new(),
            ready_state: ReadyState::Ready,
            init_duration_ms: 1,
            health_interval_ms: None,
            quality_level: 1,
        };
        let request = HandshakeRequest {
            kernel_id: "kernel-test".to_string(),
            protocol_version: "1".to_string(),
            mode: "test".to_string(),
            root_path: "/tmp".to_string(),
            already_loaded_plugins: Vec::new(),
        };
        registry
            .register(
                &request,
                descriptor,
                PluginHandle::Transformation(Arc::new(ReversingCompressor)),
            )
            .unwrap();
        Arc::new(registry)
    }

    struct FixedPolicy(Pipeline);

    impl PolicyEvaluator for FixedPolicy {
        fn resolve(&self, _container_id: &str, _blob_name: &str) -> Pipeline {
            self.0.clone()
        }
    }

    fn engine(pipeline: Pipeline) -> PipelineEngine {
        let access = Arc::new(InMemoryAccessControl::new());
        access.create_scope("c1", "alice");

        PipelineEngine::new(
            Arc::new(InMemoryBackend::default()),
            Arc::new(InMemoryIndex::new()),
            access,
            Arc::new(FixedPolicy(pipeline)),
            Arc::new(kernel_sentinel::Sentinel::new()),
            registry_with_compressor(),
        )
    }

    #[tokio::test]
    async fn write_then_read_round_trips_through_transformation() {
        let engine = engine(Pipeline::compressed("reversing-compressor"));
        let sec = SecurityContext::new("alice");

        engine
            .store_blob(&sec, "c1", "a.txt", b"hello world".to_vec())
            .await
            .unwrap();

        let data = engine.get_blob(&sec, "c1", "a.txt").await.unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn write_without_write_access_is_unauthorized() {
        let engine = engine(Pipeline::none());
        let sec = SecurityContext::new("mallory");
        let err = engine
            .store_blob(&sec, "c1", "a.txt", b"data".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn read_missing_manifest_synthesizes_pipeline_then_fails_to_load() {
        let engine = engine(Pipeline::none());
        let sec = SecurityContext::new("alice");
        let err = engine.get_blob(&sec, "c1", "missing.txt").await.unwrap_err();
        assert!(matches!(err, KernelError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_blob_and_manifest() {
        let engine = engine(Pipeline::none());
        let sec = SecurityContext::new("alice");
        engine
            .store_blob(&sec, "c1", "a.txt", b"gone soon".to_vec())
            .await
            .unwrap();

        engine.delete(&sec, "c1", "a.txt").await.unwrap();
        let err = engine.get_blob(&sec, "c1", "a.txt").await.unwrap_err();
        assert!(matches!(err, KernelError::NotFound(_)));
    }

    #[tokio::test]
    async fn store_blob_emits_blob_stored_event() {
        let engine = engine(Pipeline::none());
        let sec = SecurityContext::new("alice");
        engine
            .store_blob(&sec, "c1", "a.txt", b"payload".to_vec())
            .await
            .unwrap();
        assert!(engine
            .events()
            .iter()
            .any(|e| matches!(e, Event::BlobStored { .. })));
    }
}
