//! `Kernel` façade (`spec.md` §4.12): boots the capability registry,
//! resolves `StorageBackend`/`MetadataIndex`/`AccessControl`/`Sentinel`
//! with safe fallbacks when no real plugin answers, starts the background
//! daemons, and exposes the six narrow public operations from §6.

pub mod config;
pub mod fallback;

use std::path::Path;
use std::sync::Arc;

use kernel_access::InMemoryAccessControl;
use kernel_common::error::{KernelError, Result};
use kernel_common::traits::{
    AccessControl, MetadataIndex, PolicyEvaluator, Replication, StorageBackend, Transformation,
};
use kernel_common::{permission, ManifestId, PluginCategory, PluginDependency, PluginDescriptor, ReadyState};
use kernel_crypto::{EncryptionTransform, KeyManager, MASTER_KEY_SIZE};
use kernel_daemon::{DataVacuum, SentinelDaemon};
use kernel_index::{InMemoryIndex, SqliteIndex};
use kernel_pipeline::{PipelineEngine, SecurityContext};
use kernel_policy::PolicyEnforcer;
use kernel_registry::{HandshakeRequest, PluginHandle, PluginRegistry};
use kernel_sentinel::Sentinel;
use kernel_storage::{InMemoryBackend, LocalDiskBackend};
use rand::RngCore;
use tokio::task::JoinHandle;

pub use config::KernelConfig;
pub use fallback::OpenAccessControl;

/// Registers `handle` under `capability`, using a fixed `Ready`/quality-0
/// descriptor. Built-ins never fail a handshake — they have no
/// dependencies to resolve.
fn register_builtin(
    registry: &PluginRegistry,
    request: &HandshakeRequest,
    id: &str,
    category: PluginCategory,
    capability: &str,
    handle: PluginHandle,
) -> Result<()> {
    let descriptor = PluginDescriptor {
        id: id.to_string(),
        name: id.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        category,
        capabilities: vec![capability.to_string()],
        dependencies: Vec::<PluginDependency>::new(),
        ready_state: ReadyState::Ready,
        init_duration_ms: 0,
        health_interval_ms: None,
        quality_level: 0,
    };
    registry.register(request, descriptor, handle)
}

/// Plugin bundles under `<root>/Plugins` are enumerated but never loaded:
/// this workspace carries no dynamic-loader crate, so every role always
/// resolves to its built-in provider. Matches what the boot sequence in
/// `spec.md` §4.12 calls "safe fallbacks" — here the fallback is the only
/// path.
fn scan_plugin_directory(root: &str) {
    let plugins_dir = Path::new(root).join("Plugins");
    match std::fs::read_dir(&plugins_dir) {
        Ok(entries) => {
            let found = entries.filter_map(|e| e.ok()).count();
            if found > 0 {
                tracing::warn!(
                    path = %plugins_dir.display(),
                    count = found,
                    "plugin bundles present but no dynamic loader is wired into this build; using built-in capability providers"
                );
            }
        }
        Err(_) => {
            tracing::debug!(path = %plugins_dir.display(), "no Plugins directory, using built-in capability providers");
        }
    }
}

/// `Replication` fallback for when no replica-restore plugin is configured.
/// `SentinelDaemon` healing steps fail closed with `Unavailable` rather
/// than silently pretending to heal.
#[derive(Default)]
pub struct UnsupportedReplication;

impl Replication for UnsupportedReplication {
    fn restore<'a>(
        &'a self,
        manifest_id: ManifestId,
        replica_id: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            Err(KernelError::Unavailable(format!(
                "no replication plugin configured, cannot restore {} from replica {replica_id}",
                manifest_id.to_hex()
            )))
        })
    }
}

struct Daemons {
    sentinel_daemon: Arc<SentinelDaemon>,
    sentinel_handle: JoinHandle<()>,
    vacuum: Arc<DataVacuum>,
    vacuum_handle: JoinHandle<()>,
}

/// The live kernel: one concrete provider per role, wired into a
/// [`PipelineEngine`] and (once [`Kernel::start_daemons`] runs) a pair of
/// detached background loops.
pub struct Kernel {
    registry: Arc<PluginRegistry>,
    storage: Arc<dyn StorageBackend>,
    access: Arc<dyn AccessControl>,
    index: Arc<dyn MetadataIndex>,
    policy: Arc<dyn PolicyEvaluator>,
    sentinel: Arc<Sentinel>,
    pipeline: Arc<PipelineEngine>,
    replication: Arc<dyn Replication>,
    daemons: tokio::sync::Mutex<Option<Daemons>>,
}

impl Kernel {
    /// Runs the boot sequence from `spec.md` §4.12 and returns a kernel
    /// ready to serve the public API. Does not start background daemons —
    /// call [`Kernel::start_daemons`] once the caller is ready for them.
    pub async fn boot(config: KernelConfig) -> Result<Arc<Kernel>> {
        let registry = Arc::new(PluginRegistry::new());

        if let Some(root) = &config.root_path {
            scan_plugin_directory(root);
        }

        let handshake = HandshakeRequest {
            kernel_id: "kernel".to_string(),
            protocol_version: "1".to_string(),
            mode: "embedded".to_string(),
            root_path: config.root_path.clone().unwrap_or_default(),
            already_loaded_plugins: Vec::new(),
        };

        let storage: Arc<dyn StorageBackend> = match &config.root_path {
            Some(root) => Arc::new(LocalDiskBackend::new(Path::new(root).join("Blobs"))),
            None => {
                tracing::warn!("no root_path configured, falling back to in-memory storage backend");
                Arc::new(InMemoryBackend::new())
            }
        };
        register_builtin(
            &registry,
            &handshake,
            "builtin.storage",
            PluginCategory::Storage,
            "StorageBackend",
            PluginHandle::StorageBackend(Arc::clone(&storage)),
        )?;

        let index: Arc<dyn MetadataIndex> = match &config.root_path {
            Some(root) => {
                let path = Path::new(root).join("Metadata").join("index.sqlite");
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|err| KernelError::internal(err.to_string()))?;
                }
                Arc::new(
                    SqliteIndex::open(&path).map_err(|err| KernelError::internal(err.to_string()))?,
                )
            }
            None => {
                tracing::warn!("no root_path configured, falling back to in-memory metadata index");
                Arc::new(InMemoryIndex::new())
            }
        };
        register_builtin(
            &registry,
            &handshake,
            "builtin.index",
            PluginCategory::Metadata,
            "MetadataIndex",
            PluginHandle::MetadataIndex(Arc::clone(&index)),
        )?;

        let access: Arc<dyn AccessControl> = match &config.admin_principal {
            Some(admin) => Arc::new(InMemoryAccessControl::with_admin_principal(admin.clone())),
            None => {
                tracing::warn!("no admin principal configured, falling back to an open-permissive ACL");
                Arc::new(OpenAccessControl::default())
            }
        };
        register_builtin(
            &registry,
            &handshake,
            "builtin.access",
            PluginCategory::Security,
            "AccessControl",
            PluginHandle::AccessControl(Arc::clone(&access)),
        )?;

        let mut master_key = [0u8; MASTER_KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut master_key);
        let keyring = Arc::new(KeyManager::new(master_key));
        let encryption: Arc<dyn Transformation> =
            Arc::new(EncryptionTransform::new("builtin.encryption", keyring));
        register_builtin(
            &registry,
            &handshake,
            "builtin.encryption",
            PluginCategory::Transformation,
            "Encryption",
            PluginHandle::Transformation(Arc::clone(&encryption)),
        )?;

        let sentinel = Arc::new(Sentinel::new());
        if config.enable_integrity_checker {
            sentinel.register(Arc::new(kernel_sentinel::modules::IntegrityChecker::new()));
        }
        if config.enable_auto_tagger {
            sentinel.register(Arc::new(kernel_sentinel::modules::AutoTagger::new()));
        }
        if config.enable_pii_detector {
            sentinel.register(Arc::new(kernel_sentinel::modules::PiiDetector::new()));
        }
        if !config.enable_integrity_checker && !config.enable_auto_tagger && !config.enable_pii_detector {
            tracing::warn!("no sentinel modules registered, falling back to a passive sentinel");
        }

        let enforcer = PolicyEnforcer::new(config.default_intent());
        for (pattern, policy_config) in config.policy_overrides() {
            enforcer.set_policy(pattern, policy_config);
        }
        let policy: Arc<dyn PolicyEvaluator> = Arc::new(enforcer);

        let pipeline = Arc::new(PipelineEngine::new(
            Arc::clone(&storage),
            Arc::clone(&index),
            Arc::clone(&access),
            Arc::clone(&policy),
            Arc::clone(&sentinel),
            Arc::clone(&registry),
        ));

        tracing::info!("[Kernel] Boot Complete");

        Ok(Arc::new(Kernel {
            registry,
            storage,
            access,
            index,
            policy,
            sentinel,
            pipeline,
            replication: Arc::new(UnsupportedReplication),
            daemons: tokio::sync::Mutex::new(None),
        }))
    }

    /// Swaps in a real `Replication` plugin, e.g. a mirror backend's
    /// replica restore. Only takes effect on the next [`Kernel::start_daemons`].
    pub fn with_replication(self: Arc<Self>, replication: Arc<dyn Replication>) -> Arc<Self> {
        Arc::new(Kernel {
            registry: Arc::clone(&self.registry),
            storage: Arc::clone(&self.storage),
            access: Arc::clone(&self.access),
            index: Arc::clone(&self.index),
            policy: Arc::clone(&self.policy),
            sentinel: Arc::clone(&self.sentinel),
            pipeline: Arc::clone(&self.pipeline),
            replication,
            daemons: tokio::sync::Mutex::new(None),
        })
    }

    /// Starts `SentinelDaemon` and `DataVacuum` as detached tasks. Calling
    /// this twice replaces the previous pair, shutting them down first.
    pub async fn start_daemons(self: &Arc<Self>, config: &KernelConfig) {
        self.stop_daemons().await;

        let sentinel_daemon = Arc::new(
            SentinelDaemon::new(
                Arc::clone(&self.pipeline),
                Arc::clone(&self.index),
                Arc::clone(&self.sentinel),
                Arc::clone(&self.replication),
            )
            .with_scan_interval(config.scan_interval()),
        );
        let sentinel_handle = Arc::clone(&sentinel_daemon).spawn();

        let vacuum = Arc::new(DataVacuum::new(
            Arc::clone(&self.index),
            vec![Arc::clone(&self.storage)],
        ));
        let vacuum_handle = Arc::clone(&vacuum).spawn(config.vacuum_interval());

        *self.daemons.lock().await = Some(Daemons {
            sentinel_daemon,
            sentinel_handle,
            vacuum,
            vacuum_handle,
        });
    }

    /// Signals both daemons to stop and waits for their loops to exit.
    pub async fn stop_daemons(&self) {
        if let Some(daemons) = self.daemons.lock().await.take() {
            daemons.sentinel_daemon.shutdown();
            daemons.vacuum.shutdown();
            let _ = daemons.sentinel_handle.await;
            let _ = daemons.vacuum_handle.await;
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub async fn store_blob(
        &self,
        sec: &SecurityContext,
        container_id: &str,
        blob_name: &str,
        data: Vec<u8>,
    ) -> Result<ManifestId> {
        self.pipeline.store_blob(sec, container_id, blob_name, data).await
    }

    pub async fn get_blob(
        &self,
        sec: &SecurityContext,
        container_id: &str,
        blob_name: &str,
    ) -> Result<Vec<u8>> {
        self.pipeline.get_blob(sec, container_id, blob_name).await
    }

    pub async fn delete(
        &self,
        sec: &SecurityContext,
        container_id: &str,
        blob_name: &str,
    ) -> Result<()> {
        self.pipeline.delete(sec, container_id, blob_name).await
    }

    /// `CreateContainer(sec, containerId, encrypt, compress)`: grants the
    /// caller `FullControl` over a fresh scope. `encrypt`/`compress` are
    /// accepted for interface parity with §6; per-container intent
    /// overrides are set through `KernelConfig.policies` at boot rather
    /// than mutated live, since `PolicyEnforcer` has no per-call mutation
    /// path in the resolved `Kernel`.
    pub fn create_container(
        &self,
        sec: &SecurityContext,
        container_id: &str,
        encrypt: bool,
        compress: bool,
    ) {
        self.access.grant(container_id, &sec.user_id, permission::FULL_CONTROL);
        let _ = (encrypt, compress);
    }

    /// `GrantAccess(owner, containerId, principal, level)`. The owner must
    /// already hold `FullControl` on the container.
    pub fn grant_access(
        &self,
        owner: &SecurityContext,
        container_id: &str,
        principal: &str,
        level: u32,
    ) -> Result<()> {
        if !self
            .access
            .has_access(container_id, &owner.user_id, permission::FULL_CONTROL)
        {
            return Err(KernelError::Unauthorized(format!(
                "{} lacks FullControl on {container_id}",
                owner.user_id
            )));
        }
        self.access.grant(container_id, principal, level);
        Ok(())
    }

    /// `Search(sec, query, vector?, limit)`. `sec` is accepted for parity
    /// with the other public operations; result visibility filtering by
    /// principal is left to the caller, matching the index's own
    /// container-agnostic `search` contract.
    pub async fn search(
        &self,
        _sec: &SecurityContext,
        query: &str,
        vector: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<ManifestId>> {
        self.index.search(query, vector, limit).await
    }

    pub fn get_plugin(&self, interface: &str, id: Option<&str>) -> Option<PluginHandle> {
        self.registry.get_plugin(interface, id)
    }

    pub fn get_plugins(&self, interface: &str) -> Vec<PluginHandle> {
        self.registry.get_plugins(interface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn boot_in_memory() -> Arc<Kernel> {
        let config = KernelConfig {
            root_path: None,
            admin_principal: Some("root".to_string()),
            ..KernelConfig::default()
        };
        Kernel::boot(config).await.unwrap()
    }

    #[tokio::test]
    async fn boot_falls_back_to_in_memory_roles_without_a_root_path() {
        let kernel = boot_in_memory().await;
        assert!(kernel.get_plugin("StorageBackend", None).is_some());
        assert!(kernel.get_plugin("MetadataIndex", None).is_some());
    }

    #[tokio::test]
    async fn store_then_get_round_trips_through_the_facade() {
        let kernel = boot_in_memory().await;
        let sec = SecurityContext::new("root");
        kernel.create_container(&sec, "c1", false, false);

        kernel
            .store_blob(&sec, "c1", "doc.txt", b"hello kernel".to_vec())
            .await
            .unwrap();
        let data = kernel.get_blob(&sec, "c1", "doc.txt").await.unwrap();
        assert_eq!(data, b"hello kernel");
    }

    #[tokio::test]
    async fn grant_access_requires_full_control() {
        let kernel = boot_in_memory().await;
        let owner = SecurityContext::new("root");
        kernel.create_container(&owner, "c1", false, false);

        let intruder = SecurityContext::new("mallory");
        let err = kernel
            .grant_access(&intruder, "c1", "bob", permission::READ)
            .unwrap_err();
        assert!(matches!(err, KernelError::Unauthorized(_)));

        kernel.grant_access(&owner, "c1", "bob", permission::READ).unwrap();
        let bob = SecurityContext::new("bob");
        kernel
            .store_blob(&owner, "c1", "doc.txt", b"data".to_vec())
            .await
            .unwrap();
        kernel.get_blob(&bob, "c1", "doc.txt").await.unwrap();
    }

    #[tokio::test]
    async fn search_delegates_to_the_resolved_index() {
        let kernel = boot_in_memory().await;
        let sec = SecurityContext::new("root");
        kernel.create_container(&sec, "c1", false, false);
        // AutoTagger tags a manifest whose blob name contains "report" with
        // category=report, which the in-memory index's term-frequency
        // search matches against tag values.
        kernel
            .store_blob(&sec, "c1", "quarterly-report.txt", b"numbers".to_vec())
            .await
            .unwrap();

        let hits = kernel.search(&sec, "report", None, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn storing_a_plaintext_secret_into_public_is_blocked() {
        let kernel = boot_in_memory().await;
        let sec = SecurityContext::new("root");
        kernel.create_container(&sec, "public", false, false);

        let err = kernel
            .store_blob(&sec, "public", "leak.txt", b"password=hunter2supersecret".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::Governance { .. }));
        assert!(kernel.get_blob(&sec, "public", "leak.txt").await.is_err());
    }

    #[tokio::test]
    async fn storing_an_api_key_forces_encryption_and_tags_auto_encrypted() {
        let kernel = boot_in_memory().await;
        let sec = SecurityContext::new("root");
        kernel.create_container(&sec, "private", false, false);

        let manifest_id = kernel
            .store_blob(&sec, "private", "creds.txt", b"api_key=XYZ12345ABCDEFGH".to_vec())
            .await
            .unwrap();

        let manifest = kernel
            .index
            .get_manifest_by_id(manifest_id)
            .await
            .unwrap()
            .expect("manifest indexed");
        assert!(manifest.pipeline.enable_encryption);
        assert_eq!(
            manifest.governance_tags.get("Governance:AutoEncrypted"),
            Some(&"True".to_string())
        );
    }
}
