//! Plugin registry and handshake protocol (`spec.md` §4.5). `Register`
//! admits a plugin only after it answers a [`HandshakeRequest`] with a
//! [`PluginDescriptor`] in an admittable [`ReadyState`] and every
//! non-optional dependency resolves. Admitted plugins are indexed both by
//! id (`O(1)` lookup) and by the capability interface tags they advertise
//! (`spec.md`'s `InterfaceTag → []Id` map).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use kernel_common::error::{KernelError, Result};
use kernel_common::traits::{
    AccessControl, MetadataIndex, PolicyEvaluator, SentinelModule, StorageBackend, Transformation,
};
use kernel_common::{PluginDescriptor, PluginDependency};

/// Sent by the kernel to a plugin at `Load` time. `spec.md` §4.5.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub kernel_id: String,
    pub protocol_version: String,
    pub mode: String,
    pub root_path: String,
    pub already_loaded_plugins: Vec<String>,
}

/// A registered plugin's capability object. One variant per
/// `kernel-common` capability trait; `Register` is handed whichever
/// variant matches what the plugin actually implements.
pub enum PluginHandle {
    Transformation(Arc<dyn Transformation>),
    StorageBackend(Arc<dyn StorageBackend>),
    MetadataIndex(Arc<dyn MetadataIndex>),
    PolicyEvaluator(Arc<dyn PolicyEvaluator>),
    AccessControl(Arc<dyn AccessControl>),
    SentinelModule(Arc<dyn SentinelModule>),
}

impl Clone for PluginHandle {
    fn clone(&self) -> Self {
        match self {
            PluginHandle::Transformation(p) => PluginHandle::Transformation(Arc::clone(p)),
            PluginHandle::StorageBackend(p) => PluginHandle::StorageBackend(Arc::clone(p)),
            PluginHandle::MetadataIndex(p) => PluginHandle::MetadataIndex(Arc::clone(p)),
            PluginHandle::PolicyEvaluator(p) => PluginHandle::PolicyEvaluator(Arc::clone(p)),
            PluginHandle::AccessControl(p) => PluginHandle::AccessControl(Arc::clone(p)),
            PluginHandle::SentinelModule(p) => PluginHandle::SentinelModule(Arc::clone(p)),
        }
    }
}

impl PluginHandle {
    pub fn as_transformation(&self) -> Option<Arc<dyn Transformation>> {
        match self {
            PluginHandle::Transformation(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    pub fn as_storage_backend(&self) -> Option<Arc<dyn StorageBackend>> {
        match self {
            PluginHandle::StorageBackend(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    pub fn as_metadata_index(&self) -> Option<Arc<dyn MetadataIndex>> {
        match self {
            PluginHandle::MetadataIndex(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    pub fn as_policy_evaluator(&self) -> Option<Arc<dyn PolicyEvaluator>> {
        match self {
            PluginHandle::PolicyEvaluator(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    pub fn as_access_control(&self) -> Option<Arc<dyn AccessControl>> {
        match self {
            PluginHandle::AccessControl(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    pub fn as_sentinel_module(&self) -> Option<Arc<dyn SentinelModule>> {
        match self {
            PluginHandle::SentinelModule(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }
}

struct Admitted {
    descriptor: PluginDescriptor,
    handle: PluginHandle,
}

#[derive(Default)]
struct State {
    plugins: HashMap<String, Admitted>,
    by_interface: HashMap<String, Vec<String>>,
}

#[derive(Default)]
pub struct PluginRegistry {
    state: RwLock<State>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(&self, state: &State, descriptor: &PluginDescriptor) -> Result<()> {
        if descriptor.id.is_empty() || descriptor.id.chars().any(char::is_whitespace) {
            return Err(KernelError::ValidationFailed(format!(
                "plugin id {:?} must be non-empty and contain no whitespace",
                descriptor.id
            )));
        }
        if state.plugins.contains_key(&descriptor.id) {
            return Err(KernelError::Conflict(format!(
                "plugin {:?} is already admitted",
                descriptor.id
            )));
        }
        Ok(())
    }

    fn dependency_resolves(&self, state: &State, request: &HandshakeRequest, dep: &PluginDependency) -> bool {
        if dep.optional {
            return true;
        }
        request
            .already_loaded_plugins
            .iter()
            .any(|name| name == &dep.interface)
            || state.by_interface.contains_key(&dep.interface)
    }

    /// Admits `descriptor`/`handle` if readiness and dependency resolution
    /// both hold, tagging the plugin under every capability interface its
    /// descriptor advertises.
    pub fn register(
        &self,
        request: &HandshakeRequest,
        descriptor: PluginDescriptor,
        handle: PluginHandle,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        self.validate(&state, &descriptor)?;

        if !descriptor.ready_state.is_admittable() {
            return Err(KernelError::ValidationFailed(format!(
                "plugin {:?} reported non-admittable ready state {:?}",
                descriptor.id, descriptor.ready_state
            )));
        }

        for dep in &descriptor.dependencies {
            if !self.dependency_resolves(&state, request, dep) {
                return Err(KernelError::ValidationFailed(format!(
                    "plugin {:?} has an unresolved non-optional dependency on {:?}",
                    descriptor.id, dep.interface
                )));
            }
        }

        for capability in &descriptor.capabilities {
            state
                .by_interface
                .entry(capability.clone())
                .or_default()
                .push(descriptor.id.clone());
        }
        state.plugins.insert(
            descriptor.id.clone(),
            Admitted { descriptor, handle },
        );
        Ok(())
    }

    /// `GetPlugin<I>(id?)`: `O(1)` by id; the first admitted advertiser of
    /// `interface` when `id` is absent.
    pub fn get_plugin(&self, interface: &str, id: Option<&str>) -> Option<PluginHandle> {
        let state = self.state.read().unwrap();
        let plugin_id = match id {
            Some(id) => id.to_string(),
            None => state.by_interface.get(interface)?.first()?.clone(),
        };
        state.plugins.get(&plugin_id).map(|p| p.handle.clone())
    }

    /// `GetPlugins<I>()`: a snapshot, safe against concurrent registration.
    pub fn get_plugins(&self, interface: &str) -> Vec<PluginHandle> {
        let state = self.state.read().unwrap();
        state
            .by_interface
            .get(interface)
            .into_iter()
            .flatten()
            .filter_map(|id| state.plugins.get(id))
            .map(|p| p.handle.clone())
            .collect()
    }

    pub fn descriptor(&self, id: &str) -> Option<PluginDescriptor> {
        self.state.read().unwrap().plugins.get(id).map(|p| p.descriptor.clone())
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
