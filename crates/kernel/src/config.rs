//! Boot-time configuration for `Kernel::boot` (`spec.md` §4.12). Deserialized
//! from YAML via `serde_yaml`, same as the policy files `spacectl`'s
//! `Project` command used to load.

use std::collections::HashMap;
use std::time::Duration;

use kernel_common::policy::{Compression, Security, StorageIntent};
use kernel_common::DEFAULT_SCAN_INTERVAL_SECS;
use kernel_policy::PolicyConfig;
use serde::Deserialize;

/// Default interval between `DataVacuum` passes. Not named by `spec.md`
/// (only `SentinelDaemon`'s interval is), chosen a little longer than the
/// scan interval since orphan reclamation is lower urgency than corruption
/// detection.
pub const DEFAULT_VACUUM_INTERVAL_SECS: u64 = 900;

/// A `policies:` entry. Mirrors `kernel_policy::PolicyConfig` but derives
/// `Deserialize` directly rather than widening that crate's type for a
/// config-loading concern only `kernel` has.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyOverride {
    pub security: Option<Security>,
    pub compression: Option<Compression>,
    pub pipeline_order: Option<Vec<String>>,
}

impl PolicyOverride {
    fn into_policy_config(self, default_intent: StorageIntent) -> PolicyConfig {
        let security = self.security.unwrap_or(default_intent.security);
        let compression = self.compression.unwrap_or(default_intent.compression);
        PolicyConfig {
            intent: Some(StorageIntent {
                security,
                compression,
                availability: default_intent.availability,
            }),
            pipeline_order: self.pipeline_order,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KernelConfig {
    /// Root of the persisted state layout from `spec.md` §6
    /// (`Plugins/`, `Metadata/`, `KeyStore/`, blob storage roots). `None`
    /// triggers every in-memory fallback described in §4.12.
    #[serde(default)]
    pub root_path: Option<String>,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
    /// Principal that bypasses every ACL check. Absent means no plugin
    /// answered the `AccessControl` role, so boot falls back to an
    /// open-permissive ACL per §4.12.
    #[serde(default)]
    pub admin_principal: Option<String>,
    /// Whether to register the standard `IntegrityChecker` sentinel
    /// module. `false` leaves the sentinel passive, matching the §4.12
    /// fallback when no governance plugin is configured.
    #[serde(default = "default_true")]
    pub enable_integrity_checker: bool,
    /// Whether to register the standard `AutoTagger` sentinel module,
    /// which tags blobs by filename extension/keyword at write time.
    #[serde(default = "default_true")]
    pub enable_auto_tagger: bool,
    /// Whether to register the `PiiDetector` sentinel module, which blocks
    /// plaintext secrets written to the `public` container and forces
    /// encryption on content carrying an `api_key`-style credential.
    #[serde(default = "default_true")]
    pub enable_pii_detector: bool,
    #[serde(default)]
    pub security: Option<Security>,
    #[serde(default)]
    pub compression: Option<Compression>,
    #[serde(default)]
    pub policies: HashMap<String, PolicyOverride>,
}

fn default_scan_interval_secs() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}

fn default_vacuum_interval_secs() -> u64 {
    DEFAULT_VACUUM_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            root_path: None,
            scan_interval_secs: default_scan_interval_secs(),
            vacuum_interval_secs: default_vacuum_interval_secs(),
            admin_principal: None,
            enable_integrity_checker: true,
            enable_auto_tagger: true,
            enable_pii_detector: true,
            security: None,
            compression: None,
            policies: HashMap::new(),
        }
    }
}

impl KernelConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn vacuum_interval(&self) -> Duration {
        Duration::from_secs(self.vacuum_interval_secs)
    }

    pub fn default_intent(&self) -> StorageIntent {
        let base = StorageIntent::default();
        StorageIntent {
            security: self.security.unwrap_or(base.security),
            compression: self.compression.unwrap_or(base.compression),
            availability: base.availability,
        }
    }

    pub fn policy_overrides(&self) -> Vec<(String, PolicyConfig)> {
        let default_intent = self.default_intent();
        self.policies
            .iter()
            .map(|(pattern, ov)| (pattern.clone(), ov.clone().into_policy_config(default_intent)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_falls_back_to_in_memory_roles() {
        let config = KernelConfig::default();
        assert!(config.root_path.is_none());
        assert!(config.admin_principal.is_none());
    }

    #[test]
    fn parses_from_yaml() {
        let yaml = r#"
root_path: /var/lib/kernel
scan_interval_secs: 60
admin_principal: root
policies:
  "tenant-a":
    security: High
    compression: Optimal
"#;
        let config: KernelConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.root_path, Some("/var/lib/kernel".to_string()));
        assert_eq!(config.scan_interval_secs, 60);
        assert_eq!(config.policy_overrides().len(), 1);
    }
}
