use serde::{Deserialize, Serialize};

use crate::ManifestId;

/// Immutable audit-log events emitted by kernel components. `AccessControl`
/// requires admin-bypass grants to be audit-logged (`spec.md` §4.7); these
/// events are the mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    BlobStored {
        manifest_id: ManifestId,
        container_id: String,
        size_bytes: u64,
    },
    BlobRead {
        manifest_id: ManifestId,
        size_bytes: u64,
    },
    BlobDeleted {
        manifest_id: ManifestId,
        reclaimed_bytes: u64,
    },
    AccessDenied {
        container_id: String,
        principal: String,
        required: u32,
    },
    AdminBypass {
        container_id: String,
        principal: String,
        required: u32,
    },
    GovernanceBlocked {
        container_id: String,
        code: String,
        reason: String,
    },
    SentinelHealed {
        manifest_id: ManifestId,
        replica_id: String,
    },
    VacuumCycle {
        deleted_count: u64,
        reclaimed_bytes: u64,
        duration_ms: u64,
    },
}
