//! Bitmask access control (`spec.md` §4.7). An ACL entry is keyed by
//! `(container_id, principal)` and carries a `granted`/`denied` pair of
//! permission bitmasks from [`kernel_common::permission`];
//! [`kernel_common::traits::AclDecision::has_access`] does the actual bit
//! arithmetic. This crate owns the entry table and the admin-bypass audit
//! trail.

use std::collections::HashMap;
use std::sync::RwLock;

use kernel_common::traits::{AclDecision, AccessControl};
use kernel_common::{permission, Event};
use tracing::{info, warn};

#[derive(Default)]
struct ScopeState {
    entries: HashMap<String, AclDecision>,
}

/// In-process `AccessControl`. A scope with no entry for a principal grants
/// nothing: `HasAccess` fails closed.
pub struct InMemoryAccessControl {
    scopes: RwLock<HashMap<String, ScopeState>>,
    admin_principal: Option<String>,
    audit_log: RwLock<Vec<Event>>,
}

impl InMemoryAccessControl {
    pub fn new() -> Self {
        Self {
            scopes: RwLock::new(HashMap::new()),
            admin_principal: None,
            audit_log: RwLock::new(Vec::new()),
        }
    }

    /// A principal recognized as an administrator bypasses every check.
    /// `spec.md` §4.7 requires every such bypass to be audit-logged.
    pub fn with_admin_principal(admin_principal: impl Into<String>) -> Self {
        Self {
            admin_principal: Some(admin_principal.into()),
            ..Self::new()
        }
    }

    /// `CreateScope(path, owner)`: grants `FullControl` to `owner`.
    pub fn create_scope(&self, container_id: &str, owner: &str) {
        let mut scopes = self.scopes.write().unwrap();
        let scope = scopes.entry(container_id.to_string()).or_default();
        scope.entries.insert(
            owner.to_string(),
            AclDecision {
                granted: permission::FULL_CONTROL,
                denied: 0,
            },
        );
    }

    /// `SetPermissions(path, principal, allow, deny)`: idempotent — a
    /// repeated call with the same masks leaves the entry unchanged.
    pub fn set_permissions(&self, container_id: &str, principal: &str, allow: u32, deny: u32) {
        let mut scopes = self.scopes.write().unwrap();
        let scope = scopes.entry(container_id.to_string()).or_default();
        scope.entries.insert(
            principal.to_string(),
            AclDecision {
                granted: allow,
                denied: deny,
            },
        );
    }

    pub fn audit_log(&self) -> Vec<Event> {
        self.audit_log.read().unwrap().clone()
    }

    fn record(&self, event: Event) {
        self.audit_log.write().unwrap().push(event);
    }
}

impl Default for InMemoryAccessControl {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessControl for InMemoryAccessControl {
    fn has_access(&self, container_id: &str, principal: &str, required: u32) -> bool {
        if self.admin_principal.as_deref() == Some(principal) {
            info!(container_id, principal, required, "admin bypass");
            self.record(Event::AdminBypass {
                container_id: container_id.to_string(),
                principal: principal.to_string(),
                required,
            });
            return true;
        }

        let granted = self
            .scopes
            .read()
            .unwrap()
            .get(container_id)
            .and_then(|scope| scope.entries.get(principal).copied())
            .unwrap_or(AclDecision { granted: 0, denied: 0 })
            .has_access(required);

        if !granted {
            warn!(container_id, principal, required, "access denied");
            self.record(Event::AccessDenied {
                container_id: container_id.to_string(),
                principal: principal.to_string(),
                required,
            });
        }
        granted
    }

    fn grant(&self, container_id: &str, principal: &str, level: u32) {
        let mut scopes = self.scopes.write().unwrap();
        let scope = scopes.entry(container_id.to_string()).or_default();
        scope
            .entries
            .entry(principal.to_string())
            .and_modify(|decision| decision.granted |= level)
            .or_insert(AclDecision {
                granted: level,
                denied: 0,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_scope_grants_full_control_to_owner() {
        let acl = InMemoryAccessControl::new();
        acl.create_scope("c1", "alice");
        assert!(acl.has_access("c1", "alice", permission::FULL_CONTROL));
    }

    #[test]
    fn unknown_principal_fails_closed() {
        let acl = InMemoryAccessControl::new();
        acl.create_scope("c1", "alice");
        assert!(!acl.has_access("c1", "bob", permission::READ));
    }

    #[test]
    fn deny_mask_overrides_grant() {
        let acl = InMemoryAccessControl::new();
        acl.set_permissions(
            "c1",
            "bob",
            permission::READ | permission::WRITE,
            permission::WRITE,
        );
        assert!(acl.has_access("c1", "bob", permission::READ));
        assert!(!acl.has_access("c1", "bob", permission::WRITE));
    }

    #[test]
    fn set_permissions_is_idempotent() {
        let acl = InMemoryAccessControl::new();
        acl.set_permissions("c1", "bob", permission::READ, 0);
        acl.set_permissions("c1", "bob", permission::READ, 0);
        assert!(acl.has_access("c1", "bob", permission::READ));
    }

    #[test]
    fn grant_adds_to_existing_permissions() {
        let acl = InMemoryAccessControl::new();
        acl.set_permissions("c1", "bob", permission::READ, 0);
        acl.grant("c1", "bob", permission::WRITE);
        assert!(acl.has_access("c1", "bob", permission::READ | permission::WRITE));
    }

    #[test]
    fn admin_bypass_is_audit_logged() {
        let acl = InMemoryAccessControl::with_admin_principal("root");
        assert!(acl.has_access("c1", "root", permission::FULL_CONTROL));
        let log = acl.audit_log();
        assert_eq!(log.len(), 1);
        assert!(matches!(log[0], Event::AdminBypass { .. }));
    }

    #[test]
    fn denied_access_is_audit_logged() {
        let acl = InMemoryAccessControl::new();
        assert!(!acl.has_access("c1", "bob", permission::READ));
        let log = acl.audit_log();
        assert_eq!(log.len(), 1);
        assert!(matches!(log[0], Event::AccessDenied { .. }));
    }
}
