//! Safe fallback providers named explicitly by `spec.md` §4.12's boot
//! sequence ("open-permissive ACL (with a warning)").

use kernel_common::traits::AccessControl;

/// Grants every request. Used only when no `AccessControl` plugin and no
/// admin principal are configured — `Kernel::boot` always logs a warning
/// before falling back to this.
#[derive(Debug, Default)]
pub struct OpenAccessControl;

impl AccessControl for OpenAccessControl {
    fn has_access(&self, _container_id: &str, _principal: &str, _required: u32) -> bool {
        true
    }

    fn grant(&self, _container_id: &str, _principal: &str, _level: u32) {
        // Every principal already has full access; nothing to record.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_common::permission;

    #[test]
    fn grants_everything_to_everyone() {
        let acl = OpenAccessControl::default();
        assert!(acl.has_access("any-container", "anyone", permission::FULL_CONTROL));
    }
}
