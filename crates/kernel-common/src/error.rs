use uuid::Uuid;

/// The nine-variant error taxonomy from `spec.md` §7. Every public kernel
/// operation returns this type (or a crate-local error that converts into
/// it via `From`).
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("unavailable (retry): {0}")]
    Unavailable(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("blob stored but manifest not written: {0}")]
    IndexingFailed(String),

    #[error("governance blocked operation ({code}): {reason}")]
    Governance { code: String, reason: String },

    #[error("internal error [{correlation_id}]: {message}")]
    Internal {
        message: String,
        correlation_id: Uuid,
    },
}

impl KernelError {
    pub fn internal(message: impl Into<String>) -> Self {
        KernelError::Internal {
            message: message.into(),
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn governance(code: impl Into<String>, reason: impl Into<String>) -> Self {
        KernelError::Governance {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// Whether callers SHOULD retry per the §7 propagation policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KernelError::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_carries_correlation_id() {
        let err = KernelError::internal("boom");
        match err {
            KernelError::Internal {
                message,
                correlation_id,
            } => {
                assert_eq!(message, "boom");
                assert_ne!(correlation_id, Uuid::nil());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(KernelError::Unavailable("timeout".into()).is_retryable());
        assert!(!KernelError::NotFound("x".into()).is_retryable());
        assert!(!KernelError::governance("PII_SECRET", "blocked").is_retryable());
    }
}
