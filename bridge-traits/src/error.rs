use thiserror::Error;

/// Classification of a remote store failure.
///
/// Only `Transient` failures are worth retrying; the rest either cannot
/// succeed on retry (`NotFound`, `PermissionDenied`) or should not be
/// hammered (`QuotaExceeded`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The referenced file or folder does not exist remotely
    NotFound,
    /// The authenticated principal may not perform this operation
    PermissionDenied,
    /// The remote account is out of storage or API quota
    QuotaExceeded,
    /// Network-level or 5xx-equivalent failure; retryable
    Transient,
    /// Anything the SDK wrapper could not classify
    Unknown,
}

impl RemoteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteErrorKind::NotFound => "not_found",
            RemoteErrorKind::PermissionDenied => "permission_denied",
            RemoteErrorKind::QuotaExceeded => "quota_exceeded",
            RemoteErrorKind::Transient => "transient",
            RemoteErrorKind::Unknown => "unknown",
        }
    }
}

/// Error returned by every [`RemoteFileStore`](crate::remote::RemoteFileStore)
/// operation.
#[derive(Debug, Clone, Error)]
#[error("remote store error ({}): {message}", kind.as_str())]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, message)
    }

    /// Whether a retry with backoff has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        self.kind == RemoteErrorKind::Transient
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_kind_is_retryable() {
        assert!(RemoteError::transient("timeout").is_transient());
        assert!(!RemoteError::not_found("gone").is_transient());
        assert!(!RemoteError::new(RemoteErrorKind::QuotaExceeded, "full").is_transient());
        assert!(!RemoteError::new(RemoteErrorKind::Unknown, "?").is_transient());
    }

    #[test]
    fn test_error_display_includes_kind() {
        let err = RemoteError::new(RemoteErrorKind::PermissionDenied, "read-only share");
        let text = err.to_string();
        assert!(text.contains("permission_denied"));
        assert!(text.contains("read-only share"));
    }
}
