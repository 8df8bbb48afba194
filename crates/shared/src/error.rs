use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories surfaced to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    MalformedPayload,
    PersistenceConflict,
    ConfigurationMissing,
}

impl ErrorKind {
    /// Transport and persistence failures may succeed on a later attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transport | Self::PersistenceConflict)
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct SyncError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SyncError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedPayload, message)
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PersistenceConflict, message)
    }

    pub fn configuration_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationMissing, message)
    }

    /// Classifies an internal error chain, defaulting to a transport failure.
    pub fn classify(error: &(dyn std::error::Error + 'static), kind: ErrorKind) -> Self {
        if let Some(sync) = error.downcast_ref::<SyncError>() {
            return sync.clone();
        }
        Self::new(kind, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = SyncError::configuration_missing("no gateway for tenant t1");
        assert_eq!(
            err.to_string(),
            "ConfigurationMissing: no gateway for tenant t1"
        );
        assert!(!err.kind.is_retryable());
        assert!(SyncError::transport("reset").kind.is_retryable());
    }

    #[test]
    fn classify_keeps_existing_kind() {
        let inner = SyncError::malformed("bad frame");
        let classified = SyncError::classify(&inner, ErrorKind::Transport);
        assert_eq!(classified.kind, ErrorKind::MalformedPayload);
    }
}
