//! Error taxonomy for canvas mutations.
//!
//! ERROR HANDLING
//! ==============
//! Three outcomes matter to callers: the viewer may not mutate
//! (`Permission`, terminal for the session), the backend failed
//! (`Network`, surfaced and left for the user to retry), or the request
//! was malformed before any I/O (`Validation`). `NotFound` covers local-id
//! lookups against an item that was already removed.

use crate::backend::BackendError;
use crate::store::LocalId;

/// Stable machine-readable code attached to every error surfaced to a caller.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanvasError {
    #[error("you have view-only access to this dashboard")]
    Permission,
    #[error("network error: {0}")]
    Network(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("item not found: {0}")]
    NotFound(LocalId),
}

impl ErrorCode for CanvasError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Permission => "E_PERMISSION",
            Self::Network(_) => "E_NETWORK",
            Self::Validation(_) => "E_VALIDATION",
            Self::NotFound(_) => "E_ITEM_NOT_FOUND",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<BackendError> for CanvasError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Forbidden => Self::Permission,
            other => Self::Network(other.to_string()),
        }
    }
}
