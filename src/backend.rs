//! Backend collaborator: the persistence operations the engine may call.
//!
//! DESIGN
//! ======
//! The backend offers per-item create/update/delete for visual components
//! and for text blocks, and no multi-item transaction. [`CanvasBackend`]
//! mirrors that surface one-to-one; the engine decides which call to make.
//! `HttpBackend` (in `http`) is the production implementation.

use serde::{Deserialize, Serialize};

use crate::placement::{ItemKind, Placement};
use crate::store::ServerId;

/// Identifier of the dashboard a canvas belongs to.
pub type DashboardId = String;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("not authenticated")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("response decode failed: {0}")]
    Decode(String),
}

impl BackendError {
    #[must_use]
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            _ => Self::Status { status, body },
        }
    }
}

// =============================================================================
// WIRE-NEUTRAL TYPES
// =============================================================================

/// Everything the backend needs to materialize an item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewItem {
    pub kind: ItemKind,
    pub payload: serde_json::Value,
    pub placement: Placement,
}

/// Sparse update. Only present fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ItemPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.placement.is_none() && self.payload.is_none()
    }
}

/// An item as stored on the server, used to hydrate a canvas.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteItem {
    pub id: ServerId,
    pub kind: ItemKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub x: Option<u32>,
    #[serde(default)]
    pub y: Option<u32>,
    #[serde(default)]
    pub w: Option<u32>,
    #[serde(default)]
    pub h: Option<u32>,
}

impl RemoteItem {
    /// Stored placement with add-time defaults for missing or zero sizes,
    /// clamped to the kind's bounds.
    #[must_use]
    pub fn placement(&self, columns: u32) -> Placement {
        let (default_w, default_h) = self.kind.default_size(columns);
        Placement {
            x: self.x.unwrap_or(0),
            y: self.y.unwrap_or(0),
            w: self.w.filter(|w| *w > 0).unwrap_or(default_w),
            h: self.h.filter(|h| *h > 0).unwrap_or(default_h),
        }
        .clamped(self.kind, columns)
    }
}

// =============================================================================
// TRAIT
// =============================================================================

/// Persistence operations offered by the dashboard API.
///
/// Every call may fail with `Forbidden`, which the engine treats as a
/// permanent permission downgrade, or with any other error, which it treats
/// as a network failure.
#[async_trait::async_trait]
pub trait CanvasBackend: Send + Sync {
    async fn list_items(&self, dashboard_id: &str) -> Result<Vec<RemoteItem>, BackendError>;

    async fn create_item(&self, dashboard_id: &str, item: &NewItem) -> Result<ServerId, BackendError>;

    async fn update_item(&self, id: &str, patch: &ItemPatch) -> Result<(), BackendError>;

    async fn delete_item(&self, id: &str) -> Result<(), BackendError>;

    async fn create_block(&self, dashboard_id: &str, block: &NewItem) -> Result<ServerId, BackendError>;

    async fn update_block(&self, id: &str, patch: &ItemPatch) -> Result<(), BackendError>;

    async fn delete_block(&self, id: &str) -> Result<(), BackendError>;
}

/// Route a create to the component or block endpoint by kind.
pub(crate) async fn create(
    backend: &dyn CanvasBackend,
    dashboard_id: &str,
    item: &NewItem,
) -> Result<ServerId, BackendError> {
    if item.kind.is_text_block() {
        backend.create_block(dashboard_id, item).await
    } else {
        backend.create_item(dashboard_id, item).await
    }
}

pub(crate) async fn update(
    backend: &dyn CanvasBackend,
    kind: ItemKind,
    id: &str,
    patch: &ItemPatch,
) -> Result<(), BackendError> {
    if kind.is_text_block() {
        backend.update_block(id, patch).await
    } else {
        backend.update_item(id, patch).await
    }
}

pub(crate) async fn delete(backend: &dyn CanvasBackend, kind: ItemKind, id: &str) -> Result<(), BackendError> {
    if kind.is_text_block() {
        backend.delete_block(id).await
    } else {
        backend.delete_item(id).await
    }
}
