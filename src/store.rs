//! Item lifecycle store: the ordered collection of canvas items.
//!
//! DESIGN
//! ======
//! Items are keyed by a `LocalId` minted at add time and never changed,
//! so UI keys stay stable while the item is created on the server and
//! later gains a `ServerId`. The collection keeps insertion order for
//! deterministic re-render identity; grid position alone decides where an
//! item is drawn.
//!
//! This type is synchronous and does no I/O. The async mutation paths live
//! in `canvas` and `materializer`, which hold the store behind a mutex.

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;

use serde::Serialize;
use uuid::Uuid;

use crate::backend::RemoteItem;
use crate::error::CanvasError;
use crate::placement::{ItemKind, LayoutEntry, Placement, default_placement};

/// Session-local identity of a canvas item.
pub type LocalId = Uuid;

/// Identity assigned by the backend once an item is materialized.
pub type ServerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Added locally; no create attempted yet.
    Unsaved,
    Creating,
    Persisted,
    Updating,
    /// Removed locally; the backend delete is in progress.
    Deleting,
    /// The last request failed; the item stays on the canvas for a retry.
    Failed,
}

/// One placed item on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanvasItem {
    pub local_id: LocalId,
    pub server_id: Option<ServerId>,
    pub kind: ItemKind,
    /// Opaque editor content, forwarded verbatim on create and update.
    pub payload: serde_json::Value,
    /// Placement as currently rendered, including uncommitted gesture moves.
    pub placement: Placement,
    /// Placement the backend last acknowledged. `None` until materialized.
    pub persisted_placement: Option<Placement>,
    pub state: LifecycleState,
}

impl CanvasItem {
    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.server_id.is_some()
    }
}

pub struct ItemStore {
    items: Vec<CanvasItem>,
    columns: u32,
}

impl ItemStore {
    #[must_use]
    pub fn new(columns: u32) -> Self {
        Self { items: Vec::new(), columns }
    }

    #[must_use]
    pub fn columns(&self) -> u32 {
        self.columns
    }

    /// All items in insertion order.
    #[must_use]
    pub fn items(&self) -> &[CanvasItem] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &LocalId) -> Option<&CanvasItem> {
        self.items.iter().find(|item| item.local_id == *id)
    }

    pub fn get_mut(&mut self, id: &LocalId) -> Option<&mut CanvasItem> {
        self.items.iter_mut().find(|item| item.local_id == *id)
    }

    #[must_use]
    pub fn find_by_server_id(&self, server_id: &str) -> Option<&CanvasItem> {
        self.items
            .iter()
            .find(|item| item.server_id.as_deref() == Some(server_id))
    }

    /// Append a new unsaved item below everything already on the canvas.
    pub fn add(&mut self, kind: ItemKind, payload: serde_json::Value) -> CanvasItem {
        let placement = default_placement(kind, self.items.iter().map(|item| &item.placement), self.columns);
        let item = CanvasItem {
            local_id: Uuid::new_v4(),
            server_id: None,
            kind,
            payload,
            placement,
            persisted_placement: None,
            state: LifecycleState::Unsaved,
        };
        self.items.push(item.clone());
        item
    }

    /// Replace the whole collection with server records. Every record gets
    /// a fresh local id and starts out `Persisted`.
    pub fn load(&mut self, records: Vec<RemoteItem>) {
        let columns = self.columns;
        self.items = records
            .into_iter()
            .map(|record| {
                let placement = record.placement(columns);
                CanvasItem {
                    local_id: Uuid::new_v4(),
                    server_id: Some(record.id),
                    kind: record.kind,
                    payload: record.payload,
                    placement,
                    persisted_placement: Some(placement),
                    state: LifecycleState::Persisted,
                }
            })
            .collect();
    }

    pub fn remove(&mut self, id: &LocalId) -> Option<CanvasItem> {
        let index = self.items.iter().position(|item| item.local_id == *id)?;
        Some(self.items.remove(index))
    }

    /// Record the backend identity of a freshly created item.
    ///
    /// Returns `Ok(true)` when the id was newly set and `Ok(false)` when the
    /// item already carried the same id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown item and `Validation` when the item
    /// already carries a different server id.
    pub fn apply_server_id(&mut self, id: &LocalId, server_id: ServerId) -> Result<bool, CanvasError> {
        let item = self.get_mut(id).ok_or(CanvasError::NotFound(*id))?;
        match &item.server_id {
            Some(existing) if *existing == server_id => Ok(false),
            Some(existing) => Err(CanvasError::Validation(format!(
                "item {id} already materialized as {existing}, refusing {server_id}"
            ))),
            None => {
                item.server_id = Some(server_id);
                Ok(true)
            }
        }
    }

    pub fn set_state(&mut self, id: &LocalId, state: LifecycleState) -> bool {
        let Some(item) = self.get_mut(id) else {
            return false;
        };
        item.state = state;
        true
    }

    pub fn set_placement(&mut self, id: &LocalId, placement: Placement) -> bool {
        let Some(item) = self.get_mut(id) else {
            return false;
        };
        item.placement = placement;
        true
    }

    /// Put rendered placements back to what the backend last acknowledged.
    /// Unsaved items keep their current placement.
    pub fn revert_unpersisted_moves(&mut self) {
        for item in &mut self.items {
            if let Some(persisted) = item.persisted_placement {
                item.placement = persisted;
            }
        }
    }

    /// Declarative layout for the grid collaborator.
    #[must_use]
    pub fn layout(&self, locked: bool) -> Vec<LayoutEntry> {
        self.items
            .iter()
            .map(|item| LayoutEntry::new(item.local_id, item.kind, item.placement, locked))
            .collect()
    }
}
