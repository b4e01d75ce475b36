//! Gesture batching: live previews in, one commit batch out.
//!
//! DESIGN
//! ======
//! While a drag or resize is in progress the grid collaborator reports a
//! placement proposal on every pointer move. Those only update the read
//! model (`Canvas::preview`). When the gesture ends, the grid reports the
//! final placement of every item it laid out, including items it shifted
//! to avoid overlap. [`net_changes`] reduces that report to the items whose
//! placement differs from what the backend will hold once its open
//! requests land; only those are persisted, each with its own request.
//! Items that were previewed but left out of the final report snap back.

#[cfg(test)]
#[path = "gesture_test.rs"]
mod tests;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::placement::Placement;
use crate::store::{ItemStore, LocalId};

/// A proposed placement for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementChange {
    pub local_id: LocalId,
    pub placement: Placement,
}

impl PlacementChange {
    #[must_use]
    pub fn new(local_id: LocalId, placement: Placement) -> Self {
        Self { local_id, placement }
    }
}

/// Final placements reported once per completed gesture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureBatch {
    pub changes: Vec<PlacementChange>,
}

impl GestureBatch {
    #[must_use]
    pub fn new(changes: Vec<PlacementChange>) -> Self {
        Self { changes }
    }
}

impl FromIterator<(LocalId, Placement)> for GestureBatch {
    fn from_iter<T: IntoIterator<Item = (LocalId, Placement)>>(iter: T) -> Self {
        Self { changes: iter.into_iter().map(|(id, p)| PlacementChange::new(id, p)).collect() }
    }
}

/// Bookkeeping for the gesture currently in progress.
#[derive(Debug, Default)]
pub(crate) struct GestureTracker {
    active: Option<ActiveGesture>,
}

/// Items moved by preview frames since the gesture started.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ActiveGesture {
    pub(crate) touched: HashSet<LocalId>,
}

impl ActiveGesture {
    /// Previewed items the final batch does not mention.
    pub(crate) fn omitted_from<'a>(&'a self, batch: &'a GestureBatch) -> impl Iterator<Item = &'a LocalId> {
        self.touched
            .iter()
            .filter(|id| !batch.changes.iter().any(|c| c.local_id == **id))
    }
}

impl GestureTracker {
    /// Record one preview frame, starting a gesture if none is active.
    pub(crate) fn observe<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a LocalId>,
    {
        self.active
            .get_or_insert_with(ActiveGesture::default)
            .touched
            .extend(ids);
    }

    #[must_use]
    pub(crate) fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// End the current gesture. A batch may arrive without any preview
    /// frames (a click-release), in which case this returns `None`.
    pub(crate) fn finish(&mut self) -> Option<ActiveGesture> {
        self.active.take()
    }
}

/// Reduce a gesture batch to the net placement changes worth persisting.
///
/// Proposals are clamped to each item's bounds, then compared against
/// `queued(id)` (the placement an open request will leave on the server)
/// or, when nothing is queued, the last persisted placement. Unknown items
/// are dropped; when an item appears more than once the last proposal wins.
/// Items never materialized always count as changed, which is what lazily
/// creates them.
#[must_use]
pub fn net_changes<F>(store: &ItemStore, batch: &GestureBatch, queued: F) -> Vec<PlacementChange>
where
    F: Fn(&LocalId) -> Option<Placement>,
{
    let columns = store.columns();
    let mut changes: Vec<PlacementChange> = Vec::with_capacity(batch.changes.len());

    for change in &batch.changes {
        let Some(item) = store.get(&change.local_id) else {
            debug!(local_id = %change.local_id, "gesture batch names unknown item; skipping");
            continue;
        };
        let placement = change.placement.clamped(item.kind, columns);
        changes.retain(|c| c.local_id != change.local_id);
        let baseline = queued(&change.local_id).or(item.persisted_placement);
        if baseline == Some(placement) {
            continue;
        }
        changes.push(PlacementChange::new(change.local_id, placement));
    }

    changes
}
