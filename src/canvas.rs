//! Canvas facade: the public surface of the reconciliation engine.
//!
//! DESIGN
//! ======
//! A [`Canvas`] owns one dashboard's items. All mutable state sits behind
//! a single mutex in [`Shared`]; the lock is only ever held for short
//! synchronous sections and never across an `.await`. Network work runs
//! in per-item driver tasks (see `materializer`), so callers can start a
//! new gesture while earlier commits are still out.
//!
//! Local mutations are applied to the read model first and persisted
//! second. `preview` touches only the read model; `on_gesture_end`
//! persists the net result of a gesture, one request per changed item,
//! and reports a single verdict for the whole batch.
//!
//! ERROR HANDLING
//! ==============
//! Every mutation entry point consults the permission guard before doing
//! anything and fails fast with `Permission` once the canvas is read-only.
//! Network failures are surfaced through the returned result and a notice;
//! the affected item stays on the canvas in `Failed` state.

#[cfg(test)]
#[path = "canvas_test.rs"]
mod tests;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::backend::{CanvasBackend, RemoteItem};
use crate::error::CanvasError;
use crate::events::{CanvasEvent, DEFAULT_EVENT_CAPACITY, EventBus};
use crate::gesture::{GestureBatch, GestureTracker, PlacementChange, net_changes};
use crate::materializer::{self, CommitOutcome, CommitResult, CommitTicket, DeleteTicket, Flights, Mutation};
use crate::notify::{Notice, Notifier, TracingNotifier};
use crate::outcome::{self, BatchOutcome};
use crate::permission::{PermissionContext, PermissionGuard};
use crate::placement::{DEFAULT_GRID_COLUMNS, ItemKind, LayoutEntry, Placement};
use crate::ready::ReadyGate;
use crate::store::{CanvasItem, ItemStore, LifecycleState, LocalId};

// =============================================================================
// SHARED STATE
// =============================================================================

pub(crate) struct CanvasState {
    pub(crate) store: ItemStore,
    pub(crate) flights: Flights,
    pub(crate) gesture: GestureTracker,
}

/// State shared between the facade and its driver tasks.
pub(crate) struct Shared {
    pub(crate) dashboard_id: String,
    pub(crate) backend: Arc<dyn CanvasBackend>,
    pub(crate) guard: PermissionGuard,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) events: EventBus,
    pub(crate) ready: ReadyGate,
    state: Mutex<CanvasState>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, CanvasState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// BUILDER
// =============================================================================

pub struct CanvasBuilder {
    dashboard_id: String,
    backend: Arc<dyn CanvasBackend>,
    permission: PermissionContext,
    notifier: Option<Arc<dyn Notifier>>,
    columns: u32,
    event_capacity: usize,
    ready: Option<ReadyGate>,
}

impl CanvasBuilder {
    #[must_use]
    pub fn permission(mut self, permission: PermissionContext) -> Self {
        self.permission = permission;
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn columns(mut self, columns: u32) -> Self {
        self.columns = columns.max(1);
        self
    }

    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Gate every backend call on `ready`. Without one the canvas talks to
    /// the backend immediately.
    #[must_use]
    pub fn ready(mut self, ready: ReadyGate) -> Self {
        self.ready = Some(ready);
        self
    }

    #[must_use]
    pub fn build(self) -> Canvas {
        let notifier: Arc<dyn Notifier> = match self.notifier {
            Some(notifier) => notifier,
            None => Arc::new(TracingNotifier),
        };
        let events = EventBus::new(self.event_capacity);
        let guard = PermissionGuard::new(self.permission, Arc::clone(&notifier), events.clone());
        let state = CanvasState {
            store: ItemStore::new(self.columns),
            flights: Flights::default(),
            gesture: GestureTracker::default(),
        };
        Canvas {
            shared: Arc::new(Shared {
                dashboard_id: self.dashboard_id,
                backend: self.backend,
                guard,
                notifier,
                events,
                ready: self.ready.unwrap_or_else(ReadyGate::opened),
                state: Mutex::new(state),
            }),
        }
    }
}

// =============================================================================
// CANVAS
// =============================================================================

/// The result of a local removal: the removed item and a handle to the
/// background delete.
#[derive(Debug)]
pub struct Removal {
    pub item: CanvasItem,
    pub delete: DeleteTicket,
}

#[derive(Clone)]
pub struct Canvas {
    shared: Arc<Shared>,
}

impl Canvas {
    pub fn builder(dashboard_id: impl Into<String>, backend: Arc<dyn CanvasBackend>) -> CanvasBuilder {
        CanvasBuilder {
            dashboard_id: dashboard_id.into(),
            backend,
            permission: PermissionContext::editor(),
            notifier: None,
            columns: DEFAULT_GRID_COLUMNS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            ready: None,
        }
    }

    #[must_use]
    pub fn dashboard_id(&self) -> &str {
        &self.shared.dashboard_id
    }

    // -------------------------------------------------------------------------
    // Read model
    // -------------------------------------------------------------------------

    /// Snapshot of every item in insertion order.
    #[must_use]
    pub fn items(&self) -> Vec<CanvasItem> {
        self.shared.lock().store.items().to_vec()
    }

    #[must_use]
    pub fn item(&self, local_id: &LocalId) -> Option<CanvasItem> {
        self.shared.lock().store.get(local_id).cloned()
    }

    #[must_use]
    pub fn find_by_server_id(&self, server_id: &str) -> Option<CanvasItem> {
        self.shared.lock().store.find_by_server_id(server_id).cloned()
    }

    /// Layout description for the grid. Every entry is static once the
    /// viewer is read-only, so no gesture can start.
    #[must_use]
    pub fn layout(&self) -> Vec<LayoutEntry> {
        let locked = !self.can_mutate();
        self.shared.lock().store.layout(locked)
    }

    #[must_use]
    pub fn can_mutate(&self) -> bool {
        self.shared.guard.can_mutate()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CanvasEvent> {
        self.shared.events.subscribe()
    }

    /// True between the first `preview` of a gesture and its batch.
    #[must_use]
    pub fn gesture_in_progress(&self) -> bool {
        self.shared.lock().gesture.is_active()
    }

    #[must_use]
    pub fn is_in_flight(&self, local_id: &LocalId) -> bool {
        self.shared.lock().flights.is_in_flight(local_id)
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.shared.lock().flights.len()
    }

    // -------------------------------------------------------------------------
    // Hydration
    // -------------------------------------------------------------------------

    /// Replace the collection with the dashboard's stored items.
    ///
    /// # Errors
    ///
    /// `Network` when the backend cannot be reached or refuses the read.
    pub async fn load(&self) -> Result<usize, CanvasError> {
        self.shared.ready.wait().await?;
        let records = self
            .shared
            .backend
            .list_items(&self.shared.dashboard_id)
            .await
            .map_err(|e| {
                warn!(dashboard_id = %self.shared.dashboard_id, error = %e, "canvas load failed");
                CanvasError::from(e)
            })?;
        Ok(self.hydrate(records))
    }

    /// Replace the collection with already-fetched server records.
    pub fn hydrate(&self, records: Vec<RemoteItem>) -> usize {
        let count = {
            let mut state = self.shared.lock();
            state.store.load(records);
            state.store.len()
        };
        info!(dashboard_id = %self.shared.dashboard_id, count, "canvas loaded");
        self.shared.events.emit(CanvasEvent::Loaded { count });
        count
    }

    // -------------------------------------------------------------------------
    // Item operations
    // -------------------------------------------------------------------------

    /// Add an unsaved item below everything on the canvas. Nothing is sent
    /// until the item's first commit.
    ///
    /// # Errors
    ///
    /// `Permission` when read-only.
    pub fn add(&self, kind: ItemKind, payload: serde_json::Value) -> Result<CanvasItem, CanvasError> {
        self.shared.guard.ensure()?;
        let item = self.shared.lock().store.add(kind, payload);
        self.shared
            .events
            .emit(CanvasEvent::ItemAdded { local_id: item.local_id, kind });
        Ok(item)
    }

    /// Replace an item's payload and persist it, creating the item first if
    /// it was never materialized.
    ///
    /// # Errors
    ///
    /// `Permission` when read-only, `NotFound` for an unknown item, and
    /// `Network` when the request fails. On a network failure the item is
    /// left `Failed`.
    pub async fn edit(&self, local_id: LocalId, payload: serde_json::Value) -> CommitResult {
        let ticket = materializer::submit(&self.shared, local_id, Mutation::payload(payload))?;
        let result = ticket.wait().await;
        match &result {
            Ok(CommitOutcome::Discarded { .. }) | Err(CanvasError::Permission) => {}
            Ok(_) => self
                .shared
                .notifier
                .notify(Notice::info("Success", "Component updated successfully")),
            Err(_) => self
                .shared
                .notifier
                .notify(Notice::error("Error", "Failed to save component")),
        }
        result
    }

    /// Remove an item from the canvas now and delete it on the server in
    /// the background. A failed delete is reported but does not restore the
    /// item.
    ///
    /// # Errors
    ///
    /// `Permission` when read-only and `NotFound` for an unknown item.
    pub fn remove(&self, local_id: LocalId) -> Result<Removal, CanvasError> {
        self.shared.guard.ensure()?;
        let mut item = self
            .shared
            .lock()
            .store
            .remove(&local_id)
            .ok_or(CanvasError::NotFound(local_id))?;
        item.state = LifecycleState::Deleting;

        let delete = materializer::schedule_delete(&self.shared, local_id, item.kind, item.server_id.clone());
        self.shared.events.emit(CanvasEvent::ItemRemoved { local_id });
        Ok(Removal { item, delete })
    }

    /// Record the server identity of an item. Setting the same id twice is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown item, `Validation` for a conflicting id.
    pub fn apply_server_id(&self, local_id: LocalId, server_id: impl Into<String>) -> Result<(), CanvasError> {
        let server_id = server_id.into();
        let assigned = self
            .shared
            .lock()
            .store
            .apply_server_id(&local_id, server_id.clone())?;
        if assigned {
            self.shared
                .events
                .emit(CanvasEvent::ServerIdAssigned { local_id, server_id });
        }
        Ok(())
    }

    /// Persist a placement for one item.
    ///
    /// # Errors
    ///
    /// Fails before any request with `Permission`, `NotFound`, or
    /// `Validation`. Network outcomes arrive through the ticket.
    pub fn commit(&self, local_id: LocalId, placement: Placement) -> Result<CommitTicket, CanvasError> {
        materializer::submit(&self.shared, local_id, Mutation::placement(placement))
    }

    // -------------------------------------------------------------------------
    // Gestures
    // -------------------------------------------------------------------------

    /// Apply in-progress placement proposals to the read model only.
    ///
    /// # Errors
    ///
    /// `Permission` when read-only.
    pub fn preview(&self, changes: &[PlacementChange]) -> Result<(), CanvasError> {
        self.shared.guard.ensure()?;
        let mut state = self.shared.lock();
        let columns = state.store.columns();
        for change in changes {
            let Some(item) = state.store.get_mut(&change.local_id) else {
                continue;
            };
            item.placement = change.placement.clamped(item.kind, columns);
        }
        state.gesture.observe(changes.iter().map(|c| &c.local_id));
        Ok(())
    }

    /// Persist the final placements of a completed gesture.
    ///
    /// Items whose placement ends where the server will already hold it are
    /// skipped. Previewed items missing from the batch snap back.
    /// Each remaining item is committed with its own request; the results
    /// are folded into one verdict and one notice.
    ///
    /// # Errors
    ///
    /// `Permission` when read-only; uncommitted moves are reverted.
    pub async fn on_gesture_end(&self, batch: GestureBatch) -> Result<BatchOutcome, CanvasError> {
        let changes = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            let gesture = state.gesture.finish().unwrap_or_default();
            debug!(touched = gesture.touched.len(), "gesture ended");
            if !self.shared.guard.can_mutate() {
                state.store.revert_unpersisted_moves();
                return Err(CanvasError::Permission);
            }
            for id in gesture.omitted_from(&batch) {
                let queued = state.flights.queued_placement(id);
                if let Some(item) = state.store.get_mut(id) {
                    if let Some(settled) = queued.or(item.persisted_placement) {
                        item.placement = settled;
                    }
                }
            }
            let columns = state.store.columns();
            for change in &batch.changes {
                if let Some(item) = state.store.get_mut(&change.local_id) {
                    item.placement = change.placement.clamped(item.kind, columns);
                }
            }
            let flights = &state.flights;
            net_changes(&state.store, &batch, |id| flights.queued_placement(id))
        };

        let mut results: Vec<(LocalId, CommitResult)> = Vec::with_capacity(changes.len());
        let mut tickets = Vec::with_capacity(changes.len());
        for change in changes {
            match self.commit(change.local_id, change.placement) {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => results.push((change.local_id, Err(e))),
            }
        }
        let waits = tickets.into_iter().map(|ticket| async move {
            let local_id = ticket.local_id();
            (local_id, ticket.wait().await)
        });
        results.extend(futures::future::join_all(waits).await);

        let verdict = outcome::classify(results);
        outcome::report(&verdict, &self.shared.guard, self.shared.notifier.as_ref());
        let (succeeded, failed) = (verdict.succeeded().len(), verdict.failed().len());
        if verdict != BatchOutcome::Unchanged {
            info!(dashboard_id = %self.shared.dashboard_id, succeeded, failed, "gesture batch committed");
        }
        self.shared
            .events
            .emit(CanvasEvent::BatchCommitted { succeeded, failed });
        Ok(verdict)
    }
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("dashboard_id", &self.shared.dashboard_id)
            .field("guard", &self.shared.guard)
            .finish_non_exhaustive()
    }
}
