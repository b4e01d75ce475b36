//! Lazy materializer: per-item create-or-update with request coalescing.
//!
//! DESIGN
//! ======
//! Each item has at most one backend request in flight. The first commit
//! for an idle item opens a *flight* and spawns a driver task; commits that
//! arrive while the flight is open are merged into a single pending slot
//! (placement and payload each last-write-wins) instead of being queued.
//! When the in-flight request resolves, the driver sends whatever is
//! pending, and stops once the slot is empty.
//!
//! Create versus update is decided when a request is sent, not when it is
//! queued: a commit queued behind an in-flight create goes out as an update
//! carrying the id the create just returned.
//!
//! EDGE CASES
//! ==========
//! - Removing an item mid-flight marks the flight; the driver discards the
//!   response and then deletes the server record (including one that the
//!   in-flight create just produced).
//! - After a permission downgrade, pending commits resolve with
//!   `Permission` without a request.
//! - A failed create leaves the item `Failed`; a pending commit retries
//!   the create.

#[cfg(test)]
#[path = "materializer_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::backend::{self, ItemPatch, NewItem};
use crate::canvas::Shared;
use crate::error::CanvasError;
use crate::events::CanvasEvent;
use crate::notify::Notice;
use crate::placement::{ItemKind, Placement};
use crate::store::{CanvasItem, LifecycleState, LocalId, ServerId};

// =============================================================================
// TYPES
// =============================================================================

/// What a caller wants the backend to hold for one item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mutation {
    pub placement: Option<Placement>,
    pub payload: Option<serde_json::Value>,
}

impl Mutation {
    #[must_use]
    pub fn placement(placement: Placement) -> Self {
        Self { placement: Some(placement), payload: None }
    }

    #[must_use]
    pub fn payload(payload: serde_json::Value) -> Self {
        Self { placement: None, payload: Some(payload) }
    }

    /// Fold a newer mutation into this one; newer fields win.
    pub fn merge(&mut self, newer: Mutation) {
        if newer.placement.is_some() {
            self.placement = newer.placement;
        }
        if newer.payload.is_some() {
            self.payload = newer.payload;
        }
    }
}

/// How a single commit was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// First persistence of the item.
    Created { local_id: LocalId, server_id: ServerId },
    Updated { local_id: LocalId, server_id: ServerId },
    /// The item was removed before its request settled.
    Discarded { local_id: LocalId },
}

impl CommitOutcome {
    #[must_use]
    pub fn local_id(&self) -> LocalId {
        match self {
            Self::Created { local_id, .. } | Self::Updated { local_id, .. } | Self::Discarded { local_id } => {
                *local_id
            }
        }
    }
}

pub type CommitResult = Result<CommitOutcome, CanvasError>;

/// Handle to a submitted commit. Resolves with the outcome of the request
/// that carried this commit's state, or a later state that superseded it.
#[derive(Debug)]
pub struct CommitTicket {
    local_id: LocalId,
    rx: oneshot::Receiver<CommitResult>,
}

impl CommitTicket {
    #[must_use]
    pub fn local_id(&self) -> LocalId {
        self.local_id
    }

    pub async fn wait(self) -> CommitResult {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(CanvasError::Network("commit abandoned before it settled".into())),
        }
    }
}

/// Handle to the background delete that follows a local removal.
#[derive(Debug)]
pub struct DeleteTicket {
    rx: oneshot::Receiver<Result<(), CanvasError>>,
}

impl DeleteTicket {
    pub async fn wait(self) -> Result<(), CanvasError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(CanvasError::Network("delete abandoned before it settled".into())),
        }
    }
}

type Waiter = oneshot::Sender<CommitResult>;
type DeleteWaiter = oneshot::Sender<Result<(), CanvasError>>;

struct Request {
    mutation: Mutation,
    waiters: Vec<Waiter>,
}

/// Set on a flight whose item was removed locally while a request was out.
struct Tombstone {
    kind: ItemKind,
    server_id: Option<ServerId>,
    waiter: DeleteWaiter,
}

#[derive(Default)]
struct Flight {
    pending: Option<Request>,
    tombstone: Option<Tombstone>,
    /// Latest placement submitted through this flight.
    target: Option<Placement>,
}

/// Open flights keyed by item.
#[derive(Default)]
pub(crate) struct Flights {
    by_item: HashMap<LocalId, Flight>,
}

impl Flights {
    #[must_use]
    pub(crate) fn is_in_flight(&self, id: &LocalId) -> bool {
        self.by_item.contains_key(id)
    }

    /// The placement the server will hold once this item's open requests
    /// land, if any of them carries one.
    #[must_use]
    pub(crate) fn queued_placement(&self, id: &LocalId) -> Option<Placement> {
        self.by_item.get(id).and_then(|flight| flight.target)
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.by_item.len()
    }
}

// =============================================================================
// SUBMIT
// =============================================================================

/// Queue a mutation for an item, opening a flight if none is active.
///
/// # Errors
///
/// Fails fast, without any request, with `Permission` when read-only,
/// `NotFound` for an unknown item, and `Validation` for a placement that
/// cannot fit the item's bounds.
pub(crate) fn submit(shared: &Arc<Shared>, local_id: LocalId, mut mutation: Mutation) -> Result<CommitTicket, CanvasError> {
    shared.guard.ensure()?;

    let (tx, rx) = oneshot::channel();
    let ticket = CommitTicket { local_id, rx };

    let mut state = shared.lock();
    let columns = state.store.columns();
    let (kind, materialized, retry_move) = {
        let item = state
            .store
            .get(&local_id)
            .ok_or(CanvasError::NotFound(local_id))?;
        (item.kind, item.is_materialized(), failed_move(item))
    };

    if let Some(placement) = mutation.placement {
        let placement = placement.normalize(kind, columns)?;
        mutation.placement = Some(placement);
        state.store.set_placement(&local_id, placement);
    }

    if let Some(flight) = state.flights.by_item.get_mut(&local_id) {
        debug!(%local_id, "request in flight; coalescing into pending state");
        if mutation.placement.is_some() {
            flight.target = mutation.placement;
        }
        match flight.pending.as_mut() {
            Some(pending) => {
                pending.mutation.merge(mutation);
                pending.waiters.push(tx);
            }
            None => flight.pending = Some(Request { mutation, waiters: vec![tx] }),
        }
        return Ok(ticket);
    }

    let next_state = if materialized { LifecycleState::Updating } else { LifecycleState::Creating };
    if mutation.placement.is_none() {
        mutation.placement = retry_move;
    }
    state
        .flights
        .by_item
        .insert(local_id, Flight { target: mutation.placement, ..Flight::default() });
    state.store.set_state(&local_id, next_state);
    drop(state);

    shared
        .events
        .emit(CanvasEvent::ItemChanged { local_id, state: next_state });
    tokio::spawn(drive(Arc::clone(shared), local_id, Request { mutation, waiters: vec![tx] }));
    Ok(ticket)
}

// =============================================================================
// DRIVER
// =============================================================================

/// The request actually put on the wire for one round of a flight.
enum Sent {
    Created { server_id: ServerId, placement: Placement, payload: serde_json::Value },
    Updated { server_id: ServerId, patch: ItemPatch },
}

async fn drive(shared: Arc<Shared>, local_id: LocalId, first: Request) {
    let mut request = first;
    loop {
        let attempt = send(&shared, local_id, &request.mutation).await;
        match settle(&shared, local_id, attempt, request.waiters).await {
            Some(next) => request = next,
            None => return,
        }
    }
}

enum Attempt {
    Sent(Result<Sent, CanvasError>),
    /// The item vanished before anything was sent.
    Skipped,
}

async fn send(shared: &Arc<Shared>, local_id: LocalId, mutation: &Mutation) -> Attempt {
    if let Err(e) = shared.ready.wait().await {
        return Attempt::Sent(Err(e));
    }
    if !shared.guard.can_mutate() {
        return Attempt::Sent(Err(CanvasError::Permission));
    }

    let snapshot = {
        let state = shared.lock();
        state.store.get(&local_id).map(|item| {
            (
                item.kind,
                item.server_id.clone(),
                mutation.placement.unwrap_or(item.placement),
                mutation.payload.clone().unwrap_or_else(|| item.payload.clone()),
            )
        })
    };
    let Some((kind, server_id, placement, payload)) = snapshot else {
        return Attempt::Skipped;
    };

    let backend = shared.backend.as_ref();
    let result = match server_id {
        None => {
            let new_item = NewItem { kind, payload, placement };
            backend::create(backend, &shared.dashboard_id, &new_item)
                .await
                .map(|server_id| Sent::Created { server_id, placement: new_item.placement, payload: new_item.payload })
        }
        Some(server_id) => {
            let patch = ItemPatch { placement: mutation.placement, payload: mutation.payload.clone() };
            backend::update(backend, kind, &server_id, &patch)
                .await
                .map(|()| Sent::Updated { server_id, patch })
        }
    };
    Attempt::Sent(result.map_err(|e| {
        warn!(%local_id, %kind, error = %e, "canvas item request failed");
        CanvasError::from(e)
    }))
}

/// Apply one response and decide whether the flight continues.
async fn settle(shared: &Arc<Shared>, local_id: LocalId, attempt: Attempt, waiters: Vec<Waiter>) -> Option<Request> {
    if matches!(attempt, Attempt::Sent(Err(CanvasError::Permission))) {
        shared.guard.on_denied();
    }

    let removed = {
        let mut state = shared.lock();
        let tombstone = state
            .flights
            .by_item
            .get_mut(&local_id)
            .and_then(|flight| flight.tombstone.take());
        if tombstone.is_some() || state.store.get(&local_id).is_none() {
            let pending = state
                .flights
                .by_item
                .remove(&local_id)
                .and_then(|flight| flight.pending);
            Some((tombstone, pending))
        } else {
            None
        }
    };

    match removed {
        Some((tombstone, pending)) => {
            discard(shared, local_id, &attempt, waiters, tombstone, pending).await;
            None
        }
        None => apply(shared, local_id, attempt, waiters),
    }
}

/// The item left the canvas while its request was out: resolve everyone
/// as discarded and delete whatever the server holds for it.
async fn discard(
    shared: &Arc<Shared>,
    local_id: LocalId,
    attempt: &Attempt,
    waiters: Vec<Waiter>,
    tombstone: Option<Tombstone>,
    pending: Option<Request>,
) {
    debug!(%local_id, "item removed while in flight; discarding response");
    let discarded = Ok(CommitOutcome::Discarded { local_id });
    resolve(waiters, &discarded);
    if let Some(pending) = pending {
        resolve(pending.waiters, &discarded);
    }

    let Some(tombstone) = tombstone else {
        return;
    };
    let created = match attempt {
        Attempt::Sent(Ok(Sent::Created { server_id, .. })) => Some(server_id.clone()),
        _ => None,
    };
    let result = match created.or(tombstone.server_id) {
        Some(server_id) => delete_remote(shared, tombstone.kind, &server_id).await,
        None => Ok(()),
    };
    if tombstone.waiter.send(result).is_err() {
        debug!(%local_id, "delete waiter dropped");
    }
}

fn apply(shared: &Arc<Shared>, local_id: LocalId, attempt: Attempt, waiters: Vec<Waiter>) -> Option<Request> {
    let mut events = Vec::new();
    let mut state = shared.lock();

    let outcome = match attempt {
        Attempt::Skipped => Ok(CommitOutcome::Discarded { local_id }),
        Attempt::Sent(Ok(Sent::Created { server_id, placement, payload })) => {
            match state.store.apply_server_id(&local_id, server_id.clone()) {
                Ok(true) => events.push(CanvasEvent::ServerIdAssigned { local_id, server_id: server_id.clone() }),
                Ok(false) => {}
                Err(e) => warn!(%local_id, error = %e, "server id not applied"),
            }
            if let Some(item) = state.store.get_mut(&local_id) {
                item.persisted_placement = Some(placement);
                item.payload = payload;
                item.state = LifecycleState::Persisted;
            }
            info!(%local_id, %server_id, "canvas item materialized");
            Ok(CommitOutcome::Created { local_id, server_id })
        }
        Attempt::Sent(Ok(Sent::Updated { server_id, patch })) => {
            if let Some(item) = state.store.get_mut(&local_id) {
                if let Some(placement) = patch.placement {
                    item.persisted_placement = Some(placement);
                }
                if let Some(payload) = patch.payload {
                    item.payload = payload;
                }
                item.state = LifecycleState::Persisted;
            }
            Ok(CommitOutcome::Updated { local_id, server_id })
        }
        Attempt::Sent(Err(CanvasError::Permission)) => {
            if let Some(item) = state.store.get_mut(&local_id) {
                item.state = if item.is_materialized() { LifecycleState::Persisted } else { LifecycleState::Unsaved };
                if let Some(persisted) = item.persisted_placement {
                    item.placement = persisted;
                }
            }
            Err(CanvasError::Permission)
        }
        Attempt::Sent(Err(e)) => {
            state.store.set_state(&local_id, LifecycleState::Failed);
            Err(e)
        }
    };

    let pending = state
        .flights
        .by_item
        .get_mut(&local_id)
        .and_then(|flight| flight.pending.take());
    let (next, refused) = match pending {
        Some(mut pending) if shared.guard.can_mutate() => {
            if pending.mutation.placement.is_none() {
                pending.mutation.placement = state.store.get(&local_id).and_then(failed_move);
            }
            let materialized = state
                .store
                .get(&local_id)
                .is_some_and(CanvasItem::is_materialized);
            let next_state = if materialized { LifecycleState::Updating } else { LifecycleState::Creating };
            state.store.set_state(&local_id, next_state);
            debug!(%local_id, "sending coalesced pending state");
            (Some(pending), None)
        }
        Some(pending) => {
            state.flights.by_item.remove(&local_id);
            (None, Some(pending))
        }
        None => {
            state.flights.by_item.remove(&local_id);
            (None, None)
        }
    };
    if let Some(item) = state.store.get(&local_id) {
        events.push(CanvasEvent::ItemChanged { local_id, state: item.state });
    }
    drop(state);

    for event in events {
        shared.events.emit(event);
    }
    resolve(waiters, &outcome);
    if let Some(refused) = refused {
        resolve(refused.waiters, &Err(CanvasError::Permission));
    }
    next
}

/// A rendered placement the server rejected, to ride along with the next
/// request for the item so a payload-only update cannot mark it saved.
fn failed_move(item: &CanvasItem) -> Option<Placement> {
    let stale = item.is_materialized() && item.persisted_placement != Some(item.placement);
    (item.state == LifecycleState::Failed && stale).then_some(item.placement)
}

fn resolve(waiters: Vec<Waiter>, result: &CommitResult) {
    for waiter in waiters {
        if waiter.send(result.clone()).is_err() {
            debug!("commit waiter dropped before outcome");
        }
    }
}

// =============================================================================
// REMOVAL
// =============================================================================

/// Start the backend side of a local removal. The item must already be
/// out of the store.
pub(crate) fn schedule_delete(
    shared: &Arc<Shared>,
    local_id: LocalId,
    kind: ItemKind,
    server_id: Option<ServerId>,
) -> DeleteTicket {
    let (tx, rx) = oneshot::channel();

    let superseded = {
        let mut state = shared.lock();
        match state.flights.by_item.get_mut(&local_id) {
            Some(flight) => {
                flight.tombstone = Some(Tombstone { kind, server_id: server_id.clone(), waiter: tx });
                Ok(flight.pending.take())
            }
            None => Err(tx),
        }
    };

    match superseded {
        // The flight's driver deletes once its request settles.
        Ok(pending) => {
            if let Some(pending) = pending {
                resolve(pending.waiters, &Ok(CommitOutcome::Discarded { local_id }));
            }
        }
        Err(tx) => match server_id {
            Some(server_id) => {
                let shared = Arc::clone(shared);
                tokio::spawn(async move {
                    let result = delete_remote(&shared, kind, &server_id).await;
                    if tx.send(result).is_err() {
                        debug!(%local_id, "delete waiter dropped");
                    }
                });
            }
            None => {
                if tx.send(Ok(())).is_err() {
                    debug!(%local_id, "delete waiter dropped");
                }
            }
        },
    }
    DeleteTicket { rx }
}

/// Best-effort backend delete. Failures are reported, never rolled back.
pub(crate) async fn delete_remote(shared: &Arc<Shared>, kind: ItemKind, server_id: &str) -> Result<(), CanvasError> {
    shared.ready.wait().await?;
    if !shared.guard.can_mutate() {
        return Err(CanvasError::Permission);
    }

    match backend::delete(shared.backend.as_ref(), kind, server_id).await {
        Ok(()) => {
            info!(%server_id, %kind, "canvas item deleted");
            shared
                .notifier
                .notify(Notice::info("Success", "Component deleted successfully"));
            Ok(())
        }
        Err(e) => {
            warn!(%server_id, %kind, error = %e, "canvas item delete failed");
            let err = CanvasError::from(e);
            if err == CanvasError::Permission {
                shared.guard.on_denied();
            } else {
                shared
                    .notifier
                    .notify(Notice::error("Error", "Failed to delete component"));
            }
            Err(err)
        }
    }
}
