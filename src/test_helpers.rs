//! Shared fixtures for unit tests: a scripted backend, a recording
//! notifier, and canvas builders.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::backend::{BackendError, CanvasBackend, ItemPatch, NewItem, RemoteItem};
use crate::canvas::Canvas;
use crate::notify::{Notice, Notifier};
use crate::permission::PermissionContext;
use crate::placement::{ItemKind, Placement};
use crate::store::ServerId;

// =============================================================================
// NOTIFIER
// =============================================================================

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub(crate) fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.notices().into_iter().map(|n| n.message).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice);
    }
}

// =============================================================================
// BACKEND
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    List,
    Create { block: bool, kind: ItemKind, placement: Placement, payload: Value },
    Update { block: bool, id: ServerId, patch: ItemPatch },
    Delete { block: bool, id: ServerId },
}

impl Call {
    pub(crate) fn is_create(&self) -> bool {
        matches!(self, Self::Create { .. })
    }

    pub(crate) fn is_update(&self) -> bool {
        matches!(self, Self::Update { .. })
    }

    pub(crate) fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }
}

/// In-memory backend. Records every call, hands out `srv-N` ids, and can
/// hold responses behind a gate so a test decides when each one lands.
#[derive(Default)]
pub(crate) struct MockBackend {
    calls: Mutex<Vec<Call>>,
    records: Mutex<Vec<RemoteItem>>,
    gate: Option<Semaphore>,
    next_id: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    forbid: AtomicBool,
    fail_creates: AtomicBool,
    fail_deletes: AtomicBool,
    failing_updates: Mutex<HashSet<ServerId>>,
}

impl MockBackend {
    /// Responds immediately.
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every response waits for a [`MockBackend::release`].
    pub(crate) fn gated() -> Arc<Self> {
        Arc::new(Self { gate: Some(Semaphore::new(0)), ..Self::default() })
    }

    pub(crate) fn with_records(records: Vec<RemoteItem>) -> Arc<Self> {
        let backend = Self::default();
        *backend
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = records;
        Arc::new(backend)
    }

    /// Let `n` held responses through.
    pub(crate) fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Answer every mutation with 403 from now on.
    pub(crate) fn forbid(&self) {
        self.forbid.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_creates(&self) {
        self.fail_creates.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_updates_for(&self, id: &str) {
        self.failing_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
    }

    pub(crate) fn heal_updates(&self) {
        self.failing_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|&c| pred(c)).count()
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Yield to spawned tasks until at least `n` calls were recorded.
    pub(crate) async fn wait_for_calls(&self, n: usize) {
        for _ in 0..1_000 {
            if self.calls().len() >= n {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    async fn enter(&self, call: Call) -> Result<(), BackendError> {
        let mutating = !matches!(call, Call::List);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let held = match &self.gate {
            Some(gate) => match gate.acquire().await {
                Ok(permit) => {
                    permit.forget();
                    Ok(())
                }
                Err(e) => Err(BackendError::Transport(e.to_string())),
            },
            None => Ok(()),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        held?;

        if mutating && self.forbid.load(Ordering::SeqCst) {
            return Err(BackendError::Forbidden);
        }
        Ok(())
    }

    async fn create(&self, block: bool, item: &NewItem) -> Result<ServerId, BackendError> {
        self.enter(Call::Create { block, kind: item.kind, placement: item.placement, payload: item.payload.clone() })
            .await?;
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(BackendError::Status { status: 500, body: "create failed".into() });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("srv-{n}"))
    }

    async fn update(&self, block: bool, id: &str, patch: &ItemPatch) -> Result<(), BackendError> {
        self.enter(Call::Update { block, id: id.to_string(), patch: patch.clone() })
            .await?;
        let failing = self
            .failing_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id);
        if failing {
            return Err(BackendError::Status { status: 500, body: "update failed".into() });
        }
        Ok(())
    }

    async fn delete(&self, block: bool, id: &str) -> Result<(), BackendError> {
        self.enter(Call::Delete { block, id: id.to_string() }).await?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CanvasBackend for MockBackend {
    async fn list_items(&self, _dashboard_id: &str) -> Result<Vec<RemoteItem>, BackendError> {
        self.enter(Call::List).await?;
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn create_item(&self, _dashboard_id: &str, item: &NewItem) -> Result<ServerId, BackendError> {
        self.create(false, item).await
    }

    async fn update_item(&self, id: &str, patch: &ItemPatch) -> Result<(), BackendError> {
        self.update(false, id, patch).await
    }

    async fn delete_item(&self, id: &str) -> Result<(), BackendError> {
        self.delete(false, id).await
    }

    async fn create_block(&self, _dashboard_id: &str, block: &NewItem) -> Result<ServerId, BackendError> {
        self.create(true, block).await
    }

    async fn update_block(&self, id: &str, patch: &ItemPatch) -> Result<(), BackendError> {
        self.update(true, id, patch).await
    }

    async fn delete_block(&self, id: &str) -> Result<(), BackendError> {
        self.delete(true, id).await
    }
}

// =============================================================================
// FIXTURES
// =============================================================================

/// An editable canvas over `backend` with a recording notifier.
pub(crate) fn test_canvas(backend: &Arc<MockBackend>) -> (Canvas, Arc<RecordingNotifier>) {
    test_canvas_with(backend, PermissionContext::editor())
}

pub(crate) fn test_canvas_with(
    backend: &Arc<MockBackend>,
    permission: PermissionContext,
) -> (Canvas, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let backend: Arc<dyn CanvasBackend> = backend.clone();
    let canvas = Canvas::builder("dash-1", backend)
        .permission(permission)
        .notifier(notifier.clone())
        .build();
    (canvas, notifier)
}

/// A stored record as the backend would return it.
pub(crate) fn remote(id: &str, kind: ItemKind, placement: Placement) -> RemoteItem {
    RemoteItem {
        id: id.to_string(),
        kind,
        payload: serde_json::json!({"title": id}),
        x: Some(placement.x),
        y: Some(placement.y),
        w: Some(placement.w),
        h: Some(placement.h),
    }
}
