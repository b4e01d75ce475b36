//! Permission guard: may the current viewer mutate the canvas?
//!
//! DESIGN
//! ======
//! Edit rights are decided once per dashboard load and can only be lost
//! afterwards: any authorization refusal from the backend flips the guard
//! to read-only for the rest of the session. Every mutation path checks
//! [`PermissionGuard::ensure`] before touching the network and calls
//! [`PermissionGuard::on_denied`] when the backend refuses anyway.

#[cfg(test)]
#[path = "permission_test.rs"]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::error::CanvasError;
use crate::events::{CanvasEvent, EventBus};
use crate::notify::{Notice, Notifier};

/// Edit rights as computed by the surrounding application at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionContext {
    pub can_edit: bool,
}

impl PermissionContext {
    #[must_use]
    pub fn editor() -> Self {
        Self { can_edit: true }
    }

    #[must_use]
    pub fn viewer() -> Self {
        Self { can_edit: false }
    }
}

#[derive(Clone)]
pub struct PermissionGuard {
    can_edit: Arc<AtomicBool>,
    notifier: Arc<dyn Notifier>,
    events: EventBus,
}

impl PermissionGuard {
    pub fn new(context: PermissionContext, notifier: Arc<dyn Notifier>, events: EventBus) -> Self {
        Self { can_edit: Arc::new(AtomicBool::new(context.can_edit)), notifier, events }
    }

    #[must_use]
    pub fn can_mutate(&self) -> bool {
        self.can_edit.load(Ordering::Acquire)
    }

    /// Fail fast when the viewer is read-only.
    ///
    /// # Errors
    ///
    /// Returns `Permission` once the guard is read-only.
    pub fn ensure(&self) -> Result<(), CanvasError> {
        if self.can_mutate() { Ok(()) } else { Err(CanvasError::Permission) }
    }

    /// Record an authorization refusal. Only the first downgrade notifies;
    /// there is no way back to editable short of a reload.
    pub fn on_denied(&self) {
        if !self.can_edit.swap(false, Ordering::AcqRel) {
            return;
        }
        warn!("backend refused mutation; canvas is now read-only");
        self.notifier
            .notify(Notice::warning("View only", "You have view-only access to this dashboard"));
        self.events.emit(CanvasEvent::PermissionDowngraded);
    }
}

impl std::fmt::Debug for PermissionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGuard")
            .field("can_edit", &self.can_mutate())
            .finish_non_exhaustive()
    }
}
