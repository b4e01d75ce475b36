//! Subscribable change stream for the canvas.
//!
//! DESIGN
//! ======
//! Anything that needs to react to the collection or to the viewer's
//! permission level (a dashboard list, a toolbar that hides edit buttons)
//! calls [`EventBus::subscribe`] and reads from the returned receiver.
//! Emission never blocks; a lagging subscriber loses the oldest events and
//! sees `RecvError::Lagged`, after which it should re-read `Canvas::items`.

use tokio::sync::broadcast;
use tracing::debug;

use crate::placement::ItemKind;
use crate::store::{LifecycleState, LocalId, ServerId};

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanvasEvent {
    /// The collection was replaced from server records.
    Loaded { count: usize },
    ItemAdded { local_id: LocalId, kind: ItemKind },
    /// Lifecycle state, placement, or payload of an item changed.
    ItemChanged { local_id: LocalId, state: LifecycleState },
    ItemRemoved { local_id: LocalId },
    ServerIdAssigned { local_id: LocalId, server_id: ServerId },
    /// The viewer lost edit rights for the rest of the session.
    PermissionDowngraded,
    /// A gesture batch finished persisting.
    BatchCommitted { succeeded: usize, failed: usize },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CanvasEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CanvasEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: CanvasEvent) {
        if self.tx.send(event).is_err() {
            debug!("canvas event dropped; no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
