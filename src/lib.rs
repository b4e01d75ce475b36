//! Canvas reconciliation engine for dashboard grids.
//!
//! Keeps an in-memory collection of placed dashboard items consistent with
//! high-frequency drag/resize feedback, a remote API that must only see
//! one request per item at a time, items that exist only locally until
//! their first committed layout change, and a viewer permission level that
//! can be lost mid-session.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`canvas`] | Public facade: read model, add/edit/remove, gestures, hydration |
//! | [`placement`] | Item kinds, grid placements, bounds, default slots |
//! | [`permission`] | One-way edit → read-only guard |
//! | [`store`] | Ordered item collection with stable local ids |
//! | [`gesture`] | Preview tracking and net change extraction per gesture |
//! | [`materializer`] | Per-item create-or-update with request coalescing |
//! | [`outcome`] | Batch verdicts and the single notice per gesture |
//! | [`backend`] | Persistence collaborator trait and wire-neutral types |
//! | [`http`] | REST implementation of the backend |
//! | [`notify`] | User notice sink |
//! | [`events`] | Subscribable change stream |
//! | [`ready`] | Readiness gate for backend access |
//! | [`config`] | Environment configuration |
//! | [`error`] | Error taxonomy and codes |

pub mod backend;
pub mod canvas;
pub mod config;
pub mod error;
pub mod events;
pub mod gesture;
pub mod http;
pub mod materializer;
pub mod notify;
pub mod outcome;
pub mod permission;
pub mod placement;
pub mod ready;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use backend::{BackendError, CanvasBackend, DashboardId, ItemPatch, NewItem, RemoteItem};
pub use canvas::{Canvas, CanvasBuilder, Removal};
pub use config::{ApiConfig, CanvasConfig, ConfigError};
pub use error::{CanvasError, ErrorCode};
pub use events::{CanvasEvent, EventBus};
pub use gesture::{GestureBatch, PlacementChange};
pub use http::HttpBackend;
pub use materializer::{CommitOutcome, CommitResult, CommitTicket, DeleteTicket};
pub use notify::{Notice, NoticeLevel, Notifier, TracingNotifier};
pub use outcome::BatchOutcome;
pub use permission::{PermissionContext, PermissionGuard};
pub use placement::{ItemKind, LayoutEntry, Placement};
pub use ready::ReadyGate;
pub use store::{CanvasItem, LifecycleState, LocalId, ServerId};
