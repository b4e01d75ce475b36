//! Outcome classifier: one verdict and one notice per gesture batch.
//!
//! Per-item results of a batch are folded into a single [`BatchOutcome`] so
//! the user sees one message per gesture, never one per item. Items whose
//! request was discarded (removed mid-flight) count as neither success nor
//! failure.

#[cfg(test)]
#[path = "outcome_test.rs"]
mod tests;

use crate::error::CanvasError;
use crate::materializer::{CommitOutcome, CommitResult};
use crate::notify::{Notice, Notifier};
use crate::permission::PermissionGuard;
use crate::store::LocalId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The gesture produced no net placement change.
    Unchanged,
    AllSucceeded { succeeded: Vec<LocalId> },
    PartialFailure { succeeded: Vec<LocalId>, failed: Vec<(LocalId, CanvasError)> },
    AllFailed { failed: Vec<(LocalId, CanvasError)> },
}

impl BatchOutcome {
    #[must_use]
    pub fn succeeded(&self) -> &[LocalId] {
        match self {
            Self::AllSucceeded { succeeded } | Self::PartialFailure { succeeded, .. } => succeeded,
            Self::Unchanged | Self::AllFailed { .. } => &[],
        }
    }

    #[must_use]
    pub fn failed(&self) -> &[(LocalId, CanvasError)] {
        match self {
            Self::PartialFailure { failed, .. } | Self::AllFailed { failed } => failed,
            Self::Unchanged | Self::AllSucceeded { .. } => &[],
        }
    }

    #[must_use]
    pub fn has_permission_failure(&self) -> bool {
        self.failed()
            .iter()
            .any(|(_, err)| *err == CanvasError::Permission)
    }
}

/// Fold per-item results into a batch verdict.
#[must_use]
pub fn classify<I>(results: I) -> BatchOutcome
where
    I: IntoIterator<Item = (LocalId, CommitResult)>,
{
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for (local_id, result) in results {
        match result {
            Ok(CommitOutcome::Discarded { .. }) => {}
            Ok(_) => succeeded.push(local_id),
            Err(err) => failed.push((local_id, err)),
        }
    }

    match (succeeded.is_empty(), failed.is_empty()) {
        (true, true) => BatchOutcome::Unchanged,
        (_, true) => BatchOutcome::AllSucceeded { succeeded },
        (true, false) => BatchOutcome::AllFailed { failed },
        (false, false) => BatchOutcome::PartialFailure { succeeded, failed },
    }
}

/// The single user-facing message for a batch, if any.
#[must_use]
pub fn notice_for(outcome: &BatchOutcome) -> Option<Notice> {
    match outcome {
        BatchOutcome::Unchanged => None,
        BatchOutcome::AllSucceeded { .. } => Some(Notice::info("Success", "Layout saved successfully")),
        BatchOutcome::PartialFailure { succeeded, failed } => Some(Notice::warning(
            "Partially saved",
            format!(
                "Saved {} of {} items; {} could not be saved",
                succeeded.len(),
                succeeded.len() + failed.len(),
                failed.len()
            ),
        )),
        BatchOutcome::AllFailed { .. } => Some(Notice::error("Error", "Failed to save layout changes")),
    }
}

/// Surface a batch verdict: downgrade on any permission refusal, then emit
/// the batch notice.
pub(crate) fn report(outcome: &BatchOutcome, guard: &PermissionGuard, notifier: &dyn Notifier) {
    if outcome.has_permission_failure() {
        guard.on_denied();
    }
    if let Some(notice) = notice_for(outcome) {
        notifier.notify(notice);
    }
}
