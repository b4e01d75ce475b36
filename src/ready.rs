//! Readiness gate for backend access.
//!
//! The engine must not call the backend before a credential exists. Rather
//! than polling for it, every network path awaits [`ReadyGate::wait`] once;
//! whoever obtains the credential calls [`ReadyGate::open`].

#[cfg(test)]
#[path = "ready_test.rs"]
mod tests;

use tokio::sync::watch;

use crate::error::CanvasError;

#[derive(Debug, Clone)]
pub struct ReadyGate {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ReadyGate {
    /// A gate that blocks until [`ReadyGate::open`] is called.
    #[must_use]
    pub fn closed() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: std::sync::Arc::new(tx), rx }
    }

    /// A gate that never blocks.
    #[must_use]
    pub fn opened() -> Self {
        let gate = Self::closed();
        gate.open();
        gate
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the gate is open. Returns immediately if it already is.
    ///
    /// # Errors
    ///
    /// Returns `Network` if every handle that could open the gate is gone.
    pub async fn wait(&self) -> Result<(), CanvasError> {
        let mut rx = self.rx.clone();
        let opened = rx.wait_for(|ready| *ready).await.map(|_| ());
        opened.map_err(|_| CanvasError::Network("session closed before backend became ready".into()))
    }
}
