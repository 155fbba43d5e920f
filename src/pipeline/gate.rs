//! Library readiness gate.
//!
//! Codec and transform libraries may finish loading after the pipeline is
//! constructed. Rather than polling a global on a timer, whoever loads the
//! library flips this gate; `start_run` checks it synchronously and refuses
//! with [`BulkError::LibraryNotReady`] while it is closed. Callers that would
//! rather wait can use [`ReadinessGate::wait_ready`].

use crate::error::BulkError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Readiness {
    Ready,
    NotReady(String),
}

/// Shared boolean gate with a reason for the closed state.
///
/// Cloning yields another handle to the same gate.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<Readiness>>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::ready()
    }
}

impl ReadinessGate {
    /// A gate that is already open.
    pub fn ready() -> Self {
        Self::with(Readiness::Ready)
    }

    /// A closed gate; `reason` is surfaced when a run is refused.
    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::with(Readiness::NotReady(reason.into()))
    }

    fn with(initial: Readiness) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_ready(&self) {
        debug!("Readiness gate opened");
        self.tx.send_replace(Readiness::Ready);
    }

    pub fn set_not_ready(&self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("Readiness gate closed: {}", reason);
        self.tx.send_replace(Readiness::NotReady(reason));
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow() == Readiness::Ready
    }

    /// `Ok(())` when open, otherwise the refusal a run would get.
    pub fn check(&self) -> Result<(), BulkError> {
        match &*self.tx.borrow() {
            Readiness::Ready => Ok(()),
            Readiness::NotReady(reason) => Err(BulkError::LibraryNotReady {
                reason: reason.clone(),
            }),
        }
    }

    /// Wait until the gate opens, up to `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), BulkError> {
        let mut rx = self.tx.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|r| *r == Readiness::Ready)).await;
        match waited {
            Ok(Ok(_)) => Ok(()),
            // The sender lives as long as `self`, so the channel cannot close
            // while we hold it; treat it like a timeout regardless.
            Ok(Err(_)) | Err(_) => self.check(),
        }
    }
}
