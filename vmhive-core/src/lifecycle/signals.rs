//! Lifecycle signals
//!
//! Two one-shot [`Latch`]es (setup-complete, ready) and one shutdown
//! [`CancellationToken`]. They are observed independently: the dispatcher
//! checks setup-complete and shutdown, readiness checks wait on ready, and
//! every long-running wait selects on shutdown.

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Fires at most once and never resets
#[derive(Debug, Clone)]
pub struct Latch {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the latch. Returns true only for the call that fired it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so this cannot fail
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Wait for the latch unless `token` is cancelled first. Returns whether it fired.
    pub async fn wait_or_cancel(&self, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = self.wait() => true,
            _ = token.cancelled() => self.is_set(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LifecycleSignals {
    pub setup_complete: Latch,
    pub ready: Latch,
    pub shutdown: CancellationToken,
}

impl LifecycleSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
