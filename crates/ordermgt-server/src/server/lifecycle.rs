//! Admission control and graceful shutdown for in-flight calls.
//!
//! Every call holds a [`CallGuard`] for as long as it runs (for streams, until
//! the stream task ends). [`CallTracker::shutdown`] stops admitting calls,
//! waits for the in-flight count to drain and finally cancels the shared
//! [`CancellationToken`], which aborts any stream still running.

use core::time::Duration;
use ordermgt_core::Error;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

pub struct CallTracker {
    accepting: AtomicBool,
    inflight: AtomicUsize,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl CallTracker {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            accepting: AtomicBool::new(true),
            inflight: AtomicUsize::new(0),
            shutdown_token: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    /// Registers a new call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once shutdown has begun.
    pub fn admit(self: &Arc<Self>) -> Result<CallGuard, Error> {
        // Count first so a concurrent shutdown either sees this call or
        // this call sees the shutdown.
        self.inflight.fetch_add(1, Ordering::AcqRel);
        let guard = CallGuard {
            tracker: Arc::clone(self),
        };
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Error::ServiceShutdown);
        }
        Ok(guard)
    }

    /// Token cancelled when in-flight calls must stop.
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.child_token()
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Gracefully stops the service.
    ///
    /// - Refuses new calls.
    /// - Waits up to the configured timeout for in-flight calls to finish.
    /// - Cancels whatever is still running.
    pub async fn shutdown(&self) {
        // === Phase 0: Stop accepting new calls ===
        tracing::info!("Refusing new calls");
        self.accepting.store(false, Ordering::Release);

        // === Phase 1: Wait for in-flight calls to drain ===
        tracing::info!("Draining in-flight calls ({} active)", self.inflight());
        let drain_result = timeout(self.shutdown_timeout, async {
            while self.inflight() > 0 {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => tracing::debug!("All in-flight calls drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} calls still active)",
                self.inflight()
            ),
        }

        // === Phase 2: Cancel any remaining work ===
        tracing::debug!("Cancelling remaining streams via shutdown token");
        self.shutdown_token.cancel();
    }
}

/// Keeps a call counted as in flight until dropped.
pub struct CallGuard {
    tracker: Arc<CallTracker>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.tracker.inflight.fetch_sub(1, Ordering::AcqRel);
    }
}
