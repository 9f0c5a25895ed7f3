//! Graceful stop for the `watch` loop.
//!
//! A background task flips the flag on Ctrl-C or SIGTERM. A cycle that is
//! already running is allowed to finish; the loop checks the flag after each
//! cycle and the pause between cycles wakes up early.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct Shutdown {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawn the signal listener.
    pub fn listen(self: &Arc<Self>) {
        let shutdown = Arc::clone(self);
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("🛑 Shutdown signal received, stopping after the current cycle");
            shutdown.trigger();
        });
    }

    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
        // notify_one keeps a permit when nobody is waiting yet
        self.notify.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Sleep for `pause` unless shutdown is requested first. Returns true on shutdown.
    pub async fn pause(&self, pause: Duration) -> bool {
        if self.is_requested() {
            return true;
        }
        tokio::select! {
            _ = self.notify.notified() => true,
            _ = tokio::time::sleep(pause) => self.is_requested(),
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_elapses_without_shutdown() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.pause(Duration::from_millis(10)).await);
        assert!(!shutdown.is_requested());
    }

    #[tokio::test]
    async fn test_request_during_cycle_is_seen_afterwards() {
        let shutdown = Shutdown::new();
        // Signal arrives while a cycle runs and nobody is waiting
        shutdown.trigger();

        assert!(shutdown.is_requested());
        assert!(shutdown.pause(Duration::from_secs(3600)).await);
    }

    #[tokio::test]
    async fn test_trigger_wakes_pause_early() {
        let shutdown = Shutdown::new();
        let waker = Arc::clone(&shutdown);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waker.trigger();
        });

        let stopped = tokio::time::timeout(Duration::from_secs(5), shutdown.pause(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert!(stopped);
    }
}
