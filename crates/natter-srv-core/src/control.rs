//! Flags shared between the supervisor loop and the IP watcher
//!
//! - `running` starts true and is flipped to false exactly once, on
//!   shutdown. It is a watch channel so waiters wake immediately.
//! - `need_restart` is set by the watcher and cleared by the supervisor
//!   after a successful restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// Cloneable handle to the shared run/restart flags
#[derive(Debug, Clone)]
pub struct Control {
    inner: Arc<ControlInner>,
}

#[derive(Debug)]
struct ControlInner {
    running: watch::Sender<bool>,
    need_restart: AtomicBool,
}

impl Control {
    pub fn new() -> Self {
        let (running, _) = watch::channel(true);
        Self {
            inner: Arc::new(ControlInner {
                running,
                need_restart: AtomicBool::new(false),
            }),
        }
    }

    /// Whether shutdown has not been requested yet
    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Request shutdown. Idempotent; `running` never becomes true again.
    pub fn shutdown(&self) {
        self.inner.running.send_if_modified(|running| {
            let was_running = *running;
            *running = false;
            was_running
        });
    }

    /// Resolve once shutdown has been requested
    pub async fn stopped(&self) {
        let mut rx = self.inner.running.subscribe();
        // The sender lives as long as `self`, so this only returns on shutdown
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Sleep for `duration` unless shutdown comes first
    ///
    /// Returns `true` if the full duration elapsed while still running.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_running(),
            _ = self.stopped() => false,
        }
    }

    /// Ask the supervisor to restart the child
    pub fn request_restart(&self) {
        self.inner.need_restart.store(true, Ordering::SeqCst);
    }

    /// Whether a restart has been requested and not yet performed
    pub fn restart_requested(&self) -> bool {
        self.inner.need_restart.load(Ordering::SeqCst)
    }

    /// Clear the restart request (after a successful restart)
    pub fn clear_restart(&self) {
        self.inner.need_restart.store(false, Ordering::SeqCst);
    }
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_is_one_way() {
        let control = Control::new();
        assert!(control.is_running());
        control.shutdown();
        control.shutdown();
        assert!(!control.is_running());
    }

    #[test]
    fn restart_flag_round_trip() {
        let control = Control::new();
        let watcher_side = control.clone();
        assert!(!control.restart_requested());
        watcher_side.request_restart();
        assert!(control.restart_requested());
        control.clear_restart();
        assert!(!watcher_side.restart_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_cut_short_by_shutdown() {
        let control = Control::new();
        let sleeper = control.clone();
        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(600)).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        control.shutdown();

        assert!(!handle.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_while_running() {
        let control = Control::new();
        assert!(control.sleep(Duration::from_secs(30)).await);
    }
}
