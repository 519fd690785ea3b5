//! Graceful stop for the listener and its open connections.
//!
//! Health transitions go through `ArcSwap`; open connections are counted by
//! RAII guards, and the last guard to drop wakes any drain waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Notify};

/// Server health state.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Listener not bound yet.
    Starting,
    /// Accepting connections.
    Ready,
    /// No longer accepting; waiting for open connections to finish.
    Draining,
    /// Every connection has closed.
    Stopped,
}

/// Coordinates the stop of the accept loop and every connection task.
///
/// 1. `set_ready()` once the listener is bound
/// 2. each accepted connection holds a [`ConnectionGuard`]
/// 3. `trigger_shutdown()` moves to Draining and wakes every stop receiver
/// 4. `wait_for_drain()` waits for the last guard to drop
#[derive(Debug)]
pub struct ShutdownController {
    stop_signal: watch::Sender<bool>,
    open: Arc<AtomicU64>,
    drained: Arc<Notify>,
    health_state: Arc<ArcSwap<HealthState>>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            stop_signal: tx,
            open: Arc::new(AtomicU64::new(0)),
            drained: Arc::new(Notify::new()),
            health_state: Arc::new(ArcSwap::from_pointee(HealthState::Starting)),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Receiver flipped to `true` when the stop is triggered.
    ///
    /// Use `wait_for(|stopping| *stopping)` so a stop that happened before
    /// subscribing is still observed.
    #[must_use]
    pub fn stop_receiver(&self) -> watch::Receiver<bool> {
        self.stop_signal.subscribe()
    }

    /// Moves to `Draining` and signals every stop receiver.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        self.stop_signal.send_replace(true);
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        *self.stop_signal.borrow()
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Registers an open connection until the guard is dropped.
    #[must_use]
    pub fn connection_guard(&self) -> ConnectionGuard {
        self.open.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            open: Arc::clone(&self.open),
            drained: Arc::clone(&self.drained),
        }
    }

    #[must_use]
    pub fn open_connections(&self) -> u64 {
        self.open.load(Ordering::SeqCst)
    }

    /// Waits until no connection is open, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` if everything closed in time.
    /// On timeout returns `false` and stays `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.open.load(Ordering::SeqCst) == 0 {
                self.health_state.store(Arc::new(HealthState::Stopped));
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one connection counted as open while alive.
///
/// Dropped during unwinding too, so a panicking connection task does not
/// block the drain.
#[derive(Debug)]
pub struct ConnectionGuard {
    open: Arc<AtomicU64>,
    drained: Arc<Notify>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.open.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}
