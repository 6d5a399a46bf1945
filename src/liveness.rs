//! Heartbeat-based liveness monitoring.
//!
//! A [`LivenessMonitor`] watches one peer, keyed by an identifier the peer
//! chose. The peer refreshes the monitor with [`heartbeat`]; a watchdog
//! task fires the registered broken callback exactly once if no heartbeat
//! arrives within the configured timeout. The watchdog runs on its own
//! runtime timer task, independent of the shared worker pool, so component
//! workload can never starve liveness checks.
//!
//! [`heartbeat`]: LivenessMonitor::heartbeat

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::LivenessConfig;

type BrokenCallback = Box<dyn FnOnce() + Send + 'static>;

/// Cheap-to-clone handle to one liveness channel.
#[derive(Clone)]
pub struct LivenessMonitor {
    inner: Arc<LivenessInner>,
}

struct LivenessInner {
    id: String,
    heartbeat_timeout: Duration,
    check_interval: Duration,
    last_beat: Mutex<Instant>,
    broken: AtomicBool,
    on_broken: Mutex<Option<BrokenCallback>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl LivenessMonitor {
    pub fn new(id: impl Into<String>, settings: &LivenessConfig) -> Self {
        Self {
            inner: Arc::new(LivenessInner {
                id: id.into(),
                heartbeat_timeout: settings.heartbeat_timeout(),
                check_interval: settings.check_interval(),
                last_beat: Mutex::new(Instant::now()),
                broken: AtomicBool::new(false),
                on_broken: Mutex::new(None),
                watchdog: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Register the callback fired once when the peer is judged
    /// unreachable, replacing any previous one.
    pub fn on_broken<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.inner.on_broken.lock() = Some(Box::new(callback));
    }

    /// Refresh the channel; resets the timeout window.
    pub fn heartbeat(&self) {
        *self.inner.last_beat.lock() = Instant::now();
    }

    /// True once the watchdog has judged the peer unreachable.
    pub fn is_broken(&self) -> bool {
        self.inner.broken.load(Ordering::SeqCst)
    }

    /// Start the watchdog. Idempotent; the timeout window restarts from
    /// now. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut watchdog = self.inner.watchdog.lock();
        if watchdog.is_some() {
            return;
        }

        *self.inner.last_beat.lock() = Instant::now();
        let inner = Arc::clone(&self.inner);
        debug!(id = %inner.id, "liveness watchdog started");

        *watchdog = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.check_interval);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                let elapsed = inner.last_beat.lock().elapsed();
                if elapsed >= inner.heartbeat_timeout {
                    inner.broken.store(true, Ordering::SeqCst);
                    if let Some(callback) = inner.on_broken.lock().take() {
                        warn!(id = %inner.id, elapsed_ms = elapsed.as_millis() as u64,
                            "liveness peer unreachable");
                        callback();
                    }
                    break;
                }
            }
        }));
    }

    /// Stop the watchdog without firing the callback. Safe to call whether
    /// or not the monitor was started.
    pub fn stop(&self) {
        // Clearing the callback under the same lock the watchdog takes it
        // from keeps a concurrently-expiring watchdog from firing.
        self.inner.on_broken.lock().take();
        if let Some(watchdog) = self.inner.watchdog.lock().take() {
            watchdog.abort();
            debug!(id = %self.inner.id, "liveness watchdog stopped");
        }
    }
}
