//! # Worker Pool
//!
//! A fixed-size pool of worker tasks servicing every registered
//! [`TaskQueue`](crate::queue::TaskQueue).
//!
//! Queues signal readiness into one FIFO channel; each worker pulls a
//! signal and runs exactly one task from the signaled queue. Exclusive
//! queues keep a single outstanding signal alive themselves, which is what
//! serializes their tasks; concurrent queues signal once per task and fan
//! out across workers.
//!
//! `stop` drains before it halts: new pushes are refused, the pool waits
//! until every queued and in-flight task has finished, then shutdown
//! markers are queued and the workers joined. Stopping is idempotent.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::queue::{QueueKind, QueueShared, TaskQueue};

pub(crate) enum PoolSignal {
    Ready(Arc<QueueShared>),
    Shutdown,
}

/// State shared between the pool, its workers, and every queue it services.
pub(crate) struct PoolShared {
    signal_tx: mpsc::UnboundedSender<PoolSignal>,
    pending_tasks: AtomicUsize,
    idle: Notify,
    stopped: AtomicBool,
}

impl PoolShared {
    pub(crate) fn signal_ready(&self, queue: Arc<QueueShared>) {
        let _ = self.signal_tx.send(PoolSignal::Ready(queue));
    }

    pub(crate) fn task_added(&self) {
        self.pending_tasks.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn tasks_removed(&self, count: usize) {
        if count == 0 {
            return;
        }
        if self.pending_tasks.fetch_sub(count, Ordering::SeqCst) == count {
            self.idle.notify_waiters();
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Shared pool of worker tasks draining component task queues.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawn a pool with `worker_count` workers (clamped to at least one).
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let signal_rx = Arc::new(tokio::sync::Mutex::new(signal_rx));

        let shared = Arc::new(PoolShared {
            signal_tx,
            pending_tasks: AtomicUsize::new(0),
            idle: Notify::new(),
            stopped: AtomicBool::new(false),
        });

        let workers = (0..worker_count)
            .map(|index| tokio::spawn(worker_loop(index, Arc::clone(&signal_rx))))
            .collect();

        debug!(workers = worker_count, "worker pool started");

        Self {
            shared,
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Create a task queue of the given scheduling class, registered with
    /// this pool.
    pub fn queue(&self, kind: QueueKind) -> TaskQueue {
        TaskQueue::new(kind, Arc::clone(&self.shared))
    }

    /// Drain all queued and in-flight tasks, then halt and join the
    /// workers. Idempotent; tasks pushed after `stop` begins are dropped.
    pub async fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("draining worker pool");
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            // Register as a waiter before re-checking, so a wakeup between
            // the check and the await is not lost.
            notified.as_mut().enable();
            if self.shared.pending_tasks.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }

        for _ in 0..self.worker_count {
            let _ = self.shared.signal_tx.send(PoolSignal::Shutdown);
        }

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(err) = worker.await {
                if !err.is_cancelled() {
                    warn!(%err, "pool worker failed during shutdown");
                }
            }
        }

        info!(workers = self.worker_count, "worker pool stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }
}

async fn worker_loop(
    index: usize,
    signal_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<PoolSignal>>>,
) {
    loop {
        let signal = {
            let mut rx = signal_rx.lock().await;
            rx.recv().await
        };

        match signal {
            Some(PoolSignal::Ready(queue)) => queue.run_one().await,
            Some(PoolSignal::Shutdown) | None => break,
        }
    }
    debug!(worker = index, "pool worker exited");
}
