//! Per-instance task queues serviced by the shared worker pool.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::pool::PoolShared;

pub(crate) type Task = BoxFuture<'static, ()>;

/// Scheduling class of a [`TaskQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// At most one task in flight; tasks run strictly in push order.
    Exclusive,

    /// Tasks start in push order and may run concurrently on several
    /// workers.
    Concurrent,
}

/// An ordered queue of tasks bound to one component instance.
///
/// Handles are cheap clones of shared state; the queue stays registered
/// with its pool until [`disable`](TaskQueue::disable) is called. Pushing
/// to a disabled queue drops the task.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<QueueShared>,
}

pub(crate) struct QueueShared {
    kind: QueueKind,
    state: Mutex<QueueState>,
    idle: Notify,
    pool: Arc<PoolShared>,
}

struct QueueState {
    pending: VecDeque<Task>,
    /// Exclusive class only: one ready-signal outstanding at a time.
    scheduled: bool,
    active: usize,
    disabled: bool,
}

impl TaskQueue {
    pub(crate) fn new(kind: QueueKind, pool: Arc<PoolShared>) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                kind,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    scheduled: false,
                    active: 0,
                    disabled: false,
                }),
                idle: Notify::new(),
                pool,
            }),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.shared.kind
    }

    /// Queue a task for execution on the worker pool.
    ///
    /// Dropped silently (with a debug log) once the queue is disabled or
    /// the pool has stopped.
    pub fn push<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shared.pool.is_stopped() {
            debug!("task pushed after pool stop, dropping");
            return;
        }

        let signal = {
            let mut state = self.shared.state.lock();
            if state.disabled {
                debug!("task pushed to disabled queue, dropping");
                return;
            }
            state.pending.push_back(Box::pin(task));
            self.shared.pool.task_added();

            match self.shared.kind {
                QueueKind::Concurrent => true,
                QueueKind::Exclusive => {
                    if state.scheduled {
                        false
                    } else {
                        state.scheduled = true;
                        true
                    }
                }
            }
        };

        if signal {
            self.shared.pool.signal_ready(Arc::clone(&self.shared));
        }
    }

    /// Number of tasks waiting to run (in-flight tasks excluded).
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Disable the queue: discard pending tasks and wait for in-flight
    /// tasks to finish.
    ///
    /// Workers claim tasks under the same lock this method uses, so after
    /// `disable` returns no task body of this queue will run again.
    pub async fn disable(&self) {
        {
            let mut state = self.shared.state.lock();
            state.disabled = true;
            let dropped = state.pending.len();
            state.pending.clear();
            self.shared.pool.tasks_removed(dropped);
            if dropped > 0 {
                debug!(dropped, "discarded pending tasks on disable");
            }
        }

        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            // Register as a waiter before re-checking, so a wakeup between
            // the check and the await is not lost.
            notified.as_mut().enable();
            if self.shared.state.lock().active == 0 {
                break;
            }
            notified.await;
        }
    }
}

impl QueueShared {
    /// Run at most one task, then re-signal if this queue still owes the
    /// pool work (Exclusive class keeps its single outstanding signal
    /// alive itself).
    pub(crate) async fn run_one(self: Arc<Self>) {
        let task = {
            let mut state = self.state.lock();
            if state.disabled {
                state.scheduled = false;
                None
            } else if let Some(task) = state.pending.pop_front() {
                state.active += 1;
                Some(task)
            } else {
                state.scheduled = false;
                None
            }
        };

        let Some(task) = task else { return };
        task.await;
        self.pool.tasks_removed(1);

        let resignal = {
            let mut state = self.state.lock();
            state.active -= 1;
            if state.active == 0 {
                self.idle.notify_waiters();
            }
            match self.kind {
                QueueKind::Exclusive => {
                    if state.disabled || state.pending.is_empty() {
                        state.scheduled = false;
                        false
                    } else {
                        true
                    }
                }
                QueueKind::Concurrent => false,
            }
        };

        if resignal {
            self.pool.signal_ready(Arc::clone(&self));
        }
    }
}
