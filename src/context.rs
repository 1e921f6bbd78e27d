//! Thread-local worker context.
//!
//! Every thread that participates in scheduling (the spawned workers, and
//! the thread that called [`start`]) carries a [`WorkerContext`] bound to
//! one queue slot. Submission, the finish protocol and `run_any_task` all
//! resolve their queue accesses through it.
//!
//! [`start`]: crate::start

use crate::queue::LocalQueues;
use crate::scheduler::Shared;
use crate::task::raw::RawTask;
use crate::task::{Affinity, Priority, ReadyTask, Task};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Option<Rc<WorkerContext>>> = const { RefCell::new(None) };
}

pub(crate) fn install(ctx: Rc<WorkerContext>) {
    CURRENT.with(|current| {
        let mut current = current.borrow_mut();
        debug_assert!(current.is_none(), "worker context already installed");
        *current = Some(ctx);
    });
}

pub(crate) fn clear() {
    CURRENT.with(|current| current.borrow_mut().take());
}

pub(crate) fn current() -> Option<Rc<WorkerContext>> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Runs `f` against this thread's context, if it has one. The borrow is
/// released before `f` runs, so re-entrant scheduling calls are fine.
pub(crate) fn with<R>(f: impl FnOnce(&WorkerContext) -> R) -> Option<R> {
    current().map(|ctx| f(&ctx))
}

#[derive(Debug)]
pub(crate) struct WorkerContext {
    slot: usize,
    queues: LocalQueues,
    shared: Arc<Shared>,
}

impl WorkerContext {
    pub(crate) fn new(slot: usize, queues: LocalQueues, shared: Arc<Shared>) -> WorkerContext {
        WorkerContext {
            slot,
            queues,
            shared,
        }
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Routes a newly-ready task. Unpinned tasks go on our own deque
    /// (depth first, stealable); pinned tasks go to the target worker's
    /// affinity FIFO, our own included.
    pub(crate) fn enqueue(&self, task: ReadyTask) {
        match task.affinity() {
            Affinity::Any => self.queues.push(task),
            Affinity::Worker(k) => {
                let slot = k as usize % self.shared.slot_count();
                self.shared.slot(slot).push_fifo(task);
            }
        }
        self.shared.idle().notify();
    }

    /// One pass of the selection policy: own affinity FIFO before own deque
    /// within each band, bands Critical to Low; then the external inbox;
    /// then stealing.
    pub(crate) fn find_task(&self) -> Option<ReadyTask> {
        self.pop_local()
            .or_else(|| self.pop_inbox())
            .or_else(|| self.steal())
    }

    fn pop_local(&self) -> Option<ReadyTask> {
        let own = self.shared.slot(self.slot);
        for band in 0..Priority::COUNT {
            if let Some(task) = own.pop_fifo(band) {
                return Some(task);
            }
            if let Some(task) = self.queues.pop(band) {
                return Some(task);
            }
        }
        None
    }

    fn pop_inbox(&self) -> Option<ReadyTask> {
        for band in 0..Priority::COUNT {
            if let Some(task) = self.shared.inbox().steal_into(band, &self.queues) {
                return Some(task);
            }
        }
        None
    }

    /// Breadth-first stealing: pick a random victim, try its deques from
    /// Critical down, rotate through the others. Affinity FIFOs are never
    /// touched. Another round only runs if a steal raced and asked for a
    /// retry.
    fn steal(&self) -> Option<ReadyTask> {
        let slots = self.shared.slot_count();
        if slots < 2 {
            return None;
        }

        for _ in 0..self.shared.config().steal_retries {
            let mut contended = false;
            let start = fastrand::usize(0..slots);

            for offset in 0..slots {
                let victim = (start + offset) % slots;
                if victim == self.slot {
                    continue;
                }
                for band in 0..Priority::COUNT {
                    match self.shared.slot(victim).steal(band) {
                        crossbeam_deque::Steal::Success(task) => {
                            log::trace!("worker {} stole from {}", self.slot, victim);
                            return Some(task);
                        }
                        crossbeam_deque::Steal::Retry => contended = true,
                        crossbeam_deque::Steal::Empty => {}
                    }
                }
            }

            if !contended {
                break;
            }
        }
        None
    }
}

/// Execution context handed to a task body while it runs.
pub struct TaskContext<'a> {
    ctx: &'a WorkerContext,
    current: RawTask,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(ctx: &'a WorkerContext, current: RawTask) -> TaskContext<'a> {
        TaskContext { ctx, current }
    }

    /// The slot index of the worker executing this body. Slot 0 is the
    /// thread that called [`start`].
    ///
    /// [`start`]: crate::start
    pub fn worker_index(&self) -> usize {
        self.ctx.slot()
    }

    /// A handle to the task currently running, for dynamic graph extension
    /// such as `ctx.current().ends(&child)`.
    pub fn current(&self) -> Task {
        Task::clone_raw(self.current)
    }

    /// Re-inserts the running set into this worker's deque so idle workers
    /// can steal the unclaimed remainder. Pinned sets stay put: only their
    /// worker may run them, so there is nothing to share.
    pub(crate) fn requeue_current_set(&self) {
        if self.current.affinity() != Affinity::Any {
            return;
        }
        let clone = Task::clone_raw(self.current);
        self.ctx.queues.push(ReadyTask::new(clone));
        self.ctx.shared.idle().notify();
    }
}

impl std::fmt::Debug for TaskContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("worker_index", &self.worker_index())
            .field("task", &self.current)
            .finish()
    }
}
