//! User-facing task handles.

use crate::context::TaskContext;
use crate::scheduler;
use crate::task::raw::RawTask;
use crate::task::state;
use crate::task::{Affinity, Priority};
use std::ops::Deref;

/// An owned, reference-counted handle to a unit of work.
///
/// A task is created in the NEW state and is inert until [`submit`] hands it
/// to the scheduler. Before submission its creator may declare dependencies
/// ([`starts`], [`ends`]) and scheduling attributes ([`set_priority`],
/// [`set_affinity`]). After submission the task belongs to the scheduler;
/// handles only observe it.
///
/// The body receives a [`TaskContext`] and may return another task, which
/// the worker executes immediately after this one without going through any
/// queue (continuation passing). A returned continuation must not have been
/// submitted and must have no unresolved start dependencies.
///
/// [`submit`]: Task::submit
/// [`starts`]: Task::starts
/// [`ends`]: Task::ends
/// [`set_priority`]: Task::set_priority
/// [`set_affinity`]: Task::set_affinity
pub struct Task {
    raw: RawTask,
}

// Safety: the header is shared state behind atomics and mutexes; body
// payloads are bounded `Send` (and `Sync` for sets) at construction.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl Task {
    /// Creates a task from a body closure.
    ///
    /// The body may return `()`, a [`Task`] or an `Option<Task>`; a returned
    /// task is run as a continuation on the same worker.
    pub fn new<F, R>(body: F) -> Task
    where
        F: FnOnce(&TaskContext<'_>) -> R + Send + 'static,
        R: IntoContinuation,
    {
        Task {
            raw: RawTask::new_plain(None, body),
        }
    }

    /// Like [`Task::new`] with a debug name attached.
    pub fn with_name<F, R>(name: &'static str, body: F) -> Task
    where
        F: FnOnce(&TaskContext<'_>) -> R + Send + 'static,
        R: IntoContinuation,
    {
        Task {
            raw: RawTask::new_plain(Some(name), body),
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        self.raw.name()
    }

    pub fn priority(&self) -> Priority {
        self.raw.priority()
    }

    /// Sets the priority band. Only permitted while the task is NEW.
    pub fn set_priority(&self, priority: Priority) {
        self.raw.state().assert_one_of(&[state::NEW], "set_priority");
        self.raw.set_priority(priority);
    }

    pub fn affinity(&self) -> Affinity {
        self.raw.affinity()
    }

    /// Pins the task to a worker slot. Only permitted while the task is NEW.
    pub fn set_affinity(&self, affinity: Affinity) {
        self.raw.state().assert_one_of(&[state::NEW], "set_affinity");
        self.raw.set_affinity(affinity);
    }

    /// Declares that this task cannot begin until `dep` has finished.
    ///
    /// Both tasks must still be NEW: this task has not been submitted, and a
    /// dependency that already started cannot have its completion awaited
    /// for a start (that is what [`ends`] is for).
    ///
    /// Any number of tasks may depend on one `dep`, and one task may depend
    /// on any number of predecessors; counters carry the multiplicity.
    ///
    /// [`ends`]: Task::ends
    pub fn starts(&self, dep: &Task) {
        self.raw.state().assert_one_of(&[state::NEW], "starts");
        dep.raw
            .state()
            .assert_one_of(&[state::NEW], "starts dependency");

        self.raw.inc_to_start();
        dep.raw.header().on_start.lock().push(self.clone());
    }

    /// Declares that this task cannot finish until `dep` has finished.
    ///
    /// Unlike [`starts`], both sides may already be RUNNING: the canonical
    /// use is a running body extending its own completion with a freshly
    /// spawned child, `ctx.current().ends(&child)`. The caller must ensure
    /// `dep` cannot finish concurrently with this call; that holds for the
    /// canonical use (an unsubmitted child, or the currently running task).
    ///
    /// [`starts`]: Task::starts
    pub fn ends(&self, dep: &Task) {
        self.raw
            .state()
            .assert_one_of(&[state::NEW, state::RUNNING], "ends");
        dep.raw
            .state()
            .assert_one_of(&[state::NEW, state::RUNNING], "ends dependency");

        self.raw.inc_to_end();
        dep.raw.header().on_end.lock().push(self.clone());
    }

    /// Hands the task to the scheduler by consuming the submission guard.
    ///
    /// If all start dependencies already resolved, the task becomes ready
    /// immediately and is enqueued; otherwise the last finishing predecessor
    /// will enqueue it. Submitting twice is a contract violation.
    pub fn submit(&self) {
        self.raw.state().assert_one_of(&[state::NEW], "submit");
        self.raw.state().mark_submitted();
        let prev = self.raw.dec_to_start();
        if prev == 1 {
            self.raw.state().transition(state::NEW, state::READY);
            scheduler::enqueue(ReadyTask::new(self.clone()));
        }
    }

    pub(crate) fn raw(&self) -> RawTask {
        self.raw
    }

    /// Adopts an existing reference (does not touch the refcount).
    pub(crate) fn from_raw(raw: RawTask) -> Task {
        Task { raw }
    }

    /// Creates a new reference.
    pub(crate) fn clone_raw(raw: RawTask) -> Task {
        raw.ref_inc();
        Task { raw }
    }
}

impl Clone for Task {
    fn clone(&self) -> Task {
        Task::clone_raw(self.raw)
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if self.raw.ref_dec() {
            self.raw.dealloc();
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name())
            .field("priority", &self.priority())
            .field("affinity", &self.affinity())
            .finish()
    }
}

/// A task whose body runs `total` times, each invocation receiving a
/// distinct index in `[0, total)`.
///
/// A set counts as finished only once every invocation has returned. Large
/// unclaimed ranges are re-inserted into the popping worker's queue so that
/// idle workers can steal sub-ranges and the set spreads across the pool.
pub struct TaskSet {
    task: Task,
}

impl TaskSet {
    pub fn new<F>(total: usize, body: F) -> TaskSet
    where
        F: Fn(&TaskContext<'_>, usize) + Send + Sync + 'static,
    {
        TaskSet {
            task: Task::from_raw(RawTask::new_set(None, total, body)),
        }
    }

    pub fn with_name<F>(total: usize, name: &'static str, body: F) -> TaskSet
    where
        F: Fn(&TaskContext<'_>, usize) + Send + Sync + 'static,
    {
        TaskSet {
            task: Task::from_raw(RawTask::new_set(Some(name), total, body)),
        }
    }
}

impl Deref for TaskSet {
    type Target = Task;

    fn deref(&self) -> &Task {
        &self.task
    }
}

impl std::fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSet").field("task", &self.task).finish()
    }
}

/// Body return values convertible into an optional continuation.
pub trait IntoContinuation {
    fn into_continuation(self) -> Option<Task>;
}

impl IntoContinuation for () {
    fn into_continuation(self) -> Option<Task> {
        None
    }
}

impl IntoContinuation for Task {
    fn into_continuation(self) -> Option<Task> {
        Some(self)
    }
}

impl IntoContinuation for Option<Task> {
    fn into_continuation(self) -> Option<Task> {
        self
    }
}

/// A task whose `to_start` reached zero, owned by a ready queue or a worker
/// about to run it.
#[derive(Debug)]
pub(crate) struct ReadyTask(Task);

impl ReadyTask {
    pub(crate) fn new(task: Task) -> ReadyTask {
        ReadyTask(task)
    }

    pub(crate) fn raw(&self) -> RawTask {
        self.0.raw()
    }

    pub(crate) fn priority(&self) -> Priority {
        self.0.priority()
    }

    pub(crate) fn affinity(&self) -> Affinity {
        self.0.affinity()
    }

    pub(crate) fn into_task(self) -> Task {
        self.0
    }
}
