//! Raw task blocks: header, reference counting and body dispatch.
//!
//! A task is a single fixed-size block from the task allocator holding a
//! `TaskCell<C>`: the [`Header`] (counters, links, scheduling attributes)
//! followed by a body-specific core. All shared access goes through a thin
//! [`RawTask`] pointer to the header; the concrete core type is only known
//! to the vtable functions instantiated at construction.

use crate::alloc;
use crate::context::TaskContext;
use crate::task::handle::Task;
use crate::task::state::{self, State};
use crate::task::{Affinity, IntoContinuation, Priority};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicIsize, AtomicU16, AtomicU32, AtomicU8, AtomicUsize, Ordering};

/// Tasks the finish protocol releases when this task is done. The common
/// case is a single successor; fan-out spills to the heap.
pub(crate) type Successors = SmallVec<[Task; 1]>;

/// An unclaimed-range set larger than this is re-inserted into the popping
/// worker's deque before execution, so other workers can steal sub-ranges.
const SPLIT_THRESHOLD: isize = 2;

pub(crate) struct Vtable {
    /// Executes the task's body. Plain tasks run once and may return a
    /// continuation; sets claim indices until none are left.
    pub(super) run: unsafe fn(NonNull<Header>, &TaskContext<'_>) -> RunOutcome,

    /// Drops the cell in place and returns the block to the allocator.
    pub(super) dealloc: unsafe fn(NonNull<Header>),
}

pub(crate) enum RunOutcome {
    /// The body ran to completion on this call; the finish protocol may
    /// proceed. Carries the continuation, if the body returned one.
    Finished(Option<Task>),

    /// Set only: this worker drained what it could claim, but invocations
    /// are still outstanding on other workers. Whoever completes the last
    /// index observes `Finished` instead.
    SetPending,
}

#[repr(C)]
pub(crate) struct Header {
    pub(super) vtable: &'static Vtable,

    refs: AtomicUsize,

    /// Must be zero before the task can start. Initialized to 1: the
    /// submission guard, consumed by `submit`. Each start dependency adds
    /// one more.
    to_start: AtomicU32,

    /// Must be zero before the task can finish. Initialized to 1: the self
    /// guard, consumed when the body completes. Each end dependency adds
    /// one more.
    to_end: AtomicU32,

    priority: AtomicU8,
    affinity: AtomicU16,

    /// Debug facility; also reported by `Task::name`.
    pub(super) name: Option<&'static str>,

    /// Tasks whose `to_start` this task decrements when it finishes.
    pub(super) on_start: Mutex<Successors>,

    /// Tasks whose `to_end` this task decrements when it finishes.
    pub(super) on_end: Mutex<Successors>,

    pub(super) state: State,
}

impl Header {
    fn new(vtable: &'static Vtable, name: Option<&'static str>) -> Header {
        Header {
            vtable,
            refs: AtomicUsize::new(1),
            to_start: AtomicU32::new(1),
            to_end: AtomicU32::new(1),
            priority: AtomicU8::new(Priority::default() as u8),
            affinity: AtomicU16::new(Affinity::default().to_raw()),
            name,
            on_start: Mutex::new(Successors::new()),
            on_end: Mutex::new(Successors::new()),
            state: State::new(),
        }
    }
}

#[repr(C)]
struct TaskCell<C> {
    header: Header,
    core: C,
}

/// A one-shot body. Taken out of the cell by the single worker that pops
/// the task.
struct PlainCore<F> {
    body: UnsafeCell<Option<F>>,
}

/// An N-invocation body shared by every worker that claims indices.
struct SetCore<F> {
    body: F,
    total: usize,

    /// Indices not yet claimed by any worker. Signed: concurrent claimers
    /// may briefly drive it negative before restoring.
    remaining: AtomicIsize,

    /// Invocations claimed but not yet returned from. The worker that
    /// drops this to zero runs the finish protocol.
    uncompleted: AtomicIsize,
}

/// Thin pointer to a task block. Copying does not touch the refcount; the
/// owning wrapper is [`Task`].
#[derive(Clone, Copy)]
pub(crate) struct RawTask {
    ptr: NonNull<Header>,
}

impl RawTask {
    pub(crate) fn new_plain<F, R>(name: Option<&'static str>, body: F) -> RawTask
    where
        F: FnOnce(&TaskContext<'_>) -> R + Send + 'static,
        R: IntoContinuation,
    {
        Self::allocate(TaskCell {
            header: Header::new(plain_vtable::<F, R>(), name),
            core: PlainCore {
                body: UnsafeCell::new(Some(body)),
            },
        })
    }

    pub(crate) fn new_set<F>(name: Option<&'static str>, total: usize, body: F) -> RawTask
    where
        F: Fn(&TaskContext<'_>, usize) + Send + Sync + 'static,
    {
        Self::allocate(TaskCell {
            header: Header::new(set_vtable::<F>(), name),
            core: SetCore {
                body,
                total,
                remaining: AtomicIsize::new(total as isize),
                uncompleted: AtomicIsize::new(total as isize),
            },
        })
    }

    fn allocate<C>(cell: TaskCell<C>) -> RawTask {
        let layout = Layout::new::<TaskCell<C>>();
        let ptr = alloc::alloc(layout).cast::<TaskCell<C>>();
        unsafe { ptr.as_ptr().write(cell) };
        RawTask { ptr: ptr.cast() }
    }

    pub(crate) fn header(&self) -> &Header {
        unsafe { self.ptr.as_ref() }
    }

    pub(crate) fn state(&self) -> &State {
        &self.header().state
    }

    pub(crate) fn name(&self) -> Option<&'static str> {
        self.header().name
    }

    pub(crate) fn priority(&self) -> Priority {
        Priority::from_band(self.header().priority.load(Ordering::Relaxed))
    }

    pub(crate) fn set_priority(&self, priority: Priority) {
        self.header()
            .priority
            .store(priority as u8, Ordering::Relaxed);
    }

    pub(crate) fn affinity(&self) -> Affinity {
        Affinity::from_raw(self.header().affinity.load(Ordering::Relaxed))
    }

    pub(crate) fn set_affinity(&self, affinity: Affinity) {
        self.header()
            .affinity
            .store(affinity.to_raw(), Ordering::Relaxed);
    }

    /// Safety: the caller must hold a reference.
    pub(crate) fn ref_inc(&self) {
        self.header().refs.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns true if this released the last reference; the caller must
    /// then deallocate.
    pub(crate) fn ref_dec(&self) -> bool {
        if self.header().refs.fetch_sub(1, Ordering::Release) != 1 {
            return false;
        }
        // Synchronize with every previous release before tearing down.
        std::sync::atomic::fence(Ordering::Acquire);
        true
    }

    /// Adds one pending start dependency. Relaxed suffices: edges are
    /// declared before submission, and the decrement path is AcqRel on the
    /// same atomic.
    pub(crate) fn inc_to_start(&self) {
        self.header().to_start.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_to_end(&self) {
        self.header().to_end.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements `to_start`, returning the previous value. Release orders
    /// the finishing predecessor's writes before the observer of zero;
    /// acquire makes them visible to it.
    pub(crate) fn dec_to_start(&self) -> u32 {
        let prev = self.header().to_start.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "to_start underflow");
        prev
    }

    pub(crate) fn dec_to_end(&self) -> u32 {
        let prev = self.header().to_end.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "to_end underflow");
        prev
    }

    /// Drains the start successors; called exactly once, by the finish
    /// protocol.
    pub(crate) fn take_on_start(&self) -> Successors {
        std::mem::take(&mut *self.header().on_start.lock())
    }

    pub(crate) fn take_on_end(&self) -> Successors {
        std::mem::take(&mut *self.header().on_end.lock())
    }

    #[cfg(test)]
    pub(crate) fn to_start(&self) -> u32 {
        self.header().to_start.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn to_end(&self) -> u32 {
        self.header().to_end.load(Ordering::Acquire)
    }

    /// Runs the body.
    ///
    /// Safety: the caller must have popped this task from a ready queue (or
    /// received it as a continuation), guaranteeing a plain body is entered
    /// at most once.
    pub(crate) fn run(self, ctx: &TaskContext<'_>) -> RunOutcome {
        let vtable = self.header().vtable;
        unsafe { (vtable.run)(self.ptr, ctx) }
    }

    pub(crate) fn dealloc(self) {
        let vtable = self.header().vtable;
        unsafe { (vtable.dealloc)(self.ptr) }
    }
}

impl std::fmt::Debug for RawTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawTask")
            .field("ptr", &self.ptr)
            .field("name", &self.name())
            .finish()
    }
}

fn plain_vtable<F, R>() -> &'static Vtable
where
    F: FnOnce(&TaskContext<'_>) -> R + Send + 'static,
    R: IntoContinuation,
{
    &Vtable {
        run: run_plain::<F, R>,
        dealloc: dealloc_cell::<PlainCore<F>>,
    }
}

fn set_vtable<F>() -> &'static Vtable
where
    F: Fn(&TaskContext<'_>, usize) + Send + Sync + 'static,
{
    &Vtable {
        run: run_set::<F>,
        dealloc: dealloc_cell::<SetCore<F>>,
    }
}

unsafe fn run_plain<F, R>(ptr: NonNull<Header>, ctx: &TaskContext<'_>) -> RunOutcome
where
    F: FnOnce(&TaskContext<'_>) -> R + Send + 'static,
    R: IntoContinuation,
{
    let cell = ptr.cast::<TaskCell<PlainCore<F>>>();
    let cell = cell.as_ref();

    cell.header.state.transition(state::READY, state::RUNNING);

    let body = (*cell.core.body.get()).take();
    debug_assert!(body.is_some(), "plain task body entered twice");
    match body {
        Some(body) => RunOutcome::Finished(body(ctx).into_continuation()),
        None => RunOutcome::Finished(None),
    }
}

unsafe fn run_set<F>(ptr: NonNull<Header>, ctx: &TaskContext<'_>) -> RunOutcome
where
    F: Fn(&TaskContext<'_>, usize) + Send + Sync + 'static,
{
    let cell = ptr.cast::<TaskCell<SetCore<F>>>();
    let cell = cell.as_ref();
    let core = &cell.core;

    if core.total == 0 {
        cell.header.state.transition(state::READY, state::RUNNING);
        return RunOutcome::Finished(None);
    }

    // Give thieves something to grab before we start claiming.
    if core.remaining.load(Ordering::Acquire) >= SPLIT_THRESHOLD {
        ctx.requeue_current_set();
    }

    loop {
        let prev = core.remaining.fetch_sub(1, Ordering::AcqRel);
        if prev <= 0 {
            core.remaining.fetch_add(1, Ordering::Relaxed);
            return RunOutcome::SetPending;
        }
        if prev as usize == core.total {
            cell.header.state.transition(state::READY, state::RUNNING);
        }

        let index = core.total - prev as usize;
        (core.body)(ctx, index);

        if core.uncompleted.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Every index has been claimed *and* returned.
            return RunOutcome::Finished(None);
        }
    }
}

unsafe fn dealloc_cell<C>(ptr: NonNull<Header>) {
    let cell = ptr.cast::<TaskCell<C>>();
    std::ptr::drop_in_place(cell.as_ptr());
    alloc::dealloc(ptr.cast(), Layout::new::<TaskCell<C>>());
}
