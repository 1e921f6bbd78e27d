//! The scheduling loop and the finish protocol.

use crate::context::{self, TaskContext, WorkerContext};
use crate::queue::LocalQueues;
use crate::scheduler::builder::Config;
use crate::scheduler::Shared;
use crate::task::raw::RunOutcome;
use crate::task::state;
use crate::task::{Affinity, ReadyTask, Task};
use anyhow::{Context as _, Result};
use std::rc::Rc;
use std::sync::{Arc, Barrier};
use std::thread;

/// Which exit conditions the loop observes. The main thread additionally
/// returns on `interrupt_main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopKind {
    Worker,
    Main,
}

pub(super) fn spawn_worker(
    cfg: &Config,
    slot: usize,
    queues: LocalQueues,
    shared: Arc<Shared>,
    started: Arc<Barrier>,
) -> Result<thread::JoinHandle<()>> {
    let mut builder = thread::Builder::new().name(cfg.thread_name.name(slot));
    if let Some(stack_size) = cfg.thread_stack_size {
        builder = builder.stack_size(stack_size);
    }

    builder
        .spawn(move || {
            let ctx = Rc::new(WorkerContext::new(slot, queues, shared));
            context::install(ctx.clone());
            started.wait();

            log::trace!("worker {} up", slot);
            run_loop(&ctx, LoopKind::Worker);
            log::trace!("worker {} down", slot);

            // Dropping the context releases any tasks still queued locally;
            // the thread-cache drop hands their blocks back to the pool.
            context::clear();
        })
        .with_context(|| format!("failed to spawn worker thread for slot {}", slot))
}

/// The scheduling loop:
///
/// 1. a continuation returned by the previous body, bypassing every queue;
/// 2. own affinity FIFOs and deque, bands Critical to Low;
/// 3. the external inbox;
/// 4. stealing from a random victim;
/// 5. park until an enqueue signals new work.
pub(crate) fn run_loop(ctx: &WorkerContext, kind: LoopKind) {
    let shared = ctx.shared().clone();
    let mut continuation: Option<ReadyTask> = None;

    loop {
        if shared.is_interrupted() {
            break;
        }
        if kind == LoopKind::Main && shared.is_main_interrupted() {
            break;
        }

        let epoch = shared.idle().epoch();
        match continuation.take().or_else(|| ctx.find_task()) {
            Some(task) => continuation = run_task(task, ctx),
            None => shared.idle().park(epoch, shared.config().park_timeout),
        }
    }
    // A continuation still in hand when interrupted is discarded with the
    // rest of the queued tasks.
}

/// Runs one ready task and applies the finish protocol. Returns the
/// continuation for the caller to execute next, if the body produced one.
pub(crate) fn run_task(ready: ReadyTask, ctx: &WorkerContext) -> Option<ReadyTask> {
    if let Affinity::Worker(pinned) = ready.affinity() {
        debug_assert_eq!(
            pinned as usize,
            ctx.slot(),
            "pinned task executed on the wrong worker",
        );
    }

    let raw = ready.raw();
    let task_ctx = TaskContext::new(ctx, raw);

    match raw.run(&task_ctx) {
        RunOutcome::Finished(continuation) => {
            finish_body(ready.into_task(), ctx);
            continuation.and_then(claim_continuation)
        }
        // Other workers still own invocations of this set; the last one
        // runs the finish protocol. Our queue reference just goes away.
        RunOutcome::SetPending => None,
    }
}

/// A returned continuation was never submitted; the worker consumes its
/// submission guard in place of `submit` and runs it without any queue
/// traffic.
fn claim_continuation(task: Task) -> Option<ReadyTask> {
    task.raw().state().assert_one_of(&[state::NEW], "continuation");
    let prev = task.raw().dec_to_start();
    debug_assert_eq!(
        prev, 1,
        "continuation returned with unresolved start dependencies",
    );
    if prev == 1 {
        task.raw().state().transition(state::NEW, state::READY);
        Some(ReadyTask::new(task))
    } else {
        // Contract violation; the remaining predecessors will enqueue it.
        None
    }
}

/// First half of the finish protocol: the body returned, consume the self
/// guard. The task stays RUNNING while `ends` children are outstanding.
pub(crate) fn finish_body(task: Task, ctx: &WorkerContext) {
    if task.raw().dec_to_end() == 1 {
        complete(task, ctx);
    }
}

/// Second half: `to_end` reached zero. Mark DONE, release successors, drop
/// the scheduler's reference.
///
/// Start successors whose counter drains to zero are enqueued on this
/// worker; end successors completing here cascade recursively (they already
/// ran their bodies and were only waiting for us).
fn complete(task: Task, ctx: &WorkerContext) {
    let raw = task.raw();
    raw.state().transition(state::RUNNING, state::DONE);

    for waiter in raw.take_on_start() {
        if waiter.raw().dec_to_start() == 1 {
            waiter
                .raw()
                .state()
                .transition(state::NEW, state::READY);
            ctx.enqueue(ReadyTask::new(waiter));
        }
    }

    for waiter in raw.take_on_end() {
        if waiter.raw().dec_to_end() == 1 {
            complete(waiter, ctx);
        }
    }
}

/// Runs at most one ready task from the calling thread's queues, returning
/// whether anything ran.
///
/// Callable from inside a task body to donate cycles, typically to overlap
/// IO latency; re-entrant, and the current task is neither popped nor
/// rescheduled. A continuation chain started by the executed task runs to
/// exhaustion here, since a continuation is never enqueued anywhere.
pub(crate) fn help() -> bool {
    context::with(|ctx| match ctx.find_task() {
        Some(task) => {
            let mut continuation = run_task(task, ctx);
            while let Some(task) = continuation.take() {
                continuation = run_task(task, ctx);
            }
            true
        }
        None => false,
    })
    .unwrap_or(false)
}
