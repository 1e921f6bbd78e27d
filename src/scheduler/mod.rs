//! Process-wide scheduler: startup, shutdown, main-thread participation.

mod builder;
mod shared;
mod worker;


pub use builder::Builder;

pub(crate) use builder::Config;
pub(crate) use shared::Shared;
pub(crate) use worker::LoopKind;

use crate::context::{self, WorkerContext};
use crate::queue;
use crate::task::ReadyTask;
use anyhow::{bail, Result};
use parking_lot::{Mutex, RwLock};
use std::rc::Rc;
use std::sync::{Arc, Barrier};
use std::thread;

/// The running scheduler instance. `start` installs one, `end` tears it
/// down; a fresh cycle may follow.
static CURRENT: RwLock<Option<Arc<Scheduler>>> = RwLock::new(None);

#[derive(Debug)]
pub(crate) struct Scheduler {
    shared: Arc<Shared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

/// Starts the scheduler with default configuration, spawning
/// `available_parallelism - 1` workers and registering the calling thread
/// as worker slot 0. Must be called before any task is submitted, and at
/// most once per cycle.
///
/// # Panics
///
/// Panics if a scheduler is already running.
#[track_caller]
pub fn start() {
    Builder::new().start();
}

pub(crate) fn install(cfg: Config) -> Result<()> {
    let mut current = CURRENT.write();
    if current.is_some() {
        bail!("scheduler already running");
    }

    let slots = cfg.workers + 1;
    let mut locals = Vec::with_capacity(slots);
    let mut remotes = Vec::with_capacity(slots);
    for _ in 0..slots {
        let (local, remote) = queue::build_slot();
        locals.push(local);
        remotes.push(remote);
    }

    let shared = Arc::new(Shared::new(cfg, remotes));
    let cfg = shared.config();

    let started = Arc::new(Barrier::new(cfg.workers + 1));
    let mut locals = locals.into_iter();
    let main_queues = locals.next().expect("slot 0 queues");

    let mut threads = Vec::with_capacity(cfg.workers);
    let mut spawn_error = None;
    for (index, queues) in locals.enumerate() {
        match worker::spawn_worker(cfg, index + 1, queues, shared.clone(), started.clone()) {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                spawn_error = Some(e);
                break;
            }
        }
    }

    if let Some(e) = spawn_error {
        // Partial startup: stand in for the missing waiters (ours included)
        // so the spawned threads clear the barrier, observe the interrupt
        // and exit.
        shared.interrupt();
        for _ in threads.len()..=cfg.workers {
            started.wait();
        }
        for handle in threads {
            let _ = handle.join();
        }
        return Err(e);
    }

    context::install(Rc::new(WorkerContext::new(0, main_queues, shared.clone())));
    started.wait();

    log::debug!("scheduler started with {} worker threads", cfg.workers);
    *current = Some(Arc::new(Scheduler {
        shared,
        threads: Mutex::new(threads),
    }));
    Ok(())
}

/// Stops and joins every worker, discards still-queued tasks and uninstalls
/// the scheduler. Pending tasks that never ran are released, not executed.
/// A new [`start`] cycle may follow.
pub fn end() {
    let Some(scheduler) = CURRENT.write().take() else {
        return;
    };

    scheduler.shared.interrupt();
    let threads: Vec<_> = scheduler.threads.lock().drain(..).collect();
    for handle in threads {
        let _ = handle.join();
    }

    // Slot 0 queues (and any tasks left in them) go away with the context;
    // the inbox and FIFOs go away with the last reference to `shared`.
    context::clear();
    crate::alloc::flush_thread_cache();
    log::debug!("scheduler stopped");
}

/// Has the calling thread join the scheduling loop as worker slot 0, until
/// [`interrupt_main`] or [`interrupt`] is observed at a loop boundary.
///
/// # Panics
///
/// Panics if called from a thread that is not slot 0 (the thread that
/// called [`start`]).
#[track_caller]
pub fn enter() {
    let ctx = context::current().expect("enter() requires the thread that called start()");
    assert_eq!(ctx.slot(), 0, "enter() requires the thread that called start()");

    worker::run_loop(&ctx, LoopKind::Main);
    ctx.shared().clear_main_interrupt();
}

/// Signals every worker (and [`enter`]) to return at the next loop
/// boundary. Running bodies are not aborted; queued tasks stay queued and
/// are discarded by [`end`]. Idempotent.
pub fn interrupt() {
    if let Some(scheduler) = CURRENT.read().as_ref() {
        scheduler.shared.interrupt();
    }
}

/// Signals only the thread inside [`enter`] to return. Idempotent.
pub fn interrupt_main() {
    if let Some(scheduler) = CURRENT.read().as_ref() {
        scheduler.shared.interrupt_main();
    }
}

/// Runs at most one ready task on the calling thread; see the worker
/// documentation. Returns false on threads without a worker context.
pub fn run_any_task() -> bool {
    worker::help()
}

/// Routes a newly-ready task into the queue fabric: through this thread's
/// worker context when it has one, through the external inbox otherwise.
pub(crate) fn enqueue(task: ReadyTask) {
    let mut task = Some(task);
    let handled = context::with(|ctx| ctx.enqueue(task.take().expect("task routed twice")));
    if handled.is_none() {
        let task = task.take().expect("task routed twice");
        let current = CURRENT.read();
        match current.as_ref() {
            Some(scheduler) => scheduler.shared.enqueue_external(task),
            None => panic!("cannot submit tasks before start()"),
        }
    }
}
