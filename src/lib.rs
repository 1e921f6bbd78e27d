//! A work-stealing task scheduler for shared-memory parallelism.
//!
//! `weft` runs user-supplied work units ("tasks") on a pool of OS threads.
//! Beyond a plain thread pool, tasks can be wired into a dynamically grown
//! DAG: a task may declare that it [`starts`] after others finish, and that
//! it [`ends`] only once spawned children finish. Each task carries a
//! [`Priority`] band and an optional worker [`Affinity`].
//!
//! Scheduling is distributed: each worker owns a set of priority-banded
//! queues. Unpinned work is pushed onto the owning worker's deque and
//! executed depth first; idle workers steal the oldest entries breadth
//! first. Pinned work travels through per-worker FIFOs. A body may return
//! another task, which runs next on the same worker without touching any
//! queue (continuation passing), and may donate cycles to the scheduler
//! with [`run_any_task`] to overlap its own IO.
//!
//! ```no_run
//! weft::Builder::new().worker_threads(4).start();
//!
//! let hello = weft::Task::new(|_| println!("hello"));
//! let world = weft::Task::new(|_| {
//!     println!("world");
//!     weft::interrupt_main();
//! });
//! world.starts(&hello);
//! hello.submit();
//! world.submit();
//!
//! weft::enter(); // run until interrupt_main
//! weft::end();
//! ```
//!
//! [`starts`]: Task::starts
//! [`ends`]: Task::ends

mod alloc;
mod context;
mod queue;
mod scheduler;
pub mod task;

#[cfg(test)]
mod test_utils;

pub use context::TaskContext;
pub use scheduler::{end, enter, interrupt, interrupt_main, run_any_task, start, Builder};
pub use task::{Affinity, IntoContinuation, Priority, Task, TaskSet};
