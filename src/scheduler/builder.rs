//! Scheduler configuration.

use anyhow::{ensure, Result};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Bounded steal rounds before a worker gives up and parks.
const STEAL_RETRIES: usize = 4;

/// Upper bound on time spent parked without a wakeup signal.
const PARK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub(crate) struct ThreadNameFn(Arc<dyn Fn(usize) -> String + Send + Sync + 'static>);

impl ThreadNameFn {
    pub(crate) fn name(&self, slot: usize) -> String {
        (self.0)(slot)
    }
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

fn default_thread_name_fn() -> ThreadNameFn {
    ThreadNameFn(Arc::new(|slot| format!("weft-worker-{}", slot)))
}

/// Configures and starts the process-wide scheduler.
///
/// ```no_run
/// weft::Builder::new().worker_threads(4).start();
/// // ... create and submit tasks ...
/// weft::end();
/// ```
#[derive(Debug)]
pub struct Builder {
    worker_threads: Option<usize>,
    thread_name: ThreadNameFn,
    thread_stack_size: Option<usize>,
    steal_retries: usize,
    park_timeout: Duration,
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            worker_threads: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            steal_retries: STEAL_RETRIES,
            park_timeout: PARK_TIMEOUT,
        }
    }

    /// Number of worker threads to spawn. The calling thread is slot 0 on
    /// top of these, so the default of `available_parallelism - 1` saturates
    /// the machine once the caller sits in [`enter`].
    ///
    /// Zero is allowed: all work then runs on the calling thread inside
    /// [`enter`] or [`run_any_task`], which is handy for deterministic
    /// tests.
    ///
    /// [`enter`]: crate::enter
    /// [`run_any_task`]: crate::run_any_task
    pub fn worker_threads(mut self, count: usize) -> Builder {
        self.worker_threads = Some(count);
        self
    }

    /// Fixed name for spawned worker threads.
    pub fn thread_name(mut self, name: impl Into<String>) -> Builder {
        let name = name.into();
        self.thread_name = ThreadNameFn(Arc::new(move |_| name.clone()));
        self
    }

    /// Name generator for spawned worker threads; receives the slot index.
    /// The default yields `weft-worker-{slot}`.
    pub fn thread_name_fn<F>(mut self, f: F) -> Builder
    where
        F: Fn(usize) -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Stack size in bytes for spawned worker threads.
    pub fn thread_stack_size(mut self, bytes: usize) -> Builder {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Steal rounds a worker attempts before parking.
    ///
    /// # Panics
    ///
    /// Panics if `rounds` is zero.
    pub fn steal_retries(mut self, rounds: usize) -> Builder {
        assert!(rounds > 0, "steal_retries must be greater than 0");
        self.steal_retries = rounds;
        self
    }

    /// Upper bound on uninterrupted parking.
    pub fn park_timeout(mut self, timeout: Duration) -> Builder {
        self.park_timeout = timeout;
        self
    }

    /// Starts the scheduler, registering the calling thread as worker
    /// slot 0.
    ///
    /// # Panics
    ///
    /// Panics if a scheduler is already running or a worker thread cannot
    /// be spawned.
    #[track_caller]
    pub fn start(self) {
        if let Err(e) = self.try_start() {
            panic!("failed to start scheduler: {:?}", e);
        }
    }

    /// Fallible variant of [`start`](Builder::start).
    pub fn try_start(self) -> Result<()> {
        crate::scheduler::install(self.try_into()?)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Spawned worker threads; queue slots are `workers + 1` with slot 0
    /// being the thread that called `start`.
    pub(crate) workers: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) steal_retries: usize,
    pub(crate) park_timeout: Duration,
}

impl TryFrom<Builder> for Config {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Config> {
        let workers = match builder.worker_threads {
            Some(count) => count,
            None => thread::available_parallelism()?.get().saturating_sub(1),
        };

        ensure!(
            workers < usize::from(crate::task::AFFINITY_ANY),
            "worker count {} exceeds the affinity encoding",
            workers
        );

        Ok(Config {
            workers,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
            steal_retries: builder.steal_retries,
            park_timeout: builder.park_timeout,
        })
    }
}
