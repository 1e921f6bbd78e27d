//! Shared helpers for tests that install the process-wide scheduler or
//! inspect global allocator counters.

use crate::Builder;
use parking_lot::{Mutex, MutexGuard};

static TEST_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests that touch process-wide state (the scheduler slot, the
/// allocator counters).
pub(crate) fn serial() -> MutexGuard<'static, ()> {
    TEST_LOCK.lock()
}

/// Tears the scheduler down even when the test body panics, so later tests
/// can start a fresh cycle.
pub(crate) struct SchedulerGuard;

impl Drop for SchedulerGuard {
    fn drop(&mut self) {
        crate::end();
    }
}

/// Runs `f` against a freshly started scheduler with `workers` spawned
/// threads, serialized against every other scheduler test.
pub(crate) fn with_scheduler(workers: usize, f: impl FnOnce()) {
    let _serial = serial();
    Builder::new().worker_threads(workers).start();
    let _teardown = SchedulerGuard;
    f();
}

/// Spins until `cond` holds, panicking after a generous deadline so a
/// scheduling bug fails the test instead of hanging it.
#[track_caller]
pub(crate) fn wait_for(cond: impl Fn() -> bool) {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while !cond() {
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for condition",
        );
        std::thread::yield_now();
    }
}
