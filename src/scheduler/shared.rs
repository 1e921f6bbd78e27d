//! State shared by every worker and the facade.

use crate::queue::{Inbox, RemoteSlot};
use crate::scheduler::builder::Config;
use crate::task::{Affinity, ReadyTask};
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct Shared {
    cfg: Config,

    /// Steal handles and affinity FIFOs for every slot. Padded: a slot's
    /// FIFO locks and stealer state are touched from many threads.
    slots: Box<[CachePadded<RemoteSlot>]>,

    /// Submissions from threads outside the pool.
    inbox: Inbox,

    idle: Idle,

    /// Tells every worker (and `enter`) to exit at the next loop boundary.
    interrupt_all: AtomicBool,

    /// Tells only the thread inside `enter` to return.
    interrupt_main: AtomicBool,
}

impl Shared {
    pub(crate) fn new(cfg: Config, remotes: Vec<RemoteSlot>) -> Shared {
        Shared {
            cfg,
            slots: remotes.into_iter().map(CachePadded::new).collect(),
            inbox: Inbox::new(),
            idle: Idle::new(),
            interrupt_all: AtomicBool::new(false),
            interrupt_main: AtomicBool::new(false),
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.cfg
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, index: usize) -> &RemoteSlot {
        &self.slots[index]
    }

    pub(crate) fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    pub(crate) fn idle(&self) -> &Idle {
        &self.idle
    }

    /// Routes a submission from a thread with no worker context.
    pub(crate) fn enqueue_external(&self, task: ReadyTask) {
        match task.affinity() {
            Affinity::Any => self.inbox.push(task),
            Affinity::Worker(k) => {
                let slot = k as usize % self.slot_count();
                self.slot(slot).push_fifo(task);
            }
        }
        self.idle.notify();
    }

    pub(crate) fn interrupt(&self) {
        self.interrupt_all.store(true, Ordering::Release);
        self.idle.notify();
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupt_all.load(Ordering::Acquire)
    }

    pub(crate) fn interrupt_main(&self) {
        self.interrupt_main.store(true, Ordering::Release);
        self.idle.notify();
    }

    pub(crate) fn is_main_interrupted(&self) -> bool {
        self.interrupt_main.load(Ordering::Acquire)
    }

    /// `enter` re-arms the flag on exit so a later call works again.
    pub(crate) fn clear_main_interrupt(&self) {
        self.interrupt_main.store(false, Ordering::Release);
    }
}

/// Parking support. Enqueues bump the event counter; a worker that found
/// nothing to do parks against the epoch it observed before scanning, so a
/// concurrent enqueue always either becomes visible to the scan or aborts
/// the park. The timeout bounds the small race between a parker
/// registering and a notifier checking for sleepers.
#[derive(Debug)]
pub(crate) struct Idle {
    events: AtomicUsize,
    sleepers: AtomicUsize,
    lock: Mutex<()>,
    wake: Condvar,
}

impl Idle {
    fn new() -> Idle {
        Idle {
            events: AtomicUsize::new(0),
            sleepers: AtomicUsize::new(0),
            lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    /// Snapshot to pass to [`park`]; take it before scanning the queues.
    ///
    /// [`park`]: Idle::park
    pub(crate) fn epoch(&self) -> usize {
        self.events.load(Ordering::SeqCst)
    }

    pub(crate) fn notify(&self) {
        self.events.fetch_add(1, Ordering::SeqCst);
        if self.sleepers.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.wake.notify_all();
        }
    }

    pub(crate) fn park(&self, epoch: usize, timeout: Duration) {
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        {
            let mut guard = self.lock.lock();
            if self.events.load(Ordering::SeqCst) == epoch {
                let _ = self.wake.wait_for(&mut guard, timeout);
            }
        }
        self.sleepers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn idle() -> Idle {
        Idle::new()
    }

    #[test]
    fn stale_epoch_does_not_park() {
        let idle = idle();
        let epoch = idle.epoch();
        idle.notify();
        let start = Instant::now();
        idle.park(epoch, Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn notify_wakes_a_parked_thread() {
        let idle = Arc::new(idle());
        let epoch = idle.epoch();

        let parker = {
            let idle = idle.clone();
            std::thread::spawn(move || idle.park(epoch, Duration::from_secs(5)))
        };

        // Give the parker a moment to go to sleep, then wake it.
        std::thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        idle.notify();
        parker.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
