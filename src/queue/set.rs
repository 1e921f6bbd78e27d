use crate::queue::AffinityQueue;
use crate::task::{Priority, ReadyTask};
use crossbeam_deque::{Injector, Steal, Stealer, Worker as Deque};

/// The queue ends owned by a single worker thread: one LIFO deque per
/// priority band. Pushing and popping here is the uncontended fast path.
#[derive(Debug)]
pub(crate) struct LocalQueues {
    deques: [Deque<ReadyTask>; Priority::COUNT],
}

impl LocalQueues {
    /// Pushes onto this worker's own deque at the task's band.
    pub(crate) fn push(&self, task: ReadyTask) {
        self.deques[task.priority().band()].push(task);
    }

    /// Pops the most recently pushed task at `band` (owner end, LIFO).
    pub(crate) fn pop(&self, band: usize) -> Option<ReadyTask> {
        self.deques[band].pop()
    }

    /// Batch destination for inbox steals: new work lands in our own deque.
    pub(crate) fn deque(&self, band: usize) -> &Deque<ReadyTask> {
        &self.deques[band]
    }
}

/// The queue ends published to every other thread: steal handles for the
/// deques, plus the affinity FIFOs any thread may push into.
#[derive(Debug)]
pub(crate) struct RemoteSlot {
    stealers: [Stealer<ReadyTask>; Priority::COUNT],
    fifos: [AffinityQueue; Priority::COUNT],
}

impl RemoteSlot {
    pub(crate) fn push_fifo(&self, task: ReadyTask) {
        self.fifos[task.priority().band()].push(task);
    }

    /// Owner-only: affinity FIFOs are never stolen from.
    pub(crate) fn pop_fifo(&self, band: usize) -> Option<ReadyTask> {
        self.fifos[band].pop()
    }

    /// Takes the oldest task from the victim's deque at `band`.
    pub(crate) fn steal(&self, band: usize) -> Steal<ReadyTask> {
        self.stealers[band].steal()
    }
}

/// Builds the owner and remote halves of one worker slot's queue set.
pub(crate) fn build_slot() -> (LocalQueues, RemoteSlot) {
    let deques: [Deque<ReadyTask>; Priority::COUNT] = std::array::from_fn(|_| Deque::new_lifo());
    let stealers = std::array::from_fn(|band| deques[band].stealer());
    let fifos = std::array::from_fn(|_| AffinityQueue::new());
    (LocalQueues { deques }, RemoteSlot { stealers, fifos })
}

/// Submissions from threads outside the pool, banded like everything else.
#[derive(Debug)]
pub(crate) struct Inbox {
    bands: [Injector<ReadyTask>; Priority::COUNT],
}

impl Inbox {
    pub(crate) fn new() -> Inbox {
        Inbox {
            bands: std::array::from_fn(|_| Injector::new()),
        }
    }

    pub(crate) fn push(&self, task: ReadyTask) {
        self.bands[task.priority().band()].push(task);
    }

    /// Moves a batch into `local` and returns one task, retrying through
    /// crossbeam's transient failures.
    pub(crate) fn steal_into(&self, band: usize, local: &LocalQueues) -> Option<ReadyTask> {
        loop {
            match self.bands[band].steal_batch_and_pop(local.deque(band)) {
                Steal::Success(task) => return Some(task),
                Steal::Retry => continue,
                Steal::Empty => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn ready(name: &'static str, priority: Priority) -> ReadyTask {
        let task = Task::with_name(name, |_| ());
        task.set_priority(priority);
        ReadyTask::new(task)
    }

    #[test]
    fn owner_pops_lifo_within_a_band() {
        let _serial = crate::test_utils::serial();
        let (local, _remote) = build_slot();
        local.push(ready("a", Priority::Normal));
        local.push(ready("b", Priority::Normal));

        let band = Priority::Normal.band();
        assert_eq!(local.pop(band).unwrap().raw().name(), Some("b"));
        assert_eq!(local.pop(band).unwrap().raw().name(), Some("a"));
        assert!(local.pop(band).is_none());
    }

    #[test]
    fn thieves_take_the_oldest() {
        let _serial = crate::test_utils::serial();
        let (local, remote) = build_slot();
        local.push(ready("old", Priority::High));
        local.push(ready("new", Priority::High));

        let band = Priority::High.band();
        let stolen = remote.steal(band).success().unwrap();
        assert_eq!(stolen.raw().name(), Some("old"));
        assert_eq!(local.pop(band).unwrap().raw().name(), Some("new"));
    }

    #[test]
    fn bands_are_separate() {
        let _serial = crate::test_utils::serial();
        let (local, _remote) = build_slot();
        local.push(ready("low", Priority::Low));
        local.push(ready("critical", Priority::Critical));

        assert!(local.pop(Priority::Normal.band()).is_none());
        assert_eq!(
            local
                .pop(Priority::Critical.band())
                .unwrap()
                .raw()
                .name(),
            Some("critical")
        );
        assert_eq!(local.pop(Priority::Low.band()).unwrap().raw().name(), Some("low"));
    }

    #[test]
    fn inbox_refills_the_local_deque() {
        let _serial = crate::test_utils::serial();
        let (local, _remote) = build_slot();
        let inbox = Inbox::new();
        for _ in 0..4 {
            inbox.push(ready("queued", Priority::Normal));
        }

        let band = Priority::Normal.band();
        let mut drained = 0;
        while inbox.steal_into(band, &local).is_some() {
            drained += 1;
            while local.pop(band).is_some() {
                drained += 1;
            }
        }
        assert_eq!(drained, 4);
    }
}
