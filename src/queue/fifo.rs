use crate::task::ReadyTask;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Multi-producer FIFO for tasks pinned to one worker. Any worker (or an
/// external submitter) pushes; only the owning worker pops.
#[derive(Debug, Default)]
pub(crate) struct AffinityQueue {
    items: Mutex<VecDeque<ReadyTask>>,
}

impl AffinityQueue {
    pub(crate) fn new() -> AffinityQueue {
        AffinityQueue::default()
    }

    pub(crate) fn push(&self, task: ReadyTask) {
        self.items.lock().push_back(task);
    }

    pub(crate) fn pop(&self) -> Option<ReadyTask> {
        self.items.lock().pop_front()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    #[test]
    fn fifo_order() {
        let _serial = crate::test_utils::serial();
        let queue = AffinityQueue::new();
        let first = Task::with_name("first", |_| ());
        let second = Task::with_name("second", |_| ());
        queue.push(ReadyTask::new(first));
        queue.push(ReadyTask::new(second));

        assert_eq!(queue.pop().unwrap().raw().name(), Some("first"));
        assert_eq!(queue.pop().unwrap().raw().name(), Some("second"));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn push_from_other_threads() {
        let _serial = crate::test_utils::serial();
        let queue = std::sync::Arc::new(AffinityQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || queue.push(ReadyTask::new(Task::new(|_| ()))))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 4);
        while queue.pop().is_some() {}
    }
}
