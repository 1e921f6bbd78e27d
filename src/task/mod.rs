//! Task objects: the unit of work and its dependency machinery.

mod handle;
mod priority;
pub(crate) mod raw;
pub(crate) mod state;

pub use handle::{IntoContinuation, Task, TaskSet};
pub use priority::{Affinity, Priority};

pub(crate) use handle::ReadyTask;
pub(crate) use priority::AFFINITY_ANY;

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Task: Send, Sync);
    assert_impl_all!(ReadyTask: Send);

    #[test]
    fn new_task_defaults() {
        let _serial = crate::test_utils::serial();
        let task = Task::with_name("noop", |_| ());
        assert_eq!(task.name(), Some("noop"));
        assert_eq!(task.priority(), Priority::Normal);
        assert_eq!(task.affinity(), Affinity::Any);
        assert_eq!(task.raw().to_start(), 1);
        assert_eq!(task.raw().to_end(), 1);
    }

    #[test]
    fn attribute_setters() {
        let _serial = crate::test_utils::serial();
        let task = Task::new(|_| ());
        task.set_priority(Priority::Critical);
        task.set_affinity(Affinity::Worker(3));
        assert_eq!(task.priority(), Priority::Critical);
        assert_eq!(task.affinity(), Affinity::Worker(3));
    }

    #[test]
    fn starts_raises_the_waiter_counter() {
        let _serial = crate::test_utils::serial();
        let dep = Task::new(|_| ());
        let waiter = Task::new(|_| ());
        waiter.starts(&dep);
        assert_eq!(waiter.raw().to_start(), 2);
        assert_eq!(dep.raw().to_start(), 1);
        assert_eq!(dep.raw().header().on_start.lock().len(), 1);
    }

    #[test]
    fn ends_raises_the_waiter_counter() {
        let _serial = crate::test_utils::serial();
        let dep = Task::new(|_| ());
        let waiter = Task::new(|_| ());
        waiter.ends(&dep);
        assert_eq!(waiter.raw().to_end(), 2);
        assert_eq!(dep.raw().header().on_end.lock().len(), 1);
    }

    #[test]
    fn fan_out_records_every_waiter() {
        let _serial = crate::test_utils::serial();
        let root = Task::new(|_| ());
        let leaves: Vec<_> = (0..8).map(|_| Task::new(|_| ())).collect();
        for leaf in &leaves {
            leaf.starts(&root);
        }
        assert_eq!(root.raw().header().on_start.lock().len(), 8);
        for leaf in &leaves {
            assert_eq!(leaf.raw().to_start(), 2);
        }
    }

    #[test]
    fn dropping_an_unsubmitted_graph_releases_everything() {
        let _serial = crate::test_utils::serial();
        let before = crate::alloc::outstanding_blocks();
        {
            let dep = Task::new(|_| ());
            let waiter = Task::new(|_| ());
            waiter.starts(&dep);
            // `dep` owns a reference to `waiter` through its successor
            // list; dropping both handles must still reclaim both blocks.
        }
        assert_eq!(crate::alloc::outstanding_blocks(), before);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "set_priority requires state")]
    fn setters_reject_ready_tasks() {
        // A gated task stays NEW after submission (only the guard moved),
        // so drive this one all the way to READY through a scheduler.
        crate::test_utils::with_scheduler(0, || {
            let task = Task::new(|_| ());
            task.submit();
            task.set_priority(Priority::Low);
        });
    }
}
