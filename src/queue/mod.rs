//! Per-worker ready queues.
//!
//! Each worker slot owns four work-stealing deques (one per priority band;
//! owner end is LIFO for depth-first execution, thieves take the oldest
//! entry) and four affinity FIFOs (any thread pushes, only the owner pops).
//! A four-band global inbox receives submissions from threads that are not
//! workers. Cross-worker pushes only ever target affinity FIFOs or the
//! inbox, never another worker's deque.

mod fifo;
mod set;

pub(crate) use fifo::AffinityQueue;
pub(crate) use set::{build_slot, Inbox, LocalQueues, RemoteSlot};
