//! Debug-only lifecycle tracking.
//!
//! A task moves NEW -> READY -> RUNNING -> DONE, each transition exactly
//! once. The field exists to assert the correctness of user operations
//! (`starts` and `ends` only accept tasks in specific states, setters only
//! work on NEW tasks); it compiles to nothing in release builds, where the
//! behavior of a violated contract is undefined.

#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

pub(crate) const NEW: u8 = 0;
pub(crate) const READY: u8 = 1;
pub(crate) const RUNNING: u8 = 2;
pub(crate) const DONE: u8 = 3;

#[cfg(debug_assertions)]
pub(crate) fn name(state: u8) -> &'static str {
    match state {
        NEW => "NEW",
        READY => "READY",
        RUNNING => "RUNNING",
        DONE => "DONE",
        _ => "INVALID",
    }
}

#[cfg(debug_assertions)]
#[derive(Debug)]
pub(crate) struct State {
    state: AtomicU8,
    submitted: AtomicBool,
}

#[cfg(debug_assertions)]
impl State {
    pub(crate) fn new() -> State {
        State {
            state: AtomicU8::new(NEW),
            submitted: AtomicBool::new(false),
        }
    }

    pub(crate) fn get(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// Catches double submission even while the task is still gated (the
    /// state alone stays NEW until the counter drains).
    #[track_caller]
    pub(crate) fn mark_submitted(&self) {
        assert!(
            !self.submitted.swap(true, Ordering::AcqRel),
            "task submitted twice",
        );
    }

    /// Asserts the task is in one of `allowed` before an operation `what`.
    #[track_caller]
    pub(crate) fn assert_one_of(&self, allowed: &[u8], what: &str) {
        let current = self.get();
        assert!(
            allowed.contains(&current),
            "{} requires state {:?}, task is {}",
            what,
            allowed.iter().map(|s| name(*s)).collect::<Vec<_>>(),
            name(current),
        );
    }

    /// Moves `from -> to`, asserting no other transition raced us.
    #[track_caller]
    pub(crate) fn transition(&self, from: u8, to: u8) {
        let prev = self.state.swap(to, Ordering::AcqRel);
        assert_eq!(
            prev,
            from,
            "invalid transition to {}: expected {}, was {}",
            name(to),
            name(from),
            name(prev),
        );
    }
}

#[cfg(not(debug_assertions))]
#[derive(Debug)]
pub(crate) struct State;

#[cfg(not(debug_assertions))]
impl State {
    #[inline(always)]
    pub(crate) fn new() -> State {
        State
    }

    #[inline(always)]
    pub(crate) fn assert_one_of(&self, _allowed: &[u8], _what: &str) {}

    #[inline(always)]
    pub(crate) fn mark_submitted(&self) {}

    #[inline(always)]
    pub(crate) fn transition(&self, _from: u8, _to: u8) {}
}

#[cfg(all(test, debug_assertions))]
mod tests {
    use super::*;

    #[test]
    fn walks_the_lifecycle() {
        let state = State::new();
        state.assert_one_of(&[NEW], "test");
        state.transition(NEW, READY);
        state.transition(READY, RUNNING);
        state.transition(RUNNING, DONE);
        assert_eq!(state.get(), DONE);
    }

    #[test]
    #[should_panic(expected = "invalid transition")]
    fn rejects_skipped_transition() {
        let state = State::new();
        state.transition(READY, RUNNING);
    }

    #[test]
    #[should_panic(expected = "requires state")]
    fn rejects_wrong_state() {
        let state = State::new();
        state.transition(NEW, READY);
        state.assert_one_of(&[NEW], "set_priority");
    }
}
