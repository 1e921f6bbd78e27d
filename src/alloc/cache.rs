//! Per-thread free-list caches.

use crate::alloc::pool::{self, Block};
use crate::alloc::{CACHE_MAX, CACHE_REFILL, SIZE_CLASSES};
use std::cell::RefCell;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

struct ThreadCache {
    classes: [Vec<Block>; SIZE_CLASSES.len()],
}

impl ThreadCache {
    fn new() -> ThreadCache {
        ThreadCache {
            classes: Default::default(),
        }
    }
}

impl Drop for ThreadCache {
    // Thread exit: hand everything back so other threads (or a later
    // scheduler cycle) can reuse the blocks.
    fn drop(&mut self) {
        let pool = pool::global();
        for (class, free) in self.classes.iter_mut().enumerate() {
            pool.put_batch(class, free.drain(..));
        }
    }
}

thread_local! {
    static CACHE: RefCell<ThreadCache> = RefCell::new(ThreadCache::new());
}

pub(super) fn alloc(class: usize) -> NonNull<u8> {
    let block = CACHE
        .try_with(|cache| {
            let mut cache = cache.borrow_mut();
            let free = &mut cache.classes[class];
            if free.is_empty() {
                pool::global().take_batch(class, CACHE_REFILL, free);
            }
            free.pop().expect("refill produced no blocks")
        })
        .unwrap_or_else(|_| {
            // The cache was already torn down (thread-exit drop order);
            // serve straight from the pool.
            let mut one = Vec::with_capacity(1);
            pool::global().take_batch(class, 1, &mut one);
            one.pop().expect("refill produced no blocks")
        });
    pool::global().live.fetch_add(1, Ordering::Relaxed);
    block.0
}

pub(super) fn dealloc(class: usize, ptr: NonNull<u8>) {
    pool::global().live.fetch_sub(1, Ordering::Relaxed);
    let spill = CACHE.try_with(|cache| {
        let mut cache = cache.borrow_mut();
        let free = &mut cache.classes[class];
        free.push(Block(ptr));
        if free.len() > CACHE_MAX {
            let keep = CACHE_MAX / 2;
            Some(free.drain(keep..).collect::<Vec<_>>())
        } else {
            None
        }
    });
    match spill {
        Ok(Some(spill)) => pool::global().put_batch(class, spill.into_iter()),
        Ok(None) => {}
        // Cache already gone; return the block to the pool directly.
        Err(_) => pool::global().put_batch(class, std::iter::once(Block(ptr))),
    }
}

pub(super) fn flush() {
    let pool = pool::global();
    let _ = CACHE.try_with(|cache| {
        let mut cache = cache.borrow_mut();
        for (class, free) in cache.classes.iter_mut().enumerate() {
            pool.put_batch(class, free.drain(..));
        }
    });
}
