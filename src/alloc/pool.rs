//! Global backing pool: one slab list and free list per size class.

use crate::alloc::{BLOCK_ALIGN, SIZE_CLASSES, SLAB_BLOCKS};
use parking_lot::Mutex;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// A free block. Blocks move between thread caches and the pool.
///
/// Safety: a `Block` is an exclusive pointer to unused memory inside a slab
/// owned by the process-lifetime pool; whichever thread holds it may use it.
pub(super) struct Block(pub(super) NonNull<u8>);

unsafe impl Send for Block {}

struct Slab {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for Slab {}

impl Drop for Slab {
    // Only reachable if the pool itself is torn down, which requires every
    // block to have been returned.
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

#[derive(Default)]
struct ClassPool {
    free: Vec<Block>,
    slabs: Vec<Slab>,
}

impl ClassPool {
    /// Carves a fresh slab into blocks and appends them to the free list.
    fn grow(&mut self, block_size: usize) {
        let layout = Layout::from_size_align(block_size * SLAB_BLOCKS, BLOCK_ALIGN)
            .expect("slab layout overflow");
        let base = unsafe { std::alloc::alloc(layout) };
        let base = match NonNull::new(base) {
            Some(base) => base,
            None => std::alloc::handle_alloc_error(layout),
        };

        self.free.reserve(SLAB_BLOCKS);
        for i in 0..SLAB_BLOCKS {
            let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(i * block_size)) };
            self.free.push(Block(ptr));
        }
        self.slabs.push(Slab { ptr: base, layout });
    }
}

pub(super) struct Pool {
    classes: [Mutex<ClassPool>; SIZE_CLASSES.len()],

    /// Blocks handed out and not yet freed, across all classes.
    pub(super) live: AtomicUsize,

    /// Total blocks ever carved out of slabs. Grows monotonically; the
    /// difference to `live` is cached or pooled free capacity.
    carved: AtomicUsize,
}

static POOL: OnceLock<Pool> = OnceLock::new();

pub(super) fn global() -> &'static Pool {
    POOL.get_or_init(|| Pool {
        classes: Default::default(),
        live: AtomicUsize::new(0),
        carved: AtomicUsize::new(0),
    })
}

impl Pool {
    /// Moves up to `max` blocks of `class` into `out`, growing the pool if
    /// the free list is empty.
    pub(super) fn take_batch(&self, class: usize, max: usize, out: &mut Vec<Block>) {
        let mut pool = self.classes[class].lock();
        if pool.free.is_empty() {
            pool.grow(SIZE_CLASSES[class]);
            self.carved.fetch_add(SLAB_BLOCKS, Ordering::Relaxed);
        }
        let take = max.min(pool.free.len());
        let at = pool.free.len() - take;
        out.extend(pool.free.drain(at..));
    }

    /// Returns a batch of blocks from a thread cache.
    pub(super) fn put_batch(&self, class: usize, blocks: impl Iterator<Item = Block>) {
        let mut pool = self.classes[class].lock();
        pool.free.extend(blocks);
    }
}

/// Blocks currently allocated to live tasks. Test support for the
/// allocator-reuse guarantees.
#[cfg(test)]
pub(crate) fn outstanding_blocks() -> usize {
    global().live.load(Ordering::Relaxed)
}

/// Total pool capacity ever carved from the system allocator. Bounded by the
/// high-water mark of concurrently live tasks, not by tasks ever created.
#[cfg(test)]
pub(crate) fn carved_blocks() -> usize {
    global().carved.load(Ordering::Relaxed)
}
