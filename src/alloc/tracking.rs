use allocator_api2::alloc::{ AllocError, Allocator, Global };
use log::trace;
use std::{
    alloc::Layout,
    cell::Cell,
    ptr::NonNull,
    rc::Rc
};

#[derive(Debug, Default)]
pub struct AllocStats {
    allocations: Cell<usize>,
    deallocations: Cell<usize>,
    live_bytes: Cell<usize>,
    // allocations still permitted, None for no limit
    remaining: Cell<Option<usize>>
}

impl AllocStats {
    pub fn allocations(&self) -> usize { self.allocations.get() }
    pub fn deallocations(&self) -> usize { self.deallocations.get() }
    pub fn live_bytes(&self) -> usize { self.live_bytes.get() }
    pub fn live_allocations(&self) -> usize { self.allocations() - self.deallocations() }
}

/// Wraps another allocator and counts what goes through it. Clones share one [`AllocStats`].
#[derive(Debug, Clone)]
pub struct TrackingAllocator<A = Global>
where A: Allocator
{
    inner: A,
    stats: Rc<AllocStats>
}

impl TrackingAllocator<Global> {
    pub fn new() -> Self { Self::new_in(Global) }

    /// Refuses every allocation after the first `limit`.
    pub fn with_limit(limit: usize) -> Self { Self::with_limit_in(Global, limit) }
}

impl Default for TrackingAllocator<Global> {
    fn default() -> Self { Self::new() }
}

impl<A> TrackingAllocator<A>
where A: Allocator
{
    pub fn new_in(inner: A) -> Self { Self { inner, stats: Rc::new(AllocStats::default()) } }

    /// Only successful allocations count towards `limit`.
    pub fn with_limit_in(inner: A, limit: usize) -> Self {
        let out = Self::new_in(inner);
        out.stats.remaining.set(Some(limit));
        out
    }

    pub fn stats(&self) -> &AllocStats { &self.stats }
}

unsafe impl<A> Allocator for TrackingAllocator<A>
where A: Allocator
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let remaining = self.stats.remaining.get();
        if remaining == Some(0) {
            trace!("refusing allocation of {} bytes", layout.size());
            return Err(AllocError);
        }
        let ptr = self.inner.allocate(layout)?;
        self.stats.remaining.set(remaining.map(|n| n - 1));
        self.stats.allocations.set(self.stats.allocations.get() + 1);
        self.stats.live_bytes.set(self.stats.live_bytes.get() + layout.size());
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.stats.deallocations.set(self.stats.deallocations.get() + 1);
        self.stats.live_bytes.set(self.stats.live_bytes.get() - layout.size());
        self.inner.deallocate(ptr, layout)
    }
}
