use allocator_api2::alloc::{ AllocError, Allocator };
use std::{
    alloc::Layout,
    cell::{ Cell, UnsafeCell },
    fmt::Debug,
    mem::MaybeUninit,
    ptr::NonNull,
    rc::Rc
};

/// Fixed-size buffer handed out front to back. Nothing is reused: freeing is a no-op and the
/// whole buffer goes away with the last [`StackAllocator`] sharing it.
pub struct StackStorage<const N: usize> {
    top: Cell<usize>,
    buffer: UnsafeCell<[MaybeUninit<u8>; N]>
}

impl<const N: usize> StackStorage<N> {
    fn new() -> Self {
        Self {
            top: Cell::new(0),
            buffer: UnsafeCell::new([MaybeUninit::uninit(); N])
        }
    }

    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let base = self.buffer.get() as *mut u8;
        let top = self.top.get();
        // offset from `top` to the next address aligned for `layout`
        let pad = unsafe { base.add(top) }.align_offset(layout.align());
        let start = top.checked_add(pad)?;
        let end = start.checked_add(layout.size())?;
        if end > N { return None }
        self.top.set(end);
        NonNull::new(unsafe { base.add(start) })
    }
}

/// Allocator over a [`StackStorage`] of `N` bytes. Clones share the storage.
#[derive(Clone)]
pub struct StackAllocator<const N: usize> {
    storage: Rc<StackStorage<N>>
}

impl<const N: usize> StackAllocator<N> {
    pub fn new() -> Self { Self { storage: Rc::new(StackStorage::new()) } }

    pub fn capacity(&self) -> usize { N }
    pub fn used(&self) -> usize { self.storage.top.get() }
    pub fn remaining(&self) -> usize { N - self.used() }
}

impl<const N: usize> Default for StackAllocator<N> {
    fn default() -> Self { Self::new() }
}

unsafe impl<const N: usize> Allocator for StackAllocator<N> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        match self.storage.allocate(layout) {
            Some(ptr) => Ok(NonNull::slice_from_raw_parts(ptr, layout.size())),
            None => Err(AllocError)
        }
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}
}

// allocators compare equal when they hand out memory from the same storage
impl<const N: usize> PartialEq for StackAllocator<N> {
    fn eq(&self, other: &Self) -> bool { Rc::ptr_eq(&self.storage, &other.storage) }
}

impl<const N: usize> Eq for StackAllocator<N> {}

impl<const N: usize> Debug for StackAllocator<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StackAllocator {{ used: {}, capacity: {} }}", self.used(), N)
    }
}

#[cfg(test)]
pub mod tests {
    use super::StackAllocator;
    use allocator_api2::alloc::Allocator;
    use std::{
        alloc::Layout,
        error::Error
    };
    type TestReturn = Result<(), Box<dyn Error>>;

    #[test]
    fn bump_allocation_is_aligned() -> TestReturn {
        let stack: StackAllocator<64> = StackAllocator::new();
        let a = stack.allocate(Layout::new::<u8>()).map_err(|_| "allocation failed")?;
        let b = stack.allocate(Layout::new::<u64>()).map_err(|_| "allocation failed")?;
        assert!(b.cast::<u8>().as_ptr() as usize % std::mem::align_of::<u64>() == 0,
            "Allocation should honor alignment");
        assert!(b.cast::<u8>().as_ptr() > a.cast::<u8>().as_ptr(), "Allocations should move forward");
        assert!(stack.used() <= 16 && stack.used() >= 9, "Used should be between 9 and 16 instead of {}", stack.used());
        Ok(())
    }

    #[test]
    fn exhaustion_and_sharing() -> TestReturn {
        let stack: StackAllocator<32> = StackAllocator::new();
        let clone = stack.clone();
        assert!(stack == clone, "Clones should share storage");
        assert!(stack != StackAllocator::new(), "Separate allocators should not compare equal");
        clone.allocate(Layout::from_size_align(24, 1)?).map_err(|_| "allocation failed")?;
        assert!(stack.remaining() == 8, "Remaining should be 8 instead of {}", stack.remaining());
        assert!(stack.allocate(Layout::from_size_align(16, 1)?).is_err(), "Storage should be exhausted");
        let ptr = stack.allocate(Layout::from_size_align(8, 1)?).map_err(|_| "allocation failed")?;
        unsafe { stack.deallocate(ptr.cast(), Layout::from_size_align(8, 1)?) };
        assert!(stack.remaining() == 0, "Deallocation should not give memory back");
        Ok(())
    }
}
