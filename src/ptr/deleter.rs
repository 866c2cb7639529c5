use allocator_api2::{
    alloc::Allocator,
    boxed::Box as AllocBox
};
use std::ptr::NonNull;

/// Policy used by a control block to destroy the object it manages.
///
/// Any `FnMut(NonNull<T>)` closure is a deleter, which covers arrays, foreign resources
/// and objects freed through pools.
pub trait Deleter<T: ?Sized> {
    /// # Safety
    ///
    /// `ptr` must point to a live object this deleter knows how to release, and it is
    /// called at most once per object.
    unsafe fn delete(&mut self, ptr: NonNull<T>);
}

impl<T, F> Deleter<T> for F
where T: ?Sized,
      F: FnMut(NonNull<T>)
{
    unsafe fn delete(&mut self, ptr: NonNull<T>) { self(ptr) }
}

/// std::default_delete: the object came from `std::boxed::Box`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        drop(Box::from_raw(ptr.as_ptr()))
    }
}

/// The object came from an `allocator_api2` box allocated in `A`.
#[derive(Debug, Clone)]
pub struct AllocatorDelete<A>(pub A);

impl<T, A> Deleter<T> for AllocatorDelete<A>
where T: ?Sized,
      A: Allocator + Clone
{
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        drop(AllocBox::from_raw_in(ptr.as_ptr(), self.0.clone()))
    }
}
