// Control blocks shared by SharedPtr and WeakPtr. Layout follows the MSVC STL:
// a header with a vtable and the use/weak counts (std::_Ref_count_base), then the
// concrete block's payload (std::_Ref_count_resource / std::_Ref_count_obj_alloc3)
use allocator_api2::alloc::Allocator;
use log::{ error, trace };
use std::{
    alloc::Layout,
    cell::Cell,
    marker::PhantomData,
    mem::{ self, ManuallyDrop },
    ptr::{ self, NonNull }
};
use crate::{
    error::AllocResult,
    ptr::deleter::Deleter
};

/// Lifetime manager for one managed object.
///
/// The object and the block's own storage are released separately: the object when the
/// last strong reference goes away, the storage once no weak reference remains either.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` with a [`RefCountBase`] (built with
/// [`RefCountBase::new::<Self>`]) as their first field, since the erased functions
/// in the vtable cast the header pointer back to `Self`.
pub(crate) unsafe trait ControlBlock: Sized {
    /// Untyped pointer to the managed object, null if the block manages nothing.
    unsafe fn get_object(this: NonNull<Self>) -> *mut u8;
    /// Destroys the managed object. Must be called at most once.
    unsafe fn destroy_object(this: NonNull<Self>);
    /// Frees the block's memory without touching the managed object. Must be called at most once.
    unsafe fn destroy_storage(this: NonNull<Self>);
    unsafe fn destroy_all(this: NonNull<Self>) {
        Self::destroy_object(this);
        Self::destroy_storage(this);
    }
}

pub(crate) struct ControlBlockVtable {
    get_object: unsafe fn(NonNull<RefCountBase>) -> *mut u8,
    destroy_object: unsafe fn(NonNull<RefCountBase>),
    destroy_storage: unsafe fn(NonNull<RefCountBase>),
    destroy_all: unsafe fn(NonNull<RefCountBase>)
}

struct VtableFor<B>(PhantomData<B>);

impl<B: ControlBlock> VtableFor<B> {
    const VTABLE: ControlBlockVtable = ControlBlockVtable {
        get_object: Self::get_object,
        destroy_object: Self::destroy_object,
        destroy_storage: Self::destroy_storage,
        destroy_all: Self::destroy_all
    };
    unsafe fn get_object(base: NonNull<RefCountBase>) -> *mut u8 { B::get_object(base.cast()) }
    unsafe fn destroy_object(base: NonNull<RefCountBase>) { B::destroy_object(base.cast()) }
    unsafe fn destroy_storage(base: NonNull<RefCountBase>) { B::destroy_storage(base.cast()) }
    unsafe fn destroy_all(base: NonNull<RefCountBase>) { B::destroy_all(base.cast()) }
}

#[inline]
fn check_count(holds: bool, what: &str) {
    if cfg!(any(debug_assertions, feature = "checked")) && !holds {
        error!("control block invariant violated: {}", what);
        panic!("control block invariant violated: {}", what);
    }
}

#[inline]
fn increment(count: &Cell<usize>) {
    match count.get().checked_add(1) {
        Some(v) => count.set(v),
        None => {
            error!("reference count overflow, aborting");
            std::process::abort()
        }
    }
}

// std::_Ref_count_base
#[repr(C)]
pub(crate) struct RefCountBase {
    vtable: &'static ControlBlockVtable,
    uses: Cell<usize>,
    weaks: Cell<usize>
}

impl RefCountBase {
    pub(crate) fn new<B: ControlBlock>() -> Self {
        Self {
            vtable: &VtableFor::<B>::VTABLE,
            uses: Cell::new(0),
            weaks: Cell::new(0)
        }
    }

    pub(crate) fn uses(&self) -> usize { self.uses.get() }
    pub(crate) fn weaks(&self) -> usize { self.weaks.get() }

    pub(crate) fn incref(&self) { increment(&self.uses) }
    pub(crate) fn incwref(&self) { increment(&self.weaks) }

    /// Takes a strong reference unless the object is already gone. Never brings a
    /// destroyed object back.
    pub(crate) fn incref_nz(&self) -> bool {
        if self.uses.get() == 0 { return false }
        self.incref();
        true
    }

    pub(crate) unsafe fn get_object(this: NonNull<Self>) -> *mut u8 {
        let vtable = this.as_ref().vtable;
        (vtable.get_object)(this)
    }

    /// Drops one strong reference, destroying the object on the last one and the block
    /// too if no weak reference is left.
    pub(crate) unsafe fn decref(this: NonNull<Self>) {
        let base = this.as_ref();
        let vtable = base.vtable;
        let uses = base.uses.get();
        check_count(uses != 0, "strong count underflow");
        base.uses.set(uses - 1);
        if uses != 1 { return }
        if base.weaks.get() == 0 {
            trace!("{:p}: last reference released, destroying object and block", this);
            (vtable.destroy_all)(this);
        } else {
            trace!("{:p}: last strong reference released, destroying object", this);
            // the object may hold weak references to its own block (WeakThis), keep
            // the block alive until its destructor has returned
            increment(&base.weaks);
            (vtable.destroy_object)(this);
            Self::decwref(this);
        }
    }

    /// Drops one weak reference, freeing the block once both counts are zero.
    pub(crate) unsafe fn decwref(this: NonNull<Self>) {
        let base = this.as_ref();
        let vtable = base.vtable;
        let weaks = base.weaks.get();
        check_count(weaks != 0, "weak count underflow");
        base.weaks.set(weaks - 1);
        if weaks == 1 && base.uses.get() == 0 {
            trace!("{:p}: last weak reference released, destroying block", this);
            (vtable.destroy_storage)(this);
        }
    }
}

// Keeps a fresh allocation from leaking if construction unwinds before the block is written
struct DeallocGuard<'a, A: Allocator> {
    allocator: &'a A,
    ptr: NonNull<u8>,
    layout: Layout
}

impl<'a, A: Allocator> Drop for DeallocGuard<'a, A> {
    fn drop(&mut self) {
        unsafe { self.allocator.deallocate(self.ptr, self.layout) }
    }
}

// std::_Ref_count_resource_alloc
#[repr(C)]
pub(crate) struct DefaultControlBlock<T, D, A>
where T: ?Sized,
      A: Allocator
{
    base: RefCountBase,
    object: Option<NonNull<T>>,
    deleter: ManuallyDrop<D>,
    allocator: ManuallyDrop<A>
}

impl<T, D, A> DefaultControlBlock<T, D, A>
where T: ?Sized,
      D: Deleter<T>,
      A: Allocator
{
    fn get_layout() -> Layout { Layout::new::<Self>() }

    /// Allocates a block managing `object`. Both counts start at zero.
    ///
    /// If the block can't be allocated, `object` is handed to `deleter` before the
    /// failed layout is returned, so the caller never has to clean up.
    ///
    /// # Safety
    ///
    /// `object` must be valid for `deleter` to destroy exactly once.
    pub(crate) unsafe fn try_new_in(object: Option<NonNull<T>>, mut deleter: D, allocator: A)
        -> AllocResult<NonNull<RefCountBase>>
    {
        let layout = Self::get_layout();
        let block = match allocator.allocate(layout) {
            Ok(p) => p.cast::<Self>(),
            Err(_) => {
                if let Some(object) = object { Deleter::delete(&mut deleter, object) }
                return Err(layout);
            }
        };
        block.as_ptr().write(Self {
            base: RefCountBase::new::<Self>(),
            object,
            deleter: ManuallyDrop::new(deleter),
            allocator: ManuallyDrop::new(allocator)
        });
        trace!("{:p}: created default control block ({} bytes)", block, layout.size());
        Ok(block.cast())
    }
}

unsafe impl<T, D, A> ControlBlock for DefaultControlBlock<T, D, A>
where T: ?Sized,
      D: Deleter<T>,
      A: Allocator
{
    unsafe fn get_object(this: NonNull<Self>) -> *mut u8 {
        match (*this.as_ptr()).object {
            Some(p) => p.as_ptr() as *mut u8,
            None => ptr::null_mut()
        }
    }

    unsafe fn destroy_object(this: NonNull<Self>) {
        let block = this.as_ptr();
        if let Some(object) = (*block).object {
            Deleter::delete(&mut *(*block).deleter, object);
        }
    }

    unsafe fn destroy_storage(this: NonNull<Self>) {
        let block = this.as_ptr();
        ManuallyDrop::drop(&mut (*block).deleter);
        let allocator = ManuallyDrop::take(&mut (*block).allocator);
        allocator.deallocate(this.cast(), Self::get_layout());
    }
}

// std::_Ref_count_obj_alloc3
#[repr(C)]
pub(crate) struct EmbeddedControlBlock<T, A>
where A: Allocator
{
    base: RefCountBase,
    allocator: ManuallyDrop<A>,
    value: ManuallyDrop<T>
}

impl<T, A> EmbeddedControlBlock<T, A>
where A: Allocator
{
    fn get_layout() -> Layout { Layout::new::<Self>() }

    /// Allocates the combined block, then builds the value with `init`. The
    /// allocation is released again if `init` panics.
    pub(crate) fn try_new_with<F>(allocator: A, init: F) -> AllocResult<NonNull<Self>>
    where F: FnOnce() -> T
    {
        let layout = Self::get_layout();
        let block = allocator.allocate(layout)
            .map_err(|_| layout)?
            .cast::<Self>();
        let guard = DeallocGuard { allocator: &allocator, ptr: block.cast(), layout };
        let value = init();
        mem::forget(guard);
        unsafe {
            block.as_ptr().write(Self {
                base: RefCountBase::new::<Self>(),
                allocator: ManuallyDrop::new(allocator),
                value: ManuallyDrop::new(value)
            });
        }
        trace!("{:p}: created embedded control block ({} bytes)", block, layout.size());
        Ok(block)
    }

    pub(crate) fn get_data_ptr(this: NonNull<Self>) -> NonNull<T> {
        unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*this.as_ptr()).value) as *mut T) }
    }
}

unsafe impl<T, A> ControlBlock for EmbeddedControlBlock<T, A>
where A: Allocator
{
    unsafe fn get_object(this: NonNull<Self>) -> *mut u8 {
        Self::get_data_ptr(this).as_ptr() as *mut u8
    }

    unsafe fn destroy_object(this: NonNull<Self>) {
        ptr::drop_in_place(Self::get_data_ptr(this).as_ptr());
    }

    unsafe fn destroy_storage(this: NonNull<Self>) {
        let allocator = ManuallyDrop::take(&mut (*this.as_ptr()).allocator);
        allocator.deallocate(this.cast(), Self::get_layout());
    }
}
