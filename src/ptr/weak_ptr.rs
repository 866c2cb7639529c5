use allocator_api2::alloc::{ Allocator, Global };
use std::{
    fmt::Debug,
    ptr::NonNull
};
use crate::ptr::{
    control_block::{ DefaultControlBlock, RefCountBase },
    deleter::DefaultDelete,
    shared_ptr::SharedPtr
};

// std::weak_ptr
//
// `_ptr` remembers what the strong pointer it came from pointed at, so `lock` hands back the
// same (possibly aliased) view. It is never dereferenced here.
pub struct WeakPtr<T>
where T: ?Sized
{
    _ptr: NonNull<T>,
    _rep: NonNull<RefCountBase>
}

impl<T> WeakPtr<T> {
    /// A weak pointer observing nothing: it owns an empty control block and is always expired.
    pub fn new() -> Self { Self::new_in(Global) }

    // the empty block lives in `alloc` and is freed with the last copy
    pub(crate) fn new_in<A>(alloc: A) -> Self
    where A: Allocator + 'static
    {
        let rep = unsafe { DefaultControlBlock::<T, DefaultDelete, A>::try_new_in(None, DefaultDelete, alloc) }
            .unwrap_or_else(|layout| std::alloc::handle_alloc_error(layout));
        unsafe { rep.as_ref().incwref() };
        Self { _ptr: NonNull::dangling(), _rep: rep }
    }
}

impl<T> Default for WeakPtr<T> {
    fn default() -> Self { Self::new() }
}

impl<T> WeakPtr<T>
where T: ?Sized
{
    pub(crate) fn from_shared(shared: &SharedPtr<T>) -> Self {
        shared.get_rep().incwref();
        Self { _ptr: shared.as_ptr(), _rep: shared.rep_ptr() }
    }

    fn get_rep(&self) -> &RefCountBase { unsafe { self._rep.as_ref() } }

    pub fn use_count(&self) -> usize { self.get_rep().uses() }
    pub fn weak_count(&self) -> usize { self.get_rep().weaks() }
    pub fn expired(&self) -> bool { self.use_count() == 0 }

    /// Strong pointer to the object if it is still alive. An expired pointer gives `None`
    /// and leaves the counts alone.
    pub fn lock(&self) -> Option<SharedPtr<T>> {
        match self.get_rep().incref_nz() {
            true => Some(unsafe { SharedPtr::from_raw_parts(self._ptr, self._rep) }),
            false => None
        }
    }

    /// Stop observing the current object and observe `shared`'s instead.
    pub fn assign(&mut self, shared: &SharedPtr<T>) { *self = Self::from_shared(shared) }

    /// Reinterpret the observed pointer, e.g. to view a `WeakPtr<Square>` as a
    /// `WeakPtr<dyn Shape>`. The counts are not touched.
    ///
    /// # Safety
    ///
    /// `f` must not dereference its argument (the object may be gone), and while the object is
    /// alive the pointer it returns must be valid for shared access for as long as the object is.
    pub unsafe fn cast<U, F>(this: Self, f: F) -> WeakPtr<U>
    where U: ?Sized,
          F: FnOnce(NonNull<T>) -> NonNull<U>
    {
        let out = WeakPtr { _ptr: f(this._ptr), _rep: this._rep };
        std::mem::forget(this);
        out
    }

    pub fn owner_eq<U>(this: &Self, other: &WeakPtr<U>) -> bool
    where U: ?Sized
    {
        this._rep == other._rep
    }
}

impl<T> Clone for WeakPtr<T>
where T: ?Sized
{
    fn clone(&self) -> Self {
        self.get_rep().incwref();
        Self { _ptr: self._ptr, _rep: self._rep }
    }
}

impl<T> Drop for WeakPtr<T>
where T: ?Sized
{
    fn drop(&mut self) {
        unsafe { RefCountBase::decwref(self._rep) }
    }
}

impl<T> From<&SharedPtr<T>> for WeakPtr<T>
where T: ?Sized
{
    fn from(value: &SharedPtr<T>) -> Self { Self::from_shared(value) }
}

impl<T> Debug for WeakPtr<T>
where T: ?Sized
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WeakPtr {{ strong: {}, weak: {} }}", self.use_count(), self.weak_count())
    }
}
