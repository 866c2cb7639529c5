use allocator_api2::{
    alloc::{ Allocator, Global },
    boxed::Box as AllocBox
};
use std::{
    fmt::{ Debug, Display, Pointer },
    marker::PhantomData,
    mem::{ self, ManuallyDrop },
    ops::Deref,
    ptr::NonNull
};
use crate::{
    error::{ AllocResult, Error, Result },
    ptr::{
        control_block::{ DefaultControlBlock, RefCountBase },
        deleter::{ AllocatorDelete, DefaultDelete, Deleter },
        enable_shared::EnableSharedFromThis,
        weak_ptr::WeakPtr
    }
};

// std::shared_ptr
//
// Always owns something: where C++ would hold an empty shared_ptr, use
// Option<SharedPtr<T>> (same size thanks to the non-null pointers).
// `_ptr` is what the handle hands out, `_rep` is what it keeps alive. The two
// differ for aliasing handles made by `aliasing`, `project` and `map`.
pub struct SharedPtr<T>
where T: ?Sized
{
    _ptr: NonNull<T>,
    _rep: NonNull<RefCountBase>,
    _data: PhantomData<T>
}

impl<T> SharedPtr<T> {
    /// Box `value` and manage it with a separate control block, like
    /// `std::shared_ptr<T>(new T(...))`. Use [`make_shared`](crate::ptr::factory::make_shared)
    /// to get a single allocation instead.
    pub fn new(value: T) -> Self { Self::from_box(Box::new(value)) }

    pub fn try_new(value: T) -> Result<Self> { Self::try_from_box(Box::new(value)) }

    /// Replace the owned object with a freshly boxed `value`. The old object is released
    /// after the new block exists.
    pub fn reset(&mut self, value: T) { *self = Self::new(value) }
}

impl<T> SharedPtr<T>
where T: ?Sized
{
    pub fn from_box(value: Box<T>) -> Self {
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(value)) };
        unsafe { Self::from_raw_in(ptr, DefaultDelete, Global) }
    }

    pub fn try_from_box(value: Box<T>) -> Result<Self> {
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(value)) };
        unsafe { Self::try_from_raw_in(ptr, DefaultDelete, Global) }
    }

    /// Adopt a box allocated in `A`. The control block is allocated in the same allocator.
    pub fn from_box_in<A>(value: AllocBox<T, A>) -> Self
    where A: Allocator + Clone + 'static
    {
        let (raw, alloc) = AllocBox::into_raw_with_allocator(value);
        let ptr = unsafe { NonNull::new_unchecked(raw) };
        unsafe { Self::from_raw_in(ptr, AllocatorDelete(alloc.clone()), alloc) }
    }

    pub fn try_from_box_in<A>(value: AllocBox<T, A>) -> Result<Self>
    where A: Allocator + Clone + 'static
    {
        let (raw, alloc) = AllocBox::into_raw_with_allocator(value);
        let ptr = unsafe { NonNull::new_unchecked(raw) };
        unsafe { Self::try_from_raw_in(ptr, AllocatorDelete(alloc.clone()), alloc) }
    }

    /// Take ownership of `ptr`, destroying it with `deleter` once the last strong reference
    /// is dropped. `alloc` only holds the control block.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid until `deleter` is called on it, and must not be owned by anything
    /// else (adopting the same object twice destroys it twice).
    pub unsafe fn from_raw_in<D, A>(ptr: NonNull<T>, deleter: D, alloc: A) -> Self
    where D: Deleter<T> + 'static,
          A: Allocator + 'static
    {
        Self::adopt_raw_in(ptr, deleter, alloc)
            .unwrap_or_else(|layout| std::alloc::handle_alloc_error(layout))
    }

    /// Fallible [`from_raw_in`](Self::from_raw_in). If the control block can't be allocated,
    /// `ptr` has already been passed to `deleter` when the error comes back.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_in`](Self::from_raw_in).
    pub unsafe fn try_from_raw_in<D, A>(ptr: NonNull<T>, deleter: D, alloc: A) -> Result<Self>
    where D: Deleter<T> + 'static,
          A: Allocator + 'static
    {
        Self::adopt_raw_in(ptr, deleter, alloc).map_err(Error::alloc)
    }

    unsafe fn adopt_raw_in<D, A>(ptr: NonNull<T>, deleter: D, alloc: A) -> AllocResult<Self>
    where D: Deleter<T> + 'static,
          A: Allocator + 'static
    {
        let rep = DefaultControlBlock::try_new_in(Some(ptr), deleter, alloc)?;
        rep.as_ref().incref();
        Ok(Self::from_raw_parts(ptr, rep))
    }

    /// # Safety
    ///
    /// Same as [`from_raw_in`](Self::from_raw_in).
    pub unsafe fn reset_raw_in<D, A>(&mut self, ptr: NonNull<T>, deleter: D, alloc: A)
    where D: Deleter<T> + 'static,
          A: Allocator + 'static
    {
        *self = Self::from_raw_in(ptr, deleter, alloc)
    }

    // takes over one strong reference already counted in `_rep`
    pub(crate) unsafe fn from_raw_parts(_ptr: NonNull<T>, _rep: NonNull<RefCountBase>) -> Self {
        Self { _ptr, _rep, _data: PhantomData }
    }

    pub(crate) fn get_rep(&self) -> &RefCountBase { unsafe { self._rep.as_ref() } }
    pub(crate) fn rep_ptr(&self) -> NonNull<RefCountBase> { self._rep }

    /// Share `other`'s ownership while pointing at `ptr`, usually a member of the object
    /// `other` owns (std::shared_ptr aliasing constructor).
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for as long as `other`'s object is alive, and nothing may
    /// mutate it while shared references from this handle exist. Data borrowed by the
    /// object behind `other` must outlive the returned handle.
    pub unsafe fn aliasing<U>(other: &SharedPtr<U>, ptr: NonNull<T>) -> Self
    where U: ?Sized
    {
        other.get_rep().incref();
        Self::from_raw_parts(ptr, other._rep)
    }

    /// Turn this handle into one that points at a part of the object (or a view of it, such as
    /// `&dyn Trait`) without touching the counts.
    pub fn map<U, F>(this: Self, f: F) -> SharedPtr<U>
    where T: 'static,
          U: ?Sized,
          F: FnOnce(&T) -> &U
    {
        let ptr = NonNull::from(f(this.get()));
        let this = ManuallyDrop::new(this);
        unsafe { SharedPtr::from_raw_parts(ptr, this._rep) }
    }

    /// New strong reference to a part of the object, keeping the whole object alive.
    pub fn project<U, F>(this: &Self, f: F) -> SharedPtr<U>
    where T: 'static,
          U: ?Sized,
          F: FnOnce(&T) -> &U
    {
        Self::map(this.clone(), f)
    }

    pub fn get(&self) -> &T { unsafe { self._ptr.as_ref() } }
    pub fn as_ptr(&self) -> NonNull<T> { self._ptr }

    pub fn use_count(&self) -> usize { self.get_rep().uses() }
    pub fn weak_count(&self) -> usize { self.get_rep().weaks() }
    pub fn unique(&self) -> bool { self.use_count() == 1 }

    /// Untyped pointer to the object the control block destroys. Differs from
    /// [`as_ptr`](Self::as_ptr) for aliasing handles.
    pub fn owned_ptr(&self) -> *const u8 { unsafe { RefCountBase::get_object(self._rep) } }

    pub fn downgrade(&self) -> WeakPtr<T> { WeakPtr::from_shared(self) }

    pub fn swap(&mut self, other: &mut Self) { mem::swap(self, other) }

    /// Both handles point at the same address.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this._ptr.cast::<u8>() == other._ptr.cast::<u8>()
    }

    /// Both handles share one control block, whatever they point at.
    pub fn owner_eq<U>(this: &Self, other: &SharedPtr<U>) -> bool
    where U: ?Sized
    {
        this._rep == other._rep
    }
}

// Constructors for self-observing objects. Each one points the object's
// WeakThis at the new control block as soon as the block exists; the plain
// constructors above leave it empty.
impl<T> SharedPtr<T>
where T: EnableSharedFromThis
{
    fn enable(this: Self) -> Self {
        this.get().weak_this().install(&this);
        this
    }

    pub fn new_enabled(value: T) -> Self { Self::from_box_enabled(Box::new(value)) }

    pub fn try_new_enabled(value: T) -> Result<Self> { Self::try_from_box_enabled(Box::new(value)) }

    pub fn from_box_enabled(value: Box<T>) -> Self { Self::enable(Self::from_box(value)) }

    pub fn try_from_box_enabled(value: Box<T>) -> Result<Self> {
        Self::try_from_box(value).map(Self::enable)
    }

    pub fn from_box_in_enabled<A>(value: AllocBox<T, A>) -> Self
    where A: Allocator + Clone + 'static
    {
        Self::enable(Self::from_box_in(value))
    }

    pub fn try_from_box_in_enabled<A>(value: AllocBox<T, A>) -> Result<Self>
    where A: Allocator + Clone + 'static
    {
        Self::try_from_box_in(value).map(Self::enable)
    }

    /// # Safety
    ///
    /// Same as [`from_raw_in`](Self::from_raw_in).
    pub unsafe fn from_raw_in_enabled<D, A>(ptr: NonNull<T>, deleter: D, alloc: A) -> Self
    where D: Deleter<T> + 'static,
          A: Allocator + 'static
    {
        Self::enable(Self::from_raw_in(ptr, deleter, alloc))
    }

    /// # Safety
    ///
    /// Same as [`from_raw_in`](Self::from_raw_in).
    pub unsafe fn try_from_raw_in_enabled<D, A>(ptr: NonNull<T>, deleter: D, alloc: A) -> Result<Self>
    where D: Deleter<T> + 'static,
          A: Allocator + 'static
    {
        Self::try_from_raw_in(ptr, deleter, alloc).map(Self::enable)
    }

    pub fn reset_enabled(&mut self, value: T) { *self = Self::new_enabled(value) }

    /// # Safety
    ///
    /// Same as [`from_raw_in`](Self::from_raw_in).
    pub unsafe fn reset_raw_in_enabled<D, A>(&mut self, ptr: NonNull<T>, deleter: D, alloc: A)
    where D: Deleter<T> + 'static,
          A: Allocator + 'static
    {
        *self = Self::from_raw_in_enabled(ptr, deleter, alloc)
    }
}

impl<T> Clone for SharedPtr<T>
where T: ?Sized
{
    fn clone(&self) -> Self {
        self.get_rep().incref();
        unsafe { Self::from_raw_parts(self._ptr, self._rep) }
    }
}

impl<T> Drop for SharedPtr<T>
where T: ?Sized
{
    fn drop(&mut self) {
        unsafe { RefCountBase::decref(self._rep) }
    }
}

impl<T> Deref for SharedPtr<T>
where T: ?Sized
{
    type Target = T;
    fn deref(&self) -> &Self::Target { self.get() }
}

impl<T> AsRef<T> for SharedPtr<T>
where T: ?Sized
{
    fn as_ref(&self) -> &T { self.get() }
}

impl<T> From<Box<T>> for SharedPtr<T>
where T: ?Sized
{
    fn from(value: Box<T>) -> Self { Self::from_box(value) }
}

// std::shared_ptr<T>(const std::weak_ptr<T>&)
impl<T> TryFrom<&WeakPtr<T>> for SharedPtr<T>
where T: ?Sized
{
    type Error = Error;
    fn try_from(value: &WeakPtr<T>) -> Result<Self> {
        value.lock().ok_or(Error::Expired)
    }
}

impl<T> Debug for SharedPtr<T>
where T: Debug + ?Sized
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedPtr {{ data: {:?}, strong: {}, weak: {} }}",
            self.get(), self.use_count(), self.weak_count())
    }
}

impl<T> Display for SharedPtr<T>
where T: Display + ?Sized
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl<T> Pointer for SharedPtr<T>
where T: ?Sized
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Pointer::fmt(&self._ptr, f)
    }
}
