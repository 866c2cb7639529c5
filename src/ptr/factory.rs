// std::make_shared / std::allocate_shared: the object lives inside its control block,
// so the pair costs a single allocation.
use allocator_api2::alloc::{ Allocator, Global };
use crate::{
    error::{ AllocResult, Error, Result },
    ptr::{
        control_block::{ EmbeddedControlBlock, RefCountBase },
        shared_ptr::SharedPtr
    }
};

pub fn make_shared<T>(value: T) -> SharedPtr<T> { allocate_shared(Global, value) }

pub fn try_make_shared<T>(value: T) -> Result<SharedPtr<T>> { try_allocate_shared(Global, value) }

/// Allocate first, then build the object with `init` straight into the block.
pub fn make_shared_with<T, F>(init: F) -> SharedPtr<T>
where F: FnOnce() -> T
{
    allocate_shared_with(Global, init)
}

pub fn allocate_shared<T, A>(alloc: A, value: T) -> SharedPtr<T>
where A: Allocator + 'static
{
    allocate_shared_with(alloc, || value)
}

/// On failure `value` is dropped before the error is returned.
pub fn try_allocate_shared<T, A>(alloc: A, value: T) -> Result<SharedPtr<T>>
where A: Allocator + 'static
{
    try_allocate_shared_with(alloc, || value)
}

pub fn allocate_shared_with<T, A, F>(alloc: A, init: F) -> SharedPtr<T>
where A: Allocator + 'static,
      F: FnOnce() -> T
{
    embed(alloc, init).unwrap_or_else(|layout| std::alloc::handle_alloc_error(layout))
}

/// `init` only runs once the block is allocated. If it panics the block is released again.
pub fn try_allocate_shared_with<T, A, F>(alloc: A, init: F) -> Result<SharedPtr<T>>
where A: Allocator + 'static,
      F: FnOnce() -> T
{
    embed(alloc, init).map_err(Error::alloc)
}

fn embed<T, A, F>(alloc: A, init: F) -> AllocResult<SharedPtr<T>>
where A: Allocator + 'static,
      F: FnOnce() -> T
{
    let block = EmbeddedControlBlock::try_new_with(alloc, init)?;
    let rep = block.cast::<RefCountBase>();
    unsafe {
        rep.as_ref().incref();
        Ok(SharedPtr::from_raw_parts(EmbeddedControlBlock::get_data_ptr(block), rep))
    }
}
