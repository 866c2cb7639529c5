//! Single-threaded `std::shared_ptr` / `std::weak_ptr` in Rust, built over a
//! polymorphic control block with pluggable deleters and allocators.
pub mod alloc {
    pub mod stack;
    pub mod tracking;
}
pub mod error;
pub mod ptr {
    pub(crate) mod control_block;
    pub mod deleter;
    pub mod enable_shared;
    pub mod factory;
    pub mod shared_ptr;
    pub mod weak_ptr;
}

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ Error, Result };
pub use ptr::{
    deleter::{ AllocatorDelete, DefaultDelete, Deleter },
    enable_shared::{
        allocate_shared_enabled, allocate_shared_with_enabled, make_shared_enabled, make_shared_with_enabled,
        EnableSharedFromThis, WeakThis
    },
    factory::{ allocate_shared, make_shared },
    shared_ptr::SharedPtr,
    weak_ptr::WeakPtr
};
