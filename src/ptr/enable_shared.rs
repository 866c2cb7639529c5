// std::enable_shared_from_this
use allocator_api2::alloc::{ Allocator, Global };
use log::trace;
use std::{
    cell::OnceCell,
    fmt::Debug
};
use crate::{
    error::{ Error, Result },
    ptr::{
        factory::{ allocate_shared_with, try_allocate_shared_with },
        shared_ptr::SharedPtr,
        weak_ptr::WeakPtr
    }
};

/// Hidden weak reference a self-observing object keeps to itself.
///
/// Starts out empty; the factory that puts the object under a [`SharedPtr`] fills it in
/// once the control block exists.
pub struct WeakThis<T> {
    weak: OnceCell<WeakPtr<T>>
}

impl<T> WeakThis<T> {
    pub const fn new() -> Self { Self { weak: OnceCell::new() } }

    // A second adoption keeps the first owner
    pub(crate) fn install(&self, this: &SharedPtr<T>) {
        if self.weak.set(this.downgrade()).is_err() {
            trace!("{:p}: self reference already installed", this);
        }
    }

    pub fn get(&self) -> Option<&WeakPtr<T>> { self.weak.get() }

    pub fn lock(&self) -> Result<SharedPtr<T>> {
        self.weak.get()
            .and_then(|w| w.lock())
            .ok_or(Error::InvalidSelfReference)
    }
}

impl<T> Default for WeakThis<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Debug for WeakThis<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.weak.get() {
            Some(w) => write!(f, "WeakThis({:?})", w),
            None => write!(f, "WeakThis(None)")
        }
    }
}

/// Lets an object owned by a [`SharedPtr`] hand out new strong references to itself.
///
/// Implementors embed a [`WeakThis`] and return it from [`weak_this`](Self::weak_this). Only
/// the `*_enabled` constructors install it, after the object has been built.
pub trait EnableSharedFromThis: Sized {
    fn weak_this(&self) -> &WeakThis<Self>;

    /// Fails with [`Error::InvalidSelfReference`] if no shared pointer owns `self`, including
    /// while the object is being destroyed.
    fn shared_from_this(&self) -> Result<SharedPtr<Self>> { self.weak_this().lock() }

    fn weak_from_this(&self) -> Option<WeakPtr<Self>> { self.weak_this().get().cloned() }
}

pub fn make_shared_enabled<T>(value: T) -> SharedPtr<T>
where T: EnableSharedFromThis
{
    allocate_shared_enabled(Global, value)
}

pub fn make_shared_with_enabled<T, F>(init: F) -> SharedPtr<T>
where T: EnableSharedFromThis,
      F: FnOnce() -> T
{
    allocate_shared_with_enabled(Global, init)
}

pub fn allocate_shared_enabled<T, A>(alloc: A, value: T) -> SharedPtr<T>
where T: EnableSharedFromThis,
      A: Allocator + 'static
{
    allocate_shared_with_enabled(alloc, || value)
}

pub fn try_allocate_shared_enabled<T, A>(alloc: A, value: T) -> Result<SharedPtr<T>>
where T: EnableSharedFromThis,
      A: Allocator + 'static
{
    try_allocate_shared_with_enabled(alloc, || value)
}

pub fn allocate_shared_with_enabled<T, A, F>(alloc: A, init: F) -> SharedPtr<T>
where T: EnableSharedFromThis,
      A: Allocator + 'static,
      F: FnOnce() -> T
{
    let this = allocate_shared_with(alloc, init);
    this.get().weak_this().install(&this);
    this
}

/// The object is built by `init` inside the block, then pointed at its own block.
pub fn try_allocate_shared_with_enabled<T, A, F>(alloc: A, init: F) -> Result<SharedPtr<T>>
where T: EnableSharedFromThis,
      A: Allocator + 'static,
      F: FnOnce() -> T
{
    let this = try_allocate_shared_with(alloc, init)?;
    this.get().weak_this().install(&this);
    Ok(this)
}

#[cfg(test)]
pub mod tests {
    use super::{
        allocate_shared_with_enabled, make_shared_enabled, make_shared_with_enabled,
        try_allocate_shared_enabled, try_allocate_shared_with_enabled, EnableSharedFromThis, WeakThis
    };
    use crate::{
        alloc::tracking::TrackingAllocator,
        error::Error as CrateError,
        ptr::{
            deleter::DefaultDelete,
            shared_ptr::SharedPtr
        },
        testing::{ self, Tracked }
    };
    use allocator_api2::boxed::Box as AllocBox;
    use std::{
        cell::{ Cell, RefCell },
        error::Error,
        ptr::NonNull,
        rc::Rc
    };
    type TestReturn = Result<(), Box<dyn Error>>;

    struct Node {
        value: i32,
        this: WeakThis<Node>,
        _tracked: Tracked
    }

    impl Node {
        fn new(value: i32) -> (Self, Rc<Cell<usize>>) {
            let drops = Rc::new(Cell::new(0));
            (Self::with_counter(value, drops.clone()), drops)
        }

        fn with_counter(value: i32, drops: Rc<Cell<usize>>) -> Self {
            Self { value, this: WeakThis::new(), _tracked: Tracked::with_counter(value, drops) }
        }
    }

    fn check_self_reference(shared: &SharedPtr<Node>, value: i32) -> TestReturn {
        let again = shared.shared_from_this()?;
        assert!(again.use_count() == 2, "Strong count should be 2 instead of {}", again.use_count());
        assert!(SharedPtr::ptr_eq(shared, &again), "Self reference should point at the object");
        assert!(again.value == value, "Value should be {} instead of {}", value, again.value);
        Ok(())
    }

    fn boxed_node(value: i32, drops: Rc<Cell<usize>>) -> NonNull<Node> {
        NonNull::from(Box::leak(Box::new(Node::with_counter(value, drops))))
    }

    impl EnableSharedFromThis for Node {
        fn weak_this(&self) -> &WeakThis<Self> { &self.this }
    }

    // tries to reach itself while being destroyed
    struct Dying {
        this: WeakThis<Dying>,
        result: Rc<RefCell<Option<bool>>>
    }

    impl EnableSharedFromThis for Dying {
        fn weak_this(&self) -> &WeakThis<Self> { &self.this }
    }

    impl Drop for Dying {
        fn drop(&mut self) {
            let ok = self.shared_from_this().is_ok();
            *self.result.borrow_mut() = Some(ok);
        }
    }

    #[test]
    fn shared_from_this_after_make_shared() -> TestReturn {
        testing::init_logger();
        let (node, drops) = Node::new(42);
        let shared = make_shared_enabled(node);
        assert!(shared.use_count() == 1, "Self reference must not count as an owner");
        let again = shared.shared_from_this()?;
        assert!(again.use_count() == 2, "Strong count should be 2 instead of {}", again.use_count());
        assert!(SharedPtr::ptr_eq(&shared, &again), "Self reference should point at the object");
        assert!(again.value == 42, "Value should be 42");
        drop(shared);
        drop(again);
        assert!(drops.get() == 1, "Node should be destroyed once instead of {} times", drops.get());
        Ok(())
    }

    #[test]
    fn shared_from_this_with_separate_block() -> TestReturn {
        let (node, drops) = Node::new(7);
        let shared = SharedPtr::new_enabled(node);
        let weak = shared.weak_from_this().ok_or("Self reference should be installed")?;
        let again = shared.shared_from_this()?;
        assert!(again.use_count() == 2, "Strong count should be 2 instead of {}", again.use_count());
        drop(shared);
        drop(again);
        assert!(weak.expired(), "Weak self reference should be expired");
        assert!(drops.get() == 1, "Node should be destroyed once");
        Ok(())
    }

    #[test]
    fn not_adopted_is_an_error() -> TestReturn {
        let (node, _drops) = Node::new(1);
        assert!(node.shared_from_this().err() == Some(CrateError::InvalidSelfReference),
            "Object without an owner should not produce a self reference");
        assert!(node.weak_from_this().is_none(), "No weak self reference before adoption");
        // a plain constructor does not install the self reference
        let plain = SharedPtr::new(node);
        assert!(plain.shared_from_this().is_err(), "Plain SharedPtr::new should not install a self reference");
        Ok(())
    }

    #[test]
    fn self_reference_fails_during_destruction() -> TestReturn {
        // embedded block, boxed in Global, boxed in the tracked allocator, raw with a tracked block
        for case in 0..4 {
            let alloc = TrackingAllocator::new();
            let result = Rc::new(RefCell::new(None));
            let dying = Dying { this: WeakThis::new(), result: result.clone() };
            let (shared, tracked) = match case {
                0 => (try_allocate_shared_enabled(alloc.clone(), dying)?, 1),
                1 => (SharedPtr::new_enabled(dying), 0),
                2 => (SharedPtr::try_from_box_in_enabled(AllocBox::new_in(dying, alloc.clone()))?, 2),
                _ => {
                    let raw = NonNull::from(Box::leak(Box::new(dying)));
                    (unsafe { SharedPtr::try_from_raw_in_enabled(raw, DefaultDelete, alloc.clone())? }, 1)
                }
            };
            assert!(shared.weak_count() == 1, "Case {}: self reference should be installed", case);
            drop(shared);
            assert!(*result.borrow() == Some(false), "Case {}: dying object must not resurrect itself", case);
            assert!(alloc.stats().allocations() == tracked && alloc.stats().deallocations() == tracked,
                "Case {}: {} allocations should be freed exactly once, got {} allocations and {} frees",
                case, tracked, alloc.stats().allocations(), alloc.stats().deallocations());
        }
        Ok(())
    }

    #[test]
    fn self_reference_from_allocator_box() -> TestReturn {
        let alloc = TrackingAllocator::new();
        let (node, drops) = Node::new(11);
        let shared = SharedPtr::from_box_in_enabled(AllocBox::new_in(node, alloc.clone()));
        check_self_reference(&shared, 11)?;
        drop(shared);
        assert!(drops.get() == 1, "Node should be destroyed once instead of {} times", drops.get());
        assert!(alloc.stats().allocations() == 2 && alloc.stats().deallocations() == 2,
            "Box and control block should both be freed exactly once");
        Ok(())
    }

    #[test]
    fn self_reference_with_custom_deleter() -> TestReturn {
        for fallible in [false, true] {
            let alloc = TrackingAllocator::new();
            let drops = Rc::new(Cell::new(0));
            let deleted = Rc::new(Cell::new(0));
            let counter = deleted.clone();
            let deleter = move |p: NonNull<Node>| {
                counter.set(counter.get() + 1);
                drop(unsafe { Box::from_raw(p.as_ptr()) });
            };
            let raw = boxed_node(21, drops.clone());
            let shared = match fallible {
                true => unsafe { SharedPtr::try_from_raw_in_enabled(raw, deleter, alloc.clone())? },
                false => unsafe { SharedPtr::from_raw_in_enabled(raw, deleter, alloc.clone()) }
            };
            check_self_reference(&shared, 21)?;
            drop(shared);
            assert!(deleted.get() == 1, "Custom deleter should run once instead of {} times", deleted.get());
            assert!(drops.get() == 1, "Node should be destroyed once");
            assert!(alloc.stats().deallocations() == 1, "Control block should be freed once");
        }
        Ok(())
    }

    #[test]
    fn reset_installs_self_reference() -> TestReturn {
        let (first, first_drops) = Node::new(1);
        let (second, second_drops) = Node::new(2);
        let mut shared = make_shared_enabled(first);
        shared.reset_enabled(second);
        assert!(first_drops.get() == 1, "Old node should be released by the reset");
        check_self_reference(&shared, 2)?;

        let alloc = TrackingAllocator::new();
        let raw = boxed_node(3, second_drops.clone());
        unsafe { shared.reset_raw_in_enabled(raw, DefaultDelete, alloc.clone()) };
        assert!(second_drops.get() == 1, "Second node should be released by the raw reset");
        check_self_reference(&shared, 3)?;
        drop(shared);
        assert!(second_drops.get() == 2, "Third node should be destroyed with the last handle");
        assert!(alloc.stats().deallocations() == 1, "Control block should be freed once");

        // plain reset knows nothing about WeakThis and leaves it empty
        let mut plain = make_shared_enabled(Node::new(4).0);
        plain.reset(Node::new(5).0);
        assert!(plain.shared_from_this().err() == Some(CrateError::InvalidSelfReference),
            "Plain reset should not install a self reference");
        Ok(())
    }

    #[test]
    fn self_reference_built_inside_block() -> TestReturn {
        let drops = Rc::new(Cell::new(0));
        let counter = drops.clone();
        let shared = make_shared_with_enabled(|| Node::with_counter(31, counter));
        check_self_reference(&shared, 31)?;
        drop(shared);
        assert!(drops.get() == 1, "Node should be destroyed once");

        let alloc = TrackingAllocator::new();
        let first = allocate_shared_with_enabled(alloc.clone(), || Node::with_counter(32, drops.clone()));
        check_self_reference(&first, 32)?;
        let second = try_allocate_shared_with_enabled(alloc.clone(), || Node::with_counter(33, drops.clone()))?;
        check_self_reference(&second, 33)?;
        assert!(alloc.stats().allocations() == 2, "Each node should take a single allocation");
        drop(first);
        drop(second);
        assert!(drops.get() == 3, "Every node should be destroyed once instead of {}", drops.get());
        assert!(alloc.stats().deallocations() == 2, "Both blocks should be freed once");
        Ok(())
    }

    #[test]
    fn block_survives_self_reference_drop() -> TestReturn {
        let alloc = TrackingAllocator::new();
        let (node, drops) = Node::new(3);
        let shared = try_allocate_shared_enabled(alloc.clone(), node)?;
        assert!(shared.weak_count() == 1, "Installed self reference is a weak reference");
        drop(shared);
        assert!(drops.get() == 1, "Node should be destroyed once");
        assert!(alloc.stats().deallocations() == 1, "Block should be freed once its own weak reference is gone");
        Ok(())
    }
}
