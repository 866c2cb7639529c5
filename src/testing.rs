// Drop-tracking values and logger setup shared by the unit tests
use std::{
    cell::Cell,
    fmt::Debug,
    rc::Rc
};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Counts its drops into a shared counter.
pub(crate) struct Tracked {
    pub(crate) value: i32,
    drops: Rc<Cell<usize>>
}

impl Tracked {
    pub(crate) fn new(value: i32) -> (Self, Rc<Cell<usize>>) {
        let drops = Rc::new(Cell::new(0));
        (Self::with_counter(value, drops.clone()), drops)
    }

    pub(crate) fn with_counter(value: i32, drops: Rc<Cell<usize>>) -> Self {
        Self { value, drops }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

impl Debug for Tracked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tracked({})", self.value)
    }
}
