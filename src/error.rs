use std::alloc::Layout;

pub type Result<T> = std::result::Result<T, Error>;

// Allocation failures before a public entry point turns them into an Error or aborts
pub(crate) type AllocResult<T> = std::result::Result<T, Layout>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// `shared_from_this` was called on an object that no shared pointer owns (yet, or anymore)
    #[error("invalid self reference: object is not owned by a shared pointer")]
    InvalidSelfReference,
    /// A strong pointer was requested from a weak pointer whose object is gone
    #[error("weak pointer has expired")]
    Expired,
    #[error("memory allocation of {} bytes (align {}) failed", .layout.size(), .layout.align())]
    AllocFailed { layout: Layout }
}

impl Error {
    pub(crate) fn alloc(layout: Layout) -> Self { Self::AllocFailed { layout } }
}
