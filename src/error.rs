//! The error taxonomy (spec ch. 7).
//!
//! Allocation-path variants are recoverable and surface as `None`/null at
//! the public API edge. The corruption-class variants are fatal: they are
//! constructed, logged via [`log::error!`], and then the process aborts,
//! exactly as the original's `assert()`-is-fatal contract requires. They
//! are never downgraded to a quietly-returned `Result` just because Rust
//! has one.

use thiserror::Error;

/// The error taxonomy produced by this allocator.
#[derive(Debug, Error)]
pub enum AllocError {
    /// The page supplier returned nothing, or the requested chunk size
    /// would exceed the configured ceiling.
    #[error("out of memory: requested {requested} bytes at {site}")]
    OutOfMemory { requested: usize, site: &'static str },

    /// Freeing a chunk whose CINUSE bit is clear, whose red-zones are
    /// corrupted, or whose owning allocator's validity code is wrong.
    #[error("invalid free of {ptr:p}: {reason}")]
    InvalidFree { ptr: *const u8, reason: &'static str },

    /// Operation on a destroyed allocator (validity code mismatch).
    #[error("use of allocator {ptr:p} after deletion")]
    InvalidAllocator { ptr: *const u8 },

    /// `total_used` underflowed a freed chunk's size -- treated as memory
    /// corruption.
    #[error("budget underflow: total_used {total_used} < freed size {freed}")]
    BudgetUnderflow { total_used: usize, freed: usize },

    /// Freeing a non-power-of-two size through the buddy allocator.
    #[error("buddy misuse: {size} is not a power of two")]
    BuddyMisuse { size: usize },

    /// `mkstemp`/`ftruncate`/`mmap` failed during PMEM buddy init.
    #[error("filesystem error initializing PMEM backing: {0}")]
    FilesystemError(#[from] std::io::Error),
}

// SAFETY: the raw pointers carried by these variants are diagnostic-only;
// they are never dereferenced after capture and the allocator state they
// point into is either read-only by then (InvalidFree/InvalidAllocator
// fire right before an abort) or not touched across thread boundaries.
unsafe impl Send for AllocError {}
unsafe impl Sync for AllocError {}

impl AllocError {
    /// Corruption-class variants are unrecoverable: log and abort the
    /// process, matching the original's fatal `assert()` contract.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AllocError::InvalidFree { .. }
                | AllocError::InvalidAllocator { .. }
                | AllocError::BudgetUnderflow { .. }
                | AllocError::BuddyMisuse { .. }
        )
    }

    /// Log the error and abort if it is a corruption-class variant.
    /// No-op (after logging) for the recoverable variants.
    pub fn handle(self) -> Self {
        log::error!("{self}");
        if self.is_fatal() {
            std::process::abort();
        }
        self
    }
}
