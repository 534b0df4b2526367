//! `hmalloc`: a hierarchical, region-based memory allocator.
//!
//! The design is a tree of allocators (spec ch. 3), each one an intra-region
//! dlmalloc-variant best-fit engine ([`engine::RegionEngine`], ch. 4.1)
//! drawing its backing pages from one of:
//!
//! - anonymous `mmap`, or the host allocator, directly (a SYS-type
//!   allocator with no root pool configured);
//! - a sharded pool of pre-created ROOT-type engines, dispatched by
//!   try-lock round robin ([`root_pool`], ch. 4.4), to absorb contention
//!   when many SYS-type allocators grow concurrently;
//! - a buddy allocator laid out over a memory-mapped file ([`pmem`],
//!   ch. 4.3), for allocations meant to outlive the process.
//!
//! [`facade`] ties these together into the public allocator tree
//! (`tballoc_init`/[`AllocatorHandle`]/`tballoc_clear`, ch. 4.5 and ch. 6);
//! that module's re-exports below are the crate's everyday entry points.
//! [`GlobalHmalloc`] additionally lets an [`Allocator`] double as a
//! `#[global_allocator]`, independent of the allocator tree.

mod bins;
mod buddy;
mod chunk;
pub mod config;
mod engine;
pub mod error;
pub mod facade;
mod llist;
mod pmem;
mod ptr_utils;
mod region;
mod root_pool;
mod sys_alloc;

#[cfg(feature = "redzone")]
pub mod redzone;

#[cfg(feature = "allocator")]
mod global;

pub use config::AllocatorConfig;
pub use error::AllocError;
pub use facade::{
    ensure_pmem_dir, pmem_system_alloc, system_alloc, tballoc_clear, tballoc_init, Allocator, AllocatorHandle,
    AllocatorType,
};

#[cfg(feature = "allocator")]
pub use global::GlobalHmalloc;
