//! Tunable parameters, settable before [`crate::tballoc_init`].
//!
//! Mirrors the original's `iparam.c` globals as a single `Copy` struct
//! passed at init time rather than free-floating externs mutated before
//! init -- process-wide mutable config globals aren't an idiom this crate
//! uses anywhere else.

use std::path::PathBuf;

/// Default cap referenced by [`AllocatorConfig::max_req_memory_size`].
pub const DEFAULT_TOTAL_SYS_MEM_SIZE: usize = 1 << 20;

/// All parameters externally settable before [`crate::tballoc_init`] runs.
///
/// Constructed with [`Default::default`] and then field-updated, matching
/// the plain-struct-literal configuration style used throughout the crate
/// (see `facade.rs`, `buddy.rs`) rather than pulling in a dedicated
/// config-file crate -- every value here is a simple scalar consumed once
/// at init and never reloaded.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Number of root-pool shards. Zero disables the pool (page suppliers
    /// fall back to direct mmap).
    pub root_allocator_cnt: usize,
    /// Pre-warm each shard with one allocation of this size, immediately
    /// shrunk back down, forcing the shard to commit roughly this much
    /// address space up front without holding it in `total_used`.
    pub root_allocator_reserved_size: usize,
    /// Shards retain up to this many bytes of freed region storage rather
    /// than returning it to the OS (`ROOT_ALLOCATOR_REUSE_SIZE`).
    pub root_allocator_reuse_size: usize,
    /// Default region-grow size for a non-ROOT engine's first region.
    pub system_memory_init_size: usize,
    /// Default region-grow size for subsequent regions.
    pub system_memory_expand_size: usize,
    /// Clamp lower bound for sub-allocator growth policy (`align8(total_size/2)`).
    pub region_alloc_min_expand_lower_bound: usize,
    /// Clamp upper bound for sub-allocator growth policy.
    pub region_alloc_min_expand_upper_bound: usize,
    /// Route the page supplier through the host allocator instead of mmap.
    pub force_native_alloc_use: bool,
    /// Cap on a single request's region byte-size; 0 means unlimited.
    pub max_req_memory_size: usize,
    /// Directory the PMEM buddy-backing file is created under.
    pub pmem_dir: PathBuf,
    /// Maximum size the PMEM buddy file is provisioned (`ftruncate`d) to.
    pub pmem_max_size: usize,
    /// Bytes initially donated to the PMEM buddy allocator out of `pmem_max_size`.
    pub pmem_alloc_size: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            root_allocator_cnt: 4,
            root_allocator_reserved_size: 0,
            root_allocator_reuse_size: 4 << 20,
            system_memory_init_size: 1 << 20,
            system_memory_expand_size: 4 << 20,
            region_alloc_min_expand_lower_bound: 4 << 10,
            region_alloc_min_expand_upper_bound: 1 << 20,
            force_native_alloc_use: false,
            max_req_memory_size: 0,
            pmem_dir: std::env::temp_dir().join("hmalloc-pmem"),
            pmem_max_size: 1 << 20,
            pmem_alloc_size: 1 << 20,
        }
    }
}
