//! Region header, region list, and the region-growth sizing policy
//! (spec ch. 3 "Region", ch. 4.2).
//!
//! Actually carving a region's chunk layout (initial in-use chunk, free
//! remainder, footer sentinel) lives in `engine.rs::RegionEngine::add_region`,
//! since splicing the free remainder into a bin needs mutable access to the
//! engine's bin arrays -- the original's `init_new_region` feeds that
//! remainder through the ordinary free path rather than hand-inserting it,
//! and this port does the same.

use crate::chunk::CHUNK_HEADER_SIZE;
use crate::ptr_utils::align8;

/// What kind of page supplier an engine's regions come from. Determines
/// the growth sizing policy (spec ch. 4.2) and whether the allocator-index
/// tag byte is written into chunk heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorKind {
    /// A root-pool shard: large pre-sized slabs, reused across callers.
    Root,
    /// A SYS-type facade allocator: anonymous mmap (or host malloc / the
    /// root pool, depending on config).
    Sys,
    /// A PMEM-type facade allocator: pages from the buddy arena.
    Pmem,
}

#[repr(C)]
pub struct RegionHeader {
    pub next: *mut RegionHeader,
    pub prev: *mut RegionHeader,
    /// Total byte size of the region, header to footer inclusive.
    pub byte_size: usize,
    /// Set for regions owned by a root-pool shard; -1 otherwise.
    pub shard_index: i32,
}

pub const REGION_HEADER_SIZE: usize = align8(std::mem::size_of::<RegionHeader>());

/// Inserts `region` into the circular list headed by `sentinel`.
///
/// # Safety
/// `sentinel` and `region` must be valid, distinct `RegionHeader`s; `region`
/// must not already be linked into a list.
pub unsafe fn list_insert(sentinel: *mut RegionHeader, region: *mut RegionHeader) {
    let next = (*sentinel).next;
    (*region).prev = sentinel;
    (*region).next = next;
    (*sentinel).next = region;
    (*next).prev = region;
}

/// Removes `region` from whatever circular list it's linked into.
///
/// # Safety
/// `region` must be a currently-linked, valid `RegionHeader`.
pub unsafe fn list_remove(region: *mut RegionHeader) {
    let prev = (*region).prev;
    let next = (*region).next;
    (*prev).next = next;
    (*next).prev = prev;
}

/// Initializes `sentinel` as an empty circular list head.
///
/// # Safety
/// `sentinel` must be valid for writes.
pub unsafe fn list_init(sentinel: *mut RegionHeader) {
    (*sentinel).next = sentinel;
    (*sentinel).prev = sentinel;
}

/// Iterates a region list, excluding the sentinel.
///
/// # Safety
/// The list must remain valid (not concurrently mutated) for the duration
/// of iteration.
pub unsafe fn iter(sentinel: *mut RegionHeader) -> impl Iterator<Item = *mut RegionHeader> {
    let mut cur = (*sentinel).next;
    std::iter::from_fn(move || {
        if cur == sentinel {
            None
        } else {
            let ret = cur;
            cur = (*cur).next;
            Some(ret)
        }
    })
}

/// The growth-on-exhaustion sizing policy (spec ch. 4.2, refined by
/// `SPEC_FULL.md`'s `malloc_internal` supplement): required region byte
/// size `required`, given the engine's current `total_size` and whether
/// this is the engine's first region.
pub fn growth_size(
    kind: AllocatorKind,
    required: usize,
    total_size: usize,
    is_first_region: bool,
    init_size: usize,
    expand_size: usize,
    min_expand_lower_bound: usize,
    min_expand_upper_bound: usize,
    root_pool_backed: bool,
) -> usize {
    let base = match kind {
        AllocatorKind::Root => {
            if is_first_region {
                init_size
            } else {
                expand_size
            }
        }
        AllocatorKind::Sys | AllocatorKind::Pmem => {
            let upper = if root_pool_backed {
                expand_size.min(1 << 20)
            } else {
                expand_size
            };
            align8(total_size / 2).clamp(min_expand_lower_bound, upper.max(min_expand_lower_bound))
        }
    };

    base.max(required)
}

/// Region byte size required to serve a chunk of `inner_size` bytes:
/// header, the chunk itself, and the footer sentinel.
#[inline]
pub fn region_size_for(inner_size: usize) -> usize {
    REGION_HEADER_SIZE + inner_size + CHUNK_HEADER_SIZE
}
