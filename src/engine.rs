//! The intra-region dlmalloc-variant engine (spec ch. 4.1) and region
//! creation/growth (spec ch. 4.2).
//!
//! A [`RegionEngine`] is the "allocator" of spec ch. 3: one instance is
//! owned by each facade [`crate::facade::Allocator`] and each root-pool
//! shard. It never moves once placed (see [`RegionEngine::init_region_list`]),
//! acquiring backing pages through a [`PageSupplier`].

use std::ptr;

use crate::bins::{self, Binmap, NSMALLBINS, NTREEBINS};
use crate::chunk::{self, ChunkPtr, CHUNK_HEADER_SIZE, MIN_CHUNK_SIZE};
use crate::error::AllocError;
use crate::region::{self, AllocatorKind, RegionHeader};

/// How an engine acquires and releases region-sized blocks of memory
/// (spec ch. 2 "Page supplier"): anonymous mmap, the host allocator, a
/// root-pool shard, or the PMEM buddy arena.
pub enum PageSupplier {
    Mmap,
    NativeMalloc,
    /// Dispatches through a root-pool shard rather than mmap directly.
    RootPool(*const crate::root_pool::RootPool),
    /// Pulls pages from the PMEM buddy instance owned by the top-level PMEM
    /// facade allocator; shared (and lock-guarded) across that allocator and
    /// every PMEM-type descendant drawing from the same arena.
    Pmem(*const parking_lot::Mutex<crate::pmem::PmemBuddy>),
}

impl PageSupplier {
    /// # Safety
    /// `RootPool`/`Pmem` variants' pointers must remain valid for the
    /// engine's lifetime (guaranteed by the facade: the buddy/pool always
    /// outlives the engines drawing from it).
    pub unsafe fn acquire(&self, size: usize) -> Option<(*mut u8, usize)> {
        match self {
            PageSupplier::Mmap => crate::sys_alloc::mmap_anon(size),
            PageSupplier::NativeMalloc => crate::sys_alloc::native_alloc(size),
            PageSupplier::RootPool(pool) => (**pool).acquire_region(size),
            PageSupplier::Pmem(buddy) => {
                let rounded = size.next_power_of_two().max(4096);
                (**buddy).lock().alloc(rounded).map(|p| (p, rounded))
            }
        }
    }

    /// # Safety
    /// See [`PageSupplier::acquire`].
    pub unsafe fn release(&self, ptr: *mut u8, size: usize) {
        match self {
            PageSupplier::Mmap => crate::sys_alloc::munmap_anon(ptr, size),
            PageSupplier::NativeMalloc => crate::sys_alloc::native_free(ptr, size),
            PageSupplier::RootPool(pool) => (**pool).release_region(ptr, size),
            PageSupplier::Pmem(buddy) => {
                let _ = (**buddy).lock().free(ptr, size);
            }
        }
    }
}

/// Tunable growth parameters an engine consults on region exhaustion
/// (subset of [`crate::config::AllocatorConfig`] relevant to one engine).
#[derive(Clone, Copy)]
pub struct GrowthConfig {
    pub init_size: usize,
    pub expand_size: usize,
    pub min_expand_lower_bound: usize,
    pub min_expand_upper_bound: usize,
    pub root_pool_backed: bool,
    pub max_req_size: usize,
}

/// One instance per user-visible allocator (spec ch. 3 "Allocator").
pub struct RegionEngine {
    pub smallmap: Binmap,
    pub treemap: Binmap,
    pub smallbins: [Option<ChunkPtr>; NSMALLBINS],
    pub treebins: [Option<ChunkPtr>; NTREEBINS],
    pub dv: Option<ChunkPtr>,
    pub dvsize: usize,
    pub total_size: usize,
    pub total_used: usize,
    regions_sentinel: RegionHeader,
    pub kind: AllocatorKind,
    pub supplier: PageSupplier,
    /// Written into every chunk head's tag byte; only meaningful for ROOT engines.
    pub shard_index: Option<u8>,
    /// ROOT-pool reuse mode: retain fully-freed regions while `total_size <= limit`.
    pub reuse_limit: Option<usize>,
    pub growth: GrowthConfig,
}

// SAFETY: `RegionEngine` is only ever reached through `facade::AllocatorLock`,
// which upholds the "not reentrant, not concurrently accessed without
// opting into a mutex" contract spelled out in spec ch. 5.
unsafe impl Send for RegionEngine {}

impl RegionEngine {
    pub fn new(kind: AllocatorKind, supplier: PageSupplier, growth: GrowthConfig) -> Self {
        RegionEngine {
            smallmap: 0,
            treemap: 0,
            smallbins: [None; NSMALLBINS],
            treebins: [None; NTREEBINS],
            dv: None,
            dvsize: 0,
            total_size: 0,
            total_used: 0,
            regions_sentinel: RegionHeader { next: ptr::null_mut(), prev: ptr::null_mut(), byte_size: 0, shard_index: -1 },
            kind,
            supplier,
            shard_index: None,
            reuse_limit: None,
            growth,
        }
    }

    /// Must be called exactly once, immediately after `self` has reached
    /// its final memory address (e.g. right after `Box::new`, or as an
    /// element of a `Vec` built once and never reallocated again): the
    /// region list sentinel is self-referential.
    ///
    /// # Safety
    /// `self` must not move after this call.
    pub unsafe fn init_region_list(&mut self) {
        let p = &mut self.regions_sentinel as *mut RegionHeader;
        region::list_init(p);
    }

    #[inline]
    fn sentinel_ptr(&mut self) -> *mut RegionHeader {
        &mut self.regions_sentinel as *mut RegionHeader
    }

    /// Number of live regions (invariant-checking / tests only).
    pub fn region_count(&mut self) -> usize {
        unsafe { region::iter(self.sentinel_ptr()).count() }
    }

    // ---------------------------------------------------------------
    // Bin management
    // ---------------------------------------------------------------

    unsafe fn insert_chunk(&mut self, c: ChunkPtr, size: usize) {
        if bins::is_small(size) {
            self.insert_small_chunk(c, size);
        } else {
            self.insert_large_chunk(c, size);
        }
    }

    unsafe fn unlink_chunk(&mut self, c: ChunkPtr, size: usize) {
        if bins::is_small(size) {
            self.unlink_small_chunk(c, size);
        } else {
            self.unlink_large_chunk(c);
        }
    }

    unsafe fn insert_small_chunk(&mut self, c: ChunkPtr, size: usize) {
        let idx = bins::small_index(size);
        match self.smallbins[idx] {
            None => {
                chunk::set_fd(c, c);
                chunk::set_bk(c, c);
                self.smallbins[idx] = Some(c);
                self.smallmap |= bins::idx_bit(idx);
            }
            Some(head) => {
                let last = chunk::bk(head);
                chunk::set_fd(c, head);
                chunk::set_bk(c, last);
                chunk::set_fd(last, c);
                chunk::set_bk(head, c);
            }
        }
    }

    unsafe fn unlink_small_chunk(&mut self, c: ChunkPtr, size: usize) {
        let idx = bins::small_index(size);
        let f = chunk::fd(c);
        let b = chunk::bk(c);
        if f == c {
            self.smallbins[idx] = None;
            self.smallmap &= !bins::idx_bit(idx);
        } else {
            chunk::set_bk(f, b);
            chunk::set_fd(b, f);
            if self.smallbins[idx] == Some(c) {
                self.smallbins[idx] = Some(f);
            }
        }
    }

    unsafe fn insert_large_chunk(&mut self, x: ChunkPtr, size: usize) {
        let idx = bins::compute_tree_index(size);
        chunk::set_tree_index(x, idx);
        chunk::set_child(x, 0, ptr::null_mut());
        chunk::set_child(x, 1, ptr::null_mut());

        match self.treebins[idx] {
            None => {
                self.treebins[idx] = Some(x);
                self.treemap |= bins::idx_bit(idx);
                chunk::set_parent(x, ptr::null_mut());
                chunk::set_fd(x, x);
                chunk::set_bk(x, x);
            }
            Some(mut t) => {
                let mut k = size << leftshift_for_tree_index(idx);
                loop {
                    if chunk::size(t) != size {
                        let dir = (k >> (usize::BITS as usize - 1)) & 1;
                        k <<= 1;
                        let c = chunk::child(t, dir);
                        if !c.is_null() {
                            t = c;
                        } else {
                            chunk::set_child(t, dir, x);
                            chunk::set_parent(x, t);
                            chunk::set_fd(x, x);
                            chunk::set_bk(x, x);
                            break;
                        }
                    } else {
                        let f = chunk::fd(t);
                        chunk::set_fd(t, x);
                        chunk::set_bk(f, x);
                        chunk::set_fd(x, f);
                        chunk::set_bk(x, t);
                        chunk::set_parent(x, ptr::null_mut());
                        break;
                    }
                }
            }
        }
    }

    unsafe fn unlink_large_chunk(&mut self, x: ChunkPtr) {
        let idx = chunk::tree_index(x);
        let is_root = self.treebins[idx] == Some(x);
        let xp = chunk::parent(x);
        let xbk = chunk::bk(x);

        if xbk != x {
            // x has duplicate-size siblings chained via fd/bk.
            let xfd = chunk::fd(x);
            chunk::set_bk(xfd, xbk);
            chunk::set_fd(xbk, xfd);
            if is_root {
                // xfd takes over x's structural tree position.
                chunk::set_parent(xfd, xp);
                let c0 = chunk::child(x, 0);
                let c1 = chunk::child(x, 1);
                chunk::set_child(xfd, 0, c0);
                chunk::set_child(xfd, 1, c1);
                if !c0.is_null() {
                    chunk::set_parent(c0, xfd);
                }
                if !c1.is_null() {
                    chunk::set_parent(c1, xfd);
                }
                self.treebins[idx] = Some(xfd);
            }
            return;
        }

        // x is the sole chunk of its size: splice a replacement out of its
        // own subtree (deepest descendant of child[1], else child[0]).
        let mut r = chunk::child(x, 1);
        if r.is_null() {
            r = chunk::child(x, 0);
        }
        if !r.is_null() {
            loop {
                let c1 = chunk::child(r, 1);
                let c0 = chunk::child(r, 0);
                if !c1.is_null() {
                    r = c1;
                } else if !c0.is_null() {
                    r = c0;
                } else {
                    break;
                }
            }
            let rparent = chunk::parent(r);
            if chunk::child(rparent, 0) == r {
                chunk::set_child(rparent, 0, ptr::null_mut());
            } else {
                chunk::set_child(rparent, 1, ptr::null_mut());
            }
        }

        if is_root {
            if r.is_null() {
                self.treebins[idx] = None;
                self.treemap &= !bins::idx_bit(idx);
            } else {
                self.treebins[idx] = Some(r);
            }
        } else if !xp.is_null() {
            if chunk::child(xp, 0) == x {
                chunk::set_child(xp, 0, r);
            } else {
                chunk::set_child(xp, 1, r);
            }
        }

        if !r.is_null() {
            chunk::set_parent(r, xp);
            let c0 = chunk::child(x, 0);
            let c1 = chunk::child(x, 1);
            if !c0.is_null() && c0 != r {
                chunk::set_child(r, 0, c0);
                chunk::set_parent(c0, r);
            }
            if !c1.is_null() && c1 != r {
                chunk::set_child(r, 1, c1);
                chunk::set_parent(c1, r);
            }
        }
    }

    unsafe fn replace_dv(&mut self, c: ChunkPtr, size: usize) {
        if let Some(old_dv) = self.dv {
            if self.dvsize >= MIN_CHUNK_SIZE {
                self.insert_chunk(old_dv, self.dvsize);
            }
        }
        self.dv = Some(c);
        self.dvsize = size;
    }

    /// Splits a unlinked tree/small-bin chunk to serve `req`, promoting the
    /// remainder to dv (the asymmetry `tmalloc_small` has vs `tmalloc_large`,
    /// deliberately kept to feed the dv fast path on small requests).
    unsafe fn split_to_dv(&mut self, node: ChunkPtr, req: usize) -> ChunkPtr {
        let size = chunk::size(node);
        let pin = chunk::pinuse(node);
        let rem_size = size - req;
        let pin_flag = if pin { chunk::PINUSE_BIT } else { 0 };
        if rem_size >= MIN_CHUNK_SIZE {
            let rem = node.add(req);
            chunk::set_size_and_flags(node, req, pin_flag | chunk::CINUSE_BIT);
            chunk::set_size_and_flags(rem, rem_size, chunk::PINUSE_BIT);
            chunk::mark_free_footer(rem, rem_size);
            self.replace_dv(rem, rem_size);
        } else {
            chunk::set_size_and_flags(node, size, pin_flag | chunk::CINUSE_BIT);
            chunk::set_pinuse_of_next(node);
        }
        node
    }

    /// As `split_to_dv`, but reinserts the remainder into the ordinary bins.
    unsafe fn split_to_bins(&mut self, node: ChunkPtr, req: usize) -> ChunkPtr {
        let size = chunk::size(node);
        let pin = chunk::pinuse(node);
        let rem_size = size - req;
        let pin_flag = if pin { chunk::PINUSE_BIT } else { 0 };
        if rem_size >= MIN_CHUNK_SIZE {
            let rem = node.add(req);
            chunk::set_size_and_flags(node, req, pin_flag | chunk::CINUSE_BIT);
            chunk::set_size_and_flags(rem, rem_size, chunk::PINUSE_BIT);
            chunk::mark_free_footer(rem, rem_size);
            self.insert_chunk(rem, rem_size);
        } else {
            chunk::set_size_and_flags(node, size, pin_flag | chunk::CINUSE_BIT);
            chunk::set_pinuse_of_next(node);
        }
        node
    }

    /// Best-fit search rooted at the single least-indexed non-empty
    /// treebin, since any non-empty treebin can serve a small request.
    unsafe fn tmalloc_small(&mut self, req: usize) -> Option<ChunkPtr> {
        let idx = bins::index_of_least_bit(self.treemap);
        let mut t = self.treebins[idx]?;
        let mut v = t;
        let mut rsize = chunk::size(t) - req;
        loop {
            t = leftmost_child(t);
            if t.is_null() {
                break;
            }
            let trem = chunk::size(t) - req;
            if trem < rsize {
                rsize = trem;
                v = t;
            }
        }
        self.unlink_large_chunk(v);
        Some(self.split_to_dv(v, req))
    }

    /// Best-fit search guided by `req`'s bits through the matching treebin,
    /// falling back to the least-indexed strictly-larger non-empty treebin.
    unsafe fn tmalloc_large(&mut self, req: usize) -> Option<ChunkPtr> {
        let idx = bins::compute_tree_index(req);
        let mut v: Option<ChunkPtr> = None;
        let mut rsize = usize::MAX;

        if let Some(mut node) = self.treebins[idx] {
            let mut sizebits = req << leftshift_for_tree_index(idx);
            let mut right_subtree: Option<ChunkPtr> = None;
            loop {
                let csize = chunk::size(node);
                if csize >= req && csize - req < rsize {
                    rsize = csize - req;
                    v = Some(node);
                }
                let rt = chunk::child(node, 1);
                let dir = (sizebits >> (usize::BITS as usize - 1)) & 1;
                let c = chunk::child(node, dir);
                if !rt.is_null() && rt != c {
                    right_subtree = Some(rt);
                }
                if c.is_null() {
                    break;
                }
                sizebits <<= 1;
                node = c;
            }
            if let Some(mut node) = right_subtree {
                if rsize > 0 {
                    loop {
                        let csize = chunk::size(node);
                        if csize >= req && csize - req < rsize {
                            rsize = csize - req;
                            v = Some(node);
                        }
                        let lm = leftmost_child(node);
                        if lm.is_null() {
                            break;
                        }
                        node = lm;
                    }
                }
            }
        }

        if v.is_none() {
            let left = bins::left_bits(bins::idx_bit(idx)) & self.treemap;
            if left != 0 {
                let i = bins::index_of_least_bit(left);
                let mut node = self.treebins[i]?;
                loop {
                    let csize = chunk::size(node);
                    if csize >= req && csize - req < rsize {
                        rsize = csize - req;
                        v = Some(node);
                    }
                    let lm = leftmost_child(node);
                    if lm.is_null() {
                        break;
                    }
                    node = lm;
                }
            }
        }

        let v = v?;
        self.unlink_large_chunk(v);
        Some(self.split_to_bins(v, req))
    }

    // ---------------------------------------------------------------
    // malloc / free / realloc
    // ---------------------------------------------------------------

    unsafe fn malloc_internal(&mut self, nb: usize) -> Option<ChunkPtr> {
        if bins::is_small(nb) {
            let idx = bins::small_index(nb);
            let smallbits = self.smallmap >> idx;

            if smallbits & 0b11 != 0 {
                let use_idx = idx + (!smallbits & 1) as usize;
                let p = self.smallbins[use_idx]?;
                let sz = bins::small_index2size(use_idx);
                self.unlink_small_chunk(p, sz);
                chunk::set_size_and_flags(p, sz, chunk::PINUSE_BIT | chunk::CINUSE_BIT);
                chunk::set_pinuse_of_next(p);
                return Some(p);
            } else if nb > self.dvsize {
                if smallbits != 0 {
                    let leftbits = (smallbits << idx) & bins::left_bits(bins::idx_bit(idx));
                    let i = bins::index_of_least_bit(bins::least_bit(leftbits));
                    let p = self.smallbins[i]?;
                    let isize = bins::small_index2size(i);
                    self.unlink_small_chunk(p, isize);
                    let rsize = isize - nb;
                    if rsize < MIN_CHUNK_SIZE {
                        chunk::set_size_and_flags(p, isize, chunk::PINUSE_BIT | chunk::CINUSE_BIT);
                        chunk::set_pinuse_of_next(p);
                    } else {
                        chunk::set_size_and_flags(p, nb, chunk::PINUSE_BIT | chunk::CINUSE_BIT);
                        let r = p.add(nb);
                        chunk::set_size_and_flags(r, rsize, chunk::PINUSE_BIT);
                        chunk::mark_free_footer(r, rsize);
                        self.replace_dv(r, rsize);
                    }
                    return Some(p);
                } else if self.treemap != 0 {
                    if let Some(p) = self.tmalloc_small(nb) {
                        return Some(p);
                    }
                }
            }
        } else if self.treemap != 0 {
            if let Some(p) = self.tmalloc_large(nb) {
                return Some(p);
            }
        }

        if nb <= self.dvsize {
            let p = self.dv.unwrap();
            let rsize = self.dvsize - nb;
            if rsize >= MIN_CHUNK_SIZE {
                let r = p.add(nb);
                self.dv = Some(r);
                self.dvsize = rsize;
                chunk::set_size_and_flags(r, rsize, chunk::PINUSE_BIT);
                chunk::mark_free_footer(r, rsize);
                chunk::set_size_and_flags(p, nb, chunk::PINUSE_BIT | chunk::CINUSE_BIT);
            } else {
                let dvs = self.dvsize;
                self.dv = None;
                self.dvsize = 0;
                chunk::set_size_and_flags(p, dvs, chunk::PINUSE_BIT | chunk::CINUSE_BIT);
                chunk::set_pinuse_of_next(p);
            }
            return Some(p);
        }

        self.add_region(nb)
    }

    /// Allocates at least `reqsize` bytes, returning the user-visible
    /// payload pointer.
    pub unsafe fn malloc(&mut self, reqsize: usize) -> Option<*mut u8> {
        let nb = chunk::pad_request(reqsize);
        let p = self.malloc_internal(nb)?;
        if matches!(self.kind, AllocatorKind::Root) {
            chunk::set_tag(p, self.shard_index.unwrap_or(0));
        }
        self.total_used += chunk::size(p);
        Some(chunk::chunk2mem(p))
    }

    pub unsafe fn calloc(&mut self, n: usize) -> Option<*mut u8> {
        let mem = self.malloc(n)?;
        mem.write_bytes(0, n);
        Some(mem)
    }

    pub unsafe fn valloc(&mut self, n: usize) -> Option<*mut u8> {
        self.alloc_aligned(n, crate::ptr_utils::page_size())
    }

    /// Serves a request requiring `align` bytes of alignment (a power of
    /// two). For `align <= 8` this is just `malloc`, since every chunk
    /// payload is already word-aligned; otherwise it over-allocates and
    /// plants a zero-size sentinel chunk header in front of the aligned
    /// payload, the same trick `valloc` uses for page alignment. `free`
    /// recognizes the sentinel (`chunk::head(c) == 0`) and redirects to the
    /// real chunk, so no other path needs to know about this indirection.
    pub unsafe fn alloc_aligned(&mut self, n: usize, align: usize) -> Option<*mut u8> {
        if align <= 8 {
            return self.malloc(n);
        }
        let oversized = n.checked_add(align)?.checked_add(CHUNK_HEADER_SIZE)?;
        let mem = self.malloc(oversized)?;
        let aligned = crate::ptr_utils::align_up_by(mem.add(CHUNK_HEADER_SIZE), align - 1);
        let sentinel = aligned.sub(CHUNK_HEADER_SIZE);
        let back_offset = sentinel.offset_from(mem) as usize;
        chunk::set_prev_foot(sentinel, back_offset);
        chunk::set_head(sentinel, 0);
        Some(aligned)
    }

    /// # Safety
    /// `mem` must be a pointer previously returned by `malloc`/`calloc`/
    /// `valloc`/`realloc` on this engine and not already freed.
    pub unsafe fn free(&mut self, mem: *mut u8) -> Result<(), AllocError> {
        let c = chunk::mem2chunk(mem);
        if chunk::head(c) == 0 {
            // valloc sentinel: redirect to the real chunk.
            let real_mem = c.sub(chunk::prev_foot(c));
            return self.free_internal(real_mem);
        }
        self.free_internal(mem)
    }

    unsafe fn free_internal(&mut self, mem: *mut u8) -> Result<(), AllocError> {
        let orig = chunk::mem2chunk(mem);
        if !chunk::cinuse(orig) {
            return Err(AllocError::InvalidFree { ptr: mem, reason: "chunk not marked in-use (double free?)" });
        }

        let mut p = orig;
        let mut psize = chunk::size(p);
        if psize > self.total_used {
            return Err(AllocError::BudgetUnderflow { total_used: self.total_used, freed: psize });
        }
        self.total_used -= psize;

        let mut next = p.add(psize);
        let mut became_dv = false;

        if !chunk::pinuse(p) {
            let prevsize = chunk::prev_foot(p);
            let prev = p.sub(prevsize);
            chunk::clear_cinuse(orig);
            if self.dv == Some(prev) {
                self.dvsize += psize;
                psize = self.dvsize;
                p = prev;
                became_dv = true;
            } else {
                self.unlink_chunk(prev, prevsize);
                psize += prevsize;
                p = prev;
            }
        } else {
            chunk::clear_cinuse(p);
        }

        if !chunk::cinuse(next) {
            let nsize = chunk::size(next);
            if self.dv == Some(next) {
                if became_dv {
                    self.dvsize += nsize;
                } else {
                    self.dvsize = psize + nsize;
                }
                psize = self.dvsize;
                became_dv = true;
                next = next.add(nsize);
            } else {
                self.unlink_chunk(next, nsize);
                psize += nsize;
                next = next.add(nsize);
                if became_dv {
                    self.dvsize = psize;
                }
            }
        }

        chunk::set_size_and_flags(p, psize, chunk::PINUSE_BIT);
        chunk::mark_free_footer(p, psize);

        if self.maybe_release_region(p, next) {
            if self.dv == Some(p) {
                self.dv = None;
                self.dvsize = 0;
            }
            return Ok(());
        }

        if became_dv {
            self.dv = Some(p);
        } else if self.dv.is_none() {
            self.dv = Some(p);
            self.dvsize = psize;
        } else {
            self.insert_chunk(p, psize);
        }

        Ok(())
    }

    /// If the merged free chunk spans its region's entire inner-chunk area
    /// (`next` is the footer sentinel), unlinks and releases the region to
    /// the page supplier -- unless the engine is in reuse mode and under
    /// its reuse limit. Returns whether the region was released.
    unsafe fn maybe_release_region(&mut self, p: ChunkPtr, next: ChunkPtr) -> bool {
        if !chunk::is_footer(next) {
            return false;
        }
        if self.reuse_limit.map_or(false, |limit| self.total_size <= limit) {
            return false;
        }
        let region = p.sub(region::REGION_HEADER_SIZE) as *mut RegionHeader;
        region::list_remove(region);
        self.total_size -= (*region).byte_size;
        self.supplier.release(region as *mut u8, (*region).byte_size);
        true
    }

    /// # Safety
    /// `mem` must be a pointer previously returned by this engine and not
    /// already freed.
    pub unsafe fn realloc(&mut self, mem: *mut u8, new_req: usize) -> Option<*mut u8> {
        let p = chunk::mem2chunk(mem);
        let old_chunk_size = chunk::size(p);
        let old_payload = old_chunk_size - CHUNK_HEADER_SIZE;
        let new_chunk_size = chunk::pad_request(new_req);

        if old_chunk_size >= new_chunk_size {
            let remainder = old_chunk_size - new_chunk_size;
            if remainder >= MIN_CHUNK_SIZE {
                chunk::set_size_and_flags(p, new_chunk_size, chunk::PINUSE_BIT | chunk::CINUSE_BIT);
                let rem = p.add(new_chunk_size);
                chunk::set_size_and_flags(rem, remainder, chunk::PINUSE_BIT | chunk::CINUSE_BIT);
                let _ = self.free_internal(chunk::chunk2mem(rem));
            }
            return Some(mem);
        }

        let new_mem = self.malloc(new_req)?;
        ptr::copy_nonoverlapping(mem, new_mem, old_payload.min(new_req));
        let _ = self.free_internal(mem);
        Some(new_mem)
    }

    // ---------------------------------------------------------------
    // Region creation / growth (spec ch. 4.2)
    // ---------------------------------------------------------------

    unsafe fn add_region(&mut self, inner_size: usize) -> Option<ChunkPtr> {
        let required = region::region_size_for(inner_size);
        if self.growth.max_req_size != 0 && required > self.growth.max_req_size {
            return None;
        }

        let is_first = region::iter(self.sentinel_ptr()).next().is_none();
        let mut grow = region::growth_size(
            self.kind,
            required,
            self.total_size,
            is_first,
            self.growth.init_size,
            self.growth.expand_size,
            self.growth.min_expand_lower_bound,
            self.growth.min_expand_upper_bound,
            self.growth.root_pool_backed,
        );
        if matches!(self.kind, AllocatorKind::Pmem) {
            grow = grow.next_power_of_two();
        }

        let (base, acquired) = self.supplier.acquire(grow)?;
        let region_hdr = base as *mut RegionHeader;
        (*region_hdr).byte_size = acquired;
        (*region_hdr).shard_index = self.shard_index.map(|i| i as i32).unwrap_or(-1);
        region::list_insert(self.sentinel_ptr(), region_hdr);
        self.total_size += acquired;

        let chunk_area = base.add(region::REGION_HEADER_SIZE);
        let chunk_area_size = acquired - region::REGION_HEADER_SIZE - CHUNK_HEADER_SIZE;
        let footer = chunk_area.add(chunk_area_size);

        chunk::set_head(footer, 0);
        chunk::set_size_and_flags(footer, acquired, chunk::FOOTER_BIT | chunk::CINUSE_BIT | chunk::PINUSE_BIT);

        let in_use = chunk_area;
        let remainder = chunk_area_size - inner_size;
        chunk::set_size_and_flags(in_use, inner_size, chunk::PINUSE_BIT | chunk::CINUSE_BIT);

        if remainder >= MIN_CHUNK_SIZE {
            let rem = in_use.add(inner_size);
            chunk::set_size_and_flags(rem, remainder, chunk::PINUSE_BIT);
            chunk::mark_free_footer(rem, remainder);
            // fed through the ordinary free-insert path rather than hand-inserted
            if self.dv.is_none() {
                self.dv = Some(rem);
                self.dvsize = remainder;
            } else {
                self.insert_chunk(rem, remainder);
            }
        } else {
            chunk::set_size_and_flags(in_use, inner_size + remainder, chunk::PINUSE_BIT | chunk::CINUSE_BIT);
            chunk::set_pinuse_of_next(in_use);
        }

        Some(in_use)
    }

    /// Releases every region this engine owns back to its page supplier.
    pub unsafe fn release_all_regions(&mut self) {
        let sentinel = self.sentinel_ptr();
        let mut cur = (*sentinel).next;
        while cur != sentinel {
            let next = (*cur).next;
            let size = (*cur).byte_size;
            self.supplier.release(cur as *mut u8, size);
            cur = next;
        }
        region::list_init(sentinel);
        self.total_size = 0;
        self.total_used = 0;
        self.dv = None;
        self.dvsize = 0;
        self.smallmap = 0;
        self.treemap = 0;
        self.smallbins = [None; NSMALLBINS];
        self.treebins = [None; NTREEBINS];
    }
}

/// dlmalloc's `leftshift_for_tree_index`: how far to shift a size left so
/// successive bits (from the MSB down) guide descent within treebin `idx`.
#[inline]
fn leftshift_for_tree_index(idx: usize) -> u32 {
    if idx == NTREEBINS - 1 {
        0
    } else {
        (usize::BITS - 1) - (((idx >> 1) as u32) + bins::TREEBIN_SHIFT - 2)
    }
}

/// dlmalloc's `leftmost_child`: descend preferring child[0], falling back
/// to child[1].
#[inline]
unsafe fn leftmost_child(t: ChunkPtr) -> ChunkPtr {
    let c0 = chunk::child(t, 0);
    if !c0.is_null() {
        c0
    } else {
        chunk::child(t, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn new_test_engine() -> RegionEngine {
        let mut e = RegionEngine::new(
            AllocatorKind::Sys,
            PageSupplier::Mmap,
            GrowthConfig {
                init_size: 1 << 16,
                expand_size: 1 << 16,
                min_expand_lower_bound: 4096,
                min_expand_upper_bound: 1 << 20,
                root_pool_backed: false,
                max_req_size: 0,
            },
        );
        e.init_region_list();
        e
    }

    #[test]
    fn small_alloc_and_free_roundtrip() {
        unsafe {
            let mut e = new_test_engine();
            let p = e.malloc(20).unwrap();
            assert_eq!(e.total_used, chunk::pad_request(20));
            p.write_bytes(0xAB, 20);
            e.free(p).unwrap();
            assert_eq!(e.total_used, 0);
            e.release_all_regions();
        }
    }

    #[test]
    fn many_allocs_then_frees_empties_engine() {
        unsafe {
            let mut e = new_test_engine();
            let mut ptrs = Vec::new();
            for i in 0..256 {
                let sz = 8 + (i % 37) * 13;
                ptrs.push(e.malloc(sz).unwrap());
            }
            for p in ptrs.into_iter().rev() {
                e.free(p).unwrap();
            }
            assert_eq!(e.total_used, 0);
            e.release_all_regions();
        }
    }

    #[test]
    fn realloc_grows_and_shrinks() {
        unsafe {
            let mut e = new_test_engine();
            let p = e.malloc(20).unwrap();
            let p2 = e.realloc(p, 1000).unwrap();
            assert_eq!(e.total_used, chunk::pad_request(1000));
            let p3 = e.realloc(p2, 10).unwrap();
            assert!(e.total_used >= chunk::pad_request(10));
            e.free(p3).unwrap();
            assert_eq!(e.total_used, 0);
            e.release_all_regions();
        }
    }

    #[test]
    fn calloc_zeroes_memory() {
        unsafe {
            let mut e = new_test_engine();
            let p = e.calloc(37).unwrap();
            let slice = std::slice::from_raw_parts(p, 37);
            assert!(slice.iter().all(|&b| b == 0));
            e.free(p).unwrap();
            e.release_all_regions();
        }
    }

    #[test]
    fn valloc_is_page_aligned() {
        unsafe {
            let mut e = new_test_engine();
            let page = crate::ptr_utils::page_size();
            let p = e.valloc(4096).unwrap();
            assert_eq!(p as usize % page, 0);
            e.free(p).unwrap();
            assert_eq!(e.total_used, 0);
            e.release_all_regions();
        }
    }
}
