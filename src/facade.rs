//! The allocator tree (spec ch. 4.5): SYS/PMEM-type facade allocators,
//! parent/child ownership, the top-level `SYSTEM_ALLOC`/`PMEM_SYSTEM_ALLOC`
//! process globals, and the public per-allocation API
//! (`tb_malloc`/`tb_calloc`/`tb_valloc`/`tb_realloc`/`tb_free`/`tb_strdup`/
//! `tb_strndup`).
//!
//! Grounded in `examples/original_source/allocator.h` and `region_alloc.c`,
//! whose API is pointer-opaque throughout: `region_allocator_new` hands back
//! a pointer the caller threads through every later call and eventually
//! passes to `allocator_delete`. [`AllocatorHandle`] mirrors that directly --
//! a parent owns its children exclusively, but a child's lifetime is always
//! ended through an explicit `delete` call (on the child itself, or
//! transitively when an ancestor is deleted), not through Rust drop-glue
//! unwinding a borrow-checked ownership tree, since the facade is reached
//! through raw pointers the same way `chunk.rs`/`engine.rs` model chunks and
//! regions.

use std::ffi::CStr;
use std::ops::Deref;
use std::panic::Location;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::config::AllocatorConfig;
use crate::engine::{GrowthConfig, PageSupplier, RegionEngine};
use crate::error::AllocError;
use crate::pmem::PmemBuddy;
use crate::region::AllocatorKind;
use crate::root_pool::RootPool;

/// Set at construction, zeroed at destruction (spec ch. 3 "Lifecycle"): a
/// public call on a destroyed allocator trips [`AllocError::InvalidAllocator`].
const VALID_MAGIC: u64 = 0x54424d5f4c4c4f43; // "TBM_LLOC" ascii-ish, nonzero
const DEAD_MAGIC: u64 = 0;

/// Which kind of backing this facade allocator draws pages from (spec ch.
/// 4.5). `Root` is never constructed through this module -- it's only used
/// internally by [`crate::root_pool::RootPool`] shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorType {
    Sys,
    Pmem,
}

/// One node of the allocator tree (spec ch. 3 "Allocator", ch. 4.5).
pub struct Allocator {
    kind: AllocatorType,
    engine: Mutex<RegionEngine>,
    /// Only `Some` for the top-level PMEM allocator; PMEM children share
    /// their ancestor's buddy via [`PageSupplier::Pmem`]'s raw pointer
    /// rather than each owning a copy.
    pmem: Option<Mutex<PmemBuddy>>,
    /// Whether this instance holds `engine`'s mutex for the full duration
    /// of a call (spec ch. 5). Rust's aliasing rules require *some*
    /// synchronization behind `&self` regardless -- `engine` is always a
    /// real `Mutex` -- so `false` here means "the caller contracts not to
    /// call this allocator concurrently", not "skip locking"; see
    /// `DESIGN.md`.
    synchronized: bool,
    parent: Option<NonNull<Allocator>>,
    children: Mutex<Vec<NonNull<Allocator>>>,
    valid: AtomicU64,
}

// SAFETY: all mutable state is behind `Mutex`; `parent`/`children` pointers
// are only dereferenced while holding the relevant node's own validity
// contract, same discipline as `engine::RegionEngine`'s region list.
unsafe impl Send for Allocator {}
unsafe impl Sync for Allocator {}

/// An opaque handle to a node of the allocator tree, the public surface
/// every call in this module is reached through (spec ch. 6). Thin,
/// `Copy` wrapper around a raw pointer -- ownership lives in the tree
/// itself (a parent's `children`, or nowhere, for a handle the caller
/// hasn't attached to a parent yet), not in any particular `AllocatorHandle`
/// value, so copying a handle is always safe but calling [`AllocatorHandle::delete`]
/// twice on handles to the same node is not (matches the original's
/// single-free-per-pointer contract).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AllocatorHandle(NonNull<Allocator>);

impl Deref for AllocatorHandle {
    type Target = Allocator;
    fn deref(&self) -> &Allocator {
        // SAFETY: a live `AllocatorHandle` always points at an `Allocator`
        // that either hasn't been deleted yet, or trips `InvalidAllocator`
        // on first public-call use post-delete via the validity code below
        // -- the backing memory itself is never reclaimed except by
        // `delete`, which consumes the handle tree it's reachable from.
        unsafe { self.0.as_ref() }
    }
}

impl Allocator {
    fn growth_config(cfg: &AllocatorConfig, root_pool_backed: bool) -> GrowthConfig {
        GrowthConfig {
            init_size: cfg.system_memory_init_size,
            expand_size: cfg.system_memory_expand_size,
            min_expand_lower_bound: cfg.region_alloc_min_expand_lower_bound,
            min_expand_upper_bound: cfg.region_alloc_min_expand_upper_bound,
            root_pool_backed,
            max_req_size: cfg.max_req_memory_size,
        }
    }

    fn new_sys_inner(
        cfg: &AllocatorConfig,
        root_pool: Option<&RootPool>,
        parent: Option<AllocatorHandle>,
        use_mutex: bool,
    ) -> AllocatorHandle {
        let supplier = if cfg.force_native_alloc_use {
            PageSupplier::NativeMalloc
        } else if let Some(pool) = root_pool {
            PageSupplier::RootPool(pool as *const RootPool)
        } else {
            PageSupplier::Mmap
        };
        let growth = Self::growth_config(cfg, root_pool.is_some());
        Self::new(AllocatorType::Sys, supplier, growth, None, parent, use_mutex)
    }

    /// `region_allocator_new(parent, use_mutex)` (spec ch. 6): a SYS-type
    /// allocator drawing pages from the root pool when one is configured,
    /// the host allocator when `force_native_alloc_use` is set, or direct
    /// anonymous mmap otherwise.
    #[track_caller]
    pub fn new_sys(parent: Option<AllocatorHandle>, use_mutex: bool) -> AllocatorHandle {
        let cfg = global_config();
        let pool = global_root_pool();
        Self::new_sys_inner(&cfg, pool, parent, use_mutex)
    }

    fn nearest_pmem_ptr(parent: Option<AllocatorHandle>) -> Option<NonNull<Allocator>> {
        let mut cur = parent.map(|p| p.0);
        while let Some(ptr) = cur {
            let node = unsafe { ptr.as_ref() };
            if node.kind == AllocatorType::Pmem {
                return Some(ptr);
            }
            cur = node.parent;
        }
        None
    }

    fn new_pmem_inner(
        cfg: &AllocatorConfig,
        parent: Option<AllocatorHandle>,
        use_mutex: bool,
    ) -> Result<AllocatorHandle, AllocError> {
        let (pmem_owned, supplier) = match Self::nearest_pmem_ptr(parent) {
            Some(ancestor_ptr) => {
                let ancestor = unsafe { ancestor_ptr.as_ref() };
                let mptr = ancestor.pmem.as_ref().expect("PMEM ancestor always owns or inherits a buddy")
                    as *const Mutex<PmemBuddy>;
                (None, PageSupplier::Pmem(mptr))
            }
            None => {
                std::fs::create_dir_all(&cfg.pmem_dir)?;
                let buddy = PmemBuddy::new(&cfg.pmem_dir, cfg.pmem_max_size, cfg.pmem_alloc_size)?;
                (Some(Mutex::new(buddy)), PageSupplier::Pmem(std::ptr::null()))
            }
        };

        let growth = Self::growth_config(cfg, false);
        let handle = Self::new(AllocatorType::Pmem, supplier, growth, pmem_owned, parent, use_mutex);
        if handle.pmem.is_some() {
            // The supplier pointer above couldn't reference `handle.pmem`
            // before `handle`'s `Allocator` existed at its final address;
            // patch it in now that `Box::leak` has fixed that address.
            let ptr = handle.pmem.as_ref().unwrap() as *const Mutex<PmemBuddy>;
            handle.engine.lock().supplier = PageSupplier::Pmem(ptr);
        }
        Ok(handle)
    }

    /// `region_pallocator_new(parent, use_mutex)` (spec ch. 6): a PMEM-type
    /// allocator. A top-level call (`parent: None`) provisions and owns a
    /// fresh buddy file under `cfg.pmem_dir`; a child inherits its nearest
    /// PMEM ancestor's buddy instance.
    #[track_caller]
    pub fn new_pmem(parent: Option<AllocatorHandle>, use_mutex: bool) -> Result<AllocatorHandle, AllocError> {
        let cfg = global_config();
        Self::new_pmem_inner(&cfg, parent, use_mutex)
    }

    fn new(
        kind: AllocatorType,
        supplier: PageSupplier,
        growth: GrowthConfig,
        pmem: Option<Mutex<PmemBuddy>>,
        parent: Option<AllocatorHandle>,
        use_mutex: bool,
    ) -> AllocatorHandle {
        let mut engine = RegionEngine::new(AllocatorKind::from_type(kind), supplier, growth);
        unsafe {
            engine.init_region_list();
        }

        let boxed = Box::new(Allocator {
            kind,
            engine: Mutex::new(engine),
            pmem,
            synchronized: use_mutex,
            parent: parent.map(|p| p.0),
            children: Mutex::new(Vec::new()),
            valid: AtomicU64::new(VALID_MAGIC),
        });
        // Ownership moves out of Rust's borrow-checked world here: the
        // allocator tree (parent's `children`, or the caller holding the
        // bare handle) manages this memory manually from this point on,
        // reclaimed only by `AllocatorHandle::delete`.
        let leaked: &'static mut Allocator = Box::leak(boxed);
        let handle = AllocatorHandle(NonNull::from(leaked));

        if let Some(parent) = parent {
            parent.assert_valid();
            // "Appending to a parent's children list locks the parent's
            // mutex (if any)" (spec ch. 5).
            let _guard = parent.synchronized.then(|| parent.engine.lock());
            parent.children.lock().push(handle.0);
        }

        handle
    }

    #[inline]
    fn assert_valid(&self) {
        if self.valid.load(Ordering::Acquire) != VALID_MAGIC {
            let err = AllocError::InvalidAllocator { ptr: self as *const Allocator as *const u8 };
            err.handle();
        }
    }

    #[inline]
    fn lock_engine(&self) -> parking_lot::MutexGuard<'_, RegionEngine> {
        self.assert_valid();
        self.engine.lock()
    }

    // -----------------------------------------------------------------
    // Per-allocation API (spec ch. 6)
    // -----------------------------------------------------------------

    #[track_caller]
    pub fn malloc(&self, n: usize) -> Option<*mut u8> {
        let site = Location::caller();
        let mut e = self.lock_engine();
        let p = unsafe { e.malloc(n) };
        if p.is_none() {
            log::debug!("malloc: out of memory requesting {n} bytes at {site}");
        }
        p
    }

    #[track_caller]
    pub fn calloc(&self, n: usize) -> Option<*mut u8> {
        let mut e = self.lock_engine();
        unsafe { e.calloc(n) }
    }

    #[track_caller]
    pub fn valloc(&self, n: usize) -> Option<*mut u8> {
        let mut e = self.lock_engine();
        unsafe { e.valloc(n) }
    }

    /// # Safety
    /// `mem` must be a pointer previously returned by `malloc`/`calloc`/
    /// `valloc`/`realloc` on this same allocator, not already freed.
    #[track_caller]
    pub unsafe fn realloc(&self, mem: *mut u8, n: usize) -> Option<*mut u8> {
        let mut e = self.lock_engine();
        e.realloc(mem, n)
    }

    /// # Safety
    /// See [`Allocator::realloc`].
    pub unsafe fn free(&self, mem: *mut u8) {
        let mut e = self.lock_engine();
        if let Err(err) = e.free(mem) {
            err.handle();
        }
    }

    #[track_caller]
    pub fn strdup(&self, s: &CStr) -> Option<*mut u8> {
        self.strndup_bytes_and_nul(s.to_bytes())
    }

    #[track_caller]
    pub fn strndup(&self, s: &CStr, n: usize) -> Option<*mut u8> {
        let bytes = s.to_bytes();
        let n = n.min(bytes.len());
        self.strndup_bytes_and_nul(&bytes[..n])
    }

    fn strndup_bytes_and_nul(&self, bytes: &[u8]) -> Option<*mut u8> {
        let p = self.malloc(bytes.len() + 1)?;
        unsafe {
            p.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
            p.add(bytes.len()).write(0);
        }
        Some(p)
    }

    // -----------------------------------------------------------------
    // `Layout`-aware entry points, used by `global::GlobalHmalloc` to serve
    // as a `#[global_allocator]` (`SPEC_FULL.md`'s ambient supplement: the
    // original has no `Layout` concept, so these exist only on this side).
    // -----------------------------------------------------------------

    #[track_caller]
    pub(crate) fn alloc_layout(&self, layout: std::alloc::Layout) -> Option<*mut u8> {
        let mut e = self.lock_engine();
        unsafe { e.alloc_aligned(layout.size().max(1), layout.align()) }
    }

    /// # Safety
    /// `mem` must be a pointer previously returned by [`Allocator::alloc_layout`]
    /// on this allocator, not already freed.
    pub(crate) unsafe fn dealloc_layout(&self, mem: *mut u8) {
        self.free(mem)
    }

    /// # Safety
    /// `mem` must be a pointer previously returned by [`Allocator::alloc_layout`]
    /// on this allocator with `old_layout`, not already freed.
    #[track_caller]
    pub(crate) unsafe fn realloc_layout(
        &self,
        mem: *mut u8,
        old_layout: std::alloc::Layout,
        new_size: usize,
    ) -> Option<*mut u8> {
        if old_layout.align() <= 8 {
            let mut e = self.lock_engine();
            return e.realloc(mem, new_size);
        }
        // Can't rely on the engine's in-place shrink path here: an
        // over-aligned allocation's chunk header is a zero-size sentinel
        // that doesn't carry the real size, so a fresh aligned allocation
        // plus copy is the only option.
        let new_layout = std::alloc::Layout::from_size_align(new_size, old_layout.align()).ok()?;
        let new_mem = self.alloc_layout(new_layout)?;
        std::ptr::copy_nonoverlapping(mem, new_mem, old_layout.size().min(new_size));
        self.free(mem);
        Some(new_mem)
    }

    // -----------------------------------------------------------------
    // Introspection (spec ch. 6; `counters` feature)
    // -----------------------------------------------------------------

    #[cfg(feature = "counters")]
    pub fn get_total_size(&self) -> usize {
        self.lock_engine().total_size
    }

    #[cfg(feature = "counters")]
    pub fn get_total_used(&self) -> usize {
        self.lock_engine().total_used
    }

    #[cfg(feature = "counters")]
    pub fn get_alloc_used_size_including_childs(&self) -> usize {
        self.assert_valid();
        let own = self.lock_engine().total_used;
        let children_total: usize = self
            .children
            .lock()
            .iter()
            .map(|c| unsafe { c.as_ref() }.get_alloc_used_size_including_childs())
            .sum();
        own + children_total
    }

    /// Chunk size that would result from requesting `req` bytes (spec ch.
    /// 6 `get_chunk_size`); independent of any particular allocator
    /// instance.
    pub fn get_chunk_size(req: usize) -> usize {
        crate::chunk::pad_request(req)
    }

    // -----------------------------------------------------------------
    // Destruction (spec ch. 3 "Lifecycle", ch. 4.5)
    // -----------------------------------------------------------------

    /// `allocator_cleanup(a)`: releases all regions but keeps `self` usable.
    pub fn cleanup(&self) {
        let mut e = self.lock_engine();
        unsafe {
            e.release_all_regions();
        }
    }

    /// Recursively destroys all children, releases `self`'s own regions,
    /// then stamps the validity code to zero. Does not unlink `self` from
    /// any parent's `children` list -- that's [`AllocatorHandle::delete`]'s
    /// job, since by the time this runs on a child, the parent may itself
    /// be mid-teardown and its `children` list about to be dropped wholesale.
    fn destroy_subtree(&mut self) {
        self.assert_valid();
        let children = std::mem::take(self.children.get_mut());
        for child in children {
            // SAFETY: `child` was pushed by `Allocator::new` and has not
            // been independently deleted (deleting a node always removes
            // it from its parent's list first, see `delete_handle`).
            let child_ref = unsafe { &mut *child.as_ptr() };
            child_ref.destroy_subtree();
            drop(unsafe { Box::from_raw(child.as_ptr()) });
        }
        unsafe {
            self.engine.get_mut().release_all_regions();
        }
        self.valid.store(DEAD_MAGIC, Ordering::Release);
    }

    /// `allocator_delete(a)` (spec ch. 6): unlinks `ptr` from its parent (if
    /// any), destroys its subtree, and reclaims its own memory.
    fn delete_handle(ptr: NonNull<Allocator>) {
        unsafe {
            let node = ptr.as_ref();
            if let Some(parent) = node.parent {
                parent.as_ref().children.lock().retain(|c| *c != ptr);
            }
        }
        let raw = ptr.as_ptr();
        unsafe {
            (*raw).destroy_subtree();
        }
        drop(unsafe { Box::from_raw(raw) });
    }
}

impl AllocatorHandle {
    /// Destroys this node and its entire subtree (spec ch. 6
    /// `allocator_delete`). The handle (and any copies of it) must not be
    /// used afterward.
    pub fn delete(self) {
        Allocator::delete_handle(self.0);
    }
}

impl AllocatorKind {
    fn from_type(t: AllocatorType) -> Self {
        match t {
            AllocatorType::Sys => AllocatorKind::Sys,
            AllocatorType::Pmem => AllocatorKind::Pmem,
        }
    }
}

// =======================================================================
// Process-wide state: root pool, `SYSTEM_ALLOC`, `PMEM_SYSTEM_ALLOC`
// (spec ch. 4.5, ch. 9 "Global state").
// =======================================================================

struct GlobalState {
    config: AllocatorConfig,
    root_pool: Option<RootPool>,
    system_alloc: AllocatorHandle,
    pmem_system_alloc: AllocatorHandle,
}

static GLOBAL: Mutex<Option<GlobalState>> = Mutex::new(None);

fn global_config() -> AllocatorConfig {
    GLOBAL.lock().as_ref().map(|g| g.config.clone()).unwrap_or_default()
}

fn global_root_pool() -> Option<&'static RootPool> {
    // SAFETY: `GlobalState`, once installed by `tballoc_init`, is never
    // moved or dropped except by `tballoc_clear`, which the caller must
    // ensure happens-after every outstanding allocator call completes
    // (spec ch. 5/9: init is single-threaded-before-use, teardown is
    // reverse-ordered and assumed not concurrent with live calls).
    let guard = GLOBAL.lock();
    guard.as_ref().and_then(|g| g.root_pool.as_ref()).map(|p| unsafe { &*(p as *const RootPool) })
}

/// Brings up the root-pool shards, `SYSTEM_ALLOC`, then `PMEM_SYSTEM_ALLOC`
/// (provisioning its buddy directory lazily), in that order (spec ch. 4.5,
/// `SPEC_FULL.md`'s supplement on `tballoc_init` sequencing). A second call
/// while already initialized is a no-op.
pub fn tballoc_init(config: AllocatorConfig) -> Result<(), AllocError> {
    if GLOBAL.lock().is_some() {
        return Ok(());
    }

    let root_pool = RootPool::new(&config);
    let system_alloc = Allocator::new_sys_inner(&config, root_pool.as_ref(), None, false);
    let pmem_system_alloc = match Allocator::new_pmem_inner(&config, None, false) {
        Ok(a) => a,
        Err(e) => {
            system_alloc.delete();
            if let Some(pool) = &root_pool {
                pool.teardown();
            }
            return Err(e);
        }
    };

    let mut guard = GLOBAL.lock();
    if guard.is_some() {
        // Lost a race with a concurrent `tballoc_init`; tear back down what
        // we just built and defer to whoever won.
        drop(guard);
        system_alloc.delete();
        pmem_system_alloc.delete();
        if let Some(pool) = &root_pool {
            pool.teardown();
        }
        return Ok(());
    }
    *guard = Some(GlobalState { config, root_pool, system_alloc, pmem_system_alloc });
    Ok(())
}

/// Reverses `tballoc_init`: `SYSTEM_ALLOC` then the shards, then
/// `PMEM_SYSTEM_ALLOC`, then the buddy file (unmap+unlink happens in
/// `PmemBuddy::drop`), matching spec ch. 9's teardown order. Both top-level
/// allocators become unreachable via [`system_alloc`]/[`pmem_system_alloc`]
/// afterward.
pub fn tballoc_clear() {
    let state = GLOBAL.lock().take();
    if let Some(state) = state {
        state.system_alloc.delete();
        if let Some(pool) = &state.root_pool {
            pool.teardown();
        }
        state.pmem_system_alloc.delete();
        // `state.root_pool`/PMEM buddy file drop here, last.
    }
}

/// The top-level SYS allocator (spec ch. 6 `SYSTEM_ALLOC`). `None` before
/// `tballoc_init` or after `tballoc_clear`.
pub fn system_alloc() -> Option<AllocatorHandle> {
    GLOBAL.lock().as_ref().map(|g| g.system_alloc)
}

/// The top-level PMEM allocator (spec ch. 6 `PMEM_SYSTEM_ALLOC`). `None`
/// before `tballoc_init` or after `tballoc_clear`.
pub fn pmem_system_alloc() -> Option<AllocatorHandle> {
    GLOBAL.lock().as_ref().map(|g| g.pmem_system_alloc)
}

/// Convenience used only by tests/examples that don't need a configured
/// `PMEM_DIR` to exist ahead of time.
pub fn ensure_pmem_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_alloc_and_free() {
        let a = Allocator::new_sys(None, false);
        let p = a.malloc(20).unwrap();
        unsafe {
            p.copy_from_nonoverlapping(b"Hello, World!\0".as_ptr(), 14);
        }
        #[cfg(feature = "counters")]
        assert_eq!(a.get_total_used(), Allocator::get_chunk_size(20));
        unsafe {
            a.free(p);
        }
        #[cfg(feature = "counters")]
        assert_eq!(a.get_total_used(), 0);
        a.delete();
    }

    #[test]
    fn calloc_zeroes() {
        let a = Allocator::new_sys(None, false);
        let p = a.calloc(5).unwrap();
        let slice = unsafe { std::slice::from_raw_parts(p, 5) };
        assert!(slice.iter().all(|&b| b == 0));
        unsafe {
            a.free(p);
        }
        a.delete();
    }

    #[test]
    fn valloc_alignment() {
        let a = Allocator::new_sys(None, false);
        let p = a.valloc(4096).unwrap();
        assert_eq!(p as usize % 4096, 0);
        unsafe {
            a.free(p);
        }
        #[cfg(feature = "counters")]
        assert_eq!(a.get_total_used(), 0);
        a.delete();
    }

    #[test]
    fn realloc_growth() {
        let a = Allocator::new_sys(None, false);
        let p = a.malloc(20).unwrap();
        let p2 = unsafe { a.realloc(p, 1000).unwrap() };
        #[cfg(feature = "counters")]
        assert_eq!(a.get_total_used(), Allocator::get_chunk_size(1000));
        unsafe {
            a.free(p2);
        }
        #[cfg(feature = "counters")]
        assert_eq!(a.get_total_used(), 0);
        a.delete();
    }

    #[cfg(feature = "counters")]
    #[test]
    fn child_rollup() {
        let parent = Allocator::new_sys(None, false);
        let p1 = parent.malloc(1000).unwrap();
        let child = Allocator::new_sys(Some(parent), false);
        let p2 = child.malloc(1000).unwrap();
        assert_eq!(parent.get_alloc_used_size_including_childs(), 2 * Allocator::get_chunk_size(1000));
        unsafe {
            parent.free(p1);
            child.free(p2);
        }
        parent.delete();
    }

    #[test]
    fn delete_invalidates() {
        let a = Allocator::new_sys(None, false);
        let raw: *const Allocator = &*a;
        a.delete();
        assert_eq!(unsafe { (*raw).valid.load(Ordering::Acquire) }, DEAD_MAGIC);
    }

    #[test]
    fn deleting_parent_tears_down_child() {
        let parent = Allocator::new_sys(None, false);
        let child = Allocator::new_sys(Some(parent), false);
        let raw: *const Allocator = &*child;
        parent.delete();
        assert_eq!(unsafe { (*raw).valid.load(Ordering::Acquire) }, DEAD_MAGIC);
    }

    #[test]
    fn init_and_clear_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AllocatorConfig::default();
        cfg.pmem_dir = dir.path().to_path_buf();
        cfg.root_allocator_cnt = 2;
        cfg.root_allocator_reserved_size = 0;
        tballoc_init(cfg).unwrap();
        assert!(system_alloc().is_some());
        assert!(pmem_system_alloc().is_some());
        tballoc_clear();
        assert!(system_alloc().is_none());
        assert!(pmem_system_alloc().is_none());
    }
}
