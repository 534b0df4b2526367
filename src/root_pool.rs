//! Sharded root pool: N preconfigured ROOT-type region engines dispatched
//! by try-lock round robin (spec ch. 4.4).
//!
//! Grounded in `examples/original_source/region_alloc.c`'s
//! `root_allocator_new`/`tb_root_malloc`/`tb_root_free` and
//! `tb_mutex.h`'s `mutex_array_lockany`. Per `SPEC_FULL.md`'s supplement,
//! shard locking goes through a `Vec<Mutex<RegionEngine>>` the pool owns
//! directly (the original's `child_mutexs[]` array, separate from each
//! shard's otherwise-unused per-instance mutex field) rather than a second
//! mutex field on each engine.

use std::sync::Mutex;

use crate::config::AllocatorConfig;
use crate::engine::{GrowthConfig, PageSupplier, RegionEngine};
use crate::region::AllocatorKind;

/// Bytes of prefix written before the pointer `tb_root_malloc` hands back,
/// recording which shard owns the allocation so `tb_root_free` can dispatch
/// without searching (spec ch. 4.4).
pub const SHARD_PREFIX_SIZE: usize = 16;

pub struct RootPool {
    shards: Vec<Mutex<Box<RegionEngine>>>,
}

// SAFETY: each shard is independently guarded by its own `Mutex`; cross-
// shard state (the `Vec` itself) is never mutated after `RootPool::new`.
unsafe impl Sync for RootPool {}

impl RootPool {
    /// Builds `cfg.root_allocator_cnt` shards, each a ROOT-type
    /// [`RegionEngine`] reusing freed regions up to
    /// `cfg.root_allocator_reuse_size` (spec ch. 4.4 "Reuse mode"), and
    /// pre-warms each with one allocation of `cfg.root_allocator_reserved_size`
    /// bytes immediately shrunk to 1 byte (`SPEC_FULL.md` supplement on
    /// `root_allocator_new`). Returns `None` if the pool is disabled
    /// (`cfg.root_allocator_cnt == 0`).
    pub fn new(cfg: &AllocatorConfig) -> Option<Self> {
        if cfg.root_allocator_cnt == 0 {
            return None;
        }

        let mut shards = Vec::with_capacity(cfg.root_allocator_cnt);
        for idx in 0..cfg.root_allocator_cnt {
            let growth = GrowthConfig {
                init_size: cfg.system_memory_init_size,
                expand_size: cfg.system_memory_expand_size,
                min_expand_lower_bound: cfg.region_alloc_min_expand_lower_bound,
                min_expand_upper_bound: cfg.region_alloc_min_expand_upper_bound,
                root_pool_backed: false,
                max_req_size: cfg.max_req_memory_size,
            };
            let supplier = if cfg.force_native_alloc_use { PageSupplier::NativeMalloc } else { PageSupplier::Mmap };
            let mut engine = Box::new(RegionEngine::new(AllocatorKind::Root, supplier, growth));
            unsafe {
                engine.init_region_list();
            }
            engine.shard_index = Some(idx as u8);
            if cfg.root_allocator_reuse_size > 0 {
                engine.reuse_limit = Some(cfg.root_allocator_reuse_size);
            }

            if cfg.root_allocator_reserved_size > 0 {
                unsafe {
                    if let Some(p) = engine.malloc(cfg.root_allocator_reserved_size) {
                        let _ = engine.realloc(p, 1);
                    }
                }
            }

            shards.push(Mutex::new(engine));
        }

        Some(RootPool { shards })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Try-lock round robin starting at `start`, falling back to a
    /// blocking lock on `start` itself if every shard's try-lock fails
    /// (`SPEC_FULL.md` supplement on `mutex_array_lockany`: the fallback
    /// target is always the original start slot, not the last slot tried).
    fn lock_any(&self, start: usize) -> (usize, std::sync::MutexGuard<'_, Box<RegionEngine>>) {
        let n = self.shards.len();
        let start = start % n;
        let mut slot = start;
        loop {
            if let Ok(guard) = self.shards[slot].try_lock() {
                return (slot, guard);
            }
            slot = (slot + 1) % n;
            if slot == start {
                log::debug!("root pool: all {n} shards contended, falling back to blocking lock on shard {start}");
                return (start, self.shards[start].lock().unwrap_or_else(|e| e.into_inner()));
            }
        }
    }

    /// Allocates `bytes` from some shard, writing the shard index into a
    /// [`SHARD_PREFIX_SIZE`]-byte header before the returned payload (spec
    /// ch. 4.4 `tb_root_malloc`).
    pub fn malloc(&self, bytes: usize) -> Option<*mut u8> {
        let start = thread_index() % self.shards.len();
        let (idx, mut guard) = self.lock_any(start);
        unsafe {
            let ptr = guard.malloc(bytes + SHARD_PREFIX_SIZE)?;
            (ptr as *mut u32).write(idx as u32);
            Some(ptr.add(SHARD_PREFIX_SIZE))
        }
    }

    /// Frees a pointer previously returned by [`RootPool::malloc`] (spec
    /// ch. 4.4 `tb_root_free`): reads the shard index out of the prefix,
    /// locks that shard specifically, frees.
    pub fn free(&self, ptr: *mut u8) {
        unsafe {
            let base = ptr.sub(SHARD_PREFIX_SIZE);
            let idx = (base as *const u32).read() as usize;
            debug_assert!(idx < self.shards.len());
            let mut guard = self.shards[idx].lock().unwrap_or_else(|e| e.into_inner());
            let _ = guard.free(base);
        }
    }

    /// Used by [`crate::engine::PageSupplier::RootPool`]: acquires a
    /// region-sized block from whichever shard is least contended. The
    /// returned size is the usable size the caller asked for; the shard
    /// prefix accounting stays internal to [`RootPool::malloc`]/[`RootPool::free`].
    pub fn acquire_region(&self, size: usize) -> Option<(*mut u8, usize)> {
        self.malloc(size).map(|p| (p, size))
    }

    /// Used by [`crate::engine::PageSupplier::RootPool`].
    pub fn release_region(&self, ptr: *mut u8, _size: usize) {
        self.free(ptr);
    }

    /// Releases every shard's regions (used by `tballoc_clear`'s
    /// teardown, spec ch. 9: "shards, then buddy file unmapping").
    pub fn teardown(&self) {
        for shard in &self.shards {
            let mut guard = shard.lock().unwrap_or_else(|e| e.into_inner());
            unsafe {
                guard.release_all_regions();
            }
        }
    }
}

#[cfg(not(target_os = "windows"))]
fn thread_index() -> usize {
    // A stand-in for the original's `tb_get_thrid()`: any stable per-thread
    // integer works since it only seeds the round-robin start slot.
    thread_local! {
        static TID: std::cell::Cell<usize> = std::cell::Cell::new(0);
    }
    TID.with(|t| {
        if t.get() == 0 {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            use std::hash::{Hash, Hasher};
            std::thread::current().id().hash(&mut hasher);
            t.set(hasher.finish() as usize | 1);
        }
        t.get()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg(shards: usize) -> AllocatorConfig {
        let mut cfg = AllocatorConfig::default();
        cfg.root_allocator_cnt = shards;
        cfg.root_allocator_reserved_size = 0;
        cfg
    }

    #[test]
    fn disabled_when_zero_shards() {
        assert!(RootPool::new(&test_cfg(0)).is_none());
    }

    #[test]
    fn malloc_free_roundtrip() {
        let pool = RootPool::new(&test_cfg(4)).unwrap();
        let p = pool.malloc(128).unwrap();
        unsafe {
            p.write_bytes(0x42, 128);
        }
        pool.free(p);
        pool.teardown();
    }

    #[test]
    fn many_shards_distribute_allocations() {
        let pool = RootPool::new(&test_cfg(8)).unwrap();
        let ptrs: Vec<_> = (0..64).map(|_| pool.malloc(64).unwrap()).collect();
        for p in ptrs {
            pool.free(p);
        }
        pool.teardown();
    }
}
