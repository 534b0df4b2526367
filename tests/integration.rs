//! End-to-end scenarios, round-trip laws, and boundary behaviors (spec ch.
//! 8), exercised through the public [`hmalloc::facade::Allocator`] API only
//! -- this crate has no visibility into `RegionEngine` internals, same as
//! any downstream consumer.

use hmalloc::config::AllocatorConfig;
use hmalloc::facade::Allocator;

fn chunk_size(n: usize) -> usize {
    Allocator::get_chunk_size(n)
}

/// `tballoc_init`/`tballoc_clear` touch process-wide global state; serialize
/// the handful of tests that exercise them so they don't observe each
/// other's configuration mid-test.
static GLOBAL_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

// ---------------------------------------------------------------------
// End-to-end scenarios (spec ch. 8)
// ---------------------------------------------------------------------

#[test]
fn scenario_small_alloc_and_free() {
    let a = Allocator::new_sys(None, false);
    let p = a.malloc(20).unwrap();
    unsafe {
        p.copy_from_nonoverlapping(b"Hello, World!\0".as_ptr(), 14);
    }
    #[cfg(feature = "counters")]
    assert_eq!(a.get_total_used(), chunk_size(20));
    unsafe {
        a.free(p);
    }
    #[cfg(feature = "counters")]
    assert_eq!(a.get_total_used(), 0);
    a.delete();
}

#[test]
fn scenario_calloc_zeroes() {
    let a = Allocator::new_sys(None, false);
    let p = a.calloc(5).unwrap();
    let bytes = unsafe { std::slice::from_raw_parts(p, 5) };
    assert!(bytes.iter().all(|&b| b == 0));
    unsafe {
        a.free(p);
    }
    a.delete();
}

#[test]
fn scenario_valloc_alignment() {
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
fn scenario_realloc_growth() {
    let a = Allocator::new_sys(None, false);
    let p = a.malloc(20).unwrap();
    let p2 = unsafe { a.realloc(p, 1000).unwrap() };
    #[cfg(feature = "counters")]
    assert_eq!(a.get_total_used(), chunk_size(1000));
    unsafe {
        a.free(p2);
    }
    #[cfg(feature = "counters")]
    assert_eq!(a.get_total_used(), 0);
    a.delete();
}

#[cfg(feature = "counters")]
#[test]
fn scenario_child_rollup() {
    let parent = Allocator::new_pmem(None, false).unwrap();
    let p1 = parent.malloc(1000).unwrap();
    let child = Allocator::new_pmem(Some(parent), false).unwrap();
    let p2 = child.malloc(1000).unwrap();
    assert_eq!(parent.get_alloc_used_size_including_childs(), 2 * chunk_size(1000));
    unsafe {
        parent.free(p1);
        child.free(p2);
    }
    parent.delete();
}

#[test]
fn scenario_out_of_memory() {
    let _guard = GLOBAL_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = std::env::temp_dir().join(format!("hmalloc-it-oom-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    hmalloc::ensure_pmem_dir(&dir).unwrap();

    let mut cfg = AllocatorConfig::default();
    cfg.pmem_dir = dir.clone();
    cfg.pmem_max_size = 1 << 20;
    cfg.pmem_alloc_size = 1 << 20;
    cfg.root_allocator_cnt = 0;

    hmalloc::tballoc_init(cfg).unwrap();
    let pmem = hmalloc::pmem_system_alloc().unwrap();

    let p = pmem.malloc(2 << 20);
    assert!(p.is_none());
    #[cfg(feature = "counters")]
    assert_eq!(pmem.get_total_used(), 0);

    hmalloc::tballoc_clear();
    assert!(hmalloc::system_alloc().is_none());
    assert!(hmalloc::pmem_system_alloc().is_none());

    let _ = std::fs::remove_dir_all(&dir);
}

// ---------------------------------------------------------------------
// Round-trip laws (spec ch. 8)
// ---------------------------------------------------------------------

#[test]
fn roundtrip_matched_malloc_free_drains_usage() {
    let a = Allocator::new_sys(None, false);
    let mut ptrs = Vec::new();
    for i in 0..200 {
        let size = 8 + (i * 17) % 4000;
        ptrs.push(a.malloc(size).unwrap());
    }
    for p in ptrs.into_iter().rev() {
        unsafe {
            a.free(p);
        }
    }
    #[cfg(feature = "counters")]
    assert_eq!(a.get_total_used(), 0);
    a.delete();
}

#[test]
fn roundtrip_malloc_reports_exact_chunk_size_delta() {
    let a = Allocator::new_sys(None, false);
    for &n in &[1usize, 7, 8, 23, 512, 1 << 16] {
        #[cfg(feature = "counters")]
        let before = a.get_total_used();
        let p = a.malloc(n).unwrap();
        #[cfg(feature = "counters")]
        assert_eq!(a.get_total_used() - before, chunk_size(n));
        unsafe {
            a.free(p);
        }
    }
    a.delete();
}

#[test]
fn roundtrip_valloc_aligned_and_freeable() {
    let a = Allocator::new_sys(None, false);
    for &n in &[1usize, 100, 4096, 9000] {
        let p = a.valloc(n).unwrap();
        assert_eq!(p as usize % 4096, 0);
        unsafe {
            a.free(p);
        }
    }
    a.delete();
}

#[test]
fn roundtrip_realloc_preserves_prefix_bytes() {
    let a = Allocator::new_sys(None, false);
    let p = a.malloc(64).unwrap();
    unsafe {
        for i in 0..64u8 {
            p.add(i as usize).write(i);
        }
    }
    let grown = unsafe { a.realloc(p, 4096).unwrap() };
    unsafe {
        for i in 0..64u8 {
            assert_eq!(grown.add(i as usize).read(), i);
        }
    }
    let shrunk = unsafe { a.realloc(grown, 10).unwrap() };
    unsafe {
        for i in 0..10u8 {
            assert_eq!(shrunk.add(i as usize).read(), i);
        }
        a.free(shrunk);
    }
    a.delete();
}

// ---------------------------------------------------------------------
// Boundary behaviors (spec ch. 8)
// ---------------------------------------------------------------------

#[test]
fn boundary_minimum_and_near_maximum_requests_never_corrupt() {
    let a = Allocator::new_sys(None, false);
    let p_min = a.malloc(1).unwrap();
    unsafe {
        a.free(p_min);
    }

    // Near-maximum: either succeeds, or returns null -- never a panic / UB.
    let huge = usize::MAX / 2;
    let p_huge = a.malloc(huge);
    if let Some(p) = p_huge {
        unsafe {
            a.free(p);
        }
    }
    a.delete();
}

#[test]
fn boundary_growth_through_multiple_regions_then_reverse_free() {
    let _guard = GLOBAL_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut cfg = AllocatorConfig::default();
    cfg.root_allocator_cnt = 0;
    cfg.system_memory_init_size = 4096;
    cfg.system_memory_expand_size = 4096;
    let _ = hmalloc::tballoc_clear();
    hmalloc::tballoc_init(cfg.clone()).unwrap();
    let a = hmalloc::system_alloc().unwrap();

    let mut ptrs = Vec::new();
    for _ in 0..64 {
        ptrs.push(a.malloc(2048).unwrap());
    }
    for p in ptrs.into_iter().rev() {
        unsafe {
            a.free(p);
        }
    }
    #[cfg(feature = "counters")]
    assert_eq!(a.get_total_used(), 0);

    hmalloc::tballoc_clear();
}

#[test]
fn boundary_many_children_then_delete_parent_reclaims_all() {
    let parent = Allocator::new_sys(None, false);
    let mut children = Vec::new();
    for _ in 0..1024 {
        let child = Allocator::new_sys(Some(parent), false);
        child.malloc(16).unwrap();
        children.push(child);
    }
    // `parent.delete()` recursively tears down every child; none of the
    // 1024 handles above need an explicit free/delete call first.
    parent.delete();
}

// ---------------------------------------------------------------------
// Randomized invariant check (SPEC_FULL.md ambient "Test tooling": proptest
// over random malloc/free sequences against a reference model).
// ---------------------------------------------------------------------

proptest::proptest! {
    #[test]
    fn random_malloc_free_sequences_keep_total_used_consistent(
        ops in proptest::collection::vec((0usize..4096, proptest::bool::ANY), 1..300)
    ) {
        let a = Allocator::new_sys(None, false);
        let mut live: Vec<(*mut u8, usize)> = Vec::new();
        let mut expected_used = 0usize;

        for (size, do_free) in ops {
            if do_free && !live.is_empty() {
                let (p, n) = live.swap_remove(fastrand::usize(..live.len()));
                unsafe {
                    a.free(p);
                }
                expected_used -= chunk_size(n);
            } else if let Some(p) = a.malloc(size.max(1)) {
                live.push((p, size.max(1)));
                expected_used += chunk_size(size.max(1));
            }

            #[cfg(feature = "counters")]
            proptest::prop_assert_eq!(a.get_total_used(), expected_used);
        }

        for (p, n) in live {
            unsafe {
                a.free(p);
            }
            expected_used -= chunk_size(n);
        }
        proptest::prop_assert_eq!(expected_used, 0);
        a.delete();
    }
}
