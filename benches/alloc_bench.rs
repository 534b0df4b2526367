//! Micro-benchmarks for the SYS-type engine, the root pool, and the PMEM
//! buddy allocator. Replaces the teacher's multi-allocator shootout
//! (`benches/`/`benchmarks/` compared against `linked_list_allocator`,
//! `dlmalloc`, `jemallocator`, etc.) with benchmarks scoped to this crate's
//! own three page suppliers, since there's no longer a family of sibling
//! allocators in the workspace to shoot out against.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hmalloc::{config::AllocatorConfig, facade::Allocator};

fn random_actions_sys(c: &mut Criterion) {
    let mut group = c.benchmark_group("sys_random_actions");
    for &n in &[64usize, 512, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let a = Allocator::new_sys(None, false);
                let mut live = Vec::with_capacity(n);
                for i in 0..n {
                    let size = 8 + (fastrand::usize(..) % 256);
                    if fastrand::bool() && !live.is_empty() {
                        let idx = i % live.len();
                        let p: *mut u8 = live.swap_remove(idx);
                        unsafe {
                            a.free(p);
                        }
                    } else if let Some(p) = a.malloc(size) {
                        live.push(black_box(p));
                    }
                }
                for p in live {
                    unsafe {
                        a.free(p);
                    }
                }
                a.delete();
            });
        });
    }
    group.finish();
}

fn root_pool_contention(c: &mut Criterion) {
    let mut cfg = AllocatorConfig::default();
    cfg.root_allocator_cnt = 4;
    let _ = hmalloc::tballoc_clear();
    hmalloc::tballoc_init(cfg).unwrap();
    let sys = Allocator::new_sys(None, false);

    c.bench_function("root_pool_backed_malloc_free", |b| {
        b.iter(|| {
            let p = sys.malloc(128).unwrap();
            unsafe {
                sys.free(black_box(p));
            }
        });
    });

    hmalloc::tballoc_clear();
}

fn pmem_malloc_free(c: &mut Criterion) {
    let dir = std::env::temp_dir().join("hmalloc-bench-pmem");
    let _ = std::fs::remove_dir_all(&dir);
    hmalloc::ensure_pmem_dir(&dir).unwrap();
    let mut cfg = AllocatorConfig::default();
    cfg.pmem_dir = dir.clone();
    cfg.pmem_max_size = 16 << 20;
    cfg.root_allocator_cnt = 0;
    let _ = hmalloc::tballoc_clear();
    hmalloc::tballoc_init(cfg).unwrap();
    let pmem = hmalloc::pmem_system_alloc().unwrap();

    c.bench_function("pmem_buddy_malloc_free", |b| {
        b.iter(|| {
            let p = pmem.malloc(4096).unwrap();
            unsafe {
                pmem.free(black_box(p));
            }
        });
    });

    hmalloc::tballoc_clear();
    let _ = std::fs::remove_dir_all(&dir);
}

criterion_group!(benches, random_actions_sys, root_pool_contention, pmem_malloc_free);
criterion_main!(benches);
