//! The two non-pooled page suppliers (spec ch. 2 "Page supplier"): anonymous
//! `mmap` and the host allocator (`FORCE_NATIVE_ALLOC_USE`).
//!
//! Grounded in `examples/original_source/region_alloc.c`'s direct-mmap
//! fallback path (used whenever the root pool is disabled or a PMEM/SYS
//! allocator isn't routed through it) and its `force_native` branch, which
//! calls the host `malloc` instead of requesting fresh pages from the
//! kernel. Both variants return `(base, actual_size)` since `mmap` only ever
//! hands back page-granular memory and the host allocator may round up.

use crate::ptr_utils::page_size;

/// Rounds `size` up to a multiple of the system page size.
#[inline]
fn round_to_page(size: usize) -> usize {
    let page = page_size();
    (size + page - 1) & !(page - 1)
}

/// Requests an anonymous, zero-filled mapping of at least `size` bytes
/// (spec ch. 2: "anonymous mmap" page supplier).
///
/// # Safety
/// None beyond the ordinary rules for calling into libc; the returned
/// memory is valid for `size` (the second element of the tuple) bytes until
/// released via [`munmap_anon`].
pub unsafe fn mmap_anon(size: usize) -> Option<(*mut u8, usize)> {
    let size = round_to_page(size);
    let ptr = libc::mmap(
        std::ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    if ptr == libc::MAP_FAILED {
        log::debug!("mmap_anon: failed to map {size} bytes: {}", std::io::Error::last_os_error());
        None
    } else {
        Some((ptr as *mut u8, size))
    }
}

/// Releases a mapping previously returned by [`mmap_anon`].
///
/// # Safety
/// `ptr`/`size` must be exactly the pair returned by a prior `mmap_anon`
/// call, not already unmapped.
pub unsafe fn munmap_anon(ptr: *mut u8, size: usize) {
    if libc::munmap(ptr as *mut libc::c_void, size) != 0 {
        log::debug!("munmap_anon: failed to unmap {size} bytes at {ptr:p}: {}", std::io::Error::last_os_error());
    }
}

/// Routes a region request through the host allocator instead of `mmap`
/// (spec ch. 6 `FORCE_NATIVE_ALLOC_USE`). Allocations are over-aligned to
/// the system page size so the region header still lands on a page
/// boundary, matching the layout the rest of the engine assumes.
///
/// # Safety
/// None beyond the ordinary rules for calling into libc.
pub unsafe fn native_alloc(size: usize) -> Option<(*mut u8, usize)> {
    let size = round_to_page(size);
    let align = page_size();
    let layout = std::alloc::Layout::from_size_align(size, align).ok()?;
    let ptr = std::alloc::alloc(layout);
    if ptr.is_null() {
        None
    } else {
        Some((ptr, size))
    }
}

/// Releases memory previously returned by [`native_alloc`]. The original
/// size must be recovered by the caller (the region header stores it);
/// `Layout` is rebuilt on the release path the same way it was on
/// acquisition.
///
/// # Safety
/// `ptr` must have been returned by a prior `native_alloc` call with the
/// given `size`, not already freed.
pub unsafe fn native_free(ptr: *mut u8, size: usize) {
    let align = page_size();
    if let Ok(layout) = std::alloc::Layout::from_size_align(size, align) {
        std::alloc::dealloc(ptr, layout);
    }
}
