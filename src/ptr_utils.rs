//! Generic utilities for pointer handling and sizing.

pub const WORD_SIZE: usize = std::mem::size_of::<usize>();
pub const ALIGN: usize = std::mem::align_of::<usize>();

/// Aligns `ptr` up to the next `align_mask + 1`.
///
/// `align_mask` must be a power of two minus one.
#[inline]
pub fn align_up_by(ptr: *mut u8, align_mask: usize) -> *mut u8 {
    debug_assert!((align_mask + 1).is_power_of_two());

    ptr.wrapping_add(((ptr as usize + align_mask) & !align_mask) - ptr as usize)
}

#[inline]
pub fn align_down(ptr: *mut u8) -> *mut u8 {
    ptr.wrapping_sub(ptr as usize % ALIGN)
}

#[inline]
pub fn align_up_overflows(ptr: *mut u8) -> bool {
    ALIGN - 1 > usize::MAX - ptr as usize
}

#[inline]
pub fn align_up(ptr: *mut u8) -> *mut u8 {
    debug_assert!(!align_up_overflows(ptr));

    let offset_ptr = ptr.wrapping_add(ALIGN - 1);
    offset_ptr.wrapping_sub(offset_ptr as usize % ALIGN)
}

/// Rounds `size` up to a multiple of 8 (`MALLOC_ALIGNMENT`).
#[inline]
pub const fn align8(size: usize) -> usize {
    (size + 7) & !7
}

/// The OS page size, used by `valloc` and the anonymous-mmap page supplier.
#[inline]
pub fn page_size() -> usize {
    // SAFETY: sysconf with a read-only, well-known name is always sound.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(test)]
mod tests {
    use std::ptr::null_mut;

    use super::*;

    #[test]
    fn align_ptr_test() {
        assert!(!align_up_overflows(null_mut()));
        assert!(!align_up_overflows(null_mut::<u8>().wrapping_sub(ALIGN)));
        assert!(align_up_overflows(null_mut::<u8>().wrapping_sub(ALIGN - 1)));

        assert!(align_up(null_mut()) == null_mut());
        assert!(align_down(null_mut()) == null_mut());

        assert!(align_up(null_mut::<u8>().wrapping_add(1)) == null_mut::<u8>().wrapping_add(ALIGN));
        assert!(align_down(null_mut::<u8>().wrapping_add(1)) == null_mut::<u8>());
    }

    #[test]
    fn align8_test() {
        assert_eq!(align8(0), 0);
        assert_eq!(align8(1), 8);
        assert_eq!(align8(8), 8);
        assert_eq!(align8(9), 16);
    }
}
