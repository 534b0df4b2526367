//! Debug red-zone wrapping layer (spec ch. 4.6), gated behind the `redzone`
//! feature.
//!
//! Grounded in `examples/original_source/alloc_dbginfo.h`'s guard-byte scheme.
//! Per spec ch. 9's design note ("model this as a wrapping layer above the
//! core that widens requests and verifies the padding, so the core engine
//! never needs conditional compilation for it"), this module never touches
//! `engine.rs`: it widens every request by a [`DbgInfo`] header plus a
//! front and rear redzone, and hands the core [`crate::facade::Allocator`]
//! nothing but a bigger `malloc`.
//!
//! Layout of one wrapped allocation, front to back:
//! `[ DbgInfo | front redzone (8) | ...payload... | rear redzone (8) ]`

use std::mem::size_of;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::facade::Allocator;

const FRONT_REDZONE: u8 = 0xA7;
const REAR_REDZONE: u8 = 0x9D;
const POISON_BYTE: u8 = 0xCA;
const REDZONE_SIZE: usize = 8;

/// Per-allocation debug metadata (spec ch. 4.6): call site, requested size,
/// an optional back-pointer to the allocator that served it, and a
/// wall-clock timestamp. Purely diagnostic -- never consulted by `free`'s
/// correctness logic, only by its corruption report.
#[repr(C)]
struct DbgInfo {
    file: &'static str,
    line: u32,
    requested_size: usize,
    allocator: *const Allocator,
    timestamp_millis: u64,
}

const HEADER_SIZE: usize = size_of::<DbgInfo>();

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Widens a `requested` byte request to the full wrapped size.
fn wrapped_size(requested: usize) -> usize {
    HEADER_SIZE + REDZONE_SIZE + requested + REDZONE_SIZE
}

unsafe fn dbginfo_ptr(base: *mut u8) -> *mut DbgInfo {
    base as *mut DbgInfo
}

unsafe fn front_redzone_ptr(base: *mut u8) -> *mut u8 {
    base.add(HEADER_SIZE)
}

unsafe fn payload_ptr(base: *mut u8) -> *mut u8 {
    base.add(HEADER_SIZE + REDZONE_SIZE)
}

unsafe fn rear_redzone_ptr(base: *mut u8, requested_size: usize) -> *mut u8 {
    payload_ptr(base).add(requested_size)
}

unsafe fn base_of_payload(payload: *mut u8) -> *mut u8 {
    payload.sub(HEADER_SIZE + REDZONE_SIZE)
}

/// Allocates `n` bytes through `allocator`, wrapped in redzones and a debug
/// header recording `file`/`line` (spec ch. 4.6).
#[track_caller]
pub fn malloc(allocator: &Allocator, n: usize) -> Option<*mut u8> {
    let loc = std::panic::Location::caller();
    let base = allocator.malloc(wrapped_size(n))?;
    unsafe {
        dbginfo_ptr(base).write(DbgInfo {
            file: loc.file(),
            line: loc.line(),
            requested_size: n,
            allocator: allocator as *const Allocator,
            timestamp_millis: now_millis(),
        });
        front_redzone_ptr(base).write_bytes(FRONT_REDZONE, REDZONE_SIZE);
        rear_redzone_ptr(base, n).write_bytes(REAR_REDZONE, REDZONE_SIZE);
        Some(payload_ptr(base))
    }
}

/// Verifies both redzones around `payload` are intact, logging and
/// returning `false` (rather than panicking) on the first corrupted byte
/// found so the caller can decide whether to abort (spec ch. 4.6/ch. 7:
/// corruption here is a fatal-class condition once surfaced through
/// [`crate::error::AllocError`]).
unsafe fn check_redzones(base: *mut u8) -> bool {
    let info = &*dbginfo_ptr(base);
    let front = std::slice::from_raw_parts(front_redzone_ptr(base), REDZONE_SIZE);
    let rear = std::slice::from_raw_parts(rear_redzone_ptr(base, info.requested_size), REDZONE_SIZE);
    let front_ok = front.iter().all(|&b| b == FRONT_REDZONE);
    let rear_ok = rear.iter().all(|&b| b == REAR_REDZONE);
    if !front_ok || !rear_ok {
        log::error!(
            "hmalloc: redzone corruption on allocation from {}:{} (requested {} bytes, allocated {:?}ms ago): front_ok={front_ok} rear_ok={rear_ok}",
            info.file,
            info.line,
            info.requested_size,
            now_millis().saturating_sub(info.timestamp_millis),
        );
    }
    front_ok && rear_ok
}

/// Frees a pointer previously returned by [`malloc`], first verifying its
/// redzones and then poisoning the payload bytes (spec ch. 4.6: "payload
/// poisoned with a fixed byte on free in debug builds").
///
/// # Safety
/// `payload` must be a pointer this module previously handed back, not
/// already freed.
pub unsafe fn free(allocator: &Allocator, payload: *mut u8) {
    let base = base_of_payload(payload);
    let info_size = (*dbginfo_ptr(base)).requested_size;
    if !check_redzones(base) {
        crate::error::AllocError::InvalidFree { ptr: payload, reason: "redzone corruption detected on free" }
            .handle();
    }
    payload_ptr(base).write_bytes(POISON_BYTE, info_size);
    allocator.free(base);
}
