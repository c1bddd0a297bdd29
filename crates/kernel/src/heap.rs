//! Kernel heap allocator.
//!
//! Bare-metal builds use `linked_list_allocator` behind a spin lock; the
//! boot path hands the heap region to `init` once the memory map is known.
//! Hosted builds (tests) use the platform allocator instead.

#![allow(dead_code)]

use linked_list_allocator::LockedHeap;

#[cfg(all(not(test), target_os = "none"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(any(test, not(target_os = "none")))]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Initialize the kernel heap over `[start, start + size)`.
///
/// # Safety
/// The region must be unused RAM, mapped writable, and passed exactly once.
pub unsafe fn init(start: usize, size: usize) {
    ALLOCATOR.lock().init(start as *mut u8, size);
    crate::info!("heap: initialized {} KiB at {:#x}", size / 1024, start);
}

/// Free bytes remaining in the kernel heap region.
pub fn free_bytes() -> usize {
    ALLOCATOR.lock().free()
}

/// Used bytes in the kernel heap region.
pub fn used_bytes() -> usize {
    ALLOCATOR.lock().used()
}

#[cfg(all(not(test), target_os = "none"))]
#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    panic!("heap: allocation failure: {:?}", layout);
}
