//! ViperDOS kernel core.
//!
//! The capability, IPC, poll, process, and assign machinery of ViperDOS for
//! the QEMU virt machine. Boot code, trap entry, device drivers, the
//! on-disk filesystem, and the network and TLS stacks are separate
//! components that link against this crate and attach through the hooks it
//! exposes (console sink, scheduler hooks, input probe, net providers).

#![cfg_attr(not(test), no_std)]
#![cfg_attr(all(not(test), target_os = "none"), feature(alloc_error_handler))]

extern crate alloc;

// Core library (error handling, logging, time)
pub mod error;
pub mod printk;
pub mod prng;
pub mod ringbuf;
pub mod time;
// Shared user/kernel ABI structures
pub mod abi;
// Capability system
pub mod cap;
// Kernel objects
pub mod kobj;
// IPC: channels, poll, poll sets
pub mod ipc;
// Task registry and scheduling seams
pub mod task;
// Memory accounting and address spaces
pub mod mm;
// Viper process model
pub mod viper;
// Assign namespace
pub mod assign;
// Filesystem interface and ramfs
pub mod vfs;
// Syscall dispatch
pub mod syscall;
// Heap allocator (bare-metal)
pub mod heap;
// Panic handler (bare-metal)
pub mod panic;

#[cfg(test)]
pub mod test_utils;
#[cfg(test)]
mod tests;

/// Bring up the kernel core subsystems. Called once from the boot path
/// after the heap is available.
pub fn init() {
    time::init_boot_timestamp();
    prng::seed(time::now_ms() ^ 0xA5A5_5A5A_DEAD_BEEF);
    viper::init();
    ipc::channel::init();
    ipc::poll::init();
    ipc::pollset::init();
    assign::init();
    crate::log_event!("KERNEL", "CORE_READY");
}

/// Timer tick entry point, called from the platform timer interrupt.
pub fn timer_tick() {
    ipc::poll::check_timers();
}
