//! System time in milliseconds since boot.
//!
//! On bare-metal AArch64 the generic timer counter is the time source. On
//! other targets (and in host tests) a tick counter advanced by the timer
//! interrupt path stands in.

use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
static TICKS_MS: AtomicU64 = AtomicU64::new(0);

static BOOT_MS: AtomicU64 = AtomicU64::new(0);

/// Current monotonic time in milliseconds.
pub fn now_ms() -> u64 {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    unsafe {
        let mut cntpct: u64;
        core::arch::asm!("mrs {0}, cntpct_el0", out(reg) cntpct);
        let mut cntfrq: u64;
        core::arch::asm!("mrs {0}, cntfrq_el0", out(reg) cntfrq);
        if cntfrq > 0 {
            cntpct * 1000 / cntfrq
        } else {
            // QEMU sometimes leaves the frequency register unset
            cntpct / 62_500
        }
    }

    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    TICKS_MS.load(Ordering::Relaxed)
}

/// Advance the fallback tick counter. Called from the timer interrupt path on
/// targets without a hardware counter, and from tests.
#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub fn advance_ms(ms: u64) {
    TICKS_MS.fetch_add(ms, Ordering::Relaxed);
}

/// Record the boot timestamp so uptime can be reported relative to it.
pub fn init_boot_timestamp() {
    BOOT_MS.store(now_ms(), Ordering::Relaxed);
}

pub fn uptime_ms() -> u64 {
    now_ms().saturating_sub(BOOT_MS.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_moves_the_clock() {
        let before = now_ms();
        advance_ms(25);
        assert!(now_ms() >= before + 25);
    }
}
