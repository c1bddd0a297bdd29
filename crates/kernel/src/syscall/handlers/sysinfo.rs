// System information syscall handlers (0xE0-0xEF)

use crate::abi::{self, DeviceInfo, MemInfo, NetStats};
use crate::error::Verr;
use crate::mm::phys;
use crate::syscall::uaccess::{copy_to_user, validate_user_write, write_user_struct};
use crate::syscall::SyscallResult;
use spin::Mutex;

/// Providers registered by the external network stack.
static NET_STATS_PROVIDER: Mutex<Option<fn(&mut NetStats)>> = Mutex::new(None);
static PING_PROVIDER: Mutex<Option<fn(u32, u32) -> i64>> = Mutex::new(None);

pub fn set_net_stats_provider(provider: Option<fn(&mut NetStats)>) {
    *NET_STATS_PROVIDER.lock() = provider;
}

pub fn set_ping_provider(provider: Option<fn(u32, u32) -> i64>) {
    *PING_PROVIDER.lock() = provider;
}

pub fn sys_mem_info(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let stats = phys::stats();
    let mut info = MemInfo::default();
    info.total_pages = stats.total_pages;
    info.free_pages = stats.free_pages;
    info.used_pages = stats.used_pages;
    info.page_size = phys::PAGE_SIZE;
    info.total_bytes = info.total_pages * info.page_size;
    info.free_bytes = info.free_pages * info.page_size;
    info.used_bytes = info.used_pages * info.page_size;

    match write_user_struct(a0 as *mut MemInfo, &info) {
        Ok(()) => SyscallResult::ok(),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_net_stats(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let provider = match *NET_STATS_PROVIDER.lock() {
        Some(p) => p,
        None => return SyscallResult::err(Verr::NotSupported),
    };
    let mut stats = NetStats::default();
    provider(&mut stats);
    match write_user_struct(a0 as *mut NetStats, &stats) {
        Ok(()) => SyscallResult::ok(),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_device_list(a0: u64, a1: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let devices: [(&str, &str, u32, u32); 3] = [
        ("System RAM", "memory", 1, 0),
        ("ARM Timer", "timer", 1, 30),
        ("PL011 UART", "serial", 1, 33),
    ];

    let max_count = a1 as usize;
    if max_count == 0 {
        // Count query
        return SyscallResult::ok_val(devices.len() as u64);
    }

    let out = a0 as *mut DeviceInfo;
    let byte_len = match max_count.checked_mul(core::mem::size_of::<DeviceInfo>()) {
        Some(n) => n,
        None => return SyscallResult::err(Verr::InvalidArg),
    };
    if let Err(e) = validate_user_write(out as *mut u8, byte_len) {
        return SyscallResult::err(e);
    }

    let mut count = 0usize;
    for (name, device_type, flags, irq) in devices.iter() {
        if count >= max_count {
            break;
        }
        let mut info = DeviceInfo::default();
        abi::copy_name(&mut info.name, name);
        abi::copy_name(&mut info.device_type, device_type);
        info.flags = *flags;
        info.irq = *irq;
        unsafe { core::ptr::write_unaligned(out.add(count), info) };
        count += 1;
    }
    SyscallResult::ok_val(count as u64)
}

pub fn sys_getrandom(a0: u64, a1: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let len = a1 as usize;
    if len == 0 {
        return SyscallResult::ok_val(0);
    }
    if let Err(e) = validate_user_write(a0 as *mut u8, len) {
        return SyscallResult::err(e);
    }

    let mut buf = alloc::vec![0u8; core::cmp::min(len, 4096)];
    let mut written = 0usize;
    while written < len {
        let chunk = core::cmp::min(buf.len(), len - written);
        crate::prng::fill_bytes(&mut buf[..chunk]);
        if let Err(e) = copy_to_user(unsafe { (a0 as *mut u8).add(written) }, &buf[..chunk]) {
            return SyscallResult::err(e);
        }
        written += chunk;
    }
    SyscallResult::ok_val(len as u64)
}

pub fn sys_ping(a0: u64, a1: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let provider = match *PING_PROVIDER.lock() {
        Some(p) => p,
        None => return SyscallResult::err(Verr::NotSupported),
    };
    let timeout_ms = if a1 == 0 { 5000 } else { a1 as u32 };
    let rtt = provider(a0 as u32, timeout_ms);
    if rtt < 0 {
        return SyscallResult::err(Verr::from_code(rtt));
    }
    SyscallResult::ok_val(rtt as u64)
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    *NET_STATS_PROVIDER.lock() = None;
    *PING_PROVIDER.lock() = None;
}
