// Assign syscall handlers (0xC0-0xCF)

use crate::abi::AssignInfo;
use crate::assign::{self, AssignFlags, MAX_ASSIGN_NAME};
use crate::cap::Handle;
use crate::error::Verr;
use crate::syscall::uaccess::{copy_string_from_user, validate_user_write};
use crate::syscall::SyscallResult;

/// Longest accepted assign path.
const MAX_PATH: usize = 512;

pub fn sys_assign_set(a0: u64, a1: u64, a2: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let name = match copy_string_from_user(a0 as *const u8, MAX_ASSIGN_NAME) {
        Ok(n) => n,
        Err(e) => return SyscallResult::err(e),
    };
    let flags = AssignFlags::from_bits_truncate(a2 as u32);
    match assign::set_from_handle(&name, Handle::from_raw(a1 as u32), flags) {
        Ok(()) => SyscallResult::ok(),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_assign_get(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let name = match copy_string_from_user(a0 as *const u8, MAX_ASSIGN_NAME) {
        Ok(n) => n,
        Err(e) => return SyscallResult::err(e),
    };

    // Service assigns answer with a fresh send capability; directory
    // assigns with a directory capability
    if let Some(channel) = assign::get_channel(&name) {
        return SyscallResult::ok_val(channel.raw() as u64);
    }
    match assign::get(&name) {
        Some(h) => SyscallResult::ok_val(h.raw() as u64),
        None => SyscallResult::err(Verr::NotFound),
    }
}

pub fn sys_assign_remove(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let name = match copy_string_from_user(a0 as *const u8, MAX_ASSIGN_NAME) {
        Ok(n) => n,
        Err(e) => return SyscallResult::err(e),
    };
    match assign::remove(&name) {
        Ok(()) => SyscallResult::ok(),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_assign_list(a0: u64, a1: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let max_count = a1 as usize;
    let out = a0 as *mut AssignInfo;
    let byte_len = match max_count.checked_mul(core::mem::size_of::<AssignInfo>()) {
        Some(n) => n,
        None => return SyscallResult::err(Verr::InvalidArg),
    };
    if max_count > 0 {
        if let Err(e) = validate_user_write(out as *mut u8, byte_len) {
            return SyscallResult::err(e);
        }
    }

    let mut rows = [AssignInfo::default(); assign::MAX_ASSIGNS];
    let limit = core::cmp::min(max_count, assign::MAX_ASSIGNS);
    let count = assign::list(&mut rows[..limit]);
    for (i, row) in rows.iter().take(count).enumerate() {
        unsafe { core::ptr::write_unaligned(out.add(i), *row) };
    }
    SyscallResult::ok_val(count as u64)
}

pub fn sys_assign_resolve(a0: u64, a1: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let path = match copy_string_from_user(a0 as *const u8, MAX_PATH) {
        Ok(p) => p,
        Err(e) => return SyscallResult::err(e),
    };
    match assign::resolve_path(&path, a1 as u32) {
        Ok(h) => SyscallResult::ok_val(h.raw() as u64),
        Err(e) => SyscallResult::err(e),
    }
}
