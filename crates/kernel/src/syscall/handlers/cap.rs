// Capability syscall handlers (0x70-0x7F)

use crate::abi::{CapInfo, CapListEntry};
use crate::cap::{Handle, Rights};
use crate::error::Verr;
use crate::syscall::uaccess::{validate_user_write, write_user_struct};
use crate::syscall::SyscallResult;
use crate::viper::{self, ResourceLimit};

pub fn sys_cap_derive(a0: u64, a1: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let src = Handle::from_raw(a0 as u32);
    let new_rights = Rights::from_bits_truncate(a1 as u32);

    let derived = viper::with_current_cap_table(|ct| ct.derive(src, new_rights));
    match derived {
        Some(Ok(h)) => SyscallResult::ok_val(h.raw() as u64),
        Some(Err(e)) => SyscallResult::err(e),
        None => SyscallResult::err(Verr::NotFound),
    }
}

pub fn sys_cap_revoke(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let handle = Handle::from_raw(a0 as u32);
    let revoked = viper::with_current_cap_table(|ct| ct.revoke(handle));
    match revoked {
        Some(Ok(count)) => SyscallResult::ok_val(count as u64),
        Some(Err(e)) => SyscallResult::err(e),
        None => SyscallResult::err(Verr::NotFound),
    }
}

pub fn sys_cap_query(a0: u64, a1: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let handle = Handle::from_raw(a0 as u32);

    let info = viper::with_current_cap_table(|ct| {
        ct.get(handle).map(|entry| CapInfo {
            handle: handle.raw(),
            kind: entry.kind as u32,
            rights: entry.rights.bits(),
            generation: handle.generation() as u32,
        })
    });
    match info {
        Some(Some(info)) => match write_user_struct(a1 as *mut CapInfo, &info) {
            Ok(()) => SyscallResult::ok(),
            Err(e) => SyscallResult::err(e),
        },
        Some(None) => SyscallResult::err(Verr::InvalidHandle),
        None => SyscallResult::err(Verr::NotFound),
    }
}

pub fn sys_cap_list(a0: u64, a1: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let max_entries = a1 as usize;
    let out = a0 as *mut CapListEntry;
    if let Err(e) = validate_user_write(
        out as *mut u8,
        max_entries * core::mem::size_of::<CapListEntry>(),
    ) {
        return SyscallResult::err(e);
    }

    let count = viper::with_current_cap_table(|ct| {
        let mut count = 0usize;
        for index in 0..ct.capacity() {
            if count >= max_entries {
                break;
            }
            if let (Some(entry), Some(handle)) = (ct.entry_at(index), ct.handle_at(index)) {
                let row = CapListEntry {
                    handle: handle.raw(),
                    kind: entry.kind as u32,
                    rights: entry.rights.bits(),
                };
                unsafe { core::ptr::write_unaligned(out.add(count), row) };
                count += 1;
            }
        }
        count
    });
    match count {
        Some(count) => SyscallResult::ok_val(count as u64),
        None => SyscallResult::err(Verr::NotFound),
    }
}

pub fn sys_cap_get_bound(_: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    match viper::current() {
        Some(v) => SyscallResult::ok_val(v.cap_bounding_set().bits() as u64),
        None => SyscallResult::err(Verr::NotFound),
    }
}

pub fn sys_cap_drop_bound(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let rights = Rights::from_bits_truncate(a0 as u32);
    match viper::current() {
        Some(v) => {
            v.drop_cap_bounding_set(rights);
            SyscallResult::ok()
        }
        None => SyscallResult::err(Verr::NotFound),
    }
}

fn parse_limit(a0: u64) -> Option<ResourceLimit> {
    ResourceLimit::from_u32(a0 as u32)
}

pub fn sys_getrlimit(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let resource = match parse_limit(a0) {
        Some(r) => r,
        None => return SyscallResult::err(Verr::InvalidArg),
    };
    match viper::get_rlimit(resource) {
        Ok(v) => SyscallResult::ok_val(v),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_setrlimit(a0: u64, a1: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let resource = match parse_limit(a0) {
        Some(r) => r,
        None => return SyscallResult::err(Verr::InvalidArg),
    };
    match viper::set_rlimit(resource, a1) {
        Ok(()) => SyscallResult::ok(),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_getrusage(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let resource = match parse_limit(a0) {
        Some(r) => r,
        None => return SyscallResult::err(Verr::InvalidArg),
    };
    match viper::get_rusage(resource) {
        Ok(v) => SyscallResult::ok_val(v),
        Err(e) => SyscallResult::err(e),
    }
}
