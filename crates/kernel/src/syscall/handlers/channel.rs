// Channel IPC syscall handlers (0x10-0x1F)

use super::channel_id_for;
use crate::cap::{Handle, Kind, Rights};
use crate::error::Verr;
use crate::ipc::channel::{self, MAX_HANDLES_PER_MSG};
use crate::syscall::uaccess::{validate_user_read, validate_user_write};
use crate::syscall::SyscallResult;
use crate::viper;
use alloc::vec::Vec;

pub fn sys_channel_create(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let capacity = if a0 == 0 {
        channel::DEFAULT_PENDING
    } else {
        a0 as u32
    };
    match channel::create_pair(capacity) {
        Ok(pair) => SyscallResult::ok_pair(pair.send.raw() as u64, pair.recv.raw() as u64),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_channel_send(a0: u64, a1: u64, a2: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let len = a2 as usize;
    if let Err(e) = validate_user_read(a1 as *const u8, len) {
        return SyscallResult::err(e);
    }
    let id = match channel_id_for(Handle::from_raw(a0 as u32), Rights::WRITE) {
        Ok(id) => id,
        Err(e) => return SyscallResult::err(e),
    };
    let data = unsafe { core::slice::from_raw_parts(a1 as *const u8, len) };
    match channel::send(id, data) {
        Ok(()) => SyscallResult::ok(),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_channel_recv(a0: u64, a1: u64, a2: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let len = a2 as usize;
    if let Err(e) = validate_user_write(a1 as *mut u8, len) {
        return SyscallResult::err(e);
    }
    let id = match channel_id_for(Handle::from_raw(a0 as u32), Rights::READ) {
        Ok(id) => id,
        Err(e) => return SyscallResult::err(e),
    };
    let buf = unsafe { core::slice::from_raw_parts_mut(a1 as *mut u8, len) };
    match channel::recv(id, buf) {
        Ok(size) => SyscallResult::ok_val(size as u64),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_channel_try_send(
    a0: u64,
    a1: u64,
    a2: u64,
    a3: u64,
    a4: u64,
    _: u64,
) -> SyscallResult {
    let len = a2 as usize;
    let handle_count = a4 as usize;
    if handle_count > MAX_HANDLES_PER_MSG {
        return SyscallResult::err(Verr::InvalidArg);
    }
    if let Err(e) = validate_user_read(a1 as *const u8, len) {
        return SyscallResult::err(e);
    }

    let mut handles = Vec::new();
    if handle_count > 0 {
        let raw = a3 as *const u32;
        if let Err(e) = validate_user_read(raw as *const u8, handle_count * 4) {
            return SyscallResult::err(e);
        }
        for i in 0..handle_count {
            handles.push(Handle::from_raw(unsafe { core::ptr::read_unaligned(raw.add(i)) }));
        }
    }

    let id = match channel_id_for(Handle::from_raw(a0 as u32), Rights::WRITE) {
        Ok(id) => id,
        Err(e) => return SyscallResult::err(e),
    };
    let data = unsafe { core::slice::from_raw_parts(a1 as *const u8, len) };
    match channel::try_send(id, data, &handles) {
        Ok(()) => SyscallResult::ok(),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_channel_try_recv(
    a0: u64,
    a1: u64,
    a2: u64,
    a3: u64,
    a4: u64,
    _: u64,
) -> SyscallResult {
    let len = a2 as usize;
    if let Err(e) = validate_user_write(a1 as *mut u8, len) {
        return SyscallResult::err(e);
    }
    let max_handles = core::cmp::min(a4 as usize, MAX_HANDLES_PER_MSG);
    let out_raw = a3 as *mut u32;
    if max_handles > 0 {
        if let Err(e) = validate_user_write(out_raw as *mut u8, max_handles * 4) {
            return SyscallResult::err(e);
        }
    }

    let id = match channel_id_for(Handle::from_raw(a0 as u32), Rights::READ) {
        Ok(id) => id,
        Err(e) => return SyscallResult::err(e),
    };
    let buf = unsafe { core::slice::from_raw_parts_mut(a1 as *mut u8, len) };
    match channel::try_recv(id, buf) {
        Ok(received) => {
            let n = core::cmp::min(received.handles.len(), max_handles);
            for (i, h) in received.handles.iter().take(n).enumerate() {
                unsafe { core::ptr::write_unaligned(out_raw.add(i), h.raw()) };
            }
            SyscallResult::ok_pair(received.size as u64, received.handles.len() as u64)
        }
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_channel_close(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let handle = Handle::from_raw(a0 as u32);
    let removed = viper::with_current_cap_table(|ct| {
        if ct.get_checked(handle, Kind::Channel).is_none() {
            return Err(Verr::InvalidHandle);
        }
        // Dropping the entry's object reference closes the endpoint
        ct.remove(handle)
    });
    match removed {
        Some(Ok(())) => SyscallResult::ok(),
        Some(Err(e)) => SyscallResult::err(e),
        None => SyscallResult::err(Verr::NotSupported),
    }
}
