// Poll syscall handlers (0x20-0x2F)

use crate::error::Verr;
use crate::ipc::poll::{PollEvent, PollFlags};
use crate::ipc::pollset;
use crate::syscall::uaccess::validate_user_write;
use crate::syscall::SyscallResult;

pub fn sys_poll_create(_: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    match pollset::create() {
        Ok(id) => SyscallResult::ok_val(id as u64),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_poll_add(a0: u64, a1: u64, a2: u64, a3: u64, _: u64, _: u64) -> SyscallResult {
    let flags = PollFlags::from_bits_truncate(a3 as u32);
    match pollset::add(a0 as u32, a1 as u32, a2 as u32, flags) {
        Ok(()) => SyscallResult::ok(),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_poll_remove(a0: u64, a1: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    match pollset::remove(a0 as u32, a1 as u32) {
        Ok(()) => SyscallResult::ok(),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_poll_wait(a0: u64, a1: u64, a2: u64, a3: u64, _: u64, _: u64) -> SyscallResult {
    let max_events = core::cmp::min(a2 as usize, pollset::MAX_ENTRIES_PER_SET);
    if max_events == 0 {
        return SyscallResult::err(Verr::InvalidArg);
    }
    let out_ptr = a1 as *mut PollEvent;
    let byte_len = max_events * core::mem::size_of::<PollEvent>();
    if let Err(e) = validate_user_write(out_ptr as *mut u8, byte_len) {
        return SyscallResult::err(e);
    }

    let mut events = [PollEvent::default(); pollset::MAX_ENTRIES_PER_SET];
    match pollset::wait(a0 as u32, &mut events[..max_events], a3 as i64) {
        Ok(ready) => {
            for (i, ev) in events.iter().take(ready as usize).enumerate() {
                unsafe { core::ptr::write_unaligned(out_ptr.add(i), *ev) };
            }
            SyscallResult::ok_val(ready as u64)
        }
        Err(e) => SyscallResult::err(e),
    }
}
