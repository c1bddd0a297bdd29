// Task and process syscall handlers (0x00-0x0F)

use crate::abi::{self, TaskInfo};
use crate::syscall::uaccess::{copy_string_from_user, write_user_struct};
use crate::syscall::SyscallResult;
use crate::task;
use crate::error::Verr;
use crate::viper;

pub fn sys_viper_create(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let name = match copy_string_from_user(a0 as *const u8, viper::MAX_NAME) {
        Ok(n) => n,
        Err(e) => return SyscallResult::err(e),
    };
    let parent = viper::current();
    match viper::create(parent.as_ref(), &name) {
        Ok(v) => SyscallResult::ok_val(v.id),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_viper_exit(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    viper::exit(a0 as i32);
    task::exit_current();
    // The scheduler never returns here for a real task; the result is only
    // observable from kernel-context callers
    SyscallResult::ok()
}

pub fn sys_viper_wait(a0: u64, a1: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let status_ptr = a1 as *mut i32;
    let mut status = 0i32;
    match viper::wait(a0 as i64, &mut status) {
        Ok(child) => {
            if !status_ptr.is_null() {
                if let Err(e) = write_user_struct(status_ptr, &status) {
                    return SyscallResult::err(e);
                }
            }
            SyscallResult::ok_val(child)
        }
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_fork(_: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    match viper::fork() {
        Ok(child) => SyscallResult::ok_val(child.id),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_sbrk(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    match viper::do_sbrk(a0 as i64) {
        Ok(old_break) => SyscallResult::ok_val(old_break),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_yield(_: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    task::yield_now();
    SyscallResult::ok()
}

pub fn sys_task_info(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let current = match task::current() {
        Some(t) => t,
        None => return SyscallResult::err(Verr::NotFound),
    };

    let mut info = TaskInfo::default();
    info.task_id = current;
    info.state = task::state(current).map(|s| s as u32).unwrap_or(0);
    info.viper_id = task::viper_of(current).unwrap_or(0);
    if let Some(name) = task::name(current) {
        abi::copy_name(&mut info.name, &name);
    }

    match write_user_struct(a0 as *mut TaskInfo, &info) {
        Ok(()) => SyscallResult::ok(),
        Err(e) => SyscallResult::err(e),
    }
}
