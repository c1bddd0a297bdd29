//! Syscall dispatch.
//!
//! The trap layer decodes the syscall number and six argument registers,
//! calls `dispatch`, and packs the returned triple into the architectural
//! return registers. Handlers are grouped by functional area in
//! `handlers::*` and registered in the dispatch table below.
//!
//! Number layout by area: task 0x0_, channel 0x1_, poll 0x2_, cap 0x7_,
//! handle-fs 0x8_, tls 0xB_ (reserved), assign 0xC_, audio 0xD_ (reserved),
//! sysinfo 0xE_.

pub mod handlers;
pub mod uaccess;

use crate::error::{Verr, VOK};

/// Syscall numbers, grouped by functional area.
pub mod nums {
    // Task / process management (0x00 - 0x0F)
    pub const SYS_VIPER_CREATE: u32 = 0x00;
    pub const SYS_VIPER_EXIT: u32 = 0x01;
    pub const SYS_VIPER_WAIT: u32 = 0x02;
    pub const SYS_FORK: u32 = 0x03;
    pub const SYS_SBRK: u32 = 0x04;
    pub const SYS_YIELD: u32 = 0x05;
    pub const SYS_TASK_INFO: u32 = 0x06;

    // Channel IPC (0x10 - 0x1F)
    pub const SYS_CHANNEL_CREATE: u32 = 0x10;
    pub const SYS_CHANNEL_SEND: u32 = 0x11;
    pub const SYS_CHANNEL_RECV: u32 = 0x12;
    pub const SYS_CHANNEL_TRY_SEND: u32 = 0x13;
    pub const SYS_CHANNEL_TRY_RECV: u32 = 0x14;
    pub const SYS_CHANNEL_CLOSE: u32 = 0x15;

    // Poll sets (0x20 - 0x2F)
    pub const SYS_POLL_CREATE: u32 = 0x20;
    pub const SYS_POLL_ADD: u32 = 0x21;
    pub const SYS_POLL_REMOVE: u32 = 0x22;
    pub const SYS_POLL_WAIT: u32 = 0x23;

    // Capabilities and limits (0x70 - 0x7F)
    pub const SYS_CAP_DERIVE: u32 = 0x70;
    pub const SYS_CAP_REVOKE: u32 = 0x71;
    pub const SYS_CAP_QUERY: u32 = 0x72;
    pub const SYS_CAP_LIST: u32 = 0x73;
    pub const SYS_CAP_GET_BOUND: u32 = 0x74;
    pub const SYS_CAP_DROP_BOUND: u32 = 0x75;
    pub const SYS_GETRLIMIT: u32 = 0x76;
    pub const SYS_SETRLIMIT: u32 = 0x77;
    pub const SYS_GETRUSAGE: u32 = 0x78;

    // Handle-based filesystem (0x80 - 0x8F)
    pub const SYS_FS_OPEN_ROOT: u32 = 0x80;
    pub const SYS_FS_OPEN: u32 = 0x81;
    pub const SYS_IO_READ: u32 = 0x82;
    pub const SYS_IO_WRITE: u32 = 0x83;
    pub const SYS_IO_SEEK: u32 = 0x84;
    pub const SYS_FS_READ_DIR: u32 = 0x85;
    pub const SYS_FS_REWIND_DIR: u32 = 0x86;
    pub const SYS_FS_CLOSE: u32 = 0x87;

    // Assign namespace (0xC0 - 0xCF)
    pub const SYS_ASSIGN_SET: u32 = 0xC0;
    pub const SYS_ASSIGN_GET: u32 = 0xC1;
    pub const SYS_ASSIGN_REMOVE: u32 = 0xC2;
    pub const SYS_ASSIGN_LIST: u32 = 0xC3;
    pub const SYS_ASSIGN_RESOLVE: u32 = 0xC4;

    // System information (0xE0 - 0xEF)
    pub const SYS_MEM_INFO: u32 = 0xE0;
    pub const SYS_NET_STATS: u32 = 0xE1;
    pub const SYS_DEVICE_LIST: u32 = 0xE2;
    pub const SYS_GETRANDOM: u32 = 0xE3;
    pub const SYS_PING: u32 = 0xE4;
}

/// Result triple returned to the trap layer: a value register, an error
/// register (0 for success, negative code otherwise), and an auxiliary
/// value register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallResult {
    pub value: u64,
    pub error: i64,
    pub extra: u64,
}

impl SyscallResult {
    pub fn ok() -> Self {
        SyscallResult {
            value: 0,
            error: VOK,
            extra: 0,
        }
    }

    pub fn ok_val(value: u64) -> Self {
        SyscallResult {
            value,
            error: VOK,
            extra: 0,
        }
    }

    pub fn ok_pair(value: u64, extra: u64) -> Self {
        SyscallResult {
            value,
            error: VOK,
            extra,
        }
    }

    pub fn err(e: Verr) -> Self {
        SyscallResult {
            value: 0,
            error: e.code(),
            extra: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error == VOK
    }
}

impl From<Verr> for SyscallResult {
    fn from(e: Verr) -> Self {
        SyscallResult::err(e)
    }
}

type Handler = fn(u64, u64, u64, u64, u64, u64) -> SyscallResult;

/// Dispatch table. Linear scan is fine at this size; the table is grouped
/// by area to match the number layout.
static SYSCALL_TABLE: &[(u32, Handler)] = &[
    // Task
    (nums::SYS_VIPER_CREATE, handlers::task::sys_viper_create),
    (nums::SYS_VIPER_EXIT, handlers::task::sys_viper_exit),
    (nums::SYS_VIPER_WAIT, handlers::task::sys_viper_wait),
    (nums::SYS_FORK, handlers::task::sys_fork),
    (nums::SYS_SBRK, handlers::task::sys_sbrk),
    (nums::SYS_YIELD, handlers::task::sys_yield),
    (nums::SYS_TASK_INFO, handlers::task::sys_task_info),
    // Channel
    (nums::SYS_CHANNEL_CREATE, handlers::channel::sys_channel_create),
    (nums::SYS_CHANNEL_SEND, handlers::channel::sys_channel_send),
    (nums::SYS_CHANNEL_RECV, handlers::channel::sys_channel_recv),
    (nums::SYS_CHANNEL_TRY_SEND, handlers::channel::sys_channel_try_send),
    (nums::SYS_CHANNEL_TRY_RECV, handlers::channel::sys_channel_try_recv),
    (nums::SYS_CHANNEL_CLOSE, handlers::channel::sys_channel_close),
    // Poll
    (nums::SYS_POLL_CREATE, handlers::poll::sys_poll_create),
    (nums::SYS_POLL_ADD, handlers::poll::sys_poll_add),
    (nums::SYS_POLL_REMOVE, handlers::poll::sys_poll_remove),
    (nums::SYS_POLL_WAIT, handlers::poll::sys_poll_wait),
    // Cap
    (nums::SYS_CAP_DERIVE, handlers::cap::sys_cap_derive),
    (nums::SYS_CAP_REVOKE, handlers::cap::sys_cap_revoke),
    (nums::SYS_CAP_QUERY, handlers::cap::sys_cap_query),
    (nums::SYS_CAP_LIST, handlers::cap::sys_cap_list),
    (nums::SYS_CAP_GET_BOUND, handlers::cap::sys_cap_get_bound),
    (nums::SYS_CAP_DROP_BOUND, handlers::cap::sys_cap_drop_bound),
    (nums::SYS_GETRLIMIT, handlers::cap::sys_getrlimit),
    (nums::SYS_SETRLIMIT, handlers::cap::sys_setrlimit),
    (nums::SYS_GETRUSAGE, handlers::cap::sys_getrusage),
    // Handle FS
    (nums::SYS_FS_OPEN_ROOT, handlers::handle_fs::sys_fs_open_root),
    (nums::SYS_FS_OPEN, handlers::handle_fs::sys_fs_open),
    (nums::SYS_IO_READ, handlers::handle_fs::sys_io_read),
    (nums::SYS_IO_WRITE, handlers::handle_fs::sys_io_write),
    (nums::SYS_IO_SEEK, handlers::handle_fs::sys_io_seek),
    (nums::SYS_FS_READ_DIR, handlers::handle_fs::sys_fs_read_dir),
    (nums::SYS_FS_REWIND_DIR, handlers::handle_fs::sys_fs_rewind_dir),
    (nums::SYS_FS_CLOSE, handlers::handle_fs::sys_fs_close),
    // Assign
    (nums::SYS_ASSIGN_SET, handlers::assign::sys_assign_set),
    (nums::SYS_ASSIGN_GET, handlers::assign::sys_assign_get),
    (nums::SYS_ASSIGN_REMOVE, handlers::assign::sys_assign_remove),
    (nums::SYS_ASSIGN_LIST, handlers::assign::sys_assign_list),
    (nums::SYS_ASSIGN_RESOLVE, handlers::assign::sys_assign_resolve),
    // Sysinfo
    (nums::SYS_MEM_INFO, handlers::sysinfo::sys_mem_info),
    (nums::SYS_NET_STATS, handlers::sysinfo::sys_net_stats),
    (nums::SYS_DEVICE_LIST, handlers::sysinfo::sys_device_list),
    (nums::SYS_GETRANDOM, handlers::sysinfo::sys_getrandom),
    (nums::SYS_PING, handlers::sysinfo::sys_ping),
];

/// Route a syscall to its handler.
pub fn dispatch(nr: u32, args: &[u64; 6]) -> SyscallResult {
    if let Some((_, handler)) = SYSCALL_TABLE.iter().find(|(n, _)| *n == nr) {
        return handler(args[0], args[1], args[2], args[3], args[4], args[5]);
    }

    match nr & 0xF0 {
        // TLS and audio areas are reserved; their engines live outside the
        // kernel core
        0xB0 | 0xD0 => SyscallResult::err(Verr::NotSupported),
        _ => {
            crate::warn!("syscall: unimplemented number {:#x}", nr);
            SyscallResult::err(Verr::NotSupported)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_numbers_are_not_supported() {
        let args = [0u64; 6];
        assert_eq!(dispatch(0xFF, &args).error, Verr::NotSupported.code());
        // Reserved areas answer the same way without logging noise
        assert_eq!(dispatch(0xB3, &args).error, Verr::NotSupported.code());
        assert_eq!(dispatch(0xD1, &args).error, Verr::NotSupported.code());
    }

    #[test]
    fn result_packing() {
        let r = SyscallResult::ok_pair(7, 9);
        assert!(r.is_ok());
        assert_eq!((r.value, r.extra), (7, 9));
        let e = SyscallResult::err(Verr::Permission);
        assert_eq!(e.error, -9);
    }
}
