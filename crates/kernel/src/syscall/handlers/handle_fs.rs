// Handle-based filesystem syscall handlers (0x80-0x8F)

use crate::abi::FsDirEnt;
use crate::cap::{Handle, Kind, Rights};
use crate::error::Verr;
use crate::kobj::{DirObject, FileObject, KObject};
use crate::syscall::uaccess::{validate_user_read, validate_user_write, write_user_struct};
use crate::syscall::SyscallResult;
use crate::vfs::{self, NodeType};
use crate::viper;

pub fn sys_fs_open_root(_: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let fs = match vfs::root_filesystem() {
        Some(fs) => fs,
        None => return SyscallResult::err(Verr::NotSupported),
    };
    let root = fs.root_inode();
    let dir = match DirObject::create_on(fs, root) {
        Some(d) => d,
        None => return SyscallResult::err(Verr::Io),
    };

    let inserted = viper::with_current_cap_table(|ct| {
        ct.insert(
            KObject::Directory(dir),
            Rights::READ | Rights::WRITE | Rights::DERIVE,
        )
    });
    match inserted {
        Some(Ok(h)) => SyscallResult::ok_val(h.raw() as u64),
        Some(Err(e)) => SyscallResult::err(e),
        None => SyscallResult::err(Verr::NotFound),
    }
}

pub fn sys_fs_open(a0: u64, a1: u64, a2: u64, a3: u64, _: u64, _: u64) -> SyscallResult {
    let dir_handle = Handle::from_raw(a0 as u32);
    let name_len = a2 as usize;
    let flags = a3 as u32;

    if name_len == 0 || name_len > 255 {
        return SyscallResult::err(Verr::InvalidArg);
    }
    if let Err(e) = validate_user_read(a1 as *const u8, name_len) {
        return SyscallResult::err(e);
    }
    let name_bytes = unsafe { core::slice::from_raw_parts(a1 as *const u8, name_len) };
    let name = match core::str::from_utf8(name_bytes) {
        Ok(n) => n,
        Err(_) => return SyscallResult::err(Verr::InvalidArg),
    };

    let dir = match viper::with_current_cap_table(|ct| {
        ct.get_checked(dir_handle, Kind::Directory)
            .and_then(|e| e.object.as_directory().cloned())
    }) {
        Some(Some(d)) => d,
        Some(None) => return SyscallResult::err(Verr::InvalidHandle),
        None => return SyscallResult::err(Verr::NotFound),
    };

    let (child_inode, child_type) = match dir.lookup(name) {
        Some(found) => found,
        None => return SyscallResult::err(Verr::NotFound),
    };

    let object = match child_type {
        NodeType::Directory => match DirObject::create_on(dir.filesystem(), child_inode) {
            Some(d) => KObject::Directory(d),
            None => return SyscallResult::err(Verr::Io),
        },
        NodeType::File => match FileObject::create_on(dir.filesystem(), child_inode, flags) {
            Some(f) => KObject::File(f),
            None => return SyscallResult::err(Verr::Io),
        },
    };

    let inserted =
        viper::with_current_cap_table(|ct| ct.insert(object, Rights::READ | Rights::WRITE));
    match inserted {
        Some(Ok(h)) => SyscallResult::ok_val(h.raw() as u64),
        Some(Err(e)) => SyscallResult::err(e),
        None => SyscallResult::err(Verr::NotFound),
    }
}

pub fn sys_io_read(a0: u64, a1: u64, a2: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let len = a2 as usize;
    if let Err(e) = validate_user_write(a1 as *mut u8, len) {
        return SyscallResult::err(e);
    }

    let file = match viper::with_current_cap_table(|ct| {
        ct.get_with_rights(Handle::from_raw(a0 as u32), Kind::File, Rights::READ)
            .and_then(|e| e.object.as_file().cloned())
    }) {
        Some(Some(f)) => f,
        Some(None) => return SyscallResult::err(Verr::InvalidHandle),
        None => return SyscallResult::err(Verr::NotFound),
    };

    let buf = unsafe { core::slice::from_raw_parts_mut(a1 as *mut u8, len) };
    match file.read(buf) {
        Ok(n) => SyscallResult::ok_val(n as u64),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_io_write(a0: u64, a1: u64, a2: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let len = a2 as usize;
    if let Err(e) = validate_user_read(a1 as *const u8, len) {
        return SyscallResult::err(e);
    }

    let file = match viper::with_current_cap_table(|ct| {
        ct.get_with_rights(Handle::from_raw(a0 as u32), Kind::File, Rights::WRITE)
            .and_then(|e| e.object.as_file().cloned())
    }) {
        Some(Some(f)) => f,
        Some(None) => return SyscallResult::err(Verr::InvalidHandle),
        None => return SyscallResult::err(Verr::NotFound),
    };

    let data = unsafe { core::slice::from_raw_parts(a1 as *const u8, len) };
    match file.write(data) {
        Ok(n) => SyscallResult::ok_val(n as u64),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_io_seek(a0: u64, a1: u64, a2: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let file = match viper::with_current_cap_table(|ct| {
        ct.get_checked(Handle::from_raw(a0 as u32), Kind::File)
            .and_then(|e| e.object.as_file().cloned())
    }) {
        Some(Some(f)) => f,
        Some(None) => return SyscallResult::err(Verr::InvalidHandle),
        None => return SyscallResult::err(Verr::NotFound),
    };

    match file.seek(a1 as i64, a2 as i32) {
        Ok(pos) => SyscallResult::ok_val(pos),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_fs_read_dir(a0: u64, a1: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let dir = match viper::with_current_cap_table(|ct| {
        ct.get_with_rights(Handle::from_raw(a0 as u32), Kind::Directory, Rights::READ)
            .and_then(|e| e.object.as_directory().cloned())
    }) {
        Some(Some(d)) => d,
        Some(None) => return SyscallResult::err(Verr::InvalidHandle),
        None => return SyscallResult::err(Verr::NotFound),
    };

    let mut ent = FsDirEnt::default();
    if !dir.read_next(&mut ent) {
        return SyscallResult::ok_val(0);
    }
    match write_user_struct(a1 as *mut FsDirEnt, &ent) {
        Ok(()) => SyscallResult::ok_val(1),
        Err(e) => SyscallResult::err(e),
    }
}

pub fn sys_fs_rewind_dir(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let dir = match viper::with_current_cap_table(|ct| {
        ct.get_checked(Handle::from_raw(a0 as u32), Kind::Directory)
            .and_then(|e| e.object.as_directory().cloned())
    }) {
        Some(Some(d)) => d,
        Some(None) => return SyscallResult::err(Verr::InvalidHandle),
        None => return SyscallResult::err(Verr::NotFound),
    };
    dir.rewind();
    SyscallResult::ok()
}

pub fn sys_fs_close(a0: u64, _: u64, _: u64, _: u64, _: u64, _: u64) -> SyscallResult {
    let handle = Handle::from_raw(a0 as u32);
    let removed = viper::with_current_cap_table(|ct| ct.remove(handle));
    match removed {
        Some(Ok(())) => SyscallResult::ok(),
        Some(Err(e)) => SyscallResult::err(e),
        None => SyscallResult::err(Verr::NotFound),
    }
}
