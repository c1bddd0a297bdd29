//! User-space memory access validation and copy helpers.
//!
//! Every syscall validates user pointers before touching them: null and
//! overflow checks, the kernel-half boundary, and, when the current process
//! has populated its VMA list, coverage and permission checks against it.
//! Processes whose address space is still being assembled by the loader
//! fall back to the range checks alone.

use crate::error::{Result, Verr};
use crate::mm::VmaFlags;
use crate::viper;
use alloc::string::String;
use alloc::vec::Vec;
use core::ptr;

/// Kernel address space starts here (upper half).
const KERNEL_BASE: usize = 0xFFFF_0000_0000_0000;

/// Longest string a syscall will copy from user space.
pub const MAX_USER_STRING: usize = 4096;

fn validate_range(addr: usize, len: usize, write: bool) -> Result<()> {
    if addr == 0 {
        return Err(Verr::InvalidArg);
    }
    let end = addr.checked_add(len).ok_or(Verr::InvalidArg)?;
    if addr >= KERNEL_BASE || end > KERNEL_BASE {
        return Err(Verr::InvalidArg);
    }

    if let Some(v) = viper::current() {
        let covered = v.with_addr_space(|space| {
            if space.vmas().is_empty() {
                // Address space not yet populated by the loader
                return true;
            }
            let required = if write {
                VmaFlags::WRITE
            } else {
                VmaFlags::READ
            };
            space.covers(addr as u64, len as u64, required)
        });
        if !covered {
            return Err(Verr::InvalidArg);
        }
    }
    Ok(())
}

/// Validate that `[ptr, ptr + len)` is readable user memory.
pub fn validate_user_read(ptr: *const u8, len: usize) -> Result<()> {
    validate_range(ptr as usize, len, false)
}

/// Validate that `[ptr, ptr + len)` is writable user memory.
pub fn validate_user_write(ptr: *mut u8, len: usize) -> Result<()> {
    validate_range(ptr as usize, len, true)
}

/// Copy `count` bytes from user space.
pub fn copy_from_user(ptr: *const u8, count: usize) -> Result<Vec<u8>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    validate_user_read(ptr, count)?;
    let mut buf = Vec::with_capacity(count);
    unsafe {
        ptr::copy_nonoverlapping(ptr, buf.as_mut_ptr(), count);
        buf.set_len(count);
    }
    Ok(buf)
}

/// Copy bytes to user space.
pub fn copy_to_user(dst: *mut u8, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    validate_user_write(dst, data.len())?;
    unsafe {
        ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
    }
    Ok(())
}

/// Copy a NUL-terminated string from user space, rejecting strings longer
/// than `max_len` bytes.
pub fn copy_string_from_user(ptr: *const u8, max_len: usize) -> Result<String> {
    let max_len = core::cmp::min(max_len, MAX_USER_STRING);
    validate_user_read(ptr, 1)?;

    let mut bytes = Vec::new();
    for i in 0..=max_len {
        validate_user_read(unsafe { ptr.add(i) }, 1)?;
        let byte = unsafe { ptr::read(ptr.add(i)) };
        if byte == 0 {
            return String::from_utf8(bytes).map_err(|_| Verr::InvalidArg);
        }
        if i == max_len {
            break;
        }
        bytes.push(byte);
    }
    Err(Verr::InvalidArg)
}

/// Validate a NUL-terminated user string without keeping the copy.
pub fn validate_user_string(ptr: *const u8, max_len: usize) -> Result<()> {
    copy_string_from_user(ptr, max_len).map(|_| ())
}

/// Read a `#[repr(C)]` value from user space.
pub fn read_user_struct<T: Copy>(ptr: *const T) -> Result<T> {
    validate_user_read(ptr as *const u8, core::mem::size_of::<T>())?;
    Ok(unsafe { ptr::read_unaligned(ptr) })
}

/// Write a `#[repr(C)]` value to user space.
pub fn write_user_struct<T: Copy>(dst: *mut T, value: &T) -> Result<()> {
    validate_user_write(dst as *mut u8, core::mem::size_of::<T>())?;
    unsafe {
        ptr::write_unaligned(dst, *value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::Vma;
    use crate::test_utils::{lock_kernel, TestEnv};

    #[test]
    fn rejects_null_and_kernel_pointers() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("ua-basic");
        assert_eq!(
            validate_user_read(core::ptr::null(), 4),
            Err(Verr::InvalidArg)
        );
        assert_eq!(
            validate_user_read(KERNEL_BASE as *const u8, 4),
            Err(Verr::InvalidArg)
        );
        assert_eq!(
            validate_user_read(usize::MAX as *const u8, 4),
            Err(Verr::InvalidArg)
        );
    }

    #[test]
    fn vma_coverage_is_enforced_when_populated() {
        let _guard = lock_kernel();
        let env = TestEnv::new("ua-vma");
        env.viper.with_addr_space(|space| {
            space
                .insert_vma(Vma {
                    start: 0x1000,
                    end: 0x2000,
                    flags: VmaFlags::READ,
                })
                .unwrap();
        });

        assert!(validate_user_read(0x1000 as *const u8, 0x800).is_ok());
        assert_eq!(
            validate_user_read(0x3000 as *const u8, 4),
            Err(Verr::InvalidArg)
        );
        // Read-only mapping refuses writes
        assert_eq!(
            validate_user_write(0x1000 as *mut u8, 4),
            Err(Verr::InvalidArg)
        );
    }

    #[test]
    fn string_copy_requires_terminator() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("ua-str");
        let good = b"hello\0";
        let s = copy_string_from_user(good.as_ptr(), 16).unwrap();
        assert_eq!(s, "hello");

        let unterminated = b"xxxx";
        assert_eq!(
            copy_string_from_user(unterminated.as_ptr(), 3),
            Err(Verr::InvalidArg)
        );
    }

    #[test]
    fn round_trip_copies() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("ua-copy");
        let src = [1u8, 2, 3, 4];
        let copied = copy_from_user(src.as_ptr(), 4).unwrap();
        assert_eq!(copied, src);

        let mut dst = [0u8; 4];
        copy_to_user(dst.as_mut_ptr(), &copied).unwrap();
        assert_eq!(dst, src);
    }
}
