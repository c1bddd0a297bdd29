//! Per-process address space bookkeeping.
//!
//! Tracks the page-table root, ASID, virtual memory areas, heap break, and
//! mmap cursor for a process. The VMA list is the source of truth for user
//! pointer validation; the platform layer mirrors it into real page tables.

use crate::error::{Result, Verr};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU16, Ordering};

/// User address space layout.
pub const USER_CODE_BASE: u64 = 0x0000_0000_8000_0000; // 2 GiB
pub const USER_DATA_BASE: u64 = 0x0000_0000_C000_0000; // 3 GiB
pub const USER_HEAP_BASE: u64 = 0x0000_0001_0000_0000; // 4 GiB
pub const USER_MMAP_BASE: u64 = 0x0000_0002_0000_0000; // 8 GiB
pub const USER_STACK_TOP: u64 = 0x0000_7FFF_FFFF_0000;
pub const USER_STACK_SIZE: u64 = 1024 * 1024;

/// Default heap ceiling above the heap base.
pub const USER_HEAP_MAX: u64 = 64 * 1024 * 1024;

bitflags::bitflags! {
    /// VMA protection and mapping flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmaFlags: u32 {
        const READ      = 1 << 0;
        const WRITE     = 1 << 1;
        const EXEC      = 1 << 2;
        const SHARED    = 1 << 3;
        const ANONYMOUS = 1 << 4;
        const COW       = 1 << 5;
    }
}

/// Virtual memory area: a half-open range with protection flags.
#[derive(Debug, Clone)]
pub struct Vma {
    pub start: u64,
    pub end: u64,
    pub flags: VmaFlags,
}

static NEXT_ASID: AtomicU16 = AtomicU16::new(1);

/// Per-process address space.
pub struct AddressSpace {
    /// Physical address of the user page-table root, owned by the platform
    /// layer. Zero until the platform attaches real tables.
    pub ttbr0: u64,
    pub asid: u16,
    vmas: Vec<Vma>,
    pub heap_start: u64,
    pub heap_break: u64,
    pub heap_max: u64,
    pub mmap_next: u64,
}

impl AddressSpace {
    /// Create a fresh address space with a new ASID.
    pub fn new() -> Self {
        AddressSpace {
            ttbr0: 0,
            asid: NEXT_ASID.fetch_add(1, Ordering::Relaxed),
            vmas: Vec::new(),
            heap_start: USER_HEAP_BASE,
            heap_break: USER_HEAP_BASE,
            heap_max: USER_HEAP_BASE + USER_HEAP_MAX,
            mmap_next: USER_MMAP_BASE,
        }
    }

    pub fn vmas(&self) -> &[Vma] {
        &self.vmas
    }

    pub fn find_vma(&self, addr: u64) -> Option<&Vma> {
        self.vmas.iter().find(|v| addr >= v.start && addr < v.end)
    }

    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.vmas.iter().any(|v| !(end <= v.start || start >= v.end))
    }

    /// Insert a VMA, keeping the list sorted by start address.
    pub fn insert_vma(&mut self, vma: Vma) -> Result<()> {
        if vma.start >= vma.end {
            return Err(Verr::InvalidArg);
        }
        if self.overlaps(vma.start, vma.end) {
            return Err(Verr::InvalidArg);
        }
        let pos = self
            .vmas
            .iter()
            .position(|v| v.start > vma.start)
            .unwrap_or(self.vmas.len());
        self.vmas.insert(pos, vma);
        Ok(())
    }

    /// Drop every VMA fully contained in `[start, end)`.
    pub fn remove_range(&mut self, start: u64, end: u64) {
        self.vmas.retain(|v| !(v.start >= start && v.end <= end));
    }

    /// True when `[addr, addr+len)` is covered by VMAs carrying `required`.
    /// Ranges may span adjacent VMAs.
    pub fn covers(&self, addr: u64, len: u64, required: VmaFlags) -> bool {
        let end = match addr.checked_add(len) {
            Some(e) => e,
            None => return false,
        };
        let mut cursor = addr;
        while cursor < end {
            match self.find_vma(cursor) {
                Some(vma) if vma.flags.contains(required) => cursor = vma.end,
                _ => return false,
            }
        }
        true
    }

    /// Adjust the heap break. Returns the previous break on success.
    pub fn do_sbrk(&mut self, increment: i64) -> Result<u64> {
        let old = self.heap_break;
        if increment == 0 {
            return Ok(old);
        }
        let new = old
            .checked_add_signed(increment)
            .ok_or(Verr::InvalidArg)?;
        if new < self.heap_start || new > self.heap_max {
            return Err(Verr::OutOfMemory);
        }
        // Keep the heap VMA in step with the break
        self.remove_range(self.heap_start, self.heap_max);
        if new > self.heap_start {
            self.insert_vma(Vma {
                start: self.heap_start,
                end: new,
                flags: VmaFlags::READ | VmaFlags::WRITE | VmaFlags::ANONYMOUS,
            })?;
        }
        self.heap_break = new;
        Ok(old)
    }

    /// Reserve a region from the mmap cursor.
    pub fn alloc_mmap(&mut self, len: u64, flags: VmaFlags) -> Result<u64> {
        let len = crate::mm::phys::page_align_up(len);
        if len == 0 {
            return Err(Verr::InvalidArg);
        }
        let start = self.mmap_next;
        let end = start.checked_add(len).ok_or(Verr::OutOfMemory)?;
        self.insert_vma(Vma { start, end, flags })?;
        self.mmap_next = end;
        Ok(start)
    }

    /// Clone for fork: identical layout, both sides marked copy-on-write,
    /// fresh ASID.
    pub fn fork_clone(&mut self) -> AddressSpace {
        for vma in self.vmas.iter_mut() {
            if vma.flags.contains(VmaFlags::WRITE) && !vma.flags.contains(VmaFlags::SHARED) {
                vma.flags |= VmaFlags::COW;
            }
        }
        AddressSpace {
            ttbr0: 0,
            asid: NEXT_ASID.fetch_add(1, Ordering::Relaxed),
            vmas: self.vmas.clone(),
            heap_start: self.heap_start,
            heap_break: self.heap_break,
            heap_max: self.heap_max,
            mmap_next: self.mmap_next,
        }
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        AddressSpace::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw() -> VmaFlags {
        VmaFlags::READ | VmaFlags::WRITE
    }

    #[test]
    fn insert_keeps_sorted_and_rejects_overlap() {
        let mut a = AddressSpace::new();
        a.insert_vma(Vma { start: 0x2000, end: 0x3000, flags: rw() }).unwrap();
        a.insert_vma(Vma { start: 0x1000, end: 0x2000, flags: rw() }).unwrap();
        assert_eq!(a.vmas()[0].start, 0x1000);
        assert!(a
            .insert_vma(Vma { start: 0x1800, end: 0x2800, flags: rw() })
            .is_err());
    }

    #[test]
    fn coverage_spans_adjacent_vmas() {
        let mut a = AddressSpace::new();
        a.insert_vma(Vma { start: 0x1000, end: 0x2000, flags: rw() }).unwrap();
        a.insert_vma(Vma { start: 0x2000, end: 0x3000, flags: rw() }).unwrap();
        assert!(a.covers(0x1800, 0x1000, VmaFlags::READ));
        assert!(!a.covers(0x2800, 0x1000, VmaFlags::READ));
        assert!(!a.covers(0x1000, 0x1000, VmaFlags::EXEC));
    }

    #[test]
    fn sbrk_grows_and_shrinks() {
        let mut a = AddressSpace::new();
        let old = a.do_sbrk(0x2000).unwrap();
        assert_eq!(old, USER_HEAP_BASE);
        assert_eq!(a.heap_break, USER_HEAP_BASE + 0x2000);
        assert!(a.covers(USER_HEAP_BASE, 0x2000, VmaFlags::WRITE));

        a.do_sbrk(-0x1000).unwrap();
        assert_eq!(a.heap_break, USER_HEAP_BASE + 0x1000);
        assert!(a.do_sbrk(-0x4000).is_err());
    }

    #[test]
    fn fork_marks_cow_and_changes_asid() {
        let mut a = AddressSpace::new();
        a.insert_vma(Vma { start: 0x1000, end: 0x2000, flags: rw() }).unwrap();
        let child = a.fork_clone();
        assert_ne!(a.asid, child.asid);
        assert!(a.vmas()[0].flags.contains(VmaFlags::COW));
        assert!(child.vmas()[0].flags.contains(VmaFlags::COW));
    }
}
