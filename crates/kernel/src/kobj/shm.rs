//! Shared memory kernel object.
//!
//! Owns a contiguous run of physical pages that can be mapped into several
//! address spaces for zero-copy data transfer. The pages are returned to the
//! physical allocator when the last reference is dropped.

use crate::mm::phys;
use spin::Mutex;

/// Reference-counted shared memory region.
pub struct SharedMemoryObject {
    phys_addr: u64,
    size: u64,
    num_pages: u64,
    /// Virtual address of the creator's mapping, zero when unmapped.
    creator_virt: Mutex<u64>,
}

impl SharedMemoryObject {
    /// Allocate a page-aligned region of at least `size` bytes.
    pub fn create(size: u64) -> Option<SharedMemoryObject> {
        if size == 0 {
            return None;
        }
        let aligned = phys::page_align_up(size);
        let num_pages = aligned / phys::PAGE_SIZE;
        let phys_addr = phys::alloc_pages(num_pages).ok()?;
        Some(SharedMemoryObject {
            phys_addr,
            size: aligned,
            num_pages,
            creator_virt: Mutex::new(0),
        })
    }

    pub fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn num_pages(&self) -> u64 {
        self.num_pages
    }

    pub fn creator_virt(&self) -> u64 {
        *self.creator_virt.lock()
    }

    pub fn set_creator_virt(&self, virt: u64) {
        *self.creator_virt.lock() = virt;
    }
}

impl Drop for SharedMemoryObject {
    fn drop(&mut self) {
        if self.phys_addr != 0 && self.num_pages > 0 {
            phys::free_pages(self.phys_addr, self.num_pages);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_page_aligned() {
        let shm = SharedMemoryObject::create(100).unwrap();
        assert_eq!(shm.size(), phys::PAGE_SIZE);
        assert_eq!(shm.num_pages(), 1);
        assert_eq!(shm.phys_addr() % phys::PAGE_SIZE, 0);
    }

    #[test]
    fn zero_size_rejected() {
        assert!(SharedMemoryObject::create(0).is_none());
    }

    #[test]
    fn drop_releases_pages() {
        let before = phys::stats().used_pages;
        let shm = SharedMemoryObject::create(3 * phys::PAGE_SIZE).unwrap();
        assert_eq!(phys::stats().used_pages, before + 3);
        drop(shm);
        assert_eq!(phys::stats().used_pages, before);
    }
}
