// Legacy per-process file descriptor table
//
// The descriptor API predates the capability handles and is kept for
// bring-up user programs. Descriptors index into a per-process table of
// open file objects.

use crate::error::{Result, Verr};
use crate::kobj::FileObject;
use alloc::sync::Arc;
use alloc::vec::Vec;

const MAX_FDS: usize = 64;

pub struct FdTable {
    entries: Vec<Option<Arc<FileObject>>>,
}

impl FdTable {
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(MAX_FDS);
        entries.resize_with(MAX_FDS, || None);
        FdTable { entries }
    }

    /// Allocate the lowest free descriptor for `file`.
    pub fn alloc(&mut self, file: Arc<FileObject>) -> Result<i32> {
        let slot = self
            .entries
            .iter_mut()
            .enumerate()
            .find(|(_, e)| e.is_none())
            .ok_or(Verr::OutOfMemory)?;
        *slot.1 = Some(file);
        Ok(slot.0 as i32)
    }

    pub fn get(&self, fd: i32) -> Result<Arc<FileObject>> {
        if fd < 0 {
            return Err(Verr::InvalidArg);
        }
        self.entries
            .get(fd as usize)
            .and_then(|e| e.clone())
            .ok_or(Verr::InvalidHandle)
    }

    pub fn close(&mut self, fd: i32) -> Result<()> {
        if fd < 0 {
            return Err(Verr::InvalidArg);
        }
        let slot = self
            .entries
            .get_mut(fd as usize)
            .ok_or(Verr::InvalidHandle)?;
        if slot.take().is_none() {
            return Err(Verr::InvalidHandle);
        }
        Ok(())
    }

    pub fn open_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        FdTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kobj::file::file_flags;
    use crate::vfs::ramfs::RamFs;
    use crate::vfs::ROOT_INODE;

    fn file() -> Arc<FileObject> {
        let fs = Arc::new(RamFs::new());
        let inode = fs.add_file(ROOT_INODE, "f", b"data").unwrap();
        FileObject::create_on(fs, inode, file_flags::O_RDONLY).unwrap()
    }

    #[test]
    fn alloc_reuses_lowest_free_slot() {
        let mut t = FdTable::new();
        let a = t.alloc(file()).unwrap();
        let b = t.alloc(file()).unwrap();
        assert_eq!((a, b), (0, 1));
        t.close(a).unwrap();
        assert_eq!(t.alloc(file()).unwrap(), 0);
        assert_eq!(t.open_count(), 2);
    }

    #[test]
    fn double_close_fails() {
        let mut t = FdTable::new();
        let fd = t.alloc(file()).unwrap();
        t.close(fd).unwrap();
        assert_eq!(t.close(fd), Err(Verr::InvalidHandle));
        assert_eq!(t.get(fd).err(), Some(Verr::InvalidHandle));
        assert_eq!(t.get(-1).err(), Some(Verr::InvalidArg));
    }
}
