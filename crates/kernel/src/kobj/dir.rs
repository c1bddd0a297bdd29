//! Reference-counted directory object for the handle-based filesystem API.
//!
//! Stores the directory inode and a logical enumeration cursor used by
//! FsReadDir to return entries one at a time. The cursor is an index into
//! the directory's entry stream, not a byte offset, so the user-facing API
//! stays stable regardless of the on-disk record layout.

use crate::abi::FsDirEnt;
use crate::vfs::{self, Filesystem, NodeType};
use alloc::sync::Arc;
use spin::Mutex;

/// Reference-counted open directory.
pub struct DirObject {
    fs: Arc<dyn Filesystem>,
    inode: u64,
    cursor: Mutex<u64>,
}

impl DirObject {
    /// Open a directory inode on the registered root filesystem.
    pub fn create(inode: u64) -> Option<Arc<DirObject>> {
        let fs = vfs::root_filesystem()?;
        Self::create_on(fs, inode)
    }

    /// Open a directory inode on a specific filesystem.
    pub fn create_on(fs: Arc<dyn Filesystem>, inode: u64) -> Option<Arc<DirObject>> {
        if fs.node_type(inode)? != NodeType::Directory {
            return None;
        }
        Some(Arc::new(DirObject {
            fs,
            inode,
            cursor: Mutex::new(0),
        }))
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    pub fn filesystem(&self) -> Arc<dyn Filesystem> {
        self.fs.clone()
    }

    pub fn cursor(&self) -> u64 {
        *self.cursor.lock()
    }

    /// Reset enumeration to the first entry.
    pub fn rewind(&self) {
        *self.cursor.lock() = 0;
    }

    /// Resolve a child entry by name.
    pub fn lookup(&self, name: &str) -> Option<(u64, NodeType)> {
        self.fs.lookup(self.inode, name)
    }

    /// Fill `out` with the next directory entry, advancing the cursor.
    /// Returns false at the end of the directory.
    pub fn read_next(&self, out: &mut FsDirEnt) -> bool {
        let mut cursor = self.cursor.lock();
        let entry = match self.fs.read_dir(self.inode, *cursor) {
            Some(e) => e,
            None => return false,
        };
        *cursor += 1;

        out.inode = entry.inode;
        out.node_type = entry.node_type as u8;
        let name = entry.name.as_bytes();
        let len = core::cmp::min(name.len(), out.name.len() - 1);
        out.name[..len].copy_from_slice(&name[..len]);
        out.name[len] = 0;
        out.name_len = len as u8;
        true
    }

    /// Revalidate that the backing inode still is a directory. Handles can
    /// go stale if the underlying entry is replaced.
    pub fn is_valid_dir(&self) -> bool {
        self.fs.node_type(self.inode) == Some(NodeType::Directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::ramfs::RamFs;
    use crate::vfs::ROOT_INODE;

    #[test]
    fn enumerate_and_rewind() {
        let fs = Arc::new(RamFs::new());
        fs.add_file(ROOT_INODE, "one", b"1").unwrap();
        fs.mkdir(ROOT_INODE, "two").unwrap();
        let dir = DirObject::create_on(fs, ROOT_INODE).unwrap();

        let mut ent = FsDirEnt::default();
        assert!(dir.read_next(&mut ent));
        assert_eq!(ent.name_str(), "one");
        assert_eq!(ent.node_type, NodeType::File as u8);
        assert!(dir.read_next(&mut ent));
        assert_eq!(ent.name_str(), "two");
        assert!(!dir.read_next(&mut ent));

        dir.rewind();
        assert!(dir.read_next(&mut ent));
        assert_eq!(ent.name_str(), "one");
    }

    #[test]
    fn create_rejects_file_inodes() {
        let fs = Arc::new(RamFs::new());
        let file = fs.add_file(ROOT_INODE, "f", b"x").unwrap();
        assert!(DirObject::create_on(fs, file).is_none());
    }
}
