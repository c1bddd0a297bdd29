//! Filesystem interface consumed by the capability core.
//!
//! The on-disk filesystem (ViperFS) and the block stack live outside the
//! kernel core. The core only needs a narrow view of a filesystem: resolve a
//! name inside a directory, classify an inode, perform positioned reads and
//! writes, and enumerate directory entries by logical index. The `Filesystem`
//! trait captures exactly that view; the boot path registers the mounted root
//! filesystem here.

pub mod ramfs;

use crate::error::Result;
use alloc::string::String;
use alloc::sync::Arc;
use spin::Mutex;

/// Inode number of the filesystem root directory.
pub const ROOT_INODE: u64 = 2;

/// Node type tags shared with the directory-entry ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    File = 1,
    Directory = 2,
}

/// One directory entry produced by `read_dir`.
#[derive(Clone)]
pub struct DirEntry {
    pub inode: u64,
    pub node_type: NodeType,
    pub name: String,
}

/// The filesystem operations the core consumes.
pub trait Filesystem: Send + Sync {
    /// Inode of the root directory.
    fn root_inode(&self) -> u64;

    /// Resolve one path component inside a directory.
    fn lookup(&self, dir_inode: u64, name: &str) -> Option<(u64, NodeType)>;

    /// Classify an inode, or `None` if it does not exist.
    fn node_type(&self, inode: u64) -> Option<NodeType>;

    /// Size in bytes of a file inode.
    fn size_of(&self, inode: u64) -> Option<u64>;

    /// Read from a file inode at a byte offset.
    fn read_at(&self, inode: u64, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write to a file inode at a byte offset, extending the file if needed.
    fn write_at(&self, inode: u64, offset: u64, buf: &[u8]) -> Result<usize>;

    /// Directory entry at a logical index, or `None` past the end. The index
    /// is a stable enumeration cursor, not a byte offset.
    fn read_dir(&self, dir_inode: u64, index: u64) -> Option<DirEntry>;
}

static ROOT_FS: Mutex<Option<Arc<dyn Filesystem>>> = Mutex::new(None);

/// Register the mounted root filesystem. Called by the boot path after the
/// block stack comes up, and by tests with a ramfs.
pub fn set_root_filesystem(fs: Arc<dyn Filesystem>) {
    *ROOT_FS.lock() = Some(fs);
    crate::info!("vfs: root filesystem registered");
}

/// The registered root filesystem, if any.
pub fn root_filesystem() -> Option<Arc<dyn Filesystem>> {
    ROOT_FS.lock().clone()
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    *ROOT_FS.lock() = None;
}
