//! Reference-counted file object for capability-based I/O.
//!
//! A `FileObject` backs the handle-based I/O syscalls (FsOpen, IoRead,
//! IoWrite, IoSeek). It stores the inode number, a current byte offset for
//! sequential I/O, and the open flags that gate read/write access. The inode
//! itself is not pinned; every operation goes through the registered
//! filesystem.

use crate::error::{Result, Verr};
use crate::vfs::{self, Filesystem, NodeType};
use alloc::sync::Arc;
use spin::Mutex;

/// Open flags for the handle-based file API. These mirror the descriptor
/// based VFS flags so user space can share constants between the two APIs.
pub mod file_flags {
    pub const O_RDONLY: u32 = 0x0000;
    pub const O_WRONLY: u32 = 0x0001;
    pub const O_RDWR: u32 = 0x0002;
    pub const O_CREAT: u32 = 0x0040;
    pub const O_TRUNC: u32 = 0x0200;
    pub const O_APPEND: u32 = 0x0400;

    pub const ACCESS_MASK: u32 = 0x0003;
}

/// Whence values accepted by `seek`.
pub mod seek_origin {
    pub const SET: i32 = 0;
    pub const CUR: i32 = 1;
    pub const END: i32 = 2;
}

/// Reference-counted open file.
pub struct FileObject {
    fs: Arc<dyn Filesystem>,
    inode: u64,
    offset: Mutex<u64>,
    flags: u32,
}

impl FileObject {
    /// Open `inode` on the registered root filesystem.
    pub fn create(inode: u64, flags: u32) -> Option<Arc<FileObject>> {
        let fs = vfs::root_filesystem()?;
        Self::create_on(fs, inode, flags)
    }

    /// Open `inode` on a specific filesystem.
    pub fn create_on(fs: Arc<dyn Filesystem>, inode: u64, flags: u32) -> Option<Arc<FileObject>> {
        if fs.node_type(inode)? != NodeType::File {
            return None;
        }
        Some(Arc::new(FileObject {
            fs,
            inode,
            offset: Mutex::new(0),
            flags,
        }))
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn offset(&self) -> u64 {
        *self.offset.lock()
    }

    pub fn can_read(&self) -> bool {
        self.flags & file_flags::ACCESS_MASK != file_flags::O_WRONLY
    }

    pub fn can_write(&self) -> bool {
        self.flags & file_flags::ACCESS_MASK != file_flags::O_RDONLY
    }

    /// Read from the current offset, advancing it by the bytes read.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.can_read() {
            return Err(Verr::Permission);
        }
        let mut offset = self.offset.lock();
        let n = self.fs.read_at(self.inode, *offset, buf)?;
        *offset += n as u64;
        Ok(n)
    }

    /// Write at the current offset (end of file when opened with append),
    /// advancing the offset by the bytes written.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        if !self.can_write() {
            return Err(Verr::Permission);
        }
        let mut offset = self.offset.lock();
        if self.flags & file_flags::O_APPEND != 0 {
            *offset = self.fs.size_of(self.inode).ok_or(Verr::Io)?;
        }
        let n = self.fs.write_at(self.inode, *offset, buf)?;
        *offset += n as u64;
        Ok(n)
    }

    /// Reposition the file offset. Negative resulting positions are
    /// rejected.
    pub fn seek(&self, offset: i64, whence: i32) -> Result<u64> {
        let mut pos = self.offset.lock();
        let base = match whence {
            seek_origin::SET => 0,
            seek_origin::CUR => *pos as i64,
            seek_origin::END => self.fs.size_of(self.inode).ok_or(Verr::Io)? as i64,
            _ => return Err(Verr::InvalidArg),
        };
        let target = base.checked_add(offset).ok_or(Verr::InvalidArg)?;
        if target < 0 {
            return Err(Verr::InvalidArg);
        }
        *pos = target as u64;
        Ok(*pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::ramfs::RamFs;
    use crate::vfs::ROOT_INODE;

    fn file_on(contents: &[u8], flags: u32) -> Arc<FileObject> {
        let fs = Arc::new(RamFs::new());
        let inode = fs.add_file(ROOT_INODE, "f", contents).unwrap();
        FileObject::create_on(fs, inode, flags).unwrap()
    }

    #[test]
    fn sequential_reads_advance_offset() {
        let f = file_on(b"abcdef", file_flags::O_RDONLY);
        let mut buf = [0u8; 3];
        assert_eq!(f.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
        assert_eq!(f.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"def");
        assert_eq!(f.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn access_flags_are_enforced() {
        let f = file_on(b"data", file_flags::O_RDONLY);
        assert_eq!(f.write(b"x"), Err(Verr::Permission));
        let f = file_on(b"data", file_flags::O_WRONLY);
        let mut buf = [0u8; 1];
        assert_eq!(f.read(&mut buf), Err(Verr::Permission));
    }

    #[test]
    fn append_writes_at_end() {
        let f = file_on(b"abc", file_flags::O_RDWR | file_flags::O_APPEND);
        f.write(b"def").unwrap();
        f.seek(0, seek_origin::SET).unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(f.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn seek_origins() {
        let f = file_on(b"abcdef", file_flags::O_RDONLY);
        assert_eq!(f.seek(2, seek_origin::SET).unwrap(), 2);
        assert_eq!(f.seek(2, seek_origin::CUR).unwrap(), 4);
        assert_eq!(f.seek(-1, seek_origin::END).unwrap(), 5);
        assert_eq!(f.seek(-10, seek_origin::SET), Err(Verr::InvalidArg));
    }
}
