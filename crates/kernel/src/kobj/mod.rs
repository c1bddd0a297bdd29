//! Reference-counted kernel objects referenced by capabilities.
//!
//! Capability entries hold a typed object reference rather than a raw
//! pointer: `KObject` is a sum over `Arc`-counted concrete objects. Cloning a
//! `KObject` shares the underlying object; dropping the last clone runs the
//! object's destructor, which releases any OS-visible resources (channel
//! endpoints, physical pages).

pub mod blob;
pub mod channel;
pub mod dir;
pub mod file;
pub mod shm;

pub use blob::Blob;
pub use channel::{ChannelObject, EndpointMask};
pub use dir::DirObject;
pub use file::FileObject;
pub use shm::SharedMemoryObject;

use crate::cap::Kind;
use alloc::sync::Arc;

/// Typed reference to a kernel object.
#[derive(Clone)]
pub enum KObject {
    Blob(Arc<Blob>),
    Channel(Arc<ChannelObject>),
    File(Arc<FileObject>),
    Directory(Arc<DirObject>),
    SharedMemory(Arc<SharedMemoryObject>),
}

impl KObject {
    /// Kind tag mirrored into the capability entry.
    pub fn kind(&self) -> Kind {
        match self {
            KObject::Blob(_) => Kind::Blob,
            KObject::Channel(_) => Kind::Channel,
            KObject::File(_) => Kind::File,
            KObject::Directory(_) => Kind::Directory,
            KObject::SharedMemory(_) => Kind::SharedMemory,
        }
    }

    pub fn as_channel(&self) -> Option<&Arc<ChannelObject>> {
        match self {
            KObject::Channel(ch) => Some(ch),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&Arc<FileObject>> {
        match self {
            KObject::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_directory(&self) -> Option<&Arc<DirObject>> {
        match self {
            KObject::Directory(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_shared_memory(&self) -> Option<&Arc<SharedMemoryObject>> {
        match self {
            KObject::SharedMemory(m) => Some(m),
            _ => None,
        }
    }
}
