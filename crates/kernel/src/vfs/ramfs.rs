//! In-memory filesystem for bring-up and tests.
//!
//! Implements the `Filesystem` trait over a flat inode table. Used before the
//! real root filesystem is mounted and by the kernel self-tests.

use super::{DirEntry, Filesystem, NodeType, ROOT_INODE};
use crate::error::{Result, Verr};
use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

struct RamNode {
    inode: u64,
    node_type: NodeType,
    /// File payload; empty for directories.
    data: Vec<u8>,
    /// Child entries for directories: (name, inode).
    children: Vec<(String, u64)>,
}

pub struct RamFs {
    nodes: Mutex<Vec<RamNode>>,
}

impl RamFs {
    /// Create an empty filesystem containing only the root directory.
    pub fn new() -> Self {
        let root = RamNode {
            inode: ROOT_INODE,
            node_type: NodeType::Directory,
            data: Vec::new(),
            children: Vec::new(),
        };
        RamFs {
            nodes: Mutex::new(alloc::vec![root]),
        }
    }

    fn next_inode(nodes: &[RamNode]) -> u64 {
        nodes.iter().map(|n| n.inode).max().unwrap_or(ROOT_INODE) + 1
    }

    fn add_node(&self, parent: u64, name: &str, node_type: NodeType, data: Vec<u8>) -> Result<u64> {
        let mut nodes = self.nodes.lock();
        let inode = Self::next_inode(&nodes);
        {
            let dir = nodes
                .iter_mut()
                .find(|n| n.inode == parent && n.node_type == NodeType::Directory)
                .ok_or(Verr::NotFound)?;
            if dir.children.iter().any(|(n, _)| n == name) {
                return Err(Verr::InvalidArg);
            }
            dir.children.push((String::from(name), inode));
        }
        nodes.push(RamNode {
            inode,
            node_type,
            data,
            children: Vec::new(),
        });
        Ok(inode)
    }

    /// Create a directory under `parent`.
    pub fn mkdir(&self, parent: u64, name: &str) -> Result<u64> {
        self.add_node(parent, name, NodeType::Directory, Vec::new())
    }

    /// Create a file under `parent` with the given contents.
    pub fn add_file(&self, parent: u64, name: &str, contents: &[u8]) -> Result<u64> {
        self.add_node(parent, name, NodeType::File, contents.to_vec())
    }
}

impl Filesystem for RamFs {
    fn root_inode(&self) -> u64 {
        ROOT_INODE
    }

    fn lookup(&self, dir_inode: u64, name: &str) -> Option<(u64, NodeType)> {
        let nodes = self.nodes.lock();
        let dir = nodes.iter().find(|n| n.inode == dir_inode)?;
        let (_, child_inode) = dir.children.iter().find(|(n, _)| n == name)?;
        let child = nodes.iter().find(|n| n.inode == *child_inode)?;
        Some((child.inode, child.node_type))
    }

    fn node_type(&self, inode: u64) -> Option<NodeType> {
        self.nodes
            .lock()
            .iter()
            .find(|n| n.inode == inode)
            .map(|n| n.node_type)
    }

    fn size_of(&self, inode: u64) -> Option<u64> {
        self.nodes
            .lock()
            .iter()
            .find(|n| n.inode == inode)
            .map(|n| n.data.len() as u64)
    }

    fn read_at(&self, inode: u64, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let nodes = self.nodes.lock();
        let node = nodes.iter().find(|n| n.inode == inode).ok_or(Verr::NotFound)?;
        if node.node_type != NodeType::File {
            return Err(Verr::Io);
        }
        let offset = offset as usize;
        if offset >= node.data.len() {
            return Ok(0);
        }
        let n = core::cmp::min(buf.len(), node.data.len() - offset);
        buf[..n].copy_from_slice(&node.data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, inode: u64, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut nodes = self.nodes.lock();
        let node = nodes
            .iter_mut()
            .find(|n| n.inode == inode)
            .ok_or(Verr::NotFound)?;
        if node.node_type != NodeType::File {
            return Err(Verr::Io);
        }
        let offset = offset as usize;
        let end = offset.checked_add(buf.len()).ok_or(Verr::InvalidArg)?;
        if end > node.data.len() {
            node.data.resize(end, 0);
        }
        node.data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn read_dir(&self, dir_inode: u64, index: u64) -> Option<DirEntry> {
        let nodes = self.nodes.lock();
        let dir = nodes.iter().find(|n| n.inode == dir_inode)?;
        let (name, child_inode) = dir.children.get(index as usize)?;
        let child = nodes.iter().find(|n| n.inode == *child_inode)?;
        Some(DirEntry {
            inode: child.inode,
            node_type: child.node_type,
            name: name.clone(),
        })
    }
}
