//! Assign namespace: short logical names for directories and services.
//!
//! An assign maps a name like `SYS` or `D0` to a directory inode (optionally
//! on a specific filesystem) or, for service assigns, to an IPC channel.
//! Paths of the form `NAME:rest/of/path` resolve through the assign table:
//! the prefix picks the base directory and the remainder is walked
//! component by component. Both `/` and `\` separate components.
//!
//! Names are matched case-insensitively over ASCII; non-ASCII bytes compare
//! verbatim. Multi-directory assigns chain extra table entries off the head
//! entry; system assigns are read-only.

use crate::cap::{Handle, Kind, Rights};
use crate::error::{Result, Verr};
use crate::kobj::{ChannelObject, DirObject, FileObject, KObject};
use crate::vfs::{self, Filesystem, NodeType};
use crate::viper;
use alloc::sync::Arc;
use alloc::vec::Vec;
use lazy_static::lazy_static;
use spin::Mutex;

/// Maximum number of table entries, chain nodes included.
pub const MAX_ASSIGNS: usize = 64;
/// Maximum assign name length, excluding the colon.
pub const MAX_ASSIGN_NAME: usize = 31;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AssignFlags: u32 {
        /// Read-only boot-time assign such as SYS: or D0:.
        const SYSTEM   = 1 << 0;
        /// Deferred resolution (reserved).
        const DEFERRED = 1 << 1;
        /// Multi-directory search path.
        const MULTI    = 1 << 2;
        /// Service assign backed by a channel.
        const SERVICE  = 1 << 3;
    }
}

#[derive(Clone)]
enum AssignTarget {
    Dir {
        inode: u64,
        /// Filesystem the inode lives on; `None` means the registered root.
        fs: Option<Arc<dyn Filesystem>>,
    },
    Service {
        channel_id: u32,
    },
}

#[derive(Clone)]
struct AssignEntry {
    name: heapless::String<31>,
    target: AssignTarget,
    flags: AssignFlags,
    /// Next table index in a multi-directory chain.
    next: Option<usize>,
    /// Chain nodes share the head's name but are skipped by lookups and
    /// listings.
    chain_node: bool,
}

struct AssignTable {
    entries: Vec<Option<AssignEntry>>,
}

lazy_static! {
    static ref ASSIGNS: Mutex<AssignTable> = Mutex::new(AssignTable {
        entries: {
            let mut v = Vec::with_capacity(MAX_ASSIGNS);
            v.resize_with(MAX_ASSIGNS, || None);
            v
        },
    });
}

/// ASCII case-insensitive name comparison.
fn names_equal(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .all(|(x, y)| x.to_ascii_uppercase() == y.to_ascii_uppercase())
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_ASSIGN_NAME && !name.contains(':')
}

fn find_head(table: &AssignTable, name: &str) -> Option<usize> {
    table.entries.iter().position(|e| {
        e.as_ref()
            .map(|entry| !entry.chain_node && names_equal(entry.name.as_str(), name))
            .unwrap_or(false)
    })
}

fn make_name(name: &str) -> Result<heapless::String<31>> {
    let mut s = heapless::String::new();
    s.push_str(name).map_err(|_| Verr::InvalidArg)?;
    Ok(s)
}

fn free_slot(table: &AssignTable) -> Option<usize> {
    table.entries.iter().position(|e| e.is_none())
}

pub fn init() {
    lazy_static::initialize(&ASSIGNS);
    if let Some(fs) = vfs::root_filesystem() {
        let root = fs.root_inode();
        let _ = set("SYS", root, AssignFlags::SYSTEM, None);
        let _ = set("D0", root, AssignFlags::SYSTEM, None);
    }
    crate::info!("assign: subsystem initialized");
}

/// Create or replace a directory assign. System entries refuse replacement.
pub fn set(
    name: &str,
    dir_inode: u64,
    flags: AssignFlags,
    fs: Option<Arc<dyn Filesystem>>,
) -> Result<()> {
    if !valid_name(name) {
        return Err(Verr::InvalidArg);
    }
    let mut table = ASSIGNS.lock();

    if let Some(idx) = find_head(&table, name) {
        let entry = table.entries[idx].as_mut().unwrap();
        if entry.flags.contains(AssignFlags::SYSTEM) {
            return Err(Verr::Permission);
        }
        entry.target = AssignTarget::Dir {
            inode: dir_inode,
            fs,
        };
        entry.flags = flags;
        return Ok(());
    }

    let slot = free_slot(&table).ok_or(Verr::OutOfMemory)?;
    table.entries[slot] = Some(AssignEntry {
        name: make_name(name)?,
        target: AssignTarget::Dir {
            inode: dir_inode,
            fs,
        },
        flags,
        next: None,
        chain_node: false,
    });
    crate::debug!("assign: set {}: -> inode {}", name, dir_inode);
    Ok(())
}

/// Create or replace an assign from a directory capability handle.
pub fn set_from_handle(name: &str, dir_handle: Handle, flags: AssignFlags) -> Result<()> {
    let resolved = viper::with_current_cap_table(|ct| {
        ct.get_checked(dir_handle, Kind::Directory)
            .and_then(|e| e.object.as_directory().cloned())
    })
    .ok_or(Verr::InvalidHandle)?;
    let dir = resolved.ok_or(Verr::InvalidHandle)?;
    set(name, dir.inode(), flags, Some(dir.filesystem()))
}

/// Register a service by name. The assign stores the low-level channel id
/// behind the given channel capability; the SERVICE flag is implied.
pub fn set_channel(name: &str, channel_handle: Handle, flags: AssignFlags) -> Result<()> {
    let channel_id = viper::with_current_cap_table(|ct| {
        ct.get_checked(channel_handle, Kind::Channel)
            .and_then(|e| e.object.as_channel().map(|c| c.id()))
    })
    .ok_or(Verr::InvalidHandle)?
    .ok_or(Verr::InvalidHandle)?;

    if !valid_name(name) {
        return Err(Verr::InvalidArg);
    }

    let mut table = ASSIGNS.lock();
    if let Some(idx) = find_head(&table, name) {
        let entry = table.entries[idx].as_mut().unwrap();
        if entry.flags.contains(AssignFlags::SYSTEM) {
            return Err(Verr::Permission);
        }
        entry.target = AssignTarget::Service { channel_id };
        entry.flags = flags | AssignFlags::SERVICE;
        return Ok(());
    }

    let slot = free_slot(&table).ok_or(Verr::OutOfMemory)?;
    table.entries[slot] = Some(AssignEntry {
        name: make_name(name)?,
        target: AssignTarget::Service { channel_id },
        flags: flags | AssignFlags::SERVICE,
        next: None,
        chain_node: false,
    });
    crate::info!("assign: registered service {}: channel {}", name, channel_id);
    Ok(())
}

/// Materialize a fresh send-only capability for a service assign in the
/// caller's table. The wrapper holds its own endpoint reference, so the
/// service stays reachable while any client handle is alive.
pub fn get_channel(name: &str) -> Option<Handle> {
    let channel_id = {
        let table = ASSIGNS.lock();
        let idx = find_head(&table, name)?;
        let entry = table.entries[idx].as_ref().unwrap();
        if !entry.flags.contains(AssignFlags::SERVICE) {
            return None;
        }
        match entry.target {
            AssignTarget::Service { channel_id } => channel_id,
            AssignTarget::Dir { .. } => return None,
        }
    };

    let wrapper = ChannelObject::wrap(channel_id, true)?;
    viper::with_current_cap_table(|ct| {
        ct.insert(
            KObject::Channel(Arc::new(wrapper)),
            Rights::WRITE | Rights::TRANSFER,
        )
        .ok()
    })
    .flatten()
}

/// Append a directory to a multi-directory assign, creating the assign if
/// it does not exist.
pub fn add(name: &str, dir_inode: u64) -> Result<()> {
    if !valid_name(name) {
        return Err(Verr::InvalidArg);
    }
    let mut table = ASSIGNS.lock();

    let head = match find_head(&table, name) {
        Some(idx) => idx,
        None => {
            let slot = free_slot(&table).ok_or(Verr::OutOfMemory)?;
            table.entries[slot] = Some(AssignEntry {
                name: make_name(name)?,
                target: AssignTarget::Dir {
                    inode: dir_inode,
                    fs: None,
                },
                flags: AssignFlags::MULTI,
                next: None,
                chain_node: false,
            });
            return Ok(());
        }
    };

    if table.entries[head]
        .as_ref()
        .unwrap()
        .flags
        .contains(AssignFlags::SYSTEM)
    {
        return Err(Verr::Permission);
    }

    let chain_name = table.entries[head].as_ref().unwrap().name.clone();
    let slot = free_slot(&table).ok_or(Verr::OutOfMemory)?;
    table.entries[slot] = Some(AssignEntry {
        name: chain_name,
        target: AssignTarget::Dir {
            inode: dir_inode,
            fs: None,
        },
        flags: AssignFlags::MULTI,
        next: None,
        chain_node: true,
    });

    // Link at the end of the chain
    let mut idx = head;
    loop {
        let entry = table.entries[idx].as_mut().unwrap();
        entry.flags |= AssignFlags::MULTI;
        match entry.next {
            Some(n) => idx = n,
            None => {
                entry.next = Some(slot);
                break;
            }
        }
    }
    Ok(())
}

/// Remove an assign and its whole chain. System assigns are protected.
pub fn remove(name: &str) -> Result<()> {
    let mut table = ASSIGNS.lock();
    let head = find_head(&table, name).ok_or(Verr::NotFound)?;
    if table.entries[head]
        .as_ref()
        .unwrap()
        .flags
        .contains(AssignFlags::SYSTEM)
    {
        return Err(Verr::Permission);
    }

    let mut idx = Some(head);
    while let Some(i) = idx {
        idx = table.entries[i].as_ref().and_then(|e| e.next);
        table.entries[i] = None;
    }
    crate::debug!("assign: removed {}", name);
    Ok(())
}

/// Base directory inode for an assign, head entry only.
pub fn get_inode(name: &str) -> Option<u64> {
    let table = ASSIGNS.lock();
    let idx = find_head(&table, name)?;
    match table.entries[idx].as_ref().unwrap().target {
        AssignTarget::Dir { inode, .. } => Some(inode),
        AssignTarget::Service { .. } => None,
    }
}

fn entry_filesystem(entry: &AssignEntry) -> Option<Arc<dyn Filesystem>> {
    match &entry.target {
        AssignTarget::Dir { fs: Some(fs), .. } => Some(fs.clone()),
        AssignTarget::Dir { fs: None, .. } => vfs::root_filesystem(),
        AssignTarget::Service { .. } => None,
    }
}

/// Insert a directory capability for an assign into the caller's table.
pub fn get(name: &str) -> Option<Handle> {
    let (inode, fs) = {
        let table = ASSIGNS.lock();
        let idx = find_head(&table, name)?;
        let entry = table.entries[idx].as_ref().unwrap();
        match entry.target {
            AssignTarget::Dir { inode, .. } => (inode, entry_filesystem(entry)?),
            AssignTarget::Service { .. } => return None,
        }
    };
    let dir = DirObject::create_on(fs, inode)?;
    viper::with_current_cap_table(|ct| {
        ct.insert(
            KObject::Directory(dir),
            Rights::READ | Rights::TRAVERSE,
        )
        .ok()
    })
    .flatten()
}

pub fn exists(name: &str) -> bool {
    let table = ASSIGNS.lock();
    find_head(&table, name).is_some()
}

pub fn is_system(name: &str) -> bool {
    let table = ASSIGNS.lock();
    match find_head(&table, name) {
        Some(idx) => table.entries[idx]
            .as_ref()
            .unwrap()
            .flags
            .contains(AssignFlags::SYSTEM),
        None => false,
    }
}

/// List head entries into `out`, returning the count written.
pub fn list(out: &mut [crate::abi::AssignInfo]) -> usize {
    let table = ASSIGNS.lock();
    let mut count = 0;
    for entry in table.entries.iter().flatten() {
        if entry.chain_node || count >= out.len() {
            continue;
        }
        let info = &mut out[count];
        *info = crate::abi::AssignInfo::default();
        crate::abi::copy_name(&mut info.name, entry.name.as_str());
        info.flags = entry.flags.bits();
        info.handle = match entry.target {
            AssignTarget::Dir { inode, .. } => inode as u32,
            AssignTarget::Service { channel_id } => channel_id,
        };
        count += 1;
    }
    count
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Split `NAME:rest` into the assign name and the remainder. Returns `None`
/// when there is no colon or the name part is empty or oversized.
pub fn parse_assign(path: &str) -> Option<(&str, &str)> {
    let colon = path.find(':')?;
    let (name, rest) = path.split_at(colon);
    if name.is_empty() || name.len() > MAX_ASSIGN_NAME {
        return None;
    }
    Some((name, &rest[1..]))
}

/// Resolve an assign-prefixed path to a file or directory capability in the
/// caller's table. The remainder is walked component by component; the
/// final component decides the capability kind. An empty remainder names
/// the assign's base directory.
pub fn resolve_path(path: &str, flags: u32) -> Result<Handle> {
    let (name, rest) = parse_assign(path).ok_or(Verr::InvalidArg)?;

    let (base_inode, fs) = {
        let table = ASSIGNS.lock();
        let idx = find_head(&table, name).ok_or(Verr::NotFound)?;
        let entry = table.entries[idx].as_ref().unwrap();
        match entry.target {
            AssignTarget::Dir { inode, .. } => {
                (inode, entry_filesystem(entry).ok_or(Verr::NotFound)?)
            }
            AssignTarget::Service { .. } => return Err(Verr::NotFound),
        }
    };

    let mut inode = base_inode;
    let mut node_type = NodeType::Directory;
    for component in rest.split(is_separator).filter(|c| !c.is_empty()) {
        if node_type != NodeType::Directory {
            return Err(Verr::NotFound);
        }
        let (next, kind) = fs.lookup(inode, component).ok_or(Verr::NotFound)?;
        inode = next;
        node_type = kind;
    }

    let insert = |object: KObject, rights: Rights| -> Result<Handle> {
        viper::with_current_cap_table(|ct| ct.insert(object, rights))
            .ok_or(Verr::NotSupported)?
    };

    match node_type {
        NodeType::Directory => {
            let dir = DirObject::create_on(fs, inode).ok_or(Verr::NotFound)?;
            insert(KObject::Directory(dir), Rights::READ | Rights::TRAVERSE)
        }
        NodeType::File => {
            let file = FileObject::create_on(fs, inode, flags).ok_or(Verr::NotFound)?;
            let mut rights = Rights::empty();
            if file.can_read() {
                rights |= Rights::READ;
            }
            if file.can_write() {
                rights |= Rights::WRITE;
            }
            insert(KObject::File(file), rights)
        }
    }
}

/// Install assigns for the standard directories when they exist.
pub fn setup_standard_assigns() {
    let fs = match vfs::root_filesystem() {
        Some(fs) => fs,
        None => return,
    };
    let root = fs.root_inode();
    for (assign_name, dir_name) in [("C", "c"), ("S", "s"), ("L", "l"), ("T", "t")] {
        if let Some((inode, NodeType::Directory)) = fs.lookup(root, dir_name) {
            let _ = set(assign_name, inode, AssignFlags::SYSTEM, None);
        }
    }
}

/// Print the assign table to the kernel log.
pub fn debug_dump() {
    let table = ASSIGNS.lock();
    for entry in table.entries.iter().flatten() {
        match &entry.target {
            AssignTarget::Dir { inode, .. } => {
                crate::info!(
                    "assign: {}: inode={} flags={:#x}{}",
                    entry.name.as_str(),
                    inode,
                    entry.flags.bits(),
                    if entry.chain_node { " (chain)" } else { "" }
                );
            }
            AssignTarget::Service { channel_id } => {
                crate::info!(
                    "assign: {}: service channel={} flags={:#x}",
                    entry.name.as_str(),
                    channel_id,
                    entry.flags.bits()
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    let mut table = ASSIGNS.lock();
    for e in table.entries.iter_mut() {
        *e = None;
    }
}
