//! Capability table: maps handles to kernel objects.
//!
//! Each process owns a table representing its view of kernel objects. A table
//! entry stores the object reference, a kind tag, a rights mask, and the
//! index of the capability it was derived from, enabling recursive
//! revocation. Free slots form a singly-linked free list threaded through the
//! slot array.
//!
//! The table also carries the owning process's capability bounding mask.
//! Every insertion masks the granted rights against it, so no capability
//! delivered to the process (created, derived, or received over IPC) can
//! carry rights outside the bounding set.

use super::handle::Handle;
use super::rights::Rights;
use crate::error::{Result, Verr};
use crate::kobj::KObject;
use alloc::vec::Vec;

/// Kinds of kernel objects referenced by capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Kind {
    Invalid = 0,
    // KHeap objects
    String = 1,
    Array = 2,
    Blob = 3,
    // IPC objects
    Channel = 16,
    Poll = 17,
    Timer = 18,
    // Process objects
    Task = 19,
    Viper = 20,
    // I/O objects
    File = 21,
    Directory = 22,
    Surface = 23,
    Input = 24,
    // Memory objects
    SharedMemory = 25,
}

impl Kind {
    pub fn from_u16(v: u16) -> Kind {
        match v {
            1 => Kind::String,
            2 => Kind::Array,
            3 => Kind::Blob,
            16 => Kind::Channel,
            17 => Kind::Poll,
            18 => Kind::Timer,
            19 => Kind::Task,
            20 => Kind::Viper,
            21 => Kind::File,
            22 => Kind::Directory,
            23 => Kind::Surface,
            24 => Kind::Input,
            25 => Kind::SharedMemory,
            _ => Kind::Invalid,
        }
    }
}

/// Sentinel parent index for root capabilities.
pub const NO_PARENT: u32 = 0xFFFF_FFFF;

/// Default table capacity per process.
pub const DEFAULT_CAPACITY: usize = 256;

/// End-of-list marker for the free list.
const FREE_END: u32 = 0xFFFF_FFFF;

/// A live capability entry.
#[derive(Clone)]
pub struct Entry {
    pub object: KObject,
    pub kind: Kind,
    pub rights: Rights,
    pub parent_index: u32,
}

enum SlotState {
    /// Unused slot; `next` threads the free list.
    Free { next: u32 },
    Live(Entry),
}

struct Slot {
    generation: u8,
    state: SlotState,
}

/// Per-process capability table.
pub struct Table {
    slots: Vec<Slot>,
    free_head: u32,
    count: usize,
    bounding: Rights,
}

/// Advance a slot generation, skipping the value that would make a handle
/// collide with the invalid sentinel.
fn next_generation(gen: u8) -> u8 {
    let n = gen.wrapping_add(1);
    if n == 0xFF {
        0
    } else {
        n
    }
}

impl Table {
    /// Create a table with `capacity` slots and a full free list.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let next = if i + 1 < capacity {
                (i + 1) as u32
            } else {
                FREE_END
            };
            slots.push(Slot {
                generation: 0,
                state: SlotState::Free { next },
            });
        }
        Table {
            slots,
            free_head: if capacity > 0 { 0 } else { FREE_END },
            count: 0,
            bounding: Rights::ALL,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Current capability bounding mask.
    pub fn bounding(&self) -> Rights {
        self.bounding
    }

    /// Irreversibly remove rights from the bounding mask. Later insertions
    /// can never carry the dropped rights.
    pub fn drop_bounding(&mut self, rights: Rights) {
        self.bounding &= !rights;
    }

    /// Allocate a handle for `object` with `rights`, masked by the bounding
    /// set. Fails when the table is full; the free list is left unchanged.
    pub fn insert(&mut self, object: KObject, rights: Rights) -> Result<Handle> {
        self.insert_derived(object, rights, NO_PARENT)
    }

    fn insert_derived(&mut self, object: KObject, rights: Rights, parent: u32) -> Result<Handle> {
        let index = self.free_head;
        if index == FREE_END {
            return Err(Verr::OutOfMemory);
        }
        let kind = object.kind();
        let slot = &mut self.slots[index as usize];
        let next = match slot.state {
            SlotState::Free { next } => next,
            SlotState::Live(_) => return Err(Verr::Unknown),
        };
        slot.state = SlotState::Live(Entry {
            object,
            kind,
            rights: rights & self.bounding,
            parent_index: parent,
        });
        self.free_head = next;
        self.count += 1;
        Ok(Handle::from_parts(index, slot.generation))
    }

    fn slot_for(&self, h: Handle) -> Option<&Slot> {
        if h.is_invalid() {
            return None;
        }
        let slot = self.slots.get(h.index() as usize)?;
        if slot.generation != h.generation() {
            return None;
        }
        Some(slot)
    }

    /// Resolve a handle to its live entry. Rejects the invalid sentinel,
    /// out-of-range indices, free slots, and stale generations.
    pub fn get(&self, h: Handle) -> Option<&Entry> {
        match &self.slot_for(h)?.state {
            SlotState::Live(entry) => Some(entry),
            SlotState::Free { .. } => None,
        }
    }

    /// Resolve a handle and verify its kind tag.
    pub fn get_checked(&self, h: Handle, expected_kind: Kind) -> Option<&Entry> {
        self.get(h).filter(|e| e.kind == expected_kind)
    }

    /// Resolve a handle, verify kind, and require every right in `required`.
    pub fn get_with_rights(&self, h: Handle, kind: Kind, required: Rights) -> Option<&Entry> {
        self.get_checked(h, kind).filter(|e| e.rights.has(required))
    }

    /// Release a handle: invalidate the entry, bump the generation so stale
    /// handles fail, and push the slot back onto the free list. Does not
    /// recurse into derived children; use `revoke` for that.
    pub fn remove(&mut self, h: Handle) -> Result<()> {
        if self.get(h).is_none() {
            return Err(Verr::InvalidHandle);
        }
        self.remove_index(h.index());
        Ok(())
    }

    fn remove_index(&mut self, index: u32) {
        let free_head = self.free_head;
        let slot = &mut self.slots[index as usize];
        debug_assert!(matches!(slot.state, SlotState::Live(_)));
        slot.state = SlotState::Free { next: free_head };
        slot.generation = next_generation(slot.generation);
        self.free_head = index;
        self.count -= 1;
    }

    /// Revoke a handle and every capability derived from it, directly or
    /// transitively. Returns the number of capabilities revoked.
    pub fn revoke(&mut self, h: Handle) -> Result<u32> {
        if self.get(h).is_none() {
            return Err(Verr::InvalidHandle);
        }

        let capacity = self.capacity();
        let mut doomed = Vec::new();
        let mut marked = alloc::vec![false; capacity];
        doomed.push(h.index());
        marked[h.index() as usize] = true;

        // Scan per level until the frontier is empty. Parent indices form a
        // tree rooted at NO_PARENT, so this terminates within `capacity`
        // passes; the guard catches a corrupted (cyclic) parent chain.
        let mut frontier = doomed.clone();
        let mut passes = 0;
        while !frontier.is_empty() {
            passes += 1;
            debug_assert!(passes <= capacity, "cycle in capability derivation tree");
            if passes > capacity {
                break;
            }
            let mut next_frontier = Vec::new();
            for i in 0..capacity {
                if marked[i] {
                    continue;
                }
                if let SlotState::Live(entry) = &self.slots[i].state {
                    if frontier.contains(&entry.parent_index) {
                        marked[i] = true;
                        doomed.push(i as u32);
                        next_frontier.push(i as u32);
                    }
                }
            }
            frontier = next_frontier;
        }

        for index in &doomed {
            self.remove_index(*index);
        }
        Ok(doomed.len() as u32)
    }

    /// Derive a new capability to the same object with narrowed rights.
    /// Requires `DERIVE` on the source handle; the derived rights are the
    /// intersection of the source rights and `new_rights`.
    pub fn derive(&mut self, h: Handle, new_rights: Rights) -> Result<Handle> {
        let entry = self.get(h).ok_or(Verr::InvalidHandle)?;
        if !entry.rights.has(Rights::DERIVE) {
            return Err(Verr::InvalidHandle);
        }
        let object = entry.object.clone();
        let effective = entry.rights & new_rights;
        self.insert_derived(object, effective, h.index())
    }

    /// Raw entry access for iteration and diagnostics. Returns the live
    /// entry at `index` without generation validation.
    pub fn entry_at(&self, index: usize) -> Option<&Entry> {
        match &self.slots.get(index)?.state {
            SlotState::Live(entry) => Some(entry),
            SlotState::Free { .. } => None,
        }
    }

    /// Generation counter for a slot index.
    pub fn generation_at(&self, index: usize) -> u8 {
        self.slots.get(index).map(|s| s.generation).unwrap_or(0)
    }

    /// Reconstruct the handle for a live slot index.
    pub fn handle_at(&self, index: usize) -> Option<Handle> {
        self.entry_at(index)?;
        Some(Handle::from_parts(index as u32, self.generation_at(index)))
    }
}

impl Default for Table {
    fn default() -> Self {
        Table::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kobj::Blob;
    use alloc::sync::Arc;

    fn blob() -> KObject {
        KObject::Blob(Arc::new(Blob::create(16).unwrap()))
    }

    #[test]
    fn insert_get_remove_get() {
        let mut t = Table::new(8);
        let h = t.insert(blob(), Rights::RW).unwrap();
        assert!(t.get(h).is_some());
        assert_eq!(t.count(), 1);
        t.remove(h).unwrap();
        assert!(t.get(h).is_none());
        assert_eq!(t.count(), 0);
    }

    #[test]
    fn stale_generation_is_rejected() {
        let mut t = Table::new(8);
        let h1 = t.insert(blob(), Rights::READ).unwrap();
        t.remove(h1).unwrap();
        let h2 = t.insert(blob(), Rights::READ).unwrap();
        // Same slot, new generation
        assert_eq!(h1.index(), h2.index());
        assert_ne!(h1.generation(), h2.generation());
        assert!(t.get(h1).is_none());
        assert!(t.get(h2).is_some());
    }

    #[test]
    fn full_table_fails_cleanly() {
        let mut t = Table::new(2);
        let a = t.insert(blob(), Rights::READ).unwrap();
        let _b = t.insert(blob(), Rights::READ).unwrap();
        assert_eq!(t.insert(blob(), Rights::READ), Err(Verr::OutOfMemory));
        // Free list is intact: removal makes insertion possible again
        t.remove(a).unwrap();
        assert!(t.insert(blob(), Rights::READ).is_ok());
    }

    #[test]
    fn kind_and_rights_checks() {
        let mut t = Table::new(8);
        let h = t.insert(blob(), Rights::READ).unwrap();
        assert!(t.get_checked(h, Kind::Blob).is_some());
        assert!(t.get_checked(h, Kind::Channel).is_none());
        assert!(t.get_with_rights(h, Kind::Blob, Rights::READ).is_some());
        assert!(t.get_with_rights(h, Kind::Blob, Rights::WRITE).is_none());
    }

    #[test]
    fn derive_narrows_rights() {
        let mut t = Table::new(8);
        let root = t.insert(blob(), Rights::RW | Rights::DERIVE).unwrap();
        let child = t.derive(root, Rights::READ | Rights::DERIVE).unwrap();
        let entry = t.get(child).unwrap();
        assert_eq!(entry.rights, Rights::READ | Rights::DERIVE);
        assert_eq!(entry.parent_index, root.index());

        // Derivation can only narrow, never widen
        let wide = t.derive(child, Rights::RW | Rights::EXECUTE).unwrap();
        assert_eq!(t.get(wide).unwrap().rights, Rights::READ);
    }

    #[test]
    fn derive_requires_derive_right() {
        let mut t = Table::new(8);
        let h = t.insert(blob(), Rights::RW).unwrap();
        assert_eq!(t.derive(h, Rights::READ), Err(Verr::InvalidHandle));
    }

    #[test]
    fn revoke_propagates_transitively() {
        let mut t = Table::new(8);
        let root = t.insert(blob(), Rights::RW | Rights::DERIVE).unwrap();
        let mid = t.derive(root, Rights::READ | Rights::DERIVE).unwrap();
        let leaf = t.derive(mid, Rights::READ).unwrap();

        assert_eq!(t.revoke(root).unwrap(), 3);
        assert!(t.get(root).is_none());
        assert!(t.get(mid).is_none());
        assert!(t.get(leaf).is_none());
        assert_eq!(t.count(), 0);
    }

    #[test]
    fn revoke_subtree_leaves_siblings() {
        let mut t = Table::new(8);
        let root = t.insert(blob(), Rights::RW | Rights::DERIVE).unwrap();
        let a = t.derive(root, Rights::READ | Rights::DERIVE).unwrap();
        let b = t.derive(root, Rights::WRITE).unwrap();
        let a_child = t.derive(a, Rights::READ).unwrap();

        assert_eq!(t.revoke(a).unwrap(), 2);
        assert!(t.get(a).is_none());
        assert!(t.get(a_child).is_none());
        assert!(t.get(root).is_some());
        assert!(t.get(b).is_some());
    }

    #[test]
    fn remove_does_not_recurse() {
        let mut t = Table::new(8);
        let root = t.insert(blob(), Rights::RW | Rights::DERIVE).unwrap();
        let child = t.derive(root, Rights::READ).unwrap();
        t.remove(root).unwrap();
        assert!(t.get(child).is_some());
    }

    #[test]
    fn bounding_mask_applies_to_all_insertions() {
        let mut t = Table::new(8);
        t.drop_bounding(Rights::WRITE);
        let h = t.insert(blob(), Rights::RW | Rights::DERIVE).unwrap();
        assert_eq!(t.get(h).unwrap().rights, Rights::READ | Rights::DERIVE);

        let d = t.derive(h, Rights::RW).unwrap();
        assert_eq!(t.get(d).unwrap().rights, Rights::READ);
    }

    #[test]
    fn generation_skips_invalid_sentinel_value() {
        let mut gen = 0u8;
        for _ in 0..600 {
            gen = next_generation(gen);
            assert_ne!(gen, 0xFF);
        }
    }

    #[test]
    fn listing_via_entry_at() {
        let mut t = Table::new(4);
        let h = t.insert(blob(), Rights::READ).unwrap();
        let live: alloc::vec::Vec<_> = (0..t.capacity()).filter_map(|i| t.handle_at(i)).collect();
        assert_eq!(live, alloc::vec![h]);
    }
}
