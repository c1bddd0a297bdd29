//! In-kernel message-passing channels with handle transfer.
//!
//! Channels live in a global fixed-size table. Each open channel keeps a
//! bounded FIFO of messages, per-direction wait queues (multiple waiters,
//! FIFO order), and separate reference counts for the send and recv
//! endpoints. A message carries payload bytes and up to four capability
//! handles.
//!
//! Handle transfer moves ownership: `try_send` captures the object, kind,
//! and rights out of the sender's capability table and removes the sender's
//! entry; `try_recv` inserts the captured objects into the receiver's table
//! and hands back freshly allocated handle values. Transfer is atomic with
//! the enqueue/dequeue under the channel lock.
//!
//! Lock order: channel table, then capability table, then task table. The
//! poll subsystem is notified only after the channel lock is released.
//! Objects are never dropped while the channel lock is held; a dropped
//! channel object closes its endpoint, which takes this lock again.

use crate::cap::{Handle, Kind, Rights};
use crate::error::{Result, Verr};
use crate::ipc::poll::{self, EventMask};
use crate::kobj::{ChannelObject, EndpointMask, KObject};
use crate::task::{self, TaskId};
use crate::viper;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use lazy_static::lazy_static;
use spin::Mutex;

/// Maximum bytes stored in a single channel message.
pub const MAX_MSG_SIZE: usize = 8192;
/// Maximum number of channels that can exist at once.
pub const MAX_CHANNELS: usize = 256;
/// Default number of queued messages per channel.
pub const DEFAULT_PENDING: u32 = 16;
/// Maximum configurable pending message capacity.
pub const MAX_PENDING: u32 = 32;
/// Maximum number of handles transferred in one message.
pub const MAX_HANDLES_PER_MSG: usize = 4;

/// A capability captured out of the sender's table, awaiting insertion into
/// the receiver's table.
pub struct TransferredHandle {
    pub object: KObject,
    pub kind: Kind,
    pub rights: Rights,
}

/// One queued message.
pub struct Message {
    pub data: Vec<u8>,
    pub sender_id: TaskId,
    pub handles: Vec<TransferredHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Open,
    /// Both endpoints closed; woken waiters are still draining.
    Closed,
}

struct Channel {
    id: u32,
    state: ChannelState,
    queue: VecDeque<Message>,
    capacity: u32,
    send_waiters: VecDeque<TaskId>,
    recv_waiters: VecDeque<TaskId>,
    send_refs: u32,
    recv_refs: u32,
    owner_task: TaskId,
    /// Waiters woken at close that have not yet observed the closed state.
    draining: u32,
}

struct ChannelTable {
    slots: Vec<Option<Channel>>,
    next_id: u32,
}

impl ChannelTable {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_CHANNELS);
        slots.resize_with(MAX_CHANNELS, || None);
        ChannelTable { slots, next_id: 1 }
    }

    fn find(&mut self, id: u32) -> Option<&mut Channel> {
        self.slots
            .iter_mut()
            .filter_map(|s| s.as_mut())
            .find(|c| c.id == id)
    }

    fn find_open(&mut self, id: u32) -> Option<&mut Channel> {
        self.find(id).filter(|c| c.state == ChannelState::Open)
    }

    fn alloc(&mut self, capacity: u32, owner_task: TaskId) -> Result<u32> {
        let id = self.next_id;
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(Verr::OutOfMemory)?;
        self.next_id += 1;
        *slot = Some(Channel {
            id,
            state: ChannelState::Open,
            queue: VecDeque::new(),
            capacity,
            send_waiters: VecDeque::new(),
            recv_waiters: VecDeque::new(),
            send_refs: 1,
            recv_refs: 1,
            owner_task,
            draining: 0,
        });
        Ok(id)
    }

    fn release(&mut self, id: u32) {
        for slot in self.slots.iter_mut() {
            if slot.as_ref().map(|c| c.id) == Some(id) {
                *slot = None;
                return;
            }
        }
    }
}

lazy_static! {
    static ref CHANNELS: Mutex<ChannelTable> = Mutex::new(ChannelTable::new());
}

/// Both endpoint handles returned by `create_pair`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPair {
    pub send: Handle,
    pub recv: Handle,
}

/// Result of a successful receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// Full size of the dequeued message. May exceed the bytes copied when
    /// the caller's buffer was short.
    pub size: usize,
    /// Handles inserted into the receiver's table, in transfer order.
    pub handles: Vec<Handle>,
}

pub fn init() {
    lazy_static::initialize(&CHANNELS);
    crate::info!("channel: subsystem initialized ({} slots)", MAX_CHANNELS);
}

/// Create a channel and insert both endpoint capabilities into the calling
/// process's table: a send handle (WRITE | TRANSFER | DERIVE) and a recv
/// handle (READ | TRANSFER | DERIVE). On failure the slot is returned to the
/// pool and the channel id is burned.
pub fn create_pair(capacity: u32) -> Result<ChannelPair> {
    if capacity == 0 || capacity > MAX_PENDING {
        return Err(Verr::InvalidArg);
    }

    let owner = task::current().unwrap_or(0);
    let id = CHANNELS.lock().alloc(capacity, owner)?;

    // Each endpoint object owns one of the initial reference counts; if an
    // insertion fails the object drops, the endpoint closes, and the channel
    // is reclaimed.
    let send_obj = ChannelObject::adopt(id, EndpointMask::SEND).ok_or(Verr::Unknown)?;
    let recv_obj = ChannelObject::adopt(id, EndpointMask::RECV).ok_or(Verr::Unknown)?;

    let inserted = viper::with_current_cap_table(move |ct| {
        let send = ct.insert(
            KObject::Channel(Arc::new(send_obj)),
            Rights::WRITE | Rights::TRANSFER | Rights::DERIVE,
        )?;
        match ct.insert(
            KObject::Channel(Arc::new(recv_obj)),
            Rights::READ | Rights::TRANSFER | Rights::DERIVE,
        ) {
            Ok(recv) => Ok(ChannelPair { send, recv }),
            Err(e) => {
                let _ = ct.remove(send);
                Err(e)
            }
        }
    });

    match inserted {
        Some(Ok(pair)) => {
            crate::debug!(
                "channel: created {} (send={:#x}, recv={:#x})",
                id,
                pair.send.raw(),
                pair.recv.raw()
            );
            Ok(pair)
        }
        Some(Err(e)) => Err(e),
        // No current process: the endpoint objects were dropped with the
        // closure and the channel already reclaimed.
        None => Err(Verr::NotSupported),
    }
}

/// Legacy create: returns a bare channel id with both endpoint counts
/// initialized, no capabilities inserted. Used by pre-capability bring-up.
pub fn create_legacy(capacity: u32) -> Result<u32> {
    if capacity == 0 || capacity > MAX_PENDING {
        return Err(Verr::InvalidArg);
    }
    let owner = task::current().unwrap_or(0);
    let id = CHANNELS.lock().alloc(capacity, owner)?;
    crate::debug!("channel: created {} (legacy)", id);
    Ok(id)
}

pub fn exists(channel_id: u32) -> bool {
    CHANNELS.lock().find_open(channel_id).is_some()
}

pub fn has_message(channel_id: u32) -> bool {
    CHANNELS
        .lock()
        .find_open(channel_id)
        .map(|c| !c.queue.is_empty())
        .unwrap_or(false)
}

pub fn has_space(channel_id: u32) -> bool {
    CHANNELS
        .lock()
        .find_open(channel_id)
        .map(|c| (c.queue.len() as u32) < c.capacity)
        .unwrap_or(false)
}

pub fn get_capacity(channel_id: u32) -> Option<u32> {
    CHANNELS.lock().find_open(channel_id).map(|c| c.capacity)
}

/// Task that created the channel. Informational only.
pub fn owner_of(channel_id: u32) -> Option<TaskId> {
    CHANNELS.lock().find_open(channel_id).map(|c| c.owner_task)
}

/// Change a channel's capacity. The new value may not cut below the number
/// of messages currently queued.
pub fn set_capacity(channel_id: u32, new_capacity: u32) -> Result<()> {
    if new_capacity == 0 || new_capacity > MAX_PENDING {
        return Err(Verr::InvalidArg);
    }
    let mut table = CHANNELS.lock();
    let ch = table.find_open(channel_id).ok_or(Verr::InvalidHandle)?;
    if (ch.queue.len() as u32) > new_capacity {
        return Err(Verr::InvalidArg);
    }
    ch.capacity = new_capacity;
    Ok(())
}

/// Atomically increment an endpoint reference count. Fails when the channel
/// is not open, so a racing close cannot be resurrected.
pub fn add_endpoint_ref(channel_id: u32, is_send: bool) -> Result<()> {
    let mut table = CHANNELS.lock();
    let ch = table.find_open(channel_id).ok_or(Verr::InvalidHandle)?;
    if is_send {
        ch.send_refs += 1;
    } else {
        ch.recv_refs += 1;
    }
    Ok(())
}

/// Non-blocking send with optional handle transfer.
///
/// Transferred handles are looked up in the sender's capability table;
/// entries that are invalid or lack TRANSFER are skipped. Accepted entries
/// are captured into the message in input order and removed from the
/// sender's table in the same critical section.
pub fn try_send(channel_id: u32, data: &[u8], handles: &[Handle]) -> Result<()> {
    let waiter;
    {
        let mut table = CHANNELS.lock();
        let ch = table.find(channel_id).ok_or(Verr::InvalidHandle)?;
        if ch.state != ChannelState::Open {
            return Err(Verr::ChannelClosed);
        }
        if data.len() > MAX_MSG_SIZE {
            return Err(Verr::MsgTooLarge);
        }
        if handles.len() > MAX_HANDLES_PER_MSG {
            return Err(Verr::InvalidArg);
        }
        if ch.queue.len() as u32 >= ch.capacity {
            return Err(Verr::WouldBlock);
        }

        let mut transferred = Vec::new();
        if !handles.is_empty() {
            viper::with_current_cap_table(|ct| {
                for &h in handles {
                    let entry = match ct.get(h) {
                        Some(e) => e,
                        None => continue,
                    };
                    if !entry.rights.has(Rights::TRANSFER) {
                        continue;
                    }
                    transferred.push(TransferredHandle {
                        object: entry.object.clone(),
                        kind: entry.kind,
                        rights: entry.rights,
                    });
                    let _ = ct.remove(h);
                }
            });
        }

        ch.queue.push_back(Message {
            data: data.to_vec(),
            sender_id: task::current().unwrap_or(0),
            handles: transferred,
        });
        waiter = ch.recv_waiters.pop_front();
    }

    if let Some(t) = waiter {
        task::wake(t);
    }
    poll::notify_handle(channel_id, EventMask::CHANNEL_READ);
    Ok(())
}

/// Non-blocking receive with handle transfer.
///
/// Copies up to `buf.len()` bytes; the full message size is returned so
/// short reads are observable. Transferred handles are inserted into the
/// receiver's capability table (masked by its bounding set); a handle whose
/// insertion fails is dropped and the drop is logged.
pub fn try_recv(channel_id: u32, buf: &mut [u8]) -> Result<Received> {
    let waiter;
    let received;
    // Objects from failed insertions must not drop under the channel lock
    let mut spilled: Vec<KObject> = Vec::new();
    let mut dropped = 0usize;
    {
        let mut table = CHANNELS.lock();
        let ch = table.find(channel_id).ok_or(Verr::InvalidHandle)?;
        if ch.state != ChannelState::Open {
            return Err(Verr::ChannelClosed);
        }
        let msg = match ch.queue.pop_front() {
            Some(m) => m,
            None => return Err(Verr::WouldBlock),
        };

        let n = core::cmp::min(msg.data.len(), buf.len());
        buf[..n].copy_from_slice(&msg.data[..n]);

        let mut out_handles = Vec::new();
        let mut pending = msg.handles;
        if !pending.is_empty() {
            let inserted = viper::with_current_cap_table(|ct| {
                for th in pending.drain(..) {
                    match ct.insert(th.object.clone(), th.rights) {
                        Ok(h) => out_handles.push(h),
                        Err(_) => {
                            dropped += 1;
                            spilled.push(th.object);
                        }
                    }
                }
            });
            if inserted.is_none() {
                // No receiving process context: the handles are dropped
                dropped += pending.len();
                spilled.extend(pending.into_iter().map(|th| th.object));
            }
        }

        received = Received {
            size: msg.data.len(),
            handles: out_handles,
        };
        waiter = ch.send_waiters.pop_front();
    }

    if dropped > 0 {
        crate::warn!(
            "channel: {} dropped {} transferred handle(s) on recv (table full)",
            channel_id,
            dropped
        );
    }
    drop(spilled);

    if let Some(t) = waiter {
        task::wake(t);
    }
    poll::notify_handle(channel_id, EventMask::CHANNEL_WRITE);
    Ok(received)
}

/// Blocking send. Loops on the non-blocking path, parking the task on the
/// channel's send wait queue while the buffer is full. The Blocked
/// transition happens under the channel lock that also registers the
/// waiter, then the lock is dropped and the task yields.
pub fn send(channel_id: u32, data: &[u8]) -> Result<()> {
    let mut was_parked = false;
    loop {
        match try_send(channel_id, data, &[]) {
            Err(Verr::WouldBlock) => {}
            Err(Verr::ChannelClosed) => {
                let mut table = CHANNELS.lock();
                observe_closed(&mut table, channel_id, was_parked);
                return Err(Verr::ChannelClosed);
            }
            other => return other,
        }
        {
            let mut table = CHANNELS.lock();
            let ch = match table.find(channel_id) {
                Some(c) => c,
                None => return Err(Verr::InvalidHandle),
            };
            if ch.state == ChannelState::Closed {
                observe_closed(&mut table, channel_id, was_parked);
                return Err(Verr::ChannelClosed);
            }
            if (ch.queue.len() as u32) < ch.capacity {
                // Space appeared between the try and the park; retry
                continue;
            }
            let current = match task::current() {
                Some(t) => t,
                None => return Err(Verr::WouldBlock),
            };
            ch.send_waiters.push_back(current);
            task::block_current();
        }
        was_parked = true;
        task::yield_now();
    }
}

/// Blocking receive. Returns the full message size; transferred handles are
/// inserted into the receiver's table exactly as in `try_recv`.
pub fn recv(channel_id: u32, buf: &mut [u8]) -> Result<usize> {
    let mut was_parked = false;
    loop {
        match try_recv(channel_id, buf) {
            Err(Verr::WouldBlock) => {}
            Err(Verr::ChannelClosed) => {
                let mut table = CHANNELS.lock();
                observe_closed(&mut table, channel_id, was_parked);
                return Err(Verr::ChannelClosed);
            }
            other => return other.map(|r| r.size),
        }
        {
            let mut table = CHANNELS.lock();
            let ch = match table.find(channel_id) {
                Some(c) => c,
                None => return Err(Verr::InvalidHandle),
            };
            if ch.state == ChannelState::Closed {
                observe_closed(&mut table, channel_id, was_parked);
                return Err(Verr::ChannelClosed);
            }
            if !ch.queue.is_empty() {
                // A message arrived between the try and the park; retry
                continue;
            }
            let current = match task::current() {
                Some(t) => t,
                None => return Err(Verr::WouldBlock),
            };
            ch.recv_waiters.push_back(current);
            task::block_current();
        }
        was_parked = true;
        task::yield_now();
    }
}

/// A waiter woken at close acknowledges the closed state. When the last one
/// has drained, the slot is reclaimed.
fn observe_closed(table: &mut ChannelTable, channel_id: u32, was_parked: bool) {
    if !was_parked {
        return;
    }
    if let Some(ch) = table.find(channel_id) {
        ch.draining = ch.draining.saturating_sub(1);
        if ch.draining == 0 {
            crate::debug!("channel: destroyed {}", channel_id);
            table.release(channel_id);
        }
    }
}

/// Close one endpoint by channel id. When both reference counts reach zero
/// the channel transitions to Closed, all blocked waiters are woken so they
/// can observe the closed state, and messages still queued are dropped;
/// transferred handles inside them are released with a logged warning. The
/// slot is reclaimed once the last woken waiter has drained.
pub fn close_endpoint_by_id(channel_id: u32, is_send: bool) -> Result<()> {
    let mut to_wake: Vec<TaskId> = Vec::new();
    let mut orphans: Vec<Message> = Vec::new();
    let mut orphan_handles = 0usize;
    {
        let mut table = CHANNELS.lock();
        let ch = match table.find(channel_id) {
            Some(c) => c,
            None => return Err(Verr::InvalidHandle),
        };
        if ch.state == ChannelState::Open {
            if is_send {
                ch.send_refs = ch.send_refs.saturating_sub(1);
            } else {
                ch.recv_refs = ch.recv_refs.saturating_sub(1);
            }
            if ch.send_refs == 0 && ch.recv_refs == 0 {
                ch.state = ChannelState::Closed;
                to_wake.extend(ch.send_waiters.drain(..));
                to_wake.extend(ch.recv_waiters.drain(..));
                ch.draining = to_wake.len() as u32;
                orphan_handles = ch.queue.iter().map(|m| m.handles.len()).sum();
                // Messages drop outside the lock; releasing a transferred
                // channel object re-enters this module
                orphans.extend(ch.queue.drain(..));
                if ch.draining == 0 {
                    crate::debug!("channel: destroyed {}", channel_id);
                    table.release(channel_id);
                }
            }
        }
    }

    if orphan_handles > 0 {
        crate::warn!(
            "channel: {} released {} orphaned transferred handle(s) at close",
            channel_id,
            orphan_handles
        );
    }
    drop(orphans);
    for t in to_wake {
        task::wake(t);
    }
    Ok(())
}

/// Legacy close by id: tears down both endpoints regardless of reference
/// counts.
pub fn close(channel_id: u32) -> Result<()> {
    {
        let mut table = CHANNELS.lock();
        let ch = table.find_open(channel_id).ok_or(Verr::InvalidHandle)?;
        ch.send_refs = ch.send_refs.min(1);
        ch.recv_refs = 0;
    }
    close_endpoint_by_id(channel_id, true)
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    // Drain outside the lock: dropping a queued message can release a
    // channel object, which re-enters this module
    let drained: Vec<Option<Channel>> = {
        let mut table = CHANNELS.lock();
        table.next_id = 1;
        table.slots.iter_mut().map(|s| s.take()).collect()
    };
    drop(drained);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{lock_kernel, TestEnv};

    #[test]
    fn round_trip_preserves_payload() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("chan-rt");
        let id = create_legacy(4).unwrap();

        try_send(id, &[0xDE, 0xAD, 0xBE, 0xEF], &[]).unwrap();
        assert!(has_message(id));

        let mut buf = [0u8; 16];
        let r = try_recv(id, &mut buf).unwrap();
        assert_eq!(r.size, 4);
        assert_eq!(&buf[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(!has_message(id));
        close(id).unwrap();
    }

    #[test]
    fn short_reads_report_full_size() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("chan-short");
        let id = create_legacy(4).unwrap();
        try_send(id, b"0123456789", &[]).unwrap();
        let mut buf = [0u8; 4];
        let r = try_recv(id, &mut buf).unwrap();
        assert_eq!(r.size, 10);
        assert_eq!(&buf, b"0123");
        close(id).unwrap();
    }

    #[test]
    fn message_size_boundary() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("chan-size");
        let id = create_legacy(4).unwrap();

        let exact = alloc::vec![0u8; MAX_MSG_SIZE];
        assert!(try_send(id, &exact, &[]).is_ok());

        let over = alloc::vec![0u8; MAX_MSG_SIZE + 1];
        assert_eq!(try_send(id, &over, &[]), Err(Verr::MsgTooLarge));
        close(id).unwrap();
    }

    #[test]
    fn backpressure_and_would_block() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("chan-bp");
        let id = create_legacy(2).unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(try_recv(id, &mut buf), Err(Verr::WouldBlock));

        try_send(id, &[1], &[]).unwrap();
        try_send(id, &[2], &[]).unwrap();
        assert!(!has_space(id));
        assert_eq!(try_send(id, &[3], &[]), Err(Verr::WouldBlock));

        // FIFO order
        assert_eq!(try_recv(id, &mut buf).unwrap().size, 1);
        assert_eq!(buf[0], 1);
        close(id).unwrap();
    }

    #[test]
    fn capacity_is_adjustable_upward() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("chan-cap");
        let id = create_legacy(1).unwrap();
        try_send(id, &[1], &[]).unwrap();
        assert_eq!(try_send(id, &[2], &[]), Err(Verr::WouldBlock));

        set_capacity(id, 2).unwrap();
        try_send(id, &[2], &[]).unwrap();

        // Cannot cut below the queued count
        assert_eq!(set_capacity(id, 1), Err(Verr::InvalidArg));
        assert_eq!(set_capacity(id, 0), Err(Verr::InvalidArg));
        assert_eq!(set_capacity(id, MAX_PENDING + 1), Err(Verr::InvalidArg));
        close(id).unwrap();
    }

    #[test]
    fn close_returns_slot_to_pool() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("chan-close");
        let id = create_legacy(4).unwrap();
        close_endpoint_by_id(id, true).unwrap();
        assert!(exists(id));
        close_endpoint_by_id(id, false).unwrap();
        assert!(!exists(id));
        assert_eq!(try_send(id, &[1], &[]), Err(Verr::InvalidHandle));
    }

    #[test]
    fn too_many_handles_rejected() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("chan-handles");
        let id = create_legacy(4).unwrap();
        let five = [crate::cap::HANDLE_INVALID; 5];
        assert_eq!(try_send(id, &[1], &five), Err(Verr::InvalidArg));
        // Exactly four is accepted; invalid entries are skipped per slot
        let four = [crate::cap::HANDLE_INVALID; 4];
        assert!(try_send(id, &[1], &four).is_ok());
        let mut buf = [0u8; 1];
        let r = try_recv(id, &mut buf).unwrap();
        assert!(r.handles.is_empty());
        close(id).unwrap();
    }

    #[test]
    fn blocking_ops_degrade_without_task() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("chan-block");
        crate::task::set_current(None);
        let id = create_legacy(1).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(recv(id, &mut buf), Err(Verr::WouldBlock));
        send(id, &[9]).unwrap();
        assert_eq!(send(id, &[9]), Err(Verr::WouldBlock));
        close(id).unwrap();
    }
}
