//! Poll sets: kernel-held collections of watched handles.
//!
//! A poll set groups up to `MAX_ENTRIES_PER_SET` entries of
//! `{handle, event mask, flags, last observed state}` and belongs to the
//! task that created it; every operation from another task fails with a
//! permission error. Waiting supports level-triggered (default) and
//! edge-triggered entries, one-shot auto-removal, and event-driven wakeup
//! through the poll wait queue with an internal timer for timeouts and
//! pseudo-handle polling (dual-wake).
//!
//! An entry whose capability refers to a channel that has since closed
//! simply never reports ready; `add` does not validate liveness because any
//! such check would race with a concurrent close.

use super::poll::{self, EventMask, PollEvent, PollFlags};
use crate::error::{Result, Verr};
use crate::task::{self, TaskId};
use spin::Mutex;

/// Maximum number of poll sets that can exist at once.
pub const MAX_POLL_SETS: usize = 16;
/// Maximum watched entries per poll set.
pub const MAX_ENTRIES_PER_SET: usize = 16;

/// Poll interval while pseudo-handles are present, in milliseconds.
const PSEUDO_POLL_INTERVAL_MS: u64 = 10;

#[derive(Clone, Copy)]
struct PollEntry {
    handle: u32,
    mask: EventMask,
    flags: PollFlags,
    last_state: EventMask,
    active: bool,
}

const EMPTY_ENTRY: PollEntry = PollEntry {
    handle: 0,
    mask: EventMask::empty(),
    flags: PollFlags::empty(),
    last_state: EventMask::empty(),
    active: false,
};

#[derive(Clone, Copy)]
struct PollSet {
    id: u32,
    active: bool,
    owner_task: TaskId,
    entries: [PollEntry; MAX_ENTRIES_PER_SET],
    entry_count: u32,
}

const EMPTY_SET: PollSet = PollSet {
    id: 0,
    active: false,
    owner_task: 0,
    entries: [EMPTY_ENTRY; MAX_ENTRIES_PER_SET],
    entry_count: 0,
};

struct PollSetTable {
    sets: [PollSet; MAX_POLL_SETS],
    next_id: u32,
}

static POLLSETS: Mutex<PollSetTable> = Mutex::new(PollSetTable {
    sets: [EMPTY_SET; MAX_POLL_SETS],
    next_id: 1,
});

pub fn init() {
    crate::info!("pollset: subsystem initialized");
}

fn check_owner(ps: &PollSet) -> Result<()> {
    if let Some(current) = task::current() {
        if ps.owner_task != current {
            return Err(Verr::Permission);
        }
    }
    Ok(())
}

/// Create a poll set owned by the calling task.
pub fn create() -> Result<u32> {
    let mut table = POLLSETS.lock();
    let id = table.next_id;
    let owner = task::current().unwrap_or(0);
    let ps = table
        .sets
        .iter_mut()
        .find(|s| !s.active)
        .ok_or(Verr::OutOfMemory)?;
    *ps = PollSet {
        id,
        active: true,
        owner_task: owner,
        entries: [EMPTY_ENTRY; MAX_ENTRIES_PER_SET],
        entry_count: 0,
    };
    table.next_id += 1;
    Ok(id)
}

/// Number of active entries in a poll set.
pub fn entry_count(poll_id: u32) -> Option<u32> {
    let table = POLLSETS.lock();
    table
        .sets
        .iter()
        .find(|s| s.active && s.id == poll_id)
        .map(|s| s.entry_count)
}

/// True when the calling task owns the poll set.
pub fn is_owner(poll_id: u32) -> bool {
    let table = POLLSETS.lock();
    match table.sets.iter().find(|s| s.active && s.id == poll_id) {
        Some(ps) => check_owner(ps).is_ok(),
        None => false,
    }
}

/// Add a watched handle, or update the mask and flags of an existing entry.
pub fn add(poll_id: u32, handle: u32, mask: u32, flags: PollFlags) -> Result<()> {
    let mut table = POLLSETS.lock();
    let ps = table
        .sets
        .iter_mut()
        .find(|s| s.active && s.id == poll_id)
        .ok_or(Verr::NotFound)?;
    check_owner(ps)?;

    let mask = EventMask::from_bits_truncate(mask);

    if let Some(entry) = ps.entries.iter_mut().find(|e| e.active && e.handle == handle) {
        entry.mask = mask;
        entry.flags = flags;
        return Ok(());
    }

    let entry = ps
        .entries
        .iter_mut()
        .find(|e| !e.active)
        .ok_or(Verr::OutOfMemory)?;
    *entry = PollEntry {
        handle,
        mask,
        flags,
        last_state: EventMask::empty(),
        active: true,
    };
    ps.entry_count += 1;
    Ok(())
}

/// Stop watching a handle.
pub fn remove(poll_id: u32, handle: u32) -> Result<()> {
    let mut table = POLLSETS.lock();
    let ps = table
        .sets
        .iter_mut()
        .find(|s| s.active && s.id == poll_id)
        .ok_or(Verr::NotFound)?;
    check_owner(ps)?;

    let entry = ps
        .entries
        .iter_mut()
        .find(|e| e.active && e.handle == handle)
        .ok_or(Verr::NotFound)?;
    entry.active = false;
    ps.entry_count -= 1;
    Ok(())
}

/// Tear down a poll set.
pub fn destroy(poll_id: u32) -> Result<()> {
    let mut table = POLLSETS.lock();
    let ps = table
        .sets
        .iter_mut()
        .find(|s| s.active && s.id == poll_id)
        .ok_or(Verr::NotFound)?;
    check_owner(ps)?;
    *ps = EMPTY_SET;
    Ok(())
}

fn is_pseudo(handle: u32) -> bool {
    handle == poll::HANDLE_CONSOLE_INPUT || handle == poll::HANDLE_NETWORK_RX
}

/// Triggered events for one entry, honoring edge-triggered mode. Updates
/// `last_state` on every check.
fn check_entry_readiness(entry: &mut PollEntry) -> EventMask {
    let current_state = poll::check_readiness(entry.handle, entry.mask);

    if !entry.flags.contains(PollFlags::EDGE_TRIGGERED) {
        return current_state;
    }

    // Edge-triggered: only bits that went 0 -> 1 since the last observation
    let edges = current_state & !entry.last_state;
    entry.last_state = current_state;
    edges
}

/// Wait for events on a poll set.
///
/// Collects up to `out.len()` triggered entries. Level-triggered entries
/// report current readiness; edge-triggered entries report fresh 0->1
/// transitions. One-shot entries deactivate after triggering. A zero
/// timeout polls once; a negative timeout waits indefinitely.
pub fn wait(poll_id: u32, out: &mut [PollEvent], timeout_ms: i64) -> Result<u32> {
    if out.is_empty() {
        return Err(Verr::InvalidArg);
    }

    {
        let table = POLLSETS.lock();
        let ps = table
            .sets
            .iter()
            .find(|s| s.active && s.id == poll_id)
            .ok_or(Verr::NotFound)?;
        check_owner(ps)?;
    }

    let deadline = if timeout_ms > 0 {
        poll::time_now_ms() + timeout_ms as u64
    } else {
        0
    };

    loop {
        let mut ready = 0usize;
        let mut has_pseudo = false;
        let mut real_handles: [(u32, EventMask); MAX_ENTRIES_PER_SET] =
            [(0, EventMask::empty()); MAX_ENTRIES_PER_SET];
        let mut real_count = 0usize;

        {
            let mut table = POLLSETS.lock();
            let ps = table
                .sets
                .iter_mut()
                .find(|s| s.active && s.id == poll_id)
                .ok_or(Verr::NotFound)?;

            for entry in ps.entries.iter_mut() {
                if !entry.active {
                    continue;
                }
                if is_pseudo(entry.handle) {
                    has_pseudo = true;
                } else {
                    real_handles[real_count] = (entry.handle, entry.mask);
                    real_count += 1;
                }

                if ready < out.len() {
                    let triggered = check_entry_readiness(entry);
                    if !triggered.is_empty() {
                        out[ready] = PollEvent {
                            handle: entry.handle,
                            events: entry.mask.bits(),
                            triggered: triggered.bits(),
                        };
                        ready += 1;
                        if entry.flags.contains(PollFlags::ONESHOT) {
                            entry.active = false;
                            ps.entry_count -= 1;
                        }
                    }
                }
            }
        }

        if ready > 0 {
            return Ok(ready as u32);
        }
        if timeout_ms == 0 {
            return Ok(0);
        }
        if timeout_ms > 0 && poll::time_now_ms() >= deadline {
            return Ok(0);
        }

        if task::current().is_none() {
            // Pre-scheduler context cannot park; spin through the retry
            task::yield_now();
            continue;
        }

        // Register for event-driven wakeup on every real handle so
        // notify_handle can reach us even when pseudo-handles are present.
        for (handle, mask) in real_handles.iter().take(real_count) {
            poll::register_wait(*handle, *mask);
        }

        // Dual-wake: an internal timer covers pseudo-handle polling and
        // finite timeouts while channel events wake us directly.
        let mut poll_timer = None;
        if has_pseudo {
            if let Ok(id) = poll::timer_create(PSEUDO_POLL_INTERVAL_MS) {
                poll::register_timer_waiter(id);
                poll_timer = Some(id);
            }
        } else if timeout_ms > 0 {
            let now = poll::time_now_ms();
            let remaining = if deadline > now { deadline - now } else { 1 };
            if let Ok(id) = poll::timer_create(remaining) {
                poll::register_timer_waiter(id);
                poll_timer = Some(id);
            }
        }

        // Park only while every registration is still intact; a notifier
        // that already fired consumed one, and we must rescan instead.
        if poll::block_if_registrations_intact(real_count, poll_timer) {
            task::yield_now();
        }

        if let Some(id) = poll_timer {
            let _ = poll::timer_cancel(id);
        }
        poll::unregister_wait();
    }
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    let mut table = POLLSETS.lock();
    table.sets = [EMPTY_SET; MAX_POLL_SETS];
    table.next_id = 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::channel;
    use crate::test_utils::{lock_kernel, TestEnv};

    fn kernel_context() {
        crate::task::set_current(None);
        crate::viper::set_current(None);
    }

    #[test]
    fn readiness_levels() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("ps-level");
        kernel_context();

        let ps = create().unwrap();
        let ch = channel::create_legacy(4).unwrap();
        add(
            ps,
            ch,
            (EventMask::CHANNEL_READ | EventMask::CHANNEL_WRITE).bits(),
            PollFlags::empty(),
        )
        .unwrap();

        let mut out = [PollEvent::default(); 4];

        // Empty channel is writable but not readable
        assert_eq!(wait(ps, &mut out, 0).unwrap(), 1);
        assert_eq!(out[0].triggered, EventMask::CHANNEL_WRITE.bits());

        channel::try_send(ch, b"ping", &[]).unwrap();
        assert_eq!(wait(ps, &mut out, 0).unwrap(), 1);
        assert!(out[0].triggered & EventMask::CHANNEL_READ.bits() != 0);

        channel::close(ch).unwrap();
        destroy(ps).unwrap();
    }

    #[test]
    fn owner_isolation() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("ps-owner");
        let ps = create().unwrap();

        // Another task may not touch the set
        let intruder = crate::task::register("intruder", None);
        crate::task::set_current(Some(intruder));
        let mut out = [PollEvent::default(); 1];
        assert_eq!(
            add(ps, 1, EventMask::CHANNEL_READ.bits(), PollFlags::empty()),
            Err(Verr::Permission)
        );
        assert_eq!(remove(ps, 1), Err(Verr::Permission));
        assert_eq!(wait(ps, &mut out, 0), Err(Verr::Permission));
        assert_eq!(destroy(ps), Err(Verr::Permission));
    }

    #[test]
    fn unknown_set_is_not_found() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("ps-missing");
        let mut out = [PollEvent::default(); 1];
        assert_eq!(wait(999, &mut out, 0), Err(Verr::NotFound));
        assert_eq!(remove(999, 1), Err(Verr::NotFound));
    }

    #[test]
    fn nonblocking_wait_returns_zero_when_idle() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("ps-idle");
        kernel_context();
        let ps = create().unwrap();
        let ch = channel::create_legacy(4).unwrap();
        add(ps, ch, EventMask::CHANNEL_READ.bits(), PollFlags::empty()).unwrap();

        let mut out = [PollEvent::default(); 1];
        assert_eq!(wait(ps, &mut out, 0).unwrap(), 0);

        channel::close(ch).unwrap();
        destroy(ps).unwrap();
    }

    #[test]
    fn edge_triggered_reports_transitions_once() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("ps-edge");
        kernel_context();
        let ps = create().unwrap();
        let ch = channel::create_legacy(4).unwrap();
        add(
            ps,
            ch,
            EventMask::CHANNEL_READ.bits(),
            PollFlags::EDGE_TRIGGERED,
        )
        .unwrap();

        let mut out = [PollEvent::default(); 1];
        assert_eq!(wait(ps, &mut out, 0).unwrap(), 0);

        channel::try_send(ch, b"x", &[]).unwrap();
        // First observation after the 0 -> 1 transition triggers
        assert_eq!(wait(ps, &mut out, 0).unwrap(), 1);
        // Level stays high but no new edge
        assert_eq!(wait(ps, &mut out, 0).unwrap(), 0);

        // Drain and refill: a fresh edge
        let mut buf = [0u8; 4];
        channel::try_recv(ch, &mut buf).unwrap();
        assert_eq!(wait(ps, &mut out, 0).unwrap(), 0);
        channel::try_send(ch, b"y", &[]).unwrap();
        assert_eq!(wait(ps, &mut out, 0).unwrap(), 1);

        channel::close(ch).unwrap();
        destroy(ps).unwrap();
    }

    #[test]
    fn oneshot_entries_deactivate_after_trigger() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("ps-oneshot");
        kernel_context();
        let ps = create().unwrap();
        let ch = channel::create_legacy(4).unwrap();
        add(
            ps,
            ch,
            EventMask::CHANNEL_WRITE.bits(),
            PollFlags::ONESHOT,
        )
        .unwrap();

        assert_eq!(entry_count(ps), Some(1));
        let mut out = [PollEvent::default(); 1];
        assert_eq!(wait(ps, &mut out, 0).unwrap(), 1);
        // Entry removed itself
        assert_eq!(entry_count(ps), Some(0));
        assert_eq!(wait(ps, &mut out, 0).unwrap(), 0);
        assert_eq!(remove(ps, ch), Err(Verr::NotFound));

        channel::close(ch).unwrap();
        destroy(ps).unwrap();
    }

    #[test]
    fn add_updates_existing_entry() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("ps-update");
        kernel_context();
        let ps = create().unwrap();
        let ch = channel::create_legacy(4).unwrap();
        add(ps, ch, EventMask::CHANNEL_READ.bits(), PollFlags::empty()).unwrap();
        // Same handle again: mask is replaced, not duplicated
        add(ps, ch, EventMask::CHANNEL_WRITE.bits(), PollFlags::empty()).unwrap();

        let mut out = [PollEvent::default(); 2];
        assert_eq!(wait(ps, &mut out, 0).unwrap(), 1);
        assert_eq!(out[0].triggered, EventMask::CHANNEL_WRITE.bits());

        channel::close(ch).unwrap();
        destroy(ps).unwrap();
    }

    #[test]
    fn closed_channel_entry_is_never_ready() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("ps-closed");
        kernel_context();
        let ps = create().unwrap();
        let ch = channel::create_legacy(4).unwrap();
        add(
            ps,
            ch,
            (EventMask::CHANNEL_READ | EventMask::CHANNEL_WRITE).bits(),
            PollFlags::empty(),
        )
        .unwrap();
        channel::close(ch).unwrap();

        let mut out = [PollEvent::default(); 1];
        assert_eq!(wait(ps, &mut out, 0).unwrap(), 0);
        destroy(ps).unwrap();
    }
}
