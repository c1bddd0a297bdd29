//! Polling and timers for cooperative readiness waiting.
//!
//! The timer table holds one-shot timers keyed by unique id with absolute
//! millisecond expiry. The wait-entry table records tasks parked on a handle
//! for specific events so channel sends and receives can wake them through
//! `notify_handle`. `check_timers` runs from the timer tick path.
//!
//! The poll lock protects both tables. Waiters are collected under the lock
//! and woken outside it.

use crate::task::{self, TaskId};
use crate::error::{Result, Verr};
use spin::Mutex;

/// Maximum number of events in a single one-shot poll call.
pub const MAX_POLL_EVENTS: usize = 16;

/// Pseudo-handle for console input readiness.
pub const HANDLE_CONSOLE_INPUT: u32 = 0xFFFF_0001;
/// Pseudo-handle for network receive readiness.
pub const HANDLE_NETWORK_RX: u32 = 0xFFFF_0002;

pub const MAX_TIMERS: usize = 32;
const MAX_WAIT_ENTRIES: usize = 32;

bitflags::bitflags! {
    /// Event bits requested from and reported by polling.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u32 {
        const CHANNEL_READ  = 1 << 0;
        const CHANNEL_WRITE = 1 << 1;
        const TIMER         = 1 << 2;
        const CONSOLE_INPUT = 1 << 3;
        const NETWORK_RX    = 1 << 4;
    }
}

bitflags::bitflags! {
    /// Per-entry polling mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollFlags: u32 {
        const EDGE_TRIGGERED = 1 << 0;
        const ONESHOT        = 1 << 1;
    }
}

/// One pollable event, shared with user space by the poll syscalls.
/// `events` is the requested mask; `triggered` is filled on return.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PollEvent {
    pub handle: u32,
    pub events: u32,
    pub triggered: u32,
}

#[derive(Clone, Copy)]
struct Timer {
    id: u32,
    expire_ms: u64,
    active: bool,
    waiter: Option<TaskId>,
}

const EMPTY_TIMER: Timer = Timer {
    id: 0,
    expire_ms: 0,
    active: false,
    waiter: None,
};

#[derive(Clone, Copy)]
struct WaitEntry {
    task: TaskId,
    handle: u32,
    /// Resolved low-level channel id so notifications keyed by channel id
    /// can match entries registered with capability handles.
    channel_id: u32,
    events: EventMask,
    active: bool,
}

const EMPTY_WAIT: WaitEntry = WaitEntry {
    task: 0,
    handle: 0,
    channel_id: u32::MAX,
    events: EventMask::empty(),
    active: false,
};

struct PollState {
    timers: [Timer; MAX_TIMERS],
    waits: [WaitEntry; MAX_WAIT_ENTRIES],
    next_timer_id: u32,
}

static POLL: Mutex<PollState> = Mutex::new(PollState {
    timers: [EMPTY_TIMER; MAX_TIMERS],
    waits: [EMPTY_WAIT; MAX_WAIT_ENTRIES],
    next_timer_id: 1,
});

/// Console input probe installed by the input driver stack.
static INPUT_POLL: Mutex<Option<fn() -> bool>> = Mutex::new(None);

pub fn set_console_input_hook(hook: Option<fn() -> bool>) {
    *INPUT_POLL.lock() = hook;
}

fn console_has_input() -> bool {
    match *INPUT_POLL.lock() {
        Some(probe) => probe(),
        None => false,
    }
}

pub fn init() {
    crate::info!("poll: subsystem initialized");
}

pub fn time_now_ms() -> u64 {
    crate::time::now_ms()
}

/// Create a one-shot timer expiring `timeout_ms` from now. Returns its id.
pub fn timer_create(timeout_ms: u64) -> Result<u32> {
    let mut state = POLL.lock();
    let deadline = time_now_ms() + timeout_ms;
    let id = state.next_timer_id;
    let t = state
        .timers
        .iter_mut()
        .find(|t| !t.active)
        .ok_or(Verr::OutOfMemory)?;
    t.id = id;
    t.expire_ms = deadline;
    t.active = true;
    t.waiter = None;
    state.next_timer_id += 1;
    Ok(id)
}

/// True when the timer has expired. Unknown ids count as expired so a stale
/// id can never park a task forever.
pub fn timer_expired(timer_id: u32) -> bool {
    let state = POLL.lock();
    match state.timers.iter().find(|t| t.active && t.id == timer_id) {
        Some(t) => time_now_ms() >= t.expire_ms,
        None => true,
    }
}

/// Cancel a timer, waking its waiter if one is parked. Cancelling a timer
/// that has already been reclaimed is not an error.
pub fn timer_cancel(timer_id: u32) -> Result<()> {
    let waiter = {
        let mut state = POLL.lock();
        let t = match state.timers.iter_mut().find(|t| t.active && t.id == timer_id) {
            Some(t) => t,
            None => return Ok(()),
        };
        let waiter = t.waiter.take();
        t.active = false;
        t.id = 0;
        waiter
    };
    if let Some(w) = waiter {
        task::wake(w);
    }
    Ok(())
}

/// Park the current task on a timer. The waiter registration and the
/// Blocked transition happen under the poll lock so `check_timers` can
/// never observe one without the other.
pub fn register_timer_wait_and_block(timer_id: u32) {
    let current = match task::current() {
        Some(t) => t,
        None => return,
    };
    let mut state = POLL.lock();
    if let Some(t) = state.timers.iter_mut().find(|t| t.active && t.id == timer_id) {
        t.waiter = Some(current);
        task::block_current();
    }
}

/// Register the current task as a timer waiter without blocking. Used by
/// waiters that park through `block_if_registrations_intact`.
pub fn register_timer_waiter(timer_id: u32) {
    let current = match task::current() {
        Some(t) => t,
        None => return,
    };
    let mut state = POLL.lock();
    if let Some(t) = state.timers.iter_mut().find(|t| t.active && t.id == timer_id) {
        t.waiter = Some(current);
    }
}

/// Transition the current task to Blocked, but only while every one of its
/// registrations is still in place. A notifier that fired in the window
/// between registration and this call has consumed an entry, in which case
/// the task must not park; the caller rescans instead. The check and the
/// Blocked transition share the poll lock with the notifiers, which closes
/// the lost-wakeup window.
pub fn block_if_registrations_intact(wait_count: usize, timer_id: Option<u32>) -> bool {
    let current = match task::current() {
        Some(t) => t,
        None => return false,
    };
    let state = POLL.lock();
    let waits = state
        .waits
        .iter()
        .filter(|w| w.active && w.task == current)
        .count();
    let timer_intact = match timer_id {
        Some(id) => state
            .timers
            .iter()
            .any(|t| t.active && t.id == id && t.waiter == Some(current)),
        None => true,
    };
    if waits == wait_count && timer_intact {
        task::block_current();
        true
    } else {
        false
    }
}

/// Sleep for `ms` milliseconds. Zero completes immediately.
pub fn sleep_ms(ms: u64) -> Result<()> {
    if ms == 0 {
        return Ok(());
    }
    let timer_id = timer_create(ms)?;

    if task::current().is_none() {
        timer_cancel(timer_id)?;
        return Err(Verr::Unknown);
    }

    loop {
        {
            let mut state = POLL.lock();
            let t = match state.timers.iter_mut().find(|t| t.active && t.id == timer_id) {
                Some(t) => t,
                // Cancelled or reclaimed underneath us
                None => break,
            };
            if time_now_ms() >= t.expire_ms {
                break;
            }
            t.waiter = task::current();
            task::block_current();
        }
        task::yield_now();
    }

    timer_cancel(timer_id)
}

/// Resolve a poll handle to a low-level channel id.
///
/// In process context the handle is a capability and must name a channel.
/// In kernel context (no current process) the handle is taken to be the
/// channel id itself, which is what the bring-up self-tests use.
pub(crate) fn resolve_channel_id(handle: u32) -> Option<u32> {
    use crate::cap::{Handle, Kind};
    let resolved = crate::viper::with_current_cap_table(|ct| {
        ct.get_checked(Handle::from_raw(handle), Kind::Channel)
            .and_then(|e| e.object.as_channel().map(|c| c.id()))
    });
    match resolved {
        Some(id) => id,
        None => Some(handle),
    }
}

/// Current readiness of `handle` for the events in `mask`.
pub(crate) fn check_readiness(handle: u32, mask: EventMask) -> EventMask {
    let mut triggered = EventMask::empty();

    if handle == HANDLE_CONSOLE_INPUT {
        if mask.contains(EventMask::CONSOLE_INPUT) && console_has_input() {
            triggered |= EventMask::CONSOLE_INPUT;
        }
        return triggered;
    }

    // No kernel network stack; the RX pseudo-handle never reports ready
    if handle == HANDLE_NETWORK_RX {
        return triggered;
    }

    if mask.intersects(EventMask::CHANNEL_READ | EventMask::CHANNEL_WRITE) {
        if let Some(channel_id) = resolve_channel_id(handle) {
            if mask.contains(EventMask::CHANNEL_READ)
                && crate::ipc::channel::has_message(channel_id)
            {
                triggered |= EventMask::CHANNEL_READ;
            }
            if mask.contains(EventMask::CHANNEL_WRITE)
                && crate::ipc::channel::has_space(channel_id)
            {
                triggered |= EventMask::CHANNEL_WRITE;
            }
        }
    }

    if mask.contains(EventMask::TIMER) && timer_expired(handle) {
        triggered |= EventMask::TIMER;
    }

    triggered
}

/// One-shot poll over a set of events.
///
/// Scans the entries, filling `triggered` per entry, and returns the number
/// of ready entries. With `timeout_ms == 0` the scan happens exactly once;
/// a negative timeout waits until something becomes ready.
pub fn poll(events: &mut [PollEvent], timeout_ms: i64) -> Result<u32> {
    if events.is_empty() || events.len() > MAX_POLL_EVENTS {
        return Err(Verr::InvalidArg);
    }

    let deadline = if timeout_ms > 0 {
        time_now_ms() + timeout_ms as u64
    } else {
        0
    };

    loop {
        let mut ready = 0u32;
        for ev in events.iter_mut() {
            ev.triggered = 0;
            let requested = EventMask::from_bits_truncate(ev.events);
            let triggered = check_readiness(ev.handle, requested);
            if !triggered.is_empty() {
                ev.triggered = triggered.bits();
                ready += 1;
            }
        }

        if ready > 0 {
            return Ok(ready);
        }
        if timeout_ms == 0 {
            return Ok(0);
        }
        if timeout_ms > 0 && time_now_ms() >= deadline {
            return Ok(0);
        }

        task::yield_now();
    }
}

/// Tick-path sweep: wake tasks whose timers have expired. Expired timers
/// with a waiter are reclaimed here; the woken task's cancel becomes a
/// no-op.
pub fn check_timers() {
    let now = time_now_ms();
    let mut to_wake: [Option<TaskId>; MAX_TIMERS] = [None; MAX_TIMERS];
    let mut count = 0;
    {
        let mut state = POLL.lock();
        for t in state.timers.iter_mut() {
            if t.active && t.waiter.is_some() && now >= t.expire_ms {
                to_wake[count] = t.waiter.take();
                count += 1;
                t.active = false;
                t.id = 0;
            }
        }
    }
    for w in to_wake.iter().take(count) {
        if let Some(id) = w {
            task::wake(*id);
        }
    }
}

/// Register the current task to be woken when `handle` reports any of
/// `events`. Channel handles are resolved to their channel id so the
/// notification from the channel side matches.
pub fn register_wait(handle: u32, events: EventMask) {
    let current = match task::current() {
        Some(t) => t,
        None => return,
    };

    let channel_id = if events.intersects(EventMask::CHANNEL_READ | EventMask::CHANNEL_WRITE) {
        resolve_channel_id(handle).unwrap_or(u32::MAX)
    } else {
        u32::MAX
    };

    let mut state = POLL.lock();
    if let Some(entry) = state.waits.iter_mut().find(|w| !w.active) {
        *entry = WaitEntry {
            task: current,
            handle,
            channel_id,
            events,
            active: true,
        };
    }
}

/// Wake tasks waiting on `handle` (a capability handle or a channel id) for
/// any event in `events`. Matched entries are consumed.
pub fn notify_handle(handle: u32, events: EventMask) {
    let mut to_wake: [Option<TaskId>; MAX_WAIT_ENTRIES] = [None; MAX_WAIT_ENTRIES];
    let mut count = 0;
    {
        let mut state = POLL.lock();
        for w in state.waits.iter_mut() {
            if w.active
                && (w.handle == handle || w.channel_id == handle)
                && w.events.intersects(events)
            {
                to_wake[count] = Some(w.task);
                count += 1;
                w.active = false;
                w.task = 0;
            }
        }
    }
    for w in to_wake.iter().take(count) {
        if let Some(id) = w {
            task::wake(*id);
        }
    }
}

/// Remove every wait entry registered by the current task.
pub fn unregister_wait() {
    let current = match task::current() {
        Some(t) => t,
        None => return,
    };
    let mut state = POLL.lock();
    for w in state.waits.iter_mut() {
        if w.active && w.task == current {
            w.active = false;
            w.task = 0;
        }
    }
}

/// Purge all timers and wait entries referencing an exiting task. Leaving
/// them behind would leak timer slots and let stale wakeups target a
/// recycled task id.
pub fn clear_task_waiters(task_id: TaskId) {
    let mut state = POLL.lock();
    for t in state.timers.iter_mut() {
        if t.active && t.waiter == Some(task_id) {
            t.waiter = None;
            t.active = false;
            t.id = 0;
        }
    }
    for w in state.waits.iter_mut() {
        if w.active && w.task == task_id {
            w.active = false;
            w.task = 0;
        }
    }
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    let mut state = POLL.lock();
    state.timers = [EMPTY_TIMER; MAX_TIMERS];
    state.waits = [EMPTY_WAIT; MAX_WAIT_ENTRIES];
    state.next_timer_id = 1;
    *INPUT_POLL.lock() = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{lock_kernel, TestEnv};

    #[test]
    fn timer_expiry_follows_the_clock() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("poll-timer");
        let id = timer_create(50).unwrap();
        assert!(!timer_expired(id));
        crate::time::advance_ms(60);
        assert!(timer_expired(id));
        timer_cancel(id).unwrap();
    }

    #[test]
    fn unknown_timers_count_as_expired() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("poll-unknown");
        assert!(timer_expired(0xDEAD));
        // Cancelling a reclaimed timer is a no-op success
        assert_eq!(timer_cancel(0xDEAD), Ok(()));
    }

    #[test]
    fn zero_timeout_timer_completes_immediately() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("poll-zero");
        let id = timer_create(0).unwrap();
        assert!(timer_expired(id));
        timer_cancel(id).unwrap();
        assert_eq!(sleep_ms(0), Ok(()));
    }

    #[test]
    fn poll_reports_channel_readiness() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("poll-chan");
        // Kernel context: poll handles are raw channel ids
        crate::task::set_current(None);
        crate::viper::set_current(None);
        let ch = crate::ipc::channel::create_legacy(4).unwrap();

        let mut events = [PollEvent {
            handle: ch,
            events: (EventMask::CHANNEL_READ | EventMask::CHANNEL_WRITE).bits(),
            triggered: 0,
        }];

        // Empty channel: writable, not readable
        assert_eq!(poll(&mut events, 0).unwrap(), 1);
        assert_eq!(
            events[0].triggered,
            EventMask::CHANNEL_WRITE.bits()
        );

        crate::ipc::channel::try_send(ch, b"x", &[]).unwrap();
        assert_eq!(poll(&mut events, 0).unwrap(), 1);
        assert!(events[0].triggered & EventMask::CHANNEL_READ.bits() != 0);

        crate::ipc::channel::close(ch).unwrap();
    }

    #[test]
    fn poll_reports_timer_expiry() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("poll-timer-mask");
        let id = timer_create(30).unwrap();
        let mut events = [PollEvent {
            handle: id,
            events: EventMask::TIMER.bits(),
            triggered: 0,
        }];
        assert_eq!(poll(&mut events, 0).unwrap(), 0);
        crate::time::advance_ms(40);
        assert_eq!(poll(&mut events, 0).unwrap(), 1);
        assert_eq!(events[0].triggered, EventMask::TIMER.bits());
        timer_cancel(id).unwrap();
    }

    #[test]
    fn poll_rejects_bad_args() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("poll-args");
        let mut none: [PollEvent; 0] = [];
        assert_eq!(poll(&mut none, 0), Err(Verr::InvalidArg));
    }

    #[test]
    fn notify_consumes_matching_waits() {
        let _guard = lock_kernel();
        let env = TestEnv::new("poll-notify");
        let ch = crate::ipc::channel::create_legacy(4).unwrap();

        register_wait(ch, EventMask::CHANNEL_READ);
        crate::task::block_current();
        notify_handle(ch, EventMask::CHANNEL_READ);
        assert_eq!(
            crate::task::state(env.task),
            Some(crate::task::TaskState::Ready)
        );

        crate::ipc::channel::close(ch).unwrap();
    }

    #[test]
    fn check_timers_wakes_and_reclaims() {
        let _guard = lock_kernel();
        let env = TestEnv::new("poll-tick");
        let id = timer_create(10).unwrap();
        register_timer_wait_and_block(id);
        assert_eq!(
            crate::task::state(env.task),
            Some(crate::task::TaskState::Blocked)
        );

        crate::time::advance_ms(20);
        check_timers();
        assert_eq!(
            crate::task::state(env.task),
            Some(crate::task::TaskState::Ready)
        );
        // Slot reclaimed; the owner's cancel is now a no-op
        assert_eq!(timer_cancel(id), Ok(()));
    }

    #[test]
    fn clear_task_waiters_purges_registrations() {
        let _guard = lock_kernel();
        let env = TestEnv::new("poll-clear");
        let id = timer_create(1000).unwrap();
        register_timer_wait_and_block(id);
        register_wait(77, EventMask::CHANNEL_READ);

        clear_task_waiters(env.task);
        // Timer deactivated with its waiter
        assert!(timer_expired(id));
        // Wait entry gone: a notify wakes nobody
        crate::task::block_current();
        notify_handle(77, EventMask::CHANNEL_READ);
        assert_eq!(
            crate::task::state(env.task),
            Some(crate::task::TaskState::Blocked)
        );
        crate::task::wake(env.task);
    }

    #[test]
    fn console_pseudo_handle_uses_hook() {
        let _guard = lock_kernel();
        let _env = TestEnv::new("poll-console");
        let mut events = [PollEvent {
            handle: HANDLE_CONSOLE_INPUT,
            events: EventMask::CONSOLE_INPUT.bits(),
            triggered: 0,
        }];
        assert_eq!(poll(&mut events, 0).unwrap(), 0);

        set_console_input_hook(Some(|| true));
        assert_eq!(poll(&mut events, 0).unwrap(), 1);
        assert_eq!(events[0].triggered, EventMask::CONSOLE_INPUT.bits());
        set_console_input_hook(None);
    }
}
