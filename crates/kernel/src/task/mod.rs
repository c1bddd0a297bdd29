//! Task registry and scheduling seams.
//!
//! The context-switch engine and run queue live in the platform layer; the
//! core keeps the task table (ids, names, states, owning process) and the
//! block/wake protocol the IPC and poll subsystems are built on. The
//! scheduler attaches through the enqueue and yield hooks.
//!
//! Lost-wakeup contract: a task registers a wait entry and transitions to
//! Blocked while the registering subsystem's lock is held, releases that
//! lock, then yields. `wake` only transitions Blocked tasks to Ready, so a
//! waker that observes a wait entry always observes the Blocked state too.
//! The task table lock is a leaf lock; no other lock is taken while it is
//! held.

use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

pub type TaskId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Exited,
}

struct TaskControl {
    id: TaskId,
    name: String,
    state: TaskState,
    viper_id: Option<u64>,
}

struct TaskTable {
    tasks: Vec<TaskControl>,
    next_id: TaskId,
    current: Option<TaskId>,
}

static TASKS: Mutex<TaskTable> = Mutex::new(TaskTable {
    tasks: Vec::new(),
    next_id: 1,
    current: None,
});

/// Scheduler attachment points. `ENQUEUE` is invoked after a task becomes
/// Ready; `YIELD` gives up the CPU.
static ENQUEUE_HOOK: Mutex<Option<fn(TaskId)>> = Mutex::new(None);
static YIELD_HOOK: Mutex<Option<fn()>> = Mutex::new(None);

pub fn set_enqueue_hook(hook: Option<fn(TaskId)>) {
    *ENQUEUE_HOOK.lock() = hook;
}

pub fn set_yield_hook(hook: Option<fn()>) {
    *YIELD_HOOK.lock() = hook;
}

/// Register a new task and return its id.
pub fn register(name: &str, viper_id: Option<u64>) -> TaskId {
    let mut table = TASKS.lock();
    let id = table.next_id;
    table.next_id += 1;
    table.tasks.push(TaskControl {
        id,
        name: String::from(name),
        state: TaskState::Ready,
        viper_id,
    });
    id
}

/// The task currently executing, if the scheduler has selected one.
pub fn current() -> Option<TaskId> {
    TASKS.lock().current
}

/// Mark `id` as the executing task (Running). `None` returns to the
/// pre-scheduler kernel context.
pub fn set_current(id: Option<TaskId>) {
    let mut table = TASKS.lock();
    table.current = id;
    if let Some(id) = id {
        if let Some(t) = table.tasks.iter_mut().find(|t| t.id == id) {
            t.state = TaskState::Running;
        }
    }
}

pub fn state(id: TaskId) -> Option<TaskState> {
    TASKS.lock().tasks.iter().find(|t| t.id == id).map(|t| t.state)
}

pub fn name(id: TaskId) -> Option<String> {
    TASKS
        .lock()
        .tasks
        .iter()
        .find(|t| t.id == id)
        .map(|t| t.name.clone())
}

pub fn viper_of(id: TaskId) -> Option<u64> {
    TASKS
        .lock()
        .tasks
        .iter()
        .find(|t| t.id == id)
        .and_then(|t| t.viper_id)
}

/// Transition the current task to Blocked. Callers hold the lock protecting
/// their wait-entry registration across this call.
pub fn block_current() {
    let mut table = TASKS.lock();
    if let Some(id) = table.current {
        if let Some(t) = table.tasks.iter_mut().find(|t| t.id == id) {
            t.state = TaskState::Blocked;
        }
    }
}

/// Wake a blocked task. Only Blocked tasks transition to Ready; waking a
/// Running or Ready task is a no-op so a racing waker cannot corrupt state.
pub fn wake(id: TaskId) {
    let woke = {
        let mut table = TASKS.lock();
        match table.tasks.iter_mut().find(|t| t.id == id) {
            Some(t) if t.state == TaskState::Blocked => {
                t.state = TaskState::Ready;
                true
            }
            _ => false,
        }
    };
    if woke {
        if let Some(hook) = *ENQUEUE_HOOK.lock() {
            hook(id);
        }
    }
}

/// Give up the CPU. Without an attached scheduler this is a pause, which
/// lets pre-scheduler and test code spin through retry loops.
pub fn yield_now() {
    let hook = *YIELD_HOOK.lock();
    match hook {
        Some(f) => f(),
        None => core::hint::spin_loop(),
    }
}

/// Tear down the current task: purge its poll registrations, mark it
/// Exited, and clear the current pointer.
pub fn exit_current() {
    let id = {
        let mut table = TASKS.lock();
        let id = table.current.take();
        if let Some(id) = id {
            if let Some(t) = table.tasks.iter_mut().find(|t| t.id == id) {
                t.state = TaskState::Exited;
            }
        }
        id
    };
    if let Some(id) = id {
        crate::ipc::poll::clear_task_waiters(id);
        crate::debug!("task: {} exited", id);
    }
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    let mut table = TASKS.lock();
    table.tasks.clear();
    table.next_id = 1;
    table.current = None;
    *ENQUEUE_HOOK.lock() = None;
    *YIELD_HOOK.lock() = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::lock_kernel;

    #[test]
    fn block_and_wake_protocol() {
        let _guard = lock_kernel();
        reset_for_tests();
        let id = register("worker", None);
        set_current(Some(id));
        assert_eq!(state(id), Some(TaskState::Running));

        block_current();
        assert_eq!(state(id), Some(TaskState::Blocked));

        wake(id);
        assert_eq!(state(id), Some(TaskState::Ready));

        // Waking a ready task is a no-op
        wake(id);
        assert_eq!(state(id), Some(TaskState::Ready));
    }

    #[test]
    fn exit_clears_current() {
        let _guard = lock_kernel();
        reset_for_tests();
        let id = register("short-lived", None);
        set_current(Some(id));
        exit_current();
        assert_eq!(current(), None);
        assert_eq!(state(id), Some(TaskState::Exited));
    }
}
