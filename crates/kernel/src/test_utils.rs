//! Shared helpers for kernel unit tests.
//!
//! The kernel keeps its subsystem state in global tables, so tests that
//! touch channels, processes, assigns, or poll state serialize through one
//! lock and start from a clean slate via `reset_all`. `TestEnv` stands up a
//! scratch process with one task and makes both current, mirroring the
//! context a syscall handler runs in.

use crate::task::{self, TaskId};
use crate::viper::{self, Viper};
use alloc::sync::Arc;
use spin::{Mutex, MutexGuard};

static KERNEL_TEST_LOCK: Mutex<()> = Mutex::new(());

/// Serialize tests that touch global kernel state.
pub fn lock_kernel() -> MutexGuard<'static, ()> {
    KERNEL_TEST_LOCK.lock()
}

/// Reset every global table to its boot state.
pub fn reset_all() {
    viper::reset_for_tests();
    task::reset_for_tests();
    crate::ipc::channel::reset_for_tests();
    crate::ipc::poll::reset_for_tests();
    crate::ipc::pollset::reset_for_tests();
    crate::assign::reset_for_tests();
    crate::vfs::reset_for_tests();
    crate::syscall::handlers::sysinfo::reset_for_tests();
}

/// A scratch process with a single current task.
pub struct TestEnv {
    pub viper: Arc<Viper>,
    pub task: TaskId,
}

impl TestEnv {
    pub fn new(name: &str) -> TestEnv {
        reset_all();
        let viper = viper::create(None, name).expect("test viper");
        let task = task::register(name, Some(viper.id));
        viper.add_task(task).expect("task slot");
        task::set_current(Some(task));
        viper::set_current(Some(viper.clone()));
        TestEnv { viper, task }
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        viper::set_current(None);
        task::set_current(None);
    }
}
