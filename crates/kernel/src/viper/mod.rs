//! Viper process model.
//!
//! A Viper is the in-kernel representation of a user-space process. Each one
//! owns an address space, a capability table (which carries the process's
//! capability bounding mask), a legacy file descriptor table, its tasks, and
//! a place in the process tree. Processes live in a fixed-size table as
//! reference-counted entries; the table slot and the "current process"
//! anchor each hold one reference.
//!
//! Lifecycle: Creating -> Running -> Zombie (via `exit`) -> reaped by the
//! parent's `wait`. Children of an exiting process are reparented to init
//! (process id 1).

pub mod fd;

use crate::cap::{self, Rights};
use crate::error::{Result, Verr};
use crate::mm::AddressSpace;
use crate::task::{self, TaskId};
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use fd::FdTable;
use lazy_static::lazy_static;
use spin::Mutex;

/// Maximum number of concurrently allocated processes.
pub const MAX_VIPERS: usize = 64;

/// Default per-process limits.
pub const DEFAULT_MEMORY_LIMIT: u64 = 64 * 1024 * 1024;
pub const DEFAULT_HANDLE_LIMIT: u32 = 1024;
pub const DEFAULT_TASK_LIMIT: u32 = 16;

/// Process id of init, the reparenting target for orphans.
pub const INIT_VIPER_ID: u64 = 1;

/// Maximum process name length, excluding the terminator.
pub const MAX_NAME: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViperState {
    Invalid,
    Creating,
    Running,
    Exiting,
    Zombie,
}

/// Resource limit identifiers for the rlimit syscalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResourceLimit {
    Memory = 0,
    Handles = 1,
    Tasks = 2,
}

impl ResourceLimit {
    pub fn from_u32(v: u32) -> Option<ResourceLimit> {
        match v {
            0 => Some(ResourceLimit::Memory),
            1 => Some(ResourceLimit::Handles),
            2 => Some(ResourceLimit::Tasks),
            _ => None,
        }
    }
}

struct ViperInner {
    state: ViperState,
    exit_code: i32,
    parent: Option<u64>,
    children: Vec<u64>,
    tasks: Vec<TaskId>,
    pgid: u64,
    sid: u64,
    session_leader: bool,
    args: String,
    memory_limit: u64,
    handle_limit: u32,
    task_limit: u32,
    memory_used: u64,
}

/// In-kernel process record.
pub struct Viper {
    pub id: u64,
    name: String,
    cap_table: Mutex<cap::Table>,
    addr_space: Mutex<AddressSpace>,
    fd_table: Mutex<FdTable>,
    inner: Mutex<ViperInner>,
    child_waiters: Mutex<VecDeque<TaskId>>,
}

impl Viper {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ViperState {
        self.inner.lock().state
    }

    pub fn exit_code(&self) -> i32 {
        self.inner.lock().exit_code
    }

    pub fn parent_id(&self) -> Option<u64> {
        self.inner.lock().parent
    }

    pub fn child_ids(&self) -> Vec<u64> {
        self.inner.lock().children.clone()
    }

    pub fn args(&self) -> String {
        self.inner.lock().args.clone()
    }

    pub fn set_args(&self, args: &str) {
        self.inner.lock().args = String::from(args);
    }

    /// Run a closure against the process's capability table.
    pub fn with_cap_table<R>(&self, f: impl FnOnce(&mut cap::Table) -> R) -> R {
        f(&mut self.cap_table.lock())
    }

    /// Run a closure against the process's address space.
    pub fn with_addr_space<R>(&self, f: impl FnOnce(&mut AddressSpace) -> R) -> R {
        f(&mut self.addr_space.lock())
    }

    /// Run a closure against the legacy descriptor table.
    pub fn with_fd_table<R>(&self, f: impl FnOnce(&mut FdTable) -> R) -> R {
        f(&mut self.fd_table.lock())
    }

    pub fn add_task(&self, id: TaskId) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.tasks.len() as u32 >= inner.task_limit {
            return Err(Verr::OutOfMemory);
        }
        inner.tasks.push(id);
        Ok(())
    }

    pub fn remove_task(&self, id: TaskId) {
        self.inner.lock().tasks.retain(|t| *t != id);
    }

    pub fn task_count(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn pgid(&self) -> u64 {
        self.inner.lock().pgid
    }

    pub fn sid(&self) -> u64 {
        self.inner.lock().sid
    }

    /// Capability bounding set, kept on the capability table so it masks
    /// every insertion.
    pub fn cap_bounding_set(&self) -> Rights {
        self.cap_table.lock().bounding()
    }

    /// Irreversibly drop rights from the bounding set.
    pub fn drop_cap_bounding_set(&self, rights: Rights) {
        self.cap_table.lock().drop_bounding(rights);
    }

    /// Account memory against the process, enforcing its limit.
    pub fn charge_memory(&self, bytes: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.memory_used + bytes > inner.memory_limit {
            return Err(Verr::OutOfMemory);
        }
        inner.memory_used += bytes;
        Ok(())
    }

    pub fn uncharge_memory(&self, bytes: u64) {
        let mut inner = self.inner.lock();
        inner.memory_used = inner.memory_used.saturating_sub(bytes);
    }
}

struct ViperTable {
    slots: Vec<Option<Arc<Viper>>>,
    next_id: u64,
}

lazy_static! {
    static ref VIPERS: Mutex<ViperTable> = Mutex::new(ViperTable {
        slots: {
            let mut v = Vec::with_capacity(MAX_VIPERS);
            v.resize_with(MAX_VIPERS, || None);
            v
        },
        next_id: 1,
    });
    static ref CURRENT: Mutex<Option<Arc<Viper>>> = Mutex::new(None);
}

pub fn init() {
    lazy_static::initialize(&VIPERS);
    lazy_static::initialize(&CURRENT);
    crate::info!("viper: subsystem initialized ({} slots)", MAX_VIPERS);
}

/// Create a process. The new process gets a fresh address space and an
/// empty capability table and is linked under `parent` when given.
pub fn create(parent: Option<&Arc<Viper>>, name: &str) -> Result<Arc<Viper>> {
    if name.is_empty() || name.len() > MAX_NAME {
        return Err(Verr::InvalidArg);
    }

    let mut table = VIPERS.lock();
    let id = table.next_id;
    let slot = table
        .slots
        .iter_mut()
        .position(|s| s.is_none())
        .ok_or(Verr::OutOfMemory)?;

    let (pgid, sid) = match parent {
        Some(p) => {
            let pi = p.inner.lock();
            (pi.pgid, pi.sid)
        }
        None => (id, id),
    };

    let viper = Arc::new(Viper {
        id,
        name: String::from(name),
        cap_table: Mutex::new(cap::Table::new(cap::DEFAULT_CAPACITY)),
        addr_space: Mutex::new(AddressSpace::new()),
        fd_table: Mutex::new(FdTable::new()),
        inner: Mutex::new(ViperInner {
            state: ViperState::Creating,
            exit_code: 0,
            parent: parent.map(|p| p.id),
            children: Vec::new(),
            tasks: Vec::new(),
            pgid,
            sid,
            session_leader: parent.is_none(),
            args: String::new(),
            memory_limit: DEFAULT_MEMORY_LIMIT,
            handle_limit: DEFAULT_HANDLE_LIMIT,
            task_limit: DEFAULT_TASK_LIMIT,
            memory_used: 0,
        }),
        child_waiters: Mutex::new(VecDeque::new()),
    });

    table.next_id += 1;
    table.slots[slot] = Some(viper.clone());
    drop(table);

    if let Some(p) = parent {
        p.inner.lock().children.push(id);
    }
    viper.inner.lock().state = ViperState::Running;

    crate::debug!("viper: created {} '{}'", id, name);
    Ok(viper)
}

/// Tear down a process record: unlink it from the table and its parent.
/// The address space and capability table are released when the last
/// reference drops.
pub fn destroy(v: &Arc<Viper>) {
    let removed = {
        let mut table = VIPERS.lock();
        let mut removed = None;
        for slot in table.slots.iter_mut() {
            if slot.as_ref().map(|s| s.id) == Some(v.id) {
                removed = slot.take();
            }
        }
        removed
    };

    if let Some(parent_id) = v.parent_id() {
        if let Some(parent) = find(parent_id) {
            parent.inner.lock().children.retain(|c| *c != v.id);
        }
    }
    v.inner.lock().state = ViperState::Invalid;
    crate::debug!("viper: destroyed {}", v.id);
    // Capability table entries drop here when `removed` held the last
    // reference; no subsystem lock is held at this point
    drop(removed);
}

pub fn find(id: u64) -> Option<Arc<Viper>> {
    VIPERS
        .lock()
        .slots
        .iter()
        .filter_map(|s| s.as_ref())
        .find(|v| v.id == id)
        .cloned()
}

pub fn current() -> Option<Arc<Viper>> {
    CURRENT.lock().clone()
}

pub fn set_current(v: Option<Arc<Viper>>) {
    *CURRENT.lock() = v;
}

/// Run a closure against the current process's capability table. Returns
/// `None` when no process is current (early bring-up or kernel context).
pub fn with_current_cap_table<R>(f: impl FnOnce(&mut cap::Table) -> R) -> Option<R> {
    let viper = current()?;
    let result = f(&mut viper.cap_table.lock());
    Some(result)
}

/// Exit the current process: record the code, become a Zombie, wake the
/// parent's waiters, and hand children to init.
pub fn exit(code: i32) {
    let viper = match current() {
        Some(v) => v,
        None => return,
    };

    let (parent_id, children) = {
        let mut inner = viper.inner.lock();
        inner.state = ViperState::Zombie;
        inner.exit_code = code;
        (inner.parent, core::mem::take(&mut inner.children))
    };

    // Orphans go to init
    if !children.is_empty() {
        let init = find(INIT_VIPER_ID);
        for child_id in children {
            if let Some(child) = find(child_id) {
                child.inner.lock().parent = init.as_ref().map(|i| i.id);
            }
            if let Some(init) = &init {
                init.inner.lock().children.push(child_id);
            }
        }
    }

    if let Some(parent) = parent_id.and_then(find) {
        let waiters: Vec<TaskId> = parent.child_waiters.lock().drain(..).collect();
        for w in waiters {
            task::wake(w);
        }
    }

    crate::info!("viper: {} '{}' exited with code {}", viper.id, viper.name(), code);
    set_current(None);
}

/// Reap a zombie child: collect its exit status and free the record.
pub fn reap(child: &Arc<Viper>) -> i32 {
    let code = child.exit_code();
    destroy(child);
    code
}

/// Wait for a child to exit. `child_id` of -1 waits for any child. Blocks
/// the calling task until a matching child becomes a Zombie; in a context
/// that cannot block, returns `VERR_WOULD_BLOCK`.
pub fn wait(child_id: i64, status: &mut i32) -> Result<u64> {
    let viper = current().ok_or(Verr::NotSupported)?;

    loop {
        let children = viper.child_ids();
        let candidates: Vec<u64> = children
            .iter()
            .copied()
            .filter(|c| child_id == -1 || *c == child_id as u64)
            .collect();
        if candidates.is_empty() {
            return Err(Verr::NotFound);
        }

        for id in candidates {
            if let Some(child) = find(id) {
                if child.state() == ViperState::Zombie {
                    *status = reap(&child);
                    return Ok(id);
                }
            }
        }

        let current_task = match task::current() {
            Some(t) => t,
            None => return Err(Verr::WouldBlock),
        };
        {
            // Park under the waiter-queue lock so the exiting child cannot
            // slip a wakeup between registration and the Blocked transition
            let mut waiters = viper.child_waiters.lock();
            waiters.push_back(current_task);
            task::block_current();
        }
        task::yield_now();
    }
}

/// Fork the current process: copy-on-write address space, fresh capability
/// table restricted to the parent's bounding mask, inherited group and
/// session ids.
pub fn fork() -> Result<Arc<Viper>> {
    let parent = current().ok_or(Verr::NotSupported)?;
    let child = create(Some(&parent), &parent.name.clone())?;

    {
        let mut parent_space = parent.addr_space.lock();
        let child_space = parent_space.fork_clone();
        *child.addr_space.lock() = child_space;
    }
    {
        let bounding = parent.cap_bounding_set();
        let mut ct = child.cap_table.lock();
        let dropped = Rights::ALL & !bounding;
        ct.drop_bounding(dropped);
    }
    {
        let pi = parent.inner.lock();
        let mut ci = child.inner.lock();
        ci.args = pi.args.clone();
        ci.memory_limit = pi.memory_limit;
        ci.handle_limit = pi.handle_limit;
        ci.task_limit = pi.task_limit;
    }

    crate::debug!("viper: fork {} -> {}", parent.id, child.id);
    Ok(child)
}

/// Adjust the heap break of the current process.
pub fn do_sbrk(increment: i64) -> Result<u64> {
    let viper = current().ok_or(Verr::NotSupported)?;
    viper.with_addr_space(|space| space.do_sbrk(increment))
}

// Process groups and sessions

fn resolve(pid: u64) -> Result<Arc<Viper>> {
    if pid == 0 {
        current().ok_or(Verr::NotFound)
    } else {
        find(pid).ok_or(Verr::NotFound)
    }
}

pub fn getpgid(pid: u64) -> Result<u64> {
    Ok(resolve(pid)?.pgid())
}

pub fn getsid(pid: u64) -> Result<u64> {
    Ok(resolve(pid)?.sid())
}

/// Move a process into a process group. A session leader cannot be moved,
/// and the target group must belong to the caller's session.
pub fn setpgid(pid: u64, pgid: u64) -> Result<()> {
    let target = resolve(pid)?;
    let new_pgid = if pgid == 0 { target.id } else { pgid };

    let caller_sid = current().map(|c| c.sid()).unwrap_or_else(|| target.sid());

    let mut inner = target.inner.lock();
    if inner.session_leader {
        return Err(Verr::Permission);
    }
    if inner.sid != caller_sid {
        return Err(Verr::Permission);
    }
    inner.pgid = new_pgid;
    Ok(())
}

/// Create a new session with the caller as leader. Fails when the caller
/// already leads a process group.
pub fn setsid() -> Result<u64> {
    let viper = current().ok_or(Verr::NotFound)?;
    let mut inner = viper.inner.lock();
    if inner.pgid == viper.id {
        // Already a process-group leader
        return Err(Verr::Permission);
    }
    inner.sid = viper.id;
    inner.pgid = viper.id;
    inner.session_leader = true;
    Ok(viper.id)
}

// Resource limits

pub fn get_rlimit(resource: ResourceLimit) -> Result<u64> {
    let viper = current().ok_or(Verr::NotFound)?;
    let inner = viper.inner.lock();
    Ok(match resource {
        ResourceLimit::Memory => inner.memory_limit,
        ResourceLimit::Handles => inner.handle_limit as u64,
        ResourceLimit::Tasks => inner.task_limit as u64,
    })
}

/// Lower a resource limit. Raising is a privilege escalation and fails.
pub fn set_rlimit(resource: ResourceLimit, new_limit: u64) -> Result<()> {
    let viper = current().ok_or(Verr::NotFound)?;
    let mut inner = viper.inner.lock();
    match resource {
        ResourceLimit::Memory => {
            if new_limit > inner.memory_limit {
                return Err(Verr::Permission);
            }
            inner.memory_limit = new_limit;
        }
        ResourceLimit::Handles => {
            if new_limit > inner.handle_limit as u64 {
                return Err(Verr::Permission);
            }
            inner.handle_limit = new_limit as u32;
        }
        ResourceLimit::Tasks => {
            if new_limit > inner.task_limit as u64 {
                return Err(Verr::Permission);
            }
            inner.task_limit = new_limit as u32;
        }
    }
    Ok(())
}

pub fn get_rusage(resource: ResourceLimit) -> Result<u64> {
    let viper = current().ok_or(Verr::NotFound)?;
    Ok(match resource {
        ResourceLimit::Memory => viper.inner.lock().memory_used,
        ResourceLimit::Handles => viper.with_cap_table(|ct| ct.count() as u64),
        ResourceLimit::Tasks => viper.task_count() as u64,
    })
}

/// Consulted before allocating on behalf of a process.
pub fn would_exceed_rlimit(v: &Arc<Viper>, resource: ResourceLimit, amount: u64) -> bool {
    let inner = v.inner.lock();
    match resource {
        ResourceLimit::Memory => inner.memory_used + amount > inner.memory_limit,
        ResourceLimit::Handles => {
            v.with_cap_table(|ct| ct.count() as u64) + amount > inner.handle_limit as u64
        }
        ResourceLimit::Tasks => inner.tasks.len() as u64 + amount > inner.task_limit as u64,
    }
}

/// Diagnostic dump of one process.
pub fn print_info(v: &Arc<Viper>) {
    let inner = v.inner.lock();
    crate::info!(
        "viper {} '{}': state={:?} pgid={} sid={} tasks={} mem={}/{}",
        v.id,
        v.name,
        inner.state,
        inner.pgid,
        inner.sid,
        inner.tasks.len(),
        inner.memory_used,
        inner.memory_limit
    );
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    set_current(None);
    let mut table = VIPERS.lock();
    for slot in table.slots.iter_mut() {
        *slot = None;
    }
    table.next_id = 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::lock_kernel;

    #[test]
    fn create_links_into_process_tree() {
        let _guard = lock_kernel();
        crate::test_utils::reset_all();
        let root = create(None, "init").unwrap();
        let child = create(Some(&root), "child").unwrap();

        assert_eq!(root.id, INIT_VIPER_ID);
        assert_eq!(child.parent_id(), Some(root.id));
        assert_eq!(root.child_ids(), alloc::vec![child.id]);
        assert_eq!(child.state(), ViperState::Running);
        // Group and session inherited
        assert_eq!(child.pgid(), root.pgid());
        assert_eq!(child.sid(), root.sid());
    }

    #[test]
    fn name_length_is_bounded() {
        let _guard = lock_kernel();
        crate::test_utils::reset_all();
        let long = "x".repeat(MAX_NAME + 1);
        assert_eq!(create(None, &long).err(), Some(Verr::InvalidArg));
        assert!(create(None, "x").is_ok());
    }

    #[test]
    fn exit_reparents_children_to_init() {
        let _guard = lock_kernel();
        crate::test_utils::reset_all();
        let init = create(None, "init").unwrap();
        let parent = create(Some(&init), "parent").unwrap();
        let orphan = create(Some(&parent), "orphan").unwrap();

        set_current(Some(parent.clone()));
        exit(3);

        assert_eq!(parent.state(), ViperState::Zombie);
        assert_eq!(parent.exit_code(), 3);
        assert_eq!(orphan.parent_id(), Some(init.id));
        assert!(init.child_ids().contains(&orphan.id));
    }

    #[test]
    fn wait_reaps_zombie_children() {
        let _guard = lock_kernel();
        crate::test_utils::reset_all();
        let init = create(None, "init").unwrap();
        let child = create(Some(&init), "child").unwrap();
        let child_id = child.id;

        set_current(Some(child.clone()));
        exit(7);

        set_current(Some(init.clone()));
        let mut status = 0;
        assert_eq!(wait(-1, &mut status).unwrap(), child_id);
        assert_eq!(status, 7);
        assert!(init.child_ids().is_empty());
        assert!(find(child_id).is_none());

        // No children left
        assert_eq!(wait(-1, &mut status), Err(Verr::NotFound));
    }

    #[test]
    fn fork_clones_layout_and_bounding() {
        let _guard = lock_kernel();
        crate::test_utils::reset_all();
        let parent = create(None, "app").unwrap();
        parent.set_args("--flag");
        parent.drop_cap_bounding_set(Rights::WRITE);
        set_current(Some(parent.clone()));

        let child = fork().unwrap();
        assert_eq!(child.name(), "app");
        assert_eq!(child.args(), "--flag");
        assert_eq!(child.parent_id(), Some(parent.id));
        assert!(!child.cap_bounding_set().has(Rights::WRITE));
        // Fresh capability table, nothing inherited
        assert_eq!(child.with_cap_table(|ct| ct.count()), 0);
    }

    #[test]
    fn rlimits_only_lower() {
        let _guard = lock_kernel();
        crate::test_utils::reset_all();
        let v = create(None, "limited").unwrap();
        set_current(Some(v.clone()));

        assert_eq!(
            get_rlimit(ResourceLimit::Handles).unwrap(),
            DEFAULT_HANDLE_LIMIT as u64
        );
        set_rlimit(ResourceLimit::Handles, 10).unwrap();
        assert_eq!(
            set_rlimit(ResourceLimit::Handles, 20),
            Err(Verr::Permission)
        );
        assert_eq!(get_rlimit(ResourceLimit::Handles).unwrap(), 10);

        assert!(!would_exceed_rlimit(&v, ResourceLimit::Handles, 10));
        assert!(would_exceed_rlimit(&v, ResourceLimit::Handles, 11));
    }

    #[test]
    fn memory_accounting_enforces_limit() {
        let _guard = lock_kernel();
        crate::test_utils::reset_all();
        let v = create(None, "mem").unwrap();
        set_current(Some(v.clone()));
        set_rlimit(ResourceLimit::Memory, 4096).unwrap();

        v.charge_memory(4096).unwrap();
        assert_eq!(v.charge_memory(1), Err(Verr::OutOfMemory));
        v.uncharge_memory(4096);
        assert_eq!(get_rusage(ResourceLimit::Memory).unwrap(), 0);
    }

    #[test]
    fn session_rules() {
        let _guard = lock_kernel();
        crate::test_utils::reset_all();
        let leader = create(None, "leader").unwrap();
        let member = create(Some(&leader), "member").unwrap();

        // The root process leads its own group; setsid must fail
        set_current(Some(leader.clone()));
        assert_eq!(setsid(), Err(Verr::Permission));

        // A member may split off into a new session
        set_current(Some(member.clone()));
        assert_eq!(setsid().unwrap(), member.id);
        assert_eq!(getsid(0).unwrap(), member.id);
        assert_eq!(getpgid(0).unwrap(), member.id);

        // A session leader cannot be moved into another group
        assert_eq!(setpgid(member.id, leader.pgid()), Err(Verr::Permission));
    }

    #[test]
    fn bounding_masks_cap_insertions() {
        let _guard = lock_kernel();
        crate::test_utils::reset_all();
        let v = create(None, "bound").unwrap();
        v.drop_cap_bounding_set(Rights::WRITE);
        set_current(Some(v.clone()));

        let h = with_current_cap_table(|ct| {
            let blob = crate::kobj::KObject::Blob(Arc::new(
                crate::kobj::Blob::create(8).unwrap(),
            ));
            ct.insert(blob, Rights::RW).unwrap()
        })
        .unwrap();

        let rights = v.with_cap_table(|ct| ct.get(h).unwrap().rights);
        assert_eq!(rights, Rights::READ);
    }
}
