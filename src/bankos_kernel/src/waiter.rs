//! Waiters
//!
//! A waiter is a counting gate with an ordered list of blocked tasks. The list
//! is threaded through the tasks' own control blocks: each waiting task's
//! `wait_link` holds the [`Determinant`] of the next node, and the last node
//! links back to the waiter's *home* (the determinant of the waiter itself).
//!
//! ```text
//!   Waiter @home        TaskCb 1            TaskCb 4            TaskCb 6
//!  ┌───────────┐      ┌───────────┐      ┌───────────┐      ┌───────────┐
//!  │ count = 3 │      │           │      │           │      │           │
//!  │ head  = 1 ├─────►│ wait_link ├─────►│ wait_link ├─────►│ wait_link ├──► home
//!  └───────────┘      └───────────┘      └───────────┘      └───────────┘
//! ```
//!
//! The chain is kept in ascending task ID order, which is also the wake order.
//!
//! A node is *stale* if its task was repurposed after it was linked: the
//! task's slot was vacated, or the task now runs with a RAM bank in which the
//! waiter isn't visible. Stale nodes are skipped at wake time without being
//! woken.
use arrayvec::ArrayVec;
use core::fmt;

use crate::{
    cfg::MAX_TASKS,
    determinant::Determinant,
    error::{BadContextError, BadParamError, WaitError, WakeError},
    klock::{self, CpuLockCell, CpuLockTokenRefMut},
    task::{RunList, TaskCb, TaskId, TaskPool, NO_TASK},
    Kernel, Port,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaiterState {
    count: u8,
    head: TaskId,
}

impl WaiterState {
    pub(crate) const INIT: Self = Self {
        count: 0,
        head: NO_TASK,
    };
}

/// A node that refers to `cb` from the chain owned by `home` is stale.
fn is_stale(home: Determinant, cb: &TaskCb) -> bool {
    if !cb.is_occupied() {
        return true;
    }
    match home.required_bank() {
        Some(bank) => cb.ram_bank != bank,
        None => false,
    }
}

/// Follow `link`. Returns [`NO_TASK`] at the end of the chain.
fn next_node(home: Determinant, tasks: &TaskPool, link: Determinant) -> TaskId {
    if link == home {
        return NO_TASK;
    }
    tasks.task_of_node(link).unwrap_or_else(|| {
        log::warn!("wait chain of {home:?} is broken at {link:?}");
        NO_TASK
    })
}

pub(crate) fn insert(
    st: &mut WaiterState,
    home: Determinant,
    tasks: &mut TaskPool,
    task: TaskId,
) -> Result<(), WaitError> {
    if tasks.get(task)?.is_waiting() {
        return Err(WaitError::BadObjectState);
    }

    // Find the first node with a larger ID
    let mut prev = NO_TASK;
    let mut cur = st.head;
    for _ in 0..tasks.len() {
        if cur == NO_TASK || cur > task {
            break;
        }
        prev = cur;
        cur = match tasks.get(cur) {
            Ok(cb) => next_node(home, tasks, cb.wait_link),
            Err(_) => NO_TASK,
        };
    }

    let next_link = if cur == NO_TASK {
        home
    } else {
        tasks.node(cur)
    };
    let new_node = tasks.node(task);
    tasks.get_mut(task)?.wait_link = next_link;

    if prev == NO_TASK {
        st.head = task;
    } else {
        tasks.get_mut(prev)?.wait_link = new_node;
    }

    st.count += 1;
    Ok(())
}

pub(crate) fn wake_all(
    st: &mut WaiterState,
    home: Determinant,
    tasks: &mut TaskPool,
    run_list: &mut RunList,
) -> u8 {
    let mut remaining = st.count;
    let mut woken = 0;
    let mut cur = st.head;

    for _ in 0..tasks.len() {
        if remaining == 0 || cur == NO_TASK {
            break;
        }
        let Ok(cb) = tasks.get_mut(cur) else {
            log::warn!("wait chain of {home:?} refers to a nonexistent task {cur}");
            break;
        };

        let link = cb.wait_link;
        cb.wait_link = Determinant::SENTINEL;

        if is_stale(home, cb) {
            log::warn!("skipping stale wait chain node {cur} ({cb:?})");
        } else {
            run_list.push(cur);
            woken += 1;
            remaining -= 1;
        }

        cur = next_node(home, tasks, link);
    }

    *st = WaiterState::INIT;
    woken
}

pub(crate) fn wake_one(
    st: &mut WaiterState,
    home: Determinant,
    tasks: &mut TaskPool,
    run_list: &mut RunList,
) -> Option<TaskId> {
    let mut woken = None;

    for _ in 0..tasks.len() {
        if st.count == 0 || st.head == NO_TASK {
            break;
        }
        let cur = st.head;
        let Ok(cb) = tasks.get_mut(cur) else {
            log::warn!("wait chain of {home:?} refers to a nonexistent task {cur}");
            break;
        };

        let link = cb.wait_link;
        cb.wait_link = Determinant::SENTINEL;
        let stale = is_stale(home, cb);

        st.count -= 1;
        st.head = next_node(home, tasks, link);

        if stale {
            log::warn!("dropping stale wait chain node {cur}");
        } else {
            run_list.push(cur);
            woken = Some(cur);
            break;
        }
    }

    if st.count == 0 || st.head == NO_TASK {
        *st = WaiterState::INIT;
    }
    woken
}

fn collect(
    st: &WaiterState,
    home: Determinant,
    tasks: &TaskPool,
) -> ArrayVec<TaskId, MAX_TASKS> {
    let mut out = ArrayVec::new();
    let mut cur = st.head;
    while cur != NO_TASK && out.len() < tasks.len() {
        out.push(cur);
        cur = match tasks.get(cur) {
            Ok(cb) => next_node(home, tasks, cb.wait_link),
            Err(_) => NO_TASK,
        };
    }
    out
}

/// A blocking primitive whose state can only be touched under CPU Lock. Every
/// operation takes a [`CpuLockTokenRefMut`] as proof.
pub struct Waiter<Traits> {
    home: Determinant,
    st: CpuLockCell<Traits, WaiterState>,
}

impl<Traits> Waiter<Traits> {
    /// Construct a waiter located at `(bank, addr)`.
    pub fn new(bank: u8, addr: u16) -> Result<Self, BadParamError> {
        let home = Determinant::new(bank, addr)?;
        if home.is_sentinel() {
            return Err(BadParamError::BadParam);
        }
        Ok(Self {
            home,
            st: CpuLockCell::new(WaiterState::INIT),
        })
    }

    /// Get the determinant of the waiter itself.
    #[inline]
    pub fn home(&self) -> Determinant {
        self.home
    }
}

impl<Traits: Port> Waiter<Traits> {
    /// Link `task` into the chain. The task must not be waiting on anything.
    pub fn wait(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        kernel: &Kernel<Traits>,
        task: TaskId,
    ) -> Result<(), WaitError> {
        log::trace!("wait({:?}, {task})", self.home);
        let mut st = self.st.get(&*lock);
        insert(&mut st, self.home, &mut kernel.sched.write(&mut *lock).tasks, task)?;
        self.st.replace(&mut *lock, st);
        Ok(())
    }

    /// Wake the lowest-numbered waiting task. Stale nodes ahead of it are
    /// dropped from the chain.
    pub fn wake_one(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        kernel: &Kernel<Traits>,
    ) -> Option<TaskId> {
        let mut st = self.st.get(&*lock);
        let sched = kernel.sched.write(&mut *lock);
        let woken = wake_one(&mut st, self.home, &mut sched.tasks, &mut sched.run_list);
        self.st.replace(&mut *lock, st);
        log::debug!("wake_one({:?}) -> {woken:?}", self.home);
        woken
    }

    /// Wake every waiting task in ascending ID order and reset the waiter.
    /// Returns the number of tasks woken.
    pub fn wake_all(&self, mut lock: CpuLockTokenRefMut<'_, Traits>, kernel: &Kernel<Traits>) -> u8 {
        let mut st = self.st.get(&*lock);
        let sched = kernel.sched.write(&mut *lock);
        let woken = wake_all(&mut st, self.home, &mut sched.tasks, &mut sched.run_list);
        self.st.replace(&mut *lock, st);
        log::debug!("wake_all({:?}) -> {woken}", self.home);
        woken
    }

    /// Get the number of linked nodes, stale ones included.
    pub fn count(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> u8 {
        self.st.read(&*lock).count
    }

    /// Get the tasks linked to the chain, in chain order.
    pub fn waiting_tasks(
        &self,
        lock: CpuLockTokenRefMut<'_, Traits>,
        kernel: &Kernel<Traits>,
    ) -> ArrayVec<TaskId, MAX_TASKS> {
        let st = self.st.get(&*lock);
        collect(&st, self.home, &kernel.sched.read(&*lock).tasks)
    }
}

impl<Traits: Port> fmt::Debug for Waiter<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("home", &self.home)
            .field("st", &self.st)
            .finish()
    }
}

/// A [`Waiter`] that enters CPU Lock by itself, so it can be used from both
/// task code and interrupt handlers.
pub struct IntSafeWaiter<Traits>(Waiter<Traits>);

impl<Traits> IntSafeWaiter<Traits> {
    /// Construct a waiter located at `(bank, addr)`.
    pub fn new(bank: u8, addr: u16) -> Result<Self, BadParamError> {
        Waiter::new(bank, addr).map(Self)
    }

    #[inline]
    pub fn home(&self) -> Determinant {
        self.0.home
    }
}

impl<Traits: Port> IntSafeWaiter<Traits> {
    pub fn wait(&self, kernel: &Kernel<Traits>, task: TaskId) -> Result<(), WaitError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        self.0.wait(lock.borrow_mut(), kernel, task)
    }

    /// Evaluate `condition` and link `task` only if it doesn't hold. The
    /// check and the wait happen in the same critical section, so a wakeup
    /// issued from an interrupt handler can't slip in between. Returns `true`
    /// if the task was linked.
    pub fn check_or_wait(
        &self,
        kernel: &Kernel<Traits>,
        task: TaskId,
        condition: impl FnOnce(CpuLockTokenRefMut<'_, Traits>) -> bool,
    ) -> Result<bool, WaitError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        if condition(lock.borrow_mut()) {
            return Ok(false);
        }
        self.0.wait(lock.borrow_mut(), kernel, task)?;
        Ok(true)
    }

    pub fn wake_one(&self, kernel: &Kernel<Traits>) -> Result<Option<TaskId>, WakeError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(self.0.wake_one(lock.borrow_mut(), kernel))
    }

    pub fn wake_all(&self, kernel: &Kernel<Traits>) -> Result<u8, WakeError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(self.0.wake_all(lock.borrow_mut(), kernel))
    }

    pub fn count(&self) -> Result<u8, BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(self.0.count(lock.borrow_mut()))
    }

    pub fn waiting_tasks(
        &self,
        kernel: &Kernel<Traits>,
    ) -> Result<ArrayVec<TaskId, MAX_TASKS>, BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(self.0.waiting_tasks(lock.borrow_mut(), kernel))
    }

    /// Borrow the inner [`Waiter`], for callers that already hold CPU Lock.
    pub fn as_waiter(&self) -> &Waiter<Traits> {
        &self.0
    }
}

impl<Traits: Port> fmt::Debug for IntSafeWaiter<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("IntSafeWaiter").field(&self.0).finish()
    }
}
