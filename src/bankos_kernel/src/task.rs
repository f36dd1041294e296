//! Tasks
//!
//! The kernel doesn't create or schedule tasks. The dispatcher owns the task
//! lifecycle and tells the kernel about each task through
//! [`Kernel::configure_task`]; the kernel in turn reports tasks that became
//! runnable by appending them to the Run List, which the dispatcher drains
//! with [`Kernel::take_ready`].
use arrayvec::ArrayVec;
use core::fmt;

use crate::{
    cfg::{MAX_TASKS, TCB_STRIDE, TCB_WAIT_LINK_OFFSET},
    determinant::{Determinant, Location, Region},
    error::{BadIdError, ConfigureTaskError, GetTaskError},
    klock, Kernel, Port,
};

/// Task identifier: an index into the task list.
pub type TaskId = u8;

/// The value of [`TaskId`] meaning "no task".
pub const NO_TASK: TaskId = 0xff;

/// *Task control block*
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TaskCb {
    /// The task's saved stack pointer. Zero marks an unoccupied slot.
    pub saved_stack_pointer: u16,
    /// The RAM bank the task runs with.
    pub ram_bank: u8,
    /// The next node of the wait chain this task is linked to, or the
    /// sentinel if the task isn't waiting.
    pub(crate) wait_link: Determinant,
}

impl TaskCb {
    pub(crate) const INIT: Self = Self {
        saved_stack_pointer: 0,
        ram_bank: 0,
        wait_link: Determinant::SENTINEL,
    };

    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.saved_stack_pointer != 0
    }

    /// Get the task's wait link.
    #[inline]
    pub fn wait_link(&self) -> Determinant {
        self.wait_link
    }

    #[inline]
    pub fn is_waiting(&self) -> bool {
        !self.wait_link.is_sentinel()
    }
}

impl fmt::Debug for TaskCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskCb")
            .field("saved_stack_pointer", &format_args!("{:#06x}", self.saved_stack_pointer))
            .field("ram_bank", &self.ram_bank)
            .field("wait_link", &self.wait_link)
            .finish()
    }
}

/// The task list: a fixed pool of [`TaskCb`]s placed at a WRAM0 address.
pub(crate) struct TaskPool {
    cbs: [TaskCb; MAX_TASKS],
    len: u8,
    base: u16,
}

impl TaskPool {
    /// Construct a pool. `len` and `base` must have been validated by
    /// [`KernelCfg::validate`](crate::KernelCfg::validate).
    pub(crate) const fn new(len: u8, base: u16) -> Self {
        Self {
            cbs: [TaskCb::INIT; MAX_TASKS],
            len,
            base,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len as usize
    }

    pub(crate) fn get(&self, id: TaskId) -> Result<&TaskCb, BadIdError> {
        self.cbs[..self.len()].get(id as usize).ok_or(BadIdError::BadId)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Result<&mut TaskCb, BadIdError> {
        let len = self.len();
        self.cbs[..len].get_mut(id as usize).ok_or(BadIdError::BadId)
    }

    /// Get the determinant of the wait link field of the specified task.
    /// This is how wait chains refer to a task.
    pub(crate) fn node(&self, id: TaskId) -> Determinant {
        debug_assert!((id as usize) < self.len());
        let addr = self.base + id as u16 * TCB_STRIDE + TCB_WAIT_LINK_OFFSET;
        // The pool lies in WRAM0, so this can't fail unless the layout is
        // broken
        Determinant::new(0, addr).unwrap_or(Determinant::SENTINEL)
    }

    /// The inverse of [`Self::node`].
    pub(crate) fn task_of_node(&self, node: Determinant) -> Option<TaskId> {
        let Location {
            region: Region::Wram,
            bank: 0,
            offset,
        } = node.decode()?
        else {
            return None;
        };
        let rel = (0xc000 + offset)
            .checked_sub(self.base + TCB_WAIT_LINK_OFFSET)?;
        if rel % TCB_STRIDE != 0 {
            return None;
        }
        let id = rel / TCB_STRIDE;
        (id < self.len as u16).then_some(id as TaskId)
    }
}

impl fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(&self.cbs[..self.len()]).finish()
    }
}

/// The Run List: tasks that have become runnable, in the order they did.
#[derive(Debug, Default)]
pub(crate) struct RunList {
    tasks: ArrayVec<TaskId, MAX_TASKS>,
}

impl RunList {
    pub(crate) const fn new() -> Self {
        Self {
            tasks: ArrayVec::new_const(),
        }
    }

    /// Append `task`. A task that is already in the list keeps its place.
    pub(crate) fn push(&mut self, task: TaskId) {
        if self.tasks.contains(&task) {
            log::trace!("task {task} is already in the run list");
            return;
        }

        // The list can hold every task ID, so this can only fail if the ID is
        // out of range, which the callers check
        if self.tasks.try_push(task).is_err() {
            log::warn!("run list overflow, dropping task {task}");
            debug_assert!(false, "run list overflow");
        }
    }

    pub(crate) fn pop_front(&mut self) -> Option<TaskId> {
        if self.tasks.is_empty() {
            None
        } else {
            Some(self.tasks.remove(0))
        }
    }

    pub(crate) fn as_slice(&self) -> &[TaskId] {
        &self.tasks
    }

    pub(crate) fn snapshot(&self) -> ArrayVec<TaskId, MAX_TASKS> {
        self.tasks.clone()
    }
}

/// The dispatcher interface
impl<Traits: Port> Kernel<Traits> {
    /// Record the saved stack pointer and the RAM bank of a task. A zero
    /// `saved_stack_pointer` marks the slot as unoccupied, which makes every
    /// wait chain entry referring to it stale.
    ///
    /// The task's wait link is preserved.
    pub fn configure_task(
        &self,
        id: TaskId,
        saved_stack_pointer: u16,
        ram_bank: u8,
    ) -> Result<(), ConfigureTaskError> {
        log::trace!("configure_task({id}, {saved_stack_pointer:#06x}, {ram_bank})");
        let mut lock = klock::lock_cpu::<Traits>()?;
        let task_cb = self.sched.write(&mut *lock).tasks.get_mut(id)?;
        task_cb.saved_stack_pointer = saved_stack_pointer;
        task_cb.ram_bank = ram_bank;
        Ok(())
    }

    /// Get a copy of a task's control block.
    pub fn task(&self, id: TaskId) -> Result<TaskCb, GetTaskError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Ok(*self.sched.read(&*lock).tasks.get(id)?)
    }

    /// Remove and return the task at the front of the Run List.
    pub fn take_ready(&self) -> Result<Option<TaskId>, crate::BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        let task = self.sched.write(&mut *lock).run_list.pop_front();
        if let Some(task) = task {
            log::trace!("take_ready -> {task}");
        }
        Ok(task)
    }

    /// Get a snapshot of the Run List.
    pub fn run_list(&self) -> Result<ArrayVec<TaskId, MAX_TASKS>, crate::BadContextError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Ok(self.sched.read(&*lock).run_list.snapshot())
    }
}
