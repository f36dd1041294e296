//! Sleep queue
//!
//! Tasks waiting for an absolute point in time. The earliest entry is kept
//! apart as `(next_wake, next_wake_time)` so that the timer interrupt only has
//! to compare one value per tick. The remaining entries are delta-encoded,
//! each relative to the entry before it (the first one relative to
//! `next_wake_time`):
//!
//! ```text
//!  next_wake = 10            entries: [ (20, +8), (4, +0xff07) ]
//!  next_wake_time = 0xf0
//!
//!  absolute:   10 @ 0xf0      20 @ 0xf8       4 @ 0xffff
//! ```
//!
//! Uptime comparisons are plain unsigned comparisons. The 32-bit uptime is
//! not expected to wrap around within a power cycle.
use arrayvec::ArrayVec;
use core::fmt;

use crate::{
    cfg::MAX_TASKS,
    error::{BadContextError, SleepError},
    klock,
    task::{RunList, TaskId, NO_TASK},
    Kernel, Port,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SleepEntry {
    task: TaskId,
    delta: u16,
}

pub(crate) struct SleepQueue {
    next_wake: TaskId,
    next_wake_time: u32,
    entries: ArrayVec<SleepEntry, { MAX_TASKS - 1 }>,
}

impl SleepQueue {
    pub(crate) const fn new() -> Self {
        Self {
            next_wake: NO_TASK,
            next_wake_time: 0,
            entries: ArrayVec::new_const(),
        }
    }

    pub(crate) fn next_wake(&self) -> Option<(TaskId, u32)> {
        (self.next_wake != NO_TASK).then_some((self.next_wake, self.next_wake_time))
    }

    /// Insert `task` to wake at `wake_time`. Entries with an equal wake time
    /// stay ahead of the new one. The queue is left untouched on failure.
    pub(crate) fn enqueue(&mut self, task: TaskId, wake_time: u32) -> Result<(), SleepError> {
        if task == NO_TASK {
            return Err(SleepError::BadId);
        }

        if self.next_wake == NO_TASK {
            self.next_wake = task;
            self.next_wake_time = wake_time;
            return Ok(());
        }

        if self.entries.is_full() {
            return Err(SleepError::QueueOverflow);
        }

        if wake_time < self.next_wake_time {
            // The new task becomes the head; demote the old head
            let delta = to_delta(self.next_wake_time - wake_time)?;
            self.entries.insert(
                0,
                SleepEntry {
                    task: self.next_wake,
                    delta,
                },
            );
            self.next_wake = task;
            self.next_wake_time = wake_time;
            return Ok(());
        }

        // Find the first entry that wakes strictly later
        let mut time = self.next_wake_time;
        let mut index = 0;
        for entry in self.entries.iter() {
            let entry_time = time + entry.delta as u32;
            if entry_time > wake_time {
                break;
            }
            time = entry_time;
            index += 1;
        }

        let delta = to_delta(wake_time - time)?;
        if let Some(following) = self.entries.get_mut(index) {
            // `following` wakes strictly later, so this doesn't underflow
            following.delta -= delta;
        }
        self.entries.insert(index, SleepEntry { task, delta });
        Ok(())
    }

    /// Move every entry that is due at `uptime` to `run_list`. Returns the
    /// number of tasks woken.
    pub(crate) fn check_next_wake(&mut self, uptime: u32, run_list: &mut RunList) -> usize {
        let mut woken = 0;

        while self.next_wake != NO_TASK && self.next_wake_time <= uptime {
            run_list.push(self.next_wake);
            woken += 1;

            if self.entries.is_empty() {
                self.next_wake = NO_TASK;
            } else {
                let entry = self.entries.remove(0);
                self.next_wake = entry.task;
                self.next_wake_time += entry.delta as u32;
            }
        }

        woken
    }

    /// Iterate over the queued tasks and their absolute wake times.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (TaskId, u32)> + '_ {
        let rest = self.entries.iter().scan(self.next_wake_time, |time, entry| {
            *time += entry.delta as u32;
            Some((entry.task, *time))
        });
        self.next_wake().into_iter().chain(rest)
    }
}

impl fmt::Debug for SleepQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

fn to_delta(x: u32) -> Result<u16, SleepError> {
    u16::try_from(x).map_err(|_| SleepError::BadParam)
}

impl<Traits: Port> Kernel<Traits> {
    /// Put `task` in the sleep queue until the uptime reaches `wake_time`.
    ///
    /// Entries are kept in ascending wake time order; tasks with an equal
    /// wake time wake in the order they were enqueued.
    pub fn enqueue_sleep_task(&self, task: TaskId, wake_time: u32) -> Result<(), SleepError> {
        log::trace!("enqueue_sleep_task({task}, {wake_time})");
        let mut lock = klock::lock_cpu::<Traits>()?;
        let sched = self.sched.write(&mut *lock);
        sched.tasks.get(task)?;
        sched.sleep.enqueue(task, wake_time)
    }

    /// Put `task` in the sleep queue for `ticks` timer ticks from now.
    pub fn sleep_for(&self, task: TaskId, ticks: u32) -> Result<(), SleepError> {
        log::trace!("sleep_for({task}, {ticks})");
        let mut lock = klock::lock_cpu::<Traits>()?;
        let sched = self.sched.write(&mut *lock);
        sched.tasks.get(task)?;
        let wake_time = sched
            .uptime
            .checked_add(ticks)
            .ok_or(SleepError::BadParam)?;
        sched.sleep.enqueue(task, wake_time)
    }

    /// Move the tasks whose wake time has come to the Run List. Returns the
    /// number of tasks woken.
    pub fn check_next_wake(&self) -> Result<usize, BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(self.sched.write(&mut *lock).check_next_wake())
    }

    /// Advance the uptime by `ticks` and wake the tasks that became due.
    /// Returns the number of tasks woken.
    pub fn advance_uptime(&self, ticks: u32) -> Result<usize, BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        let sched = self.sched.write(&mut *lock);
        sched.uptime = sched.uptime.wrapping_add(ticks);
        Ok(sched.check_next_wake())
    }

    /// The timer interrupt handler. Advances the uptime by one tick and wakes
    /// the tasks that became due.
    pub fn timer_tick(&self) {
        let Ok(mut lock) = klock::lock_cpu::<Traits>() else {
            log::warn!("timer_tick: CPU Lock is active, skipping the tick");
            return;
        };
        let sched = self.sched.write(&mut *lock);
        sched.uptime = sched.uptime.wrapping_add(1);
        sched.check_next_wake();
    }

    /// Get the current uptime in timer ticks.
    pub fn uptime(&self) -> Result<u32, BadContextError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Ok(self.sched.read(&*lock).uptime)
    }

    /// Get the task that wakes first and its wake time.
    pub fn next_wake(&self) -> Result<Option<(TaskId, u32)>, BadContextError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Ok(self.sched.read(&*lock).sleep.next_wake())
    }

    /// Get the sleeping tasks and their absolute wake times in wake order.
    pub fn sleeping_tasks(&self) -> Result<ArrayVec<(TaskId, u32), MAX_TASKS>, BadContextError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Ok(self.sched.read(&*lock).sleep.iter().collect())
    }
}
