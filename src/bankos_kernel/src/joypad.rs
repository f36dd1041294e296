//! Input queue
//!
//! The joypad interrupt samples the buttons and queues every change of the
//! pressed-button set. The hardware only raises the interrupt reliably on a
//! released→pressed edge, so the interrupt is disabled while anything is
//! held; in that state the foreground is expected to poll with
//! [`Kernel::joypad_handler`] until everything is released again.
use core::fmt;

use crate::{
    cfg::JOY_QUEUE_CAPACITY,
    error::{BadContextError, PollJoypadError, WaitError},
    interrupt::{drive_line, joypad_demand, InterruptFlags},
    klock,
    task::TaskId,
    utils::Ring,
    waiter::IntSafeWaiter,
    Kernel, Port, PortJoypad,
};

bitflags::bitflags! {
    /// A set of pressed buttons.
    pub struct Buttons: u8 {
        const A = 1 << 0;
        const B = 1 << 1;
        const SELECT = 1 << 2;
        const START = 1 << 3;
        const RIGHT = 1 << 4;
        const LEFT = 1 << 5;
        const UP = 1 << 6;
        const DOWN = 1 << 7;
    }
}

/// The value written to the joypad register to select the direction keys.
pub const SELECT_DPAD: u8 = 0x20;
/// The value written to the joypad register to select the action buttons.
pub const SELECT_BUTTONS: u8 = 0x10;
/// The value written to the joypad register to deselect both groups.
pub const SELECT_NONE: u8 = 0x30;
/// The value written to the joypad register to select both groups. The
/// joypad interrupt is raised by a falling selected line, so this is the
/// selection left in place between samples.
pub const SELECT_BOTH: u8 = 0x00;

/// Decode a joypad register value. The lines are active-low.
#[inline]
fn pressed_nibble(raw: u8) -> u8 {
    !raw & 0x0f
}

/// Read one half of the joypad. The lines take a few cycles to settle after
/// the selection changes, so the register is read `settle_reads` times and
/// only the last value is used.
///
/// # Safety
///
/// Only meant to be called by the kernel under CPU Lock.
unsafe fn read_half<Traits: PortJoypad>(select: u8, settle_reads: u8) -> u8 {
    unsafe { Traits::write_joypad_select(select) };
    let mut raw = 0xff;
    for _ in 0..settle_reads.max(1) {
        raw = unsafe { Traits::read_joypad() };
    }
    pressed_nibble(raw)
}

/// Sample the pressed-button set.
///
/// # Safety
///
/// Only meant to be called by the kernel under CPU Lock.
unsafe fn sample<Traits: PortJoypad>(settle_reads: u8) -> Buttons {
    let dpad = unsafe { read_half::<Traits>(SELECT_DPAD, settle_reads) };
    let buttons = unsafe { read_half::<Traits>(SELECT_BUTTONS, settle_reads) };
    unsafe { Traits::write_joypad_select(SELECT_BOTH) };
    Buttons::from_bits_truncate(dpad << 4 | buttons)
}

pub(crate) struct JoypadState {
    state: Buttons,
    queue: Ring<Buttons, JOY_QUEUE_CAPACITY>,
}

impl JoypadState {
    pub(crate) const fn new() -> Self {
        Self {
            state: Buttons::empty(),
            queue: Ring::new(Buttons::empty()),
        }
    }

    /// Record a sample. Returns the previous state if it differs from
    /// `new_state`.
    fn record(&mut self, new_state: Buttons) -> Option<Buttons> {
        let old_state = self.state;
        if old_state == new_state {
            return None;
        }

        if self.queue.push(new_state).is_err() {
            log::trace!("joypad queue is full, dropping {new_state:?}");
        }
        self.state = new_state;
        Some(old_state)
    }

    /// Pop one change. Returns the buttons that are pressed in it but aren't
    /// in `tracked`, and the popped state itself.
    fn get_press(&mut self, tracked: Buttons) -> Option<(Buttons, Buttons)> {
        let popped = self.queue.pop()?;
        Some((popped - tracked, popped))
    }
}

impl fmt::Debug for JoypadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("JoypadState")
            .field("state", &self.state)
            .field("queue", &self.queue)
            .finish()
    }
}

impl<Traits: Port> Kernel<Traits> {
    /// The joypad interrupt handler. Also called by the foreground to poll
    /// while a button is held.
    pub fn joypad_handler(&self) {
        let Ok(mut lock) = klock::lock_cpu::<Traits>() else {
            log::warn!("joypad_handler: CPU Lock is active");
            return;
        };

        // Safety: CPU Lock active
        let new_state = unsafe { sample::<Traits>(self.cfg.joypad_settle_reads) };

        let Some(old_state) = self.joypad.write(&mut *lock).record(new_state) else {
            log::trace!("joypad_handler: no change");
            return;
        };
        log::debug!("joypad: {old_state:?} -> {new_state:?}");

        drive_line(
            lock.borrow_mut(),
            InterruptFlags::JOYPAD,
            joypad_demand(old_state.bits(), new_state.bits()),
        );

        self.input_waiter
            .as_waiter()
            .wake_all(lock.borrow_mut(), self);
    }

    /// Pop the oldest queued change of the pressed-button set.
    ///
    /// `tracked` is the caller's idea of which buttons are held. Returns the
    /// buttons that became pressed relative to `tracked` and the new set of
    /// held buttons, which the caller should pass as `tracked` next time.
    pub fn get_press(&self, tracked: Buttons) -> Result<(Buttons, Buttons), PollJoypadError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        self.joypad
            .write(&mut *lock)
            .get_press(tracked)
            .ok_or(PollJoypadError::Timeout)
    }

    /// Get the most recently sampled pressed-button set.
    pub fn joy_state(&self) -> Result<Buttons, BadContextError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Ok(self.joypad.read(&*lock).state)
    }

    /// Get the number of queued changes.
    pub fn pending_presses(&self) -> Result<usize, BadContextError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Ok(self.joypad.read(&*lock).queue.len())
    }

    /// Get the waiter that is woken whenever a change is queued.
    pub fn input_waiter(&self) -> &IntSafeWaiter<Traits> {
        &self.input_waiter
    }

    /// Link `task` to the input waiter unless a change is already queued.
    /// Returns `true` if the task was linked.
    pub fn wait_for_input(&self, task: TaskId) -> Result<bool, WaitError> {
        self.input_waiter
            .check_or_wait(self, task, |lock| !self.joypad.read(&*lock).queue.is_empty())
    }
}
