//! The core of a cooperative kernel for an 8-bit target with banked RAM
//!
//! This crate provides the state and the operations a dispatcher builds on:
//!
//!  - a first-fit [heap allocator](Kernel::heap_alloc) over a byte arena,
//!  - a delta-encoded [sleep queue](Kernel::enqueue_sleep_task) advanced by the
//!    [timer interrupt](Kernel::timer_tick),
//!  - [waiters](Waiter), blocking primitives whose wait chains are threaded
//!    through the task control blocks by [`Determinant`]s so that they can
//!    span RAM banks,
//!  - a [tile write queue](Kernel::try_write_tile) and a shadow
//!    [sprite table](Kernel::write_sprite) flushed by the
//!    [V-Blank interrupt](Kernel::vblank_handler), and
//!  - an [input queue](Kernel::get_press) fed by the
//!    [joypad interrupt](Kernel::joypad_handler).
//!
//! Tasks that become runnable are appended to the Run List, from which the
//! dispatcher picks them up with [`Kernel::take_ready`]. Nothing in this crate
//! switches contexts.
//!
//! # Ports
//!
//! The hardware is reached through the [`Port`] traits. Every piece of state
//! shared with interrupt handlers is only accessible under *CPU Lock*, which
//! masks the interrupts; see [`Kernel::lock_cpu`].
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![allow(clippy::new_without_default)]
use core::fmt;

mod cfg;
mod determinant;
mod error;
mod heap;
mod interrupt;
mod joypad;
mod klock;
mod sleep_queue;
mod task;
mod utils;
mod video;
mod waiter;

pub use self::{
    cfg::{
        KernelCfg, JOY_QUEUE_CAPACITY, MAX_TASKS, NUM_SPRITES, NUM_TILE_QUEUES,
        TILE_GRID_LEN, TILE_QUEUE_CAPACITY,
    },
    determinant::{Determinant, Location, Region},
    error::*,
    heap::{Arena, ArenaAllocError, Block, Blocks, HeapAllocError, FREE, MAX_BLOCK_SIZE},
    interrupt::InterruptFlags,
    joypad::{Buttons, SELECT_BOTH, SELECT_BUTTONS, SELECT_DPAD, SELECT_NONE},
    klock::{CpuLockGuard, CpuLockTag, CpuLockToken, CpuLockTokenRefMut},
    task::{TaskCb, TaskId, NO_TASK},
    video::{Sprite, SpriteAttributes},
    waiter::{IntSafeWaiter, Waiter},
};

use self::{
    interrupt::{drive_line, LineDemand},
    joypad::JoypadState,
    klock::CpuLockCell,
    sleep_queue::SleepQueue,
    task::{RunList, TaskPool},
    video::VideoState,
};

/// Implemented by a port. This trait contains items related to controlling
/// the CPU Lock state.
///
/// # Safety
///
/// The CPU Lock state must actually mask every interrupt whose handler calls
/// into the kernel.
///
/// These methods are only meant to be called by the kernel.
#[allow(clippy::missing_safety_doc)]
pub unsafe trait PortThreading: Sized + 'static {
    /// Disable all kernel-managed interrupts (this state is called *CPU
    /// Lock*). Returns `false` if CPU Lock is already active.
    unsafe fn try_enter_cpu_lock() -> bool;

    /// Re-enable kernel-managed interrupts previously disabled by
    /// `try_enter_cpu_lock`, thus deactivating the CPU Lock state.
    ///
    /// Precondition: CPU Lock active
    unsafe fn leave_cpu_lock();

    /// Return a flag indicating whether the CPU Lock state is active.
    fn is_cpu_lock_active() -> bool;
}

/// Implemented by a port. Provides access to the interrupt-enable register.
///
/// These methods are only meant to be called by the kernel, under CPU Lock.
#[allow(clippy::missing_safety_doc)]
pub trait PortInterrupts {
    unsafe fn interrupt_enable() -> InterruptFlags;
    unsafe fn set_interrupt_enable(flags: InterruptFlags);
}

/// Implemented by a port. Provides access to the video memory.
///
/// These methods are only meant to be called by the kernel from the V-Blank
/// interrupt handler, under CPU Lock.
#[allow(clippy::missing_safety_doc)]
pub trait PortVideo {
    /// Store `value` at `offset` in the tile map.
    unsafe fn write_tile_grid(offset: u16, value: u8);
    /// Replace the contents of the hardware sprite table.
    unsafe fn write_sprite_table(sprites: &[Sprite; NUM_SPRITES]);
}

/// Implemented by a port. Provides access to the joypad I/O register.
///
/// These methods are only meant to be called by the kernel, under CPU Lock.
#[allow(clippy::missing_safety_doc)]
pub trait PortJoypad {
    unsafe fn write_joypad_select(value: u8);
    unsafe fn read_joypad() -> u8;
}

/// Represents a particular group of traits that a port should implement.
pub trait Port: PortThreading + PortInterrupts + PortVideo + PortJoypad {}

impl<T: PortThreading + PortInterrupts + PortVideo + PortJoypad> Port for T {}

/// The state shared by the task pool, the Run List, the sleep queue, and the
/// waiters. Kept in one cell so that an operation can borrow all of it at
/// once.
#[derive(Debug)]
pub(crate) struct SchedState {
    pub(crate) tasks: TaskPool,
    pub(crate) run_list: RunList,
    pub(crate) sleep: SleepQueue,
    pub(crate) uptime: u32,
}

impl SchedState {
    fn check_next_wake(&mut self) -> usize {
        let woken = self.sleep.check_next_wake(self.uptime, &mut self.run_list);
        if woken > 0 {
            log::debug!("woke {woken} sleeping task(s) at {}", self.uptime);
        }
        woken
    }
}

/// The kernel. Owns every piece of kernel state.
pub struct Kernel<Traits> {
    cfg: KernelCfg,
    sched: CpuLockCell<Traits, SchedState>,
    heap: CpuLockCell<Traits, Arena<'static>>,
    video: CpuLockCell<Traits, VideoState>,
    joypad: CpuLockCell<Traits, JoypadState>,
    input_waiter: IntSafeWaiter<Traits>,
}

impl<Traits: Port> Kernel<Traits> {
    /// Initialize the kernel state. `arena` becomes the heap arena.
    ///
    /// The V-Blank interrupt is disabled and the joypad interrupt is enabled.
    pub fn new(cfg: KernelCfg, arena: &'static mut [u8]) -> Result<Self, NewKernelError> {
        log::trace!("Kernel::new({cfg:?}, <{} bytes>)", arena.len());
        let mut lock = klock::lock_cpu::<Traits>()?;

        cfg.validate()?;
        let heap = Arena::init(arena, cfg.heap_block_size as usize)
            .ok_or(NewKernelError::BadParam)?;
        let input_waiter = IntSafeWaiter::new(cfg.input_waiter_bank, cfg.input_waiter_addr)?;

        drive_line(lock.borrow_mut(), InterruptFlags::VBLANK, LineDemand::Disable);
        drive_line(lock.borrow_mut(), InterruptFlags::JOYPAD, LineDemand::Enable);

        Ok(Self {
            cfg,
            sched: CpuLockCell::new(SchedState {
                tasks: TaskPool::new(cfg.num_tasks, cfg.task_list_base),
                run_list: RunList::new(),
                sleep: SleepQueue::new(),
                uptime: 0,
            }),
            heap: CpuLockCell::new(heap),
            video: CpuLockCell::new(VideoState::new()),
            joypad: CpuLockCell::new(JoypadState::new()),
            input_waiter,
        })
    }

    /// Get the configuration the kernel was initialized with.
    #[inline]
    pub fn cfg(&self) -> &KernelCfg {
        &self.cfg
    }

    /// Activate CPU Lock and get an RAII guard. Dropping the guard deactivates
    /// CPU Lock.
    ///
    /// Returns [`BadContext`](BadContextError::BadContext) if CPU Lock is
    /// already active. Every other kernel operation fails in the same way
    /// while the guard is alive, except for the ones that take a
    /// [`CpuLockTokenRefMut`].
    pub fn lock_cpu(&self) -> Result<CpuLockGuard<Traits>, BadContextError> {
        klock::lock_cpu::<Traits>()
    }
}

impl<Traits: Port> fmt::Debug for Kernel<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("cfg", &self.cfg)
            .field("sched", &self.sched)
            .field("heap", &self.heap)
            .field("video", &self.video)
            .field("joypad", &self.joypad)
            .field("input_waiter", &self.input_waiter)
            .finish()
    }
}
