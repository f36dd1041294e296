//! Simulated hardware for running the bankos kernel in a hosted environment
//!
//! [`use_port!`] defines a kernel trait type backed by a [`State`], which
//! models the parts of the machine the kernel talks to: the CPU Lock flag,
//! the interrupt-enable register, the tile grid, the sprite table, and the
//! joypad register. Tests drive the kernel through its interrupt handlers and
//! inspect or stimulate the hardware through [`State::hardware`].
//!
//! ```
//! use bankos_kernel::{Kernel, KernelCfg};
//! use bankos_port_std::PortInstance;
//!
//! bankos_port_std::use_port!(unsafe struct SystemTraits);
//!
//! fn main() {
//!     let kernel = Kernel::<SystemTraits>::new(
//!         KernelCfg::new(),
//!         bankos_port_std::leak_arena(512),
//!     )
//!     .unwrap();
//!     kernel.try_write_tile(0x0123, 7).unwrap();
//!     kernel.vblank_handler();
//!     assert_eq!(SystemTraits::port_state().hardware().tile_grid[0x123], 7);
//! }
//! ```
#![deny(unsafe_op_in_unsafe_fn)]
use bankos_kernel::{Buttons, InterruptFlags, Port, Sprite, NUM_SPRITES, TILE_GRID_LEN};
use spin::{Mutex as SpinMutex, MutexGuard as SpinMutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate bankos_kernel;
/// Used by `use_port!`
#[doc(hidden)]
pub extern crate env_logger;

/// The number of reads the simulated joypad register needs after a selection
/// change before it reflects the selected lines.
pub const DEFAULT_JOYPAD_SETTLE_DELAY: u8 = 1;

/// Implemented on a kernel trait type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
pub unsafe trait PortInstance: Port {
    fn port_state() -> &'static State;
}

/// The internal state of the port.
///
/// # Safety
///
/// For the safety information of this type's methods, see the documentation of
/// the corresponding trait methods of `Port*`.
#[doc(hidden)]
pub struct State {
    cpu_lock: AtomicBool,
    hw: SpinMutex<Hardware>,
}

/// The simulated machine.
#[derive(Debug)]
pub struct Hardware {
    /// The interrupt-enable register
    pub interrupt_enable: InterruptFlags,
    /// The number of writes to the interrupt-enable register
    pub interrupt_enable_writes: usize,
    /// The buttons currently held down
    pub pressed: Buttons,
    /// The last value written to the joypad register
    pub joypad_select: u8,
    /// The number of reads of the joypad register
    pub joypad_reads: usize,
    /// See [`DEFAULT_JOYPAD_SETTLE_DELAY`]
    pub joypad_settle_delay: u8,
    joypad_unsettled_reads: u8,
    pub tile_grid: [u8; TILE_GRID_LEN],
    pub sprite_table: [Sprite; NUM_SPRITES],
    /// The number of full sprite table copies
    pub sprite_table_writes: usize,
}

impl Hardware {
    const fn new() -> Self {
        Self {
            interrupt_enable: InterruptFlags::empty(),
            interrupt_enable_writes: 0,
            pressed: Buttons::empty(),
            joypad_select: 0xff,
            joypad_reads: 0,
            joypad_settle_delay: DEFAULT_JOYPAD_SETTLE_DELAY,
            joypad_unsettled_reads: 0,
            tile_grid: [0; TILE_GRID_LEN],
            sprite_table: [Sprite::INIT; NUM_SPRITES],
            sprite_table_writes: 0,
        }
    }

    /// The value of the joypad register. The lines are active-low: bit 4
    /// clear selects the direction keys, bit 5 clear selects the action
    /// buttons, and the low nibble reads `0` for each pressed button in the
    /// selected group(s). A selected line going low raises the joypad
    /// interrupt.
    pub fn joypad_register(&self) -> u8 {
        let pressed = self.pressed.bits();
        let mut lines = 0;
        if self.joypad_select & 0x10 == 0 {
            lines |= pressed >> 4;
        }
        if self.joypad_select & 0x20 == 0 {
            lines |= pressed & 0x0f;
        }
        0xc0 | (self.joypad_select & 0x30) | (!lines & 0x0f)
    }
}

impl State {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            cpu_lock: AtomicBool::new(false),
            hw: SpinMutex::new(Hardware::new()),
        }
    }

    /// Lock the simulated machine for inspection or stimulation.
    ///
    /// The kernel locks it inside its port hooks, so the guard must not be
    /// held across a kernel call.
    pub fn hardware(&self) -> SpinMutexGuard<'_, Hardware> {
        self.hw.lock()
    }

    /// Press `buttons` in addition to the ones already held.
    pub fn press(&self, buttons: Buttons) {
        log::trace!("press({buttons:?})");
        self.hw.lock().pressed |= buttons;
    }

    /// Release `buttons`.
    pub fn release(&self, buttons: Buttons) {
        log::trace!("release({buttons:?})");
        self.hw.lock().pressed -= buttons;
    }

    pub unsafe fn try_enter_cpu_lock(&self) -> bool {
        let entered = self
            .cpu_lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        log::trace!("try_enter_cpu_lock -> {entered}");
        entered
    }

    pub unsafe fn leave_cpu_lock(&self) {
        log::trace!("leave_cpu_lock");
        assert!(self.cpu_lock.swap(false, Ordering::Release));
    }

    pub fn is_cpu_lock_active(&self) -> bool {
        self.cpu_lock.load(Ordering::Relaxed)
    }

    pub unsafe fn interrupt_enable(&self) -> InterruptFlags {
        self.hw.lock().interrupt_enable
    }

    pub unsafe fn set_interrupt_enable(&self, flags: InterruptFlags) {
        log::trace!("set_interrupt_enable({flags:?})");
        let mut hw = self.hw.lock();
        hw.interrupt_enable = flags;
        hw.interrupt_enable_writes += 1;
    }

    pub unsafe fn write_tile_grid(&self, offset: u16, value: u8) {
        log::trace!("write_tile_grid({offset:#06x}, {value:#04x})");
        self.hw.lock().tile_grid[offset as usize] = value;
    }

    pub unsafe fn write_sprite_table(&self, sprites: &[Sprite; NUM_SPRITES]) {
        log::trace!("write_sprite_table");
        let mut hw = self.hw.lock();
        hw.sprite_table = *sprites;
        hw.sprite_table_writes += 1;
    }

    pub unsafe fn write_joypad_select(&self, value: u8) {
        let mut hw = self.hw.lock();
        if hw.joypad_select != value {
            hw.joypad_unsettled_reads = hw.joypad_settle_delay;
        }
        hw.joypad_select = value;
    }

    pub unsafe fn read_joypad(&self) -> u8 {
        let mut hw = self.hw.lock();
        hw.joypad_reads += 1;
        if hw.joypad_unsettled_reads > 0 {
            // The lines are still floating high
            hw.joypad_unsettled_reads -= 1;
            return 0xff;
        }
        let value = hw.joypad_register();
        log::trace!("read_joypad -> {value:#04x}");
        value
    }
}

/// Allocate a zero-filled heap arena of `len` bytes that lives forever.
pub fn leak_arena(len: usize) -> &'static mut [u8] {
    Box::leak(vec![0; len].into_boxed_slice())
}

/// Instantiate the port. Defines a kernel trait type `$Traits` that can be
/// passed to [`Kernel`](bankos_kernel::Kernel).
///
/// Each instantiation gets its own simulated machine, so independent tests
/// can run in parallel.
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $Traits:ident) => {
        $vis struct $Traits;

        mod port_std_impl {
            use super::$Traits;
            use $crate::bankos_kernel::{
                InterruptFlags, PortInterrupts, PortJoypad, PortThreading, PortVideo, Sprite,
                NUM_SPRITES,
            };
            use $crate::{PortInstance, State};

            pub(super) static PORT_STATE: State = State::new();

            unsafe impl PortInstance for $Traits {
                #[inline]
                fn port_state() -> &'static State {
                    &PORT_STATE
                }
            }

            unsafe impl PortThreading for $Traits {
                unsafe fn try_enter_cpu_lock() -> bool {
                    PORT_STATE.try_enter_cpu_lock()
                }

                unsafe fn leave_cpu_lock() {
                    PORT_STATE.leave_cpu_lock()
                }

                fn is_cpu_lock_active() -> bool {
                    PORT_STATE.is_cpu_lock_active()
                }
            }

            impl PortInterrupts for $Traits {
                unsafe fn interrupt_enable() -> InterruptFlags {
                    PORT_STATE.interrupt_enable()
                }

                unsafe fn set_interrupt_enable(flags: InterruptFlags) {
                    PORT_STATE.set_interrupt_enable(flags)
                }
            }

            impl PortVideo for $Traits {
                unsafe fn write_tile_grid(offset: u16, value: u8) {
                    PORT_STATE.write_tile_grid(offset, value)
                }

                unsafe fn write_sprite_table(sprites: &[Sprite; NUM_SPRITES]) {
                    PORT_STATE.write_sprite_table(sprites)
                }
            }

            impl PortJoypad for $Traits {
                unsafe fn write_joypad_select(value: u8) {
                    PORT_STATE.write_joypad_select(value)
                }

                unsafe fn read_joypad() -> u8 {
                    PORT_STATE.read_joypad()
                }
            }
        }
    };
}
