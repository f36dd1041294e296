//! Kernel configuration
//!
//! Capacities that size the kernel's storage are compile-time constants.
//! Everything else about the memory layout is supplied at initialization
//! through [`KernelCfg`], which is built with `const fn` setters so that a
//! configuration can live in a `const` item:
//!
//! ```
//! use bankos_kernel::KernelCfg;
//!
//! const CFG: KernelCfg = KernelCfg::new()
//!     .num_tasks(4)
//!     .vblank_credits(32);
//!
//! assert!(CFG.validate().is_ok());
//! ```
use crate::{determinant::Determinant, error::BadParamError};

/// The maximum number of task control blocks in the pool.
pub const MAX_TASKS: usize = 32;

/// The number of tile write queues. Each queue covers 256 bytes of the tile
/// grid, selected by the high byte of the destination.
pub const NUM_TILE_QUEUES: usize = 4;

/// The number of entries each tile queue can hold. This is also the status
/// value reported by a write to a full queue.
pub const TILE_QUEUE_CAPACITY: usize = 128;

/// The size of the tile grid in bytes.
pub const TILE_GRID_LEN: usize = NUM_TILE_QUEUES * 256;

/// The number of hardware sprites.
pub const NUM_SPRITES: usize = 40;

/// The number of joypad state changes the input queue can hold.
pub const JOY_QUEUE_CAPACITY: usize = 16;

/// Layout and tuning parameters supplied at kernel initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelCfg {
    pub(crate) num_tasks: u8,
    pub(crate) task_list_base: u16,
    pub(crate) heap_block_size: u16,
    pub(crate) vblank_credits: u8,
    pub(crate) joypad_settle_reads: u8,
    pub(crate) input_waiter_bank: u8,
    pub(crate) input_waiter_addr: u16,
}

impl Default for KernelCfg {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelCfg {
    pub const fn new() -> Self {
        Self {
            num_tasks: 8,
            task_list_base: 0xc000,
            heap_block_size: 256,
            vblank_credits: 60,
            joypad_settle_reads: 2,
            input_waiter_bank: 0,
            input_waiter_addr: 0xff80,
        }
    }

    /// Set the number of task control blocks in use (`1..=MAX_TASKS`).
    pub const fn num_tasks(self, num_tasks: u8) -> Self {
        Self { num_tasks, ..self }
    }

    /// Set the WRAM0 address of the task list. The wait chain refers to task
    /// control blocks by their address in this list.
    pub const fn task_list_base(self, task_list_base: u16) -> Self {
        Self {
            task_list_base,
            ..self
        }
    }

    /// Set the size of the blocks the heap arena is initially divided into
    /// (`3..=256`).
    pub const fn heap_block_size(self, heap_block_size: u16) -> Self {
        Self {
            heap_block_size,
            ..self
        }
    }

    /// Set the number of tile writes the V-Blank handler may apply per
    /// interrupt.
    pub const fn vblank_credits(self, vblank_credits: u8) -> Self {
        Self {
            vblank_credits,
            ..self
        }
    }

    /// Set how many times each half of the joypad register is read before
    /// the value is trusted.
    pub const fn joypad_settle_reads(self, joypad_settle_reads: u8) -> Self {
        Self {
            joypad_settle_reads,
            ..self
        }
    }

    /// Set the location of the input waiter.
    pub const fn input_waiter_home(self, bank: u8, addr: u16) -> Self {
        Self {
            input_waiter_bank: bank,
            input_waiter_addr: addr,
            ..self
        }
    }

    /// Get the configured number of task control blocks.
    pub const fn task_count(&self) -> usize {
        self.num_tasks as usize
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), BadParamError> {
        if self.num_tasks == 0 || self.num_tasks as usize > MAX_TASKS {
            return Err(BadParamError::BadParam);
        }

        // The task list lives in WRAM0 so that its link fields are reachable
        // from any bank, and the link fields must be 2-byte aligned to be
        // addressable by a determinant
        let list_end = self.task_list_base as u32 + self.num_tasks as u32 * TCB_STRIDE as u32;
        if !(0xc000..0xd000).contains(&self.task_list_base)
            || list_end > 0xd000
            || self.task_list_base % 2 != 0
        {
            return Err(BadParamError::BadParam);
        }

        if !(3..=256).contains(&self.heap_block_size) {
            return Err(BadParamError::BadParam);
        }

        if self.joypad_settle_reads == 0 {
            return Err(BadParamError::BadParam);
        }

        let home = Determinant::new(self.input_waiter_bank, self.input_waiter_addr)?;
        if home.is_sentinel() {
            return Err(BadParamError::BadParam);
        }

        Ok(())
    }
}

/// The size of one task control block in the task list.
pub(crate) const TCB_STRIDE: u16 = 6;

/// The offset of the wait link within a task control block.
pub(crate) const TCB_WAIT_LINK_OFFSET: u16 = 4;
