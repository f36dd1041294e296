//! Display update queue
//!
//! The tile map may only be written during V-Blank, so tile writes are queued
//! and applied by the V-Blank interrupt handler. There is one queue per
//! 256-byte section of the tile map, and the handler applies at most
//! [`KernelCfg::vblank_credits`](crate::KernelCfg::vblank_credits) writes per
//! interrupt. Queues are drained in index order, each in FIFO order.
//!
//! Sprites are double-buffered instead: writes go to a shadow table, which
//! is copied in full to the hardware sprite table on the next V-Blank.
//!
//! The V-Blank interrupt is only enabled while there's something to do.
use core::fmt;

use crate::{
    cfg::{NUM_SPRITES, NUM_TILE_QUEUES, TILE_QUEUE_CAPACITY},
    error::{BadContextError, TryWriteTileError, WriteSpriteError},
    interrupt::{drive_line, vblank_demand, InterruptFlags},
    klock::{self, CpuLockTokenRefMut},
    utils::Ring,
    Kernel, Port, PortVideo,
};

/// A hardware sprite entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Sprite {
    pub y: u8,
    pub x: u8,
    pub tile: u8,
    pub attributes: u8,
}

impl Sprite {
    pub const INIT: Self = Self {
        y: 0,
        x: 0,
        tile: 0,
        attributes: 0,
    };
}

bitflags::bitflags! {
    /// The bits of [`Sprite::attributes`].
    pub struct SpriteAttributes: u8 {
        /// Draw the sprite behind the background.
        const PRIORITY = 1 << 7;
        const Y_FLIP = 1 << 6;
        const X_FLIP = 1 << 5;
        /// Use the second object palette.
        const PALETTE = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TileWrite {
    position: u8,
    value: u8,
}

type TileQueue = Ring<TileWrite, TILE_QUEUE_CAPACITY>;

pub(crate) struct VideoState {
    queues: [TileQueue; NUM_TILE_QUEUES],
    sprites: [Sprite; NUM_SPRITES],
    sprites_dirty: bool,
}

impl VideoState {
    pub(crate) const fn new() -> Self {
        const EMPTY: TileQueue = Ring::new(TileWrite {
            position: 0,
            value: 0,
        });
        Self {
            queues: [EMPTY; NUM_TILE_QUEUES],
            sprites: [Sprite::INIT; NUM_SPRITES],
            sprites_dirty: false,
        }
    }

    /// The total number of queued tile writes.
    pub(crate) fn pending_tiles(&self) -> usize {
        self.queues.iter().map(Ring::len).sum()
    }

    fn try_write_tile(&mut self, destination: u16, value: u8) -> Result<(), TryWriteTileError> {
        let [section, position] = destination.to_be_bytes();
        let queue = self
            .queues
            .get_mut(section as usize)
            .ok_or(TryWriteTileError::BadParam)?;
        queue
            .push(TileWrite { position, value })
            .map_err(|_| TryWriteTileError::QueueOverflow)
    }

    /// Apply up to `credits` queued writes through `sink`, which receives a
    /// tile map offset and a value. Returns the number of writes applied.
    fn flush_tiles(&mut self, credits: usize, mut sink: impl FnMut(u16, u8)) -> usize {
        let mut applied = 0;
        for (section, queue) in self.queues.iter_mut().enumerate() {
            while applied < credits {
                let Some(TileWrite { position, value }) = queue.pop() else {
                    break;
                };
                sink(u16::from_be_bytes([section as u8, position]), value);
                applied += 1;
            }
        }
        applied
    }

    fn write_sprite(&mut self, index: usize, sprite: Sprite) -> Result<(), WriteSpriteError> {
        *self
            .sprites
            .get_mut(index)
            .ok_or(WriteSpriteError::BadParam)? = sprite;
        self.sprites_dirty = true;
        Ok(())
    }
}

impl fmt::Debug for VideoState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VideoState")
            .field("queues", &self.queues)
            .field("sprites_dirty", &self.sprites_dirty)
            .finish_non_exhaustive()
    }
}

impl<Traits: Port> Kernel<Traits> {
    /// Queue a write of `value` to the tile map at `destination`. The high
    /// byte of `destination` selects the queue.
    ///
    /// A full queue is reported as
    /// [`QueueOverflow`](TryWriteTileError::QueueOverflow) and nothing
    /// changes. The caller may retry after the next V-Blank. Callers that
    /// report a full queue as a status byte use
    /// [`TILE_QUEUE_CAPACITY`](crate::TILE_QUEUE_CAPACITY) (128) for it, with
    /// `0` for success.
    pub fn try_write_tile(&self, destination: u16, value: u8) -> Result<(), TryWriteTileError> {
        log::trace!("try_write_tile({destination:#06x}, {value:#04x})");
        let mut lock = klock::lock_cpu::<Traits>()?;
        self.video
            .write(&mut *lock)
            .try_write_tile(destination, value)?;
        self.update_vblank_line(lock.borrow_mut());
        Ok(())
    }

    /// Overwrite the shadow sprite `index`. The sprite table is updated on
    /// the next V-Blank.
    pub fn write_sprite(&self, index: usize, sprite: Sprite) -> Result<(), WriteSpriteError> {
        log::trace!("write_sprite({index}, {sprite:?})");
        let mut lock = klock::lock_cpu::<Traits>()?;
        self.video.write(&mut *lock).write_sprite(index, sprite)?;
        self.update_vblank_line(lock.borrow_mut());
        Ok(())
    }

    /// Get the number of queued tile writes.
    pub fn pending_tiles(&self) -> Result<usize, BadContextError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Ok(self.video.read(&*lock).pending_tiles())
    }

    /// Get a flag indicating whether the shadow sprite table has changes that
    /// haven't been copied yet.
    pub fn sprites_dirty(&self) -> Result<bool, BadContextError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Ok(self.video.read(&*lock).sprites_dirty)
    }

    /// The V-Blank interrupt handler.
    pub fn vblank_handler(&self) {
        let Ok(mut lock) = klock::lock_cpu::<Traits>() else {
            log::warn!("vblank_handler: CPU Lock is active");
            return;
        };

        let credits = self.cfg.vblank_credits as usize;
        let video = self.video.write(&mut *lock);

        let applied = video.flush_tiles(credits, |offset, value| {
            // Safety: CPU Lock active
            unsafe { <Traits as PortVideo>::write_tile_grid(offset, value) };
        });

        if video.sprites_dirty {
            // Safety: CPU Lock active
            unsafe { <Traits as PortVideo>::write_sprite_table(&video.sprites) };
            video.sprites_dirty = false;
        }

        log::trace!(
            "vblank_handler: applied {applied} tile write(s), {} pending",
            video.pending_tiles()
        );

        self.update_vblank_line(lock.borrow_mut());
    }

    fn update_vblank_line(&self, mut lock: CpuLockTokenRefMut<'_, Traits>) {
        let video = self.video.read(&*lock);
        let demand = vblank_demand(video.pending_tiles(), video.sprites_dirty);
        drive_line(lock.borrow_mut(), InterruptFlags::VBLANK, demand);
    }
}
