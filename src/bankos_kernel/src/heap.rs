//! Heap allocator
//!
//! A first-fit allocator over a byte arena. The arena is a chain of blocks,
//! each starting with a two-byte header:
//!
//! ```text
//!  ┌──────┬───────┬─────────────────────┐   ┌──────┬───────┬──────   ┌───┐
//!  │ size │ owner │ payload (size - 2)  │   │ size │ owner │ ...     │ 1 │
//!  └──────┴───────┴─────────────────────┘   └──────┴───────┴──────   └───┘
//!  ◄──────────────── size ──────────────►                            end
//! ```
//!
//! `size` counts the header, with `0` standing for 256. The owner tag
//! [`FREE`] marks a free block. A size byte of `1`, which no real block can
//! have, terminates the chain. Freed blocks are not coalesced.
use core::fmt;

use crate::{
    error::{AllocError, BadContextError, FreeError},
    klock, Kernel, Port,
};

/// The owner tag of a free block.
pub const FREE: u8 = 0xff;

/// The size byte of the end-of-arena sentinel.
const SENTINEL: u8 = 1;

const HEADER_LEN: usize = 2;

/// A remainder is split off into a new free block only if it can hold a
/// header and at least one byte.
const MIN_SPLIT: usize = HEADER_LEN + 1;

/// The largest block size.
pub const MAX_BLOCK_SIZE: usize = 256;

/// A block as seen by [`Arena::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// The offset of the block header.
    pub offset: usize,
    /// The block size including the header.
    pub size: usize,
    /// The owner tag, or `None` for a free block.
    pub owner: Option<u8>,
}

impl Block {
    /// The offset of the payload.
    #[inline]
    pub fn payload(&self) -> usize {
        self.offset + HEADER_LEN
    }
}

/// The ways [`Arena::alloc`] can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaAllocError {
    /// [`FREE`] was given as the owner tag.
    BadOwner,
    /// The end of the arena was reached without finding a fitting block.
    /// `scanned` is the number of bytes walked, the sentinel included. It
    /// equals the arena length unless [`Arena::init`] left a byte over.
    Exhausted { scanned: usize },
}

/// Error type for [`Kernel::heap_alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapAllocError {
    /// CPU Lock is active.
    BadContext,
    /// [`FREE`] was given as the owner tag.
    BadOwner,
    /// No free block is large enough. The arena was left unmodified. See
    /// [`ArenaAllocError::Exhausted`].
    Exhausted { scanned: usize },
}

impl From<BadContextError> for HeapAllocError {
    fn from(x: BadContextError) -> Self {
        match x {
            BadContextError::BadContext => Self::BadContext,
        }
    }
}

impl From<ArenaAllocError> for HeapAllocError {
    fn from(x: ArenaAllocError) -> Self {
        match x {
            ArenaAllocError::BadOwner => Self::BadOwner,
            ArenaAllocError::Exhausted { scanned } => Self::Exhausted { scanned },
        }
    }
}

impl From<HeapAllocError> for AllocError {
    fn from(x: HeapAllocError) -> Self {
        match x {
            HeapAllocError::BadContext => Self::BadContext,
            HeapAllocError::BadOwner => Self::BadParam,
            HeapAllocError::Exhausted { .. } => Self::NoMemory,
        }
    }
}

/// A byte arena managed as a block chain.
pub struct Arena<'a> {
    bytes: &'a mut [u8],
}

impl<'a> Arena<'a> {
    /// The smallest arena that can hold one block and the sentinel.
    pub const MIN_LEN: usize = HEADER_LEN + 1;

    /// Take over `bytes` and divide it into free blocks of `block_size` bytes
    /// (`3..=256`). The last block is shortened to make room for the
    /// sentinel, which occupies the last byte unless a single byte is left
    /// over after the last block.
    ///
    /// Returns `None` if the parameters are out of range.
    pub fn init(bytes: &'a mut [u8], block_size: usize) -> Option<Self> {
        if bytes.len() < Self::MIN_LEN || !(MIN_SPLIT..=MAX_BLOCK_SIZE).contains(&block_size) {
            return None;
        }

        let end = bytes.len() - 1;
        let mut offset = 0;
        while end - offset >= HEADER_LEN {
            let size = block_size.min(end - offset);
            write_header(bytes, offset, size, FREE);
            offset += size;
        }
        bytes[offset] = SENTINEL;

        Some(Self { bytes })
    }

    /// Wrap an arena that already holds a block chain.
    pub fn from_initialized(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Get the raw bytes of the arena.
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Allocate `request` bytes for `owner`, returning the offset of the
    /// payload. The first free block that fits is taken; it's split if the
    /// leftover can form a block of its own. The arena isn't modified on
    /// failure.
    pub fn alloc(&mut self, request: usize, owner: u8) -> Result<usize, ArenaAllocError> {
        if owner == FREE {
            return Err(ArenaAllocError::BadOwner);
        }

        let mut found = None;
        let mut blocks = self.blocks();
        for block in blocks.by_ref() {
            if block.owner.is_none() && block.size - HEADER_LEN >= request {
                found = Some(block);
                break;
            }
        }
        let Some(block) = found else {
            return Err(ArenaAllocError::Exhausted {
                scanned: blocks.offset + 1,
            });
        };

        let remainder = block.size - HEADER_LEN - request;
        if remainder >= MIN_SPLIT {
            let size = request + HEADER_LEN;
            write_header(self.bytes, block.offset, size, owner);
            write_header(self.bytes, block.offset + size, remainder, FREE);
        } else {
            self.bytes[block.offset + 1] = owner;
        }

        Ok(block.payload())
    }

    /// Release the block whose payload starts at `payload`.
    pub fn free(&mut self, payload: usize) -> Result<(), FreeError> {
        let block = self
            .blocks()
            .find(|b| b.payload() == payload && b.owner.is_some())
            .ok_or(FreeError::BadParam)?;
        self.bytes[block.offset + 1] = FREE;
        Ok(())
    }

    /// Release every block owned by `owner`. Returns the number of blocks
    /// released.
    pub fn release_owner(&mut self, owner: u8) -> Result<usize, FreeError> {
        if owner == FREE {
            return Err(FreeError::BadParam);
        }

        let mut count = 0;
        let mut offset = 0;
        while let Some(block) = read_block(self.bytes, offset) {
            if block.owner == Some(owner) {
                self.bytes[block.offset + 1] = FREE;
                count += 1;
            }
            offset += block.size;
        }
        Ok(count)
    }

    /// Iterate over the blocks.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            bytes: self.bytes,
            offset: 0,
        }
    }
}

impl fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.blocks()).finish()
    }
}

/// Iterator over the blocks of an [`Arena`].
pub struct Blocks<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Iterator for Blocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let block = read_block(self.bytes, self.offset)?;
        self.offset += block.size;
        Some(block)
    }
}

/// Read the block at `offset`. Returns `None` at the sentinel, or if the
/// chain runs off the end of the arena.
fn read_block(bytes: &[u8], offset: usize) -> Option<Block> {
    let size = match *bytes.get(offset)? {
        SENTINEL => return None,
        0 => MAX_BLOCK_SIZE,
        x => x as usize,
    };
    let Some(&owner) = bytes.get(offset + 1) else {
        log::warn!("heap block at {offset} has no owner byte");
        return None;
    };
    if size < HEADER_LEN || offset + size >= bytes.len() {
        log::warn!("heap chain is corrupted at {offset} (size {size})");
        return None;
    }
    Some(Block {
        offset,
        size,
        owner: (owner != FREE).then_some(owner),
    })
}

fn write_header(bytes: &mut [u8], offset: usize, size: usize, owner: u8) {
    debug_assert!((HEADER_LEN..=MAX_BLOCK_SIZE).contains(&size));
    // 256 wraps to 0
    bytes[offset] = size as u8;
    bytes[offset + 1] = owner;
}

impl<Traits: Port> Kernel<Traits> {
    /// Allocate `size` bytes from the heap arena on behalf of `owner`.
    /// Returns the offset of the allocated memory within the arena.
    ///
    /// [`AllocError`] is the result-code view of the returned error.
    pub fn heap_alloc(&self, size: usize, owner: u8) -> Result<usize, HeapAllocError> {
        log::trace!("heap_alloc({size}, {owner})");
        let mut lock = klock::lock_cpu::<Traits>()?;
        match self.heap.write(&mut *lock).alloc(size, owner) {
            Ok(offset) => Ok(offset),
            Err(e @ ArenaAllocError::Exhausted { scanned }) => {
                log::warn!("heap exhausted: no block for {size} bytes in {scanned} bytes");
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release the allocation starting at `offset`.
    pub fn heap_free(&self, offset: usize) -> Result<(), FreeError> {
        log::trace!("heap_free({offset})");
        let mut lock = klock::lock_cpu::<Traits>()?;
        self.heap.write(&mut *lock).free(offset)
    }

    /// Release every allocation made on behalf of `owner`. Returns the number
    /// of blocks released.
    pub fn heap_release_owner(&self, owner: u8) -> Result<usize, FreeError> {
        log::trace!("heap_release_owner({owner})");
        let mut lock = klock::lock_cpu::<Traits>()?;
        let count = self.heap.write(&mut *lock).release_owner(owner)?;
        log::debug!("released {count} heap block(s) of owner {owner}");
        Ok(count)
    }

    /// Inspect the heap arena.
    pub fn inspect_heap<R>(&self, f: impl FnOnce(&Arena<'_>) -> R) -> Result<R, BadContextError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Ok(f(self.heap.read(&*lock)))
    }
}
