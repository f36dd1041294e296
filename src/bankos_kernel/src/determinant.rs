//! Determinants: compact, bank-aware references into banked RAM
//!
//! A determinant squeezes a `(RAM bank, address)` pair into 16 bits. Wait
//! chains link through determinants rather than raw pointers so that a chain
//! can mention objects that live in a RAM bank other than the one currently
//! mapped.
//!
//! ```text
//!  15 14 13 12 11 10 ........ 0
//! ┌──┬───────────┬─────────────┐
//! │0 │ SRAM bank │ offset >> 2 │   A000–BFFF, 4-byte granularity
//! ├──┼──┬────────┼─────────────┤
//! │1 │0 │  bank  │ offset >> 1 │   C000–DFFF, 2-byte granularity
//! ├──┼──┼────────┴──┬──────────┤
//! │1 │1 │ 0 0 0 0 0 0│  offset  │   FF80–FFFE, no bank
//! └──┴──┴───────────┴──────────┘
//! ```
//!
//! `0xFFFF` is the sentinel ("no link").
use core::fmt;

use crate::error::BadParamError;

/// A compact reference to a location in banked memory. See the
/// [module-level documentation](self).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Determinant(u16);

/// The memory region a [`Determinant`] points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Cartridge RAM, switched by the SRAM bank number.
    Sram,
    /// Work RAM. Bank 0 denotes the fixed WRAM0 window; banks 1–7 denote the
    /// switchable WRAMX window.
    Wram,
    /// High RAM. Always visible.
    Hram,
}

/// A decoded [`Determinant`]: a region tag, the bank within the region, and a
/// region-local byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub region: Region,
    pub bank: u8,
    pub offset: u16,
}

/// The address that always encodes to [`Determinant::SENTINEL`].
pub const SENTINEL_ADDR: u16 = 0xffff;

const WRAM_TAG: u16 = 0x8000;
const HRAM_TAG: u16 = 0xc000;

impl Determinant {
    /// "No link"
    pub const SENTINEL: Self = Self(0xffff);

    /// Canonicalize `(bank, addr)`.
    ///
    /// The bank is ignored for HRAM and for the sentinel address. Low address
    /// bits below the region's granularity are dropped, so objects referenced
    /// through determinants must be aligned accordingly.
    pub fn new(bank: u8, addr: u16) -> Result<Self, BadParamError> {
        let bank = bank as u16;
        match addr {
            SENTINEL_ADDR => Ok(Self::SENTINEL),
            0xa000..=0xbfff => Ok(Self(((addr & 0x1fff) >> 2) | (bank & 0x0f) << 11)),
            0xc000..=0xdfff => Ok(Self(((addr & 0x0fff) >> 1) | (bank & 0x07) << 11 | WRAM_TAG)),
            0xff80..=0xfffe => Ok(Self(HRAM_TAG | (addr & 0xff))),
            _ => Err(BadParamError::BadParam),
        }
    }

    /// Reinterpret a raw 16-bit value as a determinant.
    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Get the raw 16-bit representation.
    #[inline]
    pub const fn to_raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_sentinel(self) -> bool {
        self.0 == Self::SENTINEL.0
    }

    /// Decode the determinant. Returns `None` for the sentinel and for values
    /// that no address encodes to.
    pub fn decode(self) -> Option<Location> {
        let d = self.0;
        if self.is_sentinel() {
            None
        } else if d & 0x8000 == 0 {
            Some(Location {
                region: Region::Sram,
                bank: ((d >> 11) & 0x0f) as u8,
                offset: (d & 0x07ff) << 2,
            })
        } else if d & HRAM_TAG == WRAM_TAG {
            Some(Location {
                region: Region::Wram,
                bank: ((d >> 11) & 0x07) as u8,
                offset: (d & 0x07ff) << 1,
            })
        } else if d & 0xff00 == HRAM_TAG && d & 0xff >= 0x80 {
            Some(Location {
                region: Region::Hram,
                bank: 0,
                offset: d & 0xff,
            })
        } else {
            None
        }
    }

    /// Get the RAM bank a task must have mapped to reach the referenced
    /// object, or `None` if the object is reachable from any bank.
    pub(crate) fn required_bank(self) -> Option<u8> {
        match self.decode()? {
            Location {
                region: Region::Sram,
                bank,
                ..
            } => Some(bank),
            Location {
                region: Region::Wram,
                bank,
                ..
            } if bank != 0 => Some(bank),
            _ => None,
        }
    }
}

impl fmt::Debug for Determinant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_sentinel() {
            f.write_str("Determinant(-)")
        } else {
            write!(f, "Determinant({:#06x})", self.0)
        }
    }
}
