//! Utility
mod ring;
pub(crate) use self::ring::Ring;
