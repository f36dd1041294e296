//! Interrupt lines and their enable policies
//!
//! The kernel treats the interrupt-enable register as part of its control
//! flow: the V-Blank line is only enabled while there is display work to do,
//! and the joypad line is only enabled while every button is released. Both
//! policies are expressed as pure transition functions returning a
//! [`LineDemand`], which [`drive_line`] then applies to the port. The producer
//! operations and the interrupt handlers share the same policy function.
use crate::{klock::CpuLockTokenRefMut, Port, PortInterrupts};

bitflags::bitflags! {
    /// The bits of the interrupt-enable register.
    pub struct InterruptFlags: u8 {
        const VBLANK = 1 << 0;
        const LCD_STAT = 1 << 1;
        const TIMER = 1 << 2;
        const SERIAL = 1 << 3;
        const JOYPAD = 1 << 4;
    }
}

/// The outcome of an enable policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineDemand {
    Enable,
    Disable,
    /// Leave the line alone.
    Keep,
}

impl From<bool> for LineDemand {
    #[inline]
    fn from(x: bool) -> Self {
        if x {
            Self::Enable
        } else {
            Self::Disable
        }
    }
}

/// The V-Blank line is wanted iff there are queued tile writes or the shadow
/// sprites need copying.
#[inline]
pub(crate) fn vblank_demand(pending_tiles: usize, sprites_dirty: bool) -> LineDemand {
    LineDemand::from(pending_tiles > 0 || sprites_dirty)
}

/// The joypad interrupt only fires reliably on a released→pressed edge, so
/// it's only wanted while nothing is held. A held button hands control to the
/// foreground poll loop. A state that didn't change (a spurious firing) must
/// not touch the line.
#[inline]
pub(crate) fn joypad_demand(old_state: u8, new_state: u8) -> LineDemand {
    if old_state == new_state {
        LineDemand::Keep
    } else {
        LineDemand::from(new_state == 0)
    }
}

/// Apply `demand` to the interrupt line(s) `line`. CPU Lock must be active,
/// which is proven by `_lock`.
pub(crate) fn drive_line<Traits: Port>(
    _lock: CpuLockTokenRefMut<'_, Traits>,
    line: InterruptFlags,
    demand: LineDemand,
) {
    if demand == LineDemand::Keep {
        return;
    }

    // Safety: CPU Lock active, so nobody else is doing a read-modify-write on
    //         the register
    let old = unsafe { <Traits as PortInterrupts>::interrupt_enable() };
    let new = match demand {
        LineDemand::Enable => old | line,
        LineDemand::Disable => old - line,
        LineDemand::Keep => old,
    };

    if new != old {
        log::debug!("interrupt enable {old:?} -> {new:?}");
        // Safety: CPU Lock active
        unsafe { <Traits as PortInterrupts>::set_interrupt_enable(new) };
    }
}
