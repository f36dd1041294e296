//! The joypad interrupt handler and the input queue
use bankos_kernel::{
    Buttons, InterruptFlags, KernelCfg, PollJoypadError, JOY_QUEUE_CAPACITY, SELECT_BOTH,
};
use bankos_port_std::PortInstance;

use crate::{boot, boot_with_tasks};

fn joypad_line<Traits: PortInstance>() -> bool {
    let hw = Traits::port_state().hardware();
    hw.interrupt_enable.contains(InterruptFlags::JOYPAD)
}

fn ie_writes<Traits: PortInstance>() -> usize {
    Traits::port_state().hardware().interrupt_enable_writes
}

pub fn press_disables_line<Traits: PortInstance>() {
    let kernel = boot::<Traits>(KernelCfg::new());
    assert!(joypad_line::<Traits>());

    Traits::port_state().press(Buttons::A);
    kernel.joypad_handler();

    assert!(!joypad_line::<Traits>());
    assert_eq!(kernel.joy_state(), Ok(Buttons::A));
    assert_eq!(kernel.pending_presses(), Ok(1));
    // Both groups stay selected after sampling
    assert_eq!(Traits::port_state().hardware().joypad_select, SELECT_BOTH);
}

pub fn release_enables_line<Traits: PortInstance>() {
    let kernel = boot::<Traits>(KernelCfg::new());
    Traits::port_state().press(Buttons::A | Buttons::LEFT);
    kernel.joypad_handler();
    assert!(!joypad_line::<Traits>());

    Traits::port_state().release(Buttons::all());
    kernel.joypad_handler();
    assert!(joypad_line::<Traits>());
    assert_eq!(kernel.joy_state(), Ok(Buttons::empty()));
    assert_eq!(kernel.pending_presses(), Ok(2));

    // The next press of either group pulls a selected line low, which is what
    // raises the interrupt
    for buttons in [Buttons::START, Buttons::DOWN] {
        Traits::port_state().press(buttons);
        let lines = Traits::port_state().hardware().joypad_register() & 0x0f;
        assert_ne!(lines, 0x0f, "{buttons:?}");
        Traits::port_state().release(buttons);
    }
}

pub fn held_change_keeps_line_disabled<Traits: PortInstance>() {
    let kernel = boot::<Traits>(KernelCfg::new());
    Traits::port_state().press(Buttons::A);
    kernel.joypad_handler();
    let writes = ie_writes::<Traits>();

    Traits::port_state().press(Buttons::DOWN);
    kernel.joypad_handler();
    assert!(!joypad_line::<Traits>());
    assert_eq!(ie_writes::<Traits>(), writes);
    assert_eq!(kernel.joy_state(), Ok(Buttons::A | Buttons::DOWN));
    assert_eq!(kernel.pending_presses(), Ok(2));
}

pub fn spurious_firing<Traits: PortInstance>() {
    let kernel = boot::<Traits>(KernelCfg::new());
    let writes = ie_writes::<Traits>();

    kernel.joypad_handler();
    assert!(joypad_line::<Traits>());
    assert_eq!(ie_writes::<Traits>(), writes);
    assert_eq!(kernel.pending_presses(), Ok(0));

    Traits::port_state().press(Buttons::SELECT);
    kernel.joypad_handler();
    let writes = ie_writes::<Traits>();
    kernel.joypad_handler();
    assert_eq!(ie_writes::<Traits>(), writes);
    assert_eq!(kernel.pending_presses(), Ok(1));
}

pub fn overflow_still_updates_state<Traits: PortInstance>() {
    let kernel = boot::<Traits>(KernelCfg::new());
    let n = JOY_QUEUE_CAPACITY as u8 + 1;
    for bits in 1..=n {
        Traits::port_state().hardware().pressed = Buttons::from_bits_truncate(bits);
        kernel.joypad_handler();
    }

    assert_eq!(kernel.pending_presses(), Ok(JOY_QUEUE_CAPACITY));
    assert_eq!(kernel.joy_state(), Ok(Buttons::from_bits_truncate(n)));
    // The oldest change is still there
    assert_eq!(
        kernel.get_press(Buttons::empty()),
        Ok((Buttons::A, Buttons::A))
    );
}

pub fn get_press_sequence<Traits: PortInstance>() {
    let kernel = boot::<Traits>(KernelCfg::new());
    let port = Traits::port_state();
    assert_eq!(
        kernel.get_press(Buttons::empty()),
        Err(PollJoypadError::Timeout)
    );

    port.press(Buttons::A);
    kernel.joypad_handler();
    port.press(Buttons::UP);
    kernel.joypad_handler();
    port.release(Buttons::A);
    kernel.joypad_handler();

    let (new, tracked) = kernel.get_press(Buttons::empty()).unwrap();
    assert_eq!((new, tracked), (Buttons::A, Buttons::A));
    let (new, tracked) = kernel.get_press(tracked).unwrap();
    assert_eq!((new, tracked), (Buttons::UP, Buttons::A | Buttons::UP));
    let (new, tracked) = kernel.get_press(tracked).unwrap();
    assert_eq!((new, tracked), (Buttons::empty(), Buttons::UP));
    assert_eq!(kernel.get_press(tracked), Err(PollJoypadError::Timeout));
}

pub fn unsettled_reads<Traits: PortInstance>() {
    // Every read lands in the settling window
    let kernel = boot::<Traits>(KernelCfg::new().joypad_settle_reads(1));
    Traits::port_state().press(Buttons::B);
    kernel.joypad_handler();
    assert_eq!(kernel.joy_state(), Ok(Buttons::empty()));
    assert_eq!(Traits::port_state().hardware().joypad_reads, 2);

    Traits::port_state().hardware().joypad_settle_delay = 0;
    kernel.joypad_handler();
    assert_eq!(kernel.joy_state(), Ok(Buttons::B));
}

pub fn input_wakes_waiters<Traits: PortInstance>() {
    let kernel = boot_with_tasks::<Traits>(KernelCfg::new(), 0);

    assert_eq!(kernel.wait_for_input(3), Ok(true));
    assert_eq!(kernel.wait_for_input(1), Ok(true));
    assert_eq!(kernel.input_waiter().count(), Ok(2));

    // No change, no wakeup
    kernel.joypad_handler();
    assert_eq!(kernel.input_waiter().count(), Ok(2));

    Traits::port_state().press(Buttons::B);
    kernel.joypad_handler();
    assert_eq!(kernel.run_list().unwrap().as_slice(), &[1, 3]);
    assert_eq!(kernel.input_waiter().count(), Ok(0));
    assert!(!kernel.task(1).unwrap().is_waiting());

    // A change is already queued, so there's no need to wait
    assert_eq!(kernel.wait_for_input(2), Ok(false));
    kernel.get_press(Buttons::empty()).unwrap();
    assert_eq!(kernel.wait_for_input(2), Ok(true));
    assert_eq!(kernel.input_waiter().waiting_tasks(&kernel).unwrap().as_slice(), &[2]);
}
