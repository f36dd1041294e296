//! Kernel initialization and the CPU Lock discipline
use bankos_kernel::{
    Buttons, ConfigureTaskError, HeapAllocError, InterruptFlags, Kernel, KernelCfg,
    NewKernelError, PollJoypadError, PortThreading, SleepError, TryWriteTileError, WakeError,
};
use bankos_port_std::{leak_arena, PortInstance};

use crate::boot;

pub fn new_sets_up_interrupts<Traits: PortInstance>() {
    Traits::port_state().hardware().interrupt_enable =
        InterruptFlags::VBLANK | InterruptFlags::TIMER;

    let kernel = boot::<Traits>(KernelCfg::new());
    assert!(!Traits::is_cpu_lock_active());
    assert_eq!(
        Traits::port_state().hardware().interrupt_enable,
        InterruptFlags::TIMER | InterruptFlags::JOYPAD
    );
    assert_eq!(kernel.cfg(), &KernelCfg::new());
    assert!(kernel.run_list().unwrap().is_empty());
    assert_eq!(kernel.uptime(), Ok(0));
    assert_eq!(kernel.pending_tiles(), Ok(0));
    assert_eq!(kernel.joy_state(), Ok(Buttons::empty()));
}

pub fn new_rejects_bad_cfg<Traits: PortInstance>() {
    let bad_cfgs = [
        KernelCfg::new().num_tasks(0),
        KernelCfg::new().num_tasks(33),
        KernelCfg::new().task_list_base(0xc001),
        KernelCfg::new().task_list_base(0xd000),
        KernelCfg::new().task_list_base(0xcff0),
        KernelCfg::new().heap_block_size(2),
        KernelCfg::new().joypad_settle_reads(0),
        KernelCfg::new().input_waiter_home(0, 0x8000),
    ];
    for cfg in bad_cfgs {
        assert!(matches!(
            Kernel::<Traits>::new(cfg, leak_arena(64)),
            Err(NewKernelError::BadParam)
        ));
    }

    // The arena is too small to hold a block
    assert!(matches!(
        Kernel::<Traits>::new(KernelCfg::new(), leak_arena(2)),
        Err(NewKernelError::BadParam)
    ));

    // Nothing was touched
    assert!(!Traits::is_cpu_lock_active());
    assert_eq!(Traits::port_state().hardware().interrupt_enable_writes, 0);

    // Safety: We don't touch kernel state while the lock is held
    assert!(unsafe { Traits::try_enter_cpu_lock() });
    assert!(matches!(
        Kernel::<Traits>::new(KernelCfg::new(), leak_arena(64)),
        Err(NewKernelError::BadContext)
    ));
    unsafe { Traits::leave_cpu_lock() };

    assert!(Kernel::<Traits>::new(KernelCfg::new(), leak_arena(64)).is_ok());
}

pub fn operations_fail_under_lock<Traits: PortInstance>() {
    let kernel = boot::<Traits>(KernelCfg::new());
    let guard = kernel.lock_cpu().unwrap();

    assert!(kernel.lock_cpu().is_err());
    assert_eq!(kernel.heap_alloc(4, 1), Err(HeapAllocError::BadContext));
    assert_eq!(
        kernel.try_write_tile(0, 0),
        Err(TryWriteTileError::BadContext)
    );
    assert_eq!(
        kernel.get_press(Buttons::empty()),
        Err(PollJoypadError::BadContext)
    );
    assert_eq!(kernel.sleep_for(0, 1), Err(SleepError::BadContext));
    assert_eq!(
        kernel.configure_task(0, 0xd000, 0),
        Err(ConfigureTaskError::BadContext)
    );
    assert_eq!(
        kernel.input_waiter().wake_all(&kernel),
        Err(WakeError::BadContext)
    );
    assert!(kernel.take_ready().is_err());

    drop(guard);
    assert!(!Traits::is_cpu_lock_active());
    assert_eq!(kernel.heap_alloc(4, 1), Ok(2));
}

pub fn handlers_skip_under_lock<Traits: PortInstance>() {
    let kernel = boot::<Traits>(KernelCfg::new());
    kernel.try_write_tile(0x0010, 0x55).unwrap();
    Traits::port_state().press(Buttons::START);

    {
        let _guard = kernel.lock_cpu().unwrap();
        kernel.vblank_handler();
        kernel.timer_tick();
        kernel.joypad_handler();
    }

    let hw = Traits::port_state().hardware();
    assert_eq!(hw.tile_grid[0x10], 0);
    assert_eq!(hw.joypad_reads, 0);
    drop(hw);
    assert_eq!(kernel.uptime(), Ok(0));
    assert_eq!(kernel.pending_tiles(), Ok(1));

    kernel.vblank_handler();
    assert_eq!(Traits::port_state().hardware().tile_grid[0x10], 0x55);
}
