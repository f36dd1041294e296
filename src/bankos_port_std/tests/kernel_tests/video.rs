//! The display update queue and the V-Blank interrupt handler
use bankos_kernel::{
    InterruptFlags, KernelCfg, Sprite, SpriteAttributes, TryWriteTileError, WriteSpriteError,
    NUM_SPRITES, NUM_TILE_QUEUES, TILE_QUEUE_CAPACITY,
};
use bankos_port_std::PortInstance;

use crate::boot;

fn vblank_line<Traits: PortInstance>() -> bool {
    let hw = Traits::port_state().hardware();
    hw.interrupt_enable.contains(InterruptFlags::VBLANK)
}

pub fn first_write_enables_vblank<Traits: PortInstance>() {
    let kernel = boot::<Traits>(KernelCfg::new());
    assert!(!vblank_line::<Traits>());

    kernel.try_write_tile(0x0123, 9).unwrap();
    assert!(vblank_line::<Traits>());
    assert_eq!(kernel.pending_tiles(), Ok(1));
    // Nothing reaches the tile grid before V-Blank
    assert_eq!(Traits::port_state().hardware().tile_grid[0x123], 0);

    kernel.vblank_handler();
    assert_eq!(Traits::port_state().hardware().tile_grid[0x123], 9);
    assert!(!vblank_line::<Traits>());
    assert_eq!(kernel.pending_tiles(), Ok(0));
}

pub fn full_queue<Traits: PortInstance>() {
    // The status byte reported for a full queue
    assert_eq!(TILE_QUEUE_CAPACITY, 128);

    let kernel = boot::<Traits>(KernelCfg::new());
    for i in 0..TILE_QUEUE_CAPACITY as u16 {
        kernel.try_write_tile(0x0100 | i, 1).unwrap();
    }
    let writes = Traits::port_state().hardware().interrupt_enable_writes;

    assert_eq!(
        kernel.try_write_tile(0x01ff, 2),
        Err(TryWriteTileError::QueueOverflow)
    );
    assert_eq!(
        kernel.try_write_tile(0x0400, 2),
        Err(TryWriteTileError::BadParam)
    );
    assert!(vblank_line::<Traits>());
    assert_eq!(
        Traits::port_state().hardware().interrupt_enable_writes,
        writes
    );
    assert_eq!(kernel.pending_tiles(), Ok(TILE_QUEUE_CAPACITY));

    // Room is made by the next V-Blank
    kernel.vblank_handler();
    kernel.try_write_tile(0x01ff, 2).unwrap();
}

pub fn flush_small<Traits: PortInstance>() {
    let kernel = boot::<Traits>(KernelCfg::new());
    for position in (60..80u16).rev() {
        kernel
            .try_write_tile(0x0100 | position, position as u8 + 10)
            .unwrap();
    }
    // Later writes to the same cell win
    kernel.try_write_tile(0x0100 | 70, 0xee).unwrap();

    kernel.vblank_handler();
    let hw = Traits::port_state().hardware();
    for position in 60..80usize {
        let expected = if position == 70 {
            0xee
        } else {
            position as u8 + 10
        };
        assert_eq!(hw.tile_grid[0x100 + position], expected);
    }
    assert_eq!(hw.tile_grid[0x100 + 59], 0);
    assert!(!hw.interrupt_enable.contains(InterruptFlags::VBLANK));
}

pub fn flush_large<Traits: PortInstance>() {
    let kernel = boot::<Traits>(KernelCfg::new().vblank_credits(100));
    for section in 0..NUM_TILE_QUEUES as u16 {
        for i in 0..TILE_QUEUE_CAPACITY as u16 {
            kernel
                .try_write_tile(section << 8 | i, i as u8 + 1)
                .unwrap();
        }
    }
    let total = NUM_TILE_QUEUES * TILE_QUEUE_CAPACITY;

    kernel.vblank_handler();
    assert_eq!(kernel.pending_tiles(), Ok(total - 100));
    assert!(vblank_line::<Traits>());
    {
        // The first queue is drained first
        let hw = Traits::port_state().hardware();
        assert_eq!(hw.tile_grid[99], 100);
        assert_eq!(hw.tile_grid[100], 0);
        assert_eq!(hw.tile_grid[0x100], 0);
    }

    let mut interrupts = 1;
    while kernel.pending_tiles().unwrap() > 0 {
        kernel.vblank_handler();
        interrupts += 1;
    }
    assert_eq!(interrupts, (total + 99) / 100);
    assert!(!vblank_line::<Traits>());

    let hw = Traits::port_state().hardware();
    for section in 0..NUM_TILE_QUEUES {
        for i in 0..TILE_QUEUE_CAPACITY {
            assert_eq!(hw.tile_grid[section << 8 | i], i as u8 + 1);
        }
    }
}

pub fn sprites<Traits: PortInstance>() {
    let kernel = boot::<Traits>(KernelCfg::new());
    let sprite = Sprite {
        y: 40,
        x: 42,
        tile: 0x80,
        attributes: (SpriteAttributes::PRIORITY | SpriteAttributes::PALETTE).bits(),
    };

    kernel.write_sprite(3, sprite).unwrap();
    assert_eq!(kernel.sprites_dirty(), Ok(true));
    assert!(vblank_line::<Traits>());
    assert_eq!(
        kernel.write_sprite(NUM_SPRITES, sprite),
        Err(WriteSpriteError::BadParam)
    );

    kernel.vblank_handler();
    {
        let hw = Traits::port_state().hardware();
        assert_eq!(hw.sprite_table[3], sprite);
        assert_eq!(hw.sprite_table[2], Sprite::INIT);
        assert_eq!(hw.sprite_table_writes, 1);
        assert!(!hw.interrupt_enable.contains(InterruptFlags::VBLANK));
    }
    assert_eq!(kernel.sprites_dirty(), Ok(false));

    // A clean table isn't copied again
    kernel.vblank_handler();
    assert_eq!(Traits::port_state().hardware().sprite_table_writes, 1);
}
