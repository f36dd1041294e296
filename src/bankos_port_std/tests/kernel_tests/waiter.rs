//! Waiters whose chains are threaded through the task control blocks
use bankos_kernel::{
    BadParamError, Determinant, IntSafeWaiter, KernelCfg, PortThreading, WaitError, Waiter,
};
use bankos_port_std::PortInstance;
use std::cell::Cell;

use crate::boot_with_tasks;

/// The determinant of task `id`'s wait link with the default task list base
fn node(id: u16) -> Determinant {
    Determinant::new(0, 0xc000 + id * 6 + 4).unwrap()
}

pub fn wait_and_wake_all<Traits: PortInstance>() {
    let kernel = boot_with_tasks::<Traits>(KernelCfg::new(), 2);
    let waiter = IntSafeWaiter::<Traits>::new(2, 0xa000).unwrap();

    for id in [5, 1, 3] {
        waiter.wait(&kernel, id).unwrap();
    }
    assert_eq!(waiter.count(), Ok(3));
    assert_eq!(waiter.waiting_tasks(&kernel).unwrap().as_slice(), &[1, 3, 5]);
    assert_eq!(kernel.task(1).unwrap().wait_link(), node(3));
    assert_eq!(kernel.task(3).unwrap().wait_link(), node(5));
    assert_eq!(kernel.task(5).unwrap().wait_link(), waiter.home());

    // Task 1 is also woken by the sleep queue first
    kernel.enqueue_sleep_task(1, 0).unwrap();
    kernel.check_next_wake().unwrap();

    assert_eq!(waiter.wake_all(&kernel), Ok(3));
    assert_eq!(kernel.run_list().unwrap().as_slice(), &[1, 3, 5]);
    assert_eq!(waiter.count(), Ok(0));
    for id in [1, 3, 5] {
        assert!(!kernel.task(id).unwrap().is_waiting());
    }

    assert_eq!(waiter.wake_all(&kernel), Ok(0));
}

pub fn wake_one_in_order<Traits: PortInstance>() {
    let kernel = boot_with_tasks::<Traits>(KernelCfg::new(), 0);
    let waiter = IntSafeWaiter::<Traits>::new(0, 0xff90).unwrap();

    for id in [7, 0, 4] {
        waiter.wait(&kernel, id).unwrap();
    }
    assert_eq!(waiter.wake_one(&kernel), Ok(Some(0)));
    assert_eq!(waiter.count(), Ok(2));
    assert_eq!(waiter.wake_one(&kernel), Ok(Some(4)));
    assert_eq!(waiter.wake_one(&kernel), Ok(Some(7)));
    assert_eq!(waiter.wake_one(&kernel), Ok(None));

    assert_eq!(kernel.take_ready(), Ok(Some(0)));
    assert_eq!(kernel.take_ready(), Ok(Some(4)));
    assert_eq!(kernel.take_ready(), Ok(Some(7)));
    assert_eq!(kernel.take_ready(), Ok(None));
}

pub fn stale_nodes<Traits: PortInstance>() {
    let kernel = boot_with_tasks::<Traits>(KernelCfg::new(), 2);
    let waiter = IntSafeWaiter::<Traits>::new(2, 0xa000).unwrap();
    for id in 1..=4 {
        waiter.wait(&kernel, id).unwrap();
    }

    // Task 2 now runs with another bank, and task 3's slot was vacated
    kernel.configure_task(2, 0xde00, 5).unwrap();
    kernel.configure_task(3, 0, 2).unwrap();
    assert!(kernel.task(2).unwrap().is_waiting());

    assert_eq!(waiter.wake_all(&kernel), Ok(2));
    assert_eq!(kernel.run_list().unwrap().as_slice(), &[1, 4]);

    // The stale tasks are free to wait again
    assert!(!kernel.task(2).unwrap().is_waiting());
    let other = IntSafeWaiter::<Traits>::new(5, 0xa100).unwrap();
    other.wait(&kernel, 2).unwrap();
    assert_eq!(other.wake_one(&kernel), Ok(Some(2)));
}

pub fn wait_twice<Traits: PortInstance>() {
    let kernel = boot_with_tasks::<Traits>(KernelCfg::new(), 0);
    let a = IntSafeWaiter::<Traits>::new(0, 0xc800).unwrap();
    let b = IntSafeWaiter::<Traits>::new(0, 0xc802).unwrap();

    a.wait(&kernel, 1).unwrap();
    assert_eq!(a.wait(&kernel, 1), Err(WaitError::BadObjectState));
    assert_eq!(b.wait(&kernel, 1), Err(WaitError::BadObjectState));
    assert_eq!(a.wait(&kernel, 8), Err(WaitError::BadId));
    assert_eq!(a.count(), Ok(1));
    assert_eq!(b.count(), Ok(0));
}

pub fn check_or_wait<Traits: PortInstance>() {
    let kernel = boot_with_tasks::<Traits>(KernelCfg::new(), 0);
    let waiter = IntSafeWaiter::<Traits>::new(0, 0xff82).unwrap();
    let ready = Cell::new(false);
    let checked = Cell::new(0);
    let check = || {
        assert!(Traits::is_cpu_lock_active());
        checked.set(checked.get() + 1);
        ready.get()
    };

    assert_eq!(waiter.check_or_wait(&kernel, 2, |_| check()), Ok(true));
    ready.set(true);
    assert_eq!(waiter.check_or_wait(&kernel, 3, |_| check()), Ok(false));
    assert_eq!(checked.get(), 2);
    assert_eq!(waiter.waiting_tasks(&kernel).unwrap().as_slice(), &[2]);
}

pub fn bare_waiter<Traits: PortInstance>() {
    let kernel = boot_with_tasks::<Traits>(KernelCfg::new(), 1);
    assert!(matches!(
        Waiter::<Traits>::new(0, 0xffff),
        Err(BadParamError::BadParam)
    ));
    let waiter = Waiter::<Traits>::new(1, 0xd000).unwrap();

    {
        let mut lock = kernel.lock_cpu().unwrap();
        waiter.wait(lock.borrow_mut(), &kernel, 6).unwrap();
        waiter.wait(lock.borrow_mut(), &kernel, 0).unwrap();
        assert_eq!(waiter.count(lock.borrow_mut()), 2);
        assert_eq!(
            waiter.waiting_tasks(lock.borrow_mut(), &kernel).as_slice(),
            &[0, 6]
        );
        assert_eq!(waiter.wake_one(lock.borrow_mut(), &kernel), Some(0));
    }

    assert_eq!(kernel.run_list().unwrap().as_slice(), &[0]);
    assert_eq!(kernel.task(6).unwrap().wait_link(), waiter.home());
}
