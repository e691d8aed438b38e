//! The alarm clock.
use grading::kernel_test;
use kmips::{
    sync::SpinLock,
    thread::{Current, ThreadBuilder},
};
use std::sync::Arc;

const PERIOD: u64 = 500;
// Context switches between the timer interrupt and the sleeper running.
const SLACK: u64 = 100;

fn now() -> u64 {
    Current::kernel().machine().interrupt().time()
}

fn sleep(ticks: i64) {
    Current::kernel().alarm().wait_until(ticks)
}

#[kernel_test]
fn wakes_within_one_period_of_the_deadline() {
    // Start at a tick that is not a multiple of the period.
    while now() < 2000 {
        drop(kmips::interrupt::disable());
    }
    let t0 = now();
    sleep(1000);
    let t = now();
    assert!(t > t0 + 1000, "woke at {} after sleeping from {}", t, t0);
    assert!(t < t0 + 1000 + PERIOD + SLACK, "woke at {} after sleeping from {}", t, t0);
}

#[kernel_test]
fn non_positive_delay_waits_for_the_next_interrupt() {
    let t0 = now();
    sleep(0);
    assert!(now() > t0);
    let t1 = now();
    sleep(-5);
    assert!(now() > t1);
}

#[kernel_test]
fn sleepers_wake_in_deadline_order() {
    let log = Arc::new(SpinLock::new(Vec::new()));
    let handles: Vec<_> = [(0, 3000), (1, 1000), (2, 2000), (3, 1000)]
        .into_iter()
        .map(|(id, delay)| {
            let log = log.clone();
            ThreadBuilder::new(format!("sleeper{}", id)).spawn(move || {
                let t0 = now();
                sleep(delay);
                let mut log = log.lock();
                log.push((id, now() - t0 >= delay as u64));
                log.unlock();
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join(), 0);
    }
    let log = log.lock();
    let order: Vec<_> = log.iter().map(|(id, _)| *id).collect();
    let on_time = log.iter().all(|(_, ok)| *ok);
    log.unlock();
    assert_eq!(order, [1, 3, 2, 0]);
    assert!(on_time);
}

#[kernel_test]
fn equal_deadlines_wake_in_sleep_order() {
    let target = now() + 1500;
    let slept = Arc::new(SpinLock::new(Vec::new()));
    let woke = Arc::new(SpinLock::new(Vec::new()));
    let handles: Vec<_> = (0..3)
        .map(|id| {
            let (slept, woke) = (slept.clone(), woke.clone());
            ThreadBuilder::new(format!("tied{}", id)).spawn(move || {
                // Time only moves when interrupts are re-enabled, so the
                // wake tick computed by the alarm is exactly `target`.
                let mut order = slept.lock();
                order.push(id);
                order.unlock();
                sleep((target - now()) as i64);
                let mut order = woke.lock();
                order.push(id);
                order.unlock();
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join(), 0);
    }
    assert!(now() > target);
    let slept = slept.lock();
    let woke = woke.lock();
    assert_eq!(slept.len(), 3);
    assert_eq!(*woke, *slept);
    woke.unlock();
    slept.unlock();
}

#[kernel_test]
fn sleeping_lets_others_run() {
    let log = Arc::new(SpinLock::new(Vec::new()));
    let l = log.clone();
    let sleeper = ThreadBuilder::new("sleeper").spawn(move || {
        sleep(700);
        let mut log = l.lock();
        log.push("sleeper");
        log.unlock();
    });
    let l = log.clone();
    let worker = ThreadBuilder::new("worker").spawn(move || {
        let mut log = l.lock();
        log.push("worker");
        log.unlock();
    });
    sleeper.join();
    worker.join();
    let log = log.lock();
    assert_eq!(*log, ["worker", "sleeper"]);
    log.unlock();
}
