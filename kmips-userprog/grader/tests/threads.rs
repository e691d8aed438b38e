//! Kernel threads and synchronization primitives.
use grading::{TestDriver, kernel_test};
use kmips::{
    interrupt,
    sync::{ConditionVariable, Mutex, Semaphore, SpinLock},
    thread::{Current, ThreadBuilder},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

fn record(log: &SpinLock<Vec<usize>>, v: usize) {
    let mut log = log.lock();
    log.push(v);
    log.unlock();
}

fn snapshot(log: &SpinLock<Vec<usize>>) -> Vec<usize> {
    let log = log.lock();
    let v = log.clone();
    log.unlock();
    v
}

#[kernel_test]
fn join_returns_exit_code() {
    let normal = ThreadBuilder::new("normal").spawn(|| {});
    let exited = ThreadBuilder::new("exited").spawn(|| Current::exit(7));
    assert_eq!(normal.join(), 0);
    assert_eq!(exited.join(), 7);
    // Joining again returns at once.
    assert_eq!(exited.join(), 7);
}

/// A machine whose timer never fires during a short test.
fn no_preemption() -> TestDriver {
    TestDriver::new().config(|c| c.timer_period = 1_000_000)
}

#[kernel_test(no_preemption)]
fn yield_round_robin() {
    let log = Arc::new(SpinLock::new(Vec::new()));
    let handles: Vec<_> = (0..3)
        .map(|i| {
            let log = log.clone();
            ThreadBuilder::new(format!("worker{}", i)).spawn(move || {
                for _ in 0..2 {
                    record(&log, i);
                    Current::yield_now();
                }
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join(), 0);
    }
    assert_eq!(snapshot(&log), [0, 1, 2, 0, 1, 2]);
}

#[kernel_test(no_preemption)]
fn mutex_grants_in_request_order() {
    let mutex = Arc::new(Mutex::new(Vec::new()));
    let guard = mutex.lock();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let mutex = mutex.clone();
            ThreadBuilder::new(format!("waiter{}", i)).spawn(move || {
                let mut order = mutex.lock();
                order.push(i);
                order.unlock();
            })
        })
        .collect();
    // Let every waiter queue up behind the holder.
    Current::yield_now();
    guard.unlock();
    for h in handles {
        h.join();
    }
    let order = mutex.lock();
    assert_eq!(*order, [0, 1, 2, 3]);
    order.unlock();
}

#[kernel_test]
fn try_lock_fails_while_held() {
    let mutex = Arc::new(Mutex::new(0));
    let guard = mutex.lock();
    let m = mutex.clone();
    let other = ThreadBuilder::new("try").spawn(move || {
        if m.try_lock().is_ok() {
            Current::exit(1);
        }
    });
    assert_eq!(other.join(), 0);
    assert!(mutex.is_held_by_current_thread());
    guard.unlock();
    assert!(!mutex.is_held_by_current_thread());
}

#[kernel_test]
#[should_panic]
fn dropping_a_held_guard_halts() {
    let mutex = Mutex::new(0);
    let guard = mutex.lock();
    drop(guard);
}

struct BoundedBuffer {
    items: Mutex<std::collections::VecDeque<usize>>,
    not_empty: ConditionVariable,
    not_full: ConditionVariable,
}

const CAPACITY: usize = 2;

#[kernel_test]
fn condition_variable_bounded_buffer() {
    let items = Mutex::new(std::collections::VecDeque::new());
    let buffer = Arc::new(BoundedBuffer {
        not_empty: ConditionVariable::new(&items),
        not_full: ConditionVariable::new(&items),
        items,
    });

    let producer = {
        let b = buffer.clone();
        ThreadBuilder::new("producer").spawn(move || {
            for i in 0..10 {
                let mut items = b.not_full.wait_while(&b.items, |q| q.len() == CAPACITY);
                items.push_back(i);
                b.not_empty.signal(&items);
                items.unlock();
            }
        })
    };
    let consumer = {
        let b = buffer.clone();
        ThreadBuilder::new("consumer").spawn(move || {
            for i in 0..10 {
                let mut items = b.not_empty.wait_while(&b.items, |q| q.is_empty());
                assert!(items.len() <= CAPACITY);
                if items.pop_front() != Some(i) {
                    items.unlock();
                    Current::exit(1);
                }
                b.not_full.signal(&items);
                items.unlock();
            }
        })
    };
    assert_eq!(producer.join(), 0);
    assert_eq!(consumer.join(), 0);
}

#[kernel_test]
fn broadcast_wakes_every_waiter() {
    let ready = Arc::new(Mutex::new(false));
    let cv = Arc::new(ConditionVariable::new(&ready));
    let woken = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..3)
        .map(|i| {
            let (ready, cv, woken) = (ready.clone(), cv.clone(), woken.clone());
            ThreadBuilder::new(format!("sleeper{}", i)).spawn(move || {
                let guard = cv.wait_while(&ready, |ready| !*ready);
                woken.fetch_add(1, Ordering::SeqCst);
                guard.unlock();
            })
        })
        .collect();
    Current::yield_now();
    assert_eq!(woken.load(Ordering::SeqCst), 0);

    let mut guard = ready.lock();
    *guard = true;
    cv.broadcast(&guard);
    guard.unlock();
    for h in handles {
        h.join();
    }
    assert_eq!(woken.load(Ordering::SeqCst), 3);
}

#[kernel_test]
fn semaphore_as_event() {
    let sema = Arc::new(Semaphore::new(0, ()));
    let done = Arc::new(AtomicBool::new(false));
    let (s, d) = (sema.clone(), done.clone());
    let waiter = ThreadBuilder::new("waiter").spawn(move || {
        s.down();
        if !d.load(Ordering::SeqCst) {
            Current::exit(1);
        }
    });
    Current::yield_now();
    assert!(!sema.try_down());
    done.store(true, Ordering::SeqCst);
    sema.up();
    assert_eq!(waiter.join(), 0);
    assert_eq!(sema.permits(), 0);
}

#[kernel_test]
fn semaphore_permits_are_returned() {
    let sema = Semaphore::new(2, 5usize);
    {
        let a = sema.wait();
        let _b = sema.wait();
        assert_eq!(*a, 5);
        assert_eq!(sema.permits(), 0);
    }
    assert_eq!(sema.permits(), 2);
}

#[kernel_test]
fn timer_preempts_busy_threads() {
    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    let spinner = ThreadBuilder::new("spinner").spawn(move || {
        while !s.load(Ordering::SeqCst) {
            drop(interrupt::disable());
        }
    });
    let s = stop.clone();
    let stopper = ThreadBuilder::new("stopper").spawn(move || s.store(true, Ordering::SeqCst));
    assert_eq!(spinner.join(), 0);
    assert_eq!(stopper.join(), 0);
}

#[kernel_test]
fn attached_context_is_reachable_while_alive() {
    struct Layer(u32);

    let kernel = Current::kernel();
    let layer = Arc::new(Layer(7));
    assert!(kernel.attach(&layer));
    assert!(!kernel.attach(&Arc::new(Layer(8))));
    assert_eq!(kernel.extension::<Layer>().map(|l| l.0), Some(7));
    assert!(kernel.extension::<String>().is_none());
    drop(layer);
    assert!(kernel.extension::<Layer>().is_none());
}

fn hello() {
    let log = SpinLock::new(Vec::new());
    record(&log, 1);
    assert_eq!(snapshot(&log), [1]);
}

fn nested_threads() {
    let inner = ThreadBuilder::new("inner")
        .spawn(|| assert_eq!(ThreadBuilder::new("innermost").spawn(|| Current::exit(3)).join(), 3));
    assert_eq!(inner.join(), 0);
}

#[test]
fn driver_runs_a_suite() {
    let outcome = TestDriver::new().start([&hello, &nested_threads]);
    outcome.assert_halted();
}
