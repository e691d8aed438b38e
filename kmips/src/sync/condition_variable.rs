//! # Condition Variable.
//!
//! A condition variable lets a thread sleep until another thread tells it
//! that the shared state changed. It is bound to one [`Mutex`] when created,
//! and every operation must be made while holding that mutex.
//!
//! The semantics are Mesa-style: [`signal`] only makes a waiter ready, and by
//! the time the waiter holds the mutex again the state may have changed once
//! more. Waiters must therefore re-check their predicate;
//! [`ConditionVariable::wait_while`] does that loop for you:
//!
//! ```no_run
//! # use kmips::sync::{ConditionVariable, Mutex};
//! # let mutex = Mutex::new(Vec::<u32>::new());
//! let condvar = ConditionVariable::new(&mutex);
//! let guard = condvar.wait_while(&mutex, |queue| queue.is_empty());
//! guard.unlock();
//! ```
//!
//! [`signal`]: ConditionVariable::signal

use super::mutex::{Mutex, MutexGuard};
use crate::{
    interrupt,
    sync::SpinLock,
    thread::{Current, ParkHandle},
};
use std::collections::VecDeque;

/// A Condition Variable
///
/// Waiters are woken in the order they started waiting.
pub struct ConditionVariable {
    mutex_id: u64,
    waiters: SpinLock<VecDeque<ParkHandle>>,
}

impl ConditionVariable {
    /// Creates a new condition variable bound to `mutex`.
    pub fn new<T>(mutex: &Mutex<T>) -> Self {
        Self {
            mutex_id: mutex.id(),
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    fn check_bound<T>(&self, guard: &MutexGuard<'_, T>) {
        assert_eq!(
            guard.mutex().id(),
            self.mutex_id,
            "Condition variable used with a mutex it is not bound to."
        );
    }

    /// Atomically releases the mutex and blocks the current thread, then
    /// re-acquires the mutex once woken.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.check_bound(&guard);
        let mutex = guard.mutex();
        let irq = interrupt::disable();
        Current::park_with(|handle| {
            let mut waiters = self.waiters.lock();
            waiters.push_back(handle);
            waiters.unlock();
            guard.unlock();
        });
        drop(irq);
        mutex.lock()
    }

    /// Blocks the current thread while `predicate` returns `true`.
    ///
    /// Locks `mutex`, and waits until `predicate` is false under the mutex.
    /// Returns the guard of the mutex.
    pub fn wait_while<'a, T>(
        &self,
        mutex: &'a Mutex<T>,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        let mut guard = mutex.lock();
        while predicate(&mut guard) {
            guard = self.wait(guard);
        }
        guard
    }

    /// Wakes up one blocked thread on this condvar, if any.
    ///
    /// The caller keeps holding the mutex.
    pub fn signal<T>(&self, guard: &MutexGuard<'_, T>) {
        self.check_bound(guard);
        let _irq = interrupt::disable();
        let mut waiters = self.waiters.lock();
        let next = waiters.pop_front();
        waiters.unlock();
        if let Some(next) = next {
            next.unpark();
        }
    }

    /// Wakes up all blocked threads on this condvar, in FIFO order.
    pub fn broadcast<T>(&self, guard: &MutexGuard<'_, T>) {
        self.check_bound(guard);
        let _irq = interrupt::disable();
        let mut waiters = self.waiters.lock();
        let all: Vec<ParkHandle> = waiters.drain(..).collect();
        waiters.unlock();
        for handle in all {
            handle.unpark();
        }
    }
}
