//! # Semaphore.
//!
//! A counting semaphore bundled with the resource it guards. [`wait`] takes a
//! permit, blocking until one is available, and returns a
//! [`SemaphorePermits`] guard that gives the permit back on drop. A
//! semaphore created with zero permits works as an event: one thread
//! [`down`]s, another [`up`]s.
//!
//! Like the [`Mutex`], `up` hands the permit straight to the first waiter,
//! so waiters are served in FIFO order.
//!
//! [`wait`]: Semaphore::wait
//! [`down`]: Semaphore::down
//! [`up`]: Semaphore::up
//! [`Mutex`]: crate::sync::Mutex

use crate::{
    interrupt,
    sync::SpinLock,
    thread::{Current, ParkHandle},
};
use core::ops::Deref;
use std::collections::VecDeque;

struct State {
    permits: usize,
    waiters: VecDeque<ParkHandle>,
}

/// Counting semaphore.
pub struct Semaphore<T = ()> {
    state: SpinLock<State>,
    resource: T,
}

impl<T> Semaphore<T> {
    /// Creates a new semaphore with `permits` permits guarding `resource`.
    pub fn new(permits: usize, resource: T) -> Self {
        Self {
            state: SpinLock::new(State {
                permits,
                waiters: VecDeque::new(),
            }),
            resource,
        }
    }

    /// Takes a permit, blocking the current thread until one is available.
    pub fn down(&self) {
        let _irq = interrupt::disable();
        let mut state = self.state.lock();
        if state.permits > 0 {
            state.permits -= 1;
            state.unlock();
            return;
        }
        state.unlock();
        Current::park_with(|handle| {
            let mut state = self.state.lock();
            state.waiters.push_back(handle);
            state.unlock();
        });
    }

    /// Takes a permit if one is available. Never blocks.
    pub fn try_down(&self) -> bool {
        let _irq = interrupt::disable();
        let mut state = self.state.lock();
        let taken = state.permits > 0;
        if taken {
            state.permits -= 1;
        }
        state.unlock();
        taken
    }

    /// Gives a permit back, waking the first waiter if there is one.
    pub fn up(&self) {
        let _irq = interrupt::disable();
        let mut state = self.state.lock();
        let next = state.waiters.pop_front();
        if next.is_none() {
            state.permits += 1;
        }
        state.unlock();
        if let Some(next) = next {
            next.unpark();
        }
    }

    /// Number of permits currently available.
    pub fn permits(&self) -> usize {
        let state = self.state.lock();
        let permits = state.permits;
        state.unlock();
        permits
    }

    /// Waits until a permit becomes available and then acquires it.
    pub fn wait(&self) -> SemaphorePermits<'_, T> {
        self.down();
        SemaphorePermits { sema: self }
    }

    /// Releases a permit back to the semaphore. Same as [`up`](Self::up).
    pub fn signal(&self) {
        self.up()
    }
}

/// An RAII implementation of a "scoped semaphore". When this structure
/// is dropped (falls out of scope), the semaphore will be signaled.
pub struct SemaphorePermits<'a, T> {
    sema: &'a Semaphore<T>,
}

impl<T> Deref for SemaphorePermits<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.sema.resource
    }
}

impl<T> Drop for SemaphorePermits<'_, T> {
    fn drop(&mut self) {
        self.sema.signal()
    }
}
