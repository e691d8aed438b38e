//! # Mutex.
//!
//! A blocking lock with a FIFO wait queue. Unlike the spin lock, a thread
//! that finds the mutex held is parked until the holder releases it.
//!
//! Release hands the mutex over: the first waiter becomes the holder before
//! it even runs again, so a thread that calls [`Mutex::lock`] later cannot
//! overtake it. Waiters are thus granted the mutex in the order they asked
//! for it.

use crate::{
    interrupt,
    sync::{SpinLock, WouldBlock},
    thread::{Current, ParkHandle},
};
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU64, Ordering},
};
use std::collections::VecDeque;

/// A mutual exclusion primitive useful for protecting shared data
///
/// The data can only be accessed through the guards returned from [`lock`]
/// and [`try_lock`]. The guard must be released with
/// [`MutexGuard::unlock`].
///
/// ```no_run
/// use kmips::{sync::Mutex, thread::ThreadBuilder};
/// use std::sync::Arc;
///
/// let data = Arc::new(Mutex::new(0));
/// for _ in 0..10 {
///     let data = data.clone();
///     ThreadBuilder::new("work").spawn(move || {
///         let mut data = data.lock();
///         *data += 1;
///         data.unlock();
///     });
/// }
/// ```
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
pub struct Mutex<T> {
    id: u64,
    holder: SpinLock<Option<u64>>,
    waiters: SpinLock<VecDeque<ParkHandle>>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

/// A mutex without data, used purely for mutual exclusion.
pub type Lock = Mutex<()>;

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    pub fn new(t: T) -> Mutex<T> {
        static ID: AtomicU64 = AtomicU64::new(1);
        Mutex {
            id: ID.fetch_add(1, Ordering::Relaxed),
            holder: SpinLock::new(None),
            waiters: SpinLock::new(VecDeque::new()),
            data: UnsafeCell::new(t),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Acquires the mutex, blocking the current thread until it is able to do
    /// so.
    ///
    /// # Panics
    /// Panics if the current thread already holds the mutex.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let tid = Current::get_tid();
        let _guard = interrupt::disable();
        let mut holder = self.holder.lock();
        let current = *holder;
        if current.is_none() {
            *holder = Some(tid);
        }
        holder.unlock();

        match current {
            None => {}
            Some(h) if h == tid => panic!("Mutex is acquired twice by thread {}.", tid),
            Some(_) => {
                Current::park_with(|handle| {
                    let mut waiters = self.waiters.lock();
                    waiters.push_back(handle);
                    waiters.unlock();
                });
                debug_assert!(self.is_held_by_current_thread());
            }
        }
        MutexGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// # Errors
    /// Returns [`WouldBlock`] if the mutex is held.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, WouldBlock> {
        let tid = Current::get_tid();
        let _guard = interrupt::disable();
        let mut holder = self.holder.lock();
        let acquired = holder.is_none();
        if acquired {
            *holder = Some(tid);
        }
        holder.unlock();
        if acquired {
            Ok(MutexGuard {
                lock: self,
                _not_send: PhantomData,
            })
        } else {
            Err(WouldBlock)
        }
    }

    /// Returns true if the current thread holds this mutex.
    pub fn is_held_by_current_thread(&self) -> bool {
        let tid = Current::get_tid();
        let holder = self.holder.lock();
        let held = *holder == Some(tid);
        holder.unlock();
        held
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    fn release(&self) {
        let tid = Current::get_tid();
        let _guard = interrupt::disable();
        let mut holder = self.holder.lock();
        let owner = *holder;
        let next = if owner == Some(tid) {
            let mut waiters = self.waiters.lock();
            let next = waiters.pop_front();
            waiters.unlock();
            *holder = next.as_ref().map(ParkHandle::tid);
            next
        } else {
            None
        };
        holder.unlock();

        assert_eq!(
            owner,
            Some(tid),
            "Thread {} releases a mutex it does not hold.",
            tid
        );
        if let Some(next) = next {
            next.unpark();
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

/// An implementation of a "scoped lock" of a mutex.
///
/// The lock must be explicitly unlocked by [`unlock`]. Dropping the guard
/// without unlocking panics, unless the thread is already unwinding, in which
/// case the mutex is released.
///
/// [`unlock`]: MutexGuard::unlock
pub struct MutexGuard<'a, T: 'a> {
    lock: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<'a, T> MutexGuard<'a, T> {
    /// Releases the underlying [`Mutex`].
    ///
    /// If threads are waiting, the first one becomes the new holder.
    pub fn unlock(self) {
        self.lock.release();
        core::mem::forget(self);
    }

    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.lock
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.lock.release();
        } else {
            panic!("`.unlock()` must be explicitly called for MutexGuard.");
        }
    }
}
