//! Spinlock shared by the machine and the kernel.
//!
//! Only one simulated thread runs at a time, so the lock is never contended
//! by two kernel threads unless one of them switched away while holding it.
//! That is a kernel bug, and [`held_locks`] lets the scheduler catch it
//! before the switch happens.

use core::{
    cell::{Cell, UnsafeCell},
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};
use crossbeam_utils::Backoff;

thread_local! {
    static HELD: Cell<usize> = const { Cell::new(0) };
}

/// Number of [`SpinLock`]s held by the calling host thread.
pub fn held_locks() -> usize {
    HELD.with(|h| h.get())
}

/// Returned by `try_lock` when the lock is taken.
#[derive(Debug)]
pub struct WouldBlock;

/// A busy-waiting lock around a value of type `T`.
///
/// The value is reachable only through a guard from [`lock`] or
/// [`try_lock`]. Guards are released with [`SpinLockGuard::unlock`]; letting
/// one go out of scope instead is a bug and panics:
///
/// ```
/// use machine::spinlock::SpinLock;
///
/// let lock = SpinLock::new(0);
/// let mut guard = lock.lock();
/// *guard += 1;
/// guard.unlock();
/// ```
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// An unlocked spinlock holding `t`.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }

    /// Unwraps the protected value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Spins until the lock is free, then takes it.
    ///
    /// Taking a lock the calling thread already holds never returns.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        while self.locked.swap(true, Ordering::Acquire) {
            backoff.snooze();
        }
        HELD.with(|h| h.set(h.get() + 1));
        SpinLockGuard {
            caller: core::panic::Location::caller(),
            lock: self,
        }
    }

    /// Takes the lock if it is free.
    ///
    /// # Errors
    /// [`WouldBlock`] if someone holds it.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        if self.locked.swap(true, Ordering::Acquire) {
            Err(WouldBlock)
        } else {
            HELD.with(|h| h.set(h.get() + 1));
            Ok(SpinLockGuard {
                caller: core::panic::Location::caller(),
                lock: self,
            })
        }
    }

    fn release(&self) {
        self.locked.store(false, Ordering::Release);
        HELD.with(|h| h.set(h.get().saturating_sub(1)));
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

/// Proof that a [`SpinLock`] is held. Must be given back with
/// [`unlock`](Self::unlock).
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static core::panic::Location<'static>,
    lock: &'a SpinLock<T>,
}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the lock.
    pub fn unlock(self) {
        self.lock.release();
        core::mem::forget(self);
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // A halted machine unwinds every parked thread; let the lock go.
        self.lock.release();
        if !std::thread::panicking() {
            panic!("SpinLockGuard taken at {} dropped without unlock().", self.caller);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(3);
        let guard = lock.lock();
        assert!(lock.try_lock().is_err());
        assert_eq!(held_locks(), 1);
        guard.unlock();
        let guard = lock.try_lock().unwrap();
        assert_eq!(*guard, 3);
        guard.unlock();
        assert_eq!(held_locks(), 0);
    }
}
