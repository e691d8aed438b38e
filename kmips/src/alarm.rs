//! Alarm clock.
//!
//! A thread calls [`Alarm::wait_until`] to sleep for at least a number of
//! ticks. Sleepers are kept in a priority queue ordered by wake tick; on each
//! timer interrupt every sleeper whose wake tick has strictly passed is made
//! ready, and then the interrupted thread yields.
//!
//! Because sleepers are only looked at on timer interrupts, a thread wakes up
//! at the first timer interrupt after its wake tick. A non-positive delay
//! still blocks until the next timer interrupt.
use crate::{
    Kernel, interrupt,
    sync::SpinLock,
    thread::{Current, ParkHandle},
};
use core::{
    cmp::Ordering,
    sync::atomic::{self, AtomicU64},
};
use std::{collections::BinaryHeap, sync::Arc};

struct Sleeper {
    wake: u64,
    seq: u64,
    handle: ParkHandle,
}

impl PartialEq for Sleeper {
    fn eq(&self, other: &Self) -> bool {
        (self.wake, self.seq) == (other.wake, other.seq)
    }
}

impl Eq for Sleeper {}

impl PartialOrd for Sleeper {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Earliest wake tick first; equal ticks in insertion order.
impl Ord for Sleeper {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.wake, other.seq).cmp(&(self.wake, self.seq))
    }
}

/// The sleeper queue of a kernel.
pub struct Alarm {
    sleepers: SpinLock<BinaryHeap<Sleeper>>,
    seq: AtomicU64,
}

impl Default for Alarm {
    fn default() -> Self {
        Self::new()
    }
}

impl Alarm {
    pub fn new() -> Self {
        Self {
            sleepers: SpinLock::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Puts the current thread to sleep for at least `delta` ticks.
    ///
    /// The thread becomes ready on the first timer interrupt at which the
    /// current time is strictly greater than `now + delta`.
    pub fn wait_until(&self, delta: i64) {
        let kernel = Current::kernel();
        let _irq = interrupt::disable();
        let now = kernel.machine().interrupt().time();
        let wake = if delta > 0 {
            now.saturating_add(delta as u64)
        } else {
            now
        };
        debug!('t', "thread {} sleeps until {} (now {})", Current::get_tid(), wake, now);
        Current::park_with(|handle| {
            let seq = self.seq.fetch_add(1, atomic::Ordering::Relaxed);
            let mut sleepers = self.sleepers.lock();
            sleepers.push(Sleeper { wake, seq, handle });
            sleepers.unlock();
        });
    }

    /// The timer interrupt handler.
    ///
    /// Readies every due sleeper, then makes the interrupted thread yield.
    /// Runs with interrupts disabled.
    pub fn timer_interrupt(&self, kernel: &Arc<Kernel>) {
        let now = kernel.machine().interrupt().time();
        let mut due = Vec::new();
        let mut sleepers = self.sleepers.lock();
        while sleepers.peek().is_some_and(|s| now > s.wake) {
            if let Some(s) = sleepers.pop() {
                due.push(s);
            }
        }
        sleepers.unlock();

        for sleeper in due {
            debug!('t', "alarm wakes thread {} at {}", sleeper.handle.tid(), now);
            sleeper.handle.unpark();
        }
        Current::yield_now();
    }

    /// Returns true if no thread is sleeping.
    pub fn is_empty(&self) -> bool {
        let sleepers = self.sleepers.lock();
        let empty = sleepers.is_empty();
        sleepers.unlock();
        empty
    }
}
