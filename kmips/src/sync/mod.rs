//! # Synchronization Primitives.
//!
//! Only one kernel thread runs at a time, and it gives the CPU away only when
//! it blocks, yields, finishes or takes a timer interrupt with interrupts
//! enabled. The primitives here are therefore built from two ingredients:
//! masking interrupts around short updates of shared wait lists, and parking
//! the current thread with [`Current::park_with`] when it has to wait.
//!
//! | Primitive             | Blocks Thread? | Fair? | Typical Use Case                               |
//! |-----------------------|----------------|-------|------------------------------------------------|
//! | [`SpinLock`]          | No (busy wait) | No    | Short critical sections that never block        |
//! | [`Mutex`]             | Yes            | FIFO  | Exclusive access to shared data                 |
//! | [`ConditionVariable`] | Yes            | FIFO  | Waiting for a condition to become true          |
//! | [`Semaphore`]         | Yes            | FIFO  | Limiting access to a bounded resource, events   |
//!
//! A [`SpinLock`] must never be held across a blocking call; the scheduler
//! panics if a thread tries to switch away while holding one.
//!
//! [`Current::park_with`]: crate::thread::Current::park_with

pub mod condition_variable;
pub mod mutex;
pub mod semaphore;

pub use condition_variable::ConditionVariable;
pub use machine::spinlock::{SpinLock, SpinLockGuard, WouldBlock};
pub use mutex::{Lock, Mutex, MutexGuard};
pub use semaphore::{Semaphore, SemaphorePermits};
