//! Interrupt management of the running kernel.
//!
//! The kernel makes a sequence of operations atomic by masking the timer
//! interrupt around it:
//!
//! ```no_run
//! let guard = kmips::interrupt::disable();
//! // ... touch the ready queue, a wait list, the alarm ...
//! drop(guard);
//! ```
//!
//! Guards nest; each one restores exactly the state it found.
use crate::thread::Current;
pub use machine::interrupt::{InterruptGuard, InterruptState};

/// Disables interrupts of the current kernel until the returned guard is
/// dropped.
pub fn disable() -> InterruptGuard {
    InterruptGuard::new(Current::kernel().machine().interrupt())
}

/// Reads the interrupt state of the current kernel.
pub fn state() -> InterruptState {
    Current::kernel().machine().interrupt().state()
}
