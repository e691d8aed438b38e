//! Task trait for interact with user process.

use machine::Machine;

/// Represents a **task** executed by a thread.
///
/// A task is the per-thread state that lives outside the kernel thread
/// itself, such as the user registers and the address space of a user
/// process. The scheduler calls the hooks on every context switch.
pub trait Task: Send {
    /// Called right before the owning thread gives the CPU away.
    ///
    /// User processes copy the processor registers out here.
    fn save_state(&mut self, _machine: &Machine) {}

    /// Called right after the owning thread gets the CPU back.
    ///
    /// User processes put their registers back and install their page table
    /// here.
    fn restore_state(&mut self, _machine: &Machine) {}
}

impl Task for () {}
