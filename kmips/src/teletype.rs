//! A teletype (TTY) interface for character-based I/O.
//!
//! The raw [`Console`](machine::console::Console) of the machine is a pair
//! of byte queues. [`SynchConsole`] puts a kernel lock in front of each
//! direction so that concurrent readers (or writers) take turns, and a
//! multi-byte write is never interleaved with another thread's output.

use crate::{KernelError, sync::Lock, thread::Current};

/// The `Teletype` trait represents a generic character-based input/output
/// device.
pub trait Teletype {
    /// Writes data to the teletype.
    ///
    /// # Returns
    /// - `Ok(usize)`: The number of bytes successfully written.
    /// - `Err(KernelError)`: If the write operation failed.
    fn write(&self, data: &[u8]) -> Result<usize, KernelError>;

    /// Reads data from the teletype.
    ///
    /// # Returns
    /// - `Ok(usize)`: The number of bytes successfully read. Zero means the
    ///   input is exhausted.
    /// - `Err(KernelError)`: If the read operation failed.
    fn read(&self, data: &mut [u8]) -> Result<usize, KernelError>;
}

/// The console shared by every thread of a kernel.
pub struct SynchConsole {
    read_lock: Lock,
    write_lock: Lock,
}

impl Default for SynchConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl SynchConsole {
    pub fn new() -> Self {
        Self {
            read_lock: Lock::new(()),
            write_lock: Lock::new(()),
        }
    }
}

impl Teletype for SynchConsole {
    fn write(&self, data: &[u8]) -> Result<usize, KernelError> {
        let kernel = Current::kernel();
        let guard = self.write_lock.lock();
        for b in data {
            kernel.machine().console().write_byte(*b);
        }
        guard.unlock();
        Ok(data.len())
    }

    fn read(&self, data: &mut [u8]) -> Result<usize, KernelError> {
        let kernel = Current::kernel();
        let guard = self.read_lock.lock();
        let mut read = 0;
        for slot in data.iter_mut() {
            match kernel.machine().console().read_byte() {
                Some(b) => {
                    *slot = b;
                    read += 1;
                }
                None => break,
            }
        }
        guard.unlock();
        Ok(read)
    }
}
