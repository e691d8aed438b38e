//! # System call ABI
//!
//! A user program requests a kernel service with the `syscall` instruction.
//! The system call number travels in V0 and up to four arguments in A0-A3.
//! The result goes back in V0: a non-negative value on success, and `-1` for
//! every failure. The kind of failure is never visible to the program; it is
//! only logged.
use kmips::KernelError;
use machine::processor::{A0, A1, A2, A3, Processor, V0};

/// The arguments of a system call, as read from the processor registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallAbi {
    /// The system call number that identifies the requested system service.
    pub sysno: i32,
    /// First argument (A0).
    pub arg1: i32,
    /// Second argument (A1).
    pub arg2: i32,
    /// Third argument (A2).
    pub arg3: i32,
    /// Fourth argument (A3).
    pub arg4: i32,
}

impl SyscallAbi {
    /// Reads the system call number and arguments from `processor`.
    pub fn from_processor(processor: &Processor) -> Self {
        Self {
            sysno: processor.read_register(V0),
            arg1: processor.read_register(A0),
            arg2: processor.read_register(A1),
            arg3: processor.read_register(A2),
            arg4: processor.read_register(A3),
        }
    }

    /// Stores the result of the system call in V0.
    ///
    /// `Ok(value)` stores `value`, `Err(_)` stores `-1`.
    pub fn set_return_value(&self, processor: &Processor, return_val: Result<usize, KernelError>) {
        let v0 = match return_val {
            Ok(value) => i32::try_from(value).unwrap_or(i32::MAX),
            Err(e) => {
                debug!('a', "syscall {} failed: {:?} (errno {})", self.sysno, e, e.errno());
                -1
            }
        };
        processor.write_register(V0, v0);
    }
}
