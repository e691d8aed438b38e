//! [`ArgvBuilder`], a utility for laying out program arguments in the
//! argument page.
//!
//! The page starts with one 4-byte little-endian pointer per argument,
//! followed by the NUL-terminated argument strings in the same order.
//! A0 receives the argument count and A1 the address of the pointer vector.
use crate::mm_struct::MmStruct;
use kmips::{KernelError, PAGE_SIZE};

/// Bytes `args` take in the argument page.
pub fn footprint(args: &[String]) -> usize {
    args.iter().map(|a| 4 + a.len() + 1).sum()
}

/// Writes the pointer vector and strings of a process's arguments.
pub struct ArgvBuilder<'a> {
    mm: &'a MmStruct,
    base: u32,
    next_ptr: u32,
    next_str: u32,
}

impl<'a> ArgvBuilder<'a> {
    /// Prepares to write `argc` arguments at virtual address `base`.
    pub fn new(mm: &'a MmStruct, base: u32, argc: usize) -> Self {
        Self {
            mm,
            base,
            next_ptr: base,
            next_str: base + 4 * argc as u32,
        }
    }

    /// Appends one argument.
    pub fn push(&mut self, arg: &str) -> Result<(), KernelError> {
        let end = self.next_str as usize + arg.len() + 1;
        if end > self.base as usize + PAGE_SIZE {
            return Err(KernelError::InvalidArgument);
        }
        let mut bytes = Vec::with_capacity(arg.len() + 1);
        bytes.extend_from_slice(arg.as_bytes());
        bytes.push(0);

        let ptr = self.next_str.to_le_bytes();
        if self.mm.write_virtual_memory(self.next_ptr, &ptr) != ptr.len()
            || self.mm.write_virtual_memory(self.next_str, &bytes) != bytes.len()
        {
            return Err(KernelError::BadAddress);
        }
        self.next_ptr += 4;
        self.next_str += bytes.len() as u32;
        Ok(())
    }

    /// Address of the pointer vector.
    pub fn finish(self) -> u32 {
        self.base
    }
}
