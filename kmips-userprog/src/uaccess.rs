//! Typed access to user memory from system call handlers.
//!
//! System call arguments arrive as raw register values. The types of this
//! module turn them into one-time accessors that check the address and copy
//! through the caller's [`MmStruct`]:
//!
//! - [`UserPtrRO`] / [`UserPtrWO`]: a single little-endian word.
//! - [`UserU8SliceRO`] / [`UserU8SliceWO`]: a byte buffer. Buffer copies may
//!   be partial and report how many bytes were copied.
//! - [`UserCString`]: a NUL-terminated file or argument name.
//!
//! A negative address is never valid user memory and is rejected with
//! [`KernelError::BadAddress`] before anything is copied.
use crate::mm_struct::MmStruct;
use core::marker::PhantomData;
use kmips::KernelError;

/// Longest string, not counting the terminator, accepted from user memory.
pub const MAX_STRING_LENGTH: usize = 255;

fn user_addr(raw: i32) -> Result<u32, KernelError> {
    u32::try_from(raw).map_err(|_| KernelError::BadAddress)
}

mod sealed {
    pub trait Word: Copy {
        fn from_le(bytes: [u8; 4]) -> Self;
        fn to_le(self) -> [u8; 4];
    }

    impl Word for u32 {
        fn from_le(bytes: [u8; 4]) -> Self {
            u32::from_le_bytes(bytes)
        }
        fn to_le(self) -> [u8; 4] {
            self.to_le_bytes()
        }
    }

    impl Word for i32 {
        fn from_le(bytes: [u8; 4]) -> Self {
            i32::from_le_bytes(bytes)
        }
        fn to_le(self) -> [u8; 4] {
            self.to_le_bytes()
        }
    }
}

/// A one-time, read-only pointer to a user word of type `T`.
#[derive(PartialEq, Eq, Debug)]
pub struct UserPtrRO<T: sealed::Word> {
    addr: i32,
    _ty: PhantomData<T>,
}

impl<T: sealed::Word> UserPtrRO<T> {
    pub fn new(addr: i32) -> Self {
        Self {
            addr,
            _ty: PhantomData,
        }
    }

    /// Reads the word.
    ///
    /// Returns `Err(KernelError::BadAddress)` unless all four bytes are
    /// readable.
    pub fn get(self, mm: &MmStruct) -> Result<T, KernelError> {
        let mut bytes = [0u8; 4];
        if mm.read_virtual_memory(user_addr(self.addr)?, &mut bytes) != bytes.len() {
            return Err(KernelError::BadAddress);
        }
        Ok(T::from_le(bytes))
    }
}

/// A one-time, write-only pointer to a user word of type `T`.
#[derive(PartialEq, Eq, Debug)]
pub struct UserPtrWO<T: sealed::Word> {
    addr: i32,
    _ty: PhantomData<T>,
}

impl<T: sealed::Word> UserPtrWO<T> {
    pub fn new(addr: i32) -> Self {
        Self {
            addr,
            _ty: PhantomData,
        }
    }

    /// Fails with [`KernelError::BadAddress`] unless all four bytes of the
    /// word are writable. Nothing is written.
    pub fn check(&self, mm: &MmStruct) -> Result<(), KernelError> {
        let addr = user_addr(self.addr)?;
        if mm.is_writable(addr, 4) {
            Ok(())
        } else {
            Err(KernelError::BadAddress)
        }
    }

    /// Writes `value` to the word.
    ///
    /// Returns `Err(KernelError::BadAddress)` unless all four bytes are
    /// writable. A failed write may have changed a prefix of the word.
    pub fn put(self, mm: &MmStruct, value: T) -> Result<(), KernelError> {
        let bytes = value.to_le();
        if mm.write_virtual_memory(user_addr(self.addr)?, &bytes) != bytes.len() {
            return Err(KernelError::BadAddress);
        }
        Ok(())
    }
}

/// A one-time, read-only view of a user byte buffer.
pub struct UserU8SliceRO {
    addr: i32,
    len: usize,
}

impl UserU8SliceRO {
    pub fn new(addr: i32, len: usize) -> Self {
        Self { addr, len }
    }

    /// Copies the readable prefix of the buffer.
    pub fn get(self, mm: &MmStruct) -> Result<Vec<u8>, KernelError> {
        let mut buf = vec![0u8; self.len];
        let read = mm.read_virtual_memory(user_addr(self.addr)?, &mut buf);
        buf.truncate(read);
        Ok(buf)
    }
}

/// A one-time, write-only view of a user byte buffer.
pub struct UserU8SliceWO {
    addr: i32,
}

impl UserU8SliceWO {
    pub fn new(addr: i32) -> Self {
        Self { addr }
    }

    /// Copies `data` into the buffer and returns how many bytes landed.
    pub fn put(self, mm: &MmStruct, data: &[u8]) -> Result<usize, KernelError> {
        Ok(mm.write_virtual_memory(user_addr(self.addr)?, data))
    }
}

/// A NUL-terminated string in user memory.
pub struct UserCString {
    addr: i32,
}

impl UserCString {
    pub fn new(addr: i32) -> Self {
        Self { addr }
    }

    /// Reads the string.
    ///
    /// # Errors
    /// - [`KernelError::BadAddress`] if the string starts at an invalid
    ///   address or runs into an unmapped page before its terminator.
    /// - [`KernelError::NameTooLong`] if there is no terminator within
    ///   [`MAX_STRING_LENGTH`] bytes.
    pub fn read(self, mm: &MmStruct) -> Result<String, KernelError> {
        let addr = user_addr(self.addr)?;
        mm.read_virtual_memory_string(addr, MAX_STRING_LENGTH)
            .ok_or_else(|| {
                // Tell a missing terminator apart from an unmapped page.
                let mut scan = [0u8; MAX_STRING_LENGTH + 1];
                if mm.read_virtual_memory(addr, &mut scan) == scan.len() {
                    KernelError::NameTooLong
                } else {
                    KernelError::BadAddress
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_table::PageTable;
    use kmips::PAGE_SIZE;
    use machine::{memory::PhysicalMemory, translation::TranslationEntry};
    use std::sync::Arc;

    fn mm() -> MmStruct {
        let pt = PageTable::new(vec![TranslationEntry::new(0, 0), TranslationEntry::invalid(1)]);
        MmStruct::new(pt, Arc::new(PhysicalMemory::new(2)))
    }

    #[test]
    fn words_round_trip_little_endian() {
        let mm = mm();
        UserPtrWO::<i32>::new(8).put(&mm, -2).unwrap();
        assert_eq!(UserPtrRO::<u32>::new(8).get(&mm), Ok(0xffff_fffe));
        let mut raw = [0u8; 4];
        mm.read_virtual_memory(8, &mut raw);
        assert_eq!(raw, [0xfe, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn bad_pointers_are_rejected() {
        let mm = mm();
        assert_eq!(UserPtrRO::<u32>::new(-4).get(&mm), Err(KernelError::BadAddress));
        let straddle = PAGE_SIZE as i32 - 2;
        assert_eq!(UserPtrWO::<u32>::new(straddle).put(&mm, 1), Err(KernelError::BadAddress));
        assert_eq!(UserU8SliceWO::new(straddle).put(&mm, &[1; 8]), Ok(2));
        assert_eq!(UserU8SliceRO::new(straddle, 8).get(&mm).map(|v| v.len()), Ok(2));
    }

    #[test]
    fn checking_a_word_writes_nothing() {
        let mm = mm();
        mm.write_virtual_memory(PAGE_SIZE as u32 - 4, &[7; 4]);
        assert_eq!(UserPtrWO::<i32>::new(PAGE_SIZE as i32 - 4).check(&mm), Ok(()));
        assert_eq!(UserPtrRO::<u32>::new(PAGE_SIZE as i32 - 4).get(&mm), Ok(0x0707_0707));
        let straddle = PAGE_SIZE as i32 - 2;
        assert_eq!(UserPtrWO::<i32>::new(straddle).check(&mm), Err(KernelError::BadAddress));
        assert_eq!(UserPtrWO::<i32>::new(-8).check(&mm), Err(KernelError::BadAddress));
    }

    #[test]
    fn strings() {
        let mm = mm();
        mm.write_virtual_memory(0, b"a.coff\0");
        assert_eq!(UserCString::new(0).read(&mm).as_deref(), Ok("a.coff"));

        let long = vec![b'x'; MAX_STRING_LENGTH + 1];
        mm.write_virtual_memory(16, &long);
        assert_eq!(UserCString::new(16).read(&mm), Err(KernelError::NameTooLong));

        let tail = PAGE_SIZE as i32 - 3;
        mm.write_virtual_memory(tail as u32, b"abc");
        assert_eq!(UserCString::new(tail).read(&mm), Err(KernelError::BadAddress));

        mm.write_virtual_memory(tail as u32, b"ab\0");
        assert_eq!(UserCString::new(tail).read(&mm).as_deref(), Ok("ab"));
    }
}
