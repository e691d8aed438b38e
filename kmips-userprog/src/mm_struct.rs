//! # Memory state of a process
//!
//! The memory state of a process is its page table plus the physical memory
//! the table points into. System calls never dereference user pointers
//! directly: every access goes through [`MmStruct::read_virtual_memory`] or
//! [`MmStruct::write_virtual_memory`], which translate one page at a time
//! through the page table.
//!
//! **The kernel must never crash due to user input.** A copy stops at the
//! first page that does not translate and reports how many bytes were
//! actually copied. It is up to the caller to decide whether a short copy is
//! an error.
use crate::{frame::FrameAllocator, page_table::PageTable};
use kmips::PAGE_SIZE;
use machine::memory::PhysicalMemory;
use std::sync::Arc;

/// The [`MmStruct`] represents the memory state of a process.
pub struct MmStruct {
    page_table: PageTable,
    memory: Arc<PhysicalMemory>,
}

impl MmStruct {
    pub fn new(page_table: PageTable, memory: Arc<PhysicalMemory>) -> Self {
        Self { page_table, memory }
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    /// Number of virtual pages of the address space.
    pub fn num_pages(&self) -> usize {
        self.page_table.len()
    }

    /// Copies one page-bounded chunk at a time, stopping at the first chunk
    /// `copy` fails on. Returns the number of bytes copied.
    fn copy_paged(
        &self,
        vaddr: u32,
        len: usize,
        write: bool,
        mut copy: impl FnMut(usize, core::ops::Range<usize>) -> Option<()>,
    ) -> usize {
        let mut done = 0;
        while done < len {
            let Some(va) = u32::try_from(done).ok().and_then(|d| vaddr.checked_add(d)) else {
                break;
            };
            let n = (PAGE_SIZE - va as usize % PAGE_SIZE).min(len - done);
            let Some(paddr) = self.page_table.translate(va, write) else {
                break;
            };
            if copy(paddr, done..done + n).is_none() {
                break;
            }
            done += n;
        }
        done
    }

    /// Copies from the user address `vaddr` into `buf`.
    ///
    /// Returns the number of bytes copied, which is short if part of the
    /// range is not mapped.
    pub fn read_virtual_memory(&self, vaddr: u32, buf: &mut [u8]) -> usize {
        let len = buf.len();
        self.copy_paged(vaddr, len, false, |paddr, range| {
            self.memory.read(paddr, &mut buf[range])
        })
    }

    /// Copies `buf` to the user address `vaddr`.
    ///
    /// Returns the number of bytes copied, which is short if part of the
    /// range is not mapped or is read-only.
    pub fn write_virtual_memory(&self, vaddr: u32, buf: &[u8]) -> usize {
        self.copy_paged(vaddr, buf.len(), true, |paddr, range| {
            self.memory.write(paddr, &buf[range])
        })
    }

    /// Returns true if every byte of `vaddr..vaddr + len` is mapped writable.
    pub fn is_writable(&self, vaddr: u32, len: usize) -> bool {
        let Some(last) = len
            .checked_sub(1)
            .and_then(|n| vaddr.checked_add(u32::try_from(n).ok()?))
        else {
            return len == 0;
        };
        let page = PAGE_SIZE as u32;
        (vaddr / page..=last / page).all(|vpn| self.page_table.translate(vpn * page, true).is_some())
    }

    /// Reads a NUL-terminated string of at most `max_len` bytes at `vaddr`.
    ///
    /// Returns `None` if no terminator is found within `max_len + 1` readable
    /// bytes. Invalid UTF-8 is replaced, not rejected.
    pub fn read_virtual_memory_string(&self, vaddr: u32, max_len: usize) -> Option<String> {
        let mut buf = vec![0u8; max_len + 1];
        let read = self.read_virtual_memory(vaddr, &mut buf);
        let end = buf[..read].iter().position(|b| *b == 0)?;
        Some(String::from_utf8_lossy(&buf[..end]).into_owned())
    }

    /// Gives every mapped frame back to `frames`.
    ///
    /// The address space is empty afterwards.
    pub fn release(&self, frames: &FrameAllocator) {
        let released = self.page_table.take_frames();
        debug!('a', "releasing {} frames", released.len());
        for ppn in released {
            frames.release(ppn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use machine::translation::{EntryFlags, TranslationEntry};

    // Pages 0 and 1 map frames 2 and 0, page 2 is read-only on frame 1.
    fn mm() -> MmStruct {
        let mut ro = TranslationEntry::new(2, 1);
        ro.flags |= EntryFlags::READ_ONLY;
        let pt = PageTable::new(vec![TranslationEntry::new(0, 2), TranslationEntry::new(1, 0), ro]);
        MmStruct::new(pt, Arc::new(PhysicalMemory::new(4)))
    }

    #[test]
    fn copies_cross_page_boundaries() {
        let mm = mm();
        let data: Vec<u8> = (0..64).collect();
        let va = PAGE_SIZE as u32 - 32;
        assert_eq!(mm.write_virtual_memory(va, &data), 64);
        let mut back = [0u8; 64];
        assert_eq!(mm.read_virtual_memory(va, &mut back), 64);
        assert_eq!(&back[..], &data[..]);
    }

    #[test]
    fn copies_stop_at_bad_pages() {
        let mm = mm();
        let va = 2 * PAGE_SIZE as u32 - 8;
        assert_eq!(mm.write_virtual_memory(va, &[1; 16]), 8);
        let mut buf = [0u8; 16];
        let end = 3 * PAGE_SIZE as u32 - 4;
        assert_eq!(mm.read_virtual_memory(end, &mut buf), 4);
        assert_eq!(mm.read_virtual_memory(u32::MAX - 2, &mut buf), 0);
    }

    #[test]
    fn strings_need_a_terminator() {
        let mm = mm();
        mm.write_virtual_memory(100, b"hello\0");
        assert_eq!(mm.read_virtual_memory_string(100, 5).as_deref(), Some("hello"));
        assert_eq!(mm.read_virtual_memory_string(100, 4), None);
    }

    #[test]
    fn writability_covers_the_whole_range() {
        let mm = mm();
        assert!(mm.is_writable(PAGE_SIZE as u32 - 2, 4));
        assert!(!mm.is_writable(2 * PAGE_SIZE as u32 - 2, 4));
        assert!(!mm.is_writable(3 * PAGE_SIZE as u32, 4));
        assert!(!mm.is_writable(u32::MAX - 1, 4));
        assert!(mm.is_writable(u32::MAX, 0));
    }

    #[test]
    fn release_returns_frames() {
        let mm = mm();
        let frames = FrameAllocator::new(4);
        let taken = frames.allocate(3).unwrap();
        assert_eq!(taken, vec![0, 1, 2]);
        mm.release(&frames);
        assert_eq!(frames.free_count(), 4);
        assert_eq!(mm.read_virtual_memory(0, &mut [0u8; 1]), 0);
    }
}
