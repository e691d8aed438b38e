//! Main memory of the simulated machine.
use crate::{spinlock::SpinLock, PAGE_SIZE};

/// Physical memory, `num_pages` frames of [`PAGE_SIZE`] bytes each.
pub struct PhysicalMemory {
    num_pages: usize,
    bytes: SpinLock<Box<[u8]>>,
}

impl PhysicalMemory {
    /// Creates zero-filled memory of `num_pages` frames.
    pub fn new(num_pages: usize) -> Self {
        Self {
            num_pages,
            bytes: SpinLock::new(vec![0; num_pages * PAGE_SIZE].into_boxed_slice()),
        }
    }

    /// Number of physical frames.
    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Size of memory in bytes.
    pub fn size(&self) -> usize {
        self.num_pages * PAGE_SIZE
    }

    /// Copies `buf.len()` bytes starting at physical address `paddr` into
    /// `buf`. Returns `None` if the range is outside of memory.
    pub fn read(&self, paddr: usize, buf: &mut [u8]) -> Option<()> {
        let end = paddr.checked_add(buf.len())?;
        let bytes = self.bytes.lock();
        let result = bytes.get(paddr..end).map(|src| buf.copy_from_slice(src));
        bytes.unlock();
        result
    }

    /// Copies `buf` to physical address `paddr`. Returns `None` if the range
    /// is outside of memory.
    pub fn write(&self, paddr: usize, buf: &[u8]) -> Option<()> {
        let end = paddr.checked_add(buf.len())?;
        let mut bytes = self.bytes.lock();
        let result = bytes.get_mut(paddr..end).map(|dst| dst.copy_from_slice(buf));
        bytes.unlock();
        result
    }

    /// Zero-fills the frame `ppn`.
    pub fn zero_page(&self, ppn: usize) -> Option<()> {
        self.write(ppn * PAGE_SIZE, &[0; PAGE_SIZE])
    }
}
