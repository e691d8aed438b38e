//! Per-process page table.
//!
//! A process's address space is a linear array of [`TranslationEntry`]s
//! indexed by virtual page number. The same table is installed in the
//! processor while the process runs, so the kernel and the processor agree on
//! the USED and DIRTY bits.
use kmips::PAGE_SIZE;
use machine::{
    processor::SharedPageTable,
    spinlock::SpinLock,
    translation::{EntryFlags, TranslationEntry},
};
use std::sync::Arc;

/// A linear page table.
pub struct PageTable {
    entries: SharedPageTable,
}

impl PageTable {
    /// Wraps `entries`. Entry `i` must describe virtual page `i`.
    pub fn new(entries: Vec<TranslationEntry>) -> Self {
        debug_assert!(entries.iter().enumerate().all(|(i, e)| e.vpn == i));
        Self {
            entries: Arc::new(SpinLock::new(entries)),
        }
    }

    /// The table in the form the processor consumes.
    pub fn shared(&self) -> SharedPageTable {
        self.entries.clone()
    }

    /// Number of virtual pages.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock();
        let len = entries.len();
        entries.unlock();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the entry of virtual page `vpn`.
    pub fn entry(&self, vpn: usize) -> Option<TranslationEntry> {
        let entries = self.entries.lock();
        let entry = entries.get(vpn).copied();
        entries.unlock();
        entry
    }

    /// Translates `vaddr` to a physical address for a kernel-side copy.
    ///
    /// Fails if the page is out of range or not valid, or if `write` is set
    /// and the page is read-only. On success the entry is marked used, and
    /// dirty for writes.
    pub fn translate(&self, vaddr: u32, write: bool) -> Option<usize> {
        let (vpn, offset) = (vaddr as usize / PAGE_SIZE, vaddr as usize % PAGE_SIZE);
        let mut entries = self.entries.lock();
        let paddr = match entries.get_mut(vpn) {
            Some(e) if e.is_valid() && !(write && e.is_read_only()) => {
                e.flags |= EntryFlags::USED;
                if write {
                    e.flags |= EntryFlags::DIRTY;
                }
                Some(e.ppn * PAGE_SIZE + offset)
            }
            _ => None,
        };
        entries.unlock();
        paddr
    }

    /// Invalidates every entry and returns the frames they mapped.
    pub fn take_frames(&self) -> Vec<usize> {
        let mut entries = self.entries.lock();
        let frames = entries
            .iter_mut()
            .filter(|e| e.is_valid())
            .map(|e| {
                let ppn = e.ppn;
                *e = TranslationEntry::invalid(e.vpn);
                ppn
            })
            .collect();
        entries.unlock();
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PageTable {
        let mut ro = TranslationEntry::new(1, 7);
        ro.flags |= EntryFlags::READ_ONLY;
        PageTable::new(vec![TranslationEntry::new(0, 3), ro, TranslationEntry::invalid(2)])
    }

    #[test]
    fn translation_respects_flags() {
        let pt = table();
        assert_eq!(pt.translate(0x10, true), Some(3 * PAGE_SIZE + 0x10));
        assert_eq!(pt.translate(PAGE_SIZE as u32 + 4, false), Some(7 * PAGE_SIZE + 4));
        assert_eq!(pt.translate(PAGE_SIZE as u32, true), None);
        assert_eq!(pt.translate(2 * PAGE_SIZE as u32, false), None);
        assert_eq!(pt.translate(3 * PAGE_SIZE as u32, false), None);
    }

    #[test]
    fn writes_set_dirty() {
        let pt = table();
        pt.translate(0, false);
        let e = pt.entry(0).unwrap();
        assert!(e.flags.contains(EntryFlags::USED));
        assert!(!e.flags.contains(EntryFlags::DIRTY));
        pt.translate(0, true);
        assert!(pt.entry(0).unwrap().flags.contains(EntryFlags::DIRTY));
    }

    #[test]
    fn take_frames_invalidates() {
        let pt = table();
        assert_eq!(pt.take_frames(), vec![3, 7]);
        assert!(pt.take_frames().is_empty());
        assert!(!pt.entry(1).unwrap().is_valid());
    }
}
