//! Page table entries understood by the processor.
use bitflags::bitflags;

bitflags! {
    /// Flags of a [`TranslationEntry`].
    pub struct EntryFlags: u32 {
        /// The entry maps a physical frame.
        const VALID = 1 << 0;
        /// Writes through this entry raise [`ReadOnly`].
        ///
        /// [`ReadOnly`]: crate::processor::ExceptionCause::ReadOnly
        const READ_ONLY = 1 << 1;
        /// Set by the processor whenever the page is accessed.
        const USED = 1 << 2;
        /// Set by the processor whenever the page is written.
        const DIRTY = 1 << 3;
    }
}

/// One virtual-to-physical page mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TranslationEntry {
    /// Virtual page number.
    pub vpn: usize,
    /// Physical page number.
    pub ppn: usize,
    /// Access flags.
    pub flags: EntryFlags,
}

impl TranslationEntry {
    /// An identity-style mapping of `vpn` to `ppn`, valid and writable.
    pub fn new(vpn: usize, ppn: usize) -> Self {
        Self {
            vpn,
            ppn,
            flags: EntryFlags::VALID,
        }
    }

    /// An entry that maps nothing.
    pub fn invalid(vpn: usize) -> Self {
        Self {
            vpn,
            ppn: 0,
            flags: EntryFlags::empty(),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.flags.contains(EntryFlags::VALID)
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(EntryFlags::READ_ONLY)
    }
}
