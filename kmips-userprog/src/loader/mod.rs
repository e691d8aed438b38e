//! # Program loader
//!
//! [`LoadContext::load`] turns a COFF executable in the stub file system into
//! a ready-to-run address space:
//!
//! ```text
//!  vpn 0                                                numPages-1
//!  +-----------------------+---------------------------+---------+
//!  | sections (contiguous) | stack (STACK_PAGES pages) |  argv   |
//!  +-----------------------+---------------------------+---------+
//!                                                      ^ SP
//! ```
//!
//! Sections must start at VPN 0 and follow each other without holes, since
//! the page table is a plain array indexed by VPN. Read-only sections
//! (text and read-only data) get read-only entries. The stack grows down from
//! the start of the argument page, and the argument page holds the argv
//! vector built by [`ArgvBuilder`].
//!
//! Every failure leaves the system as it was: frames taken so far go back
//! to the allocator and the executable is closed.
pub mod argv;

use crate::{frame::FrameAllocator, mm_struct::MmStruct, page_table::PageTable};
use argv::ArgvBuilder;
use kmips::{KernelError, Machine, PAGE_SIZE};
use machine::{
    coff::Coff,
    processor::{A0, A1, NEXT_PC, NUM_TOTAL_REGS, PC, SP},
    translation::{EntryFlags, TranslationEntry},
};

/// Number of stack pages of every process.
pub const STACK_PAGES: usize = 8;

/// A loaded program that has not started running yet.
pub struct LoadedImage {
    pub mm: MmStruct,
    pub coff: Coff,
    /// Initial register file.
    pub registers: [i32; NUM_TOTAL_REGS],
}

/// Everything the loader needs from the kernel.
pub struct LoadContext<'a> {
    machine: &'a Machine,
    frames: &'a FrameAllocator,
}

impl<'a> LoadContext<'a> {
    pub fn new(machine: &'a Machine, frames: &'a FrameAllocator) -> Self {
        Self { machine, frames }
    }

    /// Loads the executable `name` with arguments `args`.
    ///
    /// # Errors
    /// - [`KernelError::NoSuchEntry`]: the file does not exist.
    /// - [`KernelError::NoExec`]: the file is not a loadable executable.
    /// - [`KernelError::InvalidArgument`]: the arguments do not fit in a page.
    /// - [`KernelError::NoMemory`]: not enough free frames.
    pub fn load(&self, name: &str, args: &[String]) -> Result<LoadedImage, KernelError> {
        let file = self
            .machine
            .file_system()
            .open(name, false)
            .ok_or(KernelError::NoSuchEntry)?;
        let coff = Coff::load(file).map_err(|e| {
            debug!('a', "{}: {}", name, e);
            KernelError::NoExec
        })?;
        match self.map(&coff, args) {
            Ok((mm, registers)) => {
                debug!('a', "loaded {} into {} pages", name, mm.num_pages());
                Ok(LoadedImage {
                    mm,
                    coff,
                    registers,
                })
            }
            Err(e) => {
                debug!('a', "loading {} failed: {:?}", name, e);
                coff.close();
                Err(e)
            }
        }
    }

    fn map(
        &self,
        coff: &Coff,
        args: &[String],
    ) -> Result<(MmStruct, [i32; NUM_TOTAL_REGS]), KernelError> {
        let code_pages = contiguous_pages(coff)?;
        if argv::footprint(args) > PAGE_SIZE {
            return Err(KernelError::InvalidArgument);
        }
        let num_pages = code_pages + STACK_PAGES + 1;
        let frames = self.frames.allocate(num_pages)?;

        let mut entries: Vec<TranslationEntry> = frames
            .iter()
            .enumerate()
            .map(|(vpn, ppn)| TranslationEntry::new(vpn, *ppn))
            .collect();
        for section in coff.sections().iter().filter(|s| s.is_read_only()) {
            let vpns = section.first_vpn()..section.first_vpn() + section.length();
            for entry in &mut entries[vpns] {
                entry.flags |= EntryFlags::READ_ONLY;
            }
        }
        let mm = MmStruct::new(PageTable::new(entries), self.machine.memory().clone());

        match self.populate(coff, &mm, &frames, code_pages, args) {
            Ok(argv) => {
                let entry = coff.entry_point();
                let mut regs = [0; NUM_TOTAL_REGS];
                regs[PC] = entry as i32;
                regs[NEXT_PC] = entry.wrapping_add(4) as i32;
                regs[SP] = (num_pages * PAGE_SIZE) as i32;
                regs[A0] = args.len() as i32;
                regs[A1] = argv as i32;
                Ok((mm, regs))
            }
            Err(e) => {
                mm.release(self.frames);
                Err(e)
            }
        }
    }

    // Fills the frames and returns the address of the argv vector.
    fn populate(
        &self,
        coff: &Coff,
        mm: &MmStruct,
        frames: &[usize],
        code_pages: usize,
        args: &[String],
    ) -> Result<u32, KernelError> {
        let memory = self.machine.memory();
        for section in coff.sections() {
            for spn in 0..section.length() {
                let ppn = frames[section.first_vpn() + spn];
                section.load_page(spn, ppn, memory).ok_or(KernelError::NoExec)?;
            }
        }
        for ppn in &frames[code_pages..] {
            memory.zero_page(*ppn).ok_or(KernelError::NoMemory)?;
        }

        let argv_page = ((frames.len() - 1) * PAGE_SIZE) as u32;
        let mut builder = ArgvBuilder::new(mm, argv_page, args.len());
        for arg in args {
            builder.push(arg)?;
        }
        Ok(builder.finish())
    }
}

/// Number of pages the sections cover, if they are laid out back to back
/// from VPN 0.
fn contiguous_pages(coff: &Coff) -> Result<usize, KernelError> {
    coff.sections().iter().try_fold(0, |next_vpn, section| {
        if section.first_vpn() == next_vpn {
            Ok(next_vpn + section.length())
        } else {
            debug!('a', "fragmented executable: {} at vpn {}", section.name(), section.first_vpn());
            Err(KernelError::NoExec)
        }
    })
}
