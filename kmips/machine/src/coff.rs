//! MIPS COFF executables.
//!
//! An executable consists of a 20-byte file header, a 28-byte a.out optional
//! header carrying the entry point, and one 40-byte header per section. All
//! fields are little-endian. Sections are loaded one page at a time with
//! [`CoffSection::load_page`].
use crate::{PAGE_SIZE, fs::OpenFile, memory::PhysicalMemory};
use arrayvec::ArrayString;
use bitflags::bitflags;
use std::{fmt, sync::Arc};

const FILE_HEADER_SIZE: usize = 20;
const OPT_HEADER_SIZE: usize = 28;
const SECTION_HEADER_SIZE: usize = 40;

const COFF_MAGIC: u16 = 0x0162;
const AOUT_MAGIC: u16 = 0x010b;
const EXECUTABLE_FLAGS: u16 = 0x0003;

bitflags! {
    /// Kind of a COFF section.
    pub struct SectionFlags: u32 {
        const TEXT = 0x0020;
        const DATA = 0x0040;
        const BSS = 0x0080;
        const RDATA = 0x0100;
    }
}

/// Reasons a file is not an executable this machine can load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoffError {
    /// The file ends before a header or section it declares.
    Truncated,
    /// The file header magic is not MIPS little-endian COFF.
    BadMagic(u16),
    /// The optional header is missing or is not an a.out header.
    BadOptionalHeader,
    /// The file is an object file, not a linked executable.
    NotExecutable,
    /// A section starts in the middle of a page.
    MisalignedSection(ArrayString<8>),
}

impl fmt::Display for CoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoffError::Truncated => write!(f, "truncated executable"),
            CoffError::BadMagic(m) => write!(f, "bad COFF magic {:#06x}", m),
            CoffError::BadOptionalHeader => write!(f, "missing a.out header"),
            CoffError::NotExecutable => write!(f, "not an executable"),
            CoffError::MisalignedSection(name) => write!(f, "section {} is not page aligned", name),
        }
    }
}

impl std::error::Error for CoffError {}

fn u16_at(image: &[u8], off: usize) -> Result<u16, CoffError> {
    image
        .get(off..off + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or(CoffError::Truncated)
}

fn u32_at(image: &[u8], off: usize) -> Result<u32, CoffError> {
    image
        .get(off..off + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(CoffError::Truncated)
}

/// One loadable section of an executable.
#[derive(Clone)]
pub struct CoffSection {
    name: ArrayString<8>,
    vaddr: u32,
    size: u32,
    file_offset: u32,
    flags: SectionFlags,
    image: Arc<[u8]>,
}

impl CoffSection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First virtual page covered by the section.
    pub fn first_vpn(&self) -> usize {
        self.vaddr as usize / PAGE_SIZE
    }

    /// Number of pages the section covers.
    pub fn length(&self) -> usize {
        (self.size as usize).div_ceil(PAGE_SIZE)
    }

    /// Size of the section in bytes.
    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn flags(&self) -> SectionFlags {
        self.flags
    }

    /// Code and read-only data must not be written by the program.
    pub fn is_read_only(&self) -> bool {
        self.flags.intersects(SectionFlags::TEXT | SectionFlags::RDATA)
    }

    /// Loads page `spn` of this section into physical frame `ppn`.
    ///
    /// Bytes past the end of the section, and every byte of a BSS section,
    /// are zero.
    pub fn load_page(&self, spn: usize, ppn: usize, memory: &PhysicalMemory) -> Option<()> {
        if spn >= self.length() {
            return None;
        }
        let offset = spn * PAGE_SIZE;
        let mut page = [0u8; PAGE_SIZE];
        if !self.flags.contains(SectionFlags::BSS) {
            let len = (self.size as usize - offset).min(PAGE_SIZE);
            let start = self.file_offset as usize + offset;
            page[..len].copy_from_slice(self.image.get(start..start + len)?);
        }
        crate::debug!('m', "loading {}[{}] into frame {}", self.name, spn, ppn);
        memory.write(ppn * PAGE_SIZE, &page)
    }
}

/// A parsed executable.
pub struct Coff {
    entry: u32,
    sections: Vec<CoffSection>,
    file: Option<OpenFile>,
}

impl Coff {
    /// Parses an executable image already in memory.
    pub fn parse(image: Vec<u8>) -> Result<Self, CoffError> {
        let image: Arc<[u8]> = image.into();
        let magic = u16_at(&image, 0)?;
        if magic != COFF_MAGIC {
            return Err(CoffError::BadMagic(magic));
        }
        let num_sections = u16_at(&image, 2)? as usize;
        let opt_size = u16_at(&image, 16)? as usize;
        let flags = u16_at(&image, 18)?;
        if flags & EXECUTABLE_FLAGS != EXECUTABLE_FLAGS {
            return Err(CoffError::NotExecutable);
        }
        if opt_size != OPT_HEADER_SIZE || u16_at(&image, FILE_HEADER_SIZE)? != AOUT_MAGIC {
            return Err(CoffError::BadOptionalHeader);
        }
        let entry = u32_at(&image, FILE_HEADER_SIZE + 16)?;

        let mut sections = Vec::with_capacity(num_sections);
        for i in 0..num_sections {
            let hdr = FILE_HEADER_SIZE + OPT_HEADER_SIZE + i * SECTION_HEADER_SIZE;
            let raw_name = image.get(hdr..hdr + 8).ok_or(CoffError::Truncated)?;
            let mut name = ArrayString::<8>::new();
            for &b in raw_name.iter().take_while(|b| **b != 0) {
                let _ = name.try_push(if b.is_ascii() { b as char } else { '?' });
            }
            let vaddr = u32_at(&image, hdr + 12)?;
            let size = u32_at(&image, hdr + 16)?;
            let file_offset = u32_at(&image, hdr + 20)?;
            let flags = SectionFlags::from_bits_truncate(u32_at(&image, hdr + 36)?);

            if vaddr as usize % PAGE_SIZE != 0 {
                return Err(CoffError::MisalignedSection(name));
            }
            if !flags.contains(SectionFlags::BSS)
                && image.len() < file_offset as usize + size as usize
            {
                return Err(CoffError::Truncated);
            }
            sections.push(CoffSection {
                name,
                vaddr,
                size,
                file_offset,
                flags,
                image: image.clone(),
            });
        }
        Ok(Self {
            entry,
            sections,
            file: None,
        })
    }

    /// Reads and parses an executable from an open file. The file stays
    /// open until [`close`](Self::close).
    pub fn load(mut file: OpenFile) -> Result<Self, CoffError> {
        let mut image = vec![0; file.length()];
        file.seek(0);
        if file.read(&mut image) != image.len() {
            return Err(CoffError::Truncated);
        }
        let mut coff = Self::parse(image)?;
        coff.file = Some(file);
        Ok(coff)
    }

    /// Virtual address of the first instruction.
    pub fn entry_point(&self) -> u32 {
        self.entry
    }

    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }

    pub fn sections(&self) -> &[CoffSection] {
        &self.sections
    }

    /// Closes the underlying file.
    pub fn close(mut self) {
        if let Some(file) = self.file.take() {
            file.close();
        }
    }
}

/// Builds COFF images.
///
/// ```
/// use machine::coff::{Coff, CoffBuilder, SectionFlags};
///
/// let image = CoffBuilder::new(0)
///     .section(".text", 0, SectionFlags::TEXT, &[0; 8])
///     .build();
/// assert_eq!(Coff::parse(image).unwrap().num_sections(), 1);
/// ```
#[derive(Default)]
pub struct CoffBuilder {
    entry: u32,
    sections: Vec<(ArrayString<8>, u32, SectionFlags, Vec<u8>, u32)>,
}

impl CoffBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            sections: Vec::new(),
        }
    }

    /// Appends a section with initialized contents.
    pub fn section(mut self, name: &str, vaddr: u32, flags: SectionFlags, data: &[u8]) -> Self {
        self.sections.push((
            Self::name(name),
            vaddr,
            flags,
            data.to_vec(),
            data.len() as u32,
        ));
        self
    }

    /// Appends a zero-filled section of `size` bytes.
    pub fn bss(mut self, name: &str, vaddr: u32, size: u32) -> Self {
        self.sections
            .push((Self::name(name), vaddr, SectionFlags::BSS, Vec::new(), size));
        self
    }

    fn name(name: &str) -> ArrayString<8> {
        let mut s = ArrayString::new();
        for c in name.chars() {
            if s.try_push(c).is_err() {
                break;
            }
        }
        s
    }

    /// Serializes the executable.
    pub fn build(self) -> Vec<u8> {
        let headers =
            FILE_HEADER_SIZE + OPT_HEADER_SIZE + self.sections.len() * SECTION_HEADER_SIZE;
        let mut out = Vec::with_capacity(headers);
        out.extend(COFF_MAGIC.to_le_bytes());
        out.extend((self.sections.len() as u16).to_le_bytes());
        out.extend([0u8; 12]);
        out.extend((OPT_HEADER_SIZE as u16).to_le_bytes());
        out.extend(EXECUTABLE_FLAGS.to_le_bytes());

        out.extend(AOUT_MAGIC.to_le_bytes());
        out.extend([0u8; 14]);
        out.extend(self.entry.to_le_bytes());
        out.extend([0u8; 8]);

        let mut data_offset = headers;
        for (name, vaddr, flags, data, size) in &self.sections {
            let mut raw_name = [0u8; 8];
            raw_name[..name.len()].copy_from_slice(name.as_bytes());
            out.extend(raw_name);
            out.extend(vaddr.to_le_bytes());
            out.extend(vaddr.to_le_bytes());
            out.extend(size.to_le_bytes());
            out.extend((data_offset as u32).to_le_bytes());
            out.extend([0u8; 12]);
            out.extend(flags.bits().to_le_bytes());
            data_offset += data.len();
        }
        for (_, _, _, data, _) in self.sections {
            out.extend(data);
        }
        out
    }
}
