//! Packs assembled test programs into executables.
use crate::asm::Assembler;
use machine::{
    PAGE_SIZE,
    coff::{CoffBuilder, SectionFlags},
    fs::StubFileSystem,
};
use std::collections::BTreeMap;

enum Datum {
    Bytes(Vec<u8>),
    Word(u32),
    Pointers(Vec<String>),
}

/// A user program under construction.
///
/// The text starts at address 0 and is the entry point. Initialized data
/// follows on the next page, and buffers declared with
/// [`buffer`](Self::buffer) after that, so the image is contiguous.
///
/// ```
/// use grading::{asm::reg::*, program::ProgramBuilder};
///
/// let mut p = ProgramBuilder::new();
/// p.string("name", "out.txt");
/// p.text().la(A0, "name").li(V0, 4).syscall();
/// let image = p.build();
/// assert!(!image.is_empty());
/// ```
#[derive(Default)]
pub struct ProgramBuilder {
    text: Assembler,
    data: Vec<(String, Datum)>,
    buffers: Vec<(String, u32)>,
}

struct Layout {
    symbols: BTreeMap<String, u32>,
    data_base: u32,
    data_size: u32,
    bss_base: u32,
    bss_size: u32,
}

fn align4(n: u32) -> u32 {
    n.next_multiple_of(4)
}

fn page_round(n: u32) -> u32 {
    n.next_multiple_of(PAGE_SIZE as u32)
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The text of the program.
    pub fn text(&mut self) -> &mut Assembler {
        &mut self.text
    }

    /// A NUL-terminated string.
    pub fn string(&mut self, label: &str, s: &str) -> &mut Self {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.bytes(label, &bytes)
    }

    pub fn bytes(&mut self, label: &str, bytes: &[u8]) -> &mut Self {
        self.data.push((label.into(), Datum::Bytes(bytes.to_vec())));
        self
    }

    pub fn word(&mut self, label: &str, value: u32) -> &mut Self {
        self.data.push((label.into(), Datum::Word(value)));
        self
    }

    /// An array of the addresses of `labels`, such as an `argv`.
    pub fn pointers(&mut self, label: &str, labels: &[&str]) -> &mut Self {
        self.data.push((
            label.into(),
            Datum::Pointers(labels.iter().map(|l| l.to_string()).collect()),
        ));
        self
    }

    /// A zero-filled buffer of `size` bytes.
    pub fn buffer(&mut self, label: &str, size: u32) -> &mut Self {
        self.buffers.push((label.into(), size));
        self
    }

    fn layout(&self) -> Layout {
        let size = |d: &Datum| match d {
            Datum::Bytes(b) => b.len() as u32,
            Datum::Word(_) => 4,
            Datum::Pointers(p) => 4 * p.len() as u32,
        };

        let mut symbols = BTreeMap::new();
        let data_base = page_round(self.text.here().max(4));
        let mut at = data_base;
        for (label, datum) in &self.data {
            symbols.insert(label.clone(), at);
            at = align4(at + size(datum));
        }
        let data_size = at - data_base;
        let bss_base = page_round(at);
        let mut at = bss_base;
        for (label, size) in &self.buffers {
            symbols.insert(label.clone(), at);
            at = align4(at + size);
        }
        Layout {
            symbols,
            data_base,
            data_size,
            bss_base,
            bss_size: at - bss_base,
        }
    }

    /// Address of a data or buffer label in the built program.
    ///
    /// # Panics
    /// Panics if `label` is not a data or buffer label.
    pub fn address_of(&self, label: &str) -> u32 {
        *self
            .layout()
            .symbols
            .get(label)
            .unwrap_or_else(|| panic!("Unknown label {}.", label))
    }

    /// Lays the program out and serializes it as a COFF executable.
    pub fn build(&self) -> Vec<u8> {
        let Layout {
            symbols,
            data_base,
            data_size,
            bss_base,
            bss_size,
        } = self.layout();

        let mut data = Vec::with_capacity(data_size as usize);
        for (_, datum) in &self.data {
            match datum {
                Datum::Bytes(b) => data.extend_from_slice(b),
                Datum::Word(w) => data.extend(w.to_le_bytes()),
                Datum::Pointers(labels) => {
                    for l in labels {
                        let addr = symbols
                            .get(l)
                            .unwrap_or_else(|| panic!("Unknown label {}.", l));
                        data.extend(addr.to_le_bytes());
                    }
                }
            }
            data.resize(align4(data.len() as u32) as usize, 0);
        }

        let text: Vec<u8> = self
            .text
            .finish(&symbols)
            .into_iter()
            .flat_map(u32::to_le_bytes)
            .collect();
        let mut coff = CoffBuilder::new(0).section(".text", 0, SectionFlags::TEXT, &text);
        if data_size > 0 {
            coff = coff.section(".data", data_base, SectionFlags::DATA, &data);
        }
        if bss_size > 0 {
            coff = coff.bss(".bss", bss_base, bss_size);
        }
        coff.build()
    }

    /// Builds the program and stores it as `name`.
    pub fn install(&self, fs: &StubFileSystem, name: &str) {
        if !fs.insert(name, &self.build()) {
            panic!("Invalid file name {:?}.", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ProgramBuilder;
    use crate::asm::reg::*;
    use machine::{PAGE_SIZE, coff::Coff};

    #[test]
    fn sections_are_contiguous() {
        let mut p = ProgramBuilder::new();
        p.string("msg", "hello").pointers("argv", &["msg"]).buffer("buf", 2000);
        p.text().la(A0, "msg").li(V0, 0).syscall();
        let coff = Coff::parse(p.build()).unwrap();
        let sections = coff.sections();
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].first_vpn(), 0);
        assert!(sections[0].is_read_only());
        assert_eq!(sections[1].first_vpn(), 1);
        assert_eq!(sections[1].size(), 8 + 4);
        assert_eq!(sections[2].first_vpn(), 2);
        assert_eq!(sections[2].length(), 2000usize.div_ceil(PAGE_SIZE));
        assert_eq!(coff.entry_point(), 0);
        assert_eq!(p.address_of("msg"), PAGE_SIZE as u32);
        assert_eq!(p.address_of("argv"), PAGE_SIZE as u32 + 8);
        assert_eq!(p.address_of("buf"), 2 * PAGE_SIZE as u32);
    }

    #[test]
    fn text_only() {
        let mut p = ProgramBuilder::new();
        p.text().li(V0, 0).syscall();
        let coff = Coff::parse(p.build()).unwrap();
        assert_eq!(coff.num_sections(), 1);
    }
}
