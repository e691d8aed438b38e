//! The user-mode processor.
//!
//! The processor interprets user programs one instruction at a time. Every
//! instruction fetch, load and store goes through the page table installed
//! with [`Processor::set_page_table`]. When an instruction cannot complete,
//! the processor stores the cause and faulting address into the CAUSE and
//! BAD_VADDR registers and hands control to the kernel.
//!
//! Branches and jumps have one delay slot: the processor keeps both PC and
//! NEXT_PC, and a taken branch only changes what NEXT_PC becomes.
pub mod isa;

use crate::{
    PAGE_SIZE,
    interrupt::Interrupt,
    memory::PhysicalMemory,
    spinlock::SpinLock,
    translation::{EntryFlags, TranslationEntry},
};
use isa::{AluOp, BranchCond, ImmOp, Instruction, MulDivOp, ShiftOp, Width};
use num_enum::TryFromPrimitive;
use std::sync::Arc;

/// Number of general purpose registers.
pub const NUM_GP_REGS: usize = 32;
/// Number of registers, including the special ones.
pub const NUM_TOTAL_REGS: usize = 38;

pub const V0: usize = 2;
pub const V1: usize = 3;
pub const A0: usize = 4;
pub const A1: usize = 5;
pub const A2: usize = 6;
pub const A3: usize = 7;
pub const SP: usize = 29;
pub const RA: usize = 31;
pub const HI: usize = 32;
pub const LO: usize = 33;
pub const PC: usize = 34;
pub const NEXT_PC: usize = 35;
pub const CAUSE: usize = 36;
pub const BAD_VADDR: usize = 37;

/// A page table shared between a process and the processor.
pub type SharedPageTable = Arc<SpinLock<Vec<TranslationEntry>>>;

/// Reason the processor stopped executing user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i32)]
pub enum ExceptionCause {
    /// A `syscall` instruction.
    Syscall = 0,
    /// No valid translation for the address.
    PageFault = 1,
    /// Reserved for a software-managed TLB.
    TlbMiss = 2,
    /// Write to a read-only page.
    ReadOnly = 3,
    /// The translation points outside of physical memory.
    BusError = 4,
    /// Misaligned or kernel-space address.
    AddressError = 5,
    /// Signed arithmetic overflow.
    Overflow = 6,
    /// The instruction could not be decoded.
    IllegalInstruction = 7,
}

/// A raised exception and the address that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exception {
    pub cause: ExceptionCause,
    pub bad_vaddr: u32,
}

impl Exception {
    fn new(cause: ExceptionCause, bad_vaddr: u32) -> Self {
        Self { cause, bad_vaddr }
    }
}

/// The MIPS processor.
pub struct Processor {
    registers: SpinLock<[i32; NUM_TOTAL_REGS]>,
    page_table: SpinLock<Option<SharedPageTable>>,
    memory: Arc<PhysicalMemory>,
    interrupt: Arc<Interrupt>,
}

impl Processor {
    pub fn new(memory: Arc<PhysicalMemory>, interrupt: Arc<Interrupt>) -> Self {
        Self {
            registers: SpinLock::new([0; NUM_TOTAL_REGS]),
            page_table: SpinLock::new(None),
            memory,
            interrupt,
        }
    }

    /// Reads register `r`.
    pub fn read_register(&self, r: usize) -> i32 {
        let regs = self.registers.lock();
        let v = regs[r];
        regs.unlock();
        v
    }

    /// Writes register `r`. Writes to register 0 are ignored.
    pub fn write_register(&self, r: usize, value: i32) {
        if r == 0 {
            return;
        }
        let mut regs = self.registers.lock();
        regs[r] = value;
        regs.unlock();
    }

    /// A snapshot of every register.
    pub fn registers(&self) -> [i32; NUM_TOTAL_REGS] {
        let regs = self.registers.lock();
        let v = *regs;
        regs.unlock();
        v
    }

    /// Replaces every register.
    pub fn set_registers(&self, values: &[i32; NUM_TOTAL_REGS]) {
        let mut regs = self.registers.lock();
        *regs = *values;
        regs[0] = 0;
        regs.unlock();
    }

    /// Moves past the current instruction.
    pub fn advance_pc(&self) {
        let mut regs = self.registers.lock();
        regs[PC] = regs[NEXT_PC];
        regs[NEXT_PC] = regs[NEXT_PC].wrapping_add(4);
        regs.unlock();
    }

    /// Installs the page table used for every user access.
    pub fn set_page_table(&self, page_table: Option<SharedPageTable>) {
        let mut slot = self.page_table.lock();
        *slot = page_table;
        slot.unlock();
    }

    pub fn page_table(&self) -> Option<SharedPageTable> {
        let slot = self.page_table.lock();
        let pt = slot.clone();
        slot.unlock();
        pt
    }

    pub fn memory(&self) -> &Arc<PhysicalMemory> {
        &self.memory
    }

    /// Translates `vaddr` for an access of `size` bytes.
    ///
    /// Marks the entry used, and dirty for writes.
    pub fn translate(&self, vaddr: u32, size: usize, write: bool) -> Result<usize, Exception> {
        let fault = |cause| Exception::new(cause, vaddr);
        if (vaddr as i32) < 0 || vaddr as usize % size != 0 {
            return Err(fault(ExceptionCause::AddressError));
        }
        let (vpn, offset) = (vaddr as usize / PAGE_SIZE, vaddr as usize % PAGE_SIZE);
        let page_table = self.page_table().ok_or(fault(ExceptionCause::PageFault))?;

        let mut entries = page_table.lock();
        let result = match entries.get_mut(vpn) {
            Some(e) if !e.is_valid() => Err(fault(ExceptionCause::PageFault)),
            None => Err(fault(ExceptionCause::PageFault)),
            Some(e) if write && e.is_read_only() => Err(fault(ExceptionCause::ReadOnly)),
            Some(e) if e.ppn >= self.memory.num_pages() => Err(fault(ExceptionCause::BusError)),
            Some(e) => {
                e.flags |= EntryFlags::USED;
                if write {
                    e.flags |= EntryFlags::DIRTY;
                }
                Ok(e.ppn * PAGE_SIZE + offset)
            }
        };
        entries.unlock();
        result
    }

    /// Reads `size` (1, 2 or 4) bytes at virtual address `vaddr`.
    pub fn read_mem(&self, vaddr: u32, size: usize) -> Result<u32, Exception> {
        let paddr = self.translate(vaddr, size, false)?;
        let mut buf = [0u8; 4];
        self.memory
            .read(paddr, &mut buf[..size])
            .ok_or(Exception::new(ExceptionCause::BusError, vaddr))?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Writes the low `size` bytes of `value` at virtual address `vaddr`.
    pub fn write_mem(&self, vaddr: u32, size: usize, value: u32) -> Result<(), Exception> {
        let paddr = self.translate(vaddr, size, true)?;
        self.memory
            .write(paddr, &value.to_le_bytes()[..size])
            .ok_or(Exception::new(ExceptionCause::BusError, vaddr))
    }

    /// Runs user code until the end of time.
    ///
    /// Each exception is recorded in CAUSE and BAD_VADDR, and `handler` is
    /// called. For a system call the handler is responsible for moving past
    /// the `syscall` instruction. Every instruction advances the clock, which
    /// is where the timer gets to preempt the program.
    pub fn run(&self, handler: &mut dyn FnMut(ExceptionCause)) -> ! {
        loop {
            if let Err(e) = self.step() {
                let mut regs = self.registers.lock();
                regs[CAUSE] = e.cause as i32;
                regs[BAD_VADDR] = e.bad_vaddr as i32;
                regs.unlock();
                crate::debug!('m', "exception {:?} at {:#x}", e.cause, e.bad_vaddr);
                handler(e.cause);
            }
            self.interrupt.tick(true);
        }
    }

    /// Executes a single instruction.
    ///
    /// Registers are only updated when the instruction completes.
    pub fn step(&self) -> Result<(), Exception> {
        let mut regs = self.registers();
        let pc = regs[PC] as u32;
        let word = self.read_mem(pc, 4)?;
        let inst =
            Instruction::decode(word).ok_or(Exception::new(ExceptionCause::IllegalInstruction, pc))?;

        let mut next = (regs[NEXT_PC] as u32).wrapping_add(4);
        let overflow = || Exception::new(ExceptionCause::Overflow, 0);
        let get = |regs: &[i32; NUM_TOTAL_REGS], r: u8| regs[r as usize];

        match inst {
            Instruction::Alu { op, rd, rs, rt } => {
                let (a, b) = (get(&regs, rs), get(&regs, rt));
                regs[rd as usize] = match op {
                    AluOp::Add => a.checked_add(b).ok_or_else(overflow)?,
                    AluOp::Addu => a.wrapping_add(b),
                    AluOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
                    AluOp::Subu => a.wrapping_sub(b),
                    AluOp::And => a & b,
                    AluOp::Or => a | b,
                    AluOp::Xor => a ^ b,
                    AluOp::Nor => !(a | b),
                    AluOp::Slt => (a < b) as i32,
                    AluOp::Sltu => ((a as u32) < (b as u32)) as i32,
                };
            }
            Instruction::Imm { op, rt, rs, imm } => {
                let a = get(&regs, rs);
                let sext = imm as i16 as i32;
                let zext = imm as i32;
                regs[rt as usize] = match op {
                    ImmOp::Addi => a.checked_add(sext).ok_or_else(overflow)?,
                    ImmOp::Addiu => a.wrapping_add(sext),
                    ImmOp::Slti => (a < sext) as i32,
                    ImmOp::Sltiu => ((a as u32) < (sext as u32)) as i32,
                    ImmOp::Andi => a & zext,
                    ImmOp::Ori => a | zext,
                    ImmOp::Xori => a ^ zext,
                    ImmOp::Lui => zext << 16,
                };
            }
            Instruction::Shift { op, rd, rt, sa } => {
                regs[rd as usize] = shift(op, get(&regs, rt), sa as u32);
            }
            Instruction::ShiftV { op, rd, rt, rs } => {
                regs[rd as usize] = shift(op, get(&regs, rt), get(&regs, rs) as u32 & 0x1f);
            }
            Instruction::MulDiv { op, rs, rt } => {
                let (a, b) = (get(&regs, rs), get(&regs, rt));
                match op {
                    MulDivOp::Mult => {
                        let p = a as i64 * b as i64;
                        regs[HI] = (p >> 32) as i32;
                        regs[LO] = p as i32;
                    }
                    MulDivOp::Multu => {
                        let p = a as u32 as u64 * b as u32 as u64;
                        regs[HI] = (p >> 32) as i32;
                        regs[LO] = p as i32;
                    }
                    // Division by zero leaves HI and LO unpredictable; keep them.
                    MulDivOp::Div if b != 0 => {
                        regs[LO] = a.wrapping_div(b);
                        regs[HI] = a.wrapping_rem(b);
                    }
                    MulDivOp::Divu if b != 0 => {
                        regs[LO] = ((a as u32) / (b as u32)) as i32;
                        regs[HI] = ((a as u32) % (b as u32)) as i32;
                    }
                    MulDivOp::Div | MulDivOp::Divu => (),
                }
            }
            Instruction::Mfhi { rd } => regs[rd as usize] = regs[HI],
            Instruction::Mflo { rd } => regs[rd as usize] = regs[LO],
            Instruction::Jr { rs } => next = get(&regs, rs) as u32,
            Instruction::Jalr { rd, rs } => {
                next = get(&regs, rs) as u32;
                regs[rd as usize] = pc.wrapping_add(8) as i32;
            }
            Instruction::Branch { cond, rs, rt, offset, link } => {
                let (a, b) = (get(&regs, rs), get(&regs, rt));
                let taken = match cond {
                    BranchCond::Eq => a == b,
                    BranchCond::Ne => a != b,
                    BranchCond::Lez => a <= 0,
                    BranchCond::Gtz => a > 0,
                    BranchCond::Ltz => a < 0,
                    BranchCond::Gez => a >= 0,
                };
                if link {
                    regs[RA] = pc.wrapping_add(8) as i32;
                }
                if taken {
                    next = pc.wrapping_add(4).wrapping_add(((offset as i32) << 2) as u32);
                }
            }
            Instruction::Jump { target, link } => {
                if link {
                    regs[RA] = pc.wrapping_add(8) as i32;
                }
                next = (pc.wrapping_add(4) & 0xf000_0000) | (target << 2);
            }
            Instruction::Load { width, signed, rt, base, offset } => {
                let vaddr = get(&regs, base).wrapping_add(offset as i32) as u32;
                let raw = self.read_mem(vaddr, width.bytes())?;
                regs[rt as usize] = match (width, signed) {
                    (Width::Byte, true) => raw as u8 as i8 as i32,
                    (Width::Byte, false) => raw as u8 as i32,
                    (Width::Half, true) => raw as u16 as i16 as i32,
                    (Width::Half, false) => raw as u16 as i32,
                    (Width::Word, _) => raw as i32,
                };
            }
            Instruction::Store { width, rt, base, offset } => {
                let vaddr = get(&regs, base).wrapping_add(offset as i32) as u32;
                self.write_mem(vaddr, width.bytes(), get(&regs, rt) as u32)?;
            }
            Instruction::Syscall => return Err(Exception::new(ExceptionCause::Syscall, 0)),
        }

        regs[0] = 0;
        regs[PC] = regs[NEXT_PC];
        regs[NEXT_PC] = next as i32;
        let mut live = self.registers.lock();
        *live = regs;
        live.unlock();
        Ok(())
    }
}

fn shift(op: ShiftOp, value: i32, amount: u32) -> i32 {
    match op {
        ShiftOp::Sll => ((value as u32) << amount) as i32,
        ShiftOp::Srl => ((value as u32) >> amount) as i32,
        ShiftOp::Sra => value >> amount,
    }
}
