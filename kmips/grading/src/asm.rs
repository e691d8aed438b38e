//! A tiny assembler for writing user test programs.
//!
//! Every branch and jump is followed by a `nop` in its delay slot, so test
//! programs read as if the machine had none. Labels may be used before they
//! are defined; they are resolved by [`Assembler::finish`].
use machine::processor::isa::{
    AluOp, BranchCond, ImmOp, Instruction, Reg, ShiftOp, Width,
};
use std::collections::BTreeMap;

/// Register names of the MIPS calling convention.
pub mod reg {
    use machine::processor::isa::Reg;

    pub const ZERO: Reg = 0;
    pub const AT: Reg = 1;
    pub const V0: Reg = 2;
    pub const V1: Reg = 3;
    pub const A0: Reg = 4;
    pub const A1: Reg = 5;
    pub const A2: Reg = 6;
    pub const A3: Reg = 7;
    pub const T0: Reg = 8;
    pub const T1: Reg = 9;
    pub const T2: Reg = 10;
    pub const T3: Reg = 11;
    pub const T4: Reg = 12;
    pub const T5: Reg = 13;
    pub const T6: Reg = 14;
    pub const T7: Reg = 15;
    pub const S0: Reg = 16;
    pub const S1: Reg = 17;
    pub const S2: Reg = 18;
    pub const S3: Reg = 19;
    pub const S4: Reg = 20;
    pub const S5: Reg = 21;
    pub const S6: Reg = 22;
    pub const S7: Reg = 23;
    pub const T8: Reg = 24;
    pub const T9: Reg = 25;
    pub const SP: Reg = 29;
    pub const RA: Reg = 31;
}

enum Fixup {
    /// 16-bit word offset relative to the delay slot.
    Branch,
    /// 26-bit word index.
    Jump,
    /// `lui`/`ori` pair loading the label's address.
    Address,
}

/// Builds the text of a program.
#[derive(Default)]
pub struct Assembler {
    code: Vec<u32>,
    labels: BTreeMap<String, u32>,
    fixups: Vec<(usize, String, Fixup)>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address of the next instruction.
    pub fn here(&self) -> u32 {
        (self.code.len() * 4) as u32
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    fn emit(&mut self, inst: Instruction) -> &mut Self {
        self.code.push(inst.encode());
        self
    }

    /// Emits a raw instruction word.
    pub fn raw(&mut self, word: u32) -> &mut Self {
        self.code.push(word);
        self
    }

    /// Defines `name` at the next instruction.
    pub fn label(&mut self, name: &str) -> &mut Self {
        let addr = self.here();
        if self.labels.insert(name.to_string(), addr).is_some() {
            panic!("Label {} defined twice.", name);
        }
        self
    }

    fn imm(&mut self, op: ImmOp, rt: Reg, rs: Reg, imm: u16) -> &mut Self {
        self.emit(Instruction::Imm { op, rt, rs, imm })
    }

    fn alu(&mut self, op: AluOp, rd: Reg, rs: Reg, rt: Reg) -> &mut Self {
        self.emit(Instruction::Alu { op, rd, rs, rt })
    }

    pub fn nop(&mut self) -> &mut Self {
        self.raw(0)
    }

    pub fn addiu(&mut self, rt: Reg, rs: Reg, imm: i16) -> &mut Self {
        self.imm(ImmOp::Addiu, rt, rs, imm as u16)
    }

    pub fn addi(&mut self, rt: Reg, rs: Reg, imm: i16) -> &mut Self {
        self.imm(ImmOp::Addi, rt, rs, imm as u16)
    }

    pub fn ori(&mut self, rt: Reg, rs: Reg, imm: u16) -> &mut Self {
        self.imm(ImmOp::Ori, rt, rs, imm)
    }

    pub fn lui(&mut self, rt: Reg, imm: u16) -> &mut Self {
        self.imm(ImmOp::Lui, rt, 0, imm)
    }

    pub fn addu(&mut self, rd: Reg, rs: Reg, rt: Reg) -> &mut Self {
        self.alu(AluOp::Addu, rd, rs, rt)
    }

    pub fn add(&mut self, rd: Reg, rs: Reg, rt: Reg) -> &mut Self {
        self.alu(AluOp::Add, rd, rs, rt)
    }

    pub fn subu(&mut self, rd: Reg, rs: Reg, rt: Reg) -> &mut Self {
        self.alu(AluOp::Subu, rd, rs, rt)
    }

    pub fn slt(&mut self, rd: Reg, rs: Reg, rt: Reg) -> &mut Self {
        self.alu(AluOp::Slt, rd, rs, rt)
    }

    pub fn sll(&mut self, rd: Reg, rt: Reg, sa: u8) -> &mut Self {
        self.emit(Instruction::Shift { op: ShiftOp::Sll, rd, rt, sa })
    }

    /// `rd = rs`.
    pub fn move_(&mut self, rd: Reg, rs: Reg) -> &mut Self {
        self.addu(rd, rs, reg::ZERO)
    }

    /// Loads a 32-bit constant. Always two instructions.
    pub fn li(&mut self, rt: Reg, value: i32) -> &mut Self {
        let value = value as u32;
        self.lui(rt, (value >> 16) as u16)
            .ori(rt, rt, value as u16)
    }

    /// Loads the address of `label`.
    pub fn la(&mut self, rt: Reg, label: &str) -> &mut Self {
        self.fixups
            .push((self.code.len(), label.to_string(), Fixup::Address));
        self.lui(rt, 0).ori(rt, rt, 0)
    }

    fn load(&mut self, width: Width, signed: bool, rt: Reg, offset: i16, base: Reg) -> &mut Self {
        self.emit(Instruction::Load { width, signed, rt, base, offset })
    }

    fn store(&mut self, width: Width, rt: Reg, offset: i16, base: Reg) -> &mut Self {
        self.emit(Instruction::Store { width, rt, base, offset })
    }

    pub fn lw(&mut self, rt: Reg, offset: i16, base: Reg) -> &mut Self {
        self.load(Width::Word, true, rt, offset, base)
    }

    pub fn lb(&mut self, rt: Reg, offset: i16, base: Reg) -> &mut Self {
        self.load(Width::Byte, true, rt, offset, base)
    }

    pub fn lbu(&mut self, rt: Reg, offset: i16, base: Reg) -> &mut Self {
        self.load(Width::Byte, false, rt, offset, base)
    }

    pub fn sw(&mut self, rt: Reg, offset: i16, base: Reg) -> &mut Self {
        self.store(Width::Word, rt, offset, base)
    }

    pub fn sb(&mut self, rt: Reg, offset: i16, base: Reg) -> &mut Self {
        self.store(Width::Byte, rt, offset, base)
    }

    fn branch(&mut self, cond: BranchCond, rs: Reg, rt: Reg, label: &str) -> &mut Self {
        self.fixups
            .push((self.code.len(), label.to_string(), Fixup::Branch));
        self.emit(Instruction::Branch { cond, rs, rt, offset: 0, link: false })
            .nop()
    }

    pub fn beq(&mut self, rs: Reg, rt: Reg, label: &str) -> &mut Self {
        self.branch(BranchCond::Eq, rs, rt, label)
    }

    pub fn bne(&mut self, rs: Reg, rt: Reg, label: &str) -> &mut Self {
        self.branch(BranchCond::Ne, rs, rt, label)
    }

    pub fn blez(&mut self, rs: Reg, label: &str) -> &mut Self {
        self.branch(BranchCond::Lez, rs, 0, label)
    }

    pub fn bgtz(&mut self, rs: Reg, label: &str) -> &mut Self {
        self.branch(BranchCond::Gtz, rs, 0, label)
    }

    pub fn bltz(&mut self, rs: Reg, label: &str) -> &mut Self {
        self.branch(BranchCond::Ltz, rs, 0, label)
    }

    pub fn bgez(&mut self, rs: Reg, label: &str) -> &mut Self {
        self.branch(BranchCond::Gez, rs, 0, label)
    }

    /// Unconditional branch.
    pub fn b(&mut self, label: &str) -> &mut Self {
        self.beq(reg::ZERO, reg::ZERO, label)
    }

    fn jump(&mut self, link: bool, label: &str) -> &mut Self {
        self.fixups.push((self.code.len(), label.to_string(), Fixup::Jump));
        self.emit(Instruction::Jump { target: 0, link }).nop()
    }

    pub fn j(&mut self, label: &str) -> &mut Self {
        self.jump(false, label)
    }

    pub fn jal(&mut self, label: &str) -> &mut Self {
        self.jump(true, label)
    }

    pub fn jr(&mut self, rs: Reg) -> &mut Self {
        self.emit(Instruction::Jr { rs }).nop()
    }

    pub fn syscall(&mut self) -> &mut Self {
        self.emit(Instruction::Syscall)
    }

    /// Resolves every label and returns the instruction words.
    ///
    /// `symbols` supplies labels defined outside the text, such as data
    /// addresses.
    ///
    /// # Panics
    /// Panics if a label is unknown or a branch target is out of range.
    pub fn finish(&self, symbols: &BTreeMap<String, u32>) -> Vec<u32> {
        let mut code = self.code.clone();
        for (at, name, kind) in &self.fixups {
            let target = *self
                .labels
                .get(name)
                .or_else(|| symbols.get(name))
                .unwrap_or_else(|| panic!("Unknown label {}.", name));
            match kind {
                Fixup::Branch => {
                    let delta = (target as i64 - (*at as i64 * 4 + 4)) >> 2;
                    let offset = i16::try_from(delta)
                        .unwrap_or_else(|_| panic!("Branch to {} out of range.", name));
                    code[*at] |= offset as u16 as u32;
                }
                Fixup::Jump => code[*at] |= (target >> 2) & 0x03ff_ffff,
                Fixup::Address => {
                    code[*at] |= target >> 16;
                    code[*at + 1] |= target & 0xffff;
                }
            }
        }
        code
    }
}

#[cfg(test)]
mod tests {
    use super::{Assembler, reg::*};
    use machine::processor::isa::{BranchCond, Instruction};
    use std::collections::BTreeMap;

    #[test]
    fn branches_are_relative_to_the_delay_slot() {
        let mut asm = Assembler::new();
        asm.label("top").nop().beq(T0, T1, "top").bne(T0, ZERO, "end").label("end");
        let code = asm.finish(&BTreeMap::new());
        assert_eq!(code.len(), 5);
        assert_eq!(
            Instruction::decode(code[1]),
            Some(Instruction::Branch { cond: BranchCond::Eq, rs: T0, rt: T1, offset: -2, link: false })
        );
        assert_eq!(
            Instruction::decode(code[3]),
            Some(Instruction::Branch { cond: BranchCond::Ne, rs: T0, rt: ZERO, offset: 1, link: false })
        );
    }

    #[test]
    fn addresses_come_from_symbols() {
        let mut asm = Assembler::new();
        asm.la(A0, "msg").jal("func").label("func");
        let symbols = BTreeMap::from([("msg".to_string(), 0x0001_2344)]);
        let code = asm.finish(&symbols);
        assert_eq!(code[0] & 0xffff, 0x0001);
        assert_eq!(code[1] & 0xffff, 0x2344);
        assert_eq!(code[2] & 0x03ff_ffff, 4);
    }

    #[test]
    #[should_panic]
    fn unknown_label() {
        let mut asm = Assembler::new();
        asm.j("nowhere");
        asm.finish(&BTreeMap::new());
    }
}
