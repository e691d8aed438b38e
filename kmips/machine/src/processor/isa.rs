//! The MIPS32 subset understood by the processor.
//!
//! Only what compiled test programs need is supported: integer arithmetic,
//! logic and shifts, multiply/divide, byte/half/word loads and stores,
//! branches, jumps and `syscall`. Everything else decodes to `None` and is
//! reported as an illegal instruction.

/// A register number, 0 to 31.
pub type Reg = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Addu,
    Sub,
    Subu,
    And,
    Or,
    Xor,
    Nor,
    Slt,
    Sltu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmOp {
    Addi,
    Addiu,
    Slti,
    Sltiu,
    Andi,
    Ori,
    Xori,
    Lui,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Sll,
    Srl,
    Sra,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulDivOp {
    Mult,
    Multu,
    Div,
    Divu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCond {
    /// `rs == rt`
    Eq,
    /// `rs != rt`
    Ne,
    /// `rs <= 0`
    Lez,
    /// `rs > 0`
    Gtz,
    /// `rs < 0`
    Ltz,
    /// `rs >= 0`
    Gez,
}

/// Access width of loads and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Half,
    Word,
}

impl Width {
    pub fn bytes(self) -> usize {
        match self {
            Width::Byte => 1,
            Width::Half => 2,
            Width::Word => 4,
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Alu { op: AluOp, rd: Reg, rs: Reg, rt: Reg },
    Imm { op: ImmOp, rt: Reg, rs: Reg, imm: u16 },
    Shift { op: ShiftOp, rd: Reg, rt: Reg, sa: u8 },
    ShiftV { op: ShiftOp, rd: Reg, rt: Reg, rs: Reg },
    MulDiv { op: MulDivOp, rs: Reg, rt: Reg },
    Mfhi { rd: Reg },
    Mflo { rd: Reg },
    Jr { rs: Reg },
    Jalr { rd: Reg, rs: Reg },
    /// Conditional branch. `rt` only matters for `Eq` and `Ne`.
    Branch { cond: BranchCond, rs: Reg, rt: Reg, offset: i16, link: bool },
    /// `j` / `jal` with a 26-bit word index.
    Jump { target: u32, link: bool },
    Load { width: Width, signed: bool, rt: Reg, base: Reg, offset: i16 },
    Store { width: Width, rt: Reg, base: Reg, offset: i16 },
    Syscall,
}

const OP_SPECIAL: u32 = 0x00;
const OP_REGIMM: u32 = 0x01;

const fn r(word: u32, shift: u32) -> Reg {
    ((word >> shift) & 0x1f) as Reg
}

impl Instruction {
    /// Decodes one instruction word.
    pub fn decode(word: u32) -> Option<Self> {
        let op = word >> 26;
        let (rs, rt, rd, sa) = (r(word, 21), r(word, 16), r(word, 11), r(word, 6));
        let imm = (word & 0xffff) as u16;
        let offset = imm as i16;

        let inst = match op {
            OP_SPECIAL => match word & 0x3f {
                0x00 => Instruction::Shift { op: ShiftOp::Sll, rd, rt, sa },
                0x02 => Instruction::Shift { op: ShiftOp::Srl, rd, rt, sa },
                0x03 => Instruction::Shift { op: ShiftOp::Sra, rd, rt, sa },
                0x04 => Instruction::ShiftV { op: ShiftOp::Sll, rd, rt, rs },
                0x06 => Instruction::ShiftV { op: ShiftOp::Srl, rd, rt, rs },
                0x07 => Instruction::ShiftV { op: ShiftOp::Sra, rd, rt, rs },
                0x08 => Instruction::Jr { rs },
                0x09 => Instruction::Jalr { rd, rs },
                0x0c => Instruction::Syscall,
                0x10 => Instruction::Mfhi { rd },
                0x12 => Instruction::Mflo { rd },
                0x18 => Instruction::MulDiv { op: MulDivOp::Mult, rs, rt },
                0x19 => Instruction::MulDiv { op: MulDivOp::Multu, rs, rt },
                0x1a => Instruction::MulDiv { op: MulDivOp::Div, rs, rt },
                0x1b => Instruction::MulDiv { op: MulDivOp::Divu, rs, rt },
                funct => {
                    let op = match funct {
                        0x20 => AluOp::Add,
                        0x21 => AluOp::Addu,
                        0x22 => AluOp::Sub,
                        0x23 => AluOp::Subu,
                        0x24 => AluOp::And,
                        0x25 => AluOp::Or,
                        0x26 => AluOp::Xor,
                        0x27 => AluOp::Nor,
                        0x2a => AluOp::Slt,
                        0x2b => AluOp::Sltu,
                        _ => return None,
                    };
                    Instruction::Alu { op, rd, rs, rt }
                }
            },
            OP_REGIMM => {
                let (cond, link) = match rt {
                    0x00 => (BranchCond::Ltz, false),
                    0x01 => (BranchCond::Gez, false),
                    0x10 => (BranchCond::Ltz, true),
                    0x11 => (BranchCond::Gez, true),
                    _ => return None,
                };
                Instruction::Branch { cond, rs, rt: 0, offset, link }
            }
            0x02 | 0x03 => Instruction::Jump {
                target: word & 0x03ff_ffff,
                link: op == 0x03,
            },
            0x04 => Instruction::Branch { cond: BranchCond::Eq, rs, rt, offset, link: false },
            0x05 => Instruction::Branch { cond: BranchCond::Ne, rs, rt, offset, link: false },
            0x06 => Instruction::Branch { cond: BranchCond::Lez, rs, rt: 0, offset, link: false },
            0x07 => Instruction::Branch { cond: BranchCond::Gtz, rs, rt: 0, offset, link: false },
            0x08..=0x0f => {
                let op = match op {
                    0x08 => ImmOp::Addi,
                    0x09 => ImmOp::Addiu,
                    0x0a => ImmOp::Slti,
                    0x0b => ImmOp::Sltiu,
                    0x0c => ImmOp::Andi,
                    0x0d => ImmOp::Ori,
                    0x0e => ImmOp::Xori,
                    _ => ImmOp::Lui,
                };
                Instruction::Imm { op, rt, rs, imm }
            }
            0x20 => Instruction::Load { width: Width::Byte, signed: true, rt, base: rs, offset },
            0x21 => Instruction::Load { width: Width::Half, signed: true, rt, base: rs, offset },
            0x23 => Instruction::Load { width: Width::Word, signed: true, rt, base: rs, offset },
            0x24 => Instruction::Load { width: Width::Byte, signed: false, rt, base: rs, offset },
            0x25 => Instruction::Load { width: Width::Half, signed: false, rt, base: rs, offset },
            0x28 => Instruction::Store { width: Width::Byte, rt, base: rs, offset },
            0x29 => Instruction::Store { width: Width::Half, rt, base: rs, offset },
            0x2b => Instruction::Store { width: Width::Word, rt, base: rs, offset },
            _ => return None,
        };
        Some(inst)
    }

    /// Encodes the instruction into its machine word.
    pub fn encode(self) -> u32 {
        fn special(rs: Reg, rt: Reg, rd: Reg, sa: u8, funct: u32) -> u32 {
            (rs as u32) << 21 | (rt as u32) << 16 | (rd as u32) << 11 | (sa as u32 & 0x1f) << 6 | funct
        }
        fn itype(op: u32, rs: Reg, rt: Reg, imm: u16) -> u32 {
            op << 26 | (rs as u32) << 21 | (rt as u32) << 16 | imm as u32
        }

        match self {
            Instruction::Alu { op, rd, rs, rt } => {
                let funct = match op {
                    AluOp::Add => 0x20,
                    AluOp::Addu => 0x21,
                    AluOp::Sub => 0x22,
                    AluOp::Subu => 0x23,
                    AluOp::And => 0x24,
                    AluOp::Or => 0x25,
                    AluOp::Xor => 0x26,
                    AluOp::Nor => 0x27,
                    AluOp::Slt => 0x2a,
                    AluOp::Sltu => 0x2b,
                };
                special(rs, rt, rd, 0, funct)
            }
            Instruction::Imm { op, rt, rs, imm } => {
                let opcode = match op {
                    ImmOp::Addi => 0x08,
                    ImmOp::Addiu => 0x09,
                    ImmOp::Slti => 0x0a,
                    ImmOp::Sltiu => 0x0b,
                    ImmOp::Andi => 0x0c,
                    ImmOp::Ori => 0x0d,
                    ImmOp::Xori => 0x0e,
                    ImmOp::Lui => 0x0f,
                };
                itype(opcode, rs, rt, imm)
            }
            Instruction::Shift { op, rd, rt, sa } => {
                let funct = match op {
                    ShiftOp::Sll => 0x00,
                    ShiftOp::Srl => 0x02,
                    ShiftOp::Sra => 0x03,
                };
                special(0, rt, rd, sa, funct)
            }
            Instruction::ShiftV { op, rd, rt, rs } => {
                let funct = match op {
                    ShiftOp::Sll => 0x04,
                    ShiftOp::Srl => 0x06,
                    ShiftOp::Sra => 0x07,
                };
                special(rs, rt, rd, 0, funct)
            }
            Instruction::MulDiv { op, rs, rt } => {
                let funct = match op {
                    MulDivOp::Mult => 0x18,
                    MulDivOp::Multu => 0x19,
                    MulDivOp::Div => 0x1a,
                    MulDivOp::Divu => 0x1b,
                };
                special(rs, rt, 0, 0, funct)
            }
            Instruction::Mfhi { rd } => special(0, 0, rd, 0, 0x10),
            Instruction::Mflo { rd } => special(0, 0, rd, 0, 0x12),
            Instruction::Jr { rs } => special(rs, 0, 0, 0, 0x08),
            Instruction::Jalr { rd, rs } => special(rs, 0, rd, 0, 0x09),
            Instruction::Syscall => 0x0c,
            Instruction::Branch { cond, rs, rt, offset, link } => {
                let imm = offset as u16;
                match (cond, link) {
                    (BranchCond::Eq, _) => itype(0x04, rs, rt, imm),
                    (BranchCond::Ne, _) => itype(0x05, rs, rt, imm),
                    (BranchCond::Lez, _) => itype(0x06, rs, 0, imm),
                    (BranchCond::Gtz, _) => itype(0x07, rs, 0, imm),
                    (BranchCond::Ltz, false) => itype(OP_REGIMM, rs, 0x00, imm),
                    (BranchCond::Gez, false) => itype(OP_REGIMM, rs, 0x01, imm),
                    (BranchCond::Ltz, true) => itype(OP_REGIMM, rs, 0x10, imm),
                    (BranchCond::Gez, true) => itype(OP_REGIMM, rs, 0x11, imm),
                }
            }
            Instruction::Jump { target, link } => {
                (if link { 0x03 } else { 0x02 }) << 26 | (target & 0x03ff_ffff)
            }
            Instruction::Load { width, signed, rt, base, offset } => {
                let opcode = match (width, signed) {
                    (Width::Byte, true) => 0x20,
                    (Width::Half, true) => 0x21,
                    (Width::Word, _) => 0x23,
                    (Width::Byte, false) => 0x24,
                    (Width::Half, false) => 0x25,
                };
                itype(opcode, base, rt, offset as u16)
            }
            Instruction::Store { width, rt, base, offset } => {
                let opcode = match width {
                    Width::Byte => 0x28,
                    Width::Half => 0x29,
                    Width::Word => 0x2b,
                };
                itype(opcode, base, rt, offset as u16)
            }
        }
    }
}
