//! Instruction tables.
//!
//! Static, build-time data: machine instructions with their operand format
//! descriptors, extended mnemonics with operand transformations, assembler
//! instructions, and conditional-assembly instructions. The tables are
//! name-sorted arrays looked up by binary search.

mod tables;

pub use tables::{ASSEMBLER_INSTRUCTIONS, CA_INSTRUCTIONS, MACHINE_INSTRUCTIONS, MNEMONIC_CODES};

use bitflags::bitflags;

bitflags! {
    /// Which instruction-set levels include an instruction.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct InstructionSet: u32 {
        const ZOP = 1 << 0;
        const YOP = 1 << 1;
        const Z9 = 1 << 2;
        const Z10 = 1 << 3;
        const Z11 = 1 << 4;
        const Z12 = 1 << 5;
        const Z13 = 1 << 6;
        const Z14 = 1 << 7;
        const Z15 = 1 << 8;
        const Z16 = 1 << 9;
        const Z17 = 1 << 10;
        const ESA = 1 << 11;
        const XA = 1 << 12;
        const S370 = 1 << 13;
        const DOS = 1 << 14;
        const UNI = 1 << 15;
    }
}

/// Machine instruction formats relevant to the table subset.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MachFormat {
    RR,
    RRE,
    RxA,
    RxyA,
    RiA,
    RiB,
    RiC,
    RilB,
    RilC,
    RsA,
    RsyA,
    Si,
    SsA,
    S,
}

impl MachFormat {
    /// Encoded instruction length in bytes.
    pub fn length(self) -> u8 {
        match self {
            MachFormat::RR => 2,
            MachFormat::RRE
            | MachFormat::RxA
            | MachFormat::RiA
            | MachFormat::RiB
            | MachFormat::RiC
            | MachFormat::RsA
            | MachFormat::Si
            | MachFormat::S => 4,
            MachFormat::RxyA | MachFormat::RilB | MachFormat::RilC | MachFormat::RsyA
            | MachFormat::SsA => 6,
        }
    }
}

/// What one encoded field of an operand holds.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum OperandKind {
    None,
    Reg,
    Mask,
    Imm,
    /// Relative-immediate: the operand is a branch target transformed to a
    /// halfword distance.
    RelocImm,
    VecReg,
    Disp,
    Base,
    Idx,
    /// SS-style length field, encoded as L-1.
    Length,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EvenOdd {
    None,
    Even,
    Odd,
}

/// One encoded field: kind, bit width, signedness, and parity rule.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Param {
    pub kind: OperandKind,
    pub bits: u8,
    pub signed: bool,
    pub evenodd: EvenOdd,
}

impl Param {
    pub const fn none() -> Self {
        Param {
            kind: OperandKind::None,
            bits: 0,
            signed: false,
            evenodd: EvenOdd::None,
        }
    }

    pub const fn new(kind: OperandKind, bits: u8, signed: bool) -> Self {
        Param {
            kind,
            bits,
            signed,
            evenodd: EvenOdd::None,
        }
    }

    pub const fn even(mut self) -> Self {
        self.evenodd = EvenOdd::Even;
        self
    }

    pub fn is_none(&self) -> bool {
        self.kind == OperandKind::None
    }

    /// Inclusive value bounds of the field.
    pub fn bounds(&self) -> (i64, i64) {
        let span = 1i64 << (self.bits - self.signed as u8);
        if self.signed {
            (-span, span - 1)
        } else if self.kind == OperandKind::Length {
            // Lengths are encoded as L-1 but 0 is tolerated.
            (0, span)
        } else {
            (0, span - 1)
        }
    }
}

/// Format of one statement operand: the main field plus the optional
/// parenthesized subfields, e.g. `D(X,B)` is `(Disp, Idx, Base)`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct OperandFormat {
    pub id: Param,
    pub first: Param,
    pub second: Param,
}

impl OperandFormat {
    pub const fn simple(id: Param) -> Self {
        OperandFormat {
            id,
            first: Param::none(),
            second: Param::none(),
        }
    }

    /// No parenthesized parts allowed.
    pub fn is_simple(&self) -> bool {
        self.first.is_none() && self.second.is_none()
    }

    pub fn is_displacement(&self) -> bool {
        self.id.kind == OperandKind::Disp
    }

    /// 20-bit signed displacement (the "long" forms).
    pub fn is_long_displacement(&self) -> bool {
        self.is_displacement() && self.id.signed
    }
}

// Operand format constants used by the tables.
pub const REG_4_U: OperandFormat = OperandFormat::simple(Param::new(OperandKind::Reg, 4, false));
pub const REG_4_U_EVEN: OperandFormat =
    OperandFormat::simple(Param::new(OperandKind::Reg, 4, false).even());
pub const MASK_4_U: OperandFormat = OperandFormat::simple(Param::new(OperandKind::Mask, 4, false));
pub const IMM_8_U: OperandFormat = OperandFormat::simple(Param::new(OperandKind::Imm, 8, false));
pub const IMM_16_S: OperandFormat = OperandFormat::simple(Param::new(OperandKind::Imm, 16, true));
pub const RELOC_IMM_16_S: OperandFormat =
    OperandFormat::simple(Param::new(OperandKind::RelocImm, 16, true));
pub const RELOC_IMM_32_S: OperandFormat =
    OperandFormat::simple(Param::new(OperandKind::RelocImm, 32, true));
pub const VEC_REG_5_U: OperandFormat =
    OperandFormat::simple(Param::new(OperandKind::VecReg, 5, false));

pub const DB_12_4_U: OperandFormat = OperandFormat {
    id: Param::new(OperandKind::Disp, 12, false),
    first: Param::none(),
    second: Param::new(OperandKind::Base, 4, false),
};
pub const DB_20_4_S: OperandFormat = OperandFormat {
    id: Param::new(OperandKind::Disp, 20, true),
    first: Param::none(),
    second: Param::new(OperandKind::Base, 4, false),
};
pub const DXB_12_4X4_U: OperandFormat = OperandFormat {
    id: Param::new(OperandKind::Disp, 12, false),
    first: Param::new(OperandKind::Idx, 4, false),
    second: Param::new(OperandKind::Base, 4, false),
};
pub const DXB_20_4X4_S: OperandFormat = OperandFormat {
    id: Param::new(OperandKind::Disp, 20, true),
    first: Param::new(OperandKind::Idx, 4, false),
    second: Param::new(OperandKind::Base, 4, false),
};
pub const DL_12_8X4_U: OperandFormat = OperandFormat {
    id: Param::new(OperandKind::Disp, 12, false),
    first: Param::new(OperandKind::Length, 8, false),
    second: Param::new(OperandKind::Base, 4, false),
};

/// A machine instruction.
pub struct MachineInstruction {
    pub name: &'static str,
    pub format: MachFormat,
    pub operands: &'static [OperandFormat],
    /// How many trailing operands may be omitted.
    pub optional_operands: u8,
    /// Bit `i` set: operand `i` undergoes the relative-address transform.
    pub reladdr_mask: u8,
    pub arch: InstructionSet,
    pub privileged: bool,
    /// Does the instruction set the condition code?
    pub sets_cc: bool,
}

impl MachineInstruction {
    pub fn size_bytes(&self) -> u8 {
        self.format.length()
    }

    pub fn min_operands(&self) -> usize {
        self.operands.len() - self.optional_operands as usize
    }

    pub fn max_operands(&self) -> usize {
        self.operands.len()
    }
}

/// How a mnemonic transforms its operand list into the parent
/// instruction's.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TransformKind {
    /// Insert `value` as an extra operand.
    Insert,
    /// Replicate the previous user operand into this slot.
    Copy,
    OrWith,
    AddTo,
    SubtractFrom,
    Complement,
}

/// One mnemonic operand transformation, applied after copying `skip`
/// user operands.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MnemonicTransform {
    pub skip: u8,
    pub value: u16,
    pub kind: TransformKind,
}

impl MnemonicTransform {
    pub const fn insert(skip: u8, value: u16) -> Self {
        Self {
            skip,
            value,
            kind: TransformKind::Insert,
        }
    }

    /// Does the transform consume a format slot without a user operand?
    pub fn inserts(&self) -> bool {
        matches!(self.kind, TransformKind::Insert | TransformKind::Copy)
    }
}

/// An extended mnemonic for a machine instruction.
pub struct MnemonicCode {
    pub name: &'static str,
    pub parent: &'static str,
    pub transforms: &'static [MnemonicTransform],
    pub arch: InstructionSet,
}

impl MnemonicCode {
    pub fn instruction(&self) -> &'static MachineInstruction {
        get_machine(self.parent).expect("mnemonic parents are table entries")
    }

    pub fn reladdr_mask(&self) -> u8 {
        // The mask of the parent shifted by the inserted operands.
        let inserted = self.transforms.iter().filter(|t| t.inserts()).count() as u8;
        self.instruction().reladdr_mask >> inserted
    }
}

/// An assembler instruction.
pub struct AssemblerInstruction {
    pub name: &'static str,
    pub min_operands: usize,
    /// `None`: no upper bound.
    pub max_operands: Option<usize>,
    /// May its operands reference ordinary symbols?
    pub has_ordinary_symbols: bool,
    pub description: &'static str,
}

/// A conditional-assembly instruction.
pub struct CaInstruction {
    pub name: &'static str,
    pub opless: bool,
}

/// Any instruction table entry.
#[derive(Copy, Clone)]
pub enum OpcodeEntry {
    Machine(&'static MachineInstruction),
    Mnemonic(&'static MnemonicCode),
    Assembler(&'static AssemblerInstruction),
    Ca(&'static CaInstruction),
}

pub fn get_machine(name: &str) -> Option<&'static MachineInstruction> {
    MACHINE_INSTRUCTIONS
        .binary_search_by_key(&name, |i| i.name)
        .ok()
        .map(|i| &MACHINE_INSTRUCTIONS[i])
}

pub fn get_mnemonic(name: &str) -> Option<&'static MnemonicCode> {
    MNEMONIC_CODES
        .binary_search_by_key(&name, |m| m.name)
        .ok()
        .map(|i| &MNEMONIC_CODES[i])
}

pub fn get_assembler(name: &str) -> Option<&'static AssemblerInstruction> {
    ASSEMBLER_INSTRUCTIONS
        .binary_search_by_key(&name, |a| a.name)
        .ok()
        .map(|i| &ASSEMBLER_INSTRUCTIONS[i])
}

pub fn get_ca(name: &str) -> Option<&'static CaInstruction> {
    CA_INSTRUCTIONS
        .binary_search_by_key(&name, |c| c.name)
        .ok()
        .map(|i| &CA_INSTRUCTIONS[i])
}

/// Look an opcode up across all tables; machine names win over mnemonics.
pub fn find_opcode(name: &str) -> Option<OpcodeEntry> {
    if let Some(m) = get_machine(name) {
        return Some(OpcodeEntry::Machine(m));
    }
    if let Some(m) = get_mnemonic(name) {
        return Some(OpcodeEntry::Mnemonic(m));
    }
    if let Some(a) = get_assembler(name) {
        return Some(OpcodeEntry::Assembler(a));
    }
    get_ca(name).map(OpcodeEntry::Ca)
}

/// The `O'` attribute of an opcode name.
pub fn opcode_attr(name: &str) -> Option<char> {
    match find_opcode(name)? {
        OpcodeEntry::Machine(_) => Some('O'),
        OpcodeEntry::Mnemonic(_) => Some('E'),
        OpcodeEntry::Assembler(_) | OpcodeEntry::Ca(_) => Some('A'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_sorted() {
        assert!(MACHINE_INSTRUCTIONS.windows(2).all(|w| w[0].name < w[1].name));
        assert!(MNEMONIC_CODES.windows(2).all(|w| w[0].name < w[1].name));
        assert!(ASSEMBLER_INSTRUCTIONS
            .windows(2)
            .all(|w| w[0].name < w[1].name));
        assert!(CA_INSTRUCTIONS.windows(2).all(|w| w[0].name < w[1].name));
    }

    #[test]
    fn mnemonic_parents_exist() {
        for m in MNEMONIC_CODES {
            assert!(
                get_machine(m.parent).is_some(),
                "missing parent {} of {}",
                m.parent,
                m.name
            );
        }
    }

    #[test]
    fn lookup() {
        assert_eq!(get_machine("LA").unwrap().size_bytes(), 4);
        assert_eq!(get_machine("LAY").unwrap().size_bytes(), 6);
        assert!(get_machine("LAY").unwrap().operands[1].is_long_displacement());
        assert_eq!(get_mnemonic("B").unwrap().parent, "BC");
        assert!(get_assembler("CSECT").is_some());
        assert!(get_ca("MEND").unwrap().opless);
        assert!(find_opcode("NOSUCH").is_none());
    }

    #[test]
    fn reladdr_masks() {
        assert_eq!(get_machine("LARL").unwrap().reladdr_mask, 0b10);
        // J inserts the mask operand, shifting the target to position 0.
        assert_eq!(get_mnemonic("J").unwrap().reladdr_mask(), 0b01);
    }

    #[test]
    fn param_bounds() {
        let (lo, hi) = Param::new(OperandKind::Disp, 12, false).bounds();
        assert_eq!((lo, hi), (0, 4095));
        let (lo, hi) = Param::new(OperandKind::Disp, 20, true).bounds();
        assert_eq!((lo, hi), (-524288, 524287));
        let (lo, hi) = Param::new(OperandKind::Imm, 16, true).bounds();
        assert_eq!((lo, hi), (-32768, 32767));
    }

    #[test]
    fn opcode_attrs() {
        assert_eq!(opcode_attr("LR"), Some('O'));
        assert_eq!(opcode_attr("B"), Some('E'));
        assert_eq!(opcode_attr("DC"), Some('A'));
        assert_eq!(opcode_attr("XYZZY"), None);
    }
}
