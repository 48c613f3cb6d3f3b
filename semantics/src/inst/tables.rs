//! The instruction table data.
//!
//! A representative subset of the z/Architecture general instructions plus
//! the assembler and conditional-assembly statements the analyzer
//! understands. All arrays are sorted by name for binary search.

use super::*;

const Z_SINCE_ZOP: u32 = InstructionSet::ZOP.bits()
    | InstructionSet::YOP.bits()
    | InstructionSet::Z9.bits()
    | InstructionSet::Z10.bits()
    | InstructionSet::Z11.bits()
    | InstructionSet::Z12.bits()
    | InstructionSet::Z13.bits()
    | InstructionSet::Z14.bits()
    | InstructionSet::Z15.bits()
    | InstructionSet::Z16.bits()
    | InstructionSet::Z17.bits();

const UNI_SINCE_ZOP: InstructionSet =
    InstructionSet::from_bits_retain(InstructionSet::UNI.bits() | Z_SINCE_ZOP);

const UNI_ESA_XA_370_DOS_SINCE_ZOP: InstructionSet = InstructionSet::from_bits_retain(
    InstructionSet::UNI.bits()
        | InstructionSet::ESA.bits()
        | InstructionSet::XA.bits()
        | InstructionSet::S370.bits()
        | InstructionSet::DOS.bits()
        | Z_SINCE_ZOP,
);

const UNI_ESA_SINCE_ZOP: InstructionSet = InstructionSet::from_bits_retain(
    InstructionSet::UNI.bits() | InstructionSet::ESA.bits() | Z_SINCE_ZOP,
);

macro_rules! mach {
    ($name:literal, $format:ident, [$($op:expr),*], reladdr = $mask:expr, $arch:expr) => {
        MachineInstruction {
            name: $name,
            format: MachFormat::$format,
            operands: &[$($op),*],
            optional_operands: 0,
            reladdr_mask: $mask,
            arch: $arch,
            privileged: false,
            sets_cc: false,
        }
    };
    ($name:literal, $format:ident, [$($op:expr),*], $arch:expr) => {
        mach!($name, $format, [$($op),*], reladdr = 0, $arch)
    };
}

/// Machine instructions, sorted by name.
pub static MACHINE_INSTRUCTIONS: &[MachineInstruction] = &[
    mach!("A", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("AHI", RiA, [REG_4_U, IMM_16_S], UNI_ESA_SINCE_ZOP),
    mach!("AR", RR, [REG_4_U, REG_4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("BAL", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("BALR", RR, [REG_4_U, REG_4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("BC", RxA, [MASK_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("BCR", RR, [MASK_4_U, REG_4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("BRAS", RiB, [REG_4_U, RELOC_IMM_16_S], reladdr = 0b10, UNI_ESA_SINCE_ZOP),
    mach!("BRASL", RilB, [REG_4_U, RELOC_IMM_32_S], reladdr = 0b10, UNI_ESA_SINCE_ZOP),
    mach!("BRC", RiC, [MASK_4_U, RELOC_IMM_16_S], reladdr = 0b10, UNI_ESA_SINCE_ZOP),
    mach!("BRCL", RilC, [MASK_4_U, RELOC_IMM_32_S], reladdr = 0b10, UNI_ESA_SINCE_ZOP),
    mach!("C", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("CHI", RiA, [REG_4_U, IMM_16_S], UNI_ESA_SINCE_ZOP),
    mach!("CLC", SsA, [DL_12_8X4_U, DB_12_4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("CLI", Si, [DB_12_4_U, IMM_8_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("EX", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("IC", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("L", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("LA", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("LARL", RilB, [REG_4_U, RELOC_IMM_32_S], reladdr = 0b10, UNI_ESA_SINCE_ZOP),
    mach!("LAY", RxyA, [REG_4_U, DXB_20_4X4_S], UNI_SINCE_ZOP),
    mach!("LG", RxyA, [REG_4_U, DXB_20_4X4_S], UNI_SINCE_ZOP),
    mach!("LGR", RRE, [REG_4_U, REG_4_U], UNI_SINCE_ZOP),
    mach!("LH", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("LHI", RiA, [REG_4_U, IMM_16_S], UNI_ESA_SINCE_ZOP),
    mach!("LM", RsA, [REG_4_U, REG_4_U, DB_12_4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("LMG", RsyA, [REG_4_U, REG_4_U, DB_20_4_S], UNI_SINCE_ZOP),
    mach!("LR", RR, [REG_4_U, REG_4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("LT", RxyA, [REG_4_U, DXB_20_4X4_S], UNI_SINCE_ZOP),
    mach!("LTR", RR, [REG_4_U, REG_4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("LY", RxyA, [REG_4_U, DXB_20_4X4_S], UNI_SINCE_ZOP),
    mach!("MVC", SsA, [DL_12_8X4_U, DB_12_4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("MVI", Si, [DB_12_4_U, IMM_8_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("N", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("S", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("SLL", RsA, [REG_4_U, DB_12_4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("SR", RR, [REG_4_U, REG_4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("SRL", RsA, [REG_4_U, DB_12_4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("ST", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("STC", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("STG", RxyA, [REG_4_U, DXB_20_4X4_S], UNI_SINCE_ZOP),
    mach!("STH", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("STM", RsA, [REG_4_U, REG_4_U, DB_12_4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("STMG", RsyA, [REG_4_U, REG_4_U, DB_20_4_S], UNI_SINCE_ZOP),
    mach!("STY", RxyA, [REG_4_U, DXB_20_4X4_S], UNI_SINCE_ZOP),
    mach!("X", RxA, [REG_4_U, DXB_12_4X4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mach!("XC", SsA, [DL_12_8X4_U, DB_12_4_U], UNI_ESA_XA_370_DOS_SINCE_ZOP),
];

macro_rules! mnemo {
    ($name:literal, $parent:literal, mask = $mask:expr, $arch:expr) => {
        MnemonicCode {
            name: $name,
            parent: $parent,
            transforms: &[MnemonicTransform::insert(0, $mask)],
            arch: $arch,
        }
    };
}

/// Extended mnemonics, sorted by name. The branch family inserts the
/// condition mask as the first operand of the parent instruction.
pub static MNEMONIC_CODES: &[MnemonicCode] = &[
    mnemo!("B", "BC", mask = 15, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("BE", "BC", mask = 8, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("BH", "BC", mask = 2, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("BL", "BC", mask = 4, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("BM", "BC", mask = 4, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("BNE", "BC", mask = 7, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("BNH", "BC", mask = 13, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("BNL", "BC", mask = 11, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("BNZ", "BC", mask = 7, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("BO", "BC", mask = 1, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("BP", "BC", mask = 2, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("BR", "BCR", mask = 15, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("BZ", "BC", mask = 8, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("J", "BRC", mask = 15, UNI_ESA_SINCE_ZOP),
    mnemo!("JE", "BRC", mask = 8, UNI_ESA_SINCE_ZOP),
    mnemo!("JH", "BRC", mask = 2, UNI_ESA_SINCE_ZOP),
    mnemo!("JL", "BRC", mask = 4, UNI_ESA_SINCE_ZOP),
    mnemo!("JNE", "BRC", mask = 7, UNI_ESA_SINCE_ZOP),
    mnemo!("JNOP", "BRC", mask = 0, UNI_ESA_SINCE_ZOP),
    mnemo!("NOP", "BC", mask = 0, UNI_ESA_XA_370_DOS_SINCE_ZOP),
    mnemo!("NOPR", "BCR", mask = 0, UNI_ESA_XA_370_DOS_SINCE_ZOP),
];

macro_rules! asm {
    ($name:literal, $min:expr, $max:expr, ord = $ord:expr, $desc:literal) => {
        AssemblerInstruction {
            name: $name,
            min_operands: $min,
            max_operands: $max,
            has_ordinary_symbols: $ord,
            description: $desc,
        }
    };
}

/// Assembler instructions, sorted by name.
pub static ASSEMBLER_INSTRUCTIONS: &[AssemblerInstruction] = &[
    asm!("COM", 0, Some(0), ord = false, "identifies common control section"),
    asm!("CSECT", 0, Some(0), ord = false, "starts or continues a control section"),
    asm!("DC", 1, None, ord = true, "defines constants"),
    asm!("DROP", 0, Some(16), ord = true, "ends base register assignments"),
    asm!("DS", 1, None, ord = true, "defines storage"),
    asm!("DSECT", 0, Some(0), ord = false, "starts or continues a dummy section"),
    asm!("EJECT", 0, Some(0), ord = false, "starts a new listing page"),
    asm!("END", 0, Some(2), ord = true, "ends the assembly"),
    asm!("ENTRY", 1, None, ord = true, "identifies entry point symbols"),
    asm!("EQU", 1, Some(5), ord = true, "equates a symbol to a value"),
    asm!("EXTRN", 1, None, ord = false, "identifies external symbols"),
    asm!("LOCTR", 0, Some(0), ord = false, "switches to a named location counter"),
    asm!("LTORG", 0, Some(0), ord = false, "generates the pending literal pool"),
    asm!("ORG", 0, Some(3), ord = true, "sets the location counter"),
    asm!("PRINT", 1, None, ord = false, "controls listing detail"),
    asm!("RSECT", 0, Some(0), ord = false, "starts a read-only control section"),
    asm!("SPACE", 0, Some(1), ord = false, "inserts blank listing lines"),
    asm!("START", 0, Some(1), ord = true, "starts the first control section"),
    asm!("TITLE", 1, Some(1), ord = false, "sets the listing title"),
    asm!("USING", 2, Some(17), ord = true, "assigns base registers"),
    asm!("WXTRN", 1, None, ord = false, "identifies weak external symbols"),
];

macro_rules! ca {
    ($name:literal) => {
        CaInstruction {
            name: $name,
            opless: false,
        }
    };
    ($name:literal, opless) => {
        CaInstruction {
            name: $name,
            opless: true,
        }
    };
}

/// Conditional-assembly instructions, sorted by name.
pub static CA_INSTRUCTIONS: &[CaInstruction] = &[
    ca!("ACTR"),
    ca!("AGO"),
    ca!("AIF"),
    ca!("ANOP", opless),
    ca!("AREAD"),
    ca!("GBLA"),
    ca!("GBLB"),
    ca!("GBLC"),
    ca!("LCLA"),
    ca!("LCLB"),
    ca!("LCLC"),
    ca!("MACRO", opless),
    ca!("MEND", opless),
    ca!("MEXIT", opless),
    ca!("MHELP"),
    ca!("MNOTE"),
    ca!("SETA"),
    ca!("SETB"),
    ca!("SETC"),
];
