//! Ordinary symbols: values and attributes.

use crate::context::address::Address;
use crate::context::space::Spaces;
use crate::diagnostic::Range;
use crate::ids::IdIndex;

/// Value of an ordinary symbol: undefined, absolute, or relocatable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SymbolValue {
    #[default]
    Undef,
    Abs(i32),
    Reloc(Address),
}

/// Discriminant of [`SymbolValue`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SymbolValueKind {
    Undef,
    Abs,
    Reloc,
}

impl SymbolValue {
    pub fn kind(&self) -> SymbolValueKind {
        match self {
            SymbolValue::Undef => SymbolValueKind::Undef,
            SymbolValue::Abs(_) => SymbolValueKind::Abs,
            SymbolValue::Reloc(_) => SymbolValueKind::Reloc,
        }
    }

    pub fn as_abs(&self) -> Option<i32> {
        match self {
            SymbolValue::Abs(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_reloc(&self) -> Option<&Address> {
        match self {
            SymbolValue::Reloc(a) => Some(a),
            _ => None,
        }
    }

    /// Wrap a relocatable result, collapsing to absolute when all bases
    /// cancelled and no unresolved space remains.
    fn from_reloc(addr: Address, spaces: &Spaces) -> SymbolValue {
        if addr.is_absolute() && !addr.has_unresolved_space(spaces) {
            SymbolValue::Abs(addr.offset(spaces))
        } else {
            SymbolValue::Reloc(addr)
        }
    }

    pub fn add(&self, other: &SymbolValue, spaces: &Spaces) -> SymbolValue {
        use SymbolValue::*;
        match (self, other) {
            (Undef, _) | (_, Undef) => Undef,
            (Abs(l), Abs(r)) => Abs(l.wrapping_add(*r)),
            (Abs(l), Reloc(r)) => Reloc(r.add_offset(*l)),
            (Reloc(l), Abs(r)) => Reloc(l.add_offset(*r)),
            (Reloc(l), Reloc(r)) => Self::from_reloc(l.add(r, spaces), spaces),
        }
    }

    pub fn sub(&self, other: &SymbolValue, spaces: &Spaces) -> SymbolValue {
        use SymbolValue::*;
        match (self, other) {
            (Undef, _) | (_, Undef) => Undef,
            (Abs(l), Abs(r)) => Abs(l.wrapping_sub(*r)),
            (Abs(l), Reloc(r)) => Self::from_reloc(r.negated(spaces).add_offset(*l), spaces),
            (Reloc(l), Abs(r)) => Reloc(l.add_offset(-*r)),
            (Reloc(l), Reloc(r)) => Self::from_reloc(l.sub(r, spaces), spaces),
        }
    }

    /// Multiplication; defined for absolute operands only, anything else
    /// yields `Undef` (the caller diagnoses).
    pub fn mul(&self, other: &SymbolValue) -> SymbolValue {
        match (self, other) {
            (SymbolValue::Abs(l), SymbolValue::Abs(r)) => SymbolValue::Abs(l.wrapping_mul(*r)),
            _ => SymbolValue::Undef,
        }
    }

    /// Division; division by zero yields 0 by HLASM rules.
    pub fn div(&self, other: &SymbolValue) -> SymbolValue {
        match (self, other) {
            (SymbolValue::Abs(_), SymbolValue::Abs(0)) => SymbolValue::Abs(0),
            (SymbolValue::Abs(l), SymbolValue::Abs(r)) => SymbolValue::Abs(l.wrapping_div(*r)),
            _ => SymbolValue::Undef,
        }
    }

    pub fn neg(&self, spaces: &Spaces) -> SymbolValue {
        match self {
            SymbolValue::Undef => SymbolValue::Undef,
            SymbolValue::Abs(v) => SymbolValue::Abs(v.wrapping_neg()),
            SymbolValue::Reloc(a) => SymbolValue::Reloc(a.negated(spaces)),
        }
    }

    /// Drop USING qualifiers from a relocatable value, collapsing to
    /// absolute when the merged bases cancel out.
    pub fn ignore_qualification(&self, spaces: &Spaces) -> SymbolValue {
        match self {
            SymbolValue::Reloc(addr) => Self::from_reloc(addr.without_qualifiers(spaces), spaces),
            other => other.clone(),
        }
    }
}

/// Data attribute selectors.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum DataAttrKind {
    T,
    L,
    S,
    I,
    K,
    N,
    D,
    O,
}

impl DataAttrKind {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'T' => Some(Self::T),
            'L' => Some(Self::L),
            'S' => Some(Self::S),
            'I' => Some(Self::I),
            'K' => Some(Self::K),
            'N' => Some(Self::N),
            'D' => Some(Self::D),
            'O' => Some(Self::O),
            _ => None,
        }
    }

    /// The value an attribute query reports while the attribute is
    /// undefined.
    pub fn default_value(self) -> i32 {
        match self {
            DataAttrKind::T => SymbolAttributes::UNDEF_TYPE as i32,
            DataAttrKind::L => 1,
            _ => 0,
        }
    }
}

/// How a symbol came to exist.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SymbolOrigin {
    Section,
    Machine,
    Equate,
    Data,
    Asm,
    Unknown,
}

/// Program type attribute: four EBCDIC bytes, or absent.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct ProgramType(pub Option<u32>);

/// Assembler type attribute (AINSERT-era register typing).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum AssemblerType {
    #[default]
    None,
    Ar,
    Cr,
    Cr32,
    Cr64,
    Fpr,
    Gr,
    Gr32,
    Gr64,
    Vr,
}

/// Convert an uppercase ASCII letter or digit to its EBCDIC code point,
/// which is what the `T'` attribute reports.
pub fn ebcdic(c: char) -> u16 {
    match c {
        'A'..='I' => 0xC1 + (c as u16 - 'A' as u16),
        'J'..='R' => 0xD1 + (c as u16 - 'J' as u16),
        'S'..='Z' => 0xE2 + (c as u16 - 'S' as u16),
        '0'..='9' => 0xF0 + (c as u16 - '0' as u16),
        '@' => 0x7C,
        '#' => 0x7B,
        '$' => 0x5B,
        '_' => 0x6D,
        _ => 0x40,
    }
}

/// Attributes of an ordinary symbol.
///
/// Fields are constant once set; `length` and `scale` may start undefined
/// and be supplied later, exactly once, independently of the value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SymbolAttributes {
    origin: SymbolOrigin,
    type_: u16,
    length: u32,
    scale: i16,
    integer: u32,
    prog_type: ProgramType,
    asm_type: AssemblerType,
}

impl SymbolAttributes {
    pub const UNDEF_TYPE: u16 = 0xE4; // EBCDIC 'U'
    pub const UNDEF_LENGTH: u32 = u32::MAX;
    pub const UNDEF_SCALE: i16 = i16::MAX;

    pub fn new(origin: SymbolOrigin, type_: u16, length: u32, scale: i16, integer: u32) -> Self {
        Self {
            origin,
            type_,
            length,
            scale,
            integer,
            prog_type: ProgramType::default(),
            asm_type: AssemblerType::default(),
        }
    }

    pub fn undefined(origin: SymbolOrigin) -> Self {
        Self::new(
            origin,
            Self::UNDEF_TYPE,
            Self::UNDEF_LENGTH,
            Self::UNDEF_SCALE,
            Self::UNDEF_LENGTH,
        )
    }

    /// CSECT/DSECT/COM definition symbols: `T'J'`, length 1.
    pub fn section() -> Self {
        Self::new(
            SymbolOrigin::Section,
            ebcdic('J'),
            1,
            Self::UNDEF_SCALE,
            Self::UNDEF_LENGTH,
        )
    }

    /// Machine instruction labels: `T'I'`, length of the instruction.
    pub fn machine(length: u32) -> Self {
        Self::new(
            SymbolOrigin::Machine,
            ebcdic('I'),
            length,
            Self::UNDEF_SCALE,
            Self::UNDEF_LENGTH,
        )
    }

    /// EXTRN/WXTRN symbols: `T'T'`, length 1.
    pub fn external() -> Self {
        Self::new(
            SymbolOrigin::Section,
            ebcdic('T'),
            1,
            Self::UNDEF_SCALE,
            Self::UNDEF_LENGTH,
        )
    }

    /// ORG and LOCTR labels: type undefined.
    pub fn org() -> Self {
        Self::undefined(SymbolOrigin::Section)
    }

    pub fn origin(&self) -> SymbolOrigin {
        self.origin
    }

    pub fn type_attr(&self) -> u16 {
        self.type_
    }

    pub fn length(&self) -> u32 {
        if self.length == Self::UNDEF_LENGTH {
            1
        } else {
            self.length
        }
    }

    pub fn scale(&self) -> i16 {
        if self.scale == Self::UNDEF_SCALE {
            0
        } else {
            self.scale
        }
    }

    pub fn integer(&self) -> u32 {
        if self.integer == Self::UNDEF_LENGTH {
            0
        } else {
            self.integer
        }
    }

    pub fn prog_type(&self) -> ProgramType {
        self.prog_type
    }

    pub fn asm_type(&self) -> AssemblerType {
        self.asm_type
    }

    pub fn is_defined(&self, attr: DataAttrKind) -> bool {
        match attr {
            DataAttrKind::L => self.length != Self::UNDEF_LENGTH,
            DataAttrKind::S => self.scale != Self::UNDEF_SCALE,
            DataAttrKind::I => {
                self.scale != Self::UNDEF_SCALE && self.length != Self::UNDEF_LENGTH
            }
            // T always reads something, and K/N/D/O are derivable the
            // moment the symbol entry exists; treating them as pending
            // would postpone statements that are evaluable right away.
            DataAttrKind::T
            | DataAttrKind::K
            | DataAttrKind::N
            | DataAttrKind::D
            | DataAttrKind::O => true,
        }
    }

    /// Only data symbols of the fixed/float/decimal types carry meaningful
    /// scale and integer attributes.
    pub fn can_have_si_attr(&self) -> bool {
        self.origin == SymbolOrigin::Data
            && "DEFGHKLPZ"
                .chars()
                .any(|c| ebcdic(c) == self.type_)
    }

    pub fn get_attribute_value(&self, attr: DataAttrKind) -> i32 {
        match attr {
            DataAttrKind::T => self.type_ as i32,
            DataAttrKind::L => self.length() as i32,
            DataAttrKind::S => self.scale() as i32,
            DataAttrKind::I => self.integer() as i32,
            // These attributes exist, so the symbol is defined.
            DataAttrKind::D => 1,
            DataAttrKind::K | DataAttrKind::N | DataAttrKind::O => 0,
        }
    }

    /// Set the length attribute; only legal while it is undefined.
    pub fn set_length(&mut self, value: u32) {
        debug_assert_eq!(self.length, Self::UNDEF_LENGTH, "length assigned twice");
        if self.length == Self::UNDEF_LENGTH {
            self.length = value;
        }
    }

    /// Set the scale attribute; only legal while it is undefined.
    pub fn set_scale(&mut self, value: i16) {
        debug_assert_eq!(self.scale, Self::UNDEF_SCALE, "scale assigned twice");
        if self.scale == Self::UNDEF_SCALE {
            self.scale = value;
        }
    }

    pub fn with_prog_type(mut self, prog_type: ProgramType) -> Self {
        self.prog_type = prog_type;
        self
    }

    pub fn with_asm_type(mut self, asm_type: AssemblerType) -> Self {
        self.asm_type = asm_type;
        self
    }
}

/// An ordinary symbol.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: IdIndex,
    value: SymbolValue,
    attributes: SymbolAttributes,
    /// Definition site, used by the front-end queries.
    pub location: Range,
}

impl Symbol {
    pub fn new(
        name: IdIndex,
        value: SymbolValue,
        attributes: SymbolAttributes,
        location: Range,
    ) -> Self {
        Self {
            name,
            value,
            attributes,
            location,
        }
    }

    pub fn value(&self) -> &SymbolValue {
        &self.value
    }

    pub fn attributes(&self) -> &SymbolAttributes {
        &self.attributes
    }

    pub fn kind(&self) -> SymbolValueKind {
        self.value.kind()
    }

    /// Transition the value out of `Undef`; once set it never changes.
    pub fn set_value(&mut self, value: SymbolValue) {
        debug_assert!(
            self.value.kind() == SymbolValueKind::Undef,
            "symbol value assigned twice"
        );
        debug_assert!(value.kind() != SymbolValueKind::Undef);
        if self.value.kind() == SymbolValueKind::Undef {
            self.value = value;
        }
    }

    pub fn set_length(&mut self, value: u32) {
        self.attributes.set_length(value);
    }

    pub fn set_scale(&mut self, value: i16) {
        self.attributes.set_scale(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::address::Base;
    use crate::context::section::SectionId;
    use hlasm_entity::EntityRef;

    fn reloc(section: usize, offset: i32, spaces: &Spaces) -> SymbolValue {
        SymbolValue::Reloc(Address::new(
            Base::unqualified(SectionId::new(section)),
            offset,
            &[],
            spaces,
        ))
    }

    #[test]
    fn undef_propagates() {
        let spaces = Spaces::new();
        let u = SymbolValue::Undef;
        let a = SymbolValue::Abs(4);
        assert_eq!(u.add(&a, &spaces), SymbolValue::Undef);
        assert_eq!(a.mul(&u), SymbolValue::Undef);
    }

    #[test]
    fn reloc_minus_reloc_collapses() {
        let spaces = Spaces::new();
        let a = reloc(0, 10, &spaces);
        let b = reloc(0, 4, &spaces);
        assert_eq!(a.sub(&b, &spaces), SymbolValue::Abs(6));

        let c = reloc(1, 0, &spaces);
        assert!(matches!(a.sub(&c, &spaces), SymbolValue::Reloc(_)));
    }

    #[test]
    fn division_by_zero_is_zero() {
        assert_eq!(
            SymbolValue::Abs(17).div(&SymbolValue::Abs(0)),
            SymbolValue::Abs(0)
        );
        assert_eq!(
            SymbolValue::Abs(17).div(&SymbolValue::Abs(5)),
            SymbolValue::Abs(3)
        );
    }

    #[test]
    fn attribute_defaults_and_one_shot_setters() {
        let mut attrs = SymbolAttributes::undefined(SymbolOrigin::Equate);
        assert!(!attrs.is_defined(DataAttrKind::L));
        assert_eq!(attrs.get_attribute_value(DataAttrKind::L), 1);
        assert_eq!(attrs.get_attribute_value(DataAttrKind::T), 0xE4);

        attrs.set_length(8);
        assert!(attrs.is_defined(DataAttrKind::L));
        assert_eq!(attrs.get_attribute_value(DataAttrKind::L), 8);
    }

    #[test]
    fn value_set_once() {
        let spaces = Spaces::new();
        let mut sym = Symbol::new(
            IdIndex::EMPTY,
            SymbolValue::Undef,
            SymbolAttributes::undefined(SymbolOrigin::Unknown),
            Range::default(),
        );
        assert_eq!(sym.kind(), SymbolValueKind::Undef);
        sym.set_value(reloc(0, 2, &spaces));
        assert_eq!(sym.kind(), SymbolValueKind::Reloc);
    }

    #[test]
    fn ebcdic_letters() {
        assert_eq!(ebcdic('U'), 0xE4);
        assert_eq!(ebcdic('J'), 0xD1);
        assert_eq!(ebcdic('I'), 0xC9);
        assert_eq!(ebcdic('T'), 0xE3);
        assert_eq!(ebcdic('0'), 0xF0);
    }
}
