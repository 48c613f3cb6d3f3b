//! DC/DS data definitions.
//!
//! A data definition is `[dup]T[x][L[.]n][Ss][Ee]['nominal'|(nominal,…)]`:
//! an optional duplication factor, a type with optional extension, length
//! (byte or bit) / scale / exponent modifiers, and a nominal value. Two
//! concerns live here: the layout-relevant semantics (byte lengths,
//! alignments, and the T/L/S/I attributes a definition induces) and the
//! validation of the modifier and nominal values ([`DataDefinition::check`],
//! the D-family diagnostics). No object bytes are produced.

use crate::context::dependency::{DependencyCollector, DependencySolver};
use crate::context::space::{Alignment, DOUBLEWORD, FULLWORD, HALFWORD, NO_ALIGN};
use crate::context::symbol::{ebcdic, SymbolAttributes, SymbolOrigin, SymbolValue};
use crate::diagnostic::{self, DiagnosticConsumer, Range};
use crate::expr::{MachExpr, MachExprKind};

/// One item of a parenthesized nominal list. S-type constants allow the
/// explicit base form `D(B)`; everything else carries a bare expression.
#[derive(Clone, Debug)]
pub struct NominalItem {
    pub expr: MachExpr,
    pub base: Option<MachExpr>,
}

impl NominalItem {
    pub fn plain(expr: MachExpr) -> Self {
        Self { expr, base: None }
    }
}

/// Nominal value of a data definition.
#[derive(Clone, Debug)]
pub enum Nominal {
    /// Quoted form, e.g. `C'TEXT'` or `X'1F'`.
    String(String),
    /// Parenthesized list, e.g. `A(LABEL,*+4)` or `S(40(5))`.
    Exprs(Vec<NominalItem>),
}

/// A parsed data definition.
#[derive(Clone, Debug)]
pub struct DataDefinition {
    pub dup_factor: Option<Box<MachExpr>>,
    pub type_: char,
    pub extension: Option<char>,
    pub length: Option<Box<MachExpr>>,
    /// The `L.n` bit-length form of the length modifier.
    pub length_in_bits: bool,
    pub scale: Option<i16>,
    pub exponent: Option<i32>,
    pub nominal: Option<Nominal>,
    pub range: Range,
}

/// Which nominal form a type takes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum NominalKind {
    String,
    Exprs,
}

impl DataDefinition {
    /// Is the type character one this analyzer understands?
    pub fn known_type(c: char) -> bool {
        matches!(
            c.to_ascii_uppercase(),
            'A' | 'B' | 'C' | 'D' | 'E' | 'F' | 'G' | 'H' | 'J' | 'L' | 'P' | 'R' | 'S' | 'V'
                | 'X' | 'Y' | 'Z'
        )
    }

    fn type_char(&self) -> char {
        self.type_.to_ascii_uppercase()
    }

    fn ext_char(&self) -> Option<char> {
        self.extension.map(|c| c.to_ascii_uppercase())
    }

    /// Extensions the assembler accepts per type.
    pub fn known_extension(type_: char, ext: char) -> bool {
        let ext = ext.to_ascii_uppercase();
        match type_.to_ascii_uppercase() {
            'C' => matches!(ext, 'A' | 'E' | 'U'),
            'E' | 'D' => matches!(ext, 'B' | 'D' | 'H'),
            'L' => matches!(ext, 'B' | 'D' | 'Q'),
            'F' | 'A' | 'R' | 'H' => ext == 'D',
            'S' => ext == 'Y',
            _ => false,
        }
    }

    /// Type name as written, for diagnostics (`C`, `CU`, `RD`, …).
    fn type_display(&self) -> String {
        match self.ext_char() {
            Some(e) => format!("{}{}", self.type_char(), e),
            None => self.type_char().to_string(),
        }
    }

    fn is_doubleword_ext(&self) -> bool {
        matches!(self.type_char(), 'F' | 'A' | 'E' | 'H' | 'R') && self.ext_char() == Some('D')
    }

    /// Implicit alignment of the type; an explicit length modifier turns
    /// alignment off.
    pub fn alignment(&self) -> Alignment {
        if self.length.is_some() {
            return NO_ALIGN;
        }
        if self.is_doubleword_ext() {
            return DOUBLEWORD;
        }
        match self.type_char() {
            'H' | 'Y' | 'S' => HALFWORD,
            'F' | 'E' | 'A' | 'V' | 'J' | 'R' => FULLWORD,
            'D' | 'L' => DOUBLEWORD,
            _ => NO_ALIGN,
        }
    }

    /// Byte length of one nominal item without an explicit length
    /// modifier.
    fn implicit_item_length(&self) -> u32 {
        if self.is_doubleword_ext() {
            return 8;
        }
        match self.type_char() {
            'B' => match self.first_string() {
                Some(s) => {
                    let bits = s.chars().filter(|c| !c.is_whitespace()).count() as u32;
                    bits.div_ceil(8).max(1)
                }
                None => 1,
            },
            'C' => self
                .first_string()
                .map(|s| s.chars().count() as u32)
                .unwrap_or(1)
                .max(1),
            'G' => self
                .first_string()
                .map(|s| 2 * s.chars().count() as u32)
                .unwrap_or(2)
                .max(2),
            'X' => match self.first_string() {
                Some(s) => {
                    let digits = s.chars().filter(|c| !c.is_whitespace()).count() as u32;
                    digits.div_ceil(2).max(1)
                }
                None => 1,
            },
            'P' => match self.first_string() {
                Some(s) => {
                    let digits = s.chars().filter(|c| c.is_ascii_digit()).count() as u32;
                    digits / 2 + 1
                }
                None => 1,
            },
            'Z' => self
                .first_string()
                .map(|s| s.chars().filter(|c| c.is_ascii_digit()).count() as u32)
                .unwrap_or(1)
                .max(1),
            'H' | 'Y' | 'S' => 2,
            'F' | 'E' | 'A' | 'V' | 'J' | 'R' => 4,
            'D' => 8,
            'L' => 16,
            _ => 1,
        }
    }

    fn first_string(&self) -> Option<&str> {
        match &self.nominal {
            Some(Nominal::String(s)) => s.split(',').next(),
            _ => None,
        }
    }

    fn nominal_item_count(&self) -> u32 {
        match &self.nominal {
            None => 1,
            Some(Nominal::Exprs(list)) => list.len().max(1) as u32,
            Some(Nominal::String(s)) => match self.type_char() {
                // A quoted nominal is a list for the numeric types.
                'F' | 'H' | 'D' | 'E' | 'L' | 'P' | 'Z' | 'Y' => {
                    s.split(',').count().max(1) as u32
                }
                _ => 1,
            },
        }
    }

    /// The explicit length modifier in bytes, when present and absolute.
    fn explicit_length(&self, solver: &mut dyn DependencySolver) -> Option<i64> {
        let expr = self.length.as_deref()?;
        let v = {
            let mut sink = diagnostic::DropDiagnostics;
            expr.evaluate(solver, &mut sink).as_abs()? as i64
        };
        Some(if self.length_in_bits {
            (v + 7).div_euclid(8)
        } else {
            v
        })
    }

    /// The `L'` attribute of the definition: the explicit length modifier
    /// if present and usable, otherwise the implicit length of the first
    /// item. Validation happens in [`Self::check`]; this clamps.
    pub fn length_attribute(&self, solver: &mut dyn DependencySolver) -> u32 {
        match self.explicit_length(solver) {
            Some(v) if v >= 0 => v.min(u32::MAX as i64) as u32,
            _ => self.implicit_item_length(),
        }
    }

    /// The `S'` attribute: explicit scale modifier or 0.
    pub fn scale_attribute(&self) -> i16 {
        self.scale.unwrap_or(0)
    }

    /// The `I'` attribute derived from length and scale.
    pub fn integer_attribute(&self, length: u32, scale: i16) -> u32 {
        let l = length as i64;
        let s = scale as i64;
        let i = match self.type_char() {
            'F' | 'H' => 8 * l - s - 1,
            'P' => 2 * l - s - 1,
            'Z' => l - s,
            'D' | 'E' | 'L' => 2 * (l - 1) - s,
            _ => 0,
        };
        i.max(0) as u32
    }

    /// Symbol attributes a DC/DS with this definition gives its label or
    /// literal.
    pub fn attributes(&self, solver: &mut dyn DependencySolver) -> SymbolAttributes {
        let length = self.length_attribute(solver);
        let scale = self.scale_attribute();
        SymbolAttributes::new(
            SymbolOrigin::Data,
            ebcdic(self.type_char()),
            length,
            scale,
            self.integer_attribute(length, scale),
        )
    }

    /// Total storage the definition occupies:
    /// `dup × items × item_length`. Validation happens in [`Self::check`];
    /// this clamps.
    pub fn total_length(&self, solver: &mut dyn DependencySolver) -> i32 {
        let dup = match &self.dup_factor {
            None => 1,
            Some(expr) => {
                let mut sink = diagnostic::DropDiagnostics;
                match expr.evaluate(solver, &mut sink).as_abs() {
                    Some(v) if v >= 0 => v,
                    _ => 1,
                }
            }
        };
        let item = self.length_attribute(solver) as i64;
        let total = dup as i64 * item * self.nominal_item_count() as i64;
        total.clamp(0, i32::MAX as i64) as i32
    }

    /// Dependencies that must resolve before the *size* of the definition
    /// is known: the duplication factor and the length modifier.
    pub fn get_length_dependencies(
        &self,
        solver: &mut dyn DependencySolver,
    ) -> DependencyCollector {
        let mut deps = DependencyCollector::new();
        if let Some(dup) = &self.dup_factor {
            deps = deps.merge(dup.get_dependencies(solver), solver.spaces());
        }
        if let Some(length) = &self.length {
            deps = deps.merge(length.get_dependencies(solver), solver.spaces());
        }
        deps
    }

    /// All dependencies, including the nominal value expressions. V-type
    /// nominals name implicit externals and are not dependencies.
    pub fn get_dependencies(&self, solver: &mut dyn DependencySolver) -> DependencyCollector {
        let mut deps = self.get_length_dependencies(solver);
        if self.type_char() == 'V' {
            return deps;
        }
        if let Some(Nominal::Exprs(list)) = &self.nominal {
            for item in list {
                deps = deps.merge(item.expr.get_dependencies(solver), solver.spaces());
                if let Some(base) = &item.base {
                    deps = deps.merge(base.get_dependencies(solver), solver.spaces());
                }
            }
        }
        deps
    }

    /// Does any part of the definition mention the location counter?
    pub fn references_loctr(&self) -> bool {
        let expr_refs = |e: &Option<Box<MachExpr>>| {
            e.as_deref().map(MachExpr::references_loctr).unwrap_or(false)
        };
        if expr_refs(&self.dup_factor) || expr_refs(&self.length) {
            return true;
        }
        match &self.nominal {
            Some(Nominal::Exprs(list)) => list.iter().any(|item| {
                item.expr.references_loctr()
                    || item.base.as_ref().map(MachExpr::references_loctr).unwrap_or(false)
            }),
            _ => false,
        }
    }

    fn nominal_kind(&self) -> NominalKind {
        match self.type_char() {
            'A' | 'Y' | 'S' | 'V' | 'R' | 'J' => NominalKind::Exprs,
            _ => NominalKind::String,
        }
    }

    /// Inclusive byte-length bounds of the explicit length modifier.
    fn length_bounds(&self, is_ds: bool, reloc_nominal: bool) -> (u32, u32) {
        match self.type_char() {
            'B' | 'C' | 'X' | 'G' => (1, if is_ds { 65535 } else { 256 }),
            'H' | 'F' => (1, 8),
            'E' | 'D' => (1, 8),
            'L' => (1, 16),
            'P' | 'Z' => (1, 16),
            'A' => {
                if reloc_nominal {
                    (2, 4)
                } else {
                    (1, 8)
                }
            }
            'Y' => (1, 2),
            'S' => (2, 2),
            'V' => (3, 4),
            // R and J carry their own diagnostics.
            'R' => (3, 4),
            'J' => (2, 16),
            _ => (1, 65535),
        }
    }

    /// Validate the modifier and nominal values, reporting D-family
    /// diagnostics. Runs once the operand's dependencies are resolved;
    /// unknown types are reported where the definition is first seen and
    /// skipped here.
    pub fn check(
        &self,
        is_ds: bool,
        solver: &mut dyn DependencySolver,
        diags: &mut dyn DiagnosticConsumer,
    ) {
        if !Self::known_type(self.type_) {
            return;
        }
        let type_str = self.type_display();

        if let Some(ext) = self.ext_char() {
            if !Self::known_extension(self.type_char(), ext) {
                diags.add(diagnostic::error_d013(self.range, self.type_char(), ext));
                return;
            }
        }

        self.check_dup_factor(solver, diags);
        self.check_nominal_shape(&type_str, is_ds, diags);
        let reloc_nominal = self.has_reloc_nominal(solver);
        self.check_length(&type_str, is_ds, reloc_nominal, solver, diags);
        self.check_scale(&type_str, diags);

        match self.type_char() {
            'S' => self.check_s_type(&type_str, solver, diags),
            'V' => self.check_v_type(diags),
            'E' | 'D' | 'L' => self.check_float_nominal(&type_str, diags),
            _ => {}
        }
    }

    fn check_dup_factor(
        &self,
        solver: &mut dyn DependencySolver,
        diags: &mut dyn DiagnosticConsumer,
    ) {
        let Some(expr) = self.dup_factor.as_deref() else {
            return;
        };
        let mut sink = diagnostic::DropDiagnostics;
        if let Some(v) = expr.evaluate(solver, &mut sink).as_abs() {
            if v < 0 {
                diags.add(diagnostic::error_d011(expr.range));
            }
        }
    }

    fn check_nominal_shape(
        &self,
        type_str: &str,
        is_ds: bool,
        diags: &mut dyn DiagnosticConsumer,
    ) {
        match (&self.nominal, self.nominal_kind()) {
            (None, _) => {
                // The nominal is checked even with a zero duplication
                // factor; only DS may omit it.
                if !is_ds {
                    diags.add(diagnostic::error_d016(self.range));
                }
            }
            (Some(Nominal::String(_)), NominalKind::Exprs) => {
                diags.add(diagnostic::error_d017(self.range, type_str));
            }
            (Some(Nominal::Exprs(_)), NominalKind::String) => {
                diags.add(diagnostic::error_d018(self.range, type_str));
            }
            (Some(Nominal::Exprs(list)), NominalKind::Exprs) => {
                // The address form D(B) belongs to S-type constants only.
                if self.type_char() != 'S' {
                    for item in list {
                        if let Some(base) = &item.base {
                            diags.add(diagnostic::error_d020(base.range, type_str));
                        }
                    }
                }
            }
            (Some(Nominal::String(_)), NominalKind::String) => {}
        }
    }

    fn has_reloc_nominal(&self, solver: &mut dyn DependencySolver) -> bool {
        let Some(Nominal::Exprs(list)) = &self.nominal else {
            return false;
        };
        let mut sink = diagnostic::DropDiagnostics;
        list.iter().any(|item| {
            matches!(
                item.expr.evaluate(solver, &mut sink),
                SymbolValue::Reloc(_)
            )
        })
    }

    fn check_length(
        &self,
        type_str: &str,
        is_ds: bool,
        reloc_nominal: bool,
        solver: &mut dyn DependencySolver,
        diags: &mut dyn DiagnosticConsumer,
    ) {
        let Some(length_expr) = self.length.as_deref() else {
            return;
        };
        let range = length_expr.range;

        if self.length_in_bits {
            // Unicode character types and address constants with
            // relocatable nominals must be byte-sized.
            let forbids_bits = matches!(self.type_char(), 'G')
                || (self.type_char() == 'C' && self.ext_char() == Some('U'))
                || (self.nominal_kind() == NominalKind::Exprs && reloc_nominal);
            if forbids_bits {
                diags.add(diagnostic::error_d007(range, type_str));
                return;
            }
        }

        let Some(bytes) = self.explicit_length(solver) else {
            // Relocatable or undefined length modifier value.
            let (min, max) = self.length_bounds(is_ds, reloc_nominal);
            diags.add(diagnostic::error_d008(range, type_str, min, max));
            return;
        };

        match self.type_char() {
            'R' => {
                if !(3..=4).contains(&bytes) {
                    diags.add(diagnostic::error_d021(range));
                }
            }
            'J' => {
                if !matches!(bytes, 2 | 4 | 8 | 16) {
                    diags.add(diagnostic::error_d024(range));
                }
            }
            _ => {
                let (min, max) = self.length_bounds(is_ds, reloc_nominal);
                if bytes < min as i64 || bytes > max as i64 {
                    diags.add(diagnostic::error_d008(range, type_str, min, max));
                    return;
                }
                let must_be_even = matches!(self.type_char(), 'G')
                    || (self.type_char() == 'C' && self.ext_char() == Some('U'));
                if must_be_even && !self.length_in_bits && bytes % 2 != 0 {
                    diags.add(diagnostic::error_d014(range, type_str));
                }
            }
        }
    }

    fn check_scale(&self, type_str: &str, diags: &mut dyn DiagnosticConsumer) {
        let Some(scale) = self.scale else { return };
        match self.type_char() {
            'H' | 'F' | 'P' => {}
            'E' | 'D' | 'L' => match self.ext_char() {
                // Hexadecimal floating point takes a scale.
                None | Some('H') => {}
                // Binary and decimal floating point tolerate only 0.
                _ => {
                    if scale == 0 {
                        diags.add(diagnostic::warn_d025(self.range, type_str));
                    } else {
                        diags.add(diagnostic::error_d009(self.range, type_str));
                    }
                }
            },
            _ => diags.add(diagnostic::error_d009(self.range, type_str)),
        }
    }

    /// S-type displacement and base range checking.
    fn check_s_type(
        &self,
        type_str: &str,
        solver: &mut dyn DependencySolver,
        diags: &mut dyn DiagnosticConsumer,
    ) {
        let Some(Nominal::Exprs(list)) = &self.nominal else {
            return;
        };
        let (min_disp, max_disp): (i64, i64) = if self.ext_char() == Some('Y') {
            (-(1 << 19), (1 << 19) - 1)
        } else {
            (0, (1 << 12) - 1)
        };

        let mut sink = diagnostic::DropDiagnostics;
        for item in list {
            if let Some(v) = item.expr.evaluate(solver, &mut sink).as_abs() {
                if (v as i64) < min_disp || (v as i64) > max_disp {
                    diags.add(diagnostic::error_d022(item.expr.range, type_str));
                }
            }
            if let Some(base) = &item.base {
                match base.evaluate(solver, &mut sink).as_abs() {
                    Some(b) if (0..16).contains(&b) => {}
                    _ => diags.add(diagnostic::error_d023(base.range)),
                }
            }
        }
    }

    /// V-type nominals must be plain external symbols.
    fn check_v_type(&self, diags: &mut dyn DiagnosticConsumer) {
        let Some(Nominal::Exprs(list)) = &self.nominal else {
            return;
        };
        for item in list {
            let single_symbol = item.base.is_none()
                && matches!(
                    &item.expr.kind,
                    MachExprKind::Symbol { qualifier, .. } if qualifier.is_empty()
                );
            if !single_symbol {
                diags.add(diagnostic::error_d030(item.expr.range));
            }
        }
    }

    /// Rounding-mode suffix validation on floating-point string nominals
    /// (`456E10R8`-style).
    fn check_float_nominal(&self, type_str: &str, diags: &mut dyn DiagnosticConsumer) {
        let Some(Nominal::String(s)) = &self.nominal else {
            return;
        };
        for item in s.split(',') {
            let Some(mode) = round_mode_suffix(item) else {
                continue;
            };
            let valid = match self.ext_char() {
                // Hexadecimal floating point has no rounding modes.
                None | Some('H') => false,
                Some('B') => matches!(mode, Some(0..=7)),
                Some('D') | Some('Q') => matches!(mode, Some(8..=15)),
                _ => false,
            };
            if !valid {
                diags.add(diagnostic::error_d026(self.range, type_str));
            }
        }
    }
}

/// The `R<digits>` suffix of a floating-point nominal item, if any.
/// `Some(None)` means an `R` with missing or malformed digits.
fn round_mode_suffix(item: &str) -> Option<Option<u32>> {
    let trimmed = item.trim();
    // Special values such as (SNAN) carry no rounding mode.
    if trimmed.starts_with('(')
        || trimmed.starts_with("+(")
        || trimmed.starts_with("-(")
    {
        return None;
    }
    let pos = trimmed
        .char_indices()
        .rev()
        .find(|(_, c)| c.eq_ignore_ascii_case(&'r'))
        .map(|(i, _)| i)?;
    let digits = &trimmed[pos + 1..];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Some(None);
    }
    Some(digits.parse::<u32>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::TestSolver;
    use crate::diagnostic::CollectedDiagnostics;

    fn dd(type_: char, nominal: Option<Nominal>) -> DataDefinition {
        DataDefinition {
            dup_factor: None,
            type_,
            extension: None,
            length: None,
            length_in_bits: false,
            scale: None,
            exponent: None,
            nominal,
            range: Range::default(),
        }
    }

    fn exprs(list: Vec<MachExpr>) -> Nominal {
        Nominal::Exprs(list.into_iter().map(NominalItem::plain).collect())
    }

    fn with_length(mut d: DataDefinition, len: i32) -> DataDefinition {
        d.length = Some(Box::new(MachExpr::constant(len, Range::default())));
        d
    }

    fn check_codes(d: &DataDefinition, is_ds: bool) -> Vec<&'static str> {
        let mut solver = TestSolver::new();
        let mut diags = CollectedDiagnostics::new();
        d.check(is_ds, &mut solver, &mut diags);
        diags.codes()
    }

    #[test]
    fn implicit_lengths() {
        let mut solver = TestSolver::new();

        let f = dd('F', None);
        assert_eq!(f.length_attribute(&mut solver), 4);
        assert_eq!(f.alignment(), FULLWORD);

        let c = dd('C', Some(Nominal::String("HELLO".into())));
        assert_eq!(c.length_attribute(&mut solver), 5);
        assert_eq!(c.alignment(), NO_ALIGN);

        let x = dd('X', Some(Nominal::String("1F2".into())));
        assert_eq!(x.length_attribute(&mut solver), 2);

        let mut rd = dd('R', None);
        rd.extension = Some('D');
        assert_eq!(rd.length_attribute(&mut solver), 8);
        assert_eq!(rd.alignment(), DOUBLEWORD);
    }

    #[test]
    fn explicit_length_disables_alignment() {
        let mut solver = TestSolver::new();
        let d = with_length(dd('C', None), 10);
        assert_eq!(d.length_attribute(&mut solver), 10);
        assert_eq!(d.alignment(), NO_ALIGN);
    }

    #[test]
    fn bit_length_rounds_to_bytes() {
        let mut solver = TestSolver::new();
        let mut d = with_length(dd('C', None), 20);
        d.length_in_bits = true;
        assert_eq!(d.length_attribute(&mut solver), 3);
    }

    #[test]
    fn total_length_with_dup() {
        let mut solver = TestSolver::new();
        let mut d = dd('H', None);
        d.dup_factor = Some(Box::new(MachExpr::constant(3, Range::default())));
        assert_eq!(d.total_length(&mut solver), 6);
    }

    #[test]
    fn integer_attribute_formulas() {
        let d = dd('F', None);
        assert_eq!(d.integer_attribute(4, 1), 30);
        let h = dd('H', None);
        assert_eq!(h.integer_attribute(2, 0), 15);
        let p = dd('P', None);
        assert_eq!(p.integer_attribute(2, 1), 2);
    }

    #[test]
    fn length_dependencies_track_modifier_symbols() {
        let mut solver = TestSolver::new();
        let name = solver.ids.add("LEN");
        let mut d = dd('C', None);
        d.length = Some(Box::new(MachExpr::symbol(name, Range::default())));
        let deps = d.get_length_dependencies(&mut solver);
        assert!(deps.contains_dependencies(solver.spaces()));
    }

    #[test]
    fn dc_requires_nominal() {
        let d = dd('A', None);
        assert_eq!(check_codes(&d, false), ["D016"]);
        assert_eq!(check_codes(&d, true), Vec::<&str>::new());
    }

    #[test]
    fn nominal_shape_mismatches() {
        let string_on_adcon = dd('A', Some(Nominal::String("STH".into())));
        assert_eq!(check_codes(&string_on_adcon, false), ["D017"]);

        let exprs_on_binary = dd(
            'B',
            Some(exprs(vec![MachExpr::constant(0, Range::default())])),
        );
        assert_eq!(check_codes(&exprs_on_binary, false), ["D018"]);

        let addr_on_adcon = dd(
            'A',
            Some(Nominal::Exprs(vec![NominalItem {
                expr: MachExpr::constant(14, Range::default()),
                base: Some(MachExpr::constant(2, Range::default())),
            }])),
        );
        assert_eq!(check_codes(&addr_on_adcon, false), ["D020"]);
    }

    #[test]
    fn length_out_of_range() {
        let d = with_length(
            dd('C', Some(Nominal::String("ASCII".into()))),
            30000,
        );
        assert_eq!(check_codes(&d, false), ["D008"]);
        // DS tolerates much longer character operands.
        assert_eq!(check_codes(&d, true), Vec::<&str>::new());
    }

    #[test]
    fn negative_length_out_of_range() {
        let d = with_length(dd('C', Some(Nominal::String("A".into()))), -2);
        assert_eq!(check_codes(&d, false), ["D008"]);
    }

    #[test]
    fn unicode_length_must_be_even() {
        let mut d = with_length(dd('C', Some(Nominal::String("UTF16".into()))), 35);
        d.extension = Some('U');
        assert_eq!(check_codes(&d, false), ["D014"]);

        let g = with_length(dd('G', Some(Nominal::String("UTF16".into()))), 35);
        assert_eq!(check_codes(&g, false), ["D014"]);
    }

    #[test]
    fn unicode_bit_length_not_allowed() {
        let mut d = with_length(dd('C', Some(Nominal::String("UTF16".into()))), 480);
        d.extension = Some('U');
        d.length_in_bits = true;
        assert_eq!(check_codes(&d, false), ["D007"]);
    }

    #[test]
    fn r_type_length() {
        let mut solver = TestSolver::new();
        let sym = solver.ids.add("EXT");
        let make = |len| {
            let mut d = with_length(
                dd('R', Some(exprs(vec![MachExpr::symbol(sym, Range::default())]))),
                len,
            );
            d.extension = Some('D');
            d
        };
        let mut diags = CollectedDiagnostics::new();
        make(6).check(false, &mut solver, &mut diags);
        assert_eq!(diags.codes(), ["D021"]);

        let mut diags = CollectedDiagnostics::new();
        make(4).check(false, &mut solver, &mut diags);
        assert!(diags.is_empty());
    }

    #[test]
    fn j_type_length() {
        let sym_free = exprs(vec![MachExpr::constant(0, Range::default())]);
        let bad = with_length(dd('J', Some(sym_free.clone())), 6);
        assert_eq!(check_codes(&bad, false), ["D024"]);
        let ok = with_length(dd('J', Some(sym_free)), 2);
        assert_eq!(check_codes(&ok, false), Vec::<&str>::new());
    }

    #[test]
    fn s_type_ranges() {
        let out_of_range = dd('S', Some(exprs(vec![MachExpr::constant(4097, Range::default())])));
        assert_eq!(check_codes(&out_of_range, false), ["D022"]);

        let negative = dd('S', Some(exprs(vec![MachExpr::constant(-10, Range::default())])));
        assert_eq!(check_codes(&negative, false), ["D022"]);

        let mut sy = dd('S', Some(exprs(vec![MachExpr::constant(-10, Range::default())])));
        sy.extension = Some('Y');
        assert_eq!(check_codes(&sy, false), Vec::<&str>::new());

        let bad_base = dd(
            'S',
            Some(Nominal::Exprs(vec![NominalItem {
                expr: MachExpr::constant(30, Range::default()),
                base: Some(MachExpr::constant(30, Range::default())),
            }])),
        );
        assert_eq!(check_codes(&bad_base, false), ["D023"]);

        let disp_base = dd(
            'S',
            Some(Nominal::Exprs(vec![NominalItem {
                expr: MachExpr::constant(-10, Range::default()),
                base: Some(MachExpr::constant(3, Range::default())),
            }])),
        );
        assert_eq!(check_codes(&disp_base, false), ["D022"]);
    }

    #[test]
    fn s_type_checked_even_with_zero_dup() {
        let mut d = dd('S', Some(exprs(vec![MachExpr::constant(-1, Range::default())])));
        d.dup_factor = Some(Box::new(MachExpr::constant(0, Range::default())));
        assert_eq!(check_codes(&d, false), ["D022"]);
    }

    #[test]
    fn v_type_single_symbol() {
        let mut solver = TestSolver::new();
        let sym = solver.ids.add("SYMBOL");

        let ok = dd('V', Some(exprs(vec![MachExpr::symbol(sym, Range::default())])));
        let mut diags = CollectedDiagnostics::new();
        ok.check(false, &mut solver, &mut diags);
        assert!(diags.is_empty());

        let bad = dd(
            'V',
            Some(exprs(vec![MachExpr::binary(
                crate::expr::BinaryOp::Add,
                MachExpr::symbol(sym, Range::default()),
                MachExpr::constant(5, Range::default()),
                Range::default(),
            )])),
        );
        let mut diags = CollectedDiagnostics::new();
        bad.check(false, &mut solver, &mut diags);
        assert_eq!(diags.codes(), ["D030"]);
    }

    #[test]
    fn negative_dup_factor() {
        let mut d = dd('C', Some(Nominal::String("A".into())));
        d.dup_factor = Some(Box::new(MachExpr::constant(-1, Range::default())));
        assert_eq!(check_codes(&d, false), ["D011"]);
    }

    #[test]
    fn scale_not_permitted() {
        let mut d = dd('C', Some(Nominal::String("A".into())));
        d.scale = Some(2);
        assert_eq!(check_codes(&d, false), ["D009"]);
    }

    #[test]
    fn float_round_modes() {
        let plain_hex = dd('L', Some(Nominal::String("456E10R5".into())));
        assert_eq!(check_codes(&plain_hex, false), ["D026"]);

        let mut ld = dd('L', Some(Nominal::String("456E7R5".into())));
        ld.extension = Some('D');
        assert_eq!(check_codes(&ld, false), ["D026"]);

        let mut ld_ok = dd('L', Some(Nominal::String("456E7R8".into())));
        ld_ok.extension = Some('D');
        assert_eq!(check_codes(&ld_ok, false), Vec::<&str>::new());

        let mut lb = dd('L', Some(Nominal::String("456E10R5".into())));
        lb.extension = Some('B');
        assert_eq!(check_codes(&lb, false), Vec::<&str>::new());

        let mut no_digits = dd('L', Some(Nominal::String("456E7R".into())));
        no_digits.extension = Some('D');
        assert_eq!(check_codes(&no_digits, false), ["D026"]);
    }

    #[test]
    fn unknown_extension_diagnosed() {
        let mut d = dd('B', Some(Nominal::String("1".into())));
        d.extension = Some('A');
        assert_eq!(check_codes(&d, false), ["D013"]);
    }
}
