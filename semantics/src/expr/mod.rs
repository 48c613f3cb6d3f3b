//! Machine expressions.
//!
//! The AST mirrors what HLASM allows in machine and assembler instruction
//! operands: decimal constants, self-defining terms, (qualified) ordinary
//! symbols, data attribute references, the location counter `*`, literals,
//! and `+ - * /` with unary plus/minus and parentheses.
//!
//! Every node supports two operations against a [`DependencySolver`]:
//! `get_dependencies` reports what is still missing before the node can be
//! evaluated, and `evaluate` computes a [`SymbolValue`], pushing
//! diagnostics instead of failing. Evaluating with unresolved dependencies
//! yields `Undef`.

pub mod data_def;

use crate::context::dependency::{DependencyCollector, DependencySolver};
use crate::context::symbol::{DataAttrKind, SymbolValue, SymbolValueKind};
use crate::diagnostic::{self, DiagnosticConsumer, Range};
use crate::ids::IdIndex;
use data_def::DataDefinition;

/// Binary operators. `RelAddr` is the implicit operator used for
/// relative-immediate operands: `rel_addr(loctr, target)`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    RelAddr,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Plus,
    Minus,
    Paren,
}

/// A literal operand, e.g. `=A(*)`. The text is the normalized form used
/// for pooling; the data definition describes the value.
#[derive(Clone, Debug)]
pub struct LiteralExpr {
    pub text: String,
    pub dd: DataDefinition,
}

/// What a data attribute is applied to.
#[derive(Clone, Debug)]
pub enum DataAttrTarget {
    Symbol { name: IdIndex },
    Literal(Box<LiteralExpr>),
}

/// A machine expression node with its source range.
#[derive(Clone, Debug)]
pub struct MachExpr {
    pub kind: MachExprKind,
    pub range: Range,
}

#[derive(Clone, Debug)]
pub enum MachExprKind {
    Constant(i32),
    /// A self-defining term such as `X'1F'`; resolved at parse time.
    SelfDef(i32),
    Symbol {
        name: IdIndex,
        qualifier: IdIndex,
    },
    DataAttr {
        target: DataAttrTarget,
        attr: DataAttrKind,
        symbol_range: Range,
    },
    LocCounter,
    Literal(LiteralExpr),
    Binary {
        op: BinaryOp,
        lhs: Box<MachExpr>,
        rhs: Box<MachExpr>,
    },
    Unary {
        op: UnaryOp,
        child: Box<MachExpr>,
    },
    /// Placeholder produced when parsing of the expression failed.
    Error,
}

impl MachExpr {
    pub fn new(kind: MachExprKind, range: Range) -> Self {
        Self { kind, range }
    }

    pub fn constant(value: i32, range: Range) -> Self {
        Self::new(MachExprKind::Constant(value), range)
    }

    pub fn symbol(name: IdIndex, range: Range) -> Self {
        Self::new(
            MachExprKind::Symbol {
                name,
                qualifier: IdIndex::EMPTY,
            },
            range,
        )
    }

    pub fn binary(op: BinaryOp, lhs: MachExpr, rhs: MachExpr, range: Range) -> Self {
        Self::new(
            MachExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            range,
        )
    }

    /// The leftmost leaf; EQU derives default attributes from it.
    pub fn leftmost_term(&self) -> &MachExpr {
        match &self.kind {
            MachExprKind::Binary { lhs, .. } => lhs.leftmost_term(),
            MachExprKind::Unary { child, .. } => child.leftmost_term(),
            _ => self,
        }
    }

    /// Does the expression mention the location counter?
    pub fn references_loctr(&self) -> bool {
        match &self.kind {
            MachExprKind::LocCounter => true,
            MachExprKind::Binary { lhs, rhs, .. } => {
                lhs.references_loctr() || rhs.references_loctr()
            }
            MachExprKind::Unary { child, .. } => child.references_loctr(),
            MachExprKind::Literal(lit) => lit.dd.references_loctr(),
            _ => false,
        }
    }

    /// Visit every symbol reference in the expression, including
    /// attribute references, with the range it occupies.
    pub fn for_each_symbol_ref(&self, f: &mut impl FnMut(IdIndex, Range)) {
        match &self.kind {
            MachExprKind::Symbol { name, .. } => f(*name, self.range),
            MachExprKind::DataAttr {
                target: DataAttrTarget::Symbol { name },
                symbol_range,
                ..
            } => f(*name, *symbol_range),
            MachExprKind::Binary { lhs, rhs, .. } => {
                lhs.for_each_symbol_ref(f);
                rhs.for_each_symbol_ref(f);
            }
            MachExprKind::Unary { child, .. } => child.for_each_symbol_ref(f),
            _ => {}
        }
    }

    pub fn get_dependencies(&self, solver: &mut dyn DependencySolver) -> DependencyCollector {
        match &self.kind {
            MachExprKind::Constant(_) | MachExprKind::SelfDef(_) | MachExprKind::Error => {
                DependencyCollector::new()
            }
            MachExprKind::Symbol { name, .. } => match solver.get_symbol(*name) {
                None => {
                    solver.register_symbol_candidate(*name);
                    DependencyCollector::symbol(*name)
                }
                Some(sym) => match sym.value() {
                    SymbolValue::Undef => DependencyCollector::symbol(*name),
                    SymbolValue::Reloc(addr) => DependencyCollector::address(addr.clone()),
                    SymbolValue::Abs(_) => DependencyCollector::new(),
                },
            },
            MachExprKind::DataAttr {
                target: DataAttrTarget::Symbol { name },
                attr,
                ..
            } => {
                if solver.get_symbol(*name).is_none() {
                    solver.register_symbol_candidate(*name);
                }
                // K/N/D/O never block: they read "as of here" (D' is 0
                // for a symbol not defined yet, by design).
                let always_evaluable = matches!(
                    attr,
                    DataAttrKind::K | DataAttrKind::N | DataAttrKind::D | DataAttrKind::O
                );
                let defined = solver
                    .get_symbol(*name)
                    .map(|s| s.attributes().is_defined(*attr))
                    .unwrap_or(false);
                if defined || always_evaluable {
                    DependencyCollector::new()
                } else {
                    DependencyCollector::attr(*name, *attr)
                }
            }
            MachExprKind::DataAttr {
                target: DataAttrTarget::Literal(lit),
                ..
            } => lit.dd.get_length_dependencies(solver),
            MachExprKind::LocCounter => match solver.get_loctr() {
                None => DependencyCollector::error(),
                Some(addr) => {
                    let addr = addr.clone();
                    DependencyCollector::address(addr)
                }
            },
            MachExprKind::Literal(lit) => self.literal_dependencies(lit, solver),
            MachExprKind::Binary { op, lhs, rhs } => {
                let l = lhs.get_dependencies(solver);
                let r = rhs.get_dependencies(solver);
                let spaces = solver.spaces();
                match op {
                    BinaryOp::Add => l.add(r, spaces),
                    BinaryOp::Sub | BinaryOp::RelAddr => l.sub(r, spaces),
                    BinaryOp::Mul => l.mul(r, spaces),
                    BinaryOp::Div => l.div(r, spaces),
                }
            }
            MachExprKind::Unary { op, child } => {
                let c = child.get_dependencies(solver);
                match op {
                    UnaryOp::Minus => {
                        let spaces = solver.spaces();
                        DependencyCollector::new().sub(c, spaces)
                    }
                    UnaryOp::Plus | UnaryOp::Paren => c,
                }
            }
        }
    }

    fn literal_dependencies(
        &self,
        lit: &LiteralExpr,
        solver: &mut dyn DependencySolver,
    ) -> DependencyCollector {
        // The literal size has to be computable at the definition point.
        let length_deps = lit.dd.get_length_dependencies(solver);
        if length_deps.has_error || length_deps.contains_dependencies(solver.spaces()) {
            return DependencyCollector::error();
        }
        let symbol_id = solver.get_literal_id(&lit.text, &lit.dd, self.range);
        match solver.get_symbol(symbol_id) {
            None => DependencyCollector::symbol(symbol_id),
            Some(sym) => match sym.value() {
                SymbolValue::Undef => DependencyCollector::symbol(symbol_id),
                SymbolValue::Reloc(addr) => DependencyCollector::address(addr.clone()),
                SymbolValue::Abs(_) => DependencyCollector::new(),
            },
        }
    }

    pub fn evaluate(
        &self,
        solver: &mut dyn DependencySolver,
        diags: &mut dyn DiagnosticConsumer,
    ) -> SymbolValue {
        match &self.kind {
            MachExprKind::Constant(v) | MachExprKind::SelfDef(v) => SymbolValue::Abs(*v),
            MachExprKind::Error => SymbolValue::Undef,
            MachExprKind::Symbol { name, qualifier } => {
                let value = match solver.get_symbol(*name) {
                    None => SymbolValue::Undef,
                    Some(sym) => sym.value().clone(),
                };
                if qualifier.is_empty() {
                    return value;
                }
                match value {
                    SymbolValue::Reloc(addr) => SymbolValue::Reloc(qualify(addr, *qualifier)),
                    SymbolValue::Abs(_) => {
                        diags.add(diagnostic::error_me004(self.range));
                        value
                    }
                    SymbolValue::Undef => SymbolValue::Undef,
                }
            }
            MachExprKind::DataAttr {
                target: DataAttrTarget::Symbol { name },
                attr,
                ..
            } => match solver.get_symbol(*name) {
                None => SymbolValue::Abs(attr.default_value()),
                Some(sym) => {
                    let attrs = sym.attributes();
                    if matches!(attr, DataAttrKind::S | DataAttrKind::I)
                        && !attrs.can_have_si_attr()
                    {
                        return SymbolValue::Abs(0);
                    }
                    if attrs.is_defined(*attr) {
                        SymbolValue::Abs(attrs.get_attribute_value(*attr))
                    } else {
                        SymbolValue::Abs(attr.default_value())
                    }
                }
            },
            MachExprKind::DataAttr {
                target: DataAttrTarget::Literal(lit),
                attr,
                ..
            } => {
                // Force the literal into the pending pool, then read the
                // attribute off its data definition.
                let _ = solver.get_literal_id(&lit.text, &lit.dd, self.range);
                let attrs = lit.dd.attributes(solver);
                SymbolValue::Abs(attrs.get_attribute_value(*attr))
            }
            MachExprKind::LocCounter => match solver.get_loctr() {
                None => SymbolValue::Undef,
                Some(addr) => SymbolValue::Reloc(addr.clone()),
            },
            MachExprKind::Literal(lit) => {
                let symbol_id = solver.get_literal_id(&lit.text, &lit.dd, self.range);
                match solver.get_symbol(symbol_id) {
                    None => SymbolValue::Undef,
                    Some(sym) => sym.value().clone(),
                }
            }
            MachExprKind::Binary { op, lhs, rhs } => self.evaluate_binary(*op, lhs, rhs, solver, diags),
            MachExprKind::Unary { op, child } => {
                let v = child.evaluate(solver, diags);
                match op {
                    UnaryOp::Plus | UnaryOp::Paren => v,
                    UnaryOp::Minus => v.neg(solver.spaces()),
                }
            }
        }
    }

    fn evaluate_binary(
        &self,
        op: BinaryOp,
        lhs: &MachExpr,
        rhs: &MachExpr,
        solver: &mut dyn DependencySolver,
        diags: &mut dyn DiagnosticConsumer,
    ) -> SymbolValue {
        let l = lhs.evaluate(solver, diags);
        let r = rhs.evaluate(solver, diags);
        match op {
            BinaryOp::Add => l.add(&r, solver.spaces()),
            BinaryOp::Sub => l.sub(&r, solver.spaces()),
            BinaryOp::Mul => {
                self.check_mul_div_operands(&l, &r, diags);
                l.mul(&r)
            }
            BinaryOp::Div => {
                self.check_mul_div_operands(&l, &r, diags);
                l.div(&r)
            }
            BinaryOp::RelAddr => {
                // lhs is the location counter, rhs the branch target.
                if r.kind() == SymbolValueKind::Abs {
                    diags.add(diagnostic::warn_d031(
                        self.range,
                        &r.as_abs().unwrap_or(0).to_string(),
                    ));
                    return r;
                }
                let spaces = solver.spaces();
                let diff = r.sub(&l, spaces).ignore_qualification(spaces);
                match diff {
                    SymbolValue::Abs(d) => {
                        if d % 2 != 0 {
                            diags.add(diagnostic::error_me003(self.range));
                        }
                        SymbolValue::Abs(d / 2)
                    }
                    other => other,
                }
            }
        }
    }

    fn check_mul_div_operands(
        &self,
        l: &SymbolValue,
        r: &SymbolValue,
        diags: &mut dyn DiagnosticConsumer,
    ) {
        let abs = |v: &SymbolValue| v.kind() == SymbolValueKind::Abs;
        let undef = |v: &SymbolValue| v.kind() == SymbolValueKind::Undef;
        if !(abs(l) && abs(r)) && !undef(l) && !undef(r) {
            diags.add(diagnostic::error_me002(self.range));
        }
    }
}

fn qualify(addr: crate::context::address::Address, qualifier: IdIndex) -> crate::context::address::Address {
    use crate::context::address::{Address, Base};
    use smallvec::SmallVec;
    let bases: SmallVec<[(Base, i32); 1]> = addr
        .bases()
        .iter()
        .map(|&(b, count)| {
            (
                Base {
                    section: b.section,
                    qualifier,
                },
                count,
            )
        })
        .collect();
    Address::from_parts(
        bases,
        addr.raw_offset(),
        addr.space_entries().iter().copied().collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::TestSolver;
    use crate::context::symbol::{Symbol, SymbolAttributes, SymbolOrigin};
    use crate::diagnostic::CollectedDiagnostics;

    fn range() -> Range {
        Range::default()
    }

    #[test]
    fn constant_folding() {
        let mut solver = TestSolver::new();
        let mut diags = CollectedDiagnostics::new();
        // (2+3)*4
        let expr = MachExpr::binary(
            BinaryOp::Mul,
            MachExpr::binary(
                BinaryOp::Add,
                MachExpr::constant(2, range()),
                MachExpr::constant(3, range()),
                range(),
            ),
            MachExpr::constant(4, range()),
            range(),
        );
        assert_eq!(expr.evaluate(&mut solver, &mut diags), SymbolValue::Abs(20));
        assert!(diags.is_empty());
        assert!(!expr
            .get_dependencies(&mut solver)
            .contains_dependencies(solver.spaces()));
    }

    #[test]
    fn undefined_symbol_reports_dependency() {
        let mut solver = TestSolver::new();
        let name = solver.ids.add("FWD");
        let expr = MachExpr::symbol(name, range());

        let deps = expr.get_dependencies(&mut solver);
        assert!(deps.contains_dependencies(solver.spaces()));
        assert!(solver.symbol_mentioned(name));

        let mut diags = CollectedDiagnostics::new();
        assert_eq!(expr.evaluate(&mut solver, &mut diags), SymbolValue::Undef);
    }

    #[test]
    fn mul_of_relocatables_diagnosed() {
        let mut solver = TestSolver::new();
        let name = solver.ids.add("A");
        let addr = solver.make_address(0);
        solver.define(Symbol::new(
            name,
            SymbolValue::Reloc(addr),
            SymbolAttributes::undefined(SymbolOrigin::Unknown),
            range(),
        ));

        let expr = MachExpr::binary(
            BinaryOp::Mul,
            MachExpr::symbol(name, range()),
            MachExpr::constant(2, range()),
            range(),
        );
        let mut diags = CollectedDiagnostics::new();
        assert_eq!(expr.evaluate(&mut solver, &mut diags), SymbolValue::Undef);
        assert_eq!(diags.codes(), ["ME002"]);
    }

    #[test]
    fn rel_addr_divides_by_two() {
        let mut solver = TestSolver::new();
        let target = solver.ids.add("T");
        let addr = solver.make_address(6);
        solver.define(Symbol::new(
            target,
            SymbolValue::Reloc(addr),
            SymbolAttributes::undefined(SymbolOrigin::Unknown),
            range(),
        ));
        solver.loctr = Some(solver.make_address(0));

        let expr = MachExpr::binary(
            BinaryOp::RelAddr,
            MachExpr::new(MachExprKind::LocCounter, range()),
            MachExpr::symbol(target, range()),
            range(),
        );
        let mut diags = CollectedDiagnostics::new();
        assert_eq!(expr.evaluate(&mut solver, &mut diags), SymbolValue::Abs(3));
        assert!(diags.is_empty());
    }

    #[test]
    fn rel_addr_parity_diagnosed() {
        let mut solver = TestSolver::new();
        let target = solver.ids.add("T");
        let addr = solver.make_address(5);
        solver.define(Symbol::new(
            target,
            SymbolValue::Reloc(addr),
            SymbolAttributes::undefined(SymbolOrigin::Unknown),
            range(),
        ));
        solver.loctr = Some(solver.make_address(0));

        let expr = MachExpr::binary(
            BinaryOp::RelAddr,
            MachExpr::new(MachExprKind::LocCounter, range()),
            MachExpr::symbol(target, range()),
            range(),
        );
        let mut diags = CollectedDiagnostics::new();
        expr.evaluate(&mut solver, &mut diags);
        assert_eq!(diags.codes(), ["ME003"]);
    }

    #[test]
    fn attribute_defaults_for_missing_symbol() {
        let mut solver = TestSolver::new();
        let name = solver.ids.add("X");
        let expr = MachExpr::new(
            MachExprKind::DataAttr {
                target: DataAttrTarget::Symbol { name },
                attr: DataAttrKind::L,
                symbol_range: range(),
            },
            range(),
        );
        let mut diags = CollectedDiagnostics::new();
        assert_eq!(expr.evaluate(&mut solver, &mut diags), SymbolValue::Abs(1));
    }
}
