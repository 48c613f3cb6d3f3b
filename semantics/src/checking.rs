//! Machine instruction operand checking.
//!
//! Runs after the USING collection resolved, with the evaluation context
//! captured when the statement was processed. Checking is exhaustive per
//! statement: every operand is verified and every problem reported; there
//! is no first-error abort.

use crate::context::dependency::{DependencySolver, EvalContext, INVALID_REGISTER};
use crate::context::symbol::SymbolValue;
use crate::context::{ContextSolver, OrdinaryAssemblyContext};
use crate::diagnostic::{self, DiagnosticConsumer, Range};
use crate::expr::{BinaryOp, MachExpr, MachExprKind};
use crate::inst::{
    MachineInstruction, MnemonicTransform, OperandFormat, OperandKind, EvenOdd, Param,
};
use crate::processing::{MachOperand, OpCode, Operand, Statement};

/// Check a postponed statement against its instruction-table entry.
pub fn check_statement(
    stmt: &Statement,
    eval: &EvalContext,
    ord: &mut OrdinaryAssemblyContext,
    diags: &mut dyn DiagnosticConsumer,
) {
    let Some((opcode, _)) = &stmt.opcode else {
        return;
    };
    match opcode {
        OpCode::Machine(instr) => {
            check_machine(stmt, instr, &[], instr.reladdr_mask, eval, ord, diags)
        }
        OpCode::Mnemonic(mnemo) => {
            let instr = mnemo.instruction();
            check_machine(
                stmt,
                instr,
                mnemo.transforms,
                mnemo.reladdr_mask(),
                eval,
                ord,
                diags,
            );
        }
        OpCode::Assembler(asm) => {
            // Assembler statements were evaluated at processing time;
            // unresolvable operands are reported here, and DC/DS operand
            // values get their D-family checks once evaluable.
            if check_dependencies(stmt, eval, ord, diags) && matches!(asm.name, "DC" | "DS") {
                let is_ds = asm.name == "DS";
                for op in &stmt.operands {
                    if let Operand::Data { dd, .. } = op {
                        let mut solver = ContextSolver::new(ord, eval);
                        dd.check(is_ds, &mut solver, diags);
                    }
                }
            }
        }
        _ => {
            check_dependencies(stmt, eval, ord, diags);
        }
    }
}

/// Report E010 per missing symbol (E016 when there is no symbol to blame)
/// for every operand that still has dependencies. Returns true when all
/// operands are evaluable.
fn check_dependencies(
    stmt: &Statement,
    eval: &EvalContext,
    ord: &mut OrdinaryAssemblyContext,
    diags: &mut dyn DiagnosticConsumer,
) -> bool {
    let mut ok = true;
    for op in &stmt.operands {
        let mut solver = ContextSolver::new(ord, eval);
        let mut missing = Vec::new();
        let mut unresolved = false;

        for expr in operand_exprs(op) {
            let deps = expr.get_dependencies(&mut solver);
            if deps.contains_dependencies(solver.spaces()) {
                unresolved = true;
                missing.extend(deps.unique_symbolic_names());
            }
        }
        if let Operand::Data { dd, .. } = op {
            let deps = dd.get_dependencies(&mut solver);
            if deps.contains_dependencies(solver.spaces()) {
                unresolved = true;
                missing.extend(deps.unique_symbolic_names());
            }
        }

        if unresolved {
            ok = false;
            missing.sort_unstable();
            missing.dedup();
            if missing.is_empty() {
                // Non-symbolic dependencies that never resolved; keep the
                // generic fallback.
                diags.add(diagnostic::error_e016(operand_range(op)));
            } else {
                for name in missing {
                    let text = ord.ids.resolve(name).to_string();
                    diags.add(diagnostic::error_e010(
                        "ordinary symbol",
                        &text,
                        operand_range(op),
                    ));
                }
            }
        }
    }
    ok
}

fn operand_exprs(op: &Operand) -> impl Iterator<Item = &MachExpr> {
    let (a, b, c): (Option<&MachExpr>, Option<&MachExpr>, Option<&MachExpr>) = match op {
        Operand::Expr { expr, .. } => (Some(expr), None, None),
        Operand::Mach(m) => (Some(&m.displacement), m.index.as_ref(), m.base.as_ref()),
        Operand::Pair { first, second, .. } => (Some(first), Some(second), None),
        Operand::Data { .. } | Operand::Empty { .. } => (None, None, None),
    };
    a.into_iter().chain(b).chain(c)
}

pub fn operand_range(op: &Operand) -> Range {
    match op {
        Operand::Expr { range, .. }
        | Operand::Pair { range, .. }
        | Operand::Data { range, .. }
        | Operand::Empty { range } => *range,
        Operand::Mach(m) => m.range,
    }
}

fn check_machine(
    stmt: &Statement,
    instr: &'static MachineInstruction,
    transforms: &'static [MnemonicTransform],
    reladdr_mask: u8,
    eval: &EvalContext,
    ord: &mut OrdinaryAssemblyContext,
    diags: &mut dyn DiagnosticConsumer,
) {
    let name = instr.name;
    let inserted = transforms.iter().filter(|t| t.inserts()).count();
    let min = instr.min_operands().saturating_sub(inserted);
    let max = instr.max_operands().saturating_sub(inserted);

    if stmt.operands.len() < min || stmt.operands.len() > max {
        diags.add(diagnostic::error_m104(name, min, max, stmt.range));
        return;
    }

    if !check_dependencies(stmt, eval, ord, diags) {
        return;
    }

    let mut fmt_idx = 0usize;
    let mut pending = transforms;
    let mut processed = 0u8;

    for (op_idx, op) in stmt.operands.iter().enumerate() {
        while let Some(t) = pending.first() {
            if t.skip != processed {
                break;
            }
            if t.inserts() {
                fmt_idx += 1;
            }
            pending = &pending[1..];
            processed = 0;
        }
        let Some(fmt) = instr.operands.get(fmt_idx) else {
            diags.add(diagnostic::error_i999(name, operand_range(op)));
            return;
        };

        let rel = op_idx < 8 && reladdr_mask & (1u8 << op_idx) != 0;
        check_operand(op, *fmt, rel, name, eval, ord, diags);

        fmt_idx += 1;
        processed += 1;
    }
}

fn check_operand(
    op: &Operand,
    fmt: OperandFormat,
    rel: bool,
    name: &'static str,
    eval: &EvalContext,
    ord: &mut OrdinaryAssemblyContext,
    diags: &mut dyn DiagnosticConsumer,
) {
    let range = operand_range(op);
    let mach = match op {
        Operand::Mach(m) => m,
        Operand::Empty { .. } => {
            diags.add(diagnostic::error_m003(name, range));
            return;
        }
        _ => {
            diags.add(diagnostic::error_i999(name, range));
            return;
        }
    };

    if fmt.is_simple() {
        if mach.index.is_some() || mach.base.is_some() {
            diags.add(simple_operand_expected(fmt.id, name, range));
            return;
        }
        if rel || fmt.id.kind == OperandKind::RelocImm {
            check_reloc_imm(&mach.displacement, fmt.id, name, eval, ord, diags);
        } else {
            check_simple_value(&mach.displacement, fmt.id, name, eval, ord, diags);
        }
        return;
    }

    debug_assert!(fmt.is_displacement());
    check_displacement(mach, fmt, name, eval, ord, diags);
}

fn simple_operand_expected(
    id: Param,
    name: &'static str,
    range: Range,
) -> crate::diagnostic::Diagnostic {
    match id.kind {
        OperandKind::Reg => diagnostic::error_m110(name, range),
        OperandKind::Mask => diagnostic::error_m111(name, range),
        OperandKind::Imm => diagnostic::error_m112(name, range),
        OperandKind::RelocImm => diagnostic::error_m113(name, range),
        OperandKind::VecReg => diagnostic::error_m114(name, range),
        _ => diagnostic::error_i999(name, range),
    }
}

fn check_simple_value(
    expr: &MachExpr,
    id: Param,
    name: &'static str,
    eval: &EvalContext,
    ord: &mut OrdinaryAssemblyContext,
    diags: &mut dyn DiagnosticConsumer,
) {
    let value = {
        let mut solver = ContextSolver::new(ord, eval);
        expr.evaluate(&mut solver, diags)
    };
    let Some(v) = value.as_abs() else {
        diags.add(simple_operand_expected(id, name, expr.range));
        return;
    };
    check_value_range(v as i64, id, name, expr.range, diags);
}

fn check_value_range(
    v: i64,
    id: Param,
    name: &'static str,
    range: Range,
    diags: &mut dyn DiagnosticConsumer,
) {
    let (low, high) = id.bounds();
    if v < low || v > high {
        diags.add(diagnostic::error_m135(name, low, high, range));
        return;
    }
    let parity_ok = match id.evenodd {
        EvenOdd::None => true,
        EvenOdd::Even => v % 2 == 0,
        EvenOdd::Odd => v % 2 != 0,
    };
    if !parity_ok {
        diags.add(diagnostic::error_m131(name, range));
    }
}

/// Relative-immediate operand: wrap the target in `rel_addr(*, target)`
/// and check the resulting halfword distance against the field width.
fn check_reloc_imm(
    expr: &MachExpr,
    id: Param,
    name: &'static str,
    eval: &EvalContext,
    ord: &mut OrdinaryAssemblyContext,
    diags: &mut dyn DiagnosticConsumer,
) {
    let wrapped = MachExpr::binary(
        BinaryOp::RelAddr,
        MachExpr::new(MachExprKind::LocCounter, expr.range),
        expr.clone(),
        expr.range,
    );
    let value = {
        let mut solver = ContextSolver::new(ord, eval);
        wrapped.evaluate(&mut solver, diags)
    };
    match value.as_abs() {
        Some(v) => check_value_range(v as i64, id, name, expr.range, diags),
        None => diags.add(diagnostic::error_me010(expr.range)),
    }
}

/// A `D(B)` or `D(X,B)` operand.
fn check_displacement(
    mach: &MachOperand,
    fmt: OperandFormat,
    name: &'static str,
    eval: &EvalContext,
    ord: &mut OrdinaryAssemblyContext,
    diags: &mut dyn DiagnosticConsumer,
) {
    let explicit_base = mach.base.is_some();

    for sub in [&mach.index, &mach.base].into_iter().flatten() {
        let value = {
            let mut solver = ContextSolver::new(ord, eval);
            sub.evaluate(&mut solver, diags)
        };
        match value.as_abs() {
            Some(v) if (0..16).contains(&v) => {}
            _ => diags.add(diagnostic::error_m120(name, sub.range)),
        }
    }

    let value = {
        let mut solver = ContextSolver::new(ord, eval);
        mach.displacement.evaluate(&mut solver, diags)
    };

    match value {
        SymbolValue::Abs(v) => {
            check_value_range(v as i64, fmt.id, name, mach.displacement.range, diags);
        }
        SymbolValue::Reloc(addr) => {
            if explicit_base {
                diags.add(diagnostic::error_me011(mach.range));
                return;
            }
            if !addr.is_simple() {
                diags.add(diagnostic::error_me007(mach.range));
                return;
            }
            let base = addr.bases()[0].0;
            let label = base.qualifier;
            let offset = addr.offset(&ord.spaces);

            if !label.is_empty()
                && !ord
                    .usings
                    .is_label_mapping_section(eval.active_using, label, Some(base.section))
            {
                let text = ord.ids.resolve(label).to_string();
                diags.add(diagnostic::error_me005(mach.range, &text));
                return;
            }
            let result = ord.usings.evaluate(
                eval.active_using,
                label,
                Some(base.section),
                offset,
                fmt.is_long_displacement(),
            );
            if result.reg == INVALID_REGISTER {
                if result.reg_offset == 0 {
                    diags.add(diagnostic::error_me007(mach.range));
                } else {
                    diags.add(diagnostic::error_me008(mach.range, result.reg_offset));
                }
            }
        }
        SymbolValue::Undef => {
            diags.add(diagnostic::error_e016(mach.range));
        }
    }
}
