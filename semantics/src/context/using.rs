//! The USING / DROP engine.
//!
//! USING and DROP statements are recorded as an append-only collection;
//! each entry remembers the entry that was current before it, so the whole
//! history forms a persistent tree and "the active USING state" is just an
//! index. Expressions mentioned by the statements are stored with the
//! entry and evaluated in one pass over the collection after the rest of
//! the assembly settled; only then can displacements be resolved.

use crate::context::address::Address;
use crate::context::dependency::{
    EvalContext, UsingEvaluateResult, INVALID_REGISTER,
};
use crate::context::section::SectionId;
use crate::context::symbol::SymbolValue;
use crate::context::OrdinaryAssemblyContext;
use crate::diagnostic::{self, Diagnostic, DiagnosticConsumer, Range};
use crate::expr::{MachExpr, MachExprKind};
use crate::ids::IdIndex;
use hlasm_entity::{entity_impl, PrimaryMap};

/// An opaque reference to a USING/DROP entry; also identifies the active
/// state reached after that entry.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UsingId(u32);
entity_impl!(UsingId, "using");

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct ExprId(u32);
entity_impl!(ExprId, "uexpr");

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct InstrCtxId(u32);
entity_impl!(InstrCtxId, "uctx");

pub const REG_SET_SIZE: usize = 16;
pub type RegisterSet = [i8; REG_SET_SIZE];
pub const INVALID_REGISTER_SET: RegisterSet = [INVALID_REGISTER; REG_SET_SIZE];

const SHORT_DISP_MIN: i64 = 0;
const SHORT_DISP_MAX: i64 = (1 << 12) - 1;
const LONG_DISP_MIN: i64 = -(1 << 19);
const LONG_DISP_MAX: i64 = (1 << 19) - 1;

/// An expression attached to a USING/DROP, with its evaluation slot.
struct ExpressionValue {
    expr: MachExpr,
    context: InstrCtxId,
    value: SymbolValue,
    /// Non-empty when the expression is a bare USING label (DROP only).
    label: IdIndex,
}

struct InstructionContext {
    eval: EvalContext,
    stack: Range,
}

/// `label USING begin[,end], base…` or `DROP arg…` before resolution.
struct UsingDropDefinition {
    parent: Option<UsingId>,
    label: IdIndex,
    begin: Option<ExprId>,
    end: Option<ExprId>,
    base: Vec<ExprId>,
}

impl UsingDropDefinition {
    fn is_using(&self) -> bool {
        self.begin.is_some()
    }
}

/// Resolution result of one entry.
enum ResolvedEntry {
    Failed {
        parent: Option<UsingId>,
    },
    Using(UsingEntryResolved),
    Drop {
        parent: Option<UsingId>,
        args: Vec<(DropArg, Range)>,
    },
}

struct UsingEntryResolved {
    parent: Option<UsingId>,
    label: IdIndex,
    owner: Option<SectionId>,
    begin: i32,
    length: i32,
    regs: RegisterSet,
    reg_offset: i32,
}

#[derive(Copy, Clone, Debug)]
enum DropArg {
    Label(IdIndex),
    Register(i8),
}

/// One row of an active USING state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsingContextEntry {
    pub label: IdIndex,
    /// `None` rows map absolute addresses.
    pub owner: Option<SectionId>,
    pub offset: i32,
    pub length: i32,
    pub regs: RegisterSet,
    pub reg_offset: i32,
}

#[derive(Clone, Default)]
struct UsingContextData {
    state: Vec<UsingContextEntry>,
}

struct CandidateEntry {
    found: bool,
    /// Index into the state vector; `None` is the implicit zero row.
    entry_index: Option<usize>,
    reg_index: usize,
    min_dist_abs: i64,
    min_dist: i64,
    min_dist_reg: i8,
}

impl CandidateEntry {
    fn empty() -> Self {
        Self {
            found: false,
            entry_index: None,
            reg_index: 0,
            min_dist_abs: i64::MAX,
            min_dist: 0,
            min_dist_reg: -1,
        }
    }

    fn valid(&self) -> bool {
        self.found
    }

    fn is_better_candidate(&self, new_abs_dist: i64, new_reg: i8) -> bool {
        new_abs_dist < self.min_dist_abs
            || (new_abs_dist == self.min_dist_abs && new_reg > self.min_dist_reg)
    }

    fn update(&mut self, entry_index: Option<usize>, reg_index: usize, dist: i64, reg: i8) {
        self.found = true;
        self.entry_index = entry_index;
        self.reg_index = reg_index;
        self.min_dist_abs = dist.abs();
        self.min_dist = dist;
        self.min_dist_reg = reg;
    }
}

struct ContextEvaluateResult {
    mapping_regs: RegisterSet,
    reg_offset: i32,
    length: i32,
}

impl UsingContextData {
    fn evaluate_windowed(
        &self,
        label: IdIndex,
        owner: Option<SectionId>,
        offset: i64,
        min_disp: i64,
        max_disp: i64,
        ignore_length: bool,
    ) -> ContextEvaluateResult {
        // The implicit `USING 0,0` row with a 4 KiB window.
        let zero_entry = UsingContextEntry {
            label: IdIndex::EMPTY,
            owner: None,
            offset: 0,
            length: 0x1000,
            regs: {
                let mut regs = INVALID_REGISTER_SET;
                regs[0] = 0;
                regs
            },
            reg_offset: 0,
        };

        let mut pos_valid = CandidateEntry::empty();
        let mut pos_invalid = CandidateEntry::empty();
        let mut neg_valid = CandidateEntry::empty();
        let mut neg_invalid = CandidateEntry::empty();

        let implicit_usable =
            owner.is_none() && label.is_empty() && min_disp <= offset && offset <= max_disp;

        let entries = std::iter::once((None, &zero_entry))
            .filter(|_| implicit_usable)
            .chain(self.state.iter().enumerate().map(|(i, e)| (Some(i), e)));

        for (entry_index, entry) in entries {
            if entry_index.is_some() && (label != entry.label || owner != entry.owner) {
                continue;
            }
            let mut next_dist = (offset - entry.offset as i64) + entry.reg_offset as i64;
            let fits_limit = next_dist < entry.length as i64;
            for (reg_index, &reg) in entry.regs.iter().enumerate() {
                let dist = next_dist;
                next_dist -= 0x1000;

                if reg == INVALID_REGISTER {
                    continue;
                }

                let (valid, invalid) = if dist >= 0 {
                    (&mut pos_valid, &mut pos_invalid)
                } else {
                    (&mut neg_valid, &mut neg_invalid)
                };
                let abs_dist = dist.abs();
                if invalid.is_better_candidate(abs_dist, reg) {
                    invalid.update(entry_index, reg_index, dist, reg);
                }
                if valid.is_better_candidate(abs_dist, reg)
                    && dist >= min_disp
                    && dist <= max_disp
                    && (ignore_length || fits_limit)
                {
                    valid.update(entry_index, reg_index, dist, reg);
                }
            }
        }

        let best = if pos_valid.valid() {
            pos_valid
        } else if neg_valid.valid() {
            neg_valid
        } else if pos_invalid.valid() && neg_invalid.valid() {
            if pos_invalid.min_dist_abs <= neg_invalid.min_dist_abs {
                pos_invalid
            } else {
                neg_invalid
            }
        } else if pos_invalid.valid() {
            pos_invalid
        } else {
            neg_invalid
        };

        if !best.valid() {
            return ContextEvaluateResult {
                mapping_regs: INVALID_REGISTER_SET,
                reg_offset: 0,
                length: 0,
            };
        }

        let entry = match best.entry_index {
            None => &zero_entry,
            Some(i) => &self.state[i],
        };

        let mut result = ContextEvaluateResult {
            mapping_regs: INVALID_REGISTER_SET,
            reg_offset: clamp_i32(best.min_dist),
            length: clamp_i32(if ignore_length {
                0
            } else {
                entry.length as i64 - (offset - entry.offset as i64)
            }),
        };

        let reg_offset = result.reg_offset as i64;
        if reg_offset >= min_disp && reg_offset <= max_disp {
            let tail = &entry.regs[best.reg_index..];
            result.mapping_regs[..tail.len()].copy_from_slice(tail);
        } else if reg_offset < min_disp {
            result.reg_offset = clamp_i32(reg_offset - min_disp);
        } else {
            result.reg_offset = clamp_i32(reg_offset - max_disp);
        }

        result
    }

    fn evaluate(
        &self,
        label: IdIndex,
        owner: Option<SectionId>,
        offset: i32,
        long_offset: bool,
    ) -> ContextEvaluateResult {
        if long_offset {
            self.evaluate_windowed(label, owner, offset as i64, LONG_DISP_MIN, LONG_DISP_MAX, true)
        } else {
            self.evaluate_windowed(
                label,
                owner,
                offset as i64,
                SHORT_DISP_MIN,
                SHORT_DISP_MAX,
                false,
            )
        }
    }
}

fn clamp_i32(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

struct UsingEntry {
    definition: UsingDropDefinition,
    resolved: Option<ResolvedEntry>,
    context: UsingContextData,
    instruction_ctx: InstrCtxId,
    expression_used_limit: usize,
}

/// Textual description of one active mapping, for hover.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsingContextDescription {
    pub label: IdIndex,
    pub section: Option<SectionId>,
    pub offset: i32,
    pub length: i32,
    pub reg_offset: i32,
    pub regs: Vec<i8>,
}

/// The append-only USING collection.
#[derive(Default)]
pub struct UsingCollection {
    usings: PrimaryMap<UsingId, UsingEntry>,
    expr_values: PrimaryMap<ExprId, ExpressionValue>,
    instruction_ctxs: PrimaryMap<InstrCtxId, InstructionContext>,
    resolved: bool,
}

impl UsingCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolved(&self) -> bool {
        self.resolved
    }

    fn add_ctx(&mut self, eval: EvalContext, stack: Range) -> InstrCtxId {
        self.instruction_ctxs.push(InstructionContext { eval, stack })
    }

    fn add_expr(&mut self, expr: MachExpr, context: InstrCtxId) -> ExprId {
        self.expr_values.push(ExpressionValue {
            expr,
            context,
            value: SymbolValue::Undef,
            label: IdIndex::EMPTY,
        })
    }

    /// Record `label USING begin[,end], base…`. Returns the new current
    /// state index.
    pub fn add(
        &mut self,
        current: Option<UsingId>,
        label: IdIndex,
        begin: MachExpr,
        end: Option<MachExpr>,
        args: Vec<MachExpr>,
        eval: EvalContext,
        stack: Range,
    ) -> UsingId {
        debug_assert!(!args.is_empty() && args.len() <= REG_SET_SIZE);
        let ctx = self.add_ctx(eval, stack);
        let b = self.add_expr(begin, ctx);
        let e = end.map(|expr| self.add_expr(expr, ctx));
        let base: Vec<ExprId> = args.into_iter().map(|a| self.add_expr(a, ctx)).collect();

        self.usings.push(UsingEntry {
            definition: UsingDropDefinition {
                parent: current,
                label,
                begin: Some(b),
                end: e,
                base,
            },
            resolved: None,
            context: UsingContextData::default(),
            instruction_ctx: ctx,
            expression_used_limit: self.expr_values.len(),
        })
    }

    /// Record `DROP arg…`. An empty argument list drops everything, which
    /// the caller models by returning to the root state instead.
    pub fn remove(
        &mut self,
        current: Option<UsingId>,
        args: Vec<MachExpr>,
        eval: EvalContext,
        stack: Range,
    ) -> UsingId {
        debug_assert!(!args.is_empty());
        let ctx = self.add_ctx(eval, stack);
        let base: Vec<ExprId> = args.into_iter().map(|a| self.add_expr(a, ctx)).collect();

        self.usings.push(UsingEntry {
            definition: UsingDropDefinition {
                parent: current,
                label: IdIndex::EMPTY,
                begin: None,
                end: None,
                base,
            },
            resolved: None,
            context: UsingContextData::default(),
            instruction_ctx: ctx,
            expression_used_limit: self.expr_values.len(),
        })
    }

    /// Evaluate all recorded expressions and build every entry's context,
    /// in program order. Must run exactly once, after the ordinary
    /// assembly resolved; only then is [`Self::evaluate`] meaningful.
    pub fn resolve_all(
        &mut self,
        ord: &mut OrdinaryAssemblyContext,
        diags: &mut dyn DiagnosticConsumer,
    ) {
        debug_assert!(!self.resolved);

        let mut expr_id = 0usize;
        for u in 0..self.usings.len() {
            let uid = UsingId::from_u32(u as u32);
            let limit = self.usings[uid].expression_used_limit;
            while expr_id < limit {
                self.evaluate_expression(ExprId::from_u32(expr_id as u32), ord, diags);
                expr_id += 1;
            }

            let stack = self.instruction_ctxs[self.usings[uid].instruction_ctx].stack;
            let mut local = StackedDiags { inner: diags, stack };
            let resolved = self.resolve_entry(uid, ord, &mut local);
            let context = self.compute_context(&resolved, &mut local);
            let entry = &mut self.usings[uid];
            entry.resolved = Some(resolved);
            entry.context = context;
        }

        self.resolved = true;
    }

    fn evaluate_expression(
        &mut self,
        id: ExprId,
        ord: &mut OrdinaryAssemblyContext,
        diags: &mut dyn DiagnosticConsumer,
    ) {
        // A bare symbol naming a USING label stands for the label itself,
        // not for a value.
        let bare_symbol = match &self.expr_values[id].expr.kind {
            MachExprKind::Symbol { name, qualifier } if qualifier.is_empty() => Some(*name),
            _ => None,
        };
        if let Some(name) = bare_symbol {
            if ord.is_using_label(name) {
                self.expr_values[id].label = name;
                return;
            }
        }

        let ctx = self.expr_values[id].context;
        let eval = self.instruction_ctxs[ctx].eval.clone();
        let stack = self.instruction_ctxs[ctx].stack;
        let value = {
            let mut solver = crate::context::ContextSolver::new(ord, &eval);
            let mut local = StackedDiags { inner: diags, stack };
            self.expr_values[id].expr.evaluate(&mut solver, &mut local)
        };
        self.expr_values[id].value = value;
    }

    /// Interpret an expression value as either a register number or a
    /// simple relocatable address.
    fn abs_or_reloc(
        &self,
        e: Option<ExprId>,
        abs_is_register: bool,
    ) -> (Option<(IdIndex, Option<SectionId>, i32)>, Range) {
        let Some(e) = e else {
            return (None, Range::default());
        };
        let expr = &self.expr_values[e];
        let rng = expr.expr.range;

        match &expr.value {
            SymbolValue::Abs(v) => {
                if abs_is_register && (*v < 0 || *v >= REG_SET_SIZE as i32) {
                    return (None, rng);
                }
                (Some((IdIndex::EMPTY, None, *v)), rng)
            }
            SymbolValue::Reloc(addr) if addr.is_simple() => {
                let base = addr.bases()[0].0;
                (
                    Some((base.qualifier, Some(base.section), addr.raw_offset())),
                    rng,
                )
            }
            _ => (None, rng),
        }
    }

    fn resolve_entry(
        &mut self,
        uid: UsingId,
        ord: &mut OrdinaryAssemblyContext,
        diags: &mut dyn DiagnosticConsumer,
    ) -> ResolvedEntry {
        // Normalize stored relocatable values first so raw offsets are
        // final.
        for &e in self
            .usings[uid]
            .definition
            .begin
            .iter()
            .chain(self.usings[uid].definition.end.iter())
            .chain(self.usings[uid].definition.base.iter())
        {
            if let SymbolValue::Reloc(addr) = &mut self.expr_values[e].value {
                addr.normalize(&ord.spaces);
            }
        }

        if self.usings[uid].definition.is_using() {
            self.resolve_using(uid, diags)
        } else {
            self.resolve_drop(uid, diags)
        }
    }

    fn resolve_using(&self, uid: UsingId, diags: &mut dyn DiagnosticConsumer) -> ResolvedEntry {
        let def = &self.usings[uid].definition;
        debug_assert!(!def.base.is_empty() && def.base.len() <= REG_SET_SIZE);

        let (b, b_rng) = self.abs_or_reloc(def.begin, false);
        let Some((b_qualifier, b_sect, b_offset)) = b else {
            diags.add(diagnostic::error_m113("USING", b_rng));
            return ResolvedEntry::Failed { parent: def.parent };
        };
        if !b_qualifier.is_empty() {
            diags.add(diagnostic::error_u002(b_rng));
        }

        let (e, e_rng) = self.abs_or_reloc(def.end, false);

        let mut len: Option<i32> = None;
        if let Some((e_qualifier, e_sect, e_offset)) = e {
            if !e_qualifier.is_empty() {
                diags.add(diagnostic::error_u002(e_rng));
            }
            if e_sect != b_sect || b_offset >= e_offset {
                diags.add(diagnostic::error_u005(b_rng, e_rng));
            } else {
                len = Some(e_offset - b_offset);
            }
        } else if def.end.is_some() {
            diags.add(diagnostic::error_m113("USING", e_rng));
        }

        let bases: Vec<(Option<(IdIndex, Option<SectionId>, i32)>, Range)> = def
            .base
            .iter()
            .map(|&base| self.abs_or_reloc(Some(base), true))
            .collect();

        // A single relocatable base makes this a dependent USING.
        if bases.len() == 1 {
            if let (Some((q, Some(sect), offset)), rng) = &bases[0] {
                return self.resolve_using_dep(
                    def,
                    (b_sect, b_offset),
                    len,
                    (*q, Some(*sect), *offset),
                    *rng,
                    diags,
                );
            }
        }

        let mut reg_set = INVALID_REGISTER_SET;
        let mut seen = [false; REG_SET_SIZE];
        for (i, (base, base_rng)) in bases.iter().enumerate() {
            let reg = match base {
                Some((_, None, v)) => *v as i8,
                _ => {
                    diags.add(diagnostic::error_m120("USING", *base_rng));
                    continue;
                }
            };
            reg_set[i] = reg;
            if seen[reg as usize] {
                diags.add(diagnostic::error_u006(*base_rng));
                reg_set[i] = INVALID_REGISTER;
                continue;
            }
            seen[reg as usize] = true;
        }

        ResolvedEntry::Using(UsingEntryResolved {
            parent: def.parent,
            label: def.label,
            owner: b_sect,
            begin: b_offset,
            length: len.unwrap_or(0x1000 * bases.len() as i32),
            regs: reg_set,
            reg_offset: 0,
        })
    }

    /// Dependent USING: map `begin..end` onto the range the active
    /// context already maps at `base`, inheriting its register set.
    fn resolve_using_dep(
        &self,
        def: &UsingDropDefinition,
        b: (Option<SectionId>, i32),
        len: Option<i32>,
        base: (IdIndex, Option<SectionId>, i32),
        rng: Range,
        diags: &mut dyn DiagnosticConsumer,
    ) -> ResolvedEntry {
        let Some(parent) = def.parent else {
            diags.add(diagnostic::error_u004(rng));
            return ResolvedEntry::Failed { parent: None };
        };

        let ctx = &self.usings[parent].context;
        let v = ctx.evaluate(base.0, base.1, base.2, false);

        if v.mapping_regs == INVALID_REGISTER_SET {
            diags.add(diagnostic::error_u004(rng));
            return ResolvedEntry::Failed {
                parent: Some(parent),
            };
        }

        ResolvedEntry::Using(UsingEntryResolved {
            parent: Some(parent),
            label: def.label,
            owner: b.0,
            begin: b.1,
            length: len.unwrap_or(v.length).min(v.length),
            regs: v.mapping_regs,
            reg_offset: v.reg_offset,
        })
    }

    fn resolve_drop(&self, uid: UsingId, diags: &mut dyn DiagnosticConsumer) -> ResolvedEntry {
        let def = &self.usings[uid].definition;
        let mut args = Vec::new();

        for &e in def.base.iter() {
            let expr = &self.expr_values[e];
            let rng = expr.expr.range;

            if !expr.label.is_empty() {
                args.push((DropArg::Label(expr.label), rng));
                continue;
            }
            match &expr.value {
                SymbolValue::Abs(v) if (0..REG_SET_SIZE as i32).contains(v) => {
                    args.push((DropArg::Register(*v as i8), rng));
                }
                _ => diags.add(diagnostic::error_u003(rng)),
            }
        }

        ResolvedEntry::Drop {
            parent: def.parent,
            args,
        }
    }

    fn compute_context(
        &self,
        resolved: &ResolvedEntry,
        diags: &mut dyn DiagnosticConsumer,
    ) -> UsingContextData {
        let parent = match resolved {
            ResolvedEntry::Failed { parent } => *parent,
            ResolvedEntry::Using(u) => u.parent,
            ResolvedEntry::Drop { parent, .. } => *parent,
        };
        let mut context = parent
            .map(|p| self.usings[p].context.clone())
            .unwrap_or_default();

        match resolved {
            ResolvedEntry::Failed { .. } => {}
            ResolvedEntry::Using(u) => {
                if !u.label.is_empty() {
                    // A relabelled USING silently supersedes the previous
                    // mapping with the same label.
                    context.state.retain(|e| e.label != u.label);
                }
                context.state.push(UsingContextEntry {
                    label: u.label,
                    owner: u.owner,
                    offset: u.begin,
                    length: u.length,
                    regs: u.regs,
                    reg_offset: u.reg_offset,
                });
            }
            ResolvedEntry::Drop { args, .. } => {
                for (arg, rng) in args {
                    let removed = match arg {
                        DropArg::Label(label) => {
                            let before = context.state.len();
                            context.state.retain(|e| e.label != *label);
                            before - context.state.len()
                        }
                        DropArg::Register(reg) => {
                            let mut invalidated = 0;
                            for e in context.state.iter_mut() {
                                if !e.label.is_empty() {
                                    continue;
                                }
                                for r in e.regs.iter_mut() {
                                    if *r == *reg {
                                        *r = INVALID_REGISTER;
                                        invalidated += 1;
                                    }
                                }
                            }
                            context.state.retain(|e| e.regs != INVALID_REGISTER_SET);
                            invalidated
                        }
                    };
                    if removed == 0 {
                        let what = match arg {
                            DropArg::Label(_) => "label".to_string(),
                            DropArg::Register(reg) => reg.to_string(),
                        };
                        diags.add(diagnostic::warn_u001(*rng, &what));
                    }
                }
            }
        }

        context
    }

    /// Resolve `(label, section, offset)` to `(base register,
    /// displacement)` in the state `context_id`. With no active state only
    /// the implicit zero mapping applies.
    pub fn evaluate(
        &self,
        context_id: Option<UsingId>,
        label: IdIndex,
        owner: Option<SectionId>,
        offset: i32,
        long_offset: bool,
    ) -> UsingEvaluateResult {
        debug_assert!(self.resolved);
        let empty = UsingContextData::default();
        let ctx = match context_id {
            Some(id) => &self.usings[id].context,
            None => &empty,
        };

        let tmp = ctx.evaluate(label, owner, offset, long_offset);
        if tmp.length < 0 {
            UsingEvaluateResult {
                reg: INVALID_REGISTER,
                reg_offset: 1 - tmp.length,
            }
        } else {
            UsingEvaluateResult {
                reg: tmp.mapping_regs[0],
                reg_offset: tmp.reg_offset,
            }
        }
    }

    /// Is there any row mapping `(label, section)` in the given state?
    pub fn is_label_mapping_section(
        &self,
        context_id: Option<UsingId>,
        label: IdIndex,
        owner: Option<SectionId>,
    ) -> bool {
        let Some(id) = context_id else { return false };
        self.usings[id]
            .context
            .state
            .iter()
            .any(|e| e.label == label && e.owner == owner)
    }

    /// Describe the active mappings of a state, for hover rendering.
    pub fn describe(&self, context_id: Option<UsingId>) -> Vec<UsingContextDescription> {
        let Some(id) = context_id else {
            return Vec::new();
        };
        self.usings[id]
            .context
            .state
            .iter()
            .map(|e| UsingContextDescription {
                label: e.label,
                section: e.owner,
                offset: e.offset,
                length: e.length,
                reg_offset: e.reg_offset,
                regs: e
                    .regs
                    .iter()
                    .copied()
                    .take_while(|&r| r != INVALID_REGISTER)
                    .collect(),
            })
            .collect()
    }
}

/// Wraps a consumer, attributing diagnostics back to the recording
/// statement.
struct StackedDiags<'a> {
    inner: &'a mut dyn DiagnosticConsumer,
    stack: Range,
}

impl DiagnosticConsumer for StackedDiags<'_> {
    fn add(&mut self, mut diagnostic: Diagnostic) {
        if diagnostic.range == Range::default() {
            diagnostic.range = self.stack;
        }
        self.inner.add(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(entries: Vec<UsingContextEntry>) -> UsingContextData {
        UsingContextData { state: entries }
    }

    fn entry(owner: SectionId, offset: i32, length: i32, regs: &[i8]) -> UsingContextEntry {
        let mut reg_set = INVALID_REGISTER_SET;
        reg_set[..regs.len()].copy_from_slice(regs);
        UsingContextEntry {
            label: IdIndex::EMPTY,
            owner: Some(owner),
            offset,
            length,
            regs: reg_set,
            reg_offset: 0,
        }
    }

    fn sect() -> SectionId {
        SectionId::from_u32(0)
    }

    #[test]
    fn single_base_in_range() {
        let ctx = ctx_with(vec![entry(sect(), 0, 0x1000, &[12])]);
        let r = ctx.evaluate(IdIndex::EMPTY, Some(sect()), 0x20, false);
        assert_eq!(r.mapping_regs[0], 12);
        assert_eq!(r.reg_offset, 0x20);
    }

    #[test]
    fn multiple_bases_split_the_window() {
        // Two registers cover 8 KiB; 0x1004 lands in the second register.
        let ctx = ctx_with(vec![entry(sect(), 0, 0x2000, &[2, 3])]);
        let r = ctx.evaluate(IdIndex::EMPTY, Some(sect()), 0x1004, false);
        assert_eq!(r.mapping_regs[0], 3);
        assert_eq!(r.reg_offset, 4);
    }

    #[test]
    fn out_of_range_reports_distance() {
        let ctx = ctx_with(vec![entry(sect(), 0, 0x1000, &[1])]);
        let r = ctx.evaluate(IdIndex::EMPTY, Some(sect()), 0x1000, false);
        // One byte past the window.
        assert_eq!(r.mapping_regs, INVALID_REGISTER_SET);
        assert!(r.length <= 0);
    }

    #[test]
    fn higher_register_wins_ties() {
        let mut a = entry(sect(), 0, 0x1000, &[5]);
        a.length = 0x1000;
        let b = entry(sect(), 0, 0x1000, &[9]);
        let ctx = ctx_with(vec![a, b]);
        let r = ctx.evaluate(IdIndex::EMPTY, Some(sect()), 0x10, false);
        assert_eq!(r.mapping_regs[0], 9);
    }

    #[test]
    fn long_displacement_allows_negative() {
        let ctx = ctx_with(vec![entry(sect(), 0x100, 0x1000, &[7])]);
        let short = ctx.evaluate(IdIndex::EMPTY, Some(sect()), 0x80, false);
        assert_eq!(short.mapping_regs, INVALID_REGISTER_SET);

        let long = ctx.evaluate(IdIndex::EMPTY, Some(sect()), 0x80, true);
        assert_eq!(long.mapping_regs[0], 7);
        assert_eq!(long.reg_offset, -0x80);
    }

    #[test]
    fn implicit_zero_mapping() {
        let ctx = UsingContextData::default();
        let r = ctx.evaluate(IdIndex::EMPTY, None, 0x10, false);
        assert_eq!(r.mapping_regs[0], 0);
        assert_eq!(r.reg_offset, 0x10);
    }
}
