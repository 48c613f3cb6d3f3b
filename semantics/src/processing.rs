//! The statement pipeline.
//!
//! Parsed statements are dispatched by opcode form. Side effects on the
//! symbol table, location counters, and the USING collection happen in
//! program order; machine statements are postponed wholesale and checked
//! once the USING collection resolves at end of input. Definitions that
//! cannot be computed yet become dependency-table edges.

use crate::checking;
use crate::context::dependency::{
    DependencySolver, EvalContext, PostponedStatement, Resolver,
};
use crate::context::section::SectionKind;
use crate::context::space::{HALFWORD, NO_ALIGN};
use crate::context::symbol::{
    DataAttrKind, Symbol, SymbolAttributes, SymbolOrigin, SymbolValue, SymbolValueKind,
};
use crate::context::{evaluate_with, AssemblyContext, ContextSolver};
use crate::diagnostic::{
    self, CollectedDiagnostics, Diagnostic, DiagnosticConsumer, Range,
};
use crate::expr::data_def::{DataDefinition, Nominal};
use crate::expr::{DataAttrTarget, MachExpr, MachExprKind};
use crate::ids::IdIndex;
use crate::inst::{
    AssemblerInstruction, CaInstruction, MachineInstruction, MnemonicCode,
};
use std::sync::atomic::{AtomicU8, Ordering};

/// Resolved operation code of a statement.
#[derive(Copy, Clone)]
pub enum OpCode {
    Machine(&'static MachineInstruction),
    Mnemonic(&'static MnemonicCode),
    Assembler(&'static AssemblerInstruction),
    Ca(&'static CaInstruction),
    /// A macro call; expansion is outside this crate.
    Macro(IdIndex),
    Unknown(IdIndex),
}

impl std::fmt::Debug for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OpCode::Machine(m) => write!(f, "mach:{}", m.name),
            OpCode::Mnemonic(m) => write!(f, "mnemo:{}", m.name),
            OpCode::Assembler(a) => write!(f, "asm:{}", a.name),
            OpCode::Ca(c) => write!(f, "ca:{}", c.name),
            OpCode::Macro(_) => write!(f, "macro"),
            OpCode::Unknown(_) => write!(f, "unknown"),
        }
    }
}

/// A machine-style operand `D`, `D(B)`, or `D(X,B)`.
#[derive(Clone, Debug)]
pub struct MachOperand {
    pub displacement: MachExpr,
    pub index: Option<MachExpr>,
    pub base: Option<MachExpr>,
    pub range: Range,
}

/// A statement operand, pre-shaped by the reader according to the opcode
/// form.
#[derive(Clone, Debug)]
pub enum Operand {
    /// A plain expression (assembler instructions).
    Expr { expr: MachExpr, range: Range },
    /// `D(X,B)`-shaped machine operand.
    Mach(MachOperand),
    /// A parenthesized pair, e.g. the `(begin,end)` of a USING.
    Pair {
        first: MachExpr,
        second: MachExpr,
        range: Range,
    },
    /// A data definition (DC/DS operands).
    Data { dd: DataDefinition, range: Range },
    /// A syntactically empty operand.
    Empty { range: Range },
}

/// A statement label.
#[derive(Copy, Clone, Debug)]
pub struct Label {
    pub name: IdIndex,
    pub range: Range,
}

/// One parsed statement, as handed over by the reader.
#[derive(Debug)]
pub struct Statement {
    pub label: Option<Label>,
    pub opcode: Option<(OpCode, Range)>,
    pub operands: Vec<Operand>,
    pub remark: Option<Range>,
    pub range: Range,
}

/// A recorded symbol occurrence, feeding the front-end queries.
#[derive(Copy, Clone, Debug)]
pub struct Occurrence {
    pub name: IdIndex,
    pub range: Range,
    pub definition: bool,
}

/// Token scopes exposed through the semantic-token query.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TokenScope {
    Label,
    Instruction,
    Remark,
    Comment,
    Continuation,
    SeqSymbol,
    VarSymbol,
    Operator,
    String,
    Number,
    Operand,
    DataDefType,
    DataDefModifier,
    DataAttrType,
    SelfDefType,
    OrdinarySymbol,
}

#[derive(Copy, Clone, Debug)]
pub struct SemanticToken {
    pub range: Range,
    pub scope: TokenScope,
}

/// The analyzer: feeds statements through the pipeline and owns every
/// result of the analysis.
pub struct Analyzer {
    pub ctx: AssemblyContext,
    pub diags: CollectedDiagnostics,
    queue: Vec<Option<Statement>>,
    next: usize,
    finished: bool,
    occurrences: Vec<Occurrence>,
    tokens: Vec<SemanticToken>,
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            ctx: AssemblyContext::new(),
            diags: CollectedDiagnostics::new(),
            queue: Vec::new(),
            next: 0,
            finished: false,
            occurrences: Vec::new(),
            tokens: Vec::new(),
        }
    }

    /// Queue statements for processing; they run at the next [`Self::idle`].
    pub fn append(&mut self, statements: impl IntoIterator<Item = Statement>) {
        self.queue.extend(statements.into_iter().map(Some));
    }

    /// Process queued statements cooperatively. When `yield_flag` becomes
    /// non-zero between statements, processing stops and `false` is
    /// returned; call again to resume. Returns `true` once the whole input
    /// including end-of-input resolution is done.
    pub fn idle(&mut self, yield_flag: Option<&AtomicU8>) -> bool {
        while self.next < self.queue.len() {
            if let Some(flag) = yield_flag {
                if flag.load(Ordering::Relaxed) != 0 {
                    return false;
                }
            }
            let stmt = self.queue[self.next]
                .take()
                .expect("statements are processed once");
            self.next += 1;
            self.process(stmt);
        }
        if !self.finished {
            self.finished = true;
            self.finish();
        }
        true
    }

    /// Convenience entry for non-cooperative callers.
    pub fn analyze(&mut self) {
        let done = self.idle(None);
        debug_assert!(done);
    }

    pub fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }

    pub fn semantic_tokens(&self) -> &[SemanticToken] {
        &self.tokens
    }

    // -- dispatch ----------------------------------------------------

    fn process(&mut self, stmt: Statement) {
        self.record_tokens(&stmt);

        let Some((opcode, opcode_range)) = stmt.opcode else {
            return;
        };
        log::trace!("processing {:?} at {}", opcode, stmt.range);

        match opcode {
            OpCode::Machine(instr) => self.process_machine(stmt, instr),
            OpCode::Mnemonic(mnemo) => self.process_machine(stmt, mnemo.instruction()),
            OpCode::Assembler(asm) => self.process_assembler(stmt, asm),
            OpCode::Ca(_) | OpCode::Macro(_) => {
                // Conditional assembly and macro calls are the expander's
                // business; they do not touch the ordinary context.
            }
            OpCode::Unknown(name) => {
                let text = self.ctx.ord.ids.resolve(name).to_string();
                self.diags
                    .add(diagnostic::error_e010("operation code", &text, opcode_range));
            }
        }
    }

    fn process_machine(&mut self, stmt: Statement, instr: &'static MachineInstruction) {
        self.ctx.ord.next_unique_id();

        self.ctx.ord.align(&mut self.ctx.deps, HALFWORD);
        let address = self.ctx.ord.current_address();

        if let Some(label) = stmt.label {
            self.record_occurrence(label.name, label.range, true);
            self.define_label(
                label,
                SymbolValue::Reloc(address.clone()),
                SymbolAttributes::machine(instr.size_bytes() as u32),
            );
        }

        self.ctx
            .ord
            .reserve_storage_area(&mut self.ctx.deps, instr.size_bytes() as i32, NO_ALIGN);

        let eval = self.ctx.ord.capture_eval_context(Some(address));

        // Collect dependencies now: this interns literal operands in the
        // current pool generation and records symbol candidates.
        for op in &stmt.operands {
            self.scan_operand(op, &eval);
        }

        let stack = stmt.range;
        self.ctx.deps.add_postponed_statement(PostponedStatement {
            stmt,
            eval,
            stack,
        });
    }

    fn scan_operand(&mut self, op: &Operand, eval: &EvalContext) {
        let exprs: Vec<&MachExpr> = match op {
            Operand::Expr { expr, .. } => vec![expr],
            Operand::Mach(m) => [Some(&m.displacement), m.index.as_ref(), m.base.as_ref()]
                .into_iter()
                .flatten()
                .collect(),
            Operand::Pair { first, second, .. } => vec![first, second],
            Operand::Data { .. } | Operand::Empty { .. } => Vec::new(),
        };
        for expr in exprs {
            expr.for_each_symbol_ref(&mut |name, range| {
                self.occurrences.push(Occurrence {
                    name,
                    range,
                    definition: false,
                });
            });
            let mut solver = ContextSolver::new(&mut self.ctx.ord, eval);
            let _ = expr.get_dependencies(&mut solver);
        }
    }

    fn define_label(&mut self, label: Label, value: SymbolValue, attrs: SymbolAttributes) {
        if label.name.is_empty() {
            return;
        }
        if self.ctx.ord.symbol_defined(label.name) {
            let text = self.ctx.ord.ids.resolve(label.name).to_string();
            self.diags.add(diagnostic::error_e031(&text, label.range));
            return;
        }
        let sym = Symbol::new(label.name, value, attrs, label.range);
        if !self.ctx.define_symbol(&mut self.diags, sym) {
            self.diags.add(diagnostic::error_e033(label.range));
        }
    }

    // -- assembler statements ----------------------------------------

    fn process_assembler(&mut self, stmt: Statement, asm: &'static AssemblerInstruction) {
        self.ctx.ord.next_unique_id();

        if stmt.operands.len() < asm.min_operands
            || asm
                .max_operands
                .map(|max| stmt.operands.len() > max)
                .unwrap_or(false)
        {
            self.diags.add(diagnostic::error_a012(asm.name, stmt.range));
            return;
        }

        match asm.name {
            "CSECT" => self.process_section(stmt, SectionKind::Executable),
            "RSECT" => self.process_section(stmt, SectionKind::ReadOnly),
            "DSECT" => self.process_section(stmt, SectionKind::Dummy),
            "COM" => self.process_section(stmt, SectionKind::Common),
            "START" => self.process_start(stmt),
            "LOCTR" => self.process_loctr(stmt),
            "EQU" => self.process_equ(stmt),
            "DC" | "DS" => self.process_data(stmt),
            "ORG" => self.process_org(stmt),
            "LTORG" => {
                self.ctx.generate_literal_pool(&mut self.diags, true);
            }
            "USING" => self.process_using(stmt),
            "DROP" => self.process_drop(stmt),
            "EXTRN" => self.process_externals(stmt, SectionKind::External),
            "WXTRN" => self.process_externals(stmt, SectionKind::WeakExternal),
            "END" => {
                // Processing past END is not meaningful; the queue runs
                // dry and `finish` does the rest.
            }
            _ => {
                // Listing-control statements carry no ordinary-assembly
                // semantics.
            }
        }
    }

    fn process_section(&mut self, stmt: Statement, kind: SectionKind) {
        let name = stmt.label.map(|l| l.name).unwrap_or(IdIndex::EMPTY);

        if !name.is_empty() && self.ctx.ord.symbol_defined(name) {
            let defined_as_section = self
                .ctx
                .ord
                .sections
                .values()
                .any(|s| s.name == name);
            if !defined_as_section || !self.ctx.ord.section_defined(name, kind) {
                let text = self.ctx.ord.ids.resolve(name).to_string();
                self.diags.add(diagnostic::error_a165(&text, stmt.range));
                return;
            }
        }

        let (section, is_new) = self.ctx.ord.set_section(name, kind);
        if is_new && !name.is_empty() {
            let addr = {
                let ctr = self.ctx.ord.sections[section].current_location_counter();
                self.ctx.ord.counters[ctr].current_address(&self.ctx.ord.spaces)
            };
            if let Some(label) = stmt.label {
                self.record_occurrence(label.name, label.range, true);
                self.define_label(label, SymbolValue::Reloc(addr), SymbolAttributes::section());
            }
        } else if let Some(label) = stmt.label {
            self.record_occurrence(label.name, label.range, false);
        }
    }

    fn process_start(&mut self, stmt: Statement) {
        // START behaves like CSECT for the symbol table; the origin value
        // only shifts listing addresses, so it is evaluated for
        // diagnostics and otherwise ignored.
        if let Some(Operand::Expr { expr, range }) = stmt.operands.first() {
            let eval = self.ctx.ord.capture_eval_context(None);
            let value = evaluate_with(&mut self.ctx.ord, &eval, expr, &mut self.diags);
            if value.kind() == SymbolValueKind::Reloc {
                self.diags.add(diagnostic::error_me010(*range));
            }
        }
        let stmt = Statement {
            operands: Vec::new(),
            ..stmt
        };
        self.process_section(stmt, SectionKind::Executable);
    }

    fn process_loctr(&mut self, stmt: Statement) {
        let Some(label) = stmt.label else {
            self.diags.add(diagnostic::error_a012("LOCTR", stmt.range));
            return;
        };
        if self.ctx.ord.counter_defined(label.name) {
            self.ctx.ord.set_location_counter(label.name);
            self.record_occurrence(label.name, label.range, false);
            return;
        }
        if self.ctx.ord.symbol_defined(label.name) {
            let text = self.ctx.ord.ids.resolve(label.name).to_string();
            self.diags.add(diagnostic::error_e031(&text, label.range));
            return;
        }
        let (ctr, _) = self.ctx.ord.set_location_counter(label.name);
        let addr = self.ctx.ord.counters[ctr].current_address(&self.ctx.ord.spaces);
        self.record_occurrence(label.name, label.range, true);
        self.define_label(label, SymbolValue::Reloc(addr), SymbolAttributes::section());
    }

    fn process_equ(&mut self, stmt: Statement) {
        let Some(label) = stmt.label else {
            self.diags.add(diagnostic::error_a012("EQU", stmt.range));
            return;
        };
        self.record_occurrence(label.name, label.range, true);

        let Some(Operand::Expr { expr, .. }) = stmt.operands.first() else {
            self.diags.add(diagnostic::error_a104("EQU", stmt.range));
            return;
        };
        let value_expr = expr.clone();

        let address = self.ctx.ord.current_address();
        let eval = self.ctx.ord.capture_eval_context(Some(address));

        // Explicit length (second) and type (third) attribute operands.
        let mut length_attr: Option<u32> = None;
        let mut type_attr: Option<u16> = None;
        for (idx, op) in stmt.operands.iter().enumerate().skip(1).take(2) {
            let Operand::Expr { expr, range } = op else {
                continue;
            };
            let value = evaluate_with(&mut self.ctx.ord, &eval, expr, &mut self.diags);
            match value.as_abs() {
                Some(v) if v >= 0 => {
                    if idx == 1 {
                        length_attr = Some(v as u32);
                    } else {
                        type_attr = Some((v & 0xFF) as u16);
                    }
                }
                _ => self.diags.add(diagnostic::error_a164(*range)),
            }
        }

        self.scan_operand(&stmt.operands[0], &eval);

        let deps = {
            let mut solver = ContextSolver::new(&mut self.ctx.ord, &eval);
            value_expr.get_dependencies(&mut solver)
        };

        // Default the length attribute from the leftmost term.
        let mut attrs = SymbolAttributes::undefined(SymbolOrigin::Equate);
        if let Some(t) = type_attr {
            attrs = SymbolAttributes::new(
                SymbolOrigin::Equate,
                t,
                SymbolAttributes::UNDEF_LENGTH,
                SymbolAttributes::UNDEF_SCALE,
                SymbolAttributes::UNDEF_LENGTH,
            );
        }
        let mut pending_length: Option<MachExpr> = None;
        match length_attr {
            Some(l) => attrs.set_length(l),
            None => match &value_expr.leftmost_term().kind {
                MachExprKind::Symbol { name, .. } => {
                    let defined_length = self
                        .ctx
                        .ord
                        .get_symbol(*name)
                        .map(|s| s.attributes().is_defined(DataAttrKind::L))
                        .unwrap_or(false);
                    if defined_length {
                        let l = self.ctx.ord.get_symbol(*name).unwrap().attributes().length();
                        attrs.set_length(l);
                    } else {
                        pending_length = Some(MachExpr::new(
                            MachExprKind::DataAttr {
                                target: DataAttrTarget::Symbol { name: *name },
                                attr: DataAttrKind::L,
                                symbol_range: value_expr.range,
                            },
                            value_expr.range,
                        ));
                    }
                }
                _ => attrs.set_length(1),
            },
        }

        if deps.has_error {
            self.diags.add(diagnostic::error_a104("EQU", stmt.range));
            return;
        }

        if !deps.contains_dependencies(&self.ctx.ord.spaces) {
            let value = evaluate_with(&mut self.ctx.ord, &eval, &value_expr, &mut self.diags);
            self.define_label(label, value, attrs);
            if let Some(length_expr) = pending_length {
                self.ctx.deps.add_attr_dependency(
                    &mut self.ctx.ord,
                    &mut self.diags,
                    label.name,
                    DataAttrKind::L,
                    Resolver::Expr(length_expr),
                    eval,
                    None,
                );
            }
            return;
        }

        // Defer: create the symbol undefined and register the edges.
        let name = label.name;
        if self.ctx.ord.symbol_defined(name) {
            let text = self.ctx.ord.ids.resolve(name).to_string();
            self.diags.add(diagnostic::error_e031(&text, label.range));
            return;
        }
        let stack = stmt.range;
        self.ctx
            .ord
            .insert_symbol(Symbol::new(name, SymbolValue::Undef, attrs, label.range));

        let cycle_free = self.ctx.deps.add_symbol_dependency(
            &mut self.ctx.ord,
            &mut self.diags,
            name,
            Resolver::Expr(value_expr),
            eval.clone(),
            Some(PostponedStatement {
                stmt,
                eval: eval.clone(),
                stack,
            }),
        );
        if !cycle_free {
            self.diags.add(diagnostic::error_e033(label.range));
        }

        if let Some(length_expr) = pending_length {
            self.ctx.deps.add_attr_dependency(
                &mut self.ctx.ord,
                &mut self.diags,
                name,
                DataAttrKind::L,
                Resolver::Expr(length_expr),
                eval,
                None,
            );
        }
    }

    fn process_data(&mut self, stmt: Statement) {
        let address = self.ctx.ord.current_address();
        let eval = self.ctx.ord.capture_eval_context(Some(address));

        let mut label = stmt.label;

        for op in &stmt.operands {
            let Operand::Data { dd, range } = op else {
                self.diags
                    .add(diagnostic::error_a104("DC", checking::operand_range(op)));
                continue;
            };
            if !DataDefinition::known_type(dd.type_) {
                self.diags.add(diagnostic::error_d012(*range, dd.type_));
                continue;
            }

            // Symbol references inside the definition feed candidates and
            // occurrences.
            let mut solver = ContextSolver::new(&mut self.ctx.ord, &eval);
            let _ = dd.get_dependencies(&mut solver);

            let length_deps = {
                let mut solver = ContextSolver::new(&mut self.ctx.ord, &eval);
                dd.get_length_dependencies(&mut solver)
            };

            let alignment = dd.alignment();
            if !length_deps.contains_dependencies(&self.ctx.ord.spaces) {
                let (length, attrs) = {
                    let mut solver = ContextSolver::new(&mut self.ctx.ord, &eval);
                    let length = dd.total_length(&mut solver);
                    let attrs = dd.attributes(&mut solver);
                    (length, attrs)
                };
                self.ctx.ord.align(&mut self.ctx.deps, alignment);
                let addr = self.ctx.ord.current_address();
                self.ctx
                    .ord
                    .reserve_storage_area(&mut self.ctx.deps, length, NO_ALIGN);
                if let Some(l) = label.take() {
                    self.record_occurrence(l.name, l.range, true);
                    self.define_label(l, SymbolValue::Reloc(addr), attrs);
                }
            } else {
                // Unknown total length: the storage becomes a space fed by
                // the definition's length.
                self.ctx.ord.align(&mut self.ctx.deps, alignment);
                let addr = self.ctx.ord.current_address();
                let sp = self.ctx.ord.register_ordinary_space(NO_ALIGN);
                self.ctx.deps.add_space_dependency(
                    sp,
                    Resolver::DataDefLength(dd.clone()),
                    eval.clone(),
                    None,
                );

                if let Some(l) = label.take() {
                    self.record_occurrence(l.name, l.range, true);
                    let name = l.name;
                    if self.ctx.ord.symbol_defined(name) {
                        let text = self.ctx.ord.ids.resolve(name).to_string();
                        self.diags.add(diagnostic::error_e031(&text, l.range));
                        continue;
                    }
                    // Type and scale are known statically. The length is
                    // too, unless the modifier itself is the unresolved
                    // part; then it gets its own edge.
                    let modifier_unresolved = match dd.length.as_deref() {
                        None => false,
                        Some(expr) => {
                            let mut solver = ContextSolver::new(&mut self.ctx.ord, &eval);
                            expr.get_dependencies(&mut solver)
                                .contains_dependencies(solver.spaces())
                        }
                    };
                    let length = if modifier_unresolved {
                        SymbolAttributes::UNDEF_LENGTH
                    } else {
                        let mut solver = ContextSolver::new(&mut self.ctx.ord, &eval);
                        dd.length_attribute(&mut solver)
                    };
                    let attrs = SymbolAttributes::new(
                        SymbolOrigin::Data,
                        crate::context::symbol::ebcdic(dd.type_.to_ascii_uppercase()),
                        length,
                        dd.scale_attribute(),
                        SymbolAttributes::UNDEF_LENGTH,
                    );
                    if !self.ctx.define_symbol(
                        &mut self.diags,
                        Symbol::new(name, SymbolValue::Reloc(addr), attrs, l.range),
                    ) {
                        self.diags.add(diagnostic::error_e033(l.range));
                    }
                    if modifier_unresolved {
                        let length_expr = dd.length.as_deref().expect("modifier present");
                        self.ctx.deps.add_attr_dependency(
                            &mut self.ctx.ord,
                            &mut self.diags,
                            name,
                            DataAttrKind::L,
                            Resolver::Expr(length_expr.clone()),
                            eval.clone(),
                            None,
                        );
                    }
                }
            }
        }

        // Every DC/DS is postponed: the value checks (nominal shapes,
        // modifier ranges) run once its dependencies resolved.
        let stack = stmt.range;
        self.ctx.deps.add_postponed_statement(PostponedStatement {
            stmt,
            eval,
            stack,
        });
    }

    fn process_org(&mut self, stmt: Statement) {
        let address = self.ctx.ord.current_address();
        let eval = self.ctx.ord.capture_eval_context(Some(address));

        let mut boundary = 0u32;
        let mut offset = 0i32;
        for (idx, op) in stmt.operands.iter().enumerate().skip(1).take(2) {
            let Operand::Expr { expr, range } = op else {
                continue;
            };
            let value = evaluate_with(&mut self.ctx.ord, &eval, expr, &mut self.diags);
            match value.as_abs() {
                Some(v) if idx == 1 && v >= 2 && (v as u32).is_power_of_two() => {
                    boundary = v as u32;
                }
                Some(v) if idx == 2 => offset = v,
                _ => self.diags.add(diagnostic::error_a104("ORG", *range)),
            }
        }

        let target = match stmt.operands.first() {
            None | Some(Operand::Empty { .. }) => {
                self.ctx.ord.set_available_location_counter_value(
                    &mut self.ctx.deps,
                    boundary,
                    offset,
                );
                return;
            }
            Some(Operand::Expr { expr, .. }) => expr.clone(),
            Some(other) => {
                self.diags.add(diagnostic::error_a104(
                    "ORG",
                    checking::operand_range(other),
                ));
                return;
            }
        };

        self.scan_operand(&stmt.operands[0], &eval);

        let deps = {
            let mut solver = ContextSolver::new(&mut self.ctx.ord, &eval);
            target.get_dependencies(&mut solver)
        };
        if deps.has_error {
            self.diags.add(diagnostic::error_a104("ORG", stmt.range));
            return;
        }

        let has_undefined_symbols = !deps.undefined_symbolics.is_empty();
        if has_undefined_symbols {
            let stack = stmt.range;
            self.ctx.ord.set_location_counter_value_undefined(
                &mut self.ctx.deps,
                boundary,
                offset,
                Resolver::AbsPart(Box::new(target)),
                eval.clone(),
                Some(PostponedStatement {
                    stmt,
                    eval,
                    stack,
                }),
            );
            return;
        }

        let value = evaluate_with(&mut self.ctx.ord, &eval, &target, &mut self.diags);
        match value {
            SymbolValue::Reloc(addr) => {
                if !self.ctx.ord.set_location_counter_value(
                    &mut self.ctx.deps,
                    &addr,
                    boundary,
                    offset,
                ) {
                    self.diags.add(diagnostic::error_a251(stmt.range));
                }
            }
            _ => self.diags.add(diagnostic::error_a251(stmt.range)),
        }
    }

    fn process_using(&mut self, stmt: Statement) {
        let address = self.ctx.ord.current_address();
        let eval = self.ctx.ord.capture_eval_context(Some(address));

        let label = stmt.label.map(|l| l.name).unwrap_or(IdIndex::EMPTY);
        if !label.is_empty() {
            self.ctx.ord.register_using_label(label);
            let l = stmt.label.unwrap();
            self.record_occurrence(l.name, l.range, true);
        }

        let mut operands = stmt.operands.into_iter();
        let (begin, end) = match operands.next() {
            Some(Operand::Expr { expr, .. }) => (expr, None),
            Some(Operand::Pair { first, second, .. }) => (first, Some(second)),
            Some(other) => {
                self.diags.add(diagnostic::error_m113(
                    "USING",
                    checking::operand_range(&other),
                ));
                return;
            }
            None => return,
        };

        let mut bases = Vec::new();
        for op in operands {
            match op {
                Operand::Expr { expr, .. } => bases.push(expr),
                other => self.diags.add(diagnostic::error_m113(
                    "USING",
                    checking::operand_range(&other),
                )),
            }
        }
        if bases.is_empty() {
            self.diags.add(diagnostic::error_a012("USING", stmt.range));
            return;
        }

        for expr in bases.iter().chain(std::iter::once(&begin)).chain(end.iter()) {
            expr.for_each_symbol_ref(&mut |name, range| {
                self.occurrences.push(Occurrence {
                    name,
                    range,
                    definition: false,
                });
            });
        }

        let id = self.ctx.ord.usings.add(
            self.ctx.ord.active_using,
            label,
            begin,
            end,
            bases,
            eval,
            stmt.range,
        );
        self.ctx.ord.active_using = Some(id);
    }

    fn process_drop(&mut self, stmt: Statement) {
        let eval = self.ctx.ord.capture_eval_context(None);

        let mut args = Vec::new();
        for op in stmt.operands {
            match op {
                Operand::Expr { expr, .. } => args.push(expr),
                Operand::Empty { .. } => {}
                other => self.diags.add(diagnostic::error_u003(
                    checking::operand_range(&other),
                )),
            }
        }

        if args.is_empty() {
            // DROP without operands withdraws everything.
            self.ctx.ord.active_using = None;
            return;
        }

        let id = self
            .ctx
            .ord
            .usings
            .remove(self.ctx.ord.active_using, args, eval, stmt.range);
        self.ctx.ord.active_using = Some(id);
    }

    fn process_externals(&mut self, stmt: Statement, kind: SectionKind) {
        for op in &stmt.operands {
            let Operand::Expr { expr, range } = op else {
                continue;
            };
            let MachExprKind::Symbol { name, .. } = &expr.kind else {
                self.diags.add(diagnostic::error_a104(
                    if kind == SectionKind::External {
                        "EXTRN"
                    } else {
                        "WXTRN"
                    },
                    *range,
                ));
                continue;
            };
            let name = *name;
            if self.ctx.ord.symbol_defined(name) {
                let text = self.ctx.ord.ids.resolve(name).to_string();
                self.diags.add(diagnostic::error_e031(&text, *range));
                continue;
            }
            let section = self.ctx.ord.create_external_section(name, kind);
            let addr = {
                let ctr = self.ctx.ord.sections[section].current_location_counter();
                self.ctx.ord.counters[ctr].current_address(&self.ctx.ord.spaces)
            };
            self.record_occurrence(name, *range, true);
            self.define_label(
                Label {
                    name,
                    range: *range,
                },
                SymbolValue::Reloc(addr),
                SymbolAttributes::external(),
            );
        }
    }

    // -- end of input ------------------------------------------------

    fn finish(&mut self) {
        log::debug!("end of input: forcing resolution");

        // Pending literals land in the first control section.
        self.ctx.generate_literal_pool(&mut self.diags, false);

        // Chain counters and run the fixpoint until layout settles.
        self.ctx
            .ord
            .finish_module_layout(&mut self.ctx.deps, &mut self.diags);
        self.ctx
            .deps
            .add_defined(&mut self.ctx.ord, &mut self.diags, true);

        // Only now are displacements resolvable.
        let mut usings = std::mem::take(&mut self.ctx.ord.usings);
        usings.resolve_all(&mut self.ctx.ord, &mut self.diags);
        self.ctx.ord.usings = usings;

        // Check everything that was postponed; diagnostics attach to the
        // original statement positions.
        let postponed = self.ctx.deps.collect_postponed();
        for record in postponed {
            let mut sink = AttributedDiags {
                inner: &mut self.diags,
                stack: record.stack,
            };
            checking::check_statement(&record.stmt, &record.eval, &mut self.ctx.ord, &mut sink);
        }

        // Whatever still dangles gets its default so queries see a
        // consistent final state.
        self.ctx
            .deps
            .resolve_all_as_default(&mut self.ctx.ord, &mut self.diags);
    }

    // -- bookkeeping -------------------------------------------------

    fn record_occurrence(&mut self, name: IdIndex, range: Range, definition: bool) {
        if !name.is_empty() {
            self.occurrences.push(Occurrence {
                name,
                range,
                definition,
            });
        }
    }

    fn record_tokens(&mut self, stmt: &Statement) {
        if let Some(label) = &stmt.label {
            self.tokens.push(SemanticToken {
                range: label.range,
                scope: TokenScope::Label,
            });
        }
        if let Some((_, range)) = &stmt.opcode {
            self.tokens.push(SemanticToken {
                range: *range,
                scope: TokenScope::Instruction,
            });
        }
        if let Some(remark) = stmt.remark {
            self.tokens.push(SemanticToken {
                range: remark,
                scope: TokenScope::Remark,
            });
        }
        for op in &stmt.operands {
            match op {
                Operand::Expr { expr, .. } => self.record_expr_tokens(expr),
                Operand::Pair { first, second, .. } => {
                    self.record_expr_tokens(first);
                    self.record_expr_tokens(second);
                }
                Operand::Mach(m) => {
                    self.record_expr_tokens(&m.displacement);
                    if let Some(e) = &m.index {
                        self.record_expr_tokens(e);
                    }
                    if let Some(e) = &m.base {
                        self.record_expr_tokens(e);
                    }
                }
                Operand::Data { dd, range } => {
                    self.tokens.push(SemanticToken {
                        range: *range,
                        scope: TokenScope::DataDefType,
                    });
                    if let Some(Nominal::Exprs(list)) = &dd.nominal {
                        for item in list {
                            self.record_expr_tokens(&item.expr);
                            if let Some(base) = &item.base {
                                self.record_expr_tokens(base);
                            }
                        }
                    }
                }
                Operand::Empty { .. } => {}
            }
        }
    }

    fn record_expr_tokens(&mut self, expr: &MachExpr) {
        match &expr.kind {
            MachExprKind::Constant(_) => self.tokens.push(SemanticToken {
                range: expr.range,
                scope: TokenScope::Number,
            }),
            MachExprKind::SelfDef(_) => self.tokens.push(SemanticToken {
                range: expr.range,
                scope: TokenScope::SelfDefType,
            }),
            MachExprKind::Symbol { .. } => self.tokens.push(SemanticToken {
                range: expr.range,
                scope: TokenScope::OrdinarySymbol,
            }),
            MachExprKind::DataAttr { symbol_range, .. } => {
                self.tokens.push(SemanticToken {
                    range: expr.range,
                    scope: TokenScope::DataAttrType,
                });
                self.tokens.push(SemanticToken {
                    range: *symbol_range,
                    scope: TokenScope::OrdinarySymbol,
                });
            }
            MachExprKind::LocCounter => self.tokens.push(SemanticToken {
                range: expr.range,
                scope: TokenScope::Operand,
            }),
            MachExprKind::Literal(_) => self.tokens.push(SemanticToken {
                range: expr.range,
                scope: TokenScope::String,
            }),
            MachExprKind::Binary { lhs, rhs, .. } => {
                self.record_expr_tokens(lhs);
                self.record_expr_tokens(rhs);
            }
            MachExprKind::Unary { child, .. } => self.record_expr_tokens(child),
            MachExprKind::Error => {}
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Re-attributes default-ranged diagnostics to the postponed statement's
/// position.
struct AttributedDiags<'a> {
    inner: &'a mut dyn DiagnosticConsumer,
    stack: Range,
}

impl DiagnosticConsumer for AttributedDiags<'_> {
    fn add(&mut self, mut diagnostic: Diagnostic) {
        if diagnostic.range == Range::default() {
            diagnostic.range = self.stack;
        }
        self.inner.add(diagnostic);
    }
}
