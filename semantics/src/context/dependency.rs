//! The symbol dependency engine.
//!
//! Statements whose operands mention yet-undefined symbols are not errors:
//! the definitions they set up become edges `target ← expression` in the
//! [`SymbolDependencyTables`], and every new definition re-runs the
//! fixpoint until nothing else becomes resolvable. Cycles are broken by
//! force-resolving the participants to their defaults so the rest of the
//! program stays analyzable.

use crate::context::address::Address;
use crate::context::section::SectionId;
use crate::context::space::{SpaceId, SpaceKind, Spaces};
use crate::context::symbol::{DataAttrKind, Symbol, SymbolValue};
use crate::context::using::UsingId;
use crate::context::{ContextSolver, OrdinaryAssemblyContext};
use crate::diagnostic::{self, DiagnosticConsumer, Range};
use crate::expr::data_def::DataDefinition;
use crate::expr::MachExpr;
use crate::fx::FxHashMap;
use crate::ids::IdIndex;
use crate::processing::Statement;
use bitflags::bitflags;
use hlasm_entity::{entity_impl, PrimaryMap};

bitflags! {
    /// Which parts of a symbol an expression needs: its value and/or
    /// individual attributes.
    #[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
    pub struct AttrRefMask: u16 {
        const VALUE = 1 << 0;
        const T = 1 << 1;
        const L = 1 << 2;
        const S = 1 << 3;
        const I = 1 << 4;
        const K = 1 << 5;
        const N = 1 << 6;
        const D = 1 << 7;
        const O = 1 << 8;
    }
}

fn attr_bit(attr: DataAttrKind) -> AttrRefMask {
    match attr {
        DataAttrKind::T => AttrRefMask::T,
        DataAttrKind::L => AttrRefMask::L,
        DataAttrKind::S => AttrRefMask::S,
        DataAttrKind::I => AttrRefMask::I,
        DataAttrKind::K => AttrRefMask::K,
        DataAttrKind::N => AttrRefMask::N,
        DataAttrKind::D => AttrRefMask::D,
        DataAttrKind::O => AttrRefMask::O,
    }
}

/// An undefined symbol together with the parts of it that are needed.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SymbolicReference {
    pub name: IdIndex,
    pub flags: AttrRefMask,
}

/// Anything the dependency tables can block on.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Dependant {
    Symbol(IdIndex),
    SymbolAttr(IdIndex, DataAttrKind),
    Space(SpaceId),
}

/// Result of a USING displacement resolution.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct UsingEvaluateResult {
    /// Base register, or -1 when no mapping fits.
    pub reg: i8,
    /// Displacement, or the out-of-range distance when `reg` is -1.
    pub reg_offset: i32,
}

pub const INVALID_REGISTER: i8 = -1;

/// The interface through which expressions read the assembly state.
pub trait DependencySolver {
    fn spaces(&self) -> &Spaces;
    fn get_symbol(&self, name: IdIndex) -> Option<&Symbol>;
    /// The location counter value captured for the statement being
    /// evaluated, if any.
    fn get_loctr(&self) -> Option<&Address>;
    /// Intern a literal in the pending pool and return its symbol name.
    fn get_literal_id(&mut self, text: &str, dd: &DataDefinition, range: Range) -> IdIndex;
    fn using_active(&self, label: IdIndex, section: Option<SectionId>) -> bool;
    fn using_evaluate(
        &self,
        label: IdIndex,
        section: Option<SectionId>,
        offset: i32,
        long_offset: bool,
    ) -> UsingEvaluateResult;
    /// Record that `name` was mentioned so undefined-symbol reporting can
    /// distinguish "never mentioned" from "mentioned but undefined".
    fn register_symbol_candidate(&mut self, name: IdIndex);
    fn symbol_mentioned(&self, name: IdIndex) -> bool;
    /// The `O'` attribute of an opcode name, when known.
    fn get_opcode_attr(&self, name: IdIndex) -> Option<char>;
}

/// Accumulated dependencies of an expression, combined with the same
/// operator rules as values: `+`/`-` combine addresses component-wise,
/// `*`/`/` flag relocatable operands as errors.
#[derive(Clone, Debug, Default)]
pub struct DependencyCollector {
    pub has_error: bool,
    pub unresolved_address: Option<Address>,
    pub undefined_symbolics: Vec<SymbolicReference>,
    pub unresolved_spaces: Vec<SpaceId>,
}

impl DependencyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error() -> Self {
        Self {
            has_error: true,
            ..Self::default()
        }
    }

    pub fn symbol(name: IdIndex) -> Self {
        Self {
            undefined_symbolics: vec![SymbolicReference {
                name,
                flags: AttrRefMask::VALUE,
            }],
            ..Self::default()
        }
    }

    pub fn attr(name: IdIndex, attr: DataAttrKind) -> Self {
        Self {
            undefined_symbolics: vec![SymbolicReference {
                name,
                flags: attr_bit(attr),
            }],
            ..Self::default()
        }
    }

    pub fn address(addr: Address) -> Self {
        Self {
            unresolved_address: Some(addr),
            ..Self::default()
        }
    }

    pub fn add(mut self, other: Self, spaces: &Spaces) -> Self {
        if !self.merge_undef(&other) {
            self.add_sub(other, true, spaces);
        }
        self
    }

    pub fn sub(mut self, other: Self, spaces: &Spaces) -> Self {
        if !self.merge_undef(&other) {
            self.add_sub(other, false, spaces);
        }
        self
    }

    pub fn mul(mut self, other: Self, spaces: &Spaces) -> Self {
        if !self.merge_undef(&other) {
            self.div_mul(&other, spaces);
        }
        self
    }

    pub fn div(mut self, other: Self, spaces: &Spaces) -> Self {
        if !self.merge_undef(&other) {
            self.div_mul(&other, spaces);
        }
        self
    }

    /// Merge without operator semantics; addresses decay into their
    /// unresolved spaces.
    pub fn merge(mut self, other: Self, spaces: &Spaces) -> Self {
        self.merge_undef(&other);
        for addr in [self.unresolved_address.take(), other.unresolved_address] {
            if let Some(addr) = addr {
                let (entries, _) = addr.normalized_spaces(spaces);
                for (sp, _) in entries {
                    insert_sorted(&mut self.unresolved_spaces, sp);
                }
            }
        }
        for sp in other.unresolved_spaces {
            insert_sorted(&mut self.unresolved_spaces, sp);
        }
        self
    }

    /// An address-valued dependency (some base survives).
    pub fn is_address(&self) -> bool {
        self.undefined_symbolics
            .iter()
            .all(|s| !s.flags.contains(AttrRefMask::VALUE))
            && self
                .unresolved_address
                .as_ref()
                .map(|a| !a.bases().is_empty())
                .unwrap_or(false)
    }

    pub fn contains_dependencies(&self, spaces: &Spaces) -> bool {
        !self.undefined_symbolics.is_empty()
            || self.unresolved_spaces.iter().any(|&sp| spaces.has_unresolved(sp))
            || self
                .unresolved_address
                .as_ref()
                .map(|a| a.has_unresolved_space(spaces))
                .unwrap_or(false)
    }

    /// The distinct names of undefined symbols, for E010 reporting.
    pub fn unique_symbolic_names(&self) -> Vec<IdIndex> {
        let mut names: Vec<IdIndex> = self.undefined_symbolics.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    fn merge_undef(&mut self, other: &Self) -> bool {
        self.has_error |= other.has_error;

        for sym in &other.undefined_symbolics {
            match self
                .undefined_symbolics
                .binary_search_by_key(&sym.name, |s| s.name)
            {
                Ok(pos) => self.undefined_symbolics[pos].flags |= sym.flags,
                Err(pos) => self.undefined_symbolics.insert(pos, *sym),
            }
        }
        for &sp in &other.unresolved_spaces {
            insert_sorted(&mut self.unresolved_spaces, sp);
        }

        self.has_error
            || self
                .undefined_symbolics
                .iter()
                .any(|s| s.flags.contains(AttrRefMask::VALUE))
    }

    fn add_sub(&mut self, other: Self, add: bool, spaces: &Spaces) {
        match (&mut self.unresolved_address, other.unresolved_address) {
            (Some(mine), Some(theirs)) => {
                *mine = if add {
                    mine.add(&theirs, spaces)
                } else {
                    mine.sub(&theirs, spaces)
                };
            }
            (mine @ None, Some(theirs)) => {
                *mine = Some(if add { theirs } else { theirs.negated(spaces) });
            }
            _ => {}
        }
    }

    fn div_mul(&mut self, other: &Self, spaces: &Spaces) {
        if self.is_address() || other.is_address() {
            self.has_error = true;
            return;
        }
        for addr in [
            self.unresolved_address.take(),
            other.unresolved_address.clone(),
        ]
        .into_iter()
        .flatten()
        {
            let (entries, _) = addr.normalized_spaces(spaces);
            for (sp, _) in entries {
                insert_sorted(&mut self.unresolved_spaces, sp);
            }
        }
    }
}

fn insert_sorted(list: &mut Vec<SpaceId>, sp: SpaceId) {
    if let Err(pos) = list.binary_search(&sp) {
        list.insert(pos, sp);
    }
}

/// Evaluation context captured per statement: what `*` meant, which
/// literal generation was current, and which USING state was active.
#[derive(Clone, Debug, Default)]
pub struct EvalContext {
    pub loctr_address: Option<Address>,
    pub literal_pool_generation: usize,
    pub unique_id: usize,
    pub active_using: Option<UsingId>,
}

/// Resolver that captures the leading unresolved portion of an address;
/// used for alignment spaces whose length depends on the bytes laid down
/// before them.
#[derive(Debug)]
pub struct AddressResolver {
    dep: Address,
    full: Address,
}

impl AddressResolver {
    pub fn new(addr: Address, spaces: &Spaces) -> Self {
        Self {
            dep: extract_dep_address(&addr, spaces),
            full: addr,
        }
    }
}

/// Walk the spaces from the end of the address backwards, stopping after
/// the first barrier space (alignment, ORG set, or maximum): these fix the
/// storage before them, so nothing earlier matters for the length.
fn extract_dep_address(addr: &Address, spaces: &Spaces) -> Address {
    let mut entries = Vec::new();
    for &(sp, count) in addr.space_entries().iter().rev() {
        entries.push((sp, count));
        if matches!(
            spaces.get(sp).kind,
            SpaceKind::Alignment | SpaceKind::LoctrSet | SpaceKind::LoctrMax
        ) {
            break;
        }
    }
    entries.reverse();
    Address::from_parts(Default::default(), 0, entries.into_iter().collect())
}

/// A dependency source: what gets evaluated once the blocking definitions
/// appear.
#[derive(Debug)]
pub enum Resolver {
    /// A machine expression (EQU operands, symbol attributes).
    Expr(MachExpr),
    /// The current address at some point; resolves to its final offset.
    Address(AddressResolver),
    /// ORG to a known address with boundary/offset adjustment.
    AlignedAddress {
        dep: Address,
        base: Address,
        boundary: u32,
        offset: i32,
    },
    /// `ORG ,`: the greatest of the captured alternatives.
    Aggregate {
        dep: Address,
        bases: Vec<Address>,
        boundary: u32,
        offset: i32,
    },
    /// The absolute part of an expression; the unresolved address portion
    /// is deliberately ignored (ORG with a forward-referenced target).
    AbsPart(Box<MachExpr>),
    /// Total byte length of a data definition.
    DataDefLength(DataDefinition),
}

impl Resolver {
    pub fn aligned_address(
        current: Address,
        base: Address,
        boundary: u32,
        offset: i32,
        spaces: &Spaces,
    ) -> Self {
        Resolver::AlignedAddress {
            dep: extract_dep_address(&current, spaces),
            base,
            boundary,
            offset,
        }
    }

    pub fn aggregate(bases: Vec<Address>, boundary: u32, offset: i32, spaces: &Spaces) -> Self {
        debug_assert!(!bases.is_empty());
        Resolver::Aggregate {
            dep: extract_dep_address(bases.last().unwrap(), spaces),
            bases,
            boundary,
            offset,
        }
    }

    pub fn get_dependencies(&self, solver: &mut dyn DependencySolver) -> DependencyCollector {
        match self {
            Resolver::Expr(expr) => expr.get_dependencies(solver),
            Resolver::Address(r) => DependencyCollector::address(r.dep.clone()),
            Resolver::AlignedAddress { dep, .. } | Resolver::Aggregate { dep, .. } => {
                DependencyCollector::address(dep.clone())
            }
            Resolver::AbsPart(expr) => {
                let mut deps = expr.get_dependencies(solver);
                deps.unresolved_address = None;
                deps
            }
            Resolver::DataDefLength(dd) => dd.get_length_dependencies(solver),
        }
    }

    pub fn resolve(
        &self,
        solver: &mut dyn DependencySolver,
        diags: &mut dyn DiagnosticConsumer,
    ) -> SymbolValue {
        match self {
            Resolver::Expr(expr) => expr.evaluate(solver, diags),
            Resolver::AbsPart(expr) => expr.evaluate(solver, diags),
            Resolver::Address(r) => {
                if r.full.is_absolute() {
                    SymbolValue::Abs(r.full.offset(solver.spaces()))
                } else {
                    SymbolValue::Reloc(r.full.clone())
                }
            }
            Resolver::AlignedAddress {
                base,
                boundary,
                offset,
                ..
            } => SymbolValue::Abs(aligned_offset(base, *boundary, *offset, solver.spaces())),
            Resolver::Aggregate {
                bases,
                boundary,
                offset,
                ..
            } => {
                let best = bases
                    .iter()
                    .max_by_key(|a| a.offset(solver.spaces()))
                    .expect("aggregate resolver has at least one address");
                SymbolValue::Abs(aligned_offset(best, *boundary, *offset, solver.spaces()))
            }
            Resolver::DataDefLength(dd) => SymbolValue::Abs(dd.total_length(solver)),
        }
    }
}

fn aligned_offset(addr: &Address, boundary: u32, offset: i32, spaces: &Spaces) -> i32 {
    let base = addr.offset(spaces);
    let al = if boundary != 0 {
        let b = boundary as i32;
        (b - base.rem_euclid(b)).rem_euclid(b)
    } else {
        0
    };
    base + al + offset
}

/// An opaque reference to a postponed statement.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostponedStatementId(u32);
entity_impl!(PostponedStatementId, "pstmt");

/// A statement whose semantic check waits for definitions, together with
/// the evaluation context it must be checked in and the source position
/// diagnostics attribute to.
#[derive(Debug)]
pub struct PostponedStatement {
    pub stmt: Statement,
    pub eval: EvalContext,
    pub stack: Range,
}

struct PostponedSlot {
    record: PostponedStatement,
    /// Number of dependency-table entries pointing at this statement; a
    /// checking-only postponement keeps 0 and survives to the end.
    ref_count: usize,
}

struct DependencyEntry {
    source: Resolver,
    eval: EvalContext,
    stmt: Option<PostponedStatementId>,
}

/// The `(target ← expression)` edge store.
#[derive(Default)]
pub struct SymbolDependencyTables {
    dependencies: FxHashMap<Dependant, DependencyEntry>,
    postponed: PrimaryMap<PostponedStatementId, Option<PostponedSlot>>,
    /// LOCTR_UNKNOWN spaces whose target value arrived during the current
    /// fixpoint; replayed between rounds because the replay may register
    /// new dependencies.
    pending_loctr: Vec<(SpaceId, SymbolValue, Range)>,
}

impl SymbolDependencyTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unresolved definition edges.
    pub fn pending_len(&self) -> usize {
        self.dependencies.len()
    }

    /// Register a postponed statement with no definition edges; it will be
    /// checked at end of input.
    pub fn add_postponed_statement(&mut self, record: PostponedStatement) -> PostponedStatementId {
        self.postponed.push(Some(PostponedSlot {
            record,
            ref_count: 0,
        }))
    }

    /// Add a `symbol ← expression` edge, checking for cycles. Returns
    /// false when a cycle was found; the symbol is then already resolved
    /// to its default and the caller should diagnose.
    pub fn add_symbol_dependency(
        &mut self,
        ord: &mut OrdinaryAssemblyContext,
        diags: &mut dyn DiagnosticConsumer,
        target: IdIndex,
        source: Resolver,
        eval: EvalContext,
        stmt: Option<PostponedStatement>,
    ) -> bool {
        self.add_dependency_checked(ord, diags, Dependant::Symbol(target), source, eval, stmt)
    }

    /// Add a `symbol-attribute ← expression` edge (L or S).
    pub fn add_attr_dependency(
        &mut self,
        ord: &mut OrdinaryAssemblyContext,
        diags: &mut dyn DiagnosticConsumer,
        target: IdIndex,
        attr: DataAttrKind,
        source: Resolver,
        eval: EvalContext,
        stmt: Option<PostponedStatement>,
    ) -> bool {
        debug_assert!(matches!(attr, DataAttrKind::L | DataAttrKind::S));
        self.add_dependency_checked(
            ord,
            diags,
            Dependant::SymbolAttr(target, attr),
            source,
            eval,
            stmt,
        )
    }

    /// Add a `space ← expression` edge; spaces do not need the symbol
    /// cycle walk (the location counter cycle check covers them).
    pub fn add_space_dependency(
        &mut self,
        target: SpaceId,
        source: Resolver,
        eval: EvalContext,
        stmt: Option<PostponedStatement>,
    ) {
        let stmt_id = stmt.map(|record| {
            self.postponed.push(Some(PostponedSlot {
                record,
                ref_count: 1,
            }))
        });
        let replaced = self.dependencies.insert(
            Dependant::Space(target),
            DependencyEntry {
                source,
                eval,
                stmt: stmt_id,
            },
        );
        debug_assert!(replaced.is_none(), "space dependency already present");
    }

    fn add_dependency_checked(
        &mut self,
        ord: &mut OrdinaryAssemblyContext,
        diags: &mut dyn DiagnosticConsumer,
        target: Dependant,
        source: Resolver,
        eval: EvalContext,
        stmt: Option<PostponedStatement>,
    ) -> bool {
        debug_assert!(
            !self.dependencies.contains_key(&target),
            "dependency already present"
        );

        let initial = extract_dependants(&source, ord, &eval);
        if !self.check_cycle(ord, diags, target, initial, &eval) {
            self.resolve(ord, diags, false);
            return false;
        }

        let stmt_id = stmt.map(|record| {
            self.postponed.push(Some(PostponedSlot {
                record,
                ref_count: 1,
            }))
        });
        self.dependencies.insert(
            target,
            DependencyEntry {
                source,
                eval,
                stmt: stmt_id,
            },
        );
        true
    }

    /// Walk the edges reachable from `dependencies`; a path back to
    /// `target` is a cycle. On cycle the target resolves to its default
    /// and false is returned.
    fn check_cycle(
        &mut self,
        ord: &mut OrdinaryAssemblyContext,
        diags: &mut dyn DiagnosticConsumer,
        target: Dependant,
        mut dependencies: Vec<Dependant>,
        _eval: &EvalContext,
    ) -> bool {
        if dependencies.contains(&target) {
            self.resolve_dependant_default(ord, diags, target);
            return false;
        }

        while let Some(top) = dependencies.pop() {
            let Some(entry) = self.dependencies.get(&top) else {
                continue;
            };
            // Immutable borrow of the entry ends before the recursive
            // extraction below needs the map again.
            let deps = extract_dependants_entry(entry, ord);
            for dep in deps {
                if dep == target {
                    self.resolve_dependant_default(ord, diags, target);
                    return false;
                }
                dependencies.push(dep);
            }
        }
        true
    }

    /// A definition happened; re-run the fixpoint. `with_spaces` gates
    /// space targets, which need the full context (ORG replay) and are
    /// only resolved from the pipeline.
    pub fn add_defined(
        &mut self,
        ord: &mut OrdinaryAssemblyContext,
        diags: &mut dyn DiagnosticConsumer,
        with_spaces: bool,
    ) {
        loop {
            self.resolve(ord, diags, with_spaces);
            if self.pending_loctr.is_empty() {
                break;
            }
            let pending = std::mem::take(&mut self.pending_loctr);
            for (sp, value, range) in pending {
                self.replay_unknown_loctr(ord, diags, sp, value, range);
            }
        }
    }

    /// Replay an ORG whose target just became known: move the affected
    /// org-alternatives aside, apply the now-known value, merge back, and
    /// resolve the LOCTR_UNKNOWN space to the result.
    fn replay_unknown_loctr(
        &mut self,
        ord: &mut OrdinaryAssemblyContext,
        diags: &mut dyn DiagnosticConsumer,
        sp: SpaceId,
        value: SymbolValue,
        range: Range,
    ) {
        use crate::context::counter::RestoredValue;

        let Some(addr) = value.as_reloc().cloned() else {
            diags.add(diagnostic::error_a251(range));
            ord.resolve_space_length(sp, 1);
            return;
        };

        let ctr = ord.spaces.get(sp).owner;
        let boundary = ord.spaces.get(sp).previous_boundary;
        let offset = ord.spaces.get(sp).previous_offset;

        ord.counters[ctr].switch_to_unresolved_value(sp);
        let curr_addr = ord.counters[ctr].current_address(&ord.spaces);
        match ord.counters[ctr].set_value(ctr, &mut ord.spaces, &addr, boundary, offset) {
            Err(()) => diags.add(diagnostic::error_a251(range)),
            Ok(Some(new_sp)) => {
                self.add_space_dependency(
                    new_sp,
                    Resolver::aligned_address(curr_addr, addr.clone(), boundary, offset, &ord.spaces),
                    EvalContext::default(),
                    None,
                );
            }
            Ok(None) => {}
        }

        match ord.counters[ctr].restore_from_unresolved_value(sp, &ord.spaces) {
            RestoredValue::Space(new_sp) => {
                ord.spaces.resolve_redirect(sp, new_sp);
            }
            RestoredValue::Address(restored) => {
                ord.spaces.resolve_address(sp, restored);
            }
        }

        if !ord.counters[ctr].check_underflow(&ord.spaces) {
            diags.add(diagnostic::error_a251(range));
        }
    }

    fn resolve(
        &mut self,
        ord: &mut OrdinaryAssemblyContext,
        diags: &mut dyn DiagnosticConsumer,
        with_spaces: bool,
    ) {
        loop {
            let mut picked = None;
            for (&target, entry) in self.dependencies.iter() {
                if !with_spaces && matches!(target, Dependant::Space(_)) {
                    continue;
                }
                if extract_dependants_entry(entry, ord).is_empty() {
                    picked = Some(target);
                    break;
                }
            }
            let Some(target) = picked else { break };
            log::debug!("resolving dependant {target:?}");
            let entry = self
                .dependencies
                .remove(&target)
                .expect("picked entry is present");
            self.resolve_dependant(ord, diags, target, &entry);
            self.try_erase_source_statement(&entry);
        }
    }

    fn resolve_dependant(
        &mut self,
        ord: &mut OrdinaryAssemblyContext,
        diags: &mut dyn DiagnosticConsumer,
        target: Dependant,
        entry: &DependencyEntry,
    ) {
        let value = {
            let mut solver = ContextSolver::new(ord, &entry.eval);
            entry.source.resolve(&mut solver, diags)
        };

        match target {
            Dependant::Space(sp) => {
                let kind = ord.spaces.get(sp).kind;
                match kind {
                    SpaceKind::Ordinary | SpaceKind::LoctrMax | SpaceKind::LoctrSet => {
                        let length = value.as_abs().filter(|&v| v >= 0).unwrap_or(0);
                        ord.resolve_space_length(sp, length);
                    }
                    SpaceKind::Alignment => {
                        let length = value
                            .as_reloc()
                            .map(|a| a.offset(&ord.spaces))
                            .unwrap_or(0);
                        ord.resolve_space_length(sp, length);
                    }
                    SpaceKind::LoctrUnknown => {
                        let range = entry
                            .stmt
                            .and_then(|id| self.postponed[id].as_ref())
                            .map(|slot| slot.record.stack)
                            .unwrap_or_default();
                        self.pending_loctr.push((sp, value, range));
                    }
                    SpaceKind::LoctrBegin => {
                        debug_assert!(false, "begin anchors resolve through layout")
                    }
                }
            }
            Dependant::Symbol(name) => {
                let value = match value {
                    SymbolValue::Undef => SymbolValue::Abs(0),
                    v => v,
                };
                if let Some(sym) = ord.get_symbol_mut(name) {
                    sym.set_value(value);
                }
            }
            Dependant::SymbolAttr(name, attr) => {
                let abs = value.as_abs().unwrap_or_else(|| attr.default_value());
                if let Some(sym) = ord.get_symbol_mut(name) {
                    match attr {
                        DataAttrKind::L => sym.set_length(abs.max(0) as u32),
                        DataAttrKind::S => sym.set_scale(abs.clamp(i16::MIN as i32, i16::MAX as i32) as i16),
                        _ => debug_assert!(false, "only L and S attributes are dependable"),
                    }
                }
            }
        }
    }

    fn resolve_dependant_default(
        &mut self,
        ord: &mut OrdinaryAssemblyContext,
        _diags: &mut dyn DiagnosticConsumer,
        target: Dependant,
    ) {
        match target {
            Dependant::Space(sp) => ord.resolve_space_length(sp, 1),
            Dependant::Symbol(name) => {
                if let Some(sym) = ord.get_symbol_mut(name) {
                    sym.set_value(SymbolValue::Abs(0));
                }
            }
            Dependant::SymbolAttr(name, attr) => {
                if let Some(sym) = ord.get_symbol_mut(name) {
                    match attr {
                        DataAttrKind::L => sym.set_length(1),
                        DataAttrKind::S => sym.set_scale(0),
                        _ => {}
                    }
                }
            }
        }
    }

    fn try_erase_source_statement(&mut self, entry: &DependencyEntry) {
        let Some(id) = entry.stmt else { return };
        let Some(slot) = self.postponed[id].as_mut() else {
            return;
        };
        debug_assert!(slot.ref_count >= 1);
        slot.ref_count -= 1;
        if slot.ref_count == 0 {
            self.postponed[id] = None;
        }
    }

    /// Detect cycles among location-counter spaces (ORG chains that feed
    /// on themselves). Cycled spaces resolve to the default length and
    /// their statements are dropped. Returns true when no cycle was
    /// found.
    pub fn check_loctr_cycle(
        &mut self,
        ord: &mut OrdinaryAssemblyContext,
        diags: &mut dyn DiagnosticConsumer,
    ) -> bool {
        use crate::fx::FxHashSet;

        // Space-only dependency graph. Entries whose first dependency is a
        // symbol resolve through the symbol path and cannot form a
        // space-only cycle.
        let mut graph: FxHashMap<Dependant, Vec<Dependant>> = FxHashMap::default();
        for (&target, entry) in self.dependencies.iter() {
            if !matches!(target, Dependant::Space(_)) {
                continue;
            }
            let deps = extract_dependants_entry(entry, ord);
            if deps
                .first()
                .map(|d| matches!(d, Dependant::Symbol(_)))
                .unwrap_or(false)
            {
                continue;
            }
            let space_deps: Vec<Dependant> = deps
                .into_iter()
                .filter(|d| matches!(d, Dependant::Space(_)))
                .collect();
            if !space_deps.is_empty() {
                graph.insert(target, space_deps);
            }
        }

        let mut cycled: FxHashSet<Dependant> = FxHashSet::default();
        let mut visited: FxHashMap<Dependant, FxHashSet<Dependant>> = FxHashMap::default();
        let mut path_stack: Vec<Vec<Dependant>> = Vec::new();

        for &v in graph.keys() {
            if visited.contains_key(&v) {
                continue;
            }
            path_stack.push(vec![v]);

            while let Some(path) = path_stack.pop() {
                let target = *path.last().expect("paths are never empty");

                if path.len() > 1 {
                    let prev = path[path.len() - 2];
                    if visited
                        .get(&prev)
                        .map(|e| e.contains(&target))
                        .unwrap_or(false)
                    {
                        continue;
                    }
                }

                let mut found_searched = false;
                if visited.contains_key(&target) {
                    if let Some(cycle_start) = path.iter().position(|&d| d == target) {
                        if cycle_start == path.len() - 1 {
                            found_searched = true;
                        } else {
                            cycled.extend(path[cycle_start..].iter().copied());
                        }
                    }
                }

                if path.len() > 1 {
                    let prev = path[path.len() - 2];
                    visited.entry(prev).or_default().insert(target);
                } else {
                    visited.entry(target).or_default();
                }

                if found_searched {
                    continue;
                }

                if let Some(edges) = graph.get(&target) {
                    for &next in edges {
                        let mut new_path = path.clone();
                        new_path.push(next);
                        path_stack.push(new_path);
                    }
                }
            }
        }

        for &target in cycled.iter() {
            self.resolve_dependant_default(ord, diags, target);
            if let Some(entry) = self.dependencies.remove(&target) {
                self.try_erase_source_statement(&entry);
            }
        }

        cycled.is_empty()
    }

    /// Resolve everything still pending to its default value; used when
    /// end of input forces a result.
    pub fn resolve_all_as_default(
        &mut self,
        ord: &mut OrdinaryAssemblyContext,
        diags: &mut dyn DiagnosticConsumer,
    ) {
        let targets: Vec<Dependant> = self.dependencies.keys().copied().collect();
        for target in targets {
            if let Some(entry) = self.dependencies.remove(&target) {
                self.resolve_dependant_default(ord, diags, target);
                self.try_erase_source_statement(&entry);
            }
        }
    }

    /// Take all statements that still need their end-of-input check. The
    /// dependency edges stay behind so the final defaulting pass can
    /// force-resolve them afterwards.
    pub fn collect_postponed(&mut self) -> Vec<PostponedStatement> {
        let mut result = Vec::new();
        for slot in self.postponed.values_mut() {
            if let Some(slot) = slot.take() {
                result.push(slot.record);
            }
        }
        result
    }
}

fn extract_dependants_entry(
    entry: &DependencyEntry,
    ord: &mut OrdinaryAssemblyContext,
) -> Vec<Dependant> {
    extract_dependants(&entry.source, ord, &entry.eval)
}

/// Turn a resolver's dependency collector into concrete dependants, in the
/// order the fixpoint prefers: undefined symbol values shadow everything
/// else.
fn extract_dependants(
    source: &Resolver,
    ord: &mut OrdinaryAssemblyContext,
    eval: &EvalContext,
) -> Vec<Dependant> {
    let deps = {
        let mut solver = ContextSolver::new(ord, eval);
        source.get_dependencies(&mut solver)
    };

    let mut result = Vec::new();
    for sym in &deps.undefined_symbolics {
        if sym.flags.contains(AttrRefMask::VALUE) {
            result.push(Dependant::Symbol(sym.name));
        }
    }
    if !result.is_empty() {
        return result;
    }

    for sym in &deps.undefined_symbolics {
        for (bit, attr) in [
            (AttrRefMask::T, DataAttrKind::T),
            (AttrRefMask::L, DataAttrKind::L),
            (AttrRefMask::S, DataAttrKind::S),
            (AttrRefMask::I, DataAttrKind::I),
            (AttrRefMask::K, DataAttrKind::K),
            (AttrRefMask::N, DataAttrKind::N),
            (AttrRefMask::D, DataAttrKind::D),
            (AttrRefMask::O, DataAttrKind::O),
        ] {
            if sym.flags.contains(bit) {
                result.push(Dependant::SymbolAttr(sym.name, attr));
            }
        }
    }

    if let Some(addr) = &deps.unresolved_address {
        let (entries, _) = addr.normalized_spaces(&ord.spaces);
        for (sp, count) in entries {
            debug_assert!(count != 0);
            result.push(Dependant::Space(sp));
        }
    }
    for &sp in &deps.unresolved_spaces {
        if ord.spaces.has_unresolved(sp) {
            result.push(Dependant::Space(sp));
        }
    }

    result
}
