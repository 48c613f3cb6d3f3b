//! The ordinary-assembly context: sections, counters, symbols, literals,
//! usings, and the dependency tables tying them together.

pub mod address;
pub mod counter;
pub mod dependency;
pub mod literals;
pub mod section;
pub mod space;
pub mod symbol;
pub mod using;

use crate::diagnostic::{DiagnosticConsumer, Range};
use crate::expr::data_def::DataDefinition;
use crate::fx::{FxHashMap, FxHashSet};
use crate::ids::{IdIndex, IdStorage};
use address::Address;
use counter::{LocationCounter, LoctrId, LoctrKind};
use dependency::{
    DependencySolver, EvalContext, Resolver, SymbolDependencyTables, UsingEvaluateResult,
};
use hlasm_entity::PrimaryMap;
use literals::LiteralPool;
use section::{Section, SectionId, SectionKind};
use space::{Alignment, SpaceId, Spaces, DOUBLEWORD};
use symbol::{Symbol, SymbolValue, SymbolValueKind};
use using::{UsingCollection, UsingId};

/// The state of one translation unit's ordinary assembly.
pub struct OrdinaryAssemblyContext {
    pub ids: IdStorage,
    pub sections: PrimaryMap<SectionId, Section>,
    pub counters: PrimaryMap<LoctrId, LocationCounter>,
    pub spaces: Spaces,
    symbols: FxHashMap<IdIndex, Symbol>,
    /// Names mentioned in expressions before any definition was seen.
    symbol_refs: FxHashSet<IdIndex>,
    pub literals: LiteralPool,
    pub usings: UsingCollection,
    pub active_using: Option<UsingId>,
    using_labels: FxHashSet<IdIndex>,

    curr_section: Option<SectionId>,
    first_control_section: Option<SectionId>,
    statement_unique_id: usize,
}

impl OrdinaryAssemblyContext {
    pub fn new() -> Self {
        Self {
            ids: IdStorage::new(),
            sections: PrimaryMap::new(),
            counters: PrimaryMap::new(),
            spaces: Spaces::new(),
            symbols: FxHashMap::default(),
            symbol_refs: FxHashSet::default(),
            literals: LiteralPool::new(),
            usings: UsingCollection::new(),
            active_using: None,
            using_labels: FxHashSet::default(),
            curr_section: None,
            first_control_section: None,
            statement_unique_id: 0,
        }
    }

    // -- symbols -----------------------------------------------------

    pub fn get_symbol(&self, name: IdIndex) -> Option<&Symbol> {
        self.symbols.get(&name)
    }

    pub fn get_symbol_mut(&mut self, name: IdIndex) -> Option<&mut Symbol> {
        self.symbols.get_mut(&name)
    }

    pub fn symbol_defined(&self, name: IdIndex) -> bool {
        self.symbols.contains_key(&name)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    /// Insert a fresh symbol. The caller must have checked for
    /// redefinition; cycle checks and dependency refiring are the
    /// wrapper's job (see [`AssemblyContext::define_symbol`]).
    pub fn insert_symbol(&mut self, sym: Symbol) {
        let replaced = self.symbols.insert(sym.name, sym);
        debug_assert!(replaced.is_none(), "symbol inserted twice");
    }

    pub fn register_symbol_candidate(&mut self, name: IdIndex) {
        self.symbol_refs.insert(name);
    }

    pub fn symbol_mentioned(&self, name: IdIndex) -> bool {
        self.symbol_refs.contains(&name) || self.symbols.contains_key(&name)
    }

    // -- sections and counters ---------------------------------------

    pub fn current_section(&self) -> Option<SectionId> {
        self.curr_section
    }

    pub fn section_defined(&self, name: IdIndex, kind: SectionKind) -> bool {
        self.sections
            .values()
            .any(|s| s.name == name && s.kind == kind)
    }

    fn find_section(&self, name: IdIndex, kind: SectionKind) -> Option<SectionId> {
        self.sections
            .iter()
            .find(|(_, s)| s.name == name && s.kind == kind)
            .map(|(id, _)| id)
    }

    fn create_section(&mut self, name: IdIndex, kind: SectionKind) -> SectionId {
        let section_id = self.sections.next_key();
        let loctr_id = self
            .counters
            .push(LocationCounter::new(name, section_id, LoctrKind::Starting));
        self.sections.push(Section::new(name, kind, loctr_id));
        if matches!(kind, SectionKind::Executable | SectionKind::ReadOnly)
            && self.first_control_section.is_none()
        {
            self.first_control_section = Some(section_id);
        }
        log::debug!("created section {}", self.ids.resolve(name));
        section_id
    }

    pub fn create_private_section(&mut self) -> SectionId {
        let id = self.create_section(IdIndex::EMPTY, SectionKind::Executable);
        self.curr_section = Some(id);
        id
    }

    /// Make `(name, kind)` the current section, creating it on first use.
    /// Returns the section and whether it was new.
    pub fn set_section(&mut self, name: IdIndex, kind: SectionKind) -> (SectionId, bool) {
        if let Some(existing) = self.find_section(name, kind) {
            self.curr_section = Some(existing);
            return (existing, false);
        }
        let id = self.create_section(name, kind);
        self.curr_section = Some(id);
        (id, true)
    }

    /// Create an EXTERNAL / WEAK_EXTERNAL section without making it
    /// current.
    pub fn create_external_section(&mut self, name: IdIndex, kind: SectionKind) -> SectionId {
        debug_assert!(matches!(
            kind,
            SectionKind::External | SectionKind::WeakExternal
        ));
        self.create_section(name, kind)
    }

    pub fn counter_defined(&self, name: IdIndex) -> bool {
        self.counters.values().any(|c| c.name == name)
    }

    /// Switch to the named location counter (LOCTR), creating it in the
    /// current section when new. Returns `(counter, is_new)`.
    pub fn set_location_counter(&mut self, name: IdIndex) -> (LoctrId, bool) {
        if let Some((id, _)) = self.counters.iter().find(|(_, c)| c.name == name) {
            let owner = self.counters[id].owner;
            self.curr_section = Some(owner);
            self.sections[owner].set_location_counter(id);
            return (id, false);
        }

        let section = self.ensure_current_section();
        let id = self.counters.push(LocationCounter::new(
            name,
            section,
            LoctrKind::NonStarting,
        ));
        self.counters[id].install_begin_space(id, &mut self.spaces);
        self.sections[section].add_location_counter(id);
        (id, true)
    }

    fn ensure_current_section(&mut self) -> SectionId {
        match self.curr_section {
            Some(id) => id,
            None => self.create_private_section(),
        }
    }

    pub fn current_counter(&mut self) -> LoctrId {
        let section = self.ensure_current_section();
        self.sections[section].current_location_counter()
    }

    pub fn current_address(&mut self) -> Address {
        let ctr = self.current_counter();
        self.counters[ctr].current_address(&self.spaces)
    }

    // -- storage -----------------------------------------------------

    /// Reserve storage in the current counter. An alignment space that
    /// gets created is wired to resolve from the counter's address before
    /// the reservation.
    pub fn reserve_storage_area(
        &mut self,
        deps: &mut SymbolDependencyTables,
        length: i32,
        align: Alignment,
    ) -> Address {
        let ctr = self.current_counter();
        let needs_space = self.counters[ctr].need_space_alignment(align, &self.spaces);
        let before = needs_space.then(|| self.counters[ctr].current_address(&self.spaces));

        let (addr, sp) =
            self.counters[ctr].reserve_storage_area(ctr, &mut self.spaces, length, align);

        if let Some(sp) = sp {
            let before = before.expect("alignment space implies captured address");
            deps.add_space_dependency(
                sp,
                Resolver::Address(dependency::AddressResolver::new(before, &self.spaces)),
                EvalContext::default(),
                None,
            );
        }
        addr
    }

    pub fn align(&mut self, deps: &mut SymbolDependencyTables, align: Alignment) -> Address {
        self.reserve_storage_area(deps, 0, align)
    }

    pub fn register_ordinary_space(&mut self, align: Alignment) -> SpaceId {
        let ctr = self.current_counter();
        self.counters[ctr].register_ordinary_space(ctr, &mut self.spaces, align)
    }

    /// `ORG target` with a known absolute part. Registers the dependency
    /// of any space the move produced. Returns false when the target was
    /// invalid for the current counter.
    pub fn set_location_counter_value(
        &mut self,
        deps: &mut SymbolDependencyTables,
        addr: &Address,
        boundary: u32,
        offset: i32,
    ) -> bool {
        let ctr = self.current_counter();
        let curr_addr = self.counters[ctr].current_address(&self.spaces);
        match self.counters[ctr].set_value(ctr, &mut self.spaces, addr, boundary, offset) {
            Err(()) => false,
            Ok(Some(sp)) => {
                deps.add_space_dependency(
                    sp,
                    Resolver::aligned_address(
                        curr_addr,
                        addr.clone(),
                        boundary,
                        offset,
                        &self.spaces,
                    ),
                    EvalContext::default(),
                    None,
                );
                true
            }
            Ok(None) => true,
        }
    }

    /// `ORG target` whose absolute part is still undefined: the counter
    /// branches on a LOCTR_UNKNOWN space fed by the target expression.
    pub fn set_location_counter_value_undefined(
        &mut self,
        deps: &mut SymbolDependencyTables,
        boundary: u32,
        offset: i32,
        target: Resolver,
        eval: EvalContext,
        stmt: Option<dependency::PostponedStatement>,
    ) {
        let ctr = self.current_counter();
        let sp =
            self.counters[ctr].set_value_undefined(ctr, &mut self.spaces, boundary, offset);
        deps.add_space_dependency(sp, target, eval, stmt);
    }

    /// `ORG ,`: go to the highest value seen.
    pub fn set_available_location_counter_value(
        &mut self,
        deps: &mut SymbolDependencyTables,
        boundary: u32,
        offset: i32,
    ) {
        let ctr = self.current_counter();
        let (sp, addrs) = self.counters[ctr].set_available_value(ctr, &mut self.spaces);
        match sp {
            Some(sp) => deps.add_space_dependency(
                sp,
                Resolver::aggregate(addrs, boundary, offset, &self.spaces),
                EvalContext::default(),
                None,
            ),
            None => {
                if boundary != 0 {
                    self.align(
                        deps,
                        Alignment {
                            byte: 0,
                            boundary,
                        },
                    );
                }
                self.reserve_storage_area(deps, offset, space::NO_ALIGN);
            }
        }
    }

    /// Resolve a space to a byte length and tell its owning counter.
    pub fn resolve_space_length(&mut self, sp: SpaceId, length: i32) {
        if self.spaces.resolve_length(sp, length) {
            let resolved = self.spaces.get(sp).resolved_length();
            let owner = self.spaces.get(sp).owner;
            self.counters[owner].resolve_space(sp, resolved);
        }
    }

    /// Chain the begin anchors of every section's counters to the final
    /// storage of their predecessors. Counters whose predecessor still has
    /// unresolved spaces keep waiting; the caller loops `add_defined`
    /// until a fixpoint.
    pub fn finish_module_layout(
        &mut self,
        deps: &mut SymbolDependencyTables,
        diags: &mut dyn DiagnosticConsumer,
    ) {
        for section in self.sections.keys() {
            let loctrs: Vec<LoctrId> = self.sections[section].location_counters().to_vec();
            for (i, &ctr) in loctrs.iter().enumerate() {
                if i == 0 {
                    self.counters[ctr].finish_layout(&mut self.spaces, 0);
                } else {
                    if self.counters[loctrs[i - 1]].has_unresolved_spaces() {
                        return;
                    }
                    let offset = self.counters[loctrs[i - 1]].storage();
                    self.counters[ctr].finish_layout(&mut self.spaces, offset);
                    deps.add_defined(self, diags, true);
                }
            }
        }
    }

    // -- literals ----------------------------------------------------

    pub fn next_unique_id(&mut self) -> usize {
        self.statement_unique_id += 1;
        self.statement_unique_id
    }

    pub fn current_unique_id(&self) -> usize {
        self.statement_unique_id
    }

    /// The counter the end-of-input literal pool lands in.
    pub fn implicit_ltorg_target(&mut self) -> LoctrId {
        let section = match self.first_control_section {
            Some(id) => id,
            None => self.create_private_section(),
        };
        self.sections[section].current_location_counter()
    }

    // -- usings ------------------------------------------------------

    pub fn is_using_label(&self, name: IdIndex) -> bool {
        self.using_labels.contains(&name)
    }

    pub fn register_using_label(&mut self, name: IdIndex) {
        self.using_labels.insert(name);
    }

    /// Build the evaluation context for the statement being processed.
    pub fn capture_eval_context(&mut self, loctr_address: Option<Address>) -> EvalContext {
        EvalContext {
            loctr_address,
            literal_pool_generation: self.literals.generation(),
            unique_id: self.current_unique_id(),
            active_using: self.active_using,
        }
    }
}

impl Default for OrdinaryAssemblyContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The full assembly state: the ordinary context plus the dependency
/// tables. They are siblings so dependency resolution can borrow both.
#[derive(Default)]
pub struct AssemblyContext {
    pub ord: OrdinaryAssemblyContext,
    pub deps: SymbolDependencyTables,
}

impl AssemblyContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a symbol, run the relocation cycle check when applicable,
    /// and refire pending dependencies. Returns false when a location
    /// counter cycle was found (already defaulted and to be diagnosed by
    /// the caller).
    pub fn define_symbol(
        &mut self,
        diags: &mut dyn DiagnosticConsumer,
        sym: Symbol,
    ) -> bool {
        let kind = sym.kind();
        self.ord.insert_symbol(sym);

        let mut ok = true;
        if kind == SymbolValueKind::Reloc {
            ok = self.deps.check_loctr_cycle(&mut self.ord, diags);
        }
        if kind != SymbolValueKind::Undef {
            self.deps.add_defined(&mut self.ord, diags, true);
        }
        ok
    }

    /// Emit the pending literal pool into the current counter (LTORG) or
    /// the first control section (end of input).
    pub fn generate_literal_pool(
        &mut self,
        diags: &mut dyn DiagnosticConsumer,
        use_current_section: bool,
    ) {
        if !self.ord.literals.has_pending() {
            return;
        }

        let target = if use_current_section {
            self.ord.current_counter()
        } else {
            self.ord.implicit_ltorg_target()
        };
        let owner = self.ord.counters[target].owner;
        self.ord.curr_section = Some(owner);
        self.ord.sections[owner].set_location_counter(target);

        // Pool starts on a doubleword; entries are emitted by descending
        // alignment, so no padding is needed between group members.
        self.ord.align(&mut self.deps, DOUBLEWORD);

        let pending = self.ord.literals.take_pending();
        for lit in pending {
            let eval = EvalContext {
                loctr_address: None,
                literal_pool_generation: lit.generation,
                unique_id: 0,
                active_using: None,
            };
            let (length, attrs) = {
                let mut solver = ContextSolver::new(&mut self.ord, &eval);
                let length = lit.dd.total_length(&mut solver);
                let attrs = lit.dd.attributes(&mut solver);
                (length, attrs)
            };

            self.ord.align(&mut self.deps, lit.dd.alignment());
            let addr = {
                let before = self.ord.current_address();
                self.ord
                    .reserve_storage_area(&mut self.deps, length, space::NO_ALIGN);
                before
            };

            if self.ord.symbol_defined(lit.id) {
                continue;
            }
            self.define_symbol(
                diags,
                Symbol::new(lit.id, SymbolValue::Reloc(addr), attrs, lit.range),
            );
        }
    }
}

/// [`DependencySolver`] implementation over the ordinary context plus a
/// per-statement evaluation context.
pub struct ContextSolver<'a> {
    ord: &'a mut OrdinaryAssemblyContext,
    eval: &'a EvalContext,
}

impl<'a> ContextSolver<'a> {
    pub fn new(ord: &'a mut OrdinaryAssemblyContext, eval: &'a EvalContext) -> Self {
        Self { ord, eval }
    }
}

impl DependencySolver for ContextSolver<'_> {
    fn spaces(&self) -> &Spaces {
        &self.ord.spaces
    }

    fn get_symbol(&self, name: IdIndex) -> Option<&Symbol> {
        self.ord.get_symbol(name)
    }

    fn get_loctr(&self) -> Option<&Address> {
        self.eval.loctr_address.as_ref()
    }

    fn get_literal_id(&mut self, text: &str, dd: &DataDefinition, range: Range) -> IdIndex {
        let ord = &mut *self.ord;
        ord.literals
            .intern(
                &mut ord.ids,
                text,
                dd,
                range,
                self.eval.unique_id,
                self.eval.literal_pool_generation,
            )
    }

    fn using_active(&self, label: IdIndex, section: Option<SectionId>) -> bool {
        self.ord
            .usings
            .is_label_mapping_section(self.eval.active_using, label, section)
    }

    fn using_evaluate(
        &self,
        label: IdIndex,
        section: Option<SectionId>,
        offset: i32,
        long_offset: bool,
    ) -> UsingEvaluateResult {
        self.ord
            .usings
            .evaluate(self.eval.active_using, label, section, offset, long_offset)
    }

    fn register_symbol_candidate(&mut self, name: IdIndex) {
        self.ord.register_symbol_candidate(name);
    }

    fn symbol_mentioned(&self, name: IdIndex) -> bool {
        self.ord.symbol_mentioned(name)
    }

    fn get_opcode_attr(&self, name: IdIndex) -> Option<char> {
        let text = self.ord.ids.resolve(name);
        crate::inst::opcode_attr(text)
    }
}

/// Run an expression against the context in one call; used by the
/// pipeline for immediately evaluable operands.
pub fn evaluate_with(
    ord: &mut OrdinaryAssemblyContext,
    eval: &EvalContext,
    expr: &crate::expr::MachExpr,
    diags: &mut dyn DiagnosticConsumer,
) -> SymbolValue {
    let mut solver = ContextSolver::new(ord, eval);
    expr.evaluate(&mut solver, diags)
}

#[cfg(test)]
pub mod testing {
    //! A plain in-memory solver for expression unit tests.

    use super::*;
    use crate::context::address::Base;

    pub struct TestSolver {
        pub ids: IdStorage,
        pub spaces: Spaces,
        pub symbols: FxHashMap<IdIndex, Symbol>,
        pub loctr: Option<Address>,
        pub literals: LiteralPool,
        mentioned: FxHashSet<IdIndex>,
    }

    impl TestSolver {
        pub fn new() -> Self {
            Self {
                ids: IdStorage::new(),
                spaces: Spaces::new(),
                symbols: FxHashMap::default(),
                loctr: None,
                literals: LiteralPool::new(),
                mentioned: FxHashSet::default(),
            }
        }

        pub fn define(&mut self, sym: Symbol) {
            self.symbols.insert(sym.name, sym);
        }

        pub fn make_address(&self, offset: i32) -> Address {
            use hlasm_entity::EntityRef;
            Address::new(
                Base::unqualified(SectionId::new(0)),
                offset,
                &[],
                &self.spaces,
            )
        }
    }

    impl DependencySolver for TestSolver {
        fn spaces(&self) -> &Spaces {
            &self.spaces
        }

        fn get_symbol(&self, name: IdIndex) -> Option<&Symbol> {
            self.symbols.get(&name)
        }

        fn get_loctr(&self) -> Option<&Address> {
            self.loctr.as_ref()
        }

        fn get_literal_id(&mut self, text: &str, dd: &DataDefinition, range: Range) -> IdIndex {
            self.literals.intern(&mut self.ids, text, dd, range, 0, 0)
        }

        fn using_active(&self, _label: IdIndex, _section: Option<SectionId>) -> bool {
            false
        }

        fn using_evaluate(
            &self,
            _label: IdIndex,
            _section: Option<SectionId>,
            _offset: i32,
            _long_offset: bool,
        ) -> UsingEvaluateResult {
            UsingEvaluateResult {
                reg: dependency::INVALID_REGISTER,
                reg_offset: 0,
            }
        }

        fn register_symbol_candidate(&mut self, name: IdIndex) {
            self.mentioned.insert(name);
        }

        fn symbol_mentioned(&self, name: IdIndex) -> bool {
            self.mentioned.contains(&name) || self.symbols.contains_key(&name)
        }

        fn get_opcode_attr(&self, _name: IdIndex) -> Option<char> {
            None
        }
    }
}
