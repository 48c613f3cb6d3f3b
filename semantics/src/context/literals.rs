//! The literal pool.
//!
//! `=A(*)`-style operands register literals into a pending pool; LTORG or
//! end of input lays the pending generation out and defines a symbol per
//! literal. Two occurrences of the same literal text within one generation
//! share a single pooled constant, unless the definition references the
//! location counter, in which case every defining statement gets its own
//! copy.

use crate::diagnostic::Range;
use crate::expr::data_def::DataDefinition;
use crate::fx::FxHashSet;
use crate::ids::{IdIndex, IdStorage};

/// A literal awaiting pool generation.
#[derive(Debug)]
pub struct PendingLiteral {
    pub id: IdIndex,
    pub text: String,
    pub dd: DataDefinition,
    pub range: Range,
    pub generation: usize,
}

#[derive(Default)]
pub struct LiteralPool {
    generation: usize,
    pending: Vec<PendingLiteral>,
    interned: FxHashSet<IdIndex>,
}

impl LiteralPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current generation; bumped by every pool emission.
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Intern a literal occurrence observed in generation `generation`,
    /// returning the name of the symbol the pooled constant defines.
    /// Identical text within a generation dedups; a definition mentioning
    /// `*` is keyed by the defining statement as well, so each statement
    /// gets a distinct constant. Re-interning against a closed generation
    /// (a statement checked after its LTORG) resolves to the already
    /// pooled name without pending anything new.
    pub fn intern(
        &mut self,
        ids: &mut IdStorage,
        text: &str,
        dd: &DataDefinition,
        range: Range,
        unique_id: usize,
        generation: usize,
    ) -> IdIndex {
        // The symbol name must be unique per constant: statements get
        // their own copy when `*` is involved, and generations never share
        // symbols even for identical text.
        let id = if dd.references_loctr() {
            ids.add(&format!("{text}#{unique_id}"))
        } else if generation == 0 {
            ids.add(text)
        } else {
            ids.add(&format!("{text}#G{generation}"))
        };
        if generation == self.generation && self.interned.insert(id) {
            log::trace!("pending literal {text}");
            self.pending.push(PendingLiteral {
                id,
                text: text.to_string(),
                dd: dd.clone(),
                range,
                generation: self.generation,
            });
        }
        id
    }

    /// Close the generation and hand the pending literals to the caller
    /// for layout, ordered by descending alignment (stable within a
    /// group).
    pub fn take_pending(&mut self) -> Vec<PendingLiteral> {
        self.generation += 1;
        self.interned.clear();
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|lit| std::cmp::Reverse(lit.dd.alignment().boundary));
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::data_def::{Nominal, NominalItem};
    use crate::expr::{MachExpr, MachExprKind};

    fn dd_a(nominal_loctr: bool) -> DataDefinition {
        let expr = if nominal_loctr {
            MachExpr::new(MachExprKind::LocCounter, Range::default())
        } else {
            MachExpr::constant(0, Range::default())
        };
        DataDefinition {
            dup_factor: None,
            type_: 'A',
            extension: None,
            length: None,
            length_in_bits: false,
            scale: None,
            exponent: None,
            nominal: Some(Nominal::Exprs(vec![NominalItem::plain(expr)])),
            range: Range::default(),
        }
    }

    #[test]
    fn plain_literals_dedup() {
        let mut ids = IdStorage::new();
        let mut pool = LiteralPool::new();
        let dd = dd_a(false);

        let a = pool.intern(&mut ids, "=A(0)", &dd, Range::default(), 1, 0);
        let b = pool.intern(&mut ids, "=A(0)", &dd, Range::default(), 2, 0);
        assert_eq!(a, b);
        assert_eq!(pool.take_pending().len(), 1);
    }

    #[test]
    fn loctr_literals_are_per_statement() {
        let mut ids = IdStorage::new();
        let mut pool = LiteralPool::new();
        let dd = dd_a(true);

        let a = pool.intern(&mut ids, "=A(*)", &dd, Range::default(), 1, 0);
        let b = pool.intern(&mut ids, "=A(*)", &dd, Range::default(), 2, 0);
        assert_ne!(a, b);
        assert_eq!(pool.take_pending().len(), 2);
    }

    #[test]
    fn generations_do_not_dedup_across() {
        let mut ids = IdStorage::new();
        let mut pool = LiteralPool::new();
        let dd = dd_a(false);

        pool.intern(&mut ids, "=A(0)", &dd, Range::default(), 1, 0);
        assert_eq!(pool.take_pending().len(), 1);
        assert_eq!(pool.generation(), 1);

        pool.intern(&mut ids, "=A(0)", &dd, Range::default(), 7, 1);
        assert_eq!(pool.take_pending().len(), 1);
    }
}
