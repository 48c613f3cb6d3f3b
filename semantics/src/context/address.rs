//! Relocatable addresses.
//!
//! An address is the sum `Σ base_i·k_i + offset + Σ space_j·k_j`: section
//! bases with multiplicities, a known byte offset, and layout spaces that
//! are not resolved yet. Ordinary values have exactly one base with
//! multiplicity one ("simple"); subtraction of two addresses in the same
//! section cancels the bases and, once all spaces resolve, collapses to an
//! absolute number.
//!
//! Arithmetic merges like bases and spaces and drops zero multiplicities.
//! Because resolved spaces fold back into the offset, most operations take
//! the [`Spaces`] arena as an argument; an `Address` itself is a plain
//! value.

use crate::context::section::SectionId;
use crate::context::space::{SpaceId, SpaceKind, Spaces};
use crate::ids::IdIndex;
use smallvec::SmallVec;

/// A section base, optionally qualified by a USING label.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Base {
    pub section: SectionId,
    pub qualifier: IdIndex,
}

impl Base {
    pub fn unqualified(section: SectionId) -> Self {
        Self {
            section,
            qualifier: IdIndex::EMPTY,
        }
    }
}

pub type BaseEntry = (Base, i32);
pub type SpaceEntry = (SpaceId, i32);

/// A relocatable address value.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Address {
    bases: SmallVec<[BaseEntry; 1]>,
    offset: i32,
    spaces: SmallVec<[SpaceEntry; 2]>,
}

impl Address {
    /// An address relative to `base`, normalized against the arena.
    pub fn new(base: Base, offset: i32, space_ids: &[SpaceEntry], spaces: &Spaces) -> Self {
        let mut addr = Self {
            bases: SmallVec::from_slice(&[(base, 1)]),
            offset,
            spaces: SmallVec::from_slice(space_ids),
        };
        addr.normalize(spaces);
        addr
    }

    /// An address with no base and no spaces.
    pub fn absolute(offset: i32) -> Self {
        Self {
            bases: SmallVec::new(),
            offset,
            spaces: SmallVec::new(),
        }
    }

    pub fn bases(&self) -> &[BaseEntry] {
        &self.bases
    }

    pub fn space_entries(&self) -> &[SpaceEntry] {
        &self.spaces
    }

    /// The stored offset, without folding resolved spaces.
    pub fn raw_offset(&self) -> i32 {
        self.offset
    }

    /// The offset including the contribution of every resolved space.
    pub fn offset(&self, spaces: &Spaces) -> i32 {
        let mut offs = self.offset;
        for &(sp, count) in self.spaces.iter() {
            offs += count * spaces.resolved_offset(sp);
        }
        offs
    }

    /// The unresolved spaces reachable from this address, with resolved
    /// chains walked through, plus the offset the resolved prefix
    /// contributes.
    pub fn normalized_spaces(&self, spaces: &Spaces) -> (SmallVec<[SpaceEntry; 2]>, i32) {
        let mut result: SmallVec<[SpaceEntry; 2]> = SmallVec::new();
        let mut offset = 0;
        collect_unresolved(&self.spaces, spaces, &mut result, &mut offset);
        result.retain(|e| e.1 != 0);
        (result, offset)
    }

    /// Fold resolved spaces into the offset and coalesce the rest.
    pub fn normalize(&mut self, spaces: &Spaces) {
        let (normalized, gained) = self.normalized_spaces(spaces);
        self.offset += gained;
        self.spaces = normalized;
    }

    pub fn add(&self, other: &Address, spaces: &Spaces) -> Address {
        Address {
            bases: merge_entries(&self.bases, &other.bases, MergeOp::Add),
            offset: self.offset(spaces) + other.offset(spaces),
            spaces: merge_entries(
                &self.normalized_spaces(spaces).0,
                &other.normalized_spaces(spaces).0,
                MergeOp::Add,
            ),
        }
    }

    /// Add an absolute offset; spaces are kept as they are.
    pub fn add_offset(&self, offs: i32) -> Address {
        Address {
            bases: self.bases.clone(),
            offset: self.offset + offs,
            spaces: self.spaces.clone(),
        }
    }

    pub fn sub(&self, other: &Address, spaces: &Spaces) -> Address {
        Address {
            bases: merge_entries(&self.bases, &other.bases, MergeOp::Sub),
            offset: self.offset(spaces) - other.offset(spaces),
            spaces: merge_entries(
                &self.normalized_spaces(spaces).0,
                &other.normalized_spaces(spaces).0,
                MergeOp::Sub,
            ),
        }
    }

    pub fn negated(&self, spaces: &Spaces) -> Address {
        Address {
            bases: merge_entries(&[], &self.bases, MergeOp::Sub),
            offset: -self.offset(spaces),
            spaces: merge_entries(&[], &self.normalized_spaces(spaces).0, MergeOp::Sub),
        }
    }

    /// More than one base left after normalization.
    pub fn is_complex(&self) -> bool {
        self.bases.len() > 1
    }

    /// Exactly one base with multiplicity one.
    pub fn is_simple(&self) -> bool {
        self.bases.len() == 1 && self.bases[0].1 == 1
    }

    /// No bases at all.
    pub fn is_absolute(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn has_spaces(&self) -> bool {
        !self.spaces.is_empty()
    }

    pub fn has_unresolved_space(&self, spaces: &Spaces) -> bool {
        self.spaces.iter().any(|&(sp, _)| spaces.has_unresolved(sp))
    }

    /// Like [`Self::has_unresolved_space`], but the leading begin-anchor of
    /// a non-starting location counter does not count: two addresses in the
    /// same counter share it.
    pub fn has_dependant_space(&self, spaces: &Spaces) -> bool {
        self.spaces.iter().enumerate().any(|(i, &(sp, _))| {
            if i == 0 && spaces.get(sp).kind == SpaceKind::LoctrBegin {
                false
            } else {
                spaces.has_unresolved(sp)
            }
        })
    }

    /// Do the two addresses live in the same location counter?
    ///
    /// Only meaningful for simple addresses of the same section; decided by
    /// comparing the leading begin-anchors (or their owners) when present.
    pub fn in_same_loctr(&self, other: &Address, spaces: &Spaces) -> bool {
        if !self.is_simple() || !other.is_simple() {
            return false;
        }
        if self.bases[0].0 != other.bases[0].0 {
            return false;
        }

        let self_begin = self
            .spaces
            .first()
            .filter(|&&(sp, _)| spaces.get(sp).kind == SpaceKind::LoctrBegin);
        let other_begin = other
            .spaces
            .first()
            .filter(|&&(sp, _)| spaces.get(sp).kind == SpaceKind::LoctrBegin);

        match (self_begin, other_begin) {
            (Some(&(a, _)), Some(&(b, _))) => a == b,
            (None, None) => true,
            _ => match (self.spaces.first(), other.spaces.first()) {
                (Some(&(a, _)), Some(&(b, _))) => spaces.get(a).owner == spaces.get(b).owner,
                _ => false,
            },
        }
    }

    /// Strip USING qualifiers from all bases and re-merge them.
    pub fn without_qualifiers(&self, spaces: &Spaces) -> Address {
        if self.bases.iter().all(|(b, _)| b.qualifier.is_empty()) {
            return self.clone();
        }
        let stripped: SmallVec<[BaseEntry; 1]> = self
            .bases
            .iter()
            .map(|&(b, count)| (Base::unqualified(b.section), count))
            .collect();
        let mut merged: SmallVec<[BaseEntry; 1]> = SmallVec::new();
        for &(base, count) in stripped.iter() {
            if let Some(entry) = merged.iter_mut().find(|(b, _)| *b == base) {
                entry.1 += count;
            } else {
                merged.push((base, count));
            }
        }
        merged.retain(|e| e.1 != 0);
        let mut result = Address {
            bases: merged,
            offset: self.offset,
            spaces: self.spaces.clone(),
        };
        result.normalize(spaces);
        result
    }

    pub(crate) fn from_parts(
        bases: SmallVec<[BaseEntry; 1]>,
        offset: i32,
        spaces: SmallVec<[SpaceEntry; 2]>,
    ) -> Self {
        Self {
            bases,
            offset,
            spaces,
        }
    }
}

fn collect_unresolved(
    entries: &[SpaceEntry],
    spaces: &Spaces,
    out: &mut SmallVec<[SpaceEntry; 2]>,
    offset: &mut i32,
) {
    for &(sp, count) in entries {
        let space = spaces.get(sp);
        if space.resolved() {
            *offset += count * space.resolved_length();
            let scaled: SmallVec<[SpaceEntry; 2]> = space
                .resolved_chain()
                .iter()
                .map(|&(s, c)| (s, c * count))
                .collect();
            collect_unresolved(&scaled, spaces, out, offset);
        } else if let Some(entry) = out.iter_mut().find(|(s, _)| *s == sp) {
            entry.1 += count;
        } else {
            out.push((sp, count));
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum MergeOp {
    Add,
    Sub,
}

fn merge_entries<T, const N: usize>(
    lhs: &[(T, i32)],
    rhs: &[(T, i32)],
    op: MergeOp,
) -> SmallVec<[(T, i32); N]>
where
    T: PartialEq + Copy,
{
    let mut result: SmallVec<[(T, i32); N]> = SmallVec::new();
    let mut used = vec![false; rhs.len()];

    for &(key, count) in lhs {
        let mut count = count;
        if let Some(pos) = rhs
            .iter()
            .enumerate()
            .position(|(i, (k, _))| !used[i] && *k == key)
        {
            used[pos] = true;
            match op {
                MergeOp::Add => count += rhs[pos].1,
                MergeOp::Sub => count -= rhs[pos].1,
            }
        }
        if count != 0 {
            result.push((key, count));
        }
    }

    for (i, &(key, count)) in rhs.iter().enumerate() {
        if used[i] {
            continue;
        }
        let count = match op {
            MergeOp::Add => count,
            MergeOp::Sub => -count,
        };
        if count != 0 {
            result.push((key, count));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::counter::LoctrId;
    use crate::context::space::{NO_ALIGN, HALFWORD};
    use hlasm_entity::EntityRef;

    fn sect(i: usize) -> SectionId {
        SectionId::new(i)
    }

    fn base(i: usize) -> Base {
        Base::unqualified(sect(i))
    }

    #[test]
    fn same_section_difference_is_absolute() {
        let spaces = Spaces::new();
        let a = Address::new(base(0), 12, &[], &spaces);
        let b = Address::new(base(0), 4, &[], &spaces);

        let diff = a.sub(&b, &spaces);
        assert!(diff.is_absolute());
        assert_eq!(diff.offset(&spaces), 8);
    }

    #[test]
    fn normalization_folds_resolved_spaces() {
        let mut spaces = Spaces::new();
        let owner = LoctrId::new(0);
        let sp1 = spaces.create(owner, NO_ALIGN, SpaceKind::Ordinary);
        let sp2 = spaces.create(owner, HALFWORD, SpaceKind::Ordinary);

        let mut addr = Address::new(base(0), 3, &[(sp1, 1), (sp2, 1)], &spaces);
        assert!(addr.has_unresolved_space(&spaces));

        spaces.resolve_length(sp1, 5);
        addr.normalize(&spaces);
        assert_eq!(addr.raw_offset(), 8);
        assert_eq!(addr.space_entries(), &[(sp2, 1)]);
    }

    #[test]
    fn normalized_spaces_walk_chains() {
        // A resolved space redirecting to another one must surface the
        // target with combined multiplicity.
        let mut spaces = Spaces::new();
        let owner = LoctrId::new(0);
        let target = spaces.create(owner, HALFWORD, SpaceKind::Ordinary);
        let unknown = spaces.create_loctr_unknown(owner, 0, 0);
        spaces.resolve_redirect(unknown, target);

        let addr = Address::from_parts(
            SmallVec::from_slice(&[(base(0), 1)]),
            0,
            SmallVec::from_slice(&[(unknown, 1), (target, 1)]),
        );
        let (normalized, offset) = addr.normalized_spaces(&spaces);
        assert_eq!(offset, 0);
        assert_eq!(normalized.as_slice(), &[(target, 2)]);
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut spaces = Spaces::new();
        let owner = LoctrId::new(0);
        let sp = spaces.create(owner, NO_ALIGN, SpaceKind::Ordinary);
        spaces.resolve_length(sp, 7);

        let mut addr = Address::new(base(1), 1, &[(sp, 2)], &spaces);
        let first = addr.clone();
        addr.normalize(&spaces);
        assert_eq!(addr, first);
        assert_eq!(addr.raw_offset(), 15);
    }

    #[test]
    fn different_bases_stay_relocatable() {
        let spaces = Spaces::new();
        let a = Address::new(base(0), 0, &[], &spaces);
        let b = Address::new(base(1), 0, &[], &spaces);

        let diff = a.sub(&b, &spaces);
        assert!(!diff.is_absolute());
        assert_eq!(diff.bases().len(), 2);
        assert_eq!(diff.bases()[1].1, -1);
    }

    #[test]
    fn negation() {
        let spaces = Spaces::new();
        let a = Address::new(base(0), 12, &[], &spaces);
        let neg = a.negated(&spaces);
        assert_eq!(neg.raw_offset(), -12);
        assert_eq!(neg.bases()[0].1, -1);
        let zero = a.add(&neg, &spaces);
        assert!(zero.is_absolute());
        assert_eq!(zero.raw_offset(), 0);
    }
}
