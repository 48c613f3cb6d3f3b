//! Layout spaces: the unresolved holes inside addresses.
//!
//! A space stands for a number of bytes that is not known yet, created when
//! storage is reserved with an unresolved length, when an alignment cannot
//! be computed, or when ORG redirects a location counter to a value that is
//! not known. Spaces live in an arena ([`Spaces`]) and are referenced by
//! [`SpaceId`]; addresses carry `(SpaceId, multiplicity)` pairs, which keeps
//! them plain values.
//!
//! A space resolves exactly once, to either a byte length, another space,
//! or a whole address whose offset and spaces are folded in. The first
//! resolution wins; later calls are ignored.

use crate::context::address::Address;
use crate::context::counter::LoctrId;
use hlasm_entity::{entity_impl, PrimaryMap};
use smallvec::SmallVec;

/// An opaque reference to a layout space.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpaceId(u32);
entity_impl!(SpaceId, "space");

/// Alignment requirement: the end address must satisfy
/// `addr % boundary == byte`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Alignment {
    pub byte: u32,
    pub boundary: u32,
}

/// No alignment requirement.
pub const NO_ALIGN: Alignment = Alignment { byte: 0, boundary: 1 };
pub const HALFWORD: Alignment = Alignment { byte: 0, boundary: 2 };
pub const FULLWORD: Alignment = Alignment { byte: 0, boundary: 4 };
pub const DOUBLEWORD: Alignment = Alignment { byte: 0, boundary: 8 };

/// What a space stands for.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SpaceKind {
    /// A generic hole of unknown length (DS with a forward-referenced
    /// length).
    Ordinary,
    /// Anchor at the start of a non-starting location counter; resolves to
    /// the final storage of the preceding counter.
    LoctrBegin,
    /// Boundary fix-up whose length depends on the bytes laid down before
    /// it.
    Alignment,
    /// ORG to an address built from different spaces, or outside the safe
    /// area.
    LoctrSet,
    /// Greatest-of-many location counter values (`ORG ,`).
    LoctrMax,
    /// ORG to an address whose absolute part is not known yet.
    LoctrUnknown,
}

/// A single space in the arena.
pub struct Space {
    pub kind: SpaceKind,
    /// Alignment of the space end address.
    pub align: Alignment,
    /// The location counter the space belongs to.
    pub owner: LoctrId,
    /// ORG alignment captured for `LoctrUnknown` spaces.
    pub previous_boundary: u32,
    pub previous_offset: i32,

    resolved: bool,
    resolved_length: i32,
    resolved_chain: SmallVec<[(SpaceId, i32); 2]>,
}

impl Space {
    pub fn resolved(&self) -> bool {
        self.resolved
    }

    pub fn resolved_length(&self) -> i32 {
        self.resolved_length
    }

    pub fn resolved_chain(&self) -> &[(SpaceId, i32)] {
        &self.resolved_chain
    }
}

/// The space arena.
#[derive(Default)]
pub struct Spaces {
    map: PrimaryMap<SpaceId, Space>,
}

impl Spaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, owner: LoctrId, align: Alignment, kind: SpaceKind) -> SpaceId {
        debug_assert!(kind != SpaceKind::LoctrUnknown);
        self.map.push(Space {
            kind,
            align,
            owner,
            previous_boundary: 0,
            previous_offset: 0,
            resolved: false,
            resolved_length: 0,
            resolved_chain: SmallVec::new(),
        })
    }

    /// Create a `LoctrUnknown` space remembering the ORG boundary/offset
    /// that must be applied once the target becomes known.
    pub fn create_loctr_unknown(
        &mut self,
        owner: LoctrId,
        boundary: u32,
        offset: i32,
    ) -> SpaceId {
        self.map.push(Space {
            kind: SpaceKind::LoctrUnknown,
            align: NO_ALIGN,
            owner,
            previous_boundary: boundary,
            previous_offset: offset,
            resolved: false,
            resolved_length: 0,
            resolved_chain: SmallVec::new(),
        })
    }

    pub fn get(&self, id: SpaceId) -> &Space {
        &self.map[id]
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Fill a space with a byte length. For `Alignment` spaces the supplied
    /// value is the number of bytes laid down before the boundary; the
    /// space takes the fix-up amount instead.
    ///
    /// Returns false when the space was already resolved (the call is then
    /// a no-op).
    pub fn resolve_length(&mut self, id: SpaceId, mut length: i32) -> bool {
        let space = &mut self.map[id];
        if space.resolved {
            return false;
        }
        if space.kind == SpaceKind::Alignment {
            let align = space.align;
            let boundary = align.boundary as i32;
            let byte = align.byte as i32;
            length = if length.rem_euclid(boundary) != byte {
                ((boundary - length.rem_euclid(boundary)) + byte).rem_euclid(boundary)
            } else {
                0
            };
        }
        space.resolved_length = length;
        space.resolved = true;
        true
    }

    /// Redirect an unknown-loctr space to another space of its section.
    pub fn resolve_redirect(&mut self, id: SpaceId, value: SpaceId) -> bool {
        debug_assert!(self.map[id].kind == SpaceKind::LoctrUnknown);
        debug_assert!(id != value);
        let space = &mut self.map[id];
        if space.resolved {
            return false;
        }
        space.resolved_chain.push((value, 1));
        space.resolved = true;
        true
    }

    /// Replace an unknown-loctr space with a fully evaluated address,
    /// folding in its offset and any spaces it still carries.
    pub fn resolve_address(&mut self, id: SpaceId, value: Address) -> bool {
        debug_assert!(self.map[id].kind == SpaceKind::LoctrUnknown);
        let offset = self.resolved_offset_of_address(&value);
        let chain = value
            .space_entries()
            .iter()
            .filter(|&&(sp, _)| sp != id)
            .copied()
            .collect();
        let space = &mut self.map[id];
        if space.resolved {
            return false;
        }
        space.resolved_length = offset;
        space.resolved_chain = chain;
        space.resolved = true;
        true
    }

    fn resolved_offset_of_address(&self, addr: &Address) -> i32 {
        addr.raw_offset()
    }

    /// Bytes contributed by a resolved space, walking resolved chains.
    /// An unresolved space contributes nothing.
    pub fn resolved_offset(&self, id: SpaceId) -> i32 {
        let space = &self.map[id];
        if !space.resolved {
            return 0;
        }
        let mut offset = space.resolved_length;
        for &(chained, count) in space.resolved_chain.iter() {
            offset += count * self.resolved_offset(chained);
        }
        offset
    }

    /// Is anything along the resolution chain still unresolved?
    pub fn has_unresolved(&self, id: SpaceId) -> bool {
        let space = &self.map[id];
        if !space.resolved {
            return true;
        }
        space
            .resolved_chain
            .iter()
            .any(|&(chained, _)| self.has_unresolved(chained))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlasm_entity::EntityRef;

    fn loctr() -> LoctrId {
        LoctrId::new(0)
    }

    #[test]
    fn resolve_once() {
        let mut spaces = Spaces::new();
        let sp = spaces.create(loctr(), NO_ALIGN, SpaceKind::Ordinary);
        assert!(spaces.has_unresolved(sp));

        assert!(spaces.resolve_length(sp, 10));
        assert!(!spaces.resolve_length(sp, 99));
        assert_eq!(spaces.resolved_offset(sp), 10);
        assert!(!spaces.has_unresolved(sp));
    }

    #[test]
    fn alignment_fixup() {
        let mut spaces = Spaces::new();
        let sp = spaces.create(loctr(), FULLWORD, SpaceKind::Alignment);
        // Three bytes laid down; one byte of padding reaches the boundary.
        spaces.resolve_length(sp, 3);
        assert_eq!(spaces.resolved_offset(sp), 1);

        let sp2 = spaces.create(loctr(), FULLWORD, SpaceKind::Alignment);
        spaces.resolve_length(sp2, 8);
        assert_eq!(spaces.resolved_offset(sp2), 0);
    }

    #[test]
    fn redirect_chains() {
        let mut spaces = Spaces::new();
        let target = spaces.create(loctr(), NO_ALIGN, SpaceKind::Ordinary);
        let unknown = spaces.create_loctr_unknown(loctr(), 0, 0);

        spaces.resolve_redirect(unknown, target);
        assert!(spaces.has_unresolved(unknown));

        spaces.resolve_length(target, 6);
        assert!(!spaces.has_unresolved(unknown));
        assert_eq!(spaces.resolved_offset(unknown), 6);
    }
}
