//! Location counters and ORG semantics.
//!
//! A location counter is not a single number: ORG can move it backwards or
//! to addresses that are not known yet, and a later `ORG ,` must restore
//! the greatest value any branch reached. The counter therefore keeps a
//! small vector of org-alternatives ([`LoctrData`]); the last one receives
//! new allocations and the set as a whole answers "what is the maximum".
//!
//! Each alternative tracks the storage laid down, the unresolved spaces
//! inside it with the storage that follows each of them, and a "safe area"
//! (bytes allocated since the last space) inside which a backward ORG can
//! simply rewind.

use crate::context::address::{Address, Base};
use crate::context::section::SectionId;
use crate::context::space::{Alignment, SpaceId, SpaceKind, Spaces, NO_ALIGN};
use crate::ids::IdIndex;
use hlasm_entity::entity_impl;
use smallvec::SmallVec;

/// An opaque reference to a location counter.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoctrId(u32);
entity_impl!(LoctrId, "loctr");

/// Whether the counter opens its section (offset 0) or starts at the end
/// of the preceding counter.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LoctrKind {
    Starting,
    NonStarting,
}

/// Whether an org-alternative is still a candidate for the counter
/// maximum.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LoctrDataKind {
    PotentialMax,
    UnknownMax,
}

#[derive(Clone, Debug)]
struct SpaceStorage {
    space: SpaceId,
    storage_after: i32,
}

/// One org-alternative of a location counter.
#[derive(Clone, Debug)]
pub struct LoctrData {
    /// Bytes allocated in this alternative, assuming its branch is the
    /// maximum.
    pub storage: i32,
    unknown_parts: Vec<SpaceStorage>,
    pub initial_storage: i32,
    /// Bytes allocated since the last space; a backward ORG inside this
    /// area can rewind without a new space.
    pub current_safe_area: i32,
    pub kind: LoctrDataKind,
}

impl LoctrData {
    fn new(kind: LoctrDataKind) -> Self {
        Self {
            storage: 0,
            unknown_parts: Vec::new(),
            initial_storage: 0,
            current_safe_area: 0,
            kind,
        }
    }

    fn append_space(&mut self, sp: SpaceId) {
        self.unknown_parts.push(SpaceStorage {
            space: sp,
            storage_after: 0,
        });
        self.current_safe_area = 0;
    }

    fn append_storage(&mut self, st: i32) {
        self.storage += st;
        if let Some(last) = self.unknown_parts.last_mut() {
            last.storage_after += st;
        } else {
            self.initial_storage += st;
        }
        self.current_safe_area += st;
    }

    /// Merge `data`, whose first unknown part is substituted by this
    /// alternative's contents.
    fn append_data(&mut self, mut data: LoctrData) {
        debug_assert!(!data.unknown_parts.is_empty());
        let first = data.unknown_parts.remove(0);
        self.append_storage(first.storage_after);
        self.unknown_parts.extend(data.unknown_parts);
        self.current_safe_area = data.current_safe_area;
    }

    fn resolve_space(&mut self, sp: SpaceId, length: i32) {
        let Some(pos) = self.unknown_parts.iter().position(|p| p.space == sp) else {
            return;
        };
        self.storage += length;
        let after = self.unknown_parts[pos].storage_after;
        if pos == 0 {
            self.initial_storage += after + length;
        } else {
            self.unknown_parts[pos - 1].storage_after += after + length;
        }
        self.unknown_parts.remove(pos);
    }

    fn redirect_space(&mut self, sp: SpaceId, new_space: SpaceId) {
        if let Some(part) = self.unknown_parts.iter_mut().find(|p| p.space == sp) {
            part.space = new_space;
        }
    }

    fn has_alignment(&self, align: Alignment, spaces: &Spaces) -> bool {
        let test: i32 = match self.unknown_parts.last() {
            None => self.storage,
            Some(last) => {
                let sp_align = spaces.get(last.space).align;
                if align.boundary > sp_align.boundary {
                    return false;
                }
                (sp_align.boundary + sp_align.byte) as i32 + last.storage_after
            }
        };
        test.rem_euclid(align.boundary as i32) == align.byte as i32
    }

    fn need_space_alignment(&self, align: Alignment, spaces: &Spaces) -> bool {
        match self.unknown_parts.last() {
            Some(last) => spaces.get(last.space).align.boundary < align.boundary,
            None => false,
        }
    }

    /// Pad up to the requested alignment; fails when an alignment space
    /// would be needed instead.
    fn align(&mut self, align: Alignment, spaces: &Spaces) -> bool {
        if self.need_space_alignment(align, spaces) {
            return false;
        }
        let boundary = align.boundary as i32;
        let byte = align.byte as i32;
        let pad = ((boundary - self.last_storage().rem_euclid(boundary)) + byte)
            .rem_euclid(boundary);
        self.append_storage(pad);
        true
    }

    fn last_storage(&self) -> i32 {
        match self.unknown_parts.last() {
            Some(last) => last.storage_after,
            None => self.initial_storage,
        }
    }

    fn matches_first_space(&self, sp: SpaceId) -> bool {
        self.unknown_parts.first().map(|p| p.space) == Some(sp)
    }

    fn has_space(&self) -> bool {
        !self.unknown_parts.is_empty()
    }

    fn first_space(&self) -> Option<SpaceId> {
        self.unknown_parts.first().map(|p| p.space)
    }

    fn last_space(&self) -> Option<SpaceId> {
        self.unknown_parts.last().map(|p| p.space)
    }

    fn space_entries(&self) -> SmallVec<[(SpaceId, i32); 2]> {
        self.unknown_parts.iter().map(|p| (p.space, 1)).collect()
    }
}

/// A section's location counter.
pub struct LocationCounter {
    pub name: IdIndex,
    pub owner: SectionId,
    pub kind: LoctrKind,

    org_data: Vec<LoctrData>,
    switched: Option<SpaceId>,
    switched_org_data: Vec<LoctrData>,
    layout_created: bool,
}

impl LocationCounter {
    /// Create a counter. For non-starting counters the caller must follow
    /// up with [`Self::install_begin_space`] once the counter id is known.
    pub fn new(name: IdIndex, owner: SectionId, kind: LoctrKind) -> Self {
        Self {
            name,
            owner,
            kind,
            org_data: vec![LoctrData::new(LoctrDataKind::PotentialMax)],
            switched: None,
            switched_org_data: Vec::new(),
            layout_created: false,
        }
    }

    /// Register the begin anchor of a non-starting counter.
    pub fn install_begin_space(&mut self, self_id: LoctrId, spaces: &mut Spaces) {
        debug_assert_eq!(self.kind, LoctrKind::NonStarting);
        let sp = spaces.create(self_id, NO_ALIGN, SpaceKind::LoctrBegin);
        self.curr_data_mut().append_space(sp);
    }

    pub fn has_unresolved_spaces(&self) -> bool {
        self.curr_data().has_space()
    }

    pub fn storage(&self) -> i32 {
        self.curr_data().storage
    }

    fn base(&self) -> Base {
        Base::unqualified(self.owner)
    }

    pub fn current_address(&self, spaces: &Spaces) -> Address {
        Address::new(
            self.base(),
            self.curr_data().storage,
            &self.curr_data().space_entries(),
            spaces,
        )
    }

    /// Reserve `length` bytes with the requested alignment. When the
    /// current boundary is unknown and finer than requested, an alignment
    /// space is emitted and returned.
    pub fn reserve_storage_area(
        &mut self,
        self_id: LoctrId,
        spaces: &mut Spaces,
        length: i32,
        align: Alignment,
    ) -> (Address, Option<SpaceId>) {
        let mut sp = None;
        if !self.curr_data().has_alignment(align, spaces) {
            if self.curr_data().need_space_alignment(align, spaces) {
                sp = Some(self.register_space(self_id, spaces, align, SpaceKind::Alignment));
            } else {
                let ok = self.curr_data_mut().align(align, spaces);
                debug_assert!(ok);
            }
        }

        self.curr_data_mut().append_storage(length);
        self.check_available_value();

        (self.current_address(spaces), sp)
    }

    pub fn align(
        &mut self,
        self_id: LoctrId,
        spaces: &mut Spaces,
        align: Alignment,
    ) -> (Address, Option<SpaceId>) {
        self.reserve_storage_area(self_id, spaces, 0, align)
    }

    pub fn register_ordinary_space(
        &mut self,
        self_id: LoctrId,
        spaces: &mut Spaces,
        align: Alignment,
    ) -> SpaceId {
        self.register_space(self_id, spaces, align, SpaceKind::Ordinary)
    }

    pub fn need_space_alignment(&self, align: Alignment, spaces: &Spaces) -> bool {
        self.curr_data().need_space_alignment(align, spaces)
    }

    /// Implements `ORG target` for a target address with a known absolute
    /// part. Returns the space registered for the move, if any; `Err` when
    /// the target does not belong to this counter or would move before its
    /// start.
    pub fn set_value(
        &mut self,
        self_id: LoctrId,
        spaces: &mut Spaces,
        addr: &Address,
        boundary: u32,
        offset: i32,
    ) -> Result<Option<SpaceId>, ()> {
        let al = if boundary != 0 {
            let b = boundary as i32;
            (b - addr.offset(spaces).rem_euclid(b)).rem_euclid(b)
        } else {
            0
        };

        let curr_addr = self.current_address(spaces);

        if !addr.in_same_loctr(&curr_addr, spaces)
            || (!addr.has_dependant_space(spaces) && addr.offset(spaces) + al + offset < 0)
        {
            return Err(());
        }

        let same_spaces = curr_addr.space_entries() == addr.space_entries();
        let outside_safe_area = self.curr_data().storage - addr.offset(spaces)
            > self.curr_data().current_safe_area
            || (boundary != 0
                && self.curr_data().storage - addr.offset(spaces)
                    > self.curr_data().current_safe_area + offset);

        if !same_spaces || outside_safe_area {
            // Different space composition or outside the safe area: branch
            // a new alternative pinned by a LOCTR_SET space.
            self.org_data.push(LoctrData::new(LoctrDataKind::UnknownMax));
            Ok(Some(self.register_space(
                self_id,
                spaces,
                NO_ALIGN,
                SpaceKind::LoctrSet,
            )))
        } else {
            let diff = addr.offset(spaces) - self.curr_data().storage;
            if diff < 0 && self.curr_data().kind == LoctrDataKind::PotentialMax {
                // Moving backwards off a potential maximum: keep the old
                // branch for the later `ORG ,` maximum computation.
                let clone = self.curr_data().clone();
                self.org_data.push(clone);
                self.curr_data_mut().kind = LoctrDataKind::UnknownMax;
            }
            self.curr_data_mut().append_storage(diff);
            self.check_available_value();
            Ok(None)
        }
    }

    /// Implements `ORG target` when the target's absolute part is not
    /// known yet: branch a fresh alternative anchored by a LOCTR_UNKNOWN
    /// space remembering the requested boundary and offset.
    pub fn set_value_undefined(
        &mut self,
        self_id: LoctrId,
        spaces: &mut Spaces,
        boundary: u32,
        offset: i32,
    ) -> SpaceId {
        self.org_data.push(LoctrData::new(LoctrDataKind::UnknownMax));
        let sp = spaces.create_loctr_unknown(self_id, boundary, offset);
        self.curr_data_mut().append_space(sp);
        self.curr_data_mut().kind = LoctrDataKind::PotentialMax;
        sp
    }

    /// Implements `ORG ,`: go to the greatest value the counter reached.
    /// When that value cannot be computed yet, a LOCTR_MAX space is
    /// registered and the addresses of all alternatives are returned so
    /// the caller can install an aggregate dependency.
    pub fn set_available_value(
        &mut self,
        self_id: LoctrId,
        spaces: &mut Spaces,
    ) -> (Option<SpaceId>, Vec<Address>) {
        // Drop the last alternative when it is provably no higher than the
        // previous one.
        if self.curr_data().kind == LoctrDataKind::UnknownMax
            && self.org_data.len() >= 2
            && self.org_data[self.org_data.len() - 2].storage >= self.curr_data().storage
        {
            self.org_data.pop();
        }

        if self.org_data.len() == 1
            && (self.org_data[0].unknown_parts.is_empty()
                || (self.org_data[0].unknown_parts.len() == 1
                    && self.kind == LoctrKind::NonStarting))
        {
            // Single alternative with no real spaces: already at the
            // maximum.
            return (None, Vec::new());
        }

        let mut addr_arr: Vec<Address> = self
            .org_data
            .iter()
            .map(|d| Address::new(self.base(), d.storage, &d.space_entries(), spaces))
            .collect();

        let mut loctr_start = None;
        if self.kind == LoctrKind::NonStarting {
            let begin = self.org_data[0]
                .first_space()
                .expect("non-starting counter begins with its anchor");
            debug_assert_eq!(spaces.get(begin).kind, SpaceKind::LoctrBegin);
            loctr_start = Some(begin);
            // Make the alternatives pseudo-relative to this counter.
            for (addr, data) in addr_arr.iter_mut().zip(self.org_data.iter()) {
                match data.first_space().map(|sp| spaces.get(sp).kind) {
                    Some(SpaceKind::LoctrBegin) => {
                        let entries: SmallVec<[(SpaceId, i32); 2]> = addr
                            .space_entries()
                            .iter()
                            .skip(1)
                            .copied()
                            .collect();
                        *addr = Address::from_parts(
                            addr.bases().iter().copied().collect(),
                            addr.raw_offset(),
                            entries,
                        );
                    }
                    Some(SpaceKind::LoctrSet) | Some(SpaceKind::LoctrUnknown) => {
                        let mut entries: SmallVec<[(SpaceId, i32); 2]> =
                            addr.space_entries().iter().copied().collect();
                        entries.push((begin, -1));
                        *addr = Address::from_parts(
                            addr.bases().iter().copied().collect(),
                            addr.raw_offset(),
                            entries,
                        );
                    }
                    _ => {}
                }
            }
        }

        self.org_data.push(LoctrData::new(LoctrDataKind::PotentialMax));
        if let Some(begin) = loctr_start {
            self.curr_data_mut().append_space(begin);
        }
        let sp = self.register_space(self_id, spaces, NO_ALIGN, SpaceKind::LoctrMax);

        (Some(sp), addr_arr)
    }

    /// End-of-section: resolve the begin anchor against the previous
    /// counter's final storage.
    pub fn finish_layout(&mut self, spaces: &mut Spaces, offset: i32) {
        debug_assert!(!self.layout_created, "layout already created");
        debug_assert!(self.kind != LoctrKind::Starting || offset == 0);

        if self.kind == LoctrKind::NonStarting {
            let begin = self.org_data[0]
                .first_space()
                .expect("non-starting counter begins with its anchor");
            debug_assert_eq!(spaces.get(begin).kind, SpaceKind::LoctrBegin);
            if spaces.resolve_length(begin, offset) {
                self.resolve_space(begin, offset);
            }
        }
        self.layout_created = true;
    }

    /// Notification that `sp` resolved to `length` bytes; updates every
    /// alternative and prunes the ones a resolved LOCTR_MAX obsoletes.
    pub fn resolve_space(&mut self, sp: SpaceId, length: i32) {
        let max_kind = self
            .org_data
            .iter()
            .skip(1)
            .position(|d| d.matches_first_space(sp));
        if let Some(pos) = max_kind {
            // A LOCTR_MAX space starts alternative pos+1; everything before
            // the one preceding it lost the competition.
            self.org_data.drain(..pos);
        }
        for data in self.org_data.iter_mut() {
            data.resolve_space(sp, length);
        }
        for data in self.switched_org_data.iter_mut() {
            data.resolve_space(sp, length);
        }
    }

    /// Move the alternatives at and after the one anchored by `sp` aside
    /// so the ORG they belong to can be replayed with a known target.
    pub fn switch_to_unresolved_value(&mut self, sp: SpaceId) {
        debug_assert!(self.switched.is_none());
        let Some(pos) = self.org_data.iter().position(|d| d.matches_first_space(sp)) else {
            debug_assert!(false, "switching to an unknown space");
            return;
        };
        self.switched = Some(sp);
        self.switched_org_data = self.org_data.split_off(pos);
        if self.org_data.is_empty() {
            // Defensive: keep at least one alternative live.
            self.org_data.push(LoctrData::new(LoctrDataKind::PotentialMax));
        }
    }

    /// Restore the alternatives moved aside by
    /// [`Self::switch_to_unresolved_value`], merging them onto the replayed
    /// state. Returns what the unknown space resolves to: a new pending
    /// space, or the counter's now-known address.
    pub fn restore_from_unresolved_value(
        &mut self,
        sp: SpaceId,
        spaces: &Spaces,
    ) -> RestoredValue {
        debug_assert_eq!(self.switched, Some(sp));

        let first_space = self.curr_data().first_space();
        let tmp_idx = self.org_data.len() - 1;

        let result = match first_space {
            Some(new_sp) if spaces.get(new_sp).kind == SpaceKind::LoctrSet => {
                for data in std::mem::take(&mut self.switched_org_data) {
                    if data.matches_first_space(sp) {
                        let mut data = data;
                        data.redirect_space(sp, new_sp);
                        self.org_data.push(data);
                    } else {
                        self.org_data.push(data);
                    }
                }
                RestoredValue::Space(new_sp)
            }
            _ => {
                let addr = self.current_address(spaces);
                for data in std::mem::take(&mut self.switched_org_data) {
                    if data.matches_first_space(sp) {
                        let mut merged = self.org_data[tmp_idx].clone();
                        merged.kind = data.kind;
                        merged.append_data(data);
                        self.org_data.push(merged);
                        self.check_available_value();
                    } else {
                        self.org_data.push(data);
                    }
                }
                RestoredValue::Address(addr)
            }
        };

        self.switched = None;
        self.switched_org_data.clear();

        if tmp_idx + 1 < self.org_data.len() && self.check_if_higher_value(tmp_idx + 1) {
            self.org_data.remove(tmp_idx);
        }
        result
    }

    /// Clamp any alternative whose leading storage went negative back to
    /// zero; returns false when clamping happened (the ORG was invalid).
    pub fn check_underflow(&mut self, spaces: &Spaces) -> bool {
        let mut ok = true;
        for data in self.org_data.iter_mut() {
            let checked = match data.first_space() {
                Some(sp) if spaces.get(sp).kind == SpaceKind::LoctrBegin => {
                    match data.unknown_parts.first_mut() {
                        Some(part) => &mut part.storage_after,
                        None => continue,
                    }
                }
                None => &mut data.initial_storage,
                _ => continue,
            };
            if *checked < 0 {
                *checked = 0;
                ok = false;
            }
        }
        ok
    }

    pub fn curr_data(&self) -> &LoctrData {
        self.org_data.last().expect("at least one org alternative")
    }

    fn curr_data_mut(&mut self) -> &mut LoctrData {
        self.org_data.last_mut().expect("at least one org alternative")
    }

    pub fn org_alternatives(&self) -> &[LoctrData] {
        &self.org_data
    }

    fn register_space(
        &mut self,
        self_id: LoctrId,
        spaces: &mut Spaces,
        align: Alignment,
        kind: SpaceKind,
    ) -> SpaceId {
        let sp = spaces.create(self_id, align, kind);
        self.curr_data_mut().append_space(sp);
        self.curr_data_mut().kind = LoctrDataKind::PotentialMax;
        sp
    }

    /// When the last alternative provably reached at least the storage of
    /// the previous one, the previous one is no longer a candidate for the
    /// maximum.
    fn check_available_value(&mut self) {
        if self.curr_data().kind == LoctrDataKind::PotentialMax {
            return;
        }
        debug_assert!(self.org_data.len() > 1);
        if self.check_if_higher_value(self.org_data.len() - 1) {
            let old_kind = self.org_data[self.org_data.len() - 2].kind;
            self.org_data.remove(self.org_data.len() - 2);
            self.curr_data_mut().kind = old_kind;
        }
    }

    fn check_if_higher_value(&self, idx: usize) -> bool {
        self.org_data[idx - 1].storage <= self.org_data[idx].storage
    }
}

/// Outcome of replaying an ORG whose target became known.
pub enum RestoredValue {
    Space(SpaceId),
    Address(Address),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::space::{FULLWORD, HALFWORD};
    use hlasm_entity::EntityRef;

    fn fixture() -> (LocationCounter, Spaces, LoctrId) {
        let ctr = LocationCounter::new(IdIndex::EMPTY, SectionId::new(0), LoctrKind::Starting);
        (ctr, Spaces::new(), LoctrId::new(0))
    }

    #[test]
    fn reserve_and_align() {
        let (mut ctr, mut spaces, id) = fixture();
        ctr.reserve_storage_area(id, &mut spaces, 3, NO_ALIGN);
        let (addr, sp) = ctr.reserve_storage_area(id, &mut spaces, 4, FULLWORD);
        assert!(sp.is_none());
        assert_eq!(ctr.storage(), 8);
        assert_eq!(addr.offset(&spaces), 8);
    }

    #[test]
    fn unknown_alignment_emits_space() {
        let (mut ctr, mut spaces, id) = fixture();
        ctr.register_ordinary_space(id, &mut spaces, HALFWORD);
        let (_, sp) = ctr.reserve_storage_area(id, &mut spaces, 4, FULLWORD);
        let sp = sp.expect("alignment space required");
        assert_eq!(spaces.get(sp).kind, SpaceKind::Alignment);
    }

    #[test]
    fn org_backward_and_available_value() {
        // DS F / ORG back to start / DS H / ORG , : maximum is 4.
        let (mut ctr, mut spaces, id) = fixture();
        let start = ctr.current_address(&spaces);
        ctr.reserve_storage_area(id, &mut spaces, 4, NO_ALIGN);

        let sp = ctr
            .set_value(id, &mut spaces, &start, 0, 0)
            .expect("org valid");
        assert!(sp.is_none());
        assert_eq!(ctr.storage(), 0);

        ctr.reserve_storage_area(id, &mut spaces, 2, NO_ALIGN);

        let (max_sp, alternatives) = ctr.set_available_value(id, &mut spaces);
        let max_sp = max_sp.expect("maximum not known statically");
        assert_eq!(spaces.get(max_sp).kind, SpaceKind::LoctrMax);
        assert_eq!(alternatives.len(), 2);

        // The aggregate resolver would compute max(4, 2) = 4.
        let max = alternatives
            .iter()
            .map(|a| a.offset(&spaces))
            .max()
            .unwrap();
        assert_eq!(max, 4);

        spaces.resolve_length(max_sp, max);
        ctr.resolve_space(max_sp, max);
        assert_eq!(ctr.storage(), 4);
        assert!(!ctr.has_unresolved_spaces());
    }

    #[test]
    fn org_forward_within_safe_area() {
        let (mut ctr, mut spaces, id) = fixture();
        ctr.reserve_storage_area(id, &mut spaces, 16, NO_ALIGN);
        let target = ctr.current_address(&spaces).add_offset(-6);
        let sp = ctr
            .set_value(id, &mut spaces, &target, 0, 0)
            .expect("org valid");
        assert!(sp.is_none());
        assert_eq!(ctr.storage(), 10);
    }

    #[test]
    fn org_before_counter_start_fails() {
        let (mut ctr, mut spaces, id) = fixture();
        ctr.reserve_storage_area(id, &mut spaces, 4, NO_ALIGN);
        let target = ctr.current_address(&spaces).add_offset(-8);
        assert!(ctr.set_value(id, &mut spaces, &target, 0, 0).is_err());
    }

    #[test]
    fn underflow_clamps() {
        let (mut ctr, mut spaces, id) = fixture();
        ctr.reserve_storage_area(id, &mut spaces, 4, NO_ALIGN);
        // Emulate a dependency-driven negative rewind.
        ctr.curr_data_mut().append_storage(-10);
        assert!(!ctr.check_underflow(&spaces));
        assert_eq!(ctr.curr_data().initial_storage, 0);
    }
}
