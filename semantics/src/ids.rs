//! Interned identifier storage.
//!
//! Every symbol, section, location counter, and USING label name in a
//! translation unit is interned exactly once into an [`IdStorage`] and
//! referred to by an [`IdIndex`] afterwards. Two `IdIndex` values compare
//! equal iff they denote the same (case-folded) name. Index 0 is reserved
//! for the empty name, which stands for "no name" (private sections,
//! unlabeled USINGs).

use crate::fx::FxHashMap;
use hlasm_entity::{entity_impl, PrimaryMap};

/// An opaque reference to an interned identifier.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdIndex(u32);
entity_impl!(IdIndex, "id");

impl IdIndex {
    /// The empty identifier, denoting "no name".
    pub const EMPTY: IdIndex = IdIndex(0);

    /// Does this index denote the empty name?
    pub fn is_empty(self) -> bool {
        self == Self::EMPTY
    }
}

/// The identifier interner.
///
/// HLASM is case-insensitive in ordinary symbols; names are folded to
/// uppercase on the way in so that `abc` and `ABC` intern to the same
/// index.
pub struct IdStorage {
    names: PrimaryMap<IdIndex, Box<str>>,
    index: FxHashMap<Box<str>, IdIndex>,
}

impl IdStorage {
    /// Create a storage with the empty name pre-interned at index 0.
    pub fn new() -> Self {
        let mut s = Self {
            names: PrimaryMap::new(),
            index: FxHashMap::default(),
        };
        let empty = s.names.push("".into());
        debug_assert_eq!(empty, IdIndex::EMPTY);
        s.index.insert("".into(), empty);
        s
    }

    /// Intern `name`, folding it to uppercase. Returns the existing index
    /// when the name was seen before.
    pub fn add(&mut self, name: &str) -> IdIndex {
        let folded = fold(name);
        if let Some(&id) = self.index.get(folded.as_ref()) {
            return id;
        }
        let id = self.names.push(folded.clone());
        self.index.insert(folded, id);
        id
    }

    /// Look up `name` without interning it.
    pub fn find(&self, name: &str) -> Option<IdIndex> {
        self.index.get(fold(name).as_ref()).copied()
    }

    /// Resolve an index back to its text.
    pub fn resolve(&self, id: IdIndex) -> &str {
        &self.names[id]
    }

    /// Number of interned names, including the empty one.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false; the empty name is interned on construction.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for IdStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn fold(name: &str) -> Box<str> {
    if name.bytes().any(|b| b.is_ascii_lowercase()) {
        name.to_ascii_uppercase().into()
    } else {
        name.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_once() {
        let mut ids = IdStorage::new();
        let a = ids.add("LOOP");
        let b = ids.add("loop");
        assert_eq!(a, b);
        assert_eq!(ids.resolve(a), "LOOP");
        assert_ne!(a, IdIndex::EMPTY);
    }

    #[test]
    fn empty_is_reserved() {
        let mut ids = IdStorage::new();
        assert_eq!(ids.add(""), IdIndex::EMPTY);
        assert!(ids.add("").is_empty());
        assert!(!ids.add("A").is_empty());
    }

    #[test]
    fn find_does_not_intern() {
        let mut ids = IdStorage::new();
        assert_eq!(ids.find("X"), None);
        let x = ids.add("X");
        assert_eq!(ids.find("x"), Some(x));
    }
}
