//! HashMap/HashSet aliases using the Fx hasher.
//!
//! Symbol names are short interned indices; the sip hasher buys nothing
//! here.

pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;
