//! Common type aliases used throughout the crate.
//!
//! Hot-path name lookups use `FxHashMap`; insertion-ordered collections
//! (object fields, marshaled mappings) use `IndexMap` seeded with the same
//! fast hasher.

pub use std::cell::{Cell, Ref, RefCell, RefMut};
pub use std::fmt;
pub use std::rc::{Rc, Weak};

pub use rustc_hash::{FxHashMap, FxHashSet};

pub type IndexMap<K, V> =
    indexmap::IndexMap<K, V, core::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

/// Create an empty IndexMap
#[inline]
pub fn index_map_new<K, V>() -> IndexMap<K, V>
where
    K: core::hash::Hash + Eq,
{
    indexmap::IndexMap::with_hasher(Default::default())
}

/// Create an IndexMap with the given capacity
#[inline]
pub fn index_map_with_capacity<K, V>(capacity: usize) -> IndexMap<K, V>
where
    K: core::hash::Hash + Eq,
{
    indexmap::IndexMap::with_capacity_and_hasher(capacity, Default::default())
}

