//! Insertion-ordered maps and sets hashed with [`fxhash`].
//!
//! The IR keeps block instruction lists and per-value use lists in these, which gives
//! program-order iteration together with constant time lookup and removal.

use fxhash::FxBuildHasher;
pub use indexmap::*;

pub type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;
pub type FxIndexSet<T> = IndexSet<T, FxBuildHasher>;

/// Creates an empty [`FxIndexSet`] that can hold `capacity` elements without reallocating.
pub fn fx_index_set_with_capacity<T>(capacity: usize) -> FxIndexSet<T> {
    FxIndexSet::with_capacity_and_hasher(capacity, FxBuildHasher::default())
}
