//! Composed store state.
//!
//! The store keeps one immutable slice per model, keyed by model name. Slices
//! are reference counted and type erased; [`RootState::slice`] recovers the
//! concrete type. A dispatch that leaves a slice untouched keeps the very same
//! `Arc`, which is how unchanged slices are told apart from changed ones.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Bounds every slice state type must satisfy.
///
/// The serde bounds exist so the persistence layer can snapshot and restore
/// slices without knowing their concrete types.
pub trait SliceState: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> SliceState for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A type-erased, shared slice value.
pub type SliceRef = Arc<dyn Any + Send + Sync>;

/// Snapshot of the whole store: model name → slice.
#[derive(Clone, Default)]
pub struct RootState {
    slices: BTreeMap<String, SliceRef>,
}

impl RootState {
    /// Create an empty root state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed access to the slice owned by `name`.
    ///
    /// Returns `None` when no such slice exists or it holds another type.
    #[must_use]
    pub fn slice<S: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<S>> {
        self.slices
            .get(name)
            .and_then(|slice| Arc::clone(slice).downcast::<S>().ok())
    }

    /// Untyped access to a slice
    #[must_use]
    pub fn raw(&self, name: &str) -> Option<&SliceRef> {
        self.slices.get(name)
    }

    /// Insert or replace a slice
    pub fn insert_raw(&mut self, name: impl Into<String>, slice: SliceRef) {
        self.slices.insert(name.into(), slice);
    }

    /// Whether a slice named `name` exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.slices.contains_key(name)
    }

    /// Slice names in lexical order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slices.keys().map(String::as_str)
    }

    /// Number of slices
    #[must_use]
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    /// Whether the state has no slices
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// True when both snapshots hold the same slice allocations.
    ///
    /// This is a pointer comparison, not structural equality: it answers
    /// "did any reducer produce a new value", which is what subscribers and
    /// the persistor care about.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.slices.len() == other.slices.len()
            && self
                .slices
                .iter()
                .zip(other.slices.iter())
                .all(|((a_name, a), (b_name, b))| a_name == b_name && Arc::ptr_eq(a, b))
    }

    /// Names of slices whose allocation differs from `previous`
    #[must_use]
    pub fn changed_since<'a>(&'a self, previous: &Self) -> Vec<&'a str> {
        self.slices
            .iter()
            .filter(|(name, slice)| {
                previous
                    .slices
                    .get(name.as_str())
                    .is_none_or(|before| !Arc::ptr_eq(before, slice))
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

impl std::fmt::Debug for RootState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootState")
            .field("slices", &self.slices.keys().collect::<Vec<_>>())
            .finish()
    }
}
