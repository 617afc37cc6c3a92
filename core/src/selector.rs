//! Base accessors and memoized selectors.
//!
//! Every model gets a [`Fetch`]: the accessor from the composed state to its
//! own slice. Selectors derived with [`create_selector`] remember their last
//! input slice and only rerun the projection when a reducer produced a new
//! one.

use crate::state::RootState;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Accessor from the composed state to one model's slice: `root[name]`.
pub struct Fetch<S> {
    name: Arc<str>,
    _slice: PhantomData<fn() -> S>,
}

impl<S: Send + Sync + 'static> Fetch<S> {
    /// Accessor for the slice named `name`
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            _slice: PhantomData,
        }
    }

    /// Slice name this accessor reads
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the slice, if present and of type `S`
    #[must_use]
    pub fn get(&self, root: &RootState) -> Option<Arc<S>> {
        root.slice::<S>(&self.name)
    }
}

impl<S> Clone for Fetch<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            _slice: PhantomData,
        }
    }
}

impl<S> std::fmt::Debug for Fetch<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fetch").field(&self.name).finish()
    }
}

type SelectFn<T> = dyn Fn(&RootState) -> Option<T> + Send + Sync;

/// A named query over the composed state.
pub struct Selector<T> {
    select: Arc<SelectFn<T>>,
    recomputations: Arc<AtomicUsize>,
}

impl<T> Clone for Selector<T> {
    fn clone(&self) -> Self {
        Self {
            select: Arc::clone(&self.select),
            recomputations: Arc::clone(&self.recomputations),
        }
    }
}

impl<T> Selector<T> {
    /// Evaluate against `root`; `None` when the input slice is missing
    #[must_use]
    pub fn select(&self, root: &RootState) -> Option<T> {
        (self.select)(root)
    }

    /// How many times the projection actually ran
    #[must_use]
    pub fn recomputations(&self) -> usize {
        self.recomputations.load(Ordering::Relaxed)
    }
}

impl<T> std::fmt::Debug for Selector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("recomputations", &self.recomputations())
            .finish_non_exhaustive()
    }
}

/// Derive a memoized selector from a slice accessor.
///
/// The cache holds the last input `Arc` and its result; a lookup whose input
/// is the same allocation returns a clone of the cached result.
///
/// # Example
///
/// ```
/// use modelkit_core::selector::{Fetch, create_selector};
/// use modelkit_core::state::RootState;
/// use std::sync::Arc;
///
/// let fetch = Fetch::<Vec<u32>>::new("scores");
/// let total = create_selector(&fetch, |scores| scores.iter().sum::<u32>());
///
/// let mut root = RootState::new();
/// root.insert_raw("scores", Arc::new(vec![1_u32, 2, 3]));
/// assert_eq!(total.select(&root), Some(6));
/// assert_eq!(total.select(&root), Some(6));
/// assert_eq!(total.recomputations(), 1);
/// ```
pub fn create_selector<S, T, F>(fetch: &Fetch<S>, projection: F) -> Selector<T>
where
    S: Send + Sync + 'static,
    T: Clone + Send + 'static,
    F: Fn(&S) -> T + Send + Sync + 'static,
{
    let fetch = fetch.clone();
    let recomputations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&recomputations);
    let cache: Mutex<Option<(Arc<S>, T)>> = Mutex::new(None);

    let select = move |root: &RootState| {
        let input = fetch.get(root)?;
        let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((last, result)) = cache.as_ref() {
            if Arc::ptr_eq(last, &input) {
                return Some(result.clone());
            }
        }
        let result = projection(&input);
        counter.fetch_add(1, Ordering::Relaxed);
        *cache = Some((input, result.clone()));
        Some(result)
    };

    Selector {
        select: Arc::new(select),
        recomputations,
    }
}

/// Wrap a plain function as a selector, without memoization
pub fn selector_fn<T, F>(select: F) -> Selector<T>
where
    F: Fn(&RootState) -> Option<T> + Send + Sync + 'static,
{
    Selector {
        select: Arc::new(select),
        recomputations: Arc::new(AtomicUsize::new(0)),
    }
}
