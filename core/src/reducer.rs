//! Reducers and the reducer assembler.
//!
//! A model's reducer is given either as one whole-slice function
//! ([`ReducerSpec::Whole`]) or as a map of handlers keyed by local action key
//! ([`ReducerSpec::PerAction`]). The caller picks the variant explicitly;
//! there is no guessing from the shape of the argument.
//!
//! Reducers never mutate the incoming state. They return a new `Arc`, or the
//! very same one when the action is not theirs. A whole-slice function says
//! "not mine" by returning `None`.

use crate::action::{Action, namespaced};
use crate::error::ModelError;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

/// The Reducer trait - pure `(state, action) -> state`
///
/// `None` stands for state that was never initialised; implementations
/// substitute their initial value.
pub trait Reducer: Send + Sync {
    /// The state type this reducer produces
    type State;

    /// Reduce an action into the next state.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelError`] when the action cannot be applied, for example
    /// when its payload does not decode. The caller keeps the old state.
    fn reduce(
        &self,
        state: Option<&Self::State>,
        action: &Action,
    ) -> Result<Self::State, ModelError>;
}

impl<R: Reducer + ?Sized> Reducer for &R {
    type State = R::State;

    fn reduce(&self, state: Option<&Self::State>, action: &Action) -> Result<Self::State, ModelError> {
        (**self).reduce(state, action)
    }
}

impl<R: Reducer + ?Sized> Reducer for Arc<R> {
    type State = R::State;

    fn reduce(&self, state: Option<&Self::State>, action: &Action) -> Result<Self::State, ModelError> {
        (**self).reduce(state, action)
    }
}

type WholeFn<S> = dyn Fn(&S, &Action) -> Option<S> + Send + Sync;
type HandlerFn<S> = dyn Fn(&S, &Action) -> Result<S, ModelError> + Send + Sync;

/// Per-action handlers keyed by local key.
///
/// Entries registered through [`HandlerMap::on_maybe`] with `None` are kept
/// only until assembly, where they are dropped.
pub struct HandlerMap<S> {
    handlers: Vec<(String, Option<Arc<HandlerFn<S>>>)>,
}

impl<S> Default for HandlerMap<S> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

impl<S: 'static> HandlerMap<S> {
    /// Start an empty handler map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `key` with a typed payload.
    ///
    /// The payload is decoded into `P` before `handler` runs; decode failures
    /// surface as [`ModelError::Payload`].
    #[must_use]
    pub fn on<P, F>(self, key: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned,
        F: Fn(&S, P) -> S + Send + Sync + 'static,
    {
        self.on_maybe(key, Some(handler))
    }

    /// Like [`HandlerMap::on`], but a `None` handler is silently dropped.
    #[must_use]
    pub fn on_maybe<P, F>(self, key: impl Into<String>, handler: Option<F>) -> Self
    where
        P: DeserializeOwned,
        F: Fn(&S, P) -> S + Send + Sync + 'static,
    {
        let handler = handler.map(|handler| {
            Arc::new(move |state: &S, action: &Action| {
                let payload = action.payload_as::<P>()?;
                Ok(handler(state, payload))
            }) as Arc<HandlerFn<S>>
        });
        self.insert(key.into(), handler)
    }

    /// Handle `key` with access to the whole action
    #[must_use]
    pub fn on_action<F>(self, key: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&S, &Action) -> S + Send + Sync + 'static,
    {
        let handler: Arc<HandlerFn<S>> =
            Arc::new(move |state: &S, action: &Action| Ok(handler(state, action)));
        self.insert(key.into(), Some(handler))
    }

    fn insert(mut self, key: String, handler: Option<Arc<HandlerFn<S>>>) -> Self {
        self.handlers.retain(|(existing, _)| *existing != key);
        self.handlers.push((key, handler));
        self
    }
}

/// How a model reduces its slice
pub enum ReducerSpec<S> {
    /// One function sees every action, with no filtering by type.
    ///
    /// It returns `None` for actions it ignores, which keeps the slice's `Arc`.
    Whole(Arc<WholeFn<S>>),
    /// Handlers dispatched by namespaced action type
    PerAction(HandlerMap<S>),
}

impl<S: 'static> ReducerSpec<S> {
    /// Wrap a whole-slice reducer function.
    ///
    /// Return `Some(next)` for a new state and `None` to leave the slice as is.
    #[must_use]
    pub fn whole<F>(reducer: F) -> Self
    where
        F: Fn(&S, &Action) -> Option<S> + Send + Sync + 'static,
    {
        Self::Whole(Arc::new(reducer))
    }

    /// Wrap a per-action handler map
    #[must_use]
    pub const fn per_action(handlers: HandlerMap<S>) -> Self {
        Self::PerAction(handlers)
    }
}

impl<S> From<HandlerMap<S>> for ReducerSpec<S> {
    fn from(handlers: HandlerMap<S>) -> Self {
        Self::PerAction(handlers)
    }
}

enum Dispatch<S> {
    Identity,
    Whole(Arc<WholeFn<S>>),
    PerAction(HashMap<String, Arc<HandlerFn<S>>>),
}

/// The assembled reducer of one model slice.
pub struct SliceReducer<S> {
    initial: Arc<S>,
    dispatch: Dispatch<S>,
    keys: Vec<String>,
}

impl<S> SliceReducer<S> {
    /// The reducer of a freshly created model: returns its input, or the
    /// initial state when there is none.
    #[must_use]
    pub const fn identity(initial: Arc<S>) -> Self {
        Self {
            initial,
            dispatch: Dispatch::Identity,
            keys: Vec::new(),
        }
    }

    /// Assemble `spec` for the model `name`.
    #[must_use]
    pub fn assemble(name: &str, initial: Arc<S>, spec: ReducerSpec<S>) -> Self {
        match spec {
            ReducerSpec::Whole(reducer) => Self {
                initial,
                dispatch: Dispatch::Whole(reducer),
                keys: Vec::new(),
            },
            ReducerSpec::PerAction(map) => {
                let mut keys = Vec::with_capacity(map.handlers.len());
                let mut handlers = HashMap::with_capacity(map.handlers.len());
                for (key, handler) in map.handlers {
                    if let Some(handler) = handler {
                        handlers.insert(namespaced(name, &key), handler);
                        keys.push(key);
                    }
                }
                Self {
                    initial,
                    dispatch: Dispatch::PerAction(handlers),
                    keys,
                }
            },
        }
    }

    /// Local keys with a registered handler (empty for whole reducers)
    #[must_use]
    pub fn handled_keys(&self) -> &[String] {
        &self.keys
    }

    /// The state substituted for `None`
    #[must_use]
    pub const fn initial(&self) -> &Arc<S> {
        &self.initial
    }
}

impl<S: Send + Sync> Reducer for SliceReducer<S> {
    type State = Arc<S>;

    fn reduce(&self, state: Option<&Arc<S>>, action: &Action) -> Result<Arc<S>, ModelError> {
        let state = state.unwrap_or(&self.initial);
        match &self.dispatch {
            Dispatch::Identity => Ok(Arc::clone(state)),
            Dispatch::Whole(reducer) => {
                Ok(reducer(state, action).map_or_else(|| Arc::clone(state), Arc::new))
            },
            Dispatch::PerAction(handlers) => match handlers.get(action.kind()) {
                Some(handler) => handler(state, action).map(Arc::new),
                None => Ok(Arc::clone(state)),
            },
        }
    }
}

impl<S> std::fmt::Debug for SliceReducer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.dispatch {
            Dispatch::Identity => "identity",
            Dispatch::Whole(_) => "whole",
            Dispatch::PerAction(_) => "per_action",
        };
        f.debug_struct("SliceReducer")
            .field("mode", &mode)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}
