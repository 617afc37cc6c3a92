//! Composing model slices into one root reducer
//!
//! Each model owns exactly one key of the [`RootState`]. [`combine_reducers`]
//! takes the finished models, checks that no two share a name, and builds a
//! [`CombinedReducer`] that forwards every action to every slice reducer and
//! collects the results under the model names.
//!
//! # Examples
//!
//! ```
//! use modelkit_core::action::{Action, ActionDefs};
//! use modelkit_core::composition::combine_reducers;
//! use modelkit_core::model::model;
//! use modelkit_core::reducer::{HandlerMap, Reducer};
//! use serde_json::json;
//!
//! let counter = model("counter", 0_i64)
//!     .action(ActionDefs::new().define("increase", |n: i64| n))
//!     .reducer(HandlerMap::new().on("increase", |s: &i64, n: i64| s + n))
//!     .value();
//! let todos = model("todos", Vec::<String>::new()).value();
//!
//! let root = combine_reducers(vec![counter.slice(), todos.slice()]).unwrap();
//! let state = root.initial_state().unwrap();
//! let state = root
//!     .reduce(Some(&state), &Action::new("counter/increase", json!(2)))
//!     .unwrap();
//!
//! assert_eq!(state.slice::<i64>("counter").as_deref(), Some(&2));
//! assert_eq!(state.slice::<Vec<String>>("todos").map(|t| t.len()), Some(0));
//! ```

use crate::action::{Action, KEY_SEPARATOR};
use crate::effect::EffectDescriptor;
use crate::error::ModelError;
use crate::model::ModelValue;
use crate::reducer::Reducer;
use crate::state::{RootState, SliceRef, SliceState};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Action type dispatched once when a store is created.
///
/// No model can define it: model actions always carry a `name/` prefix.
pub const INIT_ACTION: &str = "@@modelkit/INIT";

/// A model with its state type erased.
///
/// This is the seam between strongly typed models and the untyped root
/// state. [`ModelValue`] implements it for every slice state.
pub trait Slice: Send + Sync {
    /// Model name, the key of this slice in the root state
    fn name(&self) -> &str;

    /// Reduce this slice.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::SliceType`] if `state` is not this model's state
    /// type, or whatever the model's reducer returns.
    fn reduce(&self, state: Option<&SliceRef>, action: &Action) -> Result<SliceRef, ModelError>;

    /// Encode a slice as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::SliceType`] or [`ModelError::Serialize`].
    fn to_json(&self, state: &SliceRef) -> Result<Value, ModelError>;

    /// Decode a slice from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Serialize`] when `value` does not decode.
    fn from_json(&self, value: Value) -> Result<SliceRef, ModelError>;

    /// Effect descriptors registered on the model
    fn effects(&self) -> &[EffectDescriptor];

    /// Check that reducer handlers and effects only name declared actions.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownActionKey`] for the first orphaned key.
    fn validate(&self) -> Result<(), ModelError>;
}

/// Boxed, type-erased model as accepted by the store composer
pub type ModelSlice = Box<dyn Slice>;

impl<S: SliceState, F: Send + Sync + 'static> Slice for ModelValue<S, F> {
    fn name(&self) -> &str {
        ModelValue::name(self)
    }

    fn reduce(&self, state: Option<&SliceRef>, action: &Action) -> Result<SliceRef, ModelError> {
        let typed = state
            .map(|slice| {
                Arc::clone(slice)
                    .downcast::<S>()
                    .map_err(|_| ModelError::SliceType(self.name().to_string()))
            })
            .transpose()?;
        let next = self.reducer().reduce(typed.as_ref(), action)?;
        Ok(next)
    }

    fn to_json(&self, state: &SliceRef) -> Result<Value, ModelError> {
        let typed = state
            .downcast_ref::<S>()
            .ok_or_else(|| ModelError::SliceType(self.name().to_string()))?;
        serde_json::to_value(typed).map_err(|source| ModelError::Serialize {
            name: self.name().to_string(),
            source,
        })
    }

    fn from_json(&self, value: Value) -> Result<SliceRef, ModelError> {
        let typed: S = serde_json::from_value(value).map_err(|source| ModelError::Serialize {
            name: self.name().to_string(),
            source,
        })?;
        Ok(Arc::new(typed))
    }

    fn effects(&self) -> &[EffectDescriptor] {
        ModelValue::effects(self)
    }

    fn validate(&self) -> Result<(), ModelError> {
        let prefix = format!("{}{KEY_SEPARATOR}", self.name());
        let effect_keys = self
            .effects()
            .iter()
            .map(|effect| effect.pattern().strip_prefix(&prefix).unwrap_or(effect.pattern()));
        let handler_keys = self.reducer().handled_keys().iter().map(String::as_str);

        for key in handler_keys.chain(effect_keys) {
            if !self.action().contains(key) {
                return Err(ModelError::UnknownActionKey {
                    model: self.name().to_string(),
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl<S: SliceState, F: Send + Sync + 'static> ModelValue<S, F> {
    /// Box this model for the store composer
    #[must_use]
    pub fn slice(self) -> ModelSlice {
        Box::new(self)
    }
}

impl<S: SliceState, F: Send + Sync + 'static> From<ModelValue<S, F>> for ModelSlice {
    fn from(model: ModelValue<S, F>) -> Self {
        Box::new(model)
    }
}

/// Combine model slices into one root reducer.
///
/// # Errors
///
/// Returns [`ModelError::DuplicateModel`] when two slices share a name, or
/// [`ModelError::UnknownActionKey`] when a model handles an undeclared action.
pub fn combine_reducers(slices: Vec<ModelSlice>) -> Result<CombinedReducer, ModelError> {
    let mut seen = HashSet::with_capacity(slices.len());
    for slice in &slices {
        if !seen.insert(slice.name()) {
            return Err(ModelError::DuplicateModel(slice.name().to_string()));
        }
        slice.validate()?;
    }
    tracing::debug!(models = slices.len(), "Combined model reducers");
    Ok(CombinedReducer { slices })
}

/// Root reducer over a set of models.
///
/// Created by [`combine_reducers`]. Keys of the incoming root state that no
/// model owns are dropped.
pub struct CombinedReducer {
    slices: Vec<ModelSlice>,
}

impl CombinedReducer {
    /// Look up a model by name
    #[must_use]
    pub fn slice(&self, name: &str) -> Option<&dyn Slice> {
        self.slices
            .iter()
            .find(|slice| slice.name() == name)
            .map(|slice| &**slice)
    }

    /// Model names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slices.iter().map(|slice| slice.name())
    }

    /// Every registered effect, model by model
    pub fn effects(&self) -> impl Iterator<Item = &EffectDescriptor> {
        self.slices.iter().flat_map(|slice| slice.effects())
    }

    /// Reduce [`INIT_ACTION`] from nothing, yielding each model's initial state.
    ///
    /// # Errors
    ///
    /// Returns an error if a whole reducer fails on the init action.
    pub fn initial_state(&self) -> Result<RootState, ModelError> {
        self.reduce(None, &Action::unit(INIT_ACTION))
    }

    /// Encode the slices accepted by `include` as a JSON object.
    ///
    /// Slices missing from `state` are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first slice encoding error.
    pub fn to_json<P>(&self, state: &RootState, include: P) -> Result<Map<String, Value>, ModelError>
    where
        P: Fn(&str) -> bool,
    {
        let mut out = Map::new();
        for slice in &self.slices {
            if !include(slice.name()) {
                continue;
            }
            if let Some(raw) = state.raw(slice.name()) {
                out.insert(slice.name().to_string(), slice.to_json(raw)?);
            }
        }
        Ok(out)
    }

    /// Decode one slice by model name; `None` for unknown names
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Serialize`] when the value does not decode.
    pub fn from_json(&self, name: &str, value: Value) -> Result<Option<SliceRef>, ModelError> {
        self.slice(name)
            .map(|slice| slice.from_json(value))
            .transpose()
    }
}

impl Reducer for CombinedReducer {
    type State = RootState;

    fn reduce(&self, state: Option<&RootState>, action: &Action) -> Result<RootState, ModelError> {
        let mut next = RootState::new();
        for slice in &self.slices {
            let previous = state.and_then(|root| root.raw(slice.name()));
            next.insert_raw(slice.name(), slice.reduce(previous, action)?);
        }
        Ok(next)
    }
}

impl std::fmt::Debug for CombinedReducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedReducer")
            .field("models", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::action::ActionDefs;
    use crate::effect::EffectMap;
    use crate::model::model;
    use crate::reducer::{HandlerMap, ReducerSpec};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: i64,
    }

    fn counter() -> ModelSlice {
        model("counter", Counter { value: 0 })
            .action(
                ActionDefs::new()
                    .define("increase", |n: i64| n)
                    .define("reset", || ()),
            )
            .reducer(
                HandlerMap::new()
                    .on("increase", |s: &Counter, n: i64| Counter { value: s.value + n })
                    .on("reset", |_: &Counter, (): ()| Counter { value: 0 }),
            )
            .value()
            .slice()
    }

    fn history() -> ModelSlice {
        model("history", Vec::<String>::new())
            .reducer(ReducerSpec::whole(|s: &Vec<String>, a: &Action| {
                let mut next = s.clone();
                next.push(a.kind().to_string());
                Some(next)
            }))
            .value()
            .slice()
    }

    #[test]
    fn initial_state_has_one_slice_per_model() {
        let root = combine_reducers(vec![counter(), history()]).unwrap();
        let state = root.initial_state().unwrap();

        assert_eq!(state.names().collect::<Vec<_>>(), vec!["counter", "history"]);
        assert_eq!(state.slice::<Counter>("counter").unwrap().value, 0);
        assert_eq!(
            *state.slice::<Vec<String>>("history").unwrap(),
            vec![INIT_ACTION.to_string()]
        );
    }

    #[test]
    fn actions_reach_only_their_slice() {
        let root = combine_reducers(vec![counter(), history()]).unwrap();
        let state = root.initial_state().unwrap();
        let next = root
            .reduce(Some(&state), &Action::new("counter/increase", json!(3)))
            .unwrap();

        assert_eq!(next.slice::<Counter>("counter").unwrap().value, 3);
        assert_eq!(next.slice::<Vec<String>>("history").unwrap().len(), 2);

        let unchanged = root
            .reduce(Some(&next), &Action::unit("nobody/listens"))
            .unwrap();
        assert_eq!(unchanged.changed_since(&next), vec!["history"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let error = combine_reducers(vec![counter(), counter()]).unwrap_err();
        assert!(matches!(error, ModelError::DuplicateModel(name) if name == "counter"));
    }

    #[test]
    fn undeclared_handler_key_is_rejected() {
        let orphan = model("orphan", 0_i64)
            .reducer(HandlerMap::new().on("bump", |s: &i64, (): ()| s + 1))
            .value()
            .slice();
        let error = combine_reducers(vec![orphan]).unwrap_err();
        assert!(matches!(
            error,
            ModelError::UnknownActionKey { model, key } if model == "orphan" && key == "bump"
        ));
    }

    #[test]
    fn undeclared_effect_key_is_rejected() {
        let orphan = model("orphan", 0_i64)
            .action(ActionDefs::new().define("bump", || ()))
            .every(|_| EffectMap::new().on("missing", |_, _| async { Ok(()) }))
            .value()
            .slice();
        let error = combine_reducers(vec![orphan]).unwrap_err();
        assert!(matches!(error, ModelError::UnknownActionKey { key, .. } if key == "missing"));
    }

    #[test]
    fn foreign_slice_type_is_reported() {
        let root = combine_reducers(vec![counter()]).unwrap();
        let mut state = RootState::new();
        state.insert_raw("counter", Arc::new("not a counter".to_string()));
        let error = root.reduce(Some(&state), &Action::unit("x/y")).unwrap_err();
        assert!(matches!(error, ModelError::SliceType(name) if name == "counter"));
    }

    #[test]
    fn json_round_trip_respects_filter() {
        let root = combine_reducers(vec![counter(), history()]).unwrap();
        let state = root.initial_state().unwrap();

        let encoded = root.to_json(&state, |name| name != "history").unwrap();
        assert_eq!(Value::Object(encoded.clone()), json!({ "counter": { "value": 0 } }));

        let decoded = root
            .from_json("counter", json!({ "value": 8 }))
            .unwrap()
            .unwrap();
        assert_eq!(decoded.downcast_ref::<Counter>(), Some(&Counter { value: 8 }));
        assert!(root.from_json("unknown", json!(1)).unwrap().is_none());
    }
}
