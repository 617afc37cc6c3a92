//! The model builder.
//!
//! A model is one named slice of the store together with everything that
//! belongs to it. It is built by a chain of calls, each consuming the previous
//! value and returning a new one:
//!
//! ```
//! use modelkit_core::action::ActionDefs;
//! use modelkit_core::effect::EffectMap;
//! use modelkit_core::model::model;
//! use modelkit_core::reducer::{HandlerMap, ReducerSpec};
//! use modelkit_core::selector::{Selector, create_selector};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Counter {
//!     value: i64,
//! }
//!
//! struct CounterSelectors {
//!     value: Selector<i64>,
//! }
//!
//! let counter = model("counter", Counter { value: 0 })
//!     .action(
//!         ActionDefs::new()
//!             .define("increase", |n: i64| n)
//!             .define("reset", || ()),
//!     )
//!     .reducer(ReducerSpec::per_action(
//!         HandlerMap::new()
//!             .on("increase", |s: &Counter, n: i64| Counter { value: s.value + n })
//!             .on("reset", |_: &Counter, (): ()| Counter { value: 0 }),
//!     ))
//!     .selector(|fetch| CounterSelectors {
//!         value: create_selector(fetch, |c: &Counter| c.value),
//!     })
//!     .leading(|_actions| EffectMap::new().on("reset", |_action, _ctx| async { Ok(()) }))
//!     .value();
//!
//! assert_eq!(counter.name(), "counter");
//! assert_eq!(counter.key("increase"), "counter/increase");
//! assert_eq!(counter.effects().len(), 1);
//! ```

use crate::action::{ActionDefs, ActionMap, namespaced};
use crate::effect::{EffectDescriptor, EffectMap, TakePolicy};
use crate::reducer::{ReducerSpec, SliceReducer};
use crate::selector::Fetch;
use crate::state::SliceState;
use smallvec::SmallVec;
use std::sync::Arc;

/// Start a model named `name` with state `initial`.
///
/// The fresh model has no actions, no selectors, no effects, and an identity
/// reducer.
#[must_use]
pub fn model<S: SliceState>(name: impl Into<String>, initial: S) -> Model<S> {
    Model::create(name, initial)
}

/// Everything a finished model carries.
pub struct ModelValue<S, F = ()> {
    name: Arc<str>,
    initial: Arc<S>,
    fetch: Fetch<S>,
    action: ActionMap,
    selector: Arc<F>,
    reducer: Arc<SliceReducer<S>>,
    effects: SmallVec<[EffectDescriptor; 4]>,
}

impl<S, F> Clone for ModelValue<S, F> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            initial: Arc::clone(&self.initial),
            fetch: self.fetch.clone(),
            action: self.action.clone(),
            selector: Arc::clone(&self.selector),
            reducer: Arc::clone(&self.reducer),
            effects: self.effects.clone(),
        }
    }
}

impl<S, F> ModelValue<S, F> {
    /// Model name, also the slice key in the composed state
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The initial slice state
    #[must_use]
    pub fn initial(&self) -> &S {
        &self.initial
    }

    /// Accessor from the composed state to this slice
    #[must_use]
    pub const fn fetch(&self) -> &Fetch<S> {
        &self.fetch
    }

    /// Namespaced action creators
    #[must_use]
    pub const fn action(&self) -> &ActionMap {
        &self.action
    }

    /// The selector set produced by the selector factory
    #[must_use]
    pub fn selector(&self) -> &F {
        &self.selector
    }

    /// The assembled slice reducer
    #[must_use]
    pub fn reducer(&self) -> &SliceReducer<S> {
        &self.reducer
    }

    /// Registered effect descriptors, in registration order
    #[must_use]
    pub fn effects(&self) -> &[EffectDescriptor] {
        &self.effects
    }

    /// Namespace a local key under this model
    #[must_use]
    pub fn key(&self, key: &str) -> String {
        namespaced(&self.name, key)
    }
}

impl<S, F> std::fmt::Debug for ModelValue<S, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelValue")
            .field("name", &self.name)
            .field("action", &self.action.keys().collect::<Vec<_>>())
            .field("reducer", &self.reducer)
            .field("effects", &self.effects)
            .finish_non_exhaustive()
    }
}

/// Immutable model builder.
///
/// `F` is the type of the selector set; it starts as `()` and changes with
/// [`Model::selector`].
pub struct Model<S, F = ()> {
    value: ModelValue<S, F>,
}

impl<S, F> Clone for Model<S, F> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
        }
    }
}

impl<S: SliceState> Model<S> {
    /// Same as [`model`]
    #[must_use]
    pub fn create(name: impl Into<String>, initial: S) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let initial = Arc::new(initial);
        Self {
            value: ModelValue {
                fetch: Fetch::new(Arc::clone(&name)),
                reducer: Arc::new(SliceReducer::identity(Arc::clone(&initial))),
                name,
                initial,
                action: ActionMap::default(),
                selector: Arc::new(()),
                effects: SmallVec::new(),
            },
        }
    }
}

impl<S: SliceState, F> Model<S, F> {
    /// Replace the action creators with `defs`, namespaced under this model
    #[must_use]
    pub fn action(self, defs: ActionDefs) -> Self {
        let action = defs.assemble(&self.value.name);
        tracing::trace!(model = %self.value.name, actions = action.len(), "Assembled actions");
        Self {
            value: ModelValue {
                action,
                ..self.value
            },
        }
    }

    /// Replace the reducer
    #[must_use]
    pub fn reducer(self, spec: impl Into<ReducerSpec<S>>) -> Self {
        let reducer = SliceReducer::assemble(
            &self.value.name,
            Arc::clone(&self.value.initial),
            spec.into(),
        );
        Self {
            value: ModelValue {
                reducer: Arc::new(reducer),
                ..self.value
            },
        }
    }

    /// Replace the selector set with `factory(fetch)`
    #[must_use]
    pub fn selector<FF, Factory>(self, factory: Factory) -> Model<S, FF>
    where
        Factory: FnOnce(&Fetch<S>) -> FF,
    {
        let selector = Arc::new(factory(&self.value.fetch));
        let ModelValue {
            name,
            initial,
            fetch,
            action,
            reducer,
            effects,
            ..
        } = self.value;
        Model {
            value: ModelValue {
                name,
                initial,
                fetch,
                action,
                selector,
                reducer,
                effects,
            },
        }
    }

    /// Add workers that run for every matching action
    #[must_use]
    pub fn every<C>(self, creator: C) -> Self
    where
        C: FnOnce(&ActionMap) -> EffectMap,
    {
        self.register(TakePolicy::Every, creator)
    }

    /// Add workers that restart on each matching action
    #[must_use]
    pub fn latest<C>(self, creator: C) -> Self
    where
        C: FnOnce(&ActionMap) -> EffectMap,
    {
        self.register(TakePolicy::Latest, creator)
    }

    /// Add workers that ignore matches while running
    #[must_use]
    pub fn leading<C>(self, creator: C) -> Self
    where
        C: FnOnce(&ActionMap) -> EffectMap,
    {
        self.register(TakePolicy::Leading, creator)
    }

    fn register<C>(self, policy: TakePolicy, creator: C) -> Self
    where
        C: FnOnce(&ActionMap) -> EffectMap,
    {
        let map = creator(&self.value.action);
        let mut effects = self.value.effects.clone();
        effects.reserve(map.len());
        for (key, worker) in map.into_entries() {
            tracing::trace!(model = %self.value.name, key = %key, %policy, "Registered effect");
            effects.push(EffectDescriptor::new(
                namespaced(&self.value.name, &key),
                policy,
                worker,
            ));
        }
        Self {
            value: ModelValue {
                effects,
                ..self.value
            },
        }
    }

    /// Finish the chain
    #[must_use]
    pub fn value(self) -> ModelValue<S, F> {
        self.value
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::reducer::{HandlerMap, Reducer};
    use crate::selector::{Selector, create_selector};
    use crate::state::RootState;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: i64,
    }

    struct CounterSelectors {
        value: Selector<i64>,
    }

    fn counter() -> Model<Counter, CounterSelectors> {
        model("counter", Counter { value: 0 })
            .action(
                ActionDefs::new()
                    .define("increase", |n: i64| n)
                    .define("decrease", |n: i64| n)
                    .define("reset", || ()),
            )
            .reducer(
                HandlerMap::new()
                    .on("increase", |s: &Counter, n: i64| Counter { value: s.value + n })
                    .on("decrease", |s: &Counter, n: i64| Counter { value: s.value - n })
                    .on("reset", |_: &Counter, (): ()| Counter { value: 0 }),
            )
            .selector(|fetch| CounterSelectors {
                value: create_selector(fetch, |c: &Counter| c.value),
            })
    }

    #[test]
    fn fresh_model_is_empty() {
        let value = model("empty", 1_u32).value();
        assert_eq!(value.name(), "empty");
        assert_eq!(*value.initial(), 1);
        assert!(value.action().is_empty());
        assert!(value.effects().is_empty());
        let state = value.reducer().reduce(None, &Action::unit("x/y")).unwrap();
        assert_eq!(*state, 1);
    }

    #[test]
    fn reducer_on_undefined_state_returns_initial() {
        let value = counter().value();
        let state = value
            .reducer()
            .reduce(None, &Action::unit("unrelated/action"))
            .unwrap();
        assert_eq!(*state, Counter { value: 0 });
    }

    #[test]
    fn builder_calls_do_not_touch_earlier_values() {
        let base = counter();
        let with_effects = base
            .clone()
            .every(|_| EffectMap::new().on("increase", |_, _| async { Ok(()) }));
        assert!(base.value().effects().is_empty());
        assert_eq!(with_effects.value().effects().len(), 1);
    }

    #[test]
    fn effects_accumulate_across_policies() {
        let value = counter()
            .every(|_| EffectMap::new().on("increase", |_, _| async { Ok(()) }))
            .latest(|_| EffectMap::new().on("decrease", |_, _| async { Ok(()) }))
            .leading(|_| EffectMap::new().on("reset", |_, _| async { Ok(()) }))
            .value();

        let registered: Vec<_> = value
            .effects()
            .iter()
            .map(|d| (d.pattern().to_string(), d.policy()))
            .collect();
        assert_eq!(
            registered,
            vec![
                ("counter/increase".to_string(), TakePolicy::Every),
                ("counter/decrease".to_string(), TakePolicy::Latest),
                ("counter/reset".to_string(), TakePolicy::Leading),
            ]
        );
    }

    #[test]
    fn effect_creator_receives_action_creators() {
        let value = counter()
            .latest(|actions| {
                let reset = actions.get("reset").unwrap().clone();
                EffectMap::new().on("increase", move |_, ctx| {
                    let reset = reset.clone();
                    async move {
                        ctx.put(reset.create(())?).await?;
                        Ok(())
                    }
                })
            })
            .value();
        assert_eq!(value.effects()[0].pattern(), "counter/increase");
    }

    #[test]
    fn selector_reads_composed_state_by_name() {
        let value = counter().value();
        let mut root = RootState::new();
        root.insert_raw("counter", Arc::new(Counter { value: 5 }));

        let slice = value.fetch().get(&root).unwrap();
        assert_eq!(*slice, Counter { value: 5 });
        assert_eq!(value.selector().value.select(&root), Some(slice.value));
    }

    #[test]
    fn action_replaces_previous_map() {
        let value = counter()
            .action(ActionDefs::new().define("double", || ()))
            .value();
        assert!(value.action().contains("double"));
        assert!(!value.action().contains("increase"));
        assert_eq!(
            value.action().create("double", ()).unwrap(),
            Action::new("counter/double", json!(null))
        );
    }
}
