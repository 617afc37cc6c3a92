//! Integration tests for the store composer
//!
//! Covers model validation, middleware ordering, selectors and the
//! `create_store` shortcut.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use modelkit_core::action::{Action, ActionDefs};
use modelkit_core::effect::EffectMap;
use modelkit_core::error::ModelError;
use modelkit_core::model::{Model, model};
use modelkit_core::reducer::{HandlerMap, ReducerSpec};
use modelkit_core::selector::{Selector, create_selector, selector_fn};
use modelkit_core::state::RootState;
use modelkit_runtime::{Middleware, Store, StoreConfig, StoreError, create_store};
use modelkit_testing::assertions::assert_slice_eq;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Counter {
    value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
struct Todos {
    items: Vec<String>,
}

struct CounterSelectors {
    value: Selector<i64>,
    doubled: Selector<i64>,
}

fn counter() -> Model<Counter> {
    model("counter", Counter { value: 0 })
        .action(
            ActionDefs::new()
                .define("increase", |n: i64| n)
                .define("decrease", |n: i64| n),
        )
        .reducer(
            HandlerMap::new()
                .on("increase", |s: &Counter, n: i64| Counter { value: s.value + n })
                .on("decrease", |s: &Counter, n: i64| Counter { value: s.value - n }),
        )
}

fn todos() -> Model<Todos> {
    model("todos", Todos::default())
        .action(ActionDefs::new().define("add", |item: String| item))
        .reducer(ReducerSpec::whole(|state: &Todos, action: &Action| {
            match (action.kind(), action.payload_as::<String>()) {
                ("todos/add", Ok(item)) => {
                    let mut items = state.items.clone();
                    items.push(item);
                    Some(Todos { items })
                },
                _ => None,
            }
        }))
}

/// Records what it sees; doubles `counter/increase`, swallows `counter/decrease`
struct Doubler {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Middleware for Doubler {
    fn name(&self) -> &str {
        "doubler"
    }

    fn before_reduce(&self, action: Action, _state: &RootState) -> Option<Action> {
        self.seen.lock().unwrap().push(action.kind().to_string());
        match action.kind() {
            "counter/decrease" => None,
            "counter/increase" => {
                let n = action.payload().as_i64().unwrap_or_default();
                Some(Action::new(action.kind(), json!(n * 2)))
            },
            _ => Some(action),
        }
    }
}

/// Records the order in which hooks run
struct Tracer {
    label: &'static str,
    order: Arc<Mutex<Vec<String>>>,
}

impl Middleware for Tracer {
    fn name(&self) -> &str {
        self.label
    }

    fn before_reduce(&self, action: Action, _state: &RootState) -> Option<Action> {
        self.order.lock().unwrap().push(format!("before:{}", self.label));
        Some(action)
    }

    fn after_reduce(&self, _action: &Action, _previous: &RootState, _next: &RootState) {
        self.order.lock().unwrap().push(format!("after:{}", self.label));
    }
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_duplicate_model_names_rejected() {
    let result = Store::of([counter().value().slice(), counter().value().slice()]).create();
    assert!(matches!(
        result,
        Err(StoreError::Model(ModelError::DuplicateModel(ref name))) if name == "counter"
    ));
}

#[tokio::test]
async fn test_undeclared_reducer_key_rejected() {
    let broken = counter()
        .reducer(HandlerMap::new().on("explode", |s: &Counter, (): ()| s.clone()))
        .value();
    let result = Store::of([broken]).create();
    assert!(matches!(
        result,
        Err(StoreError::Model(ModelError::UnknownActionKey { ref key, .. })) if key == "explode"
    ));
}

#[tokio::test]
async fn test_undeclared_effect_key_rejected() {
    let broken = counter()
        .every(|_| EffectMap::new().on("explode", |_, _| async { Ok(()) }))
        .value();
    let result = Store::of([broken]).create();
    assert!(matches!(
        result,
        Err(StoreError::Model(ModelError::UnknownActionKey { .. }))
    ));
}

// ============================================================================
// Composition
// ============================================================================

#[tokio::test]
async fn test_slices_are_keyed_by_model_name() {
    let store = Store::of([counter().value().slice(), todos().value().slice()])
        .create()
        .unwrap()
        .store;

    store
        .dispatch(Action::new("counter/increase", json!(3)))
        .await
        .unwrap();
    store
        .dispatch(Action::new("todos/add", json!("write tests")))
        .await
        .unwrap();

    let state = store.state().await;
    assert_eq!(state.len(), 2);
    assert_slice_eq(&state, "counter", &Counter { value: 3 });
    assert_slice_eq(
        &state,
        "todos",
        &Todos {
            items: vec!["write tests".to_string()],
        },
    );
}

#[tokio::test]
async fn test_untouched_slices_keep_identity() {
    let store = Store::of([counter().value().slice(), todos().value().slice()])
        .create()
        .unwrap()
        .store;
    let before = store.state().await;

    store
        .dispatch(Action::new("counter/increase", json!(1)))
        .await
        .unwrap();
    let after = store.state().await;

    assert_eq!(after.changed_since(&before), vec!["counter"]);
}

#[tokio::test]
async fn test_whole_reducer_ignoring_action_keeps_selectors_and_revision() {
    let model = todos()
        .selector(|fetch| create_selector(fetch, |t: &Todos| t.items.len()))
        .value();
    let count = model.selector().clone();
    let store = Store::of([model]).create().unwrap().store;
    let revisions = store.subscribe();

    assert_eq!(store.select(&count).await, Some(0));
    store.dispatch(Action::unit("other/noop")).await.unwrap();
    assert_eq!(store.select(&count).await, Some(0));
    assert_eq!(count.recomputations(), 1);
    assert_eq!(*revisions.borrow(), 0);

    store
        .dispatch(Action::new("todos/add", json!("milk")))
        .await
        .unwrap();
    assert_eq!(store.select(&count).await, Some(1));
    assert_eq!(count.recomputations(), 2);
    assert_eq!(*revisions.borrow(), 1);
}

#[tokio::test]
async fn test_selectors_and_fetch() {
    let model = counter()
        .selector(|fetch| CounterSelectors {
            value: create_selector(fetch, |c: &Counter| c.value),
            doubled: create_selector(fetch, |c: &Counter| c.value * 2),
        })
        .value();
    let fetch = model.fetch().clone();
    let selectors = model.clone();
    let store = Store::of([model]).create().unwrap().store;

    store
        .dispatch(Action::new("counter/increase", json!(21)))
        .await
        .unwrap();

    assert_eq!(store.select(&selectors.selector().value).await, Some(21));
    assert_eq!(store.select(&selectors.selector().doubled).await, Some(42));
    assert_eq!(store.fetch(&fetch).await.unwrap().value, 21);

    let missing: Selector<i64> = selector_fn(|root: &RootState| {
        root.slice::<Counter>("nobody").map(|c| c.value)
    });
    assert_eq!(store.select(&missing).await, None);
}

// ============================================================================
// Middleware
// ============================================================================

#[tokio::test]
async fn test_middleware_rewrites_and_swallows() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let store = Store::of([counter().value()])
        .add_middleware(Doubler {
            seen: Arc::clone(&seen),
        })
        .create()
        .unwrap()
        .store;
    let mut actions = store.subscribe_actions();

    store
        .dispatch(Action::new("counter/increase", json!(2)))
        .await
        .unwrap();
    store
        .dispatch(Action::new("counter/decrease", json!(100)))
        .await
        .unwrap();

    let state = store.state().await;
    assert_slice_eq(&state, "counter", &Counter { value: 4 });

    // Only the rewritten action reached subscribers
    let first = actions.recv().await.unwrap();
    assert_eq!(first.payload(), &json!(4));
    assert!(actions.try_recv().is_err());

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["counter/increase", "counter/decrease"]
    );
}

#[tokio::test]
async fn test_middleware_runs_in_registration_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let store = Store::of([counter().value()])
        .add_middleware(Tracer {
            label: "a",
            order: Arc::clone(&order),
        })
        .add_middleware(Tracer {
            label: "b",
            order: Arc::clone(&order),
        })
        .with_config(StoreConfig::default().with_inspect(true).with_log_actions(true))
        .create()
        .unwrap()
        .store;

    store
        .dispatch(Action::new("counter/increase", json!(1)))
        .await
        .unwrap();

    assert_eq!(
        *order.lock().unwrap(),
        vec!["before:a", "before:b", "after:a", "after:b"]
    );
    let debug = format!("{store:?}");
    assert!(debug.contains("logging"));
    assert!(debug.contains("inspect"));
}

#[tokio::test]
async fn test_create_store_shortcut() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let middleware: Vec<Arc<dyn Middleware>> = vec![Arc::new(Doubler {
        seen: Arc::clone(&seen),
    })];
    let store = create_store([counter().value()], middleware, Vec::new()).unwrap();

    store
        .dispatch(Action::new("counter/increase", json!(5)))
        .await
        .unwrap();
    assert_slice_eq(&store.state().await, "counter", &Counter { value: 10 });
    store.shutdown(Duration::from_secs(1)).await.unwrap();
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_action_types_are_namespaced(
        name in modelkit_testing::properties::model_name(),
        key in modelkit_testing::properties::action_key(),
    ) {
        let actions = ActionDefs::new().define(key.clone(), || ()).assemble(&name);
        let action = actions.create(&key, ()).unwrap();
        prop_assert_eq!(action.kind(), format!("{name}/{key}"));
    }

    #[test]
    fn prop_counter_steps_sum(steps in modelkit_testing::properties::counter_steps()) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let total = rt.block_on(async {
            let store = Store::of([counter().value()]).create().unwrap().store;
            for step in &steps {
                let action = if *step >= 0 {
                    Action::new("counter/increase", json!(step))
                } else {
                    Action::new("counter/decrease", json!(-step))
                };
                store.dispatch(action).await.unwrap();
            }
            store.state().await.slice::<Counter>("counter").unwrap().value
        });
        prop_assert_eq!(total, steps.iter().sum::<i64>());
    }
}
