//! # Counter Example
//!
//! A counter model demonstrating the modelkit builder.
//!
//! This example showcases:
//! - Namespaced actions with payload shapers
//! - A per-action reducer
//! - Memoized selectors
//! - Effects under the latest-only and leading policies
//!
//! ## Example
//!
//! ```no_run
//! use counter::{Timing, counter};
//! use modelkit_runtime::Store;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let model = counter(Timing::default());
//! let actions = model.action().clone();
//! let value = model.selector().value.clone();
//! let store = Store::of([model]).create()?.store;
//!
//! let bound = store.bind(&actions);
//! bound.dispatch("increase", (4_i64,)).await?;
//! assert_eq!(store.select(&value).await, Some(4));
//! # Ok(())
//! # }
//! ```

use modelkit_core::action::ActionDefs;
use modelkit_core::effect::EffectMap;
use modelkit_core::model::{ModelValue, model};
use modelkit_core::reducer::HandlerMap;
use modelkit_core::selector::{Fetch, Selector, create_selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Model name, also the slice key
pub const NAME: &str = "counter";

/// Counter state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Current count value
    pub value: i64,
}

/// Derived values of the counter slice
#[derive(Debug, Clone)]
pub struct CounterSelectors {
    /// The raw value
    pub value: Selector<i64>,
    /// Whether the value dropped below zero
    pub negative: Selector<bool>,
}

/// Effect delays
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// How long an increase must stay the latest before `settled` is announced
    pub settle: Duration,
    /// How long repeated resets are ignored after one was handled
    pub cooldown: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(200),
            cooldown: Duration::from_millis(500),
        }
    }
}

/// Build the counter model.
///
/// Actions:
/// - `increase(n)` / `decrease(n)`: add or subtract `n`
/// - `reset()`: back to zero
/// - `settled(value)`: announced once increases stop for `timing.settle`
/// - `cooled()`: announced when a reset's cooldown ends
#[must_use]
pub fn counter(timing: Timing) -> ModelValue<Counter, CounterSelectors> {
    model(NAME, Counter::default())
        .action(
            ActionDefs::new()
                .define("increase", |n: i64| n)
                .define("decrease", |n: i64| n)
                .define("reset", || ())
                .define("settled", |value: i64| value)
                .define("cooled", || ()),
        )
        .reducer(
            HandlerMap::new()
                .on("increase", |s: &Counter, n: i64| Counter { value: s.value + n })
                .on("decrease", |s: &Counter, n: i64| Counter { value: s.value - n })
                .on("reset", |_: &Counter, (): ()| Counter::default()),
        )
        .selector(|fetch| CounterSelectors {
            value: create_selector(fetch, |c: &Counter| c.value),
            negative: create_selector(fetch, |c: &Counter| c.value < 0),
        })
        .latest(move |actions| {
            let actions = actions.clone();
            let fetch = Fetch::<Counter>::new(NAME);
            EffectMap::new().on("increase", move |_, ctx| {
                let actions = actions.clone();
                let fetch = fetch.clone();
                async move {
                    ctx.delay(timing.settle).await;
                    let value = ctx.fetch(&fetch).await.map_or(0, |c| c.value);
                    tracing::debug!(value, "Counter settled");
                    ctx.put(actions.create("settled", (value,))?).await?;
                    Ok(())
                }
            })
        })
        .leading(move |actions| {
            let actions = actions.clone();
            EffectMap::new().on("reset", move |_, ctx| {
                let actions = actions.clone();
                async move {
                    tracing::info!("Counter reset, ignoring further resets for {:?}", timing.cooldown);
                    ctx.delay(timing.cooldown).await;
                    ctx.put(actions.create("cooled", ())?).await?;
                    Ok(())
                }
            })
        })
        .value()
}
