//! # Modelkit Core
//!
//! Core types for building a store out of self-contained models.
//!
//! A model bundles everything one slice of application state needs: its
//! namespaced actions, the reducer that applies them, selectors over the
//! composed state, and effect workers that react to dispatched actions. This
//! crate builds and composes models; `modelkit-runtime` runs them.
//!
//! ## Core Concepts
//!
//! - **Action**: `{ type, payload }` record with a `"<model>/<key>"` type
//! - **Reducer**: Pure function `(state, action) -> state`
//! - **Selector**: Memoized query over the composed state
//! - **Effect**: Async worker bound to an action type under a take policy
//! - **Model**: Immutable bundle of the above, built by chained calls
//!
//! ## Architecture Principles
//!
//! - Models never share keys: a model only sees its own slice
//! - Reducers return new values and keep unchanged slices shared
//! - Effects go through a context instead of touching state directly
//!
//! ## Example
//!
//! ```
//! use modelkit_core::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Counter {
//!     value: i64,
//! }
//!
//! let counter = model("counter", Counter { value: 0 })
//!     .action(ActionDefs::new().define("increase", |n: i64| n))
//!     .reducer(HandlerMap::new().on("increase", |s: &Counter, n: i64| Counter {
//!         value: s.value + n,
//!     }))
//!     .value();
//!
//! let action = counter.action().create("increase", (2_i64,)).unwrap();
//! assert_eq!(action.kind(), "counter/increase");
//!
//! let next = counter.reducer().reduce(None, &action).unwrap();
//! assert_eq!(next.value, 2);
//! ```

pub mod action;
pub mod composition;
pub mod effect;
pub mod error;
pub mod model;
pub mod reducer;
pub mod selector;
pub mod state;

pub use action::{Action, ActionCreator, ActionDefs, ActionMap};
pub use composition::{CombinedReducer, ModelSlice, Slice, combine_reducers};
pub use effect::{EffectContext, EffectDescriptor, EffectMap, EffectTask, TakePolicy};
pub use error::{EffectError, ModelError, ShapeError};
pub use model::{Model, ModelValue, model};
pub use reducer::{HandlerMap, Reducer, ReducerSpec};
pub use selector::{Fetch, Selector, create_selector};
pub use state::{RootState, SliceState};

/// Everything needed to declare a model
pub mod prelude {
    pub use crate::action::{Action, ActionDefs, ActionMap};
    pub use crate::effect::{EffectContext, EffectMap, EffectResult, EffectTask, TakePolicy};
    pub use crate::model::{Model, model};
    pub use crate::reducer::{HandlerMap, Reducer, ReducerSpec};
    pub use crate::selector::{Fetch, Selector, create_selector, selector_fn};
    pub use crate::state::RootState;
}
