//! Namespaced actions and action creators.
//!
//! Every action a model emits carries the type `"<model>/<key>"`. That string
//! is the only thing reducers and effect watchers match on, so creators and
//! registrations must agree on it exactly; both go through [`namespaced`].
//!
//! # Example
//!
//! ```
//! use modelkit_core::action::{ActionDefs, namespaced};
//!
//! let actions = ActionDefs::new()
//!     .define("increase", |n: i64| n)
//!     .define("reset", || ())
//!     .assemble("counter");
//!
//! let action = actions.create("increase", (4,)).unwrap();
//! assert_eq!(action.kind(), namespaced("counter", "increase"));
//! assert_eq!(action.payload(), &serde_json::json!(4));
//!
//! let reset = actions.create("reset", ()).unwrap();
//! assert!(reset.payload().is_null());
//! ```

use crate::error::{ModelError, ShapeError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Separator between model name and local key
pub const KEY_SEPARATOR: char = '/';

/// Map a model name and a local key to the global action type.
#[must_use]
pub fn namespaced(name: &str, key: &str) -> String {
    format!("{name}{KEY_SEPARATOR}{key}")
}

/// A dispatched message: `{"type": "...", "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl Action {
    /// Create an action with an explicit payload
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Create an action with a `null` payload
    #[must_use]
    pub fn unit(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null)
    }

    /// The namespaced action type
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The raw payload
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Decode the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Payload`] when the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ModelError> {
        T::deserialize(&self.payload).map_err(|source| ModelError::Payload {
            kind: self.kind.clone(),
            source,
        })
    }

    /// Consume the action, keeping only its payload
    #[must_use]
    pub fn into_payload(self) -> Value {
        self.payload
    }
}

/// Call arguments for an [`ActionCreator`], passed as a tuple.
pub trait IntoArgs {
    /// Encode each positional argument.
    ///
    /// # Errors
    ///
    /// Returns the serde error of the first argument that cannot be encoded.
    fn into_args(self) -> Result<Vec<Value>, serde_json::Error>;
}

/// A user function turning creator arguments into a payload.
///
/// Implemented for closures of zero to four arguments whose parameters are
/// deserializable and whose return value is serializable. `Args` is the
/// parameter tuple and only serves to keep the impls apart.
pub trait PayloadShaper<Args>: Send + Sync + 'static {
    /// Number of positional arguments the shaper takes
    const ARITY: usize;

    /// Decode `args`, call the shaper and encode its result.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeError`] on arity mismatch or serde failure.
    fn shape(&self, args: Vec<Value>) -> Result<Value, ShapeError>;
}

macro_rules! one {
    ($arg:ident) => {
        1
    };
}

macro_rules! impl_arity {
    ($($arg:ident),*) => {
        impl<$($arg: Serialize,)*> IntoArgs for ($($arg,)*) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Result<Vec<Value>, serde_json::Error> {
                let ($($arg,)*) = self;
                Ok(vec![$(serde_json::to_value($arg)?),*])
            }
        }

        impl<Func, Out, $($arg,)*> PayloadShaper<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Out + Send + Sync + 'static,
            Out: Serialize,
            $($arg: DeserializeOwned,)*
        {
            const ARITY: usize = 0 $(+ one!($arg))*;

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn shape(&self, args: Vec<Value>) -> Result<Value, ShapeError> {
                if args.len() != Self::ARITY {
                    return Err(ShapeError::Arity {
                        expected: Self::ARITY,
                        actual: args.len(),
                    });
                }
                let actual = args.len();
                let mut args = args.into_iter().enumerate();
                $(
                    let Some((index, value)) = args.next() else {
                        return Err(ShapeError::Arity { expected: Self::ARITY, actual });
                    };
                    let $arg: $arg = serde_json::from_value(value)
                        .map_err(|source| ShapeError::Argument { index, source })?;
                )*
                serde_json::to_value((self)($($arg),*)).map_err(ShapeError::Encode)
            }
        }
    };
}

impl_arity!();
impl_arity!(A1);
impl_arity!(A1, A2);
impl_arity!(A1, A2, A3);
impl_arity!(A1, A2, A3, A4);

type ShapeFn = dyn Fn(Vec<Value>) -> Result<Value, ShapeError> + Send + Sync;

/// Produces actions of one namespaced type.
#[derive(Clone)]
pub struct ActionCreator {
    kind: String,
    shaper: Arc<ShapeFn>,
}

impl ActionCreator {
    /// The namespaced type this creator emits
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Build an action from positional arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Shape`] if the arguments do not fit the shaper.
    pub fn create<A: IntoArgs>(&self, args: A) -> Result<Action, ModelError> {
        let args = args.into_args().map_err(|source| ModelError::Shape {
            kind: self.kind.clone(),
            source: ShapeError::Encode(source),
        })?;
        let payload = (self.shaper)(args).map_err(|source| ModelError::Shape {
            kind: self.kind.clone(),
            source,
        })?;
        Ok(Action::new(self.kind.clone(), payload))
    }

    /// Whether `action` was emitted by this creator's type
    #[must_use]
    pub fn matches(&self, action: &Action) -> bool {
        action.kind == self.kind
    }
}

impl std::fmt::Debug for ActionCreator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionCreator")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Payload shapers keyed by local action key, before namespacing.
#[derive(Default)]
pub struct ActionDefs {
    shapers: Vec<(String, Arc<ShapeFn>)>,
}

impl ActionDefs {
    /// Start an empty definition list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define an action. A later definition of the same key wins.
    #[must_use]
    pub fn define<Args, P>(mut self, key: impl Into<String>, shaper: P) -> Self
    where
        P: PayloadShaper<Args>,
    {
        let key = key.into();
        self.shapers.retain(|(existing, _)| *existing != key);
        self.shapers
            .push((key, Arc::new(move |args: Vec<Value>| shaper.shape(args))));
        self
    }

    /// Namespace every definition under `name`
    #[must_use]
    pub fn assemble(self, name: &str) -> ActionMap {
        let creators = self
            .shapers
            .into_iter()
            .map(|(key, shaper)| {
                let creator = ActionCreator {
                    kind: namespaced(name, &key),
                    shaper,
                };
                (key, creator)
            })
            .collect();
        ActionMap { creators }
    }
}

/// Action creators of one model, keyed by local key.
#[derive(Clone, Debug, Default)]
pub struct ActionMap {
    creators: BTreeMap<String, ActionCreator>,
}

impl ActionMap {
    /// Look up a creator by local key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ActionCreator> {
        self.creators.get(key)
    }

    /// Create an action through the creator registered under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownAction`] for an undefined key, or the
    /// creator's own error.
    pub fn create<A: IntoArgs>(&self, key: &str, args: A) -> Result<Action, ModelError> {
        self.get(key)
            .ok_or_else(|| ModelError::UnknownAction {
                key: key.to_string(),
            })?
            .create(args)
    }

    /// Whether `key` is defined
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.creators.contains_key(key)
    }

    /// Local keys in lexical order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.creators.keys().map(String::as_str)
    }

    /// Iterate `(local key, creator)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ActionCreator)> {
        self.creators.iter().map(|(key, creator)| (key.as_str(), creator))
    }

    /// Number of creators
    #[must_use]
    pub fn len(&self) -> usize {
        self.creators.len()
    }

    /// Whether no action is defined
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creators.is_empty()
    }
}
