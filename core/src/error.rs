//! Error types for model assembly and reduction.

use thiserror::Error;

/// Failure while turning call arguments into an action payload.
#[derive(Error, Debug)]
pub enum ShapeError {
    /// The creator was called with the wrong number of arguments.
    #[error("expected {expected} argument(s), got {actual}")]
    Arity {
        /// Arguments the payload shaper takes
        expected: usize,
        /// Arguments supplied by the caller
        actual: usize,
    },

    /// An argument could not be converted to the shaper's parameter type.
    #[error("argument {index} could not be decoded: {source}")]
    Argument {
        /// Zero-based position of the argument
        index: usize,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// An argument or the shaped payload could not be encoded.
    #[error("could not encode value: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors raised while building models, creating actions or reducing state.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Two models in one store share a name.
    #[error("model `{0}` is registered more than once")]
    DuplicateModel(String),

    /// A reducer or effect is keyed on an action the model never defined.
    #[error("model `{model}` handles `{key}` but defines no such action")]
    UnknownActionKey {
        /// Model name
        model: String,
        /// Local key of the orphaned handler
        key: String,
    },

    /// An action creator was looked up by a key that was never defined.
    #[error("no action `{key}` in this action map")]
    UnknownAction {
        /// Local key that was requested
        key: String,
    },

    /// The payload shaper rejected its arguments.
    #[error("cannot shape payload for `{kind}`: {source}")]
    Shape {
        /// Namespaced action type
        kind: String,
        /// What went wrong
        #[source]
        source: ShapeError,
    },

    /// A reducer handler could not decode the action payload.
    #[error("cannot decode payload of `{kind}`: {source}")]
    Payload {
        /// Namespaced action type
        kind: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// The stored slice is not of the model's state type.
    #[error("slice `{0}` holds a value of an unexpected type")]
    SliceType(String),

    /// A slice could not be converted to or from JSON.
    #[error("slice `{name}` could not be serialized: {source}")]
    Serialize {
        /// Model name
        name: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced to effect workers through their context.
#[derive(Error, Debug)]
pub enum EffectError {
    /// The store refused or failed to process a dispatched action.
    #[error("dispatch failed: {0}")]
    Dispatch(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The action channel closed while waiting in `take`.
    #[error("action channel closed")]
    ChannelClosed,
}
