//! # Modelkit Runtime
//!
//! Runtime for stores composed from modelkit models.
//!
//! This crate turns a set of finished models into a running [`Store`]: it
//! combines their reducers, schedules their effect workers, runs the
//! middleware chain around every dispatch, and optionally persists state.
//!
//! ## Core Components
//!
//! - **Store**: Holds the composed state and serializes dispatches
//! - **Effect Scheduler**: Starts workers per take policy (every, latest, leading)
//! - **Middleware**: Hooks before and after the root reducer
//! - **Persistor**: Rehydrates state from storage and writes changes back
//!
//! ## Example
//!
//! ```no_run
//! use modelkit_core::prelude::*;
//! use modelkit_runtime::Store;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let counter = model("counter", 0_i64)
//!     .action(ActionDefs::new().define("increase", |n: i64| n))
//!     .reducer(HandlerMap::new().on("increase", |s: &i64, n: i64| s + n))
//!     .value();
//! let actions = counter.action().clone();
//!
//! let created = Store::of([counter]).create()?;
//! let store = created.store;
//!
//! store.dispatch(actions.create("increase", (4,))?).await?;
//! let value = store.with_state(|root| root.slice::<i64>("counter")).await;
//! assert_eq!(value.as_deref(), Some(&4));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Prometheus metrics for observability
pub mod metrics;

/// Middleware around the root reducer
pub mod middleware;

/// State persistence and rehydration
pub mod persist;

mod scheduler;

pub mod store;

pub use middleware::{InspectMiddleware, LoggingMiddleware, Middleware};
pub use persist::{FileStorage, PersistConfig, Persistor, Storage};
pub use store::{BoundActions, CreatedStore, Store, StoreBuilder, create_store};

/// Error types for the Store runtime
pub mod error {
    use crate::persist::PersistError;
    use modelkit_core::error::ModelError;
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Composition or reduction failed
        ///
        /// Covers duplicate model names, undeclared action keys, creator
        /// arguments that do not fit, and reducer failures. A failed
        /// reduction leaves the state untouched.
        #[error(transparent)]
        Model(#[from] ModelError),

        /// The persistence layer failed
        #[error(transparent)]
        Persist(#[from] PersistError),

        /// Store is shutting down and not accepting new actions
        ///
        /// This error is returned when `dispatch()` is called after shutdown initiated.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        ///
        /// The remaining workers were aborted.
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for effects or for a matching action
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        ///
        /// The store was dropped while a caller was waiting on it.
        #[error("Action broadcast channel closed")]
        ChannelClosed,

        /// `create()` was called outside a Tokio runtime
        #[error("Store must be created inside a Tokio runtime")]
        NoRuntime,
    }
}

pub use error::StoreError;

/// Environment variable selecting the deployment mode
pub const ENV_MODE: &str = "MODELKIT_ENV";
/// Environment variable enabling state inspection (development only)
pub const ENV_INSPECT: &str = "MODELKIT_INSPECT";
/// Environment variable enabling per-action debug logging
pub const ENV_LOG_ACTIONS: &str = "MODELKIT_LOG_ACTIONS";
/// Environment variable overriding the action broadcast capacity
pub const ENV_ACTION_BUFFER: &str = "MODELKIT_ACTION_BUFFER";
/// Environment variable overriding the shutdown timeout, in milliseconds
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "MODELKIT_SHUTDOWN_TIMEOUT_MS";

/// Store configuration
///
/// Controls runtime behavior of the store. Built with `with_*` methods or
/// read from the environment with [`StoreConfig::from_env`].
///
/// # Example
///
/// ```
/// use modelkit_runtime::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig::default()
///     .with_action_buffer(256)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert!(!config.inspect);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Install the inspection middleware
    pub inspect: bool,
    /// Install the action logging middleware
    pub log_actions: bool,
    /// Capacity of the action broadcast channel
    pub action_buffer: usize,
    /// Timeout used by [`Store::close`]
    pub shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Enable or disable the inspection middleware
    #[must_use]
    pub const fn with_inspect(mut self, inspect: bool) -> Self {
        self.inspect = inspect;
        self
    }

    /// Enable or disable action logging
    #[must_use]
    pub const fn with_log_actions(mut self, log_actions: bool) -> Self {
        self.log_actions = log_actions;
        self
    }

    /// Set the action broadcast capacity (at least 1)
    #[must_use]
    pub const fn with_action_buffer(mut self, capacity: usize) -> Self {
        self.action_buffer = if capacity == 0 { 1 } else { capacity };
        self
    }

    /// Set the default shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Read configuration from process environment variables.
    ///
    /// Inspection is only switched on when [`ENV_MODE`] is `development`
    /// and [`ENV_INSPECT`] is truthy; any other mode composes a plain store.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`StoreConfig::from_env`], with a custom variable lookup
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let development = lookup(ENV_MODE).is_some_and(|mode| mode.eq_ignore_ascii_case("development"));
        let inspect = development && lookup(ENV_INSPECT).is_some_and(|value| is_truthy(&value));
        let log_actions = lookup(ENV_LOG_ACTIONS).is_some_and(|value| is_truthy(&value));
        let action_buffer = parse_or(&lookup, ENV_ACTION_BUFFER, defaults.action_buffer);
        let shutdown_timeout = lookup(ENV_SHUTDOWN_TIMEOUT_MS)
            .and_then(|raw| match raw.trim().parse::<u64>() {
                Ok(ms) => Some(Duration::from_millis(ms)),
                Err(_) => {
                    tracing::warn!(variable = ENV_SHUTDOWN_TIMEOUT_MS, value = %raw, "Ignoring invalid value");
                    None
                },
            })
            .unwrap_or(defaults.shutdown_timeout);

        Self {
            inspect,
            log_actions,
            action_buffer: action_buffer.max(1),
            shutdown_timeout,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_or<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(variable = key, value = %raw, "Ignoring invalid value");
            default
        }),
        None => default,
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            inspect: false,
            log_actions: false,
            action_buffer: 64,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Guard that decrements an atomic counter on drop (for effect tracking)
///
/// Dropped when a worker finishes, fails, panics or is aborted.
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl AtomicCounterGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert!(!config.inspect);
        assert!(!config.log_actions);
        assert_eq!(config.action_buffer, 64);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_inspect_requires_development_mode() {
        let config = StoreConfig::from_lookup(lookup(&[(ENV_INSPECT, "true")]));
        assert!(!config.inspect);

        let config = StoreConfig::from_lookup(lookup(&[(ENV_MODE, "production"), (ENV_INSPECT, "1")]));
        assert!(!config.inspect);

        let config = StoreConfig::from_lookup(lookup(&[(ENV_MODE, "development"), (ENV_INSPECT, "yes")]));
        assert!(config.inspect);

        let config = StoreConfig::from_lookup(lookup(&[(ENV_MODE, "development")]));
        assert!(!config.inspect);
    }

    #[test]
    fn test_numeric_overrides() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_ACTION_BUFFER, "8"),
            (ENV_SHUTDOWN_TIMEOUT_MS, "250"),
            (ENV_LOG_ACTIONS, "on"),
        ]));
        assert_eq!(config.action_buffer, 8);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert!(config.log_actions);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_ACTION_BUFFER, "lots"),
            (ENV_SHUTDOWN_TIMEOUT_MS, "-1"),
        ]));
        assert_eq!(config.action_buffer, 64);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_zero_buffer_is_clamped() {
        let config = StoreConfig::default().with_action_buffer(0);
        assert_eq!(config.action_buffer, 1);
    }

    #[test]
    fn test_counter_guard_decrements_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let guard = AtomicCounterGuard::new(&counter);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        drop(guard);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
