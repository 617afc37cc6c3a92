//! # Modelkit Testing
//!
//! Testing utilities and helpers for modelkit models and stores.
//!
//! This crate provides:
//! - An in-memory persistence backend
//! - A Given-When-Then harness for reducers
//! - Helpers for waiting on asynchronous store state
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use modelkit_testing::{InMemoryStorage, helpers::eventually};
//! use modelkit_runtime::{PersistConfig, Store};
//!
//! #[tokio::test]
//! async fn test_counter_persists() {
//!     let storage = Arc::new(InMemoryStorage::new());
//!     let created = Store::of(vec![counter().slice()])
//!         .persist(PersistConfig::new("root", storage.clone()))
//!         .create()?;
//!
//!     created.store.bind(counter.action()).dispatch("increase", (4,))?;
//!     eventually(|| storage.writes() > 0).await;
//! }
//! ```


pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations of runtime backends
pub mod mocks {
    use modelkit_runtime::persist::{PersistError, Storage, StorageFuture};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, RwLock};

    /// In-memory [`Storage`] for persistence tests
    ///
    /// Clones share the same map, so a test can keep one handle while the
    /// persistor owns another.
    ///
    /// # Example
    ///
    /// ```
    /// use modelkit_testing::mocks::InMemoryStorage;
    ///
    /// let storage = InMemoryStorage::new().with_item("persist:root", "{}");
    /// assert_eq!(storage.get_raw("persist:root").as_deref(), Some("{}"));
    /// assert_eq!(storage.len(), 1);
    /// ```
    #[derive(Debug, Clone, Default)]
    pub struct InMemoryStorage {
        items: Arc<RwLock<HashMap<String, String>>>,
        writes: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
    }

    impl InMemoryStorage {
        /// Create an empty storage
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a value, as if an earlier run had written it
        #[must_use]
        pub fn with_item(self, key: impl Into<String>, value: impl Into<String>) -> Self {
            if let Ok(mut items) = self.items.write() {
                items.insert(key.into(), value.into());
            }
            self
        }

        /// Raw stored value
        #[must_use]
        pub fn get_raw(&self, key: &str) -> Option<String> {
            self.items.read().ok().and_then(|items| items.get(key).cloned())
        }

        /// Stored value parsed as JSON
        #[must_use]
        pub fn get_json(&self, key: &str) -> Option<serde_json::Value> {
            self.get_raw(key)
                .and_then(|raw| serde_json::from_str(&raw).ok())
        }

        /// Number of stored keys
        #[must_use]
        pub fn len(&self) -> usize {
            self.items.read().map(|items| items.len()).unwrap_or(0)
        }

        /// Whether nothing is stored
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Number of successful `set_item` calls
        #[must_use]
        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        /// Make every following call fail with [`PersistError::Backend`]
        pub fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), PersistError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(PersistError::Backend("storage unavailable".to_string()));
            }
            Ok(())
        }

        fn poisoned() -> PersistError {
            PersistError::Backend("storage lock poisoned".to_string())
        }
    }

    impl Storage for InMemoryStorage {
        fn get_item(&self, key: String) -> StorageFuture<'_, Option<String>> {
            Box::pin(async move {
                self.check()?;
                let items = self.items.read().map_err(|_| Self::poisoned())?;
                Ok(items.get(&key).cloned())
            })
        }

        fn set_item(&self, key: String, value: String) -> StorageFuture<'_, ()> {
            Box::pin(async move {
                self.check()?;
                self.items
                    .write()
                    .map_err(|_| Self::poisoned())?
                    .insert(key, value);
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }

        fn remove_item(&self, key: String) -> StorageFuture<'_, ()> {
            Box::pin(async move {
                self.check()?;
                self.items
                    .write()
                    .map_err(|_| Self::poisoned())?
                    .remove(&key);
                Ok(())
            })
        }
    }
}

/// Test helpers and utilities
pub mod helpers {
    use std::time::Duration;

    /// Default deadline used by [`eventually`]
    pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(2);

    /// Install a test-friendly tracing subscriber
    ///
    /// Honors `RUST_LOG`; calling it from several tests is fine.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    /// Poll `condition` until it holds or [`DEFAULT_DEADLINE`] passes
    ///
    /// # Panics
    ///
    /// Panics when the deadline passes first.
    #[allow(clippy::panic)] // Test helper
    pub async fn eventually<F>(condition: F)
    where
        F: FnMut() -> bool,
    {
        if !eventually_within(DEFAULT_DEADLINE, condition).await {
            panic!("Condition not met within {DEFAULT_DEADLINE:?}");
        }
    }

    /// Poll `condition` every few milliseconds for up to `deadline`
    ///
    /// Returns whether the condition was met.
    pub async fn eventually_within<F>(deadline: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let poll = async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(deadline, poll).await.is_ok()
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Valid model names: lowercase identifiers without `/`
    pub fn model_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    /// Valid local action keys
    pub fn action_key() -> impl Strategy<Value = String> {
        "[a-z][a-zA-Z0-9_]{0,15}"
    }

    /// A sequence of counter steps; positive adds, negative subtracts
    pub fn counter_steps() -> impl Strategy<Value = Vec<i64>> {
        prop::collection::vec(-1_000_i64..1_000, 0..32)
    }
}

// Re-export commonly used items
pub use helpers::{eventually, init_test_tracing};
pub use mocks::InMemoryStorage;
