//! State persistence and rehydration
//!
//! A [`PersistConfig`] names a storage key and which slices to keep. When a
//! store is created with one, the root reducer is wrapped in a
//! [`PersistedReducer`] and a [`Persistor`] starts in the background:
//!
//! 1. Read `persist:<key>` from [`Storage`]
//! 2. Dispatch [`REHYDRATE`] with whatever was found
//! 3. Write the selected slices back after every state change (throttled)
//!
//! The stored value is a JSON object of slice name to slice JSON, plus a
//! `_persist` entry carrying the version:
//!
//! ```json
//! { "counter": { "value": 4 }, "_persist": { "version": 1, "rehydrated": true } }
//! ```

use crate::store::{Store, WeakStore};
use chrono::{DateTime, Utc};
use modelkit_core::action::Action;
use modelkit_core::composition::CombinedReducer;
use modelkit_core::error::ModelError;
use modelkit_core::reducer::Reducer;
use modelkit_core::state::RootState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;

/// Action type dispatched once stored state has been read
pub const REHYDRATE: &str = "persist/REHYDRATE";

/// Prefix of every storage key
pub const KEY_PREFIX: &str = "persist:";

/// Reserved entry holding persistence metadata
pub const META_KEY: &str = "_persist";

/// Errors from the persistence layer
#[derive(Error, Debug)]
pub enum PersistError {
    /// File storage failed
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Stored value is not valid JSON
    #[error("Stored state is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A slice could not be encoded
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Stored value is JSON but not a persisted state object
    #[error("Stored state has an unexpected shape: {0}")]
    InvalidFormat(String),

    /// A custom storage backend failed
    #[error("Storage backend failed: {0}")]
    Backend(String),
}

/// Future returned by [`Storage`] methods
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PersistError>> + Send + 'a>>;

/// Key-value string storage.
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` so it can be used as `Arc<dyn Storage>`.
pub trait Storage: Send + Sync {
    /// Read the value stored under `key`, if any
    fn get_item(&self, key: String) -> StorageFuture<'_, Option<String>>;

    /// Store `value` under `key`
    fn set_item(&self, key: String, value: String) -> StorageFuture<'_, ()>;

    /// Delete `key`; deleting a missing key succeeds
    fn remove_item(&self, key: String) -> StorageFuture<'_, ()>;
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Store files under `dir`, created on first write
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<key>.json`, with every byte outside `[A-Za-z0-9-]` written as `_xx`.
    ///
    /// `_` itself is escaped, so distinct keys never share a file.
    fn path(&self, key: &str) -> PathBuf {
        let mut file = String::with_capacity(key.len() + 5);
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                file.push(char::from(byte));
            } else {
                file.push_str(&format!("_{byte:02x}"));
            }
        }
        file.push_str(".json");
        self.dir.join(file)
    }

    /// A temp file next to `path`, unique per process and write
    fn temp_path(path: &Path) -> PathBuf {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{}.{n}.tmp", std::process::id()));
        PathBuf::from(name)
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: String) -> StorageFuture<'_, Option<String>> {
        Box::pin(async move {
            match tokio::fs::read_to_string(self.path(&key)).await {
                Ok(contents) => Ok(Some(contents)),
                Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
                Err(error) => Err(error.into()),
            }
        })
    }

    fn set_item(&self, key: String, value: String) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir).await?;
            let path = self.path(&key);
            let tmp = Self::temp_path(&path);
            tokio::fs::write(&tmp, value).await?;
            if let Err(error) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(error.into());
            }
            Ok(())
        })
    }

    fn remove_item(&self, key: String) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.path(&key)).await {
                Ok(()) => Ok(()),
                Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
                Err(error) => Err(error.into()),
            }
        })
    }
}

/// What to persist and where
///
/// # Example
///
/// ```
/// use modelkit_runtime::persist::{FileStorage, PersistConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let config = PersistConfig::new("root", Arc::new(FileStorage::new("./state")))
///     .with_whitelist(["counter"])
///     .with_version(2)
///     .with_throttle(Duration::from_millis(100));
/// assert_eq!(config.storage_key(), "persist:root");
/// assert!(config.includes("counter"));
/// assert!(!config.includes("session"));
/// ```
#[derive(Clone)]
pub struct PersistConfig {
    key: String,
    storage: Arc<dyn Storage>,
    whitelist: Option<Vec<String>>,
    blacklist: Vec<String>,
    version: u32,
    throttle: Duration,
}

impl PersistConfig {
    /// Persist every slice under `persist:<key>` in `storage`
    #[must_use]
    pub fn new(key: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            key: key.into(),
            storage,
            whitelist: None,
            blacklist: Vec::new(),
            version: 1,
            throttle: Duration::ZERO,
        }
    }

    /// Only persist these slices
    #[must_use]
    pub fn with_whitelist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Never persist these slices
    #[must_use]
    pub fn with_blacklist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blacklist = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the state version; stored state of another version is discarded
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Minimum delay between a state change and its write
    #[must_use]
    pub const fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// The configured key, without prefix
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The key used in storage: `persist:<key>`
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{KEY_PREFIX}{}", self.key)
    }

    /// The configured version
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Whether the slice `name` is persisted
    #[must_use]
    pub fn includes(&self, name: &str) -> bool {
        name != META_KEY
            && self
                .whitelist
                .as_ref()
                .is_none_or(|whitelist| whitelist.iter().any(|n| n == name))
            && !self.blacklist.iter().any(|n| n == name)
    }
}

impl std::fmt::Debug for PersistConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistConfig")
            .field("key", &self.key)
            .field("whitelist", &self.whitelist)
            .field("blacklist", &self.blacklist)
            .field("version", &self.version)
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

/// `_persist` metadata stored next to the slices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistMeta {
    /// State version at write time
    pub version: u32,
    /// Whether the writer had completed rehydration
    pub rehydrated: bool,
}

/// Payload of a [`REHYDRATE`] action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RehydratePayload {
    /// The persist key this rehydration belongs to
    pub key: String,
    /// Stored slices, or `None` when nothing usable was stored
    pub state: Option<Map<String, Value>>,
}

/// Build the rehydrate action for `config`
#[must_use]
pub fn rehydrate_action(config: &PersistConfig, state: Option<Map<String, Value>>) -> Action {
    let payload = RehydratePayload {
        key: config.key.clone(),
        state,
    };
    Action::new(REHYDRATE, json!(payload))
}

/// Decode a stored value, dropping it when its version does not match.
///
/// # Errors
///
/// Returns [`PersistError::Json`] or [`PersistError::InvalidFormat`] when the
/// stored text is not a persisted state object.
pub fn decode_stored(config: &PersistConfig, raw: &str) -> Result<Option<Map<String, Value>>, PersistError> {
    let Value::Object(mut stored) = serde_json::from_str::<Value>(raw)? else {
        return Err(PersistError::InvalidFormat("expected a JSON object".to_string()));
    };
    let meta = stored
        .remove(META_KEY)
        .map(serde_json::from_value::<PersistMeta>)
        .transpose()?;

    match meta {
        Some(meta) if meta.version == config.version => Ok(Some(stored)),
        Some(meta) => {
            tracing::warn!(
                key = %config.key,
                stored = meta.version,
                expected = config.version,
                "Discarding persisted state of another version"
            );
            Ok(None)
        },
        None => Err(PersistError::InvalidFormat(format!("missing `{META_KEY}` entry"))),
    }
}

/// Root reducer wrapper that applies [`REHYDRATE`] actions.
///
/// A rehydrate action for this key first passes through the wrapped reducer
/// like any other action, then each persisted slice found in the payload
/// replaces the reduced slice of the same name.
pub struct PersistedReducer {
    inner: Arc<CombinedReducer>,
    config: PersistConfig,
}

impl PersistedReducer {
    /// Wrap `inner`
    #[must_use]
    pub const fn new(inner: Arc<CombinedReducer>, config: PersistConfig) -> Self {
        Self { inner, config }
    }
}

impl Reducer for PersistedReducer {
    type State = RootState;

    fn reduce(&self, state: Option<&RootState>, action: &Action) -> Result<RootState, ModelError> {
        let mut next = self.inner.reduce(state, action)?;
        if action.kind() != REHYDRATE {
            return Ok(next);
        }

        let payload: RehydratePayload = action.payload_as()?;
        if payload.key != self.config.key {
            return Ok(next);
        }

        let mut restored = 0_u64;
        for (name, value) in payload.state.into_iter().flatten() {
            if !self.config.includes(&name) {
                continue;
            }
            match self.inner.from_json(&name, value) {
                Ok(Some(slice)) => {
                    next.insert_raw(name, slice);
                    restored += 1;
                },
                Ok(None) => tracing::debug!(slice = %name, "Ignoring stored slice of unknown model"),
                Err(error) => tracing::warn!(slice = %name, error = %error, "Ignoring undecodable stored slice"),
            }
        }
        tracing::info!(key = %self.config.key, restored, "State rehydrated");
        Ok(next)
    }
}

/// Snapshot of a persistor's status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistorStatus {
    /// Stored state has been read and dispatched
    pub bootstrapped: bool,
    /// Writes are suspended
    pub paused: bool,
    /// Completed writes
    pub writes: u64,
    /// Time of the last completed write
    pub last_flushed_at: Option<DateTime<Utc>>,
}

struct Shared {
    reducer: Arc<CombinedReducer>,
    config: PersistConfig,
    status: Mutex<PersistorStatus>,
    ready: watch::Sender<bool>,
}

impl Shared {
    fn status(&self) -> std::sync::MutexGuard<'_, PersistorStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn encode(&self, state: &RootState) -> Result<String, PersistError> {
        let mut slices = self.reducer.to_json(state, |name| self.config.includes(name))?;
        let meta = PersistMeta {
            version: self.config.version,
            rehydrated: *self.ready.borrow(),
        };
        slices.insert(META_KEY.to_string(), serde_json::to_value(meta)?);
        Ok(serde_json::to_string(&slices)?)
    }

    async fn write(&self, state: &RootState) -> Result<(), PersistError> {
        let encoded = self.encode(state)?;
        self.config
            .storage
            .set_item(self.config.storage_key(), encoded)
            .await?;

        let mut status = self.status();
        status.writes += 1;
        status.last_flushed_at = Some(Utc::now());
        drop(status);

        metrics::counter!("persist.writes").increment(1);
        tracing::trace!(key = %self.config.key, "Persisted state");
        Ok(())
    }

    async fn read(&self) -> Option<Map<String, Value>> {
        let raw = match self.config.storage.get_item(self.config.storage_key()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(key = %self.config.key, error = %error, "Could not read persisted state");
                return None;
            },
        };
        decode_stored(&self.config, &raw).unwrap_or_else(|error| {
            tracing::warn!(key = %self.config.key, error = %error, "Ignoring persisted state");
            None
        })
    }
}

/// Handle on a store's persistence.
///
/// Created by [`crate::StoreBuilder::create`] when a [`PersistConfig`] was
/// given. Rehydration runs in the background; await [`Persistor::ready`]
/// before relying on restored state.
#[derive(Clone)]
pub struct Persistor {
    store: Store,
    shared: Arc<Shared>,
}

impl Persistor {
    pub(crate) fn start(
        store: &Store,
        reducer: Arc<CombinedReducer>,
        config: PersistConfig,
        handle: &Handle,
    ) -> Self {
        let (ready, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            reducer,
            config,
            status: Mutex::new(PersistorStatus::default()),
            ready,
        });

        // Subscribed before the task starts, so changes made while the
        // stored state is still being read are written once it is restored.
        let revisions = store.subscribe();
        handle.spawn(run(store.downgrade(), revisions, Arc::clone(&shared)));

        Self {
            store: store.clone(),
            shared,
        }
    }

    /// Wait until stored state has been rehydrated
    pub async fn ready(&self) {
        let mut ready = self.shared.ready.subscribe();
        // The sender lives in `shared`, so this only ends when ready
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Suspend automatic writes
    pub fn pause(&self) {
        self.shared.status().paused = true;
        tracing::debug!(key = %self.shared.config.key, "Persistence paused");
    }

    /// Resume automatic writes; the next state change is written
    pub fn resume(&self) {
        self.shared.status().paused = false;
        tracing::debug!(key = %self.shared.config.key, "Persistence resumed");
    }

    /// Write the current state now, even while paused
    ///
    /// # Errors
    ///
    /// Returns a [`PersistError`] if encoding or the storage write fails.
    pub async fn flush(&self) -> Result<(), PersistError> {
        let state = self.store.state().await;
        self.shared.write(&state).await
    }

    /// Delete the stored state
    ///
    /// # Errors
    ///
    /// Returns a [`PersistError`] if the storage backend fails.
    pub async fn purge(&self) -> Result<(), PersistError> {
        self.shared
            .config
            .storage
            .remove_item(self.shared.config.storage_key())
            .await?;
        tracing::info!(key = %self.shared.config.key, "Persisted state purged");
        Ok(())
    }

    /// Current status
    #[must_use]
    pub fn state(&self) -> PersistorStatus {
        self.shared.status().clone()
    }

    /// The configuration in use
    #[must_use]
    pub fn config(&self) -> &PersistConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for Persistor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistor")
            .field("config", &self.shared.config)
            .field("status", &self.state())
            .finish_non_exhaustive()
    }
}

/// Bootstrap, then write on every revision until the store is dropped.
async fn run(store: WeakStore, mut revisions: watch::Receiver<u64>, shared: Arc<Shared>) {
    let stored = shared.read().await;

    let Some(strong) = store.upgrade() else {
        return;
    };
    let action = rehydrate_action(&shared.config, stored);
    if let Err(error) = strong.dispatch(action).await {
        tracing::error!(key = %shared.config.key, error = %error, "Rehydration failed");
    }
    drop(strong);

    shared.status().bootstrapped = true;
    shared.ready.send_replace(true);
    metrics::counter!("persist.rehydrated").increment(1);

    while revisions.changed().await.is_ok() {
        if !shared.config.throttle.is_zero() {
            tokio::time::sleep(shared.config.throttle).await;
        }
        revisions.borrow_and_update();

        if shared.status().paused {
            continue;
        }
        let Some(strong) = store.upgrade() else {
            break;
        };
        let state = strong.state().await;
        drop(strong);

        if let Err(error) = shared.write(&state).await {
            tracing::error!(key = %shared.config.key, error = %error, "Could not persist state");
        }
    }
    tracing::debug!(key = %shared.config.key, "Persistor stopped");
}
