//! Store module - The runtime for composed models
//!
//! A [`Store`] owns the composed [`RootState`] behind a `RwLock`. Every
//! dispatch takes the write lock, runs the middleware chain and the root
//! reducer, and while still holding the lock publishes the action to
//! subscribers and to the effect scheduler. Dispatches are therefore seen by
//! everyone in the order they were reduced.

use crate::middleware::{InspectMiddleware, LoggingMiddleware, Middleware};
use crate::persist::{PersistConfig, PersistedReducer, Persistor};
use crate::scheduler::EffectScheduler;
use crate::{StoreConfig, StoreError};
use modelkit_core::action::{Action, ActionMap, IntoArgs};
use modelkit_core::composition::{INIT_ACTION, ModelSlice, combine_reducers};
use modelkit_core::effect::{EffectContext, EffectRuntime, EffectTask};
use modelkit_core::error::EffectError;
use modelkit_core::reducer::Reducer;
use modelkit_core::selector::{Fetch, Selector};
use modelkit_core::state::RootState;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{RwLock, broadcast, watch};

type RootReducer = dyn Reducer<State = RootState>;

struct StoreInner {
    state: RwLock<RootState>,
    reducer: Arc<RootReducer>,
    middleware: Vec<Arc<dyn Middleware>>,
    scheduler: EffectScheduler,
    action_broadcast: broadcast::Sender<Action>,
    revision: watch::Sender<u64>,
    shutdown: AtomicBool,
    config: StoreConfig,
}

impl StoreInner {
    /// Context handed to workers; holds the store weakly so running
    /// programs do not keep it alive.
    fn context(self: &Arc<Self>) -> EffectContext {
        EffectContext::new(Arc::new(WeakStore(Arc::downgrade(self))))
    }

    async fn dispatch(self: &Arc<Self>, action: Action) -> Result<(), StoreError> {
        if self.shutdown.load(Ordering::Acquire) {
            tracing::warn!(action = %action.kind(), "Rejected action: store is shutting down");
            metrics::counter!("store.shutdown.rejected_actions").increment(1);
            return Err(StoreError::ShutdownInProgress);
        }

        let mut state = self.state.write().await;
        tracing::trace!("Acquired write lock on state");

        let mut action = action;
        for middleware in &self.middleware {
            match middleware.before_reduce(action, &state) {
                Some(next) => action = next,
                None => {
                    tracing::debug!(middleware = middleware.name(), "Action swallowed by middleware");
                    return Ok(());
                },
            }
        }

        let start = std::time::Instant::now();
        let next = self.reducer.reduce(Some(&*state), &action)?;
        metrics::histogram!("store.reducer.duration_seconds").record(start.elapsed().as_secs_f64());

        let changed = !next.same_as(&state);
        let previous = std::mem::replace(&mut *state, next);
        if changed {
            self.revision.send_modify(|revision| *revision += 1);
        }

        // No receivers is fine
        let _ = self.action_broadcast.send(action.clone());
        self.scheduler.notify(&action, || self.context());

        for middleware in &self.middleware {
            middleware.after_reduce(&action, &previous, &state);
        }

        metrics::counter!("store.actions.dispatched").increment(1);
        tracing::debug!(action = %action.kind(), changed, "Action processed");
        Ok(())
    }
}

/// Runtime side of [`EffectContext`]: a weak reference to the store.
#[derive(Clone)]
pub(crate) struct WeakStore(Weak<StoreInner>);

impl WeakStore {
    pub(crate) fn upgrade(&self) -> Option<Store> {
        self.0.upgrade().map(|inner| Store { inner })
    }
}

impl EffectRuntime for WeakStore {
    fn dispatch(
        &self,
        action: Action,
    ) -> Pin<Box<dyn Future<Output = Result<(), EffectError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.0.upgrade().ok_or(EffectError::ChannelClosed)?;
            inner
                .dispatch(action)
                .await
                .map_err(|error| EffectError::Dispatch(Box::new(error)))
        })
    }

    fn snapshot(&self) -> Pin<Box<dyn Future<Output = RootState> + Send + '_>> {
        Box::pin(async move {
            match self.0.upgrade() {
                Some(inner) => inner.state.read().await.clone(),
                None => RootState::new(),
            }
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<Action> {
        match self.0.upgrade() {
            Some(inner) => inner.action_broadcast.subscribe(),
            // A receiver whose sender is already gone reports Closed
            None => broadcast::channel(1).1,
        }
    }
}

/// The Store - runtime coordinator for a set of models
///
/// The Store manages:
/// 1. Composed state (behind `RwLock` for concurrent access)
/// 2. The root reducer (every model's slice reducer)
/// 3. The middleware chain
/// 4. Effect workers, started per take policy
///
/// Cloning is cheap; clones share the same state.
///
/// # Example
///
/// ```ignore
/// let CreatedStore { store, persistor } = Store::of([counter.value()])
///     .persist(PersistConfig::new("root", storage))
///     .create()?;
///
/// store.dispatch(actions.create("increase", (4,))?).await?;
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Start composing a store from `models`
    ///
    /// The configuration is read from the environment
    /// ([`StoreConfig::from_env`]); [`StoreBuilder::with_config`] replaces it.
    #[must_use]
    pub fn of<I>(models: I) -> StoreBuilder
    where
        I: IntoIterator,
        I::Item: Into<ModelSlice>,
    {
        Self::of_with_lookup(models, |key| std::env::var(key).ok())
    }

    pub(crate) fn of_with_lookup<I, F>(models: I, lookup: F) -> StoreBuilder
    where
        I: IntoIterator,
        I::Item: Into<ModelSlice>,
        F: Fn(&str) -> Option<String>,
    {
        StoreBuilder {
            models: models.into_iter().map(Into::into).collect(),
            persist: None,
            middleware: Vec::new(),
            tasks: Vec::new(),
            config: StoreConfig::from_lookup(lookup),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakStore {
        WeakStore(Arc::downgrade(&self.inner))
    }

    /// Dispatch an action
    ///
    /// 1. Acquires write lock on state
    /// 2. Runs middleware, then the root reducer
    /// 3. Broadcasts the action and starts matching effect workers
    ///
    /// Returns once the action is reduced; workers keep running.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down,
    /// or [`StoreError::Model`] if the reducer rejected the action. In both
    /// cases the state is unchanged.
    #[tracing::instrument(skip(self, action), fields(action = %action.kind()), name = "store_dispatch")]
    pub async fn dispatch(&self, action: Action) -> Result<(), StoreError> {
        self.inner.dispatch(action).await
    }

    /// Dispatch an action and wait for a matching later action
    ///
    /// Subscribes before dispatching, so an action produced by a worker
    /// reacting to `action` cannot be missed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Timeout`]: no matching action within `timeout`
    /// - [`StoreError::ChannelClosed`]: the store was dropped
    /// - Any error from [`Store::dispatch`]
    pub async fn dispatch_and_wait_for<F>(
        &self,
        action: Action,
        predicate: F,
        timeout: Duration,
    ) -> Result<Action, StoreError>
    where
        F: Fn(&Action) -> bool,
    {
        let mut rx = self.inner.action_broadcast.subscribe();
        self.dispatch(action).await?;

        tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(action) if predicate(&action) => return Ok(action),
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Action observer lagged, {} actions skipped", skipped);
                    },
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(StoreError::ChannelClosed);
                    },
                }
            }
        })
        .await
        .map_err(|_| StoreError::Timeout)?
    }

    /// Snapshot of the composed state
    pub async fn state(&self) -> RootState {
        self.inner.state.read().await.clone()
    }

    /// Read state via a closure
    ///
    /// ```ignore
    /// let value = store.with_state(|root| root.slice::<Counter>("counter")).await;
    /// ```
    pub async fn with_state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&RootState) -> T,
    {
        let state = self.inner.state.read().await;
        f(&state)
    }

    /// Evaluate a selector against the current state
    pub async fn select<T>(&self, selector: &Selector<T>) -> Option<T> {
        self.with_state(|root| selector.select(root)).await
    }

    /// Read one model's slice
    pub async fn fetch<S: Send + Sync + 'static>(&self, fetch: &Fetch<S>) -> Option<Arc<S>> {
        self.with_state(|root| fetch.get(root)).await
    }

    /// Watch state revisions
    ///
    /// The value increases by one for every dispatch that changed at least
    /// one slice.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Subscribe to every action dispatched from now on
    ///
    /// Swallowed actions are not broadcast. A receiver that falls more than
    /// the configured `action_buffer` behind skips old actions.
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<Action> {
        self.inner.action_broadcast.subscribe()
    }

    /// Bind a model's action creators to this store
    #[must_use]
    pub fn bind(&self, actions: &ActionMap) -> BoundActions {
        BoundActions {
            store: self.clone(),
            actions: actions.clone(),
        }
    }

    /// Number of effect workers currently running
    #[must_use]
    pub fn running_effects(&self) -> usize {
        self.inner.scheduler.pending()
    }

    /// Wait until no effect worker is running
    ///
    /// Root programs are not counted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if workers are still running after `timeout`.
    pub async fn wait_for_effects(&self, timeout: Duration) -> Result<(), StoreError> {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(10);

        loop {
            if self.running_effects() == 0 {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(StoreError::Timeout);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Initiate graceful shutdown
    ///
    /// 1. Stop accepting new actions
    /// 2. Wait for running workers, up to `timeout`
    /// 3. Abort root programs and whatever workers are left
    ///
    /// Calling it again after a completed shutdown succeeds immediately.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] with the number of workers that
    /// had to be aborted.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        tracing::info!("Initiating graceful shutdown");
        metrics::counter!("store.shutdown.initiated").increment(1);

        self.inner.shutdown.store(true, Ordering::Release);

        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(10);

        loop {
            let pending = self.running_effects();

            if pending == 0 {
                self.inner.scheduler.abort_all();
                tracing::info!("All effects completed, shutdown successful");
                metrics::counter!("store.shutdown.completed").increment(1);
                return Ok(());
            }

            if start.elapsed() >= timeout {
                let aborted = self.inner.scheduler.abort_all();
                tracing::error!(
                    pending_effects = pending,
                    "Shutdown timeout: {} effects still running", pending
                );
                metrics::counter!("store.shutdown.timeout").increment(1);
                return Err(StoreError::ShutdownTimeout(aborted.max(pending)));
            }

            tracing::debug!(
                pending_effects = pending,
                elapsed_ms = start.elapsed().as_millis(),
                "Waiting for effects to complete"
            );

            tokio::time::sleep(poll_interval).await;
        }
    }

    /// [`Store::shutdown`] with the configured `shutdown_timeout`
    ///
    /// # Errors
    ///
    /// Same as [`Store::shutdown`].
    pub async fn close(&self) -> Result<(), StoreError> {
        self.shutdown(self.inner.config.shutdown_timeout).await
    }

    /// Whether shutdown has started
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Configuration the store was created with
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("middleware", &self.inner.middleware.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("watchers", &self.inner.scheduler.watcher_count())
            .field("running_effects", &self.running_effects())
            .finish_non_exhaustive()
    }
}

/// A model's action creators bound to a store.
///
/// Created by [`Store::bind`].
#[derive(Clone, Debug)]
pub struct BoundActions {
    store: Store,
    actions: ActionMap,
}

impl BoundActions {
    /// Create the action registered under `key` and dispatch it
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Model`] when `key` is unknown or `args` do not
    /// fit the creator, or any error from [`Store::dispatch`].
    pub async fn dispatch<A: IntoArgs>(&self, key: &str, args: A) -> Result<(), StoreError> {
        let action = self.actions.create(key, args)?;
        self.store.dispatch(action).await
    }

    /// The underlying action creators
    #[must_use]
    pub const fn actions(&self) -> &ActionMap {
        &self.actions
    }
}

/// Result of [`StoreBuilder::create`]
#[derive(Debug)]
pub struct CreatedStore {
    /// The running store
    pub store: Store,
    /// Present when persistence was configured
    pub persistor: Option<Persistor>,
}

/// Store composer, created by [`Store::of`].
#[must_use]
pub struct StoreBuilder {
    models: Vec<ModelSlice>,
    persist: Option<PersistConfig>,
    middleware: Vec<Arc<dyn Middleware>>,
    tasks: Vec<EffectTask>,
    config: StoreConfig,
}

impl StoreBuilder {
    /// Persist the state with `config`
    pub fn persist(mut self, config: PersistConfig) -> Self {
        self.persist = Some(config);
        self
    }

    /// Append a middleware; it runs after those added before it
    pub fn add_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Append an extra effect task
    pub fn add_effect_task(mut self, task: EffectTask) -> Self {
        self.tasks.push(task);
        self
    }

    /// Replace the configuration read from the environment
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Compose and start the store
    ///
    /// 1. Combine model reducers keyed by model name
    /// 2. Wrap with persistence when configured
    /// 3. Register every model effect and extra task
    /// 4. Instantiate the store with the middleware chain
    /// 5. Start the persistor, then root programs
    ///
    /// # Errors
    ///
    /// - [`StoreError::NoRuntime`]: called outside a Tokio runtime
    /// - [`StoreError::Model`]: duplicate model names, undeclared action
    ///   keys, or an initial reduction failure
    pub fn create(self) -> Result<CreatedStore, StoreError> {
        let handle = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        let Self {
            models,
            persist,
            middleware: extra_middleware,
            tasks,
            config,
        } = self;

        let combined = Arc::new(combine_reducers(models)?);

        let reducer: Arc<RootReducer> = match &persist {
            Some(persist) => Arc::new(PersistedReducer::new(Arc::clone(&combined), persist.clone())),
            None => Arc::clone(&combined) as Arc<RootReducer>,
        };

        let mut descriptors: Vec<_> = combined.effects().cloned().collect();
        let mut programs = Vec::new();
        for task in tasks {
            match task {
                EffectTask::Watch(descriptor) => descriptors.push(descriptor),
                EffectTask::Program(program) => programs.push(program),
            }
        }

        let mut middleware: Vec<Arc<dyn Middleware>> = Vec::with_capacity(extra_middleware.len() + 2);
        if config.log_actions {
            middleware.push(Arc::new(LoggingMiddleware));
        }
        middleware.extend(extra_middleware);
        if config.inspect {
            middleware.push(Arc::new(InspectMiddleware::new()));
        }

        let initial = reducer.reduce(None, &Action::unit(INIT_ACTION))?;
        let (action_broadcast, _) = broadcast::channel(config.action_buffer.max(1));
        let (revision, _) = watch::channel(0);

        tracing::info!(
            models = ?combined.names().collect::<Vec<_>>(),
            effects = descriptors.len(),
            programs = programs.len(),
            middleware = middleware.len(),
            persisted = persist.is_some(),
            "Store created"
        );

        let inner = Arc::new(StoreInner {
            state: RwLock::new(initial),
            reducer,
            middleware,
            scheduler: EffectScheduler::new(descriptors),
            action_broadcast,
            revision,
            shutdown: AtomicBool::new(false),
            config,
        });

        let store = Store { inner };
        let persistor = persist.map(|persist| Persistor::start(&store, combined, persist, &handle));

        for program in &programs {
            store
                .inner
                .scheduler
                .start_program(&handle, program, store.inner.context());
        }

        Ok(CreatedStore { store, persistor })
    }
}

/// Compose a store without persistence
///
/// # Errors
///
/// Same as [`StoreBuilder::create`].
pub fn create_store<I, M>(models: I, middleware: M, tasks: Vec<EffectTask>) -> Result<Store, StoreError>
where
    I: IntoIterator,
    I::Item: Into<ModelSlice>,
    M: IntoIterator<Item = Arc<dyn Middleware>>,
{
    let mut builder = Store::of(models);
    builder.middleware.extend(middleware);
    builder.tasks.extend(tasks);
    Ok(builder.create()?.store)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use modelkit_core::action::ActionDefs;
    use modelkit_core::effect::EffectMap;
    use modelkit_core::model::model;
    use modelkit_core::reducer::HandlerMap;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: i64,
    }

    fn counter() -> modelkit_core::model::Model<Counter> {
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
    }

    async fn value(store: &Store) -> i64 {
        store
            .with_state(|root| root.slice::<Counter>("counter"))
            .await
            .unwrap()
            .value
    }

    #[tokio::test]
    async fn test_store_creation() {
        let store = Store::of([counter().value()]).create().unwrap().store;
        assert_eq!(value(&store).await, 0);
        assert_eq!(store.running_effects(), 0);
    }

    #[tokio::test]
    async fn test_builder_reads_environment() {
        let development = |key: &str| match key {
            crate::ENV_MODE => Some("development".to_string()),
            crate::ENV_INSPECT => Some("1".to_string()),
            _ => None,
        };
        let store = Store::of_with_lookup([counter().value()], development)
            .create()
            .unwrap()
            .store;
        assert!(store.config().inspect);
        assert!(format!("{store:?}").contains("inspect"));

        // An explicit configuration wins over the environment
        let plain = Store::of_with_lookup([counter().value()], development)
            .with_config(StoreConfig::default())
            .create()
            .unwrap()
            .store;
        assert!(!plain.config().inspect);
        assert!(!format!("{plain:?}").contains("inspect"));

        let production = Store::of_with_lookup([counter().value()], |key: &str| {
            (key == crate::ENV_INSPECT).then(|| "1".to_string())
        })
        .create()
        .unwrap()
        .store;
        assert!(!production.config().inspect);
    }

    #[test]
    fn test_create_requires_runtime() {
        let result = Store::of([counter().value()]).create();
        assert!(matches!(result, Err(StoreError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_dispatch_updates_state_and_revision() {
        let store = Store::of([counter().value()]).create().unwrap().store;
        let revisions = store.subscribe();

        store
            .dispatch(Action::new("counter/increase", json!(4)))
            .await
            .unwrap();
        assert_eq!(value(&store).await, 4);
        assert_eq!(*revisions.borrow(), 1);

        store.dispatch(Action::unit("nobody/cares")).await.unwrap();
        assert_eq!(*revisions.borrow(), 1);
    }

    #[tokio::test]
    async fn test_reducer_error_keeps_state() {
        let store = Store::of([counter().value()]).create().unwrap().store;
        store
            .dispatch(Action::new("counter/increase", json!(2)))
            .await
            .unwrap();

        let result = store
            .dispatch(Action::new("counter/increase", json!("two")))
            .await;
        assert!(matches!(result, Err(StoreError::Model(_))));
        assert_eq!(value(&store).await, 2);
    }

    #[tokio::test]
    async fn test_bound_actions() {
        let value_model = counter().value();
        let actions = value_model.action().clone();
        let store = Store::of([value_model]).create().unwrap().store;
        let bound = store.bind(&actions);

        bound.dispatch("increase", (4_i64,)).await.unwrap();
        bound.dispatch("decrease", (2_i64,)).await.unwrap();
        assert_eq!(value(&store).await, 2);
        bound.dispatch("reset", ()).await.unwrap();
        assert_eq!(value(&store).await, 0);

        let missing = bound.dispatch("explode", ()).await;
        assert!(matches!(missing, Err(StoreError::Model(_))));
    }

    #[tokio::test]
    async fn test_dispatch_and_wait_for_worker_output() {
        let echo = counter()
            .every(|actions| {
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
        let store = Store::of([echo]).create().unwrap().store;

        let reply = store
            .dispatch_and_wait_for(
                Action::new("counter/increase", json!(1)),
                |action| action.kind() == "counter/reset",
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(reply.kind(), "counter/reset");
    }

    #[tokio::test]
    async fn test_dispatch_and_wait_for_times_out() {
        let store = Store::of([counter().value()]).create().unwrap().store;
        let result = store
            .dispatch_and_wait_for(
                Action::new("counter/increase", json!(1)),
                |action| action.kind() == "counter/reset",
                Duration::from_millis(20),
            )
            .await;
        assert!(matches!(result, Err(StoreError::Timeout)));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_actions() {
        let store = Store::of([counter().value()]).create().unwrap().store;
        store.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(store.is_shutting_down());

        let result = store.dispatch(Action::new("counter/increase", json!(1))).await;
        assert!(matches!(result, Err(StoreError::ShutdownInProgress)));

        // Idempotent
        assert!(store.shutdown(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_timeout_aborts_workers() {
        let slow = counter()
            .every(|_| {
                EffectMap::new().on("increase", |_, _| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
            })
            .value();
        let store = Store::of([slow]).create().unwrap().store;
        store
            .dispatch(Action::new("counter/increase", json!(1)))
            .await
            .unwrap();
        assert_eq!(store.running_effects(), 1);

        let result = store.shutdown(Duration::from_millis(30)).await;
        assert!(matches!(result, Err(StoreError::ShutdownTimeout(1))), "got {result:?}");

        tokio_test::assert_ok!(store.wait_for_effects(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_programs_do_not_block_wait_for_effects() {
        let store = Store::of([counter().value()])
            .add_effect_task(EffectTask::program(|ctx| async move {
                loop {
                    ctx.take("counter/reset").await?;
                }
            }))
            .create()
            .unwrap()
            .store;

        tokio_test::assert_ok!(store.wait_for_effects(Duration::from_millis(50)).await);
        tokio_test::assert_ok!(store.shutdown(Duration::from_millis(50)).await);
    }
}
