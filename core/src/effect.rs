//! Effect workers, dispatch policies and the worker context.
//!
//! An effect worker is an async routine started when an action of its pattern
//! is dispatched. Workers do not touch state directly; they go through an
//! [`EffectContext`], which can read a state snapshot, wait for a later
//! action, or dispatch new ones. The store behind the context implements
//! [`EffectRuntime`].
//!
//! How many workers may run per pattern is decided by [`TakePolicy`]:
//!
//! - [`TakePolicy::Every`]: every match spawns a worker
//! - [`TakePolicy::Latest`]: a match cancels the running worker first
//! - [`TakePolicy::Leading`]: a match is ignored while a worker runs

use crate::action::Action;
use crate::error::EffectError;
use crate::selector::{Fetch, Selector};
use crate::state::RootState;
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};

/// Concurrency rule for workers of one pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TakePolicy {
    /// Unlimited concurrent workers
    Every,
    /// Cancel the in-flight worker, then start a new one
    Latest,
    /// Ignore new matches while a worker is still running
    Leading,
}

impl TakePolicy {
    /// Lowercase label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Every => "every",
            Self::Latest => "latest",
            Self::Leading => "leading",
        }
    }
}

impl std::fmt::Display for TakePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an effect worker or program
pub type EffectResult = anyhow::Result<()>;

/// A type-erased worker: `(triggering action, context) -> future`
pub type Worker = Arc<dyn Fn(Action, EffectContext) -> BoxFuture<'static, EffectResult> + Send + Sync>;

/// A type-erased root program, started once with the store
pub type Program = Arc<dyn Fn(EffectContext) -> BoxFuture<'static, EffectResult> + Send + Sync>;

fn boxed_worker<F, Fut>(worker: F) -> Worker
where
    F: Fn(Action, EffectContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EffectResult> + Send + 'static,
{
    Arc::new(
        move |action: Action, ctx: EffectContext| -> BoxFuture<'static, EffectResult> {
            Box::pin(worker(action, ctx))
        },
    )
}

/// A worker bound to a namespaced pattern under a policy.
#[derive(Clone)]
pub struct EffectDescriptor {
    pattern: String,
    policy: TakePolicy,
    worker: Worker,
}

impl EffectDescriptor {
    /// Bind `worker` to actions whose type equals `pattern`
    #[must_use]
    pub fn new(pattern: impl Into<String>, policy: TakePolicy, worker: Worker) -> Self {
        Self {
            pattern: pattern.into(),
            policy,
            worker,
        }
    }

    /// The action type this descriptor reacts to
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The dispatch policy
    #[must_use]
    pub const fn policy(&self) -> TakePolicy {
        self.policy
    }

    /// Start the worker for `action`
    #[must_use]
    pub fn run(&self, action: Action, ctx: EffectContext) -> BoxFuture<'static, EffectResult> {
        (self.worker)(action, ctx)
    }
}

impl std::fmt::Debug for EffectDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectDescriptor")
            .field("pattern", &self.pattern)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Workers keyed by local action key, as returned by an effect creator.
#[derive(Default)]
pub struct EffectMap {
    workers: Vec<(String, Worker)>,
}

impl EffectMap {
    /// Start an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker for the local key `key`
    #[must_use]
    pub fn on<F, Fut>(mut self, key: impl Into<String>, worker: F) -> Self
    where
        F: Fn(Action, EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EffectResult> + Send + 'static,
    {
        self.workers.push((key.into(), boxed_worker(worker)));
        self
    }

    /// Consume into `(local key, worker)` pairs
    pub fn into_entries(self) -> impl Iterator<Item = (String, Worker)> {
        self.workers.into_iter()
    }

    /// Number of registered workers
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether no worker is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

/// Extra effect work handed to the store composer directly.
#[derive(Clone)]
pub enum EffectTask {
    /// A watcher on an already namespaced pattern
    Watch(EffectDescriptor),
    /// A routine started once when the store is created
    Program(Program),
}

impl EffectTask {
    fn watch<F, Fut>(pattern: impl Into<String>, policy: TakePolicy, worker: F) -> Self
    where
        F: Fn(Action, EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EffectResult> + Send + 'static,
    {
        Self::Watch(EffectDescriptor::new(pattern, policy, boxed_worker(worker)))
    }

    /// Run `worker` on every action of type `pattern`
    #[must_use]
    pub fn every<F, Fut>(pattern: impl Into<String>, worker: F) -> Self
    where
        F: Fn(Action, EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EffectResult> + Send + 'static,
    {
        Self::watch(pattern, TakePolicy::Every, worker)
    }

    /// Run `worker` on the latest action of type `pattern`
    #[must_use]
    pub fn latest<F, Fut>(pattern: impl Into<String>, worker: F) -> Self
    where
        F: Fn(Action, EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EffectResult> + Send + 'static,
    {
        Self::watch(pattern, TakePolicy::Latest, worker)
    }

    /// Run `worker` on an action of type `pattern` unless one is running
    #[must_use]
    pub fn leading<F, Fut>(pattern: impl Into<String>, worker: F) -> Self
    where
        F: Fn(Action, EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EffectResult> + Send + 'static,
    {
        Self::watch(pattern, TakePolicy::Leading, worker)
    }

    /// A routine that runs once, typically looping over [`EffectContext::take`]
    #[must_use]
    pub fn program<F, Fut>(program: F) -> Self
    where
        F: Fn(EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EffectResult> + Send + 'static,
    {
        Self::Program(Arc::new(
            move |ctx: EffectContext| -> BoxFuture<'static, EffectResult> { Box::pin(program(ctx)) },
        ))
    }
}

impl From<EffectDescriptor> for EffectTask {
    fn from(descriptor: EffectDescriptor) -> Self {
        Self::Watch(descriptor)
    }
}

impl std::fmt::Debug for EffectTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Watch(descriptor) => f.debug_tuple("EffectTask::Watch").field(descriptor).finish(),
            Self::Program(_) => write!(f, "EffectTask::Program(<program>)"),
        }
    }
}

/// What a running store offers to effect workers.
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` so it can be used as `Arc<dyn EffectRuntime>`.
pub trait EffectRuntime: Send + Sync {
    /// Dispatch an action through the store
    fn dispatch(
        &self,
        action: Action,
    ) -> Pin<Box<dyn Future<Output = Result<(), EffectError>> + Send + '_>>;

    /// Current state snapshot
    fn snapshot(&self) -> Pin<Box<dyn Future<Output = RootState> + Send + '_>>;

    /// Receiver of every action dispatched from now on
    fn subscribe(&self) -> broadcast::Receiver<Action>;
}

/// Handle given to every worker and program.
///
/// A context subscribes to the action stream when it is created and keeps
/// that subscription across [`take`](EffectContext::take) calls, so a loop
/// over `take` does not miss actions dispatched while it was busy. A clone
/// gets its own subscription, starting at the moment it was cloned.
pub struct EffectContext {
    runtime: Arc<dyn EffectRuntime>,
    actions: Mutex<broadcast::Receiver<Action>>,
}

impl Clone for EffectContext {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.runtime))
    }
}

impl EffectContext {
    /// Wrap a runtime and subscribe to its actions
    #[must_use]
    pub fn new(runtime: Arc<dyn EffectRuntime>) -> Self {
        let actions = Mutex::new(runtime.subscribe());
        Self { runtime, actions }
    }

    /// Dispatch `action` and wait until it has been reduced.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Dispatch`] when the store rejects the action.
    pub async fn put(&self, action: Action) -> Result<(), EffectError> {
        self.runtime.dispatch(action).await
    }

    /// Snapshot of the composed state
    pub async fn state(&self) -> RootState {
        self.runtime.snapshot().await
    }

    /// Evaluate a selector against the current state
    pub async fn select<T>(&self, selector: &Selector<T>) -> Option<T> {
        selector.select(&self.state().await)
    }

    /// Read one model's slice
    pub async fn fetch<S: Send + Sync + 'static>(&self, fetch: &Fetch<S>) -> Option<Arc<S>> {
        fetch.get(&self.state().await)
    }

    /// Wait for the next action of type `pattern`.
    ///
    /// Actions are read from the context's own subscription: the first call
    /// sees everything dispatched since the context was created, later calls
    /// continue where the previous one stopped. Non-matching actions read on
    /// the way are consumed.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::ChannelClosed`] if the store goes away.
    pub async fn take(&self, pattern: &str) -> Result<Action, EffectError> {
        self.take_matching(|action| action.kind() == pattern).await
    }

    /// Wait for the next action satisfying `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::ChannelClosed`] if the store goes away.
    pub async fn take_matching<P>(&self, predicate: P) -> Result<Action, EffectError>
    where
        P: Fn(&Action) -> bool,
    {
        let mut actions = self.actions.lock().await;
        loop {
            match actions.recv().await {
                Ok(action) if predicate(&action) => return Ok(action),
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Effect take lagged behind the action stream");
                },
                Err(broadcast::error::RecvError::Closed) => return Err(EffectError::ChannelClosed),
            }
        }
    }

    /// Suspend the worker for `duration`
    pub async fn delay(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

impl std::fmt::Debug for EffectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectContext").finish_non_exhaustive()
    }
}
