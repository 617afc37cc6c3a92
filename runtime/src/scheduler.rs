//! Effect worker scheduling.
//!
//! Every registered [`EffectDescriptor`] gets a watcher holding the join
//! handles of its running workers. On each dispatched action the watchers
//! whose pattern equals the action type apply their [`TakePolicy`].

use crate::AtomicCounterGuard;
use futures::future::BoxFuture;
use modelkit_core::action::Action;
use modelkit_core::effect::{EffectContext, EffectDescriptor, EffectResult, Program, TakePolicy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

struct Watcher {
    descriptor: EffectDescriptor,
    running: Mutex<Vec<JoinHandle<()>>>,
}

pub(crate) struct EffectScheduler {
    watchers: Vec<Watcher>,
    programs: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
}

impl EffectScheduler {
    pub(crate) fn new(descriptors: Vec<EffectDescriptor>) -> Self {
        let watchers = descriptors
            .into_iter()
            .map(|descriptor| Watcher {
                descriptor,
                running: Mutex::new(Vec::new()),
            })
            .collect();
        Self {
            watchers,
            programs: Mutex::new(Vec::new()),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Workers currently running (root programs excluded)
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Apply every matching watcher's policy to `action`.
    ///
    /// `context` is only called when a worker is actually spawned.
    pub(crate) fn notify<C>(&self, action: &Action, context: C)
    where
        C: Fn() -> EffectContext,
    {
        for watcher in self
            .watchers
            .iter()
            .filter(|watcher| watcher.descriptor.pattern() == action.kind())
        {
            let policy = watcher.descriptor.policy();
            let mut running = watcher.running.lock().unwrap_or_else(PoisonError::into_inner);
            running.retain(|handle| !handle.is_finished());

            match policy {
                TakePolicy::Every => {},
                TakePolicy::Latest => {
                    for handle in running.drain(..) {
                        handle.abort();
                        tracing::debug!(pattern = %action.kind(), "Cancelled in-flight worker");
                        metrics::counter!("effects.cancelled").increment(1);
                    }
                },
                TakePolicy::Leading => {
                    if !running.is_empty() {
                        tracing::debug!(pattern = %action.kind(), "Worker still running, action ignored");
                        metrics::counter!("effects.ignored").increment(1);
                        continue;
                    }
                },
            }

            let worker = watcher.descriptor.run(action.clone(), context());
            running.push(self.spawn(action.kind(), policy, worker));
            metrics::counter!("effects.spawned", "policy" => policy.as_str()).increment(1);
        }
    }

    fn spawn(
        &self,
        pattern: &str,
        policy: TakePolicy,
        worker: BoxFuture<'static, EffectResult>,
    ) -> JoinHandle<()> {
        let guard = AtomicCounterGuard::new(&self.pending);
        let pattern = pattern.to_string();
        tracing::trace!(%pattern, %policy, "Spawning effect worker");
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(error) = worker.await {
                tracing::error!(%pattern, %policy, error = %error, "Effect worker failed");
                metrics::counter!("effects.failed").increment(1);
            }
        })
    }

    /// Start a root program on `handle`
    pub(crate) fn start_program(&self, handle: &Handle, program: &Program, context: EffectContext) {
        let program = program(context);
        let task = handle.spawn(async move {
            if let Err(error) = program.await {
                tracing::error!(error = %error, "Effect program failed");
                metrics::counter!("effects.failed").increment(1);
            }
        });
        self.programs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    /// Abort every running worker and program, returning how many workers
    /// were still running
    pub(crate) fn abort_all(&self) -> usize {
        let mut aborted = 0;
        for watcher in &self.watchers {
            let mut running = watcher.running.lock().unwrap_or_else(PoisonError::into_inner);
            for handle in running.drain(..) {
                if !handle.is_finished() {
                    aborted += 1;
                }
                handle.abort();
            }
        }
        for program in self
            .programs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            program.abort();
        }
        aborted
    }
}
