//! Middleware around the root reducer.
//!
//! Middleware runs in registration order while the store holds its write
//! lock. `before_reduce` may rewrite an action or swallow it by returning
//! `None`; `after_reduce` observes the transition. Neither may dispatch.

use modelkit_core::action::Action;
use modelkit_core::state::RootState;
use std::sync::atomic::{AtomicU64, Ordering};

/// A hook pair around each reduction.
pub trait Middleware: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Inspect or rewrite `action` before it is reduced.
    ///
    /// Returning `None` swallows the action: no reducer, effect or later
    /// middleware sees it.
    fn before_reduce(&self, action: Action, _state: &RootState) -> Option<Action> {
        Some(action)
    }

    /// Observe a finished reduction
    fn after_reduce(&self, _action: &Action, _previous: &RootState, _next: &RootState) {}
}

/// Logs every action at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn before_reduce(&self, action: Action, _state: &RootState) -> Option<Action> {
        tracing::debug!(action = %action.kind(), payload = %action.payload(), "Dispatching action");
        Some(action)
    }
}

/// Reports which slices each action changed.
///
/// Installed by the store composer when inspection is enabled.
#[derive(Debug, Default)]
pub struct InspectMiddleware {
    sequence: AtomicU64,
}

impl InspectMiddleware {
    /// Create the middleware with its sequence counter at zero
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
        }
    }

    /// Number of actions observed so far
    #[must_use]
    pub fn observed(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl Middleware for InspectMiddleware {
    fn name(&self) -> &str {
        "inspect"
    }

    fn after_reduce(&self, action: &Action, previous: &RootState, next: &RootState) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let changed = next.changed_since(previous);
        tracing::info!(
            sequence,
            action = %action.kind(),
            changed = ?changed,
            "State inspection"
        );
    }
}
