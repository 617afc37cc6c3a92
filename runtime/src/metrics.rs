//! Prometheus metrics for observability and monitoring.
//!
//! The store records through the `metrics` facade:
//! - Dispatch counts and reducer latency
//! - Effect worker spawns, cancellations, ignored matches and failures
//! - Persistence writes and rehydrations
//! - Shutdown progress
//!
//! Nothing is exported until a recorder is installed, for example with
//! [`MetricsExporter::install`].
//!
//! # Example
//!
//! ```rust,no_run
//! use modelkit_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // ... run the store ...
//!
//! if let Some(text) = exporter.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder for the store's metrics.
///
/// Renders the Prometheus text format on demand; serving it is left to the
/// embedding application.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that is not installed yet
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all store metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// Only one global recorder can exist. If one is already installed
    /// (e.g., in tests), this logs a warning, succeeds, and [`render`]
    /// returns `None`.
    ///
    /// [`render`]: MetricsExporter::render
    pub fn install(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            // Latency buckets for reducer timings
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                register_metrics();
                tracing::info!("Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") || err_msg.contains("already installed") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Store
    describe_counter!(
        "store.actions.dispatched",
        "Total number of actions reduced by the store"
    );
    describe_histogram!(
        "store.reducer.duration_seconds",
        "Time taken by the root reducer per action"
    );
    describe_counter!(
        "store.shutdown.rejected_actions",
        "Actions rejected because the store was shutting down"
    );
    describe_counter!("store.shutdown.initiated", "Shutdowns started");
    describe_counter!("store.shutdown.completed", "Shutdowns that drained all workers");
    describe_counter!("store.shutdown.timeout", "Shutdowns that had to abort workers");

    // Effects
    describe_counter!(
        "effects.spawned",
        "Effect workers started, labelled by take policy"
    );
    describe_counter!(
        "effects.cancelled",
        "Workers aborted because a newer action arrived (latest)"
    );
    describe_counter!(
        "effects.ignored",
        "Matching actions ignored because a worker was running (leading)"
    );
    describe_counter!(
        "effects.failed",
        "Effect workers and programs that returned an error"
    );

    // Persistence
    describe_counter!("persist.writes", "Persisted state writes");
    describe_counter!("persist.rehydrated", "Completed rehydrations");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_creation() {
        let exporter = MetricsExporter::new();
        assert!(exporter.handle().is_none());
        assert!(exporter.render().is_none());
    }

    #[test]
    fn test_exporter_render() {
        let mut exporter = MetricsExporter::new();
        assert!(exporter.install().is_ok());

        metrics::counter!("store.actions.dispatched").increment(3);
        metrics::counter!("effects.spawned", "policy" => "latest").increment(1);

        // handle is None if another test installed the recorder first
        if let Some(rendered) = exporter.render() {
            assert!(rendered.contains("store_actions_dispatched"));
            assert!(rendered.contains("effects_spawned"));
        }
    }
}
