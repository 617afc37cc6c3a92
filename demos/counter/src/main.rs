//! Counter example binary
//!
//! Runs the counter scenario against a persisted store.
//!
//! Environment:
//! - `RUST_LOG`: log filter (default `counter=debug,modelkit_runtime=info`)
//! - `MODELKIT_ENV=development` with `MODELKIT_INSPECT=1`: log state inspection
//! - `MODELKIT_METRICS`: print Prometheus metrics before exiting
//! - `COUNTER_STATE_DIR`: where state is persisted (default: the temp dir)

use counter::{Timing, counter};
use modelkit_core::action::Action;
use modelkit_core::effect::EffectTask;
use modelkit_runtime::metrics::MetricsExporter;
use modelkit_runtime::{FileStorage, PersistConfig, Store};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "counter=debug,modelkit_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut exporter = MetricsExporter::new();
    if std::env::var_os("MODELKIT_METRICS").is_some() {
        exporter.install()?;
    }

    println!("=== Counter Example: modelkit ===\n");

    let timing = Timing {
        settle: Duration::from_millis(100),
        cooldown: Duration::from_millis(300),
    };
    let model = counter(timing);
    let actions = model.action().clone();
    let selectors = model.selector().clone();

    let dir = std::env::var_os("COUNTER_STATE_DIR").map_or_else(std::env::temp_dir, Into::into);
    let storage = Arc::new(FileStorage::new(dir));

    let created = Store::of([model])
        .persist(PersistConfig::new("counter-demo", storage).with_whitelist(["counter"]))
        .add_effect_task(EffectTask::every("counter/settled", |action: Action, _| async move {
            tracing::info!(value = %action.payload(), "Observed settled counter");
            Ok(())
        }))
        .create()?;
    let store = created.store;

    if let Some(persistor) = &created.persistor {
        persistor.ready().await;
    }
    println!("Restored value: {:?}", store.select(&selectors.value).await);

    let bound = store.bind(&actions);
    bound.dispatch("reset", ()).await?;
    println!("Count after reset: {:?}", store.select(&selectors.value).await);

    println!("\n>>> Dispatching: increase(4)");
    bound.dispatch("increase", (4_i64,)).await?;
    println!("Count: {:?}", store.select(&selectors.value).await);

    println!("\n>>> Dispatching: decrease(2)");
    bound.dispatch("decrease", (2_i64,)).await?;
    println!("Count: {:?}", store.select(&selectors.value).await);

    println!("\n>>> Dispatching: increase(1) twice, only the last one settles");
    bound.dispatch("increase", (1_i64,)).await?;
    bound.dispatch("increase", (1_i64,)).await?;
    store.wait_for_effects(Duration::from_secs(2)).await?;
    println!("Count: {:?}", store.select(&selectors.value).await);
    println!("Negative: {:?}", store.select(&selectors.negative).await);

    if let Some(persistor) = &created.persistor {
        persistor.flush().await?;
        println!("\nPersisted: {:?}", persistor.state());
    }

    store.close().await?;

    if let Some(rendered) = exporter.render() {
        println!("\n=== Metrics ===\n{rendered}");
    }

    println!("\n=== Done ===");
    Ok(())
}
