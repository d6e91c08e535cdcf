//! 🚀 hopload: keep a graph engine busy with four-hop supply chain traversals
//! and tell everyone how it's holding up.
//!
//! 🧠 Knowledge graph:
//! - `app_config` → what to run, for how long, against what
//! - `work_source` → which company is next
//! - `query` → the one Cypher text for this process
//! - `backends` → where the text gets sent
//! - `supervisors` → the worker pool
//! - `stats` + `reporter` → the numbers and the lines they end up on
//!
//! 🦆

pub mod app_config;
pub mod backends;
pub mod common;
pub mod error;
pub mod query;
pub mod reporter;
pub mod stats;
pub mod supervisors;
pub mod work_source;

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use tracing::{error, info, warn};

use crate::app_config::AppConfig;
use crate::query::QueryTemplateBuilder;
use crate::reporter::Reporter;
use crate::supervisors::{PoolHandle, RunSummary, Supervisor};
use crate::work_source::WorkSource;

pub use crate::backends::{GraphClient, GraphSession};
pub use crate::stats::{StatsAggregator, StatsSnapshot};

/// 🎬 initializing → running → draining → terminated, against the configured engine.
///
/// Everything that can be wrong with the config or the input file is found before
/// the first worker starts. The first Ctrl+C asks the pool to drain and in-flight
/// queries finish; a second one abandons them.
pub async fn run(app_config: AppConfig) -> Result<RunSummary> {
    let client = app_config
        .build_backend()
        .context("💀 Could not set up the graph engine client")?;
    run_with(app_config, client).await
}

/// 🎭 Same as [`run`], with the engine client handed in.
pub async fn run_with<C>(app_config: AppConfig, client: C) -> Result<RunSummary>
where
    C: GraphClient + 'static,
{
    let query = QueryTemplateBuilder::new(app_config.query_config())
        .build()
        .context("💀 The query template refused to render. Check the QUERY_* settings.")?;
    info!(
        "🧬 Query rendered once ({} shape, {} bytes)",
        query.response_shape(),
        query.text().len()
    );

    let work_source = WorkSource::load(
        &app_config.entities_file,
        app_config.weight_filter(),
        app_config.entity_order,
    )
    .await
    .with_context(|| {
        format!(
            "💀 Could not build the entity rotation from '{}'",
            app_config.entities_file.display()
        )
    })?;

    let supervisor = Supervisor::new(
        work_source,
        client,
        query,
        Reporter::stdio(app_config.quiet),
        app_config.pool_settings(),
    );

    let ctrl_c = tokio::spawn(escalate_interrupts(
        Box::pin(ctrl_c_presses()),
        supervisor.handle(),
    ));
    let summary = supervisor.run().await;
    ctrl_c.abort();
    summary.context("💀 The worker pool did not shut down cleanly")
}

/// ⌨️ One item per Ctrl+C, until the signal can't be listened to anymore.
fn ctrl_c_presses() -> impl Stream<Item = ()> {
    futures::stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    })
}

/// 🛑 First interrupt drains, second one aborts.
async fn escalate_interrupts<S>(mut interrupts: S, handle: PoolHandle)
where
    S: Stream<Item = ()> + Unpin,
{
    if interrupts.next().await.is_none() {
        return;
    }
    warn!("🛑 Ctrl+C received, letting in-flight queries finish. Press it again to abort.");
    handle.stop();

    if interrupts.next().await.is_some() {
        error!("🪓 Ctrl+C again, abandoning in-flight queries");
        handle.abort();
    }
}
