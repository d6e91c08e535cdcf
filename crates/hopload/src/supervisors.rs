//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 *[eighteen fans spin up in unison]*
//! 🎬 "In a world where every query must be answered..."
//! 🎬 "One supervisor spawned them all, and waited for every last one to come home."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor owns the worker pool: it spawns exactly `concurrency` workers,
//! hands each one the same shared state, and joins all of them before it reports back.
//!
//! 🧠 Knowledge graph:
//! - stop conditions (deadline, iteration budget, external stop) are checked by each
//!   worker at the top of its loop, never mid-query
//! - the iteration budget is a pool-wide claim counter, so `COUNT=10` means exactly 10
//! - a worker that panics is a [`PoolError::WorkerFault`], reported after its siblings finish
//! - [`PoolHandle::abort`] is the one exception to "never mid-query": in-flight work is cancelled
//!   and the run ends in [`PoolError::Aborted`]
//!
//! ⚠️ WORKERS ARE THE SUPERVISOR'S PRIVATE LITTLE MINIONS. `workers` stays private.

mod workers;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};

use crate::backends::GraphClient;
use crate::error::PoolError;
use crate::query::RenderedQuery;
use crate::reporter::Reporter;
use crate::stats::{StatsAggregator, StatsSnapshot};
use crate::work_source::WorkSource;
use workers::{PoolShared, QueryWorker, Worker};

/// 🛑 When the pool should stop. Both unset means "until somebody hits Ctrl+C".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopCondition {
    /// ⏱️ wall-clock budget measured from pool start
    pub max_duration: Option<Duration>,
    /// 🔢 total attempts across every worker
    pub max_iterations: Option<u64>,
}

/// 🏁 Why a worker went home.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    Deadline,
    IterationBudget,
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopReason::Deadline => "deadline",
            StopReason::IterationBudget => "iteration budget",
            StopReason::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// 🎛️ Knobs for the pool itself.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub concurrency: usize,
    /// per-query timeout handed to every `run`
    pub query_timeout: Option<Duration>,
    pub stop: StopCondition,
}

/// 🚨 Asks every worker to stop after its current attempt, or, when that isn't
/// enough, cancels them where they stand. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct PoolHandle {
    shutdown: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
    abort_requested: Arc<Notify>,
}

impl PoolHandle {
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// 🪓 Stop, and don't wait for in-flight queries either.
    pub fn abort(&self) {
        self.stop();
        self.aborted.store(true, Ordering::Release);
        // -- one waiter (the supervisor); the permit is kept if it isn't waiting yet
        self.abort_requested.notify_one();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

/// 📋 Everything the pool has to say once it's done.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub snapshot: StatsSnapshot,
    pub latency_range: Option<(u64, u64)>,
    /// one entry per worker, in worker-id order
    pub stop_reasons: Vec<StopReason>,
    pub wall_time: Duration,
}

/// 📦 The Supervisor: spawns the workers, waits for the workers, counts the workers.
#[derive(Debug)]
pub struct Supervisor<C: GraphClient> {
    work_source: WorkSource,
    client: C,
    query: RenderedQuery,
    reporter: Reporter,
    settings: PoolSettings,
    handle: PoolHandle,
}

impl<C: GraphClient + 'static> Supervisor<C> {
    pub fn new(
        work_source: WorkSource,
        client: C,
        query: RenderedQuery,
        reporter: Reporter,
        settings: PoolSettings,
    ) -> Self {
        Self {
            work_source,
            client,
            query,
            reporter,
            settings,
            handle: PoolHandle::default(),
        }
    }

    /// 🚨 Grab this before `run` to be able to stop the pool from outside.
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// 🧵 Unleash the workers, then wait for every single one of them (unless aborted).
    pub async fn run(self) -> Result<RunSummary, PoolError> {
        let started_at = Instant::now();
        let concurrency = self.settings.concurrency.max(1);
        info!(
            "🚀 Starting {} workers over {} entities (stop: {:?}, timeout: {:?})",
            concurrency,
            self.work_source.len(),
            self.settings.stop,
            self.settings.query_timeout
        );

        let abort_requested = Arc::clone(&self.handle.abort_requested);
        let stats = Arc::new(StatsAggregator::started(started_at));
        let shared = Arc::new(PoolShared {
            work_source: self.work_source,
            stats: Arc::clone(&stats),
            client: self.client,
            query: self.query,
            reporter: self.reporter,
            query_timeout: self.settings.query_timeout,
            stop: self.settings.stop,
            issued: AtomicU64::new(0),
            shutdown: self.handle.shutdown,
            started_at,
        });

        let handles: Vec<JoinHandle<StopReason>> = (0..concurrency)
            .map(|worker_id| QueryWorker::new(worker_id, Arc::clone(&shared)).start())
            .collect();

        let cancel: Vec<AbortHandle> = handles.iter().map(JoinHandle::abort_handle).collect();
        let joined = tokio::select! {
            biased;
            () = abort_requested.notified() => {
                for worker in &cancel {
                    worker.abort();
                }
                let attempts = stats.snapshot().total;
                warn!("🪓 Pool aborted after {} attempts, in-flight queries abandoned", attempts);
                return Err(PoolError::Aborted { attempts });
            }
            joined = futures::future::join_all(handles) => joined,
        };

        let mut stop_reasons = Vec::with_capacity(concurrency);
        let mut first_fault = None;
        for (worker_id, joined) in joined.into_iter().enumerate() {
            match joined {
                Ok(reason) => stop_reasons.push(reason),
                Err(join_error) => {
                    error!("💥 worker {} died: {}", worker_id, join_error);
                    first_fault.get_or_insert(PoolError::WorkerFault {
                        worker_id,
                        reason: join_error.to_string(),
                    });
                }
            }
        }
        if let Some(fault) = first_fault {
            return Err(fault);
        }

        let wall_time = started_at.elapsed();
        let summary = RunSummary {
            snapshot: stats.snapshot_over(wall_time),
            latency_range: stats.latency_range(),
            stop_reasons,
            wall_time,
        };
        info!(
            "🏁 All {} workers joined after {:?}: {} attempts",
            concurrency, wall_time, summary.snapshot.total
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryGraphClient, InMemoryGraphConfig};
    use crate::common::Entity;
    use crate::query::{QueryConfig, QueryTemplateBuilder};
    use crate::work_source::{EntityOrder, WeightFilter};
    use std::collections::HashSet;

    fn abc_source() -> WorkSource {
        WorkSource::from_entities(
            vec![
                Entity::new("A", 10_000),
                Entity::new("B", 1),
                Entity::new("C", 6_000),
            ],
            WeightFilter::strictly_above(5_000),
            EntityOrder::LoadOrder,
        )
        .expect("💀 A and C clear the bar")
    }

    fn query() -> RenderedQuery {
        QueryTemplateBuilder::new(QueryConfig::default())
            .build()
            .expect("💀 default query config must render")
    }

    fn settings(concurrency: usize, stop: StopCondition) -> PoolSettings {
        PoolSettings {
            concurrency,
            query_timeout: None,
            stop,
        }
    }

    fn engine(latency: Duration) -> InMemoryGraphClient {
        InMemoryGraphClient::new(InMemoryGraphConfig {
            latency,
            ..InMemoryGraphConfig::default()
        })
    }

    fn supervisor(
        client: &InMemoryGraphClient,
        settings: PoolSettings,
    ) -> Supervisor<InMemoryGraphClient> {
        Supervisor::new(abc_source(), client.clone(), query(), Reporter::silent(), settings)
    }

    #[tokio::test]
    async fn the_one_where_a_lone_worker_walks_a_c_a_c() -> anyhow::Result<()> {
        let client = engine(Duration::ZERO);
        let stop = StopCondition {
            max_iterations: Some(4),
            ..StopCondition::default()
        };
        let summary = supervisor(&client, settings(1, stop)).run().await?;

        assert_eq!(client.executed().await, vec!["A", "C", "A", "C"]);
        assert_eq!(summary.snapshot.total, 4);
        assert_eq!(summary.snapshot.success, 4);
        assert_eq!(summary.stop_reasons, vec![StopReason::IterationBudget]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn the_one_where_ten_means_exactly_ten() -> anyhow::Result<()> {
        let client = engine(Duration::from_millis(2));
        let stop = StopCondition {
            max_iterations: Some(10),
            ..StopCondition::default()
        };
        let summary = supervisor(&client, settings(4, stop)).run().await?;

        assert_eq!(summary.snapshot.total, 10);
        assert_eq!(client.executed().await.len(), 10);
        assert_eq!(client.sessions_opened(), 10);
        assert_eq!(client.sessions_closed(), 10);
        assert_eq!(summary.stop_reasons.len(), 4);
        assert!(
            summary
                .stop_reasons
                .iter()
                .all(|r| *r == StopReason::IterationBudget)
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn the_one_where_the_deadline_lets_in_flight_work_finish() -> anyhow::Result<()> {
        let latency = Duration::from_millis(50);
        let client = engine(latency);
        let stop = StopCondition {
            max_duration: Some(Duration::from_secs(1)),
            ..StopCondition::default()
        };
        let summary = supervisor(&client, settings(3, stop)).run().await?;

        assert!(summary.wall_time >= Duration::from_secs(1));
        // -- ⏱️ one query's latency past the deadline, plus a little scheduler slack
        assert!(
            summary.wall_time < Duration::from_secs(1) + latency + Duration::from_millis(250),
            "wall time {:?} overshot the deadline",
            summary.wall_time
        );
        assert!(summary.stop_reasons.iter().all(|r| *r == StopReason::Deadline));
        assert_eq!(client.sessions_opened(), client.sessions_closed());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_failures_are_counted_and_sessions_still_close() -> anyhow::Result<()> {
        let client = InMemoryGraphClient::new(InMemoryGraphConfig {
            latency: Duration::ZERO,
            failing_entities: HashSet::from(["C".to_string()]),
            ..InMemoryGraphConfig::default()
        });
        let stop = StopCondition {
            max_iterations: Some(6),
            ..StopCondition::default()
        };
        let summary = supervisor(&client, settings(1, stop)).run().await?;

        assert_eq!(summary.snapshot.success, 3);
        assert_eq!(summary.snapshot.error, 3);
        assert_eq!(client.sessions_closed(), 6);
        // -- 🔁 no immediate retry: C only comes back on its next natural turn
        assert_eq!(client.executed().await, vec!["A", "C", "A", "C", "A", "C"]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_engine_never_picks_up() -> anyhow::Result<()> {
        let client = InMemoryGraphClient::new(InMemoryGraphConfig {
            unreachable: true,
            ..InMemoryGraphConfig::default()
        });
        let stop = StopCondition {
            max_iterations: Some(5),
            ..StopCondition::default()
        };
        let summary = supervisor(&client, settings(2, stop)).run().await?;

        assert_eq!(summary.snapshot.total, 5);
        assert_eq!(summary.snapshot.error, 5);
        assert_eq!(client.sessions_opened(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_slow_queries_time_out() -> anyhow::Result<()> {
        let client = engine(Duration::from_millis(200));
        let pool = PoolSettings {
            concurrency: 2,
            query_timeout: Some(Duration::from_millis(10)),
            stop: StopCondition {
                max_iterations: Some(4),
                ..StopCondition::default()
            },
        };
        let summary = supervisor(&client, pool).run().await?;

        assert_eq!(summary.snapshot.error, 4);
        assert_eq!(client.sessions_closed(), 4);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn the_one_where_somebody_pulls_the_plug() -> anyhow::Result<()> {
        let client = engine(Duration::from_millis(5));
        let pool = supervisor(&client, settings(3, StopCondition::default()));
        let handle = pool.handle();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.stop();
        });
        let summary = pool.run().await?;
        stopper.await?;

        assert!(summary.snapshot.total > 0);
        assert_eq!(summary.stop_reasons, vec![StopReason::Shutdown; 3]);
        assert_eq!(client.sessions_opened(), client.sessions_closed());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_abort_does_not_wait_for_the_slow_ones() -> anyhow::Result<()> {
        // -- 🐌 a minute per query and no timeout: a plain stop would hang here
        let client = engine(Duration::from_secs(60));
        let pool = supervisor(&client, settings(2, StopCondition::default()));
        let handle = pool.handle();

        let aborter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.abort();
        });
        let outcome = tokio::time::timeout(Duration::from_secs(5), pool.run()).await?;
        aborter.await?;

        assert!(matches!(outcome, Err(PoolError::Aborted { attempts: 0 })));
        assert_eq!(client.sessions_opened(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_abort_before_the_start_still_lands() -> anyhow::Result<()> {
        let client = engine(Duration::from_secs(60));
        let pool = supervisor(&client, settings(1, StopCondition::default()));
        pool.handle().abort();

        let outcome = tokio::time::timeout(Duration::from_secs(5), pool.run()).await?;
        assert!(matches!(outcome, Err(PoolError::Aborted { .. })));
        Ok(())
    }

    /// 💥 A client whose sessions explode on one particular entity.
    #[derive(Debug)]
    struct GrenadeClient;

    #[derive(Debug)]
    struct GrenadeSession;

    #[async_trait::async_trait]
    impl GraphClient for GrenadeClient {
        type Session = GrenadeSession;

        async fn open_session(&self) -> Result<GrenadeSession, crate::error::ConnectionError> {
            Ok(GrenadeSession)
        }
    }

    #[async_trait::async_trait]
    impl crate::backends::GraphSession for GrenadeSession {
        async fn run(
            &mut self,
            _query: &str,
            params: &serde_json::Value,
            _timeout: Option<Duration>,
        ) -> Result<crate::backends::QueryResult, crate::error::QueryError> {
            if params["id"] == "C" {
                panic!("💥 the pin was pulled on C");
            }
            Ok(crate::backends::QueryResult::default())
        }

        async fn close(&mut self) {}
    }

    #[tokio::test]
    async fn the_one_where_a_panicking_worker_is_a_fault_not_a_failure() {
        let stop = StopCondition {
            max_iterations: Some(6),
            ..StopCondition::default()
        };
        let pool = Supervisor::new(abc_source(), GrenadeClient, query(), Reporter::silent(), settings(2, stop));
        let err = pool
            .run()
            .await
            .expect_err("💀 a panicked worker must surface as a fault");
        assert!(matches!(err, PoolError::WorkerFault { .. }));
    }
}
