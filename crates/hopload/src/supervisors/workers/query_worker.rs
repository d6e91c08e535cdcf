//! 🎯 QueryWorker: draw, open, run, close, count, report, repeat.
//!
//! 🎬 *[the same worker, the same query, a different company every time.
//! it's Groundhog Day, but the groundhog is a Cypher statement.]*

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{PoolShared, Worker};
use crate::backends::{GraphClient, GraphSession, QueryResult};
use crate::common::AttemptReport;
use crate::error::AttemptError;
use crate::supervisors::StopReason;

pub(in crate::supervisors) struct QueryWorker<C> {
    worker_id: usize,
    shared: Arc<PoolShared<C>>,
}

impl<C: GraphClient + 'static> QueryWorker<C> {
    pub(in crate::supervisors) fn new(worker_id: usize, shared: Arc<PoolShared<C>>) -> Self {
        Self { worker_id, shared }
    }

    /// 🔄 One turn of the wheel. Every error stops here; none of them are fatal.
    async fn attempt(&self) {
        let shared = &self.shared;
        let entity = shared.work_source.next();
        let params = shared.query.params_for(&entity.id);

        let started = Instant::now();
        let outcome = self.execute(&params).await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match outcome {
            Ok(result) => {
                let size = shared.query.response_shape().result_size(&result);
                shared.stats.record_success(latency_ms, size);
                Ok(size)
            }
            Err(err) => {
                shared.stats.record_error(latency_ms);
                debug!(
                    "💀 worker {} failed on {} after {}ms (timeout: {}): {}",
                    self.worker_id,
                    entity.id,
                    latency_ms,
                    err.is_timeout(),
                    err
                );
                Err(err.to_string())
            }
        };

        shared.reporter.report(
            &AttemptReport {
                worker_id: self.worker_id,
                entity,
                latency_ms,
                outcome,
            },
            &shared.stats.snapshot(),
        );
    }

    /// 🎟️ Fresh session in, session closed out. No matter how `run` went.
    async fn execute(&self, params: &Value) -> Result<QueryResult, AttemptError> {
        let mut session = self.shared.client.open_session().await?;
        let result = session
            .run(self.shared.query.text(), params, self.shared.query_timeout)
            .await;
        session.close().await;
        Ok(result?)
    }
}

impl<C: GraphClient + 'static> Worker for QueryWorker<C> {
    fn start(self) -> JoinHandle<StopReason> {
        tokio::spawn(async move {
            trace!("🧵 worker {} reporting for duty", self.worker_id);
            let reason = loop {
                if let Some(reason) = self.shared.stop_reason() {
                    break reason;
                }
                if !self.shared.claim_iteration() {
                    break StopReason::IterationBudget;
                }
                self.attempt().await;
            };
            debug!("🏁 worker {} stopping: {}", self.worker_id, reason);
            reason
        })
    }
}
