//! 🧵 Workers: the ones who actually knock on the engine's door, over and over,
//! while the Supervisor takes all the credit in the sprint retro.
//!
//! 🚀 Everything a worker touches lives in [`PoolShared`], behind one `Arc`.
//! Only the work-source cursor, the stats counters, and the iteration claim counter
//! are ever written. The rest is read-only for the whole run. 🦆

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

mod query_worker;
pub(in crate::supervisors) use query_worker::QueryWorker;

use super::{StopCondition, StopReason};
use crate::query::RenderedQuery;
use crate::reporter::Reporter;
use crate::stats::StatsAggregator;
use crate::work_source::WorkSource;

/// 🏗️ A background worker, that does work. duh.
///
/// Returns a `JoinHandle` because we trust but verify. Mostly verify.
pub(in crate::supervisors) trait Worker {
    fn start(self) -> JoinHandle<StopReason>;
}

/// 📦 The pool's shared state. Built once by the Supervisor, cloned by `Arc` into every worker.
#[derive(Debug)]
pub(in crate::supervisors) struct PoolShared<C> {
    pub(in crate::supervisors) work_source: WorkSource,
    pub(in crate::supervisors) stats: Arc<StatsAggregator>,
    pub(in crate::supervisors) client: C,
    pub(in crate::supervisors) query: RenderedQuery,
    pub(in crate::supervisors) reporter: Reporter,
    pub(in crate::supervisors) query_timeout: Option<Duration>,
    pub(in crate::supervisors) stop: StopCondition,
    /// 🎟️ iteration tickets handed out so far; may overshoot the budget by at most one per worker
    pub(in crate::supervisors) issued: AtomicU64,
    pub(in crate::supervisors) shutdown: Arc<AtomicBool>,
    pub(in crate::supervisors) started_at: Instant,
}

impl<C> PoolShared<C> {
    /// 🛑 External stop first, then the clock. Checked only between attempts.
    pub(in crate::supervisors) fn stop_reason(&self) -> Option<StopReason> {
        if self.shutdown.load(Ordering::Acquire) {
            return Some(StopReason::Shutdown);
        }
        match self.stop.max_duration {
            Some(budget) if self.started_at.elapsed() >= budget => Some(StopReason::Deadline),
            _ => None,
        }
    }

    /// 🎟️ Take one iteration ticket. `false` once the pool-wide budget is spent.
    pub(in crate::supervisors) fn claim_iteration(&self) -> bool {
        match self.stop.max_iterations {
            Some(max) => self.issued.fetch_add(1, Ordering::AcqRel) < max,
            None => true,
        }
    }
}
