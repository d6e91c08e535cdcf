//! # Previously, on Hopload...
//!
//! 🎬 The engine was down. Or it was never up. Or someone's laptop was on a plane.
//! Either way, the workers still needed somebody to ask. Enter the pretend engine:
//! it answers every question in exactly the latency you told it to, remembers every
//! id it was asked about, and never once complains about memory limits.
//!
//! ✅ No network. No disk. No Cypher parser. It doesn't even read the query.
//! It reads `$id`, sleeps, and hands back a made-up supply chain of the shape you asked for.
//!
//! ⚠️ Tests and dry runs only. If this is in your prod config, the dashboard is lying to you.
//!
//! 🦆

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::{GraphClient, GraphSession, QueryResult};
use crate::error::{ConnectionError, QueryError};
use crate::query::ResponseShape;

/// 🔧 The script the pretend engine follows.
#[derive(Debug, Clone)]
pub struct InMemoryGraphConfig {
    /// ⏱️ how long every query "takes"
    pub latency: Duration,
    pub response_shape: ResponseShape,
    /// 📏 how many suppliers each entity pretends to have
    pub result_size: u64,
    /// 💀 entity ids whose query always fails
    pub failing_entities: HashSet<String>,
    /// 📡 refuse every session, as if nobody is listening
    pub unreachable: bool,
}

impl Default for InMemoryGraphConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(5),
            response_shape: ResponseShape::default(),
            result_size: 3,
            failing_entities: HashSet::new(),
            unreachable: false,
        }
    }
}

/// 🧪 The pretend engine. Clone it before handing it to the pool; every clone shares
/// the same recorder, so the test keeps a window into what the workers did.
#[derive(Debug, Clone)]
pub struct InMemoryGraphClient {
    config: Arc<InMemoryGraphConfig>,
    /// 🔒 every `$id` that reached `run`, in arrival order
    executed: Arc<Mutex<Vec<String>>>,
    opened: Arc<AtomicU64>,
    closed: Arc<AtomicU64>,
}

impl InMemoryGraphClient {
    pub fn new(config: InMemoryGraphConfig) -> Self {
        Self {
            config: Arc::new(config),
            executed: Arc::new(Mutex::new(Vec::new())),
            opened: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 📋 Snapshot of every entity id queried so far.
    pub async fn executed(&self) -> Vec<String> {
        self.executed.lock().await.clone()
    }

    pub fn sessions_opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    pub fn sessions_closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl GraphClient for InMemoryGraphClient {
    type Session = InMemorySession;

    async fn open_session(&self) -> Result<InMemorySession, ConnectionError> {
        if self.config.unreachable {
            return Err(ConnectionError::new(
                "in-memory engine is configured as unreachable",
            ));
        }
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(InMemorySession {
            config: Arc::clone(&self.config),
            executed: Arc::clone(&self.executed),
            closed_counter: Arc::clone(&self.closed),
            closed: false,
        })
    }
}

/// 🎟️ One pretend session.
#[derive(Debug)]
pub struct InMemorySession {
    config: Arc<InMemoryGraphConfig>,
    executed: Arc<Mutex<Vec<String>>>,
    closed_counter: Arc<AtomicU64>,
    closed: bool,
}

#[async_trait]
impl GraphSession for InMemorySession {
    async fn run(
        &mut self,
        _query: &str,
        params: &Value,
        timeout: Option<Duration>,
    ) -> Result<QueryResult, QueryError> {
        if self.closed {
            return Err(QueryError::failed("session already closed"));
        }
        let id = params
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| QueryError::failed("missing $id parameter"))?
            .to_string();
        self.executed.lock().await.push(id.clone());

        match timeout {
            Some(limit) if limit < self.config.latency => {
                tokio::time::sleep(limit).await;
                return Err(QueryError::timed_out(format!(
                    "no answer within {}ms",
                    limit.as_millis()
                )));
            }
            _ => tokio::time::sleep(self.config.latency).await,
        }

        if self.config.failing_entities.contains(&id) {
            return Err(QueryError::failed(format!("scripted failure for {id}")));
        }

        Ok(fabricate(&id, self.config.response_shape, self.config.result_size))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closed_counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// 🏭 A one-row answer in the requested shape. Counts mirror the list lengths.
fn fabricate(id: &str, shape: ResponseShape, size: u64) -> QueryResult {
    let nodes = || {
        Value::Array(
            (0..size)
                .map(|i| json!({"id": format!("{id}-supplier-{i}")}))
                .collect(),
        )
    };
    let edges = || {
        Value::Array(
            (0..size)
                .map(|i| json!({"from": format!("{id}-supplier-{i}"), "to": id}))
                .collect(),
        )
    };
    let row = match shape {
        ResponseShape::Graph => vec![nodes(), edges()],
        ResponseShape::GraphAndPaths => {
            let paths = Value::Array((0..size).map(|i| json!([i])).collect());
            vec![nodes(), edges(), paths]
        }
        ResponseShape::Count => vec![json!(size)],
        ResponseShape::CountNodesAndEdges => vec![json!(size), json!(size)],
    };
    QueryResult::new(
        shape.columns().iter().map(|c| c.to_string()).collect(),
        vec![row],
    )
}
