//! 🔌 Backends: where the query actually leaves the building.
//!
//! 📡 A [`GraphClient`] opens sessions. A [`GraphSession`] runs one query and closes.
//! That's the whole contract. What the engine does in between is its business,
//! not ours: we see latency and either rows or a failure.
//!
//! 🎭 This module is the casting agency. Need a real engine over Bolt? Got it.
//! Same engine family behind the HTTP transactional endpoint? Also got it.
//! And a pretend engine that answers in exactly 5ms and remembers every id it
//! was asked about? Yep. The workers never know which one they got.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConnectionError, QueryError};

pub mod bolt;
pub mod http;
pub mod in_mem;

pub use bolt::{BoltGraphClient, BoltGraphConfig};
pub use http::{HttpGraphClient, HttpGraphConfig};
pub use in_mem::{InMemoryGraphClient, InMemoryGraphConfig};

// ===== Results =====

/// 📦 What came back: column names plus rows of JSON values.
///
/// Our queries aggregate everything into a single record, so most callers only ever
/// want [`QueryResult::first_record`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_record(&self) -> Option<Record<'_>> {
        self.rows.first().map(|values| Record {
            columns: &self.columns,
            values,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(|values| Record {
            columns: &self.columns,
            values,
        })
    }
}

/// 🔎 One row, readable by column name.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Record<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values.get(index)
    }

    /// 📏 Length of a returned collection, if the column holds one.
    pub fn list_len(&self, column: &str) -> Option<usize> {
        self.get(column)?.as_array().map(Vec::len)
    }

    /// 🔢 A returned count, if the column holds an integer.
    pub fn integer(&self, column: &str) -> Option<i64> {
        self.get(column)?.as_i64()
    }
}

// ===== Traits =====

/// 🚪 Opens sessions. Shared by every worker, so it must be `Send + Sync`.
#[async_trait]
pub trait GraphClient: std::fmt::Debug + Send + Sync {
    type Session: GraphSession;

    /// 📡 Open a fresh single-use session, or explain why the engine isn't answering.
    async fn open_session(&self) -> Result<Self::Session, ConnectionError>;
}

/// 🎟️ One session, one worker, one iteration. Never shared, never reused.
///
/// # Contract
/// - `run` executes the query with the given parameters, giving up after `timeout` if set.
/// - `close` is idempotent and must be safe after a failed `run`. It never fails loudly.
#[async_trait]
pub trait GraphSession: std::fmt::Debug + Send {
    async fn run(
        &mut self,
        query: &str,
        params: &Value,
        timeout: Option<Duration>,
    ) -> Result<QueryResult, QueryError>;

    async fn close(&mut self);
}

// ===== Backend enums =====

/// 🎛️ Which engine to talk to. Comes straight out of config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineKind {
    /// ⚡ a real engine speaking Bolt, the native protocol on 7687
    #[default]
    Bolt,
    /// 📡 a real engine behind the HTTP transactional endpoint
    Http,
    /// 🧪 the scripted pretend engine
    InMemory,
}

/// 🎭 The many faces of a graph client. Dispatches to the concrete one.
#[derive(Debug)]
pub enum GraphBackend {
    Bolt(BoltGraphClient),
    Http(HttpGraphClient),
    InMemory(InMemoryGraphClient),
}

/// 🎭 ...and the many faces of the sessions they hand out.
#[derive(Debug)]
pub enum GraphSessionBackend {
    Bolt(bolt::BoltSession),
    Http(http::HttpSession),
    InMemory(in_mem::InMemorySession),
}

#[async_trait]
impl GraphClient for GraphBackend {
    type Session = GraphSessionBackend;

    async fn open_session(&self) -> Result<GraphSessionBackend, ConnectionError> {
        match self {
            GraphBackend::Bolt(client) => client.open_session().await.map(GraphSessionBackend::Bolt),
            GraphBackend::Http(client) => client.open_session().await.map(GraphSessionBackend::Http),
            GraphBackend::InMemory(client) => client
                .open_session()
                .await
                .map(GraphSessionBackend::InMemory),
        }
    }
}

#[async_trait]
impl GraphSession for GraphSessionBackend {
    async fn run(
        &mut self,
        query: &str,
        params: &Value,
        timeout: Option<Duration>,
    ) -> Result<QueryResult, QueryError> {
        match self {
            GraphSessionBackend::Bolt(session) => session.run(query, params, timeout).await,
            GraphSessionBackend::Http(session) => session.run(query, params, timeout).await,
            GraphSessionBackend::InMemory(session) => session.run(query, params, timeout).await,
        }
    }

    async fn close(&mut self) {
        match self {
            GraphSessionBackend::Bolt(session) => session.close().await,
            GraphSessionBackend::Http(session) => session.close().await,
            GraphSessionBackend::InMemory(session) => session.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_records_are_read_by_name() {
        let result = QueryResult::new(
            vec!["nodes".into(), "nodeCount".into()],
            vec![vec![json!(["a", "b"]), json!(7)]],
        );
        let record = result.first_record().expect("💀 one row went in, zero came out");
        assert_eq!(record.list_len("nodes"), Some(2));
        assert_eq!(record.integer("nodeCount"), Some(7));
        assert_eq!(record.integer("nodes"), None);
        assert_eq!(record.get("ghost"), None);
        assert_eq!(result.records().count(), 1);
    }

    #[test]
    fn the_one_where_an_empty_result_has_no_first_record() {
        let result = QueryResult::new(vec!["nodes".into()], vec![]);
        assert!(result.is_empty());
        assert!(result.first_record().is_none());
    }

    #[test]
    fn the_one_where_bolt_is_the_default_engine() {
        assert_eq!(EngineKind::default(), EngineKind::Bolt);
    }

    #[tokio::test]
    async fn the_one_where_the_enum_dispatches_to_the_pretend_engine() -> anyhow::Result<()> {
        let backend = GraphBackend::InMemory(InMemoryGraphClient::new(InMemoryGraphConfig {
            latency: Duration::ZERO,
            ..InMemoryGraphConfig::default()
        }));
        let mut session = backend.open_session().await?;
        let result = session.run("RETURN 1", &json!({"id": "A"}), None).await?;
        session.close().await;
        assert_eq!(result.len(), 1);
        Ok(())
    }
}
