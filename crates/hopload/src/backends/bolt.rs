//! # ⚡ THE BOLT GRAPH BACKEND
//!
//! 🎬 *[same eighteen workers, same door. this time they knock in the engine's native tongue.]*
//!
//! The engine we hammer speaks Bolt on 7687 and only there. `USING HOPS LIMIT`,
//! `QUERY MEMORY LIMIT` and `product_map.is_component` mean nothing to anyone else,
//! so this is the default backend and the HTTP one is the guest.
//!
//! 🧠 Knowledge graph (how a session maps onto the driver):
//! - open  → `Graph::start_txn` on the shared pool. First open also builds the pool.
//! - run   → `Txn::execute`, rows streamed to the end, the whole thing under the per-call timeout
//! - close → `Txn::rollback`. We only read. Idempotent on our side.
//!
//! ⚠️ Bolt rows carry typed nodes and relationships, not JSON. We keep what the
//! counters need (ids, labels, endpoints) and let the rest go.
//!
//! 🦆 (the duck speaks Bolt too. badly. with an accent.)

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Node, Query, Relation, Row, Txn};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use super::{GraphClient, GraphSession, QueryResult};
use crate::error::{ConnectionError, QueryError};
use crate::query::ResponseShape;

// -- 🧹 a rollback stuck behind a runaway query doesn't get to keep the worker
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// 🔧 Where the engine lives and how to say hello.
#[derive(Clone)]
pub struct BoltGraphConfig {
    /// 📡 e.g. `bolt://localhost:7687`
    pub uri: String,
    /// 🏷️ `None` lets the engine pick; single-database engines want exactly that
    pub database: Option<String>,
    pub username: String,
    pub password: String,
    /// 🧵 pool size; one per worker is plenty
    pub max_connections: usize,
    pub connect_timeout: Duration,
    /// 🧬 which columns the rendered query returns
    pub response_shape: ResponseShape,
}

impl BoltGraphConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            uri: format!("bolt://{host}:{port}"),
            database: None,
            username: String::new(),
            password: String::new(),
            max_connections: 16,
            connect_timeout: Duration::from_secs(10),
            response_shape: ResponseShape::default(),
        }
    }
}

impl fmt::Debug for BoltGraphConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // -- 🔒 the password stays out of the logs
        f.debug_struct("BoltGraphConfig")
            .field("uri", &self.uri)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout", &self.connect_timeout)
            .field("response_shape", &self.response_shape)
            .finish_non_exhaustive()
    }
}

/// 🚪 Hands out transactions from one shared driver pool.
///
/// Building the client touches nothing. The pool comes up on the first `open_session`,
/// and a failed attempt leaves it unbuilt so the next one tries again.
pub struct BoltGraphClient {
    config: BoltGraphConfig,
    graph: OnceCell<Graph>,
}

impl fmt::Debug for BoltGraphClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoltGraphClient")
            .field("config", &self.config)
            .field("connected", &self.graph.initialized())
            .finish()
    }
}

impl BoltGraphClient {
    pub fn new(config: BoltGraphConfig) -> Self {
        Self {
            config,
            graph: OnceCell::new(),
        }
    }

    async fn graph(&self) -> Result<&Graph, ConnectionError> {
        self.graph
            .get_or_try_init(|| async {
                let mut builder = ConfigBuilder::default()
                    .uri(self.config.uri.as_str())
                    .user(self.config.username.as_str())
                    .password(self.config.password.as_str())
                    .max_connections(self.config.max_connections);
                if let Some(database) = self.config.database.as_deref() {
                    builder = builder.db(database);
                }
                let driver_config = builder
                    .build()
                    .map_err(|e| ConnectionError::new(format!("bad Bolt settings: {e}")))?;

                let graph = connecting(
                    &self.config,
                    Graph::connect(driver_config),
                )
                .await?;
                debug!("⚡ Bolt pool up at {}", self.config.uri);
                Ok(graph)
            })
            .await
    }
}

#[async_trait]
impl GraphClient for BoltGraphClient {
    type Session = BoltSession;

    async fn open_session(&self) -> Result<BoltSession, ConnectionError> {
        let graph = self.graph().await?;
        let txn = connecting(&self.config, graph.start_txn()).await?;
        trace!("🎟️ opened a Bolt transaction on {}", self.config.uri);
        Ok(BoltSession {
            txn: Some(txn),
            response_shape: self.config.response_shape,
        })
    }
}

/// 📡 Anything on the way to a live transaction: bounded by the connect timeout,
/// and every failure is a `ConnectionError` with the address attached.
async fn connecting<T, E, F>(config: &BoltGraphConfig, attempt: F) -> Result<T, ConnectionError>
where
    E: fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(config.connect_timeout, attempt).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ConnectionError::new(format!("{e} ({})", config.uri))),
        Err(_) => Err(ConnectionError::new(format!(
            "timed out after {}ms waiting for {}",
            config.connect_timeout.as_millis(),
            config.uri
        ))),
    }
}

/// 🎟️ One open transaction. Rolled back on `close`.
pub struct BoltSession {
    txn: Option<Txn>,
    response_shape: ResponseShape,
}

impl fmt::Debug for BoltSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoltSession")
            .field("open", &self.txn.is_some())
            .field("response_shape", &self.response_shape)
            .finish()
    }
}

#[async_trait]
impl GraphSession for BoltSession {
    async fn run(
        &mut self,
        query: &str,
        params: &Value,
        timeout: Option<Duration>,
    ) -> Result<QueryResult, QueryError> {
        let shape = self.response_shape;
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| QueryError::failed("session already closed"))?;
        let statement = bind(neo4rs::query(query), params)?;

        within(timeout, async move {
            let mut stream = txn
                .execute(statement)
                .await
                .map_err(|e| QueryError::failed(e.to_string()))?;
            let mut rows = Vec::new();
            while let Some(row) = stream
                .next(txn.handle())
                .await
                .map_err(|e| QueryError::failed(e.to_string()))?
            {
                rows.push(decode_row(&row, shape)?);
            }
            Ok(QueryResult::new(column_names(shape), rows))
        })
        .await
    }

    async fn close(&mut self) {
        let Some(txn) = self.txn.take() else {
            return;
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, txn.rollback()).await {
            Ok(Ok(())) => trace!("🗑️ rolled back a Bolt transaction"),
            // -- 🤷 the engine reaps the transaction itself once the connection goes
            Ok(Err(e)) => debug!("🗑️ rollback refused: {}", e),
            Err(_) => debug!("🗑️ rollback went unanswered for {}ms", CLOSE_TIMEOUT.as_millis()),
        }
    }
}

/// ⏱️ Run `work` under the per-call budget. Running out of it is a timeout, not a failure.
async fn within<T, F>(timeout: Option<Duration>, work: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, QueryError>>,
{
    match timeout {
        None => work.await,
        Some(limit) => tokio::time::timeout(limit, work).await.unwrap_or_else(|_| {
            Err(QueryError::timed_out(format!(
                "no answer within {}ms",
                limit.as_millis()
            )))
        }),
    }
}

/// 🔗 JSON parameters onto a Bolt query. Scalars only; that is all the template binds.
fn bind(mut statement: Query, params: &Value) -> Result<Query, QueryError> {
    let Some(params) = params.as_object() else {
        return Err(QueryError::failed("query parameters must be a JSON object"));
    };
    for (key, value) in params {
        statement = match value {
            Value::String(text) => statement.param(key, text.as_str()),
            Value::Bool(flag) => statement.param(key, *flag),
            Value::Number(number) => match (number.as_i64(), number.as_f64()) {
                (Some(integer), _) => statement.param(key, integer),
                (None, Some(float)) => statement.param(key, float),
                (None, None) => {
                    return Err(QueryError::failed(format!(
                        "parameter '{key}' does not fit in 64 bits"
                    )));
                }
            },
            other => {
                return Err(QueryError::failed(format!(
                    "parameter '{key}' has an unsupported type: {other}"
                )));
            }
        };
    }
    Ok(statement)
}

fn column_names(shape: ResponseShape) -> Vec<String> {
    shape.columns().iter().map(|c| c.to_string()).collect()
}

fn decode_row(row: &Row, shape: ResponseShape) -> Result<Vec<Value>, QueryError> {
    shape
        .columns()
        .iter()
        .map(|column| match *column {
            "nodes" => {
                let nodes: Vec<Node> = column_value(row, column)?;
                Ok(Value::Array(nodes.iter().map(node_json).collect()))
            }
            "edges" => {
                let edges: Vec<Relation> = column_value(row, column)?;
                Ok(Value::Array(edges.iter().map(edge_json).collect()))
            }
            "paths" => {
                let paths: Vec<Vec<Relation>> = column_value(row, column)?;
                Ok(Value::Array(
                    paths
                        .iter()
                        .map(|path| Value::Array(path.iter().map(edge_json).collect()))
                        .collect(),
                ))
            }
            _ => column_value::<i64>(row, column).map(Value::from),
        })
        .collect()
}

fn column_value<'r, T: Deserialize<'r>>(row: &'r Row, column: &str) -> Result<T, QueryError> {
    row.get(column)
        .map_err(|e| QueryError::failed(format!("unreadable column '{column}': {e}")))
}

fn node_json(node: &Node) -> Value {
    json!({"id": node.id(), "labels": node.labels()})
}

fn edge_json(edge: &Relation) -> Value {
    json!({
        "id": edge.id(),
        "type": edge.typ(),
        "start": edge.start_node_id(),
        "end": edge.end_node_id(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn config_for(port: u16) -> BoltGraphConfig {
        BoltGraphConfig {
            connect_timeout: Duration::from_millis(300),
            ..BoltGraphConfig::new("127.0.0.1", port)
        }
    }

    #[test]
    fn the_one_where_the_address_speaks_bolt() {
        let config = BoltGraphConfig::new("graph.internal", 7687);
        assert_eq!(config.uri, "bolt://graph.internal:7687");
        assert_eq!(config.database, None);
        let printed = format!("{:?}", BoltGraphConfig {
            password: "hunter2".into(),
            ..config
        });
        assert!(!printed.contains("hunter2"), "password leaked into Debug: {printed}");
    }

    #[tokio::test]
    async fn the_one_where_nobody_is_home() {
        // -- 📡 port 1: reserved, unloved, and reliably refusing connections
        let client = BoltGraphClient::new(config_for(1));
        let err = client
            .open_session()
            .await
            .expect_err("💀 nobody listens on port 1, so opening must fail");
        assert!(err.message.contains("bolt://127.0.0.1:1"), "{}", err.message);
    }

    #[tokio::test]
    async fn the_one_where_the_listener_never_says_hello() -> anyhow::Result<()> {
        // -- 🙊 accepts the socket, never answers the handshake
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = BoltGraphClient::new(config_for(port));
        let err = client
            .open_session()
            .await
            .expect_err("💀 a silent engine must not hang the worker");
        silent.abort();
        assert!(err.message.contains("timed out"), "{}", err.message);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_listener_speaks_http_instead() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let rude = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
                let _ = socket.shutdown().await;
            }
        });

        let client = BoltGraphClient::new(config_for(port));
        let first = client.open_session().await;
        let second = client.open_session().await;
        rude.abort();
        assert!(first.is_err());
        // -- 🔁 a failed pool build is retried, not cached
        assert!(second.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_budget_runs_out_mid_stream() {
        let err = within(
            Some(Duration::from_millis(20)),
            std::future::pending::<Result<QueryResult, QueryError>>(),
        )
        .await
        .expect_err("💀 a query that never returns must time out");
        assert!(err.timed_out);
        assert!(err.message.contains("20ms"));
    }

    #[tokio::test]
    async fn the_one_where_no_budget_means_wait_it_out() -> anyhow::Result<()> {
        let result = within(None, async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(QueryResult::default())
        })
        .await?;
        assert!(result.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_engine_error_is_not_a_timeout() {
        let err = within(Some(Duration::from_secs(5)), async {
            Err::<QueryResult, _>(QueryError::failed("SyntaxError: Invalid input"))
        })
        .await
        .expect_err("💀 the engine said no");
        assert!(!err.timed_out);
    }

    #[test]
    fn the_one_where_only_scalars_get_bound() {
        assert!(bind(neo4rs::query("RETURN $id"), &json!({"id": "ACME", "hops": 4})).is_ok());
        assert!(bind(neo4rs::query("RETURN $id"), &json!({"id": ["A", "B"]})).is_err());
        assert!(bind(neo4rs::query("RETURN $id"), &json!("ACME")).is_err());
    }

    #[test]
    fn the_one_where_columns_follow_the_shape() {
        assert_eq!(column_names(ResponseShape::Graph), vec!["nodes", "edges"]);
        assert_eq!(
            column_names(ResponseShape::CountNodesAndEdges),
            vec!["nodeCount", "edgeCount"]
        );
    }
}
