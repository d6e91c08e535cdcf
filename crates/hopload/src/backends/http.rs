//! # 📡 THE HTTP GRAPH BACKEND
//!
//! 🎬 COLD OPEN. INT. SERVER ROOM, 3:47 AM
//!
//! Eighteen workers knock on the same door at once. Each one gets its own
//! transaction, asks one question about one company's suppliers, and leaves.
//! The engine sighs. The engine always sighs. That's what we're measuring.
//!
//! 🧠 Knowledge graph (the transactional HTTP protocol, as we speak it):
//! - open  → `POST {base}/db/{database}/tx` with no statements → `201` + `Location: .../tx/{n}`
//! - run   → `POST {tx}` with `{"statements":[{"statement","parameters"}]}` → results or errors
//! - close → `DELETE {tx}` → rollback. We only read, so rollback is free. Idempotent on our side.
//!
//! ⚠️ A client-side timeout on `run` and an engine-side timeout error code both come
//! back as `QueryError { timed_out: true }`. Same pain, same bucket.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::{GraphClient, GraphSession, QueryResult};
use crate::error::{ConnectionError, QueryError};

const JSON: &str = "application/json";
// -- 🧹 a hung engine doesn't get to hold a worker hostage during cleanup
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// 🔧 Where the engine lives and how to say hello.
#[derive(Debug, Clone)]
pub struct HttpGraphConfig {
    /// 📡 scheme + host + port, e.g. `http://localhost:7687`
    pub base_url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    /// ♻️ pooled connections idle longer than this get recycled
    pub connection_lifetime: Duration,
}

impl HttpGraphConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            base_url: format!("http://{host}:{port}"),
            database: "neo4j".to_string(),
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(10),
            connection_lifetime: Duration::from_secs(60),
        }
    }

    fn begin_url(&self) -> String {
        format!(
            "{}/db/{}/tx",
            self.base_url.trim_end_matches('/'),
            self.database
        )
    }
}

/// 🔒 Basic auth, if the engine wants it.
#[derive(Debug, Clone)]
struct Credentials {
    username: String,
    password: Option<String>,
}

impl Credentials {
    fn apply(credentials: &Option<Self>, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match credentials {
            Some(c) => request.basic_auth(&c.username, c.password.as_deref()),
            None => request,
        }
    }
}

/// 🚪 Opens transactions. One `reqwest::Client` shared by all workers; it pools for us.
#[derive(Debug, Clone)]
pub struct HttpGraphClient {
    client: reqwest::Client,
    begin_url: String,
    base_url: String,
    credentials: Option<Credentials>,
}

impl HttpGraphClient {
    /// 🏗️ Build the client. No network traffic yet; the first session does the knocking.
    pub fn new(config: HttpGraphConfig) -> Result<Self, ConnectionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.connection_lifetime)
            .build()
            .map_err(|e| {
                ConnectionError::new(format!(
                    "💀 The HTTP client refused to be born. The TLS stack wept: {e}"
                ))
            })?;

        let credentials = config.username.clone().map(|username| Credentials {
            username,
            password: config.password.clone(),
        });

        Ok(Self {
            client,
            begin_url: config.begin_url(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// 🧭 The engine may hand back an absolute URL, a path, or only a commit URL in the body.
    fn resolve_transaction_url(
        &self,
        location: Option<&str>,
        body: &TransactionResponse,
    ) -> Option<String> {
        if let Some(location) = location {
            return Some(if location.starts_with('/') {
                format!("{}{}", self.base_url, location)
            } else {
                location.to_string()
            });
        }
        body.commit
            .as_deref()
            .map(|commit| commit.trim_end_matches("/commit").to_string())
    }
}

#[async_trait]
impl GraphClient for HttpGraphClient {
    type Session = HttpSession;

    async fn open_session(&self) -> Result<HttpSession, ConnectionError> {
        let body = encode(&[]).map_err(|e| ConnectionError::new(e.to_string()))?;
        let request = self
            .client
            .post(&self.begin_url)
            .header(CONTENT_TYPE, JSON)
            .header(ACCEPT, JSON)
            .body(body);
        let response = Credentials::apply(&self.credentials, request)
            .send()
            .await
            .map_err(|e| ConnectionError::new(format!("{} ({})", e, self.begin_url)))?;

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|e| ConnectionError::new(e.to_string()))?;

        if !status.is_success() {
            return Err(ConnectionError::new(format!(
                "engine refused to open a transaction: HTTP {status}: {text}"
            )));
        }

        let parsed: TransactionResponse = if text.trim().is_empty() {
            TransactionResponse::default()
        } else {
            serde_json::from_str(&text)
                .map_err(|e| ConnectionError::new(format!("unreadable open response: {e}")))?
        };
        if let Some(error) = parsed.errors.first() {
            return Err(ConnectionError::new(format!(
                "{}: {}",
                error.code, error.message
            )));
        }

        let tx_url = self
            .resolve_transaction_url(location.as_deref(), &parsed)
            .ok_or_else(|| {
                ConnectionError::new("engine opened a transaction but never said where it lives")
            })?;

        trace!("🎟️ opened transaction {}", tx_url);
        Ok(HttpSession {
            client: self.client.clone(),
            tx_url,
            credentials: self.credentials.clone(),
            closed: false,
        })
    }
}

/// 🎟️ One open transaction. Dies on `close`.
#[derive(Debug)]
pub struct HttpSession {
    client: reqwest::Client,
    tx_url: String,
    credentials: Option<Credentials>,
    closed: bool,
}

#[async_trait]
impl GraphSession for HttpSession {
    async fn run(
        &mut self,
        query: &str,
        params: &Value,
        timeout: Option<Duration>,
    ) -> Result<QueryResult, QueryError> {
        if self.closed {
            return Err(QueryError::failed("session already closed"));
        }

        let body = encode(&[Statement {
            statement: query,
            parameters: params,
        }])
        .map_err(|e| QueryError::failed(e.to_string()))?;

        let mut request = self
            .client
            .post(&self.tx_url)
            .header(CONTENT_TYPE, JSON)
            .header(ACCEPT, JSON)
            .body(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = Credentials::apply(&self.credentials, request)
            .send()
            .await
            .map_err(|e| transport_failure(e, timeout))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_failure(e, timeout))?;

        if !status.is_success() {
            return Err(QueryError::failed(format!("HTTP {status}: {text}")));
        }

        let parsed: TransactionResponse = serde_json::from_str(&text)
            .map_err(|e| QueryError::failed(format!("unreadable query response: {e}")))?;

        if let Some(error) = parsed.errors.into_iter().next() {
            let message = format!("{}: {}", error.code, error.message);
            return Err(if is_timeout_code(&error.code) {
                QueryError::timed_out(message)
            } else {
                QueryError::failed(message)
            });
        }

        Ok(parsed
            .results
            .into_iter()
            .next()
            .map(|result| {
                QueryResult::new(
                    result.columns,
                    result.data.into_iter().map(|row| row.row).collect(),
                )
            })
            .unwrap_or_default())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let request = self.client.delete(&self.tx_url).timeout(CLOSE_TIMEOUT);
        match Credentials::apply(&self.credentials, request).send().await {
            Ok(response) => trace!("🗑️ closed {} ({})", self.tx_url, response.status()),
            // -- 🤷 the transaction will expire on its own; nobody downstream cares
            Err(e) => debug!("🗑️ close of {} went unanswered: {}", self.tx_url, e),
        }
    }
}

fn transport_failure(error: reqwest::Error, timeout: Option<Duration>) -> QueryError {
    if error.is_timeout() {
        let waited = timeout.map(|t| t.as_millis()).unwrap_or_default();
        QueryError::timed_out(format!("no answer within {waited}ms"))
    } else {
        QueryError::failed(error.to_string())
    }
}

fn is_timeout_code(code: &str) -> bool {
    code.contains("TimedOut") || code.contains("Timeout")
}

fn encode(statements: &[Statement<'_>]) -> Result<String, serde_json::Error> {
    serde_json::to_string(&StatementsRequest { statements })
}

// ===== Wire format =====

#[derive(Serialize)]
struct StatementsRequest<'a> {
    statements: &'a [Statement<'a>],
}

#[derive(Serialize)]
struct Statement<'a> {
    statement: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Default, Deserialize)]
struct TransactionResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<EngineError>,
    #[serde(default)]
    commit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<DataRow>,
}

#[derive(Debug, Deserialize)]
struct DataRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct EngineError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpGraphClient {
        let config = HttpGraphConfig {
            base_url: server.uri(),
            ..HttpGraphConfig::new("localhost", 7687)
        };
        HttpGraphClient::new(config).expect("💀 client should build without a network")
    }

    async fn mount_open(server: &MockServer, location: String) {
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", location)
                    .set_body_json(json!({"results": [], "errors": []})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn the_one_where_a_session_opens_runs_and_closes() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_open(&server, format!("{}/db/neo4j/tx/7", server.uri())).await;

        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx/7"))
            .and(body_partial_json(json!({
                "statements": [{"statement": "RETURN $id", "parameters": {"id": "ACME"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "columns": ["nodes", "edges"],
                    "data": [{"row": [[{"id": "S1"}, {"id": "S2"}], [{}]], "meta": []}]
                }],
                "errors": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/db/neo4j/tx/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [], "errors": []})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut session = client.open_session().await?;
        let result = session
            .run("RETURN $id", &json!({"id": "ACME"}), Some(Duration::from_secs(5)))
            .await?;
        session.close().await;
        // -- 🔁 second close is a no-op; the DELETE mock expects exactly one call
        session.close().await;

        let record = result.first_record().expect("💀 one row promised, none delivered");
        assert_eq!(record.list_len("nodes"), Some(2));
        assert_eq!(record.list_len("edges"), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_relative_location_still_finds_home() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_open(&server, "/db/neo4j/tx/9".to_string()).await;

        let client = client_for(&server);
        let session = client.open_session().await?;
        assert_eq!(session.tx_url, format!("{}/db/neo4j/tx/9", server.uri()));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_engine_runs_out_of_patience() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_open(&server, format!("{}/db/neo4j/tx/3", server.uri())).await;
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [],
                "errors": [{
                    "code": "Neo.ClientError.Transaction.TransactionTimedOut",
                    "message": "The transaction has been terminated."
                }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut session = client.open_session().await?;
        let err = session
            .run("RETURN 1", &json!({"id": "ACME"}), None)
            .await
            .expect_err("💀 the engine said timeout, we should agree");
        session.close().await;
        assert!(err.timed_out);
        assert!(err.message.contains("TransactionTimedOut"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_we_run_out_of_patience_first() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_open(&server, format!("{}/db/neo4j/tx/4", server.uri())).await;
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx/4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(800))
                    .set_body_json(json!({"results": [], "errors": []})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut session = client.open_session().await?;
        let err = session
            .run("RETURN 1", &json!({"id": "ACME"}), Some(Duration::from_millis(50)))
            .await
            .expect_err("💀 50ms budget, 800ms answer, should have timed out");
        session.close().await;
        assert!(err.timed_out);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_syntax_error_is_just_a_failure() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_open(&server, format!("{}/db/neo4j/tx/5", server.uri())).await;
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [],
                "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "Invalid input"}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut session = client.open_session().await?;
        let err = session
            .run("RETRUN 1", &json!({"id": "ACME"}), None)
            .await
            .expect_err("💀 typo should fail");
        session.close().await;
        assert!(!err.timed_out);
        assert!(err.message.contains("SyntaxError"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nobody_is_home() {
        // -- 📡 port 1: reserved, unloved, and reliably refusing connections
        let client = HttpGraphClient::new(HttpGraphConfig::new("127.0.0.1", 1))
            .expect("💀 client should build without a network");
        let result = client.open_session().await;
        assert!(result.is_err(), "nobody listens on port 1, so opening must fail");
    }

    #[tokio::test]
    async fn the_one_where_the_engine_rejects_our_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx"))
            .respond_with(ResponseTemplate::new(401).set_body_string("no"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .open_session()
            .await
            .expect_err("💀 a 401 is not an open session");
        assert!(err.message.contains("401"));
    }
}
