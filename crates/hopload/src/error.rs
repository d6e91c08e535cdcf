//! 💀 Errors: the taxonomy of things going sideways.
//!
//! 🎬 *[four doors. behind each one, a different kind of bad day.]*
//!
//! - [`ConfigError`]: fatal. We never even leave the driveway.
//! - [`ConnectionError`]: the engine didn't pick up. One failed attempt, move on.
//! - [`QueryError`]: the engine picked up and said no. Also one failed attempt.
//! - [`OutputError`]: stdout is having a moment. Swallowed whole, never counted.
//!
//! Only the first one is allowed to end the process. The rest are just Tuesday. 🦆

use std::path::PathBuf;

use thiserror::Error;

/// 🔧 Startup is over before it began. Bad config, bad input file, or both.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 📋 figment could not turn the environment (or the TOML file) into an `AppConfig`.
    /// Unknown enum values like `QUERY_DATE_FILTER=vibes` land here.
    #[error("invalid configuration: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// 🎛️ The value parsed, but it makes no sense (zero workers, zero hop limit...).
    #[error("invalid value for {key}: {reason}")]
    InvalidOption { key: &'static str, reason: String },

    /// 📂 The entities file would not open, read, or decompress.
    #[error("could not read entities file '{path}'")]
    EntitiesFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 🐛 One line of the entities file isn't an `(id, weight)` pair.
    #[error("malformed record in '{path}' at line {line}: {reason}")]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// 🕳️ Every entity got filtered out. Nothing to cycle through.
    #[error("no entities left in '{path}' after filtering by weight {comparison} {threshold}")]
    NoEntities {
        path: PathBuf,
        comparison: &'static str,
        threshold: i64,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Figment(Box::new(err))
    }
}

/// 📡 The engine could not be reached when opening a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("connection error: {message}")]
pub struct ConnectionError {
    pub message: String,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 🧨 The query ran (or tried to) and failed. `timed_out` tells a slow engine apart from an angry one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub struct QueryError {
    pub message: String,
    pub timed_out: bool,
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verdict = if self.timed_out {
            "query timed out"
        } else {
            "query failed"
        };
        write!(f, "{}: {}", verdict, self.message)
    }
}

impl QueryError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: true,
        }
    }
}

/// 🎯 Everything one attempt can die of. Caught at the worker loop, counted, logged, forgotten.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl AttemptError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AttemptError::Query(QueryError { timed_out: true, .. }))
    }
}

/// 🖨️ Writing a report line failed. Nobody will ever see this error. That's the point.
#[derive(Debug, Error)]
#[error("failed to write report line: {0}")]
pub struct OutputError(#[from] pub std::io::Error);

/// 🏗️ Something went wrong with the pool itself, not with a query.
#[derive(Debug, Error)]
pub enum PoolError {
    /// 💥 A worker task panicked or was torn down. Its siblings still got to finish.
    #[error("worker {worker_id} died: {reason}")]
    WorkerFault { worker_id: usize, reason: String },

    /// 🪓 Somebody insisted. In-flight queries were abandoned, not counted.
    #[error("aborted after {attempts} attempts; in-flight queries were abandoned")]
    Aborted { attempts: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_timeouts_announce_themselves() {
        let err = AttemptError::from(QueryError::timed_out("15000ms elapsed"));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "query timed out: 15000ms elapsed");
    }

    #[test]
    fn the_one_where_a_refused_connection_is_not_a_timeout() {
        let err = AttemptError::from(ConnectionError::new("connection refused"));
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "connection error: connection refused");
    }

    #[test]
    fn the_one_where_malformed_records_point_at_the_line() {
        let err = ConfigError::MalformedRecord {
            path: PathBuf::from("data.csv"),
            line: 7,
            reason: "weight 'lots' is not an integer".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed record in 'data.csv' at line 7: weight 'lots' is not an integer"
        );
    }
}
