//! 🔧 App Configuration: the sacred env-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." said every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment. The base layer is plain environment variables (`HOST`,
//! `CONCURRENCY`, `QUERY_RESPONSE_TYPE`, ...), restricted to the keys we know.
//! An optional TOML file merges on top and wins on conflicts; its keys are the same
//! names in lower case (`concurrency = 4`).
//!
//! ⚠️ Everything here is validated before a single worker exists. A typo in an
//! enumerated value ends the process with a non-zero exit and zero attempts.
//!
//! 🔤 figment reads env values like TOML literals, so `PASSWORD=123456` arrives as a
//! number. Free-text keys take numbers and booleans back as the text that was written.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use tracing::info;

use crate::backends::{
    BoltGraphClient, BoltGraphConfig, EngineKind, GraphBackend, HttpGraphClient, HttpGraphConfig,
    InMemoryGraphClient, InMemoryGraphConfig,
};
use crate::error::{ConfigError, ConnectionError};
use crate::query::{DateFilter, QueryConfig, ResponseShape};
use crate::supervisors::{PoolSettings, StopCondition};
use crate::work_source::{EntityOrder, WeightFilter};

/// 🔑 The environment variables we read. Anything else in the environment is none of our business.
pub const CONFIG_KEYS: &[&str] = &[
    "HOST",
    "PORT",
    "CONCURRENCY",
    "TIMEOUT",
    "TIME",
    "COUNT",
    "MIN_SUPPLY_CHAIN_SIZE",
    "MIN_SUPPLY_CHAIN_SIZE_INCLUSIVE",
    "ENTITIES_FILE",
    "ENTITY_ORDER",
    "QUERY_DATE_FILTER",
    "QUERY_RESPONSE_TYPE",
    "QUERY_HOPS_LIMIT",
    "QUERY_MEMORY_LIMIT",
    "QUERY_ROW_LIMIT",
    "QUERY_DOWNSTREAM_DEPARTURE_EQUALS_UPSTREAM_ARRIVAL",
    "ENGINE",
    "DATABASE",
    "USERNAME",
    "PASSWORD",
    "IN_MEMORY_LATENCY_MS",
    "QUIET",
];

/// 📦 One flat struct, one field per key. Everything has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(deserialize_with = "text")]
    pub host: String,
    pub port: u16,
    /// 🧵 number of workers
    pub concurrency: usize,
    /// ⏱️ per-query timeout in ms; `0` means no timeout
    pub timeout: u64,
    /// ⏱️ run for this many seconds
    pub time: Option<u64>,
    /// 🔢 run this many attempts in total
    pub count: Option<u64>,
    pub min_supply_chain_size: i64,
    /// `>=` instead of `>`
    pub min_supply_chain_size_inclusive: bool,
    #[serde(deserialize_with = "path")]
    pub entities_file: PathBuf,
    pub entity_order: EntityOrder,
    pub query_date_filter: DateFilter,
    pub query_response_type: ResponseShape,
    pub query_hops_limit: Option<u64>,
    /// MiB
    pub query_memory_limit: Option<u64>,
    pub query_row_limit: Option<u64>,
    pub query_downstream_departure_equals_upstream_arrival: bool,
    pub engine: EngineKind,
    /// 🏷️ unset: Bolt lets the engine pick, HTTP uses `neo4j`
    #[serde(deserialize_with = "optional_text")]
    pub database: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub username: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub password: Option<String>,
    pub in_memory_latency_ms: u64,
    /// 🤫 keep counting, stop printing
    pub quiet: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let query = QueryConfig::default();
        Self {
            host: "localhost".to_string(),
            port: 7687,
            concurrency: 18,
            timeout: 15_000,
            time: None,
            count: None,
            min_supply_chain_size: 5_000,
            min_supply_chain_size_inclusive: false,
            entities_file: PathBuf::from("data.csv"),
            entity_order: EntityOrder::default(),
            query_date_filter: query.date_filter,
            query_response_type: query.response_shape,
            query_hops_limit: query.hops_limit,
            query_memory_limit: query.memory_limit_mb,
            query_row_limit: query.row_limit,
            query_downstream_departure_equals_upstream_arrival: query.departure_equals_arrival,
            engine: EngineKind::default(),
            database: None,
            username: None,
            password: None,
            in_memory_latency_ms: 5,
            quiet: false,
        }
    }
}

impl AppConfig {
    /// 🧪 Extract and validate from any figment. `load_config` is the env + file flavor of this.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// 🚦 The checks serde can't do for us.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidOption {
                key: "CONCURRENCY",
                reason: "need at least one worker".to_string(),
            });
        }
        if self.count == Some(0) {
            return Err(ConfigError::InvalidOption {
                key: "COUNT",
                reason: "a run of zero attempts measures nothing".to_string(),
            });
        }
        if self.time == Some(0) {
            return Err(ConfigError::InvalidOption {
                key: "TIME",
                reason: "a run of zero seconds measures nothing".to_string(),
            });
        }
        Ok(())
    }

    pub fn weight_filter(&self) -> WeightFilter {
        if self.min_supply_chain_size_inclusive {
            WeightFilter::at_least(self.min_supply_chain_size)
        } else {
            WeightFilter::strictly_above(self.min_supply_chain_size)
        }
    }

    pub fn query_config(&self) -> QueryConfig {
        QueryConfig {
            date_filter: self.query_date_filter,
            response_shape: self.query_response_type,
            hops_limit: self.query_hops_limit,
            memory_limit_mb: self.query_memory_limit,
            row_limit: self.query_row_limit,
            departure_equals_arrival: self.query_downstream_departure_equals_upstream_arrival,
        }
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_millis(self.timeout))
    }

    pub fn stop_condition(&self) -> StopCondition {
        StopCondition {
            max_duration: self.time.map(Duration::from_secs),
            max_iterations: self.count,
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            concurrency: self.concurrency,
            query_timeout: self.query_timeout(),
            stop: self.stop_condition(),
        }
    }

    pub fn bolt_config(&self) -> BoltGraphConfig {
        BoltGraphConfig {
            database: self.database.clone(),
            username: self.username.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            max_connections: self.concurrency,
            response_shape: self.query_response_type,
            ..BoltGraphConfig::new(&self.host, self.port)
        }
    }

    pub fn http_config(&self) -> HttpGraphConfig {
        let mut config = HttpGraphConfig::new(&self.host, self.port);
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        config.username = self.username.clone();
        config.password = self.password.clone();
        config
    }

    pub fn in_memory_config(&self) -> InMemoryGraphConfig {
        InMemoryGraphConfig {
            latency: Duration::from_millis(self.in_memory_latency_ms),
            response_shape: self.query_response_type,
            ..InMemoryGraphConfig::default()
        }
    }

    /// 🎭 Pick the engine. No network traffic happens here.
    pub fn build_backend(&self) -> Result<GraphBackend, ConnectionError> {
        Ok(match self.engine {
            EngineKind::Bolt => GraphBackend::Bolt(BoltGraphClient::new(self.bolt_config())),
            EngineKind::Http => GraphBackend::Http(HttpGraphClient::new(self.http_config())?),
            EngineKind::InMemory => {
                GraphBackend::InMemory(InMemoryGraphClient::new(self.in_memory_config()))
            }
        })
    }
}

/// 🚀 Load the config from the environment, plus a TOML file if one is given.
///
/// 📐 DESIGN NOTE (no cap, this is tribal knowledge):
///   - `None` → env vars only.
///   - `Some(path)` → env vars + TOML file, merged. TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::raw().only(CONFIG_KEYS));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables. \
             The file exists in our hearts, but apparently not in a shape we understand.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables. \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    AppConfig::from_figment(config).context(context_msg)
}

// ===== Free-text keys =====

/// 🔤 Takes strings as-is and integers or booleans as the digits/words that were typed.
struct TextVisitor;

impl<'de> Visitor<'de> for TextVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<String, E> {
        Ok(value.to_owned())
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<String, E> {
        Ok(value)
    }

    fn visit_char<E: de::Error>(self, value: char) -> Result<String, E> {
        Ok(value.to_string())
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<String, E> {
        Ok(value.to_string())
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<String, E> {
        Ok(value.to_string())
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<String, E> {
        Ok(value.to_string())
    }

    fn visit_u128<E: de::Error>(self, value: u128) -> Result<String, E> {
        Ok(value.to_string())
    }

    fn visit_i128<E: de::Error>(self, value: i128) -> Result<String, E> {
        Ok(value.to_string())
    }

    // -- 🎯 `1.50` was already squeezed through a float; the typed digits are gone
    fn visit_f64<E: de::Error>(self, value: f64) -> Result<String, E> {
        Err(E::custom(format!(
            "{value} was read as a decimal number and may have lost digits; \
             wrap the value in double quotes"
        )))
    }
}

struct Text(String);

impl<'de> Deserialize<'de> for Text {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TextVisitor).map(Text)
    }
}

fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Text::deserialize(deserializer).map(|Text(value)| value)
}

fn optional_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Option::<Text>::deserialize(deserializer).map(|value| value.map(|Text(value)| value))
}

fn path<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
    text(deserializer).map(PathBuf::from)
}
