//! 🔄 WorkSource: the lazy susan of seed entities.
//!
//! 🎬 *[a wheel spins. every worker reaches in. every worker gets the next plate.]*
//!
//! Loaded once at startup from a two-column `id,weight` file, filtered by weight,
//! optionally sorted, then frozen. After that the only thing that ever moves is the
//! cursor, and it moves with one atomic step per draw. No locks. No queues.
//! No query work while anyone is holding anything.
//!
//! 🧠 Knowledge graph:
//! - `load` → read file (gunzip if `.gz`) → parse lines → filter → order → freeze
//! - `next` → `fetch_update` on the cursor → `&Entity`
//! - cursor ∈ [0, len) always, because the stored value is already reduced modulo len
//! - N draws over L entities ⇒ every index drawn ⌊N/L⌋ or ⌈N/L⌉ times

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use flate2::read::GzDecoder;
use serde::Deserialize;
use tracing::{debug, info};

use crate::common::Entity;
use crate::error::ConfigError;

// -- 📏 the one true column separator. the file is "two-column delimited", and the delimiter is a comma.
const DELIMITER: u8 = b',';

/// 🎚️ Which entities make the cut.
///
/// Strict `>` is the default because that's what the rotating-cursor deployments did.
/// Some deployments wanted `>=`; they get `inclusive = true` instead of a guessing game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightFilter {
    pub threshold: i64,
    pub inclusive: bool,
}

impl WeightFilter {
    pub fn strictly_above(threshold: i64) -> Self {
        Self {
            threshold,
            inclusive: false,
        }
    }

    pub fn at_least(threshold: i64) -> Self {
        Self {
            threshold,
            inclusive: true,
        }
    }

    pub fn admits(&self, entity: &Entity) -> bool {
        if self.inclusive {
            entity.weight >= self.threshold
        } else {
            entity.weight > self.threshold
        }
    }

    fn comparison(&self) -> &'static str {
        if self.inclusive { ">=" } else { ">" }
    }
}

/// 📐 How the surviving entities line up for the wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityOrder {
    /// 📄 whatever order the file had
    #[default]
    LoadOrder,
    /// 🔽 ids sorted descending, byte-wise
    IdDescending,
}

/// 🍽️ The frozen entity list plus the one shared cursor.
#[derive(Debug)]
pub struct WorkSource {
    entities: Vec<Entity>,
    cursor: AtomicUsize,
}

impl WorkSource {
    /// 🚀 Read, parse, filter, order. Any malformed line or an empty result is fatal.
    ///
    /// Paths ending in `.gz` are gunzipped on the way in.
    pub async fn load(
        path: impl AsRef<Path>,
        filter: WeightFilter,
        order: EntityOrder,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("📂 Loading entities from {}", path.display());

        let raw = tokio::fs::read(path)
            .await
            .map_err(|source| ConfigError::EntitiesFile {
                path: path.to_path_buf(),
                source,
            })?;

        let text = decode(path, raw)?;
        let parsed = parse_records(path, &text)?;
        let loaded = parsed.len();
        let source = Self::from_entities(parsed, filter, order).map_err(|_| {
            ConfigError::NoEntities {
                path: path.to_path_buf(),
                comparison: filter.comparison(),
                threshold: filter.threshold,
            }
        })?;

        info!(
            "✅ {} of {} entities have weight {} {} ({:?})",
            source.len(),
            loaded,
            filter.comparison(),
            filter.threshold,
            order
        );
        Ok(source)
    }

    /// 🏗️ Build straight from memory. Same filter and ordering rules as [`WorkSource::load`].
    pub fn from_entities(
        entities: Vec<Entity>,
        filter: WeightFilter,
        order: EntityOrder,
    ) -> Result<Self, ConfigError> {
        let mut entities: Vec<Entity> = entities
            .into_iter()
            .filter(|entity| filter.admits(entity))
            .collect();

        if entities.is_empty() {
            return Err(ConfigError::NoEntities {
                path: PathBuf::from("<memory>"),
                comparison: filter.comparison(),
                threshold: filter.threshold,
            });
        }

        if order == EntityOrder::IdDescending {
            entities.sort_by(|a, b| b.id.cmp(&a.id));
        }

        debug!("🔄 WorkSource frozen with {} entities", entities.len());
        Ok(Self {
            entities,
            cursor: AtomicUsize::new(0),
        })
    }

    /// 🎯 Hand out the entity under the cursor and advance it, modulo the length.
    ///
    /// One atomic read-modify-write. Two callers can never see the same pre-advance index
    /// within a cycle. A single-entity source hands out the same entity forever.
    pub fn next(&self) -> &Entity {
        let len = self.entities.len();
        let index = match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current + 1) % len)
            }) {
            Ok(previous) | Err(previous) => previous,
        };
        &self.entities[index]
    }

    /// 🔍 Where the cursor points right now. Always in `[0, len)`.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Never true for a constructed source, but clippy likes the pair.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }
}

/// 🫁 gunzip if the name says so, then insist on UTF-8.
fn decode(path: &Path, raw: Vec<u8>) -> Result<String, ConfigError> {
    let io_err = |source| ConfigError::EntitiesFile {
        path: path.to_path_buf(),
        source,
    };

    let is_gzipped = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));

    if is_gzipped {
        let mut text = String::new();
        GzDecoder::new(raw.as_slice())
            .read_to_string(&mut text)
            .map_err(io_err)?;
        Ok(text)
    } else {
        String::from_utf8(raw)
            .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }
}

/// 📖 Turn `id,weight` lines into entities. Blank lines are skipped, anything else odd is fatal.
pub(crate) fn parse_records(path: &Path, text: &str) -> Result<Vec<Entity>, ConfigError> {
    let mut entities = Vec::new();
    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let entity = parse_record(line).map_err(|reason| ConfigError::MalformedRecord {
            path: path.to_path_buf(),
            line: index + 1,
            reason,
        })?;
        entities.push(entity);
    }
    Ok(entities)
}

fn parse_record(line: &str) -> Result<Entity, String> {
    let bytes = line.as_bytes();
    // -- 🔍 memchr finds the comma; a second comma means a third column, which we don't do
    let split_at = memchr::memchr(DELIMITER, bytes)
        .ok_or_else(|| format!("expected 'id,weight' but found no delimiter in '{}'", line))?;
    if memchr::memchr(DELIMITER, &bytes[split_at + 1..]).is_some() {
        return Err(format!("expected exactly two columns in '{}'", line));
    }

    let id = line[..split_at].trim();
    let weight_raw = line[split_at + 1..].trim();
    if id.is_empty() {
        return Err("entity id is empty".to_string());
    }
    let weight = weight_raw
        .parse::<i64>()
        .map_err(|_| format!("weight '{}' is not an integer", weight_raw))?;

    Ok(Entity::new(id, weight))
}
