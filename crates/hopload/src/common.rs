//! 📦 Common data structures: the building blocks of hopload
//!
//! 🎬 COLD OPEN. INT. LOADING DOCK, 3:47 AM
//!
//! A forklift beeps somewhere. A company id rolls in on a pallet, weighed and
//! tagged with the size of its supply chain. Nobody asks where it's going.
//! It's going four hops upstream. It always is. 🦆

use serde::Serialize;

/// 🎯 One seed entity: an opaque id and the precomputed weight we filter on.
///
/// The weight is the entity's supply chain size in the input dump. Big weights
/// make for meaty traversals, which is exactly what a load test wants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub id: String,
    pub weight: i64,
}

impl Entity {
    pub fn new(id: impl Into<String>, weight: i64) -> Self {
        Self {
            id: id.into(),
            weight,
        }
    }
}

/// 📋 What one worker did on one turn of the wheel.
///
/// Handed to the reporter together with the aggregate snapshot, then dropped.
#[derive(Debug, Clone)]
pub struct AttemptReport<'a> {
    pub worker_id: usize,
    pub entity: &'a Entity,
    pub latency_ms: u64,
    /// ✅ result size on success, 💀 the error message on failure
    pub outcome: Result<u64, String>,
}

impl AttemptReport<'_> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}
