//! 🧬 Query: one Cypher text to rule the whole run.
//!
//! 🎬 *[the config walks in. one query walks out. they never meet again.]*
//!
//! [`QueryConfig`] is the enumerated bundle of knobs fixed at process start.
//! [`QueryTemplateBuilder`] turns it into exactly one [`RenderedQuery`] before any
//! worker exists. Same config in, byte-identical text out. Every worker then binds
//! a single `$id` parameter and fires.
//!
//! 🧠 Knowledge graph:
//! - `DateFilter` → how hop validity windows are checked (whole path vs. prior segment)
//! - `ResponseShape` → what comes back, and how we measure "result size" from it
//! - hop/memory/row limits → pass-through execution hints, never enforced client-side
//! - the compatibility predicate is an opaque engine-side procedure, we only name it

mod template;

use std::fmt;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::backends::QueryResult;
use crate::error::ConfigError;

pub use template::QueryTemplateBuilder;

/// 📅 How a hop's validity window is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DateFilter {
    /// 🧵 Each hop must overlap the running intersection of every window on its path so far.
    #[default]
    PathDateFilter,
    /// 🔗 Each hop only has to overlap the hop right before it.
    SegmentDateFilter,
}

/// 📦 What the query hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseShape {
    /// 🕸️ reachable nodes (seed included) + edges, each listed once
    #[default]
    Graph,
    /// 🕸️ + 🧵 nodes, edges, and every distinct hop-chain that got us there
    GraphAndPaths,
    /// 🔢 how many distinct nodes, seed included, across all tiers
    Count,
    /// 🔢 distinct node count and distinct edge count, side by side, across all tiers
    CountNodesAndEdges,
}

impl ResponseShape {
    /// 📋 Column names the rendered query returns, in order.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            ResponseShape::Graph => &["nodes", "edges"],
            ResponseShape::GraphAndPaths => &["nodes", "edges", "paths"],
            ResponseShape::Count => &["nodeCount"],
            ResponseShape::CountNodesAndEdges => &["nodeCount", "edgeCount"],
        }
    }

    /// 📏 How big was the answer? Nodes, paths, or the counts, depending on the shape.
    ///
    /// An empty result set is size 0, not an error. Missing columns are also 0; the
    /// engine said yes, it just didn't say much.
    pub fn result_size(&self, result: &QueryResult) -> u64 {
        let Some(record) = result.first_record() else {
            return 0;
        };
        match self {
            ResponseShape::Graph => record.list_len("nodes").unwrap_or(0) as u64,
            ResponseShape::GraphAndPaths => record.list_len("paths").unwrap_or(0) as u64,
            ResponseShape::Count => non_negative(record.integer("nodeCount")),
            ResponseShape::CountNodesAndEdges => {
                non_negative(record.integer("nodeCount"))
                    + non_negative(record.integer("edgeCount"))
            }
        }
    }
}

fn non_negative(value: Option<i64>) -> u64 {
    value.map(|v| v.max(0) as u64).unwrap_or(0)
}

impl fmt::Display for ResponseShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseShape::Graph => "graph",
            ResponseShape::GraphAndPaths => "graphAndPaths",
            ResponseShape::Count => "count",
            ResponseShape::CountNodesAndEdges => "countNodesAndEdges",
        };
        f.write_str(name)
    }
}

impl fmt::Display for DateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DateFilter::PathDateFilter => "pathDateFilter",
            DateFilter::SegmentDateFilter => "segmentDateFilter",
        };
        f.write_str(name)
    }
}

/// 🎛️ The knobs. Frozen at startup, read by nobody after the builder is done with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    pub date_filter: DateFilter,
    pub response_shape: ResponseShape,
    /// engine-side traversal ceiling hint
    pub hops_limit: Option<u64>,
    /// engine-side memory ceiling hint, in MiB
    pub memory_limit_mb: Option<u64>,
    /// rows kept before aggregation
    pub row_limit: Option<u64>,
    /// require a hop's departure to match one of the previous hop's arrivals
    pub departure_equals_arrival: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            date_filter: DateFilter::default(),
            response_shape: ResponseShape::default(),
            hops_limit: None,
            memory_limit_mb: None,
            row_limit: Some(20_000),
            departure_equals_arrival: true,
        }
    }
}

/// 📜 The one and only query text for this process, plus the shape it answers in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuery {
    text: String,
    response_shape: ResponseShape,
}

impl RenderedQuery {
    pub(crate) fn new(text: String, response_shape: ResponseShape) -> Self {
        Self {
            text,
            response_shape,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn response_shape(&self) -> ResponseShape {
        self.response_shape
    }

    /// 🔗 The entity id is the sole parameter. Always `$id`.
    pub fn params_for(&self, entity_id: &str) -> Value {
        json!({ "id": entity_id })
    }
}

/// 🚦 Shared validation for the numeric hints: present means positive.
pub(crate) fn require_positive(
    key: &'static str,
    value: Option<u64>,
) -> Result<(), ConfigError> {
    match value {
        Some(0) => Err(ConfigError::InvalidOption {
            key,
            reason: "must be at least 1 when set".to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(columns: &[&str], row: Vec<Value>) -> QueryResult {
        QueryResult::new(
            columns.iter().map(|c| c.to_string()).collect(),
            vec![row],
        )
    }

    #[test]
    fn the_one_where_graph_size_counts_nodes() {
        let answer = result(&["nodes", "edges"], vec![json!([1, 2, 3]), json!([10, 11])]);
        assert_eq!(ResponseShape::Graph.result_size(&answer), 3);
    }

    #[test]
    fn the_one_where_graph_and_paths_counts_paths() {
        let answer = result(
            &["nodes", "edges", "paths"],
            vec![json!([1, 2, 3]), json!([10, 11]), json!([[10], [10, 11]])],
        );
        assert_eq!(ResponseShape::GraphAndPaths.result_size(&answer), 2);
    }

    #[test]
    fn the_one_where_the_two_counts_stay_distinct() {
        let nodes_only = result(&["nodeCount"], vec![json!(42)]);
        assert_eq!(ResponseShape::Count.result_size(&nodes_only), 42);

        let both = result(&["nodeCount", "edgeCount"], vec![json!(42), json!(58)]);
        assert_eq!(ResponseShape::CountNodesAndEdges.result_size(&both), 100);
        assert_eq!(ResponseShape::Count.result_size(&both), 42);
    }

    #[test]
    fn the_one_where_an_empty_answer_is_size_zero() {
        let empty = QueryResult::new(vec!["nodes".into(), "edges".into()], vec![]);
        assert_eq!(ResponseShape::Graph.result_size(&empty), 0);
    }

    #[test]
    fn the_one_where_enum_names_round_trip_through_display() -> Result<(), serde_json::Error> {
        for shape in [
            ResponseShape::Graph,
            ResponseShape::GraphAndPaths,
            ResponseShape::Count,
            ResponseShape::CountNodesAndEdges,
        ] {
            let parsed: ResponseShape = serde_json::from_value(json!(shape.to_string()))?;
            assert_eq!(parsed, shape);
        }
        for filter in [DateFilter::PathDateFilter, DateFilter::SegmentDateFilter] {
            let parsed: DateFilter = serde_json::from_value(json!(filter.to_string()))?;
            assert_eq!(parsed, filter);
        }
        Ok(())
    }

    #[test]
    fn the_one_where_unknown_shapes_are_rejected() {
        let parsed: Result<ResponseShape, _> = serde_json::from_value(json!("everything"));
        assert!(parsed.is_err());
        let parsed: Result<DateFilter, _> = serde_json::from_value(json!("vibesDateFilter"));
        assert!(parsed.is_err());
    }

    #[test]
    fn the_one_where_the_id_is_the_only_parameter() {
        let query = RenderedQuery::new("RETURN $id".into(), ResponseShape::Count);
        assert_eq!(query.params_for("ACME"), json!({"id": "ACME"}));
    }
}
