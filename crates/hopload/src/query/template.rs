//! 🏗️ The template builder: where a handful of enums become forty lines of Cypher.
//!
//! 🎬 *[INT. KITCHEN. The chef reads the order ticket exactly once.]*
//!
//! Shape of the rendered query, top to bottom:
//!
//! ```text
//! [USING HOPS LIMIT n]
//! MATCH seed <- hop 1
//! OPTIONAL MATCH hop 2 .. hop 4   (compatibility + date window + optional departure check)
//! WITH every node and edge [LIMIT rows]
//! pool the tiers, UNWIND, collect(DISTINCT ...)
//! RETURN <response shape projection>
//! [QUERY MEMORY LIMIT n MB]
//! ```
//!
//! Every hop walks *upstream*: `(downstream)<-[edge]-(upstream)`. Nodes already on the
//! path are never revisited. Windows are `[min_date, max_date]` on each edge.

use tracing::debug;

use super::{DateFilter, QueryConfig, RenderedQuery, ResponseShape, require_positive};
use crate::error::ConfigError;

/// 🪜 How far upstream we go. Four hops, like the tiers of a supply chain report.
pub const MAX_HOPS: usize = 4;

// -- 🏷️ the vocabulary of the graph, in one place so nobody typos `ships_too`
const SEED_LABEL: &str = "company";
const EDGE_TYPE: &str = "ships_to";
const COMPATIBILITY_PREDICATE: &str = "product_map.is_component";
const CLASSIFICATION: &str = "hs_code";
const WINDOW_START: &str = "min_date";
const WINDOW_END: &str = "max_date";
const DEPARTURE: &str = "departure_date";
const ARRIVALS: &str = "arrival_dates";

/// 🧑‍🍳 Turns a [`QueryConfig`] into the one [`RenderedQuery`] of the run.
#[derive(Debug, Clone)]
pub struct QueryTemplateBuilder {
    config: QueryConfig,
}

impl QueryTemplateBuilder {
    pub fn new(config: QueryConfig) -> Self {
        Self { config }
    }

    /// 🚀 Validate the numeric hints, then render. Deterministic: same config, same bytes.
    pub fn build(&self) -> Result<RenderedQuery, ConfigError> {
        require_positive("QUERY_HOPS_LIMIT", self.config.hops_limit)?;
        require_positive("QUERY_MEMORY_LIMIT", self.config.memory_limit_mb)?;
        require_positive("QUERY_ROW_LIMIT", self.config.row_limit)?;

        let text = self.render();
        debug!(
            "🧬 Rendered {} / {} query ({} bytes)",
            self.config.date_filter,
            self.config.response_shape,
            text.len()
        );
        Ok(RenderedQuery::new(text, self.config.response_shape))
    }

    fn render(&self) -> String {
        let mut cypher = Cypher::default();

        if let Some(hops) = self.config.hops_limit {
            cypher.line(0, format!("USING HOPS LIMIT {hops}"));
        }

        self.render_seed_hop(&mut cypher);
        for hop in 2..=MAX_HOPS {
            self.render_hop(&mut cypher, hop);
        }
        self.render_projection(&mut cypher);

        if let Some(limit) = self.config.memory_limit_mb {
            cypher.line(0, format!("QUERY MEMORY LIMIT {limit} MB"));
        }

        cypher.finish()
    }

    /// 🌱 Hop 1 is a plain MATCH: no upstream supplier, no row, no traversal.
    fn render_seed_hop(&self, cypher: &mut Cypher) {
        cypher.line(
            0,
            format!("MATCH (n0:{SEED_LABEL} {{id: $id}})<-[r1:{EDGE_TYPE}]-(n1)"),
        );
        cypher.line(0, "WHERE n1 <> n0");
        let mut carried = carried_variables(1);
        if self.config.date_filter == DateFilter::PathDateFilter {
            carried.push(format!("r1.{WINDOW_START} AS window_start1"));
            carried.push(format!("r1.{WINDOW_END} AS window_end1"));
        }
        cypher.line(0, format!("WITH {}", carried.join(", ")));
    }

    /// 🔗 Hops 2..=4: OPTIONAL so a short chain still counts for what it reached.
    fn render_hop(&self, cypher: &mut Cypher, hop: usize) {
        let prev = hop - 1;
        cypher.line(
            0,
            format!("OPTIONAL MATCH (n{prev})<-[r{hop}:{EDGE_TYPE}]-(n{hop})"),
        );

        let mut conditions: Vec<String> = (0..hop).map(|seen| format!("n{hop} <> n{seen}")).collect();
        conditions.push(format!(
            "{COMPATIBILITY_PREDICATE}(r{prev}.{CLASSIFICATION}, r{hop}.{CLASSIFICATION})"
        ));
        conditions.push(self.window_condition(hop));
        if self.config.departure_equals_arrival {
            conditions.push(format!("r{prev}.{DEPARTURE} IN r{hop}.{ARRIVALS}"));
        }

        cypher.line(0, format!("WHERE {}", conditions[0]));
        for condition in &conditions[1..] {
            cypher.line(1, format!("AND {condition}"));
        }

        let mut carried = carried_variables(hop);
        if self.config.date_filter == DateFilter::PathDateFilter {
            // -- 📐 shrink the running window: latest start, earliest end
            carried.push(format!(
                "CASE WHEN r{hop}.{WINDOW_START} > window_start{prev} THEN r{hop}.{WINDOW_START} ELSE window_start{prev} END AS window_start{hop}"
            ));
            carried.push(format!(
                "CASE WHEN r{hop}.{WINDOW_END} < window_end{prev} THEN r{hop}.{WINDOW_END} ELSE window_end{prev} END AS window_end{hop}"
            ));
        }
        cypher.line(0, format!("WITH {}", carried.join(", ")));
    }

    /// 📅 Overlap against the running path window, or just against the previous edge.
    fn window_condition(&self, hop: usize) -> String {
        let prev = hop - 1;
        match self.config.date_filter {
            DateFilter::PathDateFilter => format!(
                "r{hop}.{WINDOW_START} <= window_end{prev} AND r{hop}.{WINDOW_END} >= window_start{prev}"
            ),
            DateFilter::SegmentDateFilter => format!(
                "r{hop}.{WINDOW_START} <= r{prev}.{WINDOW_END} AND r{hop}.{WINDOW_END} >= r{prev}.{WINDOW_START}"
            ),
        }
    }

    /// 📦 Trim to the row limit, then fold every row into the requested shape.
    ///
    /// A supplier can show up at several tiers, so tiers are pooled first and only
    /// then deduplicated. The seed is part of the node set.
    fn render_projection(&self, cypher: &mut Cypher) {
        if let Some(rows) = self.config.row_limit {
            // -- 🧹 drop the window bookkeeping, keep the graph
            cypher.line(0, format!("WITH {}", graph_variables().join(", ")));
            cypher.line(0, format!("LIMIT {rows}"));
        }

        let shape = self.config.response_shape;
        let wants_edges = shape != ResponseShape::Count;
        let wants_paths = shape == ResponseShape::GraphAndPaths;

        let tier_nodes = std::iter::once("collect(DISTINCT n0)".to_string())
            .chain((1..=MAX_HOPS).map(|hop| format!("collect(n{hop})")))
            .collect::<Vec<_>>()
            .join(" + ");
        let tier_edges = (1..=MAX_HOPS)
            .map(|hop| format!("collect(r{hop})"))
            .collect::<Vec<_>>()
            .join(" + ");
        let hop_chain: Vec<String> = (1..=MAX_HOPS).map(|hop| format!("r{hop}")).collect();

        let mut pooled = vec![format!("{tier_nodes} AS tier_nodes")];
        if wants_edges {
            pooled.push(format!("{tier_edges} AS tier_edges"));
        }
        if wants_paths {
            pooled.push(format!(
                "collect(DISTINCT [hop IN [{}] WHERE hop IS NOT NULL]) AS paths",
                hop_chain.join(", ")
            ));
        }
        with_columns(cypher, &pooled);

        let mut carried = Vec::new();
        if wants_edges {
            carried.push("tier_edges");
        }
        if wants_paths {
            carried.push("paths");
        }
        dedupe(cypher, "tier_nodes", "node", "nodes", &carried);

        if wants_edges {
            let mut carried = vec!["nodes"];
            if wants_paths {
                carried.push("paths");
            }
            dedupe(cypher, "tier_edges", "edge", "edges", &carried);
        }

        let projection: Vec<String> = match shape {
            ResponseShape::Graph => vec!["nodes".into(), "edges".into()],
            ResponseShape::GraphAndPaths => vec!["nodes".into(), "edges".into(), "paths".into()],
            ResponseShape::Count => vec!["size(nodes) AS nodeCount".into()],
            ResponseShape::CountNodesAndEdges => vec![
                "size(nodes) AS nodeCount".into(),
                "size(edges) AS edgeCount".into(),
            ],
        };
        cypher.line(0, format!("RETURN {}", projection.join(", ")));
    }
}

/// 🎒 Everything a hop needs to hand forward: every node so far, every edge so far.
fn carried_variables(hop: usize) -> Vec<String> {
    (0..=hop)
        .map(|n| format!("n{n}"))
        .chain((1..=hop).map(|r| format!("r{r}")))
        .collect()
}

fn graph_variables() -> Vec<String> {
    carried_variables(MAX_HOPS)
}

fn with_columns(cypher: &mut Cypher, columns: &[String]) {
    cypher.line(0, format!("WITH {}", columns[0]));
    for column in &columns[1..] {
        cypher.line(1, format!(", {column}"));
    }
}

/// 🧺 `pooled` (a list with repeats) becomes `distinct` (a list without), one row in, one row out.
///
/// `[null]` stands in for an empty list so UNWIND never swallows the row; `collect` skips it.
fn dedupe(cypher: &mut Cypher, pooled: &str, item: &str, distinct: &str, carried: &[&str]) {
    cypher.line(
        0,
        format!("UNWIND CASE WHEN size({pooled}) = 0 THEN [null] ELSE {pooled} END AS {item}"),
    );
    let mut columns: Vec<String> = carried.iter().map(|c| c.to_string()).collect();
    columns.push(format!("collect(DISTINCT {item}) AS {distinct}"));
    cypher.line(0, format!("WITH {}", columns.join(", ")));
}

/// ✍️ A tiny line writer. Two-space indents, newline-joined, no trailing whitespace.
#[derive(Default)]
struct Cypher {
    lines: Vec<String>,
}

impl Cypher {
    fn line(&mut self, indent: usize, text: impl Into<String>) {
        self.lines.push(format!("{}{}", "  ".repeat(indent), text.into()));
    }

    fn finish(self) -> String {
        self.lines.join("\n")
    }
}
