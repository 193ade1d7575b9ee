//! User journeys: the most common page sequences and their Sankey layout.

use crate::query::error::QueryError;
use crate::query::rows::{fetch, RowShape};
use crate::query::scope::QueryScope;
use crate::query::sql::Sql;
use duckdb::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default number of pages kept from the start of each session.
pub const DEFAULT_MAX_STEPS: u64 = 3;
/// Default number of distinct paths returned.
pub const DEFAULT_PATH_LIMIT: u64 = 25;

/// An ordered page sequence and the number of sessions that followed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequentialPath {
    pub path: Vec<String>,
    pub count: u64,
}

impl RowShape for SequentialPath {
    const NAME: &'static str = "SequentialPath";
    const COLUMNS: &'static [&'static str] = &["path", "count"];

    fn validate(&self) -> Result<(), String> {
        if self.path.len() < 2 {
            return Err(format!("path of {} pages", self.path.len()));
        }
        Ok(())
    }
}

/// A page at a given position in the journey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SankeyNode {
    /// `{page}_{depth}`.
    pub id: String,
    pub name: String,
    pub depth: usize,
    /// Outgoing sessions for first-step nodes, incoming otherwise.
    pub total_traffic: u64,
}

/// Sessions moving from one node to the next, by node index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SankeyLink {
    pub source: usize,
    pub target: usize,
    pub value: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SankeyData {
    pub nodes: Vec<SankeyNode>,
    pub links: Vec<SankeyLink>,
}

/// The first `max_steps` pageviews of each multi-page session, grouped.
pub fn query_sequential_paths(
    conn: &Connection,
    scope: &QueryScope,
    max_steps: u64,
    limit: u64,
) -> Result<Vec<SequentialPath>, QueryError> {
    if max_steps < 2 {
        return Err(QueryError::InvalidArgument(format!(
            "a journey needs at least 2 steps, got {max_steps}"
        )));
    }
    let sql = Sql::text(
        "SELECT path, CAST(COUNT(*) AS BIGINT) AS \"count\" FROM (\
           SELECT session_id, list_slice(list(url ORDER BY timestamp), 1, ",
    )
    .int(max_steps)
    .push(") AS path FROM events WHERE ")
    .append(scope.where_clause()?)
    .push(
        " AND event_type = 'pageview' GROUP BY session_id\
         ) WHERE len(path) > 1 GROUP BY path ORDER BY \"count\" DESC, path LIMIT ",
    )
    .int(limit);
    fetch(conn, &sql)
}

type NodeKey<'a> = (usize, &'a str);

/// Build the Sankey graph for `paths`, truncating each to `max_steps` pages.
///
/// Nodes are keyed by (depth, page), so one page seen at two depths is two
/// nodes. Link weights are summed per node pair. Nodes are ordered by depth
/// then name and links by source then target, so the result does not depend
/// on the order of `paths`.
pub fn to_sankey(paths: &[SequentialPath], max_steps: usize) -> SankeyData {
    let mut keys: BTreeSet<NodeKey<'_>> = BTreeSet::new();
    let mut weights: BTreeMap<(NodeKey<'_>, NodeKey<'_>), u64> = BTreeMap::new();

    for SequentialPath { path, count } in paths {
        let steps = &path[..path.len().min(max_steps)];
        for (depth, pair) in steps.windows(2).enumerate() {
            let source = (depth, pair[0].as_str());
            let target = (depth + 1, pair[1].as_str());
            keys.insert(source);
            keys.insert(target);
            *weights.entry((source, target)).or_default() += count;
        }
    }

    let index: BTreeMap<NodeKey<'_>, usize> =
        keys.iter().enumerate().map(|(i, key)| (*key, i)).collect();
    let mut incoming = vec![0u64; keys.len()];
    let mut outgoing = vec![0u64; keys.len()];

    let links: Vec<SankeyLink> = weights
        .into_iter()
        .map(|((source, target), value)| {
            let (source, target) = (index[&source], index[&target]);
            outgoing[source] += value;
            incoming[target] += value;
            SankeyLink {
                source,
                target,
                value,
            }
        })
        .collect();

    let nodes = keys
        .into_iter()
        .enumerate()
        .map(|(i, (depth, name))| SankeyNode {
            id: format!("{name}_{depth}"),
            name: name.to_string(),
            depth,
            total_traffic: if depth == 0 { outgoing[i] } else { incoming[i] },
        })
        .collect();

    SankeyData { nodes, links }
}
