use crate::query::error::QueryError;
use crate::query::filters::{compile_filters, compile_one, QueryFilter};
use crate::query::rows::{fetch, RowShape};
use crate::query::sql::Sql;
use chrono::NaiveDateTime;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

/// Maximum time between the first and last step of one funnel pass.
pub const DEFAULT_FUNNEL_WINDOW_SECS: u64 = 24 * 60 * 60;

/// An ordered list of step filters.
///
/// Strict funnels require the steps in the given chronological order; other
/// funnels only require every step up to a level to occur within the window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelDefinition {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<QueryFilter>,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Deserialize)]
struct FunnelLevelRow {
    level: u64,
    visitors: u64,
}

impl RowShape for FunnelLevelRow {
    const NAME: &'static str = "FunnelLevel";
    const COLUMNS: &'static [&'static str] = &["level", "visitors"];

    fn validate(&self) -> Result<(), String> {
        if self.level == 0 {
            return Err("funnel levels start at 1".to_string());
        }
        Ok(())
    }
}

/// Steps that are fully specified; blank steps are ignored like blank filters.
fn specified_steps(funnel: &FunnelDefinition) -> Vec<&QueryFilter> {
    funnel
        .steps
        .iter()
        .filter(|s| !s.column.is_empty() && !s.operator.is_empty() && !s.value.is_empty())
        .collect()
}

/// Build the funnel statement.
///
/// Each visitor gets the highest step level reached inside one window, the
/// per-level counts are joined onto `1..=N` so empty levels read as zero, and
/// a descending running sum turns them into "reached at least this step".
pub fn build_funnel_sql(
    site_id: &str,
    funnel: &FunnelDefinition,
    range: Option<(NaiveDateTime, NaiveDateTime)>,
    filters: &[QueryFilter],
    window_secs: u64,
) -> Result<Sql, QueryError> {
    let steps = specified_steps(funnel);
    if steps.is_empty() {
        return Err(QueryError::InvalidArgument(
            "a funnel needs at least one step".to_string(),
        ));
    }
    let step_count = steps.len();

    let mut sql = Sql::text("WITH funnel_events AS (SELECT visitor_id, timestamp");
    for (i, step) in steps.iter().enumerate() {
        let predicate = compile_one(step, &format!("funnel_step_{i}"))?;
        sql = sql
            .push(", COALESCE((")
            .append(predicate)
            .push("), FALSE) AS ")
            .numbered("step_", i + 1);
    }
    sql = sql
        .push(" FROM events WHERE site_id = ")
        .param("site_id", site_id);
    if let Some((start, end)) = range {
        sql = sql
            .push(" AND timestamp >= ")
            .param("query_start_date", start)
            .push(" AND timestamp < ")
            .param("query_end_date", end);
    }
    sql = sql
        .push(" AND ")
        .append(Sql::and(compile_filters(filters)?))
        .push(")");

    sql = if funnel.strict {
        sql.append(ordered_levels(step_count, window_secs))
    } else {
        sql.append(unordered_levels(step_count, window_secs))
    };

    Ok(sql.push(
        ", level_counts AS (SELECT level, COUNT(*) AS reached FROM visitor_levels GROUP BY level)",
    )
    .push(", levels AS (SELECT UNNEST(generate_series(1, ")
    .param("step_count", step_count as u64)
    .push(")) AS level)")
    .push(
        ", joined AS (SELECT levels.level, COALESCE(level_counts.reached, 0) AS reached \
         FROM levels LEFT JOIN level_counts ON levels.level = level_counts.level) \
         SELECT level, CAST(SUM(reached) OVER (ORDER BY level DESC) AS BIGINT) AS visitors \
         FROM joined ORDER BY level",
    ))
}

/// Greedy chain: step k is the earliest match after step k-1 that is still
/// within the window of the step-1 anchor.
fn ordered_levels(step_count: usize, window_secs: u64) -> Sql {
    let mut sql = Sql::text(
        ", chain_1 AS (SELECT visitor_id, timestamp AS anchor, timestamp AS reached \
         FROM funnel_events WHERE step_1)",
    );
    for k in 2..=step_count {
        sql = sql
            .push(", ")
            .numbered("chain_", k)
            .push(" AS (SELECT c.visitor_id, c.anchor, MIN(e.timestamp) AS reached FROM ")
            .numbered("chain_", k - 1)
            .push(" c JOIN funnel_events e ON e.visitor_id = c.visitor_id AND e.")
            .numbered("step_", k)
            .push(
                " AND e.timestamp > c.reached AND date_diff('second', c.anchor, e.timestamp) <= ",
            )
            .param("window_seconds", window_secs)
            .push(" GROUP BY c.visitor_id, c.anchor)");
    }

    let reached = (1..=step_count).map(|k| {
        Sql::text("SELECT visitor_id, ")
            .int(k as u64)
            .push(" AS level FROM ")
            .numbered("chain_", k)
    });
    sql.push(", visitor_levels AS (SELECT visitor_id, MAX(level) AS level FROM (")
        .append(Sql::join(reached, " UNION ALL "))
        .push(") GROUP BY visitor_id)")
}

/// Any-order match: from each anchor event, a step holds if some event in
/// `[anchor, anchor + window]` satisfies it. The level is the longest prefix
/// of steps that all hold.
fn unordered_levels(step_count: usize, window_secs: u64) -> Sql {
    let mut sql = Sql::text(", anchored AS (SELECT a.visitor_id, a.timestamp AS anchor");
    for k in 1..=step_count {
        sql = sql
            .push(", BOOL_OR(e.")
            .numbered("step_", k)
            .push(") AS ")
            .numbered("has_", k);
    }
    let any_step = (1..=step_count).map(|k| Sql::text("a.").numbered("step_", k));
    sql = sql
        .push(
            " FROM funnel_events a JOIN funnel_events e ON e.visitor_id = a.visitor_id \
             AND e.timestamp >= a.timestamp AND date_diff('second', a.timestamp, e.timestamp) <= ",
        )
        .param("window_seconds", window_secs)
        .push(" WHERE ")
        .append(Sql::join(any_step, " OR "))
        .push(" GROUP BY a.visitor_id, a.timestamp)");

    sql = sql.push(", visitor_levels AS (SELECT visitor_id, MAX(CASE");
    for level in (1..=step_count).rev() {
        let prefix = (1..=level).map(|k| Sql::new().numbered("has_", k));
        sql = sql
            .push(" WHEN ")
            .append(Sql::join(prefix, " AND "))
            .push(" THEN ")
            .int(level as u64);
    }
    sql.push(" ELSE 0 END) AS level FROM anchored GROUP BY visitor_id)")
}

/// Cumulative visitor counts per funnel step.
///
/// The result has one entry per specified step and never increases from one
/// step to the next.
pub fn query_funnel(
    conn: &Connection,
    site_id: &str,
    funnel: &FunnelDefinition,
    range: Option<(NaiveDateTime, NaiveDateTime)>,
    filters: &[QueryFilter],
    window_secs: u64,
) -> Result<Vec<u64>, QueryError> {
    let sql = build_funnel_sql(site_id, funnel, range, filters, window_secs)?;
    let rows: Vec<FunnelLevelRow> = fetch(conn, &sql)?;

    let expected = specified_steps(funnel).len();
    let in_order = rows
        .iter()
        .enumerate()
        .all(|(i, row)| row.level == i as u64 + 1);
    if rows.len() != expected || !in_order {
        return Err(QueryError::InvalidRow {
            shape: FunnelLevelRow::NAME,
            reason: format!("expected levels 1..={expected}, got {} rows", rows.len()),
        });
    }
    Ok(rows.into_iter().map(|row| row.visitors).collect())
}

/// One step of a presented funnel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelStepReport {
    pub filter: String,
    pub visitors: u64,
    pub visitors_ratio: f64,
    pub dropoff_count: u64,
    pub dropoff_ratio: f64,
    /// This step's label and the next step's label (empty for the last step).
    pub step: [String; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VisitorRange {
    pub min: u64,
    pub max: u64,
}

/// Funnel counts with ratios and drop-offs, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelReport {
    pub name: String,
    pub visitor_count: VisitorRange,
    pub steps: Vec<FunnelStepReport>,
    pub biggest_drop_off: Option<FunnelStepReport>,
    pub conversion_rate: f64,
}

impl FunnelReport {
    /// Pair each specified step of `funnel` with its count from [`query_funnel`].
    #[allow(clippy::cast_precision_loss)]
    pub fn from_counts(funnel: &FunnelDefinition, counts: &[u64]) -> Self {
        let labels: Vec<String> = specified_steps(funnel)
            .into_iter()
            .map(QueryFilter::describe)
            .collect();

        let visitor_count = VisitorRange {
            min: counts.iter().copied().min().unwrap_or(1),
            max: counts.iter().copied().max().unwrap_or(1),
        };
        let max = visitor_count.max.max(1) as f64;

        let steps: Vec<FunnelStepReport> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let visitors = counts.get(i).copied().unwrap_or(0);
                let next = labels.get(i + 1).map(|next_label| {
                    (next_label.clone(), counts.get(i + 1).copied().unwrap_or(0))
                });
                let (next_label, next_visitors) = next.unwrap_or((String::new(), visitors));
                let dropoff_ratio = if visitors == 0 {
                    0.0
                } else {
                    1.0 - next_visitors as f64 / visitors as f64
                };
                FunnelStepReport {
                    filter: label.clone(),
                    visitors,
                    visitors_ratio: visitors as f64 / max,
                    dropoff_count: visitors.saturating_sub(next_visitors),
                    dropoff_ratio,
                    step: [label.clone(), next_label],
                }
            })
            .collect();

        let biggest_drop_off = steps
            .iter()
            .fold(None::<&FunnelStepReport>, |best, step| match best {
                Some(b) if step.dropoff_ratio <= b.dropoff_ratio => Some(b),
                _ => Some(step),
            })
            .cloned();

        Self {
            name: funnel.name.clone().unwrap_or_else(|| "Funnel".to_string()),
            visitor_count,
            steps,
            biggest_drop_off,
            conversion_rate: visitor_count.min as f64 / max,
        }
    }
}
