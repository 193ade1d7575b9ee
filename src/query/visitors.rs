use crate::query::error::QueryError;
use crate::query::granularity::{fill_series, Granularity};
use crate::query::rows::{fetch, fetch_one, RowShape};
use crate::query::scope::QueryScope;
use crate::query::sql::Sql;
use chrono::{NaiveDateTime, TimeDelta};
use duckdb::Connection;
use serde::{Deserialize, Serialize};

/// Default look-back for the active visitors counter.
pub const DEFAULT_ACTIVE_WINDOW_MINUTES: u32 = 5;

/// New unique visitors per bucket, keyed on each visitor's first appearance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueVisitorsRow {
    pub date: NaiveDateTime,
    pub unique_visitors: u64,
}

impl RowShape for UniqueVisitorsRow {
    const NAME: &'static str = "UniqueVisitorsRow";
    const COLUMNS: &'static [&'static str] = &["date", "unique_visitors"];
}

#[derive(Debug, Deserialize)]
struct VisitorCount {
    visitors: u64,
}

impl RowShape for VisitorCount {
    const NAME: &'static str = "VisitorCount";
    const COLUMNS: &'static [&'static str] = &["visitors"];
}

/// Unique visitors per bucket. Every bucket of the range is present.
pub fn query_unique_visitors(
    conn: &Connection,
    scope: &QueryScope,
    granularity: Granularity,
) -> Result<Vec<UniqueVisitorsRow>, QueryError> {
    let sql = Sql::text("WITH first_appearances AS (SELECT visitor_id, MIN(timestamp) AS custom_date FROM events WHERE ")
        .append(scope.where_clause()?)
        .push(" GROUP BY visitor_id) SELECT ")
        .append(scope.bucket(granularity, "custom_date")?)
        .push(
            " AS date, CAST(COUNT(*) AS BIGINT) AS unique_visitors \
             FROM first_appearances GROUP BY 1 ORDER BY 1",
        );

    let rows = fetch::<UniqueVisitorsRow>(conn, &sql)?;
    Ok(fill_series(
        rows,
        &scope.buckets(granularity)?,
        |row| row.date,
        |date| UniqueVisitorsRow {
            date,
            unique_visitors: 0,
        },
    ))
}

/// Distinct visitors over the whole range.
pub fn query_total_unique_visitors(conn: &Connection, scope: &QueryScope) -> Result<u64, QueryError> {
    let sql = Sql::text("SELECT CAST(COUNT(DISTINCT visitor_id) AS BIGINT) AS visitors FROM events WHERE ")
        .append(scope.where_clause()?);
    Ok(fetch_one::<VisitorCount>(conn, &sql)?.visitors)
}

/// Distinct visitors seen in the `minutes` before `now`.
pub fn query_active_visitors(
    conn: &Connection,
    site_id: &str,
    now: NaiveDateTime,
    minutes: u32,
) -> Result<u64, QueryError> {
    if minutes == 0 {
        return Err(QueryError::InvalidArgument(
            "active window must be at least one minute".to_string(),
        ));
    }
    let since = now - TimeDelta::minutes(i64::from(minutes));
    let sql = Sql::text("SELECT CAST(COUNT(DISTINCT visitor_id) AS BIGINT) AS visitors FROM events WHERE site_id = ")
        .param("site_id", site_id)
        .push(" AND timestamp >= ")
        .param("since", since)
        .push(" AND timestamp <= ")
        .param("now", now);
    Ok(fetch_one::<VisitorCount>(conn, &sql)?.visitors)
}
