use crate::query::error::QueryError;
use crate::query::granularity::{fill_series, Granularity};
use crate::query::metrics::{session_rows_sql, SessionTotals, SESSION_TOTALS_SELECT};
use crate::query::rows::{fetch, RowShape};
use crate::query::scope::QueryScope;
use crate::query::sql::Sql;
use chrono::NaiveDateTime;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

/// Session quality metrics for one time bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionMetricsRow {
    pub date: NaiveDateTime,
    /// Percentage of sessions with a single pageview.
    pub bounce_rate: f64,
    /// Mean duration of multi-page sessions, whole seconds.
    pub avg_visit_duration: f64,
    pub pages_per_session: f64,
}

impl SessionMetricsRow {
    fn from_totals(date: NaiveDateTime, totals: &SessionTotals) -> Self {
        Self {
            date,
            bounce_rate: totals.bounce_rate(),
            avg_visit_duration: totals.avg_session_duration().round(),
            pages_per_session: totals.pages_per_session(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionBucket {
    date: NaiveDateTime,
    #[serde(flatten)]
    totals: SessionTotals,
}

impl RowShape for SessionBucket {
    const NAME: &'static str = "SessionBucket";
    const COLUMNS: &'static [&'static str] = &[
        "date",
        "total_sessions",
        "bounced_sessions",
        "multi_page_sessions",
        "total_pageviews",
        "sum_session_duration_seconds",
    ];

    fn validate(&self) -> Result<(), String> {
        self.totals.validate()
    }
}

/// Session metrics per bucket. A session spanning buckets counts once in each.
pub fn query_session_metrics(
    conn: &Connection,
    scope: &QueryScope,
    granularity: Granularity,
) -> Result<Vec<SessionMetricsRow>, QueryError> {
    let per_session = session_rows_sql(
        scope.where_clause()?,
        Sql::text(", ")
            .append(scope.bucket(granularity, "timestamp")?)
            .push(" AS bucket"),
        Sql::text(", bucket"),
    );
    let sql = Sql::text("SELECT s.bucket AS date, ")
        .push(SESSION_TOTALS_SELECT)
        .push(" FROM (")
        .append(per_session)
        .push(") s GROUP BY s.bucket ORDER BY s.bucket");

    let rows: Vec<SessionMetricsRow> = fetch::<SessionBucket>(conn, &sql)?
        .iter()
        .map(|row| SessionMetricsRow::from_totals(row.date, &row.totals))
        .collect();

    Ok(fill_series(
        rows,
        &scope.buckets(granularity)?,
        |row| row.date,
        |date| SessionMetricsRow::from_totals(date, &SessionTotals::default()),
    ))
}
