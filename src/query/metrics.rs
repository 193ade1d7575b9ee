use crate::query::error::QueryError;
use crate::query::rows::{fetch_one, RowShape};
use crate::query::scope::QueryScope;
use crate::query::sql::Sql;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

/// Session totals from which the derived metrics are computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct SessionTotals {
    pub total_sessions: u64,
    /// Sessions with exactly one pageview.
    pub bounced_sessions: u64,
    /// Sessions with more than one pageview.
    pub multi_page_sessions: u64,
    pub total_pageviews: u64,
    /// Summed first-to-last event span of multi-page sessions.
    pub sum_session_duration_seconds: u64,
}

impl RowShape for SessionTotals {
    const NAME: &'static str = "SessionTotals";
    const COLUMNS: &'static [&'static str] = &[
        "total_sessions",
        "bounced_sessions",
        "multi_page_sessions",
        "total_pageviews",
        "sum_session_duration_seconds",
    ];

    fn validate(&self) -> Result<(), String> {
        if self.bounced_sessions + self.multi_page_sessions > self.total_sessions {
            return Err("bounced and multi-page sessions exceed total sessions".to_string());
        }
        Ok(())
    }
}

impl SessionTotals {
    /// Percentage of sessions that bounced, one decimal.
    pub fn bounce_rate(&self) -> f64 {
        round1(ratio(self.bounced_sessions, self.total_sessions) * 100.0)
    }

    /// Mean duration of multi-page sessions in seconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_session_duration(&self) -> f64 {
        if self.multi_page_sessions == 0 {
            return 0.0;
        }
        self.sum_session_duration_seconds as f64 / self.multi_page_sessions as f64
    }

    /// Pageviews per session, one decimal.
    pub fn pages_per_session(&self) -> f64 {
        round1(ratio(self.total_pageviews, self.total_sessions))
    }
}

/// Per-session aggregates inside the given WHERE clause, one row per
/// `session_id` plus any extra grouping columns supplied by the caller.
///
/// Columns: `session_id`, `pageviews`, `duration_seconds`, then `extra`.
pub fn session_rows_sql(where_clause: Sql, extra_select: Sql, extra_group: Sql) -> Sql {
    Sql::text(
        "SELECT session_id, \
         COUNT(*) FILTER (WHERE event_type = 'pageview') AS pageviews, \
         date_diff('second', MIN(timestamp), MAX(timestamp)) AS duration_seconds",
    )
    .append(extra_select)
    .push(" FROM events WHERE ")
    .append(where_clause)
    .push(" GROUP BY session_id")
    .append(extra_group)
}

/// Select list turning per-session rows (aliased `s`) into [`SessionTotals`].
pub const SESSION_TOTALS_SELECT: &str = "CAST(COUNT(*) AS BIGINT) AS total_sessions, \
     CAST(COUNT(*) FILTER (WHERE s.pageviews = 1) AS BIGINT) AS bounced_sessions, \
     CAST(COUNT(*) FILTER (WHERE s.pageviews > 1) AS BIGINT) AS multi_page_sessions, \
     CAST(COALESCE(SUM(s.pageviews), 0) AS BIGINT) AS total_pageviews, \
     CAST(COALESCE(SUM(s.duration_seconds) FILTER (WHERE s.pageviews > 1), 0) AS BIGINT) \
     AS sum_session_duration_seconds";

/// Core metric results for a given time range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreMetrics {
    pub unique_visitors: u64,
    pub total_pageviews: u64,
    pub total_sessions: u64,
    pub bounce_rate: f64,
    pub avg_visit_duration_secs: f64,
    pub pages_per_session: f64,
}

#[derive(Debug, Deserialize)]
struct CoreRow {
    unique_visitors: u64,
    #[serde(flatten)]
    totals: SessionTotals,
}

impl RowShape for CoreRow {
    const NAME: &'static str = "CoreMetrics";
    const COLUMNS: &'static [&'static str] = &[
        "unique_visitors",
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

/// Query core metrics for a site within a date range.
pub fn query_core_metrics(conn: &Connection, scope: &QueryScope) -> Result<CoreMetrics, QueryError> {
    let sql = Sql::text("SELECT (SELECT CAST(COUNT(DISTINCT visitor_id) AS BIGINT) FROM events WHERE ")
        .append(scope.where_clause()?)
        .push(") AS unique_visitors, ")
        .push(SESSION_TOTALS_SELECT)
        .push(" FROM (")
        .append(session_rows_sql(scope.where_clause()?, Sql::new(), Sql::new()))
        .push(") s");

    let row: CoreRow = fetch_one(conn, &sql)?;
    Ok(CoreMetrics {
        unique_visitors: row.unique_visitors,
        total_pageviews: row.totals.total_pageviews,
        total_sessions: row.totals.total_sessions,
        bounce_rate: row.totals.bounce_rate(),
        avg_visit_duration_secs: row.totals.avg_session_duration(),
        pages_per_session: row.totals.pages_per_session(),
    })
}

/// `numerator / denominator`, or 0 when there is nothing to divide by.
#[allow(clippy::cast_precision_loss)]
pub fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Render seconds as `1h 2m 3s`; hours and minutes are omitted while zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
