//! Referrer reports.
//!
//! Sessions whose `referrer_source` is `internal` are navigation inside the
//! site and never count as referral traffic. `direct` sessions are traffic
//! but not referrals, so only the channel views include them.

use crate::query::error::QueryError;
use crate::query::granularity::Granularity;
use crate::query::metrics::{session_rows_sql, SessionTotals, SESSION_TOTALS_SELECT};
use crate::query::rows::{fetch, fetch_one, RowShape};
use crate::query::scope::QueryScope;
use crate::query::sql::Sql;
use chrono::NaiveDateTime;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

/// Default row limit for the referrer table.
pub const REFERRER_TABLE_LIMIT: u64 = 100;

const NOT_INTERNAL: &str = " AND referrer_source <> 'internal'";
const REFERRALS_ONLY: &str = " AND referrer_source NOT IN ('direct', 'internal')";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerSourceAggregation {
    pub referrer_source: String,
    #[serde(rename = "visitorCount")]
    pub visitor_count: u64,
}

impl RowShape for ReferrerSourceAggregation {
    const NAME: &'static str = "ReferrerSourceAggregation";
    const COLUMNS: &'static [&'static str] = &["referrer_source", "visitorCount"];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerTrafficBySourceRow {
    pub date: NaiveDateTime,
    pub referrer_source: String,
    pub count: u64,
}

impl RowShape for ReferrerTrafficBySourceRow {
    const NAME: &'static str = "ReferrerTrafficBySourceRow";
    const COLUMNS: &'static [&'static str] = &["date", "referrer_source", "count"];
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferrerSummary {
    pub referral_sessions: u64,
    pub total_sessions: u64,
    pub top_referrer_source: Option<String>,
    /// Mean duration of multi-page referral sessions, seconds.
    pub avg_session_duration: f64,
}

#[derive(Debug, Deserialize)]
struct ReferrerSummaryRow {
    all_sessions: u64,
    top_referrer_source: Option<String>,
    #[serde(flatten)]
    referral: SessionTotals,
}

impl RowShape for ReferrerSummaryRow {
    const NAME: &'static str = "ReferrerSummary";
    const COLUMNS: &'static [&'static str] = &[
        "all_sessions",
        "top_referrer_source",
        "total_sessions",
        "bounced_sessions",
        "multi_page_sessions",
        "total_pageviews",
        "sum_session_duration_seconds",
    ];

    fn validate(&self) -> Result<(), String> {
        if self.referral.total_sessions > self.all_sessions {
            return Err("more referral sessions than sessions".to_string());
        }
        self.referral.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferrerTableRow {
    pub source_type: String,
    pub source_name: String,
    pub source_url: String,
    pub visits: u64,
    pub bounce_rate: f64,
    pub avg_visit_duration: f64,
}

#[derive(Debug, Deserialize)]
struct ReferrerTableRaw {
    source_type: String,
    source_name: String,
    source_url: String,
    #[serde(flatten)]
    totals: SessionTotals,
}

impl RowShape for ReferrerTableRaw {
    const NAME: &'static str = "ReferrerTableRow";
    const COLUMNS: &'static [&'static str] = &[
        "source_type",
        "source_name",
        "source_url",
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopReferrerUrl {
    pub referrer_url: String,
    pub visits: u64,
}

impl RowShape for TopReferrerUrl {
    const NAME: &'static str = "TopReferrerUrl";
    const COLUMNS: &'static [&'static str] = &["referrer_url", "visits"];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopChannel {
    pub channel: String,
    pub visits: u64,
}

impl RowShape for TopChannel {
    const NAME: &'static str = "TopChannel";
    const COLUMNS: &'static [&'static str] = &["channel", "visits"];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopReferrerSource {
    pub referrer_source: String,
    pub visits: u64,
}

impl RowShape for TopReferrerSource {
    const NAME: &'static str = "TopReferrerSource";
    const COLUMNS: &'static [&'static str] = &["referrer_source", "visits"];
}

/// Sessions per referrer source, internal navigation excluded.
pub fn query_referrer_distribution(
    conn: &Connection,
    scope: &QueryScope,
) -> Result<Vec<ReferrerSourceAggregation>, QueryError> {
    let sql = Sql::text(
        "SELECT referrer_source, CAST(COUNT(DISTINCT session_id) AS BIGINT) AS \"visitorCount\" \
         FROM events WHERE ",
    )
    .append(scope.where_clause()?)
    .push(NOT_INTERNAL)
    .push(" GROUP BY referrer_source ORDER BY \"visitorCount\" DESC, referrer_source");
    fetch(conn, &sql)
}

/// Sessions per referrer source per bucket. Only buckets with traffic are returned.
pub fn query_referrer_trend(
    conn: &Connection,
    scope: &QueryScope,
    granularity: Granularity,
) -> Result<Vec<ReferrerTrafficBySourceRow>, QueryError> {
    let sql = Sql::text("SELECT ")
        .append(scope.bucket(granularity, "timestamp")?)
        .push(
            " AS date, referrer_source, CAST(COUNT(DISTINCT session_id) AS BIGINT) AS \"count\" \
             FROM events WHERE ",
        )
        .append(scope.where_clause()?)
        .push(NOT_INTERNAL)
        .push(" GROUP BY 1, 2 ORDER BY 1, \"count\" DESC, 2");
    fetch(conn, &sql)
}

/// Referral share of all sessions, the busiest referral source and the mean
/// duration of referral sessions.
///
/// A session's source is the source of its first event in range.
pub fn query_referrer_summary(
    conn: &Connection,
    scope: &QueryScope,
) -> Result<ReferrerSummary, QueryError> {
    let per_session = session_rows_sql(
        scope.where_clause()?,
        Sql::text(", arg_min(referrer_source, timestamp) AS source"),
        Sql::new(),
    );
    let sql = Sql::text("WITH all_sessions AS (")
        .append(per_session)
        .push(
            "), referral AS (\
               SELECT * FROM all_sessions WHERE source NOT IN ('direct', 'internal')\
             ) \
             SELECT (SELECT CAST(COUNT(*) AS BIGINT) FROM all_sessions) AS all_sessions, \
               (SELECT source FROM referral GROUP BY source ORDER BY COUNT(*) DESC, source LIMIT 1) \
               AS top_referrer_source, ",
        )
        .push(SESSION_TOTALS_SELECT)
        .push(" FROM referral s");

    let row: ReferrerSummaryRow = fetch_one(conn, &sql)?;
    Ok(ReferrerSummary {
        referral_sessions: row.referral.total_sessions,
        total_sessions: row.all_sessions,
        top_referrer_source: row.top_referrer_source,
        avg_session_duration: row.referral.avg_session_duration(),
    })
}

/// Per referrer (type, name, url): sessions, bounce rate and visit duration.
pub fn query_referrer_table(
    conn: &Connection,
    scope: &QueryScope,
    limit: u64,
) -> Result<Vec<ReferrerTableRow>, QueryError> {
    let per_session = session_rows_sql(
        scope.where_clause()?.push(NOT_INTERNAL),
        Sql::text(
            ", COALESCE(arg_min(referrer_source, timestamp), '') AS source_type, \
             COALESCE(arg_min(referrer_source_name, timestamp), '') AS source_name, \
             COALESCE(arg_min(referrer_url, timestamp), '') AS source_url",
        ),
        Sql::new(),
    );
    let sql = Sql::text("SELECT s.source_type, s.source_name, s.source_url, ")
        .push(SESSION_TOTALS_SELECT)
        .push(" FROM (")
        .append(per_session)
        .push(
            ") s GROUP BY s.source_type, s.source_name, s.source_url \
             ORDER BY total_sessions DESC, s.source_type, s.source_name, s.source_url LIMIT ",
        )
        .int(limit);

    Ok(fetch::<ReferrerTableRaw>(conn, &sql)?
        .into_iter()
        .map(|raw| ReferrerTableRow {
            visits: raw.totals.total_sessions,
            bounce_rate: raw.totals.bounce_rate(),
            avg_visit_duration: raw.totals.avg_session_duration(),
            source_type: raw.source_type,
            source_name: raw.source_name,
            source_url: raw.source_url,
        })
        .collect())
}

/// Referring URLs by sessions, referrals only.
pub fn query_top_referrer_urls(
    conn: &Connection,
    scope: &QueryScope,
    limit: u64,
) -> Result<Vec<TopReferrerUrl>, QueryError> {
    let sql = Sql::text("SELECT referrer_url, CAST(COUNT(DISTINCT session_id) AS BIGINT) AS visits FROM events WHERE ")
        .append(scope.where_clause()?)
        .push(" AND referrer_url <> ''")
        .push(REFERRALS_ONLY)
        .push(" GROUP BY referrer_url ORDER BY visits DESC, referrer_url LIMIT ")
        .int(limit);
    fetch(conn, &sql)
}

/// Traffic channels (referrer source types) by sessions, direct included.
pub fn query_top_channels(
    conn: &Connection,
    scope: &QueryScope,
    limit: u64,
) -> Result<Vec<TopChannel>, QueryError> {
    let sql = Sql::text("SELECT referrer_source AS channel, CAST(COUNT(DISTINCT session_id) AS BIGINT) AS visits FROM events WHERE ")
        .append(scope.where_clause()?)
        .push(NOT_INTERNAL)
        .push(" GROUP BY 1 ORDER BY visits DESC, 1 LIMIT ")
        .int(limit);
    fetch(conn, &sql)
}

/// Referrer sources by sessions, referrals only.
pub fn query_top_referrer_sources(
    conn: &Connection,
    scope: &QueryScope,
    limit: u64,
) -> Result<Vec<TopReferrerSource>, QueryError> {
    let sql = Sql::text("SELECT referrer_source, CAST(COUNT(DISTINCT session_id) AS BIGINT) AS visits FROM events WHERE ")
        .append(scope.where_clause()?)
        .push(REFERRALS_ONLY)
        .push(" GROUP BY referrer_source ORDER BY visits DESC, referrer_source LIMIT ")
        .int(limit);
    fetch(conn, &sql)
}
