use crate::query::error::QueryError;
use crate::query::granularity::{fill_series, Granularity};
use crate::query::rows::{fetch, RowShape};
use crate::query::scope::QueryScope;
use crate::query::sql::Sql;
use chrono::NaiveDateTime;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

/// Pageviews in one time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageviewsRow {
    pub date: NaiveDateTime,
    pub views: u64,
}

impl RowShape for PageviewsRow {
    const NAME: &'static str = "PageviewsRow";
    const COLUMNS: &'static [&'static str] = &["date", "views"];
}

/// A page and the number of sessions that viewed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopPageRow {
    pub url: String,
    pub visitors: u64,
}

impl RowShape for TopPageRow {
    const NAME: &'static str = "TopPageRow";
    const COLUMNS: &'static [&'static str] = &["url", "visitors"];
}

/// A page and the number of sessions that started on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPageRow {
    pub url: String,
    pub visitors: u64,
}

impl RowShape for EntryPageRow {
    const NAME: &'static str = "EntryPageRow";
    const COLUMNS: &'static [&'static str] = &["url", "visitors"];
}

/// A page and the number of sessions that ended on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitPageRow {
    pub url: String,
    pub visitors: u64,
}

impl RowShape for ExitPageRow {
    const NAME: &'static str = "ExitPageRow";
    const COLUMNS: &'static [&'static str] = &["url", "visitors"];
}

/// Per-page engagement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAnalytics {
    pub path: String,
    pub visitors: u64,
    pub pageviews: u64,
    /// Share of the page's sessions that viewed only one page, two decimals.
    pub bounce_rate: f64,
    /// Mean seconds until the next pageview of the same session.
    pub avg_time: Option<f64>,
}

impl RowShape for PageAnalytics {
    const NAME: &'static str = "PageAnalytics";
    const COLUMNS: &'static [&'static str] =
        &["path", "visitors", "pageviews", "bounceRate", "avgTime"];

    fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.bounce_rate) {
            return Err(format!("bounce rate {} outside 0..=100", self.bounce_rate));
        }
        if self.avg_time.is_some_and(|t| t < 0.0) {
            return Err("negative time on page".to_string());
        }
        Ok(())
    }
}

fn pageview_scope(scope: &QueryScope) -> Result<Sql, QueryError> {
    Ok(scope
        .where_clause()?
        .push(" AND event_type = 'pageview'"))
}

/// Pageviews per bucket. Every bucket of the range is present.
pub fn query_pageviews(
    conn: &Connection,
    scope: &QueryScope,
    granularity: Granularity,
) -> Result<Vec<PageviewsRow>, QueryError> {
    let sql = Sql::text("SELECT ")
        .append(scope.bucket(granularity, "timestamp")?)
        .push(" AS date, CAST(COUNT(*) AS BIGINT) AS views FROM events WHERE ")
        .append(pageview_scope(scope)?)
        .push(" GROUP BY 1 ORDER BY 1");

    let rows = fetch::<PageviewsRow>(conn, &sql)?;
    Ok(fill_series(
        rows,
        &scope.buckets(granularity)?,
        |row| row.date,
        |date| PageviewsRow { date, views: 0 },
    ))
}

/// Most viewed pages by distinct sessions.
pub fn query_top_pages(
    conn: &Connection,
    scope: &QueryScope,
    limit: u64,
) -> Result<Vec<TopPageRow>, QueryError> {
    let sql = Sql::text("SELECT url, CAST(COUNT(DISTINCT session_id) AS BIGINT) AS visitors FROM events WHERE ")
        .append(pageview_scope(scope)?)
        .push(" GROUP BY url ORDER BY visitors DESC, url LIMIT ")
        .int(limit);
    fetch(conn, &sql)
}

/// First page of each session, counted per page.
pub fn query_entry_pages(
    conn: &Connection,
    scope: &QueryScope,
    limit: u64,
) -> Result<Vec<EntryPageRow>, QueryError> {
    fetch(conn, &boundary_pages_sql(scope, "arg_min", limit)?)
}

/// Last page of each session, counted per page.
pub fn query_exit_pages(
    conn: &Connection,
    scope: &QueryScope,
    limit: u64,
) -> Result<Vec<ExitPageRow>, QueryError> {
    fetch(conn, &boundary_pages_sql(scope, "arg_max", limit)?)
}

fn boundary_pages_sql(
    scope: &QueryScope,
    pick: &'static str,
    limit: u64,
) -> Result<Sql, QueryError> {
    Ok(Sql::text("SELECT url, CAST(COUNT(*) AS BIGINT) AS visitors FROM (SELECT session_id, ")
        .push(pick)
        .push("(url, timestamp) AS url FROM events WHERE ")
        .append(pageview_scope(scope)?)
        .push(" GROUP BY session_id) GROUP BY url ORDER BY visitors DESC, url LIMIT ")
        .int(limit))
}

/// Per-page visitors, pageviews, bounce rate and time on page.
pub fn query_page_analytics(
    conn: &Connection,
    scope: &QueryScope,
    limit: u64,
) -> Result<Vec<PageAnalytics>, QueryError> {
    let sql = Sql::text(
        "WITH page_views AS (\
           SELECT session_id, url, \
             date_diff('second', timestamp, lead(timestamp) OVER (PARTITION BY session_id ORDER BY timestamp)) AS duration_seconds \
           FROM events WHERE ",
    )
    .append(pageview_scope(scope)?)
    .push(
        "), session_pages AS (\
           SELECT session_id, COUNT(*) AS page_count FROM page_views GROUP BY session_id\
         ), page_aggregates AS (\
           SELECT p.url AS path, COUNT(DISTINCT p.session_id) AS visitors, COUNT(*) AS pageviews, \
             AVG(p.duration_seconds) AS avg_time_seconds, \
             COUNT(DISTINCT p.session_id) FILTER (WHERE s.page_count = 1) AS single_page_sessions \
           FROM page_views p JOIN session_pages s ON p.session_id = s.session_id \
           GROUP BY p.url\
         ) \
         SELECT path, CAST(visitors AS BIGINT) AS visitors, CAST(pageviews AS BIGINT) AS pageviews, \
           CAST(CASE WHEN visitors > 0 THEN round(single_page_sessions * 100.0 / visitors, 2) ELSE 0 END AS DOUBLE) AS \"bounceRate\", \
           CAST(avg_time_seconds AS DOUBLE) AS \"avgTime\" \
         FROM page_aggregates ORDER BY visitors DESC, pageviews DESC, path LIMIT ",
    )
    .int(limit);
    fetch(conn, &sql)
}
