//! UTM campaign reports.
//!
//! Only pageviews carrying a non-empty `utm_campaign` count as campaign
//! traffic. Durations are rendered with [`format_duration`].

use crate::query::error::QueryError;
use crate::query::granularity::Granularity;
use crate::query::metrics::{format_duration, session_rows_sql, SessionTotals, SESSION_TOTALS_SELECT};
use crate::query::rows::{fetch, RowShape};
use crate::query::scope::QueryScope;
use crate::query::sql::{AllowList, Identifier, Sql};
use chrono::NaiveDateTime;
use duckdb::Connection;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// UTM columns a campaign report may group on.
pub const UTM_COLUMNS: AllowList = AllowList::new(
    "utm",
    &["utm_campaign", "utm_source", "utm_medium", "utm_content", "utm_term"],
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UtmDimension {
    Campaign,
    Source,
    Medium,
    Content,
    Term,
}

impl UtmDimension {
    pub const fn column_name(self) -> &'static str {
        match self {
            Self::Campaign => "utm_campaign",
            Self::Source => "utm_source",
            Self::Medium => "utm_medium",
            Self::Content => "utm_content",
            Self::Term => "utm_term",
        }
    }

    /// Field name carrying the dimension value in report rows.
    pub const fn key(self) -> &'static str {
        match self {
            Self::Campaign => "name",
            Self::Source => "source",
            Self::Medium => "medium",
            Self::Content => "content",
            Self::Term => "term",
        }
    }
}

impl std::str::FromStr for UtmDimension {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "campaign" | "utm_campaign" => Ok(Self::Campaign),
            "source" | "utm_source" => Ok(Self::Source),
            "medium" | "utm_medium" => Ok(Self::Medium),
            "content" | "utm_content" => Ok(Self::Content),
            "term" | "utm_term" => Ok(Self::Term),
            other => Err(QueryError::InvalidArgument(format!(
                "unknown UTM dimension '{other}'"
            ))),
        }
    }
}

/// Engagement metrics shared by every campaign report row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignMetrics {
    pub visitors: u64,
    /// Percentage, one decimal.
    pub bounce_rate: f64,
    /// Formatted as `1h 2m 3s`.
    pub avg_session_duration: String,
    pub pages_per_session: f64,
}

impl CampaignMetrics {
    fn new(visitors: u64, totals: &SessionTotals) -> Self {
        Self {
            visitors,
            bounce_rate: totals.bounce_rate(),
            avg_session_duration: format_duration(totals.avg_session_duration()),
            pages_per_session: totals.pages_per_session(),
        }
    }
}

/// Metrics for one value of a UTM dimension.
///
/// Serializes with the value under [`UtmDimension::key`], so a campaign row
/// reads `{"name": ..}` and a source row `{"source": ..}`.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignBreakdownItem {
    pub dimension: UtmDimension,
    pub value: String,
    pub metrics: CampaignMetrics,
}

impl Serialize for CampaignBreakdownItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(5))?;
        map.serialize_entry(self.dimension.key(), &self.value)?;
        map.serialize_entry("visitors", &self.metrics.visitors)?;
        map.serialize_entry("bounceRate", &self.metrics.bounce_rate)?;
        map.serialize_entry("avgSessionDuration", &self.metrics.avg_session_duration)?;
        map.serialize_entry("pagesPerSession", &self.metrics.pages_per_session)?;
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignLandingPagePerformanceItem {
    pub campaign_name: String,
    pub landing_page_url: String,
    #[serde(flatten)]
    pub metrics: CampaignMetrics,
}

/// Distinct visitors of one campaign in one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignTrendRow {
    pub date: NaiveDateTime,
    pub utm_campaign: String,
    pub visitors: u64,
}

impl RowShape for CampaignTrendRow {
    const NAME: &'static str = "CampaignTrendRow";
    const COLUMNS: &'static [&'static str] = &["date", "utm_campaign", "visitors"];
}

#[derive(Debug, Deserialize)]
struct CampaignRaw {
    dimension_value: String,
    total_visitors: u64,
    #[serde(flatten)]
    totals: SessionTotals,
}

impl RowShape for CampaignRaw {
    const NAME: &'static str = "CampaignUtmRow";
    const COLUMNS: &'static [&'static str] = &[
        "dimension_value",
        "total_visitors",
        "total_sessions",
        "bounced_sessions",
        "multi_page_sessions",
        "total_pageviews",
        "sum_session_duration_seconds",
    ];

    fn validate(&self) -> Result<(), String> {
        if self.total_visitors > self.totals.total_sessions {
            return Err("more visitors than sessions".to_string());
        }
        self.totals.validate()
    }
}

#[derive(Debug, Deserialize)]
struct LandingPageRaw {
    utm_campaign_name: String,
    landing_page_url: String,
    total_visitors: u64,
    #[serde(flatten)]
    totals: SessionTotals,
}

impl RowShape for LandingPageRaw {
    const NAME: &'static str = "CampaignLandingPageRow";
    const COLUMNS: &'static [&'static str] = &[
        "utm_campaign_name",
        "landing_page_url",
        "total_visitors",
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

fn campaign_pageviews(scope: &QueryScope) -> Result<Sql, QueryError> {
    Ok(scope
        .where_clause()?
        .push(" AND event_type = 'pageview' AND utm_campaign <> ''"))
}

/// Campaign traffic grouped by one UTM dimension, most visitors first.
pub fn query_campaign_breakdown(
    conn: &Connection,
    scope: &QueryScope,
    dimension: UtmDimension,
) -> Result<Vec<CampaignBreakdownItem>, QueryError> {
    let column = Identifier::new(dimension.column_name(), &UTM_COLUMNS)?;

    let per_session = session_rows_sql(
        campaign_pageviews(scope)?
            .push(" AND ")
            .ident(column)
            .push(" <> ''"),
        Sql::text(", visitor_id, ")
            .ident(column)
            .push(" AS dimension_value"),
        Sql::text(", visitor_id, ").ident(column),
    );
    let sql = Sql::text(
        "SELECT s.dimension_value, CAST(COUNT(DISTINCT s.visitor_id) AS BIGINT) AS total_visitors, ",
    )
    .push(SESSION_TOTALS_SELECT)
    .push(" FROM (")
    .append(per_session)
    .push(") s GROUP BY s.dimension_value ORDER BY total_visitors DESC, s.dimension_value");

    Ok(fetch::<CampaignRaw>(conn, &sql)?
        .into_iter()
        .map(|raw| CampaignBreakdownItem {
            dimension,
            metrics: CampaignMetrics::new(raw.total_visitors, &raw.totals),
            value: raw.dimension_value,
        })
        .collect())
}

/// Per-campaign performance.
pub fn query_campaign_performance(
    conn: &Connection,
    scope: &QueryScope,
) -> Result<Vec<CampaignBreakdownItem>, QueryError> {
    query_campaign_breakdown(conn, scope, UtmDimension::Campaign)
}

/// Performance of each (campaign, landing page) pair, where the landing page
/// is the first page of the session.
pub fn query_campaign_landing_pages(
    conn: &Connection,
    scope: &QueryScope,
) -> Result<Vec<CampaignLandingPagePerformanceItem>, QueryError> {
    let per_session = session_rows_sql(
        campaign_pageviews(scope)?,
        Sql::text(
            ", arg_min(visitor_id, timestamp) AS visitor_id, \
             arg_min(utm_campaign, timestamp) AS utm_campaign, \
             arg_min(url, timestamp) AS landing_page_url",
        ),
        Sql::new(),
    );
    let sql = Sql::text(
        "SELECT s.utm_campaign AS utm_campaign_name, s.landing_page_url, \
         CAST(COUNT(DISTINCT s.visitor_id) AS BIGINT) AS total_visitors, ",
    )
    .push(SESSION_TOTALS_SELECT)
    .push(" FROM (")
    .append(per_session)
    .push(
        ") s GROUP BY s.utm_campaign, s.landing_page_url \
         ORDER BY s.utm_campaign, total_visitors DESC, s.landing_page_url",
    );

    Ok(fetch::<LandingPageRaw>(conn, &sql)?
        .into_iter()
        .map(|raw| CampaignLandingPagePerformanceItem {
            metrics: CampaignMetrics::new(raw.total_visitors, &raw.totals),
            campaign_name: raw.utm_campaign_name,
            landing_page_url: raw.landing_page_url,
        })
        .collect())
}

/// Visitors per campaign per bucket. Only buckets with traffic are returned.
pub fn query_campaign_trend(
    conn: &Connection,
    scope: &QueryScope,
    granularity: Granularity,
) -> Result<Vec<CampaignTrendRow>, QueryError> {
    let sql = Sql::text("SELECT ")
        .append(scope.bucket(granularity, "timestamp")?)
        .push(
            " AS date, utm_campaign, CAST(COUNT(DISTINCT visitor_id) AS BIGINT) AS visitors \
             FROM events WHERE ",
        )
        .append(scope.where_clause()?)
        .push(" AND utm_campaign <> '' GROUP BY 1, 2 ORDER BY 1, 2");
    fetch(conn, &sql)
}
