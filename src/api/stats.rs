use crate::api::errors::ApiError;
use crate::query::filters::QueryFilter;
use crate::query::granularity::{self, Granularity};
use crate::query::scope::QueryScope;
use crate::query::sql::TIMESTAMP_FORMAT;
use crate::query::{
    campaigns, devices, events, geography, journey, metrics, pages, referrers, sessions, visitors,
};
use crate::server::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Upper bound on any `limit` query parameter.
pub const MAX_LIMIT: u64 = 1000;
const DEFAULT_LIMIT: u64 = 10;

/// Query parameters shared by the stats endpoints.
#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub site_id: String,
    #[serde(default = "default_period")]
    pub period: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// `minute`, `hour` or `day`; adjusted to what the range allows.
    pub granularity: Option<String>,
    /// JSON array of `{column, operator, value}` objects.
    pub filters: Option<String>,
    pub limit: Option<u64>,
}

fn default_period() -> String {
    "30d".to_string()
}

/// Validate that a `site_id` parameter is safe for use in queries.
///
/// - Must be non-empty and at most 256 bytes.
/// - Must contain only alphanumeric ASCII characters or `.`, `-`, `_`, `:`.
pub fn validate_site_id(site_id: &str) -> Result<(), ApiError> {
    if site_id.is_empty() {
        return Err(ApiError::BadRequest(
            "site_id must not be empty".to_string(),
        ));
    }
    if site_id.len() > 256 {
        return Err(ApiError::BadRequest(
            "site_id must be at most 256 characters".to_string(),
        ));
    }
    let valid = site_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'));
    if !valid {
        return Err(ApiError::BadRequest(
            "site_id may only contain alphanumeric characters, '.', '-', '_', ':'".to_string(),
        ));
    }
    Ok(())
}

/// Parse one end of an explicit range.
///
/// A bare date used as the end bound includes that whole day.
fn parse_bound(value: &str, is_end: bool) -> Result<NaiveDateTime, ApiError> {
    for format in [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(ts);
        }
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest(format!(
            "Invalid date '{value}'. Use YYYY-MM-DD or YYYY-MM-DD HH:MM:SS."
        ))
    })?;
    let date = if is_end {
        date.checked_add_days(Days::new(1))
            .ok_or_else(|| ApiError::BadRequest(format!("Date out of range: {value}")))?
    } else {
        date
    };
    Ok(date.and_time(NaiveTime::MIN))
}

/// Resolve `[start, end)` from explicit bounds or a named period ending today.
pub fn resolve_range(
    period: &str,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<(NaiveDateTime, NaiveDateTime), ApiError> {
    let (start, end) = if let (Some(start), Some(end)) = (start_date, end_date) {
        (parse_bound(start, false)?, parse_bound(end, true)?)
    } else {
        let today = chrono::Utc::now().date_naive();
        let tomorrow = today + Days::new(1);
        let start = match period {
            "day" | "today" => today,
            "7d" => today - Days::new(7),
            "30d" => today - Days::new(30),
            "90d" => today - Days::new(90),
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "Invalid period: {period}. Use 'day', '7d', '30d', '90d', or provide start_date and end_date."
                )));
            }
        };
        (start.and_time(NaiveTime::MIN), tomorrow.and_time(NaiveTime::MIN))
    };
    if start >= end {
        return Err(ApiError::BadRequest(format!(
            "start_date ({start}) must be before end_date ({end})"
        )));
    }
    Ok((start, end))
}

/// Decode the `filters` parameter; a missing or blank value means no filters.
pub fn parse_filters(raw: Option<&str>) -> Result<Vec<QueryFilter>, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| ApiError::BadRequest(format!("Invalid filters: {e}"))),
    }
}

impl StatsParams {
    /// Validate the site and build the query scope for this request.
    pub fn scope(&self) -> Result<QueryScope, ApiError> {
        validate_site_id(&self.site_id)?;
        let (start, end) = resolve_range(
            &self.period,
            self.start_date.as_deref(),
            self.end_date.as_deref(),
        )?;
        let filters = parse_filters(self.filters.as_deref())?;
        Ok(QueryScope::new(&self.site_id, start, end).with_filters(filters))
    }

    pub fn granularity(&self, scope: &QueryScope) -> Result<Granularity, ApiError> {
        let requested = self
            .granularity
            .as_deref()
            .map(str::parse::<Granularity>)
            .transpose()?;
        Ok(granularity::resolve(requested, scope.start, scope.end))
    }

    pub fn limit_or(&self, default: u64) -> u64 {
        self.limit.unwrap_or(default).min(MAX_LIMIT)
    }
}

/// Dashboard summary: totals plus the main time series.
#[derive(Debug, Serialize)]
pub struct Overview {
    pub granularity: Granularity,
    pub metrics: metrics::CoreMetrics,
    pub visitors: Vec<visitors::UniqueVisitorsRow>,
    pub pageviews: Vec<pages::PageviewsRow>,
    pub sessions: Vec<sessions::SessionMetricsRow>,
}

/// GET /api/stats/overview: Core metrics and time series, queried in parallel.
pub async fn get_overview(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Overview>, ApiError> {
    let scope = params.scope()?;
    let granularity = params.granularity(&scope)?;

    let (s1, s2, s3, s4) = (scope.clone(), scope.clone(), scope.clone(), scope);
    let (metrics, visitors, pageviews, sessions) = tokio::try_join!(
        state.store.run(move |conn| metrics::query_core_metrics(conn, &s1)),
        state
            .store
            .run(move |conn| visitors::query_unique_visitors(conn, &s2, granularity)),
        state
            .store
            .run(move |conn| pages::query_pageviews(conn, &s3, granularity)),
        state
            .store
            .run(move |conn| sessions::query_session_metrics(conn, &s4, granularity)),
    )?;

    Ok(Json(Overview {
        granularity,
        metrics,
        visitors,
        pageviews,
        sessions,
    }))
}

/// GET /api/stats/visitors: First-seen visitors per bucket.
pub async fn get_visitors(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<visitors::UniqueVisitorsRow>>, ApiError> {
    let scope = params.scope()?;
    let granularity = params.granularity(&scope)?;
    let rows = state
        .store
        .run(move |conn| visitors::query_unique_visitors(conn, &scope, granularity))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/pageviews: Pageviews per bucket.
pub async fn get_pageviews(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<pages::PageviewsRow>>, ApiError> {
    let scope = params.scope()?;
    let granularity = params.granularity(&scope)?;
    let rows = state
        .store
        .run(move |conn| pages::query_pageviews(conn, &scope, granularity))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/sessions: Bounce rate, visit duration and depth per bucket.
pub async fn get_sessions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<sessions::SessionMetricsRow>>, ApiError> {
    let scope = params.scope()?;
    let granularity = params.granularity(&scope)?;
    let rows = state
        .store
        .run(move |conn| sessions::query_session_metrics(conn, &scope, granularity))
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct ActiveParams {
    pub site_id: String,
    pub minutes: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ActiveVisitors {
    pub active_visitors: u64,
    pub window_minutes: u32,
}

/// GET /api/stats/active: Visitors seen in the last few minutes.
pub async fn get_active(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActiveParams>,
) -> Result<Json<ActiveVisitors>, ApiError> {
    validate_site_id(&params.site_id)?;
    let minutes = params
        .minutes
        .unwrap_or(visitors::DEFAULT_ACTIVE_WINDOW_MINUTES);
    let site_id = params.site_id;
    let now = chrono::Utc::now().naive_utc();
    let active_visitors = state
        .store
        .run(move |conn| visitors::query_active_visitors(conn, &site_id, now, minutes))
        .await?;
    Ok(Json(ActiveVisitors {
        active_visitors,
        window_minutes: minutes,
    }))
}

/// GET /api/stats/pages: Per-page visitors, views, bounce rate and time on page.
pub async fn get_pages(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<pages::PageAnalytics>>, ApiError> {
    let scope = params.scope()?;
    let limit = params.limit_or(DEFAULT_LIMIT);
    let rows = state
        .store
        .run(move |conn| pages::query_page_analytics(conn, &scope, limit))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/pages/top
pub async fn get_top_pages(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<pages::TopPageRow>>, ApiError> {
    let scope = params.scope()?;
    let limit = params.limit_or(DEFAULT_LIMIT);
    let rows = state
        .store
        .run(move |conn| pages::query_top_pages(conn, &scope, limit))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/pages/entry
pub async fn get_entry_pages(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<pages::EntryPageRow>>, ApiError> {
    let scope = params.scope()?;
    let limit = params.limit_or(DEFAULT_LIMIT);
    let rows = state
        .store
        .run(move |conn| pages::query_entry_pages(conn, &scope, limit))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/pages/exit
pub async fn get_exit_pages(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<pages::ExitPageRow>>, ApiError> {
    let scope = params.scope()?;
    let limit = params.limit_or(DEFAULT_LIMIT);
    let rows = state
        .store
        .run(move |conn| pages::query_exit_pages(conn, &scope, limit))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/devices/types
pub async fn get_device_types(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<devices::DeviceTypeRow>>, ApiError> {
    let scope = params.scope()?;
    let rows = state
        .store
        .run(move |conn| devices::query_device_types(conn, &scope))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/devices/browsers
pub async fn get_browsers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<devices::BrowserRow>>, ApiError> {
    let scope = params.scope()?;
    let rows = state
        .store
        .run(move |conn| devices::query_browsers(conn, &scope))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/devices/os
pub async fn get_operating_systems(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<devices::OperatingSystemRow>>, ApiError> {
    let scope = params.scope()?;
    let rows = state
        .store
        .run(move |conn| devices::query_operating_systems(conn, &scope))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/devices/trend: Visitors per device type per bucket.
pub async fn get_device_trend(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<devices::DeviceUsageTrendRow>>, ApiError> {
    let scope = params.scope()?;
    let granularity = params.granularity(&scope)?;
    let rows = state
        .store
        .run(move |conn| devices::query_device_usage_trend(conn, &scope, granularity))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/referrers/distribution
pub async fn get_referrer_distribution(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<referrers::ReferrerSourceAggregation>>, ApiError> {
    let scope = params.scope()?;
    let rows = state
        .store
        .run(move |conn| referrers::query_referrer_distribution(conn, &scope))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/referrers/trend
pub async fn get_referrer_trend(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<referrers::ReferrerTrafficBySourceRow>>, ApiError> {
    let scope = params.scope()?;
    let granularity = params.granularity(&scope)?;
    let rows = state
        .store
        .run(move |conn| referrers::query_referrer_trend(conn, &scope, granularity))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/referrers/summary
pub async fn get_referrer_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<referrers::ReferrerSummary>, ApiError> {
    let scope = params.scope()?;
    let summary = state
        .store
        .run(move |conn| referrers::query_referrer_summary(conn, &scope))
        .await?;
    Ok(Json(summary))
}

/// GET /api/stats/referrers/table
pub async fn get_referrer_table(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<referrers::ReferrerTableRow>>, ApiError> {
    let scope = params.scope()?;
    let limit = params.limit_or(referrers::REFERRER_TABLE_LIMIT);
    let rows = state
        .store
        .run(move |conn| referrers::query_referrer_table(conn, &scope, limit))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/referrers/urls
pub async fn get_top_referrer_urls(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<referrers::TopReferrerUrl>>, ApiError> {
    let scope = params.scope()?;
    let limit = params.limit_or(DEFAULT_LIMIT);
    let rows = state
        .store
        .run(move |conn| referrers::query_top_referrer_urls(conn, &scope, limit))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/referrers/sources
pub async fn get_top_referrer_sources(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<referrers::TopReferrerSource>>, ApiError> {
    let scope = params.scope()?;
    let limit = params.limit_or(DEFAULT_LIMIT);
    let rows = state
        .store
        .run(move |conn| referrers::query_top_referrer_sources(conn, &scope, limit))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/referrers/channels
pub async fn get_top_channels(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<referrers::TopChannel>>, ApiError> {
    let scope = params.scope()?;
    let limit = params.limit_or(DEFAULT_LIMIT);
    let rows = state
        .store
        .run(move |conn| referrers::query_top_channels(conn, &scope, limit))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/campaigns: Engagement per campaign name.
pub async fn get_campaigns(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<campaigns::CampaignBreakdownItem>>, ApiError> {
    let scope = params.scope()?;
    let rows = state
        .store
        .run(move |conn| campaigns::query_campaign_performance(conn, &scope))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/campaigns/breakdown/{dimension}
pub async fn get_campaign_breakdown(
    State(state): State<Arc<AppState>>,
    Path(dimension): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<campaigns::CampaignBreakdownItem>>, ApiError> {
    let dimension: campaigns::UtmDimension = dimension
        .parse()
        .map_err(|_| ApiError::NotFound(format!("Unknown campaign dimension: {dimension}")))?;
    let scope = params.scope()?;
    let rows = state
        .store
        .run(move |conn| campaigns::query_campaign_breakdown(conn, &scope, dimension))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/campaigns/landing-pages
pub async fn get_campaign_landing_pages(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<campaigns::CampaignLandingPagePerformanceItem>>, ApiError> {
    let scope = params.scope()?;
    let rows = state
        .store
        .run(move |conn| campaigns::query_campaign_landing_pages(conn, &scope))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/campaigns/trend
pub async fn get_campaign_trend(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<campaigns::CampaignTrendRow>>, ApiError> {
    let scope = params.scope()?;
    let granularity = params.granularity(&scope)?;
    let rows = state
        .store
        .run(move |conn| campaigns::query_campaign_trend(conn, &scope, granularity))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/countries
pub async fn get_countries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<geography::GeoVisitor>>, ApiError> {
    let scope = params.scope()?;
    let limit = params.limit_or(DEFAULT_LIMIT);
    let rows = state
        .store
        .run(move |conn| geography::query_visitors_by_country(conn, &scope, limit))
        .await?;
    Ok(Json(rows))
}

/// GET /api/stats/events: Occurrence totals per custom event.
pub async fn get_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<events::EventTypeRow>>, ApiError> {
    let scope = params.scope()?;
    let rows = state
        .store
        .run(move |conn| events::query_event_occurrences(conn, &scope))
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct EventNameParams {
    pub event_name: String,
}

/// GET /api/stats/events/properties?event_name=...
pub async fn get_event_properties(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
    Query(event): Query<EventNameParams>,
) -> Result<Json<events::EventPropertiesOverview>, ApiError> {
    if event.event_name.is_empty() || event.event_name.len() > 256 {
        return Err(ApiError::BadRequest("Invalid event_name".to_string()));
    }
    let scope = params.scope()?;
    let overview = state
        .store
        .run(move |conn| events::query_event_properties(conn, &scope, &event.event_name))
        .await?;
    Ok(Json(overview))
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub offset: u64,
}

/// GET /api/stats/events/recent: Event log, newest first.
pub async fn get_recent_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
    Query(page): Query<PageParams>,
) -> Result<Json<Vec<events::EventLogEntry>>, ApiError> {
    let scope = params.scope()?;
    let limit = params.limit_or(50);
    let rows = state
        .store
        .run(move |conn| events::query_recent_events(conn, &scope, limit, page.offset))
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
pub struct JourneyReport {
    pub paths: Vec<journey::SequentialPath>,
    pub sankey: journey::SankeyData,
}

/// GET /api/stats/journey: Common page sequences and their Sankey layout.
pub async fn get_journey(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<JourneyReport>, ApiError> {
    let scope = params.scope()?;
    let limit = params.limit_or(journey::DEFAULT_PATH_LIMIT);
    let max_steps = state.config.journey_max_steps;
    let paths = state
        .store
        .run(move |conn| journey::query_sequential_paths(conn, &scope, max_steps, limit))
        .await?;
    let sankey = journey::to_sankey(&paths, usize::try_from(max_steps).unwrap_or(usize::MAX));
    Ok(Json(JourneyReport { paths, sankey }))
}
