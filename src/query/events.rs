//! Custom event reports.

use crate::query::error::QueryError;
use crate::query::metrics::{ratio, round1};
use crate::query::rows::{fetch, fetch_one, RowShape};
use crate::query::scope::QueryScope;
use crate::query::sql::Sql;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

/// Most frequent values reported per event property.
pub const MAX_TOP_VALUES: usize = 10;

/// Occurrence totals for one custom event name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventTypeRow {
    pub event_name: String,
    pub count: u64,
    pub unique_users: u64,
    /// `YYYY-MM-DD HH:MM:SS` of the latest occurrence.
    pub last_seen: String,
    /// Occurrences per distinct visitor, two decimals.
    pub avg_per_user: f64,
}

#[derive(Debug, Deserialize)]
struct EventOccurrenceRaw {
    event_name: String,
    count: u64,
    unique_users: u64,
    last_seen: String,
}

impl RowShape for EventOccurrenceRaw {
    const NAME: &'static str = "EventTypeRow";
    const COLUMNS: &'static [&'static str] = &["event_name", "count", "unique_users", "last_seen"];

    fn validate(&self) -> Result<(), String> {
        if self.unique_users == 0 || self.unique_users > self.count {
            return Err(format!(
                "{} unique users for {} occurrences",
                self.unique_users, self.count
            ));
        }
        Ok(())
    }
}

/// One value of an event property and how often it occurred.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPropertyValue {
    pub value: String,
    pub count: u64,
    /// Share of the property's occurrences, one decimal.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPropertyAnalytics {
    pub property_name: String,
    pub unique_value_count: u64,
    pub total_occurrences: u64,
    pub top_values: Vec<EventPropertyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPropertiesOverview {
    pub event_name: String,
    pub total_events: u64,
    pub properties: Vec<EventPropertyAnalytics>,
}

#[derive(Debug, Deserialize)]
struct EventTotal {
    total_events: u64,
}

impl RowShape for EventTotal {
    const NAME: &'static str = "EventTotal";
    const COLUMNS: &'static [&'static str] = &["total_events"];
}

/// One of the top values of a property, with the property's totals repeated.
#[derive(Debug, Deserialize)]
struct PropertyValueRow {
    property_name: String,
    value: String,
    count: u64,
    total_occurrences: u64,
    unique_value_count: u64,
}

impl RowShape for PropertyValueRow {
    const NAME: &'static str = "PropertyValueRow";
    const COLUMNS: &'static [&'static str] = &[
        "property_name",
        "value",
        "count",
        "total_occurrences",
        "unique_value_count",
    ];

    fn validate(&self) -> Result<(), String> {
        if self.count == 0 || self.count > self.total_occurrences {
            return Err(format!(
                "value count {} outside property total {}",
                self.count, self.total_occurrences
            ));
        }
        Ok(())
    }
}

/// A single custom event as shown in the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: String,
    pub event_name: String,
    pub visitor_id: String,
    pub url: String,
    pub custom_event_json: String,
    pub country_code: Option<String>,
    pub device_type: String,
    pub browser: String,
}

impl RowShape for EventLogEntry {
    const NAME: &'static str = "EventLogEntry";
    const COLUMNS: &'static [&'static str] = &[
        "timestamp",
        "event_name",
        "visitor_id",
        "url",
        "custom_event_json",
        "country_code",
        "device_type",
        "browser",
    ];
}

fn custom_events(scope: &QueryScope) -> Result<Sql, QueryError> {
    Ok(scope
        .where_clause()?
        .push(" AND event_type = 'custom' AND custom_event_name IS NOT NULL AND custom_event_name <> ''"))
}

/// Occurrences, distinct visitors and last sighting per custom event name.
pub fn query_event_occurrences(
    conn: &Connection,
    scope: &QueryScope,
) -> Result<Vec<EventTypeRow>, QueryError> {
    let sql = Sql::text(
        "SELECT custom_event_name AS event_name, CAST(COUNT(*) AS BIGINT) AS \"count\", \
         CAST(COUNT(DISTINCT visitor_id) AS BIGINT) AS unique_users, \
         strftime(MAX(timestamp), '%Y-%m-%d %H:%M:%S') AS last_seen FROM events WHERE ",
    )
    .append(custom_events(scope)?)
    .push(" GROUP BY custom_event_name ORDER BY \"count\" DESC, event_name");

    Ok(fetch::<EventOccurrenceRaw>(conn, &sql)?
        .into_iter()
        .map(|raw| EventTypeRow {
            avg_per_user: (ratio(raw.count, raw.unique_users) * 100.0).round() / 100.0,
            event_name: raw.event_name,
            count: raw.count,
            unique_users: raw.unique_users,
            last_seen: raw.last_seen,
        })
        .collect())
}

fn named_event(scope: &QueryScope, event_name: &str) -> Result<Sql, QueryError> {
    Ok(custom_events(scope)?
        .push(" AND custom_event_name = ")
        .param("event_name", event_name))
}

/// Value distribution of every property attached to `event_name`.
///
/// Payloads that are not JSON objects count towards `total_events` but
/// contribute no properties. String values are reported unquoted, other
/// values as their JSON text.
pub fn query_event_properties(
    conn: &Connection,
    scope: &QueryScope,
    event_name: &str,
) -> Result<EventPropertiesOverview, QueryError> {
    let total = Sql::text("SELECT CAST(COUNT(*) AS BIGINT) AS total_events FROM events WHERE ")
        .append(named_event(scope, event_name)?);
    let total_events = fetch_one::<EventTotal>(conn, &total)?.total_events;

    let sql = Sql::text(
        "WITH objects AS (\
           SELECT custom_event_json AS payload FROM events WHERE ",
    )
    .append(named_event(scope, event_name)?)
    .push(
        " AND (CASE WHEN json_valid(custom_event_json) \
                 THEN json_type(custom_event_json) END) = 'OBJECT'\
         ), pairs AS (\
           SELECT unnest(json_keys(payload)) AS property_name, payload FROM objects\
         ), counted AS (\
           SELECT property_name, \
                  COALESCE(json_extract_string(payload, property_name), 'null') AS value, \
                  COUNT(*) AS n \
           FROM pairs GROUP BY ALL\
         ), ranked AS (\
           SELECT property_name, value, n, \
                  SUM(n) OVER (PARTITION BY property_name) AS total_occurrences, \
                  COUNT(*) OVER (PARTITION BY property_name) AS unique_value_count, \
                  row_number() OVER (PARTITION BY property_name ORDER BY n DESC, value) AS value_rank \
           FROM counted\
         ) \
         SELECT property_name, value, CAST(n AS BIGINT) AS \"count\", \
                CAST(total_occurrences AS BIGINT) AS total_occurrences, \
                CAST(unique_value_count AS BIGINT) AS unique_value_count \
         FROM ranked WHERE value_rank <= ",
    )
    .int(MAX_TOP_VALUES as u64)
    .push(" ORDER BY total_occurrences DESC, property_name, value_rank");

    Ok(EventPropertiesOverview {
        event_name: event_name.to_string(),
        total_events,
        properties: group_properties(fetch(conn, &sql)?),
    })
}

/// Fold ranked value rows, already ordered by property, into one entry per property.
fn group_properties(rows: Vec<PropertyValueRow>) -> Vec<EventPropertyAnalytics> {
    let mut properties: Vec<EventPropertyAnalytics> = Vec::new();
    for row in rows {
        let value = EventPropertyValue {
            percentage: round1(ratio(row.count, row.total_occurrences) * 100.0),
            value: row.value,
            count: row.count,
        };
        match properties.last_mut() {
            Some(last) if last.property_name == row.property_name => last.top_values.push(value),
            _ => properties.push(EventPropertyAnalytics {
                property_name: row.property_name,
                unique_value_count: row.unique_value_count,
                total_occurrences: row.total_occurrences,
                top_values: vec![value],
            }),
        }
    }
    properties
}

/// Most recent custom events, newest first.
pub fn query_recent_events(
    conn: &Connection,
    scope: &QueryScope,
    limit: u64,
    offset: u64,
) -> Result<Vec<EventLogEntry>, QueryError> {
    let sql = Sql::text(
        "SELECT strftime(timestamp, '%Y-%m-%d %H:%M:%S') AS \"timestamp\", \
         custom_event_name AS event_name, visitor_id, url, \
         COALESCE(custom_event_json, '{}') AS custom_event_json, \
         NULLIF(country_code, '') AS country_code, \
         COALESCE(device_type, '') AS device_type, COALESCE(browser, '') AS browser \
         FROM events WHERE ",
    )
    .append(custom_events(scope)?)
    .push(" ORDER BY events.timestamp DESC, visitor_id LIMIT ")
    .int(limit)
    .push(" OFFSET ")
    .int(offset);
    fetch(conn, &sql)
}
