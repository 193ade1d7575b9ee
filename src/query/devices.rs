use crate::query::breakdowns::{query_breakdown, Dimension};
use crate::query::error::QueryError;
use crate::query::granularity::Granularity;
use crate::query::rows::{fetch, RowShape};
use crate::query::scope::QueryScope;
use crate::query::sql::Sql;
use chrono::NaiveDateTime;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTypeRow {
    pub device_type: String,
    pub visitors: u64,
}

impl RowShape for DeviceTypeRow {
    const NAME: &'static str = "DeviceTypeRow";
    const COLUMNS: &'static [&'static str] = &["device_type", "visitors"];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserRow {
    pub browser: String,
    pub visitors: u64,
}

impl RowShape for BrowserRow {
    const NAME: &'static str = "BrowserRow";
    const COLUMNS: &'static [&'static str] = &["browser", "visitors"];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingSystemRow {
    pub os: String,
    pub visitors: u64,
}

impl RowShape for OperatingSystemRow {
    const NAME: &'static str = "OperatingSystemRow";
    const COLUMNS: &'static [&'static str] = &["os", "visitors"];
}

/// Distinct visitors per device type in one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUsageTrendRow {
    pub date: NaiveDateTime,
    pub device_type: String,
    pub count: u64,
}

impl RowShape for DeviceUsageTrendRow {
    const NAME: &'static str = "DeviceUsageTrendRow";
    const COLUMNS: &'static [&'static str] = &["date", "device_type", "count"];
}

pub fn query_device_types(
    conn: &Connection,
    scope: &QueryScope,
) -> Result<Vec<DeviceTypeRow>, QueryError> {
    query_breakdown(conn, scope, Dimension::DeviceType, None)
}

pub fn query_browsers(conn: &Connection, scope: &QueryScope) -> Result<Vec<BrowserRow>, QueryError> {
    query_breakdown(conn, scope, Dimension::Browser, None)
}

pub fn query_operating_systems(
    conn: &Connection,
    scope: &QueryScope,
) -> Result<Vec<OperatingSystemRow>, QueryError> {
    query_breakdown(conn, scope, Dimension::Os, None)
}

/// Device type usage over time. Only buckets with traffic are returned.
pub fn query_device_usage_trend(
    conn: &Connection,
    scope: &QueryScope,
    granularity: Granularity,
) -> Result<Vec<DeviceUsageTrendRow>, QueryError> {
    let sql = Sql::text("SELECT ")
        .append(scope.bucket(granularity, "timestamp")?)
        .push(
            " AS date, COALESCE(NULLIF(device_type, ''), '(unknown)') AS device_type, \
             CAST(COUNT(DISTINCT visitor_id) AS BIGINT) AS \"count\" FROM events WHERE ",
        )
        .append(scope.where_clause()?)
        .push(" GROUP BY 1, 2 ORDER BY 1, \"count\" DESC, 2");
    fetch(conn, &sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::{jan, setup_test_db, TestEvent};

    fn device(
        visitor: &'static str,
        ts: &'static str,
        device_type: &'static str,
        browser: &'static str,
        os: &'static str,
    ) -> TestEvent {
        TestEvent {
            device_type: Some(device_type),
            browser: Some(browser),
            os: Some(os),
            ..TestEvent::pageview(visitor, visitor, ts, "/")
        }
    }

    fn seed(conn: &Connection) {
        device("v1", "2024-01-15 10:00:00", "desktop", "Chrome", "Windows").insert(conn);
        device("v1", "2024-01-15 10:05:00", "desktop", "Chrome", "Windows").insert(conn);
        device("v2", "2024-01-15 11:00:00", "mobile", "Safari", "iOS").insert(conn);
        device("v3", "2024-01-16 09:00:00", "mobile", "Chrome", "Android").insert(conn);
    }

    fn scope() -> QueryScope {
        QueryScope::new("test.com", jan(1), jan(31))
    }

    #[test]
    fn test_device_types() {
        let conn = setup_test_db();
        seed(&conn);
        let rows = query_device_types(&conn, &scope()).unwrap();
        assert_eq!(
            rows,
            vec![
                DeviceTypeRow {
                    device_type: "mobile".to_string(),
                    visitors: 2
                },
                DeviceTypeRow {
                    device_type: "desktop".to_string(),
                    visitors: 1
                },
            ]
        );
    }

    #[test]
    fn test_browsers_and_os() {
        let conn = setup_test_db();
        seed(&conn);
        let browsers = query_browsers(&conn, &scope()).unwrap();
        assert_eq!(browsers[0].browser, "Chrome");
        assert_eq!(browsers[0].visitors, 2);

        let systems = query_operating_systems(&conn, &scope()).unwrap();
        assert_eq!(systems.len(), 3);
        assert!(systems.iter().all(|r| r.visitors == 1));
        assert_eq!(systems[0].os, "Android");
    }

    #[test]
    fn test_breakdown_with_device_filter() {
        let conn = setup_test_db();
        seed(&conn);
        let scope = scope().with_filters(vec![crate::query::filters::QueryFilter::new(
            "device_type",
            "=",
            "mobile",
        )]);
        let browsers = query_browsers(&conn, &scope).unwrap();
        let names: Vec<&str> = browsers.iter().map(|r| r.browser.as_str()).collect();
        assert_eq!(names, vec!["Chrome", "Safari"]);
    }

    #[test]
    fn test_device_usage_trend() {
        let conn = setup_test_db();
        seed(&conn);
        let rows = query_device_usage_trend(&conn, &scope(), Granularity::Day).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].date, jan(15));
        assert_eq!(rows[0].count, 1);
        assert_eq!(rows[2].date, jan(16));
        assert_eq!(rows[2].device_type, "mobile");
    }
}
