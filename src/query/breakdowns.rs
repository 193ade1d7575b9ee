use crate::query::error::QueryError;
use crate::query::rows::{fetch, RowShape};
use crate::query::scope::QueryScope;
use crate::query::sql::{AllowList, Identifier, Sql};
use duckdb::Connection;

/// Columns a visitor breakdown may group on.
pub const BREAKDOWN_COLUMNS: AllowList =
    AllowList::new("breakdown", &["device_type", "browser", "os", "country_code"]);

/// Available breakdown dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    DeviceType,
    Browser,
    Os,
    CountryCode,
}

impl Dimension {
    pub const fn column_name(self) -> &'static str {
        match self {
            Self::DeviceType => "device_type",
            Self::Browser => "browser",
            Self::Os => "os",
            Self::CountryCode => "country_code",
        }
    }

    /// Missing values are grouped under `(unknown)` instead of being dropped.
    const fn keeps_unknown(self) -> bool {
        !matches!(self, Self::CountryCode)
    }
}

/// Distinct visitors per value of `dimension`, most visitors first.
///
/// The value column is named after the dimension, so `T` decodes it by the
/// same name.
pub fn query_breakdown<T: RowShape>(
    conn: &Connection,
    scope: &QueryScope,
    dimension: Dimension,
    limit: Option<u64>,
) -> Result<Vec<T>, QueryError> {
    let column = Identifier::new(dimension.column_name(), &BREAKDOWN_COLUMNS)?;

    let mut sql = if dimension.keeps_unknown() {
        Sql::text("SELECT COALESCE(NULLIF(")
            .ident(column)
            .push(", ''), '(unknown)') AS ")
            .ident(column)
    } else {
        Sql::text("SELECT ").ident(column)
    }
    .push(", CAST(COUNT(DISTINCT visitor_id) AS BIGINT) AS visitors FROM events WHERE ")
    .append(scope.where_clause()?);

    if !dimension.keeps_unknown() {
        sql = sql
            .push(" AND ")
            .ident(column)
            .push(" IS NOT NULL AND ")
            .ident(column)
            .push(" <> ''");
    }

    sql = sql.push(" GROUP BY 1 ORDER BY visitors DESC, 1");
    if let Some(limit) = limit {
        sql = sql.push(" LIMIT ").int(limit);
    }
    fetch(conn, &sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::{jan, setup_test_db, TestEvent};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct BrowserCount {
        browser: String,
        visitors: u64,
    }

    impl RowShape for BrowserCount {
        const NAME: &'static str = "BrowserCount";
        const COLUMNS: &'static [&'static str] = &["browser", "visitors"];
    }

    #[test]
    fn test_breakdown_groups_unknown() {
        let conn = setup_test_db();
        TestEvent {
            browser: Some("Chrome"),
            ..TestEvent::pageview("v1", "s1", "2024-01-15 10:00:00", "/")
        }
        .insert(&conn);
        TestEvent {
            browser: Some("Chrome"),
            ..TestEvent::pageview("v2", "s2", "2024-01-15 10:00:00", "/")
        }
        .insert(&conn);
        TestEvent::pageview("v3", "s3", "2024-01-15 10:00:00", "/").insert(&conn);

        let scope = QueryScope::new("test.com", jan(1), jan(31));
        let rows: Vec<BrowserCount> =
            query_breakdown(&conn, &scope, Dimension::Browser, None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].browser, "Chrome");
        assert_eq!(rows[0].visitors, 2);
        assert_eq!(rows[1].browser, "(unknown)");
    }

    #[test]
    fn test_breakdown_limit() {
        let conn = setup_test_db();
        for (visitor, browser) in [("v1", "Chrome"), ("v2", "Firefox"), ("v3", "Safari")] {
            TestEvent {
                browser: Some(browser),
                ..TestEvent::pageview(visitor, visitor, "2024-01-15 10:00:00", "/")
            }
            .insert(&conn);
        }
        let scope = QueryScope::new("test.com", jan(1), jan(31));
        let rows: Vec<BrowserCount> =
            query_breakdown(&conn, &scope, Dimension::Browser, Some(2)).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.browser.as_str()).collect();
        assert_eq!(names, vec!["Chrome", "Firefox"]);
    }

    #[test]
    fn test_dimension_columns_are_allowed() {
        for dimension in [
            Dimension::DeviceType,
            Dimension::Browser,
            Dimension::Os,
            Dimension::CountryCode,
        ] {
            assert!(BREAKDOWN_COLUMNS.contains(dimension.column_name()));
        }
    }
}
