use crate::query::breakdowns::{query_breakdown, Dimension};
use crate::query::error::QueryError;
use crate::query::rows::RowShape;
use crate::query::scope::QueryScope;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

/// Distinct visitors from one country (ISO 3166-1 alpha-2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoVisitor {
    pub country_code: String,
    pub visitors: u64,
}

impl RowShape for GeoVisitor {
    const NAME: &'static str = "GeoVisitor";
    const COLUMNS: &'static [&'static str] = &["country_code", "visitors"];

    fn validate(&self) -> Result<(), String> {
        if self.country_code.len() != 2 {
            return Err(format!("country code '{}' is not two letters", self.country_code));
        }
        Ok(())
    }
}

/// Visitors per country. Events without a country are left out.
pub fn query_visitors_by_country(
    conn: &Connection,
    scope: &QueryScope,
    limit: u64,
) -> Result<Vec<GeoVisitor>, QueryError> {
    query_breakdown(conn, scope, Dimension::CountryCode, Some(limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::{jan, setup_test_db, TestEvent};

    fn visit(visitor: &'static str, country: Option<&'static str>) -> TestEvent {
        TestEvent {
            country_code: country,
            ..TestEvent::pageview(visitor, visitor, "2024-01-15 10:00:00", "/")
        }
    }

    #[test]
    fn test_visitors_by_country() {
        let conn = setup_test_db();
        visit("v1", Some("DE")).insert(&conn);
        visit("v2", Some("DE")).insert(&conn);
        visit("v3", Some("US")).insert(&conn);
        visit("v4", None).insert(&conn);
        visit("v5", Some("")).insert(&conn);

        let scope = QueryScope::new("test.com", jan(1), jan(31));
        let rows = query_visitors_by_country(&conn, &scope, 10).unwrap();
        assert_eq!(
            rows,
            vec![
                GeoVisitor {
                    country_code: "DE".to_string(),
                    visitors: 2
                },
                GeoVisitor {
                    country_code: "US".to_string(),
                    visitors: 1
                },
            ]
        );
    }

    #[test]
    fn test_country_limit() {
        let conn = setup_test_db();
        visit("v1", Some("DE")).insert(&conn);
        visit("v2", Some("FR")).insert(&conn);

        let scope = QueryScope::new("test.com", jan(1), jan(31));
        assert_eq!(query_visitors_by_country(&conn, &scope, 1).unwrap().len(), 1);
    }
}
