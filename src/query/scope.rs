use crate::query::error::QueryError;
use crate::query::filters::{compile_filters, QueryFilter};
use crate::query::granularity::{bucket_expr, bucket_series, iso_label, Granularity};
use crate::query::sql::Sql;
use chrono::NaiveDateTime;

/// Site, half-open time range and user filters shared by every report query.
#[derive(Debug, Clone)]
pub struct QueryScope {
    pub site_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub filters: Vec<QueryFilter>,
}

impl QueryScope {
    pub fn new(site_id: &str, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            site_id: site_id.to_string(),
            start,
            end,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Vec<QueryFilter>) -> Self {
        self.filters = filters;
        self
    }

    /// `site_id = ? AND timestamp >= ? AND timestamp < ? AND (filters...)`.
    pub fn where_clause(&self) -> Result<Sql, QueryError> {
        if self.start >= self.end {
            return Err(QueryError::InvalidArgument(format!(
                "range start {} must be before end {}",
                self.start, self.end
            )));
        }
        Ok(Sql::text("site_id = ")
            .param("site_id", self.site_id.as_str())
            .push(" AND timestamp >= ")
            .param("start", self.start)
            .push(" AND timestamp < ")
            .param("end", self.end)
            .push(" AND ")
            .append(Sql::and(compile_filters(&self.filters)?)))
    }

    /// ISO bucket label of `column`, anchored at the range start.
    pub fn bucket(&self, granularity: Granularity, column: &str) -> Result<Sql, QueryError> {
        Ok(iso_label(bucket_expr(granularity, self.start, column)?))
    }

    /// Every bucket start of the range, for zero-filling series.
    pub fn buckets(&self, granularity: Granularity) -> Result<Vec<NaiveDateTime>, QueryError> {
        bucket_series(granularity, self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_where_clause_without_filters() {
        let scope = QueryScope::new("example.com", day(1), day(2));
        assert_eq!(
            scope.where_clause().unwrap().to_named(),
            "site_id = {site_id:String} AND timestamp >= {start:DateTime} \
             AND timestamp < {end:DateTime} AND (1=1)"
        );
    }

    #[test]
    fn test_where_clause_with_filters() {
        let scope = QueryScope::new("example.com", day(1), day(2)).with_filters(vec![
            QueryFilter::new("browser", "=", "Firefox"),
            QueryFilter::new("os", "!=", "Windows"),
        ]);
        let named = scope.where_clause().unwrap().to_named();
        assert!(named.ends_with(
            "(\"browser\" ILIKE {query_filter_0:String}) AND (COALESCE(\"os\", '') NOT ILIKE {query_filter_1:String})"
        ));
        assert_eq!(scope.where_clause().unwrap().render().1.len(), 5);
    }

    #[test]
    fn test_where_clause_rejects_inverted_range() {
        let err = QueryScope::new("example.com", day(2), day(1))
            .where_clause()
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_buckets_cover_range() {
        let scope = QueryScope::new("example.com", day(1), day(2));
        assert_eq!(scope.buckets(Granularity::Hour).unwrap().len(), 24);
        assert!(scope
            .bucket(Granularity::Hour, "timestamp")
            .unwrap()
            .to_named()
            .starts_with("strftime(time_bucket(INTERVAL '1 hour'"));
    }

    #[test]
    fn test_where_clause_propagates_bad_filter() {
        let scope = QueryScope::new("example.com", day(1), day(2))
            .with_filters(vec![QueryFilter::new("visitor_id", "=", "v1")]);
        assert!(matches!(
            scope.where_clause(),
            Err(QueryError::UnknownColumn { .. })
        ));
    }
}
