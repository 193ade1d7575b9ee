use crate::query::error::QueryError;
use crate::query::sql::{AllowList, Identifier, Sql};
use chrono::{NaiveDateTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Columns that may be bucketed by time.
pub const DATE_COLUMNS: AllowList = AllowList::new("date", &["timestamp", "date", "custom_date"]);

/// Days the bucket origin is moved back from the requested origin.
///
/// `time_bucket` must be anchored no later than every row it buckets, while
/// callers only know the start of the requested range. Moving back by whole
/// days keeps minute, hour and day edges where they were.
pub const BUCKET_ORIGIN_LEAD_DAYS: i64 = 3653;

/// Upper bound on the number of buckets in one series (a week of minutes).
pub const MAX_BUCKETS: usize = 10_080;

/// Time-bucket width for time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    const fn interval(self) -> &'static str {
        match self {
            Self::Minute => "INTERVAL '1 minute'",
            Self::Hour => "INTERVAL '1 hour'",
            Self::Day => "INTERVAL '1 day'",
        }
    }

    pub fn step(self) -> TimeDelta {
        match self {
            Self::Minute => TimeDelta::minutes(1),
            Self::Hour => TimeDelta::hours(1),
            Self::Day => TimeDelta::days(1),
        }
    }

    /// Truncate everything below this granularity.
    pub fn align(self, ts: NaiveDateTime) -> NaiveDateTime {
        let date = ts.date();
        let time = match self {
            Self::Minute => ts.time().with_second(0).and_then(|t| t.with_nanosecond(0)),
            Self::Hour => chrono::NaiveTime::from_hms_opt(ts.hour(), 0, 0),
            Self::Day => Some(chrono::NaiveTime::MIN),
        };
        time.map_or(ts, |t| date.and_time(t))
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Granularity {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            other => Err(QueryError::InvalidArgument(format!(
                "unknown granularity '{other}', expected minute, hour or day"
            ))),
        }
    }
}

/// Aligned origin moved back by [`BUCKET_ORIGIN_LEAD_DAYS`].
pub fn bucket_origin(
    granularity: Granularity,
    origin: NaiveDateTime,
) -> Result<NaiveDateTime, QueryError> {
    granularity
        .align(origin)
        .checked_sub_signed(TimeDelta::days(BUCKET_ORIGIN_LEAD_DAYS))
        .ok_or_else(|| QueryError::InvalidArgument(format!("bucket origin {origin} out of range")))
}

/// `time_bucket` expression for `column`, anchored at `origin`.
pub fn bucket_expr(
    granularity: Granularity,
    origin: NaiveDateTime,
    column: &str,
) -> Result<Sql, QueryError> {
    let column = Identifier::new(column, &DATE_COLUMNS)?;
    let origin = bucket_origin(granularity, origin)?;
    Ok(Sql::text("time_bucket(")
        .push(granularity.interval())
        .push(", CAST(")
        .ident(column)
        .push(" AS TIMESTAMP), ")
        .param("bucket_origin", origin)
        .push(")"))
}

/// Format a timestamp expression the way result rows carry dates.
pub fn iso_label(expr: Sql) -> Sql {
    Sql::text("strftime(")
        .append(expr)
        .push(", '%Y-%m-%dT%H:%M:%S')")
}

/// Bucket starts covering `[start, end)`.
pub fn bucket_series(
    granularity: Granularity,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<NaiveDateTime>, QueryError> {
    let step = granularity.step();
    let mut buckets = Vec::new();
    let mut current = granularity.align(start);
    while current < end {
        if buckets.len() == MAX_BUCKETS {
            return Err(QueryError::InvalidArgument(format!(
                "range needs more than {MAX_BUCKETS} {granularity} buckets"
            )));
        }
        buckets.push(current);
        current += step;
    }
    Ok(buckets)
}

/// Reorder `rows` onto `buckets`, inserting `empty(bucket)` where no row exists.
pub fn fill_series<T>(
    rows: Vec<T>,
    buckets: &[NaiveDateTime],
    key: impl Fn(&T) -> NaiveDateTime,
    empty: impl Fn(NaiveDateTime) -> T,
) -> Vec<T> {
    let mut by_bucket: HashMap<NaiveDateTime, T> =
        rows.into_iter().map(|row| (key(&row), row)).collect();
    buckets
        .iter()
        .map(|bucket| by_bucket.remove(bucket).unwrap_or_else(|| empty(*bucket)))
        .collect()
}

/// Granularities that make sense for the range `[start, end)`.
pub fn allowed_for_range(start: NaiveDateTime, end: NaiveDateTime) -> &'static [Granularity] {
    let span = end - start;
    if span >= TimeDelta::weeks(1) {
        &[Granularity::Day]
    } else if span <= TimeDelta::days(1) {
        &[Granularity::Day, Granularity::Hour, Granularity::Minute]
    } else {
        &[Granularity::Day, Granularity::Hour]
    }
}

/// Pick the granularity to use for a range, honouring `requested` when allowed.
///
/// A disallowed minute request falls back to hour when possible, everything
/// else falls back to day. Without a request, ranges of a day or less use hour.
pub fn resolve(
    requested: Option<Granularity>,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Granularity {
    let allowed = allowed_for_range(start, end);
    let requested = requested.unwrap_or(if end - start <= TimeDelta::days(1) {
        Granularity::Hour
    } else {
        Granularity::Day
    });
    if allowed.contains(&requested) {
        return requested;
    }
    if requested == Granularity::Minute && allowed.contains(&Granularity::Hour) {
        return Granularity::Hour;
    }
    Granularity::Day
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::sql::ParamValue;
    use chrono::NaiveDate;

    fn ts(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_align() {
        let t = ts(15, 10, 42, 17);
        assert_eq!(Granularity::Minute.align(t), ts(15, 10, 42, 0));
        assert_eq!(Granularity::Hour.align(t), ts(15, 10, 0, 0));
        assert_eq!(Granularity::Day.align(t), ts(15, 0, 0, 0));
    }

    #[test]
    fn test_from_str_and_serde() {
        assert_eq!("hour".parse::<Granularity>().unwrap(), Granularity::Hour);
        assert!("week".parse::<Granularity>().is_err());
        let g: Granularity = serde_json::from_str("\"minute\"").unwrap();
        assert_eq!(g, Granularity::Minute);
    }

    #[test]
    fn test_bucket_expr_renders() {
        let sql = bucket_expr(Granularity::Hour, ts(15, 10, 42, 17), "timestamp").unwrap();
        assert_eq!(
            sql.to_named(),
            "time_bucket(INTERVAL '1 hour', CAST(\"timestamp\" AS TIMESTAMP), {bucket_origin:DateTime})"
        );
        let (_, values) = sql.render();
        let ParamValue::DateTime(origin) = values[0] else {
            panic!("expected a timestamp parameter");
        };
        assert_eq!(origin.time(), chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        assert_eq!(
            (ts(15, 10, 0, 0) - origin).num_days(),
            BUCKET_ORIGIN_LEAD_DAYS
        );
    }

    #[test]
    fn test_bucket_expr_rejects_column() {
        let err = bucket_expr(Granularity::Day, ts(1, 0, 0, 0), "url").unwrap_err();
        assert!(matches!(err, QueryError::UnknownColumn { context: "date", .. }));
    }

    #[test]
    fn test_bucket_series_day_of_hours() {
        let buckets = bucket_series(Granularity::Hour, ts(15, 0, 0, 0), ts(16, 0, 0, 0)).unwrap();
        assert_eq!(buckets.len(), 24);
        assert_eq!(buckets[0], ts(15, 0, 0, 0));
        assert_eq!(buckets[23], ts(15, 23, 0, 0));
    }

    #[test]
    fn test_bucket_series_empty_range() {
        let buckets = bucket_series(Granularity::Day, ts(15, 0, 0, 0), ts(15, 0, 0, 0)).unwrap();
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_bucket_series_too_many() {
        let err = bucket_series(Granularity::Minute, ts(1, 0, 0, 0), ts(31, 0, 0, 0)).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_fill_series() {
        let buckets = bucket_series(Granularity::Day, ts(1, 0, 0, 0), ts(4, 0, 0, 0)).unwrap();
        let rows = vec![(ts(2, 0, 0, 0), 5u64)];
        let filled = fill_series(rows, &buckets, |r| r.0, |b| (b, 0));
        assert_eq!(
            filled,
            vec![(ts(1, 0, 0, 0), 0), (ts(2, 0, 0, 0), 5), (ts(3, 0, 0, 0), 0)]
        );
    }

    #[test]
    fn test_allowed_for_range() {
        assert_eq!(
            allowed_for_range(ts(1, 0, 0, 0), ts(8, 0, 0, 0)),
            &[Granularity::Day]
        );
        assert_eq!(
            allowed_for_range(ts(1, 0, 0, 0), ts(2, 0, 0, 0)),
            &[Granularity::Day, Granularity::Hour, Granularity::Minute]
        );
        assert_eq!(
            allowed_for_range(ts(1, 0, 0, 0), ts(3, 0, 0, 0)),
            &[Granularity::Day, Granularity::Hour]
        );
    }

    #[test]
    fn test_resolve_fallbacks() {
        let (start, two_days, month) = (ts(1, 0, 0, 0), ts(3, 0, 0, 0), ts(31, 0, 0, 0));
        assert_eq!(
            resolve(Some(Granularity::Minute), start, two_days),
            Granularity::Hour
        );
        assert_eq!(
            resolve(Some(Granularity::Minute), start, month),
            Granularity::Day
        );
        assert_eq!(resolve(Some(Granularity::Hour), start, month), Granularity::Day);
        assert_eq!(resolve(None, start, ts(2, 0, 0, 0)), Granularity::Hour);
        assert_eq!(resolve(None, start, month), Granularity::Day);
    }

    #[test]
    fn test_time_bucket_matches_rust_alignment() {
        let conn = duckdb::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (timestamp TIMESTAMP);
             INSERT INTO t VALUES ('2024-01-15 10:42:17'), ('2024-01-15 10:59:59'), ('2024-01-15 11:00:00')",
        )
        .unwrap();
        let expr = bucket_expr(Granularity::Hour, ts(15, 0, 0, 0), "timestamp").unwrap();
        let sql = Sql::text("SELECT ")
            .append(iso_label(expr))
            .push(" AS b, COUNT(*) FROM t GROUP BY b ORDER BY b");
        let (text, values) = sql.render();
        let mut stmt = conn.prepare(&text).unwrap();
        let rows: Vec<(String, i64)> = stmt
            .query_map(duckdb::params_from_iter(values.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            rows,
            vec![
                ("2024-01-15T10:00:00".to_string(), 2),
                ("2024-01-15T11:00:00".to_string(), 1)
            ]
        );
    }
}
