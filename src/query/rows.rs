use crate::query::error::QueryError;
use crate::query::sql::Sql;
use duckdb::types::Value;
use duckdb::Connection;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;

/// A named result row shape.
///
/// Every row returned by the store is decoded into one of these and checked
/// with [`RowShape::validate`] before it reaches a caller.
pub trait RowShape: DeserializeOwned {
    const NAME: &'static str;
    /// Result columns read from each row, by name.
    const COLUMNS: &'static [&'static str];

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Execute `sql` and decode every row as `T`, failing on the first bad row.
pub fn fetch<T: RowShape>(conn: &Connection, sql: &Sql) -> Result<Vec<T>, QueryError> {
    let (text, values) = sql.render();
    tracing::debug!(shape = T::NAME, params = values.len(), "Executing query");

    let mut stmt = conn.prepare(&text)?;
    let mut rows = stmt.query(duckdb::params_from_iter(values.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(decode_row::<T>(row)?);
    }
    Ok(out)
}

/// Like [`fetch`] for queries that always produce exactly one row.
pub fn fetch_one<T: RowShape>(conn: &Connection, sql: &Sql) -> Result<T, QueryError> {
    fetch::<T>(conn, sql)?
        .into_iter()
        .next()
        .ok_or_else(|| QueryError::InvalidRow {
            shape: T::NAME,
            reason: "query returned no rows".to_string(),
        })
}

fn decode_row<T: RowShape>(row: &duckdb::Row<'_>) -> Result<T, QueryError> {
    let invalid = |reason: String| {
        tracing::warn!(shape = T::NAME, reason = %reason, "Rejected result row");
        QueryError::InvalidRow {
            shape: T::NAME,
            reason,
        }
    };

    let mut object = serde_json::Map::with_capacity(T::COLUMNS.len());
    for column in T::COLUMNS {
        let value: Value = row
            .get(*column)
            .map_err(|e| invalid(format!("column '{column}': {e}")))?;
        let json = to_json(value).map_err(|e| invalid(format!("column '{column}': {e}")))?;
        object.insert((*column).to_string(), json);
    }

    let decoded: T = serde_json::from_value(Json::Object(object))
        .map_err(|e| invalid(e.to_string()))?;
    decoded.validate().map_err(invalid)?;
    Ok(decoded)
}

fn to_json(value: Value) -> Result<Json, String> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(b),
        Value::TinyInt(n) => Json::from(n),
        Value::SmallInt(n) => Json::from(n),
        Value::Int(n) => Json::from(n),
        Value::BigInt(n) => Json::from(n),
        Value::HugeInt(n) => i64::try_from(n)
            .map(Json::from)
            .map_err(|_| format!("integer {n} out of range"))?,
        Value::UTinyInt(n) => Json::from(n),
        Value::USmallInt(n) => Json::from(n),
        Value::UInt(n) => Json::from(n),
        Value::UBigInt(n) => Json::from(n),
        Value::Float(f) => float(f64::from(f))?,
        Value::Double(f) => float(f)?,
        Value::Text(s) => Json::String(s),
        Value::List(items) => Json::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        other => return Err(format!("unsupported value {other:?}")),
    })
}

fn float(f: f64) -> Result<Json, String> {
    serde_json::Number::from_f64(f)
        .map(Json::Number)
        .ok_or_else(|| format!("non-finite number {f}"))
}
