//! Typed SQL assembly.
//!
//! Query text is only ever built from `&'static str` fragments, identifiers
//! that passed an allow-list check, and bound parameters. There is no way to
//! splice a runtime string into the statement text.

use crate::query::error::QueryError;
use chrono::NaiveDateTime;
use duckdb::types::{ToSqlOutput, Value};
use duckdb::ToSql;
use std::fmt::Write;

/// Wire format used when binding timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A value bound to a query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    String(String),
    DateTime(NaiveDateTime),
    UInt32(u32),
    UInt64(u64),
}

impl ParamValue {
    /// The type tag shown in named placeholders (`{name:Type}`).
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::UInt32(_) => "UInt32",
            Self::UInt64(_) => "UInt64",
        }
    }

    const fn placeholder(&self) -> &'static str {
        match self {
            Self::DateTime(_) => "CAST(? AS TIMESTAMP)",
            Self::UInt32(_) | Self::UInt64(_) => "CAST(? AS BIGINT)",
            Self::String(_) => "?",
        }
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<NaiveDateTime> for ParamValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        Self::UInt32(v)
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl ToSql for ParamValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let value = match self {
            Self::String(s) => Value::Text(s.clone()),
            Self::DateTime(ts) => Value::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
            Self::UInt32(n) => Value::BigInt(i64::from(*n)),
            Self::UInt64(n) => Value::BigInt(i64::try_from(*n).unwrap_or(i64::MAX)),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

/// A named, typed query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub value: ParamValue,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A fixed set of column names that may be spliced into SQL as identifiers.
#[derive(Debug, Clone, Copy)]
pub struct AllowList {
    pub context: &'static str,
    pub names: &'static [&'static str],
}

impl AllowList {
    pub const fn new(context: &'static str, names: &'static [&'static str]) -> Self {
        Self { context, names }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name)
    }
}

/// A column identifier that passed an allow-list check.
///
/// The stored name is the allow-list's own static string, never the caller's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifier(&'static str);

impl Identifier {
    pub fn new(name: &str, allow_list: &AllowList) -> Result<Self, QueryError> {
        allow_list
            .names
            .iter()
            .copied()
            .find(|allowed| *allowed == name)
            .map(Self)
            .ok_or_else(|| QueryError::UnknownColumn {
                column: name.to_string(),
                context: allow_list.context,
            })
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

#[derive(Debug, Clone)]
enum Part {
    Text(&'static str),
    Ident(Identifier),
    Param(Parameter),
    Int(u64),
    Numbered(&'static str, usize),
}

/// A SQL statement or fragment under construction.
#[derive(Debug, Clone, Default)]
pub struct Sql {
    parts: Vec<Part>,
}

impl Sql {
    pub const fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// Start a fragment from static text.
    pub fn text(text: &'static str) -> Self {
        Self::new().push(text)
    }

    #[must_use]
    pub fn push(mut self, text: &'static str) -> Self {
        self.parts.push(Part::Text(text));
        self
    }

    #[must_use]
    pub fn ident(mut self, ident: Identifier) -> Self {
        self.parts.push(Part::Ident(ident));
        self
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parts.push(Part::Param(Parameter::new(name, value)));
        self
    }

    /// Inline an integer literal.
    #[must_use]
    pub fn int(mut self, value: u64) -> Self {
        self.parts.push(Part::Int(value));
        self
    }

    /// Emit a generated name such as `step_3`.
    #[must_use]
    pub fn numbered(mut self, prefix: &'static str, index: usize) -> Self {
        self.parts.push(Part::Numbered(prefix, index));
        self
    }

    #[must_use]
    pub fn append(mut self, other: Self) -> Self {
        self.parts.extend(other.parts);
        self
    }

    /// Join fragments with a static separator.
    pub fn join(fragments: impl IntoIterator<Item = Self>, separator: &'static str) -> Self {
        let mut out = Self::new();
        for (i, fragment) in fragments.into_iter().enumerate() {
            if i > 0 {
                out = out.push(separator);
            }
            out = out.append(fragment);
        }
        out
    }

    /// AND-combine predicate fragments, parenthesized.
    pub fn and(fragments: impl IntoIterator<Item = Self>) -> Self {
        let mut fragments = fragments.into_iter().peekable();
        if fragments.peek().is_none() {
            return Self::text("1=1");
        }
        Self::text("(")
            .append(Self::join(fragments, ") AND ("))
            .push(")")
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parts.iter().filter_map(|p| match p {
            Part::Param(param) => Some(param),
            _ => None,
        })
    }

    /// Render with positional `?` placeholders, returning values in bind order.
    pub fn render(&self) -> (String, Vec<ParamValue>) {
        let mut text = String::new();
        let mut values = Vec::new();
        for part in &self.parts {
            match part {
                Part::Param(param) => {
                    text.push_str(param.value.placeholder());
                    values.push(param.value.clone());
                }
                other => write_static(&mut text, other),
            }
        }
        (text, values)
    }

    /// Render with `{name:Type}` placeholders. Used for logs and tests.
    pub fn to_named(&self) -> String {
        let mut text = String::new();
        for part in &self.parts {
            match part {
                Part::Param(param) => {
                    let _ = write!(text, "{{{}:{}}}", param.name, param.value.type_name());
                }
                other => write_static(&mut text, other),
            }
        }
        text
    }
}

fn write_static(out: &mut String, part: &Part) {
    match part {
        Part::Text(text) => out.push_str(text),
        Part::Ident(ident) => {
            let _ = write!(out, "\"{}\"", ident.as_str());
        }
        Part::Int(n) => {
            let _ = write!(out, "{n}");
        }
        Part::Numbered(prefix, n) => {
            let _ = write!(out, "{prefix}{n}");
        }
        Part::Param(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const COLUMNS: AllowList = AllowList::new("test", &["url", "browser"]);

    #[test]
    fn test_identifier_accepts_allowed() {
        let ident = Identifier::new("url", &COLUMNS).unwrap();
        assert_eq!(ident.as_str(), "url");
    }

    #[test]
    fn test_identifier_rejects_unknown() {
        let err = Identifier::new("url; DROP TABLE events", &COLUMNS).unwrap_err();
        assert!(matches!(err, QueryError::UnknownColumn { context: "test", .. }));
    }

    #[test]
    fn test_render_positional() {
        let sql = Sql::text("SELECT ")
            .ident(Identifier::new("browser", &COLUMNS).unwrap())
            .push(" FROM events WHERE site_id = ")
            .param("site_id", "example.com")
            .push(" LIMIT ")
            .param("limit", 10u64);

        let (text, values) = sql.render();
        assert_eq!(
            text,
            "SELECT \"browser\" FROM events WHERE site_id = ? LIMIT CAST(? AS BIGINT)"
        );
        assert_eq!(
            values,
            vec![
                ParamValue::String("example.com".to_string()),
                ParamValue::UInt64(10)
            ]
        );
    }

    #[test]
    fn test_render_named() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let sql = Sql::text("timestamp >= ").param("start", start);
        assert_eq!(sql.to_named(), "timestamp >= {start:DateTime}");
        assert_eq!(sql.render().0, "timestamp >= CAST(? AS TIMESTAMP)");
    }

    #[test]
    fn test_datetime_binds_as_text() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        let value = ParamValue::DateTime(ts);
        let out = value.to_sql().unwrap();
        assert!(matches!(out, ToSqlOutput::Owned(Value::Text(ref s)) if s == "2024-03-05 07:08:09"));
    }

    #[test]
    fn test_and_empty_is_true() {
        assert_eq!(Sql::and(Vec::new()).render().0, "1=1");
    }

    #[test]
    fn test_and_parenthesizes() {
        let sql = Sql::and(vec![Sql::text("a = 1"), Sql::text("b = 2")]);
        assert_eq!(sql.render().0, "(a = 1) AND (b = 2)");
    }

    #[test]
    fn test_numbered_and_int() {
        let sql = Sql::text("SELECT ").numbered("step_", 2).push(" LIMIT ").int(5);
        assert_eq!(sql.render().0, "SELECT step_2 LIMIT 5");
    }

    #[test]
    fn test_executes_against_duckdb() {
        let conn = duckdb::Connection::open_in_memory().unwrap();
        let sql = Sql::text("SELECT ")
            .param("n", 41u32)
            .push(" + 1, ")
            .param("s", "x");
        let (text, values) = sql.render();
        let mut stmt = conn.prepare(&text).unwrap();
        let (n, s): (i64, String) = stmt
            .query_row(duckdb::params_from_iter(values.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(n, 42);
        assert_eq!(s, "x");
    }
}
