use crate::query::error::QueryError;
use crate::query::sql::{AllowList, Identifier, Sql};
use serde::{Deserialize, Serialize};

/// Event columns a filter may target.
pub const FILTER_COLUMNS: AllowList = AllowList::new(
    "filter",
    &[
        "url",
        "device_type",
        "country_code",
        "browser",
        "os",
        "referrer_source",
        "referrer_source_name",
        "referrer_search_term",
        "referrer_url",
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_term",
        "utm_content",
        "custom_event_name",
        "event_type",
    ],
);

/// Parameter name prefix for filters compiled by [`compile_filters`].
pub const DEFAULT_PARAM_PREFIX: &str = "query_filter";

/// A single user-chosen predicate: `column operator value`.
///
/// Empty fields mean "not yet specified" and the filter is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub column: String,
    pub operator: String,
    pub value: String,
}

impl QueryFilter {
    pub fn new(column: &str, operator: &str, value: &str) -> Self {
        Self {
            column: column.to_string(),
            operator: operator.to_string(),
            value: value.to_string(),
        }
    }

    fn is_specified(&self) -> bool {
        !self.column.is_empty() && !self.operator.is_empty() && !self.value.is_empty()
    }

    /// Human readable form, e.g. `Device is mobile`.
    pub fn describe(&self) -> String {
        let column = column_label(&self.column).unwrap_or(self.column.as_str());
        let operator = FilterOperator::parse(&self.operator)
            .map_or(self.operator.as_str(), |op| op.label());
        format!("{column} {operator} {}", self.value)
    }
}

/// Comparison exposed to users. Both map to case-insensitive pattern matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Equals,
    NotEquals,
}

impl FilterOperator {
    pub fn parse(op: &str) -> Result<Self, QueryError> {
        match op {
            "=" => Ok(Self::Equals),
            "!=" => Ok(Self::NotEquals),
            other => Err(QueryError::UnknownOperator(other.to_string())),
        }
    }

    /// Missing values compare as empty, so `!=` keeps rows where the column is NULL.
    fn predicate(self, column: Identifier) -> Sql {
        match self {
            Self::Equals => Sql::new().ident(column).push(" ILIKE "),
            Self::NotEquals => Sql::text("COALESCE(")
                .ident(column)
                .push(", '') NOT ILIKE "),
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Equals => "is",
            Self::NotEquals => "is not",
        }
    }
}

/// Display label for a filterable column.
pub fn column_label(column: &str) -> Option<&'static str> {
    let label = match column {
        "url" => "URL",
        "device_type" => "Device",
        "country_code" => "Country",
        "browser" => "Browser",
        "os" => "Operating system",
        "referrer_source" => "Referrer source",
        "referrer_source_name" => "Referrer name",
        "referrer_search_term" => "Referrer term",
        "referrer_url" => "Referrer URL",
        "utm_source" => "UTM source",
        "utm_medium" => "UTM medium",
        "utm_campaign" => "UTM campaign",
        "utm_term" => "UTM term",
        "utm_content" => "UTM content",
        "custom_event_name" => "Event",
        "event_type" => "Type",
        _ => return None,
    };
    Some(label)
}

/// Compile filters into predicate fragments with `query_filter_N` parameters.
pub fn compile_filters(filters: &[QueryFilter]) -> Result<Vec<Sql>, QueryError> {
    compile_filters_with_prefix(filters, DEFAULT_PARAM_PREFIX)
}

/// Compile filters, naming parameters `{prefix}_N`.
///
/// Unspecified filters are dropped before numbering. An empty result yields a
/// single `1=1` fragment so callers can always AND the output in.
pub fn compile_filters_with_prefix(
    filters: &[QueryFilter],
    prefix: &str,
) -> Result<Vec<Sql>, QueryError> {
    let compiled = filters
        .iter()
        .filter(|f| f.is_specified())
        .enumerate()
        .map(|(index, filter)| compile_one(filter, &format!("{prefix}_{index}")))
        .collect::<Result<Vec<_>, _>>()?;

    if compiled.is_empty() {
        return Ok(vec![Sql::text("1=1")]);
    }
    Ok(compiled)
}

/// Compile a single filter regardless of whether it is fully specified.
pub fn compile_one(filter: &QueryFilter, param_name: &str) -> Result<Sql, QueryError> {
    let column = Identifier::new(&filter.column, &FILTER_COLUMNS)?;
    let operator = FilterOperator::parse(&filter.operator)?;
    let pattern = filter.value.replace('*', "%");

    Ok(operator.predicate(column).param(param_name, pattern))
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::query::sql::ParamValue;
    use proptest::prelude::*;

    fn allowed_column() -> impl Strategy<Value = &'static str> {
        proptest::sample::select(FILTER_COLUMNS.names)
    }

    proptest! {
        #[test]
        fn sql_text_is_independent_of_value(
            column in allowed_column(),
            negate in any::<bool>(),
            value in "[a-zA-Z0-9'\";/ *-]{1,24}",
        ) {
            let op = if negate { "!=" } else { "=" };
            let compiled = compile_filters(&[QueryFilter::new(column, op, &value)]).unwrap();
            let baseline = compile_filters(&[QueryFilter::new(column, op, "x")]).unwrap();
            let (text, values) = compiled[0].render();
            prop_assert_eq!(text, baseline[0].render().0);
            prop_assert_eq!(values, vec![ParamValue::String(value.replace('*', "%"))]);
        }

        #[test]
        fn unknown_columns_always_rejected(column in "[a-z_]{1,20}") {
            prop_assume!(!FILTER_COLUMNS.contains(&column));
            let result = compile_filters(&[QueryFilter::new(&column, "=", "x")]);
            let is_unknown_column = matches!(result, Err(QueryError::UnknownColumn { .. }));
            prop_assert!(is_unknown_column);
        }
    }
}
