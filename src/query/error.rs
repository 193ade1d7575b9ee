/// Errors raised while building or executing an analytics query.
#[derive(Debug)]
pub enum QueryError {
    /// A column name was not in the allow-list for the given context.
    UnknownColumn {
        column: String,
        context: &'static str,
    },
    /// A filter used an operator other than `=` or `!=`.
    UnknownOperator(String),
    /// The caller passed arguments the query cannot run with.
    InvalidArgument(String),
    /// A result row did not match its declared shape.
    InvalidRow { shape: &'static str, reason: String },
    Database(duckdb::Error),
    /// The blocking task running the query failed to complete.
    Task(String),
}

impl QueryError {
    /// Whether the error was caused by caller input rather than the store.
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownColumn { .. } | Self::UnknownOperator(_) | Self::InvalidArgument(_)
        )
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownColumn { column, context } => {
                write!(f, "Unknown {context} column: '{column}'")
            }
            Self::UnknownOperator(op) => write!(f, "Unknown filter operator: '{op}'"),
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            Self::InvalidRow { shape, reason } => {
                write!(f, "Invalid {shape} row: {reason}")
            }
            Self::Database(e) => write!(f, "Database error: {e}"),
            Self::Task(msg) => write!(f, "Query task failed: {msg}"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<duckdb::Error> for QueryError {
    fn from(e: duckdb::Error) -> Self {
        Self::Database(e)
    }
}
