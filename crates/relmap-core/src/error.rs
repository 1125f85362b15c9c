//! Error types for relmap operations.

use std::collections::BTreeMap;
use std::fmt;

/// Every fallible relmap call reports one of these.
#[derive(Debug)]
pub enum Error {
    /// No live connection when one is required
    Connection(ConnectionError),
    /// Statement execution failed or returned an unexpected shape
    Query(QueryError),
    /// A value could not be converted at the accessor boundary
    Type(TypeError),
    /// Registry construction errors
    Schema(SchemaError),
    /// A lifecycle hook rejected a pending change
    Validation(ValidationError),
    /// A commit failed while executing an operation
    Commit(CommitError),
    /// An optimistic update or delete matched zero rows
    OptimisticConflict(ConflictError),
    /// Anything else, as text
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Opening the connection failed
    Connect,
    /// Connection lost or never opened
    Disconnected,
    /// No connection was configured for the model
    Missing,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// The statement did not parse
    Syntax,
    /// A key or uniqueness rule was violated
    Constraint,
    /// Unknown table or column
    NotFound,
    /// Result did not have the expected shape
    Shape,
    /// Any other driver failure
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Two entities share a name or a type
    Duplicate,
    /// A referenced entity or field does not exist
    NotFound,
    /// A malformed entity definition
    Invalid,
}

/// Raised by `validate_for_save` / `validate_for_delete` hooks.
///
/// The commit pipeline attaches the description of the operation that was
/// executing when the hook failed.
#[derive(Debug, Clone, Default)]
pub struct ValidationError {
    pub message: String,
    pub user_info: BTreeMap<String, String>,
    pub operation: Option<String>,
}

impl ValidationError {
    /// Create a validation error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_info: BTreeMap::new(),
            operation: None,
        }
    }

    /// Attach a key/value pair for the caller.
    #[must_use]
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_info.insert(key.into(), value.into());
        self
    }

    /// Attach the description of the operation being executed.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

#[derive(Debug)]
pub struct CommitError {
    /// Description of the last attempted operation
    pub operation: String,
    pub source: Box<Error>,
}

#[derive(Debug)]
pub struct ConflictError {
    pub entity: String,
    pub sql: String,
}

impl Error {
    /// Is this a connection error (no live connection available)?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Commit(c) => c.source.is_connection_error(),
            _ => false,
        }
    }

    /// Did a lifecycle hook reject the change?
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Did an optimistic update or delete match zero rows?
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::OptimisticConflict(_) => true,
            Error::Commit(c) => c.source.is_conflict(),
            _ => false,
        }
    }

    /// The statement behind this error, looking through commit wrappers.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::OptimisticConflict(c) => Some(c.sql.as_str()),
            Error::Commit(c) => c.source.sql(),
            _ => None,
        }
    }

    /// Shorthand for a connection error.
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::Connection(ConnectionError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Shorthand for a query error bound to a statement.
    pub fn query(kind: QueryErrorKind, sql: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            sql: Some(sql.into()),
            message: message.into(),
            source: None,
        })
    }

    /// Shorthand for a schema error.
    pub fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "connection error: {e}"),
            Error::Query(e) => match &e.sql {
                Some(sql) => write!(f, "query error: {e} [{sql}]"),
                None => write!(f, "query error: {e}"),
            },
            Error::Type(e) => write!(f, "type error: {e}"),
            Error::Schema(e) => write!(f, "schema error: {e}"),
            Error::Validation(e) => write!(f, "validation failed: {e}"),
            Error::Commit(e) => write!(f, "commit failed at {}: {}", e.operation, e.source),
            Error::OptimisticConflict(e) => write!(
                f,
                "optimistic lock conflict on {}: no row matched [{}]",
                e.entity, e.sql
            ),
            Error::Custom(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let boxed = match self {
            Error::Connection(e) => e.source.as_deref(),
            Error::Query(e) => e.source.as_deref(),
            Error::Commit(e) => return Some(e.source.as_ref()),
            _ => None,
        };
        boxed.map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

macro_rules! message_display {
    ($($kind:ty),*) => {
        $(
            impl fmt::Display for $kind {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.message)
                }
            }
        )*
    };
}

message_display!(ConnectionError, QueryError, SchemaError);

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}", self.expected)?;
        if let Some(column) = &self.column {
            write!(f, " for '{column}'")?;
        }
        write!(f, ", found {}", self.actual)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        match &self.operation {
            Some(operation) => write!(f, " (while executing {operation})"),
            None => Ok(()),
        }
    }
}

impl std::error::Error for ValidationError {}

macro_rules! wrap_error {
    ($($detail:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$detail> for Error {
                fn from(detail: $detail) -> Self {
                    Error::$variant(detail)
                }
            }
        )*
    };
}

wrap_error! {
    ConnectionError => Connection,
    QueryError => Query,
    TypeError => Type,
    SchemaError => Schema,
    ValidationError => Validation,
    ConflictError => OptimisticConflict,
}

/// `Result` with [`Error`] as the failure.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_error_exposes_cause_and_sql() {
        let cause = Error::query(
            QueryErrorKind::Constraint,
            "INSERT INTO t (id) values (1)",
            "duplicate key",
        );
        let err = Error::Commit(CommitError {
            operation: "Insert {entity=T}".to_string(),
            source: Box::new(cause),
        });

        assert_eq!(err.sql(), Some("INSERT INTO t (id) values (1)"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("Insert {entity=T}"));
        assert!(!err.is_validation());
    }

    #[test]
    fn connection_flag_sees_through_commit() {
        let err = Error::Commit(CommitError {
            operation: "Update {entity=T}".to_string(),
            source: Box::new(Error::connection(
                ConnectionErrorKind::Disconnected,
                "lost connection",
            )),
        });
        assert!(err.is_connection_error());
    }

    #[test]
    fn validation_display_mentions_operation() {
        let err = ValidationError::new("name is required")
            .with_info("field", "name")
            .with_operation("Insert {entity=User}");
        assert_eq!(err.user_info.get("field").map(String::as_str), Some("name"));
        assert_eq!(
            err.to_string(),
            "name is required (while executing Insert {entity=User})"
        );
    }
}
