use crate::session::SessionStage;
use std::fmt;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Why selecting or creating a database failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatabaseErrorReason {
    /// The database is not in the server's listing
    NotFound,
    /// The server refused the operation
    DriverRejected(String),
}

impl fmt::Display for DatabaseErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseErrorReason::NotFound => write!(f, "does not exist"),
            DatabaseErrorReason::DriverRejected(cause) => write!(f, "was rejected: {cause}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Authentication or network failure while connecting
    #[error("unable to connect to {host} as {user}: {cause}")]
    Connection {
        host: String,
        user: String,
        cause: String,
    },
    /// Selecting or creating a database failed
    #[error("database [{name}] {reason}")]
    Database {
        name: String,
        reason: DatabaseErrorReason,
    },
    /// The session is not in a stage that allows the operation
    #[error("{operation} requires the {required} stage; the session is {actual}")]
    Precondition {
        operation: &'static str,
        required: SessionStage,
        actual: SessionStage,
    },
    /// Catalog or connection level driver failure
    #[error(transparent)]
    Driver(#[from] nlsql_driver::Error),
    /// The server rejected a statement
    #[error("{message} [{statement}]")]
    Query { statement: String, message: String },
    /// The translation service failed or returned no text
    #[error("translation service error: {cause}")]
    Service { cause: String },
    /// Sanitization left nothing to execute
    #[error("no SQL statement was generated for question: {question}")]
    EmptyTranslation { question: String },
    /// The statement policy refused the statement
    #[error("statement rejected ({reason}): {statement}")]
    PolicyViolation { statement: String, reason: String },
    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Configuration(String),
    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Convert a driver failure for a statement into a [`Query`](Error::Query) error.
    pub(crate) fn query<S: Into<String>>(statement: S, error: &nlsql_driver::Error) -> Self {
        Error::Query {
            statement: statement.into(),
            message: error.to_string(),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Configuration(error.to_string())
    }
}
