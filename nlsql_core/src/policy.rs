use crate::error::{Error, Result};
use crate::sanitize::ExecutableStatement;
use nlsql_driver::{Connection, StatementMetadata};
use sqlparser::parser::Parser;
use std::fmt;
use std::str::FromStr;

/// Which generated statements may be executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatementPolicy {
    /// Execute whatever sanitization yields
    #[default]
    Permissive,
    /// Execute only a single statement the dialect parser classifies as a query
    ReadOnly,
}

impl StatementPolicy {
    /// Check `statement` using the connection's SQL dialect.
    ///
    /// # Errors
    /// * [`Error::PolicyViolation`] if the policy refuses the statement
    pub fn check(self, connection: &dyn Connection, statement: &ExecutableStatement) -> Result<()> {
        match self {
            StatementPolicy::Permissive => Ok(()),
            StatementPolicy::ReadOnly => check_read_only(connection, statement),
        }
    }
}

/// Exactly one statement that parses as a query.
fn check_read_only(connection: &dyn Connection, statement: &ExecutableStatement) -> Result<()> {
    let violation = |reason: String| Error::PolicyViolation {
        statement: statement.to_string(),
        reason,
    };
    let statements = Parser::parse_sql(connection.dialect().as_ref(), statement.as_str())
        .map_err(|error| {
            violation(format!(
                "read only policy could not parse statement: {error}"
            ))
        })?;

    match statements.as_slice() {
        [single] => match connection.match_statement(single) {
            StatementMetadata::Query => Ok(()),
            metadata => Err(violation(format!(
                "read only policy does not allow {metadata:?} statements"
            ))),
        },
        _ => Err(violation(format!(
            "read only policy allows one statement, found {}",
            statements.len()
        ))),
    }
}

impl fmt::Display for StatementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementPolicy::Permissive => write!(f, "permissive"),
            StatementPolicy::ReadOnly => write!(f, "read_only"),
        }
    }
}

impl FromStr for StatementPolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "permissive" => Ok(StatementPolicy::Permissive),
            "read_only" | "readonly" | "read-only" => Ok(StatementPolicy::ReadOnly),
            _ => Err(Error::Configuration(format!(
                "Invalid pipeline.policy: {value}"
            ))),
        }
    }
}
