//! On-demand introspection of the server's databases and the active database's tables.
//!
//! Nothing is cached; every call queries the live connection.

use crate::error::Result;
use crate::session::{Session, SessionStage};
use tracing::instrument;

/// Database and table names at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
    pub databases: Vec<String>,
    /// Tables of the active database; empty when no database is selected
    pub tables: Vec<String>,
}

/// List the databases visible to the connected user.
///
/// # Errors
/// * [`Error::Precondition`](crate::Error::Precondition) if the session is not connected
/// * [`Error::Driver`](crate::Error::Driver) if the server cannot be queried
#[instrument(level = "debug", skip(session))]
pub async fn list_databases(session: &mut Session) -> Result<Vec<String>> {
    let handle = session.guard("list_databases", SessionStage::Connected)?;
    let result = handle.connection_mut().databases().await;
    Ok(session.observe(result)?)
}

/// List the tables of the active database.
///
/// # Errors
/// * [`Error::Precondition`](crate::Error::Precondition) if no database is selected
/// * [`Error::Driver`](crate::Error::Driver) if the server cannot be queried
#[instrument(level = "debug", skip(session))]
pub async fn list_tables(session: &mut Session) -> Result<Vec<String>> {
    let handle = session.guard("list_tables", SessionStage::DatabaseSelected)?;
    let result = handle.connection_mut().tables().await;
    Ok(session.observe(result)?)
}

/// Capture both listings.
///
/// # Errors
/// * [`Error::Precondition`](crate::Error::Precondition) if the session is not connected
/// * [`Error::Driver`](crate::Error::Driver) if the server cannot be queried
pub async fn snapshot(session: &mut Session) -> Result<SchemaSnapshot> {
    let databases = list_databases(session).await?;
    let tables = if session.stage().is_ready() {
        list_tables(session).await?
    } else {
        Vec::new()
    };
    Ok(SchemaSnapshot { databases, tables })
}
