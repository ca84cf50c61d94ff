use crate::error::{Error, Result};
use crate::session::{Session, SessionStage};
use nlsql_driver::{LimitQueryResult, MemoryQueryResult, QueryResult, StatementMetadata};
use serde::Serialize;
use tracing::{debug, instrument};

/// The outcome of one statement.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Results {
    /// Rows returned by a query
    Query(#[serde(serialize_with = "serialize_query")] MemoryQueryResult),
    /// Rows affected by a DDL or DML statement
    Execute(u64),
}

fn serialize_query<S: serde::Serializer>(
    result: &MemoryQueryResult,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeStruct;
    let mut state = serializer.serialize_struct("QueryResult", 2)?;
    state.serialize_field("columns", result.columns())?;
    state.serialize_field("rows", result.rows())?;
    state.end()
}

/// Runs SQL against the session's active connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqlExecutor {
    limit: usize,
}

impl SqlExecutor {
    /// Create an executor that keeps at most `limit` rows of a query; 0 keeps every row.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Execute exactly one statement against the active database.
    ///
    /// DDL and DML statements report the affected row count; everything else is run as a
    /// query. Effects are applied immediately.
    ///
    /// # Errors
    /// * [`Error::Precondition`] if no database is selected
    /// * [`Error::Query`] if the server rejects the statement
    #[instrument(level = "info", skip(self, session))]
    pub async fn execute(&self, session: &mut Session, sql: &str) -> Result<Results> {
        let handle = session.guard("execute", SessionStage::DatabaseSelected)?;
        let connection = handle.connection_mut();
        let metadata = connection.parse_sql(sql);
        debug!(?metadata, "statement classified");

        let result = match metadata {
            StatementMetadata::DDL | StatementMetadata::DML => {
                connection.execute(sql).await.map(Results::Execute)
            }
            StatementMetadata::Query | StatementMetadata::Unknown => {
                match connection.query(sql).await {
                    Ok(query_result) => Ok(Results::Query(self.collect(query_result).await)),
                    Err(error) => Err(error),
                }
            }
        };

        session
            .observe(result)
            .map_err(|error| Error::query(sql, &error))
    }

    /// Execute a script of semicolon separated statements as one batch.
    ///
    /// # Errors
    /// * [`Error::Precondition`] if the session is not connected
    /// * [`Error::Query`] if the server rejects any statement of the script
    #[instrument(level = "info", skip_all)]
    pub async fn execute_batch(&self, session: &mut Session, script: &str) -> Result<u64> {
        let handle = session.guard("execute_batch", SessionStage::Connected)?;
        let result = handle.connection_mut().execute_batch(script).await;
        session
            .observe(result)
            .map_err(|error| Error::query(script, &error))
    }

    async fn collect(&self, query_result: Box<dyn QueryResult>) -> MemoryQueryResult {
        if self.limit == 0 {
            MemoryQueryResult::collect(query_result).await
        } else {
            let limited = LimitQueryResult::new(query_result, self.limit);
            MemoryQueryResult::collect(Box::new(limited)).await
        }
    }
}
