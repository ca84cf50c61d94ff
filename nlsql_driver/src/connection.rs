use crate::error::Result;
use crate::{Error, Value};
use async_trait::async_trait;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect};
use sqlparser::parser::Parser;
use std::fmt::Debug;

/// A single row of a query result
pub type Row = Vec<Value>;

/// Results from a query
#[async_trait]
pub trait QueryResult: Debug + Send + Sync {
    fn columns(&self) -> &[String];
    async fn next(&mut self) -> Option<&Row>;
}

/// Query result with a limit
#[derive(Debug)]
pub struct LimitQueryResult {
    inner: Box<dyn QueryResult>,
    row_index: usize,
    limit: usize,
}

impl LimitQueryResult {
    #[must_use]
    pub fn new(inner: Box<dyn QueryResult>, limit: usize) -> Self {
        Self {
            inner,
            row_index: 0,
            limit,
        }
    }
}

#[async_trait]
impl QueryResult for LimitQueryResult {
    fn columns(&self) -> &[String] {
        self.inner.columns()
    }

    async fn next(&mut self) -> Option<&Row> {
        if self.row_index >= self.limit {
            return None;
        }

        let value = self.inner.next().await;
        self.row_index += 1;
        value
    }
}

/// In-memory query result
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryQueryResult {
    columns: Vec<String>,
    row_index: usize,
    rows: Vec<Row>,
}

impl MemoryQueryResult {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            row_index: 0,
            rows,
        }
    }

    /// Drain another query result into memory.
    pub async fn collect(mut query_result: Box<dyn QueryResult>) -> Self {
        let columns = query_result.columns().to_vec();
        let mut rows = Vec::new();
        while let Some(row) = query_result.next().await {
            rows.push(row.clone());
        }
        Self::new(columns, rows)
    }

    /// All rows, independent of the iteration position.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}

#[async_trait]
impl QueryResult for MemoryQueryResult {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next(&mut self) -> Option<&Row> {
        if self.row_index >= self.rows.len() {
            return None;
        }
        let row = &self.rows[self.row_index];
        self.row_index += 1;
        Some(row)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementMetadata {
    DDL,
    DML,
    Query,
    Unknown,
}

/// Connection to a database server.
///
/// A connection is bound to at most one active database at a time; the catalog
/// operations (`databases`, `tables`) always query the server and never cache.
#[async_trait]
pub trait Connection: Debug + Send + Sync {
    fn url(&self) -> &String;

    /// Execute a single statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Execute a single statement and return its rows.
    async fn query(&mut self, sql: &str) -> Result<Box<dyn QueryResult>>;

    /// Execute a script of one or more semicolon separated statements.
    async fn execute_batch(&mut self, sql: &str) -> Result<u64>;

    /// List the databases visible to the connected user, ordered by name.
    async fn databases(&mut self) -> Result<Vec<String>>;

    /// List the tables of the active database, ordered by name.
    async fn tables(&mut self) -> Result<Vec<String>>;

    /// The database the server considers active for this connection.
    async fn current_database(&mut self) -> Result<Option<String>>;

    /// Make `name` the active database.
    async fn use_database(&mut self, name: &str) -> Result<()>;

    async fn create_database(&mut self, name: &str) -> Result<()> {
        let sql = format!("CREATE DATABASE {}", self.quote_identifier(name));
        let _ = self.execute(&sql).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn dialect(&self) -> Box<dyn Dialect> {
        Box::new(GenericDialect)
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn parse_sql(&self, sql: &str) -> StatementMetadata {
        let statements = Parser::parse_sql(self.dialect().as_ref(), sql).unwrap_or_default();

        if let Some(statement) = statements.first() {
            self.match_statement(statement)
        } else {
            fallback_statement_metadata(sql)
        }
    }

    fn default_match_statement(&self, statement: &Statement) -> StatementMetadata {
        match statement {
            Statement::CreateSchema { .. }
            | Statement::CreateDatabase { .. }
            | Statement::CreateView { .. }
            | Statement::CreateIndex(_)
            | Statement::CreateTable(_)
            | Statement::CreateSequence { .. }
            | Statement::AlterTable { .. }
            | Statement::AlterIndex { .. }
            | Statement::Drop { .. } => StatementMetadata::DDL,
            Statement::Query(_) => StatementMetadata::Query,
            Statement::Insert(_) | Statement::Update { .. } | Statement::Delete(_) => {
                StatementMetadata::DML
            }
            _ => StatementMetadata::Unknown,
        }
    }

    fn match_statement(&self, statement: &Statement) -> StatementMetadata {
        self.default_match_statement(statement)
    }
}

/// Classify a statement the parser could not handle by its leading keyword.
fn fallback_statement_metadata(sql: &str) -> StatementMetadata {
    let sql = sql.trim_start();
    let command = if sql.len() > 6 {
        sql.get(..6).unwrap_or_default()
    } else {
        ""
    };
    if command.eq_ignore_ascii_case("select") {
        StatementMetadata::Query
    } else {
        StatementMetadata::Unknown
    }
}

type MockExecuteFn = Box<dyn FnMut(&str) -> Result<u64> + Send + Sync>;
type MockQueryFn = Box<dyn FnMut(&str) -> Result<Box<dyn QueryResult>> + Send + Sync>;
type MockNamesFn = Box<dyn FnMut() -> Result<Vec<String>> + Send + Sync>;
type MockCurrentDatabaseFn = Box<dyn FnMut() -> Result<Option<String>> + Send + Sync>;
type MockDatabaseFn = Box<dyn FnMut(&str) -> Result<()> + Send + Sync>;
type MockCloseFn = Box<dyn FnMut() -> Result<()> + Send + Sync>;

/// A mock implementation of [`Connection`] for testing.
///
/// Expectations are set via `expect_*` methods with `.returning()` closures. Calling an
/// operation without an expectation returns an [`IoError`](Error::IoError) rather than
/// panicking, except `close`, `create_database` and `current_database` which have
/// benign defaults.
#[derive(Default)]
pub struct MockConnection {
    url: String,
    execute_fn: Option<MockExecuteFn>,
    query_fn: Option<MockQueryFn>,
    execute_batch_fn: Option<MockExecuteFn>,
    databases_fn: Option<MockNamesFn>,
    tables_fn: Option<MockNamesFn>,
    current_database_fn: Option<MockCurrentDatabaseFn>,
    use_database_fn: Option<MockDatabaseFn>,
    create_database_fn: Option<MockDatabaseFn>,
    close_fn: Option<MockCloseFn>,
}

impl Debug for MockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnection")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Builder for an expectation taking the SQL text and returning an affected row count.
pub struct MockExecuteExpectation<'a> {
    slot: &'a mut Option<MockExecuteFn>,
}

impl MockExecuteExpectation<'_> {
    /// Set the closure to call when the expectation is matched.
    pub fn returning<F>(self, f: F)
    where
        F: FnMut(&str) -> Result<u64> + Send + Sync + 'static,
    {
        *self.slot = Some(Box::new(f));
    }
}

/// Builder for setting a query expectation on [`MockConnection`].
pub struct MockQueryExpectation<'a> {
    mock: &'a mut MockConnection,
}

impl MockQueryExpectation<'_> {
    /// Set the closure to call when the expectation is matched.
    pub fn returning<F>(self, f: F)
    where
        F: FnMut(&str) -> Result<Box<dyn QueryResult>> + Send + Sync + 'static,
    {
        self.mock.query_fn = Some(Box::new(f));
    }
}

/// Builder for an expectation returning a list of names.
pub struct MockNamesExpectation<'a> {
    slot: &'a mut Option<MockNamesFn>,
}

impl MockNamesExpectation<'_> {
    /// Set the closure to call when the expectation is matched.
    pub fn returning<F>(self, f: F)
    where
        F: FnMut() -> Result<Vec<String>> + Send + Sync + 'static,
    {
        *self.slot = Some(Box::new(f));
    }
}

/// Builder for setting a current database expectation on [`MockConnection`].
pub struct MockCurrentDatabaseExpectation<'a> {
    mock: &'a mut MockConnection,
}

impl MockCurrentDatabaseExpectation<'_> {
    /// Set the closure to call when the expectation is matched.
    pub fn returning<F>(self, f: F)
    where
        F: FnMut() -> Result<Option<String>> + Send + Sync + 'static,
    {
        self.mock.current_database_fn = Some(Box::new(f));
    }
}

/// Builder for an expectation taking a database name.
pub struct MockDatabaseExpectation<'a> {
    slot: &'a mut Option<MockDatabaseFn>,
}

impl MockDatabaseExpectation<'_> {
    /// Set the closure to call when the expectation is matched.
    pub fn returning<F>(self, f: F)
    where
        F: FnMut(&str) -> Result<()> + Send + Sync + 'static,
    {
        *self.slot = Some(Box::new(f));
    }
}

/// Builder for setting a close expectation on [`MockConnection`].
pub struct MockCloseExpectation<'a> {
    mock: &'a mut MockConnection,
}

impl MockCloseExpectation<'_> {
    /// Set the closure to call when the expectation is matched.
    pub fn returning<F>(self, f: F)
    where
        F: FnMut() -> Result<()> + Send + Sync + 'static,
    {
        self.mock.close_fn = Some(Box::new(f));
    }
}

impl MockConnection {
    /// Create a new mock with no expectations set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new mock reporting the given URL.
    #[must_use]
    pub fn with_url<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set an expectation for [`Connection::execute`].
    pub fn expect_execute(&mut self) -> MockExecuteExpectation<'_> {
        MockExecuteExpectation {
            slot: &mut self.execute_fn,
        }
    }

    /// Set an expectation for [`Connection::query`].
    pub fn expect_query(&mut self) -> MockQueryExpectation<'_> {
        MockQueryExpectation { mock: self }
    }

    /// Set an expectation for [`Connection::execute_batch`].
    pub fn expect_execute_batch(&mut self) -> MockExecuteExpectation<'_> {
        MockExecuteExpectation {
            slot: &mut self.execute_batch_fn,
        }
    }

    /// Set an expectation for [`Connection::databases`].
    pub fn expect_databases(&mut self) -> MockNamesExpectation<'_> {
        MockNamesExpectation {
            slot: &mut self.databases_fn,
        }
    }

    /// Set an expectation for [`Connection::tables`].
    pub fn expect_tables(&mut self) -> MockNamesExpectation<'_> {
        MockNamesExpectation {
            slot: &mut self.tables_fn,
        }
    }

    /// Set an expectation for [`Connection::current_database`].
    pub fn expect_current_database(&mut self) -> MockCurrentDatabaseExpectation<'_> {
        MockCurrentDatabaseExpectation { mock: self }
    }

    /// Set an expectation for [`Connection::use_database`].
    pub fn expect_use_database(&mut self) -> MockDatabaseExpectation<'_> {
        MockDatabaseExpectation {
            slot: &mut self.use_database_fn,
        }
    }

    /// Set an expectation for [`Connection::create_database`].
    pub fn expect_create_database(&mut self) -> MockDatabaseExpectation<'_> {
        MockDatabaseExpectation {
            slot: &mut self.create_database_fn,
        }
    }

    /// Set an expectation for [`Connection::close`].
    pub fn expect_close(&mut self) -> MockCloseExpectation<'_> {
        MockCloseExpectation { mock: self }
    }
}

fn unexpected(operation: &str) -> Error {
    Error::IoError(format!(
        "MockConnection: {operation} called without expectation"
    ))
}

#[async_trait]
impl Connection for MockConnection {
    fn url(&self) -> &String {
        &self.url
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let f = self.execute_fn.as_mut().ok_or_else(|| unexpected("execute"))?;
        f(sql)
    }

    async fn query(&mut self, sql: &str) -> Result<Box<dyn QueryResult>> {
        let f = self.query_fn.as_mut().ok_or_else(|| unexpected("query"))?;
        f(sql)
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<u64> {
        let f = self
            .execute_batch_fn
            .as_mut()
            .ok_or_else(|| unexpected("execute_batch"))?;
        f(sql)
    }

    async fn databases(&mut self) -> Result<Vec<String>> {
        let f = self
            .databases_fn
            .as_mut()
            .ok_or_else(|| unexpected("databases"))?;
        f()
    }

    async fn tables(&mut self) -> Result<Vec<String>> {
        let f = self.tables_fn.as_mut().ok_or_else(|| unexpected("tables"))?;
        f()
    }

    async fn current_database(&mut self) -> Result<Option<String>> {
        match self.current_database_fn.as_mut() {
            Some(f) => f(),
            None => Ok(None),
        }
    }

    async fn use_database(&mut self, name: &str) -> Result<()> {
        let f = self
            .use_database_fn
            .as_mut()
            .ok_or_else(|| unexpected("use_database"))?;
        f(name)
    }

    async fn create_database(&mut self, name: &str) -> Result<()> {
        match self.create_database_fn.as_mut() {
            Some(f) => f(name),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.close_fn.as_mut() {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}
