use crate::results::convert_rows;
use async_trait::async_trait;
use indoc::indoc;
use nlsql_driver::Error::{ConnectionLost, InvalidUrl, IoError};
use nlsql_driver::{Error, MemoryQueryResult, QueryResult, Result};
use sqlparser::dialect::{Dialect, MySqlDialect};
use sqlx::mysql::{MySqlConnectOptions, MySqlRow};
use sqlx::{Column, Connection as _, Executor as _, MySqlConnection, Row, Statement as _};
use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use tracing::{debug, instrument};
use url::Url;

#[derive(Debug)]
pub struct Driver;

#[async_trait]
impl nlsql_driver::Driver for Driver {
    fn identifier(&self) -> &'static str {
        "mysql"
    }

    async fn connect(&self, url: &str) -> Result<Box<dyn nlsql_driver::Connection>> {
        let connection = Connection::new(url).await?;
        Ok(Box::new(connection))
    }
}

/// A single MySQL session.
///
/// The active database is session state on the server, so a single connection is held
/// rather than a pool; `USE` on one pooled connection would not be visible on the next.
pub struct Connection {
    url: String,
    connection: Option<MySqlConnection>,
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("open", &self.connection.is_some())
            .finish()
    }
}

impl Connection {
    pub(crate) async fn new(url: &str) -> Result<Connection> {
        let parsed_url = Url::parse(url).map_err(|error| InvalidUrl(error.to_string()))?;
        let options =
            MySqlConnectOptions::from_str(url).map_err(|error| InvalidUrl(error.to_string()))?;
        let connection = MySqlConnection::connect_with(&options)
            .await
            .map_err(|error| IoError(error.to_string()))?;
        debug!(
            host = parsed_url.host_str().unwrap_or_default(),
            user = parsed_url.username(),
            "connected"
        );

        Ok(Connection {
            url: redact_password(parsed_url),
            connection: Some(connection),
        })
    }

    fn session(&mut self) -> Result<&mut MySqlConnection> {
        self.connection
            .as_mut()
            .ok_or_else(|| ConnectionLost("connection is closed".to_string()))
    }

    async fn names(&mut self, sql: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(sql)
            .fetch_all(self.session()?)
            .await
            .map_err(convert_error)?;
        rows.iter().map(name_at_first_column).collect()
    }
}

#[async_trait]
impl nlsql_driver::Connection for Connection {
    fn url(&self) -> &String {
        &self.url
    }

    #[instrument(level = "debug", skip(self))]
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let rows = sqlx::query(sql)
            .execute(self.session()?)
            .await
            .map_err(convert_error)?
            .rows_affected();
        Ok(rows)
    }

    #[instrument(level = "debug", skip(self))]
    async fn query(&mut self, sql: &str) -> Result<Box<dyn QueryResult>> {
        let session = self.session()?;
        let statement = (&mut *session).prepare(sql).await.map_err(convert_error)?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect();
        let query_rows = statement
            .query()
            .fetch_all(&mut *session)
            .await
            .map_err(convert_error)?;
        let rows = convert_rows(&query_rows)?;

        Ok(Box::new(MemoryQueryResult::new(columns, rows)))
    }

    #[instrument(level = "debug", skip_all)]
    async fn execute_batch(&mut self, sql: &str) -> Result<u64> {
        let rows = sqlx::raw_sql(sql)
            .execute(self.session()?)
            .await
            .map_err(convert_error)?
            .rows_affected();
        Ok(rows)
    }

    async fn databases(&mut self) -> Result<Vec<String>> {
        let sql = indoc! { r"
            SELECT
                schema_name
            FROM
                information_schema.schemata
            ORDER BY
                schema_name
        "};
        self.names(sql).await
    }

    async fn tables(&mut self) -> Result<Vec<String>> {
        let sql = indoc! { r"
            SELECT
                table_name
            FROM
                information_schema.tables
            WHERE
                table_schema = database()
            ORDER BY
                table_name
        "};
        self.names(sql).await
    }

    async fn current_database(&mut self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT database()")
            .fetch_one(self.session()?)
            .await
            .map_err(convert_error)?;
        if let Ok(name) = row.try_get::<Option<String>, usize>(0) {
            return Ok(name);
        }
        let bytes = row
            .try_get::<Option<Vec<u8>>, usize>(0)
            .map_err(convert_error)?;
        bytes.map(String::from_utf8).transpose().map_err(Error::from)
    }

    #[instrument(level = "debug", skip(self))]
    async fn use_database(&mut self, name: &str) -> Result<()> {
        let sql = format!("USE {}", self.quote_identifier(name));
        let _ = sqlx::raw_sql(&sql)
            .execute(self.session()?)
            .await
            .map_err(convert_error)?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn create_database(&mut self, name: &str) -> Result<()> {
        let sql = format!("CREATE DATABASE {}", self.quote_identifier(name));
        let _ = sqlx::raw_sql(&sql)
            .execute(self.session()?)
            .await
            .map_err(convert_error)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            connection
                .close()
                .await
                .map_err(|error| IoError(error.to_string()))?;
        }
        Ok(())
    }

    fn dialect(&self) -> Box<dyn Dialect> {
        Box::new(MySqlDialect {})
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }
}

/// Read a name from the first column; MySQL reports some catalog columns as binary strings.
fn name_at_first_column(row: &MySqlRow) -> Result<String> {
    if let Ok(name) = row.try_get::<String, usize>(0) {
        return Ok(name);
    }
    let bytes = row.try_get::<Vec<u8>, usize>(0).map_err(convert_error)?;
    Ok(String::from_utf8(bytes)?)
}

/// Convert a [`sqlx::Error`], separating transport failures from statement failures.
fn convert_error(error: sqlx::Error) -> Error {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            ConnectionLost(error.to_string())
        }
        error => IoError(error.to_string()),
    }
}

fn redact_password(mut url: Url) -> String {
    if url.password().is_some() {
        let _ = url.set_password(Some("***"));
    }
    url.to_string()
}
