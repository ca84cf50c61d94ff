use crate::catalog;
use crate::error::{DatabaseErrorReason, Error, Result};
use crate::executor::SqlExecutor;
use nlsql_driver::{Connection, Driver};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// The stage of a [`Session`]; later stages imply the earlier ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStage {
    Disconnected,
    Connected,
    DatabaseSelected,
}

impl SessionStage {
    /// The stage in which questions can be asked.
    pub const READY: SessionStage = SessionStage::DatabaseSelected;

    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Self::READY
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            SessionStage::Disconnected => "disconnected",
            SessionStage::Connected => "connected",
            SessionStage::DatabaseSelected => "database selected",
        };
        write!(f, "{stage}")
    }
}

/// Server credentials; the host may carry a port (`host:port`).
#[derive(Clone)]
pub struct Credentials {
    pub host: String,
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new<S: Into<String>>(host: S, user: S, password: S) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// Build the driver URL, percent-encoding the user and password.
    fn url(&self, scheme: &str) -> Result<String> {
        let connection_error = |cause: String| Error::Connection {
            host: self.host.clone(),
            user: self.user.clone(),
            cause,
        };
        let mut url = Url::parse(&format!("{scheme}://{}/", self.host))
            .map_err(|error| connection_error(error.to_string()))?;
        url.set_username(&self.user)
            .map_err(|()| connection_error("invalid user".to_string()))?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|()| connection_error("invalid password".to_string()))?;
        }
        Ok(url.to_string())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// The live connection owned by a [`Session`].
#[derive(Debug)]
pub struct ConnectionHandle {
    host: String,
    user: String,
    database: Option<String>,
    connection: Box<dyn Connection>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The active database, if one has been selected.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub(crate) fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub(crate) fn connection_mut(&mut self) -> &mut dyn Connection {
        self.connection.as_mut()
    }
}

/// A user's session against one database server.
///
/// The session is the only owner of the connection handle and the only place the stage
/// changes. All operations take `&mut self`, so there is exactly one caller at a time.
#[derive(Debug)]
pub struct Session {
    driver: Arc<dyn Driver>,
    handle: Option<ConnectionHandle>,
}

impl Session {
    /// Create a disconnected session that connects with `driver`.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            handle: None,
        }
    }

    #[must_use]
    pub fn stage(&self) -> SessionStage {
        match &self.handle {
            None => SessionStage::Disconnected,
            Some(handle) if handle.database.is_none() => SessionStage::Connected,
            Some(_) => SessionStage::DatabaseSelected,
        }
    }

    #[must_use]
    pub fn handle(&self) -> Option<&ConnectionHandle> {
        self.handle.as_ref()
    }

    #[must_use]
    pub fn active_database(&self) -> Option<&str> {
        self.handle.as_ref().and_then(ConnectionHandle::database)
    }

    /// Connect to the server; the session moves to [`SessionStage::Connected`].
    ///
    /// # Errors
    /// * [`Error::Precondition`] if the session is already connected
    /// * [`Error::Connection`] if the server cannot be reached or refuses the credentials
    #[instrument(level = "info", skip(self))]
    pub async fn connect(&mut self, credentials: &Credentials) -> Result<()> {
        let actual = self.stage();
        if actual != SessionStage::Disconnected {
            return Err(Error::Precondition {
                operation: "connect",
                required: SessionStage::Disconnected,
                actual,
            });
        }

        let url = credentials.url(self.driver.identifier())?;
        let connection = self
            .driver
            .connect(&url)
            .await
            .map_err(|error| Error::Connection {
                host: credentials.host.clone(),
                user: credentials.user.clone(),
                cause: error.to_string(),
            })?;

        info!(host = %credentials.host, user = %credentials.user, "connected");
        self.handle = Some(ConnectionHandle {
            host: credentials.host.clone(),
            user: credentials.user.clone(),
            database: None,
            connection,
        });
        Ok(())
    }

    /// Make `name` the active database; the session moves to [`SessionStage::DatabaseSelected`].
    ///
    /// # Errors
    /// * [`Error::Precondition`] if the session is not connected
    /// * [`Error::Database`] if the database does not exist or the server refuses the switch
    #[instrument(level = "info", skip(self))]
    pub async fn select_database(&mut self, name: &str) -> Result<()> {
        let _ = self.guard("select_database", SessionStage::Connected)?;
        let databases = catalog::list_databases(self).await?;
        if !databases.iter().any(|database| database == name) {
            return Err(Error::Database {
                name: name.to_string(),
                reason: DatabaseErrorReason::NotFound,
            });
        }

        let handle = self.guard("select_database", SessionStage::Connected)?;
        let result = handle.connection_mut().use_database(name).await;
        if let Err(error) = self.observe(result) {
            return Err(Error::Database {
                name: name.to_string(),
                reason: DatabaseErrorReason::DriverRejected(error.to_string()),
            });
        }

        if let Some(handle) = self.handle.as_mut() {
            handle.database = Some(name.to_string());
        }
        info!(database = name, "database selected");
        Ok(())
    }

    /// Create the database `name`. The active database and the stage are unchanged.
    ///
    /// # Errors
    /// * [`Error::Precondition`] if the session is not connected
    /// * [`Error::Database`] if the server refuses to create the database
    #[instrument(level = "info", skip(self))]
    pub async fn create_database(&mut self, name: &str) -> Result<()> {
        let handle = self.guard("create_database", SessionStage::Connected)?;
        let result = handle.connection_mut().create_database(name).await;
        self.observe(result).map_err(|error| Error::Database {
            name: name.to_string(),
            reason: DatabaseErrorReason::DriverRejected(error.to_string()),
        })?;
        info!(database = name, "database created");
        Ok(())
    }

    /// Run every statement in the SQL file at `path` as one batch.
    ///
    /// A `USE` in the script changes the active database; the session follows it.
    ///
    /// # Errors
    /// * [`Error::Precondition`] if the session is not connected
    /// * [`Error::Io`] if the file cannot be read
    /// * [`Error::Query`] if the server rejects the script
    #[instrument(level = "info", skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn import_sql_file<P: AsRef<Path>>(&mut self, path: P) -> Result<u64> {
        let _ = self.guard("import_sql_file", SessionStage::Connected)?;
        let script = tokio::fs::read_to_string(path.as_ref()).await?;
        let batch = SqlExecutor::default().execute_batch(self, &script).await;

        // Statements before a failing one are applied, so follow the server either way.
        if let Err(error) = self.sync_database().await {
            if batch.is_ok() {
                return Err(error.into());
            }
            warn!("unable to read the active database after a failed import: {error}");
        }
        let rows = batch?;
        info!(rows, database = ?self.active_database(), "import complete");
        Ok(rows)
    }

    /// Record the database the server reports as active.
    async fn sync_database(&mut self) -> nlsql_driver::Result<()> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        let result = handle.connection_mut().current_database().await;
        let database = self.observe(result)?;
        if let Some(handle) = self.handle.as_mut() {
            handle.database = database;
        }
        Ok(())
    }

    /// Release the connection; closing a disconnected session does nothing.
    ///
    /// # Errors
    /// * [`Error::Driver`] if the driver fails to close cleanly; the session is disconnected
    ///   regardless
    #[instrument(level = "info", skip(self))]
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };
        handle.connection.close().await?;
        info!(host = %handle.host, "disconnected");
        Ok(())
    }

    /// The connection handle, if the session is at or past `required`.
    pub(crate) fn guard(
        &mut self,
        operation: &'static str,
        required: SessionStage,
    ) -> Result<&mut ConnectionHandle> {
        let actual = self.stage();
        match self.handle.as_mut() {
            Some(handle) if actual >= required => Ok(handle),
            _ => Err(Error::Precondition {
                operation,
                required,
                actual,
            }),
        }
    }

    /// Drop the handle when the driver reports that the connection is gone.
    pub(crate) fn observe<T>(
        &mut self,
        result: nlsql_driver::Result<T>,
    ) -> nlsql_driver::Result<T> {
        if let Err(error) = &result {
            if error.is_connection_lost() {
                warn!("{error}; session disconnected");
                self.handle = None;
            }
        }
        result
    }
}

/// Dropping a connected session releases the connection without [`Session::close`], so the
/// server sees the socket go away rather than a graceful quit.
impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(host = %handle.host, "releasing connection on drop");
        }
    }
}
