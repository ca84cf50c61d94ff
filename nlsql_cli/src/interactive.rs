use crate::Args;
use crate::display::{
    DisplayOptions, write_answer, write_error, write_message, write_names, write_results,
};
use anyhow::Result;
use inquire::{Confirm, InquireError, Password, PasswordDisplayMode, Select, Text};
use nlsql_core::configuration::Configuration;
use nlsql_core::{
    Credentials, DatabaseErrorReason, Error, Pipeline, Results, Session, SessionStage, catalog,
};
use std::fmt;
use std::io::Write;
use tracing::debug;

/// An action offered by the interactive menu.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MenuItem {
    Connect,
    Ask,
    ListTables,
    ListDatabases,
    SelectDatabase,
    CreateDatabase,
    ImportFile,
    Disconnect,
    Quit,
}

impl fmt::Display for MenuItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MenuItem::Connect => "Connect to a server",
            MenuItem::Ask => "Ask a question",
            MenuItem::ListTables => "List tables",
            MenuItem::ListDatabases => "List databases",
            MenuItem::SelectDatabase => "Select a database",
            MenuItem::CreateDatabase => "Create a database",
            MenuItem::ImportFile => "Import a SQL file",
            MenuItem::Disconnect => "Disconnect",
            MenuItem::Quit => "Quit",
        };
        write!(f, "{label}")
    }
}

/// The actions available in `stage`; `Quit` is always last.
pub(crate) fn menu_items(stage: SessionStage) -> Vec<MenuItem> {
    let mut items = match stage {
        SessionStage::Disconnected => vec![MenuItem::Connect],
        SessionStage::Connected => vec![
            MenuItem::SelectDatabase,
            MenuItem::ListDatabases,
            MenuItem::CreateDatabase,
            MenuItem::ImportFile,
            MenuItem::Disconnect,
        ],
        SessionStage::DatabaseSelected => vec![
            MenuItem::Ask,
            MenuItem::ListTables,
            MenuItem::SelectDatabase,
            MenuItem::ListDatabases,
            MenuItem::CreateDatabase,
            MenuItem::ImportFile,
            MenuItem::Disconnect,
        ],
    };
    items.push(MenuItem::Quit);
    items
}

/// Treat Esc and Ctrl-C as "no answer" rather than an error.
fn optional<T>(result: Result<T, InquireError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn prompt_text(message: &str, default: Option<&str>) -> Result<Option<String>> {
    let mut text = Text::new(message);
    if let Some(default) = default {
        text = text.with_default(default);
    }
    let value = optional(text.prompt())?;
    Ok(value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty()))
}

/// Collect credentials from the command line, the configuration and, for anything missing,
/// the terminal. Returns `None` if the user cancels.
pub(crate) fn prompt_credentials(
    args: &Args,
    configuration: &Configuration,
) -> Result<Option<Credentials>> {
    let host = match args.host.clone() {
        Some(host) => host,
        None => {
            let default = configuration.database_host.as_deref().unwrap_or("localhost");
            match prompt_text("Host:", Some(default))? {
                Some(host) => host,
                None => return Ok(None),
            }
        }
    };

    let user = match args.user.clone().or_else(|| configuration.database_user.clone()) {
        Some(user) => user,
        None => match prompt_text("User:", None)? {
            Some(user) => user,
            None => return Ok(None),
        },
    };

    let password = match args.password.clone() {
        Some(password) => password,
        None => {
            let password = Password::new("Password:")
                .without_confirmation()
                .with_display_mode(PasswordDisplayMode::Masked)
                .prompt();
            match optional(password)? {
                Some(password) => password,
                None => return Ok(None),
            }
        }
    };

    Ok(Some(Credentials::new(host, user, password)))
}

/// Connect with prompted credentials and report the outcome.
pub(crate) async fn connect(
    session: &mut Session,
    args: &Args,
    configuration: &Configuration,
    options: DisplayOptions,
    output: &mut dyn Write,
) -> Result<()> {
    let Some(credentials) = prompt_credentials(args, configuration)? else {
        return Ok(());
    };
    session.connect(&credentials).await?;
    if let Some(handle) = session.handle() {
        let message = format!("Connected to {} as {}", handle.host(), handle.user());
        write_message(options, message, output)?;
    }
    Ok(())
}

/// Select `name`, offering to create it when the server does not have it.
pub(crate) async fn check_database(
    session: &mut Session,
    name: &str,
    options: DisplayOptions,
    output: &mut dyn Write,
) -> Result<()> {
    match session.select_database(name).await {
        Ok(()) => {}
        Err(Error::Database {
            reason: DatabaseErrorReason::NotFound,
            ..
        }) => {
            let message = format!("Database {name} does not exist. Create it?");
            let create = optional(Confirm::new(&message).with_default(false).prompt())?;
            if create != Some(true) {
                return Ok(());
            }
            session.create_database(name).await?;
            write_message(options, format!("Database {name} created"), output)?;
            session.select_database(name).await?;
        }
        Err(error) => return Err(error.into()),
    }
    write_message(options, format!("Using database {name}"), output)
}

/// Run a SQL script against the connected server.
pub(crate) async fn import(
    session: &mut Session,
    path: &str,
    options: DisplayOptions,
    output: &mut dyn Write,
) -> Result<()> {
    let rows = session.import_sql_file(path).await?;
    write_message(options, format!("Imported {path}"), output)?;
    write_results(options, &Results::Execute(rows), output)?;
    if let Some(database) = session.active_database() {
        write_message(options, format!("Using database {database}"), output)?;
    }
    Ok(())
}

async fn perform(
    item: MenuItem,
    session: &mut Session,
    pipeline: &mut Pipeline,
    args: &Args,
    configuration: &Configuration,
    options: DisplayOptions,
    output: &mut dyn Write,
) -> Result<()> {
    match item {
        MenuItem::Connect => connect(session, args, configuration, options, output).await?,
        MenuItem::Ask => {
            if let Some(question) = prompt_text("Question:", None)? {
                let answer = pipeline.run(session, &question).await?;
                write_answer(options, &answer, output)?;
            }
        }
        MenuItem::ListTables => {
            let tables = catalog::list_tables(session).await?;
            write_names(options, "Tables", &tables, output)?;
        }
        MenuItem::ListDatabases => {
            let databases = catalog::list_databases(session).await?;
            write_names(options, "Databases", &databases, output)?;
        }
        MenuItem::SelectDatabase => {
            if let Some(name) = prompt_text("Database:", None)? {
                check_database(session, &name, options, output).await?;
            }
        }
        MenuItem::CreateDatabase => {
            if let Some(name) = prompt_text("New database:", None)? {
                session.create_database(&name).await?;
                write_message(options, format!("Database {name} created"), output)?;
            }
        }
        MenuItem::ImportFile => {
            if let Some(path) = prompt_text("SQL file:", None)? {
                import(session, &path, options, output).await?;
            }
        }
        MenuItem::Disconnect => {
            session.close().await?;
            write_message(options, "Disconnected", output)?;
        }
        MenuItem::Quit => {}
    }
    Ok(())
}

fn menu_title(session: &Session) -> String {
    match session.handle() {
        None => "nlsql (disconnected)".to_string(),
        Some(handle) => format!(
            "{}@{} [{}]",
            handle.user(),
            handle.host(),
            handle.database().unwrap_or("no database")
        ),
    }
}

/// Drive the session from a menu until the user quits. Failures are reported and the menu
/// is shown again.
pub(crate) async fn run(
    session: &mut Session,
    pipeline: &mut Pipeline,
    args: &Args,
    configuration: &Configuration,
    options: DisplayOptions,
    output: &mut dyn Write,
) -> Result<()> {
    loop {
        let title = menu_title(session);
        let items = menu_items(session.stage());
        let Some(item) = optional(Select::new(&title, items).prompt())? else {
            break;
        };
        debug!(%item, "menu item selected");
        if item == MenuItem::Quit {
            break;
        }

        if let Err(error) = perform(
            item,
            session,
            pipeline,
            args,
            configuration,
            options,
            output,
        )
        .await
        {
            write_error(options, &error, output)?;
            if session.stage() == SessionStage::Disconnected && item != MenuItem::Disconnect {
                write_message(options, "The session is disconnected", output)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlsql_driver::{Driver, MockConnection, MockDriver};
    use std::sync::{Arc, Mutex};

    fn session_with(connection: MockConnection) -> Session {
        let connection = Mutex::new(Some(connection));
        let mut driver = MockDriver::new();
        driver.expect_identifier().returning(|| "mysql");
        driver.expect_connect().returning(move |_url| {
            let connection = connection
                .lock()
                .map_err(|error| nlsql_driver::Error::IoError(error.to_string()))?
                .take()
                .ok_or_else(|| nlsql_driver::Error::IoError("already connected".into()))?;
            Ok(Box::new(connection))
        });
        let driver: Arc<dyn Driver> = Arc::new(driver);
        Session::new(driver)
    }

    fn credentials() -> Credentials {
        Credentials::new("localhost", "root", "secret")
    }

    #[test]
    fn test_menu_items() {
        assert_eq!(
            menu_items(SessionStage::Disconnected),
            vec![MenuItem::Connect, MenuItem::Quit]
        );

        let connected = menu_items(SessionStage::Connected);
        assert!(connected.contains(&MenuItem::SelectDatabase));
        assert!(!connected.contains(&MenuItem::Ask));
        assert!(!connected.contains(&MenuItem::ListTables));

        let ready = menu_items(SessionStage::DatabaseSelected);
        assert_eq!(ready.first(), Some(&MenuItem::Ask));
        assert!(ready.contains(&MenuItem::ListTables));
        assert_eq!(ready.last(), Some(&MenuItem::Quit));
    }

    #[test]
    fn test_menu_item_display() {
        assert_eq!(MenuItem::Ask.to_string(), "Ask a question");
        assert_eq!(MenuItem::Quit.to_string(), "Quit");
    }

    #[test]
    fn test_optional() -> anyhow::Result<()> {
        assert_eq!(optional(Ok::<_, InquireError>(1))?, Some(1));
        assert_eq!(
            optional::<i32>(Err(InquireError::OperationCanceled))?,
            None
        );
        assert_eq!(
            optional::<i32>(Err(InquireError::OperationInterrupted))?,
            None
        );
        assert!(optional::<i32>(Err(InquireError::NotTTY)).is_err());
        Ok(())
    }

    #[test]
    fn test_prompt_credentials_from_args() -> anyhow::Result<()> {
        let args = Args {
            host: Some("db.example.com:3306".to_string()),
            user: Some("analyst".to_string()),
            password: Some("secret".to_string()),
            ..Args::default()
        };
        let credentials = prompt_credentials(&args, &Configuration::default())?;
        let debug = format!("{credentials:?}");
        assert!(debug.contains("db.example.com:3306"));
        assert!(debug.contains("analyst"));
        assert!(!debug.contains("secret"));
        Ok(())
    }

    #[tokio::test]
    async fn test_menu_title() -> anyhow::Result<()> {
        let mut connection = MockConnection::new();
        connection
            .expect_databases()
            .returning(|| Ok(vec!["moviesdb".to_string()]));
        connection.expect_use_database().returning(|_| Ok(()));
        let mut session = session_with(connection);
        assert_eq!(menu_title(&session), "nlsql (disconnected)");

        session.connect(&credentials()).await?;
        assert_eq!(menu_title(&session), "root@localhost [no database]");

        let mut output = Vec::new();
        check_database(&mut session, "moviesdb", DisplayOptions::default(), &mut output).await?;
        assert_eq!(menu_title(&session), "root@localhost [moviesdb]");
        assert_eq!(String::from_utf8(output)?, "Using database moviesdb\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_check_database_rejected() -> anyhow::Result<()> {
        let mut connection = MockConnection::new();
        connection
            .expect_databases()
            .returning(|| Ok(vec!["moviesdb".to_string()]));
        connection
            .expect_use_database()
            .returning(|_| Err(nlsql_driver::Error::IoError("access denied".to_string())));
        let mut session = session_with(connection);
        session.connect(&credentials()).await?;

        let mut output = Vec::new();
        let result =
            check_database(&mut session, "moviesdb", DisplayOptions::default(), &mut output).await;

        assert!(result.is_err());
        assert!(output.is_empty());
        assert_eq!(session.stage(), SessionStage::Connected);
        Ok(())
    }

    #[tokio::test]
    async fn test_import() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        std::io::Write::write_all(
            &mut file,
            indoc::indoc! {"
                CREATE DATABASE moviesdb;
                USE moviesdb;
                CREATE TABLE movie (movie_id INT PRIMARY KEY, title VARCHAR(255));
            "}
            .as_bytes(),
        )?;

        let mut connection = MockConnection::new();
        connection.expect_execute_batch().returning(|_| Ok(0));
        connection
            .expect_current_database()
            .returning(|| Ok(Some("moviesdb".to_string())));
        let mut session = session_with(connection);
        session.connect(&credentials()).await?;

        let path = file.path().to_string_lossy().to_string();
        let mut output = Vec::new();
        import(&mut session, &path, DisplayOptions::default(), &mut output).await?;

        let output = String::from_utf8(output)?;
        assert!(output.contains("0 rows affected"));
        assert!(output.ends_with("Using database moviesdb\n"));
        assert_eq!(session.stage(), SessionStage::DatabaseSelected);
        Ok(())
    }
}
