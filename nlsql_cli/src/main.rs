#![forbid(unsafe_code)]

mod display;
mod interactive;
mod version;

use crate::display::{DisplayOptions, write_answer, write_json};
use anyhow::{Result, bail};
use clap::Parser;
use nlsql_core::configuration::{Configuration, ConfigurationBuilder};
use nlsql_core::{GeminiClient, Pipeline, Session};
use std::io::{self, IsTerminal};
use tracing::info;

#[derive(Debug, Default, Parser)]
pub(crate) struct Args {
    /// The database server host, optionally with a port (host:port)
    #[arg(long)]
    pub host: Option<String>,

    /// The database user
    #[arg(short, long)]
    pub user: Option<String>,

    /// The database password
    #[arg(short, long, env = "NLSQL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// The database to select after connecting
    #[arg(short, long)]
    pub database: Option<String>,

    /// A SQL file to run after connecting
    #[arg(short, long)]
    pub import: Option<String>,

    /// Answer a single question and exit
    #[arg(short, long)]
    pub question: Option<String>,

    /// Print the answer to --question as JSON
    #[arg(long)]
    pub json: bool,

    /// Display the version of this tool
    #[arg(long)]
    pub version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    execute(None, &mut io::stdout()).await
}

pub(crate) async fn execute(args: Option<Args>, output: &mut dyn io::Write) -> Result<()> {
    let args = match args {
        Some(args) => args,
        None => {
            let _ = dotenvy::dotenv();
            Args::try_parse()?
        }
    };

    let program_name = "nlsql";
    let version = env!("CARGO_PKG_VERSION");
    let configuration = ConfigurationBuilder::new(program_name, version)
        .with_config()?
        .build()?;
    let full_version = version::full_version(&configuration);

    info!("{full_version} initialized");

    let result = if args.version {
        version::execute(&configuration, output)
    } else {
        let options = DisplayOptions {
            header: configuration.results_header,
            color: !args.json && io::stdout().is_terminal(),
        };
        run(&args, &configuration, options, output).await
    };

    info!("{full_version} completed");
    result
}

fn pipeline(configuration: &Configuration) -> Result<Pipeline> {
    let api_key = configuration.llm_api_key()?;
    let client = GeminiClient::new(
        api_key,
        configuration.llm_model.clone(),
        configuration.llm_base_url.clone(),
        configuration.llm_timeout,
    )?;
    Ok(Pipeline::from_configuration(configuration, Box::new(client))?)
}

async fn run(
    args: &Args,
    configuration: &Configuration,
    options: DisplayOptions,
    output: &mut dyn io::Write,
) -> Result<()> {
    let mut pipeline = pipeline(configuration)?;
    nlsql_core::register_drivers()?;
    let driver = nlsql_core::driver(&configuration.database_driver)?;
    let mut session = Session::new(driver);

    let result = match &args.question {
        Some(question) => {
            ask(
                &mut session,
                &mut pipeline,
                args,
                configuration,
                question,
                options,
                output,
            )
            .await
        }
        None => {
            start(&mut session, args, configuration, options, output).await;
            interactive::run(
                &mut session,
                &mut pipeline,
                args,
                configuration,
                options,
                output,
            )
            .await
        }
    };

    let closed = session.close().await;
    result?;
    Ok(closed?)
}

/// Connect, import and select from the command line arguments, reporting failures without
/// leaving interactive mode.
async fn start(
    session: &mut Session,
    args: &Args,
    configuration: &Configuration,
    options: DisplayOptions,
    output: &mut dyn io::Write,
) {
    if let Err(error) = prepare(session, args, configuration, options, output).await {
        let _ = display::write_error(options, &error, output);
    }
}

async fn prepare(
    session: &mut Session,
    args: &Args,
    configuration: &Configuration,
    options: DisplayOptions,
    output: &mut dyn io::Write,
) -> Result<()> {
    interactive::connect(session, args, configuration, options, output).await?;
    if session.handle().is_none() {
        return Ok(());
    }
    if let Some(path) = &args.import {
        interactive::import(session, path, options, output).await?;
    }
    if let Some(database) = &args.database {
        interactive::check_database(session, database, options, output).await?;
    }
    Ok(())
}

async fn ask(
    session: &mut Session,
    pipeline: &mut Pipeline,
    args: &Args,
    configuration: &Configuration,
    question: &str,
    options: DisplayOptions,
    output: &mut dyn io::Write,
) -> Result<()> {
    let Some(credentials) = interactive::prompt_credentials(args, configuration)? else {
        bail!("connection cancelled");
    };
    session.connect(&credentials).await?;
    if let Some(path) = &args.import {
        session.import_sql_file(path).await?;
    }
    match &args.database {
        Some(database) => session.select_database(database).await?,
        None if session.active_database().is_some() => {}
        None => bail!("--database is required with --question"),
    }

    let answer = pipeline.run(session, question).await?;
    if args.json {
        write_json(&answer, output)
    } else {
        write_answer(options, &answer, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_args() -> Result<()> {
        let args = Args::try_parse_from([
            "nlsql",
            "--host",
            "db.example.com:3306",
            "--user",
            "root",
            "--database",
            "moviesdb",
            "--question",
            "How many movies are there?",
            "--json",
        ])?;

        assert_eq!(args.host.as_deref(), Some("db.example.com:3306"));
        assert_eq!(args.user.as_deref(), Some("root"));
        assert_eq!(args.database.as_deref(), Some("moviesdb"));
        assert_eq!(args.question.as_deref(), Some("How many movies are there?"));
        assert!(args.json);
        assert!(!args.version);
        assert!(args.import.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_execute_version() -> Result<()> {
        let args = Args {
            version: true,
            ..Args::default()
        };
        let mut output = Vec::new();

        execute(Some(args), &mut output).await?;

        let version = String::from_utf8(output)?;
        assert!(version.starts_with("nlsql/"));
        Ok(())
    }
}
