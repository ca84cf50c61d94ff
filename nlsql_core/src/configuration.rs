use crate::error::{Error, Result};
use crate::policy::StatementPolicy;
use crate::translator::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use config::{Config, FileFormat};
use dirs::home_dir;
use std::env;
use std::fs::{OpenOptions, create_dir_all};
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub(crate) static DEFAULT_CONFIG: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/resources/nlsql.toml"));

/// A builder for creating a [Configuration] instance.
#[derive(Clone, Debug, Default)]
pub struct ConfigurationBuilder {
    configuration: Configuration,
}

impl ConfigurationBuilder {
    pub fn new<S: Into<String>>(program_name: S, version: S) -> Self {
        let mut configuration = Configuration::default();
        configuration.program_name = program_name.into();
        configuration.version = version.into();

        Self { configuration }
    }

    /// Initialize configuration from the configuration file in a hidden directory named after
    /// the program (e.g. `~/.nlsql/nlsql.toml`), falling back to the current working directory
    /// when there is no home directory.
    ///
    /// If the configuration file does not exist, it is created with the default configuration.
    ///
    /// # Errors
    /// * [`Error::Configuration`] if the configuration cannot be loaded
    /// * [`Error::Io`] if the configuration file cannot be created
    pub fn with_config(self) -> Result<Self> {
        let home_dir = home_dir().unwrap_or_else(|| env::current_dir().unwrap_or_default());
        let config_dir = home_dir.join(format!(".{}", &self.configuration.program_name));
        self.with_config_dir(config_dir)
    }

    /// Initialize configuration from `<config_dir>/<program_name>.toml`, the defaults and
    /// environment variables prefixed with the upper case program name
    /// (e.g. `NLSQL_LLM__TIMEOUT_SECS`).
    ///
    /// # Errors
    /// * [`Error::Configuration`] if the configuration cannot be loaded
    /// * [`Error::Io`] if the configuration file cannot be created
    pub fn with_config_dir<P: Into<PathBuf>>(mut self, config_dir: P) -> Result<Self> {
        let config_dir = config_dir.into();
        self.configuration.config_dir = Some(config_dir.clone());
        let config_file = ConfigFile::new(&self.configuration.program_name, &config_dir)?;
        config_file.load_configuration(&mut self.configuration)?;
        Ok(self)
    }

    /// Set the log level to use.
    #[must_use]
    pub fn with_log_level(mut self, log_level: LevelFilter) -> Self {
        self.configuration.log_level = log_level;
        self
    }

    /// Set the log directory to use.
    #[must_use]
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, log_dir: P) -> Self {
        self.configuration.log_dir = Some(log_dir.into());
        self
    }

    /// Set the log rotation to use.
    #[must_use]
    pub fn with_log_rotation(mut self, log_rotation: Rotation) -> Self {
        self.configuration.log_rotation = log_rotation;
        self
    }

    /// Set the database driver identifier to use.
    #[must_use]
    pub fn with_database_driver<S: Into<String>>(mut self, driver: S) -> Self {
        self.configuration.database_driver = driver.into();
        self
    }

    /// Set the default database host.
    #[must_use]
    pub fn with_database_host<S: Into<String>>(mut self, host: S) -> Self {
        self.configuration.database_host = Some(host.into());
        self
    }

    /// Set the default database user.
    #[must_use]
    pub fn with_database_user<S: Into<String>>(mut self, user: S) -> Self {
        self.configuration.database_user = Some(user.into());
        self
    }

    /// Set the model to use.
    #[must_use]
    pub fn with_llm_model<S: Into<String>>(mut self, model: S) -> Self {
        self.configuration.llm_model = model.into();
        self
    }

    /// Set the base URL of the model API.
    #[must_use]
    pub fn with_llm_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.configuration.llm_base_url = base_url.into();
        self
    }

    /// Set the model request timeout.
    #[must_use]
    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.configuration.llm_timeout = timeout;
        self
    }

    /// Set the name of the environment variable holding the API key.
    #[must_use]
    pub fn with_llm_api_key_env<S: Into<String>>(mut self, api_key_env: S) -> Self {
        self.configuration.llm_api_key_env = api_key_env.into();
        self
    }

    /// Set the file replacing the default prompt instruction.
    #[must_use]
    pub fn with_prompt_template_file<P: Into<PathBuf>>(mut self, template_file: P) -> Self {
        self.configuration.prompt_template_file = Some(template_file.into());
        self
    }

    /// Set the statement policy to use.
    #[must_use]
    pub fn with_pipeline_policy(mut self, policy: StatementPolicy) -> Self {
        self.configuration.pipeline_policy = policy;
        self
    }

    /// Set the results limit to use.
    #[must_use]
    pub fn with_results_limit(mut self, results_limit: usize) -> Self {
        self.configuration.results_limit = results_limit;
        self
    }

    /// Set the results header to use.
    #[must_use]
    pub fn with_results_header(mut self, results_header: bool) -> Self {
        self.configuration.results_header = results_header;
        self
    }

    /// Build a [Configuration] instance and install the log file subscriber.
    ///
    /// # Errors
    /// * [`Error::Configuration`] if the log file appender cannot be created
    pub fn build(self) -> Result<Configuration> {
        let configuration = &self.configuration;
        let log_level = configuration.log_level;

        if let Some(level) = log_level.into_level() {
            let log_dir = configuration.log_dir.clone().unwrap_or_default();
            let file_appender = RollingFileAppender::builder()
                .rotation(configuration.log_rotation.clone())
                .filename_prefix(&configuration.program_name)
                .build(log_dir)
                .map_err(|error| Error::Configuration(error.to_string()))?
                .with_max_level(level);

            let result = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(file_appender),
                )
                .try_init();
            if let Err(error) = result {
                debug!("log subscriber already installed: {error}");
            }
        }

        Ok(self.configuration)
    }
}

/// The configuration for the application.
#[derive(Clone, Debug)]
pub struct Configuration {
    pub program_name: String,
    pub version: String,
    pub config_dir: Option<PathBuf>,
    pub log_level: LevelFilter,
    pub log_dir: Option<PathBuf>,
    pub log_rotation: Rotation,
    pub database_driver: String,
    pub database_host: Option<String>,
    pub database_user: Option<String>,
    pub llm_model: String,
    pub llm_base_url: String,
    pub llm_timeout: Duration,
    pub llm_api_key_env: String,
    pub prompt_template_file: Option<PathBuf>,
    pub pipeline_policy: StatementPolicy,
    pub results_limit: usize,
    pub results_header: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            program_name: String::new(),
            version: String::new(),
            config_dir: None,
            log_level: LevelFilter::OFF,
            log_dir: None,
            log_rotation: Rotation::DAILY,
            database_driver: "mysql".to_string(),
            database_host: None,
            database_user: None,
            llm_model: DEFAULT_MODEL.to_string(),
            llm_base_url: DEFAULT_BASE_URL.to_string(),
            llm_timeout: Duration::from_secs(30),
            llm_api_key_env: "GEMINI_API_KEY".to_string(),
            prompt_template_file: None,
            pipeline_policy: StatementPolicy::Permissive,
            results_limit: 1000,
            results_header: true,
        }
    }
}

impl Configuration {
    /// Read the model API key from the environment variable named by `llm.api_key_env`.
    ///
    /// # Errors
    /// * [`Error::Configuration`] if the variable is not set or empty
    pub fn llm_api_key(&self) -> Result<String> {
        match env::var(&self.llm_api_key_env) {
            Ok(api_key) if !api_key.trim().is_empty() => Ok(api_key),
            _ => Err(Error::Configuration(format!(
                "environment variable {} is not set",
                self.llm_api_key_env
            ))),
        }
    }
}

/// The configuration file for the application.
#[derive(Clone, Debug)]
struct ConfigFile {
    config_dir: PathBuf,
    config: Config,
}

impl ConfigFile {
    fn new<S: Into<String>, P: Into<PathBuf>>(program_name: S, config_dir: P) -> Result<ConfigFile> {
        let program_name = program_name.into();
        let config_dir = config_dir.into();

        create_dir_all(&config_dir)?;
        let configuration_file = config_dir.join(format!("{program_name}.toml"));

        // Create the configuration file if it does not exist
        if let Ok(mut file) = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&configuration_file)
        {
            file.write_all(DEFAULT_CONFIG.as_bytes())?;
        }

        let conf_file = configuration_file.to_string_lossy().to_string();
        debug!("Configuration file: {conf_file}");

        let prefix = program_name.to_uppercase().replace('-', "_");
        debug!("Configuration environment prefix: {prefix}");

        let config = Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(config::File::new(&conf_file, FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(prefix.as_str())
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(Self { config_dir, config })
    }

    fn load_configuration(&self, configuration: &mut Configuration) -> Result<()> {
        let config = &self.config;
        let config_dir = &self.config_dir;

        if let Ok(log_level) = config.get::<String>("log.level") {
            configuration.log_level = LevelFilter::from_str(log_level.as_str())
                .map_err(|_| Error::Configuration(format!("Invalid log.level: {log_level}")))?;
        }

        configuration.log_dir = Some(config_dir.join("logs"));

        configuration.log_rotation = match config.get::<String>("log.rotation")?.as_str() {
            "minutely" => Rotation::MINUTELY,
            "hourly" => Rotation::HOURLY,
            "daily" => Rotation::DAILY,
            "never" => Rotation::NEVER,
            rotation => {
                return Err(Error::Configuration(format!(
                    "Invalid log.rotation: {rotation}"
                )));
            }
        };

        if let Ok(driver) = config.get::<String>("database.driver") {
            configuration.database_driver = driver;
        }
        if let Ok(host) = config.get::<String>("database.host") {
            configuration.database_host = Some(host);
        }
        if let Ok(user) = config.get::<String>("database.user") {
            configuration.database_user = Some(user);
        }

        if let Ok(model) = config.get::<String>("llm.model") {
            configuration.llm_model = model;
        }
        if let Ok(base_url) = config.get::<String>("llm.base_url") {
            configuration.llm_base_url = base_url;
        }
        if let Ok(timeout_secs) = config.get::<u64>("llm.timeout_secs") {
            configuration.llm_timeout = Duration::from_secs(timeout_secs);
        }
        if let Ok(api_key_env) = config.get::<String>("llm.api_key_env") {
            configuration.llm_api_key_env = api_key_env;
        }

        if let Ok(template_file) = config.get::<String>("prompt.template_file") {
            configuration.prompt_template_file = Some(config_dir.join(template_file));
        }

        if let Ok(policy) = config.get::<String>("pipeline.policy") {
            configuration.pipeline_policy = StatementPolicy::from_str(&policy)?;
        }

        if let Ok(results_limit) = config.get::<usize>("results.limit") {
            configuration.results_limit = results_limit;
        }
        if let Ok(results_header) = config.get::<bool>("results.header") {
            configuration.results_header = results_header;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_configuration_builder() -> anyhow::Result<()> {
        let program_name = "test";
        let version = "1.2.3";
        let log_dir = ".nlsql/logs";

        let configuration = ConfigurationBuilder::new(program_name, version)
            .with_log_level(LevelFilter::OFF)
            .with_log_dir(log_dir)
            .with_log_rotation(Rotation::MINUTELY)
            .with_database_driver("test")
            .with_database_host("db.example.com:3306")
            .with_database_user("analyst")
            .with_llm_model("gemini-1.5-flash")
            .with_llm_base_url("http://localhost:8080")
            .with_llm_timeout(Duration::from_secs(5))
            .with_llm_api_key_env("TEST_API_KEY")
            .with_prompt_template_file("prompt.txt")
            .with_pipeline_policy(StatementPolicy::ReadOnly)
            .with_results_limit(42)
            .with_results_header(false)
            .build()?;

        assert_eq!(configuration.program_name, program_name);
        assert_eq!(configuration.version, version);
        assert_eq!(configuration.log_level, LevelFilter::OFF);
        assert_eq!(configuration.log_dir, Some(PathBuf::from(log_dir)));
        assert_eq!(configuration.log_rotation, Rotation::MINUTELY);
        assert_eq!(configuration.database_driver, "test");
        assert_eq!(
            configuration.database_host.as_deref(),
            Some("db.example.com:3306")
        );
        assert_eq!(configuration.database_user.as_deref(), Some("analyst"));
        assert_eq!(configuration.llm_model, "gemini-1.5-flash");
        assert_eq!(configuration.llm_base_url, "http://localhost:8080");
        assert_eq!(configuration.llm_timeout, Duration::from_secs(5));
        assert_eq!(configuration.llm_api_key_env, "TEST_API_KEY");
        assert_eq!(
            configuration.prompt_template_file,
            Some(PathBuf::from("prompt.txt"))
        );
        assert_eq!(configuration.pipeline_policy, StatementPolicy::ReadOnly);
        assert_eq!(configuration.results_limit, 42);
        assert!(!configuration.results_header);
        Ok(())
    }

    #[test]
    fn test_default_configuration() {
        let configuration = Configuration::default();
        assert!(configuration.program_name.is_empty());
        assert!(configuration.version.is_empty());
        assert_eq!(configuration.config_dir, None);
        assert_eq!(configuration.log_level, LevelFilter::OFF);
        assert_eq!(configuration.log_dir, None);
        assert_eq!(configuration.log_rotation, Rotation::DAILY);
        assert_eq!(configuration.database_driver, "mysql");
        assert_eq!(configuration.database_host, None);
        assert_eq!(configuration.llm_model, "gemini-pro");
        assert_eq!(configuration.llm_timeout, Duration::from_secs(30));
        assert_eq!(configuration.llm_api_key_env, "GEMINI_API_KEY");
        assert_eq!(configuration.pipeline_policy, StatementPolicy::Permissive);
        assert_eq!(configuration.results_limit, 1000);
        assert!(configuration.results_header);
    }

    #[test]
    fn test_with_config_dir_creates_default_file() -> anyhow::Result<()> {
        let config_dir = tempfile::tempdir()?;

        let configuration = ConfigurationBuilder::new("nlsql", "0.1.0")
            .with_config_dir(config_dir.path())?
            .build()?;

        let config_file = config_dir.path().join("nlsql.toml");
        assert_eq!(std::fs::read_to_string(config_file)?, DEFAULT_CONFIG);
        assert_eq!(configuration.config_dir, Some(config_dir.path().to_path_buf()));
        assert_eq!(configuration.log_dir, Some(config_dir.path().join("logs")));
        assert_eq!(configuration.database_driver, "mysql");
        assert_eq!(configuration.llm_model, "gemini-pro");
        assert_eq!(configuration.prompt_template_file, None);
        Ok(())
    }

    #[test]
    fn test_with_config_dir_user_file() -> anyhow::Result<()> {
        let config_dir = tempfile::tempdir()?;
        let user_config = indoc! {r#"
            [log]
            rotation = "hourly"

            [database]
            host = "db.example.com"
            user = "analyst"

            [llm]
            model = "gemini-1.5-flash"
            timeout_secs = 10

            [prompt]
            template_file = "movies_prompt.txt"

            [pipeline]
            policy = "read_only"

            [results]
            limit = 0
            header = false
        "#};
        std::fs::write(config_dir.path().join("nlsql_user.toml"), user_config)?;

        let configuration = ConfigurationBuilder::new("nlsql_user", "0.1.0")
            .with_config_dir(config_dir.path())?
            .build()?;

        assert_eq!(configuration.log_rotation, Rotation::HOURLY);
        assert_eq!(configuration.database_host.as_deref(), Some("db.example.com"));
        assert_eq!(configuration.database_user.as_deref(), Some("analyst"));
        assert_eq!(configuration.llm_model, "gemini-1.5-flash");
        assert_eq!(configuration.llm_base_url, DEFAULT_BASE_URL);
        assert_eq!(configuration.llm_timeout, Duration::from_secs(10));
        assert_eq!(
            configuration.prompt_template_file,
            Some(config_dir.path().join("movies_prompt.txt"))
        );
        assert_eq!(configuration.pipeline_policy, StatementPolicy::ReadOnly);
        assert_eq!(configuration.results_limit, 0);
        assert!(!configuration.results_header);
        Ok(())
    }

    #[test]
    fn test_invalid_rotation() -> anyhow::Result<()> {
        let config_dir = tempfile::tempdir()?;
        std::fs::write(
            config_dir.path().join("nlsql_rotation.toml"),
            "[log]\nrotation = \"weekly\"\n",
        )?;

        let result = ConfigurationBuilder::new("nlsql_rotation", "0.1.0")
            .with_config_dir(config_dir.path());

        assert!(
            matches!(result, Err(Error::Configuration(message)) if message.contains("log.rotation"))
        );
        Ok(())
    }

    #[test]
    fn test_invalid_policy() -> anyhow::Result<()> {
        let config_dir = tempfile::tempdir()?;
        std::fs::write(
            config_dir.path().join("nlsql_policy.toml"),
            "[pipeline]\npolicy = \"strict\"\n",
        )?;

        let result = ConfigurationBuilder::new("nlsql_policy", "0.1.0")
            .with_config_dir(config_dir.path());

        assert!(matches!(result, Err(Error::Configuration(_))));
        Ok(())
    }

    #[test]
    fn test_llm_api_key_missing() {
        let configuration = Configuration {
            llm_api_key_env: "NLSQL_TEST_API_KEY_THAT_IS_NEVER_SET".to_string(),
            ..Configuration::default()
        };
        let result = configuration.llm_api_key();
        assert!(
            matches!(result, Err(Error::Configuration(message)) if message.contains("NLSQL_TEST_API_KEY_THAT_IS_NEVER_SET"))
        );
    }
}
