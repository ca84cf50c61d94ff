use crate::configuration::Configuration;
use crate::error::{Error, Result};
use crate::executor::{Results, SqlExecutor};
use crate::policy::StatementPolicy;
use crate::prompt::PromptBuilder;
use crate::sanitize::{ExecutableStatement, sanitize};
use crate::session::{Session, SessionStage};
use crate::translator::Translator;
use std::fmt;
use tracing::{info, instrument, warn};

/// Progress of the most recent [`Pipeline::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipelineStage {
    #[default]
    Idle,
    Prompted,
    Translated,
    Sanitized,
    Executed,
    Displayed,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Prompted => "prompted",
            PipelineStage::Translated => "translated",
            PipelineStage::Sanitized => "sanitized",
            PipelineStage::Executed => "executed",
            PipelineStage::Displayed => "displayed",
            PipelineStage::Failed => "failed",
        };
        write!(f, "{stage}")
    }
}

/// A question, the statement generated for it and the statement's results.
#[derive(Clone, Debug, PartialEq)]
pub struct Answer {
    pub question: String,
    pub statement: ExecutableStatement,
    pub results: Results,
}

/// Turns questions into executed SQL: prompt, translate, sanitize, check, execute.
#[derive(Debug)]
pub struct Pipeline {
    prompt_builder: PromptBuilder,
    translator: Box<dyn Translator>,
    executor: SqlExecutor,
    policy: StatementPolicy,
    stage: PipelineStage,
    statement: Option<ExecutableStatement>,
}

impl Pipeline {
    pub fn new(translator: Box<dyn Translator>) -> Self {
        Self {
            prompt_builder: PromptBuilder::default(),
            translator,
            executor: SqlExecutor::default(),
            policy: StatementPolicy::default(),
            stage: PipelineStage::Idle,
            statement: None,
        }
    }

    /// Create a pipeline using the configured prompt template, row limit and policy.
    ///
    /// # Errors
    /// * [`Error::Io`] if the configured prompt template file cannot be read
    pub fn from_configuration(
        configuration: &Configuration,
        translator: Box<dyn Translator>,
    ) -> Result<Self> {
        let prompt_builder = match &configuration.prompt_template_file {
            Some(template_file) => PromptBuilder::from_file(template_file)?,
            None => PromptBuilder::default(),
        };
        Ok(Self::new(translator)
            .with_prompt_builder(prompt_builder)
            .with_executor(SqlExecutor::new(configuration.results_limit))
            .with_policy(configuration.pipeline_policy))
    }

    #[must_use]
    pub fn with_prompt_builder(mut self, prompt_builder: PromptBuilder) -> Self {
        self.prompt_builder = prompt_builder;
        self
    }

    #[must_use]
    pub fn with_executor(mut self, executor: SqlExecutor) -> Self {
        self.executor = executor;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: StatementPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// The statement generated by the most recent run, kept even when execution failed.
    #[must_use]
    pub fn statement(&self) -> Option<&ExecutableStatement> {
        self.statement.as_ref()
    }

    /// Answer `question` against the session's active database.
    ///
    /// Every run starts at [`PipelineStage::Idle`] and ends at [`PipelineStage::Displayed`] or
    /// [`PipelineStage::Failed`]. A failed run leaves the session stage as it was, unless the
    /// connection was lost.
    ///
    /// # Errors
    /// * [`Error::Precondition`] if no database is selected; the translator is not called
    /// * [`Error::Service`] if translation fails
    /// * [`Error::EmptyTranslation`] if the translation is empty once sanitized
    /// * [`Error::PolicyViolation`] if the statement policy refuses the statement
    /// * [`Error::Query`] if the server rejects the statement
    #[instrument(level = "info", skip(self, session))]
    pub async fn run(&mut self, session: &mut Session, question: &str) -> Result<Answer> {
        self.stage = PipelineStage::Idle;
        self.statement = None;

        match self.advance(session, question).await {
            Ok(answer) => {
                self.stage = PipelineStage::Displayed;
                info!(statement = %answer.statement, "question answered");
                Ok(answer)
            }
            Err(error) => {
                warn!(stage = %self.stage, "question failed: {error}");
                self.stage = PipelineStage::Failed;
                Err(error)
            }
        }
    }

    async fn advance(&mut self, session: &mut Session, question: &str) -> Result<Answer> {
        let actual = session.stage();
        if !actual.is_ready() {
            return Err(Error::Precondition {
                operation: "ask",
                required: SessionStage::READY,
                actual,
            });
        }

        let request = self.prompt_builder.build(question);
        self.stage = PipelineStage::Prompted;

        let translation = self.translator.translate(&request).await?;
        self.stage = PipelineStage::Translated;

        let statement = sanitize(translation.raw_text(), question)?;
        self.statement = Some(statement.clone());
        self.stage = PipelineStage::Sanitized;

        let handle = session.guard("ask", SessionStage::READY)?;
        self.policy.check(handle.connection(), &statement)?;

        let results = self.executor.execute(session, statement.as_str()).await?;
        self.stage = PipelineStage::Executed;

        Ok(Answer {
            question: question.to_string(),
            statement,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{credentials, driver_with, movies_connection, ready_session};
    use crate::translator::{MockTranslator, TranslationResult};
    use nlsql_driver::{MemoryQueryResult, MockConnection, QueryResult, Value};
    use std::sync::{Arc, Mutex};

    const QUESTION: &str = "How many movies are in the database?";

    fn translator_returning(raw_text: &'static str) -> Box<dyn Translator> {
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .times(1)
            .returning(move |_| Ok(TranslationResult::new(raw_text)));
        Box::new(translator)
    }

    fn count_connection(executed: Arc<Mutex<Vec<String>>>) -> MockConnection {
        let mut connection = movies_connection();
        connection.expect_query().returning(move |sql| {
            executed
                .lock()
                .map_err(|error| nlsql_driver::Error::IoError(error.to_string()))?
                .push(sql.to_string());
            let columns = vec!["COUNT(*)".to_string()];
            let rows = vec![vec![Value::I64(42)]];
            Ok(Box::new(MemoryQueryResult::new(columns, rows)))
        });
        connection
    }

    #[tokio::test]
    async fn test_run_requires_ready_session() -> anyhow::Result<()> {
        let mut translator = MockTranslator::new();
        translator.expect_translate().never();
        let mut pipeline = Pipeline::new(Box::new(translator));
        let mut session = Session::new(driver_with(movies_connection()));
        session.connect(&credentials()).await?;

        let error = pipeline
            .run(&mut session, QUESTION)
            .await
            .expect_err("not ready");

        assert!(matches!(
            error,
            Error::Precondition {
                required: SessionStage::DatabaseSelected,
                actual: SessionStage::Connected,
                ..
            }
        ));
        assert_eq!(pipeline.stage(), PipelineStage::Failed);
        assert_eq!(session.stage(), SessionStage::Connected);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_count_question() -> anyhow::Result<()> {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let mut session = ready_session(count_connection(executed.clone())).await?;
        let mut pipeline = Pipeline::new(translator_returning("SELECT COUNT(*) FROM movie;"));
        assert_eq!(pipeline.stage(), PipelineStage::Idle);

        let answer = pipeline.run(&mut session, QUESTION).await?;

        assert_eq!(pipeline.stage(), PipelineStage::Displayed);
        assert_eq!(answer.question, QUESTION);
        assert_eq!(answer.statement.as_str(), "SELECT COUNT(*) FROM movie;");
        let Results::Query(result) = answer.results else {
            panic!("expected query results");
        };
        assert_eq!(result.columns().len(), 1);
        assert_eq!(result.rows(), &[vec![Value::I64(42)]]);
        let executed = executed.lock().map_err(|error| anyhow::anyhow!("{error}"))?;
        assert_eq!(executed.as_slice(), ["SELECT COUNT(*) FROM movie;"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_sends_instruction_and_question() -> anyhow::Result<()> {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let mut session = ready_session(count_connection(executed)).await?;
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .withf(|request| {
                request.instruction() == "Only movie questions." && request.question() == QUESTION
            })
            .times(1)
            .returning(|_| Ok(TranslationResult::new("SELECT COUNT(*) FROM movie")));
        let mut pipeline = Pipeline::new(Box::new(translator))
            .with_prompt_builder(PromptBuilder::new("Only movie questions."));

        let _ = pipeline.run(&mut session, QUESTION).await?;

        assert_eq!(pipeline.stage(), PipelineStage::Displayed);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_fenced_translation() -> anyhow::Result<()> {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let mut session = ready_session(count_connection(executed.clone())).await?;
        let mut pipeline = Pipeline::new(translator_returning("```sql\nSELECT * FROM movie;\n```"));

        let answer = pipeline.run(&mut session, "List all movies").await?;

        assert_eq!(answer.statement.as_str(), "SELECT * FROM movie;");
        let executed = executed.lock().map_err(|error| anyhow::anyhow!("{error}"))?;
        assert_eq!(executed.as_slice(), ["SELECT * FROM movie;"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_missing_table() -> anyhow::Result<()> {
        let mut connection = movies_connection();
        connection.expect_query().returning(|_| {
            Err(nlsql_driver::Error::IoError(
                "Table 'moviesdb.movies' doesn't exist".into(),
            ))
        });
        let mut session = ready_session(connection).await?;
        let mut pipeline = Pipeline::new(translator_returning("SELECT COUNT(*) FROM movies;"));

        let error = pipeline
            .run(&mut session, QUESTION)
            .await
            .expect_err("missing table");

        assert!(matches!(
            &error,
            Error::Query { statement, message }
                if statement == "SELECT COUNT(*) FROM movies;" && message.contains("doesn't exist")
        ));
        assert_eq!(pipeline.stage(), PipelineStage::Failed);
        assert_eq!(
            pipeline.statement().map(ExecutableStatement::as_str),
            Some("SELECT COUNT(*) FROM movies;")
        );
        assert!(session.stage().is_ready());
        assert_eq!(session.active_database(), Some("moviesdb"));
        Ok(())
    }

    #[tokio::test]
    async fn test_run_empty_translation() -> anyhow::Result<()> {
        let mut session = ready_session(movies_connection()).await?;
        let mut pipeline = Pipeline::new(translator_returning(""));

        let error = pipeline
            .run(&mut session, QUESTION)
            .await
            .expect_err("empty");

        assert!(matches!(error, Error::EmptyTranslation { question } if question == QUESTION));
        assert_eq!(pipeline.stage(), PipelineStage::Failed);
        assert!(pipeline.statement().is_none());
        assert!(session.stage().is_ready());
        Ok(())
    }

    #[tokio::test]
    async fn test_run_service_error() -> anyhow::Result<()> {
        let mut session = ready_session(movies_connection()).await?;
        let mut translator = MockTranslator::new();
        translator.expect_translate().returning(|_| {
            Err(Error::Service {
                cause: "429 Too Many Requests".to_string(),
            })
        });
        let mut pipeline = Pipeline::new(Box::new(translator));

        let error = pipeline
            .run(&mut session, QUESTION)
            .await
            .expect_err("quota");

        assert!(matches!(error, Error::Service { .. }));
        assert_eq!(pipeline.stage(), PipelineStage::Failed);
        assert!(session.stage().is_ready());
        Ok(())
    }

    #[tokio::test]
    async fn test_run_read_only_policy() -> anyhow::Result<()> {
        let mut connection = movies_connection();
        connection
            .expect_execute()
            .returning(|_| panic!("statement must not reach the driver"));
        let mut session = ready_session(connection).await?;
        let mut pipeline = Pipeline::new(translator_returning("DELETE FROM movie;"))
            .with_policy(StatementPolicy::ReadOnly);

        let error = pipeline
            .run(&mut session, "Remove every movie")
            .await
            .expect_err("read only");

        assert!(matches!(error, Error::PolicyViolation { .. }));
        assert_eq!(pipeline.stage(), PipelineStage::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_permissive_policy_executes_dml() -> anyhow::Result<()> {
        let mut connection = movies_connection();
        connection.expect_execute().returning(|_| Ok(5));
        let mut session = ready_session(connection).await?;
        let mut pipeline = Pipeline::new(translator_returning("DELETE FROM movie;"));

        let answer = pipeline.run(&mut session, "Remove every movie").await?;

        assert_eq!(answer.results, Results::Execute(5));
        Ok(())
    }

    #[tokio::test]
    async fn test_run_restarts_after_failure() -> anyhow::Result<()> {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let mut session = ready_session(count_connection(executed)).await?;
        let mut translator = MockTranslator::new();
        let mut responses = vec!["SELECT COUNT(*) FROM movie", ""];
        translator
            .expect_translate()
            .times(2)
            .returning(move |_| Ok(TranslationResult::new(responses.pop().unwrap_or_default())));
        let mut pipeline = Pipeline::new(Box::new(translator));

        assert!(pipeline.run(&mut session, QUESTION).await.is_err());
        assert_eq!(pipeline.stage(), PipelineStage::Failed);

        let answer = pipeline.run(&mut session, QUESTION).await?;
        assert_eq!(pipeline.stage(), PipelineStage::Displayed);
        assert_eq!(answer.statement.as_str(), "SELECT COUNT(*) FROM movie");
        Ok(())
    }

    #[test]
    fn test_from_configuration() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        std::io::Write::write_all(&mut file, b"Custom instruction.")?;
        let configuration = Configuration {
            prompt_template_file: Some(file.path().to_path_buf()),
            results_limit: 10,
            pipeline_policy: StatementPolicy::ReadOnly,
            ..Configuration::default()
        };

        let pipeline = Pipeline::from_configuration(&configuration, Box::new(MockTranslator::new()))?;

        assert_eq!(pipeline.prompt_builder.instruction(), "Custom instruction.");
        assert_eq!(pipeline.executor.limit(), 10);
        assert_eq!(pipeline.policy, StatementPolicy::ReadOnly);
        assert_eq!(pipeline.stage(), PipelineStage::Idle);
        Ok(())
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(PipelineStage::Displayed.to_string(), "displayed");
        assert_eq!(PipelineStage::default(), PipelineStage::Idle);
    }
}
