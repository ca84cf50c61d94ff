use crate::error::Result;
use indoc::indoc;
use std::path::Path;
use tracing::debug;

/// Version of [`DEFAULT_PROMPT`]; bump whenever the wording changes.
pub const PROMPT_VERSION: &str = "1";

/// Instruction describing the `movie` table.
///
/// The table description is written by hand; it is not derived from the live catalog and has
/// to be kept in step with the schema of the database the questions are asked against.
pub const DEFAULT_PROMPT: &str = indoc! {r"
    You are an expert in converting English questions to SQL queries.
    The SQL database has a table named movie with the following columns:
    movie_id, title, release_year, genre, rating.

    Example 1 - How many movies are in the database?
    The SQL command will be something like this: SELECT COUNT(*) FROM movie;

    Example 2 - List all movies released after 2010.
    The SQL command will be something like this: SELECT * FROM movie WHERE release_year > 2010;

    Respond with a single SQL statement only. Do not wrap it in ``` and do not
    include the word SQL before or after the statement.
"};

/// The instruction and the question, sent to the translator as two ordered parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslationRequest {
    instruction: String,
    question: String,
}

impl TranslationRequest {
    #[must_use]
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    #[must_use]
    pub fn question(&self) -> &str {
        &self.question
    }
}

/// Builds [`TranslationRequest`]s from a fixed instruction template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptBuilder {
    instruction: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT)
    }
}

impl PromptBuilder {
    pub fn new<S: Into<String>>(instruction: S) -> Self {
        Self {
            instruction: instruction.into(),
        }
    }

    /// Load the instruction template from a file.
    ///
    /// # Errors
    /// * [`Error::Io`](crate::Error::Io) if the file cannot be read
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let instruction = std::fs::read_to_string(path)?;
        debug!("prompt template loaded from {}", path.display());
        Ok(Self::new(instruction))
    }

    #[must_use]
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Pair the instruction with `question`; the question is passed through untouched.
    #[must_use]
    pub fn build(&self, question: &str) -> TranslationRequest {
        TranslationRequest {
            instruction: self.instruction.clone(),
            question: question.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_prompt() {
        let builder = PromptBuilder::default();
        let instruction = builder.instruction();
        assert!(instruction.contains("table named movie"));
        for column in ["movie_id", "title", "release_year", "genre", "rating"] {
            assert!(instruction.contains(column), "{column}");
        }
        assert!(instruction.contains("SELECT COUNT(*) FROM movie;"));
        assert!(instruction.contains("```"));
    }

    #[test]
    fn test_build() {
        let builder = PromptBuilder::default();
        let request = builder.build("Which movies have a rating above 8?");
        assert_eq!(request.instruction(), DEFAULT_PROMPT);
        assert_eq!(request.question(), "Which movies have a rating above 8?");
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = PromptBuilder::new("Translate to SQL.");
        let question = "  how many movies?  ";
        assert_eq!(builder.build(question), builder.build(question));
        assert_eq!(builder.build(question).question(), question);
    }

    #[test]
    fn test_from_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, "The database has a table named actor.")?;

        let builder = PromptBuilder::from_file(file.path())?;

        assert_eq!(
            builder.build("list actors").instruction(),
            "The database has a table named actor."
        );
        Ok(())
    }

    #[test]
    fn test_from_missing_file() {
        let result = PromptBuilder::from_file("/nonexistent/prompt.txt");
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
