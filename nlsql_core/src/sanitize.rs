//! Turns raw translator output into a statement that can be executed.

use crate::error::{Error, Result};
use std::fmt;

const FENCE: &str = "```";
const LABEL: &str = "sql";
const LANGUAGE_TAGS: [&str; 6] = ["mariadb", "mysql", "plsql", "sql", "sqlite", "tsql"];

/// A non-empty SQL statement with fences and `SQL` labels removed.
///
/// Only [`sanitize`] creates one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutableStatement(String);

impl ExecutableStatement {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for ExecutableStatement {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutableStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strip code fences and a leading or trailing `SQL` label from `raw_text`.
///
/// # Errors
/// * [`Error::EmptyTranslation`] if nothing is left; `question` is carried in the error
pub fn sanitize(raw_text: &str, question: &str) -> Result<ExecutableStatement> {
    let text = strip_fences(raw_text);
    let text = strip_leading_label(text.trim());
    let text = strip_trailing_label(text);
    let text = text.trim();

    if text.is_empty() {
        return Err(Error::EmptyTranslation {
            question: question.to_string(),
        });
    }
    Ok(ExecutableStatement(text.to_string()))
}

/// Remove every fence along with a language tag that opens a fenced block.
fn strip_fences(text: &str) -> String {
    let mut parts = text.split(FENCE);
    let mut stripped = parts.next().unwrap_or_default().to_string();
    for part in parts {
        stripped.push_str(strip_language_tag(part));
    }
    stripped
}

fn strip_language_tag(text: &str) -> &str {
    match text.split_once('\n') {
        Some((tag, rest))
            if LANGUAGE_TAGS
                .iter()
                .any(|language| tag.trim_end().eq_ignore_ascii_case(language)) =>
        {
            rest
        }
        _ => text,
    }
}

/// `sql` or `SQL:` at the start, when it stands alone.
fn strip_leading_label(text: &str) -> &str {
    let Some(prefix) = text.get(..LABEL.len()) else {
        return text;
    };
    if !prefix.eq_ignore_ascii_case(LABEL) {
        return text;
    }

    let rest = &text[LABEL.len()..];
    match rest.chars().next() {
        None => rest,
        Some(':') => rest[1..].trim_start(),
        Some(c) if c.is_whitespace() => rest.trim_start(),
        Some(_) => text,
    }
}

/// A stand-alone `SQL` at the end, on its own line or after the closing `;`. Anywhere else it
/// may be an identifier such as an alias.
fn strip_trailing_label(text: &str) -> &str {
    if text.len() < LABEL.len() {
        return text;
    }
    let split = text.len() - LABEL.len();
    let (Some(statement), Some(suffix)) = (text.get(..split), text.get(split..)) else {
        return text;
    };
    if !suffix.eq_ignore_ascii_case(LABEL) {
        return text;
    }

    let trimmed = statement.trim_end();
    let separator = &statement[trimmed.len()..];
    if trimmed.is_empty() || trimmed.ends_with(';') || separator.contains('\n') {
        trimmed
    } else {
        text
    }
}
