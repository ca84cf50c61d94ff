//! # nlsql core
//!
//! Answers natural language questions about a MySQL database. A [`Session`] tracks the
//! connection to the server and the selected database, a [`Pipeline`] turns a question into a
//! prompt, asks a [`Translator`] for SQL, sanitizes the reply and runs it through the
//! [`SqlExecutor`].
//!
//! ```rust,no_run
//! use nlsql_core::translator::GeminiClient;
//! use nlsql_core::{Credentials, Pipeline, Session};
//! use std::time::Duration;
//!
//! # async fn run() -> nlsql_core::Result<()> {
//! nlsql_core::register_drivers()?;
//! let mut session = Session::new(nlsql_core::driver("mysql")?);
//! session
//!     .connect(&Credentials::new("localhost:3306", "root", "secret"))
//!     .await?;
//! session.select_database("moviesdb").await?;
//!
//! let client = GeminiClient::new(
//!     "api-key",
//!     "gemini-pro",
//!     "https://generativelanguage.googleapis.com/v1beta",
//!     Duration::from_secs(30),
//! )?;
//! let mut pipeline = Pipeline::new(Box::new(client));
//! let answer = pipeline
//!     .run(&mut session, "How many movies are there?")
//!     .await?;
//! println!("{}", answer.statement);
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![forbid(clippy::allow_attributes)]
#![deny(clippy::pedantic)]

pub mod catalog;
pub mod configuration;
mod error;
pub mod executor;
pub mod pipeline;
pub mod policy;
pub mod prompt;
pub mod sanitize;
pub mod session;
pub mod translator;

pub use error::{DatabaseErrorReason, Error, Result};
pub use executor::{Results, SqlExecutor};
pub use pipeline::{Answer, Pipeline, PipelineStage};
pub use policy::StatementPolicy;
pub use prompt::{PromptBuilder, TranslationRequest};
pub use sanitize::{ExecutableStatement, sanitize};
pub use session::{ConnectionHandle, Credentials, Session, SessionStage};
pub use translator::{GeminiClient, Translator};

use nlsql_driver::{Driver, DriverManager};
use std::sync::Arc;

/// Register the drivers enabled by crate features with the [`DriverManager`].
///
/// # Errors
/// * If a lock for drivers cannot be acquired
pub fn register_drivers() -> Result<()> {
    #[cfg(feature = "driver-mysql")]
    DriverManager::add(Arc::new(nlsql_driver_mysql::Driver))?;
    Ok(())
}

/// Look up a registered driver by identifier.
///
/// # Errors
/// * [`nlsql_driver::Error::DriverNotFound`] if no driver is registered for `identifier`
pub fn driver(identifier: &str) -> Result<Arc<dyn Driver>> {
    match DriverManager::get(identifier)? {
        Some(driver) => Ok(driver),
        None => Err(nlsql_driver::Error::DriverNotFound(identifier.to_string()).into()),
    }
}
