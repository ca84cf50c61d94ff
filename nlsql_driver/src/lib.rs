//! # nlsql driver
//!
//! The nlsql driver library provides the interfaces for connecting to a database server,
//! browsing its databases and tables, and executing SQL statements.

#![forbid(unsafe_code)]
#![forbid(clippy::allow_attributes)]
#![deny(clippy::pedantic)]

mod connection;
mod driver;
mod driver_manager;
mod error;
mod value;

pub use connection::{
    Connection, LimitQueryResult, MemoryQueryResult, MockConnection, QueryResult, Row,
    StatementMetadata,
};
pub use driver::{Driver, MockDriver};
pub use driver_manager::DriverManager;
pub use error::{Error, Result};
pub use value::Value;
