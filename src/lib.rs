//! Repository base, error normalization and slow-query observation for
//! pooled SQL clients.
//!
//! The pieces:
//!
//! * [`ConnectionState`] owns the pool and the process-wide [`SlowQueryLogger`].
//! * [`Repository`] / [`QueryRepository`] resolve where each call runs (a bound
//!   transaction or the pool) and which slow-query threshold applies.
//! * [`Request`] carries parameters, builds `IN (...)` clauses and runs
//!   `query`, `execute` and `bulk` through one decorator that times the call and
//!   normalizes driver errors into [`SqlRepositoryError`].
//!
//! The SQL Server driver lives in [`mssql`] behind the default `mssql` feature.

pub mod driver;
pub mod error;
pub mod execution;
pub mod prelude;
pub mod repository;
pub mod request;
pub mod results;
pub mod slow_query;
pub mod state;
pub mod types;

#[cfg(feature = "mssql")]
pub mod mssql;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use driver::{Driver, ErrorClass, Parameter, Table, Target};
pub use error::SqlRepositoryError;
pub use repository::{QueryRepository, Repository, RequestOptions};
pub use request::Request;
pub use results::{CustomDbRow, QueryResult, ResultSet};
pub use slow_query::{SlowQueryError, SlowQueryLog, SlowQueryLogger, TracingSlowQueryLog};
pub use state::{ConnectConfig, ConnectionState};
pub use types::RowValues;
