//! Convenient imports for common functionality.
//!
//! `use sql_repository::prelude::*;` brings in everything a repository
//! implementation usually touches.

pub use crate::driver::{Driver, Table};
pub use crate::error::SqlRepositoryError;
pub use crate::repository::{QueryRepository, Repository, RequestOptions};
pub use crate::request::Request;
pub use crate::results::{CustomDbRow, QueryResult, ResultSet};
pub use crate::slow_query::{SlowQueryError, SlowQueryLog, SlowQueryLogger};
pub use crate::state::{ConnectConfig, ConnectionState};
pub use crate::types::RowValues;

#[cfg(feature = "mssql")]
pub use crate::mssql::{
    MssqlDriver, MssqlOptions, MssqlRepository, MssqlState, MssqlTable, MssqlTransaction, SqlType,
};
