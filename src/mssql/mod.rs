// SQL Server driver integration, built on tiberius pooled through bb8-tiberius.
//
// - config: connection options, pool setup and the transaction-resetting manager
// - params: SqlType, value conversion and sp_executesql wrapping for named parameters
// - query: recordset materialization, DML and bulk execution against one client
// - transaction: caller-owned transaction pinned to one pooled connection
// - driver: the `Driver` implementation tying the above together

pub mod config;
pub mod driver;
pub mod params;
pub mod query;
pub mod transaction;

pub use config::{
    MssqlClient, MssqlConnectionManager, MssqlOptions, MssqlOptionsBuilder, MssqlPool,
};
pub use driver::{MssqlDriver, MssqlDriverError};
pub use params::SqlType;
pub use transaction::MssqlTransaction;

/// Connection state for SQL Server.
pub type MssqlState = crate::state::ConnectionState<MssqlDriver>;
/// Repository base for SQL Server.
pub type MssqlRepository = crate::repository::QueryRepository<MssqlDriver>;
/// Request for SQL Server.
pub type MssqlRequest = crate::request::Request<MssqlDriver>;
/// Bulk-load table for SQL Server.
pub type MssqlTable = crate::driver::Table<SqlType>;
