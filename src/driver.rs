//! The boundary between this crate and a concrete database client.
//!
//! A [`Driver`] knows how to open a pool, begin a transaction, run a command
//! or a bulk load against a [`Target`], and how to [`classify`](Driver::classify)
//! its own errors. Everything else (request resolution, slow-query timing,
//! error normalization) is driver-agnostic and lives in the rest of the crate.

use std::fmt;

use async_trait::async_trait;

use crate::results::QueryResult;
use crate::types::RowValues;

/// How the execution decorator should treat a driver error.
#[derive(Debug)]
pub enum ErrorClass<E> {
    /// A native driver error; normalized into the crate's own error, keeping this message.
    Native(String),
    /// Anything else; handed back to the caller unchanged.
    Other(E),
}

/// Where a request runs: the shared pool or a caller-owned transaction.
pub enum Target<D: Driver> {
    Pool(D::Pool),
    Transaction(D::Transaction),
}

impl<D: Driver> Target<D> {
    #[must_use]
    pub fn is_transaction(&self) -> bool {
        matches!(self, Target::Transaction(_))
    }
}

impl<D: Driver> Clone for Target<D> {
    fn clone(&self) -> Self {
        match self {
            Target::Pool(pool) => Target::Pool(pool.clone()),
            Target::Transaction(tx) => Target::Transaction(tx.clone()),
        }
    }
}

impl<D: Driver> fmt::Debug for Target<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Pool(_) => f.write_str("Pool"),
            Target::Transaction(_) => f.write_str("Transaction"),
        }
    }
}

/// A named, typed request parameter. Referenced in SQL as `@name`.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter<T> {
    pub name: String,
    pub sql_type: T,
    pub value: RowValues,
}

/// Rows to bulk-load into `name`. `columns` lists every column of the
/// destination table in table order; each row holds one value per column.
#[derive(Debug, Clone, PartialEq)]
pub struct Table<T> {
    pub name: String,
    pub columns: Vec<(String, T)>,
    pub rows: Vec<Vec<RowValues>>,
}

impl<T> Table<T> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, name: impl Into<String>, sql_type: T) -> Self {
        self.columns.push((name.into(), sql_type));
        self
    }

    pub fn add_row(&mut self, row: Vec<RowValues>) -> &mut Self {
        self.rows.push(row);
        self
    }
}

/// A database client this crate can decorate.
#[async_trait]
pub trait Driver: Send + Sync + Sized + 'static {
    /// Connection settings handed to [`Driver::connect`].
    type Config: Send + 'static;
    /// Shared, cheaply clonable pool handle.
    type Pool: Clone + Send + Sync + 'static;
    /// Caller-owned transaction handle, cheaply clonable.
    type Transaction: Clone + Send + Sync + 'static;
    /// Column type used when binding parameters and describing bulk tables.
    type SqlType: Clone + fmt::Debug + Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn connect(config: Self::Config) -> Result<Self::Pool, Self::Error>;

    /// Release `pool`. Clones held elsewhere may outlive it.
    async fn close(pool: Self::Pool) -> Result<(), Self::Error>;

    async fn begin_transaction(pool: &Self::Pool) -> Result<Self::Transaction, Self::Error>;

    async fn query(
        target: &Target<Self>,
        command: &str,
        parameters: &[Parameter<Self::SqlType>],
    ) -> Result<QueryResult, Self::Error>;

    /// Run a statement for its side effects, returning the affected row count.
    async fn execute(
        target: &Target<Self>,
        command: &str,
        parameters: &[Parameter<Self::SqlType>],
    ) -> Result<u64, Self::Error>;

    /// Bulk-load `table`, returning the number of rows inserted.
    async fn bulk(target: &Target<Self>, table: &Table<Self::SqlType>) -> Result<u64, Self::Error>;

    fn classify(error: Self::Error) -> ErrorClass<Self::Error>;
}
