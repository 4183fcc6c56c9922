//! Repository base.
//!
//! A concrete repository wraps a [`QueryRepository`] and implements
//! [`Repository`]; every data-access method then starts with
//! `self.request()?` and gets a fresh [`Request`] aimed at the right place.
//!
//! ```ignore
//! struct UsersRepository {
//!     base: QueryRepository<MssqlDriver>,
//! }
//!
//! impl Repository for UsersRepository {
//!     type Driver = MssqlDriver;
//!
//!     fn from_base(base: QueryRepository<MssqlDriver>) -> Self {
//!         Self { base }
//!     }
//!     fn base(&self) -> &QueryRepository<MssqlDriver> {
//!         &self.base
//!     }
//!     fn base_mut(&mut self) -> &mut QueryRepository<MssqlDriver> {
//!         &mut self.base
//!     }
//! }
//!
//! impl UsersRepository {
//!     async fn by_ids(&self, ids: &[i64]) -> Result<QueryResult, SqlRepositoryError> {
//!         let mut request = self.request()?;
//!         let ids = request.parametrize_in_clause("id", SqlType::BigInt, ids.iter().copied())?;
//!         request
//!             .query(&format!("SELECT id, name FROM users WHERE id IN ({ids})"))
//!             .await
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::driver::Driver;
use crate::error::SqlRepositoryError;
use crate::request::Request;
use crate::state::ConnectionState;

/// Per-call overrides for [`Repository::request_with`].
pub struct RequestOptions<D: Driver> {
    pub transaction: Option<D::Transaction>,
    pub slow_query_max_execution_time: Option<Duration>,
}

impl<D: Driver> Default for RequestOptions<D> {
    fn default() -> Self {
        Self {
            transaction: None,
            slow_query_max_execution_time: None,
        }
    }
}

impl<D: Driver> fmt::Debug for RequestOptions<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("transaction", &self.transaction.is_some())
            .field(
                "slow_query_max_execution_time",
                &self.slow_query_max_execution_time,
            )
            .finish()
    }
}

impl<D: Driver> RequestOptions<D> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn transaction(mut self, transaction: D::Transaction) -> Self {
        self.transaction = Some(transaction);
        self
    }

    #[must_use]
    pub fn slow_query_max_execution_time(mut self, max_execution_time: Duration) -> Self {
        self.slow_query_max_execution_time = Some(max_execution_time);
        self
    }
}

/// Shared state every repository carries: the connection state, an optional
/// bound transaction and an optional instance-level slow-query threshold.
pub struct QueryRepository<D: Driver> {
    state: Arc<ConnectionState<D>>,
    transaction: Option<D::Transaction>,
    slow_query_max_execution_time: Option<Duration>,
}

impl<D: Driver> Clone for QueryRepository<D> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            transaction: self.transaction.clone(),
            slow_query_max_execution_time: self.slow_query_max_execution_time,
        }
    }
}

impl<D: Driver> fmt::Debug for QueryRepository<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRepository")
            .field("transaction", &self.transaction.is_some())
            .field(
                "slow_query_max_execution_time",
                &self.slow_query_max_execution_time,
            )
            .finish_non_exhaustive()
    }
}

impl<D: Driver> QueryRepository<D> {
    #[must_use]
    pub fn new(state: Arc<ConnectionState<D>>) -> Self {
        Self {
            state,
            transaction: None,
            slow_query_max_execution_time: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> &Arc<ConnectionState<D>> {
        &self.state
    }

    pub fn set_transaction(&mut self, transaction: D::Transaction) -> &mut Self {
        self.transaction = Some(transaction);
        self
    }

    /// The bound transaction.
    ///
    /// # Errors
    ///
    /// Returns `SqlRepositoryError::NoTransaction` if none is bound.
    pub fn transaction(&self) -> Result<&D::Transaction, SqlRepositoryError> {
        self.transaction
            .as_ref()
            .ok_or(SqlRepositoryError::NoTransaction)
    }

    pub fn set_slow_query_max_execution_time(&mut self, max_execution_time: Duration) -> &mut Self {
        self.slow_query_max_execution_time = Some(max_execution_time);
        self
    }

    #[must_use]
    pub fn slow_query_max_execution_time(&self) -> Option<Duration> {
        self.slow_query_max_execution_time
    }

    /// A fresh request; see [`ConnectionState::resolve_request`] for the resolution rules.
    ///
    /// # Errors
    ///
    /// `NoConnection` or `NoSlowQueryLogger`, as described there.
    pub fn request_with(&self, options: RequestOptions<D>) -> Result<Request<D>, SqlRepositoryError> {
        self.state.resolve_request(
            options,
            self.transaction.as_ref(),
            self.slow_query_max_execution_time,
        )
    }

    /// Copy of this base bound to `transaction`, keeping the instance threshold.
    #[must_use]
    pub fn with_transaction(&self, transaction: D::Transaction) -> Self {
        Self {
            state: Arc::clone(&self.state),
            transaction: Some(transaction),
            slow_query_max_execution_time: self.slow_query_max_execution_time,
        }
    }
}

/// Implemented by concrete repositories; the provided methods do the rest.
pub trait Repository: Sized {
    type Driver: Driver;

    fn from_base(base: QueryRepository<Self::Driver>) -> Self;

    fn base(&self) -> &QueryRepository<Self::Driver>;

    fn base_mut(&mut self) -> &mut QueryRepository<Self::Driver>;

    /// Bind `transaction` to this instance.
    fn set_transaction(&mut self, transaction: <Self::Driver as Driver>::Transaction) -> &mut Self {
        self.base_mut().set_transaction(transaction);
        self
    }

    /// # Errors
    ///
    /// Returns `SqlRepositoryError::NoTransaction` until a transaction is bound.
    fn transaction(&self) -> Result<&<Self::Driver as Driver>::Transaction, SqlRepositoryError> {
        self.base().transaction()
    }

    /// Set the instance-level slow-query threshold.
    fn set_slow_query_max_execution_time(&mut self, max_execution_time: Duration) -> &mut Self {
        self.base_mut()
            .set_slow_query_max_execution_time(max_execution_time);
        self
    }

    /// A fresh request with no per-call overrides.
    ///
    /// # Errors
    ///
    /// See [`QueryRepository::request_with`].
    fn request(&self) -> Result<Request<Self::Driver>, SqlRepositoryError> {
        self.base().request_with(RequestOptions::new())
    }

    /// # Errors
    ///
    /// See [`QueryRepository::request_with`].
    fn request_with(
        &self,
        options: RequestOptions<Self::Driver>,
    ) -> Result<Request<Self::Driver>, SqlRepositoryError> {
        self.base().request_with(options)
    }

    /// A new instance of the same repository bound to `transaction`. `self`
    /// keeps its own binding, so a shared repository can hand out
    /// transaction-scoped copies.
    #[must_use]
    fn use_transaction(&self, transaction: <Self::Driver as Driver>::Transaction) -> Self {
        Self::from_base(self.base().with_transaction(transaction))
    }
}

impl<D: Driver> Repository for QueryRepository<D> {
    type Driver = D;

    fn from_base(base: QueryRepository<D>) -> Self {
        base
    }

    fn base(&self) -> &QueryRepository<D> {
        self
    }

    fn base_mut(&mut self) -> &mut QueryRepository<D> {
        self
    }
}
