//! Connection lifecycle: one pool and one slow-query logger per [`ConnectionState`].
//!
//! The state is an explicit value rather than a process global. Build one at
//! startup, `connect` it, and share it as `Arc<ConnectionState<D>>` with every
//! repository. Tests can run as many isolated states as they like.

use std::future::Future;
use std::panic::Location;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::driver::{Driver, Target};
use crate::error::SqlRepositoryError;
use crate::execution::normalize;
use crate::repository::{QueryRepository, Repository, RequestOptions};
use crate::request::Request;
use crate::slow_query::SlowQueryLogger;

/// Driver configuration plus the optional process-wide slow-query logger.
///
/// The logger is split off by [`ConnectionState::connect`] before the driver
/// sees the rest.
#[derive(Debug, Clone)]
pub struct ConnectConfig<C> {
    pub connection: C,
    pub slow_query_logger: Option<SlowQueryLogger>,
}

impl<C> ConnectConfig<C> {
    #[must_use]
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            slow_query_logger: None,
        }
    }

    #[must_use]
    pub fn with_slow_query_logger(mut self, slow_query_logger: SlowQueryLogger) -> Self {
        self.slow_query_logger = Some(slow_query_logger);
        self
    }

    pub fn into_parts(self) -> (C, Option<SlowQueryLogger>) {
        (self.connection, self.slow_query_logger)
    }
}

impl<C> From<C> for ConnectConfig<C> {
    fn from(connection: C) -> Self {
        Self::new(connection)
    }
}

/// Holds at most one pool and at most one slow-query logger.
///
/// Written by `connect`/`close`, read by everything else. `connect` and `close`
/// are not coordinated with each other; don't race them.
pub struct ConnectionState<D: Driver> {
    pool: RwLock<Option<D::Pool>>,
    slow_query_logger: RwLock<Option<SlowQueryLogger>>,
}

impl<D: Driver> Default for ConnectionState<D> {
    fn default() -> Self {
        Self {
            pool: RwLock::new(None),
            slow_query_logger: RwLock::new(None),
        }
    }
}

impl<D: Driver> std::fmt::Debug for ConnectionState<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("connected", &read(&self.pool).is_some())
            .field("slow_query_logger", &*read(&self.slow_query_logger))
            .finish()
    }
}

// Poisoning only means a writer panicked mid-swap of an Option; the value is still usable.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl<D: Driver> ConnectionState<D> {
    /// An unconnected state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconnected state already wrapped for sharing.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Open the pool and remember the slow-query logger, if the config carries one.
    ///
    /// Calling this again replaces the pool reference without closing the old one.
    ///
    /// # Errors
    ///
    /// Returns the normalized driver error if the pool cannot be created. The
    /// logger is only stored once the pool is up.
    #[track_caller]
    pub fn connect(
        &self,
        config: impl Into<ConnectConfig<D::Config>>,
    ) -> impl Future<Output = Result<(), SqlRepositoryError>> + Send + '_ {
        let origin = Location::caller();
        let (connection, slow_query_logger) = config.into().into_parts();
        async move {
            let pool = D::connect(connection)
                .await
                .map_err(|e| normalize::<D>(e, origin))?;

            if let Some(logger) = slow_query_logger {
                *write(&self.slow_query_logger) = Some(logger);
            }
            let replaced = write(&self.pool).replace(pool).is_some();
            tracing::info!(replaced, "database pool connected");
            Ok::<(), SqlRepositoryError>(())
        }
    }

    /// The active pool.
    ///
    /// # Errors
    ///
    /// Returns `SqlRepositoryError::NoConnection` before `connect` or after `close`.
    pub fn pool(&self) -> Result<D::Pool, SqlRepositoryError> {
        read(&self.pool)
            .clone()
            .ok_or(SqlRepositoryError::NoConnection)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        read(&self.pool).is_some()
    }

    /// Close the active pool. Afterwards [`pool`](Self::pool) reports `NoConnection`.
    ///
    /// Only the handle this state holds is given to the driver. Pool clones
    /// taken earlier, and transactions begun before the call, stay usable
    /// until they are dropped. On SQL Server, whose bb8 pool has no explicit
    /// close, their connections stay open for that long too.
    ///
    /// # Errors
    ///
    /// Returns `SqlRepositoryError::NoConnection` if nothing is connected, or the
    /// normalized driver error if closing fails.
    #[track_caller]
    pub fn close(&self) -> impl Future<Output = Result<(), SqlRepositoryError>> + Send + '_ {
        let origin = Location::caller();
        async move {
            let pool = write(&self.pool)
                .take()
                .ok_or(SqlRepositoryError::NoConnection)?;
            D::close(pool).await.map_err(|e| normalize::<D>(e, origin))?;
            tracing::info!("database pool closed");
            Ok::<(), SqlRepositoryError>(())
        }
    }

    /// The process-wide slow-query logger, if `connect` was given one.
    #[must_use]
    pub fn slow_query_logger(&self) -> Option<SlowQueryLogger> {
        read(&self.slow_query_logger).clone()
    }

    /// Begin a transaction on the pool. The caller owns its commit/rollback.
    ///
    /// # Errors
    ///
    /// Returns `SqlRepositoryError::NoConnection` without a pool, or the
    /// normalized driver error if the transaction cannot be started.
    #[track_caller]
    pub fn begin_transaction(
        &self,
    ) -> impl Future<Output = Result<D::Transaction, SqlRepositoryError>> + Send + '_ {
        let origin = Location::caller();
        async move {
            let pool = self.pool()?;
            D::begin_transaction(&pool)
                .await
                .map_err(|e| normalize::<D>(e, origin))
        }
    }

    /// A fresh request with no instance-level defaults.
    ///
    /// # Errors
    ///
    /// See [`ConnectionState::resolve_request`].
    pub fn request(&self, options: RequestOptions<D>) -> Result<Request<D>, SqlRepositoryError> {
        self.resolve_request(options, None, None)
    }

    /// Build a repository bound to this state, optionally bound to `transaction`.
    #[must_use]
    pub fn repository<R>(self: &Arc<Self>, transaction: Option<D::Transaction>) -> R
    where
        R: Repository<Driver = D>,
    {
        let mut base = QueryRepository::new(Arc::clone(self));
        if let Some(transaction) = transaction {
            base.set_transaction(transaction);
        }
        R::from_base(base)
    }

    /// Resolve the execution target and slow-query settings for one call.
    ///
    /// Transaction: `options.transaction` > `instance_transaction` > pool.
    /// Max execution time: `options` > `instance_max_execution_time` > the
    /// process-wide logger's own threshold.
    ///
    /// # Errors
    ///
    /// * `SqlRepositoryError::NoConnection` when no transaction applies and no pool exists.
    /// * `SqlRepositoryError::NoSlowQueryLogger` when a max execution time was
    ///   supplied but no process-wide logger is configured.
    pub fn resolve_request(
        &self,
        options: RequestOptions<D>,
        instance_transaction: Option<&D::Transaction>,
        instance_max_execution_time: Option<Duration>,
    ) -> Result<Request<D>, SqlRepositoryError> {
        let RequestOptions {
            transaction,
            slow_query_max_execution_time,
        } = options;

        let target = match transaction.or_else(|| instance_transaction.cloned()) {
            Some(tx) => Target::Transaction(tx),
            None => Target::Pool(self.pool()?),
        };

        let max_execution_time = slow_query_max_execution_time.or(instance_max_execution_time);
        let mut request = Request::new(target);
        match (self.slow_query_logger(), max_execution_time) {
            (Some(logger), Some(max)) => {
                request.set_slow_query_logger(logger.with_max_execution_time(max));
            }
            (Some(logger), None) => {
                request.set_slow_query_logger(logger);
            }
            (None, Some(_)) => return Err(SqlRepositoryError::NoSlowQueryLogger),
            (None, None) => {}
        }

        tracing::debug!(
            execution_target = ?request.target(),
            slow_query_max_execution_time_ms = request
                .slow_query_logger()
                .map(|l| l.max_execution_time.as_millis() as u64),
            "resolved request"
        );
        Ok(request)
    }
}
