use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;

use bb8::PooledConnection;
use tokio::sync::{Mutex, MutexGuard};

use super::config::{MssqlClient, MssqlConnectionManager, MssqlPool};
use super::driver::{MssqlDriver, MssqlDriverError};
use crate::error::SqlRepositoryError;
use crate::execution::normalize;

type Slot = Option<PooledConnection<'static, MssqlConnectionManager>>;

/// A SQL Server transaction pinned to one pooled connection.
///
/// Clones share the connection, so a transaction can be handed to several
/// repositories at once; their requests run one at a time. Once
/// [`commit`](Self::commit) or [`rollback`](Self::rollback) succeeds every clone
/// is finished and further requests fail with
/// [`MssqlDriverError::TransactionFinished`].
///
/// Dropping the last clone without finishing returns the connection to the
/// pool with the transaction still open. Its locks are held until the pool
/// hands the connection out again, when the checkout test rolls the work back,
/// so finish the transaction explicitly.
#[derive(Clone)]
pub struct MssqlTransaction {
    connection: Arc<Mutex<Slot>>,
}

impl fmt::Debug for MssqlTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlTransaction")
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl MssqlTransaction {
    pub(crate) async fn begin(pool: &MssqlPool) -> Result<Self, MssqlDriverError> {
        let mut connection = pool.get_owned().await?;
        // A plain batch, not sp_executesql, so the open transaction outlives the statement.
        connection
            .simple_query("BEGIN TRANSACTION")
            .await?
            .into_results()
            .await?;
        tracing::debug!("SQL Server transaction started");
        Ok(Self {
            connection: Arc::new(Mutex::new(Some(connection))),
        })
    }

    /// Whether commit or rollback already ran. Reports `false` while a request holds the connection.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.connection
            .try_lock()
            .map(|slot| slot.is_none())
            .unwrap_or(false)
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Slot> {
        self.connection.lock().await
    }

    /// Commit and release the connection back to the pool.
    ///
    /// If the commit itself fails a rollback is attempted before the error is returned.
    ///
    /// # Errors
    ///
    /// The normalized driver error, or a normalized `TransactionFinished` if the
    /// transaction was already committed or rolled back.
    #[track_caller]
    pub fn commit(&self) -> impl Future<Output = Result<(), SqlRepositoryError>> + Send + '_ {
        let origin = Location::caller();
        async move {
            let mut connection = self.take().await.map_err(|e| normalize::<MssqlDriver>(e, origin))?;
            if let Err(error) = finish(&mut connection, "COMMIT TRANSACTION").await {
                if let Err(rollback_error) = finish(&mut connection, "ROLLBACK TRANSACTION").await {
                    tracing::warn!(%rollback_error, "rollback after failed commit also failed");
                }
                return Err(normalize::<MssqlDriver>(error, origin));
            }
            tracing::debug!("SQL Server transaction committed");
            Ok(())
        }
    }

    /// Roll back and release the connection back to the pool.
    ///
    /// # Errors
    ///
    /// Same as [`commit`](Self::commit).
    #[track_caller]
    pub fn rollback(&self) -> impl Future<Output = Result<(), SqlRepositoryError>> + Send + '_ {
        let origin = Location::caller();
        async move {
            let mut connection = self.take().await.map_err(|e| normalize::<MssqlDriver>(e, origin))?;
            finish(&mut connection, "ROLLBACK TRANSACTION")
                .await
                .map_err(|e| normalize::<MssqlDriver>(e, origin))?;
            tracing::debug!("SQL Server transaction rolled back");
            Ok(())
        }
    }

    async fn take(&self) -> Result<PooledConnection<'static, MssqlConnectionManager>, MssqlDriverError> {
        self.lock()
            .await
            .take()
            .ok_or(MssqlDriverError::TransactionFinished)
    }
}

async fn finish(client: &mut MssqlClient, statement: &str) -> Result<(), MssqlDriverError> {
    client.simple_query(statement).await?.into_results().await?;
    Ok(())
}
