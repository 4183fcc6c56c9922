use async_trait::async_trait;
use bb8::RunError;
use thiserror::Error;

use super::config::{MssqlClient, MssqlOptions, MssqlPool, build_pool};
use super::params::SqlType;
use super::query::{bulk_load, execute_dml, query_recordsets};
use super::transaction::MssqlTransaction;
use crate::driver::{Driver, ErrorClass, Parameter, Table, Target};
use crate::results::QueryResult;

/// Errors raised by the SQL Server driver before normalization.
#[derive(Debug, Error)]
pub enum MssqlDriverError {
    #[error("{0}")]
    Tiberius(#[from] tiberius::error::Error),

    #[error("{0}")]
    Manager(#[from] bb8_tiberius::Error),

    #[error("{0}")]
    Pool(#[from] RunError<bb8_tiberius::Error>),

    #[error("Transaction has already been committed or rolled back")]
    TransactionFinished,

    #[error("Parameter conversion error: {0}")]
    Parameter(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// tiberius behind a bb8 pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDriver;

/// Check out a client for `$target` and evaluate `$body` with it bound to `$client`.
macro_rules! with_client {
    ($target:expr, |$client:ident| $body:expr) => {
        match $target {
            Target::Pool(pool) => {
                let mut connection = pool.get().await?;
                let $client: &mut MssqlClient = &mut connection;
                $body
            }
            Target::Transaction(tx) => {
                let mut slot = tx.lock().await;
                let $client: &mut MssqlClient = slot
                    .as_mut()
                    .ok_or(MssqlDriverError::TransactionFinished)?;
                $body
            }
        }
    };
}

#[async_trait]
impl Driver for MssqlDriver {
    type Config = MssqlOptions;
    type Pool = MssqlPool;
    type Transaction = MssqlTransaction;
    type SqlType = SqlType;
    type Error = MssqlDriverError;

    async fn connect(config: MssqlOptions) -> Result<MssqlPool, MssqlDriverError> {
        build_pool(&config).await
    }

    async fn close(pool: MssqlPool) -> Result<(), MssqlDriverError> {
        // bb8 0.8 has no explicit close. Idle connections go with the last pool
        // handle; clones held elsewhere (an open `MssqlTransaction` among them)
        // keep theirs until they are dropped.
        let state = pool.state();
        drop(pool);
        tracing::info!(
            connections = state.connections,
            idle = state.idle_connections,
            "SQL Server pool released"
        );
        Ok(())
    }

    async fn begin_transaction(pool: &MssqlPool) -> Result<MssqlTransaction, MssqlDriverError> {
        MssqlTransaction::begin(pool).await
    }

    async fn query(
        target: &Target<Self>,
        command: &str,
        parameters: &[Parameter<SqlType>],
    ) -> Result<QueryResult, MssqlDriverError> {
        with_client!(target, |client| query_recordsets(client, command, parameters).await)
    }

    async fn execute(
        target: &Target<Self>,
        command: &str,
        parameters: &[Parameter<SqlType>],
    ) -> Result<u64, MssqlDriverError> {
        with_client!(target, |client| execute_dml(client, command, parameters).await)
    }

    async fn bulk(target: &Target<Self>, table: &Table<SqlType>) -> Result<u64, MssqlDriverError> {
        with_client!(target, |client| bulk_load(client, table).await)
    }

    /// Anything the server or the wire protocol reported is native; local
    /// conversion, configuration and pool checkout timeouts are not.
    fn classify(error: MssqlDriverError) -> ErrorClass<MssqlDriverError> {
        match error {
            MssqlDriverError::Tiberius(_)
            | MssqlDriverError::Manager(_)
            | MssqlDriverError::Pool(RunError::User(_))
            | MssqlDriverError::TransactionFinished => ErrorClass::Native(native_message(&error)),
            other @ (MssqlDriverError::Pool(RunError::TimedOut)
            | MssqlDriverError::Parameter(_)
            | MssqlDriverError::Config(_)) => ErrorClass::Other(other),
        }
    }
}

/// The message text the server or driver reported, without tiberius's
/// `Display` decoration (`Token error: '...' on server ...`).
fn native_message(error: &MssqlDriverError) -> String {
    match error {
        MssqlDriverError::Tiberius(inner)
        | MssqlDriverError::Manager(bb8_tiberius::Error::Tiberius(inner))
        | MssqlDriverError::Pool(RunError::User(bb8_tiberius::Error::Tiberius(inner))) => {
            tiberius_message(inner)
        }
        other => other.to_string(),
    }
}

fn tiberius_message(error: &tiberius::error::Error) -> String {
    use tiberius::error::Error;

    match error {
        Error::Server(token) => token.message().to_string(),
        Error::Io { message, .. } | Error::Tls(message) => message.clone(),
        Error::Protocol(message)
        | Error::Encoding(message)
        | Error::Conversion(message)
        | Error::BulkInput(message) => message.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(error: MssqlDriverError) -> String {
        match MssqlDriver::classify(error) {
            ErrorClass::Native(native) => native,
            ErrorClass::Other(other) => panic!("expected native, got {other:?}"),
        }
    }

    #[test]
    fn native_errors_carry_the_bare_driver_message() {
        let error = MssqlDriverError::Tiberius(tiberius::error::Error::Protocol(
            "unexpected token".into(),
        ));
        assert_eq!(error.to_string(), "Protocol error: unexpected token");
        assert_eq!(native(error), "unexpected token");
    }

    #[test]
    fn wrapped_manager_errors_are_unwrapped() {
        let inner = || tiberius::error::Error::Conversion("cannot read varchar as int".into());
        assert_eq!(
            native(MssqlDriverError::Manager(bb8_tiberius::Error::Tiberius(inner()))),
            "cannot read varchar as int"
        );
        assert_eq!(
            native(MssqlDriverError::Pool(RunError::User(
                bb8_tiberius::Error::Tiberius(inner())
            ))),
            "cannot read varchar as int"
        );
    }

    #[test]
    fn finished_transaction_is_native() {
        assert!(matches!(
            MssqlDriver::classify(MssqlDriverError::TransactionFinished),
            ErrorClass::Native(m) if m == "Transaction has already been committed or rolled back"
        ));
    }

    #[test]
    fn local_failures_pass_through() {
        assert!(matches!(
            MssqlDriver::classify(MssqlDriverError::Parameter("bad".into())),
            ErrorClass::Other(MssqlDriverError::Parameter(_))
        ));
        assert!(matches!(
            MssqlDriver::classify(MssqlDriverError::Pool(RunError::TimedOut)),
            ErrorClass::Other(MssqlDriverError::Pool(RunError::TimedOut))
        ));
    }
}
