//! In-memory driver for exercising repositories without a database.
//!
//! [`FakeDriver`] records every call it receives and takes its behavior from
//! the command text:
//!
//! * `SLEEP <ms> ...` waits `<ms>` milliseconds (tokio time, so a paused clock works),
//! * `FAIL NATIVE <message>` fails with a native driver error,
//! * `FAIL IO <message>` fails with a non-native error,
//! * anything else succeeds with a one-column recordset echoing the command.
//!
//! Directives can be chained: `SLEEP 80 FAIL NATIVE timeout`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::driver::{Driver, ErrorClass, Parameter, Table, Target};
use crate::results::{QueryResult, ResultSet};
use crate::types::RowValues;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FakeError {
    #[error("{0}")]
    Native(String),
    #[error("io: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeType {
    Int,
    Text,
}

#[derive(Debug, Clone, Default)]
pub struct FakeConfig {
    /// Make `connect` fail with this native error message.
    pub fail_connect: Option<String>,
}

/// Which target a recorded call ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeTarget {
    Pool,
    Transaction(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub target: FakeTarget,
    pub command: String,
    pub parameters: Vec<Parameter<FakeType>>,
}

type CallLog = Arc<Mutex<Vec<RecordedCall>>>;

#[derive(Debug, Clone, Default)]
pub struct FakePool {
    calls: CallLog,
    closed: Arc<AtomicBool>,
    next_transaction: Arc<AtomicU64>,
}

impl FakePool {
    /// Every call made through this pool or its transactions, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct FakeTransaction {
    pub id: u64,
    calls: CallLog,
}

impl PartialEq for FakeTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl FakeTransaction {
    /// A transaction not tied to any pool, with its own call log.
    #[must_use]
    pub fn detached(id: u64) -> Self {
        Self {
            id,
            calls: CallLog::default(),
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FakeDriver;

impl FakeDriver {
    fn record(
        target: &Target<Self>,
        command: &str,
        parameters: &[Parameter<FakeType>],
    ) {
        let (calls, target) = match target {
            Target::Pool(pool) => (&pool.calls, FakeTarget::Pool),
            Target::Transaction(tx) => (&tx.calls, FakeTarget::Transaction(tx.id)),
        };
        if let Ok(mut calls) = calls.lock() {
            calls.push(RecordedCall {
                target,
                command: command.to_string(),
                parameters: parameters.to_vec(),
            });
        }
    }

    async fn act(command: &str) -> Result<(), FakeError> {
        let mut words = command.split_whitespace();
        while let Some(word) = words.next() {
            match word {
                "SLEEP" => {
                    let ms = words.next().and_then(|w| w.parse().ok()).unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                "FAIL" => {
                    let kind = words.next().unwrap_or_default();
                    let message = words.by_ref().collect::<Vec<_>>().join(" ");
                    return Err(match kind {
                        "IO" => FakeError::Io(message),
                        _ => FakeError::Native(message),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for FakeDriver {
    type Config = FakeConfig;
    type Pool = FakePool;
    type Transaction = FakeTransaction;
    type SqlType = FakeType;
    type Error = FakeError;

    async fn connect(config: FakeConfig) -> Result<FakePool, FakeError> {
        match config.fail_connect {
            Some(message) => Err(FakeError::Native(message)),
            None => Ok(FakePool::default()),
        }
    }

    async fn close(pool: FakePool) -> Result<(), FakeError> {
        pool.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn begin_transaction(pool: &FakePool) -> Result<FakeTransaction, FakeError> {
        if pool.is_closed() {
            return Err(FakeError::Native("pool is closed".into()));
        }
        Ok(FakeTransaction {
            id: pool.next_transaction.fetch_add(1, Ordering::SeqCst) + 1,
            calls: Arc::clone(&pool.calls),
        })
    }

    async fn query(
        target: &Target<Self>,
        command: &str,
        parameters: &[Parameter<FakeType>],
    ) -> Result<QueryResult, FakeError> {
        Self::record(target, command, parameters);
        Self::act(command).await?;

        let mut recordset = ResultSet::with_capacity(1);
        recordset.set_column_names(Arc::new(vec!["command".to_string()]));
        recordset.add_row_values(vec![RowValues::Text(command.to_string())]);
        Ok(QueryResult {
            recordsets: vec![recordset],
        })
    }

    async fn execute(
        target: &Target<Self>,
        command: &str,
        parameters: &[Parameter<FakeType>],
    ) -> Result<u64, FakeError> {
        Self::record(target, command, parameters);
        Self::act(command).await?;
        Ok(parameters.len() as u64)
    }

    async fn bulk(target: &Target<Self>, table: &Table<FakeType>) -> Result<u64, FakeError> {
        let command = format!("BULK {}", table.name);
        Self::record(target, &command, &[]);
        Self::act(&table.name).await?;
        Ok(table.rows.len() as u64)
    }

    fn classify(error: FakeError) -> ErrorClass<FakeError> {
        match error {
            FakeError::Native(message) => ErrorClass::Native(message),
            other @ FakeError::Io(_) => ErrorClass::Other(other),
        }
    }
}
