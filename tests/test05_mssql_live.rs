#![cfg(feature = "mssql")]

use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sql_repository::mssql::{MssqlRequest, MssqlState};
use sql_repository::TracingSlowQueryLog;
use sql_repository::prelude::*;

// Runs only when TESTING_MSSQL_SERVER is set, e.g. against a local
// mcr.microsoft.com/mssql/server container.
fn options() -> Option<MssqlOptions> {
    let server = env::var("TESTING_MSSQL_SERVER").ok()?;
    let port = env::var("TESTING_MSSQL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(1433);
    Some(
        MssqlOptions::builder(
            server,
            env::var("TESTING_MSSQL_DATABASE").unwrap_or_else(|_| "master".into()),
            env::var("TESTING_MSSQL_USER").unwrap_or_else(|_| "sa".into()),
            env::var("TESTING_MSSQL_PASSWORD").unwrap_or_default(),
        )
        .port(port)
        .trust_cert(true)
        .max_pool_size(4)
        .finish(),
    )
}

struct NumbersRepository {
    base: MssqlRepository,
}

impl Repository for NumbersRepository {
    type Driver = MssqlDriver;

    fn from_base(base: MssqlRepository) -> Self {
        Self { base }
    }

    fn base(&self) -> &MssqlRepository {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MssqlRepository {
        &mut self.base
    }
}

impl NumbersRepository {
    async fn create(&self) -> Result<u64, SqlRepositoryError> {
        self.request()?
            .execute(
                "IF OBJECT_ID('dbo.repo_numbers') IS NOT NULL DROP TABLE dbo.repo_numbers; \
                 CREATE TABLE dbo.repo_numbers (id INT NOT NULL PRIMARY KEY, label NVARCHAR(50) NULL)",
            )
            .await
    }

    async fn labels(&self, ids: &[i64]) -> Result<Vec<String>, SqlRepositoryError> {
        let mut request = self.request()?;
        let ids = request.parametrize_in_clause("id", SqlType::Int, ids.iter().copied())?;
        let result = request
            .query(&format!(
                "SELECT label FROM dbo.repo_numbers WHERE id IN ({ids}) ORDER BY id"
            ))
            .await?;
        Ok(result
            .rows()
            .iter()
            .filter_map(|row| row.get("label").and_then(RowValues::as_text).map(str::to_string))
            .collect())
    }
}

async fn connect(state: &MssqlState, logger: SlowQueryLogger) -> bool {
    let Some(options) = options() else {
        eprintln!("TESTING_MSSQL_SERVER not set; skipping");
        return false;
    };
    state
        .connect(ConnectConfig::new(options).with_slow_query_logger(logger))
        .await
        .unwrap();
    true
}

#[tokio::test]
async fn repository_round_trip() {
    let state = Arc::new(MssqlState::new());
    let slow = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&slow);
    let logger = SlowQueryLogger::new(Duration::from_secs(30), move |_: SlowQueryError, _: Duration| {
        *counter.lock().unwrap() += 1;
    });
    if !connect(&state, logger).await {
        return;
    }

    let repo: NumbersRepository = state.repository(None);
    repo.create().await.unwrap();

    let mut table = MssqlTable::new("dbo.repo_numbers")
        .column("id", SqlType::Int)
        .column("label", SqlType::NVarChar(Some(50)));
    for (id, label) in [(1, "one"), (2, "two"), (3, "three")] {
        table.add_row(vec![RowValues::Int(id), RowValues::Text(label.into())]);
    }
    let inserted = repo.request().unwrap().bulk(&table).await.unwrap();
    assert_eq!(inserted, 3);

    assert_eq!(repo.labels(&[3, 1]).await.unwrap(), vec!["one", "three"]);

    // A WAITFOR longer than a 1ms call-level threshold must be reported.
    let request: MssqlRequest = repo
        .request_with(RequestOptions::new().slow_query_max_execution_time(Duration::from_millis(1)))
        .unwrap();
    request.execute("WAITFOR DELAY '00:00:00.050'").await.unwrap();
    assert_eq!(*slow.lock().unwrap(), 1);

    state.close().await.unwrap();
}

#[tokio::test]
async fn transaction_rollback_discards_writes() {
    let state = Arc::new(MssqlState::new());
    if !connect(&state, SlowQueryLogger::new(Duration::from_secs(30), TracingSlowQueryLog)).await {
        return;
    }
    let repo: NumbersRepository = state.repository(None);
    repo.create().await.unwrap();

    let tx = state.begin_transaction().await.unwrap();
    let scoped = repo.use_transaction(tx.clone());
    let mut request = scoped.request().unwrap();
    request
        .input("id", SqlType::Int, 10i64)
        .input("label", SqlType::NVarChar(Some(50)), "ten");
    let affected = request
        .execute("INSERT INTO dbo.repo_numbers (id, label) VALUES (@id, @label)")
        .await
        .unwrap();
    assert_eq!(affected, 1);

    tx.rollback().await.unwrap();
    assert!(tx.is_finished());
    assert!(repo.labels(&[10]).await.unwrap().is_empty());

    let err = scoped.request().unwrap().execute("SELECT 1").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Transaction has already been committed or rolled back"
    );

    state.close().await.unwrap();
}

#[tokio::test]
async fn server_errors_are_normalized() {
    let state = Arc::new(MssqlState::new());
    if !connect(&state, SlowQueryLogger::new(Duration::from_secs(30), TracingSlowQueryLog)).await {
        return;
    }
    let err = state
        .request(RequestOptions::new())
        .unwrap()
        .query("SELECT * FROM dbo.table_that_does_not_exist")
        .await
        .unwrap_err();
    assert!(err.is_database());
    assert_eq!(
        err.to_string(),
        "Invalid object name 'dbo.table_that_does_not_exist'."
    );

    state.close().await.unwrap();
}

#[tokio::test]
async fn abandoned_transaction_is_rolled_back_on_reuse() {
    let Some(mut options) = options() else {
        eprintln!("TESTING_MSSQL_SERVER not set; skipping");
        return;
    };
    // One connection, so the next request gets the one the transaction held.
    options.max_pool_size = 1;
    let state = Arc::new(MssqlState::new());
    state.connect(options).await.unwrap();
    let repo: NumbersRepository = state.repository(None);
    repo.create().await.unwrap();

    let tx = state.begin_transaction().await.unwrap();
    let mut request = repo.use_transaction(tx.clone()).request().unwrap();
    request
        .input("id", SqlType::Int, 20i64)
        .input("label", SqlType::NVarChar(Some(50)), "twenty");
    request
        .execute("INSERT INTO dbo.repo_numbers (id, label) VALUES (@id, @label)")
        .await
        .unwrap();
    drop(tx);

    let result = state
        .request(RequestOptions::new())
        .unwrap()
        .query("SELECT @@TRANCOUNT AS open_transactions")
        .await
        .unwrap();
    assert_eq!(
        result.rows()[0].get("open_transactions"),
        Some(&RowValues::Int(0))
    );
    assert!(repo.labels(&[20]).await.unwrap().is_empty());

    state.close().await.unwrap();
}
