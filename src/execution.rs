//! The decorator every request execution goes through: optional slow-query
//! timing, then driver error normalization.

use std::future::Future;
use std::panic::Location;

use tokio::time::Instant;

use crate::driver::{Driver, ErrorClass};
use crate::error::SqlRepositoryError;
use crate::slow_query::{SlowQueryError, SlowQueryLogger};

/// Which request operation is being decorated; used in log fields only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Query,
    Execute,
    Bulk,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Query => "query",
            Operation::Execute => "execute",
            Operation::Bulk => "bulk",
        }
    }
}

/// Await `call`, timing it when `slow_query_logger` is set, and normalize its error.
///
/// The logger fires at most once, after the call settles, whether it succeeded or
/// failed. `origin` is the caller's location and ends up in both the slow-query
/// report and the normalized error.
///
/// # Errors
///
/// Returns the normalized form of whatever error `call` produced.
pub async fn run<D, T, F>(
    operation: Operation,
    origin: &'static Location<'static>,
    slow_query_logger: Option<&SlowQueryLogger>,
    call: F,
) -> Result<T, SqlRepositoryError>
where
    D: Driver,
    F: Future<Output = Result<T, D::Error>>,
{
    let outcome = match slow_query_logger {
        Some(logger) => {
            let started = Instant::now();
            let outcome = call.await;
            let execution_time = started.elapsed();
            if logger.is_slow(execution_time) {
                tracing::debug!(
                    operation = operation.as_str(),
                    %origin,
                    execution_time_ms = execution_time.as_millis() as u64,
                    "slow query threshold exceeded"
                );
                logger.report(SlowQueryError::new(origin), execution_time);
            }
            outcome
        }
        None => call.await,
    };

    outcome.map_err(|error| normalize::<D>(error, origin))
}

/// Native driver errors become [`SqlRepositoryError::Database`] with the same
/// message; everything else is boxed unchanged.
#[must_use]
pub fn normalize<D: Driver>(
    error: D::Error,
    origin: &'static Location<'static>,
) -> SqlRepositoryError {
    match D::classify(error) {
        ErrorClass::Native(message) => SqlRepositoryError::Database { message, origin },
        ErrorClass::Other(error) => SqlRepositoryError::Driver(Box::new(error)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::test_utils::{FakeDriver, FakeError};

    fn recording_logger(
        max: Duration,
    ) -> (SlowQueryLogger, Arc<Mutex<Vec<(SlowQueryError, Duration)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let logger = SlowQueryLogger::new(max, move |err: SlowQueryError, d: Duration| {
            sink.lock().unwrap().push((err, d));
        });
        (logger, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn slow_success_is_reported_once() {
        let (logger, seen) = recording_logger(Duration::from_millis(50));
        let origin = Location::caller();
        let value = run::<FakeDriver, _, _>(Operation::Query, origin, Some(&logger), async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok::<_, FakeError>(7)
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].1 >= Duration::from_millis(50));
        assert_eq!(seen[0].0.origin(), origin);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_failure_is_reported_and_normalized() {
        let (logger, seen) = recording_logger(Duration::from_millis(10));
        let err = run::<FakeDriver, (), _>(Operation::Bulk, Location::caller(), Some(&logger), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err::<(), _>(FakeError::Native("deadlock victim".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(err.is_database());
        assert_eq!(err.to_string(), "deadlock victim");
    }

    #[tokio::test(start_paused = true)]
    async fn instant_call_at_zero_threshold_is_not_slow() {
        let (logger, seen) = recording_logger(Duration::ZERO);
        run::<FakeDriver, _, _>(Operation::Execute, Location::caller(), Some(&logger), async {
            Ok::<_, FakeError>(())
        })
        .await
        .unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_errors_pass_through_unchanged() {
        let err = run::<FakeDriver, (), _>(Operation::Query, Location::caller(), None, async {
            Err::<(), _>(FakeError::Io("connection reset".into()))
        })
        .await
        .unwrap_err();

        assert!(!err.is_database());
        assert_eq!(
            err.downcast_driver::<FakeError>(),
            Some(&FakeError::Io("connection reset".into()))
        );
    }
}
