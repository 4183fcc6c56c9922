//! Slow-query observation.
//!
//! A [`SlowQueryLogger`] pairs a threshold with a [`SlowQueryLog`] sink. When a
//! request carrying a logger takes longer than the threshold, the sink receives a
//! [`SlowQueryError`] pointing at the call site together with the elapsed time.
//! This happens whether the query succeeded or failed.

use std::fmt;
use std::panic::{AssertUnwindSafe, Location, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Report handed to a [`SlowQueryLog`] sink.
///
/// Converts into [`SqlRepositoryError::SlowQuery`](crate::SqlRepositoryError::SlowQuery)
/// for sinks that want to forward it through the crate's error type.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SlowQueryError {
    message: String,
    origin: &'static Location<'static>,
}

impl SlowQueryError {
    /// A report with the default "Slow query" message.
    #[must_use]
    pub fn new(origin: &'static Location<'static>) -> Self {
        Self::with_message("Slow query", origin)
    }

    #[must_use]
    pub fn with_message(message: impl Into<String>, origin: &'static Location<'static>) -> Self {
        Self {
            message: message.into(),
            origin,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Call site of the slow `query`/`bulk`/`execute`.
    #[must_use]
    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }
}

/// Sink for slow-query reports.
///
/// Any `Fn(SlowQueryError, Duration) + Send + Sync` closure is a sink.
pub trait SlowQueryLog: Send + Sync {
    fn log(&self, error: SlowQueryError, execution_time: Duration);
}

impl<F> SlowQueryLog for F
where
    F: Fn(SlowQueryError, Duration) + Send + Sync,
{
    fn log(&self, error: SlowQueryError, execution_time: Duration) {
        self(error, execution_time);
    }
}

/// Sink that emits a `tracing` warning per slow query.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSlowQueryLog;

impl SlowQueryLog for TracingSlowQueryLog {
    fn log(&self, error: SlowQueryError, execution_time: Duration) {
        tracing::warn!(
            origin = %error.origin(),
            execution_time_ms = execution_time.as_millis() as u64,
            "{}",
            error.message()
        );
    }
}

/// Threshold plus sink.
#[derive(Clone)]
pub struct SlowQueryLogger {
    pub max_execution_time: Duration,
    pub logger: Arc<dyn SlowQueryLog>,
}

impl fmt::Debug for SlowQueryLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlowQueryLogger")
            .field("max_execution_time", &self.max_execution_time)
            .field("logger", &"<SlowQueryLog>")
            .finish()
    }
}

impl SlowQueryLogger {
    #[must_use]
    pub fn new(max_execution_time: Duration, logger: impl SlowQueryLog + 'static) -> Self {
        Self {
            max_execution_time,
            logger: Arc::new(logger),
        }
    }

    /// Same sink, different threshold.
    #[must_use]
    pub fn with_max_execution_time(&self, max_execution_time: Duration) -> Self {
        Self {
            max_execution_time,
            logger: Arc::clone(&self.logger),
        }
    }

    /// Whether `execution_time` is over the threshold. Equal is not slow.
    #[must_use]
    pub fn is_slow(&self, execution_time: Duration) -> bool {
        execution_time > self.max_execution_time
    }

    /// Hand a report to the sink. A panicking sink is logged and swallowed so it
    /// never changes the outcome of the query being observed.
    pub(crate) fn report(&self, error: SlowQueryError, execution_time: Duration) {
        let origin = error.origin();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.logger.log(error, execution_time);
        }));
        if outcome.is_err() {
            tracing::error!(%origin, "slow query logger panicked; report dropped");
        }
    }
}
