use std::panic::Location;

use thiserror::Error;

use crate::slow_query::SlowQueryError;

/// Errors surfaced by repositories, requests and the connection state.
///
/// Driver failures recognized as native are normalized into
/// [`SqlRepositoryError::Database`] with the driver's message untouched; anything
/// else the driver reports travels through [`SqlRepositoryError::Driver`] as-is.
#[derive(Debug, Error)]
pub enum SqlRepositoryError {
    #[error("No database connection")]
    NoConnection,

    #[error("No database transaction")]
    NoTransaction,

    #[error("No slow query logger configured")]
    NoSlowQueryLogger,

    #[error("{message}")]
    Database {
        message: String,
        /// Call site of the `query`/`bulk`/`execute` call that failed.
        origin: &'static Location<'static>,
    },

    #[error(transparent)]
    SlowQuery(#[from] SlowQueryError),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error(transparent)]
    Driver(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl SqlRepositoryError {
    /// Whether this is a normalized native driver error.
    #[must_use]
    pub fn is_database(&self) -> bool {
        matches!(self, Self::Database { .. })
    }

    /// Where the failing call was made, for normalized driver errors and slow queries.
    #[must_use]
    pub fn origin(&self) -> Option<&'static Location<'static>> {
        match self {
            Self::Database { origin, .. } => Some(*origin),
            Self::SlowQuery(err) => Some(err.origin()),
            _ => None,
        }
    }

    /// Borrow the pass-through driver error as a concrete type.
    #[must_use]
    pub fn downcast_driver<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Driver(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("socket closed")]
    struct SocketClosed;

    #[test]
    fn database_error_displays_driver_message_verbatim() {
        let err = SqlRepositoryError::Database {
            message: "Invalid object name 'users'.".to_string(),
            origin: Location::caller(),
        };
        assert_eq!(err.to_string(), "Invalid object name 'users'.");
        assert!(err.is_database());
        assert!(err.origin().is_some());
    }

    #[test]
    fn driver_error_can_be_recovered() {
        let err = SqlRepositoryError::Driver(Box::new(SocketClosed));
        assert!(err.downcast_driver::<SocketClosed>().is_some());
        assert_eq!(err.to_string(), "socket closed");
        assert!(err.origin().is_none());
    }
}
