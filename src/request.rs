use std::future::Future;
use std::panic::Location;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::driver::{Driver, Parameter, Table, Target};
use crate::error::SqlRepositoryError;
use crate::execution::{self, Operation};
use crate::results::QueryResult;
use crate::slow_query::SlowQueryLogger;
use crate::types::RowValues;

static PARAMETER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("parameter name pattern is valid")
});

/// Whether `name` is usable as an `@name` placeholder.
pub(crate) fn is_parameter_name(name: &str) -> bool {
    PARAMETER_NAME.is_match(name)
}

/// One call's worth of execution context: a target, bound parameters and an
/// optional slow-query logger.
///
/// `query`, `execute` and `bulk` consume the request, so bindings never leak
/// into a later call. Ask the repository for a new request per call.
pub struct Request<D: Driver> {
    target: Target<D>,
    parameters: Vec<Parameter<D::SqlType>>,
    slow_query_logger: Option<SlowQueryLogger>,
}

impl<D: Driver> std::fmt::Debug for Request<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("target", &self.target)
            .field("parameters", &self.parameters)
            .field("slow_query_logger", &self.slow_query_logger)
            .finish()
    }
}

impl<D: Driver> Request<D> {
    #[must_use]
    pub fn new(target: Target<D>) -> Self {
        Self {
            target,
            parameters: Vec::new(),
            slow_query_logger: None,
        }
    }

    #[must_use]
    pub fn target(&self) -> &Target<D> {
        &self.target
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter<D::SqlType>] {
        &self.parameters
    }

    /// Bind `value` as `@name`. Binding an existing name replaces the earlier value.
    pub fn input(
        &mut self,
        name: impl Into<String>,
        sql_type: D::SqlType,
        value: impl Into<RowValues>,
    ) -> &mut Self {
        let parameter = Parameter {
            name: name.into(),
            sql_type,
            value: value.into(),
        };
        match self.parameters.iter_mut().find(|p| p.name == parameter.name) {
            Some(existing) => *existing = parameter,
            None => self.parameters.push(parameter),
        }
        self
    }

    /// Bind each value as `{name}0`, `{name}1`, ... and return the matching
    /// placeholder list, e.g. `@id0,@id1,@id2`, for an `IN (...)` clause.
    ///
    /// An empty `values` binds nothing and returns an empty string.
    ///
    /// # Errors
    ///
    /// Returns `SqlRepositoryError::ParameterError` if `name` is not a plain SQL identifier.
    pub fn parametrize_in_clause<I>(
        &mut self,
        name: &str,
        sql_type: D::SqlType,
        values: I,
    ) -> Result<String, SqlRepositoryError>
    where
        I: IntoIterator,
        I::Item: Into<RowValues>,
    {
        if !is_parameter_name(name) {
            return Err(SqlRepositoryError::ParameterError(format!(
                "invalid parameter name for IN clause: {name:?}"
            )));
        }

        let placeholders: Vec<String> = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                let parameter = format!("{name}{index}");
                let placeholder = format!("@{parameter}");
                self.input(parameter, sql_type.clone(), value);
                placeholder
            })
            .collect();
        Ok(placeholders.join(","))
    }

    pub fn set_slow_query_logger(&mut self, slow_query_logger: SlowQueryLogger) -> &mut Self {
        self.slow_query_logger = Some(slow_query_logger);
        self
    }

    #[must_use]
    pub fn slow_query_logger(&self) -> Option<&SlowQueryLogger> {
        self.slow_query_logger.as_ref()
    }

    /// Keep the attached logger's sink but change its threshold.
    ///
    /// # Errors
    ///
    /// Returns `SqlRepositoryError::NoSlowQueryLogger` if no logger is attached.
    pub fn set_slow_query_max_execution_time(
        &mut self,
        max_execution_time: Duration,
    ) -> Result<&mut Self, SqlRepositoryError> {
        let logger = self
            .slow_query_logger
            .as_ref()
            .ok_or(SqlRepositoryError::NoSlowQueryLogger)?
            .with_max_execution_time(max_execution_time);
        Ok(self.set_slow_query_logger(logger))
    }

    /// Run `command` and materialize every recordset it returns.
    ///
    /// # Errors
    ///
    /// Returns `SqlRepositoryError::Database` for native driver errors (same
    /// message, origin at the caller), or the driver's other errors unchanged.
    #[track_caller]
    pub fn query<'a>(
        self,
        command: &'a str,
    ) -> impl Future<Output = Result<QueryResult, SqlRepositoryError>> + Send + 'a {
        let origin = Location::caller();
        async move {
            tracing::debug!(%origin, parameters = self.parameters.len(), "dispatching query");
            execution::run::<D, _, _>(
                Operation::Query,
                origin,
                self.slow_query_logger.as_ref(),
                D::query(&self.target, command, &self.parameters),
            )
            .await
        }
    }

    /// Run `command` for its side effects and return the affected row count.
    ///
    /// # Errors
    ///
    /// Same normalization as [`Request::query`].
    #[track_caller]
    pub fn execute<'a>(
        self,
        command: &'a str,
    ) -> impl Future<Output = Result<u64, SqlRepositoryError>> + Send + 'a {
        let origin = Location::caller();
        async move {
            tracing::debug!(%origin, parameters = self.parameters.len(), "dispatching execute");
            execution::run::<D, _, _>(
                Operation::Execute,
                origin,
                self.slow_query_logger.as_ref(),
                D::execute(&self.target, command, &self.parameters),
            )
            .await
        }
    }

    /// Bulk-load `table` and return the number of rows inserted.
    ///
    /// # Errors
    ///
    /// `SqlRepositoryError::ParameterError` if a row's width does not match the
    /// column list; otherwise the same normalization as [`Request::query`].
    #[track_caller]
    pub fn bulk<'a>(
        self,
        table: &'a Table<D::SqlType>,
    ) -> impl Future<Output = Result<u64, SqlRepositoryError>> + Send + 'a {
        let origin = Location::caller();
        async move {
            if let Some(row) = table.rows.iter().position(|r| r.len() != table.columns.len()) {
                return Err(SqlRepositoryError::ParameterError(format!(
                    "bulk row {row} for {} has {} values, expected {}",
                    table.name,
                    table.rows[row].len(),
                    table.columns.len()
                )));
            }
            tracing::debug!(%origin, table = %table.name, rows = table.rows.len(), "dispatching bulk");
            execution::run::<D, _, _>(
                Operation::Bulk,
                origin,
                self.slow_query_logger.as_ref(),
                D::bulk(&self.target, table),
            )
            .await
        }
    }
}
