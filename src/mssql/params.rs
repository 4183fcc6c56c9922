use std::borrow::Cow;
use std::fmt::Write;

use tiberius::{ColumnData, IntoSql, Query};

use super::driver::MssqlDriverError;
use crate::driver::Parameter;
use crate::request::is_parameter_name;
use crate::types::RowValues;

/// SQL Server column types accepted for parameters and bulk-load columns.
///
/// Length `None` means `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Bit,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Real,
    NVarChar(Option<u16>),
    VarChar(Option<u16>),
    VarBinary(Option<u16>),
    DateTime2,
    UniqueIdentifier,
    /// JSON text, stored as `nvarchar(max)`.
    Json,
}

impl SqlType {
    /// Type as written in a T-SQL declaration.
    #[must_use]
    pub fn declaration(&self) -> Cow<'static, str> {
        fn sized(name: &str, len: Option<u16>) -> Cow<'static, str> {
            match len {
                Some(len) => Cow::Owned(format!("{name}({len})")),
                None => Cow::Owned(format!("{name}(max)")),
            }
        }

        match self {
            SqlType::Bit => "bit".into(),
            SqlType::TinyInt => "tinyint".into(),
            SqlType::SmallInt => "smallint".into(),
            SqlType::Int => "int".into(),
            SqlType::BigInt => "bigint".into(),
            SqlType::Float => "float".into(),
            SqlType::Real => "real".into(),
            SqlType::NVarChar(len) => sized("nvarchar", *len),
            SqlType::VarChar(len) => sized("varchar", *len),
            SqlType::VarBinary(len) => sized("varbinary", *len),
            SqlType::DateTime2 => "datetime2".into(),
            SqlType::UniqueIdentifier => "uniqueidentifier".into(),
            SqlType::Json => "nvarchar(max)".into(),
        }
    }

    fn null(self) -> ColumnData<'static> {
        match self {
            SqlType::Bit => ColumnData::Bit(None),
            SqlType::TinyInt => ColumnData::U8(None),
            SqlType::SmallInt => ColumnData::I16(None),
            SqlType::Int => ColumnData::I32(None),
            SqlType::BigInt => ColumnData::I64(None),
            SqlType::Float => ColumnData::F64(None),
            SqlType::Real => ColumnData::F32(None),
            SqlType::VarBinary(_) => ColumnData::Binary(None),
            SqlType::DateTime2 => ColumnData::DateTime2(None),
            SqlType::NVarChar(_) | SqlType::VarChar(_) | SqlType::UniqueIdentifier | SqlType::Json => {
                ColumnData::String(None)
            }
        }
    }
}

/// Owned column value that can be bound to a tiberius `Query`.
pub(crate) struct Bound(ColumnData<'static>);

impl<'a> IntoSql<'a> for Bound {
    fn into_sql(self) -> ColumnData<'a> {
        self.0
    }
}

fn out_of_range(value: i64, sql_type: SqlType) -> MssqlDriverError {
    MssqlDriverError::Parameter(format!("{value} does not fit in {}", sql_type.declaration()))
}

/// Convert `value` into the wire representation of `sql_type`.
///
/// # Errors
///
/// Returns `MssqlDriverError::Parameter` when the value cannot be represented as `sql_type`.
pub fn to_column_data(
    sql_type: SqlType,
    value: &RowValues,
) -> Result<ColumnData<'static>, MssqlDriverError> {
    let data = match (sql_type, value) {
        (_, RowValues::Null) => sql_type.null(),
        (SqlType::Bit, RowValues::Bool(b)) => (*b).into_sql(),
        (SqlType::Bit, RowValues::Int(i)) => (*i != 0).into_sql(),
        (SqlType::TinyInt, RowValues::Int(i)) => u8::try_from(*i)
            .map_err(|_| out_of_range(*i, sql_type))?
            .into_sql(),
        (SqlType::SmallInt, RowValues::Int(i)) => i16::try_from(*i)
            .map_err(|_| out_of_range(*i, sql_type))?
            .into_sql(),
        (SqlType::Int, RowValues::Int(i)) => i32::try_from(*i)
            .map_err(|_| out_of_range(*i, sql_type))?
            .into_sql(),
        (SqlType::BigInt, RowValues::Int(i)) => (*i).into_sql(),
        (SqlType::Float, RowValues::Float(f)) => (*f).into_sql(),
        #[allow(clippy::cast_precision_loss)]
        (SqlType::Float, RowValues::Int(i)) => (*i as f64).into_sql(),
        #[allow(clippy::cast_possible_truncation)]
        (SqlType::Real, RowValues::Float(f)) => (*f as f32).into_sql(),
        (
            SqlType::NVarChar(_) | SqlType::VarChar(_) | SqlType::UniqueIdentifier | SqlType::Json,
            RowValues::Text(s),
        ) => s.clone().into_sql(),
        (SqlType::NVarChar(_) | SqlType::Json, RowValues::JSON(json)) => json.to_string().into_sql(),
        (SqlType::VarBinary(_), RowValues::Blob(bytes)) => bytes.clone().into_sql(),
        (SqlType::DateTime2, RowValues::Timestamp(dt)) => (*dt).into_sql(),
        _ => {
            return Err(MssqlDriverError::Parameter(format!(
                "cannot convert {} value to {}",
                value.kind(),
                sql_type.declaration()
            )));
        }
    };
    Ok(data)
}

/// Wrap `command` so named parameters (`@name`) resolve through `sp_executesql`.
///
/// tiberius binds positionally as `@P1..@Pn`; the outer statement maps each
/// positional slot to its declared name. Without parameters the command is
/// returned unchanged.
///
/// # Errors
///
/// Returns `MssqlDriverError::Parameter` for a parameter name that is not a plain identifier.
pub fn named_parameter_command(
    command: &str,
    parameters: &[Parameter<SqlType>],
) -> Result<String, MssqlDriverError> {
    if parameters.is_empty() {
        return Ok(command.to_string());
    }
    if let Some(bad) = parameters.iter().find(|p| !is_parameter_name(&p.name)) {
        return Err(MssqlDriverError::Parameter(format!(
            "invalid parameter name: {:?}",
            bad.name
        )));
    }

    let mut declarations = String::new();
    let mut assignments = String::new();
    for (index, parameter) in parameters.iter().enumerate() {
        if index > 0 {
            declarations.push_str(", ");
            assignments.push_str(", ");
        }
        // Writing to a String cannot fail.
        let _ = write!(
            declarations,
            "@{} {}",
            parameter.name,
            parameter.sql_type.declaration()
        );
        let _ = write!(assignments, "@{} = @P{}", parameter.name, index + 1);
    }

    Ok(format!(
        "EXEC sp_executesql N'{}', N'{}', {}",
        command.replace('\'', "''"),
        declarations,
        assignments
    ))
}

/// Build a tiberius query for `command` with every parameter bound in order.
///
/// # Errors
///
/// Returns `MssqlDriverError::Parameter` if a name is invalid or a value does
/// not convert to its declared type.
pub fn bind_query_params(
    command: &str,
    parameters: &[Parameter<SqlType>],
) -> Result<Query<'static>, MssqlDriverError> {
    let sql = named_parameter_command(command, parameters)?;
    let mut query = Query::new(sql);
    for parameter in parameters {
        query.bind(Bound(to_column_data(parameter.sql_type, &parameter.value)?));
    }
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, sql_type: SqlType, value: RowValues) -> Parameter<SqlType> {
        Parameter {
            name: name.to_string(),
            sql_type,
            value,
        }
    }

    #[test]
    fn declarations_cover_sized_types() {
        assert_eq!(SqlType::NVarChar(Some(50)).declaration(), "nvarchar(50)");
        assert_eq!(SqlType::VarBinary(None).declaration(), "varbinary(max)");
        assert_eq!(SqlType::Json.declaration(), "nvarchar(max)");
        assert_eq!(SqlType::BigInt.declaration(), "bigint");
    }

    #[test]
    fn command_without_parameters_is_untouched() {
        let sql = named_parameter_command("SELECT 'x'", &[]).unwrap();
        assert_eq!(sql, "SELECT 'x'");
    }

    #[test]
    fn named_parameters_map_to_positional_slots() {
        let params = [
            param("id0", SqlType::Int, RowValues::Int(1)),
            param("name", SqlType::NVarChar(Some(20)), RowValues::Text("o'hara".into())),
        ];
        let sql = named_parameter_command(
            "SELECT * FROM users WHERE id IN (@id0) AND name <> 'x'",
            &params,
        )
        .unwrap();
        assert_eq!(
            sql,
            "EXEC sp_executesql N'SELECT * FROM users WHERE id IN (@id0) AND name <> ''x''', \
             N'@id0 int, @name nvarchar(20)', @id0 = @P1, @name = @P2"
        );
    }

    #[test]
    fn invalid_names_never_reach_the_sql() {
        let params = [param("x; DROP TABLE t", SqlType::Int, RowValues::Int(1))];
        assert!(matches!(
            named_parameter_command("SELECT 1", &params),
            Err(MssqlDriverError::Parameter(_))
        ));
    }

    #[test]
    fn integers_are_range_checked_per_type() {
        assert!(matches!(
            to_column_data(SqlType::TinyInt, &RowValues::Int(300)),
            Err(MssqlDriverError::Parameter(_))
        ));
        assert!(matches!(
            to_column_data(SqlType::Int, &RowValues::Int(7)),
            Ok(ColumnData::I32(Some(7)))
        ));
        assert!(matches!(
            to_column_data(SqlType::BigInt, &RowValues::Int(i64::MAX)),
            Ok(ColumnData::I64(Some(i64::MAX)))
        ));
    }

    #[test]
    fn nulls_keep_their_declared_type() {
        assert!(matches!(
            to_column_data(SqlType::SmallInt, &RowValues::Null),
            Ok(ColumnData::I16(None))
        ));
        assert!(matches!(
            to_column_data(SqlType::NVarChar(None), &RowValues::Null),
            Ok(ColumnData::String(None))
        ));
    }

    #[test]
    fn mismatched_values_are_rejected() {
        let err = to_column_data(SqlType::Bit, &RowValues::Text("yes".into())).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Parameter conversion error: cannot convert Text value to bit"
        );
    }

    #[test]
    fn bool_accepts_bit_integers() {
        assert!(matches!(
            to_column_data(SqlType::Bit, &RowValues::Int(1)),
            Ok(ColumnData::Bit(Some(true)))
        ));
    }
}
