use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::TryStreamExt;
use tiberius::{ColumnData, FromSql, QueryItem, TokenRow};

use super::config::MssqlClient;
use super::driver::MssqlDriverError;
use super::params::{SqlType, bind_query_params, to_column_data};
use crate::driver::{Parameter, Table};
use crate::results::{QueryResult, ResultSet};
use crate::types::RowValues;

/// Run `command` and collect every recordset it produces.
///
/// A recordset starts at each metadata token, so a `SELECT` returning no rows
/// still yields an empty recordset with its column names.
pub async fn query_recordsets(
    client: &mut MssqlClient,
    command: &str,
    parameters: &[Parameter<SqlType>],
) -> Result<QueryResult, MssqlDriverError> {
    let mut stream = bind_query_params(command, parameters)?.query(client).await?;

    let mut recordsets: Vec<ResultSet> = Vec::new();
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(metadata) => {
                let column_names: Vec<String> = metadata
                    .columns()
                    .iter()
                    .map(|col| col.name().to_string())
                    .collect();
                let mut result_set = ResultSet::with_capacity(10);
                result_set.set_column_names(Arc::new(column_names));
                recordsets.push(result_set);
            }
            QueryItem::Row(row) => {
                let values = row
                    .into_iter()
                    .map(|data| row_value(&data))
                    .collect::<Result<Vec<_>, _>>()?;
                if let Some(result_set) = recordsets.last_mut() {
                    result_set.add_row_values(values);
                }
            }
        }
    }

    Ok(QueryResult { recordsets })
}

/// Run `command` for its side effects and sum the affected rows of every statement.
pub async fn execute_dml(
    client: &mut MssqlClient,
    command: &str,
    parameters: &[Parameter<SqlType>],
) -> Result<u64, MssqlDriverError> {
    let result = bind_query_params(command, parameters)?.execute(client).await?;
    Ok(result.rows_affected().iter().sum())
}

/// Bulk-load `table`. Every row is converted before the load starts, so a bad
/// value never leaves a half-sent batch behind.
pub async fn bulk_load(
    client: &mut MssqlClient,
    table: &Table<SqlType>,
) -> Result<u64, MssqlDriverError> {
    let mut rows = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let mut token_row = TokenRow::new();
        for ((_, sql_type), value) in table.columns.iter().zip(row) {
            token_row.push(to_column_data(*sql_type, value)?);
        }
        rows.push(token_row);
    }

    let mut request = client.bulk_insert(&table.name).await?;
    for row in rows {
        request.send(row).await?;
    }
    let result = request.finalize().await?;
    Ok(result.total())
}

fn from_sql<'a, T: FromSql<'a>>(data: &'a ColumnData<'static>) -> Result<Option<T>, MssqlDriverError> {
    Ok(T::from_sql(data)?)
}

/// Map one SQL Server column value onto [`RowValues`].
pub(crate) fn row_value(data: &ColumnData<'static>) -> Result<RowValues, MssqlDriverError> {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| RowValues::Int(i64::from(v))),
        ColumnData::I16(v) => v.map(|v| RowValues::Int(i64::from(v))),
        ColumnData::I32(v) => v.map(|v| RowValues::Int(i64::from(v))),
        ColumnData::I64(v) => v.map(RowValues::Int),
        ColumnData::F32(v) => v.map(|v| RowValues::Float(f64::from(v))),
        ColumnData::F64(v) => v.map(RowValues::Float),
        ColumnData::Bit(v) => v.map(RowValues::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| RowValues::Text(s.to_string())),
        ColumnData::Guid(v) => v.map(|g| RowValues::Text(g.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| RowValues::Blob(b.to_vec())),
        #[allow(clippy::cast_precision_loss)]
        ColumnData::Numeric(v) => v.as_ref().map(|n| {
            RowValues::Float(n.value() as f64 / 10f64.powi(i32::from(n.scale())))
        }),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|xml| RowValues::Text(xml.clone().into_owned().into_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            from_sql::<NaiveDateTime>(data)?.map(RowValues::Timestamp)
        }
        ColumnData::DateTimeOffset(_) => {
            from_sql::<DateTime<Utc>>(data)?.map(|dt| RowValues::Timestamp(dt.naive_utc()))
        }
        ColumnData::Date(_) => from_sql::<NaiveDate>(data)?
            .map(|d| RowValues::Timestamp(d.and_time(NaiveTime::MIN))),
        ColumnData::Time(_) => from_sql::<NaiveTime>(data)?.map(|t| RowValues::Text(t.to_string())),
        #[allow(unreachable_patterns)]
        _ => None,
    };
    Ok(value.unwrap_or(RowValues::Null))
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    #[test]
    fn integers_widen_to_int() {
        assert_eq!(row_value(&ColumnData::U8(Some(7))).unwrap(), RowValues::Int(7));
        assert_eq!(row_value(&ColumnData::I16(Some(-3))).unwrap(), RowValues::Int(-3));
        assert_eq!(
            row_value(&ColumnData::I64(Some(i64::MIN))).unwrap(),
            RowValues::Int(i64::MIN)
        );
    }

    #[test]
    fn nulls_of_any_type_map_to_null() {
        assert_eq!(row_value(&ColumnData::I32(None)).unwrap(), RowValues::Null);
        assert_eq!(row_value(&ColumnData::String(None)).unwrap(), RowValues::Null);
        assert_eq!(row_value(&ColumnData::DateTime2(None)).unwrap(), RowValues::Null);
    }

    #[test]
    fn text_and_bytes_are_copied() {
        assert_eq!(
            row_value(&ColumnData::String(Some(Cow::Borrowed("hello")))).unwrap(),
            RowValues::Text("hello".into())
        );
        assert_eq!(
            row_value(&ColumnData::Binary(Some(Cow::Owned(vec![1, 2])))).unwrap(),
            RowValues::Blob(vec![1, 2])
        );
    }

    #[test]
    fn datetime2_round_trips_through_chrono() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .and_then(|d| d.and_hms_milli_opt(13, 45, 10, 250))
            .unwrap();
        let data = to_column_data(SqlType::DateTime2, &RowValues::Timestamp(dt)).unwrap();
        assert_eq!(row_value(&data).unwrap(), RowValues::Timestamp(dt));
    }
}
