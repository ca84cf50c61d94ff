use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use nlsql_driver::Error::UnsupportedColumnType;
use nlsql_driver::{Result, Row, Value};
use sqlx::mysql::{MySqlColumn, MySqlRow};
use sqlx::{Column, Decode, MySql, Row as _, Type, TypeInfo};

/// Convert every row up front so an undecodable column fails the query instead of
/// ending the rows early.
pub(crate) fn convert_rows(rows: &[MySqlRow]) -> Result<Vec<Row>> {
    rows.iter().map(convert_row).collect()
}

fn convert_row(row: &MySqlRow) -> Result<Row> {
    row.columns()
        .iter()
        .map(|column| convert_to_value(row, column))
        .collect()
}

/// Decode the column as `T`, or `None` when the column type is not compatible.
fn decode<'r, T>(row: &'r MySqlRow, index: usize) -> Option<Option<T>>
where
    T: Decode<'r, MySql> + Type<MySql>,
{
    row.try_get::<Option<T>, usize>(index).ok()
}

fn convert_to_value(row: &MySqlRow, column: &MySqlColumn) -> Result<Value> {
    let index = column.ordinal();

    let value = if let Some(value) = decode::<String>(row, index) {
        value.map(Value::String)
    } else if let Some(value) = decode::<Vec<u8>>(row, index) {
        value.map(Value::Bytes)
    } else if let Some(value) = decode::<i16>(row, index) {
        value.map(Value::I16)
    } else if let Some(value) = decode::<i32>(row, index) {
        value.map(Value::I32)
    } else if let Some(value) = decode::<i64>(row, index) {
        value.map(Value::I64)
    } else if let Some(value) = decode::<u64>(row, index) {
        value.map(Value::U64)
    } else if let Some(value) = decode::<f32>(row, index) {
        value.map(Value::F32)
    } else if let Some(value) = decode::<f64>(row, index) {
        value.map(Value::F64)
    } else if let Some(value) = decode::<rust_decimal::Decimal>(row, index) {
        value.map(Value::Decimal)
    } else if let Some(value) = decode::<bool>(row, index) {
        value.map(Value::Bool)
    } else if let Some(value) = decode::<NaiveDate>(row, index) {
        value.map(Value::Date)
    } else if let Some(value) = decode::<NaiveTime>(row, index) {
        value.map(Value::Time)
    } else if let Some(value) = decode::<NaiveDateTime>(row, index) {
        value.map(Value::DateTime)
    } else if let Some(value) = decode::<DateTime<Utc>>(row, index) {
        value.map(|date_time| Value::DateTime(date_time.naive_utc()))
    } else if let Some(value) = decode::<serde_json::Value>(row, index) {
        value.map(Value::from)
    } else {
        return Err(UnsupportedColumnType {
            column_name: column.name().to_string(),
            column_type: column.type_info().name().to_string(),
        });
    };

    Ok(value.unwrap_or(Value::Null))
}
