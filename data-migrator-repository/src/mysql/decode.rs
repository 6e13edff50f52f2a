//! Conversion between `sqlx` MySQL rows and dynamic [`Value`]s.
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use data_migrator_shared::{Row, Value};
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, Row as _, TypeInfo};

use crate::errors::RepositoryError;

pub(crate) type MySqlQuery<'q> = Query<'q, MySql, MySqlArguments>;

pub(crate) fn bind_value<'q>(query: MySqlQuery<'q>, value: &Value) -> MySqlQuery<'q> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::UInt(u) => query.bind(*u),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Timestamp(t) => query.bind(*t),
        Value::Bytes(b) => query.bind(b.clone()),
    }
}

pub(crate) fn bind_all<'q>(sql: &'q str, params: &[Value]) -> MySqlQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

fn decode_column(row: &MySqlRow, index: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let upper = type_name.to_ascii_uppercase();
    let value: Value = match upper.as_str() {
        "BOOLEAN" => row.try_get::<Option<bool>, _>(index)?.into(),
        name if name.ends_with("UNSIGNED") => row.try_get::<Option<u64>, _>(index)?.into(),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            row.try_get::<Option<i64>, _>(index)?.into()
        }
        "FLOAT" => row
            .try_get::<Option<f32>, _>(index)?
            .map(f64::from)
            .into(),
        "DOUBLE" => row.try_get::<Option<f64>, _>(index)?.into(),
        "DECIMAL" => row
            .try_get::<Option<BigDecimal>, _>(index)?
            .map(|d| d.to_string())
            .into(),
        "DATETIME" | "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(index)?.into(),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)?
            .map(|d| d.format("%Y-%m-%d").to_string())
            .into(),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(index)?
            .map(|t| t.format("%H:%M:%S").to_string())
            .into(),
        "JSON" => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(|j| j.to_string())
            .into(),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
            match row.try_get::<Option<Vec<u8>>, _>(index)? {
                Some(bytes) => Value::Bytes(bytes),
                None => Value::Null,
            }
        }
        _ => row.try_get::<Option<String>, _>(index)?.into(),
    };
    Ok(value)
}

/// Decodes every column of a result row by its reported type.
pub(crate) fn decode_row(row: &MySqlRow) -> Result<Row, RepositoryError> {
    let mut decoded = Row::new();
    for column in row.columns() {
        let type_name = column.type_info().name();
        let value = decode_column(row, column.ordinal(), type_name).map_err(|e| {
            RepositoryError::decode(format!(
                "column `{}` of type {}: {}",
                column.name(),
                type_name,
                e
            ))
        })?;
        decoded.insert(column.name().to_string(), value);
    }
    Ok(decoded)
}

/// First column of a decoded row.
pub(crate) fn first_column(row: &MySqlRow) -> Result<Value, RepositoryError> {
    let column = row
        .columns()
        .first()
        .ok_or_else(|| RepositoryError::decode("statement returned no columns"))?;
    decode_column(row, column.ordinal(), column.type_info().name())
        .map_err(|e| RepositoryError::decode(e.to_string()))
}
