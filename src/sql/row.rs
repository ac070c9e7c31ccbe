//! Decode PostgreSQL rows into JSON records.

use crate::error::AdapterError;
use crate::schema::Record;
use crate::service::sanitize::to_iso;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};

/// Column name -> JSON value, in result-set order. Timestamps come back as
/// ISO-8601 UTC strings with millisecond precision.
pub fn row_to_record(row: &PgRow) -> Result<Record, AdapterError> {
    let mut map = Record::new();
    for (idx, col) in row.columns().iter().enumerate() {
        let v = cell_to_value(row, idx, col.type_info().name())?;
        map.insert(col.name().to_string(), v);
    }
    Ok(map)
}

fn cell_to_value(row: &PgRow, idx: usize, type_name: &str) -> Result<Value, AdapterError> {
    let v = match type_name {
        "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Value::from),
        "FLOAT4" => row.try_get::<Option<f32>, _>(idx)?.and_then(float4_to_value),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)?
            .and_then(Number::from_f64)
            .map(Value::Number),
        "NUMERIC" => row.try_get::<Option<Decimal>, _>(idx)?.map(decimal_to_value),
        "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(Value::Bool),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)?
            .map(|u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(|d| Value::String(to_iso(&d))),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(|d| Value::String(to_iso(&d.and_utc()))),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)?
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(idx)?
            .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string())),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx)?,
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(idx)?
            .map(|b| Value::String(format!("\\x{}", hex(&b)))),
        _ => match row.try_get::<Option<String>, _>(idx) {
            Ok(v) => v.map(Value::String),
            Err(e) => {
                tracing::warn!(column = idx, type_name, error = %e, "column cannot be decoded, returning null");
                None
            }
        },
    };
    Ok(v.unwrap_or(Value::Null))
}

/// Widen through the shortest decimal form so `0.1` stays `0.1`, not `0.10000000149011612`.
fn float4_to_value(n: f32) -> Option<Value> {
    n.to_string().parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
}

fn decimal_to_value(d: Decimal) -> Value {
    let text = d.normalize().to_string();
    text.parse::<Number>()
        .map(Value::Number)
        .unwrap_or(Value::String(text))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn decimals_become_numbers() {
        assert_eq!(decimal_to_value(Decimal::from_str("12.50").unwrap()), json!(12.5));
        assert_eq!(decimal_to_value(Decimal::from_str("7").unwrap()), json!(7));
    }

    #[test]
    fn reals_keep_their_written_value() {
        assert_eq!(float4_to_value(0.1), Some(json!(0.1)));
        assert_eq!(float4_to_value(-2.5), Some(json!(-2.5)));
        assert_eq!(float4_to_value(f32::NAN), None);
    }

    #[test]
    fn bytes_render_as_hex() {
        assert_eq!(hex(&[0x00, 0xab, 0x10]), "00ab10");
    }
}
