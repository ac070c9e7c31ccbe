//! Translate a filter object into WHERE conditions.
//!
//! Each key is one of:
//! - `search`: `{ filterKeys, filterValue }` (or that object as a JSON string), a
//!   substring match OR-ed across the keys
//! - a property with an array value: membership (`IN`); an empty array matches nothing
//! - a numeric or date-time property with a `"<op>:<value>"` string: comparison
//! - anything else: equality
//!
//! All conditions are AND-ed.

use crate::error::AdapterError;
use crate::schema::{PropertyDefinition, PropertyType, Record, Schema};
use crate::service::sanitize::{coerce_number, parse_date_time, to_iso};
use crate::sql::builder::{column_def, is_json_column, json_text, quoted, QueryBuf};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Number, Value};

pub const SEARCH_KEY: &str = "search";

const COMPARATORS: [&str; 6] = ["=", ">", "<", ">=", "<=", "<>"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchFilter {
    #[serde(default)]
    filter_keys: Vec<String>,
    #[serde(default)]
    filter_value: Value,
}

/// Append ` WHERE ...` for `filter` to `q`. Nothing is appended for an empty filter.
pub fn apply_filter(
    q: &mut QueryBuf,
    identity: &str,
    schema: &Schema,
    filter: &Record,
) -> Result<(), AdapterError> {
    let mut conditions = Vec::new();
    let mut equalities = Vec::new();
    for (key, value) in filter {
        if key == SEARCH_KEY {
            if let Some(cond) = search_condition(q, identity, schema, value)? {
                conditions.push(cond);
            }
            continue;
        }
        let def = column_def(identity, schema, key)?;
        match value {
            Value::Array(items) if !is_json_column(def) => {
                conditions.push(in_condition(q, key, def, items)?);
            }
            Value::String(s) if is_comparable(def) => match split_comparator(s) {
                Some((op, rest)) => {
                    if !COMPARATORS.contains(&op) {
                        return Err(AdapterError::InvalidFilter(format!(
                            "unsupported comparator '{}' for '{}'",
                            op, key
                        )));
                    }
                    let v = filter_value(key, def, &Value::String(rest.to_string()))?;
                    let ph = q.placeholder(v, def);
                    conditions.push(format!("{} {} {}", quoted(key), op, ph));
                }
                None => equalities.push(eq_condition(q, key, def, value)?),
            },
            _ => equalities.push(eq_condition(q, key, def, value)?),
        }
    }
    conditions.extend(equalities);
    if !conditions.is_empty() {
        q.sql.push_str(" WHERE ");
        q.sql.push_str(&conditions.join(" AND "));
    }
    Ok(())
}

fn search_condition(
    q: &mut QueryBuf,
    identity: &str,
    schema: &Schema,
    value: &Value,
) -> Result<Option<String>, AdapterError> {
    let search: SearchFilter = match value {
        Value::String(s) => serde_json::from_str(s),
        other => serde_json::from_value(other.clone()),
    }
    .map_err(|e| AdapterError::InvalidFilter(format!("search: {}", e)))?;
    if search.filter_keys.is_empty() {
        return Ok(None);
    }
    let needle = match &search.filter_value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let mut parts = Vec::with_capacity(search.filter_keys.len());
    for key in &search.filter_keys {
        column_def(identity, schema, key)?;
        let n = q.push_param(Value::String(format!("%{}%", needle)));
        parts.push(format!("{}::text LIKE ${}", quoted(key), n));
    }
    Ok(Some(format!("({})", parts.join(" OR "))))
}

fn in_condition(
    q: &mut QueryBuf,
    key: &str,
    def: &PropertyDefinition,
    items: &[Value],
) -> Result<String, AdapterError> {
    if items.is_empty() {
        return Ok("1 = 0".to_string());
    }
    let mut placeholders = Vec::with_capacity(items.len());
    for item in items {
        let v = filter_value(key, def, item)?;
        placeholders.push(q.placeholder(v, def));
    }
    Ok(format!("{} IN ({})", quoted(key), placeholders.join(", ")))
}

fn eq_condition(
    q: &mut QueryBuf,
    key: &str,
    def: &PropertyDefinition,
    value: &Value,
) -> Result<String, AdapterError> {
    if value.is_null() {
        return Ok(format!("{} IS NULL", quoted(key)));
    }
    if is_json_column(def) {
        let n = q.push_param(json_text(value.clone()));
        return Ok(format!("{}::jsonb = ${}::jsonb", quoted(key), n));
    }
    let v = filter_value(key, def, value)?;
    let ph = q.placeholder(v, def);
    Ok(format!("{} = {}", quoted(key), ph))
}

fn is_comparable(def: &PropertyDefinition) -> bool {
    def.type_.is_numeric() || is_date_time(def)
}

fn is_date_time(def: &PropertyDefinition) -> bool {
    def.is_date_time() || matches!(def.type_, PropertyType::DateTime | PropertyType::Timestamp)
}

/// `">=:5"` -> `(">=", "5")`. `None` when the value carries no operator prefix.
fn split_comparator(s: &str) -> Option<(&str, &str)> {
    let op_len = s
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '!'))
        .unwrap_or(s.len());
    if op_len == 0 {
        return None;
    }
    let rest = s[op_len..].strip_prefix(':')?;
    Some((&s[..op_len], rest))
}

/// Coerce a filter operand to the property's storage type.
fn filter_value(key: &str, def: &PropertyDefinition, value: &Value) -> Result<Value, AdapterError> {
    if def.type_.is_numeric() {
        let n = match value {
            Value::Number(n) => n.clone(),
            Value::String(s) => coerce_number(s, def.type_.is_integral())
                .ok_or_else(|| AdapterError::InvalidFilter(format!("'{}' is not a number for '{}'", s, key)))?,
            other => {
                return Err(AdapterError::InvalidFilter(format!(
                    "'{}' is not a number for '{}'",
                    other, key
                )))
            }
        };
        if !fits_column(def, &n) {
            return Err(AdapterError::InvalidFilter(format!(
                "{} is out of range for '{}'",
                n, key
            )));
        }
        return Ok(Value::Number(n));
    }
    if is_date_time(def) {
        return match value {
            Value::String(s) => parse_date_time(&restore_offset_sign(s))
                .map(|dt| Value::String(to_iso(&dt)))
                .ok_or_else(|| AdapterError::InvalidFilter(format!("'{}' is not a date for '{}'", s, key))),
            Value::Number(n) => n
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .map(|dt| Value::String(to_iso(&dt)))
                .ok_or_else(|| AdapterError::InvalidFilter(format!("'{}' is not a date for '{}'", n, key))),
            other => Err(AdapterError::InvalidFilter(format!(
                "'{}' is not a date for '{}'",
                other, key
            ))),
        };
    }
    Ok(value.clone())
}

/// `integer` columns are 4 bytes wide.
fn fits_column(def: &PropertyDefinition, n: &Number) -> bool {
    if def.type_ != PropertyType::Integer {
        return true;
    }
    match n.as_i64() {
        Some(i) => i32::try_from(i).is_ok(),
        None => n
            .as_f64()
            .map(|f| f >= i32::MIN as f64 && f <= i32::MAX as f64)
            .unwrap_or(false),
    }
}

/// Query strings decode `+` to a space; put it back in a trailing `HH`, `HHMM` or `HH:MM` offset.
fn restore_offset_sign(s: &str) -> String {
    let trimmed = s.trim_start();
    if let Some((head, tail)) = trimmed.rsplit_once(' ') {
        let digits: String = tail.chars().filter(|c| *c != ':').collect();
        let offset_like = matches!(digits.len(), 2 | 4)
            && digits.chars().all(|c| c.is_ascii_digit())
            && (tail.len() == digits.len() || (tail.len() == 5 && tail.as_bytes()[2] == b':'));
        if offset_like && head.ends_with(|c: char| c.is_ascii_digit()) && head.contains('T') {
            return format!("{}+{}", head, tail);
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn door() -> Schema {
        serde_json::from_value(json!({
            "properties": {
                "name": { "type": "string" },
                "code": { "type": "string" },
                "floor": { "type": "integer" },
                "tags": { "type": "array" },
                "settings": { "type": "object" },
                "openedAt": { "type": "string", "format": "date-time" }
            }
        }))
        .unwrap()
    }

    fn build(filter: Value) -> Result<QueryBuf, AdapterError> {
        let mut q = QueryBuf::new("SELECT * FROM \"door\"");
        apply_filter(&mut q, "door", &door(), filter.as_object().unwrap())?;
        Ok(q)
    }

    #[test]
    fn empty_filter_adds_nothing() {
        assert_eq!(build(json!({})).unwrap().sql, "SELECT * FROM \"door\"");
    }

    #[test]
    fn equality_conjunction_comes_last() {
        let q = build(json!({ "name": "Lobby", "floor": ">=:2", "code": null })).unwrap();
        assert_eq!(
            q.sql,
            "SELECT * FROM \"door\" WHERE \"floor\" >= $2::integer AND \"name\" = $1::text AND \"code\" IS NULL"
        );
        assert_eq!(q.params, vec![json!("Lobby"), json!(2)]);
    }

    #[test]
    fn arrays_become_membership() {
        let q = build(json!({ "floor": [1, "2"] })).unwrap();
        assert_eq!(q.sql, "SELECT * FROM \"door\" WHERE \"floor\" IN ($1::integer, $2::integer)");
        assert_eq!(q.params, vec![json!(1), json!(2)]);
        let q = build(json!({ "floor": [] })).unwrap();
        assert_eq!(q.sql, "SELECT * FROM \"door\" WHERE 1 = 0");
    }

    #[test]
    fn array_properties_compare_as_json() {
        let q = build(json!({ "tags": ["a"] })).unwrap();
        assert_eq!(q.sql, "SELECT * FROM \"door\" WHERE \"tags\"::jsonb = $1::jsonb");
        assert_eq!(q.params, vec![json!(r#"["a"]"#)]);
    }

    #[test]
    fn json_equality_binds_json_text() {
        let q = build(json!({ "settings": "abc" })).unwrap();
        assert_eq!(q.sql, "SELECT * FROM \"door\" WHERE \"settings\"::jsonb = $1::jsonb");
        assert_eq!(q.params, vec![json!("\"abc\"")]);
        let q = build(json!({ "settings": { "mode": "auto" } })).unwrap();
        assert_eq!(q.params, vec![json!(r#"{"mode":"auto"}"#)]);
        let q = build(json!({ "settings": null })).unwrap();
        assert_eq!(q.sql, "SELECT * FROM \"door\" WHERE \"settings\" IS NULL");
    }

    #[test]
    fn integer_operands_must_fit_the_column() {
        assert!(matches!(build(json!({ "floor": ">:3000000000" })), Err(AdapterError::InvalidFilter(_))));
        assert!(matches!(build(json!({ "floor": 3_000_000_000i64 })), Err(AdapterError::InvalidFilter(_))));
        assert!(matches!(build(json!({ "id": ["1", "99999999999"] })), Err(AdapterError::InvalidFilter(_))));
        assert!(build(json!({ "floor": ">=:2147483647" })).is_ok());
    }

    #[test]
    fn search_is_grouped() {
        let q = build(json!({
            "search": "{\"filterKeys\":[\"name\",\"code\"],\"filterValue\":\"lob\"}",
            "floor": 1
        }))
        .unwrap();
        assert_eq!(
            q.sql,
            "SELECT * FROM \"door\" WHERE (\"name\"::text LIKE $1 OR \"code\"::text LIKE $2) AND \"floor\" = $3::integer"
        );
        assert_eq!(q.params[0], json!("%lob%"));
    }

    #[test]
    fn search_accepts_structured_value_and_checks_keys() {
        let q = build(json!({ "search": { "filterKeys": ["name"], "filterValue": 4 } })).unwrap();
        assert_eq!(q.params, vec![json!("%4%")]);
        assert!(matches!(
            build(json!({ "search": { "filterKeys": ["colour"], "filterValue": "x" } })),
            Err(AdapterError::UnknownProperty { .. })
        ));
        assert!(matches!(build(json!({ "search": "{oops" })), Err(AdapterError::InvalidFilter(_))));
    }

    #[test]
    fn bad_comparators_and_operands_are_rejected() {
        assert!(matches!(build(json!({ "floor": "=>:2" })), Err(AdapterError::InvalidFilter(_))));
        assert!(matches!(build(json!({ "floor": ">:two" })), Err(AdapterError::InvalidFilter(_))));
        assert!(matches!(build(json!({ "floor": "two" })), Err(AdapterError::InvalidFilter(_))));
        assert!(matches!(build(json!({ "colour": 1 })), Err(AdapterError::UnknownProperty { .. })));
    }

    #[test]
    fn date_comparisons_normalize_operands() {
        let q = build(json!({ "openedAt": "<:2024-01-01T03:00:00 03:00" })).unwrap();
        assert_eq!(q.sql, "SELECT * FROM \"door\" WHERE \"openedAt\" < $1::timestamptz");
        assert_eq!(q.params, vec![json!("2024-01-01T00:00:00.000Z")]);
        let q = build(json!({ "openedAt": 0 })).unwrap();
        assert_eq!(q.params, vec![json!("1970-01-01T00:00:00.000Z")]);
    }

    #[test]
    fn comparator_prefix_parsing() {
        assert_eq!(split_comparator(">=:5"), Some((">=", "5")));
        assert_eq!(split_comparator("<>:x"), Some(("<>", "x")));
        assert_eq!(split_comparator("5"), None);
        assert_eq!(split_comparator(">5"), None);
    }

    #[test]
    fn restores_plus_in_offsets() {
        assert_eq!(restore_offset_sign("2024-01-01T03:00:00 03"), "2024-01-01T03:00:00+03");
        assert_eq!(restore_offset_sign("2024-01-01T03:00:00 0300"), "2024-01-01T03:00:00+0300");
        assert_eq!(restore_offset_sign("2024-01-01 03:00:00"), "2024-01-01 03:00:00");
    }
}
