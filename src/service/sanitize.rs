//! Convert caller-supplied values into storage-ready values per schema type.

use crate::error::AdapterError;
use crate::schema::{PropertyDefinition, PropertyType, Record, Schema};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Number, Value};

/// Unwrap caller data into a record: must be a non-null, non-array object.
pub fn into_record(data: Value) -> Result<Record, AdapterError> {
    match data {
        Value::Object(map) => Ok(map),
        Value::Null => Err(AdapterError::InvalidInput("data is required".into())),
        Value::Array(_) => Err(AdapterError::InvalidInput("data must not be an array".into())),
        _ => Err(AdapterError::InvalidInput("data must be an object".into())),
    }
}

/// Sanitize every key of `data` against `schema`. Virtual properties are dropped;
/// keys with no resolvable definition fail with `UnknownProperty`. Pure.
pub fn sanitize(identity: &str, schema: &Schema, data: &Record) -> Result<Record, AdapterError> {
    let mut out = Record::new();
    for (key, value) in data {
        let def = schema
            .resolve_property(key)
            .ok_or_else(|| AdapterError::UnknownProperty {
                identity: identity.to_string(),
                property: key.clone(),
            })?;
        if def.virtual_ {
            continue;
        }
        out.insert(key.clone(), sanitize_value(def, value));
    }
    Ok(out)
}

pub fn sanitize_value(def: &PropertyDefinition, value: &Value) -> Value {
    match &def.type_ {
        PropertyType::Object | PropertyType::Array | PropertyType::Json | PropertyType::Jsonb => {
            match value {
                Value::String(s) => Value::String(Value::String(s.clone()).to_string()),
                other => other.clone(),
            }
        }
        PropertyType::Integer
        | PropertyType::Number
        | PropertyType::BigInteger
        | PropertyType::Float
        | PropertyType::Decimal => match value {
            Value::Object(related) if def.is_many_to_one() => {
                related.get("id").cloned().unwrap_or(Value::Null)
            }
            Value::String(s) => coerce_number(s, def.type_.is_integral())
                .map(Value::Number)
                .unwrap_or_else(|| value.clone()),
            other => other.clone(),
        },
        PropertyType::String if def.is_date_time() => normalize_date_time(value),
        PropertyType::DateTime | PropertyType::Timestamp => normalize_date_time(value),
        PropertyType::String
        | PropertyType::Boolean
        | PropertyType::Text
        | PropertyType::Date
        | PropertyType::Time
        | PropertyType::Binary
        | PropertyType::Uuid
        | PropertyType::Unknown(_) => value.clone(),
    }
}

/// Epoch milliseconds and non-RFC 3339 date strings become ISO-8601 UTC strings;
/// RFC 3339 strings and anything unparseable pass through untouched.
fn normalize_date_time(value: &Value) -> Value {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| Value::String(to_iso(&dt)))
            .unwrap_or_else(|| value.clone()),
        Value::String(s) if DateTime::parse_from_rfc3339(s).is_err() => parse_date_time(s)
            .map(|dt| Value::String(to_iso(&dt)))
            .unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
pub fn to_iso(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Numeric coercion of a string; `None` when it is not a finite number.
pub fn coerce_number(s: &str, integral: bool) -> Option<Number> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(i) = t.parse::<i64>() {
        return Some(Number::from(i));
    }
    let f = t.parse::<f64>().ok().filter(|f| f.is_finite())?;
    if integral && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        return Some(Number::from(f as i64));
    }
    Number::from_f64(f)
}

/// Lenient date-time parsing: RFC 3339, explicit offsets (minutes optional),
/// naive date-times and bare dates (both taken as UTC).
pub fn parse_date_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        serde_json::from_value(json!({
            "timestamps": true,
            "properties": {
                "name": { "type": "string" },
                "settings": { "type": "object" },
                "tags": { "type": "array" },
                "floor": { "type": "integer" },
                "weight": { "type": "number" },
                "door": { "type": "integer", "connection": { "type": "m:1", "relatedModel": "door" } },
                "openedAt": { "type": "string", "format": "date-time" },
                "label": { "type": "string", "virtual": true },
                "active": { "type": "boolean" }
            }
        }))
        .unwrap()
    }

    fn run(data: Value) -> Result<Record, AdapterError> {
        sanitize("accessright", &schema(), data.as_object().unwrap())
    }

    #[test]
    fn rejects_non_object_input() {
        assert!(matches!(into_record(Value::Null), Err(AdapterError::InvalidInput(_))));
        assert!(matches!(into_record(json!([1, 2])), Err(AdapterError::InvalidInput(_))));
        assert!(matches!(into_record(json!("door")), Err(AdapterError::InvalidInput(_))));
        assert_eq!(into_record(json!({ "a": 1 })).unwrap().len(), 1);
    }

    #[test]
    fn unknown_property_fails() {
        match run(json!({ "name": "x", "colour": "red" })) {
            Err(AdapterError::UnknownProperty { property, identity }) => {
                assert_eq!(property, "colour");
                assert_eq!(identity, "accessright");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn builtins_resolve_and_virtuals_are_dropped() {
        let out = run(json!({ "id": "4", "createdAt": "2024-01-01T00:00:00Z", "label": "computed" })).unwrap();
        assert_eq!(out["id"], json!(4));
        assert_eq!(out["createdAt"], json!("2024-01-01T00:00:00Z"));
        assert!(!out.contains_key("label"));
    }

    #[test]
    fn coerces_numbers_and_collapses_related_objects() {
        let out = run(json!({
            "floor": "3",
            "weight": "2.5",
            "door": { "id": 7, "name": "Back" },
            "active": true
        }))
        .unwrap();
        assert_eq!(out["floor"], json!(3));
        assert_eq!(out["weight"], json!(2.5));
        assert_eq!(out["door"], json!(7));
        assert_eq!(out["active"], json!(true));
    }

    #[test]
    fn non_numeric_strings_pass_through_for_the_validator() {
        let out = run(json!({ "floor": "ground" })).unwrap();
        assert_eq!(out["floor"], json!("ground"));
    }

    #[test]
    fn json_encodes_string_inputs_of_structured_types() {
        let out = run(json!({ "settings": "raw", "tags": ["a", "b"] })).unwrap();
        assert_eq!(out["settings"], json!("\"raw\""));
        assert_eq!(out["tags"], json!(["a", "b"]));
    }

    #[test]
    fn date_inputs_become_iso_strings() {
        let out = run(json!({ "openedAt": 0 })).unwrap();
        assert_eq!(out["openedAt"], json!("1970-01-01T00:00:00.000Z"));
        let out = run(json!({ "openedAt": "2024-03-05 10:20:30" })).unwrap();
        assert_eq!(out["openedAt"], json!("2024-03-05T10:20:30.000Z"));
        let out = run(json!({ "openedAt": "2024-03-05T10:20:30+02:00" })).unwrap();
        assert_eq!(out["openedAt"], json!("2024-03-05T10:20:30+02:00"));
    }

    #[test]
    fn parses_short_offsets() {
        let dt = parse_date_time("2024-01-01T03:00:00+03").unwrap();
        assert_eq!(to_iso(&dt), "2024-01-01T00:00:00.000Z");
        let dt = parse_date_time("2024-01-01").unwrap();
        assert_eq!(to_iso(&dt), "2024-01-01T00:00:00.000Z");
        assert!(parse_date_time("soon").is_none());
    }

    #[test]
    fn number_coercion_edge_cases() {
        assert_eq!(coerce_number(" 12 ", true), Some(Number::from(12)));
        assert_eq!(coerce_number("1e3", true), Some(Number::from(1000)));
        assert!(coerce_number("", false).is_none());
        assert!(coerce_number("NaN", false).is_none());
    }
}
