//! CREATE TABLE generation from an entity schema.

use crate::error::AdapterError;
use crate::schema::{PropertyDefinition, PropertyType, Schema, NOW_DEFAULT};
use crate::sql::quoted;
use serde_json::Value;

/// Server-side current timestamp with millisecond precision.
const NOW_EXPRESSION: &str = "CURRENT_TIMESTAMP(3)";

/// Column type for a property. Objects and arrays are stored as `json`, date-time
/// strings as `timestamptz`; every other storable kind keeps its own column type.
pub fn column_type(identity: &str, name: &str, def: &PropertyDefinition) -> Result<&'static str, AdapterError> {
    let unsupported = || AdapterError::UnsupportedColumnType {
        identity: identity.to_string(),
        field: name.to_string(),
        column_type: def.type_.to_string(),
    };
    Ok(match &def.type_ {
        PropertyType::Object | PropertyType::Array | PropertyType::Json => "json",
        PropertyType::String if def.is_date_time() => "timestamptz",
        PropertyType::String => "varchar(255)",
        PropertyType::Integer => "integer",
        PropertyType::BigInteger => "bigint",
        PropertyType::Text => "text",
        PropertyType::Float => "real",
        PropertyType::Decimal => "decimal(8, 2)",
        PropertyType::Boolean => "boolean",
        PropertyType::Date => "date",
        PropertyType::DateTime | PropertyType::Timestamp => "timestamptz",
        PropertyType::Time => "time",
        PropertyType::Binary => "bytea",
        PropertyType::Jsonb => "jsonb",
        PropertyType::Uuid => "uuid",
        PropertyType::Number | PropertyType::Unknown(_) => return Err(unsupported()),
    })
}

fn is_timestamp_column(def: &PropertyDefinition) -> bool {
    def.is_date_time() || matches!(def.type_, PropertyType::DateTime | PropertyType::Timestamp)
}

fn literal(v: &Value) -> String {
    match v {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn column_definition(
    identity: &str,
    schema: &Schema,
    name: &str,
    def: &PropertyDefinition,
) -> Result<String, AdapterError> {
    let mut out = format!("{} {}", quoted(name), column_type(identity, name, def)?);
    if schema.is_required(name) {
        out.push_str(" NOT NULL");
    }
    if let Some(default) = &def.default {
        out.push_str(" DEFAULT ");
        if is_timestamp_column(def) && default.as_str() == Some(NOW_DEFAULT) {
            out.push_str(NOW_EXPRESSION);
        } else {
            out.push_str(&literal(default));
        }
    }
    Ok(out)
}

fn constraint_name(identity: &str, columns: &[&str]) -> String {
    format!("{}_{}_unique", identity, columns.join("_")).to_lowercase()
}

/// Build the CREATE TABLE statement: serial `id` primary key, one column per
/// stored property in declaration order, then uniqueness constraints.
pub fn create_table_sql(identity: &str, schema: &Schema) -> Result<String, AdapterError> {
    let mut defs = vec![format!("{} serial PRIMARY KEY", quoted("id"))];
    let mut uniques: Vec<Vec<&str>> = Vec::new();
    for (name, def) in schema.properties.iter() {
        if name == "id" || def.virtual_ {
            continue;
        }
        defs.push(column_definition(identity, schema, name, def)?);
        if def.unique {
            uniques.push(vec![name]);
        }
    }
    if schema.timestamps {
        for name in ["createdAt", "updatedAt"] {
            if !schema.properties.contains(name) {
                defs.push(format!(
                    "{} timestamptz(3) NOT NULL DEFAULT {}",
                    quoted(name),
                    NOW_EXPRESSION
                ));
            }
        }
    }
    for columns in schema.unique_keys.values() {
        uniques.push(columns.iter().map(String::as_str).collect());
    }
    for columns in uniques {
        let cols: Vec<String> = columns.iter().map(|c| quoted(c)).collect();
        defs.push(format!(
            "CONSTRAINT {} UNIQUE ({})",
            quoted(&constraint_name(identity, &columns)),
            cols.join(", ")
        ));
    }
    Ok(format!("CREATE TABLE {} ({})", quoted(identity), defs.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(v: Value) -> Schema {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn maps_types_and_constraints() {
        let sql = create_table_sql(
            "door",
            &schema(json!({
                "properties": {
                    "id": { "type": "integer" },
                    "name": { "type": "string", "unique": true },
                    "settings": { "type": "object" },
                    "openedAt": { "type": "string", "format": "date-time", "default": "NOW()" },
                    "floor": { "type": "integer", "default": 0 },
                    "note": { "type": "text", "default": "it's" },
                    "rights": { "type": "array", "virtual": true }
                },
                "required": ["name"]
            })),
        )
        .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE \"door\" (\"id\" serial PRIMARY KEY, \"name\" varchar(255) NOT NULL, \
             \"settings\" json, \"openedAt\" timestamptz DEFAULT CURRENT_TIMESTAMP(3), \
             \"floor\" integer DEFAULT 0, \"note\" text DEFAULT 'it''s', \
             CONSTRAINT \"door_name_unique\" UNIQUE (\"name\"))"
        );
    }

    #[test]
    fn composite_unique_keys() {
        let sql = create_table_sql(
            "userprofilebinding",
            &schema(json!({
                "uniqueKeys": { "userAndProfile": ["user", "userProfile"] },
                "properties": {
                    "user": { "type": "integer" },
                    "userProfile": { "type": "integer" }
                }
            })),
        )
        .unwrap();
        assert!(sql.ends_with(
            "CONSTRAINT \"userprofilebinding_user_userprofile_unique\" UNIQUE (\"user\", \"userProfile\"))"
        ));
    }

    #[test]
    fn timestamps_add_missing_columns() {
        let sql = create_table_sql(
            "zone",
            &schema(json!({ "timestamps": true, "properties": { "title": { "type": "string" } } })),
        )
        .unwrap();
        assert!(sql.contains("\"createdAt\" timestamptz(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3)"));
        assert!(sql.contains("\"updatedAt\" timestamptz(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3)"));
    }

    #[test]
    fn rejects_unsupported_types() {
        for ty in ["number", "money"] {
            let err = create_table_sql(
                "door",
                &schema(json!({ "properties": { "weight": { "type": ty } } })),
            )
            .unwrap_err();
            match err {
                AdapterError::UnsupportedColumnType { field, column_type, .. } => {
                    assert_eq!(field, "weight");
                    assert_eq!(column_type, ty);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
