//! Builds parameterized INSERT, SELECT, UPDATE, DELETE from a registered schema.

use crate::error::AdapterError;
use crate::schema::{PropertyDefinition, PropertyType, Record, Schema};
use crate::sql::filter::apply_filter;
use crate::sql::options::{ResolvedOptions, SortSpec};
use serde_json::Value;

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// SQL type a bound value is cast to for a column of this property. `None` leaves the
/// placeholder uncast.
pub fn column_cast(def: &PropertyDefinition) -> Option<&'static str> {
    Some(match &def.type_ {
        PropertyType::Object | PropertyType::Array | PropertyType::Json => "json",
        PropertyType::Jsonb => "jsonb",
        PropertyType::Integer => "integer",
        PropertyType::BigInteger => "bigint",
        PropertyType::Number => "double precision",
        PropertyType::Float => "real",
        PropertyType::Decimal => "numeric",
        PropertyType::String if def.is_date_time() => "timestamptz",
        PropertyType::String | PropertyType::Text => "text",
        PropertyType::Boolean => "boolean",
        PropertyType::DateTime | PropertyType::Timestamp => "timestamptz",
        PropertyType::Date => "date",
        PropertyType::Time => "time",
        PropertyType::Uuid => "uuid",
        PropertyType::Binary => "bytea",
        PropertyType::Unknown(_) => return None,
    })
}

/// Columns that hold JSON; PostgreSQL has no equality operator on `json`, so
/// comparisons go through `jsonb`.
pub fn is_json_column(def: &PropertyDefinition) -> bool {
    matches!(
        def.type_,
        PropertyType::Object | PropertyType::Array | PropertyType::Json | PropertyType::Jsonb
    )
}

/// JSON-encode a non-null value as a text parameter for a `::json` / `::jsonb` cast.
pub fn json_text(v: Value) -> Value {
    match v {
        Value::Null => Value::Null,
        other => Value::String(other.to_string()),
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    pub fn new(sql: impl Into<String>) -> Self {
        QueryBuf {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Push `v` and return its placeholder, cast to the column type of `def`.
    /// Values for JSON columns travel as JSON text; strings are taken to be
    /// JSON text already, as the sanitizer leaves them.
    pub fn placeholder(&mut self, v: Value, def: &PropertyDefinition) -> String {
        let v = match v {
            Value::String(_) => v,
            other if is_json_column(def) => json_text(other),
            other => other,
        };
        let n = self.push_param(v);
        match column_cast(def) {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

/// Definition of a stored column; virtual and undeclared names are rejected.
pub fn column_def<'s>(
    identity: &str,
    schema: &'s Schema,
    name: &str,
) -> Result<&'s PropertyDefinition, AdapterError> {
    schema
        .resolve_property(name)
        .filter(|def| !def.virtual_)
        .ok_or_else(|| AdapterError::UnknownProperty {
            identity: identity.to_string(),
            property: name.to_string(),
        })
}

fn select_list(identity: &str, schema: &Schema, columns: Option<&[String]>) -> Result<String, AdapterError> {
    let Some(columns) = columns else {
        return Ok("*".to_string());
    };
    let mut out = Vec::with_capacity(columns.len());
    for name in columns {
        match schema.resolve_property(name) {
            Some(def) if def.virtual_ => continue,
            Some(_) => out.push(quoted(name)),
            None => {
                return Err(AdapterError::UnknownProperty {
                    identity: identity.to_string(),
                    property: name.clone(),
                })
            }
        }
    }
    if out.is_empty() {
        return Ok("*".to_string());
    }
    Ok(out.join(", "))
}

fn order_clause(identity: &str, schema: &Schema, sort: &SortSpec) -> Result<String, AdapterError> {
    if sort.0.is_empty() {
        return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(sort.0.len());
    for (name, dir) in &sort.0 {
        column_def(identity, schema, name)?;
        parts.push(format!("{} {}", quoted(name), dir.as_sql()));
    }
    Ok(format!(" ORDER BY {}", parts.join(", ")))
}

/// SELECT with filter, projection, ORDER BY, LIMIT and OFFSET.
pub fn select(
    identity: &str,
    schema: &Schema,
    filter: &Record,
    opts: &ResolvedOptions,
) -> Result<QueryBuf, AdapterError> {
    let cols = select_list(identity, schema, opts.columns.as_deref())?;
    let mut q = QueryBuf::new(format!("SELECT {} FROM {}", cols, quoted(identity)));
    apply_filter(&mut q, identity, schema, filter)?;
    q.sql.push_str(&order_clause(identity, schema, &opts.sort)?);
    q.sql.push_str(&format!(" LIMIT {}", opts.limit));
    if let Some(n) = opts.offset {
        q.sql.push_str(&format!(" OFFSET {}", n));
    }
    Ok(q)
}

/// SELECT COUNT(*) AS "count" with the same filter semantics as `select`.
pub fn count(identity: &str, schema: &Schema, filter: &Record) -> Result<QueryBuf, AdapterError> {
    let mut q = QueryBuf::new(format!("SELECT COUNT(*) AS \"count\" FROM {}", quoted(identity)));
    apply_filter(&mut q, identity, schema, filter)?;
    Ok(q)
}

/// SELECT * WHERE column IN (...) ORDER BY id. Used for batch-fetching related rows.
pub fn select_by_column_in(
    identity: &str,
    schema: &Schema,
    column: &str,
    values: &[Value],
) -> Result<QueryBuf, AdapterError> {
    let def = column_def(identity, schema, column)?;
    let mut q = QueryBuf::new(format!("SELECT * FROM {}", quoted(identity)));
    if values.is_empty() {
        q.sql.push_str(" WHERE 1 = 0");
        return Ok(q);
    }
    let placeholders: Vec<String> = values.iter().map(|v| q.placeholder(v.clone(), def)).collect();
    q.sql.push_str(&format!(
        " WHERE {} IN ({}) ORDER BY {} ASC",
        quoted(column),
        placeholders.join(", "),
        quoted("id")
    ));
    Ok(q)
}

/// INSERT ... RETURNING *. An empty record inserts DEFAULT VALUES.
pub fn insert(identity: &str, schema: &Schema, record: &Record) -> Result<QueryBuf, AdapterError> {
    let table = quoted(identity);
    if record.is_empty() {
        return Ok(QueryBuf::new(format!("INSERT INTO {} DEFAULT VALUES RETURNING *", table)));
    }
    let mut q = QueryBuf::default();
    let mut cols = Vec::with_capacity(record.len());
    let mut placeholders = Vec::with_capacity(record.len());
    for (name, value) in record {
        let def = column_def(identity, schema, name)?;
        cols.push(quoted(name));
        placeholders.push(q.placeholder(value.clone(), def));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        table,
        cols.join(", "),
        placeholders.join(", ")
    );
    Ok(q)
}

/// UPDATE by id: SET every column in `patch` except `id`. `None` when nothing is left to set.
pub fn update(
    identity: &str,
    schema: &Schema,
    id: &Value,
    patch: &Record,
) -> Result<Option<QueryBuf>, AdapterError> {
    let mut q = QueryBuf::default();
    let mut sets = Vec::with_capacity(patch.len());
    for (name, value) in patch {
        if name == "id" {
            continue;
        }
        let def = column_def(identity, schema, name)?;
        let rhs = q.placeholder(value.clone(), def);
        sets.push(format!("{} = {}", quoted(name), rhs));
    }
    if sets.is_empty() {
        return Ok(None);
    }
    let id_ph = q.placeholder(id.clone(), column_def(identity, schema, "id")?);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING *",
        quoted(identity),
        sets.join(", "),
        quoted("id"),
        id_ph
    );
    Ok(Some(q))
}

/// DELETE by id.
pub fn delete(identity: &str, schema: &Schema, id: &Value) -> Result<QueryBuf, AdapterError> {
    let mut q = QueryBuf::default();
    let id_ph = q.placeholder(id.clone(), column_def(identity, schema, "id")?);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING *",
        quoted(identity),
        quoted("id"),
        id_ph
    );
    Ok(q)
}
