//! Schema validation. Each registered schema is compiled once into a JSON-Schema
//! (draft 7) validator; records are checked against it as plain JSON objects.

use crate::error::AdapterError;
use crate::schema::{PropertyDefinition, PropertyType, Record, Schema};
use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, ValidationError, Validator};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;

/// One violated constraint: the offending property path (e.g. `.name`, `.tags[0]`) and a message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub property: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationReport {
    pub passed: bool,
    /// Violations in check order; the first one is the one reported to callers.
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn into_result(self) -> Result<(), AdapterError> {
        match self.errors.into_iter().next() {
            Some(issue) if !self.passed => Err(AdapterError::ValidationFailed {
                property: issue.property,
                message: issue.message,
            }),
            _ => Ok(()),
        }
    }
}

/// Validator compiled from a schema. Compilation never fails; a schema that
/// cannot be compiled (bad pattern, unknown type, malformed keyword) reports
/// `InvalidSchema` when validation is attempted.
pub struct CompiledValidator {
    identity: String,
    compiled: Result<Validator, String>,
}

impl fmt::Debug for CompiledValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledValidator")
            .field("identity", &self.identity)
            .field("compiled", &self.compiled.is_ok())
            .finish()
    }
}

impl CompiledValidator {
    pub fn compile(identity: &str, schema: &Schema) -> Self {
        let compiled = schema_document(schema).and_then(|doc| {
            jsonschema::options()
                .with_draft(Draft::Draft7)
                .should_validate_formats(true)
                .build(&doc)
                .map_err(|e| format!("invalid schema: {}", e))
        });
        if let Err(problem) = &compiled {
            tracing::warn!(identity = %identity, problem = %problem, "schema does not compile");
        }
        CompiledValidator {
            identity: identity.to_string(),
            compiled,
        }
    }

    /// Check `data` against the compiled schema. Does not mutate input.
    pub fn validate(&self, data: &Record) -> Result<ValidationReport, AdapterError> {
        let validator = self.compiled.as_ref().map_err(|problem| AdapterError::InvalidSchema {
            identity: self.identity.clone(),
            message: problem.clone(),
        })?;
        let instance = Value::Object(data.clone());
        let errors: Vec<ValidationIssue> = validator.iter_errors(&instance).map(|e| issue(&e)).collect();
        Ok(ValidationReport {
            passed: errors.is_empty(),
            errors,
        })
    }
}

/// The whole record schema: an object whose properties are the declared ones.
fn schema_document(schema: &Schema) -> Result<Value, String> {
    let mut properties = Map::new();
    for (name, def) in schema.properties.iter() {
        let doc = property_document(def).map_err(|e| format!("{}: {}", name, e))?;
        properties.insert(name.to_string(), doc);
    }
    Ok(json!({
        "type": "object",
        "properties": properties,
        "required": schema.required,
    }))
}

fn property_document(def: &PropertyDefinition) -> Result<Value, String> {
    let mut doc = def.keywords.clone();
    if let Some(kind) = json_type(&def.type_)? {
        doc.insert("type".into(), json!(kind));
    }
    if let Some(format) = &def.format {
        doc.insert("format".into(), json!(format));
    }
    if let Some(n) = def.min_length {
        doc.insert("minLength".into(), json!(n));
    }
    if let Some(n) = def.max_length {
        doc.insert("maxLength".into(), json!(n));
    }
    if let Some(p) = &def.pattern {
        doc.insert("pattern".into(), json!(p));
    }
    if let Some(allowed) = &def.allowed {
        doc.insert("enum".into(), json!(allowed));
    }
    let (mut minimum, mut maximum) = (def.minimum, def.maximum);
    // `integer` is stored in a 4-byte column.
    if def.type_ == PropertyType::Integer {
        minimum = Some(minimum.map_or(i32::MIN as f64, |m| m.max(i32::MIN as f64)));
        maximum = Some(maximum.map_or(i32::MAX as f64, |m| m.min(i32::MAX as f64)));
    }
    if let Some(n) = minimum {
        doc.insert("minimum".into(), json!(n));
    }
    if let Some(n) = maximum {
        doc.insert("maximum".into(), json!(n));
    }
    Ok(Value::Object(doc))
}

/// JSON-Schema `type` for a property kind. Free-form kinds get none.
fn json_type(ty: &PropertyType) -> Result<Option<&'static str>, String> {
    Ok(match ty {
        PropertyType::Object => Some("object"),
        PropertyType::Array => Some("array"),
        PropertyType::Integer | PropertyType::BigInteger => Some("integer"),
        PropertyType::Number | PropertyType::Float | PropertyType::Decimal => Some("number"),
        PropertyType::String
        | PropertyType::Text
        | PropertyType::Uuid
        | PropertyType::Date
        | PropertyType::DateTime
        | PropertyType::Time
        | PropertyType::Timestamp => Some("string"),
        PropertyType::Boolean => Some("boolean"),
        PropertyType::Json | PropertyType::Jsonb | PropertyType::Binary => None,
        PropertyType::Unknown(name) => return Err(format!("unknown type '{}'", name)),
    })
}

fn issue(err: &ValidationError<'_>) -> ValidationIssue {
    let mut property = pointer_to_path(&err.instance_path.to_string());
    if let ValidationErrorKind::Required { property: missing } = &err.kind {
        match missing {
            Value::String(name) => property.push_str(&format!(".{}", name)),
            other => property.push_str(&format!(".{}", other)),
        }
    }
    ValidationIssue {
        property,
        message: err.to_string(),
    }
}

/// `/tags/0/name` -> `.tags[0].name`.
fn pointer_to_path(pointer: &str) -> String {
    let mut path = String::new();
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
            path.push_str(&format!("[{}]", segment));
        } else {
            path.push('.');
            path.push_str(&segment);
        }
    }
    path
}
