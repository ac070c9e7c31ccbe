//! Declarative entity schema: properties, relation descriptors, uniqueness.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Format marker for timestamp-like string properties.
pub const DATE_TIME_FORMAT: &str = "date-time";

/// Column default that becomes a server-side current timestamp.
pub const NOW_DEFAULT: &str = "NOW()";

/// Declared property kind. JSON-schema kinds plus the storage column kinds a
/// schema may name directly; anything else is kept as `Unknown` and rejected
/// where it matters (DDL) rather than at parse time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyType {
    Object,
    Array,
    Integer,
    Number,
    String,
    Boolean,
    BigInteger,
    Text,
    Float,
    Decimal,
    Date,
    DateTime,
    Time,
    Binary,
    Json,
    Jsonb,
    Uuid,
    Timestamp,
    Unknown(String),
}

impl PropertyType {
    pub fn as_str(&self) -> &str {
        match self {
            PropertyType::Object => "object",
            PropertyType::Array => "array",
            PropertyType::Integer => "integer",
            PropertyType::Number => "number",
            PropertyType::String => "string",
            PropertyType::Boolean => "boolean",
            PropertyType::BigInteger => "bigInteger",
            PropertyType::Text => "text",
            PropertyType::Float => "float",
            PropertyType::Decimal => "decimal",
            PropertyType::Date => "date",
            PropertyType::DateTime => "dateTime",
            PropertyType::Time => "time",
            PropertyType::Binary => "binary",
            PropertyType::Json => "json",
            PropertyType::Jsonb => "jsonb",
            PropertyType::Uuid => "uuid",
            PropertyType::Timestamp => "timestamp",
            PropertyType::Unknown(name) => name,
        }
    }

    /// Kinds whose inputs are coerced to numbers and whose filters accept comparators.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            PropertyType::Integer
                | PropertyType::Number
                | PropertyType::BigInteger
                | PropertyType::Float
                | PropertyType::Decimal
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, PropertyType::Integer | PropertyType::BigInteger)
    }
}

impl From<&str> for PropertyType {
    fn from(s: &str) -> Self {
        match s {
            "object" => PropertyType::Object,
            "array" => PropertyType::Array,
            "integer" => PropertyType::Integer,
            "number" => PropertyType::Number,
            "string" => PropertyType::String,
            "boolean" => PropertyType::Boolean,
            "bigInteger" => PropertyType::BigInteger,
            "text" => PropertyType::Text,
            "float" => PropertyType::Float,
            "decimal" => PropertyType::Decimal,
            "date" => PropertyType::Date,
            "dateTime" => PropertyType::DateTime,
            "time" => PropertyType::Time,
            "binary" => PropertyType::Binary,
            "json" => PropertyType::Json,
            "jsonb" => PropertyType::Jsonb,
            "uuid" => PropertyType::Uuid,
            "timestamp" => PropertyType::Timestamp,
            other => PropertyType::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PropertyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PropertyType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(PropertyType::from(s.as_str()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManyToOne {
    pub related_model: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneToMany {
    pub related_model: String,
    /// Foreign key on the related table pointing back at the owner.
    pub related_model_attribute: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManyToMany {
    pub linker_model: String,
    pub linker_my_attribute: String,
    pub linker_related_attribute: String,
}

/// Relation descriptor, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Connection {
    #[serde(rename = "m:1")]
    ManyToOne(ManyToOne),
    #[serde(rename = "1:m")]
    OneToMany(OneToMany),
    #[serde(rename = "m:m")]
    ManyToMany(ManyToMany),
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    #[serde(rename = "type")]
    pub type_: PropertyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub unique: bool,
    /// Computed on read, never persisted.
    #[serde(default, rename = "virtual")]
    pub virtual_: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<Connection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// Any other JSON-Schema keywords (`items`, nested `properties`, `oneOf`, ...),
    /// passed through to the validator unchanged.
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub keywords: Map<String, Value>,
}

impl PropertyDefinition {
    pub fn new(type_: PropertyType) -> Self {
        PropertyDefinition {
            type_,
            format: None,
            default: None,
            hidden: false,
            unique: false,
            virtual_: false,
            connection: None,
            min_length: None,
            max_length: None,
            pattern: None,
            allowed: None,
            minimum: None,
            maximum: None,
            keywords: Map::new(),
        }
    }

    pub fn is_date_time(&self) -> bool {
        self.format.as_deref() == Some(DATE_TIME_FORMAT)
    }

    pub fn is_many_to_one(&self) -> bool {
        matches!(self.connection, Some(Connection::ManyToOne(_)))
    }
}

/// Property map that keeps declaration order (drives column order and validation order).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Properties(Vec<(String, PropertyDefinition)>);

impl Properties {
    pub fn get(&self, name: &str) -> Option<&PropertyDefinition> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces an existing definition in place or appends a new one.
    pub fn insert(&mut self, name: impl Into<String>, def: PropertyDefinition) {
        let name = name.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = def,
            None => self.0.push((name, def)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyDefinition)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, PropertyDefinition)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, PropertyDefinition)>>(iter: I) -> Self {
        let mut props = Properties::default();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Properties {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PropertiesVisitor;

        impl<'de> Visitor<'de> for PropertiesVisitor {
            type Value = Properties;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of property name to definition")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Properties, A::Error> {
                let mut props = Properties::default();
                while let Some((k, v)) = access.next_entry::<String, PropertyDefinition>()? {
                    props.insert(k, v);
                }
                Ok(props)
            }
        }

        deserializer.deserialize_map(PropertiesVisitor)
    }
}

/// Entity schema as declared by a model definition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub required: Vec<String>,
    /// Composite uniqueness constraints, keyed by constraint label.
    #[serde(default)]
    pub unique_keys: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub timestamps: bool,
}

impl Schema {
    /// Declared property, falling back to the built-in `id` and, for schemas
    /// with timestamps, `createdAt` / `updatedAt`.
    pub fn resolve_property(&self, name: &str) -> Option<&PropertyDefinition> {
        if let Some(def) = self.properties.get(name) {
            return Some(def);
        }
        match name {
            "id" => Some(builtin_id()),
            "createdAt" | "updatedAt" if self.timestamps => Some(builtin_timestamp()),
            _ => None,
        }
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

/// Built-in primary key definition.
pub fn builtin_id() -> &'static PropertyDefinition {
    static DEF: OnceLock<PropertyDefinition> = OnceLock::new();
    DEF.get_or_init(|| PropertyDefinition::new(PropertyType::Integer))
}

/// Built-in `createdAt` / `updatedAt` definition.
pub fn builtin_timestamp() -> &'static PropertyDefinition {
    static DEF: OnceLock<PropertyDefinition> = OnceLock::new();
    DEF.get_or_init(|| {
        let mut def = PropertyDefinition::new(PropertyType::String);
        def.format = Some(DATE_TIME_FORMAT.to_string());
        def.hidden = true;
        def.default = Some(Value::String(NOW_DEFAULT.to_string()));
        def
    })
}
