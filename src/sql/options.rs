//! Find options: paging, projection, ordering, relation population.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

/// Upper bound applied to a `limit` coming in from the REST surface.
pub const MAX_LIMIT: u64 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// `1` (or `"asc"`) sorts ascending; every other value sorts descending.
    pub fn from_json(v: &Value) -> Self {
        let ascending = match v {
            Value::Number(n) => n.as_f64() == Some(1.0),
            Value::String(s) => {
                let s = s.trim();
                s == "1" || s.eq_ignore_ascii_case("asc")
            }
            _ => false,
        };
        if ascending {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Sort keys in the order the caller listed them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SortSpec(pub Vec<(String, SortDirection)>);

impl SortSpec {
    pub fn asc(column: &str) -> Self {
        SortSpec(vec![(column.to_string(), SortDirection::Asc)])
    }

    /// `name` sorts ascending, `-name` descending.
    pub fn parse_shorthand(s: &str) -> Self {
        let s = s.trim();
        match s.strip_prefix('-') {
            Some(col) => SortSpec(vec![(col.to_string(), SortDirection::Desc)]),
            None => SortSpec::asc(s),
        }
    }
}

impl<'de> Deserialize<'de> for SortSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SortVisitor;

        impl<'de> Visitor<'de> for SortVisitor {
            type Value = SortSpec;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column to direction, or a column name")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<SortSpec, E> {
                Ok(SortSpec::parse_shorthand(v))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<SortSpec, A::Error> {
                let mut keys = Vec::new();
                while let Some((k, v)) = access.next_entry::<String, Value>()? {
                    keys.push((k, SortDirection::from_json(&v)));
                }
                Ok(SortSpec(keys))
            }
        }

        deserializer.deserialize_any(SortVisitor)
    }
}

/// A single name or a list of names (`select`, `populate`).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Caller-supplied options. Each key present replaces the default for that key only.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct FindOptions {
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    /// Alias of `offset`; `offset` wins when both are given.
    #[serde(default)]
    pub skip: Option<u64>,
    #[serde(default)]
    pub select: Option<OneOrMany>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub populate: Option<OneOrMany>,
}

impl FindOptions {
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn sort(mut self, spec: SortSpec) -> Self {
        self.sort = Some(spec);
        self
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(OneOrMany::Many(columns.into_iter().map(Into::into).collect()));
        self
    }

    pub fn populate<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.populate = Some(OneOrMany::Many(relations.into_iter().map(Into::into).collect()));
        self
    }

    /// Merge over the defaults: `limit` = `default_limit`, all columns, `id` ascending, nothing populated.
    pub fn resolve(self, default_limit: u64) -> ResolvedOptions {
        let columns = self
            .select
            .map(OneOrMany::into_vec)
            .filter(|cols| !cols.iter().any(|c| c == "*"));
        ResolvedOptions {
            limit: self.limit.unwrap_or(default_limit),
            offset: self.offset.or(self.skip),
            columns,
            sort: self.sort.unwrap_or_else(|| SortSpec::asc("id")),
            populate: self
                .populate
                .map(OneOrMany::into_vec)
                .unwrap_or_default()
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }
}

/// Options after defaults are applied.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedOptions {
    pub limit: u64,
    pub offset: Option<u64>,
    /// `None` selects every column.
    pub columns: Option<Vec<String>>,
    pub sort: SortSpec,
    pub populate: Vec<String>,
}
