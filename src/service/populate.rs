//! Relation population: replace or attach related rows on a result set.
//!
//! One batched follow-up query per relation (two for many-to-many), then an
//! in-memory merge keyed by the string form of the id.

use crate::adapter::Adapter;
use crate::error::AdapterError;
use crate::schema::{Connection, Record};
use serde_json::Value;
use sqlx::PgConnection;
use std::collections::HashMap;

/// Key written onto each many-to-many result: the id of the linker row.
pub const BINDING_ID: &str = "_binding_id";

/// Resolve each of `relations` on `records`, in order. Every query runs on `tx` when given.
pub async fn populate(
    adapter: &Adapter,
    mut tx: Option<&mut PgConnection>,
    identity: &str,
    records: &mut [Record],
    relations: &[String],
) -> Result<(), AdapterError> {
    if records.is_empty() {
        return Ok(());
    }
    let entry = adapter.registry().get(identity)?;
    for name in relations {
        let def = entry
            .schema
            .properties
            .get(name)
            .ok_or_else(|| AdapterError::UnknownProperty {
                identity: entry.identity.clone(),
                property: name.clone(),
            })?;
        let invalid = || AdapterError::InvalidConnection {
            identity: entry.identity.clone(),
            property: name.clone(),
        };
        match def.connection.as_ref().ok_or_else(invalid)? {
            Connection::ManyToOne(c) => {
                let ids = distinct(records.iter().filter_map(|r| r.get(name)));
                let related = adapter
                    .fetch_where_in(tx.as_deref_mut(), &c.related_model, "id", &ids)
                    .await?;
                merge_many_to_one(records, name, &related);
            }
            Connection::OneToMany(c) => {
                let ids = distinct(records.iter().filter_map(|r| r.get("id")));
                let related = adapter
                    .fetch_where_in(
                        tx.as_deref_mut(),
                        &c.related_model,
                        &c.related_model_attribute,
                        &ids,
                    )
                    .await?;
                merge_one_to_many(records, name, &c.related_model_attribute, &related);
            }
            Connection::ManyToMany(c) => {
                let linker = adapter.registry().get(&c.linker_model)?;
                let related_model = match linker
                    .schema
                    .properties
                    .get(&c.linker_related_attribute)
                    .and_then(|d| d.connection.as_ref())
                {
                    Some(Connection::ManyToOne(m)) => m.related_model.clone(),
                    _ => {
                        return Err(AdapterError::InvalidConnection {
                            identity: linker.identity.clone(),
                            property: c.linker_related_attribute.clone(),
                        })
                    }
                };
                let ids = distinct(records.iter().filter_map(|r| r.get("id")));
                let links = adapter
                    .fetch_where_in(tx.as_deref_mut(), &c.linker_model, &c.linker_my_attribute, &ids)
                    .await?;
                let related_ids = distinct(links.iter().filter_map(|l| l.get(&c.linker_related_attribute)));
                let related = adapter
                    .fetch_where_in(tx.as_deref_mut(), &related_model, "id", &related_ids)
                    .await?;
                merge_many_to_many(
                    records,
                    name,
                    &c.linker_my_attribute,
                    &c.linker_related_attribute,
                    &links,
                    &related,
                );
            }
            Connection::Unknown => return Err(invalid()),
        }
    }
    Ok(())
}

/// String form used to match ids across tables (`3` and `"3"` are the same key).
fn key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Non-null values with duplicates removed, first occurrence kept.
fn distinct<'a>(values: impl Iterator<Item = &'a Value>) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    values
        .filter(|v| !v.is_null())
        .filter(|v| seen.insert(key(v)))
        .cloned()
        .collect()
}

fn index_by<'a>(rows: &'a [Record], column: &str) -> HashMap<String, &'a Record> {
    rows.iter()
        .filter_map(|r| r.get(column).map(|v| (key(v), r)))
        .collect()
}

/// Replace the foreign key in `name` with the related row; dangling keys are left as they are.
pub fn merge_many_to_one(records: &mut [Record], name: &str, related: &[Record]) {
    let by_id = index_by(related, "id");
    for record in records.iter_mut() {
        let Some(fk) = record.get(name) else { continue };
        if let Some(row) = by_id.get(&key(fk)) {
            record.insert(name.to_string(), Value::Object((*row).clone()));
        }
    }
}

/// Attach to each record the related rows whose `attribute` equals its id; no match gives `[]`.
pub fn merge_one_to_many(records: &mut [Record], name: &str, attribute: &str, related: &[Record]) {
    let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
    for row in related {
        if let Some(owner) = row.get(attribute) {
            groups.entry(key(owner)).or_default().push(Value::Object(row.clone()));
        }
    }
    for record in records.iter_mut() {
        let group = record
            .get("id")
            .and_then(|id| groups.get(&key(id)))
            .cloned()
            .unwrap_or_default();
        record.insert(name.to_string(), Value::Array(group));
    }
}

/// Attach, in linker-row order, the related row reached through each linker row,
/// tagged with the linker row id under `_binding_id`. A linker row whose target
/// is gone contributes an object holding only `_binding_id`.
pub fn merge_many_to_many(
    records: &mut [Record],
    name: &str,
    my_attribute: &str,
    related_attribute: &str,
    links: &[Record],
    related: &[Record],
) {
    let by_id = index_by(related, "id");
    for record in records.iter_mut() {
        let Some(my_key) = record.get("id").map(key) else {
            record.insert(name.to_string(), Value::Array(Vec::new()));
            continue;
        };
        let attached: Vec<Value> = links
            .iter()
            .filter(|l| l.get(my_attribute).map(key).as_deref() == Some(my_key.as_str()))
            .map(|l| {
                let mut item = l
                    .get(related_attribute)
                    .and_then(|target| by_id.get(&key(target)))
                    .map(|row| (*row).clone())
                    .unwrap_or_default();
                item.insert(BINDING_ID.to_string(), l.get("id").cloned().unwrap_or(Value::Null));
                Value::Object(item)
            })
            .collect();
        record.insert(name.to_string(), Value::Array(attached));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(v: Value) -> Vec<Record> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn many_to_one_replaces_found_keys_only() {
        let mut records = rows(json!([
            { "id": 1, "door": 10 },
            { "id": 2, "door": 99 },
            { "id": 3, "door": null }
        ]));
        merge_many_to_one(&mut records, "door", &rows(json!([{ "id": 10, "name": "Main" }])));
        assert_eq!(records[0]["door"], json!({ "id": 10, "name": "Main" }));
        assert_eq!(records[1]["door"], json!(99));
        assert_eq!(records[2]["door"], json!(null));
    }

    #[test]
    fn one_to_many_groups_by_owner() {
        let mut records = rows(json!([{ "id": 1 }, { "id": 2 }]));
        let related = rows(json!([
            { "id": 5, "user": 1 },
            { "id": 6, "user": 1 },
            { "id": 7, "user": "2" }
        ]));
        merge_one_to_many(&mut records, "rights", "user", &related);
        assert_eq!(records[0]["rights"], json!([{ "id": 5, "user": 1 }, { "id": 6, "user": 1 }]));
        assert_eq!(records[1]["rights"], json!([{ "id": 7, "user": "2" }]));
    }

    #[test]
    fn one_to_many_without_matches_is_empty() {
        let mut records = rows(json!([{ "id": 1 }]));
        merge_one_to_many(&mut records, "rights", "user", &[]);
        assert_eq!(records[0]["rights"], json!([]));
    }

    #[test]
    fn many_to_many_tags_binding_ids_in_linker_order() {
        let mut records = rows(json!([{ "id": 1 }, { "id": 2 }]));
        let links = rows(json!([
            { "id": 20, "user": 1, "userProfile": 8 },
            { "id": 21, "user": 1, "userProfile": 7 },
            { "id": 22, "user": 2, "userProfile": 404 }
        ]));
        let related = rows(json!([
            { "id": 7, "name": "guest" },
            { "id": 8, "name": "admin" }
        ]));
        merge_many_to_many(&mut records, "profiles", "user", "userProfile", &links, &related);
        assert_eq!(
            records[0]["profiles"],
            json!([
                { "id": 8, "name": "admin", "_binding_id": 20 },
                { "id": 7, "name": "guest", "_binding_id": 21 }
            ])
        );
        assert_eq!(records[1]["profiles"], json!([{ "_binding_id": 22 }]));
    }

    #[test]
    fn distinct_drops_nulls_and_duplicates() {
        let values = [json!(1), json!(null), json!("1"), json!(2), json!(1)];
        assert_eq!(distinct(values.iter()), vec![json!(1), json!(2)]);
    }
}
