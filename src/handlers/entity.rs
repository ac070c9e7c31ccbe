//! Entity CRUD handlers: find, find one, create, update, delete.
//! Mutations run inside a transaction so listener side effects commit or roll back with them.

use crate::error::AdapterError;
use crate::response::{success_many, success_one, success_one_ok};
use crate::schema::Record;
use crate::sql::{FindOptions, OneOrMany, SortSpec, MAX_LIMIT};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::Value;

/// Path ids that look like integers are bound as numbers, everything else as text.
fn parse_id(id_str: &str) -> Value {
    match id_str.trim().parse::<i64>() {
        Ok(n) => Value::Number(n.into()),
        Err(_) => Value::String(id_str.to_string()),
    }
}

fn parse_count(key: &str, v: &str) -> Result<u64, AdapterError> {
    v.trim()
        .parse::<u64>()
        .map_err(|_| AdapterError::InvalidInput(format!("{} must be a non-negative integer", key)))
}

fn parse_populate(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_sort(v: &str) -> Result<Option<SortSpec>, AdapterError> {
    let v = v.trim();
    if v.is_empty() {
        return Ok(None);
    }
    let bare = v.strip_prefix('-').unwrap_or(v);
    if !bare.is_empty() && bare.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Ok(Some(SortSpec::parse_shorthand(v)));
    }
    serde_json::from_str::<SortSpec>(v)
        .map(Some)
        .map_err(|e| AdapterError::InvalidFilter(format!("sort: {}", e)))
}

/// Split query parameters into a filter and find options. Reserved keys are
/// `sort`, `skip`, `offset`, `limit` and `populate`; a key given more than once
/// becomes a membership filter.
pub fn parse_find_query(params: Vec<(String, String)>) -> Result<(Record, FindOptions), AdapterError> {
    let mut options = FindOptions::default();
    let mut filter = Record::new();
    for (k, v) in params {
        match k.as_str() {
            "sort" => options.sort = parse_sort(&v)?,
            "skip" => options.skip = Some(parse_count("skip", &v)?),
            "offset" => options.offset = Some(parse_count("offset", &v)?),
            "limit" => options.limit = Some(parse_count("limit", &v)?.min(MAX_LIMIT)),
            "populate" => options.populate = Some(OneOrMany::Many(parse_populate(&v))),
            _ => match filter.get_mut(&k) {
                Some(Value::Array(items)) => items.push(Value::String(v)),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(v)]);
                }
                None => {
                    filter.insert(k, Value::String(v));
                }
            },
        }
    }
    Ok((filter, options))
}

fn populate_param(params: &[(String, String)]) -> Vec<String> {
    params
        .iter()
        .filter(|(k, _)| k == "populate")
        .flat_map(|(_, v)| parse_populate(v))
        .collect()
}

pub async fn find(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AdapterError> {
    let (filter, options) = parse_find_query(params)?;
    let total = state.adapter.count(None, &identity, &filter).await?;
    let rows = state.adapter.find(None, &identity, &filter, options).await?;
    Ok(success_many(rows, total))
}

pub async fn find_one(
    State(state): State<AppState>,
    Path((identity, id_str)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AdapterError> {
    let id = parse_id(&id_str);
    if crate::service::is_blank_id(&id) {
        return Err(AdapterError::IdRequired);
    }
    let mut filter = Record::new();
    filter.insert("id".to_string(), id);
    let options = FindOptions::default().populate(populate_param(&params));
    let row = state
        .adapter
        .find_one(None, &identity, &filter, options)
        .await?
        .ok_or_else(|| AdapterError::IdNotFound {
            identity: identity.to_lowercase(),
            id: id_str,
        })?;
    Ok(success_one_ok(row))
}

pub async fn create(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AdapterError> {
    state.adapter.registry().get(&identity)?;
    let populate = populate_param(&params);
    let mut tx = state.adapter.pool().begin().await?;
    let row = state.adapter.insert(Some(&mut *tx), &identity, body, &populate).await?;
    tx.commit().await?;
    Ok(success_one(row))
}

pub async fn update(
    State(state): State<AppState>,
    Path((identity, id_str)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AdapterError> {
    state.adapter.registry().get(&identity)?;
    let id = parse_id(&id_str);
    let mut tx = state.adapter.pool().begin().await?;
    let row = state.adapter.update(Some(&mut *tx), &identity, &id, body).await?;
    tx.commit().await?;
    Ok(success_one_ok(row))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((identity, id_str)): Path<(String, String)>,
) -> Result<impl IntoResponse, AdapterError> {
    state.adapter.registry().get(&identity)?;
    let id = parse_id(&id_str);
    if crate::service::is_blank_id(&id) {
        return Err(AdapterError::IdRequired);
    }
    let mut tx = state.adapter.pool().begin().await?;
    let old = state.adapter.delete(Some(&mut *tx), &identity, &id).await?;
    tx.commit().await?;
    let old = old.ok_or_else(|| AdapterError::IdNotFound {
        identity: identity.to_lowercase(),
        id: id_str,
    })?;
    Ok(success_one_ok(old))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::SortDirection;
    use serde_json::json;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn splits_options_from_filter() {
        let (filter, options) = parse_find_query(pairs(&[
            ("sort", "-name"),
            ("skip", "10"),
            ("limit", "5000"),
            ("populate", "door, zone"),
            ("floor", ">:1"),
        ]))
        .unwrap();
        assert_eq!(filter, json!({ "floor": ">:1" }).as_object().cloned().unwrap());
        assert_eq!(options.limit, Some(MAX_LIMIT));
        assert_eq!(options.skip, Some(10));
        assert_eq!(
            options.sort.unwrap().0,
            vec![("name".to_string(), SortDirection::Desc)]
        );
        assert_eq!(options.populate, Some(OneOrMany::Many(vec!["door".into(), "zone".into()])));
    }

    #[test]
    fn json_sort_keeps_key_order() {
        let (_, options) = parse_find_query(pairs(&[("sort", r#"{"floor":-1,"name":1}"#)])).unwrap();
        assert_eq!(
            options.sort.unwrap().0,
            vec![
                ("floor".to_string(), SortDirection::Desc),
                ("name".to_string(), SortDirection::Asc)
            ]
        );
        assert!(matches!(
            parse_find_query(pairs(&[("sort", "{broken")])),
            Err(AdapterError::InvalidFilter(_))
        ));
    }

    #[test]
    fn repeated_keys_become_membership_filters() {
        let (filter, _) = parse_find_query(pairs(&[("id", "1"), ("id", "2"), ("id", "3")])).unwrap();
        assert_eq!(filter["id"], json!(["1", "2", "3"]));
    }

    #[test]
    fn bad_paging_is_rejected() {
        assert!(matches!(
            parse_find_query(pairs(&[("limit", "ten")])),
            Err(AdapterError::InvalidInput(_))
        ));
    }

    #[test]
    fn ids_keep_their_natural_type() {
        assert_eq!(parse_id("42"), json!(42));
        assert_eq!(parse_id("abc"), json!("abc"));
    }
}
