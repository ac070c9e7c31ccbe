//! Query and mutation operations. Each takes an optional transaction handle
//! that every statement of the call runs on, including hook side effects and
//! relation population.

use crate::adapter::Adapter;
use crate::error::AdapterError;
use crate::hooks::LifecycleEvent;
use crate::schema::Record;
use crate::service::populate::populate;
use crate::service::sanitize::{into_record, sanitize, to_iso};
use crate::sql::{self, FindOptions};
use serde_json::Value;
use sqlx::PgConnection;

/// `null`, `false`, `0` and `""` do not identify a row.
pub fn is_blank_id(id: &Value) -> bool {
    match id {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn drop_nulls(record: Record) -> Record {
    record.into_iter().filter(|(_, v)| !v.is_null()).collect()
}

fn id_text(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn id_filter(id: &Value) -> Record {
    let mut filter = Record::new();
    filter.insert("id".to_string(), id.clone());
    filter
}

impl Adapter {
    /// Rows matching `filter`, shaped by `options` (paging, projection, sort, populate).
    pub async fn find(
        &self,
        mut tx: Option<&mut PgConnection>,
        identity: &str,
        filter: &Record,
        options: FindOptions,
    ) -> Result<Vec<Record>, AdapterError> {
        let entry = self.registry().get(identity)?;
        let opts = options.resolve(self.config().default_limit);
        let q = sql::select(&entry.identity, &entry.schema, filter, &opts)?;
        let mut rows = self.fetch_all(tx.as_deref_mut(), &q).await?;
        if !opts.populate.is_empty() {
            populate(self, tx, &entry.identity, &mut rows, &opts.populate).await?;
        }
        Ok(rows)
    }

    /// First row of `find`; the limit defaults to 1 unless the caller sets one.
    pub async fn find_one(
        &self,
        tx: Option<&mut PgConnection>,
        identity: &str,
        filter: &Record,
        mut options: FindOptions,
    ) -> Result<Option<Record>, AdapterError> {
        if options.limit.is_none() {
            options.limit = Some(1);
        }
        Ok(self.find(tx, identity, filter, options).await?.into_iter().next())
    }

    pub async fn count(
        &self,
        tx: Option<&mut PgConnection>,
        identity: &str,
        filter: &Record,
    ) -> Result<i64, AdapterError> {
        let entry = self.registry().get(identity)?;
        let q = sql::count(&entry.identity, &entry.schema, filter)?;
        let row = self.fetch_optional(tx, &q).await?;
        Ok(row.and_then(|r| r.get("count").and_then(Value::as_i64)).unwrap_or(0))
    }

    /// Sanitize, validate, emit `create:before`, insert, emit `create:after`, then
    /// populate `populate` on the new row.
    pub async fn insert(
        &self,
        mut tx: Option<&mut PgConnection>,
        identity: &str,
        data: Value,
        populate_relations: &[String],
    ) -> Result<Record, AdapterError> {
        let entry = self.registry().get(identity)?;
        let mut data = into_record(data)?;
        if data.get("id").map(is_blank_id).unwrap_or(false) {
            data.remove("id");
        }
        let fixed = sanitize(&entry.identity, &entry.schema, &data)?;
        entry.validator.validate(&drop_nulls(fixed.clone()))?.into_result()?;

        self.emit(tx.as_deref_mut(), &entry.identity, LifecycleEvent::BeforeCreate { data: &fixed })
            .await?;
        let q = sql::insert(&entry.identity, &entry.schema, &fixed)?;
        let item = self
            .fetch_optional(tx.as_deref_mut(), &q)
            .await?
            .ok_or(AdapterError::Db(sqlx::Error::RowNotFound))?;
        self.emit(tx.as_deref_mut(), &entry.identity, LifecycleEvent::AfterCreate { record: &item })
            .await?;

        let mut items = [item];
        if !populate_relations.is_empty() {
            populate(self, tx, &entry.identity, &mut items, populate_relations).await?;
        }
        let [item] = items;
        Ok(item)
    }

    /// Patch the row with `id`. The merged row (current values overlaid with the
    /// patch, nulls dropped) must pass validation as a whole.
    pub async fn update(
        &self,
        mut tx: Option<&mut PgConnection>,
        identity: &str,
        id: &Value,
        patch: Value,
    ) -> Result<Record, AdapterError> {
        if is_blank_id(id) {
            return Err(AdapterError::IdRequired);
        }
        let entry = self.registry().get(identity)?;
        let patch = into_record(patch)?;
        let mut fixed = sanitize(&entry.identity, &entry.schema, &patch)?;
        let old = self
            .find_one(tx.as_deref_mut(), &entry.identity, &id_filter(id), FindOptions::default())
            .await?
            .ok_or_else(|| AdapterError::IdNotFound {
                identity: entry.identity.clone(),
                id: id_text(id),
            })?;

        let mut merged = old.clone();
        merged.extend(fixed.clone());
        let merged = sanitize(&entry.identity, &entry.schema, &drop_nulls(merged))?;
        entry.validator.validate(&merged)?.into_result()?;

        self.emit(
            tx.as_deref_mut(),
            &entry.identity,
            LifecycleEvent::BeforeUpdate { old: &old, patch: &fixed },
        )
        .await?;

        if entry.schema.timestamps {
            fixed.insert("updatedAt".to_string(), Value::String(to_iso(&chrono::Utc::now())));
        }
        let item = match sql::update(&entry.identity, &entry.schema, id, &fixed)? {
            Some(q) => self.fetch_optional(tx.as_deref_mut(), &q).await?.ok_or_else(|| {
                AdapterError::IdNotFound {
                    identity: entry.identity.clone(),
                    id: id_text(id),
                }
            })?,
            None => old.clone(),
        };
        self.emit(
            tx.as_deref_mut(),
            &entry.identity,
            LifecycleEvent::AfterUpdate { old: &old, new: &item },
        )
        .await?;
        Ok(item)
    }

    /// Delete the row with `id`. Returns the row as it was, or `None` when there was none.
    pub async fn delete(
        &self,
        mut tx: Option<&mut PgConnection>,
        identity: &str,
        id: &Value,
    ) -> Result<Option<Record>, AdapterError> {
        if is_blank_id(id) {
            return Err(AdapterError::IdRequired);
        }
        let entry = self.registry().get(identity)?;
        let old = self
            .find_one(tx.as_deref_mut(), &entry.identity, &id_filter(id), FindOptions::default())
            .await?;
        self.emit(
            tx.as_deref_mut(),
            &entry.identity,
            LifecycleEvent::BeforeDelete { old: old.as_ref() },
        )
        .await?;
        let q = sql::delete(&entry.identity, &entry.schema, id)?;
        self.fetch_all(tx.as_deref_mut(), &q).await?;
        self.emit(
            tx.as_deref_mut(),
            &entry.identity,
            LifecycleEvent::AfterDelete { old: old.as_ref() },
        )
        .await?;
        Ok(old)
    }
}
