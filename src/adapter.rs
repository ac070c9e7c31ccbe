//! The adapter: pool, schema registry, lifecycle hooks and table provisioning.
//! Query and mutation operations live in `service::crud`.

use crate::config::AdapterConfig;
use crate::error::AdapterError;
use crate::hooks::{listener_fn, EventName, HookContext, HookTable, LifecycleEvent, LifecycleListener};
use crate::migration::create_table_sql;
use crate::schema::{Record, Schema, SchemaRegistry};
use crate::service::ValidationReport;
use crate::sql::{quoted, row_to_record, select_by_column_in, PgBindValue, QueryBuf};
use futures_util::future::BoxFuture;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;

pub struct Adapter {
    pool: PgPool,
    registry: Arc<SchemaRegistry>,
    hooks: HookTable,
    config: AdapterConfig,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("identities", &self.registry.identities())
            .field("hooks", &self.hooks)
            .field("test_mode", &self.config.test_mode)
            .finish()
    }
}

impl Adapter {
    /// Build a pool of `config.max_connections` and connect it.
    pub async fn connect(config: AdapterConfig, registry: Arc<SchemaRegistry>) -> Result<Self, AdapterError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(AdapterError::Db)?;
        Ok(Adapter::new(pool, registry, config))
    }

    /// Like `connect` but no connection is opened until the first query.
    pub fn connect_lazy(config: AdapterConfig, registry: Arc<SchemaRegistry>) -> Result<Self, AdapterError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy(&config.database_url)
            .map_err(AdapterError::Db)?;
        Ok(Adapter::new(pool, registry, config))
    }

    pub fn new(pool: PgPool, registry: Arc<SchemaRegistry>, config: AdapterConfig) -> Self {
        Adapter {
            pool,
            registry,
            hooks: HookTable::default(),
            config,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Round-trip to the backend so connection problems surface at startup.
    pub async fn init(&self) -> Result<(), AdapterError> {
        sqlx::query("SELECT NOW()").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool; in-flight queries finish first.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }

    pub fn register_schema(&self, identity: &str, schema: Schema) {
        self.registry.register(identity, schema);
    }

    /// Validate `data` against the registered schema without touching the database.
    pub fn validate(&self, identity: &str, data: &Record) -> Result<ValidationReport, AdapterError> {
        self.registry.get(identity)?.validator.validate(data)
    }

    /// Register a closure for `<identity>:<create|update|delete>:<before|after>`.
    ///
    /// ```ignore
    /// adapter.on("door:create:after", |ctx| Box::pin(async move {
    ///     tracing::info!(identity = ctx.identity, "door created");
    ///     Ok(())
    /// }))?;
    /// ```
    pub fn on<F>(&self, event: &str, listener: F) -> Result<(), AdapterError>
    where
        F: for<'a> Fn(HookContext<'a>) -> BoxFuture<'a, Result<(), AdapterError>> + Send + Sync + 'static,
    {
        let name: EventName = event.parse()?;
        self.hooks.add(name, listener_fn(listener));
        Ok(())
    }

    pub fn on_listener(&self, event: &str, listener: impl LifecycleListener + 'static) -> Result<(), AdapterError> {
        let name: EventName = event.parse()?;
        self.hooks.add(name, Arc::new(listener));
        Ok(())
    }

    pub fn listener_count(&self, event: &str) -> Result<usize, AdapterError> {
        let name: EventName = event.parse()?;
        Ok(self.hooks.count(&name))
    }

    pub(crate) async fn emit(
        &self,
        tx: Option<&mut PgConnection>,
        identity: &str,
        event: LifecycleEvent<'_>,
    ) -> Result<(), AdapterError> {
        self.hooks.emit(self, identity, tx, event).await
    }

    /// The CREATE TABLE statement `create_table` would run.
    pub fn sql_for_create_table(&self, identity: &str, schema: &Schema) -> Result<String, AdapterError> {
        create_table_sql(&identity.to_lowercase(), schema)
    }

    pub async fn create_table(&self, identity: &str, schema: &Schema) -> Result<(), AdapterError> {
        let sql = self.sql_for_create_table(identity, schema)?;
        tracing::info!(identity = %identity, "create table");
        tracing::debug!(sql = %sql, "query");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    fn require_test_mode(&self, operation: &str) -> Result<(), AdapterError> {
        if self.config.test_mode {
            Ok(())
        } else {
            Err(AdapterError::UnauthorizedOperation(format!(
                "{} is forbidden when not in test mode",
                operation
            )))
        }
    }

    /// Test mode only.
    pub async fn drop_table(&self, identity: &str) -> Result<(), AdapterError> {
        self.require_test_mode("drop_table")?;
        let sql = format!("DROP TABLE {}", quoted(&identity.to_lowercase()));
        tracing::info!(identity = %identity, "drop table");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Test mode only. Removes every row and resets the id sequence.
    pub async fn clear_table(&self, identity: &str) -> Result<(), AdapterError> {
        self.require_test_mode("clear_table")?;
        let sql = format!("TRUNCATE {} RESTART IDENTITY", quoted(&identity.to_lowercase()));
        tracing::info!(identity = %identity, "truncate table");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) async fn fetch_all(
        &self,
        tx: Option<&mut PgConnection>,
        q: &QueryBuf,
    ) -> Result<Vec<Record>, AdapterError> {
        let rows = match tx {
            Some(conn) => bind_all(q).fetch_all(conn).await?,
            None => bind_all(q).fetch_all(&self.pool).await?,
        };
        rows.iter().map(row_to_record).collect()
    }

    pub(crate) async fn fetch_optional(
        &self,
        tx: Option<&mut PgConnection>,
        q: &QueryBuf,
    ) -> Result<Option<Record>, AdapterError> {
        let row: Option<PgRow> = match tx {
            Some(conn) => bind_all(q).fetch_optional(conn).await?,
            None => bind_all(q).fetch_optional(&self.pool).await?,
        };
        row.as_ref().map(row_to_record).transpose()
    }

    /// Rows of `identity` whose `column` is one of `values`, ordered by id.
    pub(crate) async fn fetch_where_in(
        &self,
        tx: Option<&mut PgConnection>,
        identity: &str,
        column: &str,
        values: &[Value],
    ) -> Result<Vec<Record>, AdapterError> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let entry = self.registry.get(identity)?;
        let q = select_by_column_in(&entry.identity, &entry.schema, column, values)?;
        self.fetch_all(tx, &q).await
    }
}

fn bind_all(q: &QueryBuf) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}
