//! Schema adapter: schema-driven data access over Postgres, with lifecycle
//! hooks, relation population and a REST surface.

pub mod adapter;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod migration;
pub mod response;
pub mod routes;
pub mod schema;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use adapter::Adapter;
pub use config::AdapterConfig;
pub use error::{AdapterError, ConfigError};
pub use hooks::{listener_fn, EventName, HookContext, LifecycleEvent, LifecycleListener, Operation, Phase};
pub use migration::create_table_sql;
pub use response::{success_many, success_one, success_one_ok};
pub use routes::{common_routes, common_routes_with_ready, entity_routes};
pub use schema::{Record, Schema, SchemaRegistry};
pub use service::{ValidationIssue, ValidationReport, BINDING_ID};
pub use sql::{FindOptions, SortDirection, SortSpec};
pub use state::AppState;
pub use store::ensure_database_exists;
