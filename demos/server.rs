//! Demo server: registers every model under MODELS_DIR, creates missing tables
//! and serves the REST surface.

use schema_adapter::{
    common_routes_with_ready, ensure_database_exists, entity_routes, schema::register_dir, Adapter, AdapterConfig,
    AppState, SchemaRegistry,
};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("schema_adapter=info".parse()?))
        .init();

    let config = AdapterConfig::from_env()?;
    ensure_database_exists(&config.database_url).await?;

    let registry = Arc::new(SchemaRegistry::new());
    let models_dir = std::env::var("MODELS_DIR").unwrap_or_else(|_| "demos/models".into());
    let identities = register_dir(&registry, &models_dir).await?;
    tracing::info!(count = identities.len(), dir = %models_dir, "models registered");

    let adapter = Adapter::connect(config, registry.clone()).await?;
    adapter.init().await?;
    for identity in &identities {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(format!("\"{}\"", identity))
            .fetch_one(adapter.pool())
            .await?;
        if !exists {
            let entry = registry.get(identity)?;
            adapter.create_table(identity, &entry.schema).await?;
        }
    }

    adapter.on("user:create:after", |ctx| {
        Box::pin(async move {
            if let schema_adapter::LifecycleEvent::AfterCreate { record } = ctx.event {
                tracing::info!(id = ?record.get("id"), "user created");
            }
            Ok(())
        })
    })?;

    let state = AppState::new(adapter);
    let app = Router::new()
        .merge(common_routes_with_ready(state.clone()))
        .nest("/api", entity_routes(state));

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
