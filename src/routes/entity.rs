//! Entity CRUD routes. The first path segment is the schema identity.

use crate::handlers::entity::{create, delete as delete_handler, find, find_one, update};
use crate::state::AppState;
use axum::{routing::get, Router};
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn entity_routes(state: AppState) -> Router {
    Router::new()
        .route("/:identity", get(find).post(create))
        .route(
            "/:identity/:id",
            get(find_one).put(update).delete(delete_handler),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}
