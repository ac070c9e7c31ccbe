//! Shared application state for all routes.

use crate::adapter::Adapter;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub adapter: Arc<Adapter>,
}

impl AppState {
    pub fn new(adapter: Adapter) -> Self {
        AppState {
            adapter: Arc::new(adapter),
        }
    }
}
