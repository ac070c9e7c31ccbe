//! HTTP handlers for entity CRUD over registered schemas.

pub mod entity;
pub use entity::*;
