//! Entity schemas and the registry that owns them for the adapter's lifetime.

pub mod loader;
pub mod registry;
pub mod types;

pub use loader::*;
pub use registry::*;
pub use types::*;

/// One table row (or a caller-supplied blank for one), keyed by column name.
pub type Record = serde_json::Map<String, serde_json::Value>;
