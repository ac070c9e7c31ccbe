//! Data services: sanitizing, validation, relation population and the
//! query/mutation operations of the adapter.

mod crud;
pub mod populate;
pub mod sanitize;
mod validation;
pub use crud::is_blank_id;
pub use populate::BINDING_ID;
pub use sanitize::{into_record, sanitize};
pub use validation::{CompiledValidator, ValidationIssue, ValidationReport};
