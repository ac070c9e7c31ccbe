//! Safe SQL builder: identifiers quoted, values as typed parameters.

mod builder;
pub mod filter;
pub mod options;
pub mod params;
pub mod row;
pub use builder::*;
pub use filter::apply_filter;
pub use options::{FindOptions, OneOrMany, ResolvedOptions, SortDirection, SortSpec, MAX_LIMIT};
pub use params::*;
pub use row::row_to_record;
