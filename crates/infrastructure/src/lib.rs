pub mod database;
pub mod dirty_set;
pub mod observability;

pub use database::*;
pub use dirty_set::{DirtyMarker, DirtySet};
pub use observability::*;
