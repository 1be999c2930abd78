pub mod aggregation;
pub mod repository;

pub use aggregation::*;
pub use repository::*;
