pub mod aggregation;
pub mod bucket;

pub use aggregation::{plan_chunks, AgentOutcome, AggregationWorker};
pub use bucket::BucketAccumulator;
