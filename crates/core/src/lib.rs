pub mod calendar;
pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use self::config::*;
pub use errors::*;
pub use models::{
    AgentError, AgentStatAggregate, EventKind, RawEvent, RunMode, RunRequest, RunResult,
    RunTargets, SchedulerStatus, StatCounters, ALL_GROUP_KEY, WILDCARD_AGENT_ID,
};
pub use traits::{AggregationRunner, StatsRepository};
