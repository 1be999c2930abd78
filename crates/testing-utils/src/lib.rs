//! # Stats Testing Utils
//!
//! Shared testing utilities for the statistics aggregation workspace.
//!
//! ## Features
//!
//! - **Mock Repository**: in-memory `StatsRepository` with per-agent failure
//!   injection, an unreachable switch, read latency and a call log
//! - **Mock Runner**: scripted `AggregationRunner` that can be held mid-run
//! - **Test Data Builders**: raw events with sensible defaults
//! - **Helpers**: Beijing-time instants and polling utilities
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! stats-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
