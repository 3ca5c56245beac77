//! Analysis result handling.
//!
//! Outcomes produced by the worker pool are merged here into a run report.

pub mod aggregator;

pub use aggregator::ResultAggregator;
