//! This is a load testing library which runs [`Workload`]s against a shape sync API.
//!
//! A *shape* is a filtered subset of a table that clients load once and then follow for changes.
//! Every simulated user selects its shapes by a random contiguous range of row identifiers, see
//! [`shapesync_types::ShapeRange`].
//!
//! Two scenarios are supported:
//!
//! - *Sync* users load a freshly drawn shape from the beginning in every iteration.
//! - *Live* users load one shape, then long-poll it in live mode, following the offsets the server
//!   returns.
//!
//! Users of a workload are started at a configurable spawn rate, and every user iteration is
//! paced to a minimum duration. Latencies are collected in sketches and printed at the end of
//! the run, and can be written as JSON reports.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod http;
pub mod loadtest;
pub mod observability;
pub mod report;
pub mod workload;

pub use crate::loadtest::run;
pub use crate::workload::Workload;
