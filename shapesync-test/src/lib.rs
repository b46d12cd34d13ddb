//! Test utilities for the shape sync load tester.
//!
//! This crate provides utilities to facilitate testing the load tester against a shape API. See
//! the modules for all available utilities.

pub mod server;
pub mod tracing;
