//! Shared types for load testing a shape sync API.
//!
//! A *shape* is a filtered subset of a table that clients subscribe to. The load tester selects
//! shapes by a contiguous range of row identifiers, which are rendered into a fixed-width
//! identifier template so that lexicographic and numeric order coincide.
//!
//! - [`id`] renders numeric row indexes as identifiers.
//! - [`filter`] draws random identifier ranges and renders them as `where` predicates.
//! - [`protocol`] holds the query parameters, headers and offsets of the sync endpoint.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod filter;
pub mod id;
pub mod protocol;

pub use crate::filter::{
    InvalidRangeError, Placement, RangeFilter, ShapeRange, UpperBound, build_range_filter,
};
