//! Wire details of the shape sync endpoint.
//!
//! Clients fetch a shape with `GET /v1/shape/{table}`. The first request starts at
//! [`Offset::before_all`]; the response carries the shape ID and the offset of its last chunk in
//! headers, which subsequent live requests send back to continue where they left off.

use std::fmt;

/// Path prefix of the shape endpoint.
pub const SHAPE_PATH: &str = "/v1/shape";

/// Response header carrying the offset of the last chunk in the response.
pub const CHUNK_LAST_OFFSET_HEADER: &str = "x-electric-chunk-last-offset";

/// Response header carrying the server-assigned shape ID.
pub const SHAPE_ID_HEADER: &str = "x-electric-shape-id";

/// Query parameter names of the shape endpoint.
pub mod params {
    /// Position in the shape log to continue from.
    pub const OFFSET: &str = "offset";
    /// Shape ID returned by an earlier request.
    pub const SHAPE_ID: &str = "shape_id";
    /// Set to `true` to long-poll for new changes.
    pub const LIVE: &str = "live";
    /// Filter predicate selecting the rows of the shape.
    pub const WHERE: &str = "where";
}

/// Returns the path of the shape endpoint for `table`.
pub fn shape_path(table: &str) -> String {
    format!("{SHAPE_PATH}/{table}")
}

/// Returns `true` if the status code is a successful shape response.
///
/// Both `200 OK` and `204 No Content` count as success.
pub fn is_success(status: u16) -> bool {
    matches!(status, 200 | 204)
}

/// A continuation token marking a position within a shape's change log.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Offset(String);

impl Offset {
    const BEFORE_ALL: &'static str = "-1";

    /// The offset requesting a shape from the beginning of its log.
    pub fn before_all() -> Self {
        Self(Self::BEFORE_ALL.to_owned())
    }

    /// Wraps an offset returned by the server.
    pub fn new(offset: impl Into<String>) -> Self {
        Self(offset.into())
    }

    /// Returns `true` if this offset requests the entire log.
    pub fn is_before_all(&self) -> bool {
        self.0 == Self::BEFORE_ALL
    }

    /// Returns the offset as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A loaded shape that can be followed in live mode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShapeHandle {
    /// The server-assigned shape ID.
    pub shape_id: String,
    /// The last offset received for this shape.
    pub offset: Offset,
}
