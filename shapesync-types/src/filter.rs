//! Random identifier ranges rendered as shape `where` predicates.
//!
//! A [`ShapeRange`] describes an identifier space of `total_size` rows and the width of the
//! shapes drawn from it. Each call to [`ShapeRange::sample`] picks a random start index and
//! yields a [`RangeFilter`], which renders as
//!
//! ```text
//! id>='00000000-0000-0000-0000-000000000023' and id<='00000000-0000-0000-0000-000000000033'
//! ```
//!
//! The number of variable digits is the digit count of `total_size`, so the lower and upper
//! identifiers always have the same length and compare lexicographically like their indexes.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::id::{self, MAX_DIGITS};

/// The column that shapes are filtered on.
pub const ID_COLUMN: &str = "id";

/// Errors that can occur when constructing a [`ShapeRange`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum InvalidRangeError {
    /// The shape size is zero.
    #[error("shape size must be positive")]
    ZeroShapeSize,

    /// The identifier space is empty.
    #[error("total size must be positive")]
    ZeroTotalSize,

    /// A shape does not fit into the identifier space.
    #[error("shape size {shape_size} exceeds total size {total_size}")]
    ShapeExceedsTotal {
        /// The requested shape size.
        shape_size: u64,
        /// The size of the identifier space.
        total_size: u64,
    },

    /// The identifier space needs more variable digits than the template provides.
    #[error("total size {0} needs more than {MAX_DIGITS} identifier digits")]
    TooWide(u64),

    /// The number of shapes times the shape size does not fit into a `u64`.
    #[error("{num_shapes} shapes of size {shape_size} overflow the identifier space")]
    Overflow {
        /// The requested shape size.
        shape_size: u64,
        /// The requested number of shapes.
        num_shapes: u64,
    },
}

/// Whether the upper identifier of a range is part of the shape.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpperBound {
    /// Closed range, rendered as `id<='..'`.
    #[default]
    Inclusive,
    /// Half-open range, rendered as `id<'..'`.
    Exclusive,
}

impl UpperBound {
    fn operator(self) -> &'static str {
        match self {
            UpperBound::Inclusive => "<=",
            UpperBound::Exclusive => "<",
        }
    }
}

/// How the start index of a shape is chosen.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Placement {
    /// Any start index in `[0, total_size - shape_size]`.
    #[default]
    Anywhere,
    /// Start indexes are multiples of the shape size, so the space is partitioned into shapes.
    Aligned,
}

/// A validated identifier space from which shapes of a fixed size are drawn.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ShapeRange {
    shape_size: u64,
    total_size: u64,
    width: usize,
    upper: UpperBound,
    placement: Placement,
}

impl ShapeRange {
    /// Creates a range drawing shapes of `shape_size` rows anywhere in `total_size` rows.
    pub fn new(
        shape_size: u64,
        total_size: u64,
        upper: UpperBound,
    ) -> Result<Self, InvalidRangeError> {
        if shape_size == 0 {
            return Err(InvalidRangeError::ZeroShapeSize);
        }
        if total_size == 0 {
            return Err(InvalidRangeError::ZeroTotalSize);
        }
        if shape_size > total_size {
            return Err(InvalidRangeError::ShapeExceedsTotal {
                shape_size,
                total_size,
            });
        }

        let width = id::digits(total_size);
        if width > MAX_DIGITS {
            return Err(InvalidRangeError::TooWide(total_size));
        }

        Ok(Self {
            shape_size,
            total_size,
            width,
            upper,
            placement: Placement::Anywhere,
        })
    }

    /// Creates a range partitioned into `num_shapes` shapes of `shape_size` rows each.
    ///
    /// Every sampled shape starts at a multiple of `shape_size`.
    pub fn aligned(
        shape_size: u64,
        num_shapes: u64,
        upper: UpperBound,
    ) -> Result<Self, InvalidRangeError> {
        let total_size = shape_size
            .checked_mul(num_shapes)
            .ok_or(InvalidRangeError::Overflow {
                shape_size,
                num_shapes,
            })?;

        let mut range = Self::new(shape_size, total_size, upper)?;
        range.placement = Placement::Aligned;
        Ok(range)
    }

    /// The number of rows in each shape.
    pub fn shape_size(&self) -> u64 {
        self.shape_size
    }

    /// The number of rows in the identifier space.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// The number of variable identifier digits.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Whether rendered filters include the upper identifier.
    pub fn upper_bound(&self) -> UpperBound {
        self.upper
    }

    /// How start indexes are drawn.
    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// The largest start index that keeps a shape inside the identifier space.
    fn max_start(&self) -> u64 {
        self.total_size - self.shape_size
    }

    /// Draws a random shape from the identifier space.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> RangeFilter {
        let start = match self.placement {
            Placement::Anywhere => rng.random_range(0..=self.max_start()),
            Placement::Aligned => {
                let max_index = self.max_start() / self.shape_size;
                rng.random_range(0..=max_index) * self.shape_size
            }
        };

        self.render(start)
    }

    /// Returns the shape starting at `start`, or `None` if it does not fit into the space.
    ///
    /// This ignores the placement, so unaligned starts are accepted for aligned ranges.
    pub fn at(&self, start: u64) -> Option<RangeFilter> {
        (start <= self.max_start()).then(|| self.render(start))
    }

    fn render(&self, start: u64) -> RangeFilter {
        let end = start + self.shape_size;
        RangeFilter {
            start,
            end,
            lower_id: id::format_id(start, self.width),
            upper_id: id::format_id(end, self.width),
            upper: self.upper,
        }
    }
}

/// A single shape: a contiguous range of row identifiers.
///
/// The [`Display`](fmt::Display) implementation renders the `where` predicate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RangeFilter {
    start: u64,
    end: u64,
    lower_id: String,
    upper_id: String,
    upper: UpperBound,
}

impl RangeFilter {
    /// The first row index of the shape.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// The row index `shape_size` rows after the start.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// The identifier of the first row.
    pub fn lower_id(&self) -> &str {
        &self.lower_id
    }

    /// The identifier of the upper bound.
    pub fn upper_id(&self) -> &str {
        &self.upper_id
    }

    /// Whether the upper identifier is part of the shape.
    pub fn upper_bound(&self) -> UpperBound {
        self.upper
    }
}

impl fmt::Display for RangeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ID_COLUMN}>='{}' and {ID_COLUMN}{}'{}'",
            self.lower_id,
            self.upper.operator(),
            self.upper_id
        )
    }
}

/// Draws a random shape of `shape_size` rows out of `total_size` rows.
///
/// This validates the sizes on every call. Use [`ShapeRange`] to validate once and sample
/// repeatedly.
pub fn build_range_filter<R: Rng>(
    rng: &mut R,
    shape_size: u64,
    total_size: u64,
    upper: UpperBound,
) -> Result<RangeFilter, InvalidRangeError> {
    Ok(ShapeRange::new(shape_size, total_size, upper)?.sample(rng))
}
