//! Fixed-width row identifiers.
//!
//! Rows of the table under test are keyed by UUID-shaped identifiers whose last digits encode
//! the row index, for example `00000000-0000-0000-0000-000000000042`. All identifiers in one
//! identifier space use the same number of variable digits, so every identifier has the length
//! of [`ID_TEMPLATE`].

/// The constant identifier that variable digits are substituted into.
pub const ID_TEMPLATE: &str = "00000000-0000-0000-0000-000000000000";

/// The maximum number of variable digits, which is the length of the last template group.
pub const MAX_DIGITS: usize = 12;

/// Returns the number of decimal digits of `n`.
///
/// Zero has one digit.
pub fn digits(n: u64) -> usize {
    n.checked_ilog10().map_or(1, |d| d as usize + 1)
}

/// Renders `value` as an identifier with `width` variable digits.
///
/// The value is zero-padded to `width` and replaces the trailing `width` characters of
/// [`ID_TEMPLATE`]. `width` must be at most [`MAX_DIGITS`] and at least `digits(value)`.
pub fn format_id(value: u64, width: usize) -> String {
    debug_assert!(width <= MAX_DIGITS);
    debug_assert!(digits(value) <= width);

    let prefix = &ID_TEMPLATE[..ID_TEMPLATE.len() - width];
    format!("{prefix}{value:0width$}")
}
