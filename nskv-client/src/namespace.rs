//! # Namespaced Keys
//!
//! Every key or pattern sent to the store is `seg1:seg2:...:base`, or `base`
//! verbatim when no segments are given.
//!
//! Segments are joined as-is. A segment that itself contains `:` is not
//! escaped, so `["a:b"]` and `["a", "b"]` address the same keys.

/// Separator placed between namespace segments and the base key.
pub const SEPARATOR: &str = ":";

/// Pattern matching every key.
pub const PATTERN_ALL: &str = "*";

/// Builds the fully-qualified key or pattern.
pub fn resolve(base: &str, segments: &[&str]) -> String {
    if segments.is_empty() {
        return base.to_string();
    }

    let len = segments.iter().map(|s| s.len() + SEPARATOR.len()).sum::<usize>() + base.len();
    let mut key = String::with_capacity(len);
    for segment in segments {
        key.push_str(segment);
        key.push_str(SEPARATOR);
    }
    key.push_str(base);
    key
}
